use std::collections::HashMap;
use std::sync::LazyLock;

use unison_error::{Result, UnisonError};

use crate::scalar::ScalarValue;

/// Per-session knobs read by the registry and view resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub enable_pushdown: bool,
    pub verify_pushdown: bool,
    pub max_relation_depth: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            enable_pushdown: true,
            verify_pushdown: false,
            max_relation_depth: DEFAULT_MAX_RELATION_DEPTH,
        }
    }
}

impl SessionConfig {
    pub fn set_from_scalar(&mut self, name: &str, value: ScalarValue) -> Result<()> {
        let func = lookup(name)?;
        (func.set)(value, self)
    }

    pub fn get_as_scalar(&self, name: &str) -> Result<ScalarValue> {
        let func = lookup(name)?;
        Ok((func.get)(self))
    }

    pub fn reset(&mut self, name: &str) -> Result<()> {
        let func = lookup(name)?;
        let scalar = (func.get)(&Self::default());
        (func.set)(scalar, self)
    }

    pub fn reset_all(&mut self) {
        *self = Self::default();
    }

    /// Names and descriptions of every setting, sorted by name.
    pub fn describe() -> Vec<(&'static str, &'static str)> {
        let mut settings: Vec<_> = GET_SET_FUNCTIONS
            .iter()
            .map(|(name, func)| (*name, func.description))
            .collect();
        settings.sort_unstable();
        settings
    }
}

fn lookup(name: &str) -> Result<&'static SettingFunctions> {
    GET_SET_FUNCTIONS
        .get(name)
        .ok_or_else(|| UnisonError::InvalidSetting(format!("Missing setting for '{name}'")))
}

struct SettingFunctions {
    description: &'static str,
    set: fn(scalar: ScalarValue, conf: &mut SessionConfig) -> Result<()>,
    get: fn(conf: &SessionConfig) -> ScalarValue,
}

impl SettingFunctions {
    const fn new<S: SessionSetting>() -> Self {
        SettingFunctions {
            description: S::DESCRIPTION,
            set: S::set_from_scalar as _,
            get: S::get_as_scalar as _,
        }
    }
}

const SETTINGS: [(&str, SettingFunctions); 3] = [
    setting::<EnablePushdown>(),
    setting::<VerifyPushdown>(),
    setting::<MaxRelationDepth>(),
];

const fn setting<S: SessionSetting>() -> (&'static str, SettingFunctions) {
    (S::NAME, SettingFunctions::new::<S>())
}

static GET_SET_FUNCTIONS: LazyLock<HashMap<&'static str, SettingFunctions>> =
    LazyLock::new(|| SETTINGS.into_iter().collect());

pub trait SessionSetting: Sync + Send + 'static {
    const NAME: &'static str;
    const DESCRIPTION: &'static str;

    fn set_from_scalar(scalar: ScalarValue, conf: &mut SessionConfig) -> Result<()>;
    fn get_as_scalar(conf: &SessionConfig) -> ScalarValue;
}

fn expect_bool(name: &str, scalar: &ScalarValue) -> Result<bool> {
    scalar
        .try_as_bool()
        .map_err(|_| UnisonError::InvalidSetting(format!("'{name}' expects a boolean, got {scalar}")))
}

pub struct EnablePushdown;

impl SessionSetting for EnablePushdown {
    const NAME: &'static str = "enable_pushdown";
    const DESCRIPTION: &'static str =
        "Send isolated condition fragments to access points instead of filtering in memory";

    fn set_from_scalar(scalar: ScalarValue, conf: &mut SessionConfig) -> Result<()> {
        conf.enable_pushdown = expect_bool(Self::NAME, &scalar)?;
        Ok(())
    }

    fn get_as_scalar(conf: &SessionConfig) -> ScalarValue {
        conf.enable_pushdown.into()
    }
}

pub struct VerifyPushdown;

impl SessionSetting for VerifyPushdown {
    const NAME: &'static str = "verify_pushdown";
    const DESCRIPTION: &'static str =
        "Re-check pushed conditions in memory even when the access point claims exact support";

    fn set_from_scalar(scalar: ScalarValue, conf: &mut SessionConfig) -> Result<()> {
        conf.verify_pushdown = expect_bool(Self::NAME, &scalar)?;
        Ok(())
    }

    fn get_as_scalar(conf: &SessionConfig) -> ScalarValue {
        conf.verify_pushdown.into()
    }
}

pub const DEFAULT_MAX_RELATION_DEPTH: u64 = 8;

const MIN_RELATION_DEPTH: i64 = 1;
const MAX_RELATION_DEPTH: i64 = 64;

pub struct MaxRelationDepth;

impl SessionSetting for MaxRelationDepth {
    const NAME: &'static str = "max_relation_depth";
    const DESCRIPTION: &'static str = "Maximum number of relations a view path may traverse";

    fn set_from_scalar(scalar: ScalarValue, conf: &mut SessionConfig) -> Result<()> {
        let val = scalar.try_as_i64().map_err(|_| {
            UnisonError::InvalidSetting(format!("'{}' expects an integer, got {scalar}", Self::NAME))
        })?;

        if val < MIN_RELATION_DEPTH {
            return Err(UnisonError::InvalidSetting(format!(
                "Relation depth cannot be less than {MIN_RELATION_DEPTH}"
            )));
        }

        if val > MAX_RELATION_DEPTH {
            return Err(UnisonError::InvalidSetting(format!(
                "Relation depth cannot be greater than {MAX_RELATION_DEPTH}"
            )));
        }

        conf.max_relation_depth = val as u64;
        Ok(())
    }

    fn get_as_scalar(conf: &SessionConfig) -> ScalarValue {
        ScalarValue::Int64(conf.max_relation_depth as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setting_names_are_unique() {
        assert_eq!(SETTINGS.len(), GET_SET_FUNCTIONS.len());
    }

    #[test]
    fn set_setting_exists() {
        let mut conf = SessionConfig::default();
        conf.set_from_scalar("enable_pushdown", false.into()).unwrap();

        let val = conf.get_as_scalar("enable_pushdown").unwrap();
        assert!(!val.try_as_bool().unwrap());
    }

    #[test]
    fn set_setting_not_exists() {
        let mut conf = SessionConfig::default();
        let err = conf.set_from_scalar("hello_world", 58.into()).unwrap_err();
        assert!(matches!(err, UnisonError::InvalidSetting(_)));
    }

    #[test]
    fn set_wrong_type() {
        let mut conf = SessionConfig::default();
        let err = conf.set_from_scalar("max_relation_depth", "deep".into()).unwrap_err();
        assert!(matches!(err, UnisonError::InvalidSetting(_)));
        conf.set_from_scalar("max_relation_depth", 0.into()).unwrap_err();
        assert_eq!(DEFAULT_MAX_RELATION_DEPTH, conf.max_relation_depth);
    }

    #[test]
    fn reset_restores_default() {
        let mut conf = SessionConfig::default();
        conf.set_from_scalar("max_relation_depth", 2.into()).unwrap();
        conf.set_from_scalar("verify_pushdown", true.into()).unwrap();
        conf.reset("max_relation_depth").unwrap();
        assert_eq!(DEFAULT_MAX_RELATION_DEPTH, conf.max_relation_depth);
        assert!(conf.verify_pushdown);

        conf.reset_all();
        assert_eq!(SessionConfig::default(), conf);
    }

    #[test]
    fn describe_lists_all() {
        let names: Vec<_> = SessionConfig::describe().into_iter().map(|(n, _)| n).collect();
        assert_eq!(vec!["enable_pushdown", "max_relation_depth", "verify_pushdown"], names);
    }
}
