//! Errors surfaced by the query core.
//!
//! Nothing inside the core retries or swallows these; every variant reaches
//! the caller as-is. Contradictory constraints are not errors, they evaluate
//! to a `false` literal.

use std::error::Error as StdError;

#[derive(Debug, thiserror::Error)]
pub enum UnisonError {
    /// An alias or condition path does not resolve against the schema.
    ///
    /// `subject` is the offending alias mapping or condition fragment.
    #[error("Bad query in '{subject}': {reason}")]
    BadQuery { subject: String, reason: String },

    /// An expression referenced a name absent from the evaluation context.
    #[error("Missing variable: '{0}'")]
    MissingVariable(String),

    /// A many-to-one lookup was attempted without a full identity key.
    #[error(
        "Ambiguous lookup on '{access_point}': identity needs {expected} value(s), got {got}"
    )]
    AmbiguousLookup {
        access_point: String,
        expected: usize,
        got: usize,
    },

    /// An operator was applied to values it does not accept.
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error(transparent)]
    InvalidRegex(#[from] regex::Error),

    #[error("Unknown access point: '{0}'")]
    UnknownAccessPoint(String),

    #[error("No result matching {0}")]
    NotFound(String),

    #[error("Multiple results matching {0}")]
    MultipleResults(String),

    #[error("Invalid setting: {0}")]
    InvalidSetting(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Opaque error raised by a backend, propagated unchanged.
    #[error(transparent)]
    Backend(Box<dyn StdError + Send + Sync>),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl UnisonError {
    pub fn bad_query(subject: impl Into<String>, reason: impl Into<String>) -> Self {
        UnisonError::BadQuery {
            subject: subject.into(),
            reason: reason.into(),
        }
    }

    pub fn backend(err: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        UnisonError::Backend(err.into())
    }
}

pub type Result<T, E = UnisonError> = std::result::Result<T, E>;

/// Build an `UnisonError::Internal` from format arguments.
#[macro_export]
macro_rules! internal {
    ($($arg:tt)*) => {
        $crate::UnisonError::Internal(std::format!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_query_display() {
        let err = UnisonError::bad_query("label: children.nope", "no property 'nope' on 'child'");
        assert_eq!(
            "Bad query in 'label: children.nope': no property 'nope' on 'child'",
            err.to_string()
        );
    }

    #[test]
    fn backend_error_is_transparent() {
        let io = std::io::Error::other("connection reset");
        let err = UnisonError::backend(io);
        assert_eq!("connection reset", err.to_string());
    }

    #[test]
    fn internal_macro() {
        let err = internal!("unexpected stage {}", 3);
        assert!(matches!(err, UnisonError::Internal(msg) if msg == "unexpected stage 3"));
    }
}
