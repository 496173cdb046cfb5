pub mod condition;
pub mod config;
pub mod expr;
pub mod isolate;
pub mod query;
pub mod record;
pub mod scalar;

pub use condition::{BooleanNode, Condition, PropertyPath};
pub use expr::{ComparisonOperator, Expression};
pub use query::{Query, Stage};
pub use record::Record;
pub use scalar::ScalarValue;
