pub mod config;
pub mod error;
pub mod patch;
pub mod schema;
pub mod sink;
pub mod store;
pub mod validation;
pub mod validator;
pub mod value;

#[cfg(test)]
mod tests_props_validation;

pub use crate::config::{MissingSinkPolicy, OverflowPolicy, ValidatorConfig};
pub use crate::error::{EnqueueError, RangeBound, SchemaError, SinkError, ValidationError};
pub use crate::patch::Patch;
pub use crate::schema::{FieldSpec, Schema, SemanticType, game_state_schema};
pub use crate::sink::StateSink;
pub use crate::store::{StateSnapshot, StateStore};
pub use crate::validator::{StateQueueValidator, ValidatorStats};
pub use crate::value::Value;
