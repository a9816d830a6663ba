//! Utility functions and helpers.

mod logging;
mod serializer;

pub use logging::{init_logging, LogFormat, LOG_ENV_VAR};
pub use serializer::WorkSerializer;
