use thiserror::Error;

/// Errors raised while setting up the engine.
///
/// Rule violations are never errors: they are collected into a `ValidationResult`.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Validation parameters from configuration are invalid: {0}")]
    InvalidParameters(String),
}
