use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutorError {
    #[error("The {service} service is unavailable: {reason}")]
    Unavailable { service: String, reason: String },

    #[error("The order book rejected the request: {0}")]
    Api(String),
}
