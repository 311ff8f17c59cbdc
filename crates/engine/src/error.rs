use core_types::{CoreError, PlanStatus};
use database::DbError;
use executor::ExecutorError;
use thiserror::Error;
use uuid::Uuid;

/// Errors returned to callers of the plan lifecycle.
#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("Plan rejected: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("Cannot {operation} plan {plan_id} ({status}): {reason}")]
    Conflict {
        plan_id: Uuid,
        status: PlanStatus,
        operation: &'static str,
        reason: String,
    },

    #[error("Cancelling plan {0} requires explicit confirmation")]
    ConfirmationRequired(Uuid),

    #[error("Plan {0} not found")]
    NotFound(Uuid),

    #[error("Plan {0} kept changing underneath the update; try again")]
    Contention(Uuid),

    #[error("Store error: {0}")]
    Store(DbError),

    #[error("Collaborator error: {0}")]
    Collaborator(#[from] ExecutorError),

    #[error("Schedule error: {0}")]
    Schedule(#[from] CoreError),
}

impl From<DbError> for LifecycleError {
    fn from(err: DbError) -> Self {
        LifecycleError::Store(err)
    }
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Plan {plan_id} panicked during execution")]
    Panicked { plan_id: Uuid },

    #[error("Worker pool closed")]
    WorkerPoolClosed(#[from] tokio::sync::AcquireError),
}
