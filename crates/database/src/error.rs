use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Failed to load environment variables for database connection: {0}")]
    ConnectionConfigError(String),

    #[error("Failed to connect to the database: {0}")]
    ConnectionError(#[from] sqlx::Error),

    #[error("Database migration failed: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("An error occurred during JSON serialization/deserialization: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("The requested data was not found in the database.")]
    NotFound,

    #[error("Plan {plan_id} already exists.")]
    DuplicatePlan { plan_id: Uuid },

    #[error("Attempt {attempt_number} for plan {plan_id} on {due_date} is already logged.")]
    DuplicateLogEntry {
        plan_id: Uuid,
        due_date: chrono::NaiveDate,
        attempt_number: u32,
    },

    #[error("Plan {plan_id} was modified concurrently (expected version {expected}, found {found}).")]
    VersionConflict { plan_id: Uuid, expected: u64, found: u64 },

    #[error("Stored row could not be decoded: {0}")]
    Corrupt(String),
}
