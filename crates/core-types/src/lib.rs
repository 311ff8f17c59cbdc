//! # Cadence Core Types
//!
//! The shared vocabulary of the systematic-plan engine: products, nominees,
//! order instructions, plans and their execution log, plus the injected
//! `Clock` every date-sensitive component reads time from.
//!
//! As a Layer 0 crate, it depends on no other crate in the workspace.

pub mod clock;
pub mod enums;
pub mod error;
pub mod structs;

// Re-export the core types to provide a clean public API.
pub use clock::{Clock, ManualClock, SystemClock};
pub use enums::{AttemptOutcome, Frequency, PlanStatus, PlanType, TransactionType};
pub use error::CoreError;
pub use structs::{
    ExecutionLogEntry, Nominee, OrderInstruction, PlanChanges, PlanRequest, Product,
    SystematicPlan,
};
