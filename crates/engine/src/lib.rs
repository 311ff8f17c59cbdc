//! # Cadence Engine
//!
//! The heart of the system: the plan state machine and the daily execution
//! scheduler.
//!
//! - `PlanLifecycle` owns every plan transition (create, modify, cancel and
//!   the scheduler's execution outcomes). Writes are conditional on the plan
//!   version, so concurrent callers never interleave into an inconsistent plan.
//! - `ExecutionScheduler` wakes once per business day, works every due plan on
//!   a bounded pool, retries failed attempts at fixed slots before the cut-off
//!   and records every attempt in the execution log.

pub mod error;
pub mod lifecycle;
pub mod policy;
mod reference;
pub mod scheduler;

// Re-export the key components to provide a clean, public-facing API.
pub use error::{EngineError, LifecycleError};
pub use lifecycle::{PlanLifecycle, PlanOutcome};
pub use policy::{BusinessCalendar, RetryPolicy};
pub use scheduler::ExecutionScheduler;
