//! # Cadence Events
//!
//! This crate defines the lifecycle events the plan state machine and the
//! execution scheduler broadcast as plans move through their states. Any
//! number of consumers (notifiers, dashboards, reporting feeds) can subscribe
//! without the engine knowing about them.
//!
//! As a Layer 0 crate, it depends only on `core-types`.

// Declare the modules that make up this crate.
pub mod error;
pub mod messages;

// Re-export the core types to provide a clean public API.
pub use error::EventsError;
pub use messages::{DaySummary, LifecycleEvent};
