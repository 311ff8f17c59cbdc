//! # Cadence Validation Crate
//!
//! The rule gate for order instructions and systematic plans. Given the
//! instructions, nominee declarations, broker code and product reference data,
//! `ValidationEngine::validate` returns every violated rule at once.
//!
//! The engine performs no I/O and holds no mutable state: callers fetch product
//! limits and market values from their collaborators and hand them in.

pub mod engine;
pub mod error;
pub mod patterns;
pub mod report;

pub use engine::{ValidationEngine, ValidationRequest};
pub use error::ValidationError;
pub use report::{ValidationReport, ValidationResult};
