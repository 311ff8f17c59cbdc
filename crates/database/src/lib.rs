//! # Cadence Database Crate
//!
//! This crate is the engine's persistence layer for systematic plans and their
//! append-only execution log. It is the system's audit archive.
//!
//! ## Architectural Principles
//!
//! - **Layer 3 Adapter:** All storage-specific logic lives here behind the
//!   `PlanStore` trait, so the lifecycle and scheduler never see SQL.
//! - **Conditional Writes:** `update_plan` only succeeds against the version the
//!   caller read, which is what makes every plan transition atomic.
//! - **Asynchronous & Pooled:** The Postgres repository uses a connection pool
//!   (`PgPool`) shared across the whole application.
//!
//! ## Public API
//!
//! - `connect`, `run_migrations`: pool setup and schema migrations.
//! - `PlanStore`: the storage contract.
//! - `DbRepository`: the Postgres implementation.
//! - `InMemoryPlanStore`: the in-process implementation for paper runs and tests.
//! - `PlanQuery`, `LogQuery`: the filters the operations console queries with.
//! - `DbError`: the specific error types that can be returned from this crate.

// Declare the modules that constitute this crate.
pub mod connection;
pub mod error;
pub mod memory;
pub mod query;
pub mod repository;
pub mod store;

// Re-export the key components to create a clean, public-facing API.
pub use connection::{connect, run_migrations};
pub use error::DbError;
pub use memory::InMemoryPlanStore;
pub use query::{LogQuery, PlanQuery};
pub use repository::DbRepository;
pub use store::PlanStore;
