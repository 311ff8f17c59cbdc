//! # Cadence Executor Crate
//!
//! This crate defines the seams between the plan engine and the systems it does
//! not own: the product catalog, the holdings service that knows current market
//! values, and the order book that actually places orders.
//!
//! ## Architectural Principles
//!
//! - **Collaborator Abstraction:** The `ProductCatalog`, `MarketValueSource` and
//!   `OrderBook` traits let the lifecycle and scheduler stay agnostic about
//!   whether they are talking to production services or to simulations.
//! - **Simulations Included:** `InMemoryCatalog` and `SimulatedOrderBook` back the
//!   paper mode of the binary and every engine test.
//!
//! ## Public API
//!
//! - `ProductCatalog`, `MarketValueSource`, `OrderBook`: the collaborator traits.
//! - `OrderReceipt`: what the order book returns for one submission.
//! - `InMemoryCatalog`, `SimulatedOrderBook`: the in-process implementations.
//! - `ExecutorError`: the specific error types that can be returned from this crate.

// Declare the modules that constitute this crate.
pub mod catalog;
pub mod error;
pub mod exchange;

// Re-export the key components to provide a clean, public-facing API.
pub use catalog::InMemoryCatalog;
pub use error::ExecutorError;
pub use exchange::{MarketValueSource, OrderBook, OrderReceipt, ProductCatalog, SimulatedOrderBook};
