use crate::error::ExecutorError;
use async_trait::async_trait;
use core_types::{OrderInstruction, Product};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Read access to the external product catalog.
#[async_trait]
pub trait ProductCatalog: Send + Sync {
    /// Returns `None` for products the catalog does not list (unknown or delisted).
    async fn get_product(&self, product_id: &str) -> Result<Option<Product>, ExecutorError>;
}

/// Read access to the holdings service.
#[async_trait]
pub trait MarketValueSource: Send + Sync {
    /// Returns `None` when no value is tracked for the product.
    async fn get_market_value(&self, product_id: &str) -> Result<Option<Decimal>, ExecutorError>;
}

/// What the order book says about one submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderReceipt {
    pub success: bool,
    pub order_id: Option<String>,
    pub reason: Option<String>,
}

impl OrderReceipt {
    pub fn accepted(order_id: impl Into<String>) -> Self {
        Self {
            success: true,
            order_id: Some(order_id.into()),
            reason: None,
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            order_id: None,
            reason: Some(reason.into()),
        }
    }
}

/// A generic trait for the order book orders are placed on.
///
/// An `Err` means the submission could not be made at all (transport, outage);
/// a receipt with `success == false` means the order book refused the order.
/// The scheduler treats both as a failed attempt.
#[async_trait]
pub trait OrderBook: Send + Sync {
    async fn submit_order(&self, instruction: &OrderInstruction) -> Result<OrderReceipt, ExecutorError>;
}

#[derive(Debug, Default)]
struct Book {
    submitted: Vec<OrderInstruction>,
    /// Outcomes queued per product, consumed before the default accept.
    scripted: HashMap<String, VecDeque<Result<OrderReceipt, ExecutorError>>>,
}

/// The "virtual order book" for paper runs and tests.
///
/// Accepts every instruction and mints an order id, unless outcomes have been
/// scripted for the instruction's product.
#[derive(Debug, Default)]
pub struct SimulatedOrderBook {
    book: Mutex<Book>,
}

impl SimulatedOrderBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `count` rejections carrying `reason` for the next submissions on `product_id`.
    pub async fn reject_next(&self, product_id: &str, count: usize, reason: &str) {
        let mut book = self.book.lock().await;
        let queue = book.scripted.entry(product_id.to_string()).or_default();
        for _ in 0..count {
            queue.push_back(Ok(OrderReceipt::rejected(reason)));
        }
    }

    /// Queues an outage for the next submission on `product_id`.
    pub async fn fail_next(&self, product_id: &str, error: ExecutorError) {
        let mut book = self.book.lock().await;
        book.scripted
            .entry(product_id.to_string())
            .or_default()
            .push_back(Err(error));
    }

    /// Every instruction submitted so far, in order.
    pub async fn submitted(&self) -> Vec<OrderInstruction> {
        self.book.lock().await.submitted.clone()
    }
}

#[async_trait]
impl OrderBook for SimulatedOrderBook {
    async fn submit_order(&self, instruction: &OrderInstruction) -> Result<OrderReceipt, ExecutorError> {
        let mut book = self.book.lock().await;
        book.submitted.push(instruction.clone());

        let scripted = book
            .scripted
            .get_mut(&instruction.product_id)
            .and_then(|queue| queue.pop_front());
        let outcome = scripted.unwrap_or_else(|| Ok(OrderReceipt::accepted(format!("SIM-{}", Uuid::new_v4()))));

        tracing::debug!(
            product_id = %instruction.product_id,
            amount = %instruction.amount,
            outcome = ?outcome,
            "SimulatedOrderBook: order submitted."
        );
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::TransactionType;
    use rust_decimal_macros::dec;

    fn purchase(product: &str) -> OrderInstruction {
        OrderInstruction::new(product, dec!(5000), TransactionType::Purchase)
    }

    #[tokio::test]
    async fn accepts_by_default_with_unique_ids() {
        let book = SimulatedOrderBook::new();
        let first = book.submit_order(&purchase("A")).await.unwrap();
        let second = book.submit_order(&purchase("A")).await.unwrap();

        assert!(first.success && second.success);
        assert_ne!(first.order_id, second.order_id);
        assert_eq!(book.submitted().await.len(), 2);
    }

    #[tokio::test]
    async fn scripted_outcomes_apply_per_product_in_order() {
        let book = SimulatedOrderBook::new();
        book.reject_next("A", 1, "insufficient funds").await;
        book.fail_next("A", ExecutorError::Api("timeout".to_string())).await;

        assert!(book.submit_order(&purchase("B")).await.unwrap().success);
        let rejected = book.submit_order(&purchase("A")).await.unwrap();
        assert!(!rejected.success);
        assert_eq!(rejected.reason.as_deref(), Some("insufficient funds"));
        assert!(book.submit_order(&purchase("A")).await.is_err());
        assert!(book.submit_order(&purchase("A")).await.unwrap().success);
    }
}
