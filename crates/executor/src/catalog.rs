use crate::error::ExecutorError;
use crate::exchange::{MarketValueSource, ProductCatalog};
use async_trait::async_trait;
use core_types::Product;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// An in-process product catalog and holdings service.
///
/// Both maps can change while the scheduler runs, which is how intraday limit
/// and market-value changes are simulated.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    products: RwLock<HashMap<String, Product>>,
    market_values: RwLock<HashMap<String, Decimal>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_products(products: impl IntoIterator<Item = Product>) -> Self {
        let products = products
            .into_iter()
            .map(|product| (product.product_id.clone(), product))
            .collect();
        Self {
            products: RwLock::new(products),
            market_values: RwLock::new(HashMap::new()),
        }
    }

    /// Adds or redefines a product.
    pub async fn upsert_product(&self, product: Product) {
        self.products
            .write()
            .await
            .insert(product.product_id.clone(), product);
    }

    /// Removes a product, as if it were delisted.
    pub async fn delist(&self, product_id: &str) -> Option<Product> {
        self.products.write().await.remove(product_id)
    }

    pub async fn set_market_value(&self, product_id: &str, value: Decimal) {
        self.market_values
            .write()
            .await
            .insert(product_id.to_string(), value);
    }

    pub async fn clear_market_value(&self, product_id: &str) {
        self.market_values.write().await.remove(product_id);
    }
}

#[async_trait]
impl ProductCatalog for InMemoryCatalog {
    async fn get_product(&self, product_id: &str) -> Result<Option<Product>, ExecutorError> {
        Ok(self.products.read().await.get(product_id).cloned())
    }
}

#[async_trait]
impl MarketValueSource for InMemoryCatalog {
    async fn get_market_value(&self, product_id: &str) -> Result<Option<Decimal>, ExecutorError> {
        Ok(self.market_values.read().await.get(product_id).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn products_can_be_redefined_and_delisted() {
        let catalog = InMemoryCatalog::with_products([Product::new("A", dec!(500), None)]);
        assert_eq!(catalog.get_product("A").await.unwrap().unwrap().min_investment, dec!(500));

        catalog.upsert_product(Product::new("A", dec!(1000), Some(dec!(5000)))).await;
        assert_eq!(catalog.get_product("A").await.unwrap().unwrap().min_investment, dec!(1000));

        assert!(catalog.delist("A").await.is_some());
        assert!(catalog.get_product("A").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn market_values_are_optional() {
        let catalog = InMemoryCatalog::new();
        assert_eq!(catalog.get_market_value("A").await.unwrap(), None);
        catalog.set_market_value("A", dec!(12500.50)).await;
        assert_eq!(catalog.get_market_value("A").await.unwrap(), Some(dec!(12500.50)));
        catalog.clear_market_value("A").await;
        assert_eq!(catalog.get_market_value("A").await.unwrap(), None);
    }
}
