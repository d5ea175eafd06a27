//! Resolves settlement prices for a batch of symbols.
//!
//! The live feed is asked once per batch. Symbols it cannot price (or the
//! whole batch, if the feed is down) fall back to the last reference price
//! persisted for the instrument. Good live prices become the new reference.

use crate::services::{LivePriceFeed, SqliteStore};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Best-known price lookup with reference-price fallback.
#[derive(Clone)]
pub struct PriceResolver {
    feed: Arc<dyn LivePriceFeed>,
    store: Arc<SqliteStore>,
}

impl PriceResolver {
    pub fn new(feed: Arc<dyn LivePriceFeed>, store: Arc<SqliteStore>) -> Self {
        Self { feed, store }
    }

    /// Resolve a price for each symbol.
    ///
    /// Symbols with no finite positive price from either source are absent
    /// from the result; callers treat them as unresolved.
    pub async fn resolve(&self, symbols: &[String]) -> HashMap<String, f64> {
        let mut resolved = HashMap::with_capacity(symbols.len());
        if symbols.is_empty() {
            return resolved;
        }

        let live = match self.feed.fetch_prices(symbols).await {
            Ok(prices) => prices,
            Err(e) => {
                warn!("Live price feed unavailable, using reference prices: {}", e);
                HashMap::new()
            }
        };

        for symbol in symbols {
            if let Some(price) = live.get(symbol).copied().filter(|p| is_valid_price(*p)) {
                if let Err(e) = self.store.update_reference_price(symbol, price) {
                    warn!("Failed to persist reference price for {}: {}", symbol, e);
                }
                resolved.insert(symbol.clone(), price);
                continue;
            }

            match self.store.reference_price(symbol) {
                Ok(Some(price)) if is_valid_price(price) => {
                    debug!("Using reference price {} for {}", price, symbol);
                    resolved.insert(symbol.clone(), price);
                }
                Ok(_) => debug!("No price available for {}", symbol),
                Err(e) => warn!("Reference price lookup failed for {}: {}", symbol, e),
            }
        }

        resolved
    }
}

fn is_valid_price(price: f64) -> bool {
    price.is_finite() && price > 0.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{EngineError, Result};
    use crate::types::Instrument;
    use async_trait::async_trait;

    struct FixedFeed(HashMap<String, f64>);

    #[async_trait]
    impl LivePriceFeed for FixedFeed {
        async fn fetch_prices(&self, _symbols: &[String]) -> Result<HashMap<String, f64>> {
            Ok(self.0.clone())
        }
    }

    struct DownFeed;

    #[async_trait]
    impl LivePriceFeed for DownFeed {
        async fn fetch_prices(&self, _symbols: &[String]) -> Result<HashMap<String, f64>> {
            Err(EngineError::PriceFeed("connection refused".to_string()))
        }
    }

    fn symbols(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn store_with_reference(symbol: &str, price: Option<f64>) -> Arc<SqliteStore> {
        let store = Arc::new(SqliteStore::new_in_memory().unwrap());
        store
            .upsert_instrument(&Instrument {
                symbol: symbol.to_string(),
                payout_pct: None,
                reference_price: price,
            })
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_live_prices_win_and_become_reference() {
        let store = store_with_reference("BTC", Some(90.0));
        let feed = FixedFeed(HashMap::from([("BTC".to_string(), 101.0)]));
        let resolver = PriceResolver::new(Arc::new(feed), store.clone());

        let prices = resolver.resolve(&symbols(&["BTC"])).await;

        assert_eq!(prices.get("BTC"), Some(&101.0));
        assert_eq!(store.reference_price("BTC").unwrap(), Some(101.0));
    }

    #[tokio::test]
    async fn test_partial_feed_falls_back_per_symbol() {
        let store = store_with_reference("ETH", Some(3000.0));
        let feed = FixedFeed(HashMap::from([("BTC".to_string(), 101.0)]));
        let resolver = PriceResolver::new(Arc::new(feed), store);

        let prices = resolver.resolve(&symbols(&["BTC", "ETH", "DOGE"])).await;

        assert_eq!(prices.get("BTC"), Some(&101.0));
        assert_eq!(prices.get("ETH"), Some(&3000.0));
        assert!(!prices.contains_key("DOGE"));
    }

    #[tokio::test]
    async fn test_feed_failure_uses_reference_prices() {
        let store = store_with_reference("ETH", Some(3000.0));
        let resolver = PriceResolver::new(Arc::new(DownFeed), store);

        let prices = resolver.resolve(&symbols(&["ETH", "SOL"])).await;

        assert_eq!(prices.len(), 1);
        assert_eq!(prices.get("ETH"), Some(&3000.0));
    }

    #[tokio::test]
    async fn test_invalid_prices_are_ignored() {
        let store = store_with_reference("ETH", Some(0.0));
        let feed = FixedFeed(HashMap::from([
            ("ETH".to_string(), f64::NAN),
            ("SOL".to_string(), -5.0),
        ]));
        let resolver = PriceResolver::new(Arc::new(feed), store.clone());

        let prices = resolver.resolve(&symbols(&["ETH", "SOL"])).await;

        assert!(prices.is_empty());
        assert_eq!(store.reference_price("SOL").unwrap(), None);
    }
}
