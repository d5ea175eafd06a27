//! Live price feed client.
//!
//! The engine only needs one call from the price service: a batch lookup of
//! current prices. `HttpPriceFeed` talks to a price server over REST; tests
//! plug in their own `LivePriceFeed`.

use crate::error::{EngineError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Batch source of live prices.
///
/// Implementations may return a partial or empty map; symbols they cannot
/// price are simply left out.
#[async_trait]
pub trait LivePriceFeed: Send + Sync {
    async fn fetch_prices(&self, symbols: &[String]) -> Result<HashMap<String, f64>>;
}

#[derive(Debug, Deserialize)]
struct PricesResponse {
    prices: HashMap<String, f64>,
}

/// REST client for a price server exposing `GET /api/prices?symbols=A,B`.
#[derive(Clone)]
pub struct HttpPriceFeed {
    client: Client,
    base_url: String,
}

impl HttpPriceFeed {
    /// Create a new client with the given request timeout.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl LivePriceFeed for HttpPriceFeed {
    async fn fetch_prices(&self, symbols: &[String]) -> Result<HashMap<String, f64>> {
        if symbols.is_empty() {
            return Ok(HashMap::new());
        }

        let url = format!("{}/api/prices", self.base_url);
        debug!("Fetching {} live prices from {}", symbols.len(), url);

        let response = self
            .client
            .get(&url)
            .query(&[("symbols", symbols.join(","))])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            let snippet: String = text.chars().take(200).collect();
            warn!("Price feed error: {} - {}", status, snippet);
            return Err(EngineError::PriceFeed(format!("price feed returned {}", status)));
        }

        let body: PricesResponse = response.json().await?;

        Ok(match_requested(symbols, body.prices))
    }
}

/// Key server prices by the symbols as requested, ignoring case.
///
/// Symbols the server did not price are left out, as are extras it sent.
fn match_requested(symbols: &[String], prices: HashMap<String, f64>) -> HashMap<String, f64> {
    let by_upper: HashMap<String, f64> = prices
        .into_iter()
        .map(|(symbol, price)| (symbol.to_uppercase(), price))
        .collect();

    symbols
        .iter()
        .filter_map(|symbol| {
            by_upper
                .get(&symbol.to_uppercase())
                .map(|price| (symbol.clone(), *price))
        })
        .collect()
}
