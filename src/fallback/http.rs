//! HTTP reference-price adapter
//!
//! Fetches spot prices from the Coinbase public REST API as the external
//! reference source. One request per lookup, no caching - the engine
//! staleness-checks whatever timestamp the adapter reports.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use crate::fallback::{ExternalQuote, FallbackFeed};
use crate::types::Asset;

const COINBASE_API_URL: &str = "https://api.coinbase.com/v2/prices";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Deserialize)]
struct SpotPriceResponse {
    data: SpotPriceData,
}

#[derive(Debug, Clone, Deserialize)]
struct SpotPriceData {
    amount: String,
    #[allow(dead_code)]
    currency: String,
}

/// Reference feed backed by the Coinbase spot-price endpoint.
pub struct HttpFallbackFeed {
    client: reqwest::Client,
    /// Maps engine assets to exchange product ids (e.g. "BTC-USD").
    products: HashMap<Asset, String>,
}

impl HttpFallbackFeed {
    pub fn new(products: HashMap<Asset, String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build fallback HTTP client")?;
        Ok(Self { client, products })
    }
}

#[async_trait]
impl FallbackFeed for HttpFallbackFeed {
    async fn external_price(&self, asset: &Asset) -> Result<Option<ExternalQuote>> {
        let Some(product) = self.products.get(asset) else {
            return Ok(None);
        };

        let url = format!("{COINBASE_API_URL}/{product}/spot");
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("fallback request failed for {asset}"))?
            .error_for_status()
            .with_context(|| format!("fallback returned error status for {asset}"))?;

        let body: SpotPriceResponse = resp
            .json()
            .await
            .with_context(|| format!("failed to parse fallback response for {asset}"))?;

        let price = Decimal::from_str(&body.data.amount)
            .with_context(|| format!("fallback returned non-decimal price for {asset}"))?;

        tracing::debug!(asset = %asset, price = %price, "fetched external reference price");

        Ok(Some(ExternalQuote {
            price,
            observed_at: Utc::now(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_spot_price_response() {
        let raw = r#"{"data":{"amount":"64230.12","currency":"USD"}}"#;
        let parsed: SpotPriceResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.data.amount, "64230.12");
        assert_eq!(
            Decimal::from_str(&parsed.data.amount).unwrap(),
            Decimal::from_str("64230.12").unwrap()
        );
    }

    #[tokio::test]
    async fn unmapped_asset_yields_no_quote() {
        let feed = HttpFallbackFeed::new(HashMap::new()).unwrap();
        let quote = feed.external_price(&Asset::from("BTC-USD")).await.unwrap();
        assert!(quote.is_none());
    }
}
