//! Fallback feed - external reference price source
//!
//! Consulted during breaker evaluation as a sanity baseline, and by
//! `get_price` when the primary feed is stale or frozen.

mod http;

pub use http::HttpFallbackFeed;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::types::Asset;

/// A reference price observation from an external source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExternalQuote {
    pub price: Decimal,
    pub observed_at: DateTime<Utc>,
}

/// Adapter seam to an external reference price source.
///
/// `Ok(None)` means the source has no quote for the asset; errors are
/// treated the same way by the engine (no fresh reference available).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FallbackFeed: Send + Sync {
    async fn external_price(&self, asset: &Asset) -> anyhow::Result<Option<ExternalQuote>>;
}

/// Feed with no external source configured. Breaker evaluation then runs
/// against the last good price only, and stale primaries have nothing to
/// fall back to.
#[derive(Debug, Default)]
pub struct NoFallbackFeed;

#[async_trait]
impl FallbackFeed for NoFallbackFeed {
    async fn external_price(&self, _asset: &Asset) -> anyhow::Result<Option<ExternalQuote>> {
        Ok(None)
    }
}
