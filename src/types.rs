//! Core types used throughout the consensus engine
//!
//! Defines identifiers, price quotes, and round outcome types shared by
//! every component.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Asset identifier (e.g. "BTC-USD").
///
/// Assets are an open set decided by configuration, not a closed enum —
/// the engine tracks one independent feed pipeline per registered asset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Asset(String);

impl Asset {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self(symbol.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Asset {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Validator (submitter) identifier, as known to the external registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValidatorId(String);

impl ValidatorId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ValidatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ValidatorId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Round identifier, strictly increasing per asset (starts at 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RoundId(pub u64);

impl fmt::Display for RoundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a quoted price came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PriceSource {
    /// Committed validator consensus.
    Primary,
    /// External reference feed.
    Fallback,
}

impl fmt::Display for PriceSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PriceSource::Primary => write!(f, "Primary"),
            PriceSource::Fallback => write!(f, "Fallback"),
        }
    }
}

/// A (price, timestamp) observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricePoint {
    pub price: Decimal,
    pub as_of: DateTime<Utc>,
}

/// Answer to a `get_price` query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedQuote {
    pub asset: Asset,
    pub price: Decimal,
    pub as_of: DateTime<Utc>,
    pub source: PriceSource,
    /// True when the quote is older than the staleness threshold.
    pub stale: bool,
    /// True when the circuit breaker is holding the primary feed frozen.
    pub frozen: bool,
}

/// Terminal outcome of a consensus round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoundOutcome {
    Committed,
    RejectedByBreaker,
    VoidedInsufficientQuorum,
}

impl fmt::Display for RoundOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoundOutcome::Committed => write!(f, "COMMITTED"),
            RoundOutcome::RejectedByBreaker => write!(f, "REJECTED_BY_BREAKER"),
            RoundOutcome::VoidedInsufficientQuorum => write!(f, "VOIDED_INSUFFICIENT_QUORUM"),
        }
    }
}

/// Circuit breaker status for an asset feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BreakerStatus {
    Normal,
    Tripped,
}

impl fmt::Display for BreakerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BreakerStatus::Normal => write!(f, "NORMAL"),
            BreakerStatus::Tripped => write!(f, "TRIPPED"),
        }
    }
}
