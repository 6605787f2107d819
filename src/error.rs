//! Error taxonomy for submissions and queries
//!
//! Per-submission errors are local and recoverable: a validator may resubmit
//! within the same open round. Round-level outcomes (voided, rejected by
//! breaker) are never surfaced as errors — they are visible through events
//! and subsequent query behavior.

use crate::types::{Asset, PricePoint};
use thiserror::Error;

/// Rejection reasons for `submit_price` / `submit_price_batch`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitError {
    /// The registry does not currently authorize this validator for this
    /// asset (or the registry lookup failed — treated identically).
    #[error("validator {validator} is not authorized for {asset}")]
    Unauthorized { validator: String, asset: Asset },

    /// Price was zero or negative.
    #[error("invalid price for {asset}: {price}")]
    InvalidPrice { asset: Asset, price: String },

    /// Observation timestamp is ahead of the clock-skew tolerance or
    /// predates the current round.
    #[error("submission timestamp for {asset} is outside tolerance")]
    StaleSubmission { asset: Asset },

    /// Asset has been paused by an administrator.
    #[error("asset {0} is paused")]
    AssetPaused(Asset),

    /// Asset was never registered with the engine.
    #[error("unknown asset {0}")]
    UnknownAsset(Asset),
}

/// Failure modes for `get_price` / `get_twap`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("unknown asset {0}")]
    UnknownAsset(Asset),

    /// Both the primary feed and the fallback are stale or absent. The last
    /// known price is carried for the caller to inspect; it is never passed
    /// off as a live quote.
    #[error("no fresh price available for {asset}")]
    Unavailable {
        asset: Asset,
        last_known: Option<PricePoint>,
    },
}
