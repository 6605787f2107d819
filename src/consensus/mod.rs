//! Consensus pipeline - turns N distrusting submitters into one price
//!
//! Median aggregation over per-round submission buffers, guarded by a
//! deviation circuit breaker, smoothed by a trailing TWAP window, and
//! watched by a per-validator outlier flagger.

mod breaker;
mod engine;
mod median;
mod outlier;
mod staleness;
mod twap;

pub use breaker::{BreakerDecision, CircuitBreaker};
pub use engine::ConsensusEngine;
pub use median::median_price;
pub use outlier::{OutlierFlagger, ValidatorDeviationRecord};
pub use staleness::{is_stale, quote_is_stale};
pub use twap::TwapWindow;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::types::{Asset, BreakerStatus, RoundId, RoundOutcome, ValidatorId};

/// One validator's price observation within a round.
///
/// Unique per (validator, asset, round); a later submission from the same
/// validator in the same round replaces the earlier one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorSubmission {
    pub validator: ValidatorId,
    pub asset: Asset,
    pub price: Decimal,
    pub observed_at: DateTime<Utc>,
    pub round_id: RoundId,
}

/// The unit of aggregation: all submissions collected before one consensus
/// decision. Moves to exactly one terminal outcome at closure.
#[derive(Debug, Clone)]
pub struct ConsensusRound {
    pub id: RoundId,
    pub asset: Asset,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub median_price: Option<Decimal>,
    pub outcome: Option<RoundOutcome>,
    submissions: HashMap<ValidatorId, ValidatorSubmission>,
}

impl ConsensusRound {
    pub fn open(id: RoundId, asset: Asset, opened_at: DateTime<Utc>) -> Self {
        Self {
            id,
            asset,
            opened_at,
            closed_at: None,
            median_price: None,
            outcome: None,
            submissions: HashMap::new(),
        }
    }

    /// Insert or replace this validator's submission (last write wins).
    pub fn upsert(&mut self, submission: ValidatorSubmission) {
        self.submissions
            .insert(submission.validator.clone(), submission);
    }

    pub fn submission_count(&self) -> usize {
        self.submissions.len()
    }

    pub fn submissions(&self) -> impl Iterator<Item = &ValidatorSubmission> {
        self.submissions.values()
    }

    pub fn prices(&self) -> Vec<Decimal> {
        self.submissions.values().map(|s| s.price).collect()
    }
}

/// Committed feed state for one asset. Exactly one live instance per asset,
/// mutated only by round closure and admin breaker resets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetFeedState {
    pub asset: Asset,
    pub last_good_price: Option<Decimal>,
    pub last_good_at: Option<DateTime<Utc>>,
    pub breaker: BreakerStatus,
    pub tripped_at: Option<DateTime<Utc>>,
}

impl AssetFeedState {
    pub fn new(asset: Asset) -> Self {
        Self {
            asset,
            last_good_price: None,
            last_good_at: None,
            breaker: BreakerStatus::Normal,
            tripped_at: None,
        }
    }
}
