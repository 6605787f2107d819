//! Engine event bus
//!
//! Round outcomes and breaker transitions are broadcast for downstream
//! consumers (settlement, the validator registry, dashboards). Dropped
//! receivers or lagging subscribers never block the consensus pipeline.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::broadcast;

use crate::types::{Asset, RoundId, ValidatorId};

/// Notifications emitted by the consensus engine.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// A round committed a new consensus price.
    ConsensusCommitted {
        asset: Asset,
        price: Decimal,
        round_id: RoundId,
        timestamp: DateTime<Utc>,
    },
    /// The breaker rejected a round and froze the published price.
    /// `last_good_price` is absent when the trip happened before any commit
    /// (the candidate strayed from the external reference).
    CircuitBreakerTripped {
        asset: Asset,
        last_good_price: Option<Decimal>,
        rejected_price: Decimal,
        round_id: RoundId,
    },
    /// A tripped breaker accepted a price inside the recovery band.
    CircuitBreakerRecovered {
        asset: Asset,
        new_price: Decimal,
        round_id: RoundId,
    },
    /// A validator crossed the consecutive-outlier limit. Consumed by the
    /// external registry, which decides whether to eject the validator.
    ValidatorFlagged {
        validator: ValidatorId,
        asset: Asset,
        consecutive_outliers: u32,
    },
    /// A round closed without reaching the minimum quorum.
    RoundVoided {
        asset: Asset,
        round_id: RoundId,
        submissions: usize,
    },
}

/// Broadcast bus for [`EngineEvent`]s.
#[derive(Debug)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. A send error only means nobody is listening.
    pub fn publish(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
