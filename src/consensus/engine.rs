//! Consensus engine - submission intake, round lifecycle, queries, admin
//!
//! Single-writer-per-asset discipline: each registered asset owns a pipeline
//! whose open round and feed state sit behind one async mutex. Queries read
//! a published snapshot and never wait on an in-flight round closure.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use crate::audit::{RoundAuditLog, RoundRecord};
use crate::auth::AuthorizationGate;
use crate::config::EngineConfig;
use crate::consensus::{
    is_stale, median_price, quote_is_stale, AssetFeedState, BreakerDecision, CircuitBreaker,
    ConsensusRound, OutlierFlagger, TwapWindow, ValidatorDeviationRecord, ValidatorSubmission,
};
use crate::error::{QueryError, SubmitError};
use crate::events::{EngineEvent, EventBus};
use crate::fallback::FallbackFeed;
use crate::types::{
    Asset, BreakerStatus, FeedQuote, PricePoint, PriceSource, RoundId, RoundOutcome, ValidatorId,
};

/// Mutable pipeline state for one asset. Exclusively owned by the per-asset
/// mutex; every field here changes only under that lock.
struct PipelineState {
    round: ConsensusRound,
    feed: AssetFeedState,
    twap: TwapWindow,
    flagger: OutlierFlagger,
    breaker: CircuitBreaker,
    staleness: Duration,
    paused: bool,
}

/// Committed snapshot consumed by the query paths.
#[derive(Clone)]
struct PublishedFeed {
    feed: AssetFeedState,
    twap: TwapWindow,
    staleness: Duration,
}

struct AssetPipeline {
    state: Mutex<PipelineState>,
    published: RwLock<PublishedFeed>,
}

/// Multi-validator price consensus engine.
pub struct ConsensusEngine {
    config: EngineConfig,
    auth: Arc<dyn AuthorizationGate>,
    fallback: Arc<dyn FallbackFeed>,
    events: EventBus,
    audit: Option<RoundAuditLog>,
    pipelines: RwLock<HashMap<Asset, Arc<AssetPipeline>>>,
}

impl ConsensusEngine {
    pub fn new(
        config: EngineConfig,
        auth: Arc<dyn AuthorizationGate>,
        fallback: Arc<dyn FallbackFeed>,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        let events = EventBus::new(config.event_capacity);
        Ok(Self {
            config,
            auth,
            fallback,
            events,
            audit: None,
            pipelines: RwLock::new(HashMap::new()),
        })
    }

    /// Attach a CSV audit archive for closed rounds.
    pub fn with_audit(mut self, audit: RoundAuditLog) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Create the feed pipeline for an asset. Idempotent; the first round
    /// opens at `now`.
    pub fn register_asset(&self, asset: Asset) {
        self.register_asset_at(asset, Utc::now());
    }

    pub fn register_asset_at(&self, asset: Asset, now: DateTime<Utc>) {
        let mut pipelines = self.pipelines.write().unwrap_or_else(|e| e.into_inner());
        pipelines.entry(asset.clone()).or_insert_with(|| {
            info!(asset = %asset, "registering asset feed");
            let feed = AssetFeedState::new(asset.clone());
            let twap = TwapWindow::new(Duration::seconds(self.config.twap.window_secs as i64));
            let state = PipelineState {
                round: ConsensusRound::open(RoundId(1), asset.clone(), now),
                feed: feed.clone(),
                twap: twap.clone(),
                flagger: OutlierFlagger::new(
                    self.config.outlier.deviation_threshold,
                    self.config.outlier.flag_limit,
                ),
                breaker: CircuitBreaker::new(
                    self.config.breaker.trip_threshold,
                    self.config.breaker.recovery_band,
                    self.config.breaker.fallback_deviation_bound,
                ),
                staleness: Duration::seconds(self.config.staleness.threshold_secs as i64),
                paused: false,
            };
            Arc::new(AssetPipeline {
                state: Mutex::new(state),
                published: RwLock::new(PublishedFeed {
                    feed,
                    twap,
                    staleness: Duration::seconds(self.config.staleness.threshold_secs as i64),
                }),
            })
        });
    }

    fn pipeline(&self, asset: &Asset) -> Option<Arc<AssetPipeline>> {
        self.pipelines
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(asset)
            .cloned()
    }

    // ------------------------------------------------------------------
    // Submission intake
    // ------------------------------------------------------------------

    pub async fn submit_price(
        &self,
        validator: &ValidatorId,
        asset: &Asset,
        price: Decimal,
        observed_at: DateTime<Utc>,
    ) -> Result<RoundId, SubmitError> {
        self.submit_price_at(validator, asset, price, observed_at, Utc::now())
            .await
    }

    /// Validate and buffer one submission. Closes the round synchronously
    /// when the buffer reaches the closing quorum.
    pub async fn submit_price_at(
        &self,
        validator: &ValidatorId,
        asset: &Asset,
        price: Decimal,
        observed_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<RoundId, SubmitError> {
        let pipeline = self
            .pipeline(asset)
            .ok_or_else(|| SubmitError::UnknownAsset(asset.clone()))?;

        // Fails closed: a registry error is a "no".
        let authorized = self
            .auth
            .is_authorized(validator, asset, now)
            .await
            .unwrap_or_else(|err| {
                warn!(validator = %validator, asset = %asset, error = %err,
                    "authorization lookup failed; rejecting");
                false
            });
        if !authorized {
            return Err(SubmitError::Unauthorized {
                validator: validator.to_string(),
                asset: asset.clone(),
            });
        }

        let mut state = pipeline.state.lock().await;

        if state.paused {
            return Err(SubmitError::AssetPaused(asset.clone()));
        }
        if price <= Decimal::ZERO {
            return Err(SubmitError::InvalidPrice {
                asset: asset.clone(),
                price: price.to_string(),
            });
        }
        let skew = Duration::seconds(self.config.round.clock_skew_secs as i64);
        if observed_at > now + skew || observed_at < state.round.opened_at {
            return Err(SubmitError::StaleSubmission {
                asset: asset.clone(),
            });
        }

        let round_id = state.round.id;
        state.round.upsert(ValidatorSubmission {
            validator: validator.clone(),
            asset: asset.clone(),
            price,
            observed_at,
            round_id,
        });
        debug!(validator = %validator, asset = %asset, price = %price,
            round_id = round_id.0, "buffered submission");

        if state.round.submission_count() >= self.config.round.closing_quorum {
            self.close_locked(&pipeline, &mut state, now).await;
        }

        Ok(round_id)
    }

    /// Atomic per-asset batch: each entry is evaluated independently under
    /// its own asset lock; partial success across assets is expected.
    pub async fn submit_price_batch(
        &self,
        validator: &ValidatorId,
        entries: Vec<(Asset, Decimal, DateTime<Utc>)>,
    ) -> Vec<Result<RoundId, SubmitError>> {
        self.submit_price_batch_at(validator, entries, Utc::now())
            .await
    }

    pub async fn submit_price_batch_at(
        &self,
        validator: &ValidatorId,
        entries: Vec<(Asset, Decimal, DateTime<Utc>)>,
        now: DateTime<Utc>,
    ) -> Vec<Result<RoundId, SubmitError>> {
        let mut results = Vec::with_capacity(entries.len());
        for (asset, price, observed_at) in entries {
            results.push(
                self.submit_price_at(validator, &asset, price, observed_at, now)
                    .await,
            );
        }
        results
    }

    // ------------------------------------------------------------------
    // Round closure
    // ------------------------------------------------------------------

    pub async fn close_round(&self, asset: &Asset) -> Result<RoundOutcome, QueryError> {
        self.close_round_at(asset, Utc::now()).await
    }

    /// External time trigger: close the open round now, whatever it holds.
    pub async fn close_round_at(
        &self,
        asset: &Asset,
        now: DateTime<Utc>,
    ) -> Result<RoundOutcome, QueryError> {
        let pipeline = self
            .pipeline(asset)
            .ok_or_else(|| QueryError::UnknownAsset(asset.clone()))?;
        let mut state = pipeline.state.lock().await;
        Ok(self.close_locked(&pipeline, &mut state, now).await)
    }

    /// Close the round only if its configured duration has elapsed.
    pub async fn close_if_due_at(
        &self,
        asset: &Asset,
        now: DateTime<Utc>,
    ) -> Result<Option<RoundOutcome>, QueryError> {
        let pipeline = self
            .pipeline(asset)
            .ok_or_else(|| QueryError::UnknownAsset(asset.clone()))?;
        let mut state = pipeline.state.lock().await;
        let due = now - state.round.opened_at
            >= Duration::seconds(self.config.round.duration_secs as i64);
        if !due {
            return Ok(None);
        }
        Ok(Some(self.close_locked(&pipeline, &mut state, now).await))
    }

    /// Run one round to its terminal outcome and open the next. Not
    /// cancellable; runs synchronously under the asset lock.
    async fn close_locked(
        &self,
        pipeline: &AssetPipeline,
        state: &mut PipelineState,
        now: DateTime<Utc>,
    ) -> RoundOutcome {
        let asset = state.feed.asset.clone();
        let next_id = RoundId(state.round.id.0 + 1);
        let mut round = std::mem::replace(
            &mut state.round,
            ConsensusRound::open(next_id, asset.clone(), now),
        );

        let median = median_price(&round.prices());

        let outcome = if round.submission_count() < self.config.round.min_quorum {
            info!(asset = %asset, round_id = round.id.0,
                submissions = round.submission_count(), "round voided: insufficient quorum");
            self.events.publish(EngineEvent::RoundVoided {
                asset: asset.clone(),
                round_id: round.id,
                submissions: round.submission_count(),
            });
            RoundOutcome::VoidedInsufficientQuorum
        } else {
            // min_quorum >= 1, so a median exists here.
            let candidate = median.unwrap_or_default();
            self.evaluate_candidate(state, &asset, round.id, candidate, now)
                .await
        };

        if let Some(median) = median {
            let newly_flagged = state
                .flagger
                .observe_round(median, round.submissions().map(|s| (&s.validator, s.price)));
            for (validator, count) in newly_flagged {
                warn!(validator = %validator, asset = %asset,
                    consecutive_outliers = count, "validator flagged as persistent outlier");
                self.events.publish(EngineEvent::ValidatorFlagged {
                    validator,
                    asset: asset.clone(),
                    consecutive_outliers: count,
                });
            }
        }

        round.closed_at = Some(now);
        round.median_price = median;
        round.outcome = Some(outcome);

        if let Some(audit) = &self.audit {
            let record = RoundRecord::new(
                &asset,
                round.id,
                now,
                outcome,
                median,
                round.submission_count(),
            );
            if let Err(err) = audit.append(&record) {
                warn!(asset = %asset, round_id = round.id.0, error = %err,
                    "failed to archive round");
            }
        }

        let mut published = pipeline
            .published
            .write()
            .unwrap_or_else(|e| e.into_inner());
        published.feed = state.feed.clone();
        published.twap = state.twap.clone();
        published.staleness = state.staleness;

        outcome
    }

    /// Breaker evaluation and, on acceptance, the commit itself.
    async fn evaluate_candidate(
        &self,
        state: &mut PipelineState,
        asset: &Asset,
        round_id: RoundId,
        candidate: Decimal,
        now: DateTime<Utc>,
    ) -> RoundOutcome {
        // Fresh external reference, if the fallback has one.
        let reference = match self.fallback.external_price(asset).await {
            Ok(Some(quote)) if !quote_is_stale(quote.observed_at, now, state.staleness) => {
                Some(quote.price)
            }
            Ok(_) => None,
            Err(err) => {
                debug!(asset = %asset, error = %err, "fallback unavailable for bound check");
                None
            }
        };

        let decision = state.breaker.evaluate(
            state.feed.breaker,
            candidate,
            state.feed.last_good_price,
            reference,
        );

        match decision {
            BreakerDecision::Reject => {
                if state.feed.breaker == BreakerStatus::Normal {
                    state.feed.breaker = BreakerStatus::Tripped;
                    state.feed.tripped_at = Some(now);
                    warn!(asset = %asset, round_id = round_id.0, rejected = %candidate,
                        "circuit breaker tripped; price frozen");
                    self.events.publish(EngineEvent::CircuitBreakerTripped {
                        asset: asset.clone(),
                        last_good_price: state.feed.last_good_price,
                        rejected_price: candidate,
                        round_id,
                    });
                } else {
                    info!(asset = %asset, round_id = round_id.0, rejected = %candidate,
                        "breaker still tripped; candidate outside recovery band");
                }
                RoundOutcome::RejectedByBreaker
            }
            BreakerDecision::Commit { recovered } => {
                state.feed.last_good_price = Some(candidate);
                state.feed.last_good_at = Some(now);
                state.twap.record(candidate, now);
                if recovered && state.feed.breaker == BreakerStatus::Tripped {
                    state.feed.breaker = BreakerStatus::Normal;
                    state.feed.tripped_at = None;
                    info!(asset = %asset, round_id = round_id.0, price = %candidate,
                        "circuit breaker recovered");
                    self.events.publish(EngineEvent::CircuitBreakerRecovered {
                        asset: asset.clone(),
                        new_price: candidate,
                        round_id,
                    });
                }
                info!(asset = %asset, round_id = round_id.0, price = %candidate,
                    "consensus committed");
                self.events.publish(EngineEvent::ConsensusCommitted {
                    asset: asset.clone(),
                    price: candidate,
                    round_id,
                    timestamp: now,
                });
                RoundOutcome::Committed
            }
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub async fn get_price(&self, asset: &Asset) -> Result<FeedQuote, QueryError> {
        self.get_price_at(asset, Utc::now()).await
    }

    /// Freshness-gated read. Fresh primary wins; a stale or frozen primary
    /// defers to a fresh fallback; with neither, the last known price comes
    /// back inside `Unavailable` rather than being passed off as live.
    pub async fn get_price_at(
        &self,
        asset: &Asset,
        now: DateTime<Utc>,
    ) -> Result<FeedQuote, QueryError> {
        let pipeline = self
            .pipeline(asset)
            .ok_or_else(|| QueryError::UnknownAsset(asset.clone()))?;
        let snapshot = pipeline
            .published
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();

        let frozen = snapshot.feed.breaker == BreakerStatus::Tripped;
        let primary_stale = is_stale(snapshot.feed.last_good_at, now, snapshot.staleness);

        if !frozen && !primary_stale {
            if let (Some(price), Some(as_of)) =
                (snapshot.feed.last_good_price, snapshot.feed.last_good_at)
            {
                return Ok(FeedQuote {
                    asset: asset.clone(),
                    price,
                    as_of,
                    source: PriceSource::Primary,
                    stale: false,
                    frozen: false,
                });
            }
        }

        // Primary is stale or frozen: try the external reference.
        if let Ok(Some(quote)) = self.fallback.external_price(asset).await {
            if !quote_is_stale(quote.observed_at, now, snapshot.staleness) {
                return Ok(FeedQuote {
                    asset: asset.clone(),
                    price: quote.price,
                    as_of: quote.observed_at,
                    source: PriceSource::Fallback,
                    stale: false,
                    frozen,
                });
            }
        }

        // Frozen but still fresh: serve the frozen price, annotated.
        if frozen && !primary_stale {
            if let (Some(price), Some(as_of)) =
                (snapshot.feed.last_good_price, snapshot.feed.last_good_at)
            {
                return Ok(FeedQuote {
                    asset: asset.clone(),
                    price,
                    as_of,
                    source: PriceSource::Primary,
                    stale: false,
                    frozen: true,
                });
            }
        }

        let last_known = snapshot
            .feed
            .last_good_price
            .zip(snapshot.feed.last_good_at)
            .map(|(price, as_of)| PricePoint { price, as_of });
        Err(QueryError::Unavailable {
            asset: asset.clone(),
            last_known,
        })
    }

    pub async fn get_twap(&self, asset: &Asset) -> Result<Decimal, QueryError> {
        self.get_twap_at(asset, Utc::now())
    }

    pub fn get_twap_at(&self, asset: &Asset, now: DateTime<Utc>) -> Result<Decimal, QueryError> {
        let pipeline = self
            .pipeline(asset)
            .ok_or_else(|| QueryError::UnknownAsset(asset.clone()))?;
        let snapshot = pipeline
            .published
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        snapshot.twap.twap(now).ok_or(QueryError::Unavailable {
            asset: asset.clone(),
            last_known: None,
        })
    }

    /// Committed feed state snapshot (for monitoring and tests).
    pub fn feed_state(&self, asset: &Asset) -> Result<AssetFeedState, QueryError> {
        let pipeline = self
            .pipeline(asset)
            .ok_or_else(|| QueryError::UnknownAsset(asset.clone()))?;
        let feed = pipeline
            .published
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .feed
            .clone();
        Ok(feed)
    }

    // ------------------------------------------------------------------
    // Admin surface
    // ------------------------------------------------------------------

    pub async fn pause_asset(&self, asset: &Asset) -> Result<(), QueryError> {
        let pipeline = self
            .pipeline(asset)
            .ok_or_else(|| QueryError::UnknownAsset(asset.clone()))?;
        pipeline.state.lock().await.paused = true;
        info!(asset = %asset, "asset paused");
        Ok(())
    }

    pub async fn resume_asset(&self, asset: &Asset) -> Result<(), QueryError> {
        let pipeline = self
            .pipeline(asset)
            .ok_or_else(|| QueryError::UnknownAsset(asset.clone()))?;
        pipeline.state.lock().await.paused = false;
        info!(asset = %asset, "asset resumed");
        Ok(())
    }

    /// Override the breaker trip threshold for one asset.
    pub async fn set_deviation_bound(
        &self,
        asset: &Asset,
        bound: Decimal,
    ) -> Result<(), QueryError> {
        let pipeline = self
            .pipeline(asset)
            .ok_or_else(|| QueryError::UnknownAsset(asset.clone()))?;
        let mut state = pipeline.state.lock().await;
        if bound <= state.breaker.recovery_band {
            warn!(asset = %asset, bound = %bound,
                "deviation bound set at or below the recovery band");
        }
        state.breaker.trip_threshold = bound;
        info!(asset = %asset, bound = %bound, "deviation bound updated");
        Ok(())
    }

    /// Override the staleness threshold for one asset.
    pub async fn set_staleness_threshold(
        &self,
        asset: &Asset,
        threshold: Duration,
    ) -> Result<(), QueryError> {
        let pipeline = self
            .pipeline(asset)
            .ok_or_else(|| QueryError::UnknownAsset(asset.clone()))?;
        let mut state = pipeline.state.lock().await;
        state.staleness = threshold;
        pipeline
            .published
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .staleness = threshold;
        info!(asset = %asset, threshold_secs = threshold.num_seconds(),
            "staleness threshold updated");
        Ok(())
    }

    /// Force a tripped breaker back to normal without touching the last
    /// good price. Out-of-band governance action.
    pub async fn reset_circuit_breaker(&self, asset: &Asset) -> Result<(), QueryError> {
        let pipeline = self
            .pipeline(asset)
            .ok_or_else(|| QueryError::UnknownAsset(asset.clone()))?;
        let mut state = pipeline.state.lock().await;
        state.feed.breaker = BreakerStatus::Normal;
        state.feed.tripped_at = None;
        pipeline
            .published
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .feed = state.feed.clone();
        info!(asset = %asset, "circuit breaker reset by admin");
        Ok(())
    }

    /// Governance reset of a validator's deviation record.
    pub async fn reset_validator_flag(
        &self,
        validator: &ValidatorId,
        asset: &Asset,
    ) -> Result<(), QueryError> {
        let pipeline = self
            .pipeline(asset)
            .ok_or_else(|| QueryError::UnknownAsset(asset.clone()))?;
        pipeline.state.lock().await.flagger.reset(validator);
        info!(validator = %validator, asset = %asset, "validator flag reset");
        Ok(())
    }

    /// Current deviation record for a validator on an asset.
    pub async fn deviation_record(
        &self,
        validator: &ValidatorId,
        asset: &Asset,
    ) -> Option<ValidatorDeviationRecord> {
        let pipeline = self.pipeline(asset)?;
        let state = pipeline.state.lock().await;
        state.flagger.record(validator).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::MockAuthorizationGate;
    use crate::fallback::MockFallbackFeed;
    use rust_decimal_macros::dec;

    fn engine_with(
        auth: MockAuthorizationGate,
        fallback: MockFallbackFeed,
    ) -> ConsensusEngine {
        ConsensusEngine::new(EngineConfig::default(), Arc::new(auth), Arc::new(fallback))
            .unwrap()
    }

    #[tokio::test]
    async fn unknown_asset_is_rejected_before_authorization() {
        let mut auth = MockAuthorizationGate::new();
        auth.expect_is_authorized().never();
        let engine = engine_with(auth, MockFallbackFeed::new());

        let err = engine
            .submit_price(
                &ValidatorId::from("val-1"),
                &Asset::from("BTC-USD"),
                dec!(100),
                Utc::now(),
            )
            .await
            .unwrap_err();
        assert_eq!(err, SubmitError::UnknownAsset(Asset::from("BTC-USD")));
    }

    #[tokio::test]
    async fn registry_error_fails_closed() {
        let mut auth = MockAuthorizationGate::new();
        auth.expect_is_authorized()
            .returning(|_, _, _| Err(anyhow::anyhow!("registry timeout")));
        let engine = engine_with(auth, MockFallbackFeed::new());
        engine.register_asset(Asset::from("BTC-USD"));

        let err = engine
            .submit_price(
                &ValidatorId::from("val-1"),
                &Asset::from("BTC-USD"),
                dec!(100),
                Utc::now(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SubmitError::Unauthorized { .. }));
    }

    #[tokio::test]
    async fn non_positive_price_is_rejected() {
        let mut auth = MockAuthorizationGate::new();
        auth.expect_is_authorized().returning(|_, _, _| Ok(true));
        let engine = engine_with(auth, MockFallbackFeed::new());
        let asset = Asset::from("BTC-USD");
        engine.register_asset(asset.clone());

        let err = engine
            .submit_price(&ValidatorId::from("val-1"), &asset, dec!(0), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, SubmitError::InvalidPrice { .. }));
    }

    #[tokio::test]
    async fn future_timestamp_beyond_skew_is_rejected() {
        let mut auth = MockAuthorizationGate::new();
        auth.expect_is_authorized().returning(|_, _, _| Ok(true));
        let engine = engine_with(auth, MockFallbackFeed::new());
        let asset = Asset::from("BTC-USD");
        let now = Utc::now();
        engine.register_asset_at(asset.clone(), now);

        let err = engine
            .submit_price_at(
                &ValidatorId::from("val-1"),
                &asset,
                dec!(100),
                now + Duration::seconds(30),
                now,
            )
            .await
            .unwrap_err();
        assert_eq!(err, SubmitError::StaleSubmission { asset });
    }

    #[tokio::test]
    async fn paused_asset_rejects_submissions() {
        let mut auth = MockAuthorizationGate::new();
        auth.expect_is_authorized().returning(|_, _, _| Ok(true));
        let engine = engine_with(auth, MockFallbackFeed::new());
        let asset = Asset::from("BTC-USD");
        engine.register_asset(asset.clone());
        engine.pause_asset(&asset).await.unwrap();

        let err = engine
            .submit_price(&ValidatorId::from("val-1"), &asset, dec!(100), Utc::now())
            .await
            .unwrap_err();
        assert_eq!(err, SubmitError::AssetPaused(asset.clone()));

        engine.resume_asset(&asset).await.unwrap();
        assert!(engine
            .submit_price(&ValidatorId::from("val-1"), &asset, dec!(100), Utc::now())
            .await
            .is_ok());
    }
}
