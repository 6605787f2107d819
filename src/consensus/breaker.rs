//! Circuit breaker - deviation-bounded anti-manipulation guard
//!
//! Freezes the published price when a single round would move it implausibly
//! far. Recovery is price-driven, never time-driven: a tripped breaker only
//! re-arms when a candidate lands back inside a narrow band around the last
//! good price, so a bad market cannot self-heal by waiting out a cooldown.

use rust_decimal::Decimal;

use crate::types::BreakerStatus;

/// Verdict for a candidate consensus price.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerDecision {
    /// Accept the candidate. `recovered` is set when this commit re-arms a
    /// tripped breaker.
    Commit { recovered: bool },
    /// Reject the round and freeze (or keep frozen) the published price.
    Reject,
}

#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    /// Relative move that trips (strict `>`; exactly-at-threshold commits).
    pub trip_threshold: Decimal,
    /// Band around the last good price required for recovery.
    pub recovery_band: Decimal,
    /// Deviation from the external reference beyond which the reference
    /// becomes the trip baseline instead of the last good price.
    pub fallback_deviation_bound: Decimal,
}

impl CircuitBreaker {
    pub fn new(
        trip_threshold: Decimal,
        recovery_band: Decimal,
        fallback_deviation_bound: Decimal,
    ) -> Self {
        Self {
            trip_threshold,
            recovery_band,
            fallback_deviation_bound,
        }
    }

    /// Evaluate a candidate against the current breaker state.
    ///
    /// `reference` is the external feed's price when that feed is fresh.
    /// When the candidate strays from a fresh reference by more than the
    /// deviation bound, the reference replaces `last_good` as the baseline
    /// for the trip check.
    pub fn evaluate(
        &self,
        status: BreakerStatus,
        candidate: Decimal,
        last_good: Option<Decimal>,
        reference: Option<Decimal>,
    ) -> BreakerDecision {
        let baseline = self.trip_baseline(candidate, last_good, reference);

        if let Some(baseline) = baseline {
            if relative_delta(candidate, baseline) > self.trip_threshold {
                return BreakerDecision::Reject;
            }
        }

        match status {
            BreakerStatus::Normal => BreakerDecision::Commit { recovered: false },
            BreakerStatus::Tripped => {
                // Re-arming additionally requires the candidate inside the
                // recovery band around the anchor price.
                let anchor = last_good.or(reference);
                match anchor {
                    Some(anchor) if relative_delta(candidate, anchor) <= self.recovery_band => {
                        BreakerDecision::Commit { recovered: true }
                    }
                    // No anchor survives a trip only when neither history
                    // nor a reference exists; accept and re-arm.
                    None => BreakerDecision::Commit { recovered: true },
                    _ => BreakerDecision::Reject,
                }
            }
        }
    }

    fn trip_baseline(
        &self,
        candidate: Decimal,
        last_good: Option<Decimal>,
        reference: Option<Decimal>,
    ) -> Option<Decimal> {
        if let Some(ext) = reference {
            if relative_delta(candidate, ext) > self.fallback_deviation_bound {
                return Some(ext);
            }
        }
        last_good
    }
}

/// |a - baseline| / baseline
fn relative_delta(a: Decimal, baseline: Decimal) -> Decimal {
    if baseline.is_zero() {
        return Decimal::MAX;
    }
    ((a - baseline) / baseline).abs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(dec!(0.10), dec!(0.02), dec!(0.10))
    }

    #[test]
    fn within_threshold_commits() {
        let d = breaker().evaluate(BreakerStatus::Normal, dec!(109), Some(dec!(100)), None);
        assert_eq!(d, BreakerDecision::Commit { recovered: false });
    }

    #[test]
    fn exactly_at_threshold_commits() {
        let d = breaker().evaluate(BreakerStatus::Normal, dec!(110), Some(dec!(100)), None);
        assert_eq!(d, BreakerDecision::Commit { recovered: false });
    }

    #[test]
    fn beyond_threshold_rejects() {
        let d = breaker().evaluate(BreakerStatus::Normal, dec!(110.01), Some(dec!(100)), None);
        assert_eq!(d, BreakerDecision::Reject);
    }

    #[test]
    fn first_commit_without_history_or_reference_passes() {
        let d = breaker().evaluate(BreakerStatus::Normal, dec!(5000), None, None);
        assert_eq!(d, BreakerDecision::Commit { recovered: false });
    }

    #[test]
    fn fresh_reference_overrides_baseline_when_candidate_strays() {
        // Candidate moves only 5% from last good, but 20% from the fresh
        // reference - the reference becomes the baseline and trips.
        let d = breaker().evaluate(
            BreakerStatus::Normal,
            dec!(105),
            Some(dec!(100)),
            Some(dec!(87.5)),
        );
        assert_eq!(d, BreakerDecision::Reject);
    }

    #[test]
    fn reference_within_bound_leaves_last_good_as_baseline() {
        let d = breaker().evaluate(
            BreakerStatus::Normal,
            dec!(105),
            Some(dec!(100)),
            Some(dec!(103)),
        );
        assert_eq!(d, BreakerDecision::Commit { recovered: false });
    }

    #[test]
    fn tripped_requires_recovery_band_not_just_threshold() {
        // 8% away passes the trip check but sits outside the 2% band.
        let d = breaker().evaluate(BreakerStatus::Tripped, dec!(108), Some(dec!(100)), None);
        assert_eq!(d, BreakerDecision::Reject);
    }

    #[test]
    fn tripped_recovers_inside_band() {
        let d = breaker().evaluate(BreakerStatus::Tripped, dec!(101.5), Some(dec!(100)), None);
        assert_eq!(d, BreakerDecision::Commit { recovered: true });
    }
}
