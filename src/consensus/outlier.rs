//! Outlier flagger - persistent-offender tracking per validator
//!
//! Observes every round closure (committed, rejected, or voided) and counts
//! consecutive submissions that strayed too far from the round median. One
//! in-bounds submission resets the counter; the flag itself is sticky until
//! a governance reset.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::types::ValidatorId;

/// Per-validator deviation history for one asset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorDeviationRecord {
    pub consecutive_outliers: u32,
    pub flagged: bool,
}

/// Tracks deviation records for all validators submitting on one asset.
#[derive(Debug, Clone)]
pub struct OutlierFlagger {
    /// Deviation from the median that counts as an outlier (strict `>`).
    deviation_threshold: Decimal,
    /// Consecutive outliers at which a validator is flagged.
    flag_limit: u32,
    records: HashMap<ValidatorId, ValidatorDeviationRecord>,
}

impl OutlierFlagger {
    pub fn new(deviation_threshold: Decimal, flag_limit: u32) -> Self {
        Self {
            deviation_threshold,
            flag_limit,
            records: HashMap::new(),
        }
    }

    /// Score one closed round. Returns validators newly flagged by this
    /// round, with their counter value, for event emission.
    pub fn observe_round<'a>(
        &mut self,
        median: Decimal,
        submissions: impl Iterator<Item = (&'a ValidatorId, Decimal)>,
    ) -> Vec<(ValidatorId, u32)> {
        let mut newly_flagged = Vec::new();
        if median.is_zero() {
            return newly_flagged;
        }

        for (validator, price) in submissions {
            let deviation = ((price - median) / median).abs();
            let record = self.records.entry(validator.clone()).or_default();

            if deviation > self.deviation_threshold {
                record.consecutive_outliers += 1;
                if record.consecutive_outliers >= self.flag_limit && !record.flagged {
                    record.flagged = true;
                    newly_flagged.push((validator.clone(), record.consecutive_outliers));
                }
            } else {
                record.consecutive_outliers = 0;
            }
        }

        newly_flagged
    }

    pub fn record(&self, validator: &ValidatorId) -> Option<&ValidatorDeviationRecord> {
        self.records.get(validator)
    }

    /// Governance reset: clears the counter and the sticky flag.
    pub fn reset(&mut self, validator: &ValidatorId) {
        self.records.remove(validator);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn flagger() -> OutlierFlagger {
        OutlierFlagger::new(dec!(0.20), 3)
    }

    fn val(id: &str) -> ValidatorId {
        ValidatorId::from(id)
    }

    #[test]
    fn flags_on_third_consecutive_outlier() {
        let mut f = flagger();
        let v = val("val-1");

        for round in 1..=3u32 {
            let flagged = f.observe_round(dec!(100), std::iter::once((&v, dec!(150))));
            if round < 3 {
                assert!(flagged.is_empty(), "flagged early on round {round}");
            } else {
                assert_eq!(flagged, vec![(v.clone(), 3)]);
            }
        }
        assert!(f.record(&v).unwrap().flagged);
    }

    #[test]
    fn in_bounds_submission_resets_counter() {
        let mut f = flagger();
        let v = val("val-1");

        f.observe_round(dec!(100), std::iter::once((&v, dec!(150))));
        f.observe_round(dec!(100), std::iter::once((&v, dec!(130))));
        // Back within 20% of the median.
        f.observe_round(dec!(100), std::iter::once((&v, dec!(110))));
        assert_eq!(f.record(&v).unwrap().consecutive_outliers, 0);

        // Two more outliers do not flag; the streak restarted.
        f.observe_round(dec!(100), std::iter::once((&v, dec!(150))));
        let flagged = f.observe_round(dec!(100), std::iter::once((&v, dec!(150))));
        assert!(flagged.is_empty());
    }

    #[test]
    fn exactly_at_threshold_is_in_bounds() {
        let mut f = flagger();
        let v = val("val-1");
        f.observe_round(dec!(100), std::iter::once((&v, dec!(120))));
        assert_eq!(f.record(&v).unwrap().consecutive_outliers, 0);
    }

    #[test]
    fn flag_event_fires_once() {
        let mut f = flagger();
        let v = val("val-1");
        for _ in 0..3 {
            f.observe_round(dec!(100), std::iter::once((&v, dec!(150))));
        }
        let again = f.observe_round(dec!(100), std::iter::once((&v, dec!(150))));
        assert!(again.is_empty());
    }

    #[test]
    fn governance_reset_clears_flag() {
        let mut f = flagger();
        let v = val("val-1");
        for _ in 0..3 {
            f.observe_round(dec!(100), std::iter::once((&v, dec!(150))));
        }
        f.reset(&v);
        assert!(f.record(&v).is_none());
    }
}
