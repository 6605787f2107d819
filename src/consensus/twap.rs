//! Rolling time-weighted average price window
//!
//! Holds (timestamp, price) samples from committed rounds over a fixed
//! trailing duration. Samples are evicted lazily: on record relative to the
//! newest sample, on query relative to `now`. The newest sample is never
//! evicted - its weight extends forward to the query instant.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TwapWindow {
    window_secs: i64,
    samples: VecDeque<(DateTime<Utc>, Decimal)>,
}

impl TwapWindow {
    pub fn new(window: Duration) -> Self {
        Self {
            window_secs: window.num_seconds(),
            samples: VecDeque::new(),
        }
    }

    fn window(&self) -> Duration {
        Duration::seconds(self.window_secs)
    }

    /// Append a committed sample and evict entries older than the window
    /// relative to the newest sample.
    pub fn record(&mut self, price: Decimal, at: DateTime<Utc>) {
        self.samples.push_back((at, price));
        let newest = at;
        while self.samples.len() > 1 {
            let (ts, _) = self.samples[0];
            if newest - ts > self.window() {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Time-weighted average as of `now`. Each sample's price holds until the
    /// next sample; the latest sample holds until `now`. With one sample in
    /// the window, that price; with zero, `None`.
    pub fn twap(&self, now: DateTime<Utc>) -> Option<Decimal> {
        if self.samples.is_empty() {
            return None;
        }

        // Query-side lazy eviction: skip samples that have aged out of the
        // window as of now, but keep the newest regardless.
        let newest_idx = self.samples.len() - 1;
        let start = self
            .samples
            .iter()
            .position(|(ts, _)| now - *ts <= self.window())
            .unwrap_or(newest_idx);

        let live: Vec<(DateTime<Utc>, Decimal)> =
            self.samples.iter().skip(start).copied().collect();

        if live.len() == 1 {
            return Some(live[0].1);
        }

        let mut weighted = Decimal::ZERO;
        let mut total_secs = 0i64;
        for pair in live.windows(2) {
            let (t0, p0) = pair[0];
            let (t1, _) = pair[1];
            let secs = (t1 - t0).num_seconds().max(0);
            weighted += p0 * Decimal::from(secs);
            total_secs += secs;
        }
        let (t_last, p_last) = live[live.len() - 1];
        let tail_secs = (now - t_last).num_seconds().max(0);
        weighted += p_last * Decimal::from(tail_secs);
        total_secs += tail_secs;

        if total_secs == 0 {
            return Some(p_last);
        }
        Some(weighted / Decimal::from(total_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn empty_window_is_unavailable() {
        let w = TwapWindow::new(Duration::hours(1));
        assert_eq!(w.twap(t0()), None);
    }

    #[test]
    fn single_sample_returns_that_price() {
        let mut w = TwapWindow::new(Duration::hours(1));
        w.record(dec!(100), t0());
        assert_eq!(w.twap(t0() + Duration::minutes(10)), Some(dec!(100)));
    }

    #[test]
    fn first_sample_weight_extends_to_second() {
        let mut w = TwapWindow::new(Duration::hours(1));
        w.record(dec!(100), t0());
        w.record(dec!(120), t0() + Duration::seconds(3600));
        assert_eq!(w.twap(t0() + Duration::seconds(3600)), Some(dec!(100)));
    }

    #[test]
    fn latest_sample_weight_extends_to_now() {
        let mut w = TwapWindow::new(Duration::hours(1));
        w.record(dec!(100), t0());
        w.record(dec!(120), t0() + Duration::seconds(3600));
        // By t0+7200 the first sample has aged out; only 120 remains live.
        assert_eq!(w.twap(t0() + Duration::seconds(7200)), Some(dec!(120)));
    }

    #[test]
    fn interior_weighting_is_time_proportional() {
        let mut w = TwapWindow::new(Duration::hours(1));
        w.record(dec!(100), t0());
        w.record(dec!(200), t0() + Duration::seconds(900));
        // 100 for 900s, 200 for 2700s of a 3600s span.
        let got = w.twap(t0() + Duration::seconds(3600)).unwrap();
        assert_eq!(got, dec!(175));
    }

    #[test]
    fn record_evicts_aged_samples_but_keeps_newest() {
        let mut w = TwapWindow::new(Duration::hours(1));
        w.record(dec!(100), t0());
        w.record(dec!(110), t0() + Duration::seconds(5000));
        assert_eq!(w.sample_count(), 1);
        assert_eq!(w.twap(t0() + Duration::seconds(5000)), Some(dec!(110)));
    }
}
