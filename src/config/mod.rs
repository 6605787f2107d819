//! Configuration management for the consensus engine
//!
//! Loads from a YAML file + environment variables via .env, with defaults
//! matching the documented policy (10% trip threshold, 1h windows, quorum 3).

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::path::Path;

/// Top-level engine configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub round: RoundConfig,
    pub breaker: BreakerConfig,
    pub twap: TwapConfig,
    pub staleness: StalenessConfig,
    pub outlier: OutlierConfig,
    /// Broadcast channel capacity for engine events.
    pub event_capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RoundConfig {
    /// Wall-clock lifetime of a round before the time trigger closes it.
    pub duration_secs: u64,
    /// Minimum submissions required for a round to produce a consensus.
    pub min_quorum: usize,
    /// Submission count that closes the round early (quorum trigger).
    pub closing_quorum: usize,
    /// Tolerance for observation timestamps ahead of the engine clock.
    pub clock_skew_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Relative move that trips the breaker (strict `>`; 0.10 = 10%).
    pub trip_threshold: Decimal,
    /// Band around the last good price a candidate must re-enter before a
    /// tripped breaker recovers. Must be narrower than `trip_threshold`.
    pub recovery_band: Decimal,
    /// Deviation from the fallback reference beyond which the reference
    /// replaces the last good price as the trip baseline.
    pub fallback_deviation_bound: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TwapConfig {
    /// Trailing window length in seconds.
    pub window_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StalenessConfig {
    /// Feed age beyond which `get_price` switches to the fallback.
    pub threshold_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutlierConfig {
    /// Deviation from the round median that counts as an outlier (0.20 = 20%).
    pub deviation_threshold: Decimal,
    /// Consecutive outliers before a validator is flagged.
    pub flag_limit: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            round: RoundConfig::default(),
            breaker: BreakerConfig::default(),
            twap: TwapConfig::default(),
            staleness: StalenessConfig::default(),
            outlier: OutlierConfig::default(),
            event_capacity: 256,
        }
    }
}

impl Default for RoundConfig {
    fn default() -> Self {
        Self {
            duration_secs: 60,
            min_quorum: 3,
            closing_quorum: 7,
            clock_skew_secs: 5,
        }
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            trip_threshold: dec!(0.10),
            recovery_band: dec!(0.02),
            fallback_deviation_bound: dec!(0.10),
        }
    }
}

impl Default for TwapConfig {
    fn default() -> Self {
        Self { window_secs: 3600 }
    }
}

impl Default for StalenessConfig {
    fn default() -> Self {
        Self {
            threshold_secs: 3600,
        }
    }
}

impl Default for OutlierConfig {
    fn default() -> Self {
        Self {
            deviation_threshold: dec!(0.20),
            flag_limit: 3,
        }
    }
}

impl EngineConfig {
    /// Load configuration from a YAML file, overlaid with `QUORUM__`-prefixed
    /// environment variables (e.g. `QUORUM__BREAKER__TRIP_THRESHOLD=0.08`).
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let path = path.as_ref();
        let settings = Config::builder()
            .add_source(File::from(path))
            .add_source(Environment::with_prefix("QUORUM").separator("__"))
            .build()
            .with_context(|| format!("failed to read config from {}", path.display()))?;

        let cfg: EngineConfig = settings
            .try_deserialize()
            .context("failed to parse engine configuration")?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject configurations the algorithms cannot honor.
    pub fn validate(&self) -> Result<()> {
        if self.round.min_quorum == 0 {
            bail!("round.min_quorum must be at least 1");
        }
        if self.round.closing_quorum < self.round.min_quorum {
            bail!(
                "round.closing_quorum ({}) must be >= round.min_quorum ({})",
                self.round.closing_quorum,
                self.round.min_quorum
            );
        }
        if self.breaker.trip_threshold <= Decimal::ZERO {
            bail!("breaker.trip_threshold must be positive");
        }
        if self.breaker.recovery_band <= Decimal::ZERO
            || self.breaker.recovery_band >= self.breaker.trip_threshold
        {
            bail!("breaker.recovery_band must be positive and narrower than the trip threshold");
        }
        if self.breaker.fallback_deviation_bound <= Decimal::ZERO {
            bail!("breaker.fallback_deviation_bound must be positive");
        }
        if self.outlier.deviation_threshold <= Decimal::ZERO {
            bail!("outlier.deviation_threshold must be positive");
        }
        if self.outlier.flag_limit == 0 {
            bail!("outlier.flag_limit must be at least 1");
        }
        if self.twap.window_secs == 0 || self.staleness.threshold_secs == 0 {
            bail!("twap.window_secs and staleness.threshold_secs must be positive");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = EngineConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.breaker.trip_threshold, dec!(0.10));
        assert_eq!(cfg.staleness.threshold_secs, 3600);
    }

    #[test]
    fn rejects_recovery_band_wider_than_trip() {
        let mut cfg = EngineConfig::default();
        cfg.breaker.recovery_band = dec!(0.15);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_zero_quorum() {
        let mut cfg = EngineConfig::default();
        cfg.round.min_quorum = 0;
        assert!(cfg.validate().is_err());
    }
}
