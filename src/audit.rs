//! CSV audit archive of closed rounds
//!
//! Every round closure appends one row: the terminal outcome is recorded for
//! audit and never mutated afterwards.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use csv::WriterBuilder;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::types::{Asset, RoundId, RoundOutcome};

/// One archived round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundRecord {
    pub closed_at: DateTime<Utc>,
    pub asset: String,
    pub round_id: u64,
    pub outcome: String,
    pub median_price: Option<Decimal>,
    pub submission_count: usize,
}

impl RoundRecord {
    pub fn new(
        asset: &Asset,
        round_id: RoundId,
        closed_at: DateTime<Utc>,
        outcome: RoundOutcome,
        median_price: Option<Decimal>,
        submission_count: usize,
    ) -> Self {
        Self {
            closed_at,
            asset: asset.to_string(),
            round_id: round_id.0,
            outcome: outcome.to_string(),
            median_price,
            submission_count,
        }
    }
}

/// Append-only CSV log of round outcomes.
#[derive(Debug)]
pub struct RoundAuditLog {
    path: PathBuf,
    // Serializes appends from concurrent per-asset closures.
    lock: Mutex<()>,
}

impl RoundAuditLog {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create audit dir {}", parent.display()))?;
        }
        Ok(Self {
            path,
            lock: Mutex::new(()),
        })
    }

    pub fn append(&self, record: &RoundRecord) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());

        let write_headers = !self.path.exists();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open audit log {}", self.path.display()))?;

        let mut writer = WriterBuilder::new()
            .has_headers(write_headers)
            .from_writer(file);
        writer.serialize(record).context("failed to write audit record")?;
        writer.flush().context("failed to flush audit log")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn appends_rows_with_single_header() {
        let path = std::env::temp_dir().join(format!(
            "quorum-oracle-audit-{}.csv",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);

        let log = RoundAuditLog::new(&path).unwrap();
        for (id, outcome) in [
            (1, RoundOutcome::Committed),
            (2, RoundOutcome::RejectedByBreaker),
        ] {
            log.append(&RoundRecord::new(
                &Asset::from("BTC-USD"),
                RoundId(id),
                Utc::now(),
                outcome,
                Some(dec!(100)),
                5,
            ))
            .unwrap();
        }

        let body = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("closed_at"));
        assert!(lines[2].contains("REJECTED_BY_BREAKER"));

        let _ = std::fs::remove_file(&path);
    }
}
