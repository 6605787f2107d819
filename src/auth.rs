//! Authorization gate - adapter over the external validator registry
//!
//! The engine never decides validator set membership; it only asks the
//! registry whether a submitter is authorized for an asset right now.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::types::{Asset, ValidatorId};

/// Query seam to the external validator registry.
///
/// Fails closed: the engine treats a registry error exactly like a `false`
/// answer. Freshness of the authorization data is the registry's problem;
/// the engine performs one lookup per submission with no caching.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuthorizationGate: Send + Sync {
    async fn is_authorized(
        &self,
        validator: &ValidatorId,
        asset: &Asset,
        at: DateTime<Utc>,
    ) -> anyhow::Result<bool>;
}

/// Gate that authorizes a fixed set of (validator, asset) pairs. Useful for
/// static deployments and tests.
#[derive(Debug, Default)]
pub struct StaticAuthorizationGate {
    entries: std::collections::HashSet<(ValidatorId, Asset)>,
}

impl StaticAuthorizationGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow(mut self, validator: ValidatorId, asset: Asset) -> Self {
        self.entries.insert((validator, asset));
        self
    }
}

#[async_trait]
impl AuthorizationGate for StaticAuthorizationGate {
    async fn is_authorized(
        &self,
        validator: &ValidatorId,
        asset: &Asset,
        _at: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        Ok(self
            .entries
            .contains(&(validator.clone(), asset.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_gate_allows_only_listed_pairs() {
        let gate = StaticAuthorizationGate::new()
            .allow(ValidatorId::from("val-1"), Asset::from("BTC-USD"));

        let now = Utc::now();
        assert!(gate
            .is_authorized(&ValidatorId::from("val-1"), &Asset::from("BTC-USD"), now)
            .await
            .unwrap());
        assert!(!gate
            .is_authorized(&ValidatorId::from("val-2"), &Asset::from("BTC-USD"), now)
            .await
            .unwrap());
        assert!(!gate
            .is_authorized(&ValidatorId::from("val-1"), &Asset::from("ETH-USD"), now)
            .await
            .unwrap());
    }
}
