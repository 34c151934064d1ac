//! Shared secret store: a daily hash `Vault:<yyyy-mm-dd>` that expires after a day.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::debug;

use crate::error::VicinityError;
use crate::fabric::Fabric;

pub const VAULT: &str = "Vault";
const VAULT_TTL: Duration = Duration::from_secs(86_400);
const HEALTH_ENTRY: &str = "environment/health/vault";
const HEALTH_TTL: Duration = Duration::from_secs(120);

#[derive(Clone)]
pub struct Vault {
    fabric: Arc<dyn Fabric>,
}

impl Vault {
    pub fn new(fabric: Arc<dyn Fabric>) -> Self {
        Self { fabric }
    }

    fn key() -> String {
        format!("{VAULT}:{}", Utc::now().format("%Y-%m-%d"))
    }

    pub async fn add_item(&self, name: &str, value: impl Into<String>) -> Result<(), VicinityError> {
        let key = Self::key();
        self.fabric.hset(&key, name, value.into()).await?;
        self.fabric.expire(&key, VAULT_TTL).await?;
        debug!(item = name, "Vault item stored");
        Ok(())
    }

    pub async fn get_item(&self, name: &str) -> Result<Option<String>, VicinityError> {
        Ok(self.fabric.hget(&Self::key(), name).await?)
    }

    /// Returns whether the item existed.
    pub async fn remove_item(&self, name: &str) -> Result<bool, VicinityError> {
        Ok(self.fabric.hdel(&Self::key(), name).await?)
    }

    pub async fn is_ok(&self) -> bool {
        let stamp = Utc::now().to_rfc3339();
        if self.fabric.hset(HEALTH_ENTRY, "status", stamp.clone()).await.is_err()
            || self.fabric.expire(HEALTH_ENTRY, HEALTH_TTL).await.is_err()
        {
            return false;
        }
        matches!(self.fabric.hget(HEALTH_ENTRY, "status").await, Ok(Some(value)) if value == stamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fabric::InMemoryFabric;

    #[tokio::test]
    async fn test_items_round_trip_and_remove() {
        let vault = Vault::new(Arc::new(InMemoryFabric::new()));
        vault.add_item("payment-key", "s3cr3t").await.unwrap();
        assert_eq!(vault.get_item("payment-key").await.unwrap().as_deref(), Some("s3cr3t"));

        assert!(vault.remove_item("payment-key").await.unwrap());
        assert!(!vault.remove_item("payment-key").await.unwrap());
        assert_eq!(vault.get_item("payment-key").await.unwrap(), None);
        assert!(vault.is_ok().await);
    }
}
