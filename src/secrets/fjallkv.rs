use super::{Secret, SecretStore};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use fjall::{Keyspace, PartitionCreateOptions, PartitionHandle, PersistMode};
use std::path::Path;
use tracing::debug;

/// Secret store backed by a fjall keyspace on disk. Values survive across
/// runs; the rotating-session institutions depend on that.
pub struct FjallSecretStore {
    keyspace: Keyspace,
    secrets: PartitionHandle,
}

impl FjallSecretStore {
    pub fn open(path: &Path) -> Result<Self> {
        std::fs::create_dir_all(path)
            .with_context(|| format!("Failed to create secret store dir: {}", path.display()))?;

        let keyspace = fjall::Config::new(path)
            .open()
            .with_context(|| format!("Failed to open secret store: {}", path.display()))?;
        let secrets = keyspace
            .open_partition("secrets", PartitionCreateOptions::default())
            .context("Failed to open secrets partition")?;

        Ok(Self { keyspace, secrets })
    }
}

#[async_trait]
impl SecretStore for FjallSecretStore {
    async fn get(&self, name: &str) -> Result<Secret> {
        let value = self
            .secrets
            .get(name)
            .with_context(|| format!("Failed to read secret: {name}"))?
            .ok_or_else(|| anyhow!("No secret stored under name: {name}"))?;

        let value = String::from_utf8(value.to_vec())
            .with_context(|| format!("Secret is not valid UTF-8: {name}"))?;
        debug!(name, "Read secret from store");
        Ok(Secret::new(value))
    }

    async fn put(&self, name: &str, value: Secret) -> Result<()> {
        self.secrets
            .insert(name, value.expose())
            .with_context(|| format!("Failed to write secret: {name}"))?;

        // Rotated session material must be durable before the run ends.
        self.keyspace
            .persist(PersistMode::SyncAll)
            .context("Failed to persist secret store")?;
        debug!(name, "Wrote secret to store");
        Ok(())
    }
}
