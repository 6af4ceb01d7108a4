use super::{Secret, SecretStore};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

/// In-memory secret store. Nothing survives the process; used in tests and
/// for dry runs against mock institutions.
#[derive(Default)]
pub struct MemorySecretStore {
    values: RwLock<HashMap<String, Secret>>,
    writes: AtomicUsize,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a secret without counting as a rotation write.
    pub fn seed(&self, name: &str, value: impl Into<String>) {
        self.values
            .write()
            .unwrap()
            .insert(name.to_string(), Secret::new(value));
    }

    /// Number of `put` calls since construction.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn get(&self, name: &str) -> Result<Secret> {
        self.values
            .read()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow!("No secret stored under name: {name}"))
    }

    async fn put(&self, name: &str, value: Secret) -> Result<()> {
        self.values
            .write()
            .unwrap()
            .insert(name.to_string(), value);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
