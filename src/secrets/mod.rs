pub mod fjallkv;
pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A secret value that never appears in logs or error messages. `Debug` and
/// `Display` both redact; call `expose` to read the value.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Secret(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Secret(value.to_string())
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(********)")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("********")
    }
}

/// Durable per-institution credential storage. `put` exists for the
/// institutions whose session material rotates on each use; it must only be
/// called after a successful retrieval that yielded new material.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Returns the named secret, failing if it has not been stored.
    async fn get(&self, name: &str) -> Result<Secret>;

    /// Overwrites the named secret.
    async fn put(&self, name: &str, value: Secret) -> Result<()>;
}
