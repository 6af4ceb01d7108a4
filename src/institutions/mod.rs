pub mod bitcoin;
pub mod selfwealth;
pub mod statecustodians;
pub mod ubank;
pub mod up;

use crate::ledger::BalanceRecord;
use crate::secrets::SecretStore;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;
use totp_rs::{Algorithm, TOTP};

/// Failure taxonomy shared by the adapters. The orchestrator treats every
/// variant the same way; the split exists so logs say what actually broke.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("unexpected response shape: {0}")]
    UnexpectedResponse(String),
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

/// One institution's balance retrieval capability. An adapter either returns
/// the complete list of current balances or fails; there is no partial
/// emission.
#[async_trait]
pub trait BalanceSource: Send + Sync {
    /// Institution name used in logs and run reports.
    fn name(&self) -> &'static str;

    /// Authenticates with material from the secret store and returns the
    /// institution's current balances. Adapters with rotating session
    /// material write the new material back through the store, but only
    /// after the whole retrieval succeeded.
    async fn fetch_balances(&self, secrets: &dyn SecretStore) -> Result<Vec<BalanceRecord>>;
}

/// Fails unless the response is 2xx. Unauthorized and forbidden responses
/// surface as authentication failures, everything else as an unexpected
/// shape.
pub(crate) fn expect_success(
    response: reqwest::Response,
    what: &str,
) -> Result<reqwest::Response, FetchError> {
    match response.status() {
        status if status.is_success() => Ok(response),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(FetchError::Auth(format!(
            "{what} returned HTTP {}",
            response.status()
        ))),
        status => Err(FetchError::UnexpectedResponse(format!(
            "{what} returned HTTP {status}"
        ))),
    }
}

/// Deserializes a response body, reporting failures as shape errors rather
/// than transport errors.
pub(crate) fn parse_json<T: serde::de::DeserializeOwned>(
    text: &str,
    what: &str,
) -> Result<T, FetchError> {
    serde_json::from_str(text)
        .map_err(|e| FetchError::UnexpectedResponse(format!("{what} response: {e}")))
}

/// Returns the text between the first occurrence of `prefix` and the next
/// `suffix`. Used to harvest anti-forgery tokens from login pages.
pub(crate) fn extract_between<'a>(text: &'a str, prefix: &str, suffix: &str) -> Option<&'a str> {
    let start = text.find(prefix)? + prefix.len();
    let rest = &text[start..];
    Some(&rest[..rest.find(suffix)?])
}

/// Generates the current six-digit one-time code from a base32 TOTP seed.
pub(crate) fn totp_code(encoded_seed: &str) -> Result<String> {
    let seed = totp_rs::Secret::Encoded(encoded_seed.trim().to_string())
        .to_bytes()
        .map_err(|e| anyhow!("Invalid TOTP seed: {e:?}"))?;
    let totp = TOTP::new_unchecked(Algorithm::SHA1, 6, 1, 30, seed);
    Ok(totp.generate_current()?)
}
