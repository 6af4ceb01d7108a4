use super::{expect_success, parse_json, BalanceSource, FetchError};
use crate::ledger::{queensland_now, BalanceRecord};
use crate::secrets::SecretStore;
use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{debug, instrument};

const SATOSHIS_PER_BTC: i64 = 100_000_000;

/// Blockonomics address aggregator. Posts the configured addresses (or an
/// xpub) in one request and reduces the confirmed balances to a single BTC
/// record.
pub struct Bitcoin {
    base_url: String,
}

impl Bitcoin {
    pub fn new(base_url: &str) -> Self {
        Bitcoin {
            base_url: base_url.to_string(),
        }
    }
}

#[derive(Deserialize, Debug)]
struct BalanceResponse {
    response: Vec<AddressBalance>,
}

#[derive(Deserialize, Debug)]
struct AddressBalance {
    /// Confirmed balance in satoshis.
    confirmed: i64,
}

#[async_trait]
impl BalanceSource for Bitcoin {
    fn name(&self) -> &'static str {
        "Bitcoin"
    }

    #[instrument(name = "BitcoinBalance", skip_all)]
    async fn fetch_balances(&self, secrets: &dyn SecretStore) -> Result<Vec<BalanceRecord>> {
        let api_key = secrets.get("blockonomics/api_key").await?;
        let addresses = secrets.get("bitcoin/addresses").await?;
        let account = secrets.get("bitcoin/account").await?;

        let url = format!("{}/api/balance", self.base_url);
        debug!("Requesting address balances from {}", url);

        let client = reqwest::Client::builder()
            .user_agent("ledgerbal/0.3")
            .build()?;
        let response = client
            .post(&url)
            .bearer_auth(api_key.expose())
            .json(&serde_json::json!({ "addr": addresses.expose() }))
            .send()
            .await
            .map_err(FetchError::Transport)?;
        let response = expect_success(response, "balance endpoint")?;

        let text = response.text().await.map_err(FetchError::Transport)?;
        let balances: BalanceResponse = parse_json(&text, "balance")?;

        let satoshis: i64 = balances.response.iter().map(|b| b.confirmed).sum();
        let amount = Decimal::from(satoshis) / Decimal::from(SATOSHIS_PER_BTC);

        let now = queensland_now();
        Ok(vec![BalanceRecord {
            date: now.date_naive(),
            time: Some(now),
            account: account.expose().to_string(),
            amount,
            commodity: "BTC".to_string(),
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::memory::MemorySecretStore;
    use rust_decimal::dec;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn seeded_store() -> MemorySecretStore {
        let store = MemorySecretStore::new();
        store.seed("blockonomics/api_key", "api-key");
        store.seed("bitcoin/addresses", "addr1 addr2");
        store.seed("bitcoin/account", "Assets:Bitcoin");
        store
    }

    #[tokio::test]
    async fn test_confirmed_balances_aggregate_to_one_record() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/balance"))
            .and(header("Authorization", "Bearer api-key"))
            .and(body_json(serde_json::json!({"addr": "addr1 addr2"})))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"response": [
                    {"addr": "addr1", "confirmed": 100000000, "unconfirmed": 0},
                    {"addr": "addr2", "confirmed": 50000000, "unconfirmed": 5}
                ]}"#,
            ))
            .mount(&mock_server)
            .await;

        let provider = Bitcoin::new(&mock_server.uri());
        let balances = provider.fetch_balances(&seeded_store()).await.unwrap();

        assert_eq!(balances.len(), 1);
        assert_eq!(balances[0].account, "Assets:Bitcoin");
        assert_eq!(balances[0].amount, dec!(1.5));
        assert_eq!(balances[0].commodity, "BTC");
        assert!(balances[0].time.is_some());
    }

    #[tokio::test]
    async fn test_unexpected_shape_fails() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/balance"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(r#"{"balances": []}"#),
            )
            .mount(&mock_server)
            .await;

        let provider = Bitcoin::new(&mock_server.uri());
        let result = provider.fetch_balances(&seeded_store()).await;
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("unexpected response shape"));
    }

    #[tokio::test]
    async fn test_server_error_fails() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/balance"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&mock_server)
            .await;

        let provider = Bitcoin::new(&mock_server.uri());
        assert!(provider.fetch_balances(&seeded_store()).await.is_err());
    }
}
