use super::{expect_success, parse_json, BalanceSource, FetchError};
use crate::ledger::{account_path, queensland_now, BalanceRecord, Pot};
use crate::normalize::sanitize_account_name;
use crate::secrets::SecretStore;
use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{debug, instrument};

/// Up bank adapter. A single authenticated GET against the accounts
/// endpoint; the bearer token never changes, so nothing is written back to
/// the secret store.
pub struct Up {
    base_url: String,
}

impl Up {
    pub fn new(base_url: &str) -> Self {
        Up {
            base_url: base_url.to_string(),
        }
    }
}

#[derive(Deserialize, Debug)]
struct AccountsResponse {
    data: Vec<Account>,
}

#[derive(Deserialize, Debug)]
struct Account {
    attributes: Attributes,
}

#[derive(Deserialize, Debug)]
struct Attributes {
    #[serde(rename = "displayName")]
    display_name: String,
    #[serde(rename = "accountType")]
    account_type: String,
    balance: Money,
}

#[derive(Deserialize, Debug)]
struct Money {
    #[serde(rename = "currencyCode")]
    currency_code: String,
    value: Decimal,
}

/// Everyday and saver accounts carry spendable balances; anything else
/// (e.g. a home loan product) is excluded from the snapshot.
fn is_transactional(account_type: &str) -> bool {
    matches!(account_type, "TRANSACTIONAL" | "SAVER")
}

#[async_trait]
impl BalanceSource for Up {
    fn name(&self) -> &'static str {
        "Up"
    }

    #[instrument(name = "UpBalances", skip_all)]
    async fn fetch_balances(&self, secrets: &dyn SecretStore) -> Result<Vec<BalanceRecord>> {
        let token = secrets.get("up/api_token").await?;

        let url = format!("{}/api/v1/accounts", self.base_url);
        debug!("Requesting accounts from {}", url);

        let client = reqwest::Client::builder()
            .user_agent("ledgerbal/0.3")
            .build()?;
        let response = client
            .get(&url)
            .bearer_auth(token.expose())
            .send()
            .await
            .map_err(FetchError::Transport)?;
        let response = expect_success(response, "accounts endpoint")?;

        let text = response.text().await.map_err(FetchError::Transport)?;
        let accounts: AccountsResponse = parse_json(&text, "accounts")?;

        let date = queensland_now().date_naive();
        Ok(accounts
            .data
            .into_iter()
            .filter(|account| is_transactional(&account.attributes.account_type))
            .map(|account| BalanceRecord {
                date,
                time: None,
                account: account_path(
                    Pot::Assets,
                    "Up",
                    &sanitize_account_name(&account.attributes.display_name),
                ),
                amount: account.attributes.balance.value,
                commodity: account.attributes.balance.currency_code,
            })
            .collect())
    }
}
