use super::{BalanceSource, FetchError};
use crate::ledger::{account_path, queensland_now, BalanceRecord, Pot};
use crate::secrets::{Secret, SecretStore};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use fantoccini::{ClientBuilder, Locator};
use rust_decimal::Decimal;
use std::str::FromStr;
use tracing::{debug, instrument};

/// Lines per portion block in the portion-details page text: label, BSB,
/// account number, product, rate, available redraw, balance.
const PORTION_BLOCK_LINES: usize = 7;

/// State Custodians loan portal adapter. The portal has no API, so a
/// WebDriver session signs in and lifts the raw text of the portion-details
/// view. Parsing that text into portions and converting portions to balance
/// records are pure stages kept separate from the scrape, so they stay
/// testable without a browser.
pub struct StateCustodians {
    base_url: String,
    webdriver_url: String,
    offset_portion: String,
}

/// One loan portion as it appears on the portion-details page. Balance and
/// redraw keep the page's formatting (`$` and thousands separators).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Portion {
    pub id: String,
    pub bsb: String,
    pub account_number: String,
    pub redraw: String,
    pub balance: String,
}

/// Splits raw page text into portions. Boilerplate lines before the first
/// portion label are discarded; the rest must be whole fixed-size blocks.
pub fn parse_portions(raw: &str) -> Result<Vec<Portion>, FetchError> {
    let lines: Vec<&str> = raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();

    let first = lines
        .iter()
        .position(|line| line.starts_with("Portion "))
        .ok_or_else(|| {
            FetchError::UnexpectedResponse("no portion blocks in page text".into())
        })?;

    let blocks = &lines[first..];
    if blocks.len() % PORTION_BLOCK_LINES != 0 {
        return Err(FetchError::UnexpectedResponse(format!(
            "truncated portion block: {} lines after header",
            blocks.len()
        )));
    }

    blocks
        .chunks_exact(PORTION_BLOCK_LINES)
        .map(|chunk| {
            let id = chunk[0].strip_prefix("Portion ").ok_or_else(|| {
                FetchError::UnexpectedResponse(format!("expected portion label, got: {}", chunk[0]))
            })?;
            Ok(Portion {
                id: id.to_string(),
                bsb: chunk[1].to_string(),
                account_number: chunk[2].to_string(),
                redraw: chunk[5].to_string(),
                balance: chunk[6].to_string(),
            })
        })
        .collect()
}

/// Strips the dollar sign and thousands separators from a page amount.
fn parse_money(text: &str) -> Result<Decimal, FetchError> {
    let cleaned: String = text.chars().filter(|c| *c != '$' && *c != ',').collect();
    Decimal::from_str(cleaned.trim())
        .map_err(|e| FetchError::UnexpectedResponse(format!("unparseable amount {text:?}: {e}")))
}

/// Converts parsed portions to balance records. The designated offset
/// portion is an asset; every other portion is a loan and therefore a
/// liability with a negative balance.
pub fn portions_to_balances(
    portions: &[Portion],
    offset_portion: &str,
    now: DateTime<FixedOffset>,
) -> Result<Vec<BalanceRecord>, FetchError> {
    portions
        .iter()
        .map(|portion| {
            let pot = if portion.id == offset_portion {
                Pot::Assets
            } else {
                Pot::Liabilities
            };
            Ok(BalanceRecord {
                date: now.date_naive(),
                time: Some(now),
                account: account_path(pot, "StateCustodians", &portion.id),
                amount: pot.signed(parse_money(&portion.balance)?),
                commodity: "AUD".to_string(),
            })
        })
        .collect()
}

impl StateCustodians {
    pub fn new(base_url: &str, webdriver_url: &str, offset_portion: &str) -> Self {
        StateCustodians {
            base_url: base_url.to_string(),
            webdriver_url: webdriver_url.to_string(),
            offset_portion: offset_portion.to_string(),
        }
    }

    /// Signs in and returns the visible text of the portion-details view.
    /// This is the only stage that needs a browser.
    async fn fetch_portion_text(
        &self,
        customer_id: &Secret,
        password: &Secret,
    ) -> Result<String> {
        let client = ClientBuilder::native()
            .connect(&self.webdriver_url)
            .await
            .with_context(|| format!("Failed to connect to WebDriver: {}", self.webdriver_url))?;

        let result = self.extract_raw_text(&client, customer_id, password).await;
        // Close the session regardless of scrape outcome.
        let _ = client.close().await;
        result
    }

    async fn extract_raw_text(
        &self,
        client: &fantoccini::Client,
        customer_id: &Secret,
        password: &Secret,
    ) -> Result<String> {
        client.goto(&self.base_url).await?;
        client
            .find(Locator::Css("input[name='CustomerId']"))
            .await?
            .send_keys(customer_id.expose())
            .await?;
        client
            .find(Locator::Css("input[name='Password']"))
            .await?
            .send_keys(password.expose())
            .await?;
        client
            .find(Locator::Css("button[type='submit']"))
            .await?
            .click()
            .await?;

        let details_url = format!("{}/Borrower/PortionDetails", self.base_url);
        debug!("Navigating to {}", details_url);
        client.goto(&details_url).await?;
        let text = client.find(Locator::Css("body")).await?.text().await?;
        Ok(text)
    }
}

#[async_trait]
impl BalanceSource for StateCustodians {
    fn name(&self) -> &'static str {
        "State Custodians"
    }

    #[instrument(name = "StateCustodiansBalances", skip_all)]
    async fn fetch_balances(&self, secrets: &dyn SecretStore) -> Result<Vec<BalanceRecord>> {
        let customer_id = secrets.get("statecustodians/customer_id").await?;
        let password = secrets.get("statecustodians/password").await?;

        let text = self.fetch_portion_text(&customer_id, &password).await?;
        let portions = parse_portions(&text)?;
        debug!(count = portions.len(), "Parsed loan portions");

        Ok(portions_to_balances(
            &portions,
            &self.offset_portion,
            queensland_now(),
        )?)
    }
}
