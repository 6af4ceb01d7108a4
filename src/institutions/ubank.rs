use super::{expect_success, extract_between, parse_json, totp_code, BalanceSource, FetchError};
use crate::ledger::{account_path, queensland_now, BalanceRecord, Pot};
use crate::secrets::{Secret, SecretStore};
use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{debug, info, instrument};

const TRUSTED_COOKIE_SECRET: &str = "ubank/trusted_cookie";

/// ubank adapter. The login is a multi-step session flow: harvest the
/// anti-forgery token from the login page, then submit credentials together
/// with the trusted cookie from the previous run. A valid trusted cookie
/// skips the one-time-code challenge; either way the bank rotates the
/// cookie, and the new one is written back to the secret store once the
/// whole retrieval has succeeded. Writing it earlier would invalidate a
/// still-good session if the run fails midway.
pub struct Ubank {
    base_url: String,
}

impl Ubank {
    pub fn new(base_url: &str) -> Self {
        Ubank {
            base_url: base_url.to_string(),
        }
    }
}

#[derive(Deserialize, Debug)]
struct SessionResponse {
    status: String,
    #[serde(rename = "accessToken")]
    access_token: Option<String>,
    #[serde(rename = "trustedCookie")]
    trusted_cookie: Option<String>,
}

#[derive(Deserialize, Debug)]
struct AccountsResponse {
    accounts: Vec<Account>,
}

#[derive(Deserialize, Debug)]
struct Account {
    nickname: String,
    balance: Money,
}

#[derive(Deserialize, Debug)]
struct Money {
    available: Decimal,
    currency: String,
}

impl Ubank {
    /// Completes the session flow and returns the access token plus the
    /// rotated trusted cookie.
    async fn open_session(
        &self,
        client: &reqwest::Client,
        secrets: &dyn SecretStore,
    ) -> Result<(String, Option<String>)> {
        let username = secrets.get("ubank/username").await?;
        let password = secrets.get("ubank/password").await?;
        let trusted_cookie = secrets.get(TRUSTED_COOKIE_SECRET).await?;

        // The login page embeds an anti-forgery token required on every
        // subsequent POST.
        let response = client
            .get(format!("{}/login", self.base_url))
            .send()
            .await
            .map_err(FetchError::Transport)?;
        let response = expect_success(response, "login page")?;
        let page = response.text().await.map_err(FetchError::Transport)?;
        let xsrf_token = extract_between(
            &page,
            r#"name="__RequestVerificationToken" type="hidden" value=""#,
            r#"""#,
        )
        .ok_or_else(|| {
            FetchError::UnexpectedResponse("login page missing verification token".into())
        })?
        .to_string();

        let response = client
            .post(format!("{}/api/v1/sessions", self.base_url))
            .header("X-XSRF-TOKEN", &xsrf_token)
            .json(&serde_json::json!({
                "username": username.expose(),
                "password": password.expose(),
                "trustedCookie": trusted_cookie.expose(),
            }))
            .send()
            .await
            .map_err(FetchError::Transport)?;
        let response = expect_success(response, "sessions endpoint")?;
        let mut session: SessionResponse = parse_json(
            &response.text().await.map_err(FetchError::Transport)?,
            "sessions",
        )?;

        // A stale trusted cookie re-triggers the second-factor challenge.
        if session.status == "OTP_REQUIRED" {
            info!("Trusted cookie not honoured, answering one-time-code challenge");
            let totp_seed = secrets.get("ubank/totp_key").await.map_err(|_| {
                FetchError::Auth("one-time code demanded but no TOTP seed stored".into())
            })?;

            let response = client
                .post(format!("{}/api/v1/sessions/otp", self.base_url))
                .header("X-XSRF-TOKEN", &xsrf_token)
                .json(&serde_json::json!({ "code": totp_code(totp_seed.expose())? }))
                .send()
                .await
                .map_err(FetchError::Transport)?;
            let response = expect_success(response, "otp endpoint")?;
            session = parse_json(
                &response.text().await.map_err(FetchError::Transport)?,
                "otp",
            )?;
        }

        if session.status != "SUCCESS" {
            return Err(FetchError::Auth(format!("session status: {}", session.status)).into());
        }
        let access_token = session.access_token.ok_or_else(|| {
            FetchError::UnexpectedResponse("session response missing accessToken".into())
        })?;

        let rotated = session
            .trusted_cookie
            .filter(|cookie| cookie.as_str() != trusted_cookie.expose());
        Ok((access_token, rotated))
    }
}

#[async_trait]
impl BalanceSource for Ubank {
    fn name(&self) -> &'static str {
        "ubank"
    }

    #[instrument(name = "UbankBalances", skip_all)]
    async fn fetch_balances(&self, secrets: &dyn SecretStore) -> Result<Vec<BalanceRecord>> {
        let client = reqwest::Client::builder()
            .user_agent("ledgerbal/0.3")
            .cookie_store(true)
            .build()?;

        let (access_token, rotated_cookie) = self.open_session(&client, secrets).await?;

        let response = client
            .get(format!("{}/api/v1/accounts", self.base_url))
            .bearer_auth(&access_token)
            .send()
            .await
            .map_err(FetchError::Transport)?;
        let response = expect_success(response, "accounts endpoint")?;
        let accounts: AccountsResponse = parse_json(
            &response.text().await.map_err(FetchError::Transport)?,
            "accounts",
        )?;

        let date = queensland_now().date_naive();
        let records: Vec<BalanceRecord> = accounts
            .accounts
            .into_iter()
            .map(|account| BalanceRecord {
                date,
                time: None,
                account: account_path(Pot::Assets, "UBank", &account.nickname),
                amount: account.balance.available,
                commodity: account.balance.currency,
            })
            .collect();

        // Persist the rotated cookie only now that the retrieval has
        // succeeded end to end.
        if let Some(cookie) = rotated_cookie {
            debug!("Persisting rotated trusted cookie");
            secrets
                .put(TRUSTED_COOKIE_SECRET, Secret::new(cookie))
                .await?;
        }

        Ok(records)
    }
}
