use super::{expect_success, parse_json, totp_code, BalanceSource, FetchError};
use crate::ledger::{account_path, queensland_now, BalanceRecord, Pot};
use crate::normalize::normalize_cash_code;
use crate::secrets::SecretStore;
use anyhow::Result;
use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::distr::{Alphanumeric, SampleString};
use reqwest::header::LOCATION;
use rust_decimal::Decimal;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, instrument};

/// SelfWealth brokerage adapter. Signs in through the OAuth2 authorization
/// code flow with PKCE: password login, TOTP second factor, authorization
/// code capture, token exchange, then one holdings call. Each asset is its
/// own sub-account, one record per holding or cash sleeve.
pub struct SelfWealth {
    auth_base_url: String,
    api_base_url: String,
    client_id: String,
    redirect_uri: String,
}

impl SelfWealth {
    pub fn new(
        auth_base_url: &str,
        api_base_url: &str,
        client_id: &str,
        redirect_uri: &str,
    ) -> Self {
        SelfWealth {
            auth_base_url: auth_base_url.to_string(),
            api_base_url: api_base_url.to_string(),
            client_id: client_id.to_string(),
            redirect_uri: redirect_uri.to_string(),
        }
    }
}

/// RFC 7636 S256: BASE64URL(SHA256(verifier)), unpadded.
pub(crate) fn code_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

fn random_token(len: usize) -> String {
    Alphanumeric.sample_string(&mut rand::rng(), len)
}

#[derive(Deserialize, Debug)]
struct AuthnResponse {
    status: String,
    #[serde(rename = "stateToken")]
    state_token: Option<String>,
    #[serde(default)]
    factors: Vec<Factor>,
}

#[derive(Deserialize, Debug)]
struct Factor {
    id: String,
    #[serde(rename = "factorType")]
    factor_type: String,
}

#[derive(Deserialize, Debug)]
struct VerifyResponse {
    status: String,
    #[serde(rename = "sessionToken")]
    session_token: Option<String>,
}

#[derive(Deserialize, Debug)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize, Debug)]
struct PortfoliosResponse {
    portfolios: Vec<Portfolio>,
}

#[derive(Deserialize, Debug)]
struct Portfolio {
    id: String,
    #[serde(rename = "tradingEligible")]
    trading_eligible: bool,
}

#[derive(Deserialize, Debug)]
struct HoldingsResponse {
    holdings: Vec<Holding>,
}

#[derive(Deserialize, Debug)]
struct Holding {
    code: String,
    #[serde(rename = "totalUnits")]
    total_units: Decimal,
}

impl SelfWealth {
    /// Runs the login sequence and returns a bearer token for the API.
    async fn obtain_access_token(
        &self,
        client: &reqwest::Client,
        secrets: &dyn SecretStore,
    ) -> Result<String> {
        let email = secrets.get("selfwealth/email").await?;
        let password = secrets.get("selfwealth/password").await?;
        let totp_seed = secrets.get("selfwealth/totp_key").await?;

        // Primary credentials. The provider answers with a discriminant
        // status; anything but an MFA challenge here is wrong.
        let response = client
            .post(format!("{}/api/v1/authn", self.auth_base_url))
            .json(&serde_json::json!({
                "username": email.expose(),
                "password": password.expose(),
            }))
            .send()
            .await
            .map_err(FetchError::Transport)?;
        let response = expect_success(response, "login endpoint")?;
        let authn: AuthnResponse = parse_json(&response.text().await.map_err(FetchError::Transport)?, "login")?;
        if authn.status != "MFA_REQUIRED" {
            return Err(FetchError::Auth(format!("login status: {}", authn.status)).into());
        }
        let state_token = authn
            .state_token
            .ok_or_else(|| FetchError::UnexpectedResponse("login response missing stateToken".into()))?;
        let factor = authn
            .factors
            .iter()
            .find(|f| f.factor_type == "token:software:totp")
            .ok_or_else(|| FetchError::UnexpectedResponse("no TOTP factor offered".into()))?;

        // Second factor.
        let response = client
            .post(format!(
                "{}/api/v1/authn/factors/{}/verify",
                self.auth_base_url, factor.id
            ))
            .json(&serde_json::json!({
                "stateToken": state_token,
                "passCode": totp_code(totp_seed.expose())?,
            }))
            .send()
            .await
            .map_err(FetchError::Transport)?;
        let response = expect_success(response, "factor verify endpoint")?;
        let verify: VerifyResponse = parse_json(
            &response.text().await.map_err(FetchError::Transport)?,
            "factor verify",
        )?;
        if verify.status != "SUCCESS" {
            return Err(FetchError::Auth(format!("second factor status: {}", verify.status)).into());
        }
        let session_token = verify.session_token.ok_or_else(|| {
            FetchError::UnexpectedResponse("verify response missing sessionToken".into())
        })?;

        // Authorization code with PKCE. The redirect is captured rather
        // than followed.
        let verifier = random_token(43);
        let state = random_token(32);
        let nonce = random_token(32);
        let response = client
            .get(format!("{}/oauth2/v1/authorize", self.auth_base_url))
            .query(&[
                ("client_id", self.client_id.as_str()),
                ("redirect_uri", self.redirect_uri.as_str()),
                ("response_type", "code"),
                ("scope", "openid"),
                ("state", state.as_str()),
                ("nonce", nonce.as_str()),
                ("code_challenge", code_challenge(&verifier).as_str()),
                ("code_challenge_method", "S256"),
                ("sessionToken", session_token.as_str()),
            ])
            .send()
            .await
            .map_err(FetchError::Transport)?;
        if !response.status().is_redirection() {
            return Err(FetchError::UnexpectedResponse(format!(
                "authorize endpoint returned HTTP {}",
                response.status()
            ))
            .into());
        }
        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                FetchError::UnexpectedResponse("authorize redirect missing Location".into())
            })?;
        let redirect = url::Url::parse(location).map_err(|e| {
            FetchError::UnexpectedResponse(format!("authorize redirect URL: {e}"))
        })?;
        let mut code = None;
        let mut returned_state = None;
        for (key, value) in redirect.query_pairs() {
            match key.as_ref() {
                "code" => code = Some(value.into_owned()),
                "state" => returned_state = Some(value.into_owned()),
                _ => {}
            }
        }
        let code = code.ok_or_else(|| {
            FetchError::UnexpectedResponse("authorize redirect missing code".into())
        })?;
        if returned_state.as_deref() != Some(state.as_str()) {
            return Err(
                FetchError::UnexpectedResponse("authorize redirect state mismatch".into()).into(),
            );
        }

        // Exchange the code for tokens.
        let response = client
            .post(format!("{}/oauth2/v1/token", self.auth_base_url))
            .form(&[
                ("grant_type", "authorization_code"),
                ("client_id", self.client_id.as_str()),
                ("redirect_uri", self.redirect_uri.as_str()),
                ("code", code.as_str()),
                ("code_verifier", verifier.as_str()),
            ])
            .send()
            .await
            .map_err(FetchError::Transport)?;
        let response = expect_success(response, "token endpoint")?;
        let token: TokenResponse = parse_json(
            &response.text().await.map_err(FetchError::Transport)?,
            "token",
        )?;
        Ok(token.access_token)
    }
}

#[async_trait]
impl BalanceSource for SelfWealth {
    fn name(&self) -> &'static str {
        "SelfWealth"
    }

    #[instrument(name = "SelfWealthBalances", skip_all)]
    async fn fetch_balances(&self, secrets: &dyn SecretStore) -> Result<Vec<BalanceRecord>> {
        let client = reqwest::Client::builder()
            .user_agent("ledgerbal/0.3")
            .cookie_store(true)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        let access_token = self.obtain_access_token(&client, secrets).await?;

        // Accounts with multiple sub-portfolios expose exactly one eligible
        // for trading; that is the one holding the balances.
        let response = client
            .get(format!("{}/api/v1/portfolios", self.api_base_url))
            .bearer_auth(&access_token)
            .send()
            .await
            .map_err(FetchError::Transport)?;
        let response = expect_success(response, "portfolios endpoint")?;
        let portfolios: PortfoliosResponse = parse_json(
            &response.text().await.map_err(FetchError::Transport)?,
            "portfolios",
        )?;
        let portfolio = portfolios
            .portfolios
            .into_iter()
            .find(|p| p.trading_eligible)
            .ok_or_else(|| {
                FetchError::UnexpectedResponse("no trading-eligible portfolio".into())
            })?;
        debug!(portfolio = %portfolio.id, "Selected trading portfolio");

        let response = client
            .get(format!(
                "{}/api/v1/portfolios/{}/holdings",
                self.api_base_url, portfolio.id
            ))
            .bearer_auth(&access_token)
            .send()
            .await
            .map_err(FetchError::Transport)?;
        let response = expect_success(response, "holdings endpoint")?;
        let holdings: HoldingsResponse = parse_json(
            &response.text().await.map_err(FetchError::Transport)?,
            "holdings",
        )?;

        let now = queensland_now();
        Ok(holdings
            .holdings
            .into_iter()
            .map(|holding| {
                let code = normalize_cash_code(&holding.code).to_string();
                BalanceRecord {
                    date: now.date_naive(),
                    time: Some(now),
                    account: account_path(Pot::Assets, "SelfWealth", &code),
                    amount: holding.total_units,
                    commodity: code,
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::memory::MemorySecretStore;
    use rust_decimal::dec;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

    #[test]
    fn test_code_challenge_rfc7636_vector() {
        assert_eq!(
            code_challenge("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk"),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn test_random_tokens_are_fixed_length_and_distinct() {
        let a = random_token(43);
        let b = random_token(43);
        assert_eq!(a.len(), 43);
        assert_ne!(a, b);
    }

    fn seeded_store() -> MemorySecretStore {
        let store = MemorySecretStore::new();
        store.seed("selfwealth/email", "me@example.com");
        store.seed("selfwealth/password", "password");
        store.seed("selfwealth/totp_key", "JBSWY3DPEHPK3PXP");
        store
    }

    /// Redirects back to the registered URI, echoing the caller's state.
    struct AuthorizeRedirect {
        state_echo: bool,
    }

    impl Respond for AuthorizeRedirect {
        fn respond(&self, request: &Request) -> ResponseTemplate {
            let state = if self.state_echo {
                request
                    .url
                    .query_pairs()
                    .find(|(k, _)| k == "state")
                    .map(|(_, v)| v.into_owned())
                    .unwrap_or_default()
            } else {
                "bogus".to_string()
            };
            ResponseTemplate::new(302).insert_header(
                "Location",
                format!("https://broker.example/callback?code=AUTHCODE&state={state}").as_str(),
            )
        }
    }

    async fn mount_login_flow(server: &MockServer, state_echo: bool) {
        Mock::given(method("POST"))
            .and(path("/api/v1/authn"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{
                    "status": "MFA_REQUIRED",
                    "stateToken": "state-token",
                    "factors": [
                        {"id": "factor-1", "factorType": "token:software:totp"}
                    ]
                }"#,
            ))
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/authn/factors/factor-1/verify"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"status": "SUCCESS", "sessionToken": "session-token"}"#,
            ))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/oauth2/v1/authorize"))
            .respond_with(AuthorizeRedirect { state_echo })
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path("/oauth2/v1/token"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"access_token": "bearer-token", "refresh_token": "refresh"}"#,
            ))
            .mount(server)
            .await;
    }

    async fn mount_holdings(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/api/v1/portfolios"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"portfolios": [
                    {"id": "super-1", "tradingEligible": false},
                    {"id": "trade-1", "tradingEligible": true}
                ]}"#,
            ))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/portfolios/trade-1/holdings"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"holdings": [
                    {"code": "CASH", "totalUnits": "150.10"},
                    {"code": "US CASH", "totalUnits": "75.00"},
                    {"code": "VAS", "totalUnits": "42"}
                ]}"#,
            ))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_full_login_and_holdings_fetch() {
        let server = MockServer::start().await;
        mount_login_flow(&server, true).await;
        mount_holdings(&server).await;

        let provider = SelfWealth::new(
            &server.uri(),
            &server.uri(),
            "client-id",
            "https://broker.example/callback",
        );
        let balances = provider.fetch_balances(&seeded_store()).await.unwrap();

        assert_eq!(balances.len(), 3);
        assert_eq!(balances[0].account, "Assets:SelfWealth:AUD");
        assert_eq!(balances[0].commodity, "AUD");
        assert_eq!(balances[0].amount, dec!(150.10));
        assert_eq!(balances[1].account, "Assets:SelfWealth:USD");
        assert_eq!(balances[1].commodity, "USD");
        assert_eq!(balances[2].account, "Assets:SelfWealth:VAS");
        assert_eq!(balances[2].amount, dec!(42));
    }

    #[tokio::test]
    async fn test_state_mismatch_fails() {
        let server = MockServer::start().await;
        mount_login_flow(&server, false).await;
        mount_holdings(&server).await;

        let provider = SelfWealth::new(
            &server.uri(),
            &server.uri(),
            "client-id",
            "https://broker.example/callback",
        );
        let result = provider.fetch_balances(&seeded_store()).await;
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("state mismatch"));
    }

    #[tokio::test]
    async fn test_unexpected_login_status_fails() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/authn"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"{"status": "LOCKED_OUT"}"#),
            )
            .mount(&server)
            .await;

        let provider = SelfWealth::new(
            &server.uri(),
            &server.uri(),
            "client-id",
            "https://broker.example/callback",
        );
        let result = provider.fetch_balances(&seeded_store()).await;
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("login status: LOCKED_OUT"));
    }
}
