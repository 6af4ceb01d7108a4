use ledgerbal::secrets::{fjallkv::FjallSecretStore, Secret, SecretStore};
use std::fs;
use tracing::info;

mod test_utils {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    pub async fn create_up_mock_server(status: u16, body: &str) -> MockServer {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/accounts"))
            .respond_with(ResponseTemplate::new(status).set_body_string(body))
            .mount(&mock_server)
            .await;
        mock_server
    }

    pub async fn create_bitcoin_mock_server(body: &str) -> MockServer {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/balance"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&mock_server)
            .await;
        mock_server
    }
}

const UP_ACCOUNTS: &str = r#"{
    "data": [
        {
            "attributes": {
                "displayName": "Spending",
                "accountType": "TRANSACTIONAL",
                "balance": {"currencyCode": "AUD", "value": "321.09"}
            }
        }
    ]
}"#;

const BITCOIN_BALANCES: &str = r#"{
    "response": [
        {"addr": "addr1", "confirmed": 100000000},
        {"addr": "addr2", "confirmed": 50000000}
    ]
}"#;

async fn seed_secrets(dir: &std::path::Path) {
    // Opened in a scope of its own; fjall holds an exclusive lock and
    // update_balances reopens the same keyspace.
    let store = FjallSecretStore::open(dir).unwrap();
    store
        .put("up/api_token", Secret::new("up-token"))
        .await
        .unwrap();
    store
        .put("blockonomics/api_key", Secret::new("api-key"))
        .await
        .unwrap();
    store
        .put("bitcoin/addresses", Secret::new("addr1 addr2"))
        .await
        .unwrap();
    store
        .put("bitcoin/account", Secret::new("Assets:Bitcoin"))
        .await
        .unwrap();
}

fn write_config(
    dir: &std::path::Path,
    up_url: &str,
    bitcoin_url: &str,
    secrets_dir: &std::path::Path,
) -> std::path::PathBuf {
    let config_path = dir.join("config.yaml");
    let config_content = format!(
        r#"
institutions:
  up:
    base_url: {up_url}
  bitcoin:
    base_url: {bitcoin_url}
secrets_path: {}
"#,
        secrets_dir.display()
    );
    fs::write(&config_path, config_content).expect("Failed to write config file");
    config_path
}

#[test_log::test(tokio::test)]
async fn test_full_update_flow_with_mocks() {
    let up_server = test_utils::create_up_mock_server(200, UP_ACCOUNTS).await;
    let bitcoin_server = test_utils::create_bitcoin_mock_server(BITCOIN_BALANCES).await;

    let dir = tempfile::tempdir().unwrap();
    let secrets_dir = dir.path().join("secrets");
    seed_secrets(&secrets_dir).await;

    let config_path = write_config(
        dir.path(),
        &up_server.uri(),
        &bitcoin_server.uri(),
        &secrets_dir,
    );
    let ledger_path = dir.path().join("balances.beancount");

    let report = ledgerbal::update_balances(&ledger_path, Some(config_path.to_str().unwrap()))
        .await
        .expect("update_balances failed");
    info!(?report, "Run complete");

    assert!(report.succeeded("Up"));
    assert!(report.succeeded("Bitcoin"));

    let ledger = fs::read_to_string(&ledger_path).unwrap();
    assert!(ledger.contains("balance Assets:Up:Spending"));
    assert!(ledger.contains("321.09 AUD"));
    assert!(ledger.contains("balance Assets:Bitcoin"));
    assert!(ledger.contains("1.5 BTC"));
    // Bitcoin records carry a retrieval timestamp metadata line.
    assert!(ledger.contains("  time: \""));
}

#[test_log::test(tokio::test)]
async fn test_one_institution_failing_leaves_others_in_ledger() {
    // Up rejects the token; Bitcoin still works.
    let up_server = test_utils::create_up_mock_server(401, "").await;
    let bitcoin_server = test_utils::create_bitcoin_mock_server(BITCOIN_BALANCES).await;

    let dir = tempfile::tempdir().unwrap();
    let secrets_dir = dir.path().join("secrets");
    seed_secrets(&secrets_dir).await;

    let config_path = write_config(
        dir.path(),
        &up_server.uri(),
        &bitcoin_server.uri(),
        &secrets_dir,
    );
    let ledger_path = dir.path().join("balances.beancount");

    let report = ledgerbal::update_balances(&ledger_path, Some(config_path.to_str().unwrap()))
        .await
        .expect("update_balances failed");

    assert!(!report.succeeded("Up"));
    assert!(report.succeeded("Bitcoin"));

    let ledger = fs::read_to_string(&ledger_path).unwrap();
    assert!(!ledger.contains("Assets:Up"));
    assert!(ledger.contains("balance Assets:Bitcoin"));
}
