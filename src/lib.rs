pub mod config;
pub mod institutions;
pub mod ledger;
pub mod log;
pub mod normalize;
pub mod orchestrator;
pub mod secrets;

use crate::config::{AppConfig, InstitutionsConfig};
use crate::institutions::{
    bitcoin::Bitcoin, selfwealth::SelfWealth, statecustodians::StateCustodians, ubank::Ubank,
    up::Up, BalanceSource,
};
use crate::orchestrator::RunReport;
use crate::secrets::fjallkv::FjallSecretStore;
use anyhow::Result;
use std::path::Path;
use tracing::{debug, info};

/// Retrieves balances from every configured institution and appends them to
/// the ledger file. One institution failing never blocks the others; the
/// returned report records each institution's outcome.
pub async fn update_balances(ledger_path: &Path, config_path: Option<&str>) -> Result<RunReport> {
    info!("Balance update starting...");

    let config = match config_path {
        Some(path) => AppConfig::load_from_path(path)?,
        None => AppConfig::load()?,
    };
    debug!("Loaded config: {config:#?}");

    let store = FjallSecretStore::open(&config.secret_store_path()?)?;
    let sources = build_sources(&config.institutions);

    Ok(orchestrator::update_balances(ledger_path, &sources, &store).await)
}

/// Builds the adapter list in the fixed run order. Institutions without a
/// config block are skipped.
pub fn build_sources(institutions: &InstitutionsConfig) -> Vec<Box<dyn BalanceSource>> {
    let mut sources: Vec<Box<dyn BalanceSource>> = Vec::new();

    if let Some(c) = &institutions.up {
        sources.push(Box::new(Up::new(&c.base_url)));
    }
    if let Some(c) = &institutions.bitcoin {
        sources.push(Box::new(Bitcoin::new(&c.base_url)));
    }
    if let Some(c) = &institutions.selfwealth {
        sources.push(Box::new(SelfWealth::new(
            &c.auth_base_url,
            &c.api_base_url,
            &c.client_id,
            &c.redirect_uri,
        )));
    }
    if let Some(c) = &institutions.statecustodians {
        sources.push(Box::new(StateCustodians::new(
            &c.base_url,
            &c.webdriver_url,
            &c.offset_portion,
        )));
    }
    if let Some(c) = &institutions.ubank {
        sources.push(Box::new(Ubank::new(&c.base_url)));
    }

    sources
}
