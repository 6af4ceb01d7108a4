use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf};
use tracing::debug;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct UpConfig {
    pub base_url: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BitcoinConfig {
    pub base_url: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SelfWealthConfig {
    pub auth_base_url: String,
    pub api_base_url: String,
    pub client_id: String,
    pub redirect_uri: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StateCustodiansConfig {
    pub base_url: String,
    /// WebDriver endpoint used to drive the browser session.
    pub webdriver_url: String,
    /// Identifier of the offset portion. Offset portions are assets, every
    /// other portion is a liability.
    #[serde(default = "default_offset_portion")]
    pub offset_portion: String,
}

fn default_offset_portion() -> String {
    "O".to_string()
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct UbankConfig {
    pub base_url: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct InstitutionsConfig {
    pub up: Option<UpConfig>,
    pub bitcoin: Option<BitcoinConfig>,
    pub selfwealth: Option<SelfWealthConfig>,
    pub statecustodians: Option<StateCustodiansConfig>,
    pub ubank: Option<UbankConfig>,
}

impl Default for InstitutionsConfig {
    fn default() -> Self {
        InstitutionsConfig {
            up: Some(UpConfig {
                base_url: "https://api.up.com.au".to_string(),
            }),
            bitcoin: Some(BitcoinConfig {
                base_url: "https://www.blockonomics.co".to_string(),
            }),
            selfwealth: Some(SelfWealthConfig {
                auth_base_url: "https://auth.selfwealth.com.au".to_string(),
                api_base_url: "https://secure.selfwealth.com.au".to_string(),
                client_id: "selfwealth-trading".to_string(),
                redirect_uri: "https://secure.selfwealth.com.au/callback".to_string(),
            }),
            statecustodians: Some(StateCustodiansConfig {
                base_url: "https://loanenquiry.com.au".to_string(),
                webdriver_url: "http://localhost:4444".to_string(),
                offset_portion: default_offset_portion(),
            }),
            ubank: Some(UbankConfig {
                base_url: "https://www.ubank.com.au".to_string(),
            }),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub institutions: InstitutionsConfig,
    /// Directory holding the durable secret store. Defaults to the
    /// platform data directory.
    #[serde(default)]
    pub secrets_path: Option<PathBuf>,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        debug!("Loading default config");
        let config_path = Self::default_config_path()?;
        Self::load_from_path(&config_path)
    }

    pub fn default_config_path() -> Result<PathBuf> {
        let proj_dirs = Self::project_dirs()?;
        Ok(proj_dirs.config_dir().join("config.yaml"))
    }

    pub fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let config_str = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Self = serde_yaml::from_str(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;
        debug!("Successfully loaded config");
        Ok(config)
    }

    /// Resolves the secret store directory, creating nothing on disk.
    pub fn secret_store_path(&self) -> Result<PathBuf> {
        match &self.secrets_path {
            Some(path) => Ok(path.clone()),
            None => {
                let proj_dirs = Self::project_dirs()?;
                Ok(proj_dirs.data_dir().join("secrets"))
            }
        }
    }

    fn project_dirs() -> Result<ProjectDirs> {
        ProjectDirs::from("au", "ledgerbal", "ledgerbal")
            .context("Could not determine project directories")
    }
}
