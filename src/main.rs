use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use ledgerbal::log::init_logging;
use ledgerbal::orchestrator::Outcome;
use std::path::PathBuf;

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to optional configuration file
    #[arg(short, long, global = true)]
    config_path: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create default configuration
    Setup,
    /// Retrieve balances and append them to the ledger file
    Update {
        /// Ledger file to append balance directives to
        #[arg(default_value = "balances.beancount")]
        ledger: PathBuf,
    },
    /// Store a secret value, read from the terminal without echo
    Secret {
        /// Secret name, e.g. up/api_token
        name: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let result = match cli.command {
        Some(Commands::Setup) => setup(),
        Some(Commands::Update { ledger }) => {
            update(&ledger, cli.config_path.as_deref()).await
        }
        Some(Commands::Secret { name }) => {
            store_secret(&name, cli.config_path.as_deref()).await
        }
        None => {
            Cli::command().print_help()?;
            Ok(())
        }
    };

    if let Err(e) = &result {
        tracing::error!(error = %e, "Application failed");
    }
    result
}

async fn update(ledger: &std::path::Path, config_path: Option<&str>) -> Result<()> {
    let report = ledgerbal::update_balances(ledger, config_path).await?;

    for (institution, outcome) in &report.outcomes {
        match outcome {
            Outcome::Succeeded { records } => {
                tracing::info!(institution = %institution, records = *records, "Institution succeeded")
            }
            Outcome::Failed { error } => {
                tracing::warn!(institution = %institution, error = %error, "Institution failed")
            }
        }
    }
    Ok(())
}

async fn store_secret(name: &str, config_path: Option<&str>) -> Result<()> {
    use ledgerbal::secrets::{fjallkv::FjallSecretStore, Secret, SecretStore};

    let config = match config_path {
        Some(path) => ledgerbal::config::AppConfig::load_from_path(path)?,
        None => ledgerbal::config::AppConfig::load()?,
    };
    let store = FjallSecretStore::open(&config.secret_store_path()?)?;

    let value = rpassword::prompt_password(format!("Value for {name}: "))?;
    store.put(name, Secret::new(value)).await?;
    tracing::info!(name, "Stored secret");
    Ok(())
}

fn setup() -> Result<()> {
    use anyhow::Context;

    let path = ledgerbal::config::AppConfig::default_config_path()?;

    if path.exists() {
        anyhow::bail!("Configuration file already exists at {}", path.display());
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    let default_config = r#"---
institutions:
  up:
    base_url: "https://api.up.com.au"
  bitcoin:
    base_url: "https://www.blockonomics.co"
  selfwealth:
    auth_base_url: "https://auth.selfwealth.com.au"
    api_base_url: "https://secure.selfwealth.com.au"
    client_id: "selfwealth-trading"
    redirect_uri: "https://secure.selfwealth.com.au/callback"
  statecustodians:
    base_url: "https://loanenquiry.com.au"
    webdriver_url: "http://localhost:4444"
    offset_portion: "O"
  ubank:
    base_url: "https://www.ubank.com.au"
"#;

    std::fs::write(&path, default_config)
        .with_context(|| format!("Failed to write config file to {}", path.display()))?;

    tracing::info!("Created default configuration at {}", path.display());
    Ok(())
}
