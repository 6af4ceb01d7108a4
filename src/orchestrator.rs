use crate::institutions::BalanceSource;
use crate::ledger::{self, BalanceRecord};
use crate::secrets::SecretStore;
use std::path::Path;
use tracing::{error, info};

/// Terminal state of one institution within a run.
#[derive(Debug)]
pub enum Outcome {
    Succeeded { records: usize },
    Failed { error: String },
}

/// Per-institution outcomes for one run. The run as a whole has no single
/// verdict; it is complete once every institution is terminal.
#[derive(Debug, Default)]
pub struct RunReport {
    pub outcomes: Vec<(String, Outcome)>,
}

impl RunReport {
    pub fn outcome(&self, institution: &str) -> Option<&Outcome> {
        self.outcomes
            .iter()
            .find(|(name, _)| name == institution)
            .map(|(_, outcome)| outcome)
    }

    pub fn succeeded(&self, institution: &str) -> bool {
        matches!(self.outcome(institution), Some(Outcome::Succeeded { .. }))
    }
}

/// Processes each institution in order: fetch balances, append them to the
/// ledger, move on. A failure is logged with its full cause chain and never
/// stops the remaining institutions. Records are appended and synced per
/// institution, so a crash mid-run loses nothing already retrieved.
pub async fn update_balances(
    ledger_path: &Path,
    sources: &[Box<dyn BalanceSource>],
    secrets: &dyn SecretStore,
) -> RunReport {
    let mut report = RunReport::default();

    for source in sources {
        let name = source.name();
        info!(institution = name, "Retrieving balances");

        let outcome = match source.fetch_balances(secrets).await {
            Ok(records) => match append(ledger_path, name, &records) {
                Ok(count) => Outcome::Succeeded { records: count },
                Err(e) => failed(name, e),
            },
            Err(e) => failed(name, e),
        };
        report.outcomes.push((name.to_string(), outcome));
    }

    report
}

fn append(ledger_path: &Path, name: &str, records: &[BalanceRecord]) -> anyhow::Result<usize> {
    ledger::append_records(ledger_path, records)?;
    info!(
        institution = name,
        count = records.len(),
        ledger = %ledger_path.display(),
        "Wrote balances to ledger"
    );
    Ok(records.len())
}

fn failed(name: &str, e: anyhow::Error) -> Outcome {
    error!(institution = name, error = ?e, "Failed to get balances");
    Outcome::Failed {
        error: format!("{e:#}"),
    }
}
