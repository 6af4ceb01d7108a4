use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use rust_decimal::Decimal;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

/// Classification of an account as owned value or owed value. Asset balances
/// are non-negative, liability balances are non-positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pot {
    Assets,
    Liabilities,
}

impl Pot {
    pub fn prefix(&self) -> &'static str {
        match self {
            Pot::Assets => "Assets",
            Pot::Liabilities => "Liabilities",
        }
    }

    /// Applies this pot's sign convention to a magnitude.
    pub fn signed(&self, amount: Decimal) -> Decimal {
        match self {
            Pot::Assets => amount.abs(),
            Pot::Liabilities => -amount.abs(),
        }
    }
}

/// One account's snapshot balance, rendered as a beancount balance directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceRecord {
    /// Calendar date the balance was observed, in the institution's timezone.
    pub date: NaiveDate,
    /// Retrieval instant, when the source exposes meaningful timing.
    pub time: Option<DateTime<FixedOffset>>,
    /// Fully qualified account path, e.g. `Assets:Up:Spending`.
    pub account: String,
    pub amount: Decimal,
    /// ISO currency code, crypto ticker or holding symbol.
    pub commodity: String,
}

impl BalanceRecord {
    /// Pot derived from the account path prefix, if recognizable.
    pub fn pot(&self) -> Option<Pot> {
        match self.account.split(':').next() {
            Some("Assets") => Some(Pot::Assets),
            Some("Liabilities") => Some(Pot::Liabilities),
            _ => None,
        }
    }

    /// Renders the record as a beancount directive, optionally followed by
    /// an indented `time:` metadata line.
    pub fn render(&self) -> String {
        let mut directive = format!(
            "{} balance {:<50} {} {}\n",
            self.date.format("%Y-%m-%d"),
            self.account,
            self.amount,
            self.commodity
        );
        if let Some(time) = &self.time {
            directive.push_str(&format!("  time: \"{}\"\n", time.to_rfc3339()));
        }
        directive
    }
}

/// Builds a `{pot}:{institution}:{sub_account}` account path.
pub fn account_path(pot: Pot, institution: &str, sub_account: &str) -> String {
    format!("{}:{}:{}", pot.prefix(), institution, sub_account)
}

/// Appends rendered directives to the ledger file and syncs it to disk. The
/// ledger is append-only; it is never read or rewritten here.
pub fn append_records(path: &Path, records: &[BalanceRecord]) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open ledger file: {}", path.display()))?;

    for record in records {
        file.write_all(record.render().as_bytes())
            .with_context(|| format!("Failed to append to ledger file: {}", path.display()))?;
    }

    // Sync before the next institution runs, so a crash mid-run leaves
    // everything written so far durable.
    file.sync_all()
        .with_context(|| format!("Failed to sync ledger file: {}", path.display()))?;
    Ok(())
}

/// Current instant in Queensland time (UTC+10, no daylight saving), the
/// timezone the institutions report their dates in.
pub fn queensland_now() -> DateTime<FixedOffset> {
    let offset = FixedOffset::east_opt(10 * 3600).expect("static offset is valid");
    Utc::now().with_timezone(&offset)
}
