//! Shared shaping rules applied to institution data before it becomes a
//! ledger directive.

/// Maps the cash pseudo-codes some institutions report to real currency
/// codes. Every other code passes through unchanged.
pub fn normalize_cash_code(code: &str) -> &str {
    match code {
        "CASH" => "AUD",
        "US CASH" => "USD",
        other => other,
    }
}

/// Turns a free-form account display name into a ledger-safe path segment:
/// whitespace removed, each word title-cased.
pub fn sanitize_account_name(name: &str) -> String {
    name.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => {
                    first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
                }
                None => String::new(),
            }
        })
        .collect()
}
