use std::path::Path;

use serde::Deserialize;

use crate::error::{AppError, Context, Result};
use crate::fetch::QuoteTarget;

#[derive(Debug, Deserialize)]
struct RawTarget {
    symbol: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    display: Option<String>,
}

/// Read a `symbol,name,display` target list. Lines starting with `#` are skipped and missing
/// name/display columns fall back to the symbol.
pub fn load_targets(path: &Path) -> Result<Vec<QuoteTarget>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .comment(Some(b'#'))
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("failed to open target list CSV at {}", path.display()))?;

    let mut targets = Vec::new();
    for (line, record) in reader.deserialize::<RawTarget>().enumerate() {
        let raw = record?;
        if raw.symbol.is_empty() {
            return Err(AppError::message(format!(
                "target list {} has an empty symbol on data row {}",
                path.display(),
                line + 1
            )));
        }
        targets.push(raw.into_target());
    }

    Ok(targets)
}

impl RawTarget {
    fn into_target(self) -> QuoteTarget {
        let name = non_empty(self.name).unwrap_or_else(|| self.symbol.clone());
        let display = non_empty(self.display).unwrap_or_else(|| self.symbol.clone());
        QuoteTarget::new(self.symbol, name, display)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}
