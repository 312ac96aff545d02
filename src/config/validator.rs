use std::collections::{HashMap, HashSet};

use crate::error::{AppError, Result};

use super::{CryptoProviderConfig, FetcherConfig, QuoteProviderConfig};

/// Validate a fetcher configuration and surface every problem at once.
pub fn validate_config(config: &FetcherConfig) -> Result<()> {
    let mut issues = Vec::new();

    validate_quote_provider(&config.quote, &mut issues);
    validate_crypto_provider(&config.crypto, &mut issues);

    if config.rate_limit.cooldown.is_zero() {
        issues.push("rate_limit.cooldown_secs must be greater than zero".to_string());
    }

    if let Some(prefix) = &config.transport.proxy_prefix {
        if !prefix.starts_with("http://") && !prefix.starts_with("https://") {
            issues.push(format!(
                "transport.proxy_prefix `{prefix}` must be an http(s) URL"
            ));
        }
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(AppError::message(format!(
            "fetcher config invalid:\n  - {}",
            issues.join("\n  - ")
        )))
    }
}

fn validate_quote_provider(quote: &QuoteProviderConfig, issues: &mut Vec<String>) {
    validate_template("quote.url_template", &quote.url_template, "{symbol}", issues);
    validate_headers("quote.headers", &quote.headers, issues);
}

fn validate_crypto_provider(crypto: &CryptoProviderConfig, issues: &mut Vec<String>) {
    validate_template("crypto.url_template", &crypto.url_template, "{ids}", issues);
    validate_headers("crypto.headers", &crypto.headers, issues);

    let mut seen = HashSet::new();
    for asset in &crypto.assets {
        if asset.id.is_empty() {
            issues.push("crypto.assets contains an entry with an empty id".to_string());
            continue;
        }
        if asset.symbol.is_empty() {
            issues.push(format!("crypto asset `{}` has an empty symbol", asset.id));
        }
        if !seen.insert(asset.id.as_str()) {
            issues.push(format!("crypto asset `{}` is listed more than once", asset.id));
        }
    }
}

fn validate_template(field: &str, template: &str, placeholder: &str, issues: &mut Vec<String>) {
    if template.trim().is_empty() {
        issues.push(format!("{field} must not be empty"));
    } else if !template.contains(placeholder) {
        issues.push(format!("{field} must contain the `{placeholder}` placeholder"));
    }
}

fn validate_headers(field: &str, headers: &HashMap<String, String>, issues: &mut Vec<String>) {
    for key in headers.keys() {
        if key.trim().is_empty() {
            issues.push(format!("{field} contains an empty header name"));
        }
    }
}
