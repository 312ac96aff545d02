use std::collections::HashMap;
use std::time::Duration;

pub mod loader;
pub mod targets;
pub mod validator;

pub use loader::load_config;
pub use targets::load_targets;
pub use validator::validate_config;

use crate::fetch::{DEFAULT_BATCH_DELAY_MS, DEFAULT_BATCH_SIZE, DEFAULT_JITTER_MS};

pub const DEFAULT_QUOTE_URL_TEMPLATE: &str =
    "https://query1.finance.yahoo.com/v8/finance/chart/{symbol}?interval=1d&range=1d";
pub const DEFAULT_CRYPTO_URL_TEMPLATE: &str =
    "https://api.coingecko.com/api/v3/simple/price?ids={ids}&vs_currencies=usd&include_24hr_change=true";
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// Cooldown applied after the quote provider answers with 429.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone)]
pub struct QuoteProviderConfig {
    /// URL with a `{symbol}` placeholder.
    pub url_template: String,
    pub headers: HashMap<String, String>,
}

/// A provider id paired with how it is shown to users.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CryptoAsset {
    pub id: String,
    pub symbol: String,
    pub name: String,
}

impl CryptoAsset {
    pub fn new(id: &str, symbol: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            symbol: symbol.to_string(),
            name: name.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CryptoProviderConfig {
    /// URL with an `{ids}` placeholder receiving the comma-joined asset ids.
    pub url_template: String,
    pub headers: HashMap<String, String>,
    /// Ordered; results come back in this order.
    pub assets: Vec<CryptoAsset>,
}

#[derive(Debug, Clone, Copy)]
pub struct BatchConfig {
    pub batch_size: usize,
    pub delay: Duration,
    pub jitter: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            delay: Duration::from_millis(DEFAULT_BATCH_DELAY_MS),
            jitter: Duration::from_millis(DEFAULT_JITTER_MS),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub cooldown: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            cooldown: DEFAULT_COOLDOWN,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub timeout: Option<Duration>,
    /// When set, every outbound URL is rewritten to `<prefix><url-encoded target>`.
    pub proxy_prefix: Option<String>,
    pub user_agent: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: Some(Duration::from_secs(15)),
            proxy_prefix: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetcherConfig {
    pub quote: QuoteProviderConfig,
    pub crypto: CryptoProviderConfig,
    pub batch: BatchConfig,
    pub rate_limit: RateLimitConfig,
    pub transport: TransportConfig,
}

impl FetcherConfig {
    pub fn builtin() -> Self {
        let quote_headers = HashMap::from([(
            "Accept".to_string(),
            "application/json".to_string(),
        )]);

        Self {
            quote: QuoteProviderConfig {
                url_template: DEFAULT_QUOTE_URL_TEMPLATE.to_string(),
                headers: quote_headers.clone(),
            },
            crypto: CryptoProviderConfig {
                url_template: DEFAULT_CRYPTO_URL_TEMPLATE.to_string(),
                headers: quote_headers,
                assets: default_crypto_assets(),
            },
            batch: BatchConfig::default(),
            rate_limit: RateLimitConfig::default(),
            transport: TransportConfig::default(),
        }
    }
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self::builtin()
    }
}

pub fn default_crypto_assets() -> Vec<CryptoAsset> {
    vec![
        CryptoAsset::new("bitcoin", "BTC", "Bitcoin"),
        CryptoAsset::new("ethereum", "ETH", "Ethereum"),
        CryptoAsset::new("solana", "SOL", "Solana"),
        CryptoAsset::new("ripple", "XRP", "XRP"),
        CryptoAsset::new("dogecoin", "DOGE", "Dogecoin"),
        CryptoAsset::new("cardano", "ADA", "Cardano"),
    ]
}
