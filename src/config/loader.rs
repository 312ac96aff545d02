use std::{collections::HashMap, fs, path::Path, time::Duration};

use serde::Deserialize;

use crate::error::{Context, Result};

use super::{
    validator, BatchConfig, CryptoAsset, CryptoProviderConfig, FetcherConfig, QuoteProviderConfig,
    RateLimitConfig, TransportConfig,
};

/// Load a fetcher configuration from JSON, filling omitted sections from the builtin defaults.
pub fn load_config(path: &Path) -> Result<FetcherConfig> {
    let json = fs::read_to_string(path)
        .with_context(|| format!("failed to read fetcher config JSON at {}", path.display()))?;

    let config = parse_config(&json)
        .with_context(|| format!("failed to parse fetcher config JSON at {}", path.display()))?;

    validator::validate_config(&config)?;

    Ok(config)
}

pub(crate) fn parse_config(json: &str) -> Result<FetcherConfig> {
    let raw: RawFetcherConfig = serde_json::from_str(json)?;
    Ok(raw.into_config())
}

#[derive(Debug, Deserialize, Default)]
struct RawFetcherConfig {
    #[serde(default)]
    quote: RawQuoteProvider,
    #[serde(default)]
    crypto: RawCryptoProvider,
    #[serde(default)]
    batch: RawBatchConfig,
    #[serde(default)]
    rate_limit: RawRateLimitConfig,
    #[serde(default)]
    transport: RawTransportConfig,
}

impl RawFetcherConfig {
    fn into_config(self) -> FetcherConfig {
        let builtin = FetcherConfig::builtin();
        FetcherConfig {
            quote: self.quote.into_quote_provider(builtin.quote),
            crypto: self.crypto.into_crypto_provider(builtin.crypto),
            batch: self.batch.into_batch(builtin.batch),
            rate_limit: self.rate_limit.into_rate_limit(builtin.rate_limit),
            transport: self.transport.into_transport(builtin.transport),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct RawQuoteProvider {
    url_template: Option<String>,
    #[serde(default)]
    headers: Option<HashMap<String, String>>,
}

impl RawQuoteProvider {
    fn into_quote_provider(self, fallback: QuoteProviderConfig) -> QuoteProviderConfig {
        QuoteProviderConfig {
            url_template: self.url_template.unwrap_or(fallback.url_template),
            headers: self.headers.unwrap_or(fallback.headers),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct RawCryptoProvider {
    url_template: Option<String>,
    headers: Option<HashMap<String, String>>,
    assets: Option<Vec<RawCryptoAsset>>,
}

#[derive(Debug, Deserialize)]
struct RawCryptoAsset {
    id: String,
    symbol: String,
    #[serde(default)]
    name: Option<String>,
}

impl RawCryptoProvider {
    fn into_crypto_provider(self, fallback: CryptoProviderConfig) -> CryptoProviderConfig {
        let assets = match self.assets {
            Some(assets) => assets
                .into_iter()
                .map(|asset| {
                    let name = asset.name.unwrap_or_else(|| asset.symbol.clone());
                    CryptoAsset {
                        id: asset.id.trim().to_string(),
                        symbol: asset.symbol.trim().to_string(),
                        name,
                    }
                })
                .collect(),
            None => fallback.assets,
        };

        CryptoProviderConfig {
            url_template: self.url_template.unwrap_or(fallback.url_template),
            headers: self.headers.unwrap_or(fallback.headers),
            assets,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct RawBatchConfig {
    size: Option<usize>,
    delay_ms: Option<u64>,
    jitter_ms: Option<u64>,
}

impl RawBatchConfig {
    fn into_batch(self, fallback: BatchConfig) -> BatchConfig {
        BatchConfig {
            batch_size: self.size.unwrap_or(fallback.batch_size),
            delay: self
                .delay_ms
                .map(Duration::from_millis)
                .unwrap_or(fallback.delay),
            jitter: self
                .jitter_ms
                .map(Duration::from_millis)
                .unwrap_or(fallback.jitter),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct RawRateLimitConfig {
    cooldown_secs: Option<u64>,
}

impl RawRateLimitConfig {
    fn into_rate_limit(self, fallback: RateLimitConfig) -> RateLimitConfig {
        RateLimitConfig {
            cooldown: self
                .cooldown_secs
                .map(Duration::from_secs)
                .unwrap_or(fallback.cooldown),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct RawTransportConfig {
    /// `0` disables the client-side timeout.
    timeout_secs: Option<u64>,
    proxy_prefix: Option<String>,
    user_agent: Option<String>,
}

impl RawTransportConfig {
    fn into_transport(self, fallback: TransportConfig) -> TransportConfig {
        let timeout = match self.timeout_secs {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => fallback.timeout,
        };

        let proxy_prefix = self
            .proxy_prefix
            .map(|prefix| prefix.trim().to_string())
            .filter(|prefix| !prefix.is_empty())
            .or(fallback.proxy_prefix);

        TransportConfig {
            timeout,
            proxy_prefix,
            user_agent: self.user_agent.unwrap_or(fallback.user_agent),
        }
    }
}
