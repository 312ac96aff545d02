use log::{debug, error};
use serde::Serialize;

use crate::error::AppError;

use super::decode::parse_crypto_prices;
use super::quotes::QuoteFetcher;
use super::request::prepare_request;
use super::FetchResult;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CryptoQuote {
    pub name: String,
    pub symbol: String,
    /// USD price, 0 when the provider returned nothing for the asset.
    pub price: f64,
    /// 24h percent change, 0 when missing.
    pub change: f64,
}

impl QuoteFetcher {
    /// Fetch every configured crypto asset in one request, in configuration order.
    ///
    /// Any failure is logged and yields an empty list; partial results are never returned.
    pub async fn fetch_crypto(&self) -> Vec<CryptoQuote> {
        match self.request_crypto().await {
            Ok(quotes) => quotes,
            Err(err) => {
                error!("Failed to fetch crypto prices: {:#}", err);
                Vec::new()
            }
        }
    }

    async fn request_crypto(&self) -> FetchResult<Vec<CryptoQuote>> {
        let assets = &self.config.crypto.assets;
        if assets.is_empty() {
            debug!("No crypto assets configured, skipping request");
            return Ok(Vec::new());
        }

        let ids = assets
            .iter()
            .map(|asset| asset.id.as_str())
            .collect::<Vec<_>>()
            .join(",");
        let request = prepare_request(
            &self.config.crypto.url_template,
            &[("ids", ids.as_str())],
            &self.config.crypto.headers,
        )?;

        let response = self.transport.get(&request).await?;
        if !response.status.is_success() {
            return Err(AppError::status(response.status, request.url));
        }

        let table = parse_crypto_prices(&response.body)?;
        debug!(
            "Crypto provider returned {} of {} requested assets",
            table.len(),
            assets.len()
        );

        Ok(assets
            .iter()
            .map(|asset| {
                let price = table.get(&asset.id);
                CryptoQuote {
                    name: asset.name.clone(),
                    symbol: asset.symbol.clone(),
                    price: price.usd,
                    change: price.usd_24h_change,
                }
            })
            .collect())
    }
}
