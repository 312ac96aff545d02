use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::{AppError, Context};

use super::FetchResult;

#[derive(Debug, Deserialize)]
struct ChartEnvelope {
    chart: Option<ChartBody>,
}

#[derive(Debug, Deserialize)]
struct ChartBody {
    #[serde(default)]
    result: Option<Vec<ChartResult>>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    #[serde(default)]
    meta: Option<ChartMeta>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartMeta {
    regular_market_price: Option<f64>,
    chart_previous_close: Option<f64>,
    previous_close: Option<f64>,
}

/// Latest price plus the close it is compared against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChartReading {
    pub price: f64,
    pub reference: f64,
}

impl ChartReading {
    pub fn change_percent(&self) -> f64 {
        if self.reference.abs() > f64::EPSILON {
            (self.price - self.reference) / self.reference * 100.0
        } else {
            0.0
        }
    }
}

/// Extract the current price from a chart response.
///
/// `Ok(None)` means the provider answered but had no quote for the symbol (no `meta` block or no
/// price in it). The reference close prefers `chartPreviousClose`, then `previousClose`, then the
/// price itself.
pub fn parse_chart_quote(body: &str) -> FetchResult<Option<ChartReading>> {
    let envelope: ChartEnvelope =
        serde_json::from_str(body).context("Failed to parse chart JSON response")?;

    let meta = envelope
        .chart
        .and_then(|chart| chart.result)
        .and_then(|results| results.into_iter().next())
        .and_then(|result| result.meta);

    let Some(meta) = meta else {
        return Ok(None);
    };
    let Some(price) = meta.regular_market_price else {
        return Ok(None);
    };

    let reference = meta
        .chart_previous_close
        .or(meta.previous_close)
        .unwrap_or(price);

    Ok(Some(ChartReading { price, reference }))
}

/// Price and 24h change for one provider id. Missing fields read as zero.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CryptoPrice {
    pub usd: f64,
    pub usd_24h_change: f64,
}

/// Parsed `simple/price` payload keyed by provider id.
#[derive(Debug)]
pub struct CryptoPriceTable {
    entries: Map<String, Value>,
}

impl CryptoPriceTable {
    pub fn get(&self, id: &str) -> CryptoPrice {
        let Some(entry) = self.entries.get(id) else {
            return CryptoPrice::default();
        };

        let field = |key: &str| entry.get(key).and_then(Value::as_f64).unwrap_or(0.0);
        CryptoPrice {
            usd: field("usd"),
            usd_24h_change: field("usd_24h_change"),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub fn parse_crypto_prices(body: &str) -> FetchResult<CryptoPriceTable> {
    let value: Value =
        serde_json::from_str(body).context("Failed to parse crypto price JSON response")?;

    match value {
        Value::Object(entries) => Ok(CryptoPriceTable { entries }),
        other => Err(AppError::message(format!(
            "Unexpected crypto price payload: expected an object, got {}",
            json_kind(&other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
