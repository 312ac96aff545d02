use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use log::{debug, info, warn};
use rand::Rng;
use reqwest::StatusCode;
use serde::Serialize;
use tokio::time::sleep;

use crate::config::{BatchConfig, FetcherConfig};
use crate::error::AppError;
use crate::fetch::{ensure_batch_size, FetchResult};

use super::cache::LastGoodCache;
use super::decode::parse_chart_quote;
use super::guard::RateLimitGuard;
use super::request::prepare_request;
use super::transport::{HttpTransport, Transport};

/// A symbol to quote, with the labels it is shown under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuoteTarget {
    pub symbol: String,
    pub name: String,
    pub display: String,
}

impl QuoteTarget {
    pub fn new(
        symbol: impl Into<String>,
        name: impl Into<String>,
        display: impl Into<String>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            name: name.into(),
            display: display.into(),
        }
    }

    /// Target labelled by its own symbol.
    pub fn bare(symbol: impl Into<String>) -> Self {
        let symbol = symbol.into();
        Self::new(symbol.clone(), symbol.clone(), symbol)
    }
}

/// Outcome of one stock quote request. `price` and `change` are either both set or both absent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Quote {
    pub symbol: String,
    pub name: String,
    pub display: String,
    pub price: Option<f64>,
    /// Percent change against the previous close.
    pub change: Option<f64>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub rate_limited: bool,
}

impl Quote {
    pub fn priced(target: &QuoteTarget, price: f64, change: f64) -> Self {
        Self {
            symbol: target.symbol.clone(),
            name: target.name.clone(),
            display: target.display.clone(),
            price: Some(price),
            change: Some(change),
            rate_limited: false,
        }
    }

    pub fn unavailable(target: &QuoteTarget) -> Self {
        Self {
            symbol: target.symbol.clone(),
            name: target.name.clone(),
            display: target.display.clone(),
            price: None,
            change: None,
            rate_limited: false,
        }
    }

    pub fn rate_limited(target: &QuoteTarget) -> Self {
        Self {
            rate_limited: true,
            ..Self::unavailable(target)
        }
    }

    pub fn has_price(&self) -> bool {
        self.price.is_some()
    }
}

type BatchCallback<'a> = Box<dyn FnMut(&[Quote]) + Send + 'a>;

/// Pacing for [`QuoteFetcher::fetch_quotes`].
pub struct BatchOptions<'a> {
    pub batch_size: usize,
    pub delay: Duration,
    /// Exclusive upper bound of the random extra pause between chunks.
    pub jitter: Duration,
    on_batch: Option<BatchCallback<'a>>,
}

impl<'a> BatchOptions<'a> {
    pub fn from_config(config: &BatchConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            delay: config.delay,
            jitter: config.jitter,
            on_batch: None,
        }
    }

    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Called after every chunk with all successful quotes gathered so far, and once with the
    /// cached quotes when a fetch is short-circuited by the rate limit.
    pub fn on_batch<F>(mut self, callback: F) -> Self
    where
        F: FnMut(&[Quote]) + Send + 'a,
    {
        self.on_batch = Some(Box::new(callback));
        self
    }

    fn notify(&mut self, quotes: &[Quote]) {
        if let Some(callback) = self.on_batch.as_mut() {
            callback(quotes);
        }
    }

    fn pause(&self) -> Duration {
        let jitter_ms = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        let extra = if jitter_ms == 0 {
            0
        } else {
            rand::rng().random_range(0..jitter_ms)
        };
        self.delay + Duration::from_millis(extra)
    }
}

impl Default for BatchOptions<'_> {
    fn default() -> Self {
        Self::from_config(&BatchConfig::default())
    }
}

impl fmt::Debug for BatchOptions<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchOptions")
            .field("batch_size", &self.batch_size)
            .field("delay", &self.delay)
            .field("jitter", &self.jitter)
            .field("on_batch", &self.on_batch.is_some())
            .finish()
    }
}

/// Fetches stock quotes (and, see `crypto.rs`, crypto prices) behind a shared rate-limit guard.
///
/// Clones share the guard and the last-good cache.
#[derive(Clone)]
pub struct QuoteFetcher {
    pub(crate) config: Arc<FetcherConfig>,
    pub(crate) transport: Arc<dyn Transport>,
    guard: Arc<RateLimitGuard>,
    cache: Arc<LastGoodCache>,
}

impl QuoteFetcher {
    pub fn new(config: FetcherConfig) -> FetchResult<Self> {
        let transport = HttpTransport::new(&config.transport)?;
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    pub fn with_transport(config: FetcherConfig, transport: Arc<dyn Transport>) -> Self {
        let guard = RateLimitGuard::new(config.rate_limit.cooldown);
        Self {
            config: Arc::new(config),
            transport,
            guard: Arc::new(guard),
            cache: Arc::new(LastGoodCache::new()),
        }
    }

    /// Swap in a different guard, e.g. one driven by a manual clock.
    pub fn with_guard(mut self, guard: RateLimitGuard) -> Self {
        self.guard = Arc::new(guard);
        self
    }

    pub fn config(&self) -> &FetcherConfig {
        &self.config
    }

    pub fn guard(&self) -> &RateLimitGuard {
        &self.guard
    }

    pub fn cached_quotes(&self) -> Option<Vec<Quote>> {
        self.cache.snapshot()
    }

    /// Batch options seeded from the configured pacing.
    pub fn batch_options(&self) -> BatchOptions<'static> {
        BatchOptions::from_config(&self.config.batch)
    }

    /// Fetch a single quote. Never fails: problems degrade to a quote without a price.
    pub async fn fetch_quote(&self, symbol: &str, name: &str, display: &str) -> Quote {
        self.fetch_target(&QuoteTarget::new(symbol, name, display)).await
    }

    pub async fn fetch_target(&self, target: &QuoteTarget) -> Quote {
        if self.guard.is_limited() {
            return Quote::unavailable(target);
        }

        match self.request_quote(target).await {
            Ok(quote) => quote,
            Err(err) if err.is_rate_limited() => {
                self.guard.trigger();
                Quote::rate_limited(target)
            }
            Err(err) => {
                warn!("Failed to fetch quote for {}: {:#}", target.symbol, err);
                Quote::unavailable(target)
            }
        }
    }

    async fn request_quote(&self, target: &QuoteTarget) -> FetchResult<Quote> {
        let symbol = urlencoding::encode(&target.symbol);
        let request = prepare_request(
            &self.config.quote.url_template,
            &[("symbol", &*symbol)],
            &self.config.quote.headers,
        )?;

        let response = self.transport.get(&request).await?;
        if response.status == StatusCode::TOO_MANY_REQUESTS || !response.status.is_success() {
            return Err(AppError::status(response.status, request.url));
        }

        match parse_chart_quote(&response.body)? {
            Some(reading) => Ok(Quote::priced(target, reading.price, reading.change_percent())),
            None => {
                debug!("No quote data available for {}", target.symbol);
                Ok(Quote::unavailable(target))
            }
        }
    }

    /// Fetch many quotes in sequential chunks, pausing between chunks.
    ///
    /// Only quotes with a price are returned. While the rate limit is active no request is made
    /// and the last good batch (if any) is returned instead.
    pub async fn fetch_quotes(
        &self,
        targets: &[QuoteTarget],
        mut options: BatchOptions<'_>,
    ) -> Vec<Quote> {
        if self.guard.is_limited() {
            return match self.cache.snapshot() {
                Some(cached) => {
                    info!(
                        "Rate limited, serving {} cached quotes instead of fetching",
                        cached.len()
                    );
                    options.notify(&cached);
                    cached
                }
                None => Vec::new(),
            };
        }

        let chunks: Vec<&[QuoteTarget]> = targets
            .chunks(ensure_batch_size(options.batch_size))
            .collect();
        let mut attempted: Vec<Quote> = Vec::with_capacity(targets.len());

        for (index, chunk) in chunks.iter().enumerate() {
            if self.guard.is_limited() {
                info!(
                    "Rate limited, skipping remaining {} chunk(s)",
                    chunks.len() - index
                );
                break;
            }

            debug!(
                "Fetching chunk {}/{} ({} symbols)",
                index + 1,
                chunks.len(),
                chunk.len()
            );
            let results = join_all(chunk.iter().map(|target| self.fetch_target(target))).await;
            let hit_rate_limit = results.iter().any(|quote| quote.rate_limited);

            attempted.extend(results);
            let successful = successful_quotes(&attempted);
            options.notify(&successful);

            if hit_rate_limit {
                warn!(
                    "Rate limited during chunk {}/{}, stopping early",
                    index + 1,
                    chunks.len()
                );
                break;
            }

            if index + 1 < chunks.len() {
                sleep(options.pause()).await;
            }
        }

        let successful = successful_quotes(&attempted);
        info!("Fetched {}/{} quotes", successful.len(), targets.len());
        self.cache.store(&successful);
        successful
    }
}

fn successful_quotes(quotes: &[Quote]) -> Vec<Quote> {
    quotes.iter().filter(|quote| quote.has_price()).cloned().collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::fetch::guard::ManualClock;
    use crate::fetch::transport::testing::StubTransport;

    pub(crate) const QUOTE_URL: &str = "https://quotes.test/chart/{symbol}";
    pub(crate) const CRYPTO_URL: &str = "https://crypto.test/price?ids={ids}";

    pub(crate) fn test_config() -> FetcherConfig {
        let mut config = FetcherConfig::builtin();
        config.quote.url_template = QUOTE_URL.to_string();
        config.quote.headers.clear();
        config.crypto.url_template = CRYPTO_URL.to_string();
        config.crypto.headers.clear();
        config
    }

    fn quote_url(symbol: &str) -> String {
        QUOTE_URL.replace("{symbol}", symbol)
    }

    fn chart(price: f64, previous: f64) -> String {
        format!(
            r#"{{"chart":{{"result":[{{"meta":{{"regularMarketPrice":{price},"chartPreviousClose":{previous}}}}}],"error":null}}}}"#
        )
    }

    fn priced_stub(symbols: &[&str]) -> StubTransport {
        symbols.iter().fold(StubTransport::new(), |stub, symbol| {
            stub.respond(&quote_url(symbol), StatusCode::OK, &chart(100.0, 80.0))
        })
    }

    fn fetcher(stub: StubTransport) -> (QuoteFetcher, Arc<StubTransport>) {
        let stub = Arc::new(stub);
        let fetcher = QuoteFetcher::with_transport(test_config(), stub.clone());
        (fetcher, stub)
    }

    fn targets(symbols: &[&str]) -> Vec<QuoteTarget> {
        symbols.iter().map(|symbol| QuoteTarget::bare(*symbol)).collect()
    }

    fn fast_options<'a>() -> BatchOptions<'a> {
        BatchOptions::default().jitter(Duration::ZERO)
    }

    #[tokio::test]
    async fn fetch_quote_computes_percent_change() {
        let (fetcher, stub) = fetcher(priced_stub(&["AAPL"]));

        let quote = fetcher.fetch_quote("AAPL", "Apple Inc.", "Apple").await;

        assert_eq!(quote.symbol, "AAPL");
        assert_eq!(quote.name, "Apple Inc.");
        assert_eq!(quote.display, "Apple");
        assert_eq!(quote.price, Some(100.0));
        assert!((quote.change.unwrap() - 25.0).abs() < 1e-9);
        assert!(!quote.rate_limited);
        assert_eq!(stub.calls(), vec![quote_url("AAPL")]);
    }

    #[tokio::test]
    async fn fetch_quote_degrades_every_failure_to_null() {
        let stub = StubTransport::new()
            .respond(&quote_url("BAD"), StatusCode::INTERNAL_SERVER_ERROR, "oops")
            .respond(&quote_url("HTML"), StatusCode::OK, "<html></html>")
            .respond(&quote_url("EMPTY"), StatusCode::OK, r#"{"chart":{"result":[]}}"#)
            .fail(&quote_url("DOWN"), "connection refused");
        let (fetcher, _stub) = fetcher(stub);

        for symbol in ["BAD", "HTML", "EMPTY", "DOWN", "MISSING"] {
            let quote = fetcher.fetch_quote(symbol, symbol, symbol).await;
            assert_eq!(quote.symbol, symbol);
            assert_eq!(quote.price, None, "{symbol}");
            assert_eq!(quote.change, None, "{symbol}");
            assert!(!quote.rate_limited, "{symbol}");
        }
        assert!(!fetcher.guard().is_limited());
    }

    #[tokio::test]
    async fn too_many_requests_trips_the_guard() {
        let stub = StubTransport::new()
            .respond(&quote_url("AAPL"), StatusCode::TOO_MANY_REQUESTS, "")
            .respond(&quote_url("MSFT"), StatusCode::OK, &chart(1.0, 1.0));
        let (fetcher, stub) = fetcher(stub);

        let quote = fetcher.fetch_quote("AAPL", "Apple", "AAPL").await;
        assert!(quote.rate_limited);
        assert_eq!(quote.price, None);
        assert!(fetcher.guard().is_limited());

        let quote = fetcher.fetch_quote("MSFT", "Microsoft", "MSFT").await;
        assert_eq!(quote.price, None);
        assert!(!quote.rate_limited);
        assert_eq!(stub.calls().len(), 1, "limited fetch must not hit the network");
    }

    #[tokio::test]
    async fn error_mentioning_429_trips_the_guard() {
        let stub = StubTransport::new().fail(&quote_url("AAPL"), "proxy error: upstream 429");
        let (fetcher, _stub) = fetcher(stub);

        let quote = fetcher.fetch_quote("AAPL", "Apple", "AAPL").await;

        assert!(quote.rate_limited);
        assert!(fetcher.guard().is_limited());
    }

    #[tokio::test]
    async fn guard_releases_after_cooldown() {
        let clock = Arc::new(ManualClock::new());
        let stub = StubTransport::new()
            .respond(&quote_url("AAPL"), StatusCode::TOO_MANY_REQUESTS, "");
        let (fetcher, _stub) = fetcher(stub);
        let fetcher = fetcher.with_guard(RateLimitGuard::with_clock(
            Duration::from_secs(300),
            clock.clone(),
        ));

        fetcher.fetch_quote("AAPL", "Apple", "AAPL").await;
        clock.set_elapsed(Duration::from_millis(299_999));
        assert!(fetcher.guard().is_limited());
        clock.set_elapsed(Duration::from_millis(300_000));
        assert!(!fetcher.guard().is_limited());
    }

    #[tokio::test(start_paused = true)]
    async fn five_symbols_in_batches_of_two_make_three_chunks() {
        let symbols = ["A", "B", "C", "D", "E"];
        let (fetcher, stub) = fetcher(priced_stub(&symbols));
        let mut progress = Vec::new();

        let started = tokio::time::Instant::now();
        let quotes = fetcher
            .fetch_quotes(
                &targets(&symbols),
                fast_options().on_batch(|so_far| progress.push(so_far.len())),
            )
            .await;
        let elapsed = started.elapsed();

        assert_eq!(progress, vec![2, 4, 5]);
        assert_eq!(quotes.len(), 5);
        assert_eq!(stub.calls().len(), 5);
        let first_chunk: HashSet<String> = stub.calls()[..2].iter().cloned().collect();
        assert_eq!(first_chunk, HashSet::from([quote_url("A"), quote_url("B")]));
        // Two pauses of the default 3s delay between three chunks.
        assert!(elapsed >= Duration::from_millis(6_000), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(7_000), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn jitter_stays_below_one_second_per_pause() {
        let symbols = ["A", "B", "C"];
        let (fetcher, _stub) = fetcher(priced_stub(&symbols));

        let started = tokio::time::Instant::now();
        fetcher
            .fetch_quotes(&targets(&symbols), BatchOptions::default().batch_size(1))
            .await;
        let elapsed = started.elapsed();

        assert!(elapsed >= Duration::from_millis(6_000), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(8_000), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_in_second_chunk_stops_the_batch() {
        let stub = priced_stub(&["A", "B", "D", "E"]).respond(
            &quote_url("C"),
            StatusCode::TOO_MANY_REQUESTS,
            "",
        );
        let (fetcher, stub) = fetcher(stub);
        let mut progress = Vec::new();

        let quotes = fetcher
            .fetch_quotes(
                &targets(&["A", "B", "D", "C", "E"]),
                fast_options().on_batch(|so_far| progress.push(so_far.len())),
            )
            .await;

        let symbols: Vec<&str> = quotes.iter().map(|q| q.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["A", "B", "D"]);
        assert_eq!(progress, vec![2, 3]);
        assert!(!stub.calls().contains(&quote_url("E")));
        assert!(fetcher.guard().is_limited());
    }

    #[tokio::test(start_paused = true)]
    async fn limited_batch_serves_cache_without_network() {
        let symbols = ["A", "B", "C"];
        let (fetcher, stub) = fetcher(priced_stub(&symbols));

        let first = fetcher.fetch_quotes(&targets(&symbols), fast_options()).await;
        assert_eq!(first.len(), 3);
        let calls_before = stub.calls().len();

        fetcher.guard().trigger();
        let mut callbacks = Vec::new();
        let second = fetcher
            .fetch_quotes(
                &targets(&["X", "Y"]),
                fast_options().on_batch(|cached| callbacks.push(cached.to_vec())),
            )
            .await;

        assert_eq!(second, first);
        assert_eq!(callbacks, vec![first.clone()]);
        assert_eq!(stub.calls().len(), calls_before);
    }

    #[tokio::test]
    async fn limited_batch_without_cache_returns_nothing() {
        let (fetcher, stub) = fetcher(priced_stub(&["A"]));
        fetcher.guard().trigger();
        let mut called = false;

        let quotes = fetcher
            .fetch_quotes(&targets(&["A"]), fast_options().on_batch(|_| called = true))
            .await;

        assert!(quotes.is_empty());
        assert!(!called);
        assert!(stub.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_batch_keeps_previous_cache() {
        let (fetcher, _stub) = fetcher(priced_stub(&["A", "B"]));

        let good = fetcher.fetch_quotes(&targets(&["A", "B"]), fast_options()).await;
        assert_eq!(good.len(), 2);

        let failed = fetcher
            .fetch_quotes(&targets(&["NOPE1", "NOPE2", "NOPE3"]), fast_options())
            .await;
        assert!(failed.is_empty());

        assert_eq!(fetcher.cached_quotes(), Some(good));
    }

    #[tokio::test(start_paused = true)]
    async fn successful_batch_overwrites_cache() {
        let (fetcher, _stub) = fetcher(priced_stub(&["A", "B", "C"]));

        fetcher.fetch_quotes(&targets(&["A", "B"]), fast_options()).await;
        let latest = fetcher
            .fetch_quotes(&targets(&["C", "MISSING"]), fast_options())
            .await;

        assert_eq!(latest.len(), 1);
        assert_eq!(fetcher.cached_quotes(), Some(latest));
    }

    #[tokio::test]
    async fn zero_batch_size_is_treated_as_one() {
        let (fetcher, _stub) = fetcher(priced_stub(&["A"]));
        let mut chunks = 0;

        let quotes = fetcher
            .fetch_quotes(
                &targets(&["A"]),
                fast_options().batch_size(0).on_batch(|_| chunks += 1),
            )
            .await;

        assert_eq!(quotes.len(), 1);
        assert_eq!(chunks, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn symbols_in_a_chunk_are_requested_concurrently() {
        let symbols = ["A", "B"];
        let stub = priced_stub(&symbols).with_latency(Duration::from_secs(1));
        let (fetcher, stub) = fetcher(stub);

        let started = tokio::time::Instant::now();
        let quotes = fetcher.fetch_quotes(&targets(&symbols), fast_options()).await;
        let elapsed = started.elapsed();

        assert_eq!(quotes.len(), 2);
        assert_eq!(stub.max_in_flight(), 2);
        assert!(elapsed < Duration::from_millis(1_500), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn chunks_never_overlap() {
        let symbols = ["A", "B", "C", "D", "E"];
        let stub = priced_stub(&symbols).with_latency(Duration::from_secs(1));
        let (fetcher, stub) = fetcher(stub);

        let started = tokio::time::Instant::now();
        fetcher.fetch_quotes(&targets(&symbols), fast_options()).await;
        let elapsed = started.elapsed();

        assert_eq!(stub.max_in_flight(), 2);
        // Three chunks of 1s each plus two 3s pauses.
        assert!(elapsed >= Duration::from_secs(9), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(9_500), "{elapsed:?}");
    }

    #[test]
    fn huge_jitter_does_not_overflow_the_pause() {
        let options = BatchOptions::default().jitter(Duration::MAX);
        assert!(options.pause() >= options.delay);
    }

    #[tokio::test]
    async fn connection_failure_for_symbol_containing_429_does_not_trip_the_guard() {
        let mut config = test_config();
        config.quote.url_template = "http://127.0.0.1:1/chart/{symbol}".to_string();
        config.transport.timeout = Some(Duration::from_secs(5));
        let fetcher = QuoteFetcher::new(config).expect("build fetcher");

        let quote = fetcher.fetch_quote("6429.T", "Eye Eye", "6429").await;

        assert_eq!(quote.price, None);
        assert!(!quote.rate_limited);
        assert!(!fetcher.guard().is_limited());
    }

    #[tokio::test]
    async fn configured_headers_expand_environment_variables() {
        std::env::set_var("QUOTE_FETCHER_CHART_KEY", "chart-secret");
        let config = crate::config::loader::parse_config(&format!(
            r#"{{"quote": {{"url_template": "{QUOTE_URL}", "headers": {{"X-Api-Key": "${{QUOTE_FETCHER_CHART_KEY}}"}}}}}}"#
        ))
        .expect("parse config");
        let stub = Arc::new(priced_stub(&["AAPL"]));
        let fetcher = QuoteFetcher::with_transport(config, stub.clone());

        let quote = fetcher.fetch_quote("AAPL", "Apple", "AAPL").await;

        assert_eq!(quote.price, Some(100.0));
        assert_eq!(stub.headers()[0]["x-api-key"], "chart-secret");
    }

    #[tokio::test]
    async fn unset_header_variable_degrades_without_a_request() {
        let mut config = test_config();
        config.quote.headers.insert(
            "Authorization".to_string(),
            "Bearer ${QUOTE_FETCHER_UNSET_CHART_TOKEN}".to_string(),
        );
        let stub = Arc::new(priced_stub(&["AAPL"]));
        let fetcher = QuoteFetcher::with_transport(config, stub.clone());

        let quote = fetcher.fetch_quote("AAPL", "Apple", "AAPL").await;

        assert_eq!(quote.price, None);
        assert!(!quote.rate_limited);
        assert!(stub.calls().is_empty());
    }

    #[test]
    fn rate_limited_flag_is_only_serialized_when_set() {
        let target = QuoteTarget::bare("AAPL");
        let plain = serde_json::to_value(Quote::unavailable(&target)).unwrap();
        assert!(plain.get("rate_limited").is_none());
        assert!(plain["price"].is_null());

        let limited = serde_json::to_value(Quote::rate_limited(&target)).unwrap();
        assert_eq!(limited["rate_limited"], true);
    }
}
