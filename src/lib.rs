pub mod config;
pub mod error;
pub mod fetch;
pub mod utils;

pub use config::FetcherConfig;
pub use error::{AppError, Result};
pub use fetch::{BatchOptions, CryptoQuote, Quote, QuoteFetcher, QuoteTarget};
