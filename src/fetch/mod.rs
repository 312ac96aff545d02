use crate::error::Result;

pub mod cache;
pub mod crypto;
pub mod decode;
pub mod guard;
pub mod quotes;
pub mod request;
pub mod transport;

pub use cache::LastGoodCache;
pub use crypto::CryptoQuote;
pub use guard::{Clock, ManualClock, RateLimitGuard, SystemClock};
pub use quotes::{BatchOptions, Quote, QuoteFetcher, QuoteTarget};
pub use transport::{HttpTransport, Transport, TransportResponse};

/// Symbols requested concurrently per chunk unless configured otherwise.
pub const DEFAULT_BATCH_SIZE: usize = 2;
/// Pause between chunks, before jitter.
pub const DEFAULT_BATCH_DELAY_MS: u64 = 3_000;
/// Upper bound (exclusive) of the random jitter added to each pause.
pub const DEFAULT_JITTER_MS: u64 = 1_000;

pub type FetchResult<T> = Result<T>;

#[inline]
pub fn ensure_batch_size(size: usize) -> usize {
    size.max(1)
}
