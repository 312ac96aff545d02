use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "quote-fetcher")]
#[command(about = "Fetch stock and crypto quotes with rate-limit aware batching")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// JSON fetcher configuration; the builtin providers are used when omitted
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Print results as JSON instead of a table
    #[arg(long, global = true)]
    pub json: bool,

    /// Enable debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Fetch a single stock quote
    Quote {
        /// Ticker symbol (e.g. AAPL, ^GSPC)
        symbol: String,

        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        display: Option<String>,
    },

    /// Fetch many stock quotes in paced batches
    Batch {
        /// Ticker symbols to fetch
        symbols: Vec<String>,

        /// CSV with `symbol,name,display` columns
        #[arg(short, long)]
        from_file: Option<PathBuf>,

        #[arg(long)]
        batch_size: Option<usize>,

        /// Pause between batches in milliseconds, before jitter
        #[arg(long)]
        delay_ms: Option<u64>,
    },

    /// Fetch all configured crypto prices
    Crypto,
}
