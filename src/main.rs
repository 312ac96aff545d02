mod cli;

use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use env_logger::Env;

use cli::{Cli, Commands};
use quote_fetcher::config::{load_config, load_targets};
use quote_fetcher::utils::{
    current_human_timestamp, format_change, format_price, format_remaining, pad_right,
};
use quote_fetcher::{CryptoQuote, FetcherConfig, Quote, QuoteFetcher, QuoteTarget};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(default_level)).init();

    let config = match &cli.config {
        Some(path) => load_config(path).context("Failed to load configuration")?,
        None => FetcherConfig::builtin(),
    };
    let fetcher = QuoteFetcher::new(config).context("Failed to build HTTP client")?;

    match cli.command {
        Commands::Quote {
            ref symbol,
            ref name,
            ref display,
        } => {
            let name = name.as_deref().unwrap_or(symbol);
            let display = display.as_deref().unwrap_or(symbol);
            let quote = fetcher.fetch_quote(symbol, name, display).await;
            if quote.rate_limited {
                print_cooldown(&fetcher);
            }
            print_quotes(std::slice::from_ref(&quote), cli.json)?;
        }
        Commands::Batch {
            ref symbols,
            ref from_file,
            batch_size,
            delay_ms,
        } => {
            let mut targets: Vec<QuoteTarget> = symbols.iter().map(QuoteTarget::bare).collect();
            if let Some(path) = from_file {
                targets.extend(load_targets(path).context("Failed to load target list")?);
            }
            if targets.is_empty() {
                bail!("No symbols given; pass symbols or --from-file");
            }

            let mut options = fetcher.batch_options();
            if let Some(size) = batch_size {
                options = options.batch_size(size);
            }
            if let Some(ms) = delay_ms {
                options = options.delay(Duration::from_millis(ms));
            }

            let total = targets.len();
            let options = options.on_batch(move |so_far| {
                eprintln!("  ... {}/{} quotes received", so_far.len(), total);
            });
            let quotes = fetcher.fetch_quotes(&targets, options).await;

            if fetcher.guard().is_limited() {
                print_cooldown(&fetcher);
            }
            print_quotes(&quotes, cli.json)?;
        }
        Commands::Crypto => {
            let quotes = fetcher.fetch_crypto().await;
            print_crypto(&quotes, cli.json)?;
        }
    }

    Ok(())
}

fn print_cooldown(fetcher: &QuoteFetcher) {
    let guard = fetcher.guard();
    println!(
        "Provider is rate limiting requests ({} cooldown), retry in {}",
        format_remaining(guard.window()),
        format_remaining(guard.remaining())
    );
}

fn print_quotes(quotes: &[Quote], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(quotes)?);
        return Ok(());
    }

    println!("Fetched at {}", current_human_timestamp());
    println!(
        "{} {} {:>12} {:>10}",
        pad_right("SYMBOL", 10),
        pad_right("NAME", 28),
        "PRICE",
        "CHANGE"
    );
    for quote in quotes {
        println!(
            "{} {} {:>12} {:>10}",
            pad_right(&quote.display, 10),
            pad_right(&quote.name, 28),
            format_price(quote.price),
            format_change(quote.change)
        );
    }
    Ok(())
}

fn print_crypto(quotes: &[CryptoQuote], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(quotes)?);
        return Ok(());
    }

    if quotes.is_empty() {
        println!("No crypto prices available");
        return Ok(());
    }

    println!("Fetched at {}", current_human_timestamp());
    for quote in quotes {
        println!(
            "{} {} {:>14} {:>10}",
            pad_right(&quote.symbol, 6),
            pad_right(&quote.name, 16),
            format_price(Some(quote.price)),
            format_change(Some(quote.change))
        );
    }
    Ok(())
}
