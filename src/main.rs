use anyhow::Result;
use clap::Parser;
use std::io::{self, BufRead, Write};
use std::process::Command;
use std::sync::Arc;
use tracing::{info, warn};

use kegfinder::fetcher::{FetcherConfig, PageFetcher};
use kegfinder::pipeline::{PipelineConfig, RankingPipeline};
use kegfinder::reference::load_reference_index;
use kegfinder::resolver::{AbvResolver, ResolverConfig};
use kegfinder::topk::ScoredItem;

const DEFAULT_SEED: &str = "https://www.bevmo.com/shop/kegs?offset=0";

#[derive(Parser, Debug)]
#[command(author, version, about = "Find the keg that's right for you", long_about = None)]
struct Cli {
    /// Number of kegs to display
    #[arg(short = 'n', long, default_value_t = 3)]
    top: usize,

    /// Maximum number of kegs to discover during the crawl
    #[arg(short, long, default_value_t = 10_000)]
    budget: usize,

    /// Search result pages to try when resolving alcohol content
    #[arg(short, long, default_value_t = 10)]
    attempts: usize,

    /// Skip kegs priced above this many dollars
    #[arg(short, long)]
    price_ceiling: Option<f64>,

    /// Keywords that must all appear in a keg's description
    #[arg(short, long)]
    include: Vec<String>,

    /// Keywords whose presence in a description excludes a keg
    #[arg(short = 'x', long)]
    exclude: Vec<String>,

    /// Listing page to start the crawl from
    #[arg(long, default_value = DEFAULT_SEED)]
    seed: String,

    /// Search endpoint used for alcohol-content lookups
    #[arg(long, default_value = "https://www.google.com/search")]
    search_endpoint: String,

    /// Proxy for outbound requests, e.g. http://host:port
    #[arg(long)]
    proxy: Option<String>,

    /// Print the ranked list as JSON instead of prompting
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let fetcher = Arc::new(PageFetcher::new(FetcherConfig {
        proxy: cli.proxy.clone(),
        ..FetcherConfig::default()
    })?);

    let reference = load_reference_index(fetcher.as_ref()).await;
    let resolver = AbvResolver::new(
        Arc::clone(&fetcher),
        reference,
        ResolverConfig {
            attempts: cli.attempts,
            search_endpoint: cli.search_endpoint.clone(),
            ..Default::default()
        },
    );
    let pipeline = RankingPipeline::new(
        Arc::clone(&fetcher),
        resolver,
        PipelineConfig {
            top_k: cli.top,
            page_budget: cli.budget,
            price_ceiling: cli.price_ceiling,
            include: cli.include.clone(),
            exclude: cli.exclude.clone(),
        },
    );

    info!("crawling {}", cli.seed);
    let (ranked, stats) = pipeline.run(&cli.seed).await;
    info!(scored = stats.scored, kept = ranked.len(), "run finished");

    if ranked.is_empty() {
        println!("No kegs found.");
        return Ok(());
    }

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&ranked)?);
        return Ok(());
    }

    present(&ranked)
}

/// Numbered listing plus a selection prompt; picking a keg opens its
/// page in the browser, the index one past the list quits.
fn present(ranked: &[ScoredItem]) -> Result<()> {
    println!();
    for (i, scored) in ranked.iter().enumerate() {
        let Some(attrs) = scored.item.attrs() else {
            continue;
        };
        println!("{}. {}", i + 1, attrs.name);
        println!(
            "   {:.4} gal alcohol per dollar | {} | {} | {}",
            scored.ratio,
            attrs
                .price
                .map(|p| format!("${p:.2}"))
                .unwrap_or_else(|| "price unknown".to_string()),
            attrs
                .volume
                .map(|v| format!("{v} gal"))
                .unwrap_or_else(|| "volume unknown".to_string()),
            attrs
                .availability
                .map(|n| format!("{n} in stock"))
                .unwrap_or_else(|| "stock unknown".to_string()),
        );
        println!("   {}", scored.item.url);
    }

    let quit = ranked.len() + 1;
    let stdin = io::stdin();
    loop {
        print!("\nOpen which keg? ({} to quit): ", quit);
        io::stdout().flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let choice = line.trim();
        if choice.is_empty() {
            continue;
        }
        match choice.parse::<usize>() {
            Ok(n) if n == quit => break,
            Ok(n) if n >= 1 && n <= ranked.len() => {
                let url = &ranked[n - 1].item.url;
                if let Err(e) = open_in_browser(url) {
                    warn!("could not open {}: {}", url, e);
                }
            }
            _ => println!("Enter a number between 1 and {}.", quit),
        }
    }
    Ok(())
}

/// Hand the URL to the platform's default opener.
fn open_in_browser(url: &str) -> io::Result<()> {
    #[cfg(target_os = "macos")]
    let status = Command::new("open").arg(url).spawn();
    #[cfg(target_os = "windows")]
    let status = Command::new("cmd").args(["/C", "start", "", url]).spawn();
    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    let status = Command::new("xdg-open").arg(url).spawn();
    status.map(|_| ())
}
