use anyhow::{anyhow, bail, Context};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use rate_shopper::clock::{Clock, SystemClock};
use rate_shopper::config::{AppConfig, HotelSeed};
use rate_shopper::models::{CreateSearch, Property};
use rate_shopper::pricing::PriceAnalytics;
use rate_shopper::progress::{ProgressEvent, ProgressPublisher};
use rate_shopper::scrapers::HttpPriceScraper;
use rate_shopper::store::{MemoryStore, PropertyStore};
use rate_shopper::ExtractionOrchestrator;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "rate-shopper", about = "Collect and compare competitor nightly rates")]
struct Cli {
    #[arg(long, env = "RATE_SHOPPER_CONFIG", default_value = "rate-shopper.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create searches for every property of a hotel and run them one by one
    Run {
        /// Hotel name or id from the config
        hotel: String,
        #[arg(long)]
        from: NaiveDate,
        #[arg(long)]
        to: NaiveDate,
    },
    /// Print the per-date price matrix from the saved snapshot
    Trends {
        hotel: String,
        #[arg(long)]
        from: NaiveDate,
        #[arg(long)]
        to: NaiveDate,
    },
    /// Print the price history of one property on one date
    History {
        property_id: Uuid,
        #[arg(long)]
        date: NaiveDate,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load_or_default(&cli.config)?;

    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let store = Arc::new(MemoryStore::load_or_default(&config.storage.snapshot_path).await?);

    match cli.command {
        Command::Run { hotel, from, to } => {
            let seed = find_hotel(&config, &hotel)?;
            run_hotel(&config, store.clone(), seed, from, to).await?;
            store.save(&config.storage.snapshot_path).await?;
        }
        Command::Trends { hotel, from, to } => {
            let seed = find_hotel(&config, &hotel)?;
            let analytics = PriceAnalytics::new(store);
            let matrix = analytics.price_matrix(seed.id, from, to).await?;
            println!("{}", serde_json::to_string_pretty(&matrix.trend_points())?);
        }
        Command::History { property_id, date } => {
            let analytics = PriceAnalytics::new(store);
            let history = analytics.price_history(property_id, date).await?;
            println!("{}", serde_json::to_string_pretty(&history)?);
        }
    }

    Ok(())
}

fn find_hotel<'a>(config: &'a AppConfig, name_or_id: &str) -> anyhow::Result<&'a HotelSeed> {
    config
        .hotel(name_or_id)
        .ok_or_else(|| anyhow!("Hotel {} is not configured", name_or_id))
}

/// Register the hotel's properties (once) and return them
async fn seed_properties(store: &MemoryStore, seed: &HotelSeed, clock: &dyn Clock) -> anyhow::Result<Vec<Property>> {
    let mut properties = store.list_properties(seed.id).await?;
    for entry in &seed.properties {
        if properties.iter().any(|p| p.url == entry.url) {
            continue;
        }
        let mut property =
            Property::new(seed.id, &entry.name, &entry.url, clock.now()).with_max_bundle_size(entry.max_bundle_size);
        property.platform = entry.platform.clone();
        if entry.main {
            property = property.main();
        }
        let property = store
            .insert_property(property)
            .await
            .with_context(|| format!("Failed to register {}", entry.name))?;
        info!("Registered property {} ({})", property.name, property.id);
        properties.push(property);
    }
    Ok(properties)
}

async fn run_hotel(
    config: &AppConfig,
    store: Arc<MemoryStore>,
    seed: &HotelSeed,
    from: NaiveDate,
    to: NaiveDate,
) -> anyhow::Result<()> {
    info!("🏨 Rate shopper - {}", seed.name);
    info!("==========================================");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let properties = seed_properties(&store, seed, clock.as_ref()).await?;
    if properties.is_empty() {
        bail!("Hotel {} has no properties configured", seed.name);
    }

    let scraper = Arc::new(HttpPriceScraper::new(&config.scraper, clock.clone())?);
    let publisher = Arc::new(ProgressPublisher::new(config.progress.channel_capacity));
    let orchestrator = ExtractionOrchestrator::new(
        store.clone(),
        scraper,
        publisher.clone(),
        clock,
        config.orchestrator.clone(),
    );
    let sweeper = orchestrator.spawn_stale_sweeper();

    for property in properties.iter().filter(|p| p.active) {
        let request = CreateSearch {
            property_id: property.id,
            start_date: from,
            end_date: to,
            max_bundle_size: None,
        };
        let search = orchestrator.create_search(request).await?;
        info!("Queued {} dates for {}", search.total_dates, property.name);
    }

    let mut progress = publisher.subscribe(seed.id);
    let state = orchestrator.enable_lazy_mode(seed.id).await?;
    if state.is_active() {
        while let Some(event) = progress.next().await {
            match event {
                ProgressEvent::Progress(p) => info!(
                    "{}: {} {}/{} dates, {} prices",
                    p.property_name, p.status, p.processed_dates, p.total_dates, p.total_prices_found
                ),
                ProgressEvent::ExtractionCleaned { message, .. } => warn!("{}", message),
                ProgressEvent::LazyModeChanged { active: false, .. } => break,
                ProgressEvent::LazyModeChanged { .. } | ProgressEvent::SearchDeleted { .. } => {}
            }
        }
    }
    sweeper.abort();

    for search in orchestrator.pending_searches(seed.id).await? {
        warn!("Search {} is still pending", search);
    }
    info!("✅ Finished extraction for {}", seed.name);
    Ok(())
}
