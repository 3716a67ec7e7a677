use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use ozon_repricer::config::{AppConfig, LoggingConfig};
use ozon_repricer::models::Credentials;
use ozon_repricer::pricing::{DiscountCoefficient, PriceInputs, PricingPolicy};
use ozon_repricer::settings::SettingsStore;
use ozon_repricer::{MarketplaceClient, Session, Visibility, catalog, console};

#[derive(Parser)]
#[command(name = "ozon-repricer")]
#[command(about = "Keeps Ozon buyer prices at their targets", long_about = None)]
struct Cli {
    /// Directory holding default.toml, {RUN_MODE}.toml and local.toml
    #[arg(long, default_value = "config", global = true)]
    config_dir: String,

    /// Settings file, overriding settings.path from the configuration
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the repricing engine with an interactive console
    Run {
        #[arg(long, env = "REPRICER_CLIENT_ID")]
        client_id: Option<String>,
        #[arg(long, env = "REPRICER_API_KEY", hide_env_values = true)]
        api_key: Option<String>,
        /// Start repricing right away instead of waiting for `start`
        #[arg(long)]
        start: bool,
        /// Run without reading commands from stdin (implies --start)
        #[arg(long)]
        no_console: bool,
    },
    /// Print the catalog with the prices buyers currently see
    List {
        #[arg(long, value_enum)]
        visibility: Option<Visibility>,
        /// Print merged product records as JSON
        #[arg(long)]
        json: bool,
    },
    /// Save seller API credentials
    Login {
        #[arg(long, env = "REPRICER_CLIENT_ID")]
        client_id: String,
        #[arg(long, env = "REPRICER_API_KEY", hide_env_values = true)]
        api_key: String,
    },
    /// Track a product at a target buyer price
    Track { offer_id: String, target: u32 },
    /// Stop tracking a product
    Untrack { offer_id: String },
    /// Set the discount coefficient
    Coef { value: f64 },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = AppConfig::load_from(&cli.config_dir).context("Failed to load configuration")?;
    let _log_guard = init_tracing(&config.logging)?;

    if config.metrics.enabled {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(([0, 0, 0, 0], config.metrics.port))
            .install()
            .context("Failed to start the metrics exporter")?;
        info!("Metrics exporter listening on port {}", config.metrics.port);
    }

    let settings_path = cli.settings.clone().unwrap_or_else(|| config.settings.path.clone());
    let mut settings = SettingsStore::open(&settings_path)
        .with_context(|| format!("Failed to read settings from {}", settings_path.display()))?;

    match cli.command {
        Commands::Run {
            client_id,
            api_key,
            start,
            no_console,
        } => {
            let credentials = match (client_id, api_key) {
                (Some(client_id), Some(api_key)) => Some(Credentials::new(client_id, api_key)),
                (None, None) => None,
                _ => bail!("--client-id and --api-key must be given together"),
            };
            run(&config, settings, credentials, start || no_console, no_console).await
        }
        Commands::List { visibility, json } => {
            let credentials = settings.load_credentials();
            let client = MarketplaceClient::new(&credentials, &config.api)?;
            let visibility = visibility.unwrap_or(config.api.visibility);
            let products = catalog::assemble(&client, visibility, config.api.page_size).await;

            if json {
                let records: Vec<_> = products.iter().map(|p| p.to_json()).collect();
                println!("{}", serde_json::to_string_pretty(&records)?);
                return Ok(());
            }

            let coefficient = settings.load_coefficient(config.pricing.default_coefficient);
            let policy = PricingPolicy::new(DiscountCoefficient::from_f64(coefficient)?);
            let tracking = settings.load_tracked_products(&credentials.client_id);
            for product in &products {
                let display = PriceInputs::from_product(product)
                    .and_then(|inputs| policy.display_price_label(&inputs))
                    .unwrap_or_else(|| "-".to_string());
                let target = tracking
                    .target(product.offer_id())
                    .map(|t| t.to_string())
                    .unwrap_or_default();
                println!(
                    "{:<20} {:>10} {:>10} {:>8}  {}",
                    product.offer_id(),
                    product.price().unwrap_or("-"),
                    display,
                    target,
                    product.name().unwrap_or_default()
                );
            }
            println!("{} products", products.len());
            Ok(())
        }
        Commands::Login { client_id, api_key } => {
            let credentials = Credentials::new(client_id, api_key);
            if !credentials.is_complete() {
                bail!("Client ID and Api-Key must not be empty");
            }
            settings.save_credentials(&credentials);
            settings.flush()?;
            println!("Credentials saved for account {}", credentials.client_id);
            Ok(())
        }
        Commands::Track { offer_id, target } => {
            let mut tracking = saved_account_tracking(&settings)?;
            tracking.track(offer_id.clone(), target)?;
            settings.save_tracked_products(&tracking);
            settings.flush()?;
            println!("Tracking {} at {}", offer_id, target);
            Ok(())
        }
        Commands::Untrack { offer_id } => {
            let mut tracking = saved_account_tracking(&settings)?;
            if tracking.untrack(&offer_id).is_none() {
                warn!("{} was not tracked", offer_id);
            }
            settings.save_tracked_products(&tracking);
            settings.flush()?;
            Ok(())
        }
        Commands::Coef { value } => {
            let coefficient = DiscountCoefficient::from_f64(value)?;
            settings.save_coefficient(coefficient);
            settings.flush()?;
            println!("Discount coefficient set to {}", coefficient);
            Ok(())
        }
    }
}

fn saved_account_tracking(settings: &SettingsStore) -> Result<ozon_repricer::tracking::TrackingStore> {
    let credentials = settings.load_credentials();
    if credentials.client_id.is_empty() {
        bail!("No saved account, run `ozon-repricer login` first");
    }
    Ok(settings.load_tracked_products(&credentials.client_id))
}

async fn run(
    config: &AppConfig,
    settings: SettingsStore,
    credentials: Option<Credentials>,
    start: bool,
    no_console: bool,
) -> Result<()> {
    info!("Starting ozon-repricer...");
    let (mut session, handle) = Session::new(config, settings)?;
    if let Some(credentials) = credentials {
        session = session.with_default_credentials(credentials);
    }
    let engine = tokio::spawn(session.run());

    if start {
        if let Err(e) = handle.start(None).await {
            error!("Could not start repricing: {}", e);
        }
    }

    if no_console {
        tokio::signal::ctrl_c().await?;
        info!("Shutting down...");
        handle.shutdown();
    } else {
        let lines = console::spawn_stdin_reader()?;
        println!("Type 'help' for commands.");
        let console_handle = handle.clone();
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                info!("Shutting down...");
                handle.shutdown();
            }
            _ = console::run_console(console_handle, lines) => {}
        }
    }

    engine.await??;
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ozon_repricer=info"));

    let (file_layer, guard) = match &logging.directory {
        Some(directory) => {
            std::fs::create_dir_all(directory)
                .with_context(|| format!("Failed to create log directory {}", directory.display()))?;
            let appender = tracing_appender::rolling::daily(directory, &logging.file_prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_ansi(false).with_writer(writer)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    Ok(guard)
}
