use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use hourly_oracle::config::Settings;
use hourly_oracle::engine::{DirectionTracker, ModelStatus, TrackerUpdate};
use hourly_oracle::exchange::{
    BinanceClient, BinanceWebSocket, MarketData, DEFAULT_DISPLAY_PRECISION,
};
use hourly_oracle::model::Prediction;
use hourly_oracle::types::{Interval, Symbol};

#[derive(Parser)]
#[command(name = "hourly-oracle")]
#[command(version)]
#[command(about = "Live UP/DOWN probability for the current hourly candle", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, default_value = "oracle.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs and predictions as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream live predictions until Ctrl+C
    Watch {
        /// Symbol to track (e.g. BTCUSDT, ETHUSDT)
        #[arg(short, long)]
        symbol: Option<Symbol>,
        /// Minimum confidence required to make a call
        #[arg(short, long)]
        threshold: Option<f64>,
    },
    /// Prime the model once and print a single prediction
    Snapshot {
        #[arg(short, long)]
        symbol: Option<Symbol>,
        #[arg(short, long)]
        threshold: Option<f64>,
    },
    /// Show the price display precision for a symbol
    Precision {
        #[arg(short, long)]
        symbol: Option<Symbol>,
    },
    /// Print the effective settings as TOML
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    let logs = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if cli.json {
        logs.json().init();
    } else {
        logs.init();
    }

    let mut settings = Settings::load(Some(&cli.config))?;

    match cli.command {
        Commands::Watch { symbol, threshold } => {
            apply_overrides(&mut settings, symbol, threshold)?;
            watch(settings, cli.json).await?;
        }
        Commands::Snapshot { symbol, threshold } => {
            apply_overrides(&mut settings, symbol, threshold)?;
            snapshot(settings, cli.json).await?;
        }
        Commands::Precision { symbol } => {
            apply_overrides(&mut settings, symbol, None)?;
            let client = BinanceClient::new(&settings.feed)?;
            let precision = client
                .fetch_display_precision(&settings.tracker.symbol)
                .await?;
            println!("{}: {} decimals", settings.tracker.symbol, precision);
        }
        Commands::Config => {
            print!("{}", toml::to_string_pretty(&settings)?);
        }
    }

    Ok(())
}

fn apply_overrides(
    settings: &mut Settings,
    symbol: Option<Symbol>,
    threshold: Option<f64>,
) -> Result<()> {
    if let Some(symbol) = symbol {
        settings.tracker.symbol = symbol;
    }
    if let Some(threshold) = threshold {
        settings.tracker.confidence_threshold = threshold;
    }
    settings
        .validate()
        .map_err(|errors| anyhow!("invalid settings: {}", errors.join(", ")))
}

async fn display_precision(client: &BinanceClient, symbol: &Symbol) -> usize {
    match client.fetch_display_precision(symbol).await {
        Ok(precision) => precision as usize,
        Err(e) => {
            warn!("Precision lookup failed, using {}: {}", DEFAULT_DISPLAY_PRECISION, e);
            DEFAULT_DISPLAY_PRECISION as usize
        }
    }
}

async fn watch(settings: Settings, json: bool) -> Result<()> {
    let symbol = settings.tracker.symbol.clone();
    let client = Arc::new(BinanceClient::new(&settings.feed)?);
    let precision = display_precision(&client, &symbol).await;

    info!(
        symbol = %symbol,
        threshold = settings.tracker.confidence_threshold,
        "Starting hourly direction tracker"
    );

    let mut tracker = DirectionTracker::new(symbol.clone(), client, settings.clone());
    let printer = tokio::spawn(print_updates(tracker.subscribe(), precision, json));

    tracker
        .start()
        .await
        .with_context(|| format!("failed to load history for {}", symbol))?;

    let mut ws = BinanceWebSocket::new(&settings.feed);
    ws.subscribe_kline(&symbol, Interval::M1)
        .subscribe_kline(&symbol, Interval::H1);
    let (events, handle) = ws.connect()?.into_parts();

    tracker
        .run(events, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await;

    handle.stop();
    printer.abort();
    info!("Tracker stopped");
    Ok(())
}

async fn snapshot(settings: Settings, json: bool) -> Result<()> {
    let symbol = settings.tracker.symbol.clone();
    let client = Arc::new(BinanceClient::new(&settings.feed)?);
    let precision = display_precision(&client, &symbol).await;

    let mut tracker = DirectionTracker::new(symbol.clone(), client, settings);
    let prediction = tracker
        .start()
        .await
        .with_context(|| format!("failed to load history for {}", symbol))?;
    let status = tracker.status().await;
    let price = tracker.model().read().await.minutes().last().copied();

    if json {
        let out = serde_json::json!({ "prediction": prediction, "status": status });
        println!("{}", serde_json::to_string(&out)?);
    } else {
        print_status(&status, precision);
        print_prediction(&symbol, &prediction, price, precision);
    }
    Ok(())
}

async fn print_updates(
    mut updates: broadcast::Receiver<TrackerUpdate>,
    precision: usize,
    json: bool,
) {
    loop {
        match updates.recv().await {
            Ok(TrackerUpdate::Prediction {
                prediction,
                price,
                status,
                at,
            }) => {
                if json {
                    let out = serde_json::json!({
                        "at": at,
                        "price": price,
                        "prediction": prediction,
                        "status": status,
                    });
                    println!("{}", out);
                } else {
                    print!("[{}] ", at.format("%H:%M:%S"));
                    print_prediction(&status.symbol, &prediction, price, precision);
                }
            }
            Ok(TrackerUpdate::Price { .. }) => {}
            Ok(TrackerUpdate::HourRefreshed(status)) => {
                if !json {
                    print_status(&status, precision);
                }
            }
            Ok(TrackerUpdate::FeedError(message)) => {
                if !json {
                    println!("Network: error ({})", message);
                }
            }
            Ok(TrackerUpdate::Disconnected) => {
                if !json {
                    println!("Network: reconnecting...");
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("Display lagged, skipped {} updates", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn print_prediction(symbol: &Symbol, prediction: &Prediction, price: Option<f64>, precision: usize) {
    let price = price
        .map(|p| format!("{:.*}", precision, p))
        .unwrap_or_else(|| "-".to_string());
    println!("{} {} | {}", symbol, price, prediction);
}

fn print_status(status: &ModelStatus, precision: usize) {
    let hour_open = status
        .hour_open
        .map(|p| format!("{:.*}", precision, p))
        .unwrap_or_else(|| "-".to_string());
    let last_hour = match status.last_closed_hour_dir {
        d if d > 0 => "UP",
        d if d < 0 => "DOWN",
        _ => "-",
    };
    println!("\n=== {} ===", status.symbol);
    println!("Hour open:        {}", hour_open);
    println!("Prior up:         {:.2}", status.prior_up);
    println!(
        "P(up | up/down):  {:.2} / {:.2}",
        status.p_up_given_up, status.p_up_given_down
    );
    println!("ATR (1h range):   {:.4}", status.atr.unwrap_or(0.0));
    println!("Last hour:        {}", last_hour);
    println!("Samples:          {} hourly, {} minute\n", status.hourly_bars, status.minutes);
}
