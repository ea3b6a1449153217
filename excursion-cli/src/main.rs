//! Excursion CLI: offline replays and regime inspection.
//!
//! Commands:
//! - `replay`: simulate one signal (JSON) against a CSV file of bars
//! - `regime`: rebuild regimes from a JSONL history and print them
//! - `check-config`: validate a TOML config and print the effective values

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use excursion_core::domain::{Bar, Direction, SimulationResult, TradeSignal};
use excursion_core::{
    ExcursionRegimeLite, NullSink, PersistenceSink, RegimeCache, ReplayFeed, Simulator,
};
use excursion_runner::{logging, warm_start_at, AppConfig, JsonlHistory};

#[derive(Parser)]
#[command(
    name = "excursion",
    about = "Excursion CLI: trade outcome simulation and excursion regimes"
)]
struct Cli {
    /// Path to a TOML config file. Defaults are used when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Simulate one signal against a CSV file of bars (time,open,high,low,close).
    Replay {
        /// Signal JSON file.
        #[arg(long)]
        signal: PathBuf,

        /// Bars CSV file; `time` is an RFC 3339 timestamp.
        #[arg(long)]
        bars: PathBuf,

        /// Append the finalized record to this JSONL history.
        #[arg(long)]
        history: Option<PathBuf>,

        /// Print the result as JSON instead of a summary.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Rebuild regimes from a JSONL history and print them.
    Regime {
        /// JSONL history file. Defaults to the configured history path.
        #[arg(long)]
        history: Option<PathBuf>,

        /// Only this instrument.
        #[arg(long)]
        instrument: Option<String>,

        /// Evaluate the recent window as of this RFC 3339 time instead of now.
        #[arg(long)]
        as_of: Option<String>,

        /// Print regimes as JSON instead of a table.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Validate a config file and print the effective configuration.
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };
    logging::init(&config.logging.filter);

    match cli.command {
        Commands::Replay {
            signal,
            bars,
            history,
            json,
        } => run_replay(&config, &signal, &bars, history, json).await,
        Commands::Regime {
            history,
            instrument,
            as_of,
            json,
        } => run_regime(&config, history, instrument, as_of, json),
        Commands::CheckConfig => {
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

async fn run_replay(
    config: &AppConfig,
    signal_path: &Path,
    bars_path: &Path,
    history: Option<PathBuf>,
    json: bool,
) -> Result<()> {
    let text = std::fs::read_to_string(signal_path)
        .with_context(|| format!("failed to read signal {}", signal_path.display()))?;
    let signal: TradeSignal = serde_json::from_str(&text)
        .with_context(|| format!("invalid signal JSON in {}", signal_path.display()))?;
    let bars = load_bars(bars_path)?;
    if bars.is_empty() {
        bail!("no bars in {}", bars_path.display());
    }

    // Replays poll as fast as the bars can be consumed.
    let mut sim_config = config.simulator.clone();
    sim_config.poll_interval_ms = Some(1);
    sim_config.retry_delay_ms = 1;

    let sink: Arc<dyn PersistenceSink> = match history {
        Some(path) => Arc::new(JsonlHistory::new(path)),
        None => Arc::new(NullSink),
    };
    let cache = Arc::new(RegimeCache::new(config.regime.clone()));
    let simulator = Simulator::new(sim_config, Arc::clone(&cache), sink);
    let feed = ReplayFeed::new()
        .closing_when_drained()
        .with_bars(&signal.instrument, bars);

    let result = simulator
        .run(signal, &feed)
        .await
        .context("signal refused")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_result(&result);
    }
    Ok(())
}

fn load_bars(path: &Path) -> Result<Vec<Bar>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("failed to open bars {}", path.display()))?;
    let mut bars = Vec::new();
    for (i, row) in reader.deserialize::<Bar>().enumerate() {
        let bar = row.with_context(|| format!("bad bar on data row {}", i + 1))?;
        bars.push(bar);
    }
    Ok(bars)
}

fn run_regime(
    config: &AppConfig,
    history: Option<PathBuf>,
    instrument: Option<String>,
    as_of: Option<String>,
    json: bool,
) -> Result<()> {
    let path = history.unwrap_or_else(|| config.persistence.history_path.clone());
    let now = match as_of.as_deref() {
        Some(s) => DateTime::parse_from_rfc3339(s)
            .with_context(|| format!("invalid --as-of time '{s}'"))?
            .with_timezone(&Utc),
        None => Utc::now(),
    };

    let records = JsonlHistory::new(&path)
        .read_all()
        .with_context(|| format!("failed to read history {}", path.display()))?;
    let cache = RegimeCache::new(config.regime.clone());
    let report = warm_start_at(&cache, &records, now);

    let instruments = match instrument {
        Some(symbol) => vec![symbol],
        None => cache.instruments(),
    };
    let regimes: Vec<ExcursionRegimeLite> = instruments
        .iter()
        .filter_map(|symbol| cache.get_regime_lite(symbol))
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&regimes)?);
        return Ok(());
    }

    println!(
        "Loaded {} records ({} outside the window, {} duplicates)",
        report.loaded, report.stale, report.duplicates
    );
    if regimes.is_empty() {
        println!("No regimes.");
        return Ok(());
    }
    println!();
    println!(
        "{:<12} {:>7} {:>8} {:>8} {:>8} {:>8} {:>8} {:>6}",
        "Instrument", "Samples", "WinRate", "AvgR", "AvgMFE", "AvgMAE", "Ratio", "Flags"
    );
    for regime in &regimes {
        let mut flags = String::new();
        if !cache.has_enough_samples(regime) {
            flags.push('n');
        }
        if cache.is_high_adverse_risk(regime, Direction::Long) {
            flags.push('L');
        }
        if cache.is_high_adverse_risk(regime, Direction::Short) {
            flags.push('S');
        }
        println!(
            "{:<12} {:>7} {:>7.1}% {:>8.2} {:>7.2}% {:>7.2}% {:>8.2} {:>6}",
            regime.instrument,
            regime.sample_count,
            regime.win_rate * 100.0,
            regime.avg_r_multiple,
            regime.avg_mfe,
            regime.avg_mae,
            regime.excursion_ratio,
            flags
        );
    }
    println!();
    println!("Flags: n = too few samples, L/S = high adverse risk for longs/shorts");
    Ok(())
}

fn print_result(result: &SimulationResult) {
    println!();
    println!("=== Simulation Result ===");
    println!("Run:            {}", result.run_id);
    println!("Instrument:     {} ({})", result.instrument, result.direction);
    println!("Outcome:        {}", result.outcome.as_str());
    println!("Exit Price:     {:.4}", result.exit_price);
    println!("PnL:            {:.2}%", result.pnl_pct);
    println!("R Multiple:     {:.2} (label {})", result.r_multiple, result.label.value());
    println!();
    println!("--- Excursions ---");
    println!("MFE:            {:.2}%", result.mfe);
    println!("MAE:            {:.2}%", result.mae);
    println!("Time to MFE:    {} ms", result.time_to_mfe_ms);
    println!("Time to MAE:    {} ms", result.time_to_mae_ms);
    println!();
    println!("Opened:         {}", result.opened_at);
    println!("Closed:         {}", result.closed_at);
    println!("Bars:           {}", result.bars_processed);
    println!("Partial Fills:  {}", result.partial_fills);
}
