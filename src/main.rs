//! Vol Allocator - replay entry point.
//!
//! Replays a CSV stream of market ticks (and optionally signals) through
//! the allocation engine and prints the compiled targets per tick.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use rust_decimal::Decimal;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;
use vol_allocator::history::{HistoryProvider, Resolution};
use vol_allocator::{Config, Direction, Engine, MarketTick, Signal};

/// Vol Allocator CLI
#[derive(Parser)]
#[command(name = "vol-allocator")]
#[command(version, about = "Replay market ticks through the allocation engine")]
struct Cli {
    /// Path to the tick CSV: timestamp,portfolio_value[,index_close]
    #[arg(short, long)]
    ticks: PathBuf,

    /// Path to the signal CSV:
    /// generated_at,source_id,instrument_id,direction,expires_at
    #[arg(short, long)]
    signals: Option<PathBuf>,

    /// Path to the index history CSV: one daily close per line, oldest first
    #[arg(short = 'H', long)]
    history: PathBuf,

    /// Initial portfolio value
    #[arg(short, long, default_value = "1000000")]
    initial_value: Decimal,
}

/// History provider backed by a pre-loaded close series.
struct CsvHistoryProvider {
    closes: Vec<Decimal>,
}

impl CsvHistoryProvider {
    fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read history file {}", path.display()))?;
        let closes = raw
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| {
                Decimal::from_str(line).with_context(|| format!("Bad close value: {line}"))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { closes })
    }
}

impl HistoryProvider for CsvHistoryProvider {
    fn closes(
        &self,
        _symbol: &str,
        lookback: usize,
        _resolution: Resolution,
    ) -> anyhow::Result<Vec<Decimal>> {
        let start = self.closes.len().saturating_sub(lookback);
        Ok(self.closes[start..].to_vec())
    }
}

fn parse_ticks(path: &Path) -> Result<Vec<MarketTick>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read tick file {}", path.display()))?;

    let mut ticks = Vec::new();
    for (number, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with("timestamp") {
            continue;
        }
        let parts: Vec<&str> = line.split(',').collect();
        anyhow::ensure!(
            parts.len() >= 2,
            "Tick line {} needs timestamp,portfolio_value",
            number + 1
        );

        let time = parts[0]
            .parse::<DateTime<Utc>>()
            .with_context(|| format!("Bad timestamp on tick line {}", number + 1))?;
        let portfolio_value = Decimal::from_str(parts[1])
            .with_context(|| format!("Bad portfolio value on tick line {}", number + 1))?;
        let index_close = match parts.get(2).map(|s| s.trim()) {
            Some("") | None => None,
            Some(raw_close) => Some(
                Decimal::from_str(raw_close)
                    .with_context(|| format!("Bad index close on tick line {}", number + 1))?,
            ),
        };

        ticks.push(MarketTick {
            time,
            portfolio_value,
            index_close,
        });
    }
    Ok(ticks)
}

fn parse_signals(path: &Path) -> Result<Vec<Signal>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read signal file {}", path.display()))?;

    let mut signals = Vec::new();
    for (number, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with("generated_at") {
            continue;
        }
        let parts: Vec<&str> = line.split(',').collect();
        anyhow::ensure!(
            parts.len() >= 5,
            "Signal line {} needs generated_at,source_id,instrument_id,direction,expires_at",
            number + 1
        );

        let generated_at = parts[0]
            .parse::<DateTime<Utc>>()
            .with_context(|| format!("Bad generated_at on signal line {}", number + 1))?;
        let direction = match parts[3].trim() {
            "up" | "Up" => Direction::Up,
            "down" | "Down" => Direction::Down,
            "flat" | "Flat" => Direction::Flat,
            other => anyhow::bail!("Unknown direction '{other}' on signal line {}", number + 1),
        };
        let expires_at = parts[4]
            .parse::<DateTime<Utc>>()
            .with_context(|| format!("Bad expires_at on signal line {}", number + 1))?;

        signals.push(Signal::new(
            parts[1].trim(),
            parts[2].trim(),
            direction,
            generated_at,
            expires_at,
        ));
    }

    signals.sort_by_key(|s| s.generated_at);
    Ok(signals)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging()?;

    let config = Config::load()?;
    config.validate()?;
    anyhow::ensure!(
        cli.initial_value > Decimal::ZERO,
        "initial value must be positive"
    );

    let ticks = parse_ticks(&cli.ticks)?;
    let mut pending = match &cli.signals {
        Some(path) => parse_signals(path)?,
        None => Vec::new(),
    };
    let history = CsvHistoryProvider::load(&cli.history)?;

    info!(
        ticks = ticks.len(),
        signals = pending.len(),
        initial_value = %cli.initial_value,
        "starting replay"
    );

    let mut engine = Engine::new(config, history, cli.initial_value);
    let mut emitted = 0usize;

    for tick in &ticks {
        // Hand the engine every signal generated up to this tick.
        let split = pending.partition_point(|s| s.generated_at <= tick.time);
        let batch: Vec<Signal> = pending.drain(..split).collect();

        let targets = engine.on_tick(tick, &batch);
        if !targets.is_empty() {
            emitted += targets.len();
            println!(
                "{}",
                serde_json::json!({
                    "time": tick.time.to_rfc3339(),
                    "targets": targets,
                })
            );
        }
    }

    info!(
        targets = emitted,
        short_weight = %engine.risk().short_weight(),
        margin_multiplier = %engine.risk().margin_multiplier(),
        drawdown = %engine.risk().drawdown_fraction(),
        "replay complete"
    );
    Ok(())
}

/// Initialize logging with file output alongside stderr.
fn init_logging() -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    std::fs::create_dir_all("logs")?;

    let file_appender = tracing_appender::rolling::daily("logs", "vol-allocator.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    // Keep the writer guard alive for the program duration
    Box::leak(Box::new(guard));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("vol_allocator=debug".parse()?)
                .add_directive(Level::INFO.into()),
        )
        .with_writer(std::io::stderr.and(file_writer))
        .with_target(true)
        .with_ansi(true)
        .init();

    Ok(())
}
