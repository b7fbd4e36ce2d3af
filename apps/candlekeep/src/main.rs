mod commands;
mod obs;
mod wiring;

use clap::{Args, Parser, Subcommand};
use commands::{Command, SeriesArgs};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "candlekeep")]
#[command(about = "OHLCV candle collector", version, arg_required_else_help = true)]
#[command(
    after_help = "Examples:\n  candlekeep run --config platform/ops/configs/collector.toml\n  candlekeep gaps --config platform/ops/configs/collector.toml --symbol BTCUSD --exchange kraken --timeframe 1h --start 2024-01-01T00:00:00Z\n  candlekeep migrate --config platform/ops/configs/collector.toml\n"
)]
struct Cli {
    /// Prometheus listen address (host:port); overrides `metrics.prometheus_listen`.
    #[arg(long, global = true, env = "CANDLEKEEP_METRICS_ADDR")]
    metrics_addr: Option<String>,
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Collect on every top of the hour until interrupted.
    Run {
        #[arg(long)]
        config: PathBuf,
    },
    /// Run every enabled tier once, regardless of the hour.
    Collect {
        #[arg(long)]
        config: PathBuf,
        /// Restrict to these timeframes (repeatable).
        #[arg(long = "timeframe")]
        timeframes: Vec<String>,
    },
    /// List missing candle ranges of one series.
    Gaps(SeriesCli),
    /// Completeness and OHLC sanity report of one series.
    Quality(SeriesCli),
    /// Fetch the missing ranges of one series.
    Backfill(SeriesCli),
    /// Latest indicator values of one series.
    Indicators(SeriesCli),
    /// Apply the OHLCV table migration.
    Migrate {
        #[arg(long)]
        config: PathBuf,
        #[arg(long, default_value = "platform/ops/migrations/0001_create_ohlcv_candles.sql")]
        migrations_path: PathBuf,
    },
}

#[derive(Args)]
struct SeriesCli {
    #[arg(long)]
    config: PathBuf,
    #[arg(long)]
    symbol: String,
    #[arg(long)]
    exchange: String,
    #[arg(long, default_value = "1h")]
    timeframe: String,
    /// RFC 3339 or Unix epoch.
    #[arg(long)]
    start: String,
    /// RFC 3339 or Unix epoch; defaults to now.
    #[arg(long)]
    end: Option<String>,
}

impl SeriesCli {
    fn split(self) -> (PathBuf, SeriesArgs) {
        (
            self.config,
            SeriesArgs {
                symbol: self.symbol,
                exchange: self.exchange,
                timeframe: self.timeframe,
                start: self.start,
                end: self.end,
            },
        )
    }
}

fn main() {
    let cli = Cli::parse();
    let (config, command) = match cli.command {
        CliCommand::Run { config } => (config, Command::Run),
        CliCommand::Collect { config, timeframes } => (config, Command::Collect { timeframes }),
        CliCommand::Gaps(series) => {
            let (config, args) = series.split();
            (config, Command::Gaps(args))
        }
        CliCommand::Quality(series) => {
            let (config, args) = series.split();
            (config, Command::Quality(args))
        }
        CliCommand::Backfill(series) => {
            let (config, args) = series.split();
            (config, Command::Backfill(args))
        }
        CliCommand::Indicators(series) => {
            let (config, args) = series.split();
            (config, Command::Indicators(args))
        }
        CliCommand::Migrate {
            config,
            migrations_path,
        } => (config, Command::Migrate { migrations_path }),
    };

    if let Err(err) = commands::run(&config, command, cli.metrics_addr.as_deref()) {
        eprintln!("error: {}", err);
        std::process::exit(1);
    }
}
