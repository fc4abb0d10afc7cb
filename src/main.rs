use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod duration;
mod report;
mod scenario;
mod settings;

use scenario::Scenario;
use settings::{Format, Overrides, Settings};

#[derive(Parser, Debug)]
#[command(name = "loopmon")]
#[command(about = "Measure how responsive a tokio event loop is under different workloads")]
#[command(version)]
struct Args {
    /// Settings file (TOML, YAML or JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Sampling interval (e.g., "100ms", "0.5s")
    #[arg(short, long, global = true)]
    interval: Option<String>,

    /// Name of the sampling task
    #[arg(long, global = true)]
    name: Option<String>,

    /// Output format for samples
    #[arg(short, long, value_enum, global = true)]
    format: Option<Format>,

    /// How long a scenario runs (e.g., "3s")
    #[arg(short, long, global = true)]
    duration: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Enable JSON logging
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    scenario: Scenario,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args);

    let overrides = Overrides {
        interval: args.interval.clone(),
        name: args.name.clone(),
        format: args.format,
        duration: args.duration.clone(),
    };
    let settings = Settings::load(args.config.as_deref(), &overrides)?;

    info!(
        scenario = ?args.scenario,
        interval = %duration::format_duration(settings.interval),
        duration = %duration::format_duration(settings.duration),
        "Starting scenario"
    );
    args.scenario.run(&settings)
}

/// Logs go to stderr so that stdout only carries samples.
fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}
