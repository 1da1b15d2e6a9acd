use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use fastpulse::config::LoggingConfig;
use fastpulse::throughput::report::format_summary;
use fastpulse::{Config, Direction, SpeedTestRequest};

#[derive(Parser)]
#[command(
    name = "fastpulse",
    about = "Peak HTTP download and upload throughput against test endpoints",
    version,
    long_about = None
)]
struct Cli {
    /// Path to a TOML config file; must load when given
    #[arg(long, global = true, env = "FASTPULSE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Measure peak throughput against one or more endpoints
    SpeedTest {
        /// Endpoint URL; repeat for parallel streams
        #[arg(long = "url", required = true)]
        urls: Vec<String>,

        /// Measurement budget per direction in seconds (default from config)
        #[arg(long)]
        max_time: Option<u64>,

        /// Which directions to measure
        #[arg(long, value_enum, default_value_t = DirectionArg::Both)]
        direction: DirectionArg,

        /// Print a progress line per sample
        #[arg(long)]
        verbose: bool,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration as TOML
    ShowConfig,
}

#[derive(Clone, Copy, ValueEnum)]
enum DirectionArg {
    Download,
    Upload,
    Both,
}

impl DirectionArg {
    fn directions(self) -> Vec<Direction> {
        match self {
            DirectionArg::Download => vec![Direction::Download],
            DirectionArg::Upload => vec![Direction::Upload],
            DirectionArg::Both => vec![Direction::Download, Direction::Upload],
        }
    }
}

fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Load the config under a temporary stderr subscriber so fallback warnings
/// are visible before the configured one is installed.
fn load_config(path: Option<&Path>) -> Result<Config> {
    let bootstrap = tracing_subscriber::fmt()
        .with_env_filter(env_filter(&LoggingConfig::default().level))
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::with_default(bootstrap, || Config::resolve(path))
}

fn init_tracing(config: &Config) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter(&config.logging.level))
        .with_writer(std::io::stderr);
    if config.logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    init_tracing(&config);

    match cli.command {
        Commands::SpeedTest {
            urls,
            max_time,
            direction,
            verbose,
            json,
        } => {
            let max_time = max_time
                .map(Duration::from_secs)
                .unwrap_or_else(|| config.sampler.max_time());
            tracing::info!(streams = urls.len(), max_time_secs = max_time.as_secs(), "Running speed test");

            let request = SpeedTestRequest {
                endpoints: urls,
                directions: direction.directions(),
                max_time,
                verbose: verbose && !json,
            };
            let result = fastpulse::run_test(&config, request).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                for outcome in result.results() {
                    println!("{}", format_summary(outcome));
                }
            }
        }
        Commands::ShowConfig => {
            print!("{}", config.to_toml()?);
        }
    }

    Ok(())
}
