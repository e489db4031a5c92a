//! CLI entry point for the empire_state collector.
//!
//! Each subcommand runs one fetch flow once and exits; scheduling is left to
//! whatever invokes the binary.

use anyhow::{Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use empire_state::config::Config;
use empire_state::logging::init_logging;
use empire_state::mta::MtaFetcher;
use empire_state::output::{
    CSV_EXTENSION, SNAPSHOT_EXTENSION, latest_artifact, load_dataframe, print_profile,
};
use empire_state::stats::FrameProfile;
use empire_state::weather::{DEFAULT_FORECAST_HOURS, WeatherFetcher};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "empire_state")]
#[command(about = "Collects NYC transit and weather data", long_about = None)]
struct Cli {
    /// Project root; data, reports and logs directories live under it
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch subway performance datasets from NY Open Data
    Mta {
        #[arg(short, long, value_enum, default_value_t = MtaDataset::All)]
        dataset: MtaDataset,
    },
    /// Fetch current NYC weather and forecast from OpenWeatherMap
    Weather {
        /// Forecast span in hours (fetched in 3-hour blocks)
        #[arg(long, default_value_t = DEFAULT_FORECAST_HOURS)]
        forecast_hours: u32,
    },
    /// Describe the most recent saved dataset
    Inspect {
        /// Directory to search (defaults to <root>/data/raw/mta)
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// Artifact name prefix
        #[arg(short, long, default_value = "terminal_otp")]
        prefix: String,
    },
    /// Show the resolved configuration
    ShowConfig,
}

#[derive(Clone, Copy, ValueEnum)]
enum MtaDataset {
    All,
    TerminalOtp,
    PlatformTimes,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    let cli = Cli::parse();

    let config = Config::from_env(&cli.root);
    config.ensure_dirs()?;
    let _log_guard = init_logging(&config.logs_dir)?;

    match cli.command {
        Commands::Mta { dataset } => {
            let fetcher = MtaFetcher::new(&config)?;
            match dataset {
                MtaDataset::All => {
                    let results = fetcher.fetch_all().await?;
                    info!(datasets = results.len(), "Fetched mta datasets");
                }
                MtaDataset::TerminalOtp => {
                    report("terminal_otp", fetcher.fetch_terminal_otp().await?)
                }
                MtaDataset::PlatformTimes => {
                    report("platform_times", fetcher.fetch_platform_wait_times().await?)
                }
            }
        }
        Commands::Weather { forecast_hours } => {
            let fetcher = WeatherFetcher::new(&config)?;
            match fetcher.fetch_and_save(forecast_hours).await? {
                Some(summary) => info!(
                    temp = ?summary.temp,
                    feels_like = ?summary.feels_like,
                    humidity = ?summary.humidity,
                    description = %summary.description,
                    "Current weather in nyc"
                ),
                None => warn!("No weather saved, check OPENWEATHER_API_KEY in .env"),
            }
        }
        Commands::Inspect { dir, prefix } => {
            let dir = dir.unwrap_or_else(|| config.raw_data_dir.join("mta"));
            inspect(&dir, &prefix)?;
        }
        Commands::ShowConfig => show_config(&config),
    }

    Ok(())
}

fn report(name: &str, frame: Option<empire_state::frame::Frame>) {
    match frame {
        Some(frame) => info!(
            dataset = name,
            records = frame.len(),
            columns = ?frame.columns().iter().take(5).collect::<Vec<_>>(),
            "Fetched dataset"
        ),
        None => warn!(dataset = name, "No data fetched"),
    }
}

/// Profiles the newest `<prefix>_*` CSV in `dir`, falling back to a snapshot.
fn inspect(dir: &Path, prefix: &str) -> Result<()> {
    let latest = match latest_artifact(dir, prefix, CSV_EXTENSION)? {
        Some(path) => path,
        None => match latest_artifact(dir, prefix, SNAPSHOT_EXTENSION)? {
            Some(path) => path,
            None => bail!("no {prefix} files found in {}", dir.display()),
        },
    };

    info!(path = %latest.display(), "Reading");
    let frame = load_dataframe(&latest)?;
    print_profile(&FrameProfile::from_frame(&frame));
    Ok(())
}

fn show_config(config: &Config) {
    let set = |v: bool| if v { "set" } else { "unset" };

    info!(
        raw = %config.raw_data_dir.display(),
        processed = %config.processed_data_dir.display(),
        reports = %config.reports_dir.display(),
        logs = %config.logs_dir.display(),
        "Directories"
    );
    info!(
        mta_api_key = set(!config.mta_api_key.is_empty()),
        openweather_api_key = set(config.openweather_api_key.is_some()),
        nyc_app_token = set(config.nyc_app_token.is_some()),
        "Credentials"
    );
    info!(
        ny_open_data = %config.ny_open_data_base,
        nyc_open_data = %config.nyc_open_data_base,
        weather = %config.weather_api_base,
        mta_subway = %config.mta_subway_url,
        lat = config.nyc_lat,
        lon = config.nyc_lon,
        "Endpoints"
    );
    for (source, secs) in &config.refresh_intervals {
        info!(source = %source, secs, "Refresh interval");
    }
}
