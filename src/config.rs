//! Process-wide settings resolved from the environment.
//!
//! A [`Config`] is built once by the entry point and passed by reference to
//! every fetcher. Missing credentials are not an error here; the fetchers
//! that need them report [`FetchError::MissingCredential`](crate::error::FetchError)
//! when asked to use them.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const DEFAULT_DATABASE_URL: &str = "sqlite:///empire_state.db";
pub const MTA_SUBWAY_URL: &str =
    "https://api-endpoint.mta.info/Dataservice/mtagtfsfeeds/nyct%2Fgtfs";
pub const NYC_OPEN_DATA_BASE: &str = "https://data.cityofnewyork.us/resource";
pub const NY_OPEN_DATA_BASE: &str = "https://data.ny.gov/resource";
pub const WEATHER_API_BASE: &str = "https://api.openweathermap.org/data/2.5";

/// Manhattan center.
pub const NYC_LAT: f64 = 40.7580;
pub const NYC_LON: f64 = -73.9855;

/// Intended refresh interval per data source, in seconds. Informational only.
static REFRESH_INTERVALS: &[(&str, u64)] = &[
    ("mta", 60),
    ("weather", 600),
    ("events", 3600),
    ("crime", 86400),
];

#[derive(Debug, Clone)]
pub struct Config {
    pub raw_data_dir: PathBuf,
    pub processed_data_dir: PathBuf,
    pub reports_dir: PathBuf,
    pub logs_dir: PathBuf,

    // credentials
    pub mta_api_key: String,
    pub openweather_api_key: Option<String>,
    pub nyc_app_token: Option<String>,

    pub database_url: String,

    // endpoints
    pub mta_subway_url: String,
    pub nyc_open_data_base: String,
    pub ny_open_data_base: String,
    pub weather_api_base: String,

    pub nyc_lat: f64,
    pub nyc_lon: f64,

    pub refresh_intervals: BTreeMap<String, u64>,
}

impl Config {
    /// Resolves settings from the process environment, with paths relative to `root`.
    pub fn from_env(root: impl AsRef<Path>) -> Self {
        Self::from_vars(root, |name| std::env::var(name).ok())
    }

    /// Resolves settings through `lookup` instead of the process environment.
    pub fn from_vars<F>(root: impl AsRef<Path>, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let root = root.as_ref();
        let data_dir = root.join("data");
        // An empty variable counts as unset.
        let non_empty = |name: &str| lookup(name).filter(|v| !v.is_empty());

        Self {
            raw_data_dir: data_dir.join("raw"),
            processed_data_dir: data_dir.join("processed"),
            reports_dir: root.join("reports"),
            logs_dir: root.join("logs"),
            mta_api_key: lookup("MTA_API_KEY").unwrap_or_default(),
            openweather_api_key: non_empty("OPENWEATHER_API_KEY"),
            nyc_app_token: non_empty("NYC_APP_TOKEN"),
            database_url: lookup("DATABASE_URL")
                .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            mta_subway_url: MTA_SUBWAY_URL.to_string(),
            nyc_open_data_base: NYC_OPEN_DATA_BASE.to_string(),
            ny_open_data_base: NY_OPEN_DATA_BASE.to_string(),
            weather_api_base: WEATHER_API_BASE.to_string(),
            nyc_lat: NYC_LAT,
            nyc_lon: NYC_LON,
            refresh_intervals: REFRESH_INTERVALS
                .iter()
                .map(|(name, secs)| (name.to_string(), *secs))
                .collect(),
        }
    }

    /// Creates every output directory that does not exist yet.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [
            &self.raw_data_dir,
            &self.processed_data_dir,
            &self.reports_dir,
            &self.logs_dir,
        ] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
            debug!(dir = %dir.display(), "Output directory ready");
        }
        Ok(())
    }

    pub fn refresh_interval(&self, source: &str) -> Option<u64> {
        self.refresh_intervals.get(source).copied()
    }
}
