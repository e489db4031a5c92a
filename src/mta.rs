//! Subway performance datasets from the NY Open Data (Socrata) API.

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::FetchError;
use crate::fetch::auth::UrlParam;
use crate::fetch::{BasicClient, HttpClient, fetch_json};
use crate::frame::{Frame, clean_column_names};
use crate::output::{save_dataframe, timestamp_now, write_json};
use crate::retry::RetryPolicy;

/// Dataset keys and their Socrata identifiers.
static DATASETS: &[(&str, &str)] = &[
    ("terminal_otp", "f6rf-2a3t"),
    ("mean_distance_failures", "e7fs-9m87"),
    ("additional_platform_time", "i9wp-a4ja"),
];

pub const TERMINAL_OTP: &str = "terminal_otp";
pub const PLATFORM_TIME: &str = "additional_platform_time";
pub const PLATFORM_TIMES_ARTIFACT: &str = "platform_times";

const OPEN_DATA_TIMEOUT: Duration = Duration::from_secs(30);
const FETCH_LIMIT: usize = 2000;
const APP_TOKEN_PARAM: &str = "$$app_token";

/// Written after a full fetch cycle as `fetch_summary_<ts>.json`.
#[derive(Debug, Serialize)]
pub struct FetchSummary {
    pub timestamp: DateTime<Local>,
    pub datasets_fetched: Vec<String>,
    pub record_counts: BTreeMap<String, usize>,
}

pub struct MtaFetcher {
    client: Box<dyn HttpClient>,
    base_url: String,
    save_dir: PathBuf,
    config: Config,
    retry: RetryPolicy,
}

impl MtaFetcher {
    /// Creates the fetcher with its `<raw>/mta` and processed output
    /// directories. The app token, when configured, is sent with every request
    /// for higher rate limits.
    pub fn new(config: &Config) -> Result<Self> {
        let basic = BasicClient::with_timeout(OPEN_DATA_TIMEOUT)?;
        let client: Box<dyn HttpClient> = match &config.nyc_app_token {
            Some(token) => Box::new(UrlParam::new(basic, APP_TOKEN_PARAM, token)),
            None => Box::new(basic),
        };

        let save_dir = config.raw_data_dir.join("mta");
        for dir in [&save_dir, &config.processed_data_dir] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }

        Ok(Self {
            client,
            base_url: config.ny_open_data_base.clone(),
            save_dir,
            config: config.clone(),
            retry: RetryPolicy::new(2, Duration::from_secs(1)),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn save_dir(&self) -> &Path {
        &self.save_dir
    }

    /// Fetches up to `limit` records of the dataset registered under `key`,
    /// optionally filtered server-side by a SoQL `where_clause`.
    #[tracing::instrument(skip(self))]
    pub async fn fetch_dataset(
        &self,
        key: &str,
        limit: usize,
        where_clause: Option<&str>,
    ) -> Result<Vec<Value>, FetchError> {
        let Some(id) = dataset_id(key) else {
            error!(dataset = key, "Unknown dataset");
            return Err(FetchError::UnknownDataset(key.to_string()));
        };

        let url = format!("{}/{}.json", self.base_url, id);
        let mut params = vec![("$limit", limit.to_string()), ("$order", ":id".to_string())];
        if let Some(clause) = where_clause {
            params.push(("$where", clause.to_string()));
        }

        let body = fetch_json(&*self.client, &url, &params)
            .await
            .inspect_err(|e| {
                error!(dataset = key, kind = e.kind(), error = %e, "Failed to fetch dataset")
            })?;

        match body {
            Value::Array(records) => Ok(records),
            other => {
                let e = FetchError::Parse(format!(
                    "expected a JSON array, got {}",
                    json_type(&other)
                ));
                error!(dataset = key, error = %e, "Failed to fetch dataset");
                Err(e)
            }
        }
    }

    /// Fetches on-time performance by line, saves it as
    /// `terminal_otp_<ts>.csv` plus a processed copy, and logs the per-line average when the data
    /// has a `line` column. Returns `Ok(None)` when the API has no rows.
    #[tracing::instrument(skip(self))]
    pub async fn fetch_terminal_otp(&self) -> Result<Option<Frame>> {
        info!("Fetching terminal on-time performance");

        let records = self
            .retry
            .run(move || self.fetch_dataset(TERMINAL_OTP, FETCH_LIMIT, None))
            .await?;

        let Some(frame) = self.normalize_and_save(&records, TERMINAL_OTP, "otp")? else {
            return Ok(None);
        };

        if frame.has_column("line") {
            match line_summary(&frame) {
                Some(summary) => {
                    info!("On-time performance by line");
                    for (line, otp) in &summary {
                        info!(line = %line, otp, "Line on-time performance");
                    }
                }
                None => info!("No otp column, skipping line summary"),
            }
        }

        Ok(Some(frame))
    }

    /// Fetches additional platform time by line and saves it as
    /// `platform_times_<ts>.csv`. Returns `Ok(None)` when the API has no rows.
    #[tracing::instrument(skip(self))]
    pub async fn fetch_platform_wait_times(&self) -> Result<Option<Frame>> {
        info!("Fetching platform wait times");

        let records = self
            .retry
            .run(move || self.fetch_dataset(PLATFORM_TIME, FETCH_LIMIT, None))
            .await?;

        let Some(frame) =
            self.normalize_and_save(&records, PLATFORM_TIMES_ARTIFACT, "platform time")?
        else {
            return Ok(None);
        };

        info!(columns = ?frame.columns(), "Columns found");
        Ok(Some(frame))
    }

    /// Runs every dataset fetch and writes `fetch_summary_<ts>.json` when at
    /// least one produced data. Datasets that failed or came back empty are
    /// logged and left out of both the result and the summary.
    #[tracing::instrument(skip(self))]
    pub async fn fetch_all(&self) -> Result<BTreeMap<String, Frame>> {
        info!("Starting mta data fetch");

        let mut fetched: Vec<(&str, Frame)> = Vec::new();

        match self.fetch_terminal_otp().await {
            Ok(Some(frame)) => fetched.push((TERMINAL_OTP, frame)),
            Ok(None) => {}
            Err(e) => error!(dataset = TERMINAL_OTP, error = %e, "Dataset fetch failed"),
        }

        match self.fetch_platform_wait_times().await {
            Ok(Some(frame)) => fetched.push((PLATFORM_TIMES_ARTIFACT, frame)),
            Ok(None) => {}
            Err(e) => {
                error!(dataset = PLATFORM_TIMES_ARTIFACT, error = %e, "Dataset fetch failed")
            }
        }

        if !fetched.is_empty() {
            let summary = FetchSummary {
                timestamp: Local::now(),
                datasets_fetched: fetched.iter().map(|(name, _)| name.to_string()).collect(),
                record_counts: fetched
                    .iter()
                    .map(|(name, frame)| (name.to_string(), frame.len()))
                    .collect(),
            };
            let path = self
                .save_dir
                .join(format!("fetch_summary_{}.json", timestamp_now()));
            write_json(&path, &summary)?;
            info!(path = %path.display(), "Fetch complete, summary saved");
        } else {
            warn!("No mta datasets fetched");
        }

        Ok(fetched
            .into_iter()
            .map(|(name, frame)| (name.to_string(), frame))
            .collect())
    }

    /// Normalizes `records`, writes `<raw>/mta/<artifact>_<ts>.csv`, then hands
    /// the frame to [`save_dataframe`] for the processed copy.
    fn normalize_and_save(
        &self,
        records: &[Value],
        artifact: &str,
        label: &str,
    ) -> Result<Option<Frame>> {
        let frame = Frame::from_records(records);
        if frame.is_empty() {
            warn!("No {label} data received");
            return Ok(None);
        }

        let frame = clean_column_names(frame);

        let path = self
            .save_dir
            .join(format!("{artifact}_{}.csv", timestamp_now()));
        frame.write_csv(&path)?;
        info!(records = frame.len(), path = %path.display(), "Saved {label} records");

        save_dataframe(&self.config, &frame, artifact, true)?;

        Ok(Some(frame))
    }
}

pub fn dataset_id(key: &str) -> Option<&'static str> {
    DATASETS
        .iter()
        .find(|(name, _)| *name == key)
        .map(|(_, id)| *id)
}

/// Mean `otp` per `line`, or `None` when either column is missing.
pub fn line_summary(frame: &Frame) -> Option<BTreeMap<String, f64>> {
    frame.group_mean("line", "otp")
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
