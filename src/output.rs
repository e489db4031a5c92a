//! Persistence helpers for fetched data.
//!
//! Every artifact is written once under a timestamped name; nothing here
//! updates a file in place.

use anyhow::{Context, Result};
use chrono::Local;
use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::frame::Frame;
use crate::stats::FrameProfile;

pub const CSV_EXTENSION: &str = "csv";
pub const SNAPSHOT_EXTENSION: &str = "snapshot.gz";

/// Local wall-clock time as `YYYYMMDD_HHMMSS`, used as an artifact suffix.
pub fn timestamp_now() -> String {
    Local::now().format("%Y%m%d_%H%M%S").to_string()
}

/// Writes `frame` to the processed-data directory as CSV and as a binary
/// snapshot sharing one base name, and returns `(csv_path, snapshot_path)`.
///
/// When `timestamp` is set the base name gets a `_<timestamp_now()>` suffix.
/// The two writes are independent: a failure in the second leaves the first
/// file in place.
pub fn save_dataframe(
    config: &Config,
    frame: &Frame,
    name: &str,
    timestamp: bool,
) -> Result<(PathBuf, PathBuf)> {
    let name = if timestamp {
        format!("{name}_{}", timestamp_now())
    } else {
        name.to_string()
    };

    let csv_path = config
        .processed_data_dir
        .join(format!("{name}.{CSV_EXTENSION}"));
    frame.write_csv(&csv_path)?;

    let snapshot_path = config
        .processed_data_dir
        .join(format!("{name}.{SNAPSHOT_EXTENSION}"));
    frame.write_snapshot(&snapshot_path)?;

    debug!(
        csv = %csv_path.display(),
        snapshot = %snapshot_path.display(),
        rows = frame.len(),
        "Saved dataframe"
    );
    Ok((csv_path, snapshot_path))
}

/// Reloads a frame written by [`save_dataframe`], picking the decoder from the extension.
pub fn load_dataframe(path: &Path) -> Result<Frame> {
    let is_snapshot = path
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.ends_with(SNAPSHOT_EXTENSION));

    if is_snapshot {
        Frame::read_snapshot(path)
    } else {
        Frame::read_csv(path)
    }
}

/// Parses `path` as JSON, returning an empty object if the file cannot be
/// read or parsed. A missing file and a corrupt one look the same to callers.
pub fn safe_json_load(path: &Path) -> Value {
    let loaded: Result<Value> = fs::read_to_string(path)
        .map_err(anyhow::Error::from)
        .and_then(|content| Ok(serde_json::from_str(&content)?));

    match loaded {
        Ok(value) => value,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Couldn't load json");
            Value::Object(serde_json::Map::new())
        }
    }
}

/// Writes `value` as pretty-printed JSON.
pub fn write_json(path: &Path, value: &impl Serialize) -> Result<()> {
    let body = serde_json::to_string_pretty(value)?;
    fs::write(path, body).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

/// Finds the newest `<prefix>_*.<extension>` file in `dir`.
///
/// Names embed a `YYYYMMDD_HHMMSS` suffix, so the lexicographically greatest
/// name is the most recent one.
pub fn latest_artifact(dir: &Path, prefix: &str, extension: &str) -> Result<Option<PathBuf>> {
    let head = format!("{prefix}_");
    let tail = format!(".{extension}");

    let mut matches = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            if name.starts_with(&head) && name.ends_with(&tail) {
                matches.push(entry.path());
            }
        }
    }

    matches.sort();
    Ok(matches.pop())
}

/// Logs a frame profile: shape, columns, and one sample per column.
pub fn print_profile(profile: &FrameProfile) {
    let (rows, cols) = profile.shape();
    info!(rows, cols, "Shape");

    let names: Vec<&str> = profile.columns.iter().map(|c| c.name.as_str()).collect();
    info!(columns = ?names, "Columns");

    for column in &profile.columns {
        match &column.sample {
            Some(sample) => info!(
                column = %column.name,
                kind = ?column.kind,
                non_null = column.non_null,
                sample = %sample,
                "Column"
            ),
            None => info!(column = %column.name, "Column is all null"),
        }
    }
}
