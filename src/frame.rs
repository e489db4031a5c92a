//! In-memory tabular dataset built from JSON records.
//!
//! A [`Frame`] keeps columns in first-seen order and stores one
//! [`serde_json::Value`] per cell, so records fetched from Socrata can be
//! persisted without committing to a schema.

use anyhow::{Context, Result};
use csv::{ReaderBuilder, WriterBuilder};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use tracing::{debug, warn};

use crate::stats::mean;

static NULL: Value = Value::Null;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl Frame {
    /// Builds a frame from a list of JSON objects. Keys missing from a record
    /// become `null`; records that are not objects are skipped.
    pub fn from_records(records: &[Value]) -> Self {
        let mut columns: Vec<String> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();

        for record in records {
            let Some(obj) = record.as_object() else {
                continue;
            };
            for key in obj.keys() {
                if !index.contains_key(key) {
                    index.insert(key.clone(), columns.len());
                    columns.push(key.clone());
                }
            }
        }

        let mut skipped = 0usize;
        let rows = records
            .iter()
            .filter_map(|record| {
                let Some(obj) = record.as_object() else {
                    skipped += 1;
                    return None;
                };
                Some(
                    columns
                        .iter()
                        .map(|c| obj.get(c).cloned().unwrap_or(Value::Null))
                        .collect(),
                )
            })
            .collect();

        if skipped > 0 {
            debug!(skipped, "Skipped non-object records");
        }

        Self { columns, rows }
    }

    /// Builds a frame from explicit columns and rows. Rows shorter than the
    /// header are padded with `null`, longer rows are truncated.
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        let width = columns.len();
        let rows = rows
            .into_iter()
            .map(|mut row| {
                row.resize(width, Value::Null);
                row
            })
            .collect();
        Self { columns, rows }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    /// Values of column `name`, top to bottom.
    pub fn column(&self, name: &str) -> Option<impl Iterator<Item = &Value>> {
        let idx = self.columns.iter().position(|c| c == name)?;
        Some(self.rows.iter().map(move |row| row.get(idx).unwrap_or(&NULL)))
    }

    /// Mean of the numeric values in `value_col` for each distinct value of
    /// `key_col`, rounded to two decimals.
    ///
    /// Numbers stored as strings (the usual Socrata encoding) are parsed.
    /// Rows with a null key and groups with no numeric value are dropped.
    pub fn group_mean(&self, key_col: &str, value_col: &str) -> Option<BTreeMap<String, f64>> {
        let keys = self.column(key_col)?;
        let values = self.column(value_col)?;

        let mut groups: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        for (key, value) in keys.zip(values) {
            let Some(key) = cell_text(key) else {
                continue;
            };
            let entry = groups.entry(key).or_default();
            if let Some(v) = as_number(value) {
                entry.push(v);
            }
        }

        Some(
            groups
                .into_iter()
                .filter(|(_, series)| !series.is_empty())
                .map(|(key, series)| (key, (mean(&series) * 100.0).round() / 100.0))
                .collect(),
        )
    }

    /// Writes the frame as CSV with a header row.
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let file =
            File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
        let mut writer = WriterBuilder::new().from_writer(file);

        writer.write_record(&self.columns)?;
        for row in &self.rows {
            writer.write_record(row.iter().map(|v| cell_text(v).unwrap_or_default()))?;
        }
        writer.flush()?;

        Ok(())
    }

    /// Reads a CSV with a header row. Every cell comes back as a string;
    /// empty cells become `null`.
    pub fn read_csv(path: &Path) -> Result<Self> {
        let mut reader = ReaderBuilder::new()
            .flexible(true)
            .from_path(path)
            .with_context(|| format!("failed to open {}", path.display()))?;

        let columns: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            rows.push(
                record
                    .iter()
                    .map(|cell| {
                        if cell.is_empty() {
                            Value::Null
                        } else {
                            Value::String(cell.to_string())
                        }
                    })
                    .collect(),
            );
        }

        Ok(Self::new(columns, rows))
    }

    /// Writes a gzip-compressed JSON snapshot that reloads without any type loss.
    pub fn write_snapshot(&self, path: &Path) -> Result<()> {
        let file =
            File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
        let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::fast());
        serde_json::to_writer(&mut encoder, self)?;
        encoder.finish()?.flush()?;
        Ok(())
    }

    pub fn read_snapshot(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        let decoder = GzDecoder::new(BufReader::new(file));
        Ok(serde_json::from_reader(decoder)?)
    }
}

/// Lowercases every column label and maps spaces and hyphens to underscores.
///
/// When two labels normalize to the same name the later column's values
/// replace the earlier one's, and the column stays at the earlier position.
pub fn clean_column_names(frame: Frame) -> Frame {
    let Frame { columns, rows } = frame;

    let mut cleaned: Vec<String> = Vec::with_capacity(columns.len());
    // source column index -> target column index
    let mut target = Vec::with_capacity(columns.len());
    for col in &columns {
        let name = clean_name(col);
        match cleaned.iter().position(|c| *c == name) {
            Some(existing) => {
                warn!(
                    column = %col,
                    normalized = %name,
                    "Column name collision, keeping later values"
                );
                target.push(existing);
            }
            None => {
                target.push(cleaned.len());
                cleaned.push(name);
            }
        }
    }

    if cleaned.len() == columns.len() {
        return Frame {
            columns: cleaned,
            rows,
        };
    }

    let width = cleaned.len();
    let rows = rows
        .into_iter()
        .map(|row| {
            let mut out = vec![Value::Null; width];
            for (value, &dst) in row.into_iter().zip(&target) {
                out[dst] = value;
            }
            out
        })
        .collect();

    Frame {
        columns: cleaned,
        rows,
    }
}

fn clean_name(name: &str) -> String {
    name.to_lowercase().replace([' ', '-'], "_")
}

/// Text form of a cell as written to CSV. `None` for null.
fn cell_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
