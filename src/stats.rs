use serde::Serialize;
use serde_json::Value;

use crate::frame::Frame;

/// Computes the arithmetic mean of a slice of values. Returns 0.0 for empty input.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    Null,
    Bool,
    Number,
    String,
    Nested,
    Mixed,
}

impl ColumnKind {
    fn of(value: &Value) -> Self {
        match value {
            Value::Null => ColumnKind::Null,
            Value::Bool(_) => ColumnKind::Bool,
            Value::Number(_) => ColumnKind::Number,
            Value::String(_) => ColumnKind::String,
            Value::Array(_) | Value::Object(_) => ColumnKind::Nested,
        }
    }

    fn merge(self, other: Self) -> Self {
        match (self, other) {
            (ColumnKind::Null, k) | (k, ColumnKind::Null) => k,
            (a, b) if a == b => a,
            _ => ColumnKind::Mixed,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ColumnProfile {
    pub name: String,
    pub kind: ColumnKind,
    pub non_null: usize,
    /// First non-null value, if any.
    pub sample: Option<Value>,
}

/// Shape and per-column summary of a [`Frame`].
#[derive(Debug, Clone, Serialize)]
pub struct FrameProfile {
    pub rows: usize,
    pub columns: Vec<ColumnProfile>,
}

impl FrameProfile {
    pub fn from_frame(frame: &Frame) -> Self {
        let columns = frame
            .columns()
            .iter()
            .map(|name| {
                let mut p = ColumnProfile {
                    name: name.clone(),
                    kind: ColumnKind::Null,
                    non_null: 0,
                    sample: None,
                };

                for value in frame.column(name).into_iter().flatten() {
                    p.kind = p.kind.merge(ColumnKind::of(value));

                    if !value.is_null() {
                        p.non_null += 1;
                        if p.sample.is_none() {
                            p.sample = Some(value.clone());
                        }
                    }
                }

                p
            })
            .collect();

        FrameProfile {
            rows: frame.len(),
            columns,
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.columns.len())
    }
}
