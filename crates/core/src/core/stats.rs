//! Key/value statistics and append-only log tables.
//!
//! Hooks write trial- and epoch-level values here; termination predicates
//! read them back. All keys a predicate reads must be initialized at run
//! start; a missing key is a logic defect and is surfaced as a fatal
//! [`StatError`], never defaulted.

use core::fmt;

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::error::StatError;
use crate::times::{Mode, TimeScale};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StatValue {
    Float(f64),
    Int(i64),
    Str(String),
}

impl StatValue {
    fn kind(&self) -> &'static str {
        match self {
            StatValue::Float(_) => "float",
            StatValue::Int(_) => "int",
            StatValue::Str(_) => "string",
        }
    }
}

impl fmt::Display for StatValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatValue::Float(v) => write!(f, "{v:.4}"),
            StatValue::Int(v) => write!(f, "{v}"),
            StatValue::Str(v) => f.write_str(v),
        }
    }
}

/// Current scalar/string statistics, keyed by stable names.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Stats {
    vals: HashMap<String, StatValue>,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_float(&mut self, key: impl Into<String>, v: f64) {
        self.vals.insert(key.into(), StatValue::Float(v));
    }

    pub fn set_int(&mut self, key: impl Into<String>, v: i64) {
        self.vals.insert(key.into(), StatValue::Int(v));
    }

    pub fn set_str(&mut self, key: impl Into<String>, v: impl Into<String>) {
        self.vals.insert(key.into(), StatValue::Str(v.into()));
    }

    pub fn contains(&self, key: &str) -> bool {
        self.vals.contains_key(key)
    }

    pub fn value(&self, key: &str) -> Result<&StatValue, StatError> {
        self.vals
            .get(key)
            .ok_or_else(|| StatError::Missing(key.to_string()))
    }

    pub fn float(&self, key: &str) -> Result<f64, StatError> {
        match self.value(key)? {
            StatValue::Float(v) => Ok(*v),
            other => Err(StatError::Kind {
                key: key.to_string(),
                actual: other.kind(),
                wanted: "float",
            }),
        }
    }

    pub fn int(&self, key: &str) -> Result<i64, StatError> {
        match self.value(key)? {
            StatValue::Int(v) => Ok(*v),
            other => Err(StatError::Kind {
                key: key.to_string(),
                actual: other.kind(),
                wanted: "int",
            }),
        }
    }

    pub fn str(&self, key: &str) -> Result<&str, StatError> {
        match self.value(key)? {
            StatValue::Str(v) => Ok(v.as_str()),
            other => Err(StatError::Kind {
                key: key.to_string(),
                actual: other.kind(),
                wanted: "string",
            }),
        }
    }

    /// One-line "Key: value" rendering of the given keys, for counter
    /// displays and log lines. Unset keys render as `-`.
    pub fn print(&self, keys: &[&str]) -> String {
        let mut out = String::new();
        for (i, k) in keys.iter().enumerate() {
            if i > 0 {
                out.push(' ');
            }
            out.push_str(k);
            out.push_str(": ");
            match self.vals.get(*k) {
                Some(v) => out.push_str(&v.to_string()),
                None => out.push('-'),
            }
        }
        out
    }
}

/// Append-only log tables, one per (mode, scale), with a shared column
/// declaration. A row is a snapshot of the declared columns taken from
/// [`Stats`] at a scale boundary.
#[derive(Debug, Clone, Default)]
pub struct LogBook {
    columns: Vec<String>,
    tables: HashMap<(Mode, TimeScale), Vec<Vec<StatValue>>>,
}

impl LogBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a column. Order of declaration is column order.
    pub fn add_column(&mut self, key: impl Into<String>) {
        let key = key.into();
        if !self.columns.iter().any(|c| *c == key) {
            self.columns.push(key);
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Snapshot the declared columns into the (mode, scale) table.
    /// Every declared column must be present in `stats`.
    pub fn commit_row(
        &mut self,
        mode: Mode,
        scale: TimeScale,
        stats: &Stats,
    ) -> Result<(), StatError> {
        let mut row = Vec::with_capacity(self.columns.len());
        for col in &self.columns {
            row.push(stats.value(col)?.clone());
        }
        self.tables.entry((mode, scale)).or_default().push(row);
        Ok(())
    }

    pub fn rows(&self, mode: Mode, scale: TimeScale) -> &[Vec<StatValue>] {
        self.tables
            .get(&(mode, scale))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn reset(&mut self, mode: Mode, scale: TimeScale) {
        if let Some(t) = self.tables.get_mut(&(mode, scale)) {
            t.clear();
        }
    }

    /// Column values of a table as floats, for end-of-run aggregates.
    pub fn column_floats(
        &self,
        mode: Mode,
        scale: TimeScale,
        key: &str,
    ) -> Result<Vec<f64>, StatError> {
        let idx = self
            .columns
            .iter()
            .position(|c| c == key)
            .ok_or_else(|| StatError::Missing(key.to_string()))?;
        let mut out = Vec::new();
        for row in self.rows(mode, scale) {
            match &row[idx] {
                StatValue::Float(v) => out.push(*v),
                StatValue::Int(v) => out.push(*v as f64),
                other => {
                    return Err(StatError::Kind {
                        key: key.to_string(),
                        actual: other.kind(),
                        wanted: "float",
                    })
                }
            }
        }
        Ok(out)
    }
}
