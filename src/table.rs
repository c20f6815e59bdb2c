//! Raw tabular uploads (CSV or JSON rows) before any schema alignment.

use indexmap::IndexMap;
use serde_json::Value;
use std::fmt;

#[derive(Debug, thiserror::Error)]
pub enum TableError {
    #[error("could not read CSV: {0}")]
    Csv(#[from] csv::Error),
    #[error("could not read JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("row {0} is not a JSON object")]
    NotAnObject(usize),
    #[error("expected a JSON object or an array of objects")]
    UnsupportedShape,
    #[error("CSV has no header row")]
    NoHeader,
}

/// Wire encoding of an uploaded batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Csv,
    Json,
}

impl Format {
    /// `.json` uploads are JSON, everything else is treated as CSV.
    pub fn from_filename(name: &str) -> Self {
        if name.to_ascii_lowercase().ends_with(".json") {
            Format::Json
        } else {
            Format::Csv
        }
    }
}

/// A single uploaded value, kept as close to the wire as possible.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Missing,
    Text(String),
    Number(f64),
    Bool(bool),
}

impl Cell {
    fn from_json(v: &Value) -> Self {
        match v {
            Value::Null => Cell::Missing,
            Value::Bool(b) => Cell::Bool(*b),
            Value::Number(n) => n.as_f64().map(Cell::Number).unwrap_or(Cell::Missing),
            Value::String(s) => Cell::Text(s.clone()),
            other => Cell::Text(other.to_string()),
        }
    }

    fn from_csv_field(s: &str) -> Self {
        if s.is_empty() {
            Cell::Missing
        } else {
            Cell::Text(s.to_string())
        }
    }

    /// Numeric view of the cell. Unparseable text, NaN and infinities are
    /// all reported as `None`.
    pub fn to_f64(&self) -> Option<f64> {
        let x = match self {
            Cell::Missing => return None,
            Cell::Number(x) => *x,
            Cell::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            Cell::Text(s) => s.trim().parse::<f64>().ok()?,
        };
        x.is_finite().then_some(x)
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Missing => Ok(()),
            Cell::Text(s) => f.write_str(s),
            Cell::Number(x) => write!(f, "{x}"),
            Cell::Bool(b) => write!(f, "{b}"),
        }
    }
}

/// Row-major table with named columns in upload order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Cell>>,
}

impl Table {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Cell>>) -> Self {
        Self { columns, rows }
    }

    pub fn decode(bytes: &[u8], format: Format) -> Result<Self, TableError> {
        match format {
            Format::Csv => Self::from_csv(bytes),
            Format::Json => Self::from_json(bytes),
        }
    }

    pub fn from_csv(bytes: &[u8]) -> Result<Self, TableError> {
        let mut rdr = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::Headers)
            .from_reader(bytes);
        let columns: Vec<String> = rdr.headers()?.iter().map(str::to_string).collect();
        if columns.iter().all(String::is_empty) {
            return Err(TableError::NoHeader);
        }
        let mut rows = Vec::new();
        for record in rdr.records() {
            let record = record?;
            let mut row: Vec<Cell> = record
                .iter()
                .take(columns.len())
                .map(Cell::from_csv_field)
                .collect();
            row.resize(columns.len(), Cell::Missing);
            rows.push(row);
        }
        Ok(Self { columns, rows })
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, TableError> {
        let value: Value = serde_json::from_slice(bytes)?;
        Self::from_json_value(&value)
    }

    /// Accepts an array of row objects or a single object. Objects may carry
    /// different keys; the column set is their union in first-seen order.
    pub fn from_json_value(value: &Value) -> Result<Self, TableError> {
        let objects = match value {
            Value::Array(items) => items
                .iter()
                .enumerate()
                .map(|(i, v)| v.as_object().ok_or(TableError::NotAnObject(i)))
                .collect::<Result<Vec<_>, _>>()?,
            Value::Object(obj) => vec![obj],
            _ => return Err(TableError::UnsupportedShape),
        };

        let mut index: IndexMap<String, usize> = IndexMap::new();
        for obj in &objects {
            for key in obj.keys() {
                let next = index.len();
                index.entry(key.clone()).or_insert(next);
            }
        }

        let rows = objects
            .iter()
            .map(|obj| {
                let mut row = vec![Cell::Missing; index.len()];
                for (key, v) in obj.iter() {
                    if let Some(&i) = index.get(key) {
                        row[i] = Cell::from_json(v);
                    }
                }
                row
            })
            .collect();

        Ok(Self {
            columns: index.into_keys().collect(),
            rows,
        })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// Values of one column, top to bottom.
    pub fn column(&self, name: &str) -> Option<impl Iterator<Item = &Cell> + '_> {
        let i = self.column_index(name)?;
        Some(self.rows.iter().map(move |row| &row[i]))
    }
}
