//! The tabular value exchanged between Fetcher, Sandbox and Mailer.

use serde_json::Value as JsonValue;
use std::fmt;

/// One cell in a [`Table`].
///
/// A restricted subset of JSON values: strings, numbers, booleans and
/// null. Nested arrays/objects are not representable in a cell, matching
/// the CSV-oriented nature of the system's output (spec.md GLOSSARY:
/// "Table. A rectangular, typed, column-named dataset").
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    /// Missing/null value; serializes to an empty CSV field.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Integer value.
    Int(i64),
    /// Floating point value.
    Float(f64),
    /// String value.
    Text(String),
}

impl Cell {
    /// Render the cell the way it should appear in a CSV field.
    #[must_use]
    pub fn to_csv_field(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::Bool(b) => b.to_string(),
            Self::Int(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::Text(s) => s.clone(),
        }
    }

    /// Best-effort numeric view, used by sandbox aggregate operations.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            Self::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Self::Text(s) => s.parse().ok(),
            Self::Null => None,
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_csv_field())
    }
}

impl From<&JsonValue> for Cell {
    fn from(value: &JsonValue) -> Self {
        match value {
            JsonValue::Null => Self::Null,
            JsonValue::Bool(b) => Self::Bool(*b),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Int(i)
                } else {
                    Self::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            JsonValue::String(s) => Self::Text(s.clone()),
            // Arrays/objects have no place in a cell; render as compact JSON
            // rather than dropping the data silently.
            other => Self::Text(other.to_string()),
        }
    }
}

/// A rectangular, column-named dataset: the unit exchanged between
/// Fetcher, Sandbox and Mailer (spec.md GLOSSARY).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    /// Column names, in display order.
    pub columns: Vec<String>,
    /// Rows, each the same length as `columns`.
    pub rows: Vec<Vec<Cell>>,
}

impl Table {
    /// An empty table with no columns and no rows.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the table has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Build a table from a JSON value following spec.md §4.2's rule: a
    /// top-level array of objects becomes a multi-row table (the union of
    /// keys across elements, in first-seen order, becomes the column
    /// list); a top-level object becomes a one-row table.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is neither an array of objects nor an
    /// object, or an array element is not an object.
    pub fn from_json(value: &JsonValue) -> Result<Self, String> {
        match value {
            JsonValue::Array(items) => Self::from_json_objects(items),
            JsonValue::Object(_) => Self::from_json_objects(std::slice::from_ref(value)),
            _ => Err("expected a JSON array or object".to_string()),
        }
    }

    fn from_json_objects(items: &[JsonValue]) -> Result<Self, String> {
        let mut columns: Vec<String> = Vec::new();
        let mut seen = std::collections::HashSet::new();

        for item in items {
            let obj = item
                .as_object()
                .ok_or_else(|| "expected array elements to be objects".to_string())?;
            for key in obj.keys() {
                if seen.insert(key.clone()) {
                    columns.push(key.clone());
                }
            }
        }

        let mut rows = Vec::with_capacity(items.len());
        for item in items {
            let obj = item.as_object().expect("validated above");
            let row = columns
                .iter()
                .map(|col| obj.get(col).map_or(Cell::Null, Cell::from))
                .collect();
            rows.push(row);
        }

        Ok(Self { columns, rows })
    }

    /// Build a table from parsed CSV records, the header row providing
    /// column names.
    #[must_use]
    pub fn from_csv_records(header: Vec<String>, records: Vec<Vec<String>>) -> Self {
        let rows = records
            .into_iter()
            .map(|record| record.into_iter().map(Cell::Text).collect())
            .collect();
        Self {
            columns: header,
            rows,
        }
    }
}
