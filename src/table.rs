use serde_json::Value;

use crate::payload::Record;

/// Rectangular view of a set of records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    /// Columns are the union of record keys in first-seen order. Missing,
    /// null and blank cells are filled with `default_value`.
    pub fn from_records(records: &[Record], default_value: &str) -> Self {
        let mut columns: Vec<String> = Vec::new();
        for record in records {
            for key in record.keys() {
                if !columns.iter().any(|c| c == key) {
                    columns.push(key.clone());
                }
            }
        }

        let rows = records
            .iter()
            .map(|record| {
                columns
                    .iter()
                    .map(|col| cell(record.get(col), default_value))
                    .collect()
            })
            .collect();

        Self { columns, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }
}

fn cell(value: Option<&Value>, default_value: &str) -> String {
    match value {
        None | Some(Value::Null) => default_value.to_string(),
        Some(Value::String(s)) if s.trim().is_empty() => default_value.to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}
