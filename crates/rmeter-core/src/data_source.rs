//! Data source manager: named CSV-backed row sources handed out to virtual
//! users under a distribution strategy, with CSV parsing via the `csv` crate.

use std::collections::HashMap;
use std::sync::Mutex;

use rand::Rng;

use crate::error::RmeterError;

/// How rows are handed out to virtual users.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataStrategy {
    /// `user_id % row_count`.
    Sequential,
    /// A uniformly random row each time.
    Random,
    /// A global counter advancing by one on every call, wrapping at the end.
    Circular,
    /// The lowest-numbered row not yet handed out; once exhausted, no more
    /// rows are available (never recycles).
    Unique,
    /// Always row 0, for data every VU should read identically.
    Shared,
}

/// One typed cell value, coerced from its raw CSV string: empty → null,
/// `"true"`/`"false"` → bool, all-digit → int, contains `.` and parses as a
/// float → float, else the original string.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl CellValue {
    fn coerce(raw: &str) -> Self {
        if raw.is_empty() {
            return CellValue::Null;
        }
        if raw.eq_ignore_ascii_case("true") {
            return CellValue::Bool(true);
        }
        if raw.eq_ignore_ascii_case("false") {
            return CellValue::Bool(false);
        }
        if !raw.is_empty() && raw.chars().all(|c| c.is_ascii_digit()) {
            if let Ok(i) = raw.parse::<i64>() {
                return CellValue::Int(i);
            }
        }
        if raw.contains('.') {
            if let Ok(f) = raw.parse::<f64>() {
                return CellValue::Float(f);
            }
        }
        CellValue::String(raw.to_string())
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            CellValue::Null => serde_json::Value::Null,
            CellValue::Bool(b) => serde_json::Value::Bool(*b),
            CellValue::Int(i) => serde_json::Value::Number((*i).into()),
            CellValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            CellValue::String(s) => serde_json::Value::String(s.clone()),
        }
    }
}

/// One row of a loaded CSV source, plus its `_row_number` for traceability.
#[derive(Debug, Clone)]
pub struct DataRow {
    pub row_number: usize,
    pub values: HashMap<String, CellValue>,
}

/// A CSV-backed data source: parsed columns/rows plus the bookkeeping a
/// [`DataStrategy`] needs to hand out the next row.
pub struct CsvDataSource {
    columns: Vec<String>,
    rows: Vec<HashMap<String, CellValue>>,
    strategy: DataStrategy,
    circular_index: Mutex<usize>,
    unique_next: Mutex<usize>,
}

impl CsvDataSource {
    /// Parse CSV content (with header row) into a typed [`CsvDataSource`].
    pub fn from_csv_content(content: &str, strategy: DataStrategy) -> Result<Self, RmeterError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(content.as_bytes());

        let columns: Vec<String> = reader
            .headers()
            .map_err(|e| RmeterError::InvalidInput(format!("failed to read CSV headers: {e}")))?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();

        if columns.is_empty() {
            return Err(RmeterError::InvalidInput("CSV has no columns".to_string()));
        }

        let mut rows = Vec::new();
        for result in reader.records() {
            let record = result.map_err(|e| RmeterError::InvalidInput(format!("failed to read CSV row: {e}")))?;
            let mut row = HashMap::new();
            for (col, field) in columns.iter().zip(record.iter()) {
                row.insert(col.clone(), CellValue::coerce(field.trim()));
            }
            rows.push(row);
        }

        if rows.is_empty() {
            return Err(RmeterError::InvalidInput("CSV has no data rows".to_string()));
        }

        Ok(CsvDataSource {
            columns,
            rows,
            strategy,
            circular_index: Mutex::new(0),
            unique_next: Mutex::new(0),
        })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Hand out a row for `user_id` under this source's configured strategy.
    /// `Unique` returns `None` once every row has been claimed.
    pub fn get_row(&self, user_id: u64) -> Option<DataRow> {
        let n = self.rows.len();
        if n == 0 {
            return None;
        }

        let idx = match self.strategy {
            DataStrategy::Sequential => (user_id as usize) % n,
            DataStrategy::Random => rand::thread_rng().gen_range(0..n),
            DataStrategy::Circular => {
                let mut counter = self.circular_index.lock().unwrap_or_else(|e| e.into_inner());
                let current = *counter;
                *counter = (current + 1) % n;
                current
            }
            DataStrategy::Unique => {
                let mut next = self.unique_next.lock().unwrap_or_else(|e| e.into_inner());
                if *next >= n {
                    return None;
                }
                let current = *next;
                *next += 1;
                current
            }
            DataStrategy::Shared => 0,
        };

        Some(DataRow { row_number: idx, values: self.rows[idx].clone() })
    }
}

/// Registry of named data sources, looked up by scenario templates.
#[derive(Default)]
pub struct DataSourceManager {
    sources: HashMap<String, CsvDataSource>,
}

impl DataSourceManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, source: CsvDataSource) {
        self.sources.insert(name.into(), source);
    }

    pub fn get(&self, name: &str) -> Option<&CsvDataSource> {
        self.sources.get(name)
    }

    pub fn row_for(&self, name: &str, user_id: u64) -> Result<DataRow, RmeterError> {
        self.sources
            .get(name)
            .ok_or_else(|| RmeterError::InvalidInput(format!("no data source named \"{name}\"")))?
            .get_row(user_id)
            .ok_or_else(|| RmeterError::InvalidInput(format!("data source \"{name}\" exhausted")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CSV: &str = "id,name,active,score\n1,alice,true,9.5\n2,bob,false,7\n3,carol,true,\n";

    #[test]
    fn coerces_cell_types() {
        let source = CsvDataSource::from_csv_content(CSV, DataStrategy::Sequential).unwrap();
        let row = source.get_row(0).unwrap();
        assert_eq!(row.values.get("id").unwrap(), &CellValue::Int(1));
        assert_eq!(row.values.get("name").unwrap(), &CellValue::String("alice".to_string()));
        assert_eq!(row.values.get("active").unwrap(), &CellValue::Bool(true));
        assert_eq!(row.values.get("score").unwrap(), &CellValue::Float(9.5));
    }

    #[test]
    fn empty_cell_coerces_to_null() {
        let source = CsvDataSource::from_csv_content(CSV, DataStrategy::Sequential).unwrap();
        let row = source.get_row(2).unwrap();
        assert_eq!(row.values.get("score").unwrap(), &CellValue::Null);
    }

    #[test]
    fn sequential_wraps_by_user_id_modulo_row_count() {
        let source = CsvDataSource::from_csv_content(CSV, DataStrategy::Sequential).unwrap();
        assert_eq!(source.get_row(0).unwrap().row_number, 0);
        assert_eq!(source.get_row(3).unwrap().row_number, 0);
        assert_eq!(source.get_row(4).unwrap().row_number, 1);
    }

    #[test]
    fn shared_always_returns_row_zero() {
        let source = CsvDataSource::from_csv_content(CSV, DataStrategy::Shared).unwrap();
        assert_eq!(source.get_row(0).unwrap().row_number, 0);
        assert_eq!(source.get_row(7).unwrap().row_number, 0);
    }

    #[test]
    fn circular_advances_monotonically_and_wraps() {
        let source = CsvDataSource::from_csv_content(CSV, DataStrategy::Circular).unwrap();
        assert_eq!(source.get_row(0).unwrap().row_number, 0);
        assert_eq!(source.get_row(0).unwrap().row_number, 1);
        assert_eq!(source.get_row(0).unwrap().row_number, 2);
        assert_eq!(source.get_row(0).unwrap().row_number, 0);
    }

    #[test]
    fn unique_hands_out_lowest_available_index_then_exhausts() {
        let source = CsvDataSource::from_csv_content(CSV, DataStrategy::Unique).unwrap();
        assert_eq!(source.get_row(0).unwrap().row_number, 0);
        assert_eq!(source.get_row(0).unwrap().row_number, 1);
        assert_eq!(source.get_row(0).unwrap().row_number, 2);
        assert!(source.get_row(0).is_none());
    }

    #[test]
    fn manager_looks_up_sources_by_name() {
        let mut manager = DataSourceManager::new();
        manager.register("users", CsvDataSource::from_csv_content(CSV, DataStrategy::Sequential).unwrap());
        let row = manager.row_for("users", 1).unwrap();
        assert_eq!(row.values.get("name").unwrap(), &CellValue::String("bob".to_string()));
        assert!(manager.row_for("missing", 0).is_err());
    }
}
