use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// A single cell. Raw files arrive as `Text`; coercion turns metric columns
/// into `Number` and date columns into `Date`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub enum Value {
    #[default]
    Null,
    Text(String),
    Number(f64),
    Date(NaiveDate),
}

impl Value {
    pub fn text(s: impl Into<String>) -> Self {
        Value::Text(s.into())
    }

    pub fn is_null(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Text(s) => s.is_empty(),
            Value::Number(n) => n.is_nan(),
            Value::Date(_) => false,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) if !n.is_nan() => Some(*n),
            Value::Text(s) => crate::utils::parse_number(s),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Value::Date(d) => Some(*d),
            Value::Text(s) => crate::utils::parse_date(s),
            _ => None,
        }
    }

    /// Renders the value the way it is written back to a flat store and the
    /// way it participates in placement names.
    pub fn render(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Text(s) => s.clone(),
            Value::Number(n) if n.is_nan() => String::new(),
            Value::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    format!("{}", *n as i64)
                } else {
                    format!("{}", n)
                }
            }
            Value::Date(d) => d.format("%Y-%m-%d").to_string(),
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<NaiveDate> for Value {
    fn from(d: NaiveDate) -> Self {
        Value::Date(d)
    }
}

impl From<Option<f64>> for Value {
    fn from(n: Option<f64>) -> Self {
        n.map(Value::Number).unwrap_or(Value::Null)
    }
}

pub type Row = BTreeMap<String, Value>;

pub trait RowExt {
    fn number(&self, column: &str) -> Option<f64>;
    fn number_or_zero(&self, column: &str) -> f64;
    fn date(&self, column: &str) -> Option<NaiveDate>;
    fn rendered(&self, column: &str) -> String;
    fn has_value(&self, column: &str) -> bool;
}

impl RowExt for Row {
    fn number(&self, column: &str) -> Option<f64> {
        self.get(column).and_then(Value::as_f64)
    }

    fn number_or_zero(&self, column: &str) -> f64 {
        self.number(column).unwrap_or(0.0)
    }

    fn date(&self, column: &str) -> Option<NaiveDate> {
        self.get(column).and_then(Value::as_date)
    }

    fn rendered(&self, column: &str) -> String {
        self.get(column).map(Value::render).unwrap_or_default()
    }

    fn has_value(&self, column: &str) -> bool {
        self.get(column).is_some_and(|v| !v.is_null())
    }
}

/// Column-ordered collection of rows. Rows may omit columns; a missing cell
/// reads as null.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl Table {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn from_rows(rows: Vec<Row>) -> Self {
        let mut table = Table::default();
        for row in rows {
            table.push(row);
        }
        table
    }

    /// Builds a table from a header line and string records.
    pub fn from_records(headers: Vec<String>, records: Vec<Vec<String>>) -> Self {
        let rows = records
            .into_iter()
            .map(|record| {
                headers
                    .iter()
                    .cloned()
                    .zip(record.into_iter().map(Value::Text))
                    .collect::<Row>()
            })
            .collect();
        Self {
            columns: headers,
            rows,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }

    pub fn ensure_column(&mut self, column: &str) {
        if !self.has_column(column) {
            self.columns.push(column.to_string());
        }
    }

    pub fn push(&mut self, row: Row) {
        for key in row.keys() {
            self.ensure_column(key);
        }
        self.rows.push(row);
    }

    pub fn drop_columns(&mut self, columns: &[String]) {
        let drop: HashSet<&String> = columns.iter().collect();
        self.columns.retain(|c| !drop.contains(c));
        for row in &mut self.rows {
            row.retain(|k, _| !drop.contains(k));
        }
    }

    pub fn set_column<F>(&mut self, column: &str, mut f: F)
    where
        F: FnMut(&Row) -> Value,
    {
        self.ensure_column(column);
        for row in &mut self.rows {
            let value = f(row);
            row.insert(column.to_string(), value);
        }
    }

    /// Appends `other`, widening the column set to the union of both.
    pub fn append(&mut self, other: Table) {
        for column in &other.columns {
            self.ensure_column(column);
        }
        self.rows.extend(other.rows);
    }

    pub fn concat(tables: Vec<Table>) -> Table {
        let mut out = Table::default();
        for table in tables {
            out.append(table);
        }
        out
    }

    pub fn column_sum(&self, column: &str) -> f64 {
        self.rows.iter().map(|r| r.number_or_zero(column)).sum()
    }

    /// Keeps the last row per key, preserving the position of that last row.
    pub fn dedup_last_by<F>(&mut self, key: F)
    where
        F: Fn(&Row) -> String,
    {
        let mut seen = HashSet::new();
        let mut kept: Vec<Row> = Vec::with_capacity(self.rows.len());
        for row in self.rows.drain(..).rev() {
            if seen.insert(key(&row)) {
                kept.push(row);
            }
        }
        kept.reverse();
        self.rows = kept;
    }

    /// Keeps the first row per key.
    pub fn dedup_first_by<F>(&mut self, key: F)
    where
        F: Fn(&Row) -> String,
    {
        let mut seen = HashSet::new();
        self.rows.retain(|row| seen.insert(key(row)));
    }
}
