//! Values and result rows
//!
//! The harness talks to the database with the simple-query protocol, so every
//! value arrives as text. `Value::from_text` normalises canonical integers
//! into `Int` so scenarios can compare capacities numerically; anything else
//! stays `Text`. Three variants are enough for the fixtures a scenario reads.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A single column value
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// SQL NULL
    Null,
    /// Integer (any value whose text is a canonical `i64`)
    Int(i64),
    /// Everything else, verbatim
    Text(String),
}

impl Value {
    /// Normalise a text-protocol cell
    ///
    /// Only canonical integers become `Int`: `"007"` and `"+7"` stay text so
    /// that no information is lost.
    pub fn from_text(raw: Option<&str>) -> Self {
        match raw {
            None => Value::Null,
            Some(text) => match text.parse::<i64>() {
                Ok(n) if n.to_string() == text => Value::Int(n),
                _ => Value::Text(text.to_string()),
            },
        }
    }

    /// Integer view
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Text view (integers are not rendered)
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// True for SQL NULL
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Int(n) => write!(f, "{}", n),
            Value::Text(s) => write!(f, "'{}'", s),
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(n as i64)
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

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// One result row, positionally aligned with `RowSet::columns`
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Row {
    /// Cell values in column order
    pub values: Vec<Value>,
}

impl Row {
    /// Wrap cell values
    pub fn new(values: Vec<Value>) -> Self {
        Row { values }
    }
}

/// Everything a statement returned
///
/// For multi-statement text the rows of every row-returning statement are
/// concatenated; `columns` describes the first one.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RowSet {
    /// Column names
    pub columns: Vec<String>,
    /// Returned rows
    pub rows: Vec<Row>,
    /// Rows affected by the last command (INSERT/UPDATE/DELETE), 0 otherwise
    pub rows_affected: u64,
}

impl RowSet {
    /// Result of a statement that returned no rows
    pub fn empty() -> Self {
        RowSet::default()
    }

    /// Build a row set from column names and rows of values
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        RowSet {
            columns,
            rows: rows.into_iter().map(Row::new).collect(),
            rows_affected: 0,
        }
    }

    /// Shorthand for a one-row, one-column result
    pub fn scalar_of(column: &str, value: impl Into<Value>) -> Self {
        RowSet::new(vec![column.to_string()], vec![vec![value.into()]])
    }

    /// Set the affected-row count
    pub fn with_rows_affected(mut self, n: u64) -> Self {
        self.rows_affected = n;
        self
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True when no rows came back
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of a column by name
    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    /// Value at `row` / `column`
    pub fn value(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.column_index(column)?;
        self.rows.get(row)?.values.get(idx)
    }

    /// First column of the first row
    pub fn scalar(&self) -> Option<&Value> {
        self.rows.first()?.values.first()
    }

    /// All values of one column, top to bottom
    pub fn column_values(&self, column: &str) -> Vec<&Value> {
        match self.column_index(column) {
            Some(idx) => self.rows.iter().filter_map(|r| r.values.get(idx)).collect(),
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn from_text_normalises_integers() {
        assert_eq!(Value::from_text(Some("42")), Value::Int(42));
        assert_eq!(Value::from_text(Some("-1")), Value::Int(-1));
        assert_eq!(Value::from_text(None), Value::Null);
        assert_eq!(Value::from_text(Some("abc")), Value::Text("abc".to_string()));
    }

    #[test]
    fn from_text_keeps_non_canonical_numbers_as_text() {
        assert_eq!(Value::from_text(Some("007")), Value::Text("007".to_string()));
        assert_eq!(Value::from_text(Some("+7")), Value::Text("+7".to_string()));
        assert_eq!(Value::from_text(Some("1.5")), Value::Text("1.5".to_string()));
    }

    #[test]
    fn display_distinguishes_types() {
        assert_eq!(Value::Int(3).to_string(), "3");
        assert_eq!(Value::from("3").to_string(), "'3'");
        assert_eq!(Value::Null.to_string(), "NULL");
    }

    #[test]
    fn row_set_lookup_by_column() {
        let rows = RowSet::new(
            vec!["id".to_string(), "capacity".to_string()],
            vec![
                vec![Value::Int(1), Value::Int(10)],
                vec![Value::Int(2), Value::Null],
            ],
        );
        assert_eq!(rows.len(), 2);
        assert_eq!(rows.value(0, "capacity"), Some(&Value::Int(10)));
        assert_eq!(rows.value(1, "capacity"), Some(&Value::Null));
        assert_eq!(rows.value(2, "capacity"), None);
        assert_eq!(rows.value(0, "missing"), None);
        assert_eq!(rows.scalar(), Some(&Value::Int(1)));
        assert_eq!(rows.column_values("id"), vec![&Value::Int(1), &Value::Int(2)]);
    }

    #[test]
    fn empty_row_set_has_no_scalar() {
        let rows = RowSet::empty().with_rows_affected(3);
        assert!(rows.is_empty());
        assert!(rows.scalar().is_none());
        assert_eq!(rows.rows_affected, 3);
    }

    #[test]
    fn values_serialize_untagged() {
        let json = serde_json::to_string(&vec![Value::Null, Value::Int(1), Value::from("x")]).unwrap();
        assert_eq!(json, "[null,1,\"x\"]");
    }

    proptest! {
        #[test]
        fn canonical_integers_round_trip(n in any::<i64>()) {
            let text = n.to_string();
            let value = Value::from_text(Some(&text));
            prop_assert_eq!(value.as_i64(), Some(n));
        }

        #[test]
        fn text_is_never_lost(s in "\\PC*") {
            let value = Value::from_text(Some(&s));
            match value {
                Value::Int(n) => prop_assert_eq!(n.to_string(), s),
                Value::Text(t) => prop_assert_eq!(t, s),
                Value::Null => prop_assert!(false, "text became NULL"),
            }
        }
    }
}
