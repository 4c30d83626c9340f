use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::error::{FeatureError, Result};

/// A single cell read out of a [`GameTable`].
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Num(f64),
    Text(String),
    Date(NaiveDateTime),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Num(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    fn cmp_for_sort(&self, other: &Value) -> Ordering {
        // Nulls sort last, like a database ORDER BY ... NULLS LAST.
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Null, _) => Ordering::Greater,
            (_, Value::Null) => Ordering::Less,
            (Value::Num(a), Value::Num(b)) => a.total_cmp(b),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            (Value::Date(a), Value::Date(b)) => a.cmp(b),
            _ => Ordering::Equal,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Num(v) => {
                if v.fract() == 0.0 && v.abs() < 1e15 {
                    write!(f, "{}", *v as i64)
                } else {
                    write!(f, "{v}")
                }
            }
            Value::Text(s) => write!(f, "{s}"),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d %H:%M:%S")),
        }
    }
}

/// Scalar used on the right-hand side of an equality filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Num(f64),
    Text(String),
}

impl FilterValue {
    pub fn matches(&self, value: &Value) -> bool {
        match (self, value) {
            (FilterValue::Num(a), Value::Num(b)) => a == b,
            (FilterValue::Text(a), Value::Text(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for FilterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterValue::Num(v) => write!(f, "{}", Value::Num(*v)),
            FilterValue::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        FilterValue::Text(value.to_string())
    }
}

impl From<f64> for FilterValue {
    fn from(value: f64) -> Self {
        FilterValue::Num(value)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Num(Vec<Option<f64>>),
    Text(Vec<Option<String>>),
    Date(Vec<Option<NaiveDateTime>>),
}

impl Column {
    pub fn len(&self) -> usize {
        match self {
            Column::Num(v) => v.len(),
            Column::Text(v) => v.len(),
            Column::Date(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Column::Num(_) => "numeric",
            Column::Text(_) => "text",
            Column::Date(_) => "date",
        }
    }

    pub fn value(&self, row: usize) -> Value {
        match self {
            Column::Num(v) => v.get(row).copied().flatten().map_or(Value::Null, Value::Num),
            Column::Text(v) => v
                .get(row)
                .and_then(|x| x.clone())
                .map_or(Value::Null, Value::Text),
            Column::Date(v) => v.get(row).copied().flatten().map_or(Value::Null, Value::Date),
        }
    }

    fn nulls(kind: &Column, len: usize) -> Column {
        match kind {
            Column::Num(_) => Column::Num(vec![None; len]),
            Column::Text(_) => Column::Text(vec![None; len]),
            Column::Date(_) => Column::Date(vec![None; len]),
        }
    }

    fn take(&self, rows: &[usize]) -> Column {
        match self {
            Column::Num(v) => Column::Num(rows.iter().map(|&i| v[i]).collect()),
            Column::Text(v) => Column::Text(rows.iter().map(|&i| v[i].clone()).collect()),
            Column::Date(v) => Column::Date(rows.iter().map(|&i| v[i]).collect()),
        }
    }

    fn append(&mut self, other: &Column) -> bool {
        match (self, other) {
            (Column::Num(a), Column::Num(b)) => a.extend_from_slice(b),
            (Column::Text(a), Column::Text(b)) => a.extend(b.iter().cloned()),
            (Column::Date(a), Column::Date(b)) => a.extend_from_slice(b),
            _ => return false,
        }
        true
    }

    fn all_null(&self) -> bool {
        match self {
            Column::Num(v) => v.iter().all(Option::is_none),
            Column::Text(v) => v.iter().all(Option::is_none),
            Column::Date(v) => v.iter().all(Option::is_none),
        }
    }

    fn extend_nulls(&mut self, n: usize) {
        match self {
            Column::Num(v) => v.extend(std::iter::repeat_n(None, n)),
            Column::Text(v) => v.extend(std::iter::repeat_n(None, n)),
            Column::Date(v) => v.extend(std::iter::repeat_n(None, n)),
        }
    }
}

/// Column-oriented, in-memory table of game rows. Row order is meaningful:
/// the aggregation engine treats it as chronological order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GameTable {
    names: Vec<String>,
    columns: HashMap<String, Column>,
    len: usize,
}

impl GameTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn column_names(&self) -> &[String] {
        &self.names
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    /// Adds or replaces a column. The first column pushed fixes the row count.
    pub fn push_column(&mut self, name: impl Into<String>, column: Column) -> Result<()> {
        let name = name.into();
        if self.names.is_empty() {
            self.len = column.len();
        } else if column.len() != self.len {
            return Err(FeatureError::LengthMismatch {
                column: name,
                expected: self.len,
                found: column.len(),
            });
        }
        if self.columns.insert(name.clone(), column).is_none() {
            self.names.push(name);
        }
        Ok(())
    }

    pub fn remove_column(&mut self, name: &str) -> Option<Column> {
        let col = self.columns.remove(name)?;
        self.names.retain(|n| n != name);
        Some(col)
    }

    pub fn column(&self, name: &str) -> Result<&Column> {
        self.columns
            .get(name)
            .ok_or_else(|| FeatureError::MissingColumn {
                column: name.to_string(),
            })
    }

    pub fn num(&self, name: &str) -> Result<&[Option<f64>]> {
        match self.column(name)? {
            Column::Num(v) => Ok(v),
            other => Err(type_error(name, "numeric", other)),
        }
    }

    pub fn text(&self, name: &str) -> Result<&[Option<String>]> {
        match self.column(name)? {
            Column::Text(v) => Ok(v),
            other => Err(type_error(name, "text", other)),
        }
    }

    pub fn date(&self, name: &str) -> Result<&[Option<NaiveDateTime>]> {
        match self.column(name)? {
            Column::Date(v) => Ok(v),
            other => Err(type_error(name, "date", other)),
        }
    }

    pub fn value(&self, name: &str, row: usize) -> Result<Value> {
        Ok(self.column(name)?.value(row))
    }

    /// Keeps only the named columns, in the given order.
    pub fn project(&self, names: &[&str]) -> Result<GameTable> {
        let mut out = GameTable::new();
        out.len = self.len;
        for name in names {
            out.push_column(*name, self.column(name)?.clone())?;
        }
        Ok(out)
    }

    pub fn into_columns(mut self) -> Vec<(String, Column)> {
        let names = std::mem::take(&mut self.names);
        names
            .into_iter()
            .filter_map(|n| self.columns.remove(&n).map(|c| (n, c)))
            .collect()
    }

    pub fn select_rows(&self, rows: &[usize]) -> GameTable {
        let columns = self
            .names
            .iter()
            .map(|n| (n.clone(), self.columns[n].take(rows)))
            .collect();
        GameTable {
            names: self.names.clone(),
            columns,
            len: rows.len(),
        }
    }

    /// Vertical concatenation. The schema is the union of both inputs, cells
    /// absent from one side are null. Fails if a shared column changes type.
    pub fn concat(&self, other: &GameTable) -> Result<GameTable> {
        let mut out = self.clone();
        for name in &other.names {
            if !out.columns.contains_key(name) {
                let nulls = Column::nulls(&other.columns[name], out.len);
                out.columns.insert(name.clone(), nulls);
                out.names.push(name.clone());
            }
        }
        for name in &out.names {
            let Some(col) = out.columns.get_mut(name) else {
                continue;
            };
            match other.columns.get(name) {
                // A column without a single value carries no type of its own.
                Some(extra) if extra.all_null() => col.extend_nulls(other.len),
                Some(extra) => {
                    if col.all_null() {
                        *col = Column::nulls(extra, col.len());
                    }
                    if !col.append(extra) {
                        return Err(type_error(name, col.type_name(), extra));
                    }
                }
                None => col.extend_nulls(other.len),
            }
        }
        out.len = self.len + other.len;
        Ok(out)
    }

    /// Stable sort by the given columns, ascending, nulls last.
    pub fn sort_by_keys(&self, keys: &[&str]) -> Result<GameTable> {
        let key_cols = keys
            .iter()
            .map(|k| self.column(k))
            .collect::<Result<Vec<_>>>()?;
        let mut order: Vec<usize> = (0..self.len).collect();
        order.sort_by(|&a, &b| {
            key_cols
                .iter()
                .map(|c| c.value(a).cmp_for_sort(&c.value(b)))
                .find(|o| *o != Ordering::Equal)
                .unwrap_or(Ordering::Equal)
        });
        Ok(self.select_rows(&order))
    }
}

fn type_error(column: &str, expected: &'static str, found: &Column) -> FeatureError {
    FeatureError::ColumnType {
        column: column.to_string(),
        expected,
        found: found.type_name(),
    }
}
