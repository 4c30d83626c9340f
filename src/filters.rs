use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::table::{Column, FilterValue, GameTable};

/// Conjunction of `column == value` constraints. Keys are kept sorted so the
/// signature and derived feature names are deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilterPredicate(BTreeMap<String, FilterValue>);

impl FilterPredicate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        self.0.insert(column.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FilterValue)> {
        self.0.iter()
    }

    pub fn signature(&self) -> String {
        if self.0.is_empty() {
            return "no_filters".to_string();
        }
        self.0
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// `-k=v` pairs appended to feature names; empty without filters.
    pub fn name_suffix(&self) -> String {
        self.0
            .iter()
            .map(|(k, v)| format!("-{k}={v}"))
            .collect::<String>()
    }

    /// Row mask for `table`. A filter over a column the table lacks is a
    /// configuration error, not an empty selection.
    pub fn mask(&self, table: &GameTable) -> Result<Vec<bool>> {
        let mut mask = vec![true; table.len()];
        for (name, expected) in &self.0 {
            let column = table.column(name)?;
            for (row, keep) in mask.iter_mut().enumerate() {
                if *keep {
                    *keep = cell_matches(column, row, expected);
                }
            }
        }
        Ok(mask)
    }
}

fn cell_matches(column: &Column, row: usize, expected: &FilterValue) -> bool {
    match (column, expected) {
        (Column::Text(v), FilterValue::Text(s)) => v[row].as_deref() == Some(s.as_str()),
        (Column::Num(v), FilterValue::Num(n)) => v[row] == Some(*n),
        _ => expected.matches(&column.value(row)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_order_independent() {
        let a = FilterPredicate::new()
            .with("played_map", "inferno")
            .with("lan", 1.0);
        let b = FilterPredicate::new()
            .with("lan", 1.0)
            .with("played_map", "inferno");
        assert_eq!(a.signature(), b.signature());
        assert_eq!(a.signature(), "lan=1,played_map=inferno");
        assert_eq!(a.name_suffix(), "-lan=1-played_map=inferno");
        assert_eq!(FilterPredicate::new().signature(), "no_filters");
    }

    #[test]
    fn mask_is_conjunctive() {
        let mut t = GameTable::new();
        t.push_column(
            "played_map",
            Column::Text(vec![
                Some("inferno".into()),
                Some("nuke".into()),
                Some("inferno".into()),
            ]),
        )
        .unwrap();
        t.push_column("lan", Column::Num(vec![Some(1.0), Some(1.0), Some(0.0)]))
            .unwrap();
        let f = FilterPredicate::new()
            .with("played_map", "inferno")
            .with("lan", 1.0);
        assert_eq!(f.mask(&t).unwrap(), vec![true, false, false]);
    }

    #[test]
    fn unknown_filter_column_is_an_error() {
        let mut t = GameTable::new();
        t.push_column("a", Column::Num(vec![Some(1.0)])).unwrap();
        let f = FilterPredicate::new().with("played_map", "inferno");
        assert!(f.mask(&t).is_err());
    }

    #[test]
    fn deserializes_from_plain_object() {
        let f: FilterPredicate =
            serde_json::from_str(r#"{"played_map":"mirage","lan":1}"#).unwrap();
        assert_eq!(f.signature(), "lan=1,played_map=mirage");
    }
}
