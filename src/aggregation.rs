//! Shifted, grouped history statistics over a chronologically ordered table.
//!
//! Every statistic for a row is computed from rows of the same group that come
//! strictly before it (by `shift` rows), so a game's own outcome never feeds
//! its own feature value. Rows are expected in chronological order already;
//! nothing here re-sorts.

use std::collections::HashMap;
use std::rc::Rc;

use chrono::Duration;
use rayon::prelude::*;
use tracing::debug;

use crate::error::{FeatureError, Result};
use crate::filters::FilterPredicate;
use crate::table::{GameTable, Value};

pub const DEFAULT_GROUP_BY: &str = "roster_hash";
pub const DEFAULT_DATE_COLUMN: &str = "match_date";
pub const DEFAULT_SHIFT: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
    All,
    Rows(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stat {
    Sum,
    Mean,
}

/// Minimum observations a moving window needs before it emits a value.
pub fn min_periods(window: usize) -> usize {
    if window > 1 { window / 2 } else { 1 }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupKey {
    pub group_by: Vec<String>,
    pub shift: usize,
    pub weight_field: Option<String>,
    pub filter_signature: String,
}

/// Row indices per group, each in input order. Rows excluded by the filter or
/// lacking a group value belong to no group.
#[derive(Debug, Clone, Default)]
pub struct GroupedView {
    groups: Vec<Vec<usize>>,
    rows: usize,
}

impl GroupedView {
    pub fn build(table: &GameTable, group_by: &[String], filters: &FilterPredicate) -> Result<Self> {
        let mask = filters.mask(table)?;
        let key_cols = group_by
            .iter()
            .map(|c| table.column(c))
            .collect::<Result<Vec<_>>>()?;

        let mut index: HashMap<String, usize> = HashMap::new();
        let mut groups: Vec<Vec<usize>> = Vec::new();
        'rows: for (row, keep) in mask.iter().enumerate() {
            if !keep {
                continue;
            }
            let mut key = String::new();
            for col in &key_cols {
                let v = col.value(row);
                if v.is_null() {
                    continue 'rows;
                }
                key.push_str(&v.to_string());
                key.push('\u{1f}');
            }
            let idx = *index.entry(key).or_insert_with(|| {
                groups.push(Vec::new());
                groups.len() - 1
            });
            groups[idx].push(row);
        }
        Ok(Self {
            groups,
            rows: table.len(),
        })
    }

    pub fn groups(&self) -> &[Vec<usize>] {
        &self.groups
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Runs `per_group` on every group in parallel and scatters the results
    /// back to table row order.
    fn scatter<F>(&self, per_group: F) -> Vec<Option<f64>>
    where
        F: Fn(&[usize]) -> Vec<Option<f64>> + Sync,
    {
        let results: Vec<Vec<Option<f64>>> =
            self.groups.par_iter().map(|rows| per_group(rows.as_slice())).collect();
        let mut out = vec![None; self.rows];
        for (rows, values) in self.groups.iter().zip(results) {
            for (row, value) in rows.iter().zip(values) {
                out[*row] = value;
            }
        }
        out
    }
}

/// Memoizes grouped views per (grouping, shift, weight field, filter
/// signature) for one feature-computation pass.
#[derive(Debug, Default)]
pub struct GroupingCache {
    entries: HashMap<GroupKey, Rc<GroupedView>>,
    hits: usize,
    misses: usize,
}

impl GroupingCache {
    pub fn get_or_build<F>(&mut self, key: GroupKey, build: F) -> Result<Rc<GroupedView>>
    where
        F: FnOnce() -> Result<GroupedView>,
    {
        if let Some(view) = self.entries.get(&key) {
            self.hits += 1;
            return Ok(Rc::clone(view));
        }
        let view = Rc::new(build()?);
        self.misses += 1;
        self.entries.insert(key, Rc::clone(&view));
        Ok(view)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hits(&self) -> usize {
        self.hits
    }

    pub fn misses(&self) -> usize {
        self.misses
    }
}

pub struct AggregationEngine<'a> {
    table: &'a GameTable,
    group_by: Vec<String>,
    date_column: String,
    cache: GroupingCache,
}

impl<'a> AggregationEngine<'a> {
    pub fn new(table: &'a GameTable) -> Self {
        Self {
            table,
            group_by: vec![DEFAULT_GROUP_BY.to_string()],
            date_column: DEFAULT_DATE_COLUMN.to_string(),
            cache: GroupingCache::default(),
        }
    }

    pub fn with_group_by(mut self, columns: &[&str]) -> Self {
        let mut group_by: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
        group_by.sort();
        self.group_by = group_by;
        self
    }

    pub fn with_date_column(mut self, column: &str) -> Self {
        self.date_column = column.to_string();
        self
    }

    pub fn table(&self) -> &'a GameTable {
        self.table
    }

    pub fn cache(&self) -> &GroupingCache {
        &self.cache
    }

    pub fn grouped(&mut self, shift: usize, filters: &FilterPredicate) -> Result<Rc<GroupedView>> {
        self.grouped_weighted(shift, None, filters)
    }

    fn grouped_weighted(
        &mut self,
        shift: usize,
        weight_field: Option<&str>,
        filters: &FilterPredicate,
    ) -> Result<Rc<GroupedView>> {
        let key = GroupKey {
            group_by: self.group_by.clone(),
            shift,
            weight_field: weight_field.map(str::to_string),
            filter_signature: filters.signature(),
        };
        let table = self.table;
        let group_by = &self.group_by;
        self.cache
            .get_or_build(key, || GroupedView::build(table, group_by, filters))
    }

    pub fn historical_sum(
        &mut self,
        field: &str,
        shift: usize,
        filters: &FilterPredicate,
    ) -> Result<Vec<Option<f64>>> {
        self.rolling(field, Window::All, 1, Stat::Sum, shift, filters)
    }

    pub fn historical_average(
        &mut self,
        field: &str,
        shift: usize,
        filters: &FilterPredicate,
    ) -> Result<Vec<Option<f64>>> {
        self.rolling(field, Window::All, 1, Stat::Mean, shift, filters)
    }

    pub fn moving_average(
        &mut self,
        field: &str,
        window: usize,
        shift: usize,
        filters: &FilterPredicate,
    ) -> Result<Vec<Option<f64>>> {
        if window == 0 {
            return Err(FeatureError::InvalidConfig(format!(
                "moving average over `{field}` needs a window of at least 1"
            )));
        }
        self.rolling(
            field,
            Window::Rows(window),
            min_periods(window),
            Stat::Mean,
            shift,
            filters,
        )
    }

    /// Sum of `field` per 90 units of `weight_field` over the shifted window:
    /// `sum(field) / (sum(weight) / 90)`. Rows whose weight sum is zero get
    /// no value.
    pub fn per_90(
        &mut self,
        field: &str,
        weight_field: &str,
        window: Window,
        shift: usize,
        filters: &FilterPredicate,
    ) -> Result<Vec<Option<f64>>> {
        let min_obs = match window {
            Window::All => 1,
            Window::Rows(0) => {
                return Err(FeatureError::InvalidConfig(format!(
                    "moving average over `{field}` needs a window of at least 1"
                )));
            }
            Window::Rows(w) => min_periods(w),
        };
        let table = self.table;
        let values = table.num(field)?;
        let weights = table.num(weight_field)?;
        let view = self.grouped_weighted(shift, Some(weight_field), filters)?;
        debug!(
            field,
            weight_field,
            shift,
            filters = %filters.signature(),
            groups = view.group_count(),
            "per-90 statistic"
        );
        Ok(view.scatter(|rows| {
            let series: Vec<Option<f64>> = rows.iter().map(|&r| values[r]).collect();
            let weight: Vec<Option<f64>> = rows.iter().map(|&r| weights[r]).collect();
            let sums = rolling_series(&series, window, min_obs, Stat::Sum);
            let spans = rolling_series(&weight, window, min_obs, Stat::Sum);
            let normalized = sums
                .into_iter()
                .zip(spans)
                .map(|(sum, span)| match (sum, span) {
                    (Some(sum), Some(span)) if span != 0.0 => Some(sum / (span / 90.0)),
                    _ => None,
                })
                .collect();
            shift_series(normalized, shift)
        }))
    }

    /// Number of earlier group rows (after `shift`) dated within the `days`
    /// calendar days leading up to the current row's date. A window reaching
    /// past the earliest representable date counts every earlier row.
    pub fn windowed_count(
        &mut self,
        days: i64,
        shift: usize,
        filters: &FilterPredicate,
    ) -> Result<Vec<Option<f64>>> {
        if days <= 0 {
            return Err(FeatureError::InvalidConfig(format!(
                "calendar window must span at least one day, got {days}"
            )));
        }
        let table = self.table;
        let dates = table.date(&self.date_column)?;
        let view = self.grouped(shift, filters)?;
        let span = Duration::try_days(days).ok_or_else(|| {
            FeatureError::InvalidConfig(format!("calendar window of {days} days is out of range"))
        })?;
        Ok(view.scatter(|rows| {
            (0..rows.len())
                .map(|pos| {
                    if pos < shift {
                        return None;
                    }
                    let anchor = dates[rows[pos]]?;
                    let floor = anchor.checked_sub_signed(span);
                    let mut count = 0.0;
                    for &row in rows[..=pos - shift].iter().rev() {
                        match (dates[row], floor) {
                            (Some(d), Some(floor)) if d <= floor => break,
                            (Some(_), _) => count += 1.0,
                            (None, _) => {}
                        }
                    }
                    Some(count)
                })
                .collect()
        }))
    }

    /// The field's value `shift` games back for the same group; `shift == 0`
    /// is the row's own value.
    pub fn shifted_value(&mut self, field: &str, shift: usize) -> Result<Vec<Value>> {
        let table = self.table;
        let column = table.column(field)?;
        if shift == 0 {
            return Ok((0..table.len()).map(|row| column.value(row)).collect());
        }
        let view = self.grouped(shift, &FilterPredicate::new())?;
        let mut out = vec![Value::Null; table.len()];
        for rows in view.groups() {
            for pos in shift..rows.len() {
                out[rows[pos]] = column.value(rows[pos - shift]);
            }
        }
        Ok(out)
    }

    fn rolling(
        &mut self,
        field: &str,
        window: Window,
        min_obs: usize,
        stat: Stat,
        shift: usize,
        filters: &FilterPredicate,
    ) -> Result<Vec<Option<f64>>> {
        let table = self.table;
        let values = table.num(field)?;
        let view = self.grouped(shift, filters)?;
        debug!(
            field,
            shift,
            filters = %filters.signature(),
            groups = view.group_count(),
            "rolling statistic"
        );
        Ok(view.scatter(|rows| {
            let series: Vec<Option<f64>> = rows.iter().map(|&r| values[r]).collect();
            shift_series(rolling_series(&series, window, min_obs, stat), shift)
        }))
    }
}

fn rolling_series(series: &[Option<f64>], window: Window, min_obs: usize, stat: Stat) -> Vec<Option<f64>> {
    let mut out = Vec::with_capacity(series.len());
    let mut sum = 0.0;
    let mut nobs = 0usize;
    for (pos, value) in series.iter().enumerate() {
        if let Some(v) = value {
            sum += v;
            nobs += 1;
        }
        if let Window::Rows(w) = window
            && pos >= w
            && let Some(old) = series[pos - w]
        {
            sum -= old;
            nobs -= 1;
        }
        out.push(if nobs >= min_obs.max(1) {
            match stat {
                Stat::Sum => Some(sum),
                Stat::Mean => Some(sum / nobs as f64),
            }
        } else {
            None
        });
    }
    out
}

fn shift_series(series: Vec<Option<f64>>, shift: usize) -> Vec<Option<f64>> {
    let n = series.len();
    let mut out = vec![None; shift.min(n)];
    out.extend(series.into_iter().take(n.saturating_sub(shift)));
    out
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, NaiveDateTime};

    use super::*;
    use crate::table::Column;

    fn day(d: u32) -> Option<NaiveDateTime> {
        NaiveDate::from_ymd_opt(2024, 1, d).and_then(|x| x.and_hms_opt(20, 0, 0))
    }

    fn text(v: &[&str]) -> Column {
        Column::Text(v.iter().map(|s| Some(s.to_string())).collect())
    }

    fn table() -> GameTable {
        let mut t = GameTable::new();
        t.push_column("roster_hash", text(&["a", "b", "a", "a", "b", "a"]))
            .unwrap();
        t.push_column(
            "played_map",
            text(&["nuke", "nuke", "inferno", "nuke", "inferno", "nuke"]),
        )
        .unwrap();
        t.push_column(
            "won",
            Column::Num(vec![
                Some(1.0),
                Some(0.0),
                Some(0.0),
                Some(1.0),
                Some(1.0),
                Some(1.0),
            ]),
        )
        .unwrap();
        t.push_column(
            "match_date",
            Column::Date(vec![day(1), day(1), day(3), day(10), day(12), day(20)]),
        )
        .unwrap();
        t
    }

    #[test]
    fn historical_sum_and_average_exclude_current_row() {
        let t = table();
        let mut engine = AggregationEngine::new(&t);
        let none = FilterPredicate::new();
        let sum = engine.historical_sum("won", 1, &none).unwrap();
        assert_eq!(sum, vec![None, None, Some(1.0), Some(1.0), Some(0.0), Some(2.0)]);
        let avg = engine.historical_average("won", 1, &none).unwrap();
        assert_eq!(avg[3], Some(0.5));
        assert!((avg[5].unwrap() - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn filtered_rows_only_see_filtered_history() {
        let t = table();
        let mut engine = AggregationEngine::new(&t);
        let nuke = FilterPredicate::new().with("played_map", "nuke");
        let avg = engine.historical_average("won", 1, &nuke).unwrap();
        assert_eq!(avg, vec![None, None, None, Some(1.0), None, Some(1.0)]);
    }

    #[test]
    fn moving_average_needs_half_a_window() {
        let mut t = GameTable::new();
        t.push_column("roster_hash", text(&["a"; 7])).unwrap();
        t.push_column(
            "kills",
            Column::Num((1..=7).map(|v| Some(v as f64)).collect()),
        )
        .unwrap();
        let mut engine = AggregationEngine::new(&t);
        let ma = engine
            .moving_average("kills", 10, 1, &FilterPredicate::new())
            .unwrap();
        // Row 3 has three prior games, row 5 has five.
        assert_eq!(ma[3], None);
        assert_eq!(ma[4], None);
        assert_eq!(ma[5], Some(3.0));
        assert_eq!(ma[6], Some(3.5));

        let ma2 = engine
            .moving_average("kills", 2, 1, &FilterPredicate::new())
            .unwrap();
        assert_eq!(ma2[1], Some(1.0));
        assert_eq!(ma2[6], Some(5.5));
    }

    #[test]
    fn nulls_are_skipped_inside_windows() {
        let series = vec![Some(2.0), None, Some(4.0), None];
        let out = rolling_series(&series, Window::Rows(2), 1, Stat::Mean);
        assert_eq!(out, vec![Some(2.0), Some(2.0), Some(4.0), Some(4.0)]);
        let sparse = rolling_series(&[None, None], Window::All, 1, Stat::Sum);
        assert_eq!(sparse, vec![None, None]);
    }

    #[test]
    fn windowed_count_uses_calendar_days() {
        let t = table();
        let mut engine = AggregationEngine::new(&t);
        let counts = engine.windowed_count(10, 1, &FilterPredicate::new()).unwrap();
        // roster a plays on days 1, 3, 10, 20; the window is (date - 10d, date].
        assert_eq!(counts[0], None);
        assert_eq!(counts[2], Some(1.0));
        assert_eq!(counts[3], Some(2.0));
        assert_eq!(counts[5], Some(0.0));
        assert_eq!(counts[4], Some(0.0));
    }

    #[test]
    fn longer_shift_skips_the_most_recent_games() {
        let t = table();
        let mut engine = AggregationEngine::new(&t);
        let none = FilterPredicate::new();
        // roster a: won 1, 0, 1, 1 on days 1, 3, 10, 20.
        let sum = engine.historical_sum("won", 2, &none).unwrap();
        assert_eq!(sum, vec![None, None, None, Some(1.0), None, Some(1.0)]);
        let ma = engine.moving_average("won", 2, 2, &none).unwrap();
        assert_eq!(ma, vec![None, None, None, Some(1.0), None, Some(0.5)]);
        let counts = engine.windowed_count(10, 2, &none).unwrap();
        assert_eq!(counts, vec![None, None, None, Some(1.0), None, Some(0.0)]);
        let counts = engine.windowed_count(30, 2, &none).unwrap();
        assert_eq!(counts[5], Some(2.0));
    }

    #[test]
    fn huge_calendar_window_counts_all_earlier_games() {
        let t = table();
        let mut engine = AggregationEngine::new(&t);
        let none = FilterPredicate::new();
        let counts = engine.windowed_count(100_000_000_000, 1, &none).unwrap();
        assert_eq!(
            counts,
            vec![None, None, Some(1.0), Some(2.0), Some(1.0), Some(3.0)]
        );
        let err = engine.windowed_count(i64::MAX, 1, &none).unwrap_err();
        assert!(matches!(err, FeatureError::InvalidConfig(_)));
        assert!(engine.windowed_count(0, 1, &none).is_err());
    }

    fn minutes_table() -> GameTable {
        let mut t = GameTable::new();
        t.push_column("roster_hash", text(&["a", "a", "a", "b", "b"]))
            .unwrap();
        t.push_column(
            "kills",
            Column::Num(vec![Some(10.0), Some(20.0), Some(30.0), Some(5.0), Some(7.0)]),
        )
        .unwrap();
        t.push_column(
            "minutes",
            Column::Num(vec![Some(90.0), Some(45.0), Some(45.0), Some(0.0), Some(90.0)]),
        )
        .unwrap();
        t
    }

    #[test]
    fn per_90_divides_by_accumulated_weight() {
        let t = minutes_table();
        let mut engine = AggregationEngine::new(&t);
        let none = FilterPredicate::new();
        let all = engine.per_90("kills", "minutes", Window::All, 1, &none).unwrap();
        // a: 10 kills in 90 minutes, then 30 kills in 135 minutes.
        assert_eq!(all[0], None);
        assert_eq!(all[1], Some(10.0));
        assert_eq!(all[2], Some(20.0));
        // b's only earlier game has zero minutes.
        assert_eq!(all[3], None);
        assert_eq!(all[4], None);

        let last = engine
            .per_90("kills", "minutes", Window::Rows(1), 1, &none)
            .unwrap();
        assert_eq!(last[2], Some(40.0));
        assert!(engine.per_90("kills", "minutes", Window::Rows(0), 1, &none).is_err());
    }

    #[test]
    fn weight_field_gets_its_own_grouping() {
        let t = minutes_table();
        let mut engine = AggregationEngine::new(&t);
        let none = FilterPredicate::new();
        engine.historical_sum("kills", 1, &none).unwrap();
        engine.per_90("kills", "minutes", Window::All, 1, &none).unwrap();
        engine.per_90("kills", "minutes", Window::Rows(3), 1, &none).unwrap();
        assert_eq!(engine.cache().len(), 2);
        assert_eq!(engine.cache().hits(), 1);
    }

    #[test]
    fn shifted_value_reads_previous_game() {
        let t = table();
        let mut engine = AggregationEngine::new(&t);
        let prev = engine.shifted_value("played_map", 1).unwrap();
        assert_eq!(prev[0], Value::Null);
        assert_eq!(prev[2], Value::Text("nuke".into()));
        assert_eq!(prev[4], Value::Text("nuke".into()));
        let same = engine.shifted_value("won", 0).unwrap();
        assert_eq!(same[1], Value::Num(0.0));
    }

    #[test]
    fn identical_requests_share_one_grouping() {
        let t = table();
        let mut engine = AggregationEngine::new(&t);
        let nuke = FilterPredicate::new().with("played_map", "nuke");
        engine.historical_sum("won", 1, &nuke).unwrap();
        engine.historical_average("won", 1, &nuke).unwrap();
        engine.moving_average("won", 3, 1, &nuke).unwrap();
        engine.historical_sum("won", 1, &FilterPredicate::new()).unwrap();
        assert_eq!(engine.cache().len(), 2);
        assert_eq!(engine.cache().misses(), 2);
        assert_eq!(engine.cache().hits(), 2);
    }

    #[test]
    fn missing_column_is_reported() {
        let t = table();
        let mut engine = AggregationEngine::new(&t);
        let err = engine
            .historical_average("kast", 1, &FilterPredicate::new())
            .unwrap_err();
        assert!(matches!(err, FeatureError::MissingColumn { column } if column == "kast"));
        let err = engine
            .historical_sum("won", 1, &FilterPredicate::new().with("event", "major"))
            .unwrap_err();
        assert!(matches!(err, FeatureError::MissingColumn { .. }));
    }

    #[test]
    fn min_periods_rounds_down() {
        assert_eq!(min_periods(1), 1);
        assert_eq!(min_periods(3), 1);
        assert_eq!(min_periods(10), 5);
        assert_eq!(min_periods(100), 50);
    }
}
