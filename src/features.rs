use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::aggregation::{AggregationEngine, DEFAULT_SHIFT, Window};
use crate::error::{FeatureError, Result};
use crate::filters::FilterPredicate;
use crate::table::{Column, GameTable, Value};

pub const DEFAULT_MAPS: [&str; 7] = [
    "anubis", "mirage", "nuke", "dust2", "vertigo", "ancient", "inferno",
];

pub const DEFAULT_WINDOWS: [usize; 6] = [3, 5, 10, 20, 50, 100];

pub const AVERAGE_COLUMNS: [&str; 13] = [
    "won",
    "kills_per_round",
    "deaths_per_round",
    "first_kills_per_round",
    "flash_assists_per_round",
    "avg_rating",
    "avg_kast",
    "clutches_per_round",
    "pistols_won",
    "hltv_rank",
    "hltv_rank_op",
    "player_carried",
    "player_carried_down",
];

pub const RATING_PROFILE_SUFFIXES: [&str; 3] = ["", "_slow", "_fast"];

/// One declarative feature definition. Specs are immutable; the same spec
/// can be evaluated against any number of tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeatureSpec {
    /// The field as-is (`shift == 0`) or as it was `shift` games back.
    Simple {
        field: String,
        #[serde(default)]
        shift: usize,
    },
    /// With a `weight_field` every aggregate becomes a per-90 rate:
    /// `sum(field) / (sum(weight_field) / 90)` over the same window.
    HistoricalSum {
        field: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        weight_field: Option<String>,
        #[serde(default)]
        filters: FilterPredicate,
    },
    HistoricalAverage {
        field: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        weight_field: Option<String>,
        #[serde(default)]
        filters: FilterPredicate,
    },
    MovingAverage {
        field: String,
        window: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        weight_field: Option<String>,
        #[serde(default)]
        filters: FilterPredicate,
    },
    GamesPlayedLastDays {
        days: i64,
        #[serde(default)]
        filters: FilterPredicate,
    },
    /// One 0/1 column per distinct value observed in the evaluated table.
    Categorical { field: String },
}

impl FeatureSpec {
    pub fn simple(field: &str) -> Self {
        FeatureSpec::Simple {
            field: field.to_string(),
            shift: 0,
        }
    }

    pub fn lagged(field: &str, shift: usize) -> Self {
        FeatureSpec::Simple {
            field: field.to_string(),
            shift,
        }
    }

    pub fn historical_sum(field: &str) -> Self {
        FeatureSpec::HistoricalSum {
            field: field.to_string(),
            weight_field: None,
            filters: FilterPredicate::new(),
        }
    }

    pub fn historical_average(field: &str) -> Self {
        FeatureSpec::HistoricalAverage {
            field: field.to_string(),
            weight_field: None,
            filters: FilterPredicate::new(),
        }
    }

    pub fn moving_average(field: &str, window: usize) -> Self {
        FeatureSpec::MovingAverage {
            field: field.to_string(),
            window,
            weight_field: None,
            filters: FilterPredicate::new(),
        }
    }

    pub fn games_played_last_days(days: i64) -> Self {
        FeatureSpec::GamesPlayedLastDays {
            days,
            filters: FilterPredicate::new(),
        }
    }

    pub fn categorical(field: &str) -> Self {
        FeatureSpec::Categorical {
            field: field.to_string(),
        }
    }

    /// Adds an equality filter. Simple and categorical specs take no filters
    /// and are returned unchanged.
    pub fn filtered(mut self, column: &str, value: &str) -> Self {
        match &mut self {
            FeatureSpec::HistoricalSum { filters, .. }
            | FeatureSpec::HistoricalAverage { filters, .. }
            | FeatureSpec::MovingAverage { filters, .. }
            | FeatureSpec::GamesPlayedLastDays { filters, .. } => {
                *filters = std::mem::take(filters).with(column, value);
            }
            FeatureSpec::Simple { .. } | FeatureSpec::Categorical { .. } => {}
        }
        self
    }

    /// Normalizes the aggregate per 90 units of `weight`. Only historical and
    /// moving aggregates take a weight; other specs are returned unchanged.
    pub fn weighted(mut self, weight: &str) -> Self {
        match &mut self {
            FeatureSpec::HistoricalSum { weight_field, .. }
            | FeatureSpec::HistoricalAverage { weight_field, .. }
            | FeatureSpec::MovingAverage { weight_field, .. } => {
                *weight_field = Some(weight.to_string());
            }
            FeatureSpec::Simple { .. }
            | FeatureSpec::GamesPlayedLastDays { .. }
            | FeatureSpec::Categorical { .. } => {}
        }
        self
    }

    /// Stable output name. Categorical specs produce `categorical(<field>=<value>)`
    /// columns; this returns their common prefix `categorical(<field>)`.
    pub fn name(&self) -> String {
        match self {
            FeatureSpec::Simple { field, shift } => format!("simple_feature({field}-shift={shift})"),
            FeatureSpec::HistoricalSum {
                field,
                weight_field,
                filters,
            } => format!(
                "historical_sum({field}{}{})",
                weight_suffix(weight_field.as_deref()),
                filters.name_suffix()
            ),
            FeatureSpec::HistoricalAverage {
                field,
                weight_field,
                filters,
            } => format!(
                "historical_average({field}{}{})",
                weight_suffix(weight_field.as_deref()),
                filters.name_suffix()
            ),
            FeatureSpec::MovingAverage {
                field,
                window,
                weight_field,
                filters,
            } => format!(
                "moving_average({field}-{window}{}{})",
                weight_suffix(weight_field.as_deref()),
                filters.name_suffix()
            ),
            FeatureSpec::GamesPlayedLastDays { days, filters } => {
                format!("games_played_last_days({days}{})", filters.name_suffix())
            }
            FeatureSpec::Categorical { field } => format!("categorical({field})"),
        }
    }

    pub fn evaluate(&self, engine: &mut AggregationEngine<'_>) -> Result<Vec<(String, Column)>> {
        let shift = DEFAULT_SHIFT;
        let column = match self {
            FeatureSpec::Simple { field, shift } => {
                let values = engine.shifted_value(field, *shift)?;
                let source = engine.table().column(field)?;
                values_to_column(source, values)
            }
            FeatureSpec::HistoricalSum {
                field,
                weight_field: Some(weight),
                filters,
            }
            | FeatureSpec::HistoricalAverage {
                field,
                weight_field: Some(weight),
                filters,
            } => Column::Num(engine.per_90(field, weight, Window::All, shift, filters)?),
            FeatureSpec::HistoricalSum {
                field,
                weight_field: None,
                filters,
            } => Column::Num(engine.historical_sum(field, shift, filters)?),
            FeatureSpec::HistoricalAverage {
                field,
                weight_field: None,
                filters,
            } => Column::Num(engine.historical_average(field, shift, filters)?),
            FeatureSpec::MovingAverage {
                field,
                window,
                weight_field: Some(weight),
                filters,
            } => Column::Num(engine.per_90(field, weight, Window::Rows(*window), shift, filters)?),
            FeatureSpec::MovingAverage {
                field,
                window,
                weight_field: None,
                filters,
            } => Column::Num(engine.moving_average(field, *window, shift, filters)?),
            FeatureSpec::GamesPlayedLastDays { days, filters } => {
                Column::Num(engine.windowed_count(*days, shift, filters)?)
            }
            FeatureSpec::Categorical { field } => {
                return one_hot(engine.table(), field);
            }
        };
        Ok(vec![(self.name(), column)])
    }
}

fn weight_suffix(weight_field: Option<&str>) -> String {
    weight_field.map(|w| format!("-per90={w}")).unwrap_or_default()
}

fn values_to_column(source: &Column, values: Vec<Value>) -> Column {
    match source {
        Column::Num(_) => Column::Num(values.iter().map(Value::as_f64).collect()),
        Column::Text(_) => Column::Text(
            values
                .into_iter()
                .map(|v| match v {
                    Value::Text(s) => Some(s),
                    _ => None,
                })
                .collect(),
        ),
        Column::Date(_) => Column::Date(
            values
                .into_iter()
                .map(|v| match v {
                    Value::Date(d) => Some(d),
                    _ => None,
                })
                .collect(),
        ),
    }
}

fn one_hot(table: &GameTable, field: &str) -> Result<Vec<(String, Column)>> {
    let source = table.column(field)?;
    let cells: Vec<Value> = (0..table.len()).map(|row| source.value(row)).collect();

    let mut categories: BTreeMap<String, Value> = BTreeMap::new();
    for cell in &cells {
        if !cell.is_null() {
            categories
                .entry(cell.to_string())
                .or_insert_with(|| cell.clone());
        }
    }

    Ok(categories
        .into_iter()
        .map(|(label, value)| {
            let indicator = cells
                .iter()
                .map(|c| Some(if *c == value { 1.0 } else { 0.0 }))
                .collect();
            (format!("categorical({field}={label})"), Column::Num(indicator))
        })
        .collect())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureCatalog {
    specs: Vec<FeatureSpec>,
}

impl FeatureCatalog {
    pub fn new(specs: Vec<FeatureSpec>) -> Self {
        Self { specs }
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw)
            .map_err(|e| FeatureError::InvalidConfig(format!("feature catalog: {e}")))
    }

    pub fn push(&mut self, spec: FeatureSpec) {
        self.specs.push(spec);
    }

    pub fn specs(&self) -> &[FeatureSpec] {
        &self.specs
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Evaluates every spec against `table` with one shared grouping cache.
    /// The first configuration error aborts the whole pass.
    pub fn evaluate(&self, table: &GameTable) -> Result<GameTable> {
        let mut engine = AggregationEngine::new(table);
        let mut out = GameTable::new();
        for spec in &self.specs {
            for (name, column) in spec.evaluate(&mut engine)? {
                if out.has_column(&name) {
                    return Err(FeatureError::DuplicateFeature(name));
                }
                out.push_column(name, column)?;
            }
        }
        info!(
            specs = self.specs.len(),
            columns = out.column_names().len(),
            groupings = engine.cache().len(),
            cache_hits = engine.cache().hits(),
            "feature catalog evaluated"
        );
        Ok(out)
    }
}

pub fn default_catalog() -> FeatureCatalog {
    catalog_for_maps(&DEFAULT_MAPS)
}

pub fn catalog_for_maps(maps: &[&str]) -> FeatureCatalog {
    let mut catalog = FeatureCatalog::default();
    for suffix in RATING_PROFILE_SUFFIXES {
        catalog.push(FeatureSpec::simple(&format!("overall_elo{suffix}")));
    }
    catalog.push(FeatureSpec::historical_sum("game_played"));
    catalog.push(FeatureSpec::categorical("played_map"));
    catalog.push(FeatureSpec::simple("hltv_rank"));
    catalog.push(FeatureSpec::games_played_last_days(7));
    catalog.push(FeatureSpec::games_played_last_days(30));

    for column in AVERAGE_COLUMNS {
        catalog.push(FeatureSpec::historical_average(column));
        for map in maps {
            catalog.push(FeatureSpec::historical_average(column).filtered("played_map", map));
        }
    }

    for column in AVERAGE_COLUMNS {
        for window in DEFAULT_WINDOWS {
            catalog.push(FeatureSpec::moving_average(column, window));
            for map in maps {
                catalog.push(
                    FeatureSpec::moving_average(column, window).filtered("played_map", map),
                );
            }
        }
    }

    for map in maps {
        let map = map.to_lowercase();
        for suffix in RATING_PROFILE_SUFFIXES {
            catalog.push(FeatureSpec::simple(&format!("{map}_elo{suffix}")));
        }
        catalog.push(FeatureSpec::simple(&format!("{map}_ct_elo")));
        catalog.push(FeatureSpec::simple(&format!("{map}_tr_elo")));
        catalog.push(FeatureSpec::historical_sum("game_played").filtered("played_map", &map));
    }
    catalog
}
