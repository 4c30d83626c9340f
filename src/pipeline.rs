use std::collections::{BTreeSet, HashMap, HashSet};

use anyhow::{Context, Result, anyhow};
use tracing::info;

use crate::elo::{EloConfig, RatingEngine, ReplayStats, expected_score};
use crate::features::FeatureCatalog;
use crate::games::{GameRecord, RatingColumns};
use crate::table::{Column, GameTable, Value};

pub const ID_COLUMNS: [&str; 7] = [
    "match_id",
    "match_date",
    "roster_hash",
    "roster_hash_op",
    "game_id",
    "played_map",
    "won",
];

const GAME_PLAYED: &str = "game_played";

/// Stacks finished games and upcoming fixtures into one chronological table.
/// Both must share the frame so categorical values and per-group history line
/// up across them.
pub fn combine_sources(history: &GameTable, upcoming: &GameTable) -> Result<GameTable> {
    let mut combined = history
        .concat(upcoming)
        .context("combine finished and upcoming games")?;

    if combined.has_column("played_map") {
        let maps = combined
            .text("played_map")?
            .iter()
            .map(|m| m.as_ref().map(|s| s.trim().to_lowercase()))
            .collect();
        combined.push_column("played_map", Column::Text(maps))?;
    }

    if !combined.has_column(GAME_PLAYED) {
        let played = combined
            .num("won")?
            .iter()
            .map(|w| Some(if w.is_some() { 1.0 } else { 0.0 }))
            .collect();
        combined.push_column(GAME_PLAYED, Column::Num(played))?;
    }

    let sorted = combined
        .sort_by_keys(&["match_date", "game_id"])
        .context("sort games chronologically")?;
    info!(
        finished = history.len(),
        upcoming = upcoming.len(),
        "sources combined"
    );
    Ok(sorted)
}

/// Replays every profile over the table's games and attaches the pre-match
/// ratings (own and `_op`) as columns.
pub fn apply_ratings(table: &mut GameTable, profiles: &[EloConfig]) -> Result<Vec<ReplayStats>> {
    let cols = RatingColumns::default();
    let games = GameRecord::from_table(table, &cols).context("read games for rating replay")?;
    let mut stats = Vec::with_capacity(profiles.len());
    for profile in profiles {
        let mut engine = RatingEngine::new(profile.clone());
        let snapshots = engine.replay(&games);
        snapshots
            .attach(table, &cols)
            .with_context(|| format!("attach ratings for {}", profile.overall_key()))?;
        stats.push(engine.stats());
    }
    Ok(stats)
}

/// Identity columns followed by every catalog feature.
pub fn build_feature_frame(table: &GameTable, catalog: &FeatureCatalog) -> Result<GameTable> {
    let mut frame = table.project(&ID_COLUMNS).context("project identity columns")?;
    let features = catalog.evaluate(table).context("evaluate feature catalog")?;
    for (name, column) in features.into_columns() {
        frame.push_column(name, column)?;
    }
    Ok(frame)
}

fn is_feature(name: &str) -> bool {
    name.contains('(') && !ID_COLUMNS.contains(&name)
}

/// Adds `<feature>_op` for every feature column: the value the opponent roster
/// has for the same game on the same map. Upcoming fixtures may list several
/// maps under one game id.
pub fn opponent_features(frame: &mut GameTable) -> Result<()> {
    let game_ids = frame.num("game_id")?.to_vec();
    let maps = frame.text("played_map")?.to_vec();
    let rosters = frame.text("roster_hash")?.to_vec();
    let rosters_op = frame.text("roster_hash_op")?.to_vec();

    let mut index: HashMap<(i64, Option<&str>, &str), usize> = HashMap::new();
    for (row, (game_id, roster)) in game_ids.iter().zip(&rosters).enumerate() {
        if let (Some(game_id), Some(roster)) = (game_id, roster.as_deref()) {
            index
                .entry((*game_id as i64, maps[row].as_deref(), roster))
                .or_insert(row);
        }
    }
    let partner: Vec<Option<usize>> = (0..frame.len())
        .map(|row| {
            let key = (
                game_ids[row].map(|g| g as i64)?,
                maps[row].as_deref(),
                rosters_op[row].as_deref()?,
            );
            index.get(&key).copied()
        })
        .collect();

    let names: Vec<String> = frame
        .column_names()
        .iter()
        .filter(|n| is_feature(n) && !n.ends_with("_op"))
        .cloned()
        .collect();
    for name in names {
        let mirrored = match frame.column(&name)? {
            Column::Num(v) => Column::Num(partner.iter().map(|p| p.and_then(|r| v[r])).collect()),
            Column::Text(v) => {
                Column::Text(partner.iter().map(|p| p.and_then(|r| v[r].clone())).collect())
            }
            Column::Date(v) => Column::Date(partner.iter().map(|p| p.and_then(|r| v[r])).collect()),
        };
        frame.push_column(format!("{name}_op"), mirrored)?;
    }
    Ok(())
}

/// Opponent column a rating is crossed with. Side ratings face the opposite
/// side of the opponent.
fn crossing_partner(name: &str) -> String {
    if name.contains("_ct_elo") {
        format!("{}_op", name.replacen("_ct_elo", "_tr_elo", 1))
    } else if name.contains("_tr_elo") {
        format!("{}_op", name.replacen("_tr_elo", "_ct_elo", 1))
    } else {
        format!("{name}_op")
    }
}

/// Adds `<rating>_cross` columns: the expected score of the row's rating
/// against the matching opponent rating.
pub fn rating_crossing_features(frame: &mut GameTable) -> Result<usize> {
    let names: Vec<String> = frame
        .column_names()
        .iter()
        .filter(|n| {
            is_feature(n) && n.contains("elo") && !n.contains("_op") && !n.contains("elo_cross")
        })
        .cloned()
        .collect();

    let mut added = 0;
    for name in names {
        let partner = crossing_partner(&name);
        if !frame.has_column(&partner) {
            continue;
        }
        let own = frame.num(&name)?;
        let opp = frame.num(&partner)?;
        let crossed = own
            .iter()
            .zip(opp)
            .map(|(a, b)| Some(expected_score((*a)?, (*b)?)))
            .collect();
        frame.push_column(name.replacen("elo", "elo_cross", 1), Column::Num(crossed))?;
        added += 1;
    }
    Ok(added)
}

/// Name of the map-independent column a per-map column folds into, if any.
fn generic_map_name(name: &str, map: &str) -> Option<String> {
    if name.starts_with("categorical(") {
        return None;
    }
    // The filter value ends at `)` or at the next `-key=value` pair.
    for end in [")", "-"] {
        let filtered = format!("played_map={map}{end}");
        if name.contains(&filtered) {
            return Some(name.replacen(&filtered, &format!("played_map{end}"), 1));
        }
    }
    let rating = format!("({map}_");
    if name.contains(&rating) {
        return Some(name.replacen(&rating, "(played_map_", 1));
    }
    None
}

/// Replaces per-map columns by one column holding, for each row, the value of
/// the row's own map. Returns how many per-map columns were dropped.
pub fn keep_only_played_map_columns(frame: &mut GameTable) -> Result<usize> {
    let row_maps = frame.text("played_map")?.to_vec();
    let maps: BTreeSet<&str> = row_maps.iter().filter_map(|m| m.as_deref()).collect();

    let mut order: Vec<String> = Vec::new();
    let mut sources: HashMap<String, HashMap<String, String>> = HashMap::new();
    for name in frame.column_names() {
        for map in &maps {
            let Some(generic) = generic_map_name(name, map) else {
                continue;
            };
            let per_map = sources.entry(generic.clone()).or_insert_with(|| {
                order.push(generic.clone());
                HashMap::new()
            });
            per_map.insert((*map).to_string(), name.clone());
            break;
        }
    }

    let mut dropped = 0;
    for generic in order {
        let per_map = &sources[&generic];
        let mut merged = vec![None; frame.len()];
        for (row, map) in row_maps.iter().enumerate() {
            let Some(source) = map.as_deref().and_then(|m| per_map.get(m)) else {
                continue;
            };
            merged[row] = frame.column(source)?.value(row).as_f64();
        }
        for source in per_map.values() {
            frame.remove_column(source);
            dropped += 1;
        }
        frame.push_column(generic, Column::Num(merged))?;
    }
    Ok(dropped)
}

/// Splits off rows without an outcome (upcoming games). Upcoming rows are
/// deduplicated; finished rows are returned as they are.
pub fn split_predictions(frame: &GameTable) -> Result<(GameTable, GameTable)> {
    let won = frame.num("won")?;
    let mut finished = Vec::new();
    let mut upcoming = Vec::new();
    let mut seen = HashSet::new();
    for (row, outcome) in won.iter().enumerate() {
        if outcome.is_some() {
            finished.push(row);
            continue;
        }
        if seen.insert(row_fingerprint(frame, row)) {
            upcoming.push(row);
        }
    }
    Ok((frame.select_rows(&finished), frame.select_rows(&upcoming)))
}

fn row_fingerprint(frame: &GameTable, row: usize) -> String {
    frame
        .column_names()
        .iter()
        .map(|n| match frame.value(n, row) {
            Ok(Value::Null) | Err(_) => "\u{0}".to_string(),
            Ok(v) => v.to_string(),
        })
        .collect::<Vec<_>>()
        .join("\u{1f}")
}

/// Sorted model feature names: every non-identity column carrying a `(`.
pub fn feature_list(frame: &GameTable) -> Vec<String> {
    let mut names: Vec<String> = frame
        .column_names()
        .iter()
        .filter(|n| is_feature(n))
        .cloned()
        .collect();
    names.sort();
    names
}

pub struct PipelineOutput {
    pub features: GameTable,
    pub matches_to_predict: GameTable,
    pub feature_list: Vec<String>,
    pub replay: Vec<ReplayStats>,
}

/// Full pass: combine, rate, evaluate the catalog, mirror opponent features,
/// cross ratings, fold per-map columns, split.
pub fn run(
    history: &GameTable,
    upcoming: &GameTable,
    profiles: &[EloConfig],
    catalog: &FeatureCatalog,
) -> Result<PipelineOutput> {
    if profiles.is_empty() {
        return Err(anyhow!("at least one rating profile is required"));
    }
    let mut table = combine_sources(history, upcoming)?;
    let replay = apply_ratings(&mut table, profiles)?;
    let mut frame = build_feature_frame(&table, catalog)?;
    opponent_features(&mut frame)?;
    let crossed = rating_crossing_features(&mut frame)?;
    let folded = keep_only_played_map_columns(&mut frame)?;
    let (features, matches_to_predict) = split_predictions(&frame)?;
    let feature_list = feature_list(&features);
    info!(
        rows = features.len(),
        upcoming = matches_to_predict.len(),
        features = feature_list.len(),
        crossed,
        folded,
        "feature frame built"
    );
    Ok(PipelineOutput {
        features,
        matches_to_predict,
        feature_list,
        replay,
    })
}
