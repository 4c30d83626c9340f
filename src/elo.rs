use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::Result;
use crate::games::{GameRecord, RatingColumns, ScorePair};
use crate::roster::RosterId;
use crate::table::{Column, GameTable};

// (rank upper bound, starting rating); ranks are 1-based, better is lower.
const RANK_TIERS: [(u32, f64); 9] = [
    (5, 1600.0),
    (10, 1575.0),
    (20, 1550.0),
    (30, 1525.0),
    (50, 1500.0),
    (100, 1475.0),
    (200, 1450.0),
    (300, 1375.0),
    (350, 1350.0),
];
const RANKED_FLOOR: f64 = 1350.0;
const UNRANKED_RATING: f64 = 1325.0;

const COLD_START_GAMES: u32 = 10;
const COLD_START_K_MULT: f64 = 1.5;
const VETERAN_GAMES: u32 = 100;
const VETERAN_K_MULT: f64 = 0.8;
const INACTIVE_RAMP_START_DAYS: i64 = 7;
const INACTIVE_RAMP_END_DAYS: i64 = 30;
const INACTIVE_MAX_K_MULT: f64 = 1.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitialRating {
    /// Step function over the team's external rank at the time of the game.
    RankTiers,
    /// Everyone starts at `mean_rating`.
    Flat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EloConfig {
    pub k_factor: f64,
    pub boost_threshold: f64,
    pub boost_factor: f64,
    pub boost_per_point: f64,
    pub initial_rating: InitialRating,
    pub mean_rating: f64,
    /// Per-day retention of the distance from the mean; 1.0 disables decay.
    pub decay_rate: f64,
    /// Regression weight numerator: `min(1, regression_games / (games + 1))`.
    pub regression_games: f64,
    /// Appended to every dimension key so several profiles can coexist.
    pub suffix: String,
}

impl Default for EloConfig {
    fn default() -> Self {
        Self {
            k_factor: 32.0,
            boost_threshold: 6.0,
            boost_factor: 1.2,
            boost_per_point: 0.0,
            initial_rating: InitialRating::RankTiers,
            mean_rating: 1500.0,
            decay_rate: 1.0,
            regression_games: 5.0,
            suffix: String::new(),
        }
    }
}

impl EloConfig {
    pub fn slow() -> Self {
        Self {
            k_factor: 10.0,
            suffix: "_slow".to_string(),
            ..Self::default()
        }
    }

    pub fn fast() -> Self {
        Self {
            k_factor: 64.0,
            boost_threshold: 6.0,
            boost_factor: 1.2,
            suffix: "_fast".to_string(),
            ..Self::default()
        }
    }

    pub fn overall_key(&self) -> String {
        format!("overall_elo{}", self.suffix)
    }

    pub fn map_key(&self, map: &str) -> String {
        format!("{}_elo{}", map.to_lowercase(), self.suffix)
    }

    pub fn side_key(&self, map: &str, side: Side) -> String {
        format!("{}_{}_elo{}", map.to_lowercase(), side.as_str(), self.suffix)
    }

    pub fn initial_rating(&self, rank: Option<u32>) -> f64 {
        match self.initial_rating {
            InitialRating::Flat => self.mean_rating,
            InitialRating::RankTiers => rank_tier_rating(rank),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Ct,
    Tr,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Ct => "ct",
            Side::Tr => "tr",
        }
    }
}

pub fn rank_tier_rating(rank: Option<u32>) -> f64 {
    let Some(rank) = rank else {
        return UNRANKED_RATING;
    };
    RANK_TIERS
        .iter()
        .find(|(bound, _)| rank <= *bound)
        .map_or(RANKED_FLOOR, |(_, rating)| *rating)
}

pub fn expected_score(own: f64, opponent: f64) -> f64 {
    1.0 / (1.0 + 10.0_f64.powf((opponent - own) / 400.0))
}

pub fn match_outcome(own_score: f64, opponent_score: f64) -> (f64, f64) {
    if own_score > opponent_score {
        (1.0, 0.0)
    } else if own_score < opponent_score {
        (0.0, 1.0)
    } else {
        (0.5, 0.5)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TeamActivity {
    pub games_played: u32,
    pub last_played: Option<NaiveDateTime>,
}

impl TeamActivity {
    pub fn days_inactive(&self, at: NaiveDateTime) -> i64 {
        self.last_played
            .map_or(0, |last| (at - last).num_days().max(0))
    }
}

/// Per-side inputs to one rating exchange.
#[derive(Debug, Clone, Copy)]
pub struct Contender {
    pub rating: f64,
    pub score: f64,
    pub k: f64,
}

/// Rating change for both sides of one exchange, before regression.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PairUpdate {
    pub own_delta: f64,
    pub opponent_delta: f64,
}

/// roster identity → dimension key → rating.
#[derive(Debug, Clone, Default)]
pub struct RatingStore {
    ratings: HashMap<RosterId, HashMap<String, f64>>,
}

impl RatingStore {
    pub fn get(&self, roster: &RosterId, key: &str) -> Option<f64> {
        self.ratings.get(roster)?.get(key).copied()
    }

    pub fn ratings_of(&self, roster: &RosterId) -> Option<&HashMap<String, f64>> {
        self.ratings.get(roster)
    }

    pub fn rosters(&self) -> usize {
        self.ratings.len()
    }

    fn get_or_init(&mut self, roster: &RosterId, key: &str, initial: f64) -> f64 {
        *self
            .ratings
            .entry(roster.clone())
            .or_default()
            .entry(key.to_string())
            .or_insert(initial)
    }

    fn set(&mut self, roster: &RosterId, key: &str, rating: f64) {
        self.ratings
            .entry(roster.clone())
            .or_default()
            .insert(key.to_string(), rating);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RatingSnapshot {
    pub game_id: i64,
    pub roster: RosterId,
    pub ratings: BTreeMap<String, f64>,
}

/// Ratings as they stood at the start of each game's match, one row per
/// (game, roster).
#[derive(Debug, Clone, Default)]
pub struct SnapshotTable {
    rows: Vec<RatingSnapshot>,
    index: HashMap<(i64, RosterId), usize>,
}

impl SnapshotTable {
    /// A second snapshot for the same (game, roster) comes from another map of
    /// the same fixture. Both were frozen at the same match start, so only its
    /// new dimension keys are taken.
    fn push(&mut self, row: RatingSnapshot) {
        let key = (row.game_id, row.roster.clone());
        if let Some(&idx) = self.index.get(&key) {
            for (dimension, rating) in row.ratings {
                self.rows[idx].ratings.entry(dimension).or_insert(rating);
            }
            return;
        }
        self.index.insert(key, self.rows.len());
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[RatingSnapshot] {
        &self.rows
    }

    pub fn get(&self, game_id: i64, roster: &RosterId) -> Option<&RatingSnapshot> {
        let idx = self.index.get(&(game_id, roster.clone()))?;
        self.rows.get(*idx)
    }

    pub fn dimension_keys(&self) -> Vec<String> {
        let keys: BTreeSet<&String> = self.rows.iter().flat_map(|r| r.ratings.keys()).collect();
        keys.into_iter().cloned().collect()
    }

    /// Adds one column per dimension for the row's roster, plus `<key>_op`
    /// for the opponent roster of the same game.
    pub fn attach(&self, table: &mut GameTable, cols: &RatingColumns) -> Result<()> {
        let game_ids: Vec<Option<i64>> = table
            .num(&cols.game_id)?
            .iter()
            .map(|g| g.map(|v| v as i64))
            .collect();
        let rosters = table.text(&cols.roster)?.to_vec();
        let rosters_op = table.text(&cols.roster_op)?.to_vec();

        for key in self.dimension_keys() {
            let own = self.lookup_column(&game_ids, &rosters, &key);
            let opp = self.lookup_column(&game_ids, &rosters_op, &key);
            table.push_column(key.clone(), Column::Num(own))?;
            table.push_column(format!("{key}_op"), Column::Num(opp))?;
        }
        Ok(())
    }

    fn lookup_column(
        &self,
        game_ids: &[Option<i64>],
        rosters: &[Option<String>],
        key: &str,
    ) -> Vec<Option<f64>> {
        game_ids
            .iter()
            .zip(rosters)
            .map(|(game_id, roster)| {
                let (Some(game_id), Some(roster)) = (game_id, roster.as_deref()) else {
                    return None;
                };
                self.get(*game_id, &RosterId::from(roster))?
                    .ratings
                    .get(key)
                    .copied()
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    pub matches: usize,
    pub games_rated: usize,
    pub games_skipped: usize,
}

pub struct RatingEngine {
    config: EloConfig,
    store: RatingStore,
    activity: HashMap<RosterId, TeamActivity>,
    stats: ReplayStats,
}

impl Default for RatingEngine {
    fn default() -> Self {
        Self::new(EloConfig::default())
    }
}

impl RatingEngine {
    pub fn new(config: EloConfig) -> Self {
        Self {
            config,
            store: RatingStore::default(),
            activity: HashMap::new(),
            stats: ReplayStats::default(),
        }
    }

    pub fn config(&self) -> &EloConfig {
        &self.config
    }

    pub fn store(&self) -> &RatingStore {
        &self.store
    }

    pub fn stats(&self) -> ReplayStats {
        self.stats
    }

    pub fn rating(&self, roster: &RosterId, key: &str) -> Option<f64> {
        self.store.get(roster, key)
    }

    pub fn activity(&self, roster: &RosterId) -> Option<&TeamActivity> {
        self.activity.get(roster)
    }

    pub fn decay_factor(&self, days_inactive: i64) -> f64 {
        let days = days_inactive.clamp(0, i32::MAX as i64) as i32;
        self.config.decay_rate.powi(days)
    }

    pub fn effective_k(&self, games_played: u32, days_inactive: i64) -> f64 {
        let experience = if games_played < COLD_START_GAMES {
            COLD_START_K_MULT
        } else if games_played > VETERAN_GAMES {
            VETERAN_K_MULT
        } else {
            1.0
        };
        let inactivity = if days_inactive <= INACTIVE_RAMP_START_DAYS {
            1.0
        } else if days_inactive >= INACTIVE_RAMP_END_DAYS {
            INACTIVE_MAX_K_MULT
        } else {
            let span = (INACTIVE_RAMP_END_DAYS - INACTIVE_RAMP_START_DAYS) as f64;
            let t = (days_inactive - INACTIVE_RAMP_START_DAYS) as f64 / span;
            1.0 + (INACTIVE_MAX_K_MULT - 1.0) * t
        };
        self.config.k_factor * experience * inactivity
    }

    pub fn boost_multiplier(&self, score_diff: f64) -> f64 {
        if score_diff.abs() >= self.config.boost_threshold {
            self.config.boost_factor
        } else {
            1.0
        }
    }

    pub fn additive_boost(&self, score_diff: f64) -> f64 {
        if score_diff.abs() >= self.config.boost_threshold {
            self.config.boost_per_point * score_diff.abs()
        } else {
            0.0
        }
    }

    /// Blend toward the configured mean; `games_played` already counts the
    /// game just rated.
    pub fn regress(&self, rating: f64, games_played: u32) -> f64 {
        let w = (self.config.regression_games / (games_played as f64 + 1.0)).min(1.0);
        (1.0 - w) * rating + w * self.config.mean_rating
    }

    pub fn update_pair(&self, own: Contender, opponent: Contender) -> PairUpdate {
        let (actual_own, actual_opp) = match_outcome(own.score, opponent.score);
        let expected_own = expected_score(own.rating, opponent.rating);
        let expected_opp = expected_score(opponent.rating, own.rating);

        let diff = own.score - opponent.score;
        let boost = self.boost_multiplier(diff);
        let additive = self.additive_boost(diff);

        let surprise_own = actual_own - expected_own;
        let surprise_opp = actual_opp - expected_opp;
        PairUpdate {
            own_delta: own.k * boost * surprise_own + additive * direction(surprise_own),
            opponent_delta: opponent.k * boost * surprise_opp + additive * direction(surprise_opp),
        }
    }

    /// Replays `games` in chronological order and returns the pre-match
    /// snapshot for both rosters of every game. Every game of a match sees
    /// the ratings as they were before the match's first game.
    pub fn replay(&mut self, games: &[GameRecord]) -> SnapshotTable {
        let mut ordered: Vec<&GameRecord> = games.iter().collect();
        ordered.sort_by(|a, b| {
            a.start
                .cmp(&b.start)
                .then(a.match_id.cmp(&b.match_id))
                .then(a.game_id.cmp(&b.game_id))
        });

        let mut match_pos: HashMap<i64, usize> = HashMap::new();
        let mut matches: Vec<Vec<&GameRecord>> = Vec::new();
        for game in ordered {
            let idx = *match_pos.entry(game.match_id).or_insert_with(|| {
                matches.push(Vec::new());
                matches.len() - 1
            });
            matches[idx].push(game);
        }

        let mut snapshots = SnapshotTable::default();
        for match_games in &matches {
            let frozen = self.freeze(match_games);
            for game in match_games {
                for (roster, rank) in [(&game.roster, game.rank), (&game.opponent, game.rank_op)] {
                    let mut ratings = frozen.get(roster).cloned().unwrap_or_default();
                    for key in self.game_keys(game) {
                        ratings
                            .entry(key)
                            .or_insert_with(|| self.config.initial_rating(rank));
                    }
                    snapshots.push(RatingSnapshot {
                        game_id: game.game_id,
                        roster: roster.clone(),
                        ratings,
                    });
                }
            }
            for game in match_games {
                self.process_game(game);
            }
            self.stats.matches += 1;
        }

        info!(
            profile = %self.config.overall_key(),
            matches = self.stats.matches,
            rated = self.stats.games_rated,
            skipped = self.stats.games_skipped,
            rosters = self.store.rosters(),
            "rating replay finished"
        );
        snapshots
    }

    fn freeze(&self, games: &[&GameRecord]) -> HashMap<RosterId, BTreeMap<String, f64>> {
        let mut out = HashMap::new();
        for game in games {
            for roster in [&game.roster, &game.opponent] {
                if out.contains_key(roster) {
                    continue;
                }
                let ratings = self
                    .store
                    .ratings_of(roster)
                    .map(|m| m.iter().map(|(k, v)| (k.clone(), *v)).collect())
                    .unwrap_or_default();
                out.insert(roster.clone(), ratings);
            }
        }
        out
    }

    fn game_keys(&self, game: &GameRecord) -> Vec<String> {
        let mut keys = vec![self.config.overall_key()];
        if !game.played_map.is_empty() {
            keys.push(self.config.map_key(&game.played_map));
            keys.push(self.config.side_key(&game.played_map, Side::Ct));
            keys.push(self.config.side_key(&game.played_map, Side::Tr));
        }
        keys
    }

    fn dimensions(&self, game: &GameRecord) -> Vec<(String, ScorePair)> {
        let mut dims = vec![(self.config.overall_key(), game.score)];
        if !game.played_map.is_empty() {
            dims.push((self.config.map_key(&game.played_map), game.score));
            dims.push((self.config.side_key(&game.played_map, Side::Ct), game.ct));
            dims.push((self.config.side_key(&game.played_map, Side::Tr), game.tr));
        }
        dims
    }

    fn process_game(&mut self, game: &GameRecord) {
        if game.score.both().is_none() {
            debug!(game_id = game.game_id, "missing score, rating update skipped");
            self.stats.games_skipped += 1;
            return;
        }

        let own_activity = self.activity.get(&game.roster).cloned().unwrap_or_default();
        let opp_activity = self.activity.get(&game.opponent).cloned().unwrap_or_default();
        let own_idle = own_activity.days_inactive(game.start);
        let opp_idle = opp_activity.days_inactive(game.start);
        let own_k = self.effective_k(own_activity.games_played, own_idle);
        let opp_k = self.effective_k(opp_activity.games_played, opp_idle);
        let own_games_after = own_activity.games_played + 1;
        let opp_games_after = opp_activity.games_played + 1;

        for (key, scores) in self.dimensions(game) {
            let Some((own_score, opp_score)) = scores.both() else {
                debug!(game_id = game.game_id, dimension = %key, "missing side score");
                continue;
            };
            let own_rating = self.decayed(&game.roster, &key, game.rank, own_idle);
            let opp_rating = self.decayed(&game.opponent, &key, game.rank_op, opp_idle);

            let update = self.update_pair(
                Contender {
                    rating: own_rating,
                    score: own_score,
                    k: own_k,
                },
                Contender {
                    rating: opp_rating,
                    score: opp_score,
                    k: opp_k,
                },
            );

            let own_new = self.regress(own_rating + update.own_delta, own_games_after);
            let opp_new = self.regress(opp_rating + update.opponent_delta, opp_games_after);
            self.store.set(&game.roster, &key, own_new);
            self.store.set(&game.opponent, &key, opp_new);
        }

        for roster in [&game.roster, &game.opponent] {
            let entry = self.activity.entry(roster.clone()).or_default();
            entry.games_played += 1;
            entry.last_played = Some(game.start);
        }
        self.stats.games_rated += 1;
    }

    fn decayed(&mut self, roster: &RosterId, key: &str, rank: Option<u32>, idle_days: i64) -> f64 {
        let initial = self.config.initial_rating(rank);
        let current = self.store.get_or_init(roster, key, initial);
        let mean = self.config.mean_rating;
        mean + (current - mean) * self.decay_factor(idle_days)
    }
}

fn direction(x: f64) -> f64 {
    if x > 0.0 {
        1.0
    } else if x < 0.0 {
        -1.0
    } else {
        0.0
    }
}
