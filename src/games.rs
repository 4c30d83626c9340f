use std::collections::HashSet;

use chrono::NaiveDateTime;
use tracing::warn;

use crate::error::Result;
use crate::roster::RosterId;
use crate::table::GameTable;

/// Column names the rating replay reads from a game table.
#[derive(Debug, Clone)]
pub struct RatingColumns {
    pub game_id: String,
    pub match_id: String,
    pub date: String,
    pub roster: String,
    pub roster_op: String,
    pub played_map: String,
    pub score: String,
    pub score_op: String,
    pub score_ct: String,
    pub score_ct_op: String,
    pub score_tr: String,
    pub score_tr_op: String,
    pub rank: String,
    pub rank_op: String,
}

impl Default for RatingColumns {
    fn default() -> Self {
        Self {
            game_id: "game_id".to_string(),
            match_id: "match_id".to_string(),
            date: "match_date".to_string(),
            roster: "roster_hash".to_string(),
            roster_op: "roster_hash_op".to_string(),
            played_map: "played_map".to_string(),
            score: "score".to_string(),
            score_op: "score_op".to_string(),
            score_ct: "score_ct".to_string(),
            score_ct_op: "score_ct_op".to_string(),
            score_tr: "score_tr".to_string(),
            score_tr_op: "score_tr_op".to_string(),
            rank: "hltv_rank".to_string(),
            rank_op: "hltv_rank_op".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ScorePair {
    pub own: Option<f64>,
    pub opponent: Option<f64>,
}

impl ScorePair {
    pub fn new(own: f64, opponent: f64) -> Self {
        Self {
            own: Some(own),
            opponent: Some(opponent),
        }
    }

    pub fn missing() -> Self {
        Self::default()
    }

    pub fn both(&self) -> Option<(f64, f64)> {
        Some((self.own?, self.opponent?))
    }
}

/// One game seen from the side of `roster`. Future games carry no scores.
#[derive(Debug, Clone, PartialEq)]
pub struct GameRecord {
    pub game_id: i64,
    pub match_id: i64,
    pub start: NaiveDateTime,
    pub played_map: String,
    pub roster: RosterId,
    pub opponent: RosterId,
    pub score: ScorePair,
    pub ct: ScorePair,
    pub tr: ScorePair,
    pub rank: Option<u32>,
    pub rank_op: Option<u32>,
}

impl GameRecord {
    /// Reads one record per (game id, map) from a team-perspective table (two
    /// rows per game, the second one mirrored). Upcoming fixtures can list
    /// several maps under one game id. Rows without a game id, date or both
    /// rosters are skipped.
    pub fn from_table(table: &GameTable, cols: &RatingColumns) -> Result<Vec<GameRecord>> {
        let game_ids = table.num(&cols.game_id)?;
        let match_ids = table.num(&cols.match_id)?;
        let dates = table.date(&cols.date)?;
        let rosters = table.text(&cols.roster)?;
        let rosters_op = table.text(&cols.roster_op)?;
        let maps = table.text(&cols.played_map)?;
        let score = table.num(&cols.score)?;
        let score_op = table.num(&cols.score_op)?;
        let score_ct = table.num(&cols.score_ct)?;
        let score_ct_op = table.num(&cols.score_ct_op)?;
        let score_tr = table.num(&cols.score_tr)?;
        let score_tr_op = table.num(&cols.score_tr_op)?;
        let rank = table.num(&cols.rank)?;
        let rank_op = table.num(&cols.rank_op)?;

        let mut seen = HashSet::new();
        let mut out = Vec::new();
        let mut skipped = 0usize;
        for row in 0..table.len() {
            let (Some(game_id), Some(start), Some(roster), Some(opponent)) = (
                game_ids[row],
                dates[row],
                rosters[row].as_deref(),
                rosters_op[row].as_deref(),
            ) else {
                skipped += 1;
                continue;
            };
            let game_id = game_id as i64;
            let played_map = maps[row].as_deref().unwrap_or_default().to_lowercase();
            if !seen.insert((game_id, played_map.clone())) {
                continue;
            }
            out.push(GameRecord {
                game_id,
                match_id: match_ids[row].map_or(game_id, |m| m as i64),
                start,
                played_map,
                roster: RosterId::from(roster),
                opponent: RosterId::from(opponent),
                score: ScorePair {
                    own: score[row],
                    opponent: score_op[row],
                },
                ct: ScorePair {
                    own: score_ct[row],
                    opponent: score_ct_op[row],
                },
                tr: ScorePair {
                    own: score_tr[row],
                    opponent: score_tr_op[row],
                },
                rank: rank[row].and_then(as_rank),
                rank_op: rank_op[row].and_then(as_rank),
            });
        }
        if skipped > 0 {
            warn!(skipped, "rows without game id, date or rosters left out of rating replay");
        }
        Ok(out)
    }
}

fn as_rank(v: f64) -> Option<u32> {
    if v.is_finite() && v >= 0.0 {
        Some(v as u32)
    } else {
        None
    }
}
