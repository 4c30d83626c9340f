#![allow(dead_code)]

use chrono::{NaiveDate, NaiveDateTime};

use roster_features::table::{Column, GameTable};

/// One game from the first roster's side; the mirrored row is generated.
#[derive(Debug, Clone)]
pub struct Game {
    pub game_id: i64,
    pub match_id: i64,
    pub start: NaiveDateTime,
    pub roster: &'static str,
    pub opponent: &'static str,
    pub map: &'static str,
    pub score: Option<(f64, f64)>,
    pub ct: Option<(f64, f64)>,
    pub tr: Option<(f64, f64)>,
    pub kills: (f64, f64),
}

pub fn at(day: u32, hour: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 6, day)
        .and_then(|d| d.and_hms_opt(hour, 0, 0))
        .unwrap()
}

pub fn played(
    game_id: i64,
    match_id: i64,
    start: NaiveDateTime,
    teams: (&'static str, &'static str),
    map: &'static str,
    score: (f64, f64),
) -> Game {
    let half = |s: f64| (s / 2.0).floor();
    Game {
        game_id,
        match_id,
        start,
        roster: teams.0,
        opponent: teams.1,
        map,
        score: Some(score),
        ct: Some((half(score.0), half(score.1))),
        tr: Some((score.0 - half(score.0), score.1 - half(score.1))),
        kills: (0.7, 0.6),
    }
}

pub fn upcoming(
    game_id: i64,
    match_id: i64,
    start: NaiveDateTime,
    teams: (&'static str, &'static str),
    map: &'static str,
) -> Game {
    Game {
        game_id,
        match_id,
        start,
        roster: teams.0,
        opponent: teams.1,
        map,
        score: None,
        ct: None,
        tr: None,
        kills: (f64::NAN, f64::NAN),
    }
}

fn won(score: Option<(f64, f64)>, flip: bool) -> Option<f64> {
    let (own, opp) = score?;
    let (own, opp) = if flip { (opp, own) } else { (own, opp) };
    Some(if own > opp { 1.0 } else { 0.0 })
}

/// Team-perspective table with two rows per game.
pub fn team_games(games: &[Game]) -> GameTable {
    let mut game_id = Vec::new();
    let mut match_id = Vec::new();
    let mut date = Vec::new();
    let mut roster = Vec::new();
    let mut roster_op = Vec::new();
    let mut map = Vec::new();
    let mut score = Vec::new();
    let mut score_op = Vec::new();
    let mut ct = Vec::new();
    let mut ct_op = Vec::new();
    let mut tr = Vec::new();
    let mut tr_op = Vec::new();
    let mut outcome = Vec::new();
    let mut kills = Vec::new();

    for g in games {
        for flip in [false, true] {
            let pick = |pair: Option<(f64, f64)>| pair.map(|(a, b)| if flip { (b, a) } else { (a, b) });
            game_id.push(Some(g.game_id as f64));
            match_id.push(Some(g.match_id as f64));
            date.push(Some(g.start));
            let (own, opp) = if flip { (g.opponent, g.roster) } else { (g.roster, g.opponent) };
            roster.push(Some(own.to_string()));
            roster_op.push(Some(opp.to_string()));
            map.push(Some(g.map.to_string()));
            score.push(pick(g.score).map(|p| p.0));
            score_op.push(pick(g.score).map(|p| p.1));
            ct.push(pick(g.ct).map(|p| p.0));
            ct_op.push(pick(g.ct).map(|p| p.1));
            tr.push(pick(g.tr).map(|p| p.0));
            tr_op.push(pick(g.tr).map(|p| p.1));
            outcome.push(won(g.score, flip));
            let k = if flip { g.kills.1 } else { g.kills.0 };
            kills.push(if k.is_nan() { None } else { Some(k) });
        }
    }

    let n = game_id.len();
    let mut t = GameTable::new();
    t.push_column("game_id", Column::Num(game_id)).unwrap();
    t.push_column("match_id", Column::Num(match_id)).unwrap();
    t.push_column("match_date", Column::Date(date)).unwrap();
    t.push_column("roster_hash", Column::Text(roster)).unwrap();
    t.push_column("roster_hash_op", Column::Text(roster_op)).unwrap();
    t.push_column("played_map", Column::Text(map)).unwrap();
    t.push_column("score", Column::Num(score)).unwrap();
    t.push_column("score_op", Column::Num(score_op)).unwrap();
    t.push_column("score_ct", Column::Num(ct)).unwrap();
    t.push_column("score_ct_op", Column::Num(ct_op)).unwrap();
    t.push_column("score_tr", Column::Num(tr)).unwrap();
    t.push_column("score_tr_op", Column::Num(tr_op)).unwrap();
    t.push_column("hltv_rank", Column::Num(vec![None; n])).unwrap();
    t.push_column("hltv_rank_op", Column::Num(vec![None; n])).unwrap();
    t.push_column("won", Column::Num(outcome)).unwrap();
    t.push_column("kills_per_round", Column::Num(kills)).unwrap();
    t
}

/// Row index of `roster`'s side of `game_id`.
pub fn row_of(table: &GameTable, game_id: i64, roster: &str) -> usize {
    let ids = table.num("game_id").unwrap();
    let rosters = table.text("roster_hash").unwrap();
    (0..table.len())
        .find(|&r| ids[r] == Some(game_id as f64) && rosters[r].as_deref() == Some(roster))
        .unwrap()
}
