use std::path::Path;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use rusqlite::Connection;
use rusqlite::types::ValueRef;
use tracing::{info, warn};

use crate::table::{Column, GameTable};

pub const TEAM_GAMES_SQL: &str = "SELECT * FROM team_games";
pub const MATCHES_TO_PREDICT_SQL: &str = "SELECT * FROM matches_to_predict";
pub const DATE_COLUMNS: [&str; 1] = ["match_date"];

pub struct Sources {
    pub team_games: GameTable,
    pub matches_to_predict: GameTable,
}

pub fn open_db(path: &Path) -> Result<Connection> {
    if !path.exists() {
        return Err(anyhow!("sqlite db {} does not exist", path.display()));
    }
    Connection::open(path).with_context(|| format!("open sqlite db {}", path.display()))
}

pub fn load_sources(conn: &Connection) -> Result<Sources> {
    let team_games =
        load_table(conn, TEAM_GAMES_SQL, &DATE_COLUMNS).context("load team_games")?;
    let matches_to_predict = load_table(conn, MATCHES_TO_PREDICT_SQL, &DATE_COLUMNS)
        .context("load matches_to_predict")?;
    info!(
        team_games = team_games.len(),
        matches_to_predict = matches_to_predict.len(),
        "sources loaded"
    );
    Ok(Sources {
        team_games,
        matches_to_predict,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Unknown,
    Num,
    Text,
    Date,
}

enum Cell {
    Null,
    Num(f64),
    Text(String),
}

/// Runs `sql` and builds a table from whatever columns it returns. SQLite is
/// dynamically typed, so each column's type is taken from its first non-null
/// cell; columns in `date_columns` are parsed into dates.
pub fn load_table(conn: &Connection, sql: &str, date_columns: &[&str]) -> Result<GameTable> {
    let mut stmt = conn
        .prepare(sql)
        .with_context(|| format!("prepare query `{sql}`"))?;
    let names: Vec<String> = stmt.column_names().iter().map(|n| n.to_string()).collect();

    let mut cells: Vec<Vec<Cell>> = names.iter().map(|_| Vec::new()).collect();
    let mut rows = stmt.query([]).context("run query")?;
    while let Some(row) = rows.next().context("read row")? {
        for (idx, out) in cells.iter_mut().enumerate() {
            let cell = match row.get_ref(idx).context("read cell")? {
                ValueRef::Null => Cell::Null,
                ValueRef::Integer(v) => Cell::Num(v as f64),
                ValueRef::Real(v) => Cell::Num(v),
                ValueRef::Text(bytes) => Cell::Text(String::from_utf8_lossy(bytes).into_owned()),
                ValueRef::Blob(_) => Cell::Null,
            };
            out.push(cell);
        }
    }

    let mut table = GameTable::new();
    for (name, column) in names.into_iter().zip(cells) {
        let is_date = date_columns.contains(&name.as_str());
        let built = build_column(&name, column, is_date);
        table.push_column(name, built)?;
    }
    Ok(table)
}

fn build_column(name: &str, cells: Vec<Cell>, is_date: bool) -> Column {
    let mut kind = Kind::Unknown;
    for cell in &cells {
        match cell {
            Cell::Null => continue,
            Cell::Num(_) => kind = Kind::Num,
            Cell::Text(_) => kind = Kind::Text,
        }
        break;
    }
    if is_date {
        kind = Kind::Date;
    }

    match kind {
        Kind::Num | Kind::Unknown => {
            let mut mixed = 0usize;
            let values = cells
                .into_iter()
                .map(|c| match c {
                    Cell::Num(v) => Some(v),
                    Cell::Text(s) => {
                        let parsed = s.trim().parse::<f64>().ok();
                        mixed += usize::from(parsed.is_none());
                        parsed
                    }
                    Cell::Null => None,
                })
                .collect();
            if mixed > 0 {
                warn!(column = name, cells = mixed, "non-numeric text in numeric column");
            }
            Column::Num(values)
        }
        Kind::Text => Column::Text(
            cells
                .into_iter()
                .map(|c| match c {
                    Cell::Text(s) => Some(s),
                    Cell::Num(v) => Some(crate::table::Value::Num(v).to_string()),
                    Cell::Null => None,
                })
                .collect(),
        ),
        Kind::Date => {
            let mut unparsed = 0usize;
            let values = cells
                .into_iter()
                .map(|c| {
                    let parsed = match c {
                        Cell::Text(s) => parse_datetime(&s),
                        Cell::Num(v) => DateTime::from_timestamp(v as i64, 0).map(|d| d.naive_utc()),
                        Cell::Null => return None,
                    };
                    unparsed += usize::from(parsed.is_none());
                    parsed
                })
                .collect();
            if unparsed > 0 {
                warn!(column = name, cells = unparsed, "unparseable dates read as null");
            }
            Column::Date(values)
        }
    }
}

pub fn parse_datetime(raw: &str) -> Option<NaiveDateTime> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.naive_utc());
    }
    for fmt in [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M",
    ] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Some(naive);
        }
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}
