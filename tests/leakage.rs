mod common;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use common::{Game, at, played, row_of, team_games, upcoming};
use roster_features::elo::EloConfig;
use roster_features::features::{FeatureCatalog, FeatureSpec};
use roster_features::pipeline::{apply_ratings, build_feature_frame, combine_sources, opponent_features};
use roster_features::table::{GameTable, Value};

const TEAMS: [&str; 6] = ["a", "b", "c", "d", "e", "f"];
const MAPS: [&str; 3] = ["nuke", "inferno", "mirage"];

fn random_season(rng: &mut StdRng, games: i64) -> Vec<Game> {
    let mut out = Vec::new();
    let mut game_id = 0;
    let mut match_id = 0;
    while game_id < games {
        match_id += 1;
        let home = rng.gen_range(0..TEAMS.len());
        let mut away = rng.gen_range(0..TEAMS.len() - 1);
        if away >= home {
            away += 1;
        }
        let day = 1 + (match_id as u32 % 28);
        let maps_in_match = rng.gen_range(1..=3);
        for n in 0..maps_in_match {
            game_id += 1;
            let map = MAPS[rng.gen_range(0..MAPS.len())];
            let winner = 13.0;
            let loser = rng.gen_range(0..12) as f64;
            let score = if rng.gen_bool(0.5) { (winner, loser) } else { (loser, winner) };
            let mut game = played(
                game_id,
                match_id,
                at(day, 10 + n),
                (TEAMS[home], TEAMS[away]),
                map,
                score,
            );
            game.kills = (rng.gen_range(0.4..0.9), rng.gen_range(0.4..0.9));
            out.push(game);
        }
    }
    out
}

fn catalog() -> FeatureCatalog {
    FeatureCatalog::new(vec![
        FeatureSpec::simple("overall_elo"),
        FeatureSpec::simple("overall_elo_op"),
        FeatureSpec::lagged("won", 1),
        FeatureSpec::historical_sum("game_played"),
        FeatureSpec::historical_average("won"),
        FeatureSpec::historical_average("kills_per_round").filtered("played_map", "nuke"),
        FeatureSpec::moving_average("won", 5),
        FeatureSpec::moving_average("kills_per_round", 3),
        FeatureSpec::games_played_last_days(7),
        FeatureSpec::categorical("played_map"),
    ])
}

fn features(games: &[Game]) -> GameTable {
    let fixtures = team_games(&[upcoming(10_000, 10_000, at(28, 23), ("a", "b"), "nuke")]);
    let mut table = combine_sources(&team_games(games), &fixtures).unwrap();
    let fast = EloConfig::fast();
    apply_ratings(&mut table, &[EloConfig::default(), fast]).unwrap();
    let mut frame = build_feature_frame(&table, &catalog()).unwrap();
    opponent_features(&mut frame).unwrap();
    frame
}

fn feature_row(frame: &GameTable, row: usize) -> Vec<(String, Value)> {
    frame
        .column_names()
        .iter()
        .filter(|n| n.contains('('))
        .map(|n| (n.clone(), frame.value(n, row).unwrap()))
        .collect()
}

#[test]
fn own_outcome_never_reaches_own_features() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let season = random_season(&mut rng, 60);
    let baseline = features(&season);

    for _ in 0..12 {
        let target = rng.gen_range(0..season.len());
        let mut mutated = season.clone();
        let game = &mut mutated[target];
        game.score = game.score.map(|(a, b)| (b, a));
        game.ct = game.ct.map(|(a, b)| (b + 3.0, a));
        game.tr = game.tr.map(|(a, b)| (b, a + 3.0));
        game.kills = (game.kills.1 + 0.5, game.kills.0 - 0.3);
        let changed = features(&mutated);

        for roster in [season[target].roster, season[target].opponent] {
            let before = row_of(&baseline, season[target].game_id, roster);
            let after = row_of(&changed, season[target].game_id, roster);
            assert_eq!(
                feature_row(&baseline, before),
                feature_row(&changed, after),
                "game {} leaked into its own features",
                season[target].game_id
            );
        }
    }
}

#[test]
fn later_games_do_see_the_change() {
    let mut rng = StdRng::seed_from_u64(7);
    let mut season = random_season(&mut rng, 40);
    let baseline = features(&season);

    let first = season
        .iter()
        .position(|g| g.roster == "a" || g.opponent == "a")
        .unwrap();
    season[first].score = season[first].score.map(|(a, b)| (b, a));
    let changed = features(&season);

    let row = row_of(&baseline, 10_000, "a");
    assert_ne!(feature_row(&baseline, row), feature_row(&changed, row_of(&changed, 10_000, "a")));
}
