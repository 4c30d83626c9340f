use std::path::PathBuf;

use anyhow::Result;
use tracing::{Level, info};

use roster_features::config::PipelineConfig;
use roster_features::{dataset, export, logging, pipeline};

fn main() -> Result<()> {
    let mut config = PipelineConfig::from_env();
    if let Some(path) = parse_path_arg("--db") {
        config.db_path = path;
    }
    if let Some(path) = parse_path_arg("--catalog") {
        config.catalog_path = Some(path);
    }
    logging::init_logging(config.log_format, Level::INFO);

    let catalog = config.catalog()?;
    let profiles = config.profiles()?;
    let conn = dataset::open_db(&config.db_path)?;
    let sources = dataset::load_sources(&conn)?;

    let output = pipeline::run(
        &sources.team_games,
        &sources.matches_to_predict,
        &profiles,
        &catalog,
    )?;

    for (profile, stats) in profiles.iter().zip(&output.replay) {
        info!(
            profile = %profile.overall_key(),
            matches = stats.matches,
            rated = stats.games_rated,
            skipped = stats.games_skipped,
            "rating profile"
        );
    }

    info!(
        rows = output.features.len(),
        columns = output.features.column_names().len(),
        path = %config.features_path.display(),
        "saving features"
    );
    export::write_csv(&output.features, &config.features_path)?;

    info!(
        rows = output.matches_to_predict.len(),
        path = %config.matches_to_predict_path.display(),
        "saving matches to predict"
    );
    export::write_csv(&output.matches_to_predict, &config.matches_to_predict_path)?;

    info!(
        features = output.feature_list.len(),
        path = %config.feature_list_path.display(),
        "saving feature list"
    );
    export::write_feature_list(&output.feature_list, &config.feature_list_path)?;

    Ok(())
}

fn parse_path_arg(flag: &str) -> Option<PathBuf> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    let prefix = format!("{flag}=");
    for (idx, arg) in args.iter().enumerate() {
        if let Some(path) = arg.strip_prefix(&prefix) {
            let trimmed = path.trim();
            if !trimmed.is_empty() {
                return Some(PathBuf::from(trimmed));
            }
        }
        if arg == flag
            && let Some(next) = args.get(idx + 1)
            && !next.trim().is_empty()
        {
            return Some(PathBuf::from(next));
        }
    }
    None
}
