use std::env;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::elo::EloConfig;
use crate::features::{FeatureCatalog, default_catalog};
use crate::logging::LogFormat;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub db_path: PathBuf,
    pub features_path: PathBuf,
    pub matches_to_predict_path: PathBuf,
    pub feature_list_path: PathBuf,
    pub catalog_path: Option<PathBuf>,
    pub profiles_path: Option<PathBuf>,
    pub log_format: LogFormat,
}

impl PipelineConfig {
    /// Reads `.env.local` then `.env` (neither overrides the real environment)
    /// and builds the config from the process environment.
    pub fn from_env() -> Self {
        let _ = dotenvy::from_filename(".env.local");
        let _ = dotenvy::from_filename(".env");
        Self {
            db_path: path_env("FEATURES_DB_PATH", "data/games.sqlite"),
            features_path: path_env("FEATURES_DF_PATH", "data/features.csv"),
            matches_to_predict_path: path_env(
                "MATCHES_TO_PREDICT_PATH",
                "data/matches_to_predict.csv",
            ),
            feature_list_path: path_env("FEATURES_LIST_PATH", "data/feature_list.json"),
            catalog_path: opt_env("FEATURES_CATALOG_PATH").map(PathBuf::from),
            profiles_path: opt_env("RATING_PROFILES_PATH").map(PathBuf::from),
            log_format: opt_env("LOG_FORMAT")
                .and_then(|v| LogFormat::parse(&v))
                .unwrap_or(LogFormat::Pretty),
        }
    }

    pub fn catalog(&self) -> Result<FeatureCatalog> {
        let Some(path) = &self.catalog_path else {
            return Ok(default_catalog());
        };
        let raw = fs::read_to_string(path)
            .with_context(|| format!("read feature catalog {}", path.display()))?;
        FeatureCatalog::from_json(&raw)
            .with_context(|| format!("parse feature catalog {}", path.display()))
    }

    /// Rating profiles to replay. Defaults to the standard, slow and fast
    /// presets.
    pub fn profiles(&self) -> Result<Vec<EloConfig>> {
        let Some(path) = &self.profiles_path else {
            return Ok(default_profiles());
        };
        let raw = fs::read_to_string(path)
            .with_context(|| format!("read rating profiles {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("parse rating profiles {}", path.display()))
    }
}

pub fn default_profiles() -> Vec<EloConfig> {
    vec![EloConfig::default(), EloConfig::slow(), EloConfig::fast()]
}

fn opt_env(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|val| {
        if val.trim().is_empty() {
            None
        } else {
            Some(val.trim().to_string())
        }
    })
}

fn path_env(key: &str, default: &str) -> PathBuf {
    opt_env(key).map_or_else(|| PathBuf::from(default), PathBuf::from)
}
