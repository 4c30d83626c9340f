use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::table::GameTable;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureListFile {
    pub features_list: Vec<String>,
}

/// Writes `frame` as CSV with a header row. Nulls are empty cells.
pub fn write_csv(frame: &GameTable, path: &Path) -> Result<()> {
    let tmp = tmp_path(path, "csv.tmp");
    ensure_parent(path)?;
    {
        let mut writer = csv::Writer::from_path(&tmp)
            .with_context(|| format!("create {}", tmp.display()))?;
        writer
            .write_record(frame.column_names())
            .context("write csv header")?;
        let columns = frame
            .column_names()
            .iter()
            .map(|n| frame.column(n))
            .collect::<crate::error::Result<Vec<_>>>()?;
        let mut record: Vec<String> = Vec::with_capacity(columns.len());
        for row in 0..frame.len() {
            record.clear();
            record.extend(columns.iter().map(|c| c.value(row).to_string()));
            writer.write_record(&record).context("write csv row")?;
        }
        writer.flush().context("flush csv")?;
    }
    fs::rename(&tmp, path).with_context(|| format!("move csv into {}", path.display()))
}

/// Writes `{"features_list": [...]}` with the names sorted.
pub fn write_feature_list(names: &[String], path: &Path) -> Result<()> {
    let mut features_list = names.to_vec();
    features_list.sort();
    let json = serde_json::to_string_pretty(&FeatureListFile { features_list })
        .context("serialize feature list")?;
    let tmp = tmp_path(path, "json.tmp");
    ensure_parent(path)?;
    fs::write(&tmp, json).with_context(|| format!("write {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("move feature list into {}", path.display()))
}

pub fn read_feature_list(path: &Path) -> Result<Vec<String>> {
    let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let file: FeatureListFile =
        serde_json::from_str(&raw).with_context(|| format!("parse {}", path.display()))?;
    Ok(file.features_list)
}

fn tmp_path(path: &Path, extension: &str) -> PathBuf {
    path.with_extension(extension)
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(dir) = path.parent()
        && !dir.as_os_str().is_empty()
    {
        fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Column;

    #[test]
    fn csv_has_header_and_empty_nulls() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/features.csv");
        let mut t = GameTable::new();
        t.push_column("game_id", Column::Num(vec![Some(1.0), Some(2.0)]))
            .unwrap();
        t.push_column("historical_average(won)", Column::Num(vec![None, Some(0.5)]))
            .unwrap();
        write_csv(&t, &path).unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        assert_eq!(raw, "game_id,historical_average(won)\n1,\n2,0.5\n");
        assert!(!path.with_extension("csv.tmp").exists());
    }

    #[test]
    fn feature_list_is_sorted_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feature_list.json");
        let names = vec!["moving_average(won-3)".to_string(), "categorical(played_map=nuke)".to_string()];
        write_feature_list(&names, &path).unwrap();
        let back = read_feature_list(&path).unwrap();
        assert_eq!(
            back,
            vec!["categorical(played_map=nuke)".to_string(), "moving_average(won-3)".to_string()]
        );
        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"features_list\""));
    }
}
