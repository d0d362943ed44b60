use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::elo::RatingSnapshot;
use crate::model::TrainedModel;

const DATA_DIR: &str = "rinkcast";
const MODEL_FILE: &str = "model.json";
const SNAPSHOT_FILE: &str = "ratings.json";

/// `$XDG_CACHE_HOME/rinkcast`, else `~/.cache/rinkcast`.
pub fn app_data_dir() -> Option<PathBuf> {
    if let Ok(base) = std::env::var("XDG_CACHE_HOME")
        && !base.trim().is_empty()
    {
        return Some(PathBuf::from(base).join(DATA_DIR));
    }
    let home = std::env::var("HOME").ok()?;
    if home.trim().is_empty() {
        return None;
    }
    Some(PathBuf::from(home).join(".cache").join(DATA_DIR))
}

pub fn default_model_path() -> Option<PathBuf> {
    app_data_dir().map(|dir| dir.join(MODEL_FILE))
}

pub fn default_snapshot_path() -> Option<PathBuf> {
    app_data_dir().map(|dir| dir.join(SNAPSHOT_FILE))
}

/// Pretty JSON via a sibling tmp file and rename, so readers never see a partial write.
pub fn save_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(dir) = path.parent()
        && !dir.as_os_str().is_empty()
    {
        fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    }
    let json = serde_json::to_string_pretty(value).context("serialize json")?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json).with_context(|| format!("write {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("rename into {}", path.display()))?;
    Ok(())
}

pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parse {}", path.display()))
}

pub fn save_model(path: &Path, model: &TrainedModel) -> Result<()> {
    save_json_atomic(path, model)
}

/// Rejects artifacts whose schema hash or calibration map no longer hold together.
pub fn load_model(path: &Path) -> Result<TrainedModel> {
    let model: TrainedModel = load_json(path)?;
    model
        .validate()
        .with_context(|| format!("invalid model artifact {}", path.display()))?;
    Ok(model)
}

pub fn save_rating_snapshot(path: &Path, snapshot: &RatingSnapshot) -> Result<()> {
    save_json_atomic(path, snapshot)
}

pub fn load_rating_snapshot(path: &Path) -> Result<RatingSnapshot> {
    let snapshot: RatingSnapshot = load_json(path)?;
    snapshot
        .config
        .validate()
        .map_err(anyhow::Error::msg)
        .with_context(|| format!("invalid rating snapshot {}", path.display()))?;
    Ok(snapshot)
}
