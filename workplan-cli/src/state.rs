use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;

/// Overrides the state directory (default `~/.workplan`).
pub const HOME_ENV: &str = "WORKPLAN_HOME";

pub fn workplan_home() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(HOME_ENV) {
        return Ok(PathBuf::from(dir));
    }
    let home = std::env::var("HOME").context("HOME is not set")?;
    Ok(PathBuf::from(home).join(".workplan"))
}

pub fn ensure_workplan_home() -> Result<PathBuf> {
    let dir = workplan_home()?;
    fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;
    Ok(dir)
}

pub fn snapshot_path() -> Result<PathBuf> {
    Ok(ensure_workplan_home()?.join("snapshot.json"))
}
