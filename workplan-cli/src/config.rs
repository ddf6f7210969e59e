use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use workplan_core::SchedulerConfig;

use crate::state::ensure_workplan_home;

pub fn config_path(explicit: Option<&Path>) -> Result<PathBuf> {
    match explicit {
        Some(p) => Ok(p.to_path_buf()),
        None => Ok(ensure_workplan_home()?.join("config.toml")),
    }
}

/// Load and validate the scheduler config; a missing file means defaults.
///
/// Validation failures are fatal: the engine never runs on a bad calendar.
pub fn load_config(explicit: Option<&Path>) -> Result<SchedulerConfig> {
    let p = config_path(explicit)?;
    let cfg = if p.exists() {
        let s = fs::read_to_string(&p).with_context(|| format!("read {}", p.display()))?;
        toml::from_str(&s).with_context(|| format!("parse {}", p.display()))?
    } else {
        SchedulerConfig::default()
    };
    cfg.validate()
        .with_context(|| format!("invalid configuration in {}", p.display()))?;
    Ok(cfg)
}

pub fn save_config(cfg: &SchedulerConfig, explicit: Option<&Path>) -> Result<PathBuf> {
    let p = config_path(explicit)?;
    let s = toml::to_string_pretty(cfg).context("serialize config")?;
    fs::write(&p, s).with_context(|| format!("write {}", p.display()))?;
    Ok(p)
}

pub fn init_config(explicit: Option<&Path>) -> Result<()> {
    let p = config_path(explicit)?;
    if p.exists() {
        println!("Config already exists: {}", p.display());
        return Ok(());
    }
    let written = save_config(&SchedulerConfig::default(), explicit)?;
    println!("Wrote {}", written.display());
    Ok(())
}
