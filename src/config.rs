use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_VERSION: u32 = 1;

const APP_DIR: &str = "otpvault";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Config {
    pub version: u32,
    /// Database file used when `--db` is not given.
    pub database: PathBuf,
}

impl Config {
    pub fn with_defaults() -> anyhow::Result<Self> {
        Ok(Config {
            version: CONFIG_VERSION,
            database: default_database_path()?,
        })
    }

    /// Reads the config file, or falls back to defaults when there is none.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&config_path()?)
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            log::debug!("no config at {}, using defaults", path.display());
            return Self::with_defaults();
        }
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config {}", path.display()))?;
        let cfg: Config = serde_json::from_str(&data)
            .with_context(|| format!("config {} is not valid", path.display()))?;
        if cfg.version != CONFIG_VERSION {
            anyhow::bail!("unsupported config version {} in {}", cfg.version, path.display());
        }
        Ok(cfg)
    }
}

pub fn config_path() -> anyhow::Result<PathBuf> {
    let dir = dirs::config_dir().ok_or_else(|| anyhow::anyhow!("cannot get config dir"))?;
    Ok(dir.join(APP_DIR).join("config.json"))
}

pub fn default_database_path() -> anyhow::Result<PathBuf> {
    let dir = dirs::data_dir().ok_or_else(|| anyhow::anyhow!("cannot get data dir"))?;
    Ok(dir.join(APP_DIR).join("database.json"))
}

pub fn save_config(cfg: &Config, path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let s = serde_json::to_string_pretty(cfg)?;
    std::fs::write(path, s).with_context(|| format!("cannot write config {}", path.display()))?;
    Ok(())
}
