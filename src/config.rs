//! Boot configuration with appData support
//!
//! Static process configuration loaded once at startup. Runtime settings
//! (Sonarr connection, language preference, download tuning) live in the
//! `configs` table and are managed by [`crate::settings`].

use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub paths: PathsConfig,
    #[serde(default)]
    pub log_level: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Scratch space for in-flight chunk files.
    pub tmp_dir: PathBuf,
    /// Merged downloads waiting for finalization.
    pub downloads_dir: PathBuf,
    /// Downloaded poster images.
    pub posters_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let appdata = get_appdata_dir();
        Self {
            server: ServerConfig {
                host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env::var("PORT")
                    .ok()
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(8384),
            },
            paths: PathsConfig {
                tmp_dir: appdata.join("tmp"),
                downloads_dir: appdata.join("downloads"),
                posters_dir: appdata.join("posters"),
            },
            log_level: env::var("LOG_LEVEL").ok(),
        }
    }
}

/// Get the appData directory path
/// Priority: AWARR_APPDATA_DIR env var > ./appData
pub fn get_appdata_dir() -> PathBuf {
    env::var("AWARR_APPDATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./appData"))
}

/// Get the config file path with fallback
/// Tries: appData/config/config.toml -> config.toml (old location)
pub fn get_config_path() -> PathBuf {
    let appdata_config = get_appdata_dir().join("config/config.toml");
    if appdata_config.exists() {
        appdata_config
    } else {
        PathBuf::from("config.toml")
    }
}

/// Get the database file path
/// Always uses: appData/data/awarr.db (creates directory if needed)
pub fn get_db_path() -> PathBuf {
    let data_dir = get_appdata_dir().join("data");
    if !data_dir.exists() {
        std::fs::create_dir_all(&data_dir).ok();
    }
    data_dir.join("awarr.db")
}

/// Create appData directory structure if it doesn't exist
pub fn ensure_appdata_dirs() -> std::io::Result<()> {
    let appdata_dir = get_appdata_dir();

    std::fs::create_dir_all(appdata_dir.join("config"))?;
    std::fs::create_dir_all(appdata_dir.join("data"))?;
    std::fs::create_dir_all(appdata_dir.join("tmp"))?;
    std::fs::create_dir_all(appdata_dir.join("downloads"))?;
    std::fs::create_dir_all(appdata_dir.join("posters"))?;

    Ok(())
}

/// Save configuration to config.toml
pub fn save_config(config: &Config) -> anyhow::Result<()> {
    let config_path = get_appdata_dir().join("config/config.toml");

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let toml_string = toml::to_string_pretty(config)?;
    std::fs::write(&config_path, toml_string)?;

    tracing::info!("Configuration saved to {:?}", config_path);
    Ok(())
}

/// Remove stale chunk directories left behind by downloads that were
/// in flight when the process last stopped.
pub fn clean_tmp_dir(tmp_dir: &std::path::Path) {
    let Ok(entries) = std::fs::read_dir(tmp_dir) else {
        return;
    };
    let mut removed = 0usize;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() && std::fs::remove_dir_all(&path).is_ok() {
            removed += 1;
        }
    }
    if removed > 0 {
        tracing::info!("Removed {} stale chunk directories from {:?}", removed, tmp_dir);
    }
}
