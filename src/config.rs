use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::backend::archive::Compression;
use crate::backend::mangadex::ImageQuality;
use crate::error::{Error, Result};

pub const APP_DIR: &str = "manga-zip-tui";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: String,
    pub uploads_base_url: String,
    /// Translated language requested from the chapter feed
    pub language: String,
    pub user_agent: String,
    pub download_dir: PathBuf,
    pub image_quality: ImageQuality,
    pub compression: Compression,
    pub search_debounce_ms: u64,
    pub request_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: "https://api.mangadex.org".to_string(),
            uploads_base_url: "https://uploads.mangadex.org".to_string(),
            language: "en".to_string(),
            user_agent: format!("{}/{}", APP_DIR, env!("CARGO_PKG_VERSION")),
            download_dir: dirs::download_dir().unwrap_or_else(|| PathBuf::from(".")),
            image_quality: ImageQuality::Data,
            compression: Compression::Deflated,
            search_debounce_ms: 300,
            request_timeout_secs: 30,
        }
    }
}

pub fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
        .join("config.json")
}

pub fn log_path() -> PathBuf {
    let dir = dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR);
    fs::create_dir_all(&dir).ok();
    dir.join(format!("{}.log", APP_DIR))
}

impl Config {
    /// Loads the config file, falling back to defaults when it does not exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let content = fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Config(e.to_string()))?;
        fs::write(path, content)?;
        Ok(())
    }
}
