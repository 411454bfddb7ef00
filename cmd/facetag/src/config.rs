//! Configuration file loading.
//!
//! Configuration is stored in ~/.mindlog/facetag/config.yaml (JSON also
//! accepted). Every field is optional; CLI flags override file values.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use mindlog_personid::Config as TaggerConfig;
use serde::{Deserialize, Serialize};

/// Default base directory name under the home directory.
pub const DEFAULT_BASE_DIR: &str = ".mindlog";
/// Application directory name.
pub const APP_NAME: &str = "facetag";
/// Default configuration filename.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
/// Default identity store filename, as used by earlier MindLog deployments.
pub const DEFAULT_STORE_FILE: &str = "face_database.json";
/// Default listen address for `serve`.
pub const DEFAULT_LISTEN: &str = ":8080";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    /// Identity store path. `~/` is expanded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store: Option<PathBuf>,

    /// Listen address for the HTTP server (e.g. ":8080", "127.0.0.1:9000").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listen: Option<String>,

    /// Matching and clustering parameters.
    pub tagger: TaggerConfig,
}

impl FileConfig {
    /// ~/.mindlog/facetag
    pub fn default_app_dir() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(DEFAULT_BASE_DIR).join(APP_NAME))
    }

    /// ~/.mindlog/facetag/config.yaml
    pub fn default_config_path() -> Option<PathBuf> {
        Self::default_app_dir().map(|dir| dir.join(DEFAULT_CONFIG_FILE))
    }

    /// Resolved identity store path: the configured one, or
    /// ~/.mindlog/facetag/data/face_database.json.
    pub fn store_path(&self) -> Result<PathBuf> {
        match &self.store {
            Some(p) => Ok(expand_home(p)),
            None => Self::default_app_dir()
                .map(|dir| dir.join("data").join(DEFAULT_STORE_FILE))
                .context("cannot determine home directory for the identity store"),
        }
    }

    pub fn listen(&self) -> &str {
        self.listen.as_deref().unwrap_or(DEFAULT_LISTEN)
    }
}

/// Loads the config file. A missing default file yields defaults; a
/// missing explicit file is an error.
pub fn load_config(custom_path: Option<&Path>) -> Result<FileConfig> {
    let (path, explicit) = match custom_path {
        Some(p) => (p.to_path_buf(), true),
        None => match FileConfig::default_config_path() {
            Some(p) => (p, false),
            None => return Ok(FileConfig::default()),
        },
    };

    if !path.exists() {
        if explicit {
            anyhow::bail!("config file not found: {}", path.display());
        }
        return Ok(FileConfig::default());
    }

    let data = std::fs::read(&path).with_context(|| format!("read config {}", path.display()))?;
    parse_config(&path, &data)
}

fn parse_config(path: &Path, data: &[u8]) -> Result<FileConfig> {
    let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("");
    let cfg = match ext {
        "json" => serde_json::from_slice(data)?,
        _ => serde_yaml::from_slice(data)?,
    };
    Ok(cfg)
}

/// Expands a leading `~/` to the home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}
