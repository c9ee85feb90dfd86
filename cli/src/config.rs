use anyhow::{Context, Result, bail};
use directories::ProjectDirs;
use std::path::{Path, PathBuf};

use calsnap_core::vision::VisionConfig;

const API_KEY_VARS: [&str; 2] = ["CALSNAP_API_KEY", "OPENAI_API_KEY"];
const API_URL_VAR: &str = "CALSNAP_API_URL";

pub struct Config {
    pub db_path: PathBuf,
    pub data_dir: PathBuf,
}

impl Config {
    pub fn load() -> Result<Self> {
        let proj_dirs =
            ProjectDirs::from("", "", "calsnap").context("Could not determine home directory")?;

        let data_dir = proj_dirs.data_dir().to_path_buf();
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;

        let db_path = data_dir.join("calsnap.db");

        Ok(Config { db_path, data_dir })
    }

    /// Settings for the vision client. Only `snap` needs these.
    pub fn vision(&self) -> Result<VisionConfig> {
        let env_key = API_KEY_VARS
            .iter()
            .find_map(|var| std::env::var(var).ok());
        let api_key = resolve_api_key(env_key, &self.data_dir.join("api_key"))?;

        let mut config = VisionConfig::new(api_key);
        if let Some(endpoint) = std::env::var(API_URL_VAR).ok().filter(|e| !e.trim().is_empty()) {
            config = config.with_endpoint(endpoint.trim());
        }
        Ok(config)
    }
}

/// Environment first, then the key file. Blank values count as missing.
fn resolve_api_key(env_key: Option<String>, key_file: &Path) -> Result<String> {
    if let Some(key) = env_key.map(|k| k.trim().to_string()).filter(|k| !k.is_empty()) {
        return Ok(key);
    }

    if key_file.exists() {
        let key = std::fs::read_to_string(key_file)
            .with_context(|| format!("Failed to read API key file: {}", key_file.display()))?;
        let key = key.trim();
        if !key.is_empty() {
            return Ok(key.to_string());
        }
    }

    bail!(
        "No API key configured. Set CALSNAP_API_KEY or OPENAI_API_KEY, or write the key to {}",
        key_file.display()
    )
}
