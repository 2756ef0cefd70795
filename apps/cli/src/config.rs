//! CLI configuration: `~/.config/partwise/config.json`.

use std::path::{Path, PathBuf};

use partwise_uploader::UploaderConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CliConfig {
    /// Backend base URL.
    pub endpoint: Option<String>,

    /// Where upload state is kept between runs.
    pub state_file: Option<PathBuf>,

    pub uploader: UploaderConfig,
}

impl CliConfig {
    /// Loads the config file. A missing or unparsable file yields defaults.
    pub fn load() -> Self {
        match config_file_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        match Self::read(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config, using defaults"
                );
                Self::default()
            }
        }
    }

    fn read(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// `--state` wins over the config file, which wins over the default path.
    pub fn state_path(&self, flag: Option<PathBuf>) -> anyhow::Result<PathBuf> {
        flag.or_else(|| self.state_file.clone())
            .or_else(partwise_uploader::default_state_path)
            .ok_or_else(|| anyhow::anyhow!("no state file location; pass --state"))
    }
}

fn config_file_path() -> Option<PathBuf> {
    partwise_uploader::config_dir().map(|d| d.join("partwise").join("config.json"))
}
