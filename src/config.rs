use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, StagehandError};
use crate::registry::DEFAULT_REGISTRY_FILE;

const APP_NAME: &str = "stagehand";

#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub manifest_dir: Option<String>,
    pub registry_file: Option<String>,
    pub max_concurrent: Option<usize>,
}

impl Config {
    pub fn load() -> Result<Self> {
        confy::load(APP_NAME, None).map_err(|e| StagehandError::Config(e.to_string()))
    }

    pub fn load_path(path: &Path) -> Result<Self> {
        confy::load_path(path).map_err(|e| StagehandError::Config(e.to_string()))
    }

    /// Directory scanned for manifests; the flag wins over the config file.
    pub fn manifest_dir(&self, flag: Option<PathBuf>) -> PathBuf {
        flag.or_else(|| self.manifest_dir.as_ref().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Relative registry paths are placed inside the manifest directory.
    pub fn registry_file(&self, flag: Option<PathBuf>, manifest_dir: &Path) -> PathBuf {
        let path = flag
            .or_else(|| self.registry_file.as_ref().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_REGISTRY_FILE));
        if path.is_absolute() {
            path
        } else {
            manifest_dir.join(path)
        }
    }

    /// Thread count for the worker pool. Zero lets rayon decide.
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent.unwrap_or(0)
    }
}
