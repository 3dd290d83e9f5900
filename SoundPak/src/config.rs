//! Tool configuration
//!
//! A [`ToolConfig`] is handed to every session explicitly. It can be
//! persisted as pretty JSON under the platform config directory.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::codec::AdpcmSettings;
use crate::error::Result;
use crate::model::HashMode;
use crate::session::{ExportPolicy, ImportPolicy};

const APP_DIR: &str = "SoundPak";

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR)
        .join("originality")
}

fn default_true() -> bool {
    true
}

/// Settings shared by the library entry points and the CLI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolConfig {
    /// Root of the originality cache
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    #[serde(default)]
    pub hash_mode: HashMode,
    #[serde(default)]
    pub import_policy: ImportPolicy,
    #[serde(default)]
    pub export_policy: ExportPolicy,
    /// IMA ADPCM encoder tuning used when imports are transcoded
    #[serde(default)]
    pub adpcm: AdpcmSettings,
    /// Size of the batch worker pool; `None` uses the global rayon pool
    #[serde(default)]
    pub worker_threads: Option<usize>,
    /// Write `.lip` side files next to exported entries that carry lip data
    #[serde(default = "default_true")]
    pub export_lip: bool,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            hash_mode: HashMode::default(),
            import_policy: ImportPolicy::default(),
            export_policy: ExportPolicy::default(),
            adpcm: AdpcmSettings::default(),
            worker_threads: None,
            export_lip: true,
        }
    }
}

impl ToolConfig {
    /// Default location of the persisted config
    #[must_use]
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join(APP_DIR).join("config.json"))
    }

    /// Load from the default location, falling back to defaults
    #[must_use]
    pub fn load() -> Self {
        Self::config_path()
            .and_then(|path| Self::load_from(&path).ok())
            .unwrap_or_default()
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Save to the default location
    pub fn save(&self) -> Result<()> {
        match Self::config_path() {
            Some(path) => self.save_to(&path),
            None => Ok(()),
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    #[must_use]
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::NoiseShaping;

    #[test]
    fn test_missing_fields_use_defaults() {
        let config: ToolConfig = serde_json::from_str(r#"{"hash_mode": "direct"}"#).unwrap();
        assert_eq!(config.hash_mode, HashMode::Direct);
        assert!(config.export_lip);
        assert_eq!(config.import_policy, ImportPolicy::Transcode);
        assert_eq!(config.cache_dir, default_cache_dir());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let mut config = ToolConfig::default().with_cache_dir(dir.path().join("cache"));
        config.adpcm.block_size = Some(1024);
        config.adpcm.noise_shaping = Some(NoiseShaping::Dynamic);
        config.worker_threads = Some(2);

        config.save_to(&path).unwrap();
        assert_eq!(ToolConfig::load_from(&path).unwrap(), config);
    }
}
