use std::fs;
use std::path::{Path, PathBuf};

use crate::request::{FittingMode, ImageAttributes, SamplingMode};

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Remote bodies larger than this fail the load
    pub max_download_bytes: u64,
    pub start_paused: bool,
    pub local_thread_name: String,
    pub remote_thread_name: String,
    pub default_fitting: FittingMode,
    pub default_sampling: SamplingMode,
    pub orientation_correction: bool,
    pub http_user_agent: String,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            max_download_bytes: 50 * 1024 * 1024,
            start_paused: false,
            local_thread_name: "local".to_string(),
            remote_thread_name: "remote".to_string(),
            default_fitting: FittingMode::ShrinkToFit,
            default_sampling: SamplingMode::Box,
            orientation_correction: true,
            http_user_agent: concat!("pixload/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl LoaderConfig {
    pub fn load() -> Option<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn save(&self) -> Option<PathBuf> {
        let config_path = Self::config_path()?;
        self.save_to(&config_path)?;
        Some(config_path)
    }

    /// `None` when the file is missing or is not a config.
    pub fn load_from(path: &Path) -> Option<Self> {
        let contents = fs::read_to_string(path).ok()?;
        match serde_json::from_str(&contents) {
            Ok(config) => Some(config),
            Err(e) => {
                log::warn!("Ignoring malformed config {}: {e}", path.display());
                None
            }
        }
    }

    pub fn save_to(&self, path: &Path) -> Option<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).ok()?;
        }

        let json = serde_json::to_string_pretty(self).ok()?;
        fs::write(path, json).ok()
    }

    fn config_path() -> Option<PathBuf> {
        let home = std::env::home_dir()?;
        Some(home.join(".config").join("pixload").join("config.json"))
    }

    /// Request attributes for a target size using the configured defaults.
    pub fn attributes(&self, width: u32, height: u32) -> ImageAttributes {
        ImageAttributes {
            size: (width, height).into(),
            fitting: self.default_fitting,
            sampling: self.default_sampling,
            orientation_correction: self.orientation_correction,
        }
    }
}

#[test]
fn partial_config_keeps_defaults() {
    let config: LoaderConfig =
        serde_json::from_str(r#"{ "max_download_bytes": 1024, "default_fitting": "ScaleToFill" }"#)
            .unwrap();
    assert_eq!(config.max_download_bytes, 1024);
    assert_eq!(config.default_fitting, FittingMode::ScaleToFill);
    assert_eq!(config.default_sampling, SamplingMode::Box);
    assert_eq!(config.local_thread_name, "local");
    assert!(config.orientation_correction);
}

#[test]
fn config_round_trips_through_json() {
    let config = LoaderConfig {
        start_paused: true,
        default_sampling: SamplingMode::BoxThenLinear,
        ..Default::default()
    };
    let json = serde_json::to_string_pretty(&config).unwrap();
    assert_eq!(serde_json::from_str::<LoaderConfig>(&json).unwrap(), config);
}

#[test]
fn saved_config_loads_back() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("config.json");
    assert_eq!(LoaderConfig::load_from(&path), None);

    let config = LoaderConfig {
        max_download_bytes: 4096,
        default_fitting: FittingMode::FitHeight,
        orientation_correction: false,
        ..Default::default()
    };
    assert_eq!(config.save_to(&path), Some(()));
    assert_eq!(LoaderConfig::load_from(&path), Some(config));

    fs::write(&path, "not json").unwrap();
    assert_eq!(LoaderConfig::load_from(&path), None);
}
