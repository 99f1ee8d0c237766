use anyhow::{Context, Result};
use edgeface_core::{DetectorConfig, RecognitionConfig};
use serde::Deserialize;
use std::path::{Path, PathBuf};

const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";

/// CLI configuration, loaded from a TOML file with `EDGEFACE_*` overrides.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub recognition: RecognitionConfig,
    pub detector: DetectorConfig,
    pub camera: CameraConfig,
    pub paths: PathsConfig,
    pub collect: CollectConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// `/dev/video{index}`; indices 0, 1, 2 are tried if it fails.
    pub index: u32,
    pub width: u32,
    pub height: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            index: 0,
            width: 640,
            height: 480,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Directory holding `faces.json` and `names.json`.
    pub dataset_dir: PathBuf,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// SQLite attendance database.
    pub attendance_db: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        let data_dir = default_data_dir();
        Self {
            dataset_dir: data_dir.join("dataset"),
            model_dir: data_dir.join("models"),
            attendance_db: data_dir.join("attendance.db"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CollectConfig {
    /// Samples captured per person in one `collect` run.
    pub samples_per_person: usize,
    /// Keep one frame out of every `capture_every`.
    pub capture_every: u32,
}

impl Default for CollectConfig {
    fn default() -> Self {
        Self {
            samples_per_person: 100,
            capture_every: 10,
        }
    }
}

fn xdg_dir(var: &str, home_relative: &str) -> PathBuf {
    std::env::var(var).map(PathBuf::from).unwrap_or_else(|_| {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
        PathBuf::from(home).join(home_relative)
    })
}

fn default_data_dir() -> PathBuf {
    xdg_dir("XDG_DATA_HOME", ".local/share").join("edgeface")
}

/// `$XDG_CONFIG_HOME/edgeface/config.toml`.
pub fn default_config_path() -> PathBuf {
    xdg_dir("XDG_CONFIG_HOME", ".config")
        .join("edgeface")
        .join("config.toml")
}

impl Config {
    /// Load from `path`, or from the default location when `None`.
    ///
    /// An explicit path must exist; a missing default file means defaults.
    /// Environment overrides are applied last.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default = default_config_path();
                if default.exists() {
                    Self::from_file(&default)?
                } else {
                    tracing::debug!(path = %default.display(), "no config file; using defaults");
                    Self::default()
                }
            }
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: Self = toml::from_str(&text)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        tracing::info!(path = %path.display(), "loaded config");
        Ok(config)
    }

    /// Apply `EDGEFACE_*` overrides. Unparseable values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = lookup("EDGEFACE_DATA_DIR").map(PathBuf::from) {
            self.paths.dataset_dir = dir.join("dataset");
            self.paths.model_dir = dir.join("models");
            self.paths.attendance_db = dir.join("attendance.db");
        }
        if let Some(dir) = lookup("EDGEFACE_DATASET_DIR") {
            self.paths.dataset_dir = dir.into();
        }
        if let Some(dir) = lookup("EDGEFACE_MODEL_DIR") {
            self.paths.model_dir = dir.into();
        }
        if let Some(path) = lookup("EDGEFACE_DB_PATH") {
            self.paths.attendance_db = path.into();
        }

        let camera = &mut self.camera;
        camera.index = parsed(&lookup, "EDGEFACE_CAMERA_INDEX", camera.index);

        let recognition = &mut self.recognition;
        recognition.confidence_threshold = parsed(
            &lookup,
            "EDGEFACE_CONFIDENCE_THRESHOLD",
            recognition.confidence_threshold,
        );
        recognition.frame_skip_interval =
            parsed(&lookup, "EDGEFACE_FRAME_SKIP", recognition.frame_skip_interval);
        recognition.k = parsed(&lookup, "EDGEFACE_K", recognition.k);
    }

    /// Path to the SCRFD detection model.
    pub fn detector_model_path(&self) -> PathBuf {
        self.paths.model_dir.join(DETECTOR_MODEL_FILE)
    }
}

fn parsed<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    lookup(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
