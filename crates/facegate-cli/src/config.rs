use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Runtime configuration: defaults, then an optional TOML file, then
/// `FACEGATE_*` environment variables.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Directory holding the gesture index, emotion record and saved images.
    pub data_dir: PathBuf,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// UltraFace detector file name inside `model_dir`.
    pub detector_model: String,
    /// FER+ emotion model file name inside `model_dir`.
    pub emotion_model: String,
    /// SSIM score a registered image must strictly exceed.
    pub match_threshold: f32,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = xdg_dir("XDG_DATA_HOME", ".local/share").join("facegate");
        Self {
            camera_device: "/dev/video0".to_string(),
            model_dir: data_dir.join("models"),
            data_dir,
            detector_model: "version-RFB-320.onnx".to_string(),
            emotion_model: "emotion-ferplus-8.onnx".to_string(),
            match_threshold: facegate_core::DEFAULT_MATCH_THRESHOLD,
        }
    }
}

impl Config {
    /// Load from `path` (or the default config file when `None`), then apply
    /// environment overrides. A missing default file is not an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => {
                let default_path = Self::default_path();
                if default_path.exists() {
                    Self::from_file(&default_path)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn default_path() -> PathBuf {
        xdg_dir("XDG_CONFIG_HOME", ".config").join("facegate/config.toml")
    }

    fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
    }

    /// Apply `FACEGATE_*` overrides from `lookup`. Unparseable numbers are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("FACEGATE_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        if let Some(v) = lookup("FACEGATE_DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("FACEGATE_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("FACEGATE_MATCH_THRESHOLD").and_then(|v| v.parse().ok()) {
            self.match_threshold = v;
        }
    }

    pub fn gesture_index_path(&self) -> PathBuf {
        self.data_dir.join("gestures.json")
    }

    pub fn gesture_image_dir(&self) -> PathBuf {
        self.data_dir.join("registered_gestures")
    }

    pub fn emotion_path(&self) -> PathBuf {
        self.data_dir.join("emotion.json")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }

    /// Path to the UltraFace detection model.
    pub fn detector_model_path(&self) -> String {
        self.model_dir
            .join(&self.detector_model)
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the FER+ emotion model.
    pub fn emotion_model_path(&self) -> String {
        self.model_dir
            .join(&self.emotion_model)
            .to_string_lossy()
            .into_owned()
    }
}

fn xdg_dir(var: &str, fallback: &str) -> PathBuf {
    std::env::var(var)
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(fallback)
        })
}
