use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use crate::common::error::{KioskError, Result};
use crate::common::paths;
use crate::core::session::AbsencePolicy;

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub models: ModelConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub recognizer: RecognizerConfig,
    #[serde(default)]
    pub gallery: GalleryConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub gesture: GestureConfig,
    #[serde(default)]
    pub ocr: OcrConfig,
    #[serde(default)]
    pub devices: DeviceConfig,
    #[serde(default)]
    pub announcer: AnnouncerConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub analytics: AnalyticsConfig,
    #[serde(default)]
    pub performance: PerformanceConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct CameraConfig {
    pub device_index: u32,
    pub width: u32,
    pub height: u32,
    pub warmup_frames: u32,
    pub warmup_delay_ms: u64,
    /// Flip frames horizontally so the preview behaves like a mirror.
    pub mirror: bool,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            width: 1280,
            height: 720,
            warmup_frames: 5,
            warmup_delay_ms: 50,
            mirror: true,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ModelConfig {
    pub detector_path: PathBuf,
    pub recognizer_path: PathBuf,
    pub emotion_path: PathBuf,
    /// Hand tracking is disabled when this file does not exist.
    pub hand_path: PathBuf,
}

impl Default for ModelConfig {
    fn default() -> Self {
        let base = paths::system_models_dir();
        Self {
            detector_path: base.join("face_detector.onnx"),
            recognizer_path: base.join("face_embedding.onnx"),
            emotion_path: base.join("emotion_ferplus.onnx"),
            hand_path: base.join("hand_landmark.onnx"),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct DetectorConfig {
    pub input_width: u32,
    pub input_height: u32,
    pub confidence: f32,
    pub nms_threshold: f32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            input_width: 640,
            input_height: 640,
            confidence: 0.5,
            nms_threshold: 0.45,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RecognizerConfig {
    pub input_size: u32,
    pub normalization_value: f32,
    pub similarity_threshold: f32,
}

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self {
            input_size: 112,
            normalization_value: 127.5,
            similarity_threshold: 0.5,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct GalleryConfig {
    /// Directory of reference images; each file stem is an identity label.
    pub dataset_dir: PathBuf,
    pub cache_file: Option<PathBuf>,
}

impl Default for GalleryConfig {
    fn default() -> Self {
        Self {
            dataset_dir: PathBuf::from("dataset"),
            cache_file: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum AbsencePolicyKind {
    Immediate,
    GraceWindow,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct AuthConfig {
    pub prompt_interval_secs: u64,
    pub absence_policy: AbsencePolicyKind,
    pub grace_window_ms: u64,
    /// Process at most this many faces per frame, largest first. 0 means all.
    pub max_faces: usize,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            prompt_interval_secs: 5,
            absence_policy: AbsencePolicyKind::Immediate,
            grace_window_ms: 1500,
            max_faces: 1,
        }
    }
}

impl AuthConfig {
    pub fn policy(&self) -> AbsencePolicy {
        match self.absence_policy {
            AbsencePolicyKind::Immediate => AbsencePolicy::Immediate,
            AbsencePolicyKind::GraceWindow => {
                AbsencePolicy::GraceWindow(Duration::from_millis(self.grace_window_ms))
            }
        }
    }

    pub fn prompt_interval(&self) -> Duration {
        Duration::from_secs(self.prompt_interval_secs)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct GestureConfig {
    pub max_hands: usize,
    pub hysteresis_px: f32,
    pub scale_step: f32,
    pub scale_min: f32,
    pub scale_max: f32,
    pub hand_input_size: u32,
    pub presence_threshold: f32,
}

impl Default for GestureConfig {
    fn default() -> Self {
        Self {
            max_hands: 1,
            hysteresis_px: 5.0,
            scale_step: 0.05,
            scale_min: 0.5,
            scale_max: 3.0,
            hand_input_size: 224,
            presence_threshold: 0.7,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct OcrConfig {
    pub program: String,
    pub language: String,
    pub interval_ms: u64,
    pub retention_secs: u64,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            program: "tesseract".into(),
            language: "eng".into(),
            interval_ms: 1000,
            retention_secs: 30,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum BrightnessBackend {
    Sysfs,
    Command,
    None,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct DeviceConfig {
    /// Program and arguments; `{percent}` is replaced by the target level.
    /// An empty list disables volume control.
    pub volume_command: Vec<String>,
    pub brightness_backend: BrightnessBackend,
    pub brightness_command: Vec<String>,
    /// Defaults to the first entry under /sys/class/backlight.
    pub backlight_dir: Option<PathBuf>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            volume_command: ["pactl", "set-sink-volume", "@DEFAULT_SINK@", "{percent}%"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            brightness_backend: BrightnessBackend::Sysfs,
            brightness_command: ["brightnessctl", "set", "{percent}%"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            backlight_dir: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct AnnouncerConfig {
    pub enabled: bool,
    pub program: String,
    pub args: Vec<String>,
    pub queue_capacity: usize,
}

impl Default for AnnouncerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            program: "espeak-ng".into(),
            args: vec!["-s".into(), "150".into(), "-a".into(), "200".into()],
            queue_capacity: 8,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct LedgerConfig {
    /// Defaults to `attendance.csv` in the data directory.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct AnalyticsConfig {
    /// Defaults to `emotion_analytics.png` in the data directory.
    pub output_path: Option<PathBuf>,
    pub export_on_shutdown: bool,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            output_path: None,
            export_on_shutdown: true,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct PerformanceConfig {
    pub optimization_level: u32,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self { optimization_level: 3 }
    }
}

const LOCAL_CONFIG: &str = "configs/kiosk.toml";

impl Config {
    pub fn load() -> Result<Self> {
        let local = PathBuf::from(LOCAL_CONFIG);
        if local.exists() {
            return Self::load_from_path(&local);
        }
        Self::load_from_path(&paths::system_config_file())
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(KioskError::Config(format!(
                "Config file not found: {}. Please create it from configs/kiosk.toml.",
                path.display()
            )));
        }

        tracing::info!("Loading config from: {}", path.display());
        let contents = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&contents)?;
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)
            .map_err(|e| KioskError::Config(format!("Config parse error: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.camera.width == 0 || self.camera.width > 4096 {
            return Err(KioskError::Config(format!(
                "Camera width must be between 1 and 4096, got {}", self.camera.width
            )));
        }
        if self.camera.height == 0 || self.camera.height > 4096 {
            return Err(KioskError::Config(format!(
                "Camera height must be between 1 and 4096, got {}", self.camera.height
            )));
        }

        if !(0.0..=1.0).contains(&self.detector.confidence) {
            return Err(KioskError::Config(format!(
                "Detection confidence must be between 0.0 and 1.0, got {}",
                self.detector.confidence
            )));
        }
        if !(-1.0..=1.0).contains(&self.recognizer.similarity_threshold) {
            return Err(KioskError::Config(format!(
                "Similarity threshold must be between -1.0 and 1.0, got {}",
                self.recognizer.similarity_threshold
            )));
        }
        if self.recognizer.input_size == 0 || self.recognizer.input_size > 1024 {
            return Err(KioskError::Config(format!(
                "Recognizer input size must be between 1 and 1024, got {}",
                self.recognizer.input_size
            )));
        }

        if self.auth.prompt_interval_secs == 0 {
            return Err(KioskError::Config(
                "Prompt interval must be at least 1 second".into(),
            ));
        }

        let g = &self.gesture;
        if g.max_hands == 0 {
            return Err(KioskError::Config("gesture.max_hands must be at least 1".into()));
        }
        if !(g.scale_min > 0.0 && g.scale_min < g.scale_max) {
            return Err(KioskError::Config(format!(
                "Scale bounds must satisfy 0 < min < max, got [{}, {}]",
                g.scale_min, g.scale_max
            )));
        }
        if g.hysteresis_px < 0.0 || g.scale_step <= 0.0 {
            return Err(KioskError::Config(
                "Hysteresis must be non-negative and scale step positive".into(),
            ));
        }

        if self.announcer.queue_capacity == 0 {
            return Err(KioskError::Config(
                "announcer.queue_capacity must be at least 1".into(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.auth.prompt_interval_secs, 5);
        assert_eq!(config.gesture.max_hands, 1);
        assert_eq!(config.auth.policy(), AbsencePolicy::Immediate);
        assert_eq!(config.auth.max_faces, 1);
    }

    #[test]
    fn grace_window_policy_is_parsed() {
        let config = Config::from_toml(
            "[auth]\nabsence_policy = \"grace-window\"\ngrace_window_ms = 2500\n",
        )
        .unwrap();
        assert_eq!(
            config.auth.policy(),
            AbsencePolicy::GraceWindow(Duration::from_millis(2500))
        );
    }

    #[test]
    fn rejects_inverted_scale_bounds() {
        let err = Config::from_toml("[gesture]\nscale_min = 3.0\nscale_max = 0.5\n");
        assert!(matches!(err, Err(KioskError::Config(_))));
    }

    #[test]
    fn shipped_config_is_valid() {
        let config = Config::from_toml(include_str!("../../configs/kiosk.toml")).unwrap();
        assert_eq!(config.devices.brightness_backend, BrightnessBackend::Sysfs);
        assert_eq!(config.announcer.queue_capacity, 8);
        assert_eq!(config.auth.max_faces, 1);
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load_from_path(&dir.path().join("nope.toml"));
        assert!(matches!(err, Err(KioskError::Config(_))));
    }
}
