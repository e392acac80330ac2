use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::camera::CameraConfig;
use crate::control::LoopSettings;
use crate::detect::DetectionConfig;
use crate::error::{SentryError, SentryResult};
use crate::motor::{Direction, GpioMode, MotorPins, Speed};

pub const CONFIG_ENV: &str = "MOTOR_SENTRY_CONFIG";

const DEFAULT_MOTOR_SPEED: u8 = 50;
const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;
const DEFAULT_MODEL_PATH: &str = "yolov8n.onnx";
const DEFAULT_DETECTION_INTERVAL_SECS: f64 = 0.1;
const DEFAULT_CAMERA_INDEX: u32 = 1;
const DEFAULT_CAMERA_WIDTH: u32 = 640;
const DEFAULT_CAMERA_HEIGHT: u32 = 480;
const DEFAULT_TARGET_CLASS: &str = "bottle";

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct SentryConfigFile {
    motor_pin1: Option<u8>,
    motor_pin2: Option<u8>,
    enable_pin: Option<u8>,
    motor_speed: Option<u8>,
    motor_direction: Option<String>,
    confidence_threshold: Option<f32>,
    model_path: Option<String>,
    detection_interval_seconds: Option<f64>,
    camera_index: Option<u32>,
    camera_width: Option<u32>,
    camera_height: Option<u32>,
    camera_auto_detect: Option<bool>,
    gpio_mode: Option<String>,
    target_classes: Option<Vec<String>>,
    frame_read_retries: Option<u32>,
    gpio_backend: Option<GpioBackend>,
    camera_backend: Option<CameraBackend>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GpioBackend {
    #[default]
    Rppal,
    Simulated,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraBackend {
    #[default]
    V4l2,
    Synthetic,
}

/// Validated runtime configuration.
#[derive(Debug, Clone)]
pub struct SentryConfig {
    pub motor_pin1: u8,
    pub motor_pin2: u8,
    pub enable_pin: u8,
    pub motor_speed: u8,
    pub motor_direction: Direction,
    pub confidence_threshold: f32,
    pub model_path: String,
    pub detection_interval: Duration,
    pub camera_index: u32,
    pub camera_width: u32,
    pub camera_height: u32,
    pub camera_auto_detect: bool,
    pub gpio_mode: GpioMode,
    pub target_classes: BTreeSet<String>,
    pub frame_read_retries: u32,
    pub gpio_backend: GpioBackend,
    pub camera_backend: CameraBackend,
}

// Pins stay optional until env overrides have been applied.
struct PendingPins {
    pin1: Option<u8>,
    pin2: Option<u8>,
    enable: Option<u8>,
}

impl SentryConfig {
    /// Load from `path`, or from `MOTOR_SENTRY_CONFIG` when `path` is `None`,
    /// then apply `MOTOR_SENTRY_*` overrides and validate.
    pub fn load(path: Option<&Path>) -> SentryResult<Self> {
        let config_path = match path {
            Some(path) => Some(path.to_path_buf()),
            None => std::env::var(CONFIG_ENV)
                .ok()
                .filter(|value| !value.trim().is_empty())
                .map(PathBuf::from),
        };
        let file_cfg = match config_path.as_deref() {
            Some(path) => read_config_file(path)?,
            None => SentryConfigFile::default(),
        };
        let (mut pins, mut cfg) = Self::from_file(file_cfg)?;
        cfg.apply_env(&mut pins)?;
        cfg.motor_pin1 = require_pin("motor_pin1", pins.pin1)?;
        cfg.motor_pin2 = require_pin("motor_pin2", pins.pin2)?;
        cfg.enable_pin = require_pin("enable_pin", pins.enable)?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: SentryConfigFile) -> SentryResult<(PendingPins, Self)> {
        let pins = PendingPins {
            pin1: file.motor_pin1,
            pin2: file.motor_pin2,
            enable: file.enable_pin,
        };
        let motor_direction = match file.motor_direction.as_deref() {
            Some(value) => value.parse()?,
            None => Direction::default(),
        };
        let gpio_mode = match file.gpio_mode.as_deref() {
            Some(value) => value.parse()?,
            None => GpioMode::default(),
        };
        let detection_interval = interval_from_secs(
            file.detection_interval_seconds
                .unwrap_or(DEFAULT_DETECTION_INTERVAL_SECS),
        )?;
        let target_classes = file
            .target_classes
            .unwrap_or_else(|| vec![DEFAULT_TARGET_CLASS.to_string()])
            .into_iter()
            .map(|class| class.trim().to_string())
            .filter(|class| !class.is_empty())
            .collect();

        let cfg = Self {
            motor_pin1: 0,
            motor_pin2: 0,
            enable_pin: 0,
            motor_speed: file.motor_speed.unwrap_or(DEFAULT_MOTOR_SPEED),
            motor_direction,
            confidence_threshold: file
                .confidence_threshold
                .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD),
            model_path: file
                .model_path
                .unwrap_or_else(|| DEFAULT_MODEL_PATH.to_string()),
            detection_interval,
            camera_index: file.camera_index.unwrap_or(DEFAULT_CAMERA_INDEX),
            camera_width: file.camera_width.unwrap_or(DEFAULT_CAMERA_WIDTH),
            camera_height: file.camera_height.unwrap_or(DEFAULT_CAMERA_HEIGHT),
            camera_auto_detect: file.camera_auto_detect.unwrap_or(true),
            gpio_mode,
            target_classes,
            frame_read_retries: file.frame_read_retries.unwrap_or(0),
            gpio_backend: file.gpio_backend.unwrap_or_default(),
            camera_backend: file.camera_backend.unwrap_or_default(),
        };
        Ok((pins, cfg))
    }

    fn apply_env(&mut self, pins: &mut PendingPins) -> SentryResult<()> {
        if let Some(pin) = env_parsed::<u8>("MOTOR_SENTRY_MOTOR_PIN1")? {
            pins.pin1 = Some(pin);
        }
        if let Some(pin) = env_parsed::<u8>("MOTOR_SENTRY_MOTOR_PIN2")? {
            pins.pin2 = Some(pin);
        }
        if let Some(pin) = env_parsed::<u8>("MOTOR_SENTRY_ENABLE_PIN")? {
            pins.enable = Some(pin);
        }
        if let Some(speed) = env_parsed::<u8>("MOTOR_SENTRY_MOTOR_SPEED")? {
            self.motor_speed = speed;
        }
        if let Some(threshold) = env_parsed::<f32>("MOTOR_SENTRY_CONFIDENCE_THRESHOLD")? {
            self.confidence_threshold = threshold;
        }
        if let Some(path) = env_value("MOTOR_SENTRY_MODEL_PATH") {
            self.model_path = path;
        }
        if let Some(secs) = env_parsed::<f64>("MOTOR_SENTRY_DETECTION_INTERVAL")? {
            self.detection_interval = interval_from_secs(secs)?;
        }
        if let Some(index) = env_parsed::<u32>("MOTOR_SENTRY_CAMERA_INDEX")? {
            self.camera_index = index;
        }
        // Set but empty clears the allow-list (match any class).
        if let Ok(classes) = std::env::var("MOTOR_SENTRY_TARGET_CLASSES") {
            self.target_classes = split_csv(&classes).into_iter().collect();
        }
        if let Some(mode) = env_value("MOTOR_SENTRY_GPIO_MODE") {
            self.gpio_mode = mode.parse()?;
        }
        Ok(())
    }

    fn validate(&self) -> SentryResult<()> {
        Speed::new(self.motor_speed)?;
        self.detection_config()?;
        if self.model_path.trim().is_empty() {
            return Err(SentryError::Config("model_path must not be empty".into()));
        }
        if self.camera_width == 0 || self.camera_height == 0 {
            return Err(SentryError::Config(
                "camera_width and camera_height must be greater than zero".into(),
            ));
        }
        self.motor_pins().resolve(self.gpio_mode).map_err(|err| match err {
            SentryError::HardwareInit(detail) => SentryError::Config(detail),
            other => other,
        })?;
        Ok(())
    }

    pub fn motor_pins(&self) -> MotorPins {
        MotorPins {
            pin1: self.motor_pin1,
            pin2: self.motor_pin2,
            enable: self.enable_pin,
        }
    }

    pub fn camera_config(&self) -> CameraConfig {
        CameraConfig {
            preferred_index: self.camera_index,
            width: self.camera_width,
            height: self.camera_height,
            auto_detect: self.camera_auto_detect,
        }
    }

    pub fn detection_config(&self) -> SentryResult<DetectionConfig> {
        DetectionConfig::new(self.confidence_threshold, self.target_classes.iter().cloned())
    }

    pub fn loop_settings(&self) -> SentryResult<LoopSettings> {
        Ok(LoopSettings {
            pins: self.motor_pins(),
            gpio_mode: self.gpio_mode,
            direction: self.motor_direction,
            speed: Speed::new(self.motor_speed)?,
            interval: self.detection_interval,
            camera: self.camera_config(),
            detection: self.detection_config()?,
            frame_read_retries: self.frame_read_retries,
        })
    }
}

fn read_config_file(path: &Path) -> SentryResult<SentryConfigFile> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        SentryError::Config(format!("failed to read config file {}: {}", path.display(), e))
    })?;
    let is_toml = path
        .extension()
        .map_or(false, |ext| ext.eq_ignore_ascii_case("toml"));
    let parsed = if is_toml {
        toml::from_str(&raw).map_err(|e| e.to_string())
    } else {
        serde_json::from_str(&raw).map_err(|e| e.to_string())
    };
    parsed.map_err(|e| {
        SentryError::Config(format!("invalid config file {}: {}", path.display(), e))
    })
}

fn require_pin(key: &str, pin: Option<u8>) -> SentryResult<u8> {
    pin.ok_or_else(|| SentryError::Config(format!("{} is required", key)))
}

fn interval_from_secs(secs: f64) -> SentryResult<Duration> {
    if !secs.is_finite() || secs <= 0.0 {
        return Err(SentryError::Config(format!(
            "detection_interval_seconds must be greater than zero, got {}",
            secs
        )));
    }
    Duration::try_from_secs_f64(secs).map_err(|e| {
        SentryError::Config(format!("detection_interval_seconds {}: {}", secs, e))
    })
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> SentryResult<Option<T>> {
    match env_value(key) {
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|_| SentryError::Config(format!("{} has invalid value '{}'", key, value))),
        None => Ok(None),
    }
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_csv_drops_blanks() {
        assert_eq!(split_csv(" bottle, ,cup,"), vec!["bottle", "cup"]);
        assert!(split_csv("").is_empty());
    }

    #[test]
    fn interval_must_be_positive() {
        assert!(interval_from_secs(0.0).is_err());
        assert!(interval_from_secs(-1.0).is_err());
        assert!(interval_from_secs(f64::NAN).is_err());
        assert_eq!(interval_from_secs(0.25).unwrap(), Duration::from_millis(250));
    }

    #[test]
    fn file_defaults_match_documented_values() {
        let (pins, cfg) = SentryConfig::from_file(SentryConfigFile::default()).unwrap();
        assert!(pins.pin1.is_none());
        assert_eq!(cfg.motor_speed, 50);
        assert_eq!(cfg.confidence_threshold, 0.5);
        assert_eq!(cfg.model_path, "yolov8n.onnx");
        assert_eq!(cfg.detection_interval, Duration::from_millis(100));
        assert_eq!(cfg.camera_index, 1);
        assert_eq!((cfg.camera_width, cfg.camera_height), (640, 480));
        assert!(cfg.camera_auto_detect);
        assert_eq!(cfg.gpio_mode, GpioMode::Bcm);
        assert_eq!(cfg.target_classes, BTreeSet::from(["bottle".to_string()]));
        assert_eq!(cfg.frame_read_retries, 0);
        assert_eq!(cfg.gpio_backend, GpioBackend::Rppal);
        assert_eq!(cfg.camera_backend, CameraBackend::V4l2);
    }
}
