use std::collections::BTreeSet;
use std::io::Write;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::{Builder, NamedTempFile};

use motor_sentry::config::{CameraBackend, GpioBackend, SentryConfig};
use motor_sentry::motor::{Direction, GpioMode};
use motor_sentry::SentryError;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "MOTOR_SENTRY_CONFIG",
        "MOTOR_SENTRY_MOTOR_PIN1",
        "MOTOR_SENTRY_MOTOR_PIN2",
        "MOTOR_SENTRY_ENABLE_PIN",
        "MOTOR_SENTRY_MOTOR_SPEED",
        "MOTOR_SENTRY_CONFIDENCE_THRESHOLD",
        "MOTOR_SENTRY_MODEL_PATH",
        "MOTOR_SENTRY_DETECTION_INTERVAL",
        "MOTOR_SENTRY_CAMERA_INDEX",
        "MOTOR_SENTRY_TARGET_CLASSES",
        "MOTOR_SENTRY_GPIO_MODE",
    ] {
        std::env::remove_var(key);
    }
}

fn write_config(suffix: &str, body: &str) -> NamedTempFile {
    let mut file = Builder::new()
        .suffix(suffix)
        .tempfile()
        .expect("temp config");
    file.write_all(body.as_bytes()).expect("write config");
    file
}

#[test]
fn loads_json_from_env_path_with_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        ".json",
        r#"{
            "motor_pin1": 17,
            "motor_pin2": 18,
            "enable_pin": 27,
            "motor_speed": 70,
            "motor_direction": "counterclockwise",
            "confidence_threshold": 0.6,
            "model_path": "models/custom.onnx",
            "detection_interval_seconds": 0.5,
            "camera_index": 3,
            "camera_width": 320,
            "camera_height": 240,
            "camera_auto_detect": false,
            "target_classes": ["bottle", "cup"],
            "frame_read_retries": 2,
            "gpio_backend": "simulated",
            "camera_backend": "synthetic"
        }"#,
    );

    std::env::set_var("MOTOR_SENTRY_CONFIG", file.path());
    std::env::set_var("MOTOR_SENTRY_MOTOR_SPEED", "40");
    std::env::set_var("MOTOR_SENTRY_CAMERA_INDEX", "0");
    std::env::set_var("MOTOR_SENTRY_TARGET_CLASSES", "person, dog");

    let cfg = SentryConfig::load(None).expect("load config");

    assert_eq!((cfg.motor_pin1, cfg.motor_pin2, cfg.enable_pin), (17, 18, 27));
    assert_eq!(cfg.motor_speed, 40);
    assert_eq!(cfg.motor_direction, Direction::Counterclockwise);
    assert_eq!(cfg.confidence_threshold, 0.6);
    assert_eq!(cfg.model_path, "models/custom.onnx");
    assert_eq!(cfg.detection_interval, Duration::from_millis(500));
    assert_eq!(cfg.camera_index, 0);
    assert_eq!((cfg.camera_width, cfg.camera_height), (320, 240));
    assert!(!cfg.camera_auto_detect);
    assert_eq!(
        cfg.target_classes,
        BTreeSet::from(["person".to_string(), "dog".to_string()])
    );
    assert_eq!(cfg.frame_read_retries, 2);
    assert_eq!(cfg.gpio_backend, GpioBackend::Simulated);
    assert_eq!(cfg.camera_backend, CameraBackend::Synthetic);

    let settings = cfg.loop_settings().expect("loop settings");
    assert_eq!(settings.speed.percent(), 40);
    assert_eq!(settings.camera.preferred_index, 0);
    assert_eq!(settings.detection.confidence_threshold, 0.6);

    clear_env();
}

#[test]
fn loads_toml_by_extension_and_board_pins() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        ".toml",
        r#"
motor_pin1 = 11
motor_pin2 = 12
enable_pin = 13
gpio_mode = "BOARD"
target_classes = []
"#,
    );

    let cfg = SentryConfig::load(Some(file.path())).expect("load toml");

    assert_eq!(cfg.gpio_mode, GpioMode::Board);
    assert!(cfg.target_classes.is_empty());
    assert_eq!(cfg.motor_speed, 50);
    assert_eq!(cfg.model_path, "yolov8n.onnx");
    let bcm = cfg.motor_pins().resolve(cfg.gpio_mode).expect("board pins");
    assert_eq!((bcm.pin1, bcm.pin2, bcm.enable), (17, 18, 27));

    clear_env();
}

#[test]
fn pins_can_come_from_env_alone() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("MOTOR_SENTRY_MOTOR_PIN1", "5");
    std::env::set_var("MOTOR_SENTRY_MOTOR_PIN2", "6");
    std::env::set_var("MOTOR_SENTRY_ENABLE_PIN", "13");
    std::env::set_var("MOTOR_SENTRY_DETECTION_INTERVAL", "0.25");

    let cfg = SentryConfig::load(None).expect("env-only config");
    assert_eq!(cfg.motor_pins().enable, 13);
    assert_eq!(cfg.detection_interval, Duration::from_millis(250));
    assert_eq!(cfg.target_classes, BTreeSet::from(["bottle".to_string()]));

    clear_env();
}

#[test]
fn rejects_invalid_configs() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cases = [
        (r#"{"motor_pin2": 18, "enable_pin": 27}"#, "motor_pin1"),
        (
            r#"{"motor_pin1": 17, "motor_pin2": 18, "enable_pin": 27, "motor_speed": 150}"#,
            "motor speed",
        ),
        (
            r#"{"motor_pin1": 17, "motor_pin2": 18, "enable_pin": 27, "confidence_threshold": 1.5}"#,
            "confidence_threshold",
        ),
        (
            r#"{"motor_pin1": 17, "motor_pin2": 18, "enable_pin": 27, "detection_interval_seconds": 0}"#,
            "detection_interval_seconds",
        ),
        (
            r#"{"motor_pin1": 17, "motor_pin2": 17, "enable_pin": 27}"#,
            "17",
        ),
        (
            r#"{"motor_pin1": 17, "motor_pin2": 18, "enable_pin": 27, "gpio_mode": "WIRINGPI"}"#,
            "gpio_mode",
        ),
        (
            r#"{"motor_pin1": 17, "motor_pin2": 18, "enable_pin": 27, "motor_pwm": 1}"#,
            "motor_pwm",
        ),
    ];

    for (body, needle) in cases {
        let file = write_config(".json", body);
        let err = SentryConfig::load(Some(file.path())).expect_err(body);
        assert!(matches!(err, SentryError::Config(_)), "{}: {:?}", body, err);
        assert_eq!(err.exit_code(), 1);
        assert!(
            err.to_string().contains(needle),
            "{} should mention {}: {}",
            body,
            needle,
            err
        );
    }

    clear_env();
}

#[test]
fn rejects_malformed_env_override() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        ".json",
        r#"{"motor_pin1": 17, "motor_pin2": 18, "enable_pin": 27}"#,
    );
    std::env::set_var("MOTOR_SENTRY_MOTOR_SPEED", "fast");

    let err = SentryConfig::load(Some(file.path())).expect_err("bad speed");
    assert!(err.to_string().contains("MOTOR_SENTRY_MOTOR_SPEED"));

    clear_env();
}

#[test]
fn missing_file_is_a_config_error() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let err = SentryConfig::load(Some(std::path::Path::new("/nonexistent/motor.json")))
        .expect_err("missing file");
    assert!(matches!(err, SentryError::Config(_)));

    clear_env();
}
