//! motor-sentry - run a DC motor until the camera sees a target
//!
//! Subcommands:
//! 1. `run` (default): drive the motor and stop it on a qualifying detection
//! 2. `cameras`: list which camera indices open and deliver frames
//! 3. `motor-test`: step the motor through 25/50/75/100% to check wiring
//! 4. `detect`: run the camera and detector with the motor off

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use motor_sentry::camera::{CameraConfig, DIAGNOSTIC_PROBE_COUNT};
use motor_sentry::config::{CameraBackend, GpioBackend};
use motor_sentry::control::{
    run_sweep, run_watch, SweepPlan, WatchPlan, WatchStats, DEFAULT_INFERENCE_STRIDE,
    EXIT_CANCELLED,
};
use motor_sentry::detect::{DetectionFilter, STUB_MODEL_PATH};
use motor_sentry::events::InitStage;
use motor_sentry::{
    load_detector, CameraSource, CancelToken, CaptureBackend, ControlLoop, EventSink, GpioChip,
    HardwareMotorDriver, LogSink, SentryConfig, SentryError, SentryEvent, SentryResult,
    SimulatedGpio, SyntheticCapture, ThreadSleeper,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Vision-gated DC motor controller")]
struct Args {
    /// JSON or TOML config file.
    #[arg(long, global = true, env = "MOTOR_SENTRY_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the motor until a target class is detected (default).
    Run {
        /// Simulated GPIO, synthetic camera and stub detector.
        #[arg(long)]
        dry_run: bool,
    },
    /// Probe camera indices and report which ones deliver frames.
    Cameras {
        /// Number of indices to probe, starting at 0.
        #[arg(long, default_value_t = DIAGNOSTIC_PROBE_COUNT)]
        count: u32,
        #[arg(long, default_value_t = 640)]
        width: u32,
        #[arg(long, default_value_t = 480)]
        height: u32,
        /// Probe the in-memory synthetic camera instead of real devices.
        #[arg(long)]
        synthetic: bool,
    },
    /// Step the motor through a speed sweep.
    MotorTest {
        /// Seconds to hold each speed.
        #[arg(long, default_value_t = 3)]
        hold_secs: u64,
        /// Use the simulated GPIO board.
        #[arg(long)]
        simulate: bool,
    },
    /// Log qualifying detections without driving the motor.
    Detect {
        /// Run inference on every Nth frame.
        #[arg(long, default_value_t = DEFAULT_INFERENCE_STRIDE)]
        every: u64,
        /// Stop after this many frames instead of waiting for Ctrl-C.
        #[arg(long)]
        frames: Option<u64>,
        /// Synthetic camera and stub detector.
        #[arg(long)]
        dry_run: bool,
    },
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    if let Err(err) = ctrlc::set_handler(move || {
        log::info!("shutdown signal received, stopping...");
        handler_token.cancel();
    }) {
        log::warn!("failed to install Ctrl-C handler: {}", err);
    }

    let code = match args.command.unwrap_or(Command::Run { dry_run: false }) {
        Command::Run { dry_run } => run(args.config, dry_run, cancel),
        Command::Cameras {
            count,
            width,
            height,
            synthetic,
        } => cameras(count, width, height, synthetic),
        Command::MotorTest {
            hold_secs,
            simulate,
        } => motor_test(args.config, hold_secs, simulate, cancel),
        Command::Detect {
            every,
            frames,
            dry_run,
        } => detect(args.config, every, frames, dry_run, cancel),
    };
    ExitCode::from(u8::try_from(code).unwrap_or(2))
}

fn run(config_path: Option<PathBuf>, dry_run: bool, cancel: CancelToken) -> i32 {
    let mut sink = LogSink;
    let mut config = match SentryConfig::load(config_path.as_deref()) {
        Ok(config) => config,
        Err(err) => return init_failure(&mut sink, InitStage::Config, err),
    };
    if dry_run {
        log::info!("dry run: simulated GPIO, synthetic camera, stub detector");
        config.gpio_backend = GpioBackend::Simulated;
        config.camera_backend = CameraBackend::Synthetic;
        config.model_path = STUB_MODEL_PATH.to_string();
    }
    let settings = match config.loop_settings() {
        Ok(settings) => settings,
        Err(err) => return init_failure(&mut sink, InitStage::Config, err),
    };

    let mut detector = match load_detector(&config.model_path) {
        Ok(detector) => detector,
        Err(err) => return init_failure(&mut sink, InitStage::Model, err),
    };
    let mut gpio = match open_gpio(config.gpio_backend) {
        Ok(gpio) => gpio,
        Err(err) => return init_failure(&mut sink, InitStage::Hardware, err),
    };
    let mut capture = match open_capture(config.camera_backend) {
        Ok(capture) => capture,
        Err(err) => return init_failure(&mut sink, InitStage::Camera, err),
    };

    let report = ControlLoop::new(
        settings,
        Box::new(sink),
        Box::new(ThreadSleeper),
        cancel,
    )
    .run(gpio.as_mut(), capture.as_mut(), detector.as_mut());

    match report.error() {
        Some(err) => log::error!("motor-sentry exited after {} ticks: {}", report.ticks, err),
        None => log::info!(
            "motor-sentry finished after {} ticks ({:?})",
            report.ticks,
            report.outcome
        ),
    }
    report.exit_code()
}

fn cameras(count: u32, width: u32, height: u32, synthetic: bool) -> i32 {
    let kind = if synthetic {
        CameraBackend::Synthetic
    } else {
        CameraBackend::V4l2
    };
    let mut backend = match open_capture(kind) {
        Ok(backend) => backend,
        Err(err) => {
            log::error!("{}", err);
            return err.exit_code();
        }
    };
    let reports = CameraSource::probe(backend.as_mut(), 0..count, width, height);
    let mut working = 0;
    for report in &reports {
        if report.working() {
            working += 1;
            let (w, h) = report.resolution.unwrap_or((width, height));
            println!("camera {}: working ({}x{})", report.index, w, h);
        } else {
            println!(
                "camera {}: not working ({})",
                report.index,
                report.error.as_deref().unwrap_or("no frame")
            );
        }
    }
    if working == 0 {
        log::error!("no working cameras found on {}", backend.name());
        return 1;
    }
    let default = CameraConfig::default().preferred_index;
    log::info!(
        "{} working camera(s); set camera_index (default {}) to one of them",
        working,
        default
    );
    0
}

fn motor_test(
    config_path: Option<PathBuf>,
    hold_secs: u64,
    simulate: bool,
    cancel: CancelToken,
) -> i32 {
    let result = (|| -> SentryResult<usize> {
        let config = SentryConfig::load(config_path.as_deref())?;
        let backend = if simulate {
            GpioBackend::Simulated
        } else {
            config.gpio_backend
        };
        let mut gpio = open_gpio(backend)?;
        let mut driver =
            HardwareMotorDriver::initialize(gpio.as_mut(), config.motor_pins(), config.gpio_mode)?;
        let plan = SweepPlan {
            direction: config.motor_direction,
            hold: Duration::from_secs(hold_secs),
            ..SweepPlan::default()
        };
        let completed = run_sweep(&mut driver, &plan, &mut ThreadSleeper, &cancel);
        driver.release();
        completed
    })();

    match result {
        Ok(completed) if cancel.is_cancelled() => {
            log::info!("motor test stopped by user after {} steps", completed);
            EXIT_CANCELLED
        }
        Ok(_) => {
            log::info!("all motor tests completed");
            0
        }
        Err(err) => {
            log::error!("motor test failed: {}", err);
            err.exit_code()
        }
    }
}

fn detect(
    config_path: Option<PathBuf>,
    every: u64,
    frames: Option<u64>,
    dry_run: bool,
    cancel: CancelToken,
) -> i32 {
    let result = (|| -> SentryResult<WatchStats> {
        let mut config = SentryConfig::load(config_path.as_deref())?;
        if dry_run {
            config.camera_backend = CameraBackend::Synthetic;
            config.model_path = STUB_MODEL_PATH.to_string();
        }
        let filter = DetectionFilter::new(config.detection_config()?);
        let plan = WatchPlan {
            every,
            max_frames: frames,
            ..WatchPlan::default()
        };
        plan.validate()?;

        let mut detector = load_detector(&config.model_path)?;
        let mut capture = open_capture(config.camera_backend)?;
        let mut camera = CameraSource::open(config.camera_config(), capture.as_mut())?;
        log::info!(
            "watching camera {} for {:?} (threshold {:.2}, every {} frames)",
            camera.index(),
            filter.config().target_classes,
            filter.config().confidence_threshold,
            plan.every
        );
        let stats = run_watch(&mut camera, detector.as_mut(), &filter, &plan, &cancel);
        camera.close();
        stats
    })();

    match result {
        Ok(stats) => {
            log::info!(
                "detection test finished: {} matches in {} frames",
                stats.matches,
                stats.frames
            );
            if cancel.is_cancelled() {
                EXIT_CANCELLED
            } else {
                0
            }
        }
        Err(err) => {
            log::error!("detection test failed: {}", err);
            err.exit_code()
        }
    }
}

fn init_failure(sink: &mut dyn EventSink, stage: InitStage, err: SentryError) -> i32 {
    sink.emit(SentryEvent::InitializationFailed {
        stage,
        detail: err.to_string(),
    });
    err.exit_code()
}

fn open_gpio(kind: GpioBackend) -> SentryResult<Box<dyn GpioChip>> {
    match kind {
        GpioBackend::Simulated => Ok(Box::new(SimulatedGpio::new())),
        GpioBackend::Rppal => rppal_gpio(),
    }
}

#[cfg(feature = "gpio-rppal")]
fn rppal_gpio() -> SentryResult<Box<dyn GpioChip>> {
    let gpio = motor_sentry::motor::RppalGpio::new()
        .map_err(|err| SentryError::HardwareInit(format!("{:#}", err)))?;
    Ok(Box::new(gpio))
}

#[cfg(not(feature = "gpio-rppal"))]
fn rppal_gpio() -> SentryResult<Box<dyn GpioChip>> {
    Err(SentryError::HardwareInit(
        "built without the gpio-rppal feature; set gpio_backend = \"simulated\"".into(),
    ))
}

fn open_capture(kind: CameraBackend) -> SentryResult<Box<dyn CaptureBackend>> {
    match kind {
        CameraBackend::Synthetic => Ok(Box::new(SyntheticCapture::new())),
        CameraBackend::V4l2 => v4l2_capture(),
    }
}

#[cfg(feature = "camera-v4l2")]
fn v4l2_capture() -> SentryResult<Box<dyn CaptureBackend>> {
    Ok(Box::new(motor_sentry::camera::V4l2Capture::new()))
}

#[cfg(not(feature = "camera-v4l2"))]
fn v4l2_capture() -> SentryResult<Box<dyn CaptureBackend>> {
    Err(SentryError::CameraUnavailable(
        "built without the camera-v4l2 feature; set camera_backend = \"synthetic\"".into(),
    ))
}
