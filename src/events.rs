//! Structured telemetry emitted by the control loop.
//!
//! The loop never formats or persists logs itself; it hands `SentryEvent`s to
//! an injected `EventSink`.

use serde::Serialize;
use std::sync::{Arc, Mutex};

use crate::detect::BoundingBox;
use crate::motor::Direction;

/// Target used by `LogSink`, so deployments can route events separately.
pub const EVENT_LOG_TARGET: &str = "motor_sentry::events";

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SentryEvent {
    MotorStarted {
        speed: u8,
        direction: Direction,
    },
    MotorStopped {
        reason: StopReason,
    },
    DetectionMatch {
        class: String,
        confidence: f32,
        bbox: BoundingBox,
    },
    InitializationFailed {
        stage: InitStage,
        detail: String,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    TargetDetected,
    Cancelled,
    Failure,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InitStage {
    Config,
    Hardware,
    Camera,
    Model,
}

pub trait EventSink {
    fn emit(&mut self, event: SentryEvent);
}

/// Writes each event as one JSON line through the `log` facade.
#[derive(Default)]
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&mut self, event: SentryEvent) {
        let level = match event {
            SentryEvent::InitializationFailed { .. } => log::Level::Error,
            _ => log::Level::Info,
        };
        match serde_json::to_string(&event) {
            Ok(line) => log::log!(target: EVENT_LOG_TARGET, level, "{}", line),
            Err(err) => log::warn!("failed to serialize event {:?}: {}", event, err),
        }
    }
}

/// Collects events in memory. Clones share the same buffer.
#[derive(Clone, Default)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<SentryEvent>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SentryEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn count_where(&self, pred: impl Fn(&SentryEvent) -> bool) -> usize {
        self.events().iter().filter(|event| pred(event)).count()
    }
}

impl EventSink for MemorySink {
    fn emit(&mut self, event: SentryEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
