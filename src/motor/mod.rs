//! DC motor driver: two direction lines plus a PWM enable line.
//!
//! `HardwareMotorDriver` is the only code path that touches pin state. Pin
//! claims live inside the driver and are dropped on `release()` (or `Drop`),
//! which always forces the electrical safe state first: both direction lines
//! low and 0% duty on the enable line.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::error::{SentryError, SentryResult};

#[cfg(feature = "gpio-rppal")]
pub mod rppal;
pub mod sim;

#[cfg(feature = "gpio-rppal")]
pub use self::rppal::RppalGpio;
pub use sim::{PinState, PwmState, SimulatedGpio};

/// Fixed PWM carrier frequency on the enable line.
pub const PWM_FREQUENCY_HZ: f64 = 1_000.0;

/// Motor speed as a duty-cycle percentage, always within `0..=100`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Speed(u8);

impl Speed {
    pub fn new(percent: u8) -> SentryResult<Self> {
        if percent > 100 {
            return Err(SentryError::Config(format!(
                "motor speed must be within 0..=100, got {}",
                percent
            )));
        }
        Ok(Self(percent))
    }

    /// Clamp to 100 instead of rejecting.
    pub const fn saturating(percent: u8) -> Self {
        if percent > 100 {
            Speed(100)
        } else {
            Speed(percent)
        }
    }

    pub fn percent(self) -> u8 {
        self.0
    }

    fn duty_fraction(self) -> f64 {
        f64::from(self.0) / 100.0
    }
}

impl Default for Speed {
    fn default() -> Self {
        Speed(50)
    }
}

impl TryFrom<u8> for Speed {
    type Error = SentryError;

    fn try_from(value: u8) -> SentryResult<Self> {
        Speed::new(value)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    #[serde(alias = "cw")]
    Clockwise,
    #[serde(alias = "ccw", alias = "counter_clockwise")]
    Counterclockwise,
}

impl std::str::FromStr for Direction {
    type Err = SentryError;

    fn from_str(s: &str) -> SentryResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "clockwise" | "cw" => Ok(Direction::Clockwise),
            "counterclockwise" | "counter_clockwise" | "ccw" => Ok(Direction::Counterclockwise),
            other => Err(SentryError::Config(format!(
                "motor direction must be clockwise or counterclockwise, got '{}'",
                other
            ))),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MotorCommand {
    #[default]
    Stopped,
    Clockwise(Speed),
    CounterClockwise(Speed),
}

impl MotorCommand {
    pub fn run(direction: Direction, speed: Speed) -> Self {
        match direction {
            Direction::Clockwise => MotorCommand::Clockwise(speed),
            Direction::Counterclockwise => MotorCommand::CounterClockwise(speed),
        }
    }

    /// (pin1, pin2) levels for this command.
    fn levels(self) -> (bool, bool) {
        match self {
            MotorCommand::Stopped => (false, false),
            MotorCommand::Clockwise(_) => (true, false),
            MotorCommand::CounterClockwise(_) => (false, true),
        }
    }

    /// Enable-line duty as a fraction. Always 0 for `Stopped`.
    fn duty(self) -> f64 {
        match self {
            MotorCommand::Stopped => 0.0,
            MotorCommand::Clockwise(speed) | MotorCommand::CounterClockwise(speed) => {
                speed.duty_fraction()
            }
        }
    }

    pub fn is_running(self) -> bool {
        self.duty() > 0.0
    }
}

/// Pin numbering scheme used by the configuration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GpioMode {
    /// Broadcom channel numbers.
    #[default]
    Bcm,
    /// Physical header positions on the 40-pin connector.
    Board,
}

impl std::str::FromStr for GpioMode {
    type Err = SentryError;

    fn from_str(s: &str) -> SentryResult<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BCM" => Ok(GpioMode::Bcm),
            "BOARD" => Ok(GpioMode::Board),
            other => Err(SentryError::Config(format!(
                "gpio_mode must be BCM or BOARD, got '{}'",
                other
            ))),
        }
    }
}

/// Highest BCM channel exposed on the 40-pin header.
const MAX_BCM_CHANNEL: u8 = 27;

// Physical header position -> BCM channel. Power and ground positions are absent.
const BOARD_TO_BCM: [(u8, u8); 28] = [
    (3, 2),
    (5, 3),
    (7, 4),
    (8, 14),
    (10, 15),
    (11, 17),
    (12, 18),
    (13, 27),
    (15, 22),
    (16, 23),
    (18, 24),
    (19, 10),
    (21, 9),
    (22, 25),
    (23, 11),
    (24, 8),
    (26, 7),
    (27, 0),
    (28, 1),
    (29, 5),
    (31, 6),
    (32, 12),
    (33, 13),
    (35, 19),
    (36, 16),
    (37, 26),
    (38, 20),
    (40, 21),
];

pub fn board_to_bcm(physical: u8) -> Option<u8> {
    BOARD_TO_BCM
        .iter()
        .find(|(board, _)| *board == physical)
        .map(|(_, bcm)| *bcm)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MotorPins {
    pub pin1: u8,
    pub pin2: u8,
    pub enable: u8,
}

impl MotorPins {
    /// Translate to BCM channels, rejecting unusable or duplicate pins.
    pub fn resolve(self, mode: GpioMode) -> SentryResult<MotorPins> {
        let map = |pin: u8| -> SentryResult<u8> {
            match mode {
                GpioMode::Bcm if pin <= MAX_BCM_CHANNEL => Ok(pin),
                GpioMode::Bcm => Err(SentryError::HardwareInit(format!(
                    "BCM channel {} does not exist (valid: 0..={})",
                    pin, MAX_BCM_CHANNEL
                ))),
                GpioMode::Board => board_to_bcm(pin).ok_or_else(|| {
                    SentryError::HardwareInit(format!(
                        "header pin {} is not a GPIO line",
                        pin
                    ))
                }),
            }
        };
        let resolved = MotorPins {
            pin1: map(self.pin1)?,
            pin2: map(self.pin2)?,
            enable: map(self.enable)?,
        };
        if resolved.pin1 == resolved.pin2
            || resolved.pin1 == resolved.enable
            || resolved.pin2 == resolved.enable
        {
            return Err(SentryError::HardwareInit(format!(
                "motor pins must be distinct, got {:?}",
                self
            )));
        }
        Ok(resolved)
    }
}

/// Platform GPIO controller. Claims lines by BCM channel.
pub trait GpioChip {
    fn name(&self) -> &'static str;

    /// Claim a line as an output driven low. Fails if the line is already claimed.
    fn claim_output(&mut self, bcm: u8) -> Result<Box<dyn OutputLine>>;
}

/// A claimed output line. Dropping it releases the claim.
pub trait OutputLine: Send {
    fn set_level(&mut self, high: bool) -> Result<()>;

    /// Start PWM at `frequency_hz` with `duty` in `0.0..=1.0`.
    fn start_pwm(&mut self, frequency_hz: f64, duty: f64) -> Result<()>;

    fn set_duty(&mut self, duty: f64) -> Result<()>;

    fn stop_pwm(&mut self) -> Result<()>;
}

struct DriverLines {
    pin1: Box<dyn OutputLine>,
    pin2: Box<dyn OutputLine>,
    enable: Box<dyn OutputLine>,
}

impl DriverLines {
    fn write(&mut self, command: MotorCommand) -> Result<()> {
        let (high1, high2) = command.levels();
        if command.is_running() {
            self.pin1.set_level(high1)?;
            self.pin2.set_level(high2)?;
            self.enable.set_duty(command.duty())?;
        } else {
            // Cut power before touching direction lines.
            self.enable.set_duty(0.0)?;
            self.pin1.set_level(high1)?;
            self.pin2.set_level(high2)?;
        }
        Ok(())
    }
}

/// Owns the three motor lines for its whole lifetime.
pub struct HardwareMotorDriver {
    pins: MotorPins,
    lines: Option<DriverLines>,
    command: MotorCommand,
}

impl HardwareMotorDriver {
    /// Claim the lines on `chip` and start the enable PWM at 0% duty.
    pub fn initialize(
        chip: &mut dyn GpioChip,
        pins: MotorPins,
        mode: GpioMode,
    ) -> SentryResult<Self> {
        let bcm = pins.resolve(mode)?;
        // Lines claimed before a failing claim are dropped (and released) on return.
        let pin1 = claim_line(chip, bcm.pin1)?;
        let pin2 = claim_line(chip, bcm.pin2)?;
        let mut enable = claim_line(chip, bcm.enable)?;
        enable
            .start_pwm(PWM_FREQUENCY_HZ, 0.0)
            .map_err(|err| {
                SentryError::HardwareInit(format!(
                    "start PWM on BCM {}: {}",
                    bcm.enable,
                    SentryError::chain(&err)
                ))
            })?;

        let mut lines = DriverLines { pin1, pin2, enable };
        lines
            .write(MotorCommand::Stopped)
            .map_err(|err| SentryError::HardwareInit(SentryError::chain(&err)))?;

        log::info!(
            "motor driver initialized on {} (BCM pin1={}, pin2={}, enable={}, {} Hz)",
            chip.name(),
            bcm.pin1,
            bcm.pin2,
            bcm.enable,
            PWM_FREQUENCY_HZ
        );
        Ok(Self {
            pins: bcm,
            lines: Some(lines),
            command: MotorCommand::Stopped,
        })
    }

    /// Drive the lines for `command`. Re-applying the current command is harmless.
    pub fn apply(&mut self, command: MotorCommand) -> SentryResult<()> {
        let lines = self
            .lines
            .as_mut()
            .ok_or_else(|| SentryError::HardwareFault("motor driver already released".into()))?;
        lines
            .write(command)
            .map_err(|err| SentryError::HardwareFault(SentryError::chain(&err)))?;
        if command != self.command {
            log::debug!("motor command {:?} -> {:?}", self.command, command);
        }
        self.command = command;
        Ok(())
    }

    /// Force `Stopped`, stop PWM and give the lines back.
    ///
    /// Returns `true` when this call performed the release, `false` when the
    /// driver had already been released.
    pub fn release(&mut self) -> bool {
        let Some(mut lines) = self.lines.take() else {
            return false;
        };
        if let Err(err) = lines.write(MotorCommand::Stopped) {
            log::error!("motor safe-stop failed during release: {:#}", err);
        }
        if let Err(err) = lines.enable.stop_pwm() {
            log::warn!("failed to stop PWM on BCM {}: {:#}", self.pins.enable, err);
        }
        self.command = MotorCommand::Stopped;
        drop(lines);
        log::info!("motor driver released");
        true
    }

    pub fn command(&self) -> MotorCommand {
        self.command
    }

    pub fn pins(&self) -> MotorPins {
        self.pins
    }
}

fn claim_line(chip: &mut dyn GpioChip, pin: u8) -> SentryResult<Box<dyn OutputLine>> {
    chip.claim_output(pin).map_err(|err| {
        SentryError::HardwareInit(format!(
            "claim BCM {} on {}: {}",
            pin,
            chip.name(),
            SentryError::chain(&err)
        ))
    })
}

impl Drop for HardwareMotorDriver {
    fn drop(&mut self) {
        self.release();
    }
}
