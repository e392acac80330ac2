use std::time::Duration;

use super::clock::{CancelToken, Sleeper};
use crate::error::SentryResult;
use crate::motor::{Direction, HardwareMotorDriver, MotorCommand, Speed};

/// Speeds exercised by the wiring check, in order.
pub const SWEEP_SPEEDS: [u8; 4] = [25, 50, 75, 100];

#[derive(Clone, Debug)]
pub struct SweepPlan {
    pub direction: Direction,
    pub speeds: Vec<Speed>,
    /// How long each speed is held.
    pub hold: Duration,
    /// Stopped time between speeds.
    pub pause: Duration,
}

impl Default for SweepPlan {
    fn default() -> Self {
        Self {
            direction: Direction::Clockwise,
            speeds: SWEEP_SPEEDS.iter().copied().map(Speed::saturating).collect(),
            hold: Duration::from_secs(3),
            pause: Duration::from_secs(1),
        }
    }
}

/// Step the motor through `plan`, stopping between steps.
///
/// Returns the number of steps that ran to completion. Cancellation is
/// honoured between steps; the motor is left stopped on every return.
pub fn run_sweep(
    driver: &mut HardwareMotorDriver,
    plan: &SweepPlan,
    sleeper: &mut dyn Sleeper,
    cancel: &CancelToken,
) -> SentryResult<usize> {
    let mut completed = 0;
    for speed in &plan.speeds {
        if cancel.is_cancelled() {
            break;
        }
        log::info!("motor test: {:?} at {}%", plan.direction, speed.percent());
        if let Err(err) = driver.apply(MotorCommand::run(plan.direction, *speed)) {
            let _ = driver.apply(MotorCommand::Stopped);
            return Err(err);
        }
        sleeper.sleep(plan.hold);
        driver.apply(MotorCommand::Stopped)?;
        completed += 1;
        if cancel.is_cancelled() {
            break;
        }
        sleeper.sleep(plan.pause);
    }
    log::info!("motor test: {}/{} steps completed", completed, plan.speeds.len());
    Ok(completed)
}
