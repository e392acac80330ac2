//! In-memory GPIO board for dry runs and tests.
//!
//! Clones of a `SimulatedGpio` share one board, so a caller can keep a handle
//! and inspect pin state after handing the chip to the driver.

use anyhow::{anyhow, Result};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{GpioChip, OutputLine};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PwmState {
    pub frequency_hz: f64,
    pub duty: f64,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PinState {
    pub claimed: bool,
    pub high: bool,
    pub pwm: Option<PwmState>,
    pub claims: u32,
    pub releases: u32,
}

#[derive(Default)]
struct Board {
    pins: BTreeMap<u8, PinState>,
    fail_writes: bool,
}

#[derive(Clone, Default)]
pub struct SimulatedGpio {
    board: Arc<Mutex<Board>>,
}

impl SimulatedGpio {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of one line. Untouched lines report the default (unclaimed, low).
    pub fn pin(&self, bcm: u8) -> PinState {
        self.lock()
            .map(|board| board.pins.get(&bcm).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    /// Current PWM duty on a line, `None` when PWM is not running.
    pub fn duty(&self, bcm: u8) -> Option<f64> {
        self.pin(bcm).pwm.map(|pwm| pwm.duty)
    }

    /// Mark a line as claimed by someone else.
    pub fn reserve(&self, bcm: u8) {
        if let Ok(mut board) = self.lock() {
            board.pins.entry(bcm).or_default().claimed = true;
        }
    }

    /// Make every subsequent level/duty write fail.
    pub fn fail_writes(&self, fail: bool) {
        if let Ok(mut board) = self.lock() {
            board.fail_writes = fail;
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Board>> {
        self.board
            .lock()
            .map_err(|_| anyhow!("simulated board lock poisoned"))
    }
}

impl GpioChip for SimulatedGpio {
    fn name(&self) -> &'static str {
        "simulated"
    }

    fn claim_output(&mut self, bcm: u8) -> Result<Box<dyn OutputLine>> {
        let mut board = self.lock()?;
        let pin = board.pins.entry(bcm).or_default();
        if pin.claimed {
            return Err(anyhow!("BCM {} is already claimed", bcm));
        }
        pin.claimed = true;
        pin.high = false;
        pin.pwm = None;
        pin.claims += 1;
        Ok(Box::new(SimulatedLine {
            bcm,
            board: self.board.clone(),
        }))
    }
}

struct SimulatedLine {
    bcm: u8,
    board: Arc<Mutex<Board>>,
}

impl SimulatedLine {
    fn update(&self, f: impl FnOnce(&mut PinState) -> Result<()>) -> Result<()> {
        let mut board = self
            .board
            .lock()
            .map_err(|_| anyhow!("simulated board lock poisoned"))?;
        if board.fail_writes {
            return Err(anyhow!("simulated write failure on BCM {}", self.bcm));
        }
        let pin = board.pins.entry(self.bcm).or_default();
        f(pin)
    }
}

impl OutputLine for SimulatedLine {
    fn set_level(&mut self, high: bool) -> Result<()> {
        self.update(|pin| {
            pin.high = high;
            Ok(())
        })
    }

    fn start_pwm(&mut self, frequency_hz: f64, duty: f64) -> Result<()> {
        self.update(|pin| {
            pin.pwm = Some(PwmState { frequency_hz, duty });
            Ok(())
        })
    }

    fn set_duty(&mut self, duty: f64) -> Result<()> {
        let bcm = self.bcm;
        self.update(|pin| match pin.pwm.as_mut() {
            Some(pwm) => {
                pwm.duty = duty;
                Ok(())
            }
            None => Err(anyhow!("PWM not running on BCM {}", bcm)),
        })
    }

    fn stop_pwm(&mut self) -> Result<()> {
        self.update(|pin| {
            pin.pwm = None;
            Ok(())
        })
    }
}

impl Drop for SimulatedLine {
    fn drop(&mut self) {
        if let Ok(mut board) = self.board.lock() {
            let pin = board.pins.entry(self.bcm).or_default();
            pin.claimed = false;
            pin.high = false;
            pin.pwm = None;
            pin.releases += 1;
        }
    }
}
