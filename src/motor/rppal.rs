//! Raspberry Pi GPIO via `rppal`.
//!
//! PWM on the enable line is rppal's software PWM, so any header GPIO can be
//! used as the enable pin. `OutputPin` resets the line on drop, which is what
//! releases the claim.

use anyhow::{Context, Result};
use rppal::gpio::{Gpio, OutputPin};

use super::{GpioChip, OutputLine};

pub struct RppalGpio {
    gpio: Gpio,
}

impl RppalGpio {
    pub fn new() -> Result<Self> {
        let gpio = Gpio::new().context("open /dev/gpiomem")?;
        Ok(Self { gpio })
    }
}

impl GpioChip for RppalGpio {
    fn name(&self) -> &'static str {
        "rppal"
    }

    fn claim_output(&mut self, bcm: u8) -> Result<Box<dyn OutputLine>> {
        let mut pin = self
            .gpio
            .get(bcm)
            .with_context(|| format!("get GPIO {}", bcm))?
            .into_output_low();
        pin.set_reset_on_drop(true);
        Ok(Box::new(RppalLine {
            bcm,
            pin,
            frequency_hz: super::PWM_FREQUENCY_HZ,
        }))
    }
}

struct RppalLine {
    bcm: u8,
    pin: OutputPin,
    frequency_hz: f64,
}

impl OutputLine for RppalLine {
    fn set_level(&mut self, high: bool) -> Result<()> {
        if high {
            self.pin.set_high();
        } else {
            self.pin.set_low();
        }
        Ok(())
    }

    fn start_pwm(&mut self, frequency_hz: f64, duty: f64) -> Result<()> {
        self.frequency_hz = frequency_hz;
        self.pin
            .set_pwm_frequency(frequency_hz, duty.clamp(0.0, 1.0))
            .with_context(|| format!("start software PWM on GPIO {}", self.bcm))
    }

    fn set_duty(&mut self, duty: f64) -> Result<()> {
        self.pin
            .set_pwm_frequency(self.frequency_hz, duty.clamp(0.0, 1.0))
            .with_context(|| format!("set PWM duty on GPIO {}", self.bcm))
    }

    fn stop_pwm(&mut self) -> Result<()> {
        self.pin
            .clear_pwm()
            .with_context(|| format!("stop software PWM on GPIO {}", self.bcm))?;
        self.pin.set_low();
        Ok(())
    }
}
