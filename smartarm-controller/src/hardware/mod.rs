//! GPIO seam between the drivers and the board.
//!
//! Drivers never talk to a GPIO library directly. They claim pins through [`Gpio`]
//! and keep the returned handles for their whole lifetime.

#[cfg(feature = "raspberry-pi")]
mod raspberry_pi;
mod simulated;

#[cfg(feature = "raspberry-pi")]
pub use raspberry_pi::RaspberryPiGpio;
pub use simulated::{EchoResponse, PinWrite, SimulatedGpio};

use thiserror::Error;

/// Length of a single software PWM tick
pub const PWM_TICK_MICROS: u32 = 100;

#[derive(Error, Debug)]
pub enum HardwareError {
    #[error("GPIO subsystem is not available")]
    Unavailable,
    #[error("pin {0} is already claimed or does not exist")]
    PinUnavailable(u8),
    #[error("invalid PWM range {0}")]
    InvalidPwmRange(u32),
    #[cfg(feature = "raspberry-pi")]
    #[error("raspberry pi gpio error")]
    Rppal(#[from] rppal::gpio::Error),
}

pub type Result<T> = std::result::Result<T, HardwareError>;

/// Software PWM output
///
/// Values are expressed in ticks out of the range the pin was claimed with.
pub trait PwmPin: Send {
    fn write(&mut self, value: u32) -> Result<()>;
}

pub trait OutputPin: Send {
    fn set_high(&mut self) -> Result<()>;
    fn set_low(&mut self) -> Result<()>;
}

pub trait InputPin: Send {
    fn is_high(&self) -> bool;

    fn is_low(&self) -> bool {
        !self.is_high()
    }
}

pub trait Gpio {
    /// Claim a pin as software PWM with `range` ticks per period
    fn pwm(&mut self, pin: u8, range: u32) -> Result<Box<dyn PwmPin>>;
    fn output(&mut self, pin: u8) -> Result<Box<dyn OutputPin>>;
    fn input(&mut self, pin: u8) -> Result<Box<dyn InputPin>>;
}

/// PWM frequency for a software PWM with `range` ticks of [`PWM_TICK_MICROS`]
pub fn pwm_frequency(range: u32) -> Result<f64> {
    if range == 0 {
        return Err(HardwareError::InvalidPwmRange(range));
    }
    Ok(1_000_000.0 / (f64::from(range) * f64::from(PWM_TICK_MICROS)))
}
