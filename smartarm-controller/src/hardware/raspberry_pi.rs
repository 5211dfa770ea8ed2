use super::{pwm_frequency, Gpio, HardwareError, InputPin, OutputPin, PwmPin, Result};
use rppal::gpio;

/// BCM numbered GPIO on a Raspberry Pi
pub struct RaspberryPiGpio {
    gpio: gpio::Gpio,
}

impl RaspberryPiGpio {
    pub fn new() -> Result<Self> {
        let gpio = gpio::Gpio::new().map_err(|error| {
            tracing::error!("Failed to claim GPIO subsystem: {}", error);
            HardwareError::Unavailable
        })?;
        Ok(Self { gpio })
    }
}

impl Gpio for RaspberryPiGpio {
    fn pwm(&mut self, pin: u8, range: u32) -> Result<Box<dyn PwmPin>> {
        let frequency = pwm_frequency(range)?;
        let mut output = self.gpio.get(pin)?.into_output();
        output.set_low();
        Ok(Box::new(SoftPwm {
            pin: output,
            range,
            frequency,
        }))
    }

    fn output(&mut self, pin: u8) -> Result<Box<dyn OutputPin>> {
        let mut output = self.gpio.get(pin)?.into_output();
        output.set_low();
        Ok(Box::new(DigitalOutput { pin: output }))
    }

    fn input(&mut self, pin: u8) -> Result<Box<dyn InputPin>> {
        let input = self.gpio.get(pin)?.into_input();
        Ok(Box::new(DigitalInput { pin: input }))
    }
}

struct SoftPwm {
    pin: gpio::OutputPin,
    range: u32,
    frequency: f64,
}

impl PwmPin for SoftPwm {
    fn write(&mut self, value: u32) -> Result<()> {
        let value = value.min(self.range);
        if value == 0 {
            self.pin.clear_pwm()?;
            self.pin.set_low();
        } else {
            let duty_cycle = f64::from(value) / f64::from(self.range);
            self.pin.set_pwm_frequency(self.frequency, duty_cycle)?;
        }
        Ok(())
    }
}

struct DigitalOutput {
    pin: gpio::OutputPin,
}

impl OutputPin for DigitalOutput {
    fn set_high(&mut self) -> Result<()> {
        self.pin.set_high();
        Ok(())
    }

    fn set_low(&mut self) -> Result<()> {
        self.pin.set_low();
        Ok(())
    }
}

struct DigitalInput {
    pin: gpio::InputPin,
}

impl InputPin for DigitalInput {
    fn is_high(&self) -> bool {
        self.pin.is_high()
    }
}
