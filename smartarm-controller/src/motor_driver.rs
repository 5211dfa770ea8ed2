use crate::arm_config::ArmConfig;
use crate::hardware::{Gpio, HardwareError, OutputPin, PwmPin};
use tracing::{info, warn};

pub const MAX_SPEED: i32 = 100;
const MOTOR_PWM_RANGE: u32 = 100;

/// DC drive motor behind an H-bridge
///
/// Two direction pins select forward or reverse, the PWM pin carries the magnitude.
pub struct MotorDriver {
    pwm: Box<dyn PwmPin>,
    dir1: Box<dyn OutputPin>,
    dir2: Box<dyn OutputPin>,
    current_speed: i32,
}

impl MotorDriver {
    pub fn initialize(gpio: &mut dyn Gpio, config: &ArmConfig) -> Result<Self, HardwareError> {
        let dir1 = gpio.output(config.pins.motor_dir1)?;
        let dir2 = gpio.output(config.pins.motor_dir2)?;
        let pwm = gpio.pwm(config.pins.motor_pwm, MOTOR_PWM_RANGE)?;
        let mut motor = MotorDriver {
            pwm,
            dir1,
            dir2,
            current_speed: 0,
        };
        motor.stop();
        info!("Motor driver initialized");
        Ok(motor)
    }

    /// Signed speed, clamped to -100..=100
    ///
    /// A failed write leaves the motor stopped.
    pub fn set_speed(&mut self, speed: i32) -> Result<(), HardwareError> {
        let speed = speed.clamp(-MAX_SPEED, MAX_SPEED);
        if speed == 0 {
            self.stop();
            return Ok(());
        }

        if let Err(error) = self.drive(speed) {
            warn!("Failed to set motor speed {}: {}", speed, error);
            self.stop();
            return Err(error);
        }
        self.current_speed = speed;
        Ok(())
    }

    fn drive(&mut self, speed: i32) -> Result<(), HardwareError> {
        if speed > 0 {
            self.dir1.set_high()?;
            self.dir2.set_low()?;
        } else {
            self.dir1.set_low()?;
            self.dir2.set_high()?;
        }
        self.pwm.write(speed.unsigned_abs())
    }

    /// Both direction pins low and zero duty
    ///
    /// Every write is attempted even if an earlier one fails.
    pub fn stop(&mut self) {
        if let Err(error) = self.dir1.set_low() {
            warn!("Failed to release motor direction pin: {}", error);
        }
        if let Err(error) = self.dir2.set_low() {
            warn!("Failed to release motor direction pin: {}", error);
        }
        if let Err(error) = self.pwm.write(0) {
            warn!("Failed to zero motor duty: {}", error);
        }
        self.current_speed = 0;
    }

    /// Last commanded speed
    pub fn current_speed(&self) -> i32 {
        self.current_speed
    }
}
