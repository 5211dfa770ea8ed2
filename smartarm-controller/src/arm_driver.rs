use crate::arm_config::{ArmConfig, ServoSettings};
use crate::hardware::{Gpio, HardwareError, PwmPin};
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    ops::RangeInclusive,
    thread,
    time::Instant,
};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum DriverError {
    #[error("failed to initialize servo outputs")]
    HardwareInitError(#[source] HardwareError),
    #[error("invalid joint id {0}")]
    InvalidJointId(i64),
    #[error("invalid angle {angle} for {joint}, expected {min}..={max}")]
    InvalidAngle {
        joint: Joint,
        angle: i32,
        min: i32,
        max: i32,
    },
    #[error("failed writing to {joint} servo")]
    WriteFailed {
        joint: Joint,
        #[source]
        source: HardwareError,
    },
    #[error("failed to move joints {failed:?}")]
    PartialBatch { failed: Vec<Joint> },
}

type Result<T> = std::result::Result<T, DriverError>;

/// Joint angles in degrees ordered by joint id
pub type JointAngles = [i32; Joint::COUNT];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Joint {
    Base,
    Shoulder,
    Elbow,
    Wrist,
    Gripper,
}

impl Joint {
    pub const COUNT: usize = 5;
    pub const ALL: [Joint; Joint::COUNT] = [
        Joint::Base,
        Joint::Shoulder,
        Joint::Elbow,
        Joint::Wrist,
        Joint::Gripper,
    ];

    pub fn id(self) -> usize {
        match self {
            Joint::Base => 0,
            Joint::Shoulder => 1,
            Joint::Elbow => 2,
            Joint::Wrist => 3,
            Joint::Gripper => 4,
        }
    }

    pub fn from_id(id: i64) -> Result<Joint> {
        usize::try_from(id)
            .ok()
            .and_then(|index| Joint::ALL.get(index).copied())
            .ok_or(DriverError::InvalidJointId(id))
    }
}

impl fmt::Display for Joint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Joint::Base => "base",
            Joint::Shoulder => "shoulder",
            Joint::Elbow => "elbow",
            Joint::Wrist => "wrist",
            Joint::Gripper => "gripper",
        };
        f.write_str(name)
    }
}

pub trait ArmDriver: Send {
    /// Single write, validated against [`ArmDriver::limits`]
    fn set_angle(&mut self, joint: Joint, angle: i32) -> Result<()>;
    /// Last commanded angle, not a hardware read
    fn angle(&self, joint: Joint) -> i32;
    fn angles(&self) -> JointAngles;
    fn limits(&self) -> RangeInclusive<i32>;
    fn home_angle(&self) -> i32;
    /// Disable every servo output
    ///
    /// Skips angle validation and never fails.
    fn emergency_stop(&mut self);

    fn validate_angle(&self, joint: Joint, angle: i32) -> Result<()> {
        let limits = self.limits();
        if limits.contains(&angle) {
            Ok(())
        } else {
            Err(DriverError::InvalidAngle {
                joint,
                angle,
                min: *limits.start(),
                max: *limits.end(),
            })
        }
    }

    /// Writes every joint in order
    ///
    /// A failing joint does not stop the rest of the batch.
    fn set_all_angles(&mut self, angles: &JointAngles) -> Result<()> {
        let mut failed = vec![];
        for (joint, angle) in Joint::ALL.iter().zip(angles.iter()) {
            if let Err(error) = self.set_angle(*joint, *angle) {
                warn!("Failed to move {} to {}: {}", joint, angle, error);
                failed.push(*joint);
            }
        }
        if failed.is_empty() {
            Ok(())
        } else {
            Err(DriverError::PartialBatch { failed })
        }
    }

    fn home(&mut self) -> Result<()> {
        let home = [self.home_angle(); Joint::COUNT];
        self.set_all_angles(&home)?;
        info!("Moved to home position");
        Ok(())
    }
}

struct JointState {
    pin_id: u8,
    output: Box<dyn PwmPin>,
    current_angle: i32,
    last_write_time: Option<Instant>,
}

/// Hobby servos driven by software PWM
pub struct ServoArmDriver {
    joints: Vec<JointState>,
    settings: ServoSettings,
}

impl ServoArmDriver {
    /// Claims all servo outputs and moves the arm home
    pub fn initialize(gpio: &mut dyn Gpio, config: &ArmConfig) -> Result<Self> {
        let settings = config.servo.clone();
        let mut joints = Vec::with_capacity(Joint::COUNT);
        for pin_id in config.pins.servos.get_ids() {
            let output = gpio
                .pwm(pin_id, settings.pwm_range)
                .map_err(DriverError::HardwareInitError)?;
            joints.push(JointState {
                pin_id,
                output,
                current_angle: settings.home_angle,
                last_write_time: None,
            });
        }
        let mut driver = ServoArmDriver { joints, settings };
        driver.home()?;
        info!("Servo control system initialized");
        Ok(driver)
    }

    pub fn pin_id(&self, joint: Joint) -> u8 {
        self.joints[joint.id()].pin_id
    }

    pub fn last_write_time(&self, joint: Joint) -> Option<Instant> {
        self.joints[joint.id()].last_write_time
    }
}

/// Duty in PWM ticks for a valid angle
///
/// Angles map linearly onto `min_duty..=max_duty` so the servo is never driven
/// to the ends of its pulse range.
pub fn angle_to_duty(settings: &ServoSettings, angle: i32) -> u32 {
    let span = i64::from(settings.max_angle) - i64::from(settings.min_angle);
    if span <= 0 {
        return settings.min_duty;
    }
    let offset = i64::from(angle) - i64::from(settings.min_angle);
    let duty_span = i64::from(settings.max_duty) - i64::from(settings.min_duty);
    let duty = i64::from(settings.min_duty) + offset * duty_span / span;
    duty.clamp(i64::from(settings.min_duty), i64::from(settings.max_duty)) as u32
}

impl ArmDriver for ServoArmDriver {
    fn set_angle(&mut self, joint: Joint, angle: i32) -> Result<()> {
        self.validate_angle(joint, angle)?;
        let duty = angle_to_duty(&self.settings, angle);
        let state = &mut self.joints[joint.id()];
        state
            .output
            .write(duty)
            .map_err(|source| DriverError::WriteFailed { joint, source })?;
        state.current_angle = angle;
        state.last_write_time = Some(Instant::now());
        debug!("{} -> {}° (duty {})", joint, angle, duty);

        let settle_delay = self.settings.settle_delay();
        if !settle_delay.is_zero() {
            thread::sleep(settle_delay);
        }
        Ok(())
    }

    fn angle(&self, joint: Joint) -> i32 {
        self.joints[joint.id()].current_angle
    }

    fn angles(&self) -> JointAngles {
        let mut angles = [0; Joint::COUNT];
        for joint in Joint::ALL {
            angles[joint.id()] = self.angle(joint);
        }
        angles
    }

    fn limits(&self) -> RangeInclusive<i32> {
        self.settings.min_angle..=self.settings.max_angle
    }

    fn home_angle(&self) -> i32 {
        self.settings.home_angle
    }

    fn emergency_stop(&mut self) {
        for (joint, state) in Joint::ALL.iter().zip(self.joints.iter_mut()) {
            if let Err(error) = state.output.write(0) {
                warn!("Failed to disable {} servo: {}", joint, error);
            }
        }
        warn!("Servos disabled");
    }
}

impl Drop for ServoArmDriver {
    fn drop(&mut self) {
        self.emergency_stop();
    }
}
