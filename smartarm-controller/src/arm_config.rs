use crate::command::ControlMode;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, str, time::Duration};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("error while accessing configuration")]
    IoError(#[from] std::io::Error),
    #[error("error while parsing json")]
    JsonError(#[from] serde_json::Error),
    #[error("error while parsing yaml")]
    YamlError(#[from] serde_yaml::Error),
}

type Result<T> = std::result::Result<T, ConfigError>;

/// BCM pin numbers of the five joint servos
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ServoPins {
    pub base: u8,
    pub shoulder: u8,
    pub elbow: u8,
    pub wrist: u8,
    pub gripper: u8,
}

impl Default for ServoPins {
    fn default() -> Self {
        ServoPins {
            base: 18,
            shoulder: 19,
            elbow: 20,
            wrist: 21,
            gripper: 22,
        }
    }
}

impl ServoPins {
    /// Pins ordered by joint id
    pub fn get_ids(&self) -> [u8; 5] {
        [
            self.base,
            self.shoulder,
            self.elbow,
            self.wrist,
            self.gripper,
        ]
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct PinConfig {
    pub servos: ServoPins,
    pub ultrasonic_trigger: u8,
    pub ultrasonic_echo: u8,
    pub motor_pwm: u8,
    pub motor_dir1: u8,
    pub motor_dir2: u8,
}

impl Default for PinConfig {
    fn default() -> Self {
        PinConfig {
            servos: ServoPins::default(),
            ultrasonic_trigger: 23,
            ultrasonic_echo: 24,
            motor_pwm: 12,
            motor_dir1: 16,
            motor_dir2: 26,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ServoSettings {
    pub min_angle: i32,
    pub max_angle: i32,
    pub home_angle: i32,
    /// pause after every single servo write
    pub settle_delay_ms: u64,
    /// software PWM ticks per period
    pub pwm_range: u32,
    /// lowest duty written for a valid angle
    pub min_duty: u32,
    /// highest duty written for a valid angle
    pub max_duty: u32,
}

impl Default for ServoSettings {
    fn default() -> Self {
        ServoSettings {
            min_angle: 0,
            max_angle: 180,
            home_angle: 90,
            settle_delay_ms: 20,
            pwm_range: 200,
            min_duty: 5,
            max_duty: 25,
        }
    }
}

impl ServoSettings {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct MotionSettings {
    /// pause between two interpolation steps
    pub step_delay_ms: u64,
    pub default_steps: u32,
}

impl Default for MotionSettings {
    fn default() -> Self {
        MotionSettings {
            step_delay_ms: 50,
            default_steps: 10,
        }
    }
}

impl MotionSettings {
    pub fn step_delay(&self) -> Duration {
        Duration::from_millis(self.step_delay_ms)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct SensorSettings {
    pub trigger_pulse_us: u64,
    /// bound on each echo edge wait
    pub edge_timeout_ms: u64,
    /// pause between two averaged samples
    pub sample_interval_ms: u64,
    pub min_distance_cm: f32,
    pub max_distance_cm: f32,
    pub samples: usize,
}

impl Default for SensorSettings {
    fn default() -> Self {
        SensorSettings {
            trigger_pulse_us: 10,
            edge_timeout_ms: 30,
            sample_interval_ms: 60,
            min_distance_cm: 2.0,
            max_distance_cm: 400.0,
            samples: 3,
        }
    }
}

impl SensorSettings {
    pub fn trigger_pulse(&self) -> Duration {
        Duration::from_micros(self.trigger_pulse_us)
    }

    pub fn edge_timeout(&self) -> Duration {
        Duration::from_millis(self.edge_timeout_ms)
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ControllerSettings {
    pub initial_mode: ControlMode,
    /// objects closer than this trigger a grab
    pub detection_range_cm: f32,
    pub grab_cooldown_ms: u64,
    /// pause around closing the gripper
    pub grab_pause_ms: u64,
    pub tick_period_ms: u64,
    pub status_interval_ms: u64,
    pub command_queue_capacity: usize,
    pub outbox_capacity: usize,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        ControllerSettings {
            initial_mode: ControlMode::Automatic,
            detection_range_cm: 20.0,
            grab_cooldown_ms: 3000,
            grab_pause_ms: 500,
            tick_period_ms: 100,
            status_interval_ms: 1000,
            command_queue_capacity: 32,
            outbox_capacity: 64,
        }
    }
}

impl ControllerSettings {
    pub fn grab_cooldown(&self) -> Duration {
        Duration::from_millis(self.grab_cooldown_ms)
    }

    pub fn grab_pause(&self) -> Duration {
        Duration::from_millis(self.grab_pause_ms)
    }

    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_period_ms)
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_millis(self.status_interval_ms)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(default)]
pub struct ArmConfig {
    pub pins: PinConfig,
    pub servo: ServoSettings,
    pub motion: MotionSettings,
    pub sensor: SensorSettings,
    pub controller: ControllerSettings,
}

impl ArmConfig {
    /// Smartarm comes with an included config file.
    ///
    /// This file is packaged with the binary
    /// This method retrieves this included version
    pub fn included() -> Result<ArmConfig> {
        let yaml = include_str!("../config/smartarm.yaml");
        ArmConfig::parse_yaml(yaml)
    }

    /// Same configuration with every pause and delay set to zero
    ///
    /// Used to run choreographies in simulation as fast as possible.
    pub fn without_delays(mut self) -> ArmConfig {
        self.servo.settle_delay_ms = 0;
        self.motion.step_delay_ms = 0;
        self.sensor.sample_interval_ms = 0;
        self.controller.grab_pause_ms = 0;
        self.controller.grab_cooldown_ms = 0;
        self.controller.tick_period_ms = 0;
        self
    }

    pub fn parse_json(text: &str) -> Result<ArmConfig> {
        let config: ArmConfig = serde_json::from_str(text)?;
        Ok(config)
    }

    pub fn parse_yaml(text: &str) -> Result<ArmConfig> {
        let config: ArmConfig = serde_yaml::from_str(text)?;
        Ok(config)
    }

    pub fn serialize_to_json(&self) -> Result<String> {
        let json = serde_json::to_string_pretty(self)?;
        Ok(json)
    }

    pub fn serialize_to_yaml(&self) -> Result<String> {
        let yaml = serde_yaml::to_string(self)?;
        Ok(yaml)
    }

    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<()> {
        fs::write(path, self.serialize_to_json()?)?;
        Ok(())
    }

    pub fn save_yaml(&self, path: impl AsRef<Path>) -> Result<()> {
        fs::write(path, self.serialize_to_yaml()?)?;
        Ok(())
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<ArmConfig> {
        let text = fs::read_to_string(path)?;
        ArmConfig::parse_json(&text)
    }

    pub fn load_yaml(path: impl AsRef<Path>) -> Result<ArmConfig> {
        let text = fs::read_to_string(path)?;
        ArmConfig::parse_yaml(&text)
    }

    /// Picks the parser from the file extension, yaml unless it ends in `.json`
    pub fn load(path: impl AsRef<Path>) -> Result<ArmConfig> {
        let path = path.as_ref();
        match path.extension().and_then(|extension| extension.to_str()) {
            Some("json") => ArmConfig::load_json(path),
            _ => ArmConfig::load_yaml(path),
        }
    }
}
