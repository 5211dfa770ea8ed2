use crate::arm_config::{ArmConfig, SensorSettings};
use crate::hardware::{Gpio, HardwareError, InputPin, OutputPin};
use std::{
    hint, thread,
    time::{Duration, Instant},
};
use thiserror::Error;
use tracing::{debug, info};

/// Speed of sound in cm per microsecond
pub const SPEED_OF_SOUND: f32 = 0.0343;

/// Trigger is held low this long after claiming the pins
const TRIGGER_SETTLE: Duration = Duration::from_millis(10);

/// Why a measurement produced no usable distance
#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum SensorError {
    #[error("timed out waiting for echo start")]
    EchoStartTimeout,
    #[error("timed out waiting for echo end")]
    EchoEndTimeout,
    #[error("reading of {0:.1} cm is outside of sensor range")]
    OutOfRange(f32),
    #[error("failed to send trigger pulse")]
    TriggerFailed,
    #[error("no valid samples")]
    NoValidSamples,
}

/// Distance in centimeters or the reason there is none
pub type DistanceSample = std::result::Result<f32, SensorError>;

pub trait RangeSensor: Send {
    fn read_once(&mut self) -> DistanceSample;

    /// Pause between two samples of [`RangeSensor::read_averaged`]
    fn sample_interval(&self) -> Duration;

    /// Mean of the valid readings out of `samples` measurements
    fn read_averaged(&mut self, samples: usize) -> DistanceSample {
        let samples = samples.max(1);
        let interval = self.sample_interval();
        let mut readings = Vec::with_capacity(samples);
        for index in 0..samples {
            if index > 0 && !interval.is_zero() {
                thread::sleep(interval);
            }
            match self.read_once() {
                Ok(distance) => readings.push(distance),
                Err(error) => debug!("Discarding distance sample: {}", error),
            }
        }
        mean(&readings).ok_or(SensorError::NoValidSamples)
    }

    fn is_object_in_range(&mut self, min_distance: f32, max_distance: f32) -> bool {
        matches!(
            self.read_averaged(3),
            Ok(distance) if distance >= min_distance && distance <= max_distance
        )
    }
}

fn mean(readings: &[f32]) -> Option<f32> {
    if readings.is_empty() {
        None
    } else {
        Some(readings.iter().sum::<f32>() / readings.len() as f32)
    }
}

/// Round trip echo time to distance
pub fn echo_to_distance(echo: Duration) -> f32 {
    echo.as_micros() as f32 * SPEED_OF_SOUND / 2.0
}

/// HC-SR04 style time of flight sensor
pub struct UltrasonicSensor {
    trigger: Box<dyn OutputPin>,
    echo: Box<dyn InputPin>,
    settings: SensorSettings,
}

impl UltrasonicSensor {
    pub fn initialize(gpio: &mut dyn Gpio, config: &ArmConfig) -> Result<Self, HardwareError> {
        let mut trigger = gpio.output(config.pins.ultrasonic_trigger)?;
        let echo = gpio.input(config.pins.ultrasonic_echo)?;
        trigger.set_low()?;
        thread::sleep(TRIGGER_SETTLE);
        info!("Ultrasonic sensor initialized");
        Ok(UltrasonicSensor {
            trigger,
            echo,
            settings: config.sensor.clone(),
        })
    }

    fn send_trigger_pulse(&mut self) -> Result<(), HardwareError> {
        self.trigger.set_high()?;
        thread::sleep(self.settings.trigger_pulse());
        self.trigger.set_low()
    }

    /// Spin until the echo pin reaches `high` or `timeout` passes
    fn wait_for_echo(&self, high: bool, timeout: Duration) -> Option<Instant> {
        let started = Instant::now();
        while self.echo.is_high() != high {
            if started.elapsed() > timeout {
                return None;
            }
            hint::spin_loop();
        }
        Some(Instant::now())
    }
}

impl RangeSensor for UltrasonicSensor {
    fn read_once(&mut self) -> DistanceSample {
        self.send_trigger_pulse().map_err(|error| {
            debug!("Trigger pulse failed: {}", error);
            SensorError::TriggerFailed
        })?;

        let timeout = self.settings.edge_timeout();
        let echo_start = self
            .wait_for_echo(true, timeout)
            .ok_or(SensorError::EchoStartTimeout)?;
        let echo_end = self
            .wait_for_echo(false, timeout)
            .ok_or(SensorError::EchoEndTimeout)?;

        let distance = echo_to_distance(echo_end.duration_since(echo_start));
        if distance < self.settings.min_distance_cm || distance > self.settings.max_distance_cm {
            return Err(SensorError::OutOfRange(distance));
        }
        Ok(distance)
    }

    fn sample_interval(&self) -> Duration {
        self.settings.sample_interval()
    }
}
