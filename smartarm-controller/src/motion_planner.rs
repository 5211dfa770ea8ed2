use crate::arm_config::MotionSettings;
use crate::arm_driver::{ArmDriver, DriverError, Joint};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};
use thiserror::Error;
use tracing::debug;

/// Longest uninterrupted sleep while pausing
const PAUSE_SLICE: Duration = Duration::from_millis(10);

#[derive(Error, Debug)]
pub enum PlannerError {
    #[error("error from arm driver")]
    DriverError(#[from] DriverError),
    #[error("motion interrupted by emergency stop")]
    Interrupted,
}

type Result<T> = std::result::Result<T, PlannerError>;

/// Intermediate angles between `start` and `target`
///
/// Every step advances by the same truncated increment and the last step
/// lands exactly on the target.
pub struct SmoothMotion {
    start: i32,
    target: i32,
    step_size: i64,
    steps: u32,
    index: u32,
}

impl SmoothMotion {
    pub fn new(start: i32, target: i32, steps: u32) -> Self {
        let steps = steps.max(1);
        let step_size = (i64::from(target) - i64::from(start)) / i64::from(steps);
        SmoothMotion {
            start,
            target,
            step_size,
            steps,
            index: 0,
        }
    }
}

impl Iterator for SmoothMotion {
    type Item = i32;

    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= self.steps {
            return None;
        }
        self.index += 1;
        if self.index == self.steps {
            Some(self.target)
        } else {
            Some((i64::from(self.start) + self.step_size * i64::from(self.index)) as i32)
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.steps - self.index) as usize;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for SmoothMotion {}

/// Multi-step moves on a single joint
///
/// Moves are paced with a fixed delay on top of the driver's own settle delay
/// and stop between steps once the interrupt flag is raised.
pub struct MotionSequencer {
    step_delay: Duration,
    default_steps: u32,
    interrupt: Arc<AtomicBool>,
}

impl MotionSequencer {
    pub fn new(settings: &MotionSettings, interrupt: Arc<AtomicBool>) -> Self {
        MotionSequencer {
            step_delay: settings.step_delay(),
            default_steps: settings.default_steps.max(1),
            interrupt,
        }
    }

    /// Move `joint` to `target` in `steps` writes
    ///
    /// `None` uses the configured step count, `steps <= 0` counts as one.
    pub fn smooth_move(
        &self,
        arm: &mut dyn ArmDriver,
        joint: Joint,
        target: i32,
        steps: Option<i32>,
    ) -> Result<()> {
        arm.validate_angle(joint, target)?;
        let steps = match steps {
            Some(steps) => u32::try_from(steps).unwrap_or(0).max(1),
            None => self.default_steps,
        };
        let start = arm.angle(joint);
        debug!("Smooth move {} {}° -> {}° in {} steps", joint, start, target, steps);
        for angle in SmoothMotion::new(start, target, steps) {
            self.check_interrupt()?;
            arm.set_angle(joint, angle)?;
            self.pause(self.step_delay)?;
        }
        Ok(())
    }

    /// Sleep that gives up as soon as the interrupt flag is raised
    pub fn pause(&self, duration: Duration) -> Result<()> {
        let deadline = Instant::now() + duration;
        loop {
            self.check_interrupt()?;
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(());
            }
            thread::sleep(remaining.min(PAUSE_SLICE));
        }
    }

    fn check_interrupt(&self) -> Result<()> {
        if self.interrupt.load(Ordering::Acquire) {
            Err(PlannerError::Interrupted)
        } else {
            Ok(())
        }
    }
}
