use crate::arm_config::{ArmConfig, ControllerSettings};
use crate::arm_driver::{ArmDriver, DriverError, Joint, JointAngles};
use crate::command::{Command, ControlMode};
use crate::command_queue::CommandReceiver;
use crate::distance_sensor::RangeSensor;
use crate::hardware::HardwareError;
use crate::motion_planner::{MotionSequencer, PlannerError};
use crate::motor_driver::{MotorDriver, MAX_SPEED};
use serde::{Deserialize, Serialize};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Instant,
};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("{command} is only accepted in manual mode")]
    ModeMismatch { command: Command },
    #[error("invalid joint id {0}")]
    InvalidJointId(i64),
    #[error("invalid angle {0}")]
    InvalidAngle(i32),
    #[error("invalid motor speed {0}, expected -100..=100")]
    InvalidSpeed(i32),
    #[error("arm driver failed")]
    Driver(#[source] DriverError),
    #[error("motor driver failed")]
    Motor(#[from] HardwareError),
}

impl From<DriverError> for CommandError {
    fn from(error: DriverError) -> Self {
        match error {
            DriverError::InvalidJointId(id) => CommandError::InvalidJointId(id),
            DriverError::InvalidAngle { angle, .. } => CommandError::InvalidAngle(angle),
            other => CommandError::Driver(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub mode: ControlMode,
    pub distance_cm: Option<f32>,
    pub servo_angles: JointAngles,
    pub motor_speed: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ControllerEvent {
    ModeChanged(ControlMode),
    GrabStarted { distance_cm: f32 },
    GrabCompleted,
    GrabAborted { reason: String },
    CommandRejected { command: String, reason: String },
    EmergencyStop,
    Homed,
}

impl ControllerEvent {
    pub fn level(&self) -> EventLevel {
        match self {
            ControllerEvent::ModeChanged(_)
            | ControllerEvent::GrabStarted { .. }
            | ControllerEvent::GrabCompleted
            | ControllerEvent::Homed => EventLevel::Info,
            ControllerEvent::GrabAborted { .. } | ControllerEvent::CommandRejected { .. } => {
                EventLevel::Warning
            }
            ControllerEvent::EmergencyStop => EventLevel::Error,
        }
    }

    pub fn message(&self) -> String {
        match self {
            ControllerEvent::ModeChanged(mode) => format!("Switched to {} mode", mode),
            ControllerEvent::GrabStarted { distance_cm } => format!(
                "Object detected at {:.1}cm - executing grab sequence",
                distance_cm
            ),
            ControllerEvent::GrabCompleted => "Grab sequence completed".to_owned(),
            ControllerEvent::GrabAborted { reason } => format!("Grab sequence aborted: {}", reason),
            ControllerEvent::CommandRejected { command, reason } => {
                format!("Rejected {}: {}", command, reason)
            }
            ControllerEvent::EmergencyStop => "Emergency stop activated".to_owned(),
            ControllerEvent::Homed => "Moved to home position".to_owned(),
        }
    }

    pub fn to_record(&self) -> EventRecord {
        EventRecord {
            level: self.level(),
            message: self.message(),
        }
    }
}

/// Event as it goes out on the bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub level: EventLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Status(StatusSnapshot),
    Event(EventRecord),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrabStep {
    Move { joint: Joint, angle: i32, steps: i32 },
    Pause,
}

/// Fixed choreography executed on every detection
pub const GRAB_CHOREOGRAPHY: [GrabStep; 8] = [
    // reach down
    GrabStep::Move {
        joint: Joint::Shoulder,
        angle: 45,
        steps: 5,
    },
    GrabStep::Move {
        joint: Joint::Elbow,
        angle: 120,
        steps: 5,
    },
    GrabStep::Move {
        joint: Joint::Gripper,
        angle: 0,
        steps: 3,
    },
    GrabStep::Pause,
    GrabStep::Move {
        joint: Joint::Gripper,
        angle: 180,
        steps: 3,
    },
    GrabStep::Pause,
    // lift
    GrabStep::Move {
        joint: Joint::Shoulder,
        angle: 90,
        steps: 5,
    },
    GrabStep::Move {
        joint: Joint::Elbow,
        angle: 90,
        steps: 5,
    },
];

#[derive(Debug, Clone)]
pub struct ControllerState {
    pub mode: ControlMode,
    /// no detection before this instant
    pub cooldown_until: Option<Instant>,
    pub next_status: Instant,
    pub last_distance: Option<f32>,
}

/// Owner of every actuator and the sensor
///
/// Lives on the control loop thread. Other threads only reach it through the
/// command queue, so hardware writes never interleave.
pub struct ArmCoordinator {
    arm: Box<dyn ArmDriver>,
    sensor: Box<dyn RangeSensor>,
    motor: MotorDriver,
    sequencer: MotionSequencer,
    commands: CommandReceiver,
    outbox: mpsc::Sender<Outbound>,
    settings: ControllerSettings,
    samples: usize,
    /// end of the most recent ultrasonic measurement
    last_ping: Option<Instant>,
    state: ControllerState,
}

impl ArmCoordinator {
    pub fn new(
        arm: Box<dyn ArmDriver>,
        sensor: Box<dyn RangeSensor>,
        motor: MotorDriver,
        commands: CommandReceiver,
        outbox: mpsc::Sender<Outbound>,
        config: &ArmConfig,
    ) -> Self {
        let sequencer = MotionSequencer::new(&config.motion, commands.interrupt_flag());
        let state = ControllerState {
            mode: config.controller.initial_mode,
            cooldown_until: None,
            next_status: Instant::now() + config.controller.status_interval(),
            last_distance: None,
        };
        ArmCoordinator {
            arm,
            sensor,
            motor,
            sequencer,
            commands,
            outbox,
            settings: config.controller.clone(),
            samples: config.sensor.samples,
            last_ping: None,
            state,
        }
    }

    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    pub fn mode(&self) -> ControlMode {
        self.state.mode
    }

    pub fn arm(&self) -> &dyn ArmDriver {
        self.arm.as_ref()
    }

    pub fn motor(&self) -> &MotorDriver {
        &self.motor
    }

    /// Runs ticks until `keep_running` drops, then stops everything
    pub fn run(mut self, keep_running: Arc<AtomicBool>) {
        info!("Control loop running in {} mode", self.state.mode);
        let tick_period = self.settings.tick_period();
        while keep_running.load(Ordering::Acquire) {
            self.tick();
            if !tick_period.is_zero() {
                thread::sleep(tick_period);
            }
        }
        info!("Control loop shutting down");
        self.arm.emergency_stop();
        self.motor.stop();
    }

    /// One pass of the control loop
    pub fn tick(&mut self) {
        let mut stopped = self.apply_pending_commands();
        if self.commands.interrupt_requested() {
            // a STOP overflowed the queue or arrived after draining
            self.emergency_stop();
            stopped = true;
        }
        if !stopped && self.state.mode == ControlMode::Automatic {
            self.automatic_step();
        }
        self.publish_status_if_due();
    }

    /// Drains the queue, true if a STOP was among the commands
    fn apply_pending_commands(&mut self) -> bool {
        let mut stopped = false;
        while let Some(command) = self.commands.try_next() {
            if command == Command::EmergencyStop {
                stopped = true;
            }
            let description = command.to_string();
            if let Err(error) = self.apply_command(command) {
                warn!("Rejected {}: {}", description, error);
                self.emit(ControllerEvent::CommandRejected {
                    command: description,
                    reason: error.to_string(),
                });
            }
        }
        stopped
    }

    pub fn apply_command(&mut self, command: Command) -> Result<(), CommandError> {
        if command.requires_manual() && self.state.mode != ControlMode::Manual {
            return Err(CommandError::ModeMismatch { command });
        }
        match command {
            Command::SetMode { mode } => {
                if mode != self.state.mode {
                    info!("Switched to {} mode", mode);
                    self.state.mode = mode;
                    self.emit(ControllerEvent::ModeChanged(mode));
                }
            }
            Command::SetServo { joint, angle } => {
                let joint = Joint::from_id(i64::from(joint))?;
                self.arm.set_angle(joint, angle)?;
                info!("Manual servo control: {} -> {}°", joint, angle);
            }
            Command::SetMotor { speed } => {
                if !(-MAX_SPEED..=MAX_SPEED).contains(&speed) {
                    return Err(CommandError::InvalidSpeed(speed));
                }
                self.motor.set_speed(speed)?;
                info!("Manual motor control: {}", speed);
            }
            Command::EmergencyStop => self.emergency_stop(),
            Command::Home => {
                self.arm.home()?;
                self.emit(ControllerEvent::Homed);
            }
        }
        Ok(())
    }

    fn emergency_stop(&mut self) {
        self.arm.emergency_stop();
        self.motor.stop();
        self.commands.clear_interrupt();
        warn!("Emergency stop activated");
        self.emit(ControllerEvent::EmergencyStop);
    }

    fn automatic_step(&mut self) {
        if let Some(cooldown_until) = self.state.cooldown_until {
            if Instant::now() < cooldown_until {
                return;
            }
            self.state.cooldown_until = None;
        }

        self.wait_for_quiet_sensor();
        let reading = self.sensor.read_averaged(self.samples);
        self.last_ping = Some(Instant::now());
        match reading {
            Ok(distance) => {
                self.state.last_distance = Some(distance);
                if self.in_detection_band(distance) {
                    self.grab(distance);
                }
            }
            Err(error) => {
                debug!("No valid distance this cycle: {}", error);
                self.state.last_distance = None;
            }
        }
    }

    fn in_detection_band(&self, distance: f32) -> bool {
        distance > 0.0 && distance < self.settings.detection_range_cm
    }

    fn grab(&mut self, distance: f32) {
        info!(
            "Object detected at {:.1}cm - executing grab sequence",
            distance
        );
        self.emit(ControllerEvent::GrabStarted {
            distance_cm: distance,
        });
        match self.run_choreography() {
            Ok(()) => {
                info!("Grab sequence completed");
                self.emit(ControllerEvent::GrabCompleted);
                self.state.cooldown_until = Some(Instant::now() + self.settings.grab_cooldown());
            }
            Err(PlannerError::Interrupted) => {
                warn!("Grab sequence interrupted by emergency stop");
                self.emit(ControllerEvent::GrabAborted {
                    reason: PlannerError::Interrupted.to_string(),
                });
                self.emergency_stop();
            }
            Err(error) => {
                warn!("Grab sequence failed: {}", error);
                self.emit(ControllerEvent::GrabAborted {
                    reason: error.to_string(),
                });
                self.state.cooldown_until = Some(Instant::now() + self.settings.grab_cooldown());
            }
        }
    }

    /// Not preemptible by queued commands, only by the interrupt flag
    fn run_choreography(&mut self) -> Result<(), PlannerError> {
        for step in GRAB_CHOREOGRAPHY.iter() {
            match *step {
                GrabStep::Move {
                    joint,
                    angle,
                    steps,
                } => self
                    .sequencer
                    .smooth_move(self.arm.as_mut(), joint, angle, Some(steps))?,
                GrabStep::Pause => self.sequencer.pause(self.settings.grab_pause())?,
            }
        }
        Ok(())
    }

    /// Snapshot with a fresh single distance reading
    pub fn status_snapshot(&mut self) -> StatusSnapshot {
        self.wait_for_quiet_sensor();
        let distance_cm = self.sensor.read_once().ok();
        self.last_ping = Some(Instant::now());
        StatusSnapshot {
            mode: self.state.mode,
            distance_cm,
            servo_angles: self.arm.angles(),
            motor_speed: self.motor.current_speed(),
        }
    }

    /// Keeps consecutive pings one sample interval apart
    fn wait_for_quiet_sensor(&self) {
        if let Some(last_ping) = self.last_ping {
            let ready_at = last_ping + self.sensor.sample_interval();
            let remaining = ready_at.saturating_duration_since(Instant::now());
            if !remaining.is_zero() {
                thread::sleep(remaining);
            }
        }
    }

    fn publish_status_if_due(&mut self) {
        let now = Instant::now();
        if now < self.state.next_status {
            return;
        }
        self.state.next_status = now + self.settings.status_interval();
        let snapshot = self.status_snapshot();
        self.send(Outbound::Status(snapshot));
    }

    fn emit(&self, event: ControllerEvent) {
        self.send(Outbound::Event(event.to_record()));
    }

    fn send(&self, message: Outbound) {
        if let Err(error) = self.outbox.try_send(message) {
            debug!("Dropping outbound message: {}", error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arm_driver::ServoArmDriver;
    use crate::command_queue::{command_queue, CommandSender};
    use crate::distance_sensor::{testing::ScriptedRangeSensor, UltrasonicSensor};
    use crate::hardware::{EchoResponse, PinWrite, SimulatedGpio};
    use std::ops::RangeInclusive;
    use std::sync::Mutex;
    use std::time::Duration;

    const SERVO_PINS: [u8; 5] = [18, 19, 20, 21, 22];
    const MOTOR_PWM: u8 = 12;

    type MoveLog = Arc<Mutex<Vec<(Joint, i32)>>>;
    type WriteHook = Box<dyn FnMut(usize) + Send>;

    /// Servo driver that records every accepted write
    struct RecordingArm {
        inner: ServoArmDriver,
        log: MoveLog,
        hook: Option<WriteHook>,
    }

    impl ArmDriver for RecordingArm {
        fn set_angle(&mut self, joint: Joint, angle: i32) -> Result<(), DriverError> {
            self.inner.set_angle(joint, angle)?;
            let count = {
                let mut log = self.log.lock().unwrap();
                log.push((joint, angle));
                log.len()
            };
            if let Some(hook) = self.hook.as_mut() {
                hook(count);
            }
            Ok(())
        }

        fn angle(&self, joint: Joint) -> i32 {
            self.inner.angle(joint)
        }

        fn angles(&self) -> JointAngles {
            self.inner.angles()
        }

        fn limits(&self) -> RangeInclusive<i32> {
            self.inner.limits()
        }

        fn home_angle(&self) -> i32 {
            self.inner.home_angle()
        }

        fn emergency_stop(&mut self) {
            self.inner.emergency_stop()
        }
    }

    struct Harness {
        coordinator: ArmCoordinator,
        commands: CommandSender,
        outbox: mpsc::Receiver<Outbound>,
        gpio: SimulatedGpio,
        sensor: ScriptedRangeSensor,
        moves: MoveLog,
    }

    impl Harness {
        fn new(config: ArmConfig) -> Self {
            Self::with_hook(config, None, 8)
        }

        fn with_hook(config: ArmConfig, hook: Option<WriteHook>, queue_capacity: usize) -> Self {
            Self::build(config, hook, queue_capacity, ScriptedRangeSensor::new())
        }

        fn with_sensor(config: ArmConfig, sensor: ScriptedRangeSensor) -> Self {
            Self::build(config, None, 8, sensor)
        }

        fn build(
            config: ArmConfig,
            hook: Option<WriteHook>,
            queue_capacity: usize,
            sensor: ScriptedRangeSensor,
        ) -> Self {
            let gpio = SimulatedGpio::new();
            let arm = ServoArmDriver::initialize(&mut gpio.clone(), &config).unwrap();
            let motor = MotorDriver::initialize(&mut gpio.clone(), &config).unwrap();
            let moves = MoveLog::default();
            let (commands, receiver) = command_queue(queue_capacity);
            let (outbox_sender, outbox) = mpsc::channel(256);
            let coordinator = ArmCoordinator::new(
                Box::new(RecordingArm {
                    inner: arm,
                    log: moves.clone(),
                    hook,
                }),
                Box::new(sensor.clone()),
                motor,
                receiver,
                outbox_sender,
                &config,
            );
            Harness {
                coordinator,
                commands,
                outbox,
                gpio,
                sensor,
                moves,
            }
        }

        fn manual() -> Self {
            let mut config = test_config();
            config.controller.initial_mode = ControlMode::Manual;
            Self::new(config)
        }

        fn submit(&self, text: &str) {
            self.commands.submit(text.parse().unwrap()).unwrap();
        }

        fn moves(&self) -> Vec<(Joint, i32)> {
            self.moves.lock().unwrap().clone()
        }

        fn drain(&mut self) -> Vec<Outbound> {
            let mut messages = vec![];
            while let Ok(message) = self.outbox.try_recv() {
                messages.push(message);
            }
            messages
        }

        fn event_messages(&mut self) -> Vec<String> {
            self.drain()
                .into_iter()
                .filter_map(|message| match message {
                    Outbound::Event(record) => Some(record.message),
                    Outbound::Status(_) => None,
                })
                .collect()
        }

        fn assert_servos_disabled(&self) {
            for pin in SERVO_PINS {
                assert_eq!(self.gpio.pwm_value(pin), Some(0), "servo pin {}", pin);
            }
        }
    }

    fn test_config() -> ArmConfig {
        ArmConfig::default().without_delays()
    }

    fn expected_grab() -> Vec<(Joint, i32)> {
        use Joint::*;
        vec![
            (Shoulder, 81),
            (Shoulder, 72),
            (Shoulder, 63),
            (Shoulder, 54),
            (Shoulder, 45),
            (Elbow, 96),
            (Elbow, 102),
            (Elbow, 108),
            (Elbow, 114),
            (Elbow, 120),
            (Gripper, 60),
            (Gripper, 30),
            (Gripper, 0),
            (Gripper, 60),
            (Gripper, 120),
            (Gripper, 180),
            (Shoulder, 54),
            (Shoulder, 63),
            (Shoulder, 72),
            (Shoulder, 81),
            (Shoulder, 90),
            (Elbow, 114),
            (Elbow, 108),
            (Elbow, 102),
            (Elbow, 96),
            (Elbow, 90),
        ]
    }

    #[test]
    fn detection_runs_grab_choreography_in_order() {
        let mut harness = Harness::new(test_config());
        harness.sensor.extend(&[18.0, 19.0, 19.5]);
        harness.coordinator.tick();

        assert_eq!(harness.moves(), expected_grab());
        let arm = harness.coordinator.arm();
        assert_eq!(arm.angle(Joint::Shoulder), 90);
        assert_eq!(arm.angle(Joint::Elbow), 90);
        assert_eq!(arm.angle(Joint::Gripper), 180);
        let events = harness.event_messages();
        assert_eq!(
            events,
            vec![
                "Object detected at 18.8cm - executing grab sequence".to_owned(),
                "Grab sequence completed".to_owned(),
            ]
        );
    }

    #[test]
    fn object_outside_band_is_ignored() {
        let mut harness = Harness::new(test_config());
        harness.sensor.extend(&[20.0, 20.0, 20.0]);
        harness.coordinator.tick();
        assert!(harness.moves().is_empty());
        assert_eq!(harness.coordinator.state().last_distance, Some(20.0));
    }

    #[test]
    fn sensor_dropout_means_no_detection() {
        let mut harness = Harness::new(test_config());
        harness.coordinator.tick();
        harness.coordinator.tick();
        assert!(harness.moves().is_empty());
        assert_eq!(harness.coordinator.state().last_distance, None);
        assert_eq!(harness.coordinator.mode(), ControlMode::Automatic);
    }

    #[test]
    fn cooldown_suppresses_detection() {
        let mut config = test_config();
        config.controller.grab_cooldown_ms = 60_000;
        let mut harness = Harness::new(config);
        harness.sensor.extend(&[10.0, 10.0, 10.0]);
        harness.coordinator.tick();
        assert_eq!(harness.moves().len(), expected_grab().len());

        harness.sensor.extend(&[10.0, 10.0, 10.0]);
        harness.coordinator.tick();
        assert_eq!(harness.moves().len(), expected_grab().len());
        assert_eq!(harness.sensor.remaining(), 3);
        assert!(harness.coordinator.state().cooldown_until.is_some());
    }

    #[test]
    fn commands_keep_flowing_during_cooldown() {
        let mut config = test_config();
        config.controller.grab_cooldown_ms = 60_000;
        let mut harness = Harness::new(config);
        harness.sensor.extend(&[10.0, 10.0, 10.0]);
        harness.coordinator.tick();
        harness.submit("MODE MANUAL");
        harness.coordinator.tick();
        assert_eq!(harness.coordinator.mode(), ControlMode::Manual);
    }

    #[test]
    fn manual_commands_rejected_in_automatic_mode() {
        let mut harness = Harness::new(test_config());
        harness.gpio.clear_writes();
        harness.submit("SERVO 4 180");
        harness.submit("MOTOR 50");
        harness.coordinator.tick();

        assert!(harness.gpio.writes().is_empty());
        assert_eq!(harness.coordinator.arm().angle(Joint::Gripper), 90);
        assert_eq!(harness.coordinator.motor().current_speed(), 0);
        let events = harness.event_messages();
        assert_eq!(
            events,
            vec![
                "Rejected SERVO 4 180: SERVO 4 180 is only accepted in manual mode".to_owned(),
                "Rejected MOTOR 50: MOTOR 50 is only accepted in manual mode".to_owned(),
            ]
        );
    }

    #[test]
    fn apply_command_reports_mode_mismatch() {
        let mut harness = Harness::new(test_config());
        let result = harness
            .coordinator
            .apply_command(Command::SetServo { joint: 0, angle: 10 });
        assert!(matches!(result, Err(CommandError::ModeMismatch { .. })));
    }

    #[test]
    fn manual_servo_then_auto_keeps_gripper_closed() {
        let mut harness = Harness::new(test_config());
        harness.submit("MODE MANUAL");
        harness.submit("SERVO 4 180");
        harness.coordinator.tick();
        assert_eq!(harness.coordinator.arm().angle(Joint::Gripper), 180);
        assert_eq!(harness.moves(), vec![(Joint::Gripper, 180)]);

        harness.submit("MODE AUTO");
        harness.sensor.extend(&[55.0, 60.0, 58.0]);
        harness.coordinator.tick();
        harness.coordinator.tick();
        assert_eq!(harness.coordinator.mode(), ControlMode::Automatic);
        assert_eq!(harness.coordinator.arm().angle(Joint::Gripper), 180);
        assert_eq!(harness.moves(), vec![(Joint::Gripper, 180)]);
    }

    #[test]
    fn manual_writes_are_single_steps() {
        let mut harness = Harness::manual();
        harness.submit("SERVO 1 30");
        harness.submit("MOTOR -40");
        harness.coordinator.tick();
        assert_eq!(harness.moves(), vec![(Joint::Shoulder, 30)]);
        assert_eq!(harness.coordinator.motor().current_speed(), -40);
        assert_eq!(harness.gpio.pwm_value(MOTOR_PWM), Some(40));
    }

    #[test]
    fn manual_mode_never_grabs() {
        let mut harness = Harness::manual();
        harness.sensor.extend(&[5.0, 5.0, 5.0]);
        harness.coordinator.tick();
        assert!(harness.moves().is_empty());
    }

    #[test]
    fn invalid_manual_values_are_rejected() {
        let mut harness = Harness::manual();
        let coordinator = &mut harness.coordinator;
        assert!(matches!(
            coordinator.apply_command(Command::SetServo {
                joint: 7,
                angle: 90
            }),
            Err(CommandError::InvalidJointId(7))
        ));
        assert!(matches!(
            coordinator.apply_command(Command::SetServo {
                joint: 1,
                angle: 200
            }),
            Err(CommandError::InvalidAngle(200))
        ));
        assert!(matches!(
            coordinator.apply_command(Command::SetMotor { speed: 150 }),
            Err(CommandError::InvalidSpeed(150))
        ));
        assert_eq!(coordinator.arm().angle(Joint::Shoulder), 90);
        assert_eq!(coordinator.motor().current_speed(), 0);
    }

    #[test]
    fn rejected_command_does_not_stop_the_queue() {
        let mut harness = Harness::manual();
        harness.submit("SERVO 9 90");
        harness.submit("SERVO 0 10");
        harness.coordinator.tick();
        assert_eq!(harness.coordinator.arm().angle(Joint::Base), 10);
    }

    #[test]
    fn stop_disables_everything_in_manual_mode() {
        let mut harness = Harness::manual();
        harness.submit("MOTOR 75");
        harness.submit("SERVO 2 150");
        harness.submit("STOP");
        harness.coordinator.tick();
        assert_eq!(harness.coordinator.motor().current_speed(), 0);
        assert_eq!(harness.gpio.pwm_value(MOTOR_PWM), Some(0));
        harness.assert_servos_disabled();
        assert_eq!(harness.coordinator.mode(), ControlMode::Manual);
    }

    #[test]
    fn stop_disables_everything_in_automatic_mode() {
        let mut harness = Harness::new(test_config());
        harness.submit("STOP");
        harness.coordinator.tick();
        assert_eq!(harness.coordinator.motor().current_speed(), 0);
        harness.assert_servos_disabled();
        assert_eq!(harness.coordinator.mode(), ControlMode::Automatic);
        assert!(harness
            .event_messages()
            .contains(&"Emergency stop activated".to_owned()));
    }

    #[test]
    fn stop_suppresses_grab_for_the_tick() {
        let mut harness = Harness::new(test_config());
        harness.sensor.extend(&[10.0, 10.0, 10.0]);
        harness.submit("STOP");
        harness.coordinator.tick();
        assert!(harness.moves().is_empty());
        assert_eq!(harness.sensor.remaining(), 3);

        harness.coordinator.tick();
        assert_eq!(harness.moves(), expected_grab());
    }

    #[test]
    fn stop_interrupts_grab_in_flight() {
        let sender_slot: Arc<Mutex<Option<CommandSender>>> = Arc::default();
        let hook_slot = sender_slot.clone();
        let hook: WriteHook = Box::new(move |count| {
            if count == 3 {
                if let Some(sender) = hook_slot.lock().unwrap().as_ref() {
                    sender.submit(Command::EmergencyStop).unwrap();
                }
            }
        });
        let mut harness = Harness::with_hook(test_config(), Some(hook), 8);
        *sender_slot.lock().unwrap() = Some(harness.commands.clone());
        harness.sensor.extend(&[12.0, 12.0, 12.0]);

        harness.coordinator.tick();
        assert_eq!(harness.moves().len(), 3);
        assert_eq!(harness.coordinator.arm().angle(Joint::Shoulder), 63);
        harness.assert_servos_disabled();
        assert_eq!(harness.gpio.pwm_value(MOTOR_PWM), Some(0));
        let events = harness.event_messages();
        assert_eq!(
            events[1..],
            [
                "Grab sequence aborted: motion interrupted by emergency stop".to_owned(),
                "Emergency stop activated".to_owned(),
            ]
        );

        // the queued STOP is still applied, nothing moves again
        harness.coordinator.tick();
        harness.assert_servos_disabled();
        assert_eq!(harness.moves().len(), 3);
    }

    #[test]
    fn status_ping_waits_for_sample_interval() {
        let interval = Duration::from_millis(60);
        let mut config = test_config();
        config.controller.status_interval_ms = 0;
        let sensor = ScriptedRangeSensor::with_interval(interval);
        sensor.extend(&[40.0, 41.0, 42.0, 43.0]);
        let mut harness = Harness::with_sensor(config, sensor);

        harness.coordinator.tick();
        let pings = harness.sensor.ping_times();
        assert_eq!(pings.len(), 4);
        for pair in pings.windows(2) {
            assert!(pair[1].duration_since(pair[0]) >= interval);
        }
    }

    #[test]
    fn silent_sensor_does_not_stall_the_loop() {
        let config = test_config();
        let gpio = SimulatedGpio::new();
        gpio.link_echo(config.pins.ultrasonic_trigger, config.pins.ultrasonic_echo);
        gpio.set_default_echo(EchoResponse::Silent);
        let arm = ServoArmDriver::initialize(&mut gpio.clone(), &config).unwrap();
        let sensor = UltrasonicSensor::initialize(&mut gpio.clone(), &config).unwrap();
        let motor = MotorDriver::initialize(&mut gpio.clone(), &config).unwrap();
        let (_commands, receiver) = command_queue(4);
        let (outbox_sender, mut outbox) = mpsc::channel(16);
        let mut coordinator = ArmCoordinator::new(
            Box::new(arm),
            Box::new(sensor),
            motor,
            receiver,
            outbox_sender,
            &config,
        );
        gpio.clear_writes();

        for _ in 0..2 {
            let started = Instant::now();
            coordinator.tick();
            let elapsed = started.elapsed();
            // three samples, each bounded by the 30 ms edge timeout
            assert!(elapsed >= Duration::from_millis(90));
            assert!(elapsed < Duration::from_millis(500));
        }
        assert_eq!(coordinator.state().last_distance, None);
        assert_eq!(coordinator.arm().angles(), [90; 5]);
        let trigger = config.pins.ultrasonic_trigger;
        assert!(gpio
            .writes()
            .iter()
            .all(|write| matches!(write, PinWrite::Level { pin, .. } if *pin == trigger)));
        assert!(outbox.try_recv().is_err());
    }

    #[test]
    fn overflowed_stop_still_stops() {
        let mut config = test_config();
        config.controller.initial_mode = ControlMode::Manual;
        let mut harness = Harness::with_hook(config, None, 1);
        harness.submit("MOTOR 30");
        assert_eq!(
            harness.commands.submit(Command::EmergencyStop),
            Err(crate::command_queue::QueueError::Full)
        );
        harness.coordinator.tick();
        assert_eq!(harness.coordinator.motor().current_speed(), 0);
        harness.assert_servos_disabled();
    }

    #[test]
    fn home_works_in_any_mode() {
        let mut harness = Harness::manual();
        harness.submit("SERVO 3 10");
        harness.submit("MODE AUTO");
        harness.submit("HOME");
        harness.coordinator.tick();
        assert_eq!(harness.coordinator.arm().angles(), [90; 5]);
        assert!(harness
            .event_messages()
            .contains(&"Moved to home position".to_owned()));
    }

    fn statuses(harness: &mut Harness) -> Vec<StatusSnapshot> {
        harness
            .drain()
            .into_iter()
            .filter_map(|message| match message {
                Outbound::Status(status) => Some(status),
                Outbound::Event(_) => None,
            })
            .collect()
    }

    #[test]
    fn status_waits_for_its_interval() {
        let mut config = test_config();
        config.controller.status_interval_ms = 60_000;
        let mut harness = Harness::new(config);
        harness.coordinator.tick();
        harness.coordinator.tick();
        assert!(statuses(&mut harness).is_empty());
    }

    #[test]
    fn status_is_published_when_due() {
        let mut config = test_config();
        config.controller.status_interval_ms = 0;
        let mut harness = Harness::new(config);
        harness.sensor.extend(&[42.0, 42.0, 42.0, 41.0]);
        harness.coordinator.tick();
        harness.coordinator.tick();
        assert_eq!(
            statuses(&mut harness),
            vec![
                StatusSnapshot {
                    mode: ControlMode::Automatic,
                    distance_cm: Some(41.0),
                    servo_angles: [90; 5],
                    motor_speed: 0,
                },
                StatusSnapshot {
                    mode: ControlMode::Automatic,
                    distance_cm: None,
                    servo_angles: [90; 5],
                    motor_speed: 0,
                },
            ]
        );
    }

    #[test]
    fn status_takes_fresh_reading() {
        let mut harness = Harness::manual();
        harness.sensor.push(Ok(33.0));
        let status = harness.coordinator.status_snapshot();
        assert_eq!(status.mode, ControlMode::Manual);
        assert_eq!(status.distance_cm, Some(33.0));
        let status = harness.coordinator.status_snapshot();
        assert_eq!(status.distance_cm, None);
    }

    #[test]
    fn status_serializes_for_the_bus() {
        let status = StatusSnapshot {
            mode: ControlMode::Manual,
            distance_cm: None,
            servo_angles: [90, 45, 120, 90, 0],
            motor_speed: -20,
        };
        assert_eq!(
            serde_json::to_string(&status).unwrap(),
            r#"{"mode":"MANUAL","distance_cm":null,"servo_angles":[90,45,120,90,0],"motor_speed":-20}"#
        );
    }

    #[test]
    fn run_stops_hardware_on_shutdown() {
        let mut harness = Harness::manual();
        harness.submit("MOTOR 60");
        harness.coordinator.tick();
        let Harness {
            coordinator, gpio, ..
        } = harness;

        let keep_running = Arc::new(AtomicBool::new(true));
        let handle = thread::spawn({
            let keep_running = keep_running.clone();
            move || coordinator.run(keep_running)
        });
        thread::sleep(Duration::from_millis(20));
        keep_running.store(false, Ordering::Release);
        handle.join().unwrap();

        assert_eq!(gpio.pwm_value(MOTOR_PWM), Some(0));
        for pin in SERVO_PINS {
            assert_eq!(gpio.pwm_value(pin), Some(0));
        }
    }

    #[test]
    fn events_carry_severity() {
        assert_eq!(ControllerEvent::GrabCompleted.level(), EventLevel::Info);
        assert_eq!(ControllerEvent::EmergencyStop.level(), EventLevel::Error);
        let record = ControllerEvent::ModeChanged(ControlMode::Manual).to_record();
        assert_eq!(
            serde_json::to_string(&record).unwrap(),
            r#"{"level":"info","message":"Switched to MANUAL mode"}"#
        );
    }
}
