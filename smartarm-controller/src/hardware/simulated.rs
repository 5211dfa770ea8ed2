use super::{Gpio, HardwareError, InputPin, OutputPin, PwmPin, Result};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

const WRITE_LOG_CAPACITY: usize = 4096;
const SPEED_OF_SOUND_CM_PER_MICRO: f32 = 0.0343;

/// What the simulated echo pin does after a trigger pulse
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EchoResponse {
    Pulse { delay: Duration, width: Duration },
    /// Echo never rises
    Silent,
}

impl EchoResponse {
    /// Echo pulse of an object `distance_cm` away
    pub fn from_distance(distance_cm: f32) -> Self {
        let round_trip_micros = (distance_cm * 2.0 / SPEED_OF_SOUND_CM_PER_MICRO).max(0.0);
        EchoResponse::Pulse {
            delay: Duration::from_micros(100),
            width: Duration::from_micros(round_trip_micros.round() as u64),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinWrite {
    Pwm { pin: u8, value: u32 },
    Level { pin: u8, high: bool },
}

struct SimulatedState {
    available: bool,
    claimed: HashSet<u8>,
    failing: HashSet<u8>,
    pwm: HashMap<u8, u32>,
    levels: HashMap<u8, bool>,
    writes: VecDeque<PinWrite>,
    echo_links: HashMap<u8, u8>,
    echo_script: VecDeque<EchoResponse>,
    default_echo: EchoResponse,
    echo_windows: HashMap<u8, (Instant, Instant)>,
}

impl SimulatedState {
    fn new(available: bool) -> Self {
        SimulatedState {
            available,
            claimed: HashSet::new(),
            failing: HashSet::new(),
            pwm: HashMap::new(),
            levels: HashMap::new(),
            writes: VecDeque::new(),
            echo_links: HashMap::new(),
            echo_script: VecDeque::new(),
            default_echo: EchoResponse::Silent,
            echo_windows: HashMap::new(),
        }
    }

    fn claim(&mut self, pin: u8) -> Result<()> {
        if !self.available {
            return Err(HardwareError::Unavailable);
        }
        if !self.claimed.insert(pin) {
            return Err(HardwareError::PinUnavailable(pin));
        }
        Ok(())
    }

    fn record(&mut self, write: PinWrite) {
        if self.writes.len() == WRITE_LOG_CAPACITY {
            self.writes.pop_front();
        }
        self.writes.push_back(write);
    }

    fn check_failing(&self, pin: u8) -> Result<()> {
        if self.failing.contains(&pin) {
            Err(HardwareError::PinUnavailable(pin))
        } else {
            Ok(())
        }
    }

    fn set_level(&mut self, pin: u8, high: bool) -> Result<()> {
        self.check_failing(pin)?;
        let was_high = self.levels.insert(pin, high).unwrap_or(false);
        self.record(PinWrite::Level { pin, high });
        if was_high && !high {
            if let Some(&echo_pin) = self.echo_links.get(&pin) {
                self.arm_echo(echo_pin);
            }
        }
        Ok(())
    }

    fn arm_echo(&mut self, echo_pin: u8) {
        let response = self
            .echo_script
            .pop_front()
            .unwrap_or(self.default_echo);
        match response {
            EchoResponse::Pulse { delay, width } => {
                let rise = Instant::now() + delay;
                self.echo_windows.insert(echo_pin, (rise, rise + width));
            }
            EchoResponse::Silent => {
                self.echo_windows.remove(&echo_pin);
            }
        }
    }
}

/// In-memory GPIO
///
/// Clones share the same simulated board, so a test can keep one handle
/// to inspect what the drivers wrote through the other.
#[derive(Clone)]
pub struct SimulatedGpio {
    state: Arc<Mutex<SimulatedState>>,
}

impl Default for SimulatedGpio {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedGpio {
    pub fn new() -> Self {
        SimulatedGpio {
            state: Arc::new(Mutex::new(SimulatedState::new(true))),
        }
    }

    /// Board on which every claim fails
    pub fn unavailable() -> Self {
        SimulatedGpio {
            state: Arc::new(Mutex::new(SimulatedState::new(false))),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimulatedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A falling edge on `trigger` starts the next echo on `echo`
    pub fn link_echo(&self, trigger: u8, echo: u8) {
        self.lock().echo_links.insert(trigger, echo);
    }

    pub fn push_echo(&self, response: EchoResponse) {
        self.lock().echo_script.push_back(response);
    }

    /// Response used once the scripted echoes run out
    pub fn set_default_echo(&self, response: EchoResponse) {
        self.lock().default_echo = response;
    }

    /// Make every following write to `pin` fail
    pub fn fail_writes(&self, pin: u8) {
        self.lock().failing.insert(pin);
    }

    pub fn pwm_value(&self, pin: u8) -> Option<u32> {
        self.lock().pwm.get(&pin).copied()
    }

    pub fn level(&self, pin: u8) -> Option<bool> {
        self.lock().levels.get(&pin).copied()
    }

    pub fn writes(&self) -> Vec<PinWrite> {
        self.lock().writes.iter().copied().collect()
    }

    pub fn clear_writes(&self) {
        self.lock().writes.clear();
    }
}

impl Gpio for SimulatedGpio {
    fn pwm(&mut self, pin: u8, range: u32) -> Result<Box<dyn PwmPin>> {
        if range == 0 {
            return Err(HardwareError::InvalidPwmRange(range));
        }
        let mut state = self.lock();
        state.claim(pin)?;
        state.pwm.insert(pin, 0);
        Ok(Box::new(SimulatedPwm {
            pin,
            range,
            board: self.clone(),
        }))
    }

    fn output(&mut self, pin: u8) -> Result<Box<dyn OutputPin>> {
        let mut state = self.lock();
        state.claim(pin)?;
        state.levels.insert(pin, false);
        Ok(Box::new(SimulatedOutput {
            pin,
            board: self.clone(),
        }))
    }

    fn input(&mut self, pin: u8) -> Result<Box<dyn InputPin>> {
        self.lock().claim(pin)?;
        Ok(Box::new(SimulatedInput {
            pin,
            board: self.clone(),
        }))
    }
}

struct SimulatedPwm {
    pin: u8,
    range: u32,
    board: SimulatedGpio,
}

impl PwmPin for SimulatedPwm {
    fn write(&mut self, value: u32) -> Result<()> {
        let value = value.min(self.range);
        let mut state = self.board.lock();
        state.check_failing(self.pin)?;
        state.pwm.insert(self.pin, value);
        state.record(PinWrite::Pwm {
            pin: self.pin,
            value,
        });
        Ok(())
    }
}

struct SimulatedOutput {
    pin: u8,
    board: SimulatedGpio,
}

impl OutputPin for SimulatedOutput {
    fn set_high(&mut self) -> Result<()> {
        self.board.lock().set_level(self.pin, true)
    }

    fn set_low(&mut self) -> Result<()> {
        self.board.lock().set_level(self.pin, false)
    }
}

struct SimulatedInput {
    pin: u8,
    board: SimulatedGpio,
}

impl InputPin for SimulatedInput {
    fn is_high(&self) -> bool {
        let state = self.board.lock();
        match state.echo_windows.get(&self.pin) {
            Some((rise, fall)) => {
                let now = Instant::now();
                now >= *rise && now < *fall
            }
            None => state.levels.get(&self.pin).copied().unwrap_or(false),
        }
    }
}
