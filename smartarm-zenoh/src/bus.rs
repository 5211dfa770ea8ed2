//! Zenoh side of the command and status channels.

use crate::error::BridgeError;
use smartarm_controller::{
    arm_controller::Outbound, command::Command, command_queue::CommandSender,
};
use std::{path::Path, time::Duration};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use zenoh::{Config, Session};

pub const DEFAULT_TOPIC_PREFIX: &str = "smartarm";

const RECONNECT_INITIAL_DELAY: Duration = Duration::from_millis(500);
const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusTopics {
    pub control: String,
    pub status: String,
    pub events: String,
}

impl BusTopics {
    pub fn new(prefix: &str) -> Self {
        let prefix = prefix.trim_end_matches('/');
        BusTopics {
            control: format!("{}/control", prefix),
            status: format!("{}/status", prefix),
            events: format!("{}/data", prefix),
        }
    }
}

impl Default for BusTopics {
    fn default() -> Self {
        BusTopics::new(DEFAULT_TOPIC_PREFIX)
    }
}

/// Open a session from an optional zenoh config file plus extra endpoints
pub async fn open_session(
    config_path: Option<&Path>,
    connect: &[String],
) -> Result<Session, BridgeError> {
    let mut config = match config_path {
        Some(path) => {
            Config::from_file(path).map_err(|error| BridgeError::Config(error.to_string()))?
        }
        None => Config::default(),
    };
    if !connect.is_empty() {
        let endpoints = serde_json::to_string(connect)?;
        config
            .insert_json5("connect/endpoints", &endpoints)
            .map_err(|error| BridgeError::Config(error.to_string()))?;
    }
    let session = zenoh::open(config).await?;
    info!("Zenoh session {} open", session.zid());
    Ok(session)
}

pub fn decode_command(payload: &[u8]) -> Result<Command, BridgeError> {
    let text = std::str::from_utf8(payload)?;
    Ok(text.parse()?)
}

/// Decode a payload and hand it to the control loop
pub fn forward_command(payload: &[u8], commands: &CommandSender) -> Result<Command, BridgeError> {
    let command = decode_command(payload)?;
    commands.submit(command.clone())?;
    Ok(command)
}

/// Topic and JSON payload for an outbound message
pub fn encode_outbound<'a>(
    topics: &'a BusTopics,
    message: &Outbound,
) -> Result<(&'a str, String), BridgeError> {
    match message {
        Outbound::Status(status) => Ok((&topics.status, serde_json::to_string(status)?)),
        Outbound::Event(event) => Ok((&topics.events, serde_json::to_string(event)?)),
    }
}

/// Exponential reconnect delay
#[derive(Debug, Clone)]
pub struct Backoff {
    current: Duration,
    initial: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Backoff {
            current: initial,
            initial,
            max,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::new(RECONNECT_INITIAL_DELAY, RECONNECT_MAX_DELAY)
    }
}

/// Forwards control messages until the control loop goes away
///
/// A lost subscriber is declared again after a backoff delay.
pub async fn run_command_listener(session: Session, topic: String, commands: CommandSender) {
    let mut backoff = Backoff::default();
    while !commands.is_closed() {
        match session.declare_subscriber(&topic).await {
            Ok(subscriber) => {
                info!("Listening for commands on {}", topic);
                backoff.reset();
                while let Ok(sample) = subscriber.recv_async().await {
                    match forward_command(&sample.payload().to_bytes(), &commands) {
                        Ok(command) => debug!("Queued {}", command),
                        Err(error) => warn!("Dropped control message: {}", error),
                    }
                }
                warn!("Command subscriber on {} disconnected", topic);
            }
            Err(error) => warn!("Failed to subscribe to {}: {}", topic, error),
        }
        let delay = backoff.next_delay();
        debug!("Resubscribing in {:?}", delay);
        tokio::time::sleep(delay).await;
    }
    debug!("Command queue closed, listener exiting");
}

/// Publishes status and events until every outbox sender is dropped
pub async fn run_outbox_publisher(
    session: Session,
    topics: BusTopics,
    mut outbox: mpsc::Receiver<Outbound>,
) {
    while let Some(message) = outbox.recv().await {
        match encode_outbound(&topics, &message) {
            Ok((topic, payload)) => {
                if let Err(error) = session.put(topic, payload).await {
                    warn!("Failed to publish on {}: {}", topic, error);
                }
            }
            Err(error) => warn!("Failed to encode outbound message: {}", error),
        }
    }
    debug!("Outbox closed, publisher exiting");
}
