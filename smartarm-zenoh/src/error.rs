use smartarm_controller::{command::ParseError, command_queue::QueueError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Zenoh error {0:?}")]
    ZenohError(#[from] zenoh::Error),
    #[error("invalid zenoh configuration: {0}")]
    Config(String),
    #[error("payload is not valid utf-8")]
    InvalidUtf8(#[from] std::str::Utf8Error),
    #[error("malformed command: {0}")]
    Parse(#[from] ParseError),
    #[error("failed to serialize message")]
    Serialization(#[from] serde_json::Error),
    #[error("command not queued: {0}")]
    Queue(#[from] QueueError),
}
