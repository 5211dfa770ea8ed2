use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlMode {
    #[serde(rename = "AUTO", alias = "auto", alias = "automatic")]
    Automatic,
    #[serde(rename = "MANUAL", alias = "manual")]
    Manual,
}

impl fmt::Display for ControlMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlMode::Automatic => f.write_str("AUTO"),
            ControlMode::Manual => f.write_str("MANUAL"),
        }
    }
}

impl FromStr for ControlMode {
    type Err = ParseError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        match text.to_ascii_uppercase().as_str() {
            "AUTO" | "AUTOMATIC" => Ok(ControlMode::Automatic),
            "MANUAL" => Ok(ControlMode::Manual),
            _ => Err(ParseError::UnknownMode(text.to_owned())),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty command")]
    Empty,
    #[error("unknown command {0:?}")]
    UnknownCommand(String),
    #[error("missing argument {0}")]
    MissingArgument(&'static str),
    #[error("argument {name} is not a number: {value:?}")]
    InvalidNumber { name: &'static str, value: String },
    #[error("unknown mode {0:?}")]
    UnknownMode(String),
    #[error("unexpected argument {0:?}")]
    UnexpectedArgument(String),
    #[error("malformed json command: {0}")]
    Json(String),
}

/// One message on the control channel
///
/// Text form is whitespace separated (`SERVO 4 180`), JSON form is tagged
/// (`{"command":"servo","joint":4,"angle":180}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    #[serde(rename = "mode")]
    SetMode { mode: ControlMode },
    #[serde(rename = "servo")]
    SetServo { joint: i32, angle: i32 },
    #[serde(rename = "motor")]
    SetMotor { speed: i32 },
    #[serde(rename = "stop")]
    EmergencyStop,
    Home,
}

impl Command {
    /// Direct hardware writes only accepted in manual mode
    pub fn requires_manual(&self) -> bool {
        matches!(self, Command::SetServo { .. } | Command::SetMotor { .. })
    }
}

fn next_token<'a>(
    tokens: &mut impl Iterator<Item = &'a str>,
    name: &'static str,
) -> Result<&'a str, ParseError> {
    tokens.next().ok_or(ParseError::MissingArgument(name))
}

fn next_number<'a>(
    tokens: &mut impl Iterator<Item = &'a str>,
    name: &'static str,
) -> Result<i32, ParseError> {
    let token = next_token(tokens, name)?;
    token.parse().map_err(|_| ParseError::InvalidNumber {
        name,
        value: token.to_owned(),
    })
}

impl FromStr for Command {
    type Err = ParseError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let text = text.trim();
        if text.starts_with('{') {
            return serde_json::from_str(text).map_err(|error| ParseError::Json(error.to_string()));
        }

        let mut tokens = text.split_whitespace();
        let keyword = tokens.next().ok_or(ParseError::Empty)?;
        let command = match keyword.to_ascii_uppercase().as_str() {
            "MODE" => Command::SetMode {
                mode: next_token(&mut tokens, "mode")?.parse()?,
            },
            "SERVO" => Command::SetServo {
                joint: next_number(&mut tokens, "joint")?,
                angle: next_number(&mut tokens, "angle")?,
            },
            "MOTOR" => Command::SetMotor {
                speed: next_number(&mut tokens, "speed")?,
            },
            "STOP" => Command::EmergencyStop,
            "HOME" => Command::Home,
            _ => return Err(ParseError::UnknownCommand(keyword.to_owned())),
        };
        if let Some(extra) = tokens.next() {
            return Err(ParseError::UnexpectedArgument(extra.to_owned()));
        }
        Ok(command)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::SetMode { mode } => write!(f, "MODE {}", mode),
            Command::SetServo { joint, angle } => write!(f, "SERVO {} {}", joint, angle),
            Command::SetMotor { speed } => write!(f, "MOTOR {}", speed),
            Command::EmergencyStop => f.write_str("STOP"),
            Command::Home => f.write_str("HOME"),
        }
    }
}
