use anyhow::Result;
use clap::{Parser, Subcommand};
use smartarm_controller::{
    arm_controller::{EventRecord, StatusSnapshot},
    command::{Command, ControlMode},
};
use smartarm_zenoh::{
    bus::{self, BusTopics, DEFAULT_TOPIC_PREFIX},
    error::BridgeError,
    logging,
};
use std::path::PathBuf;
use tracing::warn;

#[derive(Parser)]
#[command(author, version)]
struct Args {
    /// Zenoh configuration file
    #[arg(long)]
    zenoh_config: Option<PathBuf>,

    /// Zenoh endpoints to connect to
    #[arg(long)]
    connect: Vec<String>,

    #[arg(long, default_value = DEFAULT_TOPIC_PREFIX)]
    topic_prefix: String,

    /// Sets the level of verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    action: Action,
}

#[derive(Subcommand)]
enum Action {
    /// Switch between AUTO and MANUAL
    Mode { mode: ControlMode },
    /// Move a single joint, manual mode only
    Servo { joint: i32, angle: i32 },
    /// Drive motor speed from -100 to 100, manual mode only
    Motor {
        #[arg(allow_negative_numbers = true)]
        speed: i32,
    },
    /// Emergency stop
    Stop,
    /// Move every joint to its home angle
    Home,
    /// Send command text as is
    #[command(name = "send")]
    Raw {
        #[arg(required = true, num_args = 1.., allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// Print status and events
    Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    logging::setup_tracing(args.verbose, false);

    let command = match &args.action {
        Action::Mode { mode } => Command::SetMode { mode: *mode },
        Action::Servo { joint, angle } => Command::SetServo {
            joint: *joint,
            angle: *angle,
        },
        Action::Motor { speed } => Command::SetMotor { speed: *speed },
        Action::Stop => Command::EmergencyStop,
        Action::Home => Command::Home,
        Action::Raw { command } => command.join(" ").parse()?,
        Action::Watch => return watch(&args).await,
    };

    let topics = BusTopics::new(&args.topic_prefix);
    let session = bus::open_session(args.zenoh_config.as_deref(), &args.connect).await?;
    session
        .put(&topics.control, command.to_string())
        .await
        .map_err(BridgeError::from)?;
    println!("Sent {} to {}", command, topics.control);
    session.close().await.map_err(BridgeError::from)?;
    Ok(())
}

async fn watch(args: &Args) -> Result<()> {
    let topics = BusTopics::new(&args.topic_prefix);
    let session = bus::open_session(args.zenoh_config.as_deref(), &args.connect).await?;
    let status = session
        .declare_subscriber(&topics.status)
        .await
        .map_err(BridgeError::from)?;
    let events = session
        .declare_subscriber(&topics.events)
        .await
        .map_err(BridgeError::from)?;

    loop {
        tokio::select! {
            Ok(sample) = status.recv_async() => {
                match serde_json::from_slice::<StatusSnapshot>(&sample.payload().to_bytes()) {
                    Ok(status) => println!("{}", describe_status(&status)),
                    Err(error) => warn!("Malformed status: {}", error),
                }
            }
            Ok(sample) = events.recv_async() => {
                match serde_json::from_slice::<EventRecord>(&sample.payload().to_bytes()) {
                    Ok(event) => println!("[{:?}] {}", event.level, event.message),
                    Err(error) => warn!("Malformed event: {}", error),
                }
            }
            _ = tokio::signal::ctrl_c() => break,
            else => break,
        }
    }
    session.close().await.map_err(BridgeError::from)?;
    Ok(())
}

fn describe_status(status: &StatusSnapshot) -> String {
    let distance = match status.distance_cm {
        Some(distance) => format!("{:.1}cm", distance),
        None => "--".to_owned(),
    };
    format!(
        "{:<6} distance {:>7} servos {:?} motor {}",
        status.mode.to_string(),
        distance,
        status.servo_angles,
        status.motor_speed
    )
}
