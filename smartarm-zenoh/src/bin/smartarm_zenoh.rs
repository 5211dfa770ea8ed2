use anyhow::{anyhow, Result};
use clap::Parser;
use smartarm_controller::{
    arm_config::ArmConfig,
    arm_controller::{ArmCoordinator, Outbound},
    arm_driver::ServoArmDriver,
    command_queue::{command_queue, CommandReceiver},
    distance_sensor::UltrasonicSensor,
    hardware::{EchoResponse, Gpio, SimulatedGpio},
    motor_driver::MotorDriver,
};
use smartarm_zenoh::{
    bus::{self, BusTopics, DEFAULT_TOPIC_PREFIX},
    error::BridgeError,
    logging,
};
use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
};
use tokio::sync::mpsc;
use tracing::info;

#[derive(Parser)]
#[command(author, version)]
struct Args {
    /// Arm configuration as JSON or YAML, included defaults if omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Run against simulated GPIO
    #[arg(long)]
    simulate: bool,

    /// Distance in cm the simulated sensor reports, silent if omitted
    #[arg(long, requires = "simulate")]
    simulated_distance: Option<f32>,

    /// Zenoh configuration file
    #[arg(long)]
    zenoh_config: Option<PathBuf>,

    /// Zenoh endpoints to connect to
    #[arg(long)]
    connect: Vec<String>,

    #[arg(long, default_value = DEFAULT_TOPIC_PREFIX)]
    topic_prefix: String,

    /// Print the effective configuration as YAML and exit
    #[arg(long)]
    print_config: bool,

    #[arg(long)]
    json_logs: bool,

    /// Sets the level of verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = match &args.config {
        Some(path) => ArmConfig::load(path)?,
        None => ArmConfig::included()?,
    };
    if args.print_config {
        print!("{}", config.serialize_to_yaml()?);
        return Ok(());
    }
    logging::setup_tracing(args.verbose, args.json_logs);

    let (commands, command_receiver) = command_queue(config.controller.command_queue_capacity);
    let (outbox_sender, outbox) = mpsc::channel(config.controller.outbox_capacity);
    let coordinator = if args.simulate {
        let gpio = SimulatedGpio::new();
        gpio.link_echo(config.pins.ultrasonic_trigger, config.pins.ultrasonic_echo);
        gpio.set_default_echo(match args.simulated_distance {
            Some(distance) => EchoResponse::from_distance(distance),
            None => EchoResponse::Silent,
        });
        info!("Running on simulated hardware");
        assemble(&mut gpio.clone(), &config, command_receiver, outbox_sender)?
    } else {
        assemble_hardware(&config, command_receiver, outbox_sender)?
    };

    let session = bus::open_session(args.zenoh_config.as_deref(), &args.connect).await?;
    let topics = BusTopics::new(&args.topic_prefix);
    let listener = tokio::spawn(bus::run_command_listener(
        session.clone(),
        topics.control.clone(),
        commands.clone(),
    ));
    let publisher = tokio::spawn(bus::run_outbox_publisher(
        session.clone(),
        topics,
        outbox,
    ));

    let keep_running = Arc::new(AtomicBool::new(true));
    let control_loop = thread::Builder::new()
        .name("control-loop".to_owned())
        .spawn({
            let keep_running = keep_running.clone();
            move || coordinator.run(keep_running)
        })?;

    wait_for_shutdown().await?;
    info!("Shutting down");
    keep_running.store(false, Ordering::Release);
    commands.interrupt();
    tokio::task::spawn_blocking(move || control_loop.join())
        .await?
        .map_err(|_| anyhow!("Control loop panicked"))?;

    listener.abort();
    publisher.await?;
    session.close().await.map_err(BridgeError::from)?;
    Ok(())
}

fn assemble(
    gpio: &mut dyn Gpio,
    config: &ArmConfig,
    commands: CommandReceiver,
    outbox: mpsc::Sender<Outbound>,
) -> Result<ArmCoordinator> {
    let arm = ServoArmDriver::initialize(gpio, config)?;
    let sensor = UltrasonicSensor::initialize(gpio, config)?;
    let motor = MotorDriver::initialize(gpio, config)?;
    Ok(ArmCoordinator::new(
        Box::new(arm),
        Box::new(sensor),
        motor,
        commands,
        outbox,
        config,
    ))
}

#[cfg(feature = "raspberry-pi")]
fn assemble_hardware(
    config: &ArmConfig,
    commands: CommandReceiver,
    outbox: mpsc::Sender<Outbound>,
) -> Result<ArmCoordinator> {
    let mut gpio = smartarm_controller::hardware::RaspberryPiGpio::new()?;
    assemble(&mut gpio, config, commands, outbox)
}

#[cfg(not(feature = "raspberry-pi"))]
fn assemble_hardware(
    _config: &ArmConfig,
    _commands: CommandReceiver,
    _outbox: mpsc::Sender<Outbound>,
) -> Result<ArmCoordinator> {
    Err(anyhow!(
        "Built without the raspberry-pi feature, use --simulate"
    ))
}

#[cfg(unix)]
async fn wait_for_shutdown() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result?,
        _ = terminate.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
