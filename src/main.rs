//! deskphone CLI

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use deskphone::audio::{
    to_percent, write_tone, AudioDeviceManager, AudioHardware, SampleSpec, SoundKind,
};
use deskphone::call::NoAdapter;
use deskphone::config::{Args, Command, PhoneConfig};
use deskphone::device::DeviceType;
use deskphone::message::{AudioTest, CallAction, CallActionKind, Message, Payload};
use deskphone::sim::{EchoSignaling, SimHardware};
use deskphone::PhoneContext;

/// Peer number of the simulated echo peer
const ECHO_PEER: u32 = 1;

fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => PhoneConfig::load(path)?,
        None => PhoneConfig::load_default()?,
    };

    init_logging(&args, &config)?;

    match args.command.unwrap_or_default() {
        Command::Devices => cmd_devices(&config),
        Command::Run { call, seconds } => cmd_run(&config, call, seconds),
        Command::Test {
            playback,
            record,
            seconds,
        } => cmd_test(&config, playback, record, seconds),
        Command::SampleConfig => {
            print!("{}", PhoneConfig::sample_config());
            Ok(())
        }
    }
}

fn init_logging(args: &Args, config: &PhoneConfig) -> Result<()> {
    let level = args
        .log_level()
        .map(|l| l.to_string())
        .unwrap_or_else(|| config.log_level.clone());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    let log_file = args
        .log
        .clone()
        .or_else(|| (!config.log_file.is_empty()).then(|| config.log_file.clone()));

    if let Some(log_file) = log_file {
        let file = std::fs::File::create(&log_file)
            .with_context(|| format!("creating log file {}", log_file))?;
        subscriber.with_writer(file).init();
    } else {
        subscriber.init();
    }

    Ok(())
}

/// Generate any missing notification sound so the simulated phone is audible
fn ensure_sounds(config: &PhoneConfig) -> Result<()> {
    let dir = &config.audio.sounds_dir;
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    let spec = SampleSpec {
        rate: config.audio.sample_rate,
        channels: 1,
    };
    let tones = [
        (SoundKind::Ring, 480.0, 1000),
        (SoundKind::Outgoing, 425.0, 1000),
        (SoundKind::Busy, 425.0, 500),
        (SoundKind::Fail, 950.0, 330),
        (SoundKind::Error, 1400.0, 330),
        (SoundKind::Test, 440.0, 2000),
    ];
    for (sound, frequency, duration_ms) in tones {
        let path = dir.join(sound.file_name());
        if !path.exists() {
            write_tone(&path, spec, frequency, duration_ms)
                .with_context(|| format!("writing {}", path.display()))?;
            info!("Generated {}", path.display());
        }
    }
    Ok(())
}

fn start(config: &PhoneConfig) -> Result<(PhoneContext, Receiver<Message>)> {
    ensure_sounds(config)?;
    let hardware: Arc<dyn AudioHardware> = Arc::new(SimHardware::new());
    let (ctx, events) = PhoneContext::start(
        config,
        hardware,
        Box::new(EchoSignaling::new(ECHO_PEER)),
        Box::new(NoAdapter),
    )?;
    Ok((ctx, events))
}

/// Ctrl+C flag
fn interrupt_flag() -> Arc<AtomicBool> {
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!("\nReceived Ctrl+C, stopping...");
        r.store(false, Ordering::SeqCst);
    }) {
        warn!("Ctrl+C handler unavailable: {}", e);
    }
    running
}

/// Print events until interrupted or `seconds` elapse
fn pump(events: &Receiver<Message>, running: &AtomicBool, seconds: Option<u64>) {
    let deadline = seconds.map(|s| Instant::now() + Duration::from_secs(s));
    while running.load(Ordering::SeqCst) && deadline.map_or(true, |d| Instant::now() < d) {
        match events.recv_timeout(Duration::from_millis(100)) {
            Ok(message) => print_message(&message),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

fn print_message(message: &Message) {
    match &message.payload {
        Payload::CallState(state) => println!("call: {}", state),
        Payload::AudioRecordLevel(level) => {
            println!("level: {:>5} over {} ms", level.max, level.time_ms)
        }
        Payload::Error(e) => println!("error {}: {}", e.code, e.description),
        Payload::Ok => {}
        other => println!("{:?}", other),
    }
}

/// List audio devices
fn cmd_devices(config: &PhoneConfig) -> Result<()> {
    let (tx, _events) = crossbeam_channel::unbounded();
    let manager = Arc::new(AudioDeviceManager::new(
        Arc::new(SimHardware::new()),
        config.manager_config(),
        Arc::new(config.device_store()),
        config.device_policy(),
        config.noise_filter(),
        tx,
    ));
    manager.init()?;

    for kind in [DeviceType::Sink, DeviceType::Source] {
        let devices = manager.devices(kind);
        println!("{}s:", kind);
        if devices.is_empty() {
            println!("  (none)");
        }
        for device in devices {
            let volumes = device.channel_volumes();
            println!(
                "  {}  [{} ch, {}%]",
                device,
                volumes.channels(),
                to_percent(volumes.average(), device.base_volume)
            );
        }
        println!();
    }
    Ok(())
}

/// Run the phone, optionally calling the echo peer
fn cmd_run(config: &PhoneConfig, call: Option<u32>, seconds: Option<u64>) -> Result<()> {
    println!("deskphone {}\n", deskphone::VERSION);
    let running = interrupt_flag();
    let (mut ctx, events) = start(config)?;

    if let Some(peer) = call {
        ctx.dispatch(Message::command(
            1,
            Payload::CallAction(CallAction {
                action: CallActionKind::Call,
                peer,
            }),
        ))?;
    }

    println!("Phone running. Press Ctrl+C to stop.\n");
    pump(&events, &running, seconds);

    ctx.shutdown();
    println!("Stopped.");
    Ok(())
}

/// Drive the audio test path
fn cmd_test(config: &PhoneConfig, playback: bool, record: bool, seconds: u64) -> Result<()> {
    if !playback && !record {
        error!("Nothing to test: pass --playback and/or --record");
        return Ok(());
    }
    let running = interrupt_flag();
    let (mut ctx, events) = start(config)?;

    let test = |id, begin| {
        Message::command(
            id,
            Payload::AudioTest(AudioTest {
                begin,
                playback,
                record,
            }),
        )
    };

    ctx.dispatch(test(1, true))?;
    pump(&events, &running, Some(seconds));
    ctx.dispatch(test(2, false))?;
    // final level report
    pump(&events, &running, Some(1));

    ctx.shutdown();
    Ok(())
}
