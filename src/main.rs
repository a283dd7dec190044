use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use voice_satellite::config::sanitize_node_name;
use voice_satellite::voice::{
    AudioOutput, CpalMicrophone, CpalOutput, Microphone, OnFinished, SAMPLE_RATE, audio_devices,
    samples_to_wav,
};
use voice_satellite::{Config, Satellite, SatelliteIo};

/// Satellite - voice endpoint for a home-automation hub
#[derive(Parser)]
#[command(name = "satellite", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(clap::Args, Default)]
struct RunArgs {
    /// Native API port
    #[arg(long, env = "SATELLITE_PORT")]
    port: Option<u16>,

    /// Device name shown by the hub
    #[arg(long, env = "SATELLITE_NAME")]
    name: Option<String>,

    /// Config file (defaults to the platform config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Do not advertise over mDNS
    #[arg(long)]
    no_mdns: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Run the satellite (default)
    Run(RunArgs),
    /// List audio devices
    Devices,
    /// Play a sound file or URL
    TestSpeaker {
        /// Local path or http(s) URL
        url: String,
    },
    /// Record from the microphone
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        seconds: u64,
        /// Write the recording to this WAV file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info,voice_satellite=info",
        1 => "info,voice_satellite=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command.unwrap_or_else(|| Command::Run(RunArgs::default())) {
        Command::Run(args) => run_satellite(args).await,
        Command::Devices => list_devices(),
        Command::TestSpeaker { url } => test_speaker(&url).await,
        Command::TestMic { seconds, output } => test_mic(seconds, output).await,
    }
}

#[allow(clippy::future_not_send)]
async fn run_satellite(args: RunArgs) -> anyhow::Result<()> {
    let mut config = Config::load_with_options(args.config.as_deref())?;
    if let Some(port) = args.port {
        config.device.port = port;
    }
    if let Some(name) = args.name {
        config.device.name = sanitize_node_name(&name);
        config.device.friendly_name = name;
    }
    if args.no_mdns {
        config.mdns = false;
    }

    tracing::info!(
        name = %config.device.name,
        port = config.device.port,
        mdns = config.mdns,
        "starting voice satellite"
    );

    let io = SatelliteIo::host(&config);
    let satellite = Satellite::new(config, io)?;

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown requested");
        }
        shutdown.cancel();
    });

    satellite.run(cancel).await?;
    Ok(())
}

fn list_devices() -> anyhow::Result<()> {
    let (inputs, outputs) = audio_devices()?;

    println!("Input devices:");
    for name in &inputs {
        println!("  {name}");
    }
    println!("\nOutput devices:");
    for name in &outputs {
        println!("  {name}");
    }
    Ok(())
}

/// Play a sound and wait for it to finish
async fn test_speaker(url: &str) -> anyhow::Result<()> {
    println!("Playing {url}...");

    let output = CpalOutput::new("test");
    let (done_tx, done_rx) = tokio::sync::oneshot::channel();
    output.play(
        vec![url.to_string()],
        Some(OnFinished::new(move || {
            let _ = done_tx.send(());
        })),
    );
    let _ = done_rx.await;

    println!("\n---");
    println!("If you heard the sound, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: satellite devices");
    println!("  2. Run: pactl info | grep 'Default Sink'");
    println!("  3. Try: pavucontrol (to check output levels)");

    Ok(())
}

/// Record from the microphone, printing a level meter each second
async fn test_mic(seconds: u64, output: Option<PathBuf>) -> anyhow::Result<()> {
    println!("Testing microphone for {seconds} seconds...");
    println!("Speak into your microphone!\n");

    let mut microphone: Box<dyn Microphone> = Box::new(CpalMicrophone::open()?);
    let mut recording: Vec<i16> = Vec::new();
    let mut second: Vec<i16> = Vec::new();
    let per_second = SAMPLE_RATE as usize;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(seconds);

    while tokio::time::Instant::now() < deadline {
        let frame = microphone.read().await?;
        second.extend_from_slice(&frame);
        if second.len() >= per_second {
            let level = rms(&second);
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let meter_len = (level * 100.0).min(50.0) as usize;
            println!("RMS: {level:.4} | [{:<50}]", "#".repeat(meter_len));
            recording.append(&mut second);
        }
    }
    recording.append(&mut second);

    if let Some(path) = output {
        let wav = samples_to_wav(&recording, SAMPLE_RATE)?;
        std::fs::write(&path, wav)?;
        println!("\nSaved {} samples to {}", recording.len(), path.display());
    }

    println!("\n---");
    println!("If the meter moved, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Run: satellite devices");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Try: pavucontrol (to check levels)");

    Ok(())
}

/// RMS level as a fraction of full scale
#[allow(clippy::cast_precision_loss)]
fn rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples
        .iter()
        .map(|&s| {
            let s = f32::from(s) / 32768.0;
            s * s
        })
        .sum();
    (sum_squares / samples.len() as f32).sqrt()
}
