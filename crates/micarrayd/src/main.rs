//! micarrayd: multi-microphone array processing daemon
//!
//! Captures synchronized multi-channel PCM from the configured input
//! device, denoises and localizes the dominant source, and plays the
//! spatialized stereo downmix while printing a live status line.

use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;

use ma_audio::{
    list_input_devices, list_output_devices, CpalCaptureSource, CpalPlayback, MicArray, NullSink,
    PlaybackSink,
};
use ma_core::ArrayConfig;

#[derive(Parser)]
#[command(name = "micarrayd", version, about = "Multi-microphone array processing daemon")]
struct Args {
    /// Configuration file (JSON); defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured output volume (0.0-1.0)
    #[arg(short, long)]
    volume: Option<f32>,

    /// List audio devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Discard the stereo output instead of opening a playback device
    #[arg(long)]
    no_playback: bool,

    /// Suppress the interactive status line
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.list_devices {
        println!("Input devices:");
        for name in list_input_devices().context("enumerating input devices")? {
            println!("  {name}");
        }
        println!("Output devices:");
        for name in list_output_devices().context("enumerating output devices")? {
            println!("  {name}");
        }
        return Ok(());
    }

    let (mut config, config_note) = match &args.config {
        Some(path) => (
            ArrayConfig::from_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None,
        ),
        None => (
            ArrayConfig::default(),
            Some("no configuration file given, using defaults"),
        ),
    };

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.log_level.to_lowercase()),
    )
    .init();
    if let Some(note) = config_note {
        log::info!("{note}");
    }

    if let Some(volume) = args.volume {
        anyhow::ensure!(
            (0.0..=1.0).contains(&volume),
            "volume must be between 0.0 and 1.0"
        );
        config.volume = volume;
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);
    ctrlc::set_handler(move || {
        shutdown_flag.store(true, Ordering::SeqCst);
    })
    .context("installing signal handler")?;

    let source = CpalCaptureSource::new(
        config.input_device.as_deref(),
        config.num_microphones,
        config.sample_rate,
    );

    let (playback, sink): (Option<CpalPlayback>, Box<dyn PlaybackSink>) = if args.no_playback {
        (None, Box::new(NullSink::new()))
    } else {
        let mut playback = CpalPlayback::new(
            config.output_device.as_deref(),
            config.sample_rate,
            config.dma_buffer_size * 4,
        )
        .context("opening playback device")?;
        let sink = playback.writer().context("detaching playback writer")?;
        (Some(playback), Box::new(sink))
    };

    let mut array = MicArray::new(config, Box::new(source), sink)
        .context("initializing microphone array")?;

    if let Some(playback) = &playback {
        playback.start().context("starting playback")?;
    }
    array.start().context("starting microphone array")?;

    println!(
        "micarray {} running, press Ctrl+C to stop",
        MicArray::version()
    );

    while !shutdown.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_secs(1));

        if !array.is_running() {
            if let Some(error) = array.last_error() {
                let _ = array.stop();
                if let Some(playback) = &playback {
                    let _ = playback.stop();
                }
                return Err(error).context("pipeline stopped");
            }
            break;
        }

        if !args.quiet {
            let location = array.current_location();
            print!(
                "\rlocation: x={:.2} y={:.2} z={:.2} confidence={:.2}  ",
                location.x, location.y, location.z, location.confidence
            );
            let _ = std::io::stdout().flush();
        }
    }
    println!();

    log::info!("shutting down");
    array.stop().context("stopping microphone array")?;
    if let Some(playback) = &playback {
        playback.stop().context("stopping playback")?;
    }
    Ok(())
}
