//! AppRTC streamer binary entry point
//!
//! Joins a room on an AppRTC-style service, prints the room link and streams
//! video to whoever opens it.
//!
//! # Usage
//!
//! ```bash
//! # Stream a VP8 clip into a random room on https://appr.tc
//! cargo run --bin apprtc-streamer -- --ivf-file ./clip.ivf
//!
//! # Use a local deployment and a fixed room
//! cargo run --bin apprtc-streamer -- \
//!   --origin http://localhost:8080 \
//!   --room 123456789 \
//!   --ivf-file ./clip.ivf
//!
//! # Start from a JSON config file, override the frame rate
//! cargo run --bin apprtc-streamer -- --config streamer.json --frame-rate 15 --ivf-file ./clip.ivf
//! ```

use apprtc_streamer::media::{IvfReplayFactory, TestPatternFactory, VideoSize};
use apprtc_streamer::session::RandomRoomIds;
use apprtc_streamer::{Error, SessionSequencer, StreamerConfig};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// AppRTC video streamer
///
/// Streams a VP8 clip (or any encoder output) to a remote browser through an
/// AppRTC-style room service.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Signaling service origin
    #[arg(long, env = "APPRTC_ORIGIN")]
    origin: Option<String>,

    /// Room to join (random 9-digit id if omitted)
    #[arg(long, env = "APPRTC_ROOM")]
    room: Option<String>,

    /// JSON configuration file; CLI flags override its values
    #[arg(long, env = "APPRTC_CONFIG")]
    config: Option<PathBuf>,

    /// Configuration preset: low-latency, high-quality
    #[arg(long, env = "APPRTC_PRESET")]
    preset: Option<ConfigPreset>,

    /// Pre-encoded VP8 clip (IVF container) replayed as the video stream
    #[arg(long, env = "APPRTC_IVF_FILE")]
    ivf_file: PathBuf,

    /// Capture width in pixels
    #[arg(long, default_value_t = 640, env = "APPRTC_WIDTH")]
    width: u32,

    /// Capture height in pixels
    #[arg(long, default_value_t = 480, env = "APPRTC_HEIGHT")]
    height: u32,

    /// Video framerate in fps
    #[arg(long, env = "APPRTC_FRAME_RATE")]
    frame_rate: Option<u32>,

    /// Force a key frame every N frames
    #[arg(long, env = "APPRTC_KEY_FRAME_INTERVAL")]
    key_frame_interval: Option<u32>,

    /// ICE servers used when the service returns none (comma-separated)
    #[arg(long, value_delimiter = ',', env = "APPRTC_ICE_FALLBACK_SERVERS")]
    ice_fallback_servers: Vec<String>,

    /// Seed for room id generation (reproducible room ids)
    #[arg(long)]
    room_seed: Option<u64>,
}

/// Configuration preset for quick setup
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum ConfigPreset {
    /// Frequent key frames, short REST timeout
    LowLatency,
    /// 60 fps, sparse key frames
    HighQuality,
}

/// Build the configuration: file or preset first, then explicit CLI overrides
fn build_config_from_args(args: &Args) -> Result<StreamerConfig, Error> {
    let mut config = match (&args.config, args.preset) {
        (Some(path), _) => {
            info!("Loading configuration from {}", path.display());
            StreamerConfig::from_json_file(path)?
        }
        (None, Some(ConfigPreset::LowLatency)) => {
            info!("Using low_latency preset");
            StreamerConfig::low_latency_preset(apprtc_streamer::config::DEFAULT_ORIGIN)
        }
        (None, Some(ConfigPreset::HighQuality)) => {
            info!("Using high_quality preset");
            StreamerConfig::high_quality_preset(apprtc_streamer::config::DEFAULT_ORIGIN)
        }
        (None, None) => StreamerConfig::default(),
    };

    if let Some(origin) = &args.origin {
        config.origin = origin.clone();
    }
    if let Some(room) = &args.room {
        config.room_id = Some(room.clone());
    }
    if let Some(frame_rate) = args.frame_rate {
        config.frame_rate = frame_rate;
    }
    if let Some(interval) = args.key_frame_interval {
        config.key_frame_interval = interval;
    }
    if !args.ice_fallback_servers.is_empty() {
        config.ice_fallback_servers = args.ice_fallback_servers.clone();
    }

    config.validate()?;
    Ok(config)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let interrupted = Arc::new(AtomicBool::new(false));
    let interrupted_handler = Arc::clone(&interrupted);
    ctrlc::set_handler(move || {
        if interrupted_handler.swap(true, Ordering::SeqCst) {
            eprintln!("Shutdown already in progress, forcing exit");
            std::process::exit(130);
        }
        eprintln!("\nCtrl+C received, leaving the room...");
        shutdown_tx.send_replace(true);
    })?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get())
        .thread_name("apprtc-worker")
        .enable_all()
        .build()?;

    runtime.block_on(async_main(args, shutdown_rx))
}

async fn async_main(
    args: Args,
    shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    info!(
        version = apprtc_streamer::version(),
        "AppRTC streamer starting"
    );

    let config = build_config_from_args(&args)?;
    info!(
        origin = %config.origin,
        room_id = ?config.room_id,
        frame_rate = config.frame_rate,
        key_frame_interval = config.key_frame_interval,
        ice_fallback_servers = config.ice_fallback_servers.len(),
        "Configuration loaded"
    );

    let encoders = IvfReplayFactory::open(&args.ivf_file)?;
    let capture = TestPatternFactory::new(VideoSize::new(args.width, args.height));
    let room_ids = match args.room_seed {
        Some(seed) => RandomRoomIds::from_seed(seed),
        None => RandomRoomIds::new(),
    };

    let sequencer = SessionSequencer::new(config, Arc::new(capture), Arc::new(encoders))
        .with_room_ids(Arc::new(room_ids))
        .with_shutdown(shutdown)
        .on_room_link(|link| println!("Room link: {}", link));

    match sequencer.run().await {
        Ok(report) => {
            info!(
                room_id = %report.room_id,
                client_id = %report.client_id,
                candidates_sent = report.candidates_sent,
                "Session ended by remote peer"
            );
            Ok(())
        }
        Err(e) if matches!(e.root(), Error::Interrupted(_)) => {
            info!("Session interrupted, room left");
            Ok(())
        }
        Err(e) => {
            error!("{}", e);
            Err(e.into())
        }
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
