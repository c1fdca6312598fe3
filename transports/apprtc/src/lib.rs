//! AppRTC video streamer
//!
//! Streams a local video source to a remote browser over WebRTC. Session
//! setup goes through an AppRTC-style room service: REST join / message /
//! leave endpoints plus a WebSocket relay for inbound messages.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  SessionSequencer (one scripted session)                 │
//! │  ├─ SignalingSession (REST + WebSocket relay)           │
//! │  └─ ConnectionOrchestrator (RTCPeerConnection)          │
//! │      ├─ CandidateCollector (gathering snapshot)         │
//! │      └─ EventDispatcher (single consumer of callbacks)  │
//! │          └─ StreamingPipeline (capture → encode → send) │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use apprtc_streamer::StreamerConfig;
//!
//! let config = StreamerConfig {
//!     room_id: Some("123456789".to_string()),
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! assert_eq!(config.origin, "https://appr.tc");
//! ```
//!
//! ## Async Usage
//!
//! ```no_run
//! use apprtc_streamer::media::{IvfReplayFactory, TestPatternFactory, VideoSize};
//! use apprtc_streamer::{SessionSequencer, StreamerConfig};
//! use std::sync::Arc;
//!
//! # async fn example() -> apprtc_streamer::Result<()> {
//! let sequencer = SessionSequencer::new(
//!     StreamerConfig::default(),
//!     Arc::new(TestPatternFactory::new(VideoSize::new(640, 480))),
//!     Arc::new(IvfReplayFactory::open("clip.ivf")?),
//! )
//! .on_room_link(|link| println!("Join at {}", link));
//!
//! let report = sequencer.run().await?;
//! println!("Sent {} candidates", report.candidates_sent);
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod media;
pub mod peer;
pub mod session;
pub mod signaling;

pub use config::StreamerConfig;
pub use error::{Error, Result};
pub use peer::{ConnectionOrchestrator, ConnectionState, IceConnectionState, SessionAbort};
pub use session::{SessionReport, SessionSequencer, SessionStep};
pub use signaling::SignalingSession;

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
