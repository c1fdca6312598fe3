//! Capture and encoder interfaces consumed by the streaming pipeline
//!
//! Capture providers and encoders are synchronous; they run on the
//! pipeline's dedicated thread. Only the sample sink is async because it
//! writes into the transport engine.

use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use webrtc::media::Sample;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

/// Frame dimensions in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VideoSize {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

impl VideoSize {
    /// Create a new size
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for VideoSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Uncompressed frame handed from capture to encoder
#[derive(Debug, Clone)]
pub struct RawFrame {
    /// Dimensions of the frame
    pub size: VideoSize,
    /// Pixel data (I420 for the built-in sources)
    pub data: Bytes,
}

impl RawFrame {
    /// Create a frame
    pub fn new(size: VideoSize, data: impl Into<Bytes>) -> Self {
        Self {
            size,
            data: data.into(),
        }
    }
}

/// Source of raw frames (screen, camera, test pattern)
pub trait CaptureProvider: Send {
    /// Block until the next frame is available
    fn acquire_frame(&mut self) -> Result<RawFrame>;

    /// Release the underlying device
    fn close(&mut self) -> Result<()>;
}

/// Creates a capture provider each time a connection comes up
pub trait CaptureProviderFactory: Send + Sync {
    /// Open a new provider
    fn create(&self) -> Result<Box<dyn CaptureProvider>>;
}

/// Turns raw frames into compressed samples
pub trait FrameEncoder: Send {
    /// Encode one frame; an empty result means nothing to send this tick
    fn encode(&mut self, frame: &RawFrame, force_keyframe: bool) -> Result<Bytes>;

    /// Size the encoder was configured for
    fn video_size(&self) -> VideoSize;

    /// Release encoder resources
    fn close(&mut self);
}

/// Creates encoders for a given frame size
pub trait EncoderFactory: Send + Sync {
    /// Create an encoder for `size` at `frame_rate` fps
    fn create(&self, size: VideoSize, frame_rate: u32) -> Result<Box<dyn FrameEncoder>>;
}

/// Destination of encoded samples
#[async_trait]
pub trait SampleSink: Send + Sync {
    /// Write one sample to the outbound track
    async fn write_sample(&self, sample: &Sample) -> Result<()>;
}

#[async_trait]
impl SampleSink for TrackLocalStaticSample {
    async fn write_sample(&self, sample: &Sample) -> Result<()> {
        TrackLocalStaticSample::write_sample(self, sample)
            .await
            .map_err(|e| Error::MediaTrackError(format!("Failed to write sample: {}", e)))
    }
}
