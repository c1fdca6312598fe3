//! IVF replay encoder
//!
//! Stands in for a live VP8 encoder: frames are read once from an IVF file
//! and handed out in a loop, one per `encode` call. The raw frame contents
//! are ignored; only the call cadence matters.

use super::source::{EncoderFactory, FrameEncoder, RawFrame, VideoSize};
use crate::{Error, Result};
use bytes::Bytes;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use webrtc::media::io::ivf_reader::IVFReader;

const VP8_FOURCC: &[u8; 4] = b"VP80";

/// Pre-encoded VP8 frames loaded from an IVF file
pub struct IvfReplayFactory {
    path: PathBuf,
    frames: Arc<[Bytes]>,
    coded_size: VideoSize,
}

impl IvfReplayFactory {
    /// Load every frame of `path`
    ///
    /// Fails if the file is not VP8 or holds no frames.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;

        let (mut reader, header) = IVFReader::new(BufReader::new(file)).map_err(|e| {
            Error::EncodingError(format!("{} is not an IVF file: {}", path.display(), e))
        })?;

        if &header.four_cc != VP8_FOURCC {
            return Err(Error::EncodingError(format!(
                "{} holds {}, only VP8 can be replayed",
                path.display(),
                String::from_utf8_lossy(&header.four_cc)
            )));
        }

        let mut frames = Vec::new();
        loop {
            match reader.parse_next_frame() {
                Ok((frame, _)) => frames.push(frame.freeze()),
                Err(e) => {
                    debug!("Stopped reading {} after {} frames: {}", path.display(), frames.len(), e);
                    break;
                }
            }
        }

        if frames.is_empty() {
            return Err(Error::EncodingError(format!(
                "{} contains no frames",
                path.display()
            )));
        }

        let coded_size = VideoSize::new(u32::from(header.width), u32::from(header.height));
        info!(
            "Loaded {} VP8 frames ({}) from {}",
            frames.len(),
            coded_size,
            path.display()
        );

        Ok(Self {
            path,
            frames: frames.into(),
            coded_size,
        })
    }

    /// Dimensions recorded in the file header
    pub fn coded_size(&self) -> VideoSize {
        self.coded_size
    }

    /// Number of frames in one replay cycle
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }
}

impl EncoderFactory for IvfReplayFactory {
    fn create(&self, size: VideoSize, frame_rate: u32) -> Result<Box<dyn FrameEncoder>> {
        debug!(
            "Replaying {} for {} capture at {} fps",
            self.path.display(),
            size,
            frame_rate
        );
        Ok(Box::new(IvfReplayEncoder {
            frames: Arc::clone(&self.frames),
            next: 0,
            size,
            closed: false,
        }))
    }
}

/// Replays the loaded frames in order, wrapping around at the end
///
/// A replayed stream carries its own key frames, so `force_keyframe` has no
/// effect.
pub struct IvfReplayEncoder {
    frames: Arc<[Bytes]>,
    next: usize,
    size: VideoSize,
    closed: bool,
}

impl FrameEncoder for IvfReplayEncoder {
    fn encode(&mut self, _frame: &RawFrame, _force_keyframe: bool) -> Result<Bytes> {
        if self.closed {
            return Err(Error::EncodingError("encoder is closed".to_string()));
        }

        let frame = self.frames[self.next].clone();
        self.next = (self.next + 1) % self.frames.len();
        Ok(frame)
    }

    fn video_size(&self) -> VideoSize {
        self.size
    }

    fn close(&mut self) {
        self.closed = true;
    }
}
