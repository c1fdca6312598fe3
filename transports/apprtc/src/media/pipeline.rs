//! Streaming pipeline: acquire, encode, pace, send
//!
//! The loop runs on a dedicated OS thread for steady pacing and owns a
//! current-thread runtime for the async track writes. Any failure ends the
//! loop for good; the exit is reported through the callback given to
//! `start`.

use super::source::{CaptureProvider, EncoderFactory, FrameEncoder, SampleSink};
use crate::{Error, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};
use webrtc::media::Sample;

/// Lifecycle of a pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Not started yet
    Idle,
    /// Loop thread running
    Active,
    /// Stopped; never restarts
    Stopped,
}

/// Pacing and key-frame cadence
#[derive(Debug, Clone, Copy)]
pub struct PipelineConfig {
    /// Frames per second
    pub frame_rate: u32,
    /// Force a key frame every N frames
    pub key_frame_interval: u32,
}

impl PipelineConfig {
    /// Duration of one frame
    pub fn frame_duration(&self) -> Duration {
        Duration::from_secs(1) / self.frame_rate.max(1)
    }

    /// Whether frame `index` must be a key frame
    pub fn is_key_frame(&self, index: u64) -> bool {
        index % u64::from(self.key_frame_interval.max(1)) == 0
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            frame_rate: 30,
            key_frame_interval: 10,
        }
    }
}

/// How the loop ended
#[derive(Debug, Clone)]
pub struct PipelineExit {
    /// Samples written before the loop ended
    pub frames_sent: u64,
    /// Failure that ended the loop, `None` when stopped on request
    pub error: Option<String>,
}

type ExitCallback = Box<dyn FnOnce(PipelineExit) + Send + 'static>;

/// Pull -> encode -> pace -> send loop for one connection
pub struct StreamingPipeline {
    state: Mutex<PipelineState>,
    shutdown: Arc<AtomicBool>,
    frames_sent: Arc<AtomicU64>,
    /// Loop thread; yields the capture provider back when it ends
    handle: Mutex<Option<std::thread::JoinHandle<Box<dyn CaptureProvider>>>>,
}

impl StreamingPipeline {
    /// Create an idle pipeline
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PipelineState::Idle),
            shutdown: Arc::new(AtomicBool::new(false)),
            frames_sent: Arc::new(AtomicU64::new(0)),
            handle: Mutex::new(None),
        }
    }

    /// Current state
    pub fn state(&self) -> PipelineState {
        *self.state.lock()
    }

    /// Samples written so far
    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Acquire)
    }

    /// Start the loop thread
    ///
    /// Takes ownership of the capture provider until `stop` hands it back.
    /// `on_exit` runs on the loop thread once the loop ends, whatever the
    /// reason.
    pub fn start(
        &self,
        capture: Box<dyn CaptureProvider>,
        encoders: Arc<dyn EncoderFactory>,
        sink: Arc<dyn SampleSink>,
        config: PipelineConfig,
        on_exit: impl FnOnce(PipelineExit) + Send + 'static,
    ) -> Result<()> {
        let mut state = self.state.lock();
        if *state != PipelineState::Idle {
            return Err(Error::StateError(format!(
                "pipeline cannot start from {:?}",
                *state
            )));
        }

        let shutdown = Arc::clone(&self.shutdown);
        let frames_sent = Arc::clone(&self.frames_sent);
        let on_exit: ExitCallback = Box::new(on_exit);

        let handle = std::thread::Builder::new()
            .name("video-pipeline".to_string())
            .spawn(move || {
                Self::run_loop(capture, encoders, sink, config, shutdown, frames_sent, on_exit)
            })
            .map_err(|e| Error::MediaTrackError(format!("Failed to spawn pipeline thread: {}", e)))?;

        *self.handle.lock() = Some(handle);
        *state = PipelineState::Active;

        info!(
            "Streaming pipeline started ({} fps, key frame every {} frames)",
            config.frame_rate, config.key_frame_interval
        );
        Ok(())
    }

    /// Stop the loop and wait for the thread to end
    ///
    /// Returns the capture provider so the caller can release it. Stopping
    /// twice, or stopping a pipeline that never started, returns `None`.
    pub async fn stop(&self) -> Option<Box<dyn CaptureProvider>> {
        {
            let mut state = self.state.lock();
            if *state == PipelineState::Stopped {
                return None;
            }
            *state = PipelineState::Stopped;
        }

        self.shutdown.store(true, Ordering::Release);

        let handle = self.handle.lock().take()?;
        match tokio::task::spawn_blocking(move || handle.join()).await {
            Ok(Ok(capture)) => {
                info!(
                    "Streaming pipeline stopped after {} frames",
                    self.frames_sent()
                );
                Some(capture)
            }
            Ok(Err(_)) => {
                warn!("Pipeline thread panicked; capture provider lost");
                None
            }
            Err(e) => {
                warn!("Failed to join pipeline thread: {}", e);
                None
            }
        }
    }

    fn run_loop(
        mut capture: Box<dyn CaptureProvider>,
        encoders: Arc<dyn EncoderFactory>,
        sink: Arc<dyn SampleSink>,
        config: PipelineConfig,
        shutdown: Arc<AtomicBool>,
        frames_sent: Arc<AtomicU64>,
        on_exit: ExitCallback,
    ) -> Box<dyn CaptureProvider> {
        let mut encoder: Option<Box<dyn FrameEncoder>> = None;

        let outcome = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(rt) => Self::pump(
                &rt,
                capture.as_mut(),
                &mut encoder,
                encoders.as_ref(),
                sink.as_ref(),
                config,
                &shutdown,
                &frames_sent,
            ),
            Err(e) => Err(Error::MediaTrackError(format!(
                "Failed to create pipeline runtime: {}",
                e
            ))),
        };

        if let Some(mut encoder) = encoder.take() {
            encoder.close();
        }

        let exit = PipelineExit {
            frames_sent: frames_sent.load(Ordering::Acquire),
            error: outcome.err().map(|e| e.to_string()),
        };
        match &exit.error {
            Some(reason) => warn!("Streaming pipeline terminated: {}", reason),
            None => debug!("Streaming pipeline loop ended on request"),
        }
        on_exit(exit);

        capture
    }

    #[allow(clippy::too_many_arguments)]
    fn pump(
        rt: &tokio::runtime::Runtime,
        capture: &mut dyn CaptureProvider,
        encoder: &mut Option<Box<dyn FrameEncoder>>,
        encoders: &dyn EncoderFactory,
        sink: &dyn SampleSink,
        config: PipelineConfig,
        shutdown: &AtomicBool,
        frames_sent: &AtomicU64,
    ) -> Result<()> {
        let duration = config.frame_duration();
        let mut frame_index = 0u64;

        while !shutdown.load(Ordering::Acquire) {
            let frame = capture.acquire_frame()?;

            if encoder.as_ref().map(|enc| enc.video_size()) != Some(frame.size) {
                if let Some(mut old) = encoder.take() {
                    debug!("Frame size changed to {}, recreating encoder", frame.size);
                    old.close();
                }
                *encoder = Some(encoders.create(frame.size, config.frame_rate)?);
            }
            let Some(current) = encoder.as_mut() else {
                return Err(Error::EncodingError("no encoder available".to_string()));
            };

            let data = current.encode(&frame, config.is_key_frame(frame_index))?;
            frame_index += 1;

            if !data.is_empty() {
                let sample = Sample {
                    data,
                    duration,
                    timestamp: SystemTime::now(),
                    ..Default::default()
                };
                rt.block_on(sink.write_sample(&sample))?;

                let sent = frames_sent.fetch_add(1, Ordering::AcqRel) + 1;
                if sent == 1 {
                    info!("First video sample sent");
                } else if sent % 300 == 0 {
                    debug!("{} video samples sent", sent);
                }
            }

            std::thread::sleep(duration);
        }

        Ok(())
    }
}

impl Default for StreamingPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for StreamingPipeline {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
    }
}
