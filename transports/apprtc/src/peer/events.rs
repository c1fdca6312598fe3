//! Engine events and their single consumer
//!
//! Every transport callback is turned into a [`PeerEvent`] and queued; the
//! [`EventDispatcher`] handles them one at a time, in arrival order. The
//! candidate buffer, the capture provider and the pipeline are only ever
//! touched from here.

use super::candidates::CandidateCollector;
use super::latch::OneShotLatch;
use super::{ConnectionState, IceConnectionState, SessionAbort};
use crate::media::pipeline::{PipelineConfig, PipelineExit, StreamingPipeline};
use crate::media::source::{CaptureProviderFactory, EncoderFactory, SampleSink};
use crate::signaling::Candidate;
use crate::{Error, Result};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

/// Something the transport engine (or the pipeline) reported
pub enum PeerEvent {
    /// New local candidate
    Candidate(Candidate),
    /// Candidate gathering finished
    GatheringComplete,
    /// Aggregate connection state changed
    ConnectionState(ConnectionState),
    /// ICE connection state changed
    IceConnectionState(IceConnectionState),
    /// Outbound video track is ready to receive samples
    TrackAttached(Arc<dyn SampleSink>),
    /// Pipeline loop ended
    PipelineExited(PipelineExit),
    /// Stop everything and acknowledge
    Teardown(oneshot::Sender<()>),
}

impl std::fmt::Debug for PeerEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PeerEvent::Candidate(c) => write!(f, "Candidate({})", c.candidate),
            PeerEvent::GatheringComplete => f.write_str("GatheringComplete"),
            PeerEvent::ConnectionState(s) => write!(f, "ConnectionState({:?})", s),
            PeerEvent::IceConnectionState(s) => write!(f, "IceConnectionState({:?})", s),
            PeerEvent::TrackAttached(_) => f.write_str("TrackAttached"),
            PeerEvent::PipelineExited(exit) => write!(f, "PipelineExited({:?})", exit.error),
            PeerEvent::Teardown(_) => f.write_str("Teardown"),
        }
    }
}

/// Sender half used by engine callbacks; never keeps the queue alive
pub type WeakEventSender = mpsc::WeakUnboundedSender<PeerEvent>;

/// Queue a callback event if the dispatcher is still running
pub fn forward(events: &WeakEventSender, event: PeerEvent) {
    match events.upgrade() {
        Some(tx) => {
            if tx.send(event).is_err() {
                debug!("Dispatcher stopped, dropping event");
            }
        }
        None => debug!("Orchestrator gone, dropping {:?}", event),
    }
}

/// Handles peer events; owns the pipeline and its start/stop latches
pub struct EventDispatcher {
    collector: Arc<CandidateCollector>,
    capture_factory: Arc<dyn CaptureProviderFactory>,
    encoder_factory: Arc<dyn EncoderFactory>,
    pipeline_config: PipelineConfig,
    pipeline: StreamingPipeline,
    sink: Option<Arc<dyn SampleSink>>,
    start_latch: OneShotLatch,
    stop_latch: OneShotLatch,
    abort: watch::Sender<Option<SessionAbort>>,
    state: watch::Sender<ConnectionState>,
    events: WeakEventSender,
    torn_down: bool,
}

impl EventDispatcher {
    /// Create a dispatcher; `events` is the queue it reads from
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        collector: Arc<CandidateCollector>,
        capture_factory: Arc<dyn CaptureProviderFactory>,
        encoder_factory: Arc<dyn EncoderFactory>,
        pipeline_config: PipelineConfig,
        abort: watch::Sender<Option<SessionAbort>>,
        state: watch::Sender<ConnectionState>,
        events: WeakEventSender,
    ) -> Self {
        Self {
            collector,
            capture_factory,
            encoder_factory,
            pipeline_config,
            pipeline: StreamingPipeline::new(),
            sink: None,
            start_latch: OneShotLatch::new(),
            stop_latch: OneShotLatch::new(),
            abort,
            state,
            events,
            torn_down: false,
        }
    }

    /// Consume events until teardown or until every sender is gone
    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<PeerEvent>) {
        while let Some(event) = events.recv().await {
            if !self.handle(event).await {
                break;
            }
        }

        if !self.torn_down {
            debug!("Event queue closed without teardown, stopping pipeline");
            self.stop_media().await;
        }
        debug!("Peer event dispatcher finished");
    }

    /// Handle one event; returns false once torn down
    pub async fn handle(&mut self, event: PeerEvent) -> bool {
        if self.torn_down {
            if let PeerEvent::Teardown(ack) = event {
                let _ = ack.send(());
            }
            return false;
        }

        match event {
            PeerEvent::Candidate(candidate) => {
                self.collector.push(candidate);
            }
            PeerEvent::GatheringComplete => {
                if self.collector.complete() {
                    info!("ICE candidate gathering complete");
                }
            }
            PeerEvent::ConnectionState(state) => {
                info!("Peer connection state: {:?}", state);
                self.state.send_replace(state);
                if state == ConnectionState::Failed {
                    error!("Peer connection failed");
                    self.raise_abort(SessionAbort::ConnectivityFailed);
                }
            }
            PeerEvent::IceConnectionState(state) => {
                debug!("ICE connection state: {:?}", state);
                self.on_ice_state(state).await;
            }
            PeerEvent::TrackAttached(sink) => {
                self.sink = Some(sink);
            }
            PeerEvent::PipelineExited(exit) => {
                if let Some(reason) = exit.error {
                    if self.stop_latch.is_fired() {
                        debug!("Pipeline ended during stop: {}", reason);
                    } else {
                        self.raise_abort(SessionAbort::PipelineTerminated(reason));
                    }
                }
            }
            PeerEvent::Teardown(ack) => {
                self.stop_media().await;
                self.torn_down = true;
                let _ = ack.send(());
                return false;
            }
        }

        true
    }

    async fn on_ice_state(&mut self, state: IceConnectionState) {
        if state.is_connected() {
            if self.start_latch.try_fire() {
                if let Err(e) = self.start_media() {
                    error!("Failed to start streaming: {}", e);
                    self.raise_abort(SessionAbort::PipelineTerminated(e.to_string()));
                }
            }
        } else if state.is_disconnected() {
            if !self.start_latch.is_fired() {
                debug!("ICE {:?} before media started, ignoring", state);
                return;
            }
            self.stop_media().await;
        }
    }

    fn start_media(&mut self) -> Result<()> {
        let sink = self
            .sink
            .clone()
            .ok_or_else(|| Error::MediaTrackError("no outbound video track".to_string()))?;
        let capture = self.capture_factory.create()?;

        let events = self.events.clone();
        self.pipeline.start(
            capture,
            Arc::clone(&self.encoder_factory),
            sink,
            self.pipeline_config,
            move |exit| forward(&events, PeerEvent::PipelineExited(exit)),
        )?;

        info!("Connection up, streaming started");
        Ok(())
    }

    async fn stop_media(&mut self) {
        if !self.stop_latch.try_fire() {
            return;
        }

        if let Some(mut capture) = self.pipeline.stop().await {
            if let Err(e) = capture.close() {
                warn!("Failed to release capture provider: {}", e);
            }
        }
        info!("Streaming stopped");
    }

    fn raise_abort(&self, reason: SessionAbort) {
        self.abort.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(reason);
                true
            } else {
                false
            }
        });
    }

    /// Pipeline owned by this dispatcher
    pub fn pipeline(&self) -> &StreamingPipeline {
        &self.pipeline
    }
}
