//! Connection orchestrator
//!
//! Owns the `RTCPeerConnection` for one session. Callbacks only queue
//! events; all reactions happen on the dispatcher task.

use super::candidates::CandidateCollector;
use super::events::{forward, EventDispatcher, PeerEvent};
use super::{ConnectionState, IceConnectionState, SessionAbort};
use crate::config::StreamerConfig;
use crate::media::pipeline::PipelineConfig;
use crate::media::source::{CaptureProviderFactory, EncoderFactory, SampleSink};
use crate::signaling::{Candidate, IceDescriptor, SdpKind, SessionDescription};
use crate::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, instrument, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_VP8};
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

/// Drives one peer connection from offer to teardown
pub struct ConnectionOrchestrator {
    peer_connection: Arc<RTCPeerConnection>,

    /// Queue into the dispatcher; the only strong sender
    events: mpsc::UnboundedSender<PeerEvent>,

    collector: Arc<CandidateCollector>,
    abort: watch::Receiver<Option<SessionAbort>>,
    state: watch::Receiver<ConnectionState>,

    video_track_id: String,
    video_stream_id: String,

    opened: AtomicBool,
    answered: AtomicBool,
    closed: AtomicBool,
}

impl ConnectionOrchestrator {
    /// Build the peer connection and start the event dispatcher
    ///
    /// # Arguments
    ///
    /// * `ice` - ICE servers for the connection
    /// * `config` - Track ids, frame rate and key-frame cadence
    /// * `capture_factory` - Opens a capture source when the connection comes up
    /// * `encoder_factory` - Creates encoders for the streaming pipeline
    #[instrument(skip_all, fields(ice_servers = ice.ice_servers.len()))]
    pub async fn new(
        ice: &IceDescriptor,
        config: &StreamerConfig,
        capture_factory: Arc<dyn CaptureProviderFactory>,
        encoder_factory: Arc<dyn EncoderFactory>,
    ) -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| Error::WebRtcError(format!("Failed to register codecs: {}", e)))?;

        let interceptor_registry =
            register_default_interceptors(Default::default(), &mut media_engine).map_err(|e| {
                Error::WebRtcError(format!("Failed to register interceptors: {}", e))
            })?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(interceptor_registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: ice.to_rtc_ice_servers(),
            ..Default::default()
        };

        let peer_connection =
            Arc::new(api.new_peer_connection(rtc_config).await.map_err(|e| {
                Error::WebRtcError(format!("Failed to create peer connection: {}", e))
            })?);

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (abort_tx, abort_rx) = watch::channel(None);
        let (state_tx, state_rx) = watch::channel(ConnectionState::New);
        let collector = Arc::new(CandidateCollector::new());

        let weak = events_tx.downgrade();
        peer_connection.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let weak = weak.clone();
            Box::pin(async move {
                match candidate {
                    Some(candidate) => match candidate.to_json() {
                        Ok(init) => forward(&weak, PeerEvent::Candidate(Candidate::from_init(init))),
                        Err(e) => warn!("Failed to serialize local candidate: {}", e),
                    },
                    None => forward(&weak, PeerEvent::GatheringComplete),
                }
            })
        }));

        let weak = events_tx.downgrade();
        peer_connection.on_peer_connection_state_change(Box::new(
            move |state: RTCPeerConnectionState| {
                let weak = weak.clone();
                Box::pin(async move {
                    forward(&weak, PeerEvent::ConnectionState(state.into()));
                })
            },
        ));

        let weak = events_tx.downgrade();
        peer_connection.on_ice_connection_state_change(Box::new(
            move |state: RTCIceConnectionState| {
                let weak = weak.clone();
                Box::pin(async move {
                    forward(
                        &weak,
                        PeerEvent::IceConnectionState(IceConnectionState::from(state)),
                    );
                })
            },
        ));

        let mut gathering_done = peer_connection.gathering_complete_promise().await;
        let weak = events_tx.downgrade();
        tokio::spawn(async move {
            let _ = gathering_done.recv().await;
            forward(&weak, PeerEvent::GatheringComplete);
        });

        let dispatcher = EventDispatcher::new(
            Arc::clone(&collector),
            capture_factory,
            encoder_factory,
            PipelineConfig {
                frame_rate: config.frame_rate,
                key_frame_interval: config.key_frame_interval,
            },
            abort_tx,
            state_tx,
            events_tx.downgrade(),
        );
        tokio::spawn(dispatcher.run(events_rx));

        let video_stream_id = config
            .video_stream_id
            .clone()
            .unwrap_or_else(|| format!("stream-{}", uuid::Uuid::new_v4()));

        info!("Peer connection created");

        Ok(Self {
            peer_connection,
            events: events_tx,
            collector,
            abort: abort_rx,
            state: state_rx,
            video_track_id: config.video_track_id.clone(),
            video_stream_id,
            opened: AtomicBool::new(false),
            answered: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    /// Add the outbound VP8 track, create the offer and commit it locally
    ///
    /// Candidate gathering starts here. A second call fails with
    /// `Error::StateError`.
    pub async fn open(&self) -> Result<SessionDescription> {
        self.ensure_not_closed("open")?;
        if self.opened.swap(true, Ordering::AcqRel) {
            return Err(Error::StateError("open called twice".to_string()));
        }

        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_string(),
                clock_rate: 90000,
                channels: 0,
                sdp_fmtp_line: String::new(),
                rtcp_feedback: vec![],
            },
            self.video_track_id.clone(),
            self.video_stream_id.clone(),
        ));

        let sender = self
            .peer_connection
            .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| Error::MediaTrackError(format!("Failed to add video track: {}", e)))?;

        // RTCP must be read for the interceptors (NACK, reports) to run.
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while sender.read(&mut buf).await.is_ok() {}
            debug!("RTCP reader finished");
        });

        self.events
            .send(PeerEvent::TrackAttached(track as Arc<dyn SampleSink>))
            .map_err(|_| Error::StateError("peer event dispatcher stopped".to_string()))?;

        let offer = self
            .peer_connection
            .create_offer(None)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to create offer: {}", e)))?;

        self.peer_connection
            .set_local_description(offer.clone())
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set local description: {}", e)))?;

        info!("Local offer created ({} bytes)", offer.sdp.len());
        SessionDescription::try_from(&offer)
    }

    /// Wait for candidate gathering to finish and return every local candidate
    pub async fn candidates(&self) -> Result<Arc<[Candidate]>> {
        if !self.opened.load(Ordering::Acquire) {
            return Err(Error::StateError(
                "candidates requested before open".to_string(),
            ));
        }
        self.collector.wait().await
    }

    /// Commit the remote answer
    ///
    /// Fails with `Error::StateError` before `open`, for a description that
    /// is not an answer, or when an answer was already set.
    pub async fn set_answer(&self, answer: &SessionDescription) -> Result<()> {
        self.ensure_not_closed("set_answer")?;
        if !self.opened.load(Ordering::Acquire) {
            return Err(Error::StateError("set_answer called before open".to_string()));
        }
        if answer.kind() != SdpKind::Answer {
            return Err(Error::StateError(format!(
                "expected an answer, got {:?}",
                answer.kind()
            )));
        }
        if self.answered.swap(true, Ordering::AcqRel) {
            return Err(Error::StateError("answer already set".to_string()));
        }

        if let Err(e) = self.commit_answer(answer).await {
            self.answered.store(false, Ordering::Release);
            return Err(e);
        }

        info!("Remote answer applied");
        Ok(())
    }

    async fn commit_answer(&self, answer: &SessionDescription) -> Result<()> {
        self.peer_connection
            .set_remote_description(answer.to_rtc()?)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set remote description: {}", e)))
    }

    /// Receiver that yields a reason once the session must stop
    pub fn abort_signal(&self) -> watch::Receiver<Option<SessionAbort>> {
        self.abort.clone()
    }

    /// Last reported connection state
    pub fn connection_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Stop streaming, release the capture source and close the connection
    ///
    /// Idempotent; later calls return `Ok(())` without doing anything.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let (ack_tx, ack_rx) = oneshot::channel();
        if self.events.send(PeerEvent::Teardown(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }

        self.peer_connection
            .close()
            .await
            .map_err(|e| Error::WebRtcError(format!("Failed to close peer connection: {}", e)))?;

        info!("Peer connection closed");
        Ok(())
    }

    fn ensure_not_closed(&self, operation: &str) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::StateError(format!(
                "{} on a closed connection",
                operation
            )));
        }
        Ok(())
    }
}
