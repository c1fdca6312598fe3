//! Session sequencer
//!
//! Runs the fixed script
//! join -> fetch ICE -> register -> open -> offer -> gather -> candidates ->
//! room link -> answer -> set answer -> wait for bye -> bye,
//! then tears down the peer connection, leaves and closes on every path.

use super::room_id::{RandomRoomIds, RoomIdGenerator};
use super::SessionStep;
use crate::config::StreamerConfig;
use crate::media::source::{CaptureProviderFactory, EncoderFactory};
use crate::peer::{ConnectionOrchestrator, SessionAbort};
use crate::signaling::SignalingSession;
use crate::{Error, Result};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Outcome of a session that ran to completion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    /// Joined room
    pub room_id: String,
    /// Client id assigned by the service
    pub client_id: String,
    /// Link the remote peer used to join
    pub room_link: String,
    /// Number of local candidates posted
    pub candidates_sent: usize,
}

type RoomLinkCallback = Box<dyn Fn(&str) + Send + Sync>;

/// Composes signaling, peer connection and pipeline into one session
pub struct SessionSequencer {
    config: StreamerConfig,
    room_ids: Arc<dyn RoomIdGenerator>,
    capture_factory: Arc<dyn CaptureProviderFactory>,
    encoder_factory: Arc<dyn EncoderFactory>,
    shutdown: Option<watch::Receiver<bool>>,
    on_room_link: Option<RoomLinkCallback>,
}

/// Room and client identity attached to step errors
struct StepContext {
    room_id: String,
    client_id: String,
}

impl StepContext {
    fn wrap(&self, step: SessionStep, source: Error) -> Error {
        Error::SessionStep {
            step,
            room_id: self.room_id.clone(),
            client_id: self.client_id.clone(),
            source: Box::new(source),
        }
    }
}

impl SessionSequencer {
    /// Create a sequencer with random room ids and no external shutdown
    pub fn new(
        config: StreamerConfig,
        capture_factory: Arc<dyn CaptureProviderFactory>,
        encoder_factory: Arc<dyn EncoderFactory>,
    ) -> Self {
        Self {
            config,
            room_ids: Arc::new(RandomRoomIds::new()),
            capture_factory,
            encoder_factory,
            shutdown: None,
            on_room_link: None,
        }
    }

    /// Use `room_ids` when the config names no room
    pub fn with_room_ids(mut self, room_ids: Arc<dyn RoomIdGenerator>) -> Self {
        self.room_ids = room_ids;
        self
    }

    /// Stop the session when `shutdown` turns true
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Called with the room link once the offer and candidates are posted
    pub fn on_room_link(mut self, callback: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_room_link = Some(Box::new(callback));
        self
    }

    /// Run one session to completion
    ///
    /// Any step failure aborts the script and is returned wrapped in
    /// `Error::SessionStep`. Teardown, leave and close run regardless.
    pub async fn run(&self) -> Result<SessionReport> {
        let mut ctx = StepContext {
            room_id: self
                .config
                .room_id
                .clone()
                .unwrap_or_else(|| self.room_ids.next_room_id()),
            client_id: "-".to_string(),
        };

        let mut join_config = self.config.clone();
        join_config.room_id = Some(ctx.room_id.clone());

        info!(room_id = %ctx.room_id, step = %SessionStep::Join, "Session starting");
        let session = SignalingSession::join(&join_config, self.room_ids.as_ref())
            .await
            .map_err(|e| ctx.wrap(SessionStep::Join, e))?;

        ctx.room_id = session.room_id().to_string();
        ctx.client_id = session.client_id().to_string();
        let session = Arc::new(session);

        let mut cleanup = CleanupGuard::new(Arc::clone(&session));
        let outcome = self.drive(&session, &mut cleanup, &ctx).await;
        let cleanup_errors = cleanup.release().await;

        match outcome {
            Ok(report) => {
                let mut wrapped: Vec<Error> = cleanup_errors
                    .into_iter()
                    .map(|(step, e)| ctx.wrap(step, e))
                    .collect();
                match wrapped.len() {
                    0 => {
                        info!(
                            room_id = %ctx.room_id,
                            client_id = %ctx.client_id,
                            "Session finished"
                        );
                        Ok(report)
                    }
                    1 => Err(wrapped.remove(0)),
                    _ => Err(Error::Multiple(wrapped)),
                }
            }
            Err(e) => {
                for (step, cleanup_err) in cleanup_errors {
                    warn!(step = %step, "Cleanup after failed session also failed: {}", cleanup_err);
                }
                error!(room_id = %ctx.room_id, client_id = %ctx.client_id, "Session failed: {}", e);
                Err(e)
            }
        }
    }

    async fn drive(
        &self,
        session: &SignalingSession,
        cleanup: &mut CleanupGuard,
        ctx: &StepContext,
    ) -> Result<SessionReport> {
        let step = |step: SessionStep| move |e: Error| ctx.wrap(step, e);

        info!(step = %SessionStep::FetchIceConfiguration, "Fetching ICE configuration");
        let ice = session
            .fetch_ice_configuration()
            .await
            .map_err(step(SessionStep::FetchIceConfiguration))?;

        info!(step = %SessionStep::Register, "Registering on relay");
        session
            .register()
            .await
            .map_err(step(SessionStep::Register))?;

        info!(step = %SessionStep::Open, "Creating peer connection");
        let orchestrator = Arc::new(
            ConnectionOrchestrator::new(
                &ice,
                &self.config,
                Arc::clone(&self.capture_factory),
                Arc::clone(&self.encoder_factory),
            )
            .await
            .map_err(step(SessionStep::Open))?,
        );
        cleanup.set_orchestrator(Arc::clone(&orchestrator));
        let mut abort = orchestrator.abort_signal();

        let offer = orchestrator.open().await.map_err(step(SessionStep::Open))?;

        info!(step = %SessionStep::SendOffer, "Sending offer");
        self.guarded(&mut abort, session.send_offer(&offer))
            .await
            .map_err(step(SessionStep::SendOffer))?;

        info!(step = %SessionStep::GatherCandidates, "Waiting for candidate gathering");
        let candidates = self
            .guarded(&mut abort, orchestrator.candidates())
            .await
            .map_err(step(SessionStep::GatherCandidates))?;

        info!(
            step = %SessionStep::SendCandidates,
            "Sending {} candidates",
            candidates.len()
        );
        for candidate in candidates.iter() {
            self.guarded(&mut abort, session.send_candidate(candidate))
                .await
                .map_err(step(SessionStep::SendCandidates))?;
        }

        let room_link = session.room_link().to_string();
        info!(step = %SessionStep::PublishRoomLink, room_link = %room_link, "Room ready");
        if let Some(callback) = &self.on_room_link {
            callback(&room_link);
        }

        info!(step = %SessionStep::ReceiveAnswer, "Waiting for answer");
        let answer = self
            .guarded(&mut abort, session.receive_answer())
            .await
            .map_err(step(SessionStep::ReceiveAnswer))?;

        self.guarded(&mut abort, orchestrator.set_answer(&answer))
            .await
            .map_err(step(SessionStep::SetAnswer))?;

        info!(step = %SessionStep::WaitForBye, "Streaming until the remote peer leaves");
        self.guarded(&mut abort, session.wait_for_bye())
            .await
            .map_err(step(SessionStep::WaitForBye))?;

        session
            .send_bye()
            .await
            .map_err(step(SessionStep::SendBye))?;

        Ok(SessionReport {
            room_id: ctx.room_id.clone(),
            client_id: ctx.client_id.clone(),
            room_link,
            candidates_sent: candidates.len(),
        })
    }

    /// Run `operation` unless the session aborts or shutdown is requested first
    async fn guarded<T>(
        &self,
        abort: &mut watch::Receiver<Option<SessionAbort>>,
        operation: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        let mut shutdown = self.shutdown.clone();
        tokio::select! {
            biased;
            reason = wait_for_abort(abort) => Err(reason.into_error()),
            _ = wait_for_shutdown(shutdown.as_mut()) => {
                Err(Error::Interrupted("shutdown requested".to_string()))
            }
            result = operation => result,
        }
    }
}

async fn wait_for_abort(abort: &mut watch::Receiver<Option<SessionAbort>>) -> SessionAbort {
    let reason = match abort.wait_for(Option::is_some).await {
        Ok(reason) => reason.clone(),
        Err(_) => None,
    };
    match reason {
        Some(reason) => reason,
        None => std::future::pending().await,
    }
}

async fn wait_for_shutdown(shutdown: Option<&mut watch::Receiver<bool>>) {
    match shutdown {
        Some(rx) => {
            if rx.wait_for(|requested| *requested).await.is_err() {
                std::future::pending::<()>().await;
            }
        }
        None => std::future::pending().await,
    }
}

/// Releases the session's resources exactly once
///
/// `release` runs teardown inline. If the sequencer future is dropped
/// before that, `Drop` spawns the same cleanup on the current runtime.
struct CleanupGuard {
    session: Arc<SignalingSession>,
    orchestrator: Option<Arc<ConnectionOrchestrator>>,
    released: bool,
}

impl CleanupGuard {
    fn new(session: Arc<SignalingSession>) -> Self {
        Self {
            session,
            orchestrator: None,
            released: false,
        }
    }

    fn set_orchestrator(&mut self, orchestrator: Arc<ConnectionOrchestrator>) {
        self.orchestrator = Some(orchestrator);
    }

    async fn release(mut self) -> Vec<(SessionStep, Error)> {
        self.released = true;
        cleanup(Arc::clone(&self.session), self.orchestrator.take()).await
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        let session = Arc::clone(&self.session);
        let orchestrator = self.orchestrator.take();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!("Session dropped mid-flight, cleaning up in the background");
                handle.spawn(async move {
                    for (step, e) in cleanup(session, orchestrator).await {
                        warn!(step = %step, "Background cleanup failed: {}", e);
                    }
                });
            }
            Err(_) => warn!("Session dropped outside a runtime, room {} not left", session.room_id()),
        }
    }
}

async fn cleanup(
    session: Arc<SignalingSession>,
    orchestrator: Option<Arc<ConnectionOrchestrator>>,
) -> Vec<(SessionStep, Error)> {
    let mut errors = Vec::new();

    if let Some(orchestrator) = orchestrator {
        info!(step = %SessionStep::ClosePeer, "Closing peer connection");
        if let Err(e) = orchestrator.close().await {
            errors.push((SessionStep::ClosePeer, e));
        }
    }

    info!(step = %SessionStep::Leave, "Leaving room");
    if let Err(e) = session.leave().await {
        errors.push((SessionStep::Leave, e));
    }

    info!(step = %SessionStep::Close, "Closing signaling session");
    if let Err(e) = session.close().await {
        errors.push((SessionStep::Close, e));
    }

    errors
}
