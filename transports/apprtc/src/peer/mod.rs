//! Peer connection orchestration
//!
//! The orchestrator owns the `RTCPeerConnection`. Engine callbacks become
//! [`events::PeerEvent`]s consumed by a single dispatcher task, which drives
//! candidate collection and the one-shot pipeline start/stop.

pub mod candidates;
pub mod connection;
pub mod events;
pub mod latch;

pub use candidates::CandidateCollector;
pub use connection::ConnectionOrchestrator;
pub use latch::{LatchState, OneShotLatch};

use crate::Error;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;

/// Aggregate peer connection state, as reported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not started
    New,
    /// ICE/DTLS in progress
    Connecting,
    /// Media can flow
    Connected,
    /// Temporarily lost
    Disconnected,
    /// Gave up
    Failed,
    /// Closed locally
    Closed,
}

impl From<RTCPeerConnectionState> for ConnectionState {
    fn from(state: RTCPeerConnectionState) -> Self {
        match state {
            RTCPeerConnectionState::Unspecified | RTCPeerConnectionState::New => {
                ConnectionState::New
            }
            RTCPeerConnectionState::Connecting => ConnectionState::Connecting,
            RTCPeerConnectionState::Connected => ConnectionState::Connected,
            RTCPeerConnectionState::Disconnected => ConnectionState::Disconnected,
            RTCPeerConnectionState::Failed => ConnectionState::Failed,
            RTCPeerConnectionState::Closed => ConnectionState::Closed,
        }
    }
}

/// ICE transport state, as reported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceConnectionState {
    /// Waiting for candidates
    New,
    /// Checking candidate pairs
    Checking,
    /// A usable pair was found
    Connected,
    /// Checking finished
    Completed,
    /// Connectivity lost
    Disconnected,
    /// No usable pair
    Failed,
    /// Shut down
    Closed,
}

impl IceConnectionState {
    /// States in which media can flow
    pub fn is_connected(&self) -> bool {
        matches!(self, IceConnectionState::Connected | IceConnectionState::Completed)
    }

    /// States that end media flow
    pub fn is_disconnected(&self) -> bool {
        matches!(
            self,
            IceConnectionState::Disconnected
                | IceConnectionState::Failed
                | IceConnectionState::Closed
        )
    }
}

impl From<RTCIceConnectionState> for IceConnectionState {
    fn from(state: RTCIceConnectionState) -> Self {
        match state {
            RTCIceConnectionState::Unspecified | RTCIceConnectionState::New => {
                IceConnectionState::New
            }
            RTCIceConnectionState::Checking => IceConnectionState::Checking,
            RTCIceConnectionState::Connected => IceConnectionState::Connected,
            RTCIceConnectionState::Completed => IceConnectionState::Completed,
            RTCIceConnectionState::Disconnected => IceConnectionState::Disconnected,
            RTCIceConnectionState::Failed => IceConnectionState::Failed,
            RTCIceConnectionState::Closed => IceConnectionState::Closed,
        }
    }
}

/// Reason the orchestrator asks the running session to stop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAbort {
    /// Peer connection reached `Failed`
    ConnectivityFailed,
    /// Streaming pipeline ended with an error
    PipelineTerminated(String),
}

impl SessionAbort {
    /// Error the session reports for this abort
    pub fn into_error(self) -> Error {
        match self {
            SessionAbort::ConnectivityFailed => {
                Error::FatalConnectivity("peer connection failed".to_string())
            }
            SessionAbort::PipelineTerminated(reason) => Error::PipelineTerminated(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ice_state_classification() {
        assert!(IceConnectionState::from(RTCIceConnectionState::Completed).is_connected());
        assert!(IceConnectionState::Connected.is_connected());
        assert!(!IceConnectionState::Checking.is_connected());
        assert!(IceConnectionState::Failed.is_disconnected());
        assert!(!IceConnectionState::New.is_disconnected());
    }

    #[test]
    fn test_abort_errors_are_fatal() {
        assert!(SessionAbort::ConnectivityFailed.into_error().is_fatal());
        let err = SessionAbort::PipelineTerminated("track closed".to_string()).into_error();
        assert!(matches!(err, Error::PipelineTerminated(ref r) if r == "track closed"));
    }
}
