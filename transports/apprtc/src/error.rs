//! Error types for the AppRTC streamer

use crate::session::SessionStep;

/// Result type alias using the streamer Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while signaling, negotiating or streaming
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Network or socket failure (HTTP request, relay connection)
    #[error("Transport error: {0}")]
    TransportError(String),

    /// Join answered with a result other than SUCCESS
    #[error("Join rejected by signaling service: {0}")]
    JoinRejected(String),

    /// Signaling service reported an error (relay `error` field, HTTP status, message result)
    #[error("Signaling service error: {0}")]
    ServerError(String),

    /// Inbound relay payload carried a different type than the one awaited
    #[error("Unexpected message type: expected {expected}, got {actual}")]
    UnexpectedMessageType {
        /// Type tag the caller waited for
        expected: String,
        /// Type tag actually received
        actual: String,
    },

    /// Envelope or payload could not be decoded
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// Operation invoked in an invalid order (double open, answer before offer, use after close)
    #[error("Invalid state: {0}")]
    StateError(String),

    /// Transport engine reported the connection as failed
    #[error("Fatal connectivity failure: {0}")]
    FatalConnectivity(String),

    /// Streaming pipeline terminated while the session was active
    #[error("Streaming pipeline terminated: {0}")]
    PipelineTerminated(String),

    /// Session interrupted by an external shutdown request
    #[error("Session interrupted: {0}")]
    Interrupted(String),

    /// SDP negotiation error
    #[error("SDP negotiation error: {0}")]
    SdpError(String),

    /// Media track error
    #[error("Media track error: {0}")]
    MediaTrackError(String),

    /// Frame capture error
    #[error("Capture error: {0}")]
    CaptureError(String),

    /// Frame encoding error
    #[error("Encoding error: {0}")]
    EncodingError(String),

    /// WebRTC library error
    #[error("WebRTC error: {0}")]
    WebRtcError(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Several independent actions failed (e.g. relay DELETE and socket close)
    #[error("{} errors: {}", .0.len(), join_errors(.0))]
    Multiple(Vec<Error>),

    /// A sequencer step failed; carries enough context to find the session in service logs
    #[error("step {step} failed (room={room_id}, client={client_id}): {source}")]
    SessionStep {
        /// Failing step
        step: SessionStep,
        /// Room the session joined (or attempted to join)
        room_id: String,
        /// Client id assigned by the service, `-` before Join succeeded
        client_id: String,
        /// Underlying failure
        #[source]
        source: Box<Error>,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

fn join_errors(errors: &[Error]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    /// Collapse a list of failures: none is `Ok`, one is returned as-is, more become `Multiple`
    pub fn aggregate(mut errors: Vec<Error>) -> Result<()> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(Error::Multiple(errors)),
        }
    }

    /// Innermost error, looking through step context
    pub fn root(&self) -> &Error {
        match self {
            Error::SessionStep { source, .. } => source.root(),
            other => other,
        }
    }

    /// Check if this error is a signaling protocol violation
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self.root(),
            Error::JoinRejected(_)
                | Error::ServerError(_)
                | Error::UnexpectedMessageType { .. }
                | Error::MalformedMessage(_)
        )
    }

    /// Check if this error is a network/socket failure
    pub fn is_transport_error(&self) -> bool {
        matches!(self.root(), Error::TransportError(_) | Error::IoError(_))
    }

    /// Check if this error is an invalid call ordering
    pub fn is_state_error(&self) -> bool {
        matches!(self.root(), Error::StateError(_))
    }

    /// Check if this error ends the session without any recovery path
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.root(),
            Error::FatalConnectivity(_) | Error::PipelineTerminated(_) | Error::Interrupted(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::SerializationError(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::TransportError(e.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::TransportError(format!("relay: {}", e))
    }
}

impl From<webrtc::Error> for Error {
    fn from(e: webrtc::Error) -> Self {
        Error::WebRtcError(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::JoinRejected("FULL".to_string());
        assert_eq!(err.to_string(), "Join rejected by signaling service: FULL");
    }

    #[test]
    fn test_classification() {
        assert!(Error::ServerError("ROOM_FULL".to_string()).is_protocol_error());
        assert!(Error::MalformedMessage("x".to_string()).is_protocol_error());
        assert!(Error::TransportError("reset".to_string()).is_transport_error());
        assert!(Error::StateError("twice".to_string()).is_state_error());
        assert!(Error::FatalConnectivity("failed".to_string()).is_fatal());
        assert!(!Error::StateError("twice".to_string()).is_fatal());
    }

    #[test]
    fn test_classification_sees_through_step_context() {
        let err = Error::SessionStep {
            step: SessionStep::ReceiveAnswer,
            room_id: "room-42".to_string(),
            client_id: "c1".to_string(),
            source: Box::new(Error::ServerError("ROOM_FULL".to_string())),
        };
        assert!(err.is_protocol_error());
        assert_eq!(
            err.to_string(),
            "step receive-answer failed (room=room-42, client=c1): Signaling service error: ROOM_FULL"
        );
    }

    #[test]
    fn test_aggregate() {
        assert!(Error::aggregate(vec![]).is_ok());

        let single = Error::aggregate(vec![Error::TransportError("a".to_string())]);
        assert!(matches!(single, Err(Error::TransportError(_))));

        let multiple = Error::aggregate(vec![
            Error::TransportError("a".to_string()),
            Error::TransportError("b".to_string()),
        ])
        .unwrap_err();
        assert_eq!(
            multiple.to_string(),
            "2 errors: Transport error: a; Transport error: b"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = Error::from(io_err);
        assert!(matches!(err, Error::IoError(_)));
        assert!(err.is_transport_error());
    }
}
