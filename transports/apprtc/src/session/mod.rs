//! Session lifecycle
//!
//! The sequencer composes signaling, peer connection and pipeline into one
//! scripted session. Room ids come from an injected generator.

pub mod room_id;
pub mod sequencer;

pub use crate::peer::SessionAbort;
pub use room_id::{FixedRoomId, RandomRoomIds, RoomIdGenerator};
pub use sequencer::{SessionReport, SessionSequencer};

use std::fmt;

/// One step of the session script, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionStep {
    /// Join the room over REST
    Join,
    /// Fetch the ICE server list
    FetchIceConfiguration,
    /// Register on the relay
    Register,
    /// Create the local offer
    Open,
    /// Post the offer
    SendOffer,
    /// Wait for candidate gathering to complete
    GatherCandidates,
    /// Post every gathered candidate
    SendCandidates,
    /// Hand the room link to the caller
    PublishRoomLink,
    /// Read the remote answer from the relay
    ReceiveAnswer,
    /// Commit the remote answer
    SetAnswer,
    /// Stream until the remote peer says bye
    WaitForBye,
    /// Tell the remote peer we are leaving
    SendBye,
    /// Stop streaming and close the peer connection
    ClosePeer,
    /// Leave the room over REST
    Leave,
    /// Release the relay resource and socket
    Close,
}

impl SessionStep {
    /// Kebab-case name used in logs and error messages
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStep::Join => "join",
            SessionStep::FetchIceConfiguration => "fetch-ice-configuration",
            SessionStep::Register => "register",
            SessionStep::Open => "open",
            SessionStep::SendOffer => "send-offer",
            SessionStep::GatherCandidates => "gather-candidates",
            SessionStep::SendCandidates => "send-candidates",
            SessionStep::PublishRoomLink => "publish-room-link",
            SessionStep::ReceiveAnswer => "receive-answer",
            SessionStep::SetAnswer => "set-answer",
            SessionStep::WaitForBye => "wait-for-bye",
            SessionStep::SendBye => "send-bye",
            SessionStep::ClosePeer => "close-peer",
            SessionStep::Leave => "leave",
            SessionStep::Close => "close",
        }
    }
}

impl fmt::Display for SessionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
