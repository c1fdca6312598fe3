//! Signaling with an AppRTC-style room service
//!
//! REST join / leave / message endpoints plus a WebSocket relay for inbound
//! answer and bye messages.

pub mod client;
pub mod protocol;

pub use client::SignalingSession;
pub use protocol::{Candidate, IceDescriptor, IceServer, SdpKind, SessionDescription, SessionParameters};
