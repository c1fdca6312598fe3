//! AppRTC wire format
//!
//! REST responses, relay directives and the two-level relay envelope. Field
//! names and encodings match what the room service expects byte-for-byte.

use crate::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

/// Result code of a successful join / message call
pub const RESULT_SUCCESS: &str = "SUCCESS";

/// Session parameters handed out by a successful join
///
/// Immutable once obtained: there are no setters and the signaling session
/// holds them by value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionParameters {
    client_id: String,
    ice_server_url: String,
    room_id: String,
    room_link: String,
    wss_post_url: String,
    wss_url: String,
}

impl SessionParameters {
    /// Client id assigned by the service
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// URL returning the ICE server list
    pub fn ice_server_url(&self) -> &str {
        &self.ice_server_url
    }

    /// Joined room
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Shareable link the remote peer opens to join the room
    pub fn room_link(&self) -> &str {
        &self.room_link
    }

    /// Base URL of the per-client relay resource
    pub fn wss_post_url(&self) -> &str {
        &self.wss_post_url
    }

    /// Relay WebSocket URL
    pub fn wss_url(&self) -> &str {
        &self.wss_url
    }
}

/// Response of `POST /join/{room}`
#[derive(Debug, Deserialize)]
pub struct JoinResponse {
    /// Parameters, decoded only when the result is `SUCCESS`
    #[serde(default)]
    pub params: Option<serde_json::Value>,
    /// `SUCCESS` or the reason for rejection (e.g. `FULL`)
    pub result: String,
}

impl JoinResponse {
    /// Turn the response into parameters, failing on any non-success result
    pub fn into_parameters(self) -> Result<SessionParameters> {
        if self.result != RESULT_SUCCESS {
            return Err(Error::JoinRejected(self.result));
        }

        let params = self.params.ok_or_else(|| {
            Error::MalformedMessage("join succeeded without params".to_string())
        })?;
        serde_json::from_value(params)
            .map_err(|e| Error::MalformedMessage(format!("join params: {}", e)))
    }
}

/// Response of `POST /message/{room}/{client}`
#[derive(Debug, Deserialize)]
pub(crate) struct MessageResponse {
    pub result: String,
}

/// One ICE server entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    /// STUN/TURN URLs (the service sends either a string or a list)
    #[serde(deserialize_with = "one_or_many")]
    pub urls: Vec<String>,
    /// TURN username
    #[serde(default)]
    pub username: String,
    /// TURN credential
    #[serde(default)]
    pub credential: String,
}

/// ICE server list returned by the ICE configuration endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceDescriptor {
    /// Servers in the order the service returned them
    #[serde(rename = "iceServers", default)]
    pub ice_servers: Vec<IceServer>,
}

impl IceDescriptor {
    /// Descriptor made of plain STUN/TURN URLs without credentials
    pub fn from_urls(urls: &[String]) -> Self {
        Self {
            ice_servers: urls
                .iter()
                .map(|url| IceServer {
                    urls: vec![url.clone()],
                    username: String::new(),
                    credential: String::new(),
                })
                .collect(),
        }
    }

    /// Whether no server was returned
    pub fn is_empty(&self) -> bool {
        self.ice_servers.is_empty()
    }

    /// Convert into the transport engine's representation
    pub fn to_rtc_ice_servers(&self) -> Vec<RTCIceServer> {
        self.ice_servers
            .iter()
            .map(|server| {
                #[allow(clippy::needless_update)]
                RTCIceServer {
                    urls: server.urls.clone(),
                    username: server.username.clone(),
                    credential: server.credential.clone(),
                    ..Default::default()
                }
            })
            .collect()
    }
}

fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(url) => vec![url],
        OneOrMany::Many(urls) => urls,
    })
}

/// ICE candidate as exchanged with the room service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "candidate", try_from = "TaggedCandidate")]
pub struct Candidate {
    /// m-line index
    pub label: u16,
    /// Media stream identification (mid)
    pub id: String,
    /// Candidate attribute line
    pub candidate: String,
}

impl Candidate {
    /// Build from the transport engine's candidate init
    pub fn from_init(
        init: webrtc::ice_transport::ice_candidate::RTCIceCandidateInit,
    ) -> Self {
        Self {
            label: init.sdp_mline_index.unwrap_or_default(),
            id: init.sdp_mid.unwrap_or_default(),
            candidate: init.candidate,
        }
    }
}

/// Inbound candidate shape; the `type` tag must be `candidate`
#[derive(Deserialize)]
struct TaggedCandidate {
    #[serde(rename = "type")]
    kind: String,
    label: u16,
    id: String,
    candidate: String,
}

impl TryFrom<TaggedCandidate> for Candidate {
    type Error = String;

    fn try_from(tagged: TaggedCandidate) -> std::result::Result<Self, String> {
        if tagged.kind != "candidate" {
            return Err(format!("expected type \"candidate\", got \"{}\"", tagged.kind));
        }
        Ok(Self {
            label: tagged.label,
            id: tagged.id,
            candidate: tagged.candidate,
        })
    }
}

/// SDP type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    /// Offer
    Offer,
    /// Provisional answer
    Pranswer,
    /// Final answer
    Answer,
    /// Rollback
    Rollback,
}

/// Opaque session description
///
/// Only produced by the transport engine or parsed from the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    kind: SdpKind,
    sdp: String,
}

impl SessionDescription {
    /// SDP type
    pub fn kind(&self) -> SdpKind {
        self.kind
    }

    /// SDP text
    pub fn sdp(&self) -> &str {
        &self.sdp
    }

    /// Convert into the transport engine's representation
    pub fn to_rtc(&self) -> Result<RTCSessionDescription> {
        let sdp = self.sdp.clone();
        let description = match self.kind {
            SdpKind::Offer => RTCSessionDescription::offer(sdp),
            SdpKind::Pranswer => RTCSessionDescription::pranswer(sdp),
            SdpKind::Answer => RTCSessionDescription::answer(sdp),
            SdpKind::Rollback => {
                return Err(Error::SdpError(
                    "rollback descriptions are not negotiated".to_string(),
                ))
            }
        };

        description.map_err(|e| Error::SdpError(format!("invalid {:?} SDP: {}", self.kind, e)))
    }
}

impl TryFrom<&RTCSessionDescription> for SessionDescription {
    type Error = Error;

    fn try_from(desc: &RTCSessionDescription) -> Result<Self> {
        let kind = match desc.sdp_type {
            RTCSdpType::Offer => SdpKind::Offer,
            RTCSdpType::Pranswer => SdpKind::Pranswer,
            RTCSdpType::Answer => SdpKind::Answer,
            RTCSdpType::Rollback => SdpKind::Rollback,
            RTCSdpType::Unspecified => {
                return Err(Error::SdpError("unspecified SDP type".to_string()))
            }
        };

        Ok(Self {
            kind,
            sdp: desc.sdp.clone(),
        })
    }
}

/// Directive sent over the relay socket
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "cmd", rename_all = "lowercase")]
pub enum RelayCommand {
    /// Bind the socket to a room/client pair
    Register {
        /// Room id
        roomid: String,
        /// Client id
        clientid: String,
    },
    /// Forward a string payload to the other room member
    Send {
        /// JSON text of the payload (string, not a nested object)
        msg: String,
    },
}

impl RelayCommand {
    /// `send` directive carrying a string-encoded `{"type":"bye"}`
    pub fn bye() -> Result<Self> {
        let msg = serde_json::to_string(&InnerMessage {
            kind: "bye".to_string(),
        })?;
        Ok(RelayCommand::Send { msg })
    }

    /// Serialize to JSON text
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Outer envelope of every relay frame
#[derive(Debug, Clone, Deserialize)]
pub struct InboundFrame {
    /// JSON text of the inner payload
    #[serde(default)]
    pub msg: String,
    /// Error reported by the relay, empty on success
    #[serde(default)]
    pub error: String,
}

/// Type tag of an inner payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InnerMessage {
    /// Payload type (`answer`, `candidate`, `bye`, ...)
    #[serde(rename = "type")]
    pub kind: String,
}

/// Unwrap one relay frame, checking the error field and the inner type tag
///
/// Returns the inner payload text on success.
pub fn unwrap_frame(frame: &str, expected: &str) -> Result<String> {
    let outer: InboundFrame = serde_json::from_str(frame)
        .map_err(|e| Error::MalformedMessage(format!("relay frame: {}", e)))?;

    if !outer.error.is_empty() {
        return Err(Error::ServerError(outer.error));
    }

    let inner: InnerMessage = serde_json::from_str(&outer.msg)
        .map_err(|e| Error::MalformedMessage(format!("relay payload: {}", e)))?;

    if inner.kind != expected {
        return Err(Error::UnexpectedMessageType {
            expected: expected.to_string(),
            actual: inner.kind,
        });
    }

    Ok(outer.msg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_response_success() {
        let json = r#"{
            "params": {
                "client_id": "c1",
                "ice_server_url": "https://appr.tc/v1alpha/iceconfig?key=",
                "room_id": "room-42",
                "room_link": "https://appr.tc/r/room-42",
                "wss_post_url": "https://apprtc-ws.webrtc.org:443",
                "wss_url": "wss://apprtc-ws.webrtc.org:443/ws",
                "is_initiator": "true"
            },
            "result": "SUCCESS"
        }"#;

        let response: JoinResponse = serde_json::from_str(json).unwrap();
        let params = response.into_parameters().unwrap();
        assert_eq!(params.room_id(), "room-42");
        assert_eq!(params.client_id(), "c1");
        assert_eq!(params.wss_url(), "wss://apprtc-ws.webrtc.org:443/ws");
    }

    #[test]
    fn test_join_response_rejected_yields_no_parameters() {
        for result in ["FULL", "ERROR", "success", ""] {
            let json = format!(r#"{{"result": "{}", "params": {{}}}}"#, result);
            let response: JoinResponse = serde_json::from_str(&json).unwrap();
            match response.into_parameters() {
                Err(Error::JoinRejected(reason)) => assert_eq!(reason, result),
                other => panic!("expected rejection for {:?}, got {:?}", result, other),
            }
        }
    }

    #[test]
    fn test_join_response_success_without_params_is_malformed() {
        let response: JoinResponse = serde_json::from_str(r#"{"result": "SUCCESS"}"#).unwrap();
        assert!(matches!(
            response.into_parameters(),
            Err(Error::MalformedMessage(_))
        ));
    }

    #[test]
    fn test_register_encoding() {
        let cmd = RelayCommand::Register {
            roomid: "room-42".to_string(),
            clientid: "c1".to_string(),
        };
        assert_eq!(
            cmd.to_json().unwrap(),
            r#"{"cmd":"register","roomid":"room-42","clientid":"c1"}"#
        );
    }

    #[test]
    fn test_bye_is_double_encoded() {
        let cmd = RelayCommand::bye().unwrap();
        assert_eq!(
            cmd.to_json().unwrap(),
            r#"{"cmd":"send","msg":"{\"type\":\"bye\"}"}"#
        );
    }

    #[test]
    fn test_candidate_encoding() {
        let candidate = Candidate {
            label: 3,
            id: "video0".to_string(),
            candidate: "candidate:1 1 UDP 2122252543 192.168.1.2 54321 typ host".to_string(),
        };
        assert_eq!(
            serde_json::to_string(&candidate).unwrap(),
            r#"{"type":"candidate","label":3,"id":"video0","candidate":"candidate:1 1 UDP 2122252543 192.168.1.2 54321 typ host"}"#
        );
    }

    #[test]
    fn test_candidate_round_trip() {
        let candidate = Candidate {
            label: 3,
            id: "video0".to_string(),
            candidate: "candidate:1 1 UDP...".to_string(),
        };
        let wire = serde_json::to_string(&candidate).unwrap();
        let parsed: Candidate = serde_json::from_str(&wire).unwrap();
        assert_eq!(parsed, candidate);
    }

    #[test]
    fn test_candidate_rejects_other_type_tag() {
        let json = r#"{"type":"answer","label":0,"id":"0","candidate":"x"}"#;
        assert!(serde_json::from_str::<Candidate>(json).is_err());
    }

    #[test]
    fn test_unwrap_frame_server_error() {
        let frame = r#"{"msg":"","error":"ROOM_FULL"}"#;
        match unwrap_frame(frame, "answer") {
            Err(Error::ServerError(reason)) => assert_eq!(reason, "ROOM_FULL"),
            other => panic!("expected server error, got {:?}", other),
        }
    }

    #[test]
    fn test_unwrap_frame_type_mismatch() {
        let frame = r#"{"msg":"{\"type\":\"candidate\",\"label\":0}","error":""}"#;
        match unwrap_frame(frame, "bye") {
            Err(Error::UnexpectedMessageType { expected, actual }) => {
                assert_eq!(expected, "bye");
                assert_eq!(actual, "candidate");
            }
            other => panic!("expected type mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_unwrap_frame_malformed() {
        assert!(matches!(
            unwrap_frame("not json", "bye"),
            Err(Error::MalformedMessage(_))
        ));
        assert!(matches!(
            unwrap_frame(r#"{"msg":"{oops","error":""}"#, "bye"),
            Err(Error::MalformedMessage(_))
        ));
    }

    #[test]
    fn test_unwrap_frame_returns_inner_payload() {
        let frame = r#"{"msg":"{\"type\":\"answer\",\"sdp\":\"v=0\\r\\n\"}","error":""}"#;
        let inner = unwrap_frame(frame, "answer").unwrap();
        let desc: SessionDescription = serde_json::from_str(&inner).unwrap();
        assert_eq!(desc.kind(), SdpKind::Answer);
        assert_eq!(desc.sdp(), "v=0\r\n");
    }

    #[test]
    fn test_ice_descriptor_parsing() {
        let json = r#"{
            "iceServers": [
                {"urls": ["stun:stun.l.google.com:19302"]},
                {"urls": "turn:turn.example.org:3478", "username": "u", "credential": "p"}
            ]
        }"#;
        let ice: IceDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(ice.ice_servers.len(), 2);
        assert_eq!(ice.ice_servers[1].urls, vec!["turn:turn.example.org:3478"]);

        let rtc = ice.to_rtc_ice_servers();
        assert_eq!(rtc[1].username, "u");
        assert_eq!(rtc[1].credential, "p");
    }

    #[test]
    fn test_session_description_wire_shape() {
        let wire = r#"{"type":"offer","sdp":"v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n"}"#;
        let desc: SessionDescription = serde_json::from_str(wire).unwrap();
        assert_eq!(serde_json::to_string(&desc).unwrap(), wire);

        let rtc = desc.to_rtc().unwrap();
        assert_eq!(rtc.sdp_type, RTCSdpType::Offer);
        assert_eq!(rtc.sdp, desc.sdp());
    }

    #[test]
    fn test_to_rtc_rejects_truncated_sdp() {
        let desc: SessionDescription =
            serde_json::from_str(r#"{"type":"answer","sdp":"v=0"}"#).unwrap();
        assert!(matches!(desc.to_rtc(), Err(Error::SdpError(_))));
    }

    #[test]
    fn test_candidate_missing_tag_is_rejected() {
        let json = r#"{"label":0,"id":"0","candidate":"x"}"#;
        assert!(serde_json::from_str::<Candidate>(json).is_err());
    }
}
