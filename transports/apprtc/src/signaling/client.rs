//! AppRTC signaling client
//!
//! REST calls go through one `reqwest::Client`; the relay socket is split so
//! that a pending read never blocks a write (bye, close).

use super::protocol::{
    self, Candidate, IceDescriptor, JoinResponse, MessageResponse, RelayCommand,
    SessionDescription, SessionParameters, RESULT_SUCCESS,
};
use crate::config::StreamerConfig;
use crate::session::RoomIdGenerator;
use crate::{Error, Result};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// One joined room: REST endpoints plus the registered relay socket
///
/// Exists only after a successful join. After `close()` every other
/// operation fails with `Error::StateError`.
pub struct SignalingSession {
    /// Parameters from the join response, never mutated
    params: SessionParameters,

    /// Origin without trailing slash
    origin: String,

    /// Servers used when the service returns an empty ICE list
    ice_fallback_servers: Vec<String>,

    http: reqwest::Client,

    /// Relay write half
    writer: Mutex<SplitSink<WsStream, Message>>,

    /// Relay read half, one consumer at a time
    reader: Mutex<SplitStream<WsStream>>,

    closed: AtomicBool,
}

impl SignalingSession {
    /// Join a room and open the relay socket
    ///
    /// Uses `config.room_id` when set, otherwise asks `room_ids` for one.
    /// A single attempt is made; a non-`SUCCESS` result fails with
    /// `Error::JoinRejected`. If the relay cannot be opened after a successful
    /// join, the room is left again before the error is returned.
    pub async fn join(config: &StreamerConfig, room_ids: &dyn RoomIdGenerator) -> Result<Self> {
        let origin = config.base_url().to_string();
        let room_id = config
            .room_id
            .clone()
            .unwrap_or_else(|| room_ids.next_room_id());

        let http = reqwest::Client::builder()
            .timeout(config.http_timeout())
            .build()
            .map_err(|e| Error::TransportError(format!("Failed to create HTTP client: {}", e)))?;

        let url = format!("{}/join/{}", origin, room_id);
        info!(room_id = %room_id, "Joining room: {}", url);

        let response = http.post(&url).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(Error::ServerError(format!(
                "join returned HTTP {}: {}",
                status, body
            )));
        }

        let join: JoinResponse = serde_json::from_str(&body)
            .map_err(|e| Error::MalformedMessage(format!("join response: {}", e)))?;
        let params = join.into_parameters()?;

        info!(
            room_id = %params.room_id(),
            client_id = %params.client_id(),
            "Joined room, opening relay {}",
            params.wss_url()
        );

        let socket = match connect_relay(params.wss_url(), &origin).await {
            Ok(socket) => socket,
            Err(e) => {
                warn!(
                    room_id = %params.room_id(),
                    client_id = %params.client_id(),
                    "Relay connection failed, leaving room: {}",
                    e
                );
                if let Err(leave_err) =
                    post_leave(&http, &origin, params.room_id(), params.client_id()).await
                {
                    warn!("Leave after failed relay connection also failed: {}", leave_err);
                }
                return Err(e);
            }
        };

        let (writer, reader) = socket.split();

        Ok(Self {
            params,
            origin,
            ice_fallback_servers: config.ice_fallback_servers.clone(),
            http,
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
            closed: AtomicBool::new(false),
        })
    }

    /// Parameters handed out by the join
    pub fn params(&self) -> &SessionParameters {
        &self.params
    }

    /// Joined room id
    pub fn room_id(&self) -> &str {
        self.params.room_id()
    }

    /// Client id assigned by the service
    pub fn client_id(&self) -> &str {
        self.params.client_id()
    }

    /// Shareable room link
    pub fn room_link(&self) -> &str {
        self.params.room_link()
    }

    /// Whether `close()` has run
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self, operation: &str) -> Result<()> {
        if self.is_closed() {
            return Err(Error::StateError(format!(
                "{} on a closed signaling session",
                operation
            )));
        }
        Ok(())
    }

    /// Bind the relay socket to this room and client
    ///
    /// The relay sends no acknowledgment.
    pub async fn register(&self) -> Result<()> {
        self.ensure_open("register")?;

        let command = RelayCommand::Register {
            roomid: self.room_id().to_string(),
            clientid: self.client_id().to_string(),
        };
        self.send_relay(command.to_json()?).await?;

        debug!(room_id = %self.room_id(), client_id = %self.client_id(), "Registered on relay");
        Ok(())
    }

    /// Fetch the ICE server list
    ///
    /// Independent of the join; may be called any number of times. An empty
    /// list is replaced by the configured fallback servers, if any.
    pub async fn fetch_ice_configuration(&self) -> Result<IceDescriptor> {
        self.ensure_open("fetch_ice_configuration")?;

        let url = self.params.ice_server_url();
        debug!("Fetching ICE configuration: {}", url);

        let response = self.http.post(url).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(Error::ServerError(format!(
                "ICE configuration returned HTTP {}",
                status
            )));
        }

        let descriptor: IceDescriptor = serde_json::from_str(&body)
            .map_err(|e| Error::MalformedMessage(format!("ICE configuration: {}", e)))?;

        if descriptor.is_empty() && !self.ice_fallback_servers.is_empty() {
            info!(
                "Service returned no ICE servers, using {} fallback server(s)",
                self.ice_fallback_servers.len()
            );
            return Ok(IceDescriptor::from_urls(&self.ice_fallback_servers));
        }

        Ok(descriptor)
    }

    /// Post the local offer
    pub async fn send_offer(&self, offer: &SessionDescription) -> Result<()> {
        self.ensure_open("send_offer")?;
        self.post_message(serde_json::to_string(offer)?).await
    }

    /// Post one local ICE candidate
    pub async fn send_candidate(&self, candidate: &Candidate) -> Result<()> {
        self.ensure_open("send_candidate")?;
        self.post_message(serde_json::to_string(candidate)?).await
    }

    async fn post_message(&self, body: String) -> Result<()> {
        let url = format!(
            "{}/message/{}/{}",
            self.origin,
            self.room_id(),
            self.client_id()
        );
        debug!("POST {} ({} bytes)", url, body.len());

        let response = self.http.post(&url).body(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::ServerError(format!(
                "message rejected with HTTP {}",
                status
            )));
        }

        let text = response.text().await?;
        match serde_json::from_str::<MessageResponse>(&text) {
            Ok(reply) if reply.result != RESULT_SUCCESS => Err(Error::ServerError(reply.result)),
            Ok(_) => Ok(()),
            Err(_) => {
                debug!("Message response is not a result object: {:?}", text);
                Ok(())
            }
        }
    }

    /// Read exactly one data frame from the relay and unwrap it
    ///
    /// Returns the inner payload text when its type equals `expected`.
    /// Nothing is buffered: a frame of another type is consumed and reported
    /// as `Error::UnexpectedMessageType`.
    pub async fn receive_message(&self, expected: &str) -> Result<String> {
        self.ensure_open("receive_message")?;

        let mut reader = self.reader.lock().await;
        loop {
            let text = match reader.next().await {
                Some(Ok(Message::Text(text))) => text,
                Some(Ok(Message::Binary(data))) => String::from_utf8(data).map_err(|e| {
                    Error::MalformedMessage(format!("relay frame is not UTF-8: {}", e))
                })?,
                Some(Ok(Message::Close(frame))) => {
                    return Err(Error::TransportError(format!(
                        "relay closed by peer: {:?}",
                        frame
                    )))
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
                None => return Err(Error::TransportError("relay stream ended".to_string())),
            };

            debug!("Relay frame: {}", text);
            return protocol::unwrap_frame(&text, expected);
        }
    }

    /// Read the remote answer
    pub async fn receive_answer(&self) -> Result<SessionDescription> {
        let payload = self.receive_message("answer").await?;
        serde_json::from_str(&payload)
            .map_err(|e| Error::MalformedMessage(format!("answer payload: {}", e)))
    }

    /// Block until the remote peer says bye
    ///
    /// Frames of other types and malformed payloads are discarded. Relay
    /// errors, server-reported errors and a closed socket are returned.
    pub async fn wait_for_bye(&self) -> Result<()> {
        loop {
            match self.receive_message("bye").await {
                Ok(_) => {
                    info!(room_id = %self.room_id(), "Remote peer said bye");
                    return Ok(());
                }
                Err(Error::UnexpectedMessageType { actual, .. }) => {
                    debug!("Ignoring '{}' while waiting for bye", actual);
                }
                Err(Error::MalformedMessage(reason)) => {
                    warn!("Ignoring malformed relay message: {}", reason);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Send bye to the remote peer over the relay
    pub async fn send_bye(&self) -> Result<()> {
        self.ensure_open("send_bye")?;
        self.send_relay(RelayCommand::bye()?.to_json()?).await
    }

    /// Leave the room; the response body is not inspected
    pub async fn leave(&self) -> Result<()> {
        self.ensure_open("leave")?;
        post_leave(&self.http, &self.origin, self.room_id(), self.client_id()).await
    }

    /// Release the relay resource and close the socket
    ///
    /// Both actions are attempted even if the first fails. Safe to call
    /// repeatedly and concurrently; only the first call does any work.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let mut errors = Vec::new();

        let url = format!(
            "{}/{}/{}",
            self.params.wss_post_url().trim_end_matches('/'),
            self.room_id(),
            self.client_id()
        );
        debug!("DELETE {}", url);
        match self.http.delete(&url).send().await {
            Ok(response) if !response.status().is_success() => {
                errors.push(Error::ServerError(format!(
                    "relay release returned HTTP {}",
                    response.status()
                )));
            }
            Ok(_) => {}
            Err(e) => errors.push(e.into()),
        }

        if let Err(e) = self.writer.lock().await.close().await {
            use tokio_tungstenite::tungstenite::Error as WsError;
            if !matches!(e, WsError::ConnectionClosed | WsError::AlreadyClosed) {
                errors.push(e.into());
            }
        }

        info!(
            room_id = %self.room_id(),
            client_id = %self.client_id(),
            failures = errors.len(),
            "Signaling session closed"
        );
        Error::aggregate(errors)
    }

    async fn send_relay(&self, text: String) -> Result<()> {
        debug!("Relay send: {}", text);
        self.writer.lock().await.send(Message::Text(text)).await?;
        Ok(())
    }
}

async fn connect_relay(wss_url: &str, origin: &str) -> Result<WsStream> {
    let mut request = wss_url.into_client_request()?;
    let origin = HeaderValue::from_str(origin)
        .map_err(|e| Error::InvalidConfig(format!("origin is not a valid header value: {}", e)))?;
    request.headers_mut().insert("Origin", origin);

    let (socket, _) = connect_async(request).await?;
    Ok(socket)
}

async fn post_leave(
    http: &reqwest::Client,
    origin: &str,
    room_id: &str,
    client_id: &str,
) -> Result<()> {
    let url = format!("{}/leave/{}/{}", origin, room_id, client_id);
    debug!("POST {}", url);

    let response = http.post(&url).send().await?;
    if !response.status().is_success() {
        return Err(Error::ServerError(format!(
            "leave returned HTTP {}",
            response.status()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_secure_relay_url_reaches_tls_handshake() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        // Read the ClientHello, then hang up mid-handshake
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 512];
            stream.read(&mut buf).await.unwrap()
        });

        let url = format!("wss://127.0.0.1:{}/ws", port);
        let result = connect_relay(&url, "https://appr.tc").await;

        let hello_len = server.await.unwrap();
        assert!(hello_len > 0, "no TLS ClientHello was sent");

        match result {
            Err(Error::TransportError(reason)) => {
                assert!(!reason.contains("TLS support not compiled in"), "{}", reason)
            }
            Err(other) => panic!("expected a transport error, got {:?}", other),
            Ok(_) => panic!("handshake with a plain TCP listener cannot succeed"),
        }
    }

    #[tokio::test]
    async fn test_invalid_origin_is_a_config_error() {
        let result = connect_relay("ws://127.0.0.1:9/ws", "https://bad\norigin").await;
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }
}
