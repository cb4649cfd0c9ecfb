//! Connections to the voice provider.
//!
//! Both transports surface the same [`TransportEvent`]s so the session
//! state machine does not care whether it talks to a raw WebSocket or a
//! media room.

use crate::error::ClientError;
use crate::protocol::{
    AgentResponseEvent, InboundEvent, OutboundFrame, UserTranscriptEvent,
};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// Close code sent when the user ends the call.
pub const NORMAL_CLOSURE: u16 = 1000;

/// Close code reported for a close frame that carries no status.
pub const NO_STATUS_RECEIVED: u16 = 1005;

/// Close code reported when the connection drops without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Inbound(InboundEvent),
    /// The connection is gone. No further events follow.
    Closed { code: u16, reason: String },
}

#[async_trait]
pub trait Transport: Send {
    async fn open(&mut self) -> Result<(), ClientError>;

    async fn send(&mut self, frame: OutboundFrame) -> Result<(), ClientError>;

    /// Waits for the next event. Must be cancel safe.
    async fn next_event(&mut self) -> TransportEvent;

    /// Closes with a normal-closure code. Safe to call more than once.
    async fn close(&mut self, reason: &str) -> Result<(), ClientError>;
}

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Raw WebSocket to a signed provider URL.
pub struct WebSocketTransport {
    url: String,
    socket: Option<Socket>,
}

impl WebSocketTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            socket: None,
        }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(&mut self) -> Result<(), ClientError> {
        let (socket, _response) = connect_async(self.url.as_str()).await?;
        self.socket = Some(socket);
        tracing::info!("voice socket connected");
        Ok(())
    }

    async fn send(&mut self, frame: OutboundFrame) -> Result<(), ClientError> {
        let socket = self.socket.as_mut().ok_or(ClientError::NotConnected)?;
        socket.send(Message::Text(frame.to_json().into())).await?;
        Ok(())
    }

    async fn next_event(&mut self) -> TransportEvent {
        let Some(socket) = self.socket.as_mut() else {
            return TransportEvent::Closed {
                code: ABNORMAL_CLOSURE,
                reason: "not connected".to_string(),
            };
        };

        loop {
            match socket.next().await {
                Some(Ok(Message::Text(text))) => match InboundEvent::parse(text.as_str()) {
                    Ok(event) => return TransportEvent::Inbound(event),
                    Err(e) => tracing::warn!(error = %e, "unparseable provider frame"),
                },
                Some(Ok(Message::Close(frame))) => {
                    self.socket = None;
                    let (code, reason) = frame
                        .map(|f| (u16::from(f.code), f.reason.as_str().to_string()))
                        .unwrap_or((NO_STATUS_RECEIVED, String::new()));
                    return TransportEvent::Closed { code, reason };
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    self.socket = None;
                    return TransportEvent::Closed {
                        code: ABNORMAL_CLOSURE,
                        reason: e.to_string(),
                    };
                }
                None => {
                    self.socket = None;
                    return TransportEvent::Closed {
                        code: ABNORMAL_CLOSURE,
                        reason: String::new(),
                    };
                }
            }
        }
    }

    async fn close(&mut self, reason: &str) -> Result<(), ClientError> {
        let Some(mut socket) = self.socket.take() else {
            return Ok(());
        };
        socket
            .close(Some(CloseFrame {
                code: CloseCode::from(NORMAL_CLOSURE),
                reason: reason.to_string().into(),
            }))
            .await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

/// Events raised by a media-room connection.
#[derive(Debug, Clone, PartialEq)]
pub enum RoomEvent {
    TrackSubscribed(TrackKind),
    TrackUnsubscribed(TrackKind),
    /// A data-channel packet.
    DataReceived(Vec<u8>),
    Disconnected { reason: String },
}

/// A media-room client, such as a LiveKit SDK room.
///
/// Remote audio is rendered by the room itself; only state changes and
/// data packets reach the session.
#[async_trait]
pub trait RoomConnection: Send {
    async fn connect(&mut self, url: &str, token: &str) -> Result<(), ClientError>;

    /// `None` once the room is gone.
    async fn next_event(&mut self) -> Option<RoomEvent>;

    /// Publishes one base64 PCM16 microphone frame.
    async fn publish_audio(&mut self, frame: &str) -> Result<(), ClientError>;

    async fn disconnect(&mut self) -> Result<(), ClientError>;
}

#[derive(Debug, Deserialize)]
struct DataPacket {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    role: String,
    #[serde(default)]
    text: String,
}

/// Maps a room data packet onto a protocol event. Packets other than
/// transcripts are ignored.
fn transcript_event(payload: &[u8]) -> Option<InboundEvent> {
    let packet: DataPacket = serde_json::from_slice(payload).ok()?;
    if packet.kind != "transcript" || packet.text.is_empty() {
        return None;
    }
    match packet.role.as_str() {
        "agent" | "assistant" => Some(InboundEvent::AgentResponse {
            agent_response_event: AgentResponseEvent {
                agent_response: packet.text,
            },
        }),
        "user" => Some(InboundEvent::UserTranscript {
            user_transcript_event: UserTranscriptEvent {
                user_transcript: packet.text,
            },
        }),
        _ => None,
    }
}

/// Media-room transport.
#[derive(Debug)]
pub struct RoomTransport<R: RoomConnection> {
    room: R,
    url: String,
    token: String,
    connected: bool,
}

impl<R: RoomConnection> RoomTransport<R> {
    pub fn new(room: R, url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            room,
            url: url.into(),
            token: token.into(),
            connected: false,
        }
    }
}

#[async_trait]
impl<R: RoomConnection> Transport for RoomTransport<R> {
    async fn open(&mut self) -> Result<(), ClientError> {
        self.room.connect(&self.url, &self.token).await?;
        self.connected = true;
        tracing::info!("voice room connected");
        Ok(())
    }

    async fn send(&mut self, frame: OutboundFrame) -> Result<(), ClientError> {
        if !self.connected {
            return Err(ClientError::NotConnected);
        }
        match frame {
            OutboundFrame::UserAudio(chunk) => self.room.publish_audio(&chunk).await,
            // Rooms run their own keepalive.
            OutboundFrame::Pong { .. } => Ok(()),
        }
    }

    async fn next_event(&mut self) -> TransportEvent {
        loop {
            let Some(event) = self.room.next_event().await else {
                self.connected = false;
                return TransportEvent::Closed {
                    code: ABNORMAL_CLOSURE,
                    reason: String::new(),
                };
            };
            match event {
                RoomEvent::TrackSubscribed(TrackKind::Audio) => {
                    return TransportEvent::Inbound(InboundEvent::SpeechStart)
                }
                RoomEvent::TrackUnsubscribed(TrackKind::Audio) => {
                    return TransportEvent::Inbound(InboundEvent::SpeechEnd)
                }
                RoomEvent::DataReceived(payload) => {
                    if let Some(event) = transcript_event(&payload) {
                        return TransportEvent::Inbound(event);
                    }
                }
                RoomEvent::Disconnected { reason } => {
                    self.connected = false;
                    return TransportEvent::Closed {
                        code: NORMAL_CLOSURE,
                        reason,
                    };
                }
                RoomEvent::TrackSubscribed(_) | RoomEvent::TrackUnsubscribed(_) => {}
            }
        }
    }

    async fn close(&mut self, _reason: &str) -> Result<(), ClientError> {
        if !self.connected {
            return Ok(());
        }
        self.connected = false;
        self.room.disconnect().await
    }
}
