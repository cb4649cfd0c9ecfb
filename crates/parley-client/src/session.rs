//! The client-side protocol state machine.

use crate::capture::{CaptureWorker, FrameReceiver};
use crate::codec::decode_chunk;
use crate::error::ClientError;
use crate::playback::{AudioOutput, Completion, PlaybackQueue, Ticket};
use crate::protocol::{InboundEvent, OutboundFrame};
use crate::transport::{Transport, TransportEvent, ABNORMAL_CLOSURE, NORMAL_CLOSURE};
use parley_types::{Role, TranscriptMessage};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

/// Whose turn it is while connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Turn {
    /// The agent is waiting for the user.
    Listening,
    /// Agent audio is playing.
    Speaking,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Connected(Turn),
    Closed { code: u16, reason: String },
}

/// Outcome of a finished session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub close_code: u16,
    pub close_reason: String,
    /// Human-readable meaning of `close_code`.
    pub description: &'static str,
    /// Lines in chronological order.
    pub transcript: Vec<TranscriptMessage>,
    /// Conversation id assigned by the provider, if it announced one.
    pub provider_conversation_id: Option<String>,
}

impl SessionSummary {
    /// Whether the user should be offered a reconnect.
    pub fn is_connection_lost(&self) -> bool {
        self.close_code != NORMAL_CLOSURE
    }
}

/// Meaning of a WebSocket close code.
pub fn close_reason_text(code: u16) -> &'static str {
    match code {
        1000 => "Normal closure",
        1001 => "Going away",
        1002 => "Protocol error",
        1003 => "Unsupported data",
        1005 => "No status received",
        1006 => "Abnormal closure",
        1007 => "Invalid frame payload data",
        1008 => "Policy violation",
        1009 => "Message too big",
        1011 => "Server error",
        1012 => "Service restart",
        1013 => "Try again later",
        1014 => "Bad gateway",
        1015 => "TLS handshake failure",
        _ => "Unknown reason",
    }
}

const USER_ENDED: &str = "User ended session";
const TIME_LIMIT: &str = "Maximum session duration reached";

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

async fn next_frame(frames: &mut Option<FrameReceiver>) -> Option<String> {
    match frames {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Owns one live voice call: transport, playback, capture and transcript.
pub struct ProtocolSession<T: Transport, O: AudioOutput> {
    transport: T,
    playback: PlaybackQueue<O>,
    completions: mpsc::UnboundedReceiver<Ticket>,
    capture: Option<CaptureWorker>,
    frames: Option<FrameReceiver>,
    state: watch::Sender<SessionState>,
    transcript: Vec<TranscriptMessage>,
    provider_conversation_id: Option<String>,
    cancel: CancellationToken,
    max_duration: Option<Duration>,
    released: bool,
}

impl<T: Transport, O: AudioOutput> ProtocolSession<T, O> {
    /// `completions` carries the tickets `output` reports when a chunk ends.
    pub fn new(transport: T, output: O, completions: mpsc::UnboundedReceiver<Ticket>) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        Self {
            transport,
            playback: PlaybackQueue::new(output),
            completions,
            capture: None,
            frames: None,
            state,
            transcript: Vec::new(),
            provider_conversation_id: None,
            cancel: CancellationToken::new(),
            max_duration: None,
            released: false,
        }
    }

    /// Streams microphone frames from `worker` while connected.
    pub fn with_capture(mut self, worker: CaptureWorker, frames: FrameReceiver) -> Self {
        self.capture = Some(worker);
        self.frames = Some(frames);
        self
    }

    pub fn with_max_duration(mut self, limit: Duration) -> Self {
        self.max_duration = Some(limit);
        self
    }

    /// Cancelling this token ends the call with a normal closure.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Transcript so far, in chronological order.
    pub fn transcript(&self) -> Vec<TranscriptMessage> {
        let mut lines = self.transcript.clone();
        lines.sort_by(TranscriptMessage::chronological);
        lines
    }

    pub fn playback(&self) -> &PlaybackQueue<O> {
        &self.playback
    }

    /// Connects and drives the call until it closes or is cancelled.
    pub async fn run(&mut self) -> Result<SessionSummary, ClientError> {
        self.state.send_replace(SessionState::Connecting);
        if let Err(e) = self.transport.open().await {
            tracing::warn!(error = %e, "voice connection failed");
            self.state.send_replace(SessionState::Closed {
                code: ABNORMAL_CLOSURE,
                reason: e.to_string(),
            });
            self.release();
            return Err(e);
        }
        self.state
            .send_replace(SessionState::Connected(Turn::Listening));

        let cancel = self.cancel.clone();
        let deadline = self.max_duration;
        let time_limit = async move {
            match deadline {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(time_limit);

        let (code, reason) = loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.close_transport(USER_ENDED).await;
                    break (NORMAL_CLOSURE, USER_ENDED.to_string());
                }
                _ = &mut time_limit => {
                    tracing::info!("voice session reached its time limit");
                    self.close_transport(TIME_LIMIT).await;
                    break (NORMAL_CLOSURE, TIME_LIMIT.to_string());
                }
                event = self.transport.next_event() => match event {
                    TransportEvent::Inbound(event) => self.handle_inbound(event).await,
                    TransportEvent::Closed { code, reason } => break (code, reason),
                },
                Some(ticket) = self.completions.recv() => self.handle_completion(ticket),
                frame = next_frame(&mut self.frames) => match frame {
                    Some(frame) => self.send_audio(frame).await,
                    None => self.frames = None,
                },
            }
        };

        let description = close_reason_text(code);
        if code == NORMAL_CLOSURE {
            tracing::info!(code, reason = %reason, "voice session closed");
        } else {
            tracing::warn!(code, reason = %reason, description, "voice connection lost");
        }

        self.state.send_replace(SessionState::Closed {
            code,
            reason: reason.clone(),
        });
        self.release();

        Ok(SessionSummary {
            close_code: code,
            close_reason: reason,
            description,
            transcript: self.transcript(),
            provider_conversation_id: self.provider_conversation_id.clone(),
        })
    }

    /// Stops capture and playback and closes the output. Idempotent.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Some(worker) = self.capture.as_mut() {
            worker.stop();
        }
        self.frames = None;
        self.playback.close();
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    async fn close_transport(&mut self, reason: &str) {
        if let Err(e) = self.transport.close(reason).await {
            tracing::debug!(error = %e, "close handshake failed");
        }
    }

    fn set_turn(&self, turn: Turn) {
        self.state.send_if_modified(|state| match state {
            SessionState::Connected(current) if *current != turn => {
                *current = turn;
                true
            }
            _ => false,
        });
    }

    fn record(&mut self, role: Role, text: String) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        self.transcript
            .push(TranscriptMessage::new(role, text, now_ms()));
    }

    async fn handle_inbound(&mut self, event: InboundEvent) {
        match event {
            InboundEvent::Ping { ping_event } => {
                tracing::trace!(event_id = %ping_event.event_id, "ping");
                let pong = OutboundFrame::Pong {
                    event_id: ping_event.event_id,
                };
                if let Err(e) = self.transport.send(pong).await {
                    tracing::warn!(error = %e, "failed to answer ping");
                }
            }
            InboundEvent::Audio { audio_event } => {
                match decode_chunk(&audio_event.audio_base_64) {
                    Ok(samples) => {
                        if let Err(e) = self.playback.enqueue(samples) {
                            tracing::warn!(error = %e, "failed to start playback");
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "dropping undecodable audio chunk"),
                }
                if !self.playback.is_idle() {
                    self.set_turn(Turn::Speaking);
                }
            }
            InboundEvent::UserTranscript {
                user_transcript_event,
            } => self.record(Role::User, user_transcript_event.user_transcript),
            InboundEvent::AgentResponse {
                agent_response_event,
            } => self.record(Role::Assistant, agent_response_event.agent_response),
            InboundEvent::Interruption => {
                tracing::debug!("interrupted by user");
                self.playback.flush();
                self.set_turn(Turn::Listening);
            }
            InboundEvent::SpeechStart => self.set_turn(Turn::Speaking),
            InboundEvent::SpeechEnd => {
                if self.playback.is_idle() {
                    self.set_turn(Turn::Listening);
                }
            }
            InboundEvent::ConversationInitiationMetadata {
                conversation_initiation_metadata_event,
            } => {
                let id = conversation_initiation_metadata_event.conversation_id;
                tracing::info!(provider_conversation_id = %id, "provider conversation started");
                self.provider_conversation_id = Some(id);
            }
            other => tracing::trace!(event = ?other, "ignored frame"),
        }
    }

    fn handle_completion(&mut self, ticket: Ticket) {
        match self.playback.on_ended(ticket) {
            Ok(Completion::Drained) => self.set_turn(Turn::Listening),
            Ok(Completion::Continued | Completion::Stale) => {}
            Err(e) => {
                tracing::warn!(error = %e, "playback failed, discarding queue");
                self.playback.flush();
                self.set_turn(Turn::Listening);
            }
        }
    }

    async fn send_audio(&mut self, frame: String) {
        if let Err(e) = self.transport.send(OutboundFrame::UserAudio(frame)).await {
            tracing::debug!(error = %e, "dropping microphone frame");
        }
    }
}

impl<T: Transport, O: AudioOutput> Drop for ProtocolSession<T, O> {
    fn drop(&mut self) {
        self.release();
    }
}
