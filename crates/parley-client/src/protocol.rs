//! JSON frames exchanged with a conversational voice provider.

use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PingEvent {
    /// Echoed back verbatim in the pong.
    pub event_id: Value,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AudioEvent {
    pub audio_base_64: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UserTranscriptEvent {
    pub user_transcript: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AgentResponseEvent {
    pub agent_response: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InitiationMetadataEvent {
    pub conversation_id: String,
}

/// An inbound frame, tagged by its `type` field.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEvent {
    Ping {
        ping_event: PingEvent,
    },
    Audio {
        audio_event: AudioEvent,
    },
    UserTranscript {
        user_transcript_event: UserTranscriptEvent,
    },
    AgentResponse {
        agent_response_event: AgentResponseEvent,
    },
    /// The user talked over the agent; queued agent audio is obsolete.
    Interruption,
    #[serde(rename = "speech-start", alias = "agent_response_start")]
    SpeechStart,
    #[serde(rename = "speech-end", alias = "agent_response_end")]
    SpeechEnd,
    ConversationInitiationMetadata {
        conversation_initiation_metadata_event: InitiationMetadataEvent,
    },
    VadScore,
    InternalTentativeAgentResponse,
    /// Any type this client does not know.
    #[serde(other)]
    Unknown,
}

impl InboundEvent {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Frames that carry nothing this client acts on.
    pub fn is_ignored(&self) -> bool {
        matches!(
            self,
            Self::VadScore | Self::InternalTentativeAgentResponse | Self::Unknown
        )
    }
}

/// An outbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundFrame {
    Pong { event_id: Value },
    /// Base64 PCM16 microphone frame.
    UserAudio(String),
}

impl OutboundFrame {
    pub fn to_json(&self) -> String {
        match self {
            Self::Pong { event_id } => json!({"type": "pong", "event_id": event_id}),
            Self::UserAudio(chunk) => json!({"user_audio_chunk": chunk}),
        }
        .to_string()
    }
}
