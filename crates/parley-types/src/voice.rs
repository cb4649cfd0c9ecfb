//! Voice session state and configuration types.
//!
//! A conversation becomes a voice conversation through a single atomic
//! claim. While the remote provider session is being created the claim is
//! in the `Creating` state; once the provider answers it becomes `Active`.
//! A failed creation returns the row to `Empty`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Supported remote conversational-voice providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Managed real-time media room. Audio arrives as a subscribed track.
    #[default]
    LiveKit,
    /// Raw WebSocket carrying JSON control frames and base64 PCM audio.
    ElevenLabs,
}

impl ProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LiveKit => "livekit",
            Self::ElevenLabs => "elevenlabs",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a provider name is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown voice provider: {0}")]
pub struct ParseProviderError(pub String);

impl FromStr for ProviderKind {
    type Err = ParseProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "livekit" => Ok(Self::LiveKit),
            "elevenlabs" => Ok(Self::ElevenLabs),
            other => Err(ParseProviderError(other.to_string())),
        }
    }
}

/// The `voice_metadata` column of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VoiceMetadata {
    /// Not a voice conversation, or a failed creation was rolled back.
    #[default]
    Empty,
    /// Claimed; the provider session is being created.
    Creating,
    /// The provider session exists.
    Active {
        provider: ProviderKind,
        /// Room name (media room) or agent id (raw socket).
        room: String,
        /// RFC 3339 creation time.
        created_at: String,
    },
}

impl VoiceMetadata {
    /// Short status tag, as stored in the `status` JSON field.
    pub fn status(&self) -> &'static str {
        match self {
            Self::Empty => "EMPTY",
            Self::Creating => "CREATING",
            Self::Active { .. } => "ACTIVE",
        }
    }
}

/// Voice-related fields of a conversation row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationVoiceState {
    pub conversation_id: String,
    pub is_voice_conversation: bool,
    pub voice_metadata: VoiceMetadata,
    /// Identifies this claim. Activation and rollback must present it.
    #[serde(default)]
    pub claim_generation: i64,
}

/// Persona details shown by the client while the call is running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonaSummary {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice_name: Option<String>,
}

/// How the client reaches the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TransportDetails {
    /// Join a managed media room.
    #[serde(rename_all = "camelCase")]
    Room {
        url: String,
        token: String,
        room_name: String,
    },
    /// Open a raw WebSocket to a pre-signed URL.
    #[serde(rename_all = "camelCase")]
    Socket { signed_url: String, agent_id: String },
}

/// Immutable configuration returned to the client on a successful claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceSessionConfig {
    pub provider: ProviderKind,
    /// The conversation id the session belongs to.
    pub session_id: String,
    pub max_duration_seconds: u64,
    pub persona: PersonaSummary,
    pub transport: TransportDetails,
}
