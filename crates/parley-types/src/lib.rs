//! Shared types for the Parley voice conversation platform.
//!
//! This crate holds the definitions that cross crate and process boundaries:
//! transcript messages, the conversation voice-claim state, the session
//! configuration handed to clients, and the JSON bodies of the session HTTP
//! endpoints. Every other crate in the workspace depends on it; it depends
//! on nothing but `serde` and `thiserror`.

pub mod api;
pub mod voice;

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub use api::{
    DuplicateResponse, EndSessionRequest, EndSessionResponse, ErrorResponse, StartOutcome,
    StartSessionRequest,
};
pub use voice::{
    ConversationVoiceState, PersonaSummary, ProviderKind, TransportDetails, VoiceMetadata,
    VoiceSessionConfig,
};

/// Speaker of a transcript line.
///
/// The declaration order doubles as the tie-break when two lines share a
/// timestamp: the user line sorts first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The human on the microphone.
    User,
    /// The AI persona. Providers call this side `agent`.
    #[serde(alias = "agent")]
    Assistant,
}

impl Role {
    /// Returns the lowercase label stored in the `messages.role` column.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown role label.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown transcript role: {0}")]
pub struct ParseRoleError(pub String);

impl FromStr for Role {
    type Err = ParseRoleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" | "agent" => Ok(Self::Assistant),
            other => Err(ParseRoleError(other.to_string())),
        }
    }
}

/// One line of a live conversation transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptMessage {
    pub role: Role,
    pub content: String,
    /// Wall-clock arrival time in Unix milliseconds.
    pub timestamp: i64,
}

impl TranscriptMessage {
    pub fn new(role: Role, content: impl Into<String>, timestamp: i64) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp,
        }
    }

    /// Ordering used for persisted transcripts: arrival time, then role.
    pub fn chronological(a: &Self, b: &Self) -> Ordering {
        a.timestamp
            .cmp(&b.timestamp)
            .then_with(|| a.role.cmp(&b.role))
    }
}
