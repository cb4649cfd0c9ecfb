//! JSON bodies of the `start-session` and `end-session` endpoints.

use crate::{TranscriptMessage, VoiceSessionConfig};
use serde::{Deserialize, Serialize};

/// Result of a start request, on either side of the HTTP boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// The caller owns the session.
    Started(VoiceSessionConfig),
    /// Another request already owns the claim; nothing was created.
    Duplicate,
}

/// Body of `POST /api/voice/start-session`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSessionRequest {
    #[serde(default)]
    pub conversation_id: String,
    #[serde(default)]
    pub persona_id: String,
    #[serde(default)]
    pub scenario_id: String,
}

impl StartSessionRequest {
    /// Key used to collapse identical in-flight start requests.
    pub fn dedup_key(&self) -> String {
        format!(
            "{}-{}-{}",
            self.conversation_id, self.persona_id, self.scenario_id
        )
    }

    pub fn is_complete(&self) -> bool {
        !self.conversation_id.trim().is_empty()
            && !self.persona_id.trim().is_empty()
            && !self.scenario_id.trim().is_empty()
    }
}

/// `202 Accepted` body: another request already owns the claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateResponse {
    pub is_duplicate: bool,
    pub message: String,
}

impl Default for DuplicateResponse {
    fn default() -> Self {
        Self {
            is_duplicate: true,
            message: "Another request is already creating this voice session".to_string(),
        }
    }
}

/// Body of `POST /api/voice/end-session`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndSessionRequest {
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub transcript_data: Option<Vec<TranscriptMessage>>,
    /// Provider-side conversation id, used to pull the transcript from the
    /// provider when the client did not collect one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_conversation_id: Option<String>,
}

/// Acknowledgement of `end-session`. Always sent with `200 OK`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndSessionResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl EndSessionResponse {
    pub fn saved(message_count: usize) -> Self {
        Self {
            success: true,
            message_count: Some(message_count),
            ..Default::default()
        }
    }

    pub fn nothing_to_save() -> Self {
        Self {
            success: true,
            message: Some("Session ended (no transcript to save)".to_string()),
            ..Default::default()
        }
    }

    pub fn persistence_failed(details: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some("Failed to save transcript".to_string()),
            details: Some(details.into()),
            ..Default::default()
        }
    }
}

/// Generic error body for 4xx/5xx responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}
