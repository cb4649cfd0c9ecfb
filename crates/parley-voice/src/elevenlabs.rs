//! ElevenLabs Conversational AI REST client.
//!
//! Three calls are needed: create an agent for the persona, get a signed
//! WebSocket URL for it, and (after the call) export the conversation
//! transcript.

use crate::config::ElevenLabsConfig;
use crate::error::VoiceError;
use parley_types::{Role, TranscriptMessage};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

/// Prompts above this length still work but degrade agent latency.
const PROMPT_WARN_CHARS: usize = 10_000;

const API_KEY_HEADER: &str = "xi-api-key";

/// Settings that shape the created agent.
#[derive(Debug, Clone)]
pub struct AgentSpec<'a> {
    pub persona_name: &'a str,
    pub system_prompt: &'a str,
    pub voice_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct CreateAgentResponse {
    agent_id: String,
}

#[derive(Debug, Deserialize)]
struct SignedUrlResponse {
    signed_url: String,
}

/// One line of an exported conversation.
#[derive(Debug, Clone, Deserialize)]
pub struct ExportedLine {
    pub role: Role,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub time_in_call_secs: f64,
}

/// Conversation export as returned by `GET /v1/convai/conversations/{id}`.
#[derive(Debug, Clone, Deserialize)]
pub struct ConversationExport {
    #[serde(default)]
    pub transcript: Vec<ExportedLine>,
    #[serde(default)]
    pub call_duration_secs: Option<f64>,
    #[serde(default)]
    pub metadata: Option<ExportMetadata>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExportMetadata {
    #[serde(default)]
    pub call_duration_secs: Option<f64>,
}

impl ConversationExport {
    fn duration_secs(&self) -> f64 {
        self.call_duration_secs
            .or_else(|| self.metadata.as_ref().and_then(|m| m.call_duration_secs))
            .unwrap_or(0.0)
    }

    /// Maps offsets into the call onto wall-clock times, taking `now_ms` as
    /// the end of the call. Lines without text are dropped.
    pub fn into_transcript(self, now_ms: i64) -> Vec<TranscriptMessage> {
        let duration = self.duration_secs();
        self.transcript
            .into_iter()
            .filter_map(|line| {
                let content = line.message?.trim().to_string();
                if content.is_empty() {
                    return None;
                }
                let offset_ms = ((duration - line.time_in_call_secs) * 1000.0).round() as i64;
                Some(TranscriptMessage::new(line.role, content, now_ms - offset_ms))
            })
            .collect()
    }
}

/// Instruction appended to every agent prompt; the model otherwise tends to
/// prefix replies with the persona's name.
fn no_name_prefix_instruction(name: &str) -> String {
    format!(
        "\n\nIMPORTANT: Do not prefix your responses with your name or any labels like \"{name}:\". \
         Respond directly as the character without any name prefixes. \
         Speak naturally as if you are {name} in conversation."
    )
}

/// Request body of `POST /v1/convai/agents/create`.
pub fn agent_request_body(config: &ElevenLabsConfig, spec: &AgentSpec<'_>) -> Value {
    let prompt = format!(
        "{}{}",
        spec.system_prompt,
        no_name_prefix_instruction(spec.persona_name)
    );

    json!({
        "name": format!("{} (voice)", spec.persona_name),
        "conversation_config": {
            "agent": {
                "prompt": {
                    "prompt": prompt,
                    "llm": config.model,
                    "temperature": 0.7,
                    "max_tokens": 2048
                },
                "first_message": format!(
                    "Hello, I'm {}. How may I assist you today?",
                    spec.persona_name
                ),
                "language": "en"
            },
            "tts": {
                "voice_id": spec.voice_id,
                "model_id": config.tts_model,
                "optimize_streaming_latency": 4,
                "stability": 0.5,
                "similarity_boost": 0.75
            },
            "asr": {
                "quality": "high",
                "user_input_audio_format": "pcm_16000"
            }
        }
    })
}

/// Thin REST client. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ElevenLabsClient {
    http: reqwest::Client,
    config: ElevenLabsConfig,
}

impl ElevenLabsClient {
    pub fn new(config: ElevenLabsConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .unwrap_or_default();
        Self { http, config }
    }

    pub fn is_enabled(&self) -> bool {
        !self.config.api_key.is_empty()
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn checked(response: reqwest::Response) -> Result<reqwest::Response, VoiceError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(VoiceError::Provider {
            status: status.as_u16(),
            body,
        })
    }

    /// Creates a conversational agent and returns its id.
    pub async fn create_agent(&self, spec: &AgentSpec<'_>) -> Result<String, VoiceError> {
        if spec.system_prompt.trim().is_empty() {
            return Err(VoiceError::InvalidPrompt(
                "system prompt is empty".to_string(),
            ));
        }
        if spec.system_prompt.chars().count() > PROMPT_WARN_CHARS {
            tracing::warn!(
                chars = spec.system_prompt.chars().count(),
                "system prompt is unusually long"
            );
        }

        let response = self
            .http
            .post(self.endpoint("/v1/convai/agents/create"))
            .header(API_KEY_HEADER, &self.config.api_key)
            .json(&agent_request_body(&self.config, spec))
            .send()
            .await?;
        let created: CreateAgentResponse = Self::checked(response).await?.json().await?;

        tracing::info!(agent_id = %created.agent_id, persona = spec.persona_name, "created agent");
        Ok(created.agent_id)
    }

    /// Returns a pre-authenticated WebSocket URL for one conversation.
    pub async fn signed_url(&self, agent_id: &str) -> Result<String, VoiceError> {
        let response = self
            .http
            .get(self.endpoint("/v1/convai/conversation/get_signed_url"))
            .query(&[("agent_id", agent_id)])
            .header(API_KEY_HEADER, &self.config.api_key)
            .send()
            .await?;
        let signed: SignedUrlResponse = Self::checked(response).await?.json().await?;
        Ok(signed.signed_url)
    }

    /// Downloads a finished conversation.
    pub async fn conversation(&self, conversation_id: &str) -> Result<ConversationExport, VoiceError> {
        let response = self
            .http
            .get(self.endpoint(&format!("/v1/convai/conversations/{conversation_id}")))
            .header(API_KEY_HEADER, &self.config.api_key)
            .send()
            .await?;
        Ok(Self::checked(response).await?.json().await?)
    }
}
