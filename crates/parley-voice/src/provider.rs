//! The provider seam used by session orchestration.

use crate::elevenlabs::{AgentSpec, ElevenLabsClient};
use crate::error::VoiceError;
use crate::service::VoiceService;
use crate::{DEFAULT_VOICE_ID, DEFAULT_VOICE_NAME};
use async_trait::async_trait;
use parley_conversations::{Persona, Scenario};
use parley_types::{ProviderKind, TranscriptMessage, TransportDetails};
use serde_json::json;

/// Everything a provider needs to stand up a session.
#[derive(Debug, Clone)]
pub struct ProviderSessionRequest {
    pub conversation_id: String,
    pub persona: Persona,
    pub scenario: Scenario,
    pub system_prompt: String,
}

/// A created remote session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSession {
    /// Room name or agent id, recorded on the conversation row.
    pub room: String,
    pub transport: TransportDetails,
}

#[async_trait]
pub trait VoiceProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    async fn create_session(
        &self,
        request: &ProviderSessionRequest,
    ) -> Result<ProviderSession, VoiceError>;

    /// Pulls the transcript of a finished session from the provider, for
    /// providers that keep one.
    async fn fetch_transcript(
        &self,
        _provider_conversation_id: &str,
    ) -> Result<Option<Vec<TranscriptMessage>>, VoiceError> {
        Ok(None)
    }
}

/// Media-room sessions on LiveKit.
#[derive(Debug)]
pub struct LiveKitProvider {
    service: VoiceService,
}

impl LiveKitProvider {
    pub fn new(service: VoiceService) -> Self {
        Self { service }
    }

    pub fn room_name(conversation_id: &str) -> String {
        format!("voice-{conversation_id}")
    }

    fn participant_metadata(request: &ProviderSessionRequest) -> String {
        let persona = &request.persona;
        json!({
            "personaId": persona.id,
            "personaName": persona.name,
            "voiceId": persona.voice_id.as_deref().unwrap_or(DEFAULT_VOICE_ID),
            "voiceName": persona.voice_name.as_deref().unwrap_or(DEFAULT_VOICE_NAME),
            "scenarioId": request.scenario.id,
            "scenarioTitle": request.scenario.title,
            "systemPrompt": request.system_prompt,
        })
        .to_string()
    }
}

#[async_trait]
impl VoiceProvider for LiveKitProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::LiveKit
    }

    async fn create_session(
        &self,
        request: &ProviderSessionRequest,
    ) -> Result<ProviderSession, VoiceError> {
        if !self.service.is_enabled() {
            return Err(VoiceError::Config(
                "LiveKit credentials not configured".to_string(),
            ));
        }

        let room_name = Self::room_name(&request.conversation_id);
        if self.service.config().pre_create_room {
            self.service.create_room(&room_name).await?;
        }

        let metadata = Self::participant_metadata(request);
        let token = self.service.generate_join_token(
            &room_name,
            &format!("user-{}", request.conversation_id),
            "User",
            Some(&metadata),
        )?;

        tracing::info!(
            conversation_id = %request.conversation_id,
            room = %room_name,
            persona = %request.persona.name,
            "LiveKit session created"
        );

        Ok(ProviderSession {
            room: room_name.clone(),
            transport: TransportDetails::Room {
                url: self.service.url().to_string(),
                token,
                room_name,
            },
        })
    }
}

/// Agent sessions on ElevenLabs, reached over a signed WebSocket.
#[derive(Debug, Clone)]
pub struct ElevenLabsProvider {
    client: ElevenLabsClient,
}

impl ElevenLabsProvider {
    pub fn new(client: ElevenLabsClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl VoiceProvider for ElevenLabsProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::ElevenLabs
    }

    async fn create_session(
        &self,
        request: &ProviderSessionRequest,
    ) -> Result<ProviderSession, VoiceError> {
        if !self.client.is_enabled() {
            return Err(VoiceError::Config(
                "ElevenLabs API key not configured".to_string(),
            ));
        }

        let spec = AgentSpec {
            persona_name: &request.persona.name,
            system_prompt: &request.system_prompt,
            voice_id: request.persona.voice_id.as_deref().unwrap_or(DEFAULT_VOICE_ID),
        };
        let agent_id = self.client.create_agent(&spec).await?;
        let signed_url = self.client.signed_url(&agent_id).await?;

        tracing::info!(
            conversation_id = %request.conversation_id,
            agent_id = %agent_id,
            "ElevenLabs session created"
        );

        Ok(ProviderSession {
            room: agent_id.clone(),
            transport: TransportDetails::Socket {
                signed_url,
                agent_id,
            },
        })
    }

    async fn fetch_transcript(
        &self,
        provider_conversation_id: &str,
    ) -> Result<Option<Vec<TranscriptMessage>>, VoiceError> {
        let export = self.client.conversation(provider_conversation_id).await?;
        let now_ms = chrono::Utc::now().timestamp_millis();
        Ok(Some(export.into_transcript(now_ms)))
    }
}
