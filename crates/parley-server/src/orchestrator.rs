//! Voice session start and end.
//!
//! Starting a session is the one place where concurrent requests can
//! genuinely race. Correctness rests on [`parley_conversations::claim_voice`],
//! a single conditional `UPDATE`: exactly one caller per conversation gets
//! the row back, and every other caller is told the request is a duplicate.
//!
//! On top of that the orchestrator keeps a process-local table of in-flight
//! creations keyed by `conversationId-personaId-scenarioId`. A repeat of an
//! identical request waits for the first one's result instead of bouncing
//! off the claim. The table only saves a round trip; removing it would not
//! break anything.
//!
//! Session creation runs in a spawned task, so the claim is rolled back even
//! if the HTTP request that triggered it goes away mid-flight. Activation and
//! rollback carry the claim's generation: a creation whose claim was swept as
//! stale can neither overwrite nor release a later claim on the same row.

use crate::transcript::TranscriptFinalizer;
use crate::with_connection;
use chrono::Utc;
use parley_conversations::{self as store, ConversationError, Organisation, Persona, Scenario};
use parley_db::DbPool;
use parley_types::{
    EndSessionRequest, EndSessionResponse, PersonaSummary, StartOutcome, StartSessionRequest,
    VoiceMetadata, VoiceSessionConfig,
};
use parley_voice::{PersonaContextBuilder, ProviderSessionRequest, VoiceProvider, DEFAULT_VOICE_NAME};
use rusqlite::Connection;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;

/// Organisation consulted for personas that belong to none.
pub const DEFAULT_ORGANISATION_ID: &str = "default";

/// Upper bound on one provider session creation.
pub const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(60);

/// Errors surfaced by session start and end.
///
/// Every variant except [`SessionError::InvalidRequest`] raised during a
/// start has already rolled the conversation claim back when the caller
/// sees it. `Clone` so that one failed creation can be reported to every
/// request that was waiting on it.
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    #[error("{0}")]
    InvalidRequest(String),

    #[error("Voice not enabled for organization")]
    VoiceNotEnabled,

    #[error("failed to load session context: {0}")]
    ContextFetchFailed(String),

    #[error("provider session creation failed: {0}")]
    ProviderSessionCreationFailed(String),

    #[error("persistence failed: {0}")]
    PersistenceFailed(String),

    #[error("internal error: {0}")]
    Internal(String),
}

type Pending = Option<Result<VoiceSessionConfig, SessionError>>;
type InFlight = Arc<Mutex<HashMap<String, watch::Receiver<Pending>>>>;

/// Removes a dedup entry when the creation that registered it finishes,
/// whether it returned, failed or was torn down.
struct DedupGuard {
    in_flight: InFlight,
    key: String,
}

impl Drop for DedupGuard {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

/// Persona, organisation, scenario and template for one session.
struct SessionContext {
    persona: Persona,
    organisation: Organisation,
    scenario: Scenario,
    template: Option<String>,
}

fn load_context(
    conn: &Connection,
    request: &StartSessionRequest,
) -> Result<SessionContext, SessionError> {
    let fetch = |e: ConversationError| SessionError::ContextFetchFailed(e.to_string());

    let persona = store::get_persona(conn, &request.persona_id)
        .map_err(fetch)?
        .ok_or_else(|| {
            SessionError::ContextFetchFailed(format!("persona {} not found", request.persona_id))
        })?;

    let organisation_id = persona
        .organisation_id
        .as_deref()
        .unwrap_or(DEFAULT_ORGANISATION_ID);
    let organisation = match store::get_organisation(conn, organisation_id).map_err(fetch)? {
        Some(org) if org.voice_enabled => org,
        _ => return Err(SessionError::VoiceNotEnabled),
    };

    let scenario = store::get_scenario(conn, &request.scenario_id)
        .map_err(fetch)?
        .ok_or_else(|| {
            SessionError::ContextFetchFailed(format!(
                "scenario {} not found",
                request.scenario_id
            ))
        })?;

    let template = store::system_prompt_template(conn, &request.conversation_id).map_err(fetch)?;

    Ok(SessionContext {
        persona,
        organisation,
        scenario,
        template,
    })
}

/// Starts and ends voice sessions.
#[derive(Clone)]
pub struct SessionOrchestrator {
    pool: DbPool,
    provider: Arc<dyn VoiceProvider>,
    prompts: Arc<dyn PersonaContextBuilder>,
    finalizer: TranscriptFinalizer,
    default_max_duration_secs: u64,
    provider_timeout: Duration,
    in_flight: InFlight,
}

impl SessionOrchestrator {
    pub fn new(
        pool: DbPool,
        provider: Arc<dyn VoiceProvider>,
        prompts: Arc<dyn PersonaContextBuilder>,
        default_max_duration_secs: u64,
    ) -> Self {
        let finalizer = TranscriptFinalizer::new(pool.clone(), Arc::clone(&provider));
        Self {
            pool,
            provider,
            prompts,
            finalizer,
            default_max_duration_secs,
            provider_timeout: DEFAULT_PROVIDER_TIMEOUT,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Caps how long a provider may take to create a session. Keep it below
    /// the stale-claim threshold.
    pub fn with_provider_timeout(mut self, timeout: Duration) -> Self {
        self.provider_timeout = timeout;
        self
    }

    /// Number of creations currently registered in the dedup table.
    pub fn in_flight(&self) -> usize {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn pending(&self, key: &str) -> Option<watch::Receiver<Pending>> {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Claims the conversation and creates a provider session for it.
    ///
    /// Returns [`StartOutcome::Duplicate`] when the conversation is already
    /// claimed, by this process or any other.
    pub async fn start(&self, request: &StartSessionRequest) -> Result<StartOutcome, SessionError> {
        if !request.is_complete() {
            return Err(SessionError::InvalidRequest(
                "Missing required fields: conversationId, personaId, scenarioId".to_string(),
            ));
        }

        let key = request.dedup_key();
        if let Some(mut pending) = self.pending(&key) {
            tracing::debug!(key = %key, "identical start in flight, waiting for its result");
            let awaited = pending
                .wait_for(Option::is_some)
                .await
                .ok()
                .and_then(|result| result.clone());
            match awaited {
                Some(Ok(config)) => return Ok(StartOutcome::Started(config)),
                Some(Err(e)) => {
                    tracing::info!(key = %key, "awaited creation failed ({}), trying a fresh claim", e);
                }
                None => {
                    tracing::debug!(key = %key, "awaited creation ended without a result");
                }
            }
        }

        let conversation_id = request.conversation_id.clone();
        let claimed = with_connection(&self.pool, SessionError::PersistenceFailed, move |conn| {
            store::claim_voice(conn, &conversation_id)
                .map_err(|e| SessionError::PersistenceFailed(e.to_string()))
        })
        .await?;

        let Some(claim) = claimed else {
            tracing::info!(
                conversation_id = %request.conversation_id,
                "conversation already claimed for voice, reporting duplicate"
            );
            return Ok(StartOutcome::Duplicate);
        };
        let generation = claim.claim_generation;

        let (tx, rx) = watch::channel(None);
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.clone(), rx);
        let guard = DedupGuard {
            in_flight: Arc::clone(&self.in_flight),
            key,
        };

        let this = self.clone();
        let owned = request.clone();
        let creation = tokio::spawn(async move {
            let _guard = guard;
            let result = this.create(&owned, generation).await;
            if let Err(e) = &result {
                tracing::warn!(
                    conversation_id = %owned.conversation_id,
                    "voice session creation failed: {}",
                    e
                );
                this.release_claim(&owned.conversation_id, generation).await;
            }
            tx.send_replace(Some(result.clone()));
            result
        });

        match creation.await {
            Ok(result) => result.map(StartOutcome::Started),
            Err(e) => {
                self.release_claim(&request.conversation_id, generation).await;
                Err(SessionError::Internal(format!("session creation task failed: {}", e)))
            }
        }
    }

    async fn create(
        &self,
        request: &StartSessionRequest,
        generation: i64,
    ) -> Result<VoiceSessionConfig, SessionError> {
        let ids = request.clone();
        let context = with_connection(&self.pool, SessionError::ContextFetchFailed, move |conn| {
            load_context(conn, &ids)
        })
        .await?;

        let system_prompt =
            self.prompts
                .build(&context.persona, &context.scenario, context.template.as_deref());
        tracing::debug!(
            conversation_id = %request.conversation_id,
            prompt_len = system_prompt.len(),
            custom_template = context.template.is_some(),
            "system prompt built"
        );

        let persona_summary = PersonaSummary {
            name: context.persona.name.clone(),
            voice_name: Some(
                context
                    .persona
                    .voice_name
                    .clone()
                    .unwrap_or_else(|| DEFAULT_VOICE_NAME.to_string()),
            ),
        };
        let max_duration_seconds = context
            .organisation
            .max_conversation_minutes
            .filter(|minutes| *minutes > 0)
            .map(|minutes| u64::from(minutes) * 60)
            .unwrap_or(self.default_max_duration_secs);

        let provider_request = ProviderSessionRequest {
            conversation_id: request.conversation_id.clone(),
            persona: context.persona,
            scenario: context.scenario,
            system_prompt,
        };
        let session = tokio::time::timeout(
            self.provider_timeout,
            self.provider.create_session(&provider_request),
        )
        .await
        .map_err(|_| {
            SessionError::ProviderSessionCreationFailed(format!(
                "timed out after {}s",
                self.provider_timeout.as_secs_f32()
            ))
        })?
        .map_err(|e| SessionError::ProviderSessionCreationFailed(e.to_string()))?;

        let kind = self.provider.kind();
        let metadata = VoiceMetadata::Active {
            provider: kind,
            room: session.room.clone(),
            created_at: Utc::now().to_rfc3339(),
        };
        let conversation_id = request.conversation_id.clone();
        with_connection(&self.pool, SessionError::PersistenceFailed, move |conn| {
            store::activate_voice(conn, &conversation_id, generation, &metadata)
                .map_err(|e| SessionError::PersistenceFailed(e.to_string()))
        })
        .await?;

        tracing::info!(
            conversation_id = %request.conversation_id,
            provider = %kind,
            room = %session.room,
            max_duration_seconds,
            "voice session started"
        );

        Ok(VoiceSessionConfig {
            provider: kind,
            session_id: request.conversation_id.clone(),
            max_duration_seconds,
            persona: persona_summary,
            transport: session.transport,
        })
    }

    /// Resets this creation's claim so the conversation can be started again.
    async fn release_claim(&self, conversation_id: &str, generation: i64) {
        let id = conversation_id.to_string();
        let result = with_connection(&self.pool, SessionError::PersistenceFailed, move |conn| {
            store::reset_voice_claim(conn, &id, generation)
                .map_err(|e| SessionError::PersistenceFailed(e.to_string()))
        })
        .await;

        match result {
            Ok(true) => {
                tracing::info!(conversation_id = %conversation_id, "voice claim released");
            }
            Ok(false) => {
                tracing::warn!(
                    conversation_id = %conversation_id,
                    generation,
                    "voice claim already released or superseded"
                );
            }
            Err(e) => {
                tracing::error!(
                    conversation_id = %conversation_id,
                    "failed to release voice claim: {}",
                    e
                );
            }
        }
    }

    /// Ends a session and hands its transcript to the finalizer.
    ///
    /// Only a missing `conversationId` is an error. Persistence failures are
    /// reported inside the acknowledgement.
    pub async fn end(&self, request: EndSessionRequest) -> Result<EndSessionResponse, SessionError> {
        let conversation_id = request
            .conversation_id
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| SessionError::InvalidRequest("Missing conversationId".to_string()))?;

        tracing::info!(conversation_id = %conversation_id, "ending voice session");

        Ok(self
            .finalizer
            .finalize(
                &conversation_id,
                request.transcript_data.unwrap_or_default(),
                request.provider_conversation_id.as_deref(),
            )
            .await)
    }
}
