//! End-of-session transcript persistence.

use crate::orchestrator::SessionError;
use crate::with_connection;
use parley_conversations as store;
use parley_db::DbPool;
use parley_types::{EndSessionResponse, TranscriptMessage};
use parley_voice::VoiceProvider;
use std::sync::Arc;

/// Writes the transcript of a finished session.
///
/// Never fails outward: whatever goes wrong ends up in the returned
/// [`EndSessionResponse`] so the caller can always move on.
#[derive(Clone)]
pub struct TranscriptFinalizer {
    pool: DbPool,
    provider: Arc<dyn VoiceProvider>,
}

impl TranscriptFinalizer {
    pub fn new(pool: DbPool, provider: Arc<dyn VoiceProvider>) -> Self {
        Self { pool, provider }
    }

    /// Persists `messages`, or the provider's own transcript when the client
    /// sent none and named the provider-side conversation.
    pub async fn finalize(
        &self,
        conversation_id: &str,
        mut messages: Vec<TranscriptMessage>,
        provider_conversation_id: Option<&str>,
    ) -> EndSessionResponse {
        if messages.is_empty() {
            if let Some(provider_id) = provider_conversation_id {
                messages = self.provider_transcript(conversation_id, provider_id).await;
            }
        }

        if messages.is_empty() {
            tracing::info!(conversation_id = %conversation_id, "session ended with no transcript");
            return EndSessionResponse::nothing_to_save();
        }

        messages.sort_by(TranscriptMessage::chronological);

        match self.persist(conversation_id, messages).await {
            Ok(count) => {
                tracing::info!(conversation_id = %conversation_id, count, "transcript saved");
                EndSessionResponse::saved(count)
            }
            Err(e) => {
                tracing::error!(
                    conversation_id = %conversation_id,
                    "failed to save transcript: {}",
                    e
                );
                EndSessionResponse::persistence_failed(e.to_string())
            }
        }
    }

    async fn provider_transcript(
        &self,
        conversation_id: &str,
        provider_id: &str,
    ) -> Vec<TranscriptMessage> {
        match self.provider.fetch_transcript(provider_id).await {
            Ok(Some(lines)) => {
                tracing::debug!(
                    conversation_id = %conversation_id,
                    provider_conversation_id = %provider_id,
                    count = lines.len(),
                    "fetched transcript from provider"
                );
                lines
            }
            Ok(None) => Vec::new(),
            Err(e) => {
                tracing::warn!(
                    conversation_id = %conversation_id,
                    provider_conversation_id = %provider_id,
                    "failed to fetch provider transcript: {}",
                    e
                );
                Vec::new()
            }
        }
    }

    async fn persist(
        &self,
        conversation_id: &str,
        messages: Vec<TranscriptMessage>,
    ) -> Result<usize, SessionError> {
        let id = conversation_id.to_string();
        with_connection(&self.pool, SessionError::PersistenceFailed, move |conn| {
            let count = store::insert_transcript_batch(conn, &id, &messages)
                .map_err(|e| SessionError::PersistenceFailed(e.to_string()))?;

            // The messages are already committed; a failed bookkeeping write
            // must not turn the response into a failure.
            if let Err(e) = store::record_session_end(conn, &id, count) {
                tracing::warn!(conversation_id = %id, "failed to record session end: {}", e);
            }
            Ok(count)
        })
        .await
    }
}
