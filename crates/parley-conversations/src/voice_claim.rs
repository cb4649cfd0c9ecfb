//! The voice claim on a conversation row.
//!
//! `is_voice_conversation` is the claim flag. Setting it is a single
//! conditional `UPDATE` guarded by `is_voice_conversation = 0`, so at most
//! one caller ever observes the transition for a given row.

use crate::ConversationError;
use parley_types::{ConversationVoiceState, VoiceMetadata};
use rusqlite::{params, Connection, OptionalExtension};

fn metadata_json(metadata: &VoiceMetadata) -> Result<String, ConversationError> {
    Ok(serde_json::to_string(metadata)?)
}

/// Atomically claims a conversation for voice.
///
/// Returns the claimed state, or `None` when the row is already claimed or
/// does not exist. Both cases mean the caller must not create a session.
/// The returned `claim_generation` must be passed to [`activate_voice`] and
/// [`reset_voice_claim`].
pub fn claim_voice(
    conn: &Connection,
    conversation_id: &str,
) -> Result<Option<ConversationVoiceState>, ConversationError> {
    let creating = metadata_json(&VoiceMetadata::Creating)?;

    let claimed = conn
        .query_row(
            "UPDATE conversations
             SET is_voice_conversation = 1,
                 voice_metadata = ?2,
                 voice_claimed_at = datetime('now'),
                 voice_ended_at = NULL,
                 voice_claim_generation = voice_claim_generation + 1
             WHERE conversation_id = ?1 AND is_voice_conversation = 0
             RETURNING conversation_id, is_voice_conversation, voice_metadata,
                       voice_claim_generation",
            params![conversation_id, creating],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, bool>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            },
        )
        .optional()?;

    match claimed {
        Some((conversation_id, is_voice_conversation, raw, claim_generation)) => {
            tracing::debug!(
                conversation_id = %conversation_id,
                claim_generation,
                "voice claim acquired"
            );
            Ok(Some(ConversationVoiceState {
                conversation_id,
                is_voice_conversation,
                voice_metadata: serde_json::from_str(&raw)?,
                claim_generation,
            }))
        }
        None => {
            tracing::debug!(conversation_id, "voice claim already held");
            Ok(None)
        }
    }
}

/// Records the provider session on a claimed row.
///
/// Only the claim identified by `claim_generation`, still in `Creating`,
/// can be activated. Fails with `NotClaimed` if that claim was released in
/// the meantime (for example by the stale-claim sweeper), even when another
/// caller has claimed the row since.
pub fn activate_voice(
    conn: &Connection,
    conversation_id: &str,
    claim_generation: i64,
    metadata: &VoiceMetadata,
) -> Result<(), ConversationError> {
    let json = metadata_json(metadata)?;
    let creating = metadata_json(&VoiceMetadata::Creating)?;
    let count = conn.execute(
        "UPDATE conversations SET voice_metadata = ?2
         WHERE conversation_id = ?1
           AND is_voice_conversation = 1
           AND voice_metadata = ?3
           AND voice_claim_generation = ?4",
        params![conversation_id, json, creating, claim_generation],
    )?;
    if count == 0 {
        return Err(ConversationError::NotClaimed(conversation_id.to_string()));
    }
    Ok(())
}

/// Releases a claim after a failed creation. Returns whether a row changed.
///
/// A no-op unless the row still holds the same claim in `Creating`.
pub fn reset_voice_claim(
    conn: &Connection,
    conversation_id: &str,
    claim_generation: i64,
) -> Result<bool, ConversationError> {
    let empty = metadata_json(&VoiceMetadata::Empty)?;
    let creating = metadata_json(&VoiceMetadata::Creating)?;
    let count = conn.execute(
        "UPDATE conversations
         SET is_voice_conversation = 0, voice_metadata = ?2, voice_claimed_at = NULL
         WHERE conversation_id = ?1
           AND is_voice_conversation = 1
           AND voice_metadata = ?3
           AND voice_claim_generation = ?4",
        params![conversation_id, empty, creating, claim_generation],
    )?;
    Ok(count > 0)
}

/// Releases claims stuck in `Creating` for longer than `older_than_secs`.
///
/// Returns the number of rows reset.
pub fn reset_stale_claims(
    conn: &Connection,
    older_than_secs: u64,
) -> Result<usize, ConversationError> {
    let creating = metadata_json(&VoiceMetadata::Creating)?;
    let empty = metadata_json(&VoiceMetadata::Empty)?;
    let modifier = format!("-{} seconds", older_than_secs);

    let count = conn.execute(
        "UPDATE conversations
         SET is_voice_conversation = 0, voice_metadata = ?1, voice_claimed_at = NULL
         WHERE is_voice_conversation = 1
           AND voice_metadata = ?2
           AND voice_claimed_at <= datetime('now', ?3)",
        params![empty, creating, modifier],
    )?;
    Ok(count)
}
