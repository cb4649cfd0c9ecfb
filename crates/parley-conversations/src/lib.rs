//! Conversation storage for Parley.
//!
//! Row-level operations over the conversation tables: the voice claim on a
//! conversation row, the persona/organisation/scenario context a voice
//! session is built from, and the transcript messages written when a
//! session ends.
//!
//! Every function takes a borrowed [`rusqlite::Connection`] and performs its
//! work in as few statements as possible. The claim in particular is one
//! conditional `UPDATE ... RETURNING`, which SQLite executes atomically, so
//! two callers racing for the same row can never both win.

mod records;
mod transcript;
mod voice_claim;

use thiserror::Error;

pub use records::{
    create_conversation, create_organisation, create_persona, create_scenario,
    create_system_prompt, get_conversation, get_organisation, get_persona, get_scenario,
    system_prompt_template, Conversation, NewConversation, Organisation, Persona, Scenario,
};
pub use transcript::{insert_transcript_batch, list_messages, record_session_end, StoredMessage};
pub use voice_claim::{activate_voice, claim_voice, reset_stale_claims, reset_voice_claim};

/// Errors that can occur during conversation storage operations.
#[derive(Debug, Error)]
pub enum ConversationError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("json serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("conversation not found: {0}")]
    NotFound(String),
    /// `activate_voice` on a row whose claim was already released.
    #[error("conversation {0} is not claimed for voice")]
    NotClaimed(String),
    #[error("timestamp out of range: {0}")]
    InvalidTimestamp(i64),
}
