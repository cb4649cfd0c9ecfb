//! Transcript persistence.

use crate::ConversationError;
use chrono::{DateTime, SecondsFormat};
use parley_types::{Role, TranscriptMessage};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

/// A persisted transcript line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: i64,
    pub conversation_id: String,
    pub role: Role,
    pub content: String,
    /// RFC 3339 with millisecond precision.
    pub created_at: String,
}

fn iso_millis(timestamp: i64) -> Result<String, ConversationError> {
    DateTime::from_timestamp_millis(timestamp)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
        .ok_or(ConversationError::InvalidTimestamp(timestamp))
}

/// Inserts all lines in one transaction and returns how many were written.
///
/// Either every line is stored or none is.
pub fn insert_transcript_batch(
    conn: &Connection,
    conversation_id: &str,
    messages: &[TranscriptMessage],
) -> Result<usize, ConversationError> {
    let tx = conn.unchecked_transaction()?;
    {
        let mut stmt = tx.prepare_cached(
            "INSERT INTO messages (conversation_id, role, content, created_at)
             VALUES (?1, ?2, ?3, ?4)",
        )?;
        for message in messages {
            stmt.execute(params![
                conversation_id,
                message.role.as_str(),
                message.content,
                iso_millis(message.timestamp)?,
            ])?;
        }
    }
    tx.commit()?;
    Ok(messages.len())
}

/// Marks the voice session as ended with its final message count.
pub fn record_session_end(
    conn: &Connection,
    conversation_id: &str,
    message_count: usize,
) -> Result<(), ConversationError> {
    let count = conn.execute(
        "UPDATE conversations
         SET voice_ended_at = datetime('now'), voice_message_count = ?2
         WHERE conversation_id = ?1",
        params![conversation_id, message_count as i64],
    )?;
    if count == 0 {
        return Err(ConversationError::NotFound(conversation_id.to_string()));
    }
    Ok(())
}

/// Lists a conversation's messages in insertion order.
pub fn list_messages(
    conn: &Connection,
    conversation_id: &str,
) -> Result<Vec<StoredMessage>, ConversationError> {
    let mut stmt = conn.prepare(
        "SELECT id, conversation_id, role, content, created_at
         FROM messages WHERE conversation_id = ?1 ORDER BY id ASC",
    )?;

    let rows = stmt.query_map([conversation_id], |row| {
        let role: String = row.get(2)?;
        let role = role.parse::<Role>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
        })?;
        Ok(StoredMessage {
            id: row.get(0)?,
            conversation_id: row.get(1)?,
            role,
            content: row.get(3)?,
            created_at: row.get(4)?,
        })
    })?;

    let mut messages = Vec::new();
    for row in rows {
        messages.push(row?);
    }
    Ok(messages)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_render_as_utc_millis() {
        assert_eq!(iso_millis(0).unwrap(), "1970-01-01T00:00:00.000Z");
        assert_eq!(iso_millis(1_700_000_000_123).unwrap(), "2023-11-14T22:13:20.123Z");
        assert!(matches!(
            iso_millis(i64::MAX),
            Err(ConversationError::InvalidTimestamp(_))
        ));
    }
}
