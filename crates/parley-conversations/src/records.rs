//! Conversations and the context a voice session is built from.

use crate::ConversationError;
use parley_types::VoiceMetadata;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

/// An organisation owning personas. Voice is an organisation-level switch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organisation {
    pub id: String,
    pub name: String,
    pub voice_enabled: bool,
    /// Session length cap; `None` means the server default applies.
    pub max_conversation_minutes: Option<u32>,
}

/// A simulated persona the user talks to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Persona {
    pub id: String,
    pub organisation_id: Option<String>,
    pub name: String,
    pub age: Option<u32>,
    pub gender: Option<String>,
    pub job: Option<String>,
    pub family_status: Option<String>,
    pub segment: Option<String>,
    pub major_issues: Option<String>,
    pub uk_party_affiliation: Option<String>,
    pub personality_traits: Option<String>,
    pub emotional_conditions: Option<String>,
    pub busyness_level: Option<String>,
    pub location: Option<String>,
    /// Provider voice identifier.
    pub voice_id: Option<String>,
    pub voice_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scenario {
    pub id: String,
    pub title: String,
    pub description: String,
}

/// A conversation row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub conversation_id: String,
    pub persona_id: Option<String>,
    pub scenario_id: Option<String>,
    pub system_prompt_id: Option<i64>,
    pub is_voice_conversation: bool,
    pub voice_metadata: VoiceMetadata,
    pub voice_claimed_at: Option<String>,
    pub voice_ended_at: Option<String>,
    pub voice_message_count: Option<i64>,
    pub created_at: String,
}

/// Parameters for creating a conversation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewConversation {
    pub conversation_id: String,
    pub persona_id: Option<String>,
    pub scenario_id: Option<String>,
    pub system_prompt_id: Option<i64>,
}

pub fn create_organisation(conn: &Connection, org: &Organisation) -> Result<(), ConversationError> {
    conn.execute(
        "INSERT INTO organisations (id, name, voice_enabled, max_conversation_minutes)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            org.id,
            org.name,
            org.voice_enabled,
            org.max_conversation_minutes
        ],
    )?;
    Ok(())
}

/// Looks up an organisation. A missing row is `Ok(None)`: callers treat an
/// unknown organisation the same as one with voice disabled.
pub fn get_organisation(
    conn: &Connection,
    id: &str,
) -> Result<Option<Organisation>, ConversationError> {
    let org = conn
        .query_row(
            "SELECT id, name, voice_enabled, max_conversation_minutes
             FROM organisations WHERE id = ?1",
            [id],
            |row| {
                Ok(Organisation {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    voice_enabled: row.get(2)?,
                    max_conversation_minutes: row.get(3)?,
                })
            },
        )
        .optional()?;
    Ok(org)
}

pub fn create_persona(conn: &Connection, persona: &Persona) -> Result<(), ConversationError> {
    conn.execute(
        "INSERT INTO personas (
            id, organisation_id, name, age, gender, job, family_status, segment,
            major_issues, uk_party_affiliation, personality_traits, emotional_conditions,
            busyness_level, location, voice_id, voice_name
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
        params![
            persona.id,
            persona.organisation_id,
            persona.name,
            persona.age,
            persona.gender,
            persona.job,
            persona.family_status,
            persona.segment,
            persona.major_issues,
            persona.uk_party_affiliation,
            persona.personality_traits,
            persona.emotional_conditions,
            persona.busyness_level,
            persona.location,
            persona.voice_id,
            persona.voice_name,
        ],
    )?;
    Ok(())
}

pub fn get_persona(conn: &Connection, id: &str) -> Result<Option<Persona>, ConversationError> {
    let persona = conn
        .query_row(
            "SELECT id, organisation_id, name, age, gender, job, family_status, segment,
                    major_issues, uk_party_affiliation, personality_traits, emotional_conditions,
                    busyness_level, location, voice_id, voice_name
             FROM personas WHERE id = ?1",
            [id],
            map_row_to_persona,
        )
        .optional()?;
    Ok(persona)
}

fn map_row_to_persona(row: &Row) -> rusqlite::Result<Persona> {
    Ok(Persona {
        id: row.get(0)?,
        organisation_id: row.get(1)?,
        name: row.get(2)?,
        age: row.get(3)?,
        gender: row.get(4)?,
        job: row.get(5)?,
        family_status: row.get(6)?,
        segment: row.get(7)?,
        major_issues: row.get(8)?,
        uk_party_affiliation: row.get(9)?,
        personality_traits: row.get(10)?,
        emotional_conditions: row.get(11)?,
        busyness_level: row.get(12)?,
        location: row.get(13)?,
        voice_id: row.get(14)?,
        voice_name: row.get(15)?,
    })
}

pub fn create_scenario(conn: &Connection, scenario: &Scenario) -> Result<(), ConversationError> {
    conn.execute(
        "INSERT INTO scenarios (id, title, description) VALUES (?1, ?2, ?3)",
        params![scenario.id, scenario.title, scenario.description],
    )?;
    Ok(())
}

pub fn get_scenario(conn: &Connection, id: &str) -> Result<Option<Scenario>, ConversationError> {
    let scenario = conn
        .query_row(
            "SELECT id, title, description FROM scenarios WHERE id = ?1",
            [id],
            |row| {
                Ok(Scenario {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    description: row.get(2)?,
                })
            },
        )
        .optional()?;
    Ok(scenario)
}

/// Stores a prompt template and returns its id.
pub fn create_system_prompt(conn: &Connection, content: &str) -> Result<i64, ConversationError> {
    let id = conn.query_row(
        "INSERT INTO system_prompts (content) VALUES (?1) RETURNING id",
        [content],
        |row| row.get(0),
    )?;
    Ok(id)
}

/// Returns the prompt template attached to a conversation, if any.
///
/// `None` covers a conversation without a template, a dangling template id,
/// and an unknown conversation alike.
pub fn system_prompt_template(
    conn: &Connection,
    conversation_id: &str,
) -> Result<Option<String>, ConversationError> {
    let content = conn
        .query_row(
            "SELECT sp.content
             FROM conversations c
             JOIN system_prompts sp ON sp.id = c.system_prompt_id
             WHERE c.conversation_id = ?1",
            [conversation_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(content)
}

pub fn create_conversation(
    conn: &Connection,
    params: &NewConversation,
) -> Result<(), ConversationError> {
    conn.execute(
        "INSERT INTO conversations (conversation_id, persona_id, scenario_id, system_prompt_id)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            params.conversation_id,
            params.persona_id,
            params.scenario_id,
            params.system_prompt_id
        ],
    )?;
    Ok(())
}

pub fn get_conversation(
    conn: &Connection,
    conversation_id: &str,
) -> Result<Conversation, ConversationError> {
    conn.query_row(
        "SELECT conversation_id, persona_id, scenario_id, system_prompt_id,
                is_voice_conversation, voice_metadata, voice_claimed_at, voice_ended_at,
                voice_message_count, created_at
         FROM conversations WHERE conversation_id = ?1",
        [conversation_id],
        map_row_to_conversation,
    )
    .optional()?
    .ok_or_else(|| ConversationError::NotFound(conversation_id.to_string()))
}

fn map_row_to_conversation(row: &Row) -> rusqlite::Result<Conversation> {
    let metadata_str: String = row.get(5)?;
    let voice_metadata = serde_json::from_str(&metadata_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(Conversation {
        conversation_id: row.get(0)?,
        persona_id: row.get(1)?,
        scenario_id: row.get(2)?,
        system_prompt_id: row.get(3)?,
        is_voice_conversation: row.get(4)?,
        voice_metadata,
        voice_claimed_at: row.get(6)?,
        voice_ended_at: row.get(7)?,
        voice_message_count: row.get(8)?,
        created_at: row.get(9)?,
    })
}
