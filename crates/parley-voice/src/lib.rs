//! Remote voice providers for Parley.
//!
//! A voice session is hosted by one of two providers:
//!
//! - **LiveKit**: a managed real-time media room. The server mints a join
//!   token carrying the persona context as participant metadata; an agent
//!   worker on the LiveKit side reads that metadata and speaks as the
//!   persona. Audio reaches the client as a subscribed track.
//! - **ElevenLabs**: a conversational agent created on demand through the
//!   REST API, reached by the client over a signed WebSocket URL that
//!   carries JSON control frames and base64 PCM audio.
//!
//! Both sit behind the [`VoiceProvider`] trait so that session
//! orchestration never depends on which one is configured. The persona
//! system prompt is rendered by a [`PersonaContextBuilder`].

pub mod config;
pub mod elevenlabs;
pub mod error;
pub mod prompt;
pub mod provider;
pub mod service;

pub use config::{ElevenLabsConfig, LiveKitConfig};
pub use elevenlabs::ElevenLabsClient;
pub use error::VoiceError;
pub use prompt::{PersonaContextBuilder, TemplatePromptBuilder, DEFAULT_SYSTEM_PROMPT};
pub use provider::{
    ElevenLabsProvider, LiveKitProvider, ProviderSession, ProviderSessionRequest, VoiceProvider,
};
pub use service::VoiceService;

/// Voice used when a persona has none assigned.
pub const DEFAULT_VOICE_ID: &str = "21m00Tcm4TlvDq8ikWAM";

/// Display name of [`DEFAULT_VOICE_ID`].
pub const DEFAULT_VOICE_NAME: &str = "Rachel";
