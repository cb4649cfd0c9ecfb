use serde::{Deserialize, Serialize};
use std::fmt;

fn default_token_ttl_seconds() -> u64 {
    3600
}

fn default_elevenlabs_base_url() -> String {
    "https://api.elevenlabs.io".to_string()
}

fn default_llm_model() -> String {
    "qwen-3-30b-a3b".to_string()
}

fn default_tts_model() -> String {
    "eleven_flash_v2".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

#[derive(Clone, Serialize, Deserialize)]
pub struct LiveKitConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default, skip_serializing)]
    pub api_secret: String,
    /// JWT token TTL in seconds for LiveKit join tokens. Default: 3600 (1 hour).
    #[serde(default = "default_token_ttl_seconds")]
    pub token_ttl_seconds: u64,
    /// Create the room through the Room Service before handing out the token.
    /// LiveKit otherwise creates it on first join.
    #[serde(default)]
    pub pre_create_room: bool,
}

impl Default for LiveKitConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            api_key: String::new(),
            api_secret: String::new(),
            token_ttl_seconds: default_token_ttl_seconds(),
            pre_create_room: false,
        }
    }
}

impl fmt::Debug for LiveKitConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveKitConfig")
            .field("url", &self.url)
            .field("api_key", &self.api_key)
            .field("api_secret", &"[REDACTED]")
            .field("token_ttl_seconds", &self.token_ttl_seconds)
            .field("pre_create_room", &self.pre_create_room)
            .finish()
    }
}

impl LiveKitConfig {
    pub fn new(
        url: impl Into<String>,
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            ..Default::default()
        }
    }

    /// Whether url, key and secret are all present.
    pub fn has_credentials(&self) -> bool {
        !self.url.is_empty() && !self.api_key.is_empty() && !self.api_secret.is_empty()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ElevenLabsConfig {
    #[serde(default, skip_serializing)]
    pub api_key: String,
    #[serde(default = "default_elevenlabs_base_url")]
    pub base_url: String,
    /// LLM backing the conversational agent.
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_tts_model")]
    pub tts_model: String,
    /// Per-request timeout for the REST API.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for ElevenLabsConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_elevenlabs_base_url(),
            model: default_llm_model(),
            tts_model: default_tts_model(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl fmt::Debug for ElevenLabsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElevenLabsConfig")
            .field("api_key", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("tts_model", &self.tts_model)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

impl ElevenLabsConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            ..Default::default()
        }
    }
}
