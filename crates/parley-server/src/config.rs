//! Server configuration loading from file and environment variables.

use parley_types::ProviderKind;
use parley_voice::{ElevenLabsConfig, LiveKitConfig};
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use thiserror::Error;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Session orchestration settings.
    #[serde(default)]
    pub voice: VoiceConfig,

    /// Media-room provider credentials.
    #[serde(default)]
    pub livekit: LiveKitConfig,

    /// Agent provider credentials.
    #[serde(default)]
    pub elevenlabs: ElevenLabsConfig,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,

    #[serde(default = "default_port")]
    pub port: u16,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,

    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "parley_server=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

/// Voice session settings.
#[derive(Debug, Clone, Deserialize)]
pub struct VoiceConfig {
    /// Which provider hosts new sessions.
    #[serde(default = "default_provider")]
    pub provider: ProviderKind,

    /// Session length cap when the organisation sets none.
    #[serde(default = "default_max_duration_secs")]
    pub default_max_duration_secs: u64,

    /// Claims stuck in `CREATING` longer than this are released by the
    /// background sweeper. `0` disables the sweeper.
    #[serde(default = "default_stale_claim_secs")]
    pub stale_claim_secs: u64,

    /// Deadline for one provider session creation. Should stay below
    /// `stale_claim_secs`.
    #[serde(default = "default_provider_timeout_secs")]
    pub provider_timeout_secs: u64,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    3000
}

fn default_db_path() -> String {
    "parley.db".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_pool_max_size() -> u32 {
    8
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_provider() -> ProviderKind {
    ProviderKind::LiveKit
}

fn default_max_duration_secs() -> u64 {
    1800
}

fn default_stale_claim_secs() -> u64 {
    300
}

fn default_provider_timeout_secs() -> u64 {
    60
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            pool_max_size: default_pool_max_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            default_max_duration_secs: default_max_duration_secs(),
            stale_claim_secs: default_stale_claim_secs(),
            provider_timeout_secs: default_provider_timeout_secs(),
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `PARLEY_HOST`, `PARLEY_PORT`
/// - `PARLEY_DB_PATH`
/// - `PARLEY_LOG_LEVEL`, `PARLEY_LOG_JSON` ("true" or "1")
/// - `PARLEY_VOICE_PROVIDER` ("livekit" or "elevenlabs")
/// - `LIVEKIT_URL`, `LIVEKIT_API_KEY`, `LIVEKIT_API_SECRET`
/// - `ELEVEN_LABS_API_KEY`
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

fn apply_env_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(parsed) = var("PARLEY_HOST").and_then(|v| v.parse().ok()) {
        config.server.host = parsed;
    }
    if let Some(parsed) = var("PARLEY_PORT").and_then(|v| v.parse().ok()) {
        config.server.port = parsed;
    }
    if let Some(db_path) = var("PARLEY_DB_PATH") {
        config.database.path = db_path;
    }
    if let Some(level) = var("PARLEY_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = var("PARLEY_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
    if let Some(provider) = var("PARLEY_VOICE_PROVIDER") {
        match provider.parse() {
            Ok(parsed) => config.voice.provider = parsed,
            Err(e) => tracing::warn!("ignoring PARLEY_VOICE_PROVIDER: {}", e),
        }
    }
    if let Some(url) = var("LIVEKIT_URL") {
        config.livekit.url = url;
    }
    if let Some(key) = var("LIVEKIT_API_KEY") {
        config.livekit.api_key = key;
    }
    if let Some(secret) = var("LIVEKIT_API_SECRET") {
        config.livekit.api_secret = secret;
    }
    if let Some(key) = var("ELEVEN_LABS_API_KEY") {
        config.elevenlabs.api_key = key;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn empty_file_yields_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.database.path, "parley.db");
        assert_eq!(config.voice.provider, ProviderKind::LiveKit);
        assert_eq!(config.voice.default_max_duration_secs, 1800);
        assert_eq!(config.voice.stale_claim_secs, 300);
        assert_eq!(config.voice.provider_timeout_secs, 60);
        assert_eq!(config.livekit.token_ttl_seconds, 3600);
        assert_eq!(config.elevenlabs.base_url, "https://api.elevenlabs.io");
    }

    #[test]
    fn parses_all_sections() {
        let config: Config = toml::from_str(
            r#"
            [server]
            host = "0.0.0.0"
            port = 8080

            [database]
            path = "/var/lib/parley.db"
            pool_max_size = 4

            [logging]
            level = "debug"
            json = true

            [voice]
            provider = "elevenlabs"
            stale_claim_secs = 0
            provider_timeout_secs = 20

            [livekit]
            url = "wss://lk.example.com"
            api_key = "key"
            api_secret = "secret"
            pre_create_room = true

            [elevenlabs]
            api_key = "xi-key"
            request_timeout_secs = 10
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.database.pool_max_size, 4);
        assert!(config.logging.json);
        assert_eq!(config.voice.provider, ProviderKind::ElevenLabs);
        assert_eq!(config.voice.stale_claim_secs, 0);
        assert_eq!(config.voice.provider_timeout_secs, 20);
        assert_eq!(config.elevenlabs.request_timeout_secs, 10);
        assert!(config.livekit.has_credentials());
        assert!(config.livekit.pre_create_room);
        assert_eq!(config.elevenlabs.api_key, "xi-key");
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = load_config(Some("/nonexistent/parley-config.toml")).unwrap();
        assert_eq!(config.server.port, 3000);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[server\nport = ").unwrap();
        let err = load_config(path.to_str()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn environment_overrides_file_values() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("PARLEY_PORT", "9090"),
            ("PARLEY_LOG_JSON", "1"),
            ("PARLEY_VOICE_PROVIDER", "elevenlabs"),
            ("LIVEKIT_API_SECRET", "from-env"),
            ("ELEVEN_LABS_API_KEY", "xi-env"),
        ]);
        let mut config = Config::default();
        apply_env_overrides(&mut config, |key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.server.port, 9090);
        assert!(config.logging.json);
        assert_eq!(config.voice.provider, ProviderKind::ElevenLabs);
        assert_eq!(config.livekit.api_secret, "from-env");
        assert_eq!(config.elevenlabs.api_key, "xi-env");
    }

    #[test]
    fn unparseable_overrides_are_ignored() {
        let mut config = Config::default();
        apply_env_overrides(&mut config, |key| match key {
            "PARLEY_PORT" => Some("not-a-port".to_string()),
            "PARLEY_VOICE_PROVIDER" => Some("carrier-pigeon".to_string()),
            _ => None,
        });
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.voice.provider, ProviderKind::LiveKit);
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let mut config = Config::default();
        config.livekit.api_secret = "lk-secret".to_string();
        config.elevenlabs.api_key = "xi-secret".to_string();
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("lk-secret"));
        assert!(!rendered.contains("xi-secret"));
    }
}
