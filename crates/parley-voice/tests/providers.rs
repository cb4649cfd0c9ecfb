use axum::extract::{Path, Query};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use parley_conversations::{Persona, Scenario};
use parley_types::{ProviderKind, Role, TransportDetails};
use parley_voice::{
    ElevenLabsClient, ElevenLabsConfig, ElevenLabsProvider, LiveKitConfig, LiveKitProvider,
    ProviderSessionRequest, VoiceError, VoiceProvider, VoiceService,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;

const DEFAULT_URL: &str = "http://localhost:7880";
const DEFAULT_KEY: &str = "devkey";
const DEFAULT_SECRET: &str = "secret";

fn request() -> ProviderSessionRequest {
    ProviderSessionRequest {
        conversation_id: "c1".into(),
        persona: Persona {
            id: "p1".into(),
            name: "Dana".into(),
            voice_id: Some("voice-9".into()),
            ..Default::default()
        },
        scenario: Scenario {
            id: "s1".into(),
            title: "Pay Dispute".into(),
            description: "A member is unhappy".into(),
        },
        system_prompt: "You are Dana.".into(),
    }
}

#[derive(Deserialize)]
struct Claims {
    sub: String,
    name: String,
    metadata: String,
    video: VideoClaims,
}

#[derive(Deserialize)]
struct VideoClaims {
    room: String,
    #[serde(rename = "roomJoin")]
    room_join: bool,
    #[serde(rename = "canPublish")]
    can_publish: bool,
    #[serde(rename = "canSubscribe")]
    can_subscribe: bool,
}

#[tokio::test]
async fn livekit_session_token_carries_persona_metadata() {
    let provider = LiveKitProvider::new(VoiceService::new(LiveKitConfig::new(
        DEFAULT_URL,
        DEFAULT_KEY,
        DEFAULT_SECRET,
    )));
    assert_eq!(provider.kind(), ProviderKind::LiveKit);

    let session = provider.create_session(&request()).await.unwrap();
    assert_eq!(session.room, "voice-c1");

    let TransportDetails::Room {
        url,
        token,
        room_name,
    } = session.transport
    else {
        panic!("expected a room transport");
    };
    assert_eq!(url, DEFAULT_URL);
    assert_eq!(room_name, "voice-c1");

    use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
    let key = DecodingKey::from_secret(DEFAULT_SECRET.as_bytes());
    let claims = decode::<Claims>(&token, &key, &Validation::new(Algorithm::HS256))
        .expect("token should verify")
        .claims;

    assert_eq!(claims.sub, "user-c1");
    assert_eq!(claims.name, "User");
    assert_eq!(claims.video.room, "voice-c1");
    assert!(claims.video.room_join);
    assert!(claims.video.can_publish);
    assert!(claims.video.can_subscribe);

    let metadata: Value = serde_json::from_str(&claims.metadata).unwrap();
    assert_eq!(metadata["personaName"], "Dana");
    assert_eq!(metadata["voiceId"], "voice-9");
    assert_eq!(metadata["voiceName"], "Rachel");
    assert_eq!(metadata["scenarioTitle"], "Pay Dispute");
    assert_eq!(metadata["systemPrompt"], "You are Dana.");
}

#[tokio::test]
async fn livekit_without_credentials_fails() {
    let provider = LiveKitProvider::new(VoiceService::new(LiveKitConfig::default()));
    let err = provider.create_session(&request()).await.unwrap_err();
    assert!(matches!(err, VoiceError::Config(_)));
}

#[test]
fn secrets_are_redacted_and_defaults_apply() {
    let config: LiveKitConfig = toml::from_str(
        r#"
        url = "ws://localhost:7880"
        api_key = "key"
        api_secret = "hunter2"
        "#,
    )
    .unwrap();
    assert_eq!(config.token_ttl_seconds, 3600);
    assert!(!config.pre_create_room);
    assert!(!format!("{config:?}").contains("hunter2"));

    let eleven = ElevenLabsConfig::new("xi-secret");
    assert_eq!(eleven.base_url, "https://api.elevenlabs.io");
    assert_eq!(eleven.request_timeout_secs, 30);
    assert!(!format!("{eleven:?}").contains("xi-secret"));
}

async fn mock_elevenlabs() -> String {
    async fn create_agent(headers: HeaderMap, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
        if headers.get("xi-api-key").and_then(|v| v.to_str().ok()) != Some("xi-test") {
            return (StatusCode::UNAUTHORIZED, Json(json!({"detail": "bad key"})));
        }
        let voice = body["conversation_config"]["tts"]["voice_id"].clone();
        (StatusCode::OK, Json(json!({"agent_id": format!("agent-{}", voice.as_str().unwrap_or("none"))})))
    }

    async fn signed_url(Query(q): Query<HashMap<String, String>>) -> Json<Value> {
        Json(json!({
            "signed_url": format!("wss://convai.example/ws?agent_id={}", q["agent_id"])
        }))
    }

    async fn conversation(Path(id): Path<String>) -> Json<Value> {
        Json(json!({
            "conversation_id": id,
            "transcript": [
                {"role": "agent", "message": "Hello, I'm Dana.", "time_in_call_secs": 0},
                {"role": "user", "message": "Hi", "time_in_call_secs": 3}
            ],
            "metadata": {"call_duration_secs": 3}
        }))
    }

    let app = Router::new()
        .route("/v1/convai/agents/create", post(create_agent))
        .route("/v1/convai/conversation/get_signed_url", get(signed_url))
        .route("/v1/convai/conversations/{id}", get(conversation));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn eleven_provider(base_url: String, api_key: &str) -> ElevenLabsProvider {
    let config = ElevenLabsConfig {
        base_url,
        ..ElevenLabsConfig::new(api_key)
    };
    ElevenLabsProvider::new(ElevenLabsClient::new(config))
}

#[tokio::test]
async fn elevenlabs_session_creates_agent_then_signs_url() {
    let provider = eleven_provider(mock_elevenlabs().await, "xi-test");

    let session = provider.create_session(&request()).await.unwrap();
    assert_eq!(session.room, "agent-voice-9");
    assert_eq!(
        session.transport,
        TransportDetails::Socket {
            signed_url: "wss://convai.example/ws?agent_id=agent-voice-9".into(),
            agent_id: "agent-voice-9".into(),
        }
    );
}

#[tokio::test]
async fn elevenlabs_rejection_surfaces_status() {
    let provider = eleven_provider(mock_elevenlabs().await, "wrong");
    match provider.create_session(&request()).await {
        Err(VoiceError::Provider { status, .. }) => assert_eq!(status, 401),
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test]
async fn elevenlabs_request_times_out_when_the_api_hangs() {
    // Accepts connections and never answers.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });

    let config = ElevenLabsConfig {
        base_url: format!("http://{addr}"),
        request_timeout_secs: 1,
        ..ElevenLabsConfig::new("xi-test")
    };
    let provider = ElevenLabsProvider::new(ElevenLabsClient::new(config));

    let result = tokio::time::timeout(
        std::time::Duration::from_secs(10),
        provider.create_session(&request()),
    )
    .await
    .expect("client timeout should fire first");
    assert!(matches!(result, Err(VoiceError::Http(_))));
}

#[tokio::test]
async fn elevenlabs_refuses_empty_prompt() {
    let provider = eleven_provider(mock_elevenlabs().await, "xi-test");
    let mut req = request();
    req.system_prompt = "   ".into();
    assert!(matches!(
        provider.create_session(&req).await,
        Err(VoiceError::InvalidPrompt(_))
    ));
}

#[tokio::test]
async fn elevenlabs_transcript_export() {
    let provider = eleven_provider(mock_elevenlabs().await, "xi-test");
    let lines = provider
        .fetch_transcript("conv-77")
        .await
        .unwrap()
        .expect("ElevenLabs keeps transcripts");

    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0].role, Role::Assistant);
    assert_eq!(lines[1].role, Role::User);
    assert_eq!(lines[1].timestamp - lines[0].timestamp, 3_000);
}
