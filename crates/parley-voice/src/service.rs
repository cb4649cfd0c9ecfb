use crate::config::LiveKitConfig;
use crate::error::VoiceError;
use livekit_api::access_token::{AccessToken, VideoGrants};
use livekit_api::services::room::{CreateRoomOptions, RoomClient};
use livekit_protocol::Room;
use std::time::Duration;

/// Server-side LiveKit access: join tokens and the Room Service.
#[derive(Debug)]
pub struct VoiceService {
    config: LiveKitConfig,
    room_client: RoomClient,
}

impl VoiceService {
    pub fn new(config: LiveKitConfig) -> Self {
        let room_client =
            RoomClient::with_api_key(&config.url, &config.api_key, &config.api_secret);
        Self {
            config,
            room_client,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.has_credentials()
    }

    pub fn config(&self) -> &LiveKitConfig {
        &self.config
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }

    pub async fn create_room(&self, name: &str) -> Result<Room, VoiceError> {
        self.room_client
            .create_room(name, CreateRoomOptions::default())
            .await
            .map_err(|e| VoiceError::RoomService(e.to_string()))
    }

    /// Mints a join token for one participant of one room.
    ///
    /// `metadata` is attached to the participant and is how the agent worker
    /// in the room learns which persona to play.
    pub fn generate_join_token(
        &self,
        room_name: &str,
        participant_identity: &str,
        participant_name: &str,
        metadata: Option<&str>,
    ) -> Result<String, VoiceError> {
        let mut token = AccessToken::with_api_key(&self.config.api_key, &self.config.api_secret)
            .with_identity(participant_identity)
            .with_name(participant_name)
            .with_grants(VideoGrants {
                room_join: true,
                room: room_name.to_string(),
                can_publish: true,
                can_subscribe: true,
                can_publish_data: true,
                ..Default::default()
            })
            .with_ttl(Duration::from_secs(self.config.token_ttl_seconds));

        if let Some(metadata) = metadata {
            token = token.with_metadata(metadata);
        }

        token.to_jwt().map_err(VoiceError::LiveKit)
    }
}
