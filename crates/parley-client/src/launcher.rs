//! HTTP calls to the Parley server that start and end a voice session.

use crate::error::ClientError;
use crate::session::SessionSummary;
use parley_types::{
    EndSessionRequest, EndSessionResponse, ErrorResponse, StartOutcome, StartSessionRequest,
    VoiceSessionConfig,
};
use reqwest::StatusCode;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

/// Starts and ends sessions against a Parley server.
///
/// A start for a key that is already in flight from this launcher returns
/// [`StartOutcome::Duplicate`] without touching the network, which absorbs
/// double clicks and re-renders before the server's dedup is needed.
#[derive(Debug, Clone)]
pub struct SessionLauncher {
    http: reqwest::Client,
    base_url: String,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

struct InFlight<'a> {
    keys: &'a Mutex<HashSet<String>>,
    key: String,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

async fn server_error(response: reqwest::Response) -> ClientError {
    let status = response.status().as_u16();
    let message = match response.json::<ErrorResponse>().await {
        Ok(body) => match body.details {
            Some(details) => format!("{}: {}", body.error, details),
            None => body.error,
        },
        Err(_) => format!("unexpected status {status}"),
    };
    ClientError::Server { status, message }
}

impl SessionLauncher {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    fn claim(&self, key: String) -> Option<InFlight<'_>> {
        let mut keys = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if !keys.insert(key.clone()) {
            return None;
        }
        Some(InFlight {
            keys: &self.in_flight,
            key,
        })
    }

    pub async fn start(&self, request: &StartSessionRequest) -> Result<StartOutcome, ClientError> {
        let Some(_guard) = self.claim(request.dedup_key()) else {
            tracing::debug!(key = %request.dedup_key(), "start already in flight");
            return Ok(StartOutcome::Duplicate);
        };

        let response = self
            .http
            .post(format!("{}/api/voice/start-session", self.base_url))
            .json(request)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(StartOutcome::Started(
                response.json::<VoiceSessionConfig>().await?,
            )),
            StatusCode::ACCEPTED => Ok(StartOutcome::Duplicate),
            _ => Err(server_error(response).await),
        }
    }

    pub async fn end(&self, request: &EndSessionRequest) -> Result<EndSessionResponse, ClientError> {
        let response = self
            .http
            .post(format!("{}/api/voice/end-session", self.base_url))
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(server_error(response).await);
        }
        Ok(response.json().await?)
    }

    /// Ends a session with the transcript the client collected.
    pub async fn finish(
        &self,
        conversation_id: &str,
        summary: &SessionSummary,
    ) -> Result<EndSessionResponse, ClientError> {
        let request = EndSessionRequest {
            conversation_id: Some(conversation_id.to_string()),
            transcript_data: Some(summary.transcript.clone()),
            provider_conversation_id: summary.provider_conversation_id.clone(),
        };
        self.end(&request).await
    }
}
