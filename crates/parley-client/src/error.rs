use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid audio payload: {0}")]
    Decode(#[from] base64::DecodeError),

    /// The server answered a start/end call with an error status.
    #[error("server returned {status}: {message}")]
    Server { status: u16, message: String },

    #[error("transport is not connected")]
    NotConnected,

    #[error("room error: {0}")]
    Room(String),

    #[error("audio output error: {0}")]
    Output(String),

    #[error("capture error: {0}")]
    Capture(String),
}
