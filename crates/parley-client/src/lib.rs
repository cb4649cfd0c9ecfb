//! Client side of a Parley voice session.
//!
//! The pipeline has two directions:
//!
//! - **Uplink**: microphone samples are pushed into a [`capture`] worker
//!   running on its own thread, cut into fixed frames, stripped of silence,
//!   encoded to base64 PCM16 and handed to the session for sending.
//! - **Downlink**: audio chunks from the provider are decoded and played
//!   gaplessly, one after another, by a [`playback::PlaybackQueue`].
//!
//! [`session::ProtocolSession`] ties both directions to a [`transport`]
//! and tracks whose turn it is to speak. [`launcher::SessionLauncher`]
//! talks to the Parley server to start and end sessions.

pub mod capture;
pub mod codec;
pub mod error;
pub mod launcher;
pub mod playback;
pub mod protocol;
pub mod session;
pub mod transport;

pub use capture::{
    CaptureConfig, CaptureStats, CaptureWorker, FrameReceiver, OverflowPolicy, PushError,
    SampleSink,
};
pub use error::ClientError;
pub use launcher::SessionLauncher;
pub use playback::{AudioOutput, Completion, PlaybackQueue, Ticket};
pub use protocol::{InboundEvent, OutboundFrame};
pub use session::{close_reason_text, ProtocolSession, SessionState, SessionSummary, Turn};
pub use transport::{
    RoomConnection, RoomEvent, RoomTransport, TrackKind, Transport, TransportEvent,
    WebSocketTransport,
};
