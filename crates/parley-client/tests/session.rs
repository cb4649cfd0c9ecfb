use async_trait::async_trait;
use parley_client::codec::{decode_chunk, encode_frame};
use parley_client::protocol::{
    AgentResponseEvent, AudioEvent, InitiationMetadataEvent, PingEvent, UserTranscriptEvent,
};
use parley_client::{
    AudioOutput, CaptureConfig, CaptureWorker, ClientError, InboundEvent, OutboundFrame,
    OverflowPolicy, ProtocolSession, PushError, SessionState, SessionSummary, Ticket, Transport,
    TransportEvent, Turn,
};
use parley_types::Role;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct MockTransport {
    events: mpsc::UnboundedReceiver<TransportEvent>,
    sent: Arc<Mutex<Vec<OutboundFrame>>>,
    closed_with: Arc<Mutex<Vec<String>>>,
    fail_open: bool,
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&mut self) -> Result<(), ClientError> {
        if self.fail_open {
            return Err(ClientError::NotConnected);
        }
        Ok(())
    }

    async fn send(&mut self, frame: OutboundFrame) -> Result<(), ClientError> {
        self.sent.lock().unwrap().push(frame);
        Ok(())
    }

    async fn next_event(&mut self) -> TransportEvent {
        match self.events.recv().await {
            Some(event) => event,
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self, reason: &str) -> Result<(), ClientError> {
        self.closed_with.lock().unwrap().push(reason.to_string());
        Ok(())
    }
}

#[derive(Default)]
struct OutputLog {
    started: Vec<(Vec<f32>, Ticket)>,
    stops: usize,
    closes: usize,
}

struct MockOutput(Arc<Mutex<OutputLog>>);

impl AudioOutput for MockOutput {
    fn start(&mut self, chunk: Vec<f32>, ticket: Ticket) -> Result<(), ClientError> {
        self.0.lock().unwrap().started.push((chunk, ticket));
        Ok(())
    }

    fn stop_all(&mut self) {
        self.0.lock().unwrap().stops += 1;
    }

    fn close(&mut self) {
        self.0.lock().unwrap().closes += 1;
    }
}

type Session = ProtocolSession<MockTransport, MockOutput>;

struct Harness {
    feed: mpsc::UnboundedSender<TransportEvent>,
    done: mpsc::UnboundedSender<Ticket>,
    sent: Arc<Mutex<Vec<OutboundFrame>>>,
    closed_with: Arc<Mutex<Vec<String>>>,
    output: Arc<Mutex<OutputLog>>,
    state: watch::Receiver<SessionState>,
    cancel: CancellationToken,
    task: JoinHandle<(Session, Result<SessionSummary, ClientError>)>,
}

fn start_with(fail_open: bool, configure: impl FnOnce(Session) -> Session) -> Harness {
    let (feed, events) = mpsc::unbounded_channel();
    let (done, completions) = mpsc::unbounded_channel();
    let sent = Arc::new(Mutex::new(Vec::new()));
    let closed_with = Arc::new(Mutex::new(Vec::new()));
    let output = Arc::new(Mutex::new(OutputLog::default()));

    let transport = MockTransport {
        events,
        sent: sent.clone(),
        closed_with: closed_with.clone(),
        fail_open,
    };
    let session = configure(ProtocolSession::new(
        transport,
        MockOutput(output.clone()),
        completions,
    ));
    let state = session.subscribe();
    let cancel = session.cancel_token();

    let task = tokio::spawn(async move {
        let mut session = session;
        let result = session.run().await;
        (session, result)
    });

    Harness {
        feed,
        done,
        sent,
        closed_with,
        output,
        state,
        cancel,
        task,
    }
}

fn start() -> Harness {
    start_with(false, |s| s)
}

fn audio(samples: &[f32]) -> TransportEvent {
    TransportEvent::Inbound(InboundEvent::Audio {
        audio_event: AudioEvent {
            audio_base_64: encode_frame(samples),
        },
    })
}

fn ping(id: i64) -> TransportEvent {
    TransportEvent::Inbound(InboundEvent::Ping {
        ping_event: PingEvent {
            event_id: json!(id),
        },
    })
}

async fn eventually(what: &str, cond: impl Fn() -> bool) {
    let waited = tokio::time::timeout(Duration::from_secs(2), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {what}");
}

async fn wait_turn(state: &mut watch::Receiver<SessionState>, turn: Turn) {
    tokio::time::timeout(
        Duration::from_secs(2),
        state.wait_for(|s| *s == SessionState::Connected(turn)),
    )
    .await
    .expect("turn change timed out")
    .expect("session dropped");
}

impl Harness {
    fn started(&self) -> usize {
        self.output.lock().unwrap().started.len()
    }

    fn ticket(&self, index: usize) -> Ticket {
        self.output.lock().unwrap().started[index].1
    }

    fn pongs(&self) -> usize {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|f| matches!(f, OutboundFrame::Pong { .. }))
            .count()
    }

    /// Round-trips a ping so every earlier event is known to be handled.
    async fn sync(&self, id: i64) {
        let before = self.pongs();
        self.feed.send(ping(id)).unwrap();
        eventually("pong", || self.pongs() > before).await;
    }

    async fn finish(self) -> (Session, SessionSummary) {
        let (session, result) = self.task.await.unwrap();
        (session, result.expect("session should end cleanly"))
    }
}

#[tokio::test]
async fn each_ping_gets_exactly_one_pong() {
    let h = start();
    h.feed.send(ping(7)).unwrap();
    h.feed
        .send(TransportEvent::Closed {
            code: 1000,
            reason: "done".into(),
        })
        .unwrap();

    let sent = h.sent.clone();
    let (_, summary) = h.finish().await;
    assert_eq!(
        *sent.lock().unwrap(),
        vec![OutboundFrame::Pong { event_id: json!(7) }]
    );
    assert_eq!(summary.close_code, 1000);
    assert!(!summary.is_connection_lost());
}

#[tokio::test]
async fn audio_plays_gaplessly_then_returns_to_listening() {
    let mut h = start();
    wait_turn(&mut h.state, Turn::Listening).await;

    h.feed.send(audio(&[0.25, 0.25])).unwrap();
    h.feed.send(audio(&[-0.5, -0.5])).unwrap();
    wait_turn(&mut h.state, Turn::Speaking).await;
    h.sync(1).await;
    assert_eq!(h.started(), 1, "second chunk waits for the first");

    h.done.send(h.ticket(0)).unwrap();
    eventually("second chunk", || h.started() == 2).await;
    assert_eq!(*h.state.borrow(), SessionState::Connected(Turn::Speaking));

    h.done.send(h.ticket(1)).unwrap();
    wait_turn(&mut h.state, Turn::Listening).await;

    {
        let log = h.output.lock().unwrap();
        assert_eq!(log.started[0].0, decode_chunk(&encode_frame(&[0.25, 0.25])).unwrap());
        assert_eq!(log.started[1].0, vec![-0.5, -0.5]);
    }

    h.cancel.cancel();
    h.finish().await;
}

#[tokio::test]
async fn speech_end_waits_for_playback_to_drain() {
    let mut h = start();
    h.feed.send(audio(&[0.5])).unwrap();
    wait_turn(&mut h.state, Turn::Speaking).await;

    h.feed
        .send(TransportEvent::Inbound(InboundEvent::SpeechEnd))
        .unwrap();
    h.sync(1).await;
    assert_eq!(*h.state.borrow(), SessionState::Connected(Turn::Speaking));

    h.done.send(h.ticket(0)).unwrap();
    wait_turn(&mut h.state, Turn::Listening).await;

    h.cancel.cancel();
    h.finish().await;
}

#[tokio::test]
async fn interruption_discards_queued_audio() {
    let mut h = start();
    for level in [0.1, 0.2, 0.3] {
        h.feed.send(audio(&[level])).unwrap();
    }
    wait_turn(&mut h.state, Turn::Speaking).await;
    h.sync(1).await;
    let cut = h.ticket(0);

    h.feed
        .send(TransportEvent::Inbound(InboundEvent::Interruption))
        .unwrap();
    wait_turn(&mut h.state, Turn::Listening).await;
    assert_eq!(h.output.lock().unwrap().stops, 1);

    // The cut-off chunk still reports its end; nothing may resume.
    h.done.send(cut).unwrap();
    h.sync(2).await;
    assert_eq!(h.started(), 1);
    assert_eq!(*h.state.borrow(), SessionState::Connected(Turn::Listening));

    h.cancel.cancel();
    h.finish().await;
}

#[tokio::test]
async fn transcript_is_collected_in_order() {
    let h = start();
    h.feed
        .send(TransportEvent::Inbound(InboundEvent::ConversationInitiationMetadata {
            conversation_initiation_metadata_event: InitiationMetadataEvent {
                conversation_id: "conv-42".into(),
            },
        }))
        .unwrap();
    h.feed
        .send(TransportEvent::Inbound(InboundEvent::UserTranscript {
            user_transcript_event: UserTranscriptEvent {
                user_transcript: "I'm worried about the pay offer.".into(),
            },
        }))
        .unwrap();
    for text in ["That's understandable.", "   "] {
        h.feed
            .send(TransportEvent::Inbound(InboundEvent::AgentResponse {
                agent_response_event: AgentResponseEvent {
                    agent_response: text.into(),
                },
            }))
            .unwrap();
    }
    h.feed
        .send(TransportEvent::Inbound(InboundEvent::VadScore))
        .unwrap();
    h.feed
        .send(TransportEvent::Closed {
            code: 1000,
            reason: String::new(),
        })
        .unwrap();

    let (_, summary) = h.finish().await;
    let roles: Vec<Role> = summary.transcript.iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::User, Role::Assistant]);
    assert_eq!(summary.transcript[1].content, "That's understandable.");
    assert_eq!(summary.provider_conversation_id.as_deref(), Some("conv-42"));
}

#[tokio::test]
async fn abnormal_close_is_reported_as_connection_lost() {
    let h = start();
    h.feed
        .send(TransportEvent::Closed {
            code: 1006,
            reason: String::new(),
        })
        .unwrap();

    let mut state = h.state.clone();
    let (_, summary) = h.finish().await;
    assert!(summary.is_connection_lost());
    assert_eq!(summary.description, "Abnormal closure");
    assert!(matches!(
        *state.borrow_and_update(),
        SessionState::Closed { code: 1006, .. }
    ));
}

#[tokio::test]
async fn cancel_closes_normally_and_teardown_is_idempotent() {
    let mut h = start();
    wait_turn(&mut h.state, Turn::Listening).await;
    h.cancel.cancel();

    let closed_with = h.closed_with.clone();
    let output = h.output.clone();
    let (mut session, summary) = h.finish().await;

    assert_eq!(summary.close_code, 1000);
    assert_eq!(summary.close_reason, "User ended session");
    assert_eq!(*closed_with.lock().unwrap(), vec!["User ended session"]);
    assert!(session.is_released());

    session.release();
    session.release();
    drop(session);
    assert_eq!(output.lock().unwrap().closes, 1);
}

#[tokio::test]
async fn failed_open_releases_resources() {
    let h = start_with(true, |s| s);
    let output = h.output.clone();
    let state = h.state.clone();
    let (session, result) = h.task.await.unwrap();

    assert!(matches!(result, Err(ClientError::NotConnected)));
    assert!(session.is_released());
    assert_eq!(output.lock().unwrap().closes, 1);
    assert!(matches!(*state.borrow(), SessionState::Closed { .. }));
}

#[tokio::test]
async fn time_limit_ends_the_call() {
    let h = start_with(false, |s| s.with_max_duration(Duration::from_millis(50)));
    let closed_with = h.closed_with.clone();
    let (_, summary) = h.finish().await;

    assert_eq!(summary.close_code, 1000);
    assert_eq!(
        *closed_with.lock().unwrap(),
        vec![summary.close_reason.clone()]
    );
}

#[tokio::test]
async fn captured_speech_is_sent_and_silence_is_not() {
    let config = CaptureConfig {
        frame_size: 4,
        overflow: OverflowPolicy::Backpressure,
        ..CaptureConfig::default()
    };
    let (worker, sink, frames) = CaptureWorker::spawn(config).unwrap();
    let stats = worker.stats().clone();

    let h = start_with(false, move |s| s.with_capture(worker, frames));
    sink.push(&[0.0, 0.0, 0.0005, 0.0]).unwrap();
    sink.push(&[0.0, 0.3, -0.3, 0.0]).unwrap();

    let audio_frames = || {
        h.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|f| matches!(f, OutboundFrame::UserAudio(_)))
            .count()
    };
    eventually("microphone frame", || audio_frames() == 1).await;
    h.sync(1).await;
    assert_eq!(audio_frames(), 1);
    assert_eq!(stats.frames_silent(), 1);
    assert_eq!(stats.frames_sent(), 1);

    h.cancel.cancel();
    h.finish().await;

    // The worker stops with the session; the sink reports it eventually.
    eventually("capture shutdown", || {
        sink.push(&[0.0]) == Err(PushError::Closed)
    })
    .await;
}
