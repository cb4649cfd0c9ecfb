//! Microphone capture worker.
//!
//! The audio device callback must never block, so it only copies sample
//! blocks into a [`SampleSink`]. A dedicated OS thread does the rest:
//! re-blocking into fixed-size frames, dropping frames of pure silence,
//! and PCM16/base64 encoding. Encoded frames come out of a
//! [`FrameReceiver`] on the async side.
//!
//! Both hops are bounded by `channel_capacity`. Under
//! [`OverflowPolicy::Backpressure`] a slow consumer stalls the worker, the
//! sample queue fills up, and [`SampleSink::push`] answers
//! [`PushError::Full`] to the callback. Refused blocks are counted.

use crate::codec::encode_frame;
use crate::error::ClientError;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

const STOP_POLL: Duration = Duration::from_millis(20);

/// What happens when frames are produced faster than they are sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Discard the oldest queued frames. Capture never stalls.
    #[default]
    DropOldest,
    /// Stall the capture thread until the sender catches up. The device
    /// callback then sees [`PushError::Full`].
    Backpressure,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureConfig {
    /// Samples per emitted frame.
    pub frame_size: usize,
    /// A frame is sent only if some sample exceeds this magnitude.
    pub silence_threshold: f32,
    /// Capacity of both the sample queue and the encoded-frame channel.
    pub channel_capacity: usize,
    pub overflow: OverflowPolicy,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            frame_size: 128,
            silence_threshold: 0.001,
            channel_capacity: 256,
            overflow: OverflowPolicy::DropOldest,
        }
    }
}

impl CaptureConfig {
    /// Large frames for hosts without a low-latency audio callback.
    pub fn legacy() -> Self {
        Self {
            frame_size: 4096,
            ..Self::default()
        }
    }
}

/// Counters shared between the worker and its owner.
#[derive(Debug, Default)]
pub struct CaptureStats {
    sent: AtomicU64,
    silent: AtomicU64,
    dropped: AtomicU64,
    refused: AtomicU64,
}

impl CaptureStats {
    pub fn frames_sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn frames_silent(&self) -> u64 {
        self.silent.load(Ordering::Relaxed)
    }

    pub fn frames_dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Sample blocks the sink refused because the queue was full.
    pub fn blocks_refused(&self) -> u64 {
        self.refused.load(Ordering::Relaxed)
    }
}

/// Why [`SampleSink::push`] did not queue a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PushError {
    #[error("capture queue is full")]
    Full,
    #[error("capture worker has stopped")]
    Closed,
}

/// Entry point for raw samples from the audio device.
#[derive(Debug, Clone)]
pub struct SampleSink {
    tx: std_mpsc::SyncSender<Vec<f32>>,
    stats: Arc<CaptureStats>,
}

impl SampleSink {
    /// Queues a block of samples without blocking.
    pub fn push(&self, samples: &[f32]) -> Result<(), PushError> {
        match self.tx.try_send(samples.to_vec()) {
            Ok(()) => Ok(()),
            Err(std_mpsc::TrySendError::Full(_)) => {
                let total = self.stats.refused.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::trace!(total, "capture queue full, block refused");
                Err(PushError::Full)
            }
            Err(std_mpsc::TrySendError::Disconnected(_)) => Err(PushError::Closed),
        }
    }
}

enum FrameSender {
    Lossy(broadcast::Sender<String>),
    Blocking(mpsc::Sender<String>),
}

impl FrameSender {
    /// Returns `false` when nobody is listening any more.
    fn send(&self, frame: String) -> bool {
        match self {
            Self::Lossy(tx) => tx.send(frame).is_ok(),
            Self::Blocking(tx) => tx.blocking_send(frame).is_ok(),
        }
    }
}

/// Async side of the capture channel.
#[derive(Debug)]
pub enum FrameReceiver {
    Lossy {
        rx: broadcast::Receiver<String>,
        stats: Arc<CaptureStats>,
    },
    Blocking(mpsc::Receiver<String>),
}

impl FrameReceiver {
    /// Next encoded frame, or `None` once the worker has stopped.
    pub async fn recv(&mut self) -> Option<String> {
        match self {
            Self::Lossy { rx, stats } => loop {
                match rx.recv().await {
                    Ok(frame) => return Some(frame),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        let total = stats.dropped.fetch_add(skipped, Ordering::Relaxed) + skipped;
                        tracing::warn!(skipped, total, "capture overflow, dropped oldest frames");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            },
            Self::Blocking(rx) => rx.recv().await,
        }
    }
}

/// Handle to the capture thread.
#[derive(Debug)]
pub struct CaptureWorker {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    stats: Arc<CaptureStats>,
}

impl CaptureWorker {
    /// Starts the worker thread.
    pub fn spawn(config: CaptureConfig) -> Result<(Self, SampleSink, FrameReceiver), ClientError> {
        if config.frame_size == 0 || config.channel_capacity == 0 {
            return Err(ClientError::Capture(
                "frame_size and channel_capacity must be non-zero".to_string(),
            ));
        }

        let stats = Arc::new(CaptureStats::default());
        let stop = Arc::new(AtomicBool::new(false));
        let (sample_tx, sample_rx) = std_mpsc::sync_channel(config.channel_capacity);

        let (sender, receiver) = match config.overflow {
            OverflowPolicy::DropOldest => {
                let (tx, rx) = broadcast::channel(config.channel_capacity);
                (
                    FrameSender::Lossy(tx),
                    FrameReceiver::Lossy {
                        rx,
                        stats: stats.clone(),
                    },
                )
            }
            OverflowPolicy::Backpressure => {
                let (tx, rx) = mpsc::channel(config.channel_capacity);
                (FrameSender::Blocking(tx), FrameReceiver::Blocking(rx))
            }
        };

        let handle = {
            let stats = stats.clone();
            let stop = stop.clone();
            std::thread::Builder::new()
                .name("parley-capture".to_string())
                .spawn(move || run(sample_rx, sender, config, &stats, &stop))
                .map_err(|e| ClientError::Capture(e.to_string()))?
        };

        tracing::debug!(
            frame_size = config.frame_size,
            overflow = ?config.overflow,
            "capture worker started"
        );

        Ok((
            Self {
                stop,
                handle: Some(handle),
                stats: stats.clone(),
            },
            SampleSink {
                tx: sample_tx,
                stats: stats.clone(),
            },
            receiver,
        ))
    }

    pub fn stats(&self) -> &Arc<CaptureStats> {
        &self.stats
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Signals the thread to exit. Safe to call any number of times.
    ///
    /// The thread winds down on its own within a few milliseconds; the
    /// frame receiver then yields `None`.
    pub fn stop(&mut self) {
        if self.handle.take().is_none() {
            return;
        }
        self.stop.store(true, Ordering::Release);
        tracing::debug!(
            sent = self.stats.frames_sent(),
            silent = self.stats.frames_silent(),
            dropped = self.stats.frames_dropped(),
            refused = self.stats.blocks_refused(),
            "capture worker stopped"
        );
    }
}

impl Drop for CaptureWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn is_silent(frame: &[f32], threshold: f32) -> bool {
    frame.iter().all(|s| s.abs() <= threshold)
}

fn run(
    samples: std_mpsc::Receiver<Vec<f32>>,
    out: FrameSender,
    config: CaptureConfig,
    stats: &CaptureStats,
    stop: &AtomicBool,
) {
    let mut pending: Vec<f32> = Vec::with_capacity(config.frame_size * 2);

    while !stop.load(Ordering::Acquire) {
        match samples.recv_timeout(STOP_POLL) {
            Ok(block) => pending.extend_from_slice(&block),
            Err(std_mpsc::RecvTimeoutError::Timeout) => continue,
            Err(std_mpsc::RecvTimeoutError::Disconnected) => break,
        }

        while pending.len() >= config.frame_size {
            let frame: Vec<f32> = pending.drain(..config.frame_size).collect();
            if is_silent(&frame, config.silence_threshold) {
                stats.silent.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            if !out.send(encode_frame(&frame)) {
                return;
            }
            stats.sent.fetch_add(1, Ordering::Relaxed);
        }
    }
}
