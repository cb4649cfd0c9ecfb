//! Gapless playback of downlink audio chunks.
//!
//! Chunks play strictly one after another in arrival order. Every started
//! chunk gets a [`Ticket`]; the output reports completion with that ticket.
//! A flush (user interruption) bumps the generation, so completions from
//! chunks cut off by the flush are recognised as stale and ignored.

use crate::error::ClientError;
use std::collections::VecDeque;

/// Identifies one started chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ticket {
    generation: u64,
    seq: u64,
}

/// Device side of playback.
///
/// Implementations start a chunk and later report its end, typically by
/// sending the ticket back over a channel the session listens on.
pub trait AudioOutput: Send {
    fn start(&mut self, chunk: Vec<f32>, ticket: Ticket) -> Result<(), ClientError>;

    /// Silences everything currently playing.
    fn stop_all(&mut self);

    /// Releases the output device.
    fn close(&mut self);
}

/// What a completion did to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The ticket belonged to a flushed chunk or is otherwise unknown.
    Stale,
    /// The next queued chunk was started.
    Continued,
    /// Nothing left to play.
    Drained,
}

#[derive(Debug)]
pub struct PlaybackQueue<O: AudioOutput> {
    output: O,
    queue: VecDeque<Vec<f32>>,
    playing: Option<Ticket>,
    generation: u64,
    next_seq: u64,
    closed: bool,
}

impl<O: AudioOutput> PlaybackQueue<O> {
    pub fn new(output: O) -> Self {
        Self {
            output,
            queue: VecDeque::new(),
            playing: None,
            generation: 0,
            next_seq: 0,
            closed: false,
        }
    }

    /// Queues a chunk, starting it right away if nothing is playing.
    pub fn enqueue(&mut self, chunk: Vec<f32>) -> Result<(), ClientError> {
        if self.closed || chunk.is_empty() {
            return Ok(());
        }
        self.queue.push_back(chunk);
        if self.playing.is_none() {
            self.start_next()?;
        }
        Ok(())
    }

    /// Handles the end of a chunk.
    pub fn on_ended(&mut self, ticket: Ticket) -> Result<Completion, ClientError> {
        if self.playing != Some(ticket) {
            return Ok(Completion::Stale);
        }
        self.playing = None;
        if self.start_next()? {
            Ok(Completion::Continued)
        } else {
            Ok(Completion::Drained)
        }
    }

    /// Drops everything queued and silences the current chunk.
    pub fn flush(&mut self) {
        self.generation += 1;
        let discarded = self.queue.len() + usize::from(self.playing.is_some());
        self.queue.clear();
        self.playing = None;
        self.output.stop_all();
        tracing::debug!(discarded, "playback flushed");
    }

    pub fn is_idle(&self) -> bool {
        self.playing.is_none() && self.queue.is_empty()
    }

    /// Chunks waiting behind the one playing.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Flushes and releases the output. Later calls do nothing.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.flush();
        self.output.close();
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn output(&self) -> &O {
        &self.output
    }

    fn start_next(&mut self) -> Result<bool, ClientError> {
        let Some(chunk) = self.queue.pop_front() else {
            return Ok(false);
        };
        let ticket = Ticket {
            generation: self.generation,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.playing = Some(ticket);
        self.output.start(chunk, ticket)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        started: Vec<(Vec<f32>, Ticket)>,
        stops: usize,
        closes: usize,
    }

    impl AudioOutput for Recorder {
        fn start(&mut self, chunk: Vec<f32>, ticket: Ticket) -> Result<(), ClientError> {
            self.started.push((chunk, ticket));
            Ok(())
        }

        fn stop_all(&mut self) {
            self.stops += 1;
        }

        fn close(&mut self) {
            self.closes += 1;
        }
    }

    fn last_ticket(q: &PlaybackQueue<Recorder>) -> Ticket {
        q.output().started.last().unwrap().1
    }

    #[test]
    fn chunks_play_back_to_back_in_order() {
        let mut q = PlaybackQueue::new(Recorder::default());
        q.enqueue(vec![0.1]).unwrap();
        q.enqueue(vec![0.2]).unwrap();
        q.enqueue(vec![0.3]).unwrap();
        assert_eq!(q.output().started.len(), 1);
        assert_eq!(q.queued(), 2);

        assert_eq!(q.on_ended(last_ticket(&q)).unwrap(), Completion::Continued);
        assert_eq!(q.on_ended(last_ticket(&q)).unwrap(), Completion::Continued);
        assert_eq!(q.on_ended(last_ticket(&q)).unwrap(), Completion::Drained);
        assert!(q.is_idle());

        let order: Vec<f32> = q.output().started.iter().map(|(c, _)| c[0]).collect();
        assert_eq!(order, vec![0.1, 0.2, 0.3]);
    }

    #[test]
    fn flushed_chunk_completion_is_stale() {
        let mut q = PlaybackQueue::new(Recorder::default());
        q.enqueue(vec![0.1]).unwrap();
        q.enqueue(vec![0.2]).unwrap();
        let cut = last_ticket(&q);

        q.flush();
        assert!(q.is_idle());
        assert_eq!(q.output().stops, 1);

        q.enqueue(vec![0.9]).unwrap();
        assert_eq!(q.on_ended(cut).unwrap(), Completion::Stale);
        assert!(!q.is_idle(), "new chunk must keep playing");
        assert_eq!(q.on_ended(last_ticket(&q)).unwrap(), Completion::Drained);
    }

    #[test]
    fn close_is_idempotent_and_final() {
        let mut q = PlaybackQueue::new(Recorder::default());
        q.enqueue(vec![0.1]).unwrap();
        q.close();
        q.close();
        assert_eq!(q.output().closes, 1);
        q.enqueue(vec![0.5]).unwrap();
        assert_eq!(q.output().started.len(), 1);
        assert!(q.is_closed());
    }
}
