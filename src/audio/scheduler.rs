//! Gapless playback scheduling.
//!
//! Each chunk starts where the previous one ends, not when it arrived, so
//! delivery jitter never turns into audible gaps or overlaps. Times are
//! offsets on a monotonic [`Clock`].

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Monotonic time source for the scheduler.
pub trait Clock: Send {
    /// Time elapsed since the clock's origin.
    fn now(&self) -> Duration;
}

/// Wall-clock implementation backed by [`Instant`].
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Identifier handed out for every scheduled chunk.
pub type ChunkId = u64;

/// Placement of one chunk on the playback timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledChunk {
    pub id: ChunkId,
    pub start: Duration,
    pub duration: Duration,
}

impl ScheduledChunk {
    pub fn end(&self) -> Duration {
        self.start + self.duration
    }
}

/// Timeline bookkeeping for the playback pipeline.
///
/// Only the owning pipeline mutates this; nothing else reads the pending
/// queue except through [`PlaybackScheduler::pending`].
#[derive(Debug, Default)]
pub struct PlaybackScheduler {
    next_playback_time: Duration,
    pending: VecDeque<ScheduledChunk>,
    next_id: ChunkId,
}

impl PlaybackScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place a chunk at `max(next_playback_time, now)` and advance the
    /// running end time by its duration.
    pub fn schedule(&mut self, duration: Duration, now: Duration) -> ScheduledChunk {
        let start = self.next_playback_time.max(now);
        let chunk = ScheduledChunk {
            id: self.next_id,
            start,
            duration,
        };
        self.next_id += 1;
        self.next_playback_time = start + duration;
        self.pending.push_back(chunk);
        chunk
    }

    /// Drop a finished chunk. Returns `true` when this emptied the queue.
    ///
    /// Unknown ids (already flushed) are ignored and return `false`.
    pub fn finish(&mut self, id: ChunkId) -> bool {
        match self.pending.iter().position(|c| c.id == id) {
            Some(index) => {
                self.pending.remove(index);
                self.pending.is_empty()
            }
            None => false,
        }
    }

    /// Discard everything scheduled and restart the timeline at `now`.
    pub fn flush(&mut self, now: Duration) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        self.next_playback_time = now;
        dropped
    }

    pub fn next_playback_time(&self) -> Duration {
        self.next_playback_time
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn is_idle(&self) -> bool {
        self.pending.is_empty()
    }
}
