//! Gapless, ordered scheduling of decoded buffers onto the playback output.

use std::collections::HashSet;

use super::{AudioError, PlaybackBuffer, PlaybackOutput, SourceId};

/// Interval assigned to one scheduled buffer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledSource {
    pub id: SourceId,
    pub start: f64,
    pub end: f64,
}

/// Schedules buffers back to back on an output clock.
///
/// Each buffer starts at `max(next_start, clock)`, so playback never overlaps,
/// never starts in the past and keeps arrival order. All calls happen on the
/// session event loop, which makes the active set single-owner.
pub struct PlaybackScheduler {
    output: Box<dyn PlaybackOutput>,
    next_start: f64,
    active: HashSet<SourceId>,
    closed: bool,
}

impl PlaybackScheduler {
    pub fn new(output: Box<dyn PlaybackOutput>) -> Self {
        Self {
            output,
            next_start: 0.0,
            active: HashSet::new(),
            closed: false,
        }
    }

    /// Schedule a fully decoded buffer after everything already queued.
    pub fn enqueue(&mut self, buffer: PlaybackBuffer) -> Result<ScheduledSource, AudioError> {
        if self.closed {
            return Err(AudioError::Closed);
        }
        let start = self.next_start.max(self.output.current_time());
        let end = start + buffer.duration();
        let id = self.output.start_source(buffer, start)?;

        self.next_start = end;
        self.active.insert(id);
        tracing::trace!(source = %id, start, end, "Scheduled playback source");
        Ok(ScheduledSource { id, start, end })
    }

    /// A source finished on its own. Unknown ids are ignored.
    pub fn on_source_ended(&mut self, id: SourceId) {
        self.active.remove(&id);
    }

    /// Stop every active source and rewind the cursor. Stop failures are ignored.
    pub fn stop_all(&mut self) {
        for id in self.active.drain() {
            if let Err(e) = self.output.stop_source(id) {
                tracing::debug!(source = %id, "Ignoring stop failure: {}", e);
            }
        }
        self.next_start = 0.0;
    }

    /// Stop everything and release the output. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.stop_all();
        self.output.close();
        self.closed = true;
    }

    pub fn next_start(&self) -> f64 {
        self.next_start
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn current_time(&self) -> f64 {
        self.output.current_time()
    }
}

impl Drop for PlaybackScheduler {
    fn drop(&mut self) {
        self.close();
    }
}
