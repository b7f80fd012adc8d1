//! Clock-driven mixer rendering scheduled sources into the output device buffer.

use std::sync::Arc;

use super::{PlaybackBuffer, SourceId};

struct MixerSource {
    id: SourceId,
    start_frame: u64,
    samples: Arc<[f32]>,
    /// Source samples advanced per output frame
    step: f64,
}

impl MixerSource {
    /// Interpolated sample at `offset` output frames after the start, or `None`
    /// once the source is exhausted.
    fn sample_at(&self, offset: u64) -> Option<f32> {
        let position = offset as f64 * self.step;
        let index = position as usize;
        let current = *self.samples.get(index)?;
        let next = self.samples.get(index + 1).copied().unwrap_or(0.0);
        let frac = (position - index as f64) as f32;
        Some(current + (next - current) * frac)
    }

    fn end_frame(&self) -> u64 {
        self.start_frame + (self.samples.len() as f64 / self.step).ceil() as u64
    }
}

/// Mixes scheduled mono sources into interleaved device frames.
///
/// The output clock is the number of frames rendered so far divided by the
/// device rate, so it only advances while the device pulls audio.
pub struct Mixer {
    device_rate: u32,
    channels: usize,
    frames_rendered: u64,
    sources: Vec<MixerSource>,
    next_id: u64,
}

impl Mixer {
    pub fn new(device_rate: u32, channels: u16) -> Self {
        Self {
            device_rate: device_rate.max(1),
            channels: channels.max(1) as usize,
            frames_rendered: 0,
            sources: Vec::new(),
            next_id: 0,
        }
    }

    /// Output clock in seconds.
    pub fn current_time(&self) -> f64 {
        self.frames_rendered as f64 / self.device_rate as f64
    }

    pub fn active_sources(&self) -> usize {
        self.sources.len()
    }

    /// Add a source starting at `start_at` seconds. Times in the past start immediately.
    pub fn schedule(&mut self, buffer: PlaybackBuffer, start_at: f64) -> SourceId {
        let id = SourceId(self.next_id);
        self.next_id += 1;

        let requested = (start_at.max(0.0) * self.device_rate as f64).round() as u64;
        self.sources.push(MixerSource {
            id,
            start_frame: requested.max(self.frames_rendered),
            step: buffer.sample_rate as f64 / self.device_rate as f64,
            samples: buffer.samples,
        });
        id
    }

    /// Remove a source. Returns `false` if it already ended or was stopped.
    pub fn stop(&mut self, id: SourceId) -> bool {
        let before = self.sources.len();
        self.sources.retain(|s| s.id != id);
        self.sources.len() != before
    }

    /// Render into an interleaved buffer and return the sources that finished.
    pub fn render(&mut self, out: &mut [f32]) -> Vec<SourceId> {
        let frames = out.len() / self.channels;
        for (i, frame) in out.chunks_mut(self.channels).take(frames).enumerate() {
            let clock = self.frames_rendered + i as u64;
            let mut mixed = 0.0f32;
            for source in &self.sources {
                if clock >= source.start_frame
                    && let Some(sample) = source.sample_at(clock - source.start_frame)
                {
                    mixed += sample;
                }
            }
            frame.fill(mixed.clamp(-1.0, 1.0));
        }
        self.frames_rendered += frames as u64;

        let now = self.frames_rendered;
        let mut finished = Vec::new();
        self.sources.retain(|source| {
            if source.end_frame() <= now {
                finished.push(source.id);
                false
            } else {
                true
            }
        });
        finished
    }
}
