//! Audio capture, encoding, decoding and scheduled playback.
//!
//! Two independent pipelines are opened per session:
//! - capture: device → mono 16 kHz frames of fixed size → [`CaptureEncoder`] → channel
//! - playback: channel → decoded 24 kHz buffers → [`PlaybackScheduler`] → device
//!
//! Device access goes through the [`AudioBackend`] trait; [`CpalAudioBackend`]
//! is the system implementation.

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, watch};

mod capture;
mod device;
mod frames;
mod mixer;
mod pcm;
mod playback;

pub use capture::CaptureEncoder;
pub use device::CpalAudioBackend;
pub use frames::{FrameAssembler, InputLevel};
pub use mixer::Mixer;
pub use pcm::{DecodeError, decode_chunk, encode_frame, float_to_pcm16, pcm16_to_float};
pub use playback::{PlaybackScheduler, ScheduledSource};

/// Capture sample rate sent upstream.
pub const CAPTURE_SAMPLE_RATE: u32 = 16000;
/// Sample rate of audio received from the service.
pub const PLAYBACK_SAMPLE_RATE: u32 = 24000;

// =============================================================================
// Error Types
// =============================================================================

/// Errors raised by audio devices and pipelines.
#[derive(Debug, Error)]
pub enum AudioError {
    /// The device refused access
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// No matching device
    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The device offers no usable sample format
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Stream construction or playback failed
    #[error("Stream failed: {0}")]
    StreamFailed(String),

    /// The source already ended or was stopped
    #[error("Source {0} is not active")]
    SourceNotActive(SourceId),

    /// The pipeline was closed
    #[error("Audio pipeline closed")]
    Closed,
}

// =============================================================================
// Data Types
// =============================================================================

/// Fixed-size block of mono float samples at [`CAPTURE_SAMPLE_RATE`].
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedFrame {
    pub samples: Vec<f32>,
    /// Position in generation order
    pub sequence: u64,
}

/// Wire-ready encoding of one captured frame: base64 PCM16 little-endian, mono.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedChunk {
    pub data: String,
    pub sample_rate: u32,
    pub sequence: u64,
}

impl EncodedChunk {
    /// MIME type carrying the sample rate.
    pub fn mime_type(&self) -> String {
        format!("audio/pcm;rate={}", self.sample_rate)
    }
}

/// Decoded mono float audio ready for scheduling.
#[derive(Debug, Clone)]
pub struct PlaybackBuffer {
    pub samples: Arc<[f32]>,
    pub sample_rate: u32,
}

impl PlaybackBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples: samples.into(),
            sample_rate,
        }
    }

    /// Length in seconds.
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Identifier of a scheduled playback source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(pub u64);

impl std::fmt::Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// =============================================================================
// Backend Traits
// =============================================================================

/// Parameters for opening the capture pipeline.
#[derive(Debug, Clone)]
pub struct CaptureSpec {
    pub sample_rate: u32,
    pub frame_size: usize,
    /// Frames buffered before new ones are dropped
    pub queue_capacity: usize,
    /// Analysis tap; receives the level of every frame
    pub level: Arc<watch::Sender<InputLevel>>,
}

/// Parameters for opening the playback pipeline.
#[derive(Debug, Clone, Copy)]
pub struct PlaybackSpec {
    pub sample_rate: u32,
}

/// Invoked from the output device when a source finishes playing on its own.
pub type SourceEndedCallback = Arc<dyn Fn(SourceId) + Send + Sync>;

/// An open device pipeline.
pub trait AudioPipeline: Send {
    /// Stop the device and release it. Idempotent.
    fn close(&mut self);
}

/// Open capture pipeline.
pub struct CaptureInput {
    /// Frames in generation order
    pub frames: mpsc::Receiver<CapturedFrame>,
    pub pipeline: Box<dyn AudioPipeline>,
}

impl std::fmt::Debug for CaptureInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureInput").finish_non_exhaustive()
    }
}

/// Open playback pipeline with its own output clock.
pub trait PlaybackOutput: Send {
    /// Output clock in seconds since the pipeline was opened.
    fn current_time(&self) -> f64;

    /// Schedule `buffer` to start at `start_at` seconds on the output clock.
    fn start_source(&mut self, buffer: PlaybackBuffer, start_at: f64) -> Result<SourceId, AudioError>;

    /// Stop a source before it finishes.
    fn stop_source(&mut self, id: SourceId) -> Result<(), AudioError>;

    /// Stop the device and release it. Idempotent.
    fn close(&mut self);
}

/// Opens audio pipelines. Calls may block while the device starts.
pub trait AudioBackend: Send + Sync {
    fn open_capture(&self, spec: CaptureSpec) -> Result<CaptureInput, AudioError>;

    fn open_playback(
        &self,
        spec: PlaybackSpec,
        on_ended: SourceEndedCallback,
    ) -> Result<Box<dyn PlaybackOutput>, AudioError>;
}
