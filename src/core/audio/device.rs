//! System audio devices through cpal.
//!
//! cpal streams are not `Send` on every platform, so each stream lives on its own
//! thread for the lifetime of the pipeline. The thread reports whether the stream
//! started and then parks until the pipeline is closed or dropped. Closing only
//! signals the thread; the join happens off the async runtime.

use std::sync::Arc;
use std::sync::mpsc as std_mpsc;
use std::thread::{self, JoinHandle};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BuildStreamError, Device, SampleFormat, SampleRate, Stream, StreamConfig};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

use super::{
    AudioBackend, AudioError, AudioPipeline, CaptureInput, CaptureSpec, CapturedFrame,
    FrameAssembler, InputLevel, Mixer, PlaybackBuffer, PlaybackOutput, PlaybackSpec,
    SourceEndedCallback, SourceId,
};

/// Audio backend using the default cpal host.
#[derive(Debug, Clone, Default)]
pub struct CpalAudioBackend {
    input_device: Option<String>,
    output_device: Option<String>,
}

impl CpalAudioBackend {
    /// Devices are matched by name; `None` selects the system default.
    pub fn new(input_device: Option<String>, output_device: Option<String>) -> Self {
        Self {
            input_device,
            output_device,
        }
    }
}

impl AudioBackend for CpalAudioBackend {
    fn open_capture(&self, spec: CaptureSpec) -> Result<CaptureInput, AudioError> {
        let (frames_tx, frames_rx) = mpsc::channel(spec.queue_capacity.max(1));
        let device_name = self.input_device.clone();

        let pipeline = DeviceThread::spawn("audio-capture", move || {
            let device = select_input_device(device_name.as_deref())?;
            build_capture_stream(&device, &spec, frames_tx).and_then(play)
        })?;

        Ok(CaptureInput {
            frames: frames_rx,
            pipeline: Box::new(pipeline),
        })
    }

    fn open_playback(
        &self,
        spec: PlaybackSpec,
        on_ended: SourceEndedCallback,
    ) -> Result<Box<dyn PlaybackOutput>, AudioError> {
        let device_name = self.output_device.clone();
        let (mixer_tx, mixer_rx) = std_mpsc::sync_channel::<Arc<Mutex<Mixer>>>(1);

        let thread = DeviceThread::spawn("audio-playback", move || {
            let device = select_output_device(device_name.as_deref())?;
            let (stream, mixer) = build_playback_stream(&device, on_ended)?;
            let stream = play(stream)?;
            let _ = mixer_tx.send(mixer);
            Ok(stream)
        })?;

        let mixer = mixer_rx
            .recv()
            .map_err(|_| AudioError::StreamFailed("playback thread exited".to_string()))?;

        tracing::debug!(source_rate = spec.sample_rate, "Playback pipeline open");
        Ok(Box::new(CpalPlayback {
            mixer,
            thread,
            source_rate: spec.sample_rate,
        }))
    }
}

// =============================================================================
// Device Threads
// =============================================================================

/// Owns a device resource on a dedicated thread until closed.
struct DeviceThread {
    name: &'static str,
    shutdown: Option<std_mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl DeviceThread {
    /// Build the resource on a new thread and wait until it is running.
    fn spawn<S, F>(name: &'static str, build: F) -> Result<Self, AudioError>
    where
        S: 'static,
        F: FnOnce() -> Result<S, AudioError> + Send + 'static,
    {
        let (ready_tx, ready_rx) = std_mpsc::sync_channel::<Result<(), AudioError>>(1);
        let (shutdown_tx, shutdown_rx) = std_mpsc::channel::<()>();

        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let resource = match build() {
                    Ok(resource) => resource,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));

                // Returns on explicit shutdown or when the owner is dropped
                let _ = shutdown_rx.recv();
                drop(resource);
                tracing::debug!("{} stream released", name);
            })
            .map_err(|e| AudioError::StreamFailed(format!("failed to spawn {name}: {e}")))?;

        let started = ready_rx
            .recv()
            .map_err(|_| AudioError::StreamFailed(format!("{name} thread exited")))?;

        let mut device_thread = Self {
            name,
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        };
        if let Err(e) = started {
            device_thread.close();
            return Err(e);
        }
        Ok(device_thread)
    }
}

impl AudioPipeline for DeviceThread {
    fn close(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        let Some(thread) = self.thread.take() else {
            return;
        };

        let name = self.name;
        let join = move || {
            if thread.join().is_err() {
                tracing::warn!("{} thread panicked", name);
            }
        };
        // Releasing a device can take a while; keep it off the runtime workers
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn_blocking(join);
            }
            Err(_) => join(),
        }
    }
}

impl Drop for DeviceThread {
    fn drop(&mut self) {
        self.close();
    }
}

struct CpalPlayback {
    mixer: Arc<Mutex<Mixer>>,
    thread: DeviceThread,
    source_rate: u32,
}

impl PlaybackOutput for CpalPlayback {
    fn current_time(&self) -> f64 {
        self.mixer.lock().current_time()
    }

    fn start_source(&mut self, buffer: PlaybackBuffer, start_at: f64) -> Result<SourceId, AudioError> {
        if self.thread.shutdown.is_none() {
            return Err(AudioError::Closed);
        }
        if buffer.sample_rate != self.source_rate {
            tracing::trace!(
                expected = self.source_rate,
                actual = buffer.sample_rate,
                "Playback buffer rate differs from pipeline rate"
            );
        }
        Ok(self.mixer.lock().schedule(buffer, start_at))
    }

    fn stop_source(&mut self, id: SourceId) -> Result<(), AudioError> {
        if self.mixer.lock().stop(id) {
            Ok(())
        } else {
            Err(AudioError::SourceNotActive(id))
        }
    }

    fn close(&mut self) {
        self.thread.close();
    }
}

// =============================================================================
// Device Selection
// =============================================================================

fn select_input_device(name: Option<&str>) -> Result<Device, AudioError> {
    let host = cpal::default_host();
    match name {
        Some(wanted) => host
            .input_devices()
            .map_err(|e| AudioError::DeviceUnavailable(e.to_string()))?
            .find(|d| d.name().map(|n| n == wanted).unwrap_or(false))
            .ok_or_else(|| AudioError::DeviceUnavailable(format!("input device '{wanted}' not found"))),
        None => host
            .default_input_device()
            .ok_or_else(|| AudioError::DeviceUnavailable("no default input device".to_string())),
    }
}

fn select_output_device(name: Option<&str>) -> Result<Device, AudioError> {
    let host = cpal::default_host();
    match name {
        Some(wanted) => host
            .output_devices()
            .map_err(|e| AudioError::DeviceUnavailable(e.to_string()))?
            .find(|d| d.name().map(|n| n == wanted).unwrap_or(false))
            .ok_or_else(|| AudioError::DeviceUnavailable(format!("output device '{wanted}' not found"))),
        None => host
            .default_output_device()
            .ok_or_else(|| AudioError::DeviceUnavailable("no default output device".to_string())),
    }
}

fn play(stream: Stream) -> Result<Stream, AudioError> {
    stream
        .play()
        .map_err(|e| AudioError::StreamFailed(e.to_string()))?;
    Ok(stream)
}

fn map_build_error(err: BuildStreamError) -> AudioError {
    match err {
        BuildStreamError::DeviceNotAvailable => {
            AudioError::PermissionDenied("device not available".to_string())
        }
        BuildStreamError::StreamConfigNotSupported => {
            AudioError::UnsupportedFormat("stream configuration not supported".to_string())
        }
        other => AudioError::StreamFailed(other.to_string()),
    }
}

// =============================================================================
// Capture
// =============================================================================

/// Prefer a configuration that runs natively at the capture rate.
fn capture_config(device: &Device, rate: u32) -> Result<(StreamConfig, SampleFormat), AudioError> {
    let native = device
        .supported_input_configs()
        .map_err(|e| AudioError::PermissionDenied(e.to_string()))?
        .filter(|range| {
            range.min_sample_rate() <= SampleRate(rate) && SampleRate(rate) <= range.max_sample_rate()
        })
        .min_by_key(|range| (range.sample_format() != SampleFormat::F32, range.channels()));

    let supported = match native {
        Some(range) => range.with_sample_rate(SampleRate(rate)),
        None => device
            .default_input_config()
            .map_err(|e| AudioError::PermissionDenied(e.to_string()))?,
    };
    let sample_format = supported.sample_format();
    Ok((supported.into(), sample_format))
}

fn build_capture_stream(
    device: &Device,
    spec: &CaptureSpec,
    frames: mpsc::Sender<CapturedFrame>,
) -> Result<Stream, AudioError> {
    let (config, sample_format) = capture_config(device, spec.sample_rate)?;
    tracing::info!(
        device = %device.name().unwrap_or_default(),
        rate = config.sample_rate.0,
        channels = config.channels,
        format = ?sample_format,
        "Opening capture device"
    );

    let mut sink = FrameSink {
        assembler: FrameAssembler::new(
            config.sample_rate.0,
            spec.sample_rate,
            config.channels,
            spec.frame_size,
        )?,
        frames,
        level: spec.level.clone(),
        scratch: Vec::new(),
        dropped: 0,
    };
    let err_fn = |err: cpal::StreamError| tracing::error!("Input stream error: {}", err);

    let stream = match sample_format {
        SampleFormat::F32 => device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| sink.push(data.iter().copied()),
            err_fn,
            None,
        ),
        SampleFormat::I16 => device.build_input_stream(
            &config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                sink.push(data.iter().map(|&s| s as f32 / 32768.0))
            },
            err_fn,
            None,
        ),
        SampleFormat::U16 => device.build_input_stream(
            &config,
            move |data: &[u16], _: &cpal::InputCallbackInfo| {
                sink.push(data.iter().map(|&s| (s as f32 - 32768.0) / 32768.0))
            },
            err_fn,
            None,
        ),
        other => {
            return Err(AudioError::UnsupportedFormat(format!(
                "input sample format {other:?} is not supported"
            )));
        }
    };
    stream.map_err(map_build_error)
}

/// Device-callback side of the capture pipeline.
struct FrameSink {
    assembler: FrameAssembler,
    frames: mpsc::Sender<CapturedFrame>,
    level: Arc<watch::Sender<InputLevel>>,
    scratch: Vec<f32>,
    dropped: u64,
}

impl FrameSink {
    fn push(&mut self, samples: impl Iterator<Item = f32>) {
        let Self {
            assembler,
            frames,
            level,
            scratch,
            dropped,
        } = self;
        scratch.clear();
        scratch.extend(samples);
        assembler.push_interleaved(scratch, |frame| {
            level.send_replace(InputLevel::measure(&frame.samples));
            if frames.try_send(frame).is_err() {
                *dropped += 1;
                if dropped.is_power_of_two() {
                    tracing::debug!(dropped = *dropped, "Capture queue full, dropping frames");
                }
            }
        });
    }
}

// =============================================================================
// Playback
// =============================================================================

fn build_playback_stream(
    device: &Device,
    on_ended: SourceEndedCallback,
) -> Result<(Stream, Arc<Mutex<Mixer>>), AudioError> {
    let supported = device
        .default_output_config()
        .map_err(|e| AudioError::DeviceUnavailable(e.to_string()))?;
    let sample_format = supported.sample_format();
    let config: StreamConfig = supported.into();
    tracing::info!(
        device = %device.name().unwrap_or_default(),
        rate = config.sample_rate.0,
        channels = config.channels,
        format = ?sample_format,
        "Opening playback device"
    );

    let mixer = Arc::new(Mutex::new(Mixer::new(config.sample_rate.0, config.channels)));
    let mut source = MixerSource {
        mixer: mixer.clone(),
        on_ended,
        scratch: Vec::new(),
    };
    let err_fn = |err: cpal::StreamError| tracing::error!("Output stream error: {}", err);

    let stream = match sample_format {
        SampleFormat::F32 => device.build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                source.fill(data.len(), |i, s| data[i] = s)
            },
            err_fn,
            None,
        ),
        SampleFormat::I16 => device.build_output_stream(
            &config,
            move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                source.fill(data.len(), |i, s| data[i] = (s * 32767.0) as i16)
            },
            err_fn,
            None,
        ),
        SampleFormat::U16 => device.build_output_stream(
            &config,
            move |data: &mut [u16], _: &cpal::OutputCallbackInfo| {
                source.fill(data.len(), |i, s| data[i] = (s * 32767.0 + 32768.0) as u16)
            },
            err_fn,
            None,
        ),
        other => {
            return Err(AudioError::UnsupportedFormat(format!(
                "output sample format {other:?} is not supported"
            )));
        }
    }
    .map_err(map_build_error)?;

    Ok((stream, mixer))
}

/// Device-callback side of the playback pipeline.
struct MixerSource {
    mixer: Arc<Mutex<Mixer>>,
    on_ended: SourceEndedCallback,
    scratch: Vec<f32>,
}

impl MixerSource {
    fn fill(&mut self, len: usize, mut write: impl FnMut(usize, f32)) {
        self.scratch.clear();
        self.scratch.resize(len, 0.0);
        let ended = self.mixer.lock().render(&mut self.scratch);
        for (i, &sample) in self.scratch.iter().enumerate() {
            write(i, sample);
        }
        for id in ended {
            (self.on_ended)(id);
        }
    }
}
