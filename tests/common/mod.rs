//! In-process fakes for the audio backend and the channel connector.
//!
//! Both fakes record what the controller did to them so tests can assert on
//! resource ownership without touching real devices or the network.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use live_reception::core::audio::{
    AudioBackend, AudioError, AudioPipeline, CaptureInput, CaptureSpec, CapturedFrame,
    PlaybackBuffer, PlaybackOutput, PlaybackSpec, SourceEndedCallback, SourceId,
};
use live_reception::core::realtime::{
    ChannelConfig, ChannelConnector, ChannelEvent, ChannelEventCallback, ChannelHandle,
    OutboundMessage, RealtimeError, RealtimeResult,
};

pub const TEST_TIMEOUT: Duration = Duration::from_secs(2);

// =============================================================================
// Audio
// =============================================================================

#[derive(Default)]
pub struct AudioCounters {
    pub captures_opened: AtomicUsize,
    pub captures_closed: AtomicUsize,
    pub playbacks_opened: AtomicUsize,
    pub playbacks_closed: AtomicUsize,
}

/// Scheduled source as seen by the fake output device.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledInterval {
    pub id: SourceId,
    pub start: f64,
    pub duration: f64,
}

#[derive(Default)]
pub struct FakeAudioBackend {
    pub counters: Arc<AudioCounters>,
    pub fail_capture: AtomicBool,
    pub fail_playback: AtomicBool,
    frames: Mutex<Option<mpsc::Sender<CapturedFrame>>>,
    on_ended: Mutex<Option<SourceEndedCallback>>,
    clock: Arc<Mutex<f64>>,
    scheduled: Arc<Mutex<Vec<ScheduledInterval>>>,
    stopped: Arc<Mutex<Vec<SourceId>>>,
}

impl FakeAudioBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn captures_opened(&self) -> usize {
        self.counters.captures_opened.load(Ordering::SeqCst)
    }

    pub fn captures_closed(&self) -> usize {
        self.counters.captures_closed.load(Ordering::SeqCst)
    }

    pub fn playbacks_opened(&self) -> usize {
        self.counters.playbacks_opened.load(Ordering::SeqCst)
    }

    pub fn playbacks_closed(&self) -> usize {
        self.counters.playbacks_closed.load(Ordering::SeqCst)
    }

    /// Push a frame as if the microphone produced it.
    pub async fn push_frame(&self, samples: Vec<f32>, sequence: u64) {
        let sender = self.frames.lock().clone();
        if let Some(sender) = sender {
            let _ = sender.send(CapturedFrame { samples, sequence }).await;
        }
    }

    /// Report that a source finished playing on its own.
    pub fn end_source(&self, id: SourceId) {
        let callback = self.on_ended.lock().clone();
        if let Some(callback) = callback {
            callback(id);
        }
    }

    pub fn set_clock(&self, seconds: f64) {
        *self.clock.lock() = seconds;
    }

    pub fn scheduled(&self) -> Vec<ScheduledInterval> {
        self.scheduled.lock().clone()
    }

    pub fn stopped(&self) -> Vec<SourceId> {
        self.stopped.lock().clone()
    }
}

impl AudioBackend for FakeAudioBackend {
    fn open_capture(&self, spec: CaptureSpec) -> Result<CaptureInput, AudioError> {
        if self.fail_capture.load(Ordering::SeqCst) {
            return Err(AudioError::PermissionDenied("denied by test".into()));
        }
        self.counters.captures_opened.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(spec.queue_capacity.max(1));
        *self.frames.lock() = Some(tx);
        Ok(CaptureInput {
            frames: rx,
            pipeline: Box::new(FakeCapture {
                counters: self.counters.clone(),
                closed: false,
            }),
        })
    }

    fn open_playback(
        &self,
        _spec: PlaybackSpec,
        on_ended: SourceEndedCallback,
    ) -> Result<Box<dyn PlaybackOutput>, AudioError> {
        if self.fail_playback.load(Ordering::SeqCst) {
            return Err(AudioError::DeviceUnavailable("no speaker".into()));
        }
        self.counters.playbacks_opened.fetch_add(1, Ordering::SeqCst);
        *self.on_ended.lock() = Some(on_ended);
        Ok(Box::new(FakePlayback {
            counters: self.counters.clone(),
            clock: self.clock.clone(),
            scheduled: self.scheduled.clone(),
            stopped: self.stopped.clone(),
            next_id: 0,
            closed: false,
        }))
    }
}

struct FakeCapture {
    counters: Arc<AudioCounters>,
    closed: bool,
}

impl AudioPipeline for FakeCapture {
    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.counters.captures_closed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl Drop for FakeCapture {
    fn drop(&mut self) {
        self.close();
    }
}

struct FakePlayback {
    counters: Arc<AudioCounters>,
    clock: Arc<Mutex<f64>>,
    scheduled: Arc<Mutex<Vec<ScheduledInterval>>>,
    stopped: Arc<Mutex<Vec<SourceId>>>,
    next_id: u64,
    closed: bool,
}

impl PlaybackOutput for FakePlayback {
    fn current_time(&self) -> f64 {
        *self.clock.lock()
    }

    fn start_source(&mut self, buffer: PlaybackBuffer, start_at: f64) -> Result<SourceId, AudioError> {
        if self.closed {
            return Err(AudioError::Closed);
        }
        self.next_id += 1;
        let id = SourceId(self.next_id);
        self.scheduled.lock().push(ScheduledInterval {
            id,
            start: start_at,
            duration: buffer.duration(),
        });
        Ok(id)
    }

    fn stop_source(&mut self, id: SourceId) -> Result<(), AudioError> {
        self.stopped.lock().push(id);
        Ok(())
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.counters.playbacks_closed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl Drop for FakePlayback {
    fn drop(&mut self) {
        self.close();
    }
}

// =============================================================================
// Channel
// =============================================================================

/// One call to [`ChannelConnector::open`].
pub struct OpenedChannel {
    pub api_key: String,
    pub config: ChannelConfig,
    pub on_event: ChannelEventCallback,
    pub cancel: CancellationToken,
    outbound: Option<mpsc::Receiver<OutboundMessage>>,
}

#[derive(Default)]
pub struct FakeConnector {
    /// Deliver `Open` from inside `open`, before the handle is returned
    pub open_immediately: bool,
    pub fail_open: AtomicBool,
    opens: Mutex<Vec<OpenedChannel>>,
    open_calls: AtomicU64,
}

impl FakeConnector {
    pub fn new(open_immediately: bool) -> Arc<Self> {
        Arc::new(Self {
            open_immediately,
            ..Self::default()
        })
    }

    pub fn open_calls(&self) -> u64 {
        self.open_calls.load(Ordering::SeqCst)
    }

    /// Channels that have not been closed.
    pub fn open_channels(&self) -> usize {
        self.opens
            .lock()
            .iter()
            .filter(|c| !c.cancel.is_cancelled())
            .count()
    }

    pub fn is_closed(&self, index: usize) -> bool {
        self.opens.lock()[index].cancel.is_cancelled()
    }

    pub fn api_key(&self, index: usize) -> String {
        self.opens.lock()[index].api_key.clone()
    }

    pub fn config(&self, index: usize) -> ChannelConfig {
        self.opens.lock()[index].config.clone()
    }

    /// Deliver an event through the callback of the `index`-th channel.
    pub fn emit(&self, index: usize, event: ChannelEvent) {
        let callback = self.opens.lock()[index].on_event.clone();
        callback(event);
    }

    /// Take the outbound queue of the `index`-th channel.
    pub fn take_outbound(&self, index: usize) -> mpsc::Receiver<OutboundMessage> {
        self.opens.lock()[index]
            .outbound
            .take()
            .expect("outbound queue already taken")
    }
}

#[async_trait]
impl ChannelConnector for FakeConnector {
    async fn open(
        &self,
        api_key: &str,
        config: ChannelConfig,
        on_event: ChannelEventCallback,
    ) -> RealtimeResult<ChannelHandle> {
        self.open_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(RealtimeError::ConnectionFailed("refused by test".into()));
        }

        let (tx, rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();
        if self.open_immediately {
            on_event(ChannelEvent::Open);
        }
        self.opens.lock().push(OpenedChannel {
            api_key: api_key.to_string(),
            config,
            on_event,
            cancel: cancel.clone(),
            outbound: Some(rx),
        });
        Ok(ChannelHandle::new(tx, cancel))
    }

    fn provider_name(&self) -> &'static str {
        "fake"
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Poll `condition` until it holds or [`TEST_TIMEOUT`] elapses.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + TEST_TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

/// Little-endian PCM16 base64 payload of `samples` silent samples.
pub fn silent_payload(samples: usize) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(vec![0u8; samples * 2])
}
