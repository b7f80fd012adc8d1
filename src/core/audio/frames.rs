//! Re-blocking of raw device samples into fixed-size mono frames.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};

use super::{AudioError, CapturedFrame};

/// Resampler input block size.
const RESAMPLER_CHUNK: usize = 1024;

/// Level of one captured frame, published for visualization.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct InputLevel {
    /// Root mean square of the frame
    pub rms: f32,
    /// Largest absolute sample
    pub peak: f32,
}

impl InputLevel {
    pub fn measure(samples: &[f32]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        let mut sum = 0.0f32;
        let mut peak = 0.0f32;
        for &s in samples {
            sum += s * s;
            peak = peak.max(s.abs());
        }
        Self {
            rms: (sum / samples.len() as f32).sqrt(),
            peak,
        }
    }
}

/// Streaming conversion from device rate to the capture rate.
struct StreamResampler {
    inner: FastFixedIn<f32>,
    pending: Vec<f32>,
    output: Vec<Vec<f32>>,
}

impl StreamResampler {
    fn new(from_rate: u32, to_rate: u32) -> Result<Self, AudioError> {
        let inner = FastFixedIn::<f32>::new(
            to_rate as f64 / from_rate as f64,
            1.0,
            PolynomialDegree::Septic,
            RESAMPLER_CHUNK,
            1,
        )
        .map_err(|e| AudioError::UnsupportedFormat(format!("resampler: {e}")))?;
        let output = inner.output_buffer_allocate(true);
        Ok(Self {
            inner,
            pending: Vec::with_capacity(RESAMPLER_CHUNK * 2),
            output,
        })
    }

    /// Resample whole input blocks into `out`, keeping the remainder for the next call.
    fn process(&mut self, input: &[f32], out: &mut Vec<f32>) {
        self.pending.extend_from_slice(input);
        let full_chunks = self.pending.len() / RESAMPLER_CHUNK;
        for chunk in 0..full_chunks {
            let slice = &self.pending[chunk * RESAMPLER_CHUNK..(chunk + 1) * RESAMPLER_CHUNK];
            match self
                .inner
                .process_into_buffer(&[slice], &mut self.output, None)
            {
                Ok((_, written)) => out.extend_from_slice(&self.output[0][..written]),
                Err(e) => tracing::warn!("Capture resampler error: {}", e),
            }
        }
        self.pending.drain(..full_chunks * RESAMPLER_CHUNK);
    }
}

/// Turns interleaved device samples into mono frames of exactly `frame_size`
/// samples at the target rate.
pub struct FrameAssembler {
    channels: usize,
    frame_size: usize,
    resampler: Option<StreamResampler>,
    mono: Vec<f32>,
    pending: Vec<f32>,
    sequence: u64,
}

impl FrameAssembler {
    pub fn new(
        device_rate: u32,
        target_rate: u32,
        channels: u16,
        frame_size: usize,
    ) -> Result<Self, AudioError> {
        if channels == 0 || frame_size == 0 || device_rate == 0 {
            return Err(AudioError::UnsupportedFormat(format!(
                "{channels} channels at {device_rate} Hz, frame size {frame_size}"
            )));
        }
        let resampler = if device_rate == target_rate {
            None
        } else {
            tracing::debug!(device_rate, target_rate, "Resampling capture input");
            Some(StreamResampler::new(device_rate, target_rate)?)
        };
        Ok(Self {
            channels: channels as usize,
            frame_size,
            resampler,
            mono: Vec::with_capacity(RESAMPLER_CHUNK),
            pending: Vec::with_capacity(frame_size * 2 + RESAMPLER_CHUNK),
            sequence: 0,
        })
    }

    /// Feed interleaved samples and hand every completed frame to `emit`.
    ///
    /// Runs on the device callback: the working buffers are reused, so the
    /// only allocation is the sample vector owned by each emitted frame.
    pub fn push_interleaved(&mut self, data: &[f32], mut emit: impl FnMut(CapturedFrame)) {
        self.mono.clear();
        self.mono.extend(
            data.chunks(self.channels)
                .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32),
        );

        match self.resampler.as_mut() {
            Some(resampler) => resampler.process(&self.mono, &mut self.pending),
            None => self.pending.extend_from_slice(&self.mono),
        }

        let mut offset = 0;
        while self.pending.len() - offset >= self.frame_size {
            let mut samples = Vec::with_capacity(self.frame_size);
            samples.extend_from_slice(&self.pending[offset..offset + self.frame_size]);
            emit(CapturedFrame {
                samples,
                sequence: self.sequence,
            });
            self.sequence += 1;
            offset += self.frame_size;
        }
        self.pending.drain(..offset);
    }
}
