//! PCM16 little-endian conversion and base64 transport encoding.

use base64::prelude::*;
use thiserror::Error;

use super::{CAPTURE_SAMPLE_RATE, CapturedFrame, EncodedChunk, PlaybackBuffer};

/// Reasons an inbound audio payload is rejected.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("odd PCM16 byte length {0}")]
    OddLength(usize),

    #[error("empty payload")]
    Empty,
}

/// Convert float samples to PCM16 little-endian bytes.
///
/// Samples are clamped to [-1, 1]. Negative values scale by 32768 and positive
/// values by 32767 so the full i16 range is reachable without overflow.
pub fn float_to_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let clamped = if sample.is_nan() { 0.0 } else { sample.clamp(-1.0, 1.0) };
        let scaled = if clamped < 0.0 {
            clamped * 32768.0
        } else {
            clamped * 32767.0
        };
        bytes.extend_from_slice(&(scaled.round() as i16).to_le_bytes());
    }
    bytes
}

/// Convert PCM16 little-endian bytes to float samples in [-1, 1).
pub fn pcm16_to_float(bytes: &[u8]) -> Result<Vec<f32>, DecodeError> {
    if bytes.len() % 2 != 0 {
        return Err(DecodeError::OddLength(bytes.len()));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
        .collect())
}

/// Encode a captured frame for the wire.
pub fn encode_frame(frame: &CapturedFrame) -> EncodedChunk {
    EncodedChunk {
        data: BASE64_STANDARD.encode(float_to_pcm16(&frame.samples)),
        sample_rate: CAPTURE_SAMPLE_RATE,
        sequence: frame.sequence,
    }
}

/// Decode a base64 PCM16 payload into a playback buffer at `sample_rate`.
pub fn decode_chunk(payload: &str, sample_rate: u32) -> Result<PlaybackBuffer, DecodeError> {
    let bytes = BASE64_STANDARD.decode(payload.trim())?;
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }
    Ok(PlaybackBuffer::new(pcm16_to_float(&bytes)?, sample_rate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::audio::PLAYBACK_SAMPLE_RATE;

    #[test]
    fn test_zero_frame_decodes_to_silence() {
        let frame = CapturedFrame {
            samples: vec![0.0; 2048],
            sequence: 0,
        };
        let chunk = encode_frame(&frame);
        let buffer = decode_chunk(&chunk.data, PLAYBACK_SAMPLE_RATE).unwrap();

        assert_eq!(buffer.samples.len(), 2048);
        assert!(buffer.samples.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_clamping() {
        let bytes = float_to_pcm16(&[2.0, -2.0, 1.0, -1.0, f32::NAN]);
        let values: Vec<i16> = bytes
            .chunks_exact(2)
            .map(|p| i16::from_le_bytes([p[0], p[1]]))
            .collect();
        assert_eq!(values, vec![32767, -32768, 32767, -32768, 0]);
    }

    #[test]
    fn test_little_endian_layout() {
        assert_eq!(float_to_pcm16(&[0.5]), (16384i16).to_le_bytes().to_vec());
        assert_eq!(pcm16_to_float(&[0x00, 0x40]).unwrap(), vec![0.5]);
        assert_eq!(pcm16_to_float(&[0x00, 0x80]).unwrap(), vec![-1.0]);
    }

    #[test]
    fn test_decode_rejects_malformed_payloads() {
        assert!(matches!(
            decode_chunk("not base64!", PLAYBACK_SAMPLE_RATE),
            Err(DecodeError::Base64(_))
        ));
        // 3 bytes
        assert!(matches!(
            decode_chunk("AAAA", PLAYBACK_SAMPLE_RATE),
            Err(DecodeError::OddLength(3))
        ));
        assert!(matches!(
            decode_chunk("", PLAYBACK_SAMPLE_RATE),
            Err(DecodeError::Empty)
        ));
    }

    #[test]
    fn test_decoded_duration() {
        let payload = BASE64_STANDARD.encode(vec![0u8; 48000]);
        let buffer = decode_chunk(&payload, PLAYBACK_SAMPLE_RATE).unwrap();
        assert!((buffer.duration() - 1.0).abs() < 1e-9);
    }
}
