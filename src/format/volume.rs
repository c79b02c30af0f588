//! Per-frame loudness of an MPEG byte window.

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CodecParameters, Decoder, DecoderOptions, CODEC_TYPE_MP3};
use symphonia::core::formats::Packet;

use super::mpeg;
use crate::split::VolumeSample;
use crate::DecodeError;

/// Turns a window of MPEG frames into a volume curve.
///
/// Implementations must report one [`VolumeSample`] per frame, in order,
/// with offsets relative to the start of `window`. Frames that can't be
/// decoded get an RMS of `f64::INFINITY` rather than failing the window.
pub trait VolumeDecoder: Send {
    /// Decodes `window`.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::NoFrames`] if the window holds no frames.
    fn volume_curve(&mut self, window: &[u8]) -> Result<Vec<VolumeSample>, DecodeError>;
}

/// [`VolumeDecoder`] backed by symphonia's MP3 decoder.
#[derive(Debug, Default)]
pub struct SymphoniaVolumeDecoder;

impl SymphoniaVolumeDecoder {
    /// Creates the decoder.
    pub fn new() -> Self {
        Self
    }

    fn make_decoder() -> Result<Box<dyn Decoder>, DecodeError> {
        let mut params = CodecParameters::new();
        params.for_codec(CODEC_TYPE_MP3);
        symphonia::default::get_codecs()
            .make(&params, &DecoderOptions::default())
            .map_err(|e| DecodeError::Backend(e.to_string()))
    }
}

impl VolumeDecoder for SymphoniaVolumeDecoder {
    fn volume_curve(&mut self, window: &[u8]) -> Result<Vec<VolumeSample>, DecodeError> {
        // A fresh decoder per window: the bit reservoir of the first frames
        // refers to data before the window, so those frames may not decode.
        let mut decoder = Self::make_decoder()?;
        let mut samples = Vec::new();
        let mut ts = 0u64;

        for frame in mpeg::frames(window) {
            let bytes = &window[frame.offset..frame.offset + frame.header.frame_len];
            let duration = u64::from(frame.header.samples);
            let packet = Packet::new_from_slice(0, ts, duration, bytes);
            ts += duration;

            let level = match decoder.decode(&packet) {
                Ok(decoded) => {
                    let mut pcm = SampleBuffer::<f32>::new(decoded.capacity() as u64, *decoded.spec());
                    pcm.copy_interleaved_ref(decoded);
                    rms(pcm.samples())
                }
                Err(e) => {
                    tracing::trace!(offset = frame.offset, error = %e, "undecodable frame");
                    f64::INFINITY
                }
            };

            samples.push(VolumeSample {
                offset: frame.offset,
                len: frame.header.frame_len,
                duration_ms: frame.header.duration_ms(),
                rms: level,
            });
        }

        if samples.is_empty() {
            return Err(DecodeError::NoFrames);
        }
        Ok(samples)
    }
}

/// Root mean square of `pcm`, or 0 for an empty slice.
pub fn rms(pcm: &[f32]) -> f64 {
    if pcm.is_empty() {
        return 0.0;
    }
    let sum: f64 = pcm.iter().map(|&s| f64::from(s) * f64::from(s)).sum();
    (sum / pcm.len() as f64).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::mock::mpeg_frame;

    #[test]
    fn test_rms() {
        assert_eq!(rms(&[]), 0.0);
        assert!((rms(&[0.5, -0.5, 0.5, -0.5]) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_silent_frames_decode_quiet() {
        let window: Vec<u8> = (0..20).flat_map(|_| mpeg_frame(128, 0)).collect();
        let curve = SymphoniaVolumeDecoder::new().volume_curve(&window).unwrap();
        assert_eq!(curve.len(), 20);
        assert_eq!(curve[1].offset, 417);
        assert!(curve.iter().all(|s| s.len == 417));
        assert!(curve
            .iter()
            .filter(|s| s.rms.is_finite())
            .all(|s| s.rms < 1e-3));
    }

    #[test]
    fn test_window_without_frames() {
        let result = SymphoniaVolumeDecoder::new().volume_curve(&[0u8; 1000]);
        assert!(matches!(result, Err(DecodeError::NoFrames)));
    }
}
