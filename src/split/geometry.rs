//! Byte sizes of the split-point search window.

use crate::config::SplitConfig;
use crate::format::ContentKind;
use crate::pipeline::BufferKind;
use crate::split::ogg::MAX_PAGE_LEN;

/// Look-back and look-ahead windows, in bytes, for a given bitrate.
///
/// Computed once per connection from the negotiated bitrate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitGeometry {
    /// Stream bitrate in bits per second.
    pub bitrate: u32,
    /// Chunk size the ring buffer is built from.
    pub chunk_size: usize,
    /// Bytes kept before a metadata change.
    pub look_back: usize,
    /// Bytes required after a metadata change before searching.
    pub look_ahead: usize,
    /// Smallest buffer, in chunks, that holds the whole window.
    pub min_chunks: usize,
}

/// Bytes of audio in `ms` milliseconds at `bitrate` bits per second.
pub fn bytes_for_ms(bitrate: u32, ms: u64) -> usize {
    usize::try_from(ms * u64::from(bitrate) / 8000).unwrap_or(usize::MAX)
}

impl SplitGeometry {
    /// Derives the windows from the split settings.
    pub fn new(split: &SplitConfig, bitrate: u32, chunk_size: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        let offset = i64::from(split.offset_ms);
        let back_ms = (i64::from(split.search_window_1_ms) - offset).max(0);
        let ahead_ms = (i64::from(split.search_window_2_ms) + offset).max(0);

        // Both values are non-negative after the clamp above.
        let back_ms = back_ms.unsigned_abs() + u64::from(split.padding_2_ms);
        let ahead_ms = ahead_ms.unsigned_abs() + u64::from(split.padding_1_ms);

        let look_back = bytes_for_ms(bitrate, back_ms);
        let look_ahead = bytes_for_ms(bitrate, ahead_ms);
        // One chunk for the partially filled insertion point and one for the
        // chunk being written when the look-ahead completes.
        let min_chunks = (look_back + look_ahead).div_ceil(chunk_size) + 2;

        Self {
            bitrate,
            chunk_size,
            look_back,
            look_ahead,
            min_chunks,
        }
    }

    /// Total window size in bytes.
    pub fn window(&self) -> usize {
        self.look_back + self.look_ahead
    }

    /// Milliseconds of audio in `bytes` bytes.
    pub fn ms_for_bytes(&self, bytes: usize) -> f64 {
        if self.bitrate == 0 {
            return 0.0;
        }
        bytes as f64 * 8000.0 / f64::from(self.bitrate)
    }

    /// Number of chunks the ring buffer needs for `kind`.
    ///
    /// The split window only counts when silence is searched for; the
    /// relay burst always does. An Ogg ring must hold the largest possible
    /// partial page plus one incoming chunk, since partial pages can't be
    /// evicted.
    pub fn buffer_chunks(&self, kind: ContentKind, min_buffer_chunks: usize, burst: usize) -> usize {
        let window_chunks = if kind.searches_silence() { self.min_chunks } else { 0 };
        let burst_chunks = burst.div_ceil(self.chunk_size) + 2;
        let page_chunks = if kind.buffer_kind() == BufferKind::Ogg {
            (MAX_PAGE_LEN + self.chunk_size).div_ceil(self.chunk_size)
        } else {
            0
        };
        window_chunks
            .max(min_buffer_chunks)
            .max(burst_chunks)
            .max(page_chunks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geometry_128k_defaults() {
        let geometry = SplitGeometry::new(&SplitConfig::default(), 128_000, 8192);
        assert_eq!(geometry.look_back, 100_800);
        assert_eq!(geometry.look_ahead, 100_800);
        assert_eq!(geometry.window(), 201_600);
        assert_eq!(geometry.min_chunks, 27);
        assert!(geometry.min_chunks * 8192 >= geometry.window() + 8192);
    }

    #[test]
    fn test_geometry_with_offset() {
        let split = SplitConfig {
            offset_ms: 2000,
            ..SplitConfig::default()
        };
        let geometry = SplitGeometry::new(&split, 128_000, 8192);
        // (6000 - 2000 + 300) ms and (6000 + 2000 + 300) ms at 16 bytes/ms
        assert_eq!(geometry.look_back, 4300 * 16);
        assert_eq!(geometry.look_ahead, 8300 * 16);
    }

    #[test]
    fn test_geometry_offset_clamps_at_zero() {
        let split = SplitConfig {
            offset_ms: -9000,
            ..SplitConfig::default()
        };
        let geometry = SplitGeometry::new(&split, 128_000, 8192);
        assert_eq!(geometry.look_ahead, 300 * 16);
        assert_eq!(geometry.look_back, 15300 * 16);
    }

    #[test]
    fn test_buffer_chunks() {
        let geometry = SplitGeometry::new(&SplitConfig::default(), 128_000, 8192);
        assert_eq!(geometry.buffer_chunks(ContentKind::Mp3, 8, 32768), 27);
        assert_eq!(geometry.buffer_chunks(ContentKind::Aac, 8, 32768), 8);
        assert_eq!(geometry.buffer_chunks(ContentKind::Aac, 2, 1_000_000), 125);
    }

    #[test]
    fn test_ogg_buffer_holds_largest_page() {
        let geometry = SplitGeometry::new(&SplitConfig::default(), 128_000, 1024);
        let chunks = geometry.buffer_chunks(ContentKind::Ogg, 8, 0);
        assert_eq!(chunks, 65);
        assert!(chunks * 1024 >= MAX_PAGE_LEN + 1024);

        let geometry = SplitGeometry::new(&SplitConfig::default(), 128_000, 8192);
        assert_eq!(geometry.buffer_chunks(ContentKind::Ogg, 8, 0), 9);
        assert_eq!(geometry.buffer_chunks(ContentKind::Ogg, 16, 0), 16);
    }

    #[test]
    fn test_ms_for_bytes() {
        let geometry = SplitGeometry::new(&SplitConfig::default(), 128_000, 8192);
        assert!((geometry.ms_for_bytes(16_000) - 1000.0).abs() < f64::EPSILON);
    }
}
