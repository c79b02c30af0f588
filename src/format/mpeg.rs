//! MPEG audio frame headers.
//!
//! Only the four-byte frame header is interpreted here: enough to walk a
//! byte window frame by frame, measure each frame's duration and detect the
//! stream's bitrate. Decoding the audio itself is left to
//! [`VolumeDecoder`](crate::format::VolumeDecoder).

/// MPEG version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MpegVersion {
    /// MPEG-1.
    V1,
    /// MPEG-2 (LSF).
    V2,
    /// MPEG-2.5.
    V25,
}

/// MPEG layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    /// Layer I.
    I,
    /// Layer II.
    II,
    /// Layer III.
    III,
}

const BITRATES_V1: [[u16; 15]; 3] = [
    [0, 32, 64, 96, 128, 160, 192, 224, 256, 288, 320, 352, 384, 416, 448],
    [0, 32, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 384],
    [0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320],
];

const BITRATES_V2: [[u16; 15]; 2] = [
    [0, 32, 48, 56, 64, 80, 96, 112, 128, 144, 160, 176, 192, 224, 256],
    [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160],
];

const SAMPLE_RATES: [[u32; 3]; 3] = [
    [44100, 48000, 32000],
    [22050, 24000, 16000],
    [11025, 12000, 8000],
];

/// Consecutive matching frames required before a bitrate is trusted.
pub const STEADY_FRAMES: usize = 3;

/// A parsed frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// MPEG version.
    pub version: MpegVersion,
    /// Layer.
    pub layer: Layer,
    /// Bitrate in bits per second.
    pub bitrate: u32,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Whether the frame carries a padding slot.
    pub padding: bool,
    /// 1 for mono, 2 otherwise.
    pub channels: u8,
    /// Total frame length in bytes, header included.
    pub frame_len: usize,
    /// PCM samples per channel in the frame.
    pub samples: u32,
}

impl FrameHeader {
    /// Parses the header at the start of `bytes`.
    ///
    /// Returns `None` for anything that isn't a valid, fixed-bitrate header.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let &[b0, b1, b2, b3, ..] = bytes else {
            return None;
        };
        if b0 != 0xFF || b1 & 0xE0 != 0xE0 {
            return None;
        }

        let version = match (b1 >> 3) & 0x03 {
            0 => MpegVersion::V25,
            2 => MpegVersion::V2,
            3 => MpegVersion::V1,
            _ => return None,
        };
        let layer = match (b1 >> 1) & 0x03 {
            1 => Layer::III,
            2 => Layer::II,
            3 => Layer::I,
            _ => return None,
        };
        let bitrate_index = usize::from(b2 >> 4);
        let rate_index = usize::from((b2 >> 2) & 0x03);
        if bitrate_index == 0 || bitrate_index == 15 || rate_index == 3 {
            return None;
        }
        let padding = b2 & 0x02 != 0;
        let channels = if b3 >> 6 == 3 { 1 } else { 2 };

        let kbps = match (version, layer) {
            (MpegVersion::V1, Layer::I) => BITRATES_V1[0][bitrate_index],
            (MpegVersion::V1, Layer::II) => BITRATES_V1[1][bitrate_index],
            (MpegVersion::V1, Layer::III) => BITRATES_V1[2][bitrate_index],
            (_, Layer::I) => BITRATES_V2[0][bitrate_index],
            (_, _) => BITRATES_V2[1][bitrate_index],
        };
        let bitrate = u32::from(kbps) * 1000;
        let sample_rate = match version {
            MpegVersion::V1 => SAMPLE_RATES[0][rate_index],
            MpegVersion::V2 => SAMPLE_RATES[1][rate_index],
            MpegVersion::V25 => SAMPLE_RATES[2][rate_index],
        };

        let pad = u32::from(padding);
        let (frame_len, samples) = match (version, layer) {
            (_, Layer::I) => ((12 * bitrate / sample_rate + pad) * 4, 384),
            (_, Layer::II) | (MpegVersion::V1, Layer::III) => (144 * bitrate / sample_rate + pad, 1152),
            (_, Layer::III) => (72 * bitrate / sample_rate + pad, 576),
        };

        Some(Self {
            version,
            layer,
            bitrate,
            sample_rate,
            padding,
            channels,
            frame_len: frame_len as usize,
            samples,
        })
    }

    /// Playback duration of the frame in milliseconds.
    pub fn duration_ms(&self) -> f64 {
        f64::from(self.samples) * 1000.0 / f64::from(self.sample_rate)
    }

    /// Same version, layer and sample rate. The bitrate may change from
    /// frame to frame in a VBR stream.
    pub fn same_stream(&self, other: &Self) -> bool {
        self.version == other.version
            && self.layer == other.layer
            && self.sample_rate == other.sample_rate
    }

    /// Same stream and same bitrate.
    pub fn same_format(&self, other: &Self) -> bool {
        self.same_stream(other) && self.bitrate == other.bitrate
    }
}

/// A frame located in a byte window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    /// Offset of the header from the start of the window.
    pub offset: usize,
    /// Parsed header.
    pub header: FrameHeader,
}

/// Walks the complete frames in `buf`, resynchronizing over garbage.
///
/// A candidate header is accepted only if the next frame also starts with
/// a valid header, or if it ends exactly at the end of `buf`.
pub fn frames(buf: &[u8]) -> impl Iterator<Item = Frame> + '_ {
    let mut pos = 0;
    std::iter::from_fn(move || {
        while pos + 4 <= buf.len() {
            if let Some(header) = FrameHeader::parse(&buf[pos..]) {
                let end = pos + header.frame_len;
                let confirmed = end == buf.len()
                    || buf
                        .get(end..)
                        .and_then(FrameHeader::parse)
                        .is_some_and(|next| next.same_stream(&header));
                if end <= buf.len() && confirmed {
                    let frame = Frame {
                        offset: pos,
                        header,
                    };
                    pos = end;
                    return Some(frame);
                }
            }
            pos += 1;
        }
        None
    })
}

/// Bitrate of the first run of [`STEADY_FRAMES`] consecutive frames with
/// identical format.
pub fn steady_bitrate(buf: &[u8]) -> Option<u32> {
    let mut run: Option<(FrameHeader, usize, usize)> = None;
    for frame in frames(buf) {
        run = match run {
            Some((header, count, end)) if end == frame.offset && header.same_format(&frame.header) => {
                Some((header, count + 1, frame.offset + frame.header.frame_len))
            }
            _ => Some((frame.header, 1, frame.offset + frame.header.frame_len)),
        };
        if let Some((header, count, _)) = run {
            if count >= STEADY_FRAMES {
                return Some(header.bitrate);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::mock::mpeg_frame;

    #[test]
    fn test_parse_mpeg1_layer3() {
        let frame = mpeg_frame(128, 0);
        let header = FrameHeader::parse(&frame).unwrap();
        assert_eq!(header.version, MpegVersion::V1);
        assert_eq!(header.layer, Layer::III);
        assert_eq!(header.bitrate, 128_000);
        assert_eq!(header.sample_rate, 44100);
        assert_eq!(header.frame_len, 417);
        assert_eq!(header.frame_len, frame.len());
        assert!((header.duration_ms() - 26.122).abs() < 0.001);
    }

    #[test]
    fn test_parse_rejects_invalid() {
        assert!(FrameHeader::parse(&[0xFF, 0xFB]).is_none());
        assert!(FrameHeader::parse(&[0x00, 0xFB, 0x90, 0x44]).is_none());
        // free bitrate
        assert!(FrameHeader::parse(&[0xFF, 0xFB, 0x00, 0x44]).is_none());
        // reserved sample rate
        assert!(FrameHeader::parse(&[0xFF, 0xFB, 0x9C, 0x44]).is_none());
        // reserved version
        assert!(FrameHeader::parse(&[0xFF, 0xEB, 0x90, 0x44]).is_none());
    }

    #[test]
    fn test_mpeg2_layer3_frame_length() {
        // MPEG-2, layer III, 64 kbps, 22050 Hz
        let header = FrameHeader::parse(&[0xFF, 0xF3, 0x80, 0xC4]).unwrap();
        assert_eq!(header.version, MpegVersion::V2);
        assert_eq!(header.bitrate, 64_000);
        assert_eq!(header.sample_rate, 22050);
        assert_eq!(header.frame_len, 72 * 64_000 / 22050);
        assert_eq!(header.samples, 576);
        assert_eq!(header.channels, 1);
    }

    #[test]
    fn test_frames_skip_garbage() {
        let mut buf = vec![0x12, 0xFF, 0x00, 0x34];
        for _ in 0..4 {
            buf.extend_from_slice(&mpeg_frame(128, 0));
        }
        let found: Vec<Frame> = frames(&buf).collect();
        assert_eq!(found.len(), 4);
        assert_eq!(found[0].offset, 4);
        assert_eq!(found[1].offset, 4 + 417);
    }

    #[test]
    fn test_frames_ignore_truncated_tail() {
        let mut buf = Vec::new();
        for _ in 0..3 {
            buf.extend_from_slice(&mpeg_frame(128, 0));
        }
        buf.extend_from_slice(&mpeg_frame(128, 0)[..100]);
        assert_eq!(frames(&buf).count(), 3);
    }

    #[test]
    fn test_steady_bitrate() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&mpeg_frame(64, 0));
        for _ in 0..3 {
            buf.extend_from_slice(&mpeg_frame(192, 0));
        }
        assert_eq!(steady_bitrate(&buf), Some(192_000));

        let two = [mpeg_frame(128, 0), mpeg_frame(128, 0)].concat();
        assert_eq!(steady_bitrate(&two), None);
    }

    #[test]
    fn test_frames_follow_vbr_bitrate_changes() {
        let mut buf = Vec::new();
        for i in 0..20 {
            let kbps = if i % 2 == 0 { 128 } else { 160 };
            buf.extend_from_slice(&mpeg_frame(kbps, 0));
        }
        let found: Vec<Frame> = frames(&buf).collect();
        assert_eq!(found.len(), 20);
        assert_eq!(found[1].offset, 417);
        assert_eq!(found[1].header.bitrate, 160_000);

        // No run of identical frames, so no steady bitrate.
        assert_eq!(steady_bitrate(&buf), None);
    }
}
