//! ID3 tag builders for MP3 tracks.
//!
//! Tags are built in memory and spliced into the byte stream handed to the
//! sinks: ID3v2.3 in front of the first audio byte, ID3v1 after the last.

use crate::metadata::{codeset, Codeset, TrackInfo};

/// Size of an ID3v1 tag.
pub const ID3V1_LEN: usize = 128;

const ID3V2_HEADER_LEN: usize = 10;
const ENCODING_LATIN1: u8 = 0;
const ENCODING_UTF16: u8 = 1;

/// The track number written into tags: the parsed one when present,
/// otherwise `fallback`.
fn track_number(info: &TrackInfo, fallback: u32) -> u32 {
    info.track.trim().parse().unwrap_or(fallback)
}

/// Builds a 128-byte ID3v1.1 tag.
pub fn id3v1(info: &TrackInfo, track_no: u32) -> [u8; ID3V1_LEN] {
    let mut tag = [0u8; ID3V1_LEN];
    tag[..3].copy_from_slice(b"TAG");
    put_latin1(&mut tag[3..33], &info.title);
    put_latin1(&mut tag[33..63], &info.artist);
    put_latin1(&mut tag[63..93], &info.album);
    put_latin1(&mut tag[93..97], &info.year);
    // comment[28], zero byte, track byte
    tag[126] = u8::try_from(track_number(info, track_no)).unwrap_or(0);
    tag[127] = 0xFF;
    tag
}

fn put_latin1(field: &mut [u8], text: &str) {
    let bytes = codeset::encode(text, Codeset::Latin1);
    let len = bytes.len().min(field.len());
    field[..len].copy_from_slice(&bytes[..len]);
}

/// Builds an ID3v2.3 tag with artist, title, album, track and year frames.
///
/// Text is stored as ISO-8859-1 when every character fits, otherwise as
/// UTF-16 with a byte order mark. Empty fields are omitted.
pub fn id3v2(info: &TrackInfo, track_no: u32) -> Vec<u8> {
    let track = track_number(info, track_no).to_string();
    let fields = [
        (b"TPE1", info.artist.as_str()),
        (b"TIT2", info.title.as_str()),
        (b"TALB", info.album.as_str()),
        (b"TRCK", track.as_str()),
        (b"TYER", info.year.as_str()),
    ];

    let mut frames = Vec::new();
    for (id, text) in fields {
        if text.is_empty() {
            continue;
        }
        let body = text_frame_body(text);
        frames.extend_from_slice(id);
        frames.extend_from_slice(&u32::try_from(body.len()).unwrap_or(u32::MAX).to_be_bytes());
        frames.extend_from_slice(&[0, 0]);
        frames.extend_from_slice(&body);
    }

    let mut tag = Vec::with_capacity(ID3V2_HEADER_LEN + frames.len());
    tag.extend_from_slice(b"ID3\x03\x00\x00");
    tag.extend_from_slice(&syncsafe(frames.len()));
    tag.extend_from_slice(&frames);
    tag
}

fn text_frame_body(text: &str) -> Vec<u8> {
    if text.chars().all(|c| u32::from(c) <= 0xFF) {
        let mut body = vec![ENCODING_LATIN1];
        body.extend(codeset::encode(text, Codeset::Latin1));
        body
    } else {
        let mut body = vec![ENCODING_UTF16, 0xFF, 0xFE];
        for unit in text.encode_utf16() {
            body.extend_from_slice(&unit.to_le_bytes());
        }
        body
    }
}

/// Encodes `size` as four 7-bit bytes.
fn syncsafe(size: usize) -> [u8; 4] {
    let size = u32::try_from(size).unwrap_or(u32::MAX) & 0x0FFF_FFFF;
    [
        ((size >> 21) & 0x7F) as u8,
        ((size >> 14) & 0x7F) as u8,
        ((size >> 7) & 0x7F) as u8,
        (size & 0x7F) as u8,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info() -> TrackInfo {
        let mut info = TrackInfo::from_fields("Björk", "Jóga", "Homogenic", Codeset::Utf8);
        info.year = "1997".into();
        info
    }

    #[test]
    fn test_id3v1_layout() {
        let tag = id3v1(&info(), 4);
        assert_eq!(&tag[..3], b"TAG");
        assert_eq!(&tag[3..8], b"J\xf3ga\0");
        assert_eq!(&tag[33..39], b"Bj\xf6rk\0");
        assert_eq!(&tag[63..72], b"Homogenic");
        assert_eq!(&tag[93..97], b"1997");
        assert_eq!(tag[125], 0);
        assert_eq!(tag[126], 4);
    }

    #[test]
    fn test_id3v1_truncates_long_fields() {
        let info = TrackInfo::from_fields("", &"t".repeat(50), "", Codeset::Utf8);
        let tag = id3v1(&info, 1);
        assert!(tag[3..33].iter().all(|&b| b == b't'));
        assert_eq!(tag[33], 0);
    }

    #[test]
    fn test_id3v2_header_and_frames() {
        let tag = id3v2(&info(), 2);
        assert_eq!(&tag[..6], b"ID3\x03\x00\x00");
        let size = (usize::from(tag[6]) << 21)
            | (usize::from(tag[7]) << 14)
            | (usize::from(tag[8]) << 7)
            | usize::from(tag[9]);
        assert_eq!(size, tag.len() - 10);

        assert_eq!(&tag[10..14], b"TPE1");
        assert_eq!(&tag[14..18], &6u32.to_be_bytes());
        assert_eq!(tag[20], ENCODING_LATIN1);
        assert_eq!(&tag[21..26], b"Bj\xf6rk");
        assert!(tag.windows(4).any(|w| w == b"TRCK"));
    }

    #[test]
    fn test_id3v2_uses_utf16_when_needed() {
        let info = TrackInfo::from_fields("", "東京", "", Codeset::Utf8);
        let tag = id3v2(&info, 1);
        let pos = tag.windows(4).position(|w| w == b"TIT2").unwrap();
        let body = &tag[pos + 10..pos + 10 + 7];
        assert_eq!(body[0], ENCODING_UTF16);
        assert_eq!(&body[1..3], &[0xFF, 0xFE]);
        assert_eq!(&body[3..5], &0x6771u16.to_le_bytes());
    }

    #[test]
    fn test_parsed_track_number_wins() {
        let mut info = info();
        info.track = "9".into();
        assert_eq!(id3v1(&info, 3)[126], 9);
    }

    #[test]
    fn test_syncsafe() {
        assert_eq!(syncsafe(0x7F), [0, 0, 0, 0x7F]);
        assert_eq!(syncsafe(0x80), [0, 0, 1, 0]);
        assert_eq!(syncsafe(257), [0, 0, 2, 1]);
    }
}
