//! Per-interval track information and the ICY metadata wire format.

use std::sync::Arc;

use super::codeset::{self, Codeset};
use super::rules::RuleSet;
use crate::MetadataError;

/// Largest inline metadata payload: the length byte counts 16-byte blocks.
pub const MAX_ICY_PAYLOAD: usize = 255 * 16;

const STREAM_TITLE: &[u8] = b"StreamTitle='";

/// Track information for one metadata interval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackInfo {
    /// Metadata string exactly as received (after charset decoding).
    pub raw: String,
    /// Parsed artist.
    pub artist: String,
    /// Parsed title.
    pub title: String,
    /// Parsed album.
    pub album: String,
    /// Parsed track number.
    pub track: String,
    /// Parsed year.
    pub year: String,
    /// Whether the track should be written out.
    pub save_track: bool,
    /// Inline metadata block (length byte included) for relay clients.
    pub icy_block: Arc<[u8]>,
}

impl TrackInfo {
    /// Runs `raw` through `rules` and composes the relay metadata block.
    pub fn from_raw(raw: &str, rules: &RuleSet, codeset: Codeset) -> Self {
        let parsed = rules.evaluate(raw);
        Self {
            raw: raw.to_string(),
            artist: parsed.artist,
            title: parsed.title,
            album: parsed.album,
            track: parsed.track,
            year: parsed.year,
            save_track: parsed.save_track,
            icy_block: compose_icy_block(raw, codeset),
        }
    }

    /// Track info for a stream that carries no metadata at all.
    pub fn untitled(name: &str) -> Self {
        Self {
            raw: name.to_string(),
            artist: String::new(),
            title: name.to_string(),
            album: String::new(),
            track: String::new(),
            year: String::new(),
            save_track: true,
            icy_block: compose_icy_block(name, Codeset::Utf8),
        }
    }

    /// Track info built from already separated fields (Ogg comment headers).
    pub fn from_fields(artist: &str, title: &str, album: &str, codeset: Codeset) -> Self {
        let raw = if artist.is_empty() {
            title.to_string()
        } else {
            format!("{artist} - {title}")
        };
        Self {
            icy_block: compose_icy_block(&raw, codeset),
            raw,
            artist: artist.to_string(),
            title: title.to_string(),
            album: album.to_string(),
            track: String::new(),
            year: String::new(),
            save_track: true,
        }
    }

    /// `Artist - Title`, or whichever of the two is present.
    pub fn display_name(&self) -> String {
        match (self.artist.is_empty(), self.title.is_empty()) {
            (false, false) => format!("{} - {}", self.artist, self.title),
            (true, false) => self.title.clone(),
            (false, true) => self.artist.clone(),
            (true, true) => self.raw.clone(),
        }
    }
}

/// Extracts the `StreamTitle` value from an inline metadata payload.
///
/// # Errors
///
/// Returns [`MetadataError::InvalidFrame`] when the payload has no
/// `StreamTitle='...'` field.
pub fn parse_icy_payload(payload: &[u8], codeset: Codeset) -> Result<String, MetadataError> {
    stream_title_bytes(payload).map(|value| codeset::decode(value, codeset))
}

/// Like [`parse_icy_payload`], returning the value's bytes undecoded.
///
/// # Errors
///
/// Returns [`MetadataError::InvalidFrame`] when the payload has no
/// `StreamTitle='...'` field.
pub fn stream_title_bytes(payload: &[u8]) -> Result<&[u8], MetadataError> {
    let end = payload
        .iter()
        .rposition(|&b| b != 0)
        .map_or(0, |pos| pos + 1);
    let payload = &payload[..end];

    let start = find(payload, STREAM_TITLE)
        .ok_or_else(|| MetadataError::InvalidFrame("missing StreamTitle".into()))?
        + STREAM_TITLE.len();
    let value = &payload[start..];
    let value_end = find(value, b"';")
        .or_else(|| value.iter().rposition(|&b| b == b'\''))
        .unwrap_or(value.len());
    Ok(&value[..value_end])
}

/// Builds an inline metadata block: a length byte `n` followed by `16 * n`
/// bytes holding `StreamTitle='<raw>';` padded with zeros.
pub fn compose_icy_block(raw: &str, codeset: Codeset) -> Arc<[u8]> {
    let mut text = Vec::with_capacity(raw.len() + 16);
    text.extend_from_slice(STREAM_TITLE);
    let mut value = codeset::encode(raw, codeset);
    value.truncate(MAX_ICY_PAYLOAD - STREAM_TITLE.len() - 2);
    text.extend_from_slice(&value);
    text.extend_from_slice(b"';");

    let blocks = text.len().div_ceil(16);
    let mut block = Vec::with_capacity(1 + blocks * 16);
    // blocks <= 255 because the payload was truncated to MAX_ICY_PAYLOAD
    block.push(u8::try_from(blocks).unwrap_or(u8::MAX));
    block.extend_from_slice(&text);
    block.resize(1 + blocks * 16, 0);
    block.into()
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
