//! Audio formats carried by the stream.
//!
//! This module provides:
//! - [`ContentKind`]: what the upstream server is sending
//! - MPEG frame header parsing ([`mpeg`])
//! - Per-frame volume decoding for the silence search ([`volume`])
//! - ID3 tag builders ([`id3`])

pub mod id3;
pub mod mpeg;
pub mod volume;

pub use volume::{SymphoniaVolumeDecoder, VolumeDecoder};

use crate::pipeline::BufferKind;

/// Kind of content announced by (or guessed for) the upstream stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    /// MPEG audio (usually layer III).
    Mp3,
    /// AAC / AAC+ in ADTS framing.
    Aac,
    /// Ogg (Vorbis or Opus).
    Ogg,
    /// Nullsoft Streaming Video.
    Nsv,
    /// PLS playlist.
    Pls,
    /// M3U playlist.
    M3u,
    /// Anything else.
    Unknown,
}

impl ContentKind {
    /// Maps a `Content-Type` value.
    pub fn from_mime(mime: &str) -> Self {
        let mime = mime
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match mime.as_str() {
            "audio/mpeg" | "audio/mp3" | "audio/x-mpeg" | "audio/mpg" => Self::Mp3,
            "audio/aac" | "audio/aacp" | "audio/x-aac" | "audio/mp4" => Self::Aac,
            "application/ogg" | "audio/ogg" | "audio/x-ogg" | "audio/opus" | "audio/vorbis" => {
                Self::Ogg
            }
            "video/nsv" | "misc/ultravox" => Self::Nsv,
            "audio/x-scpls" | "audio/scpls" | "application/pls+xml" => Self::Pls,
            "audio/x-mpegurl" | "audio/mpegurl" | "application/x-mpegurl"
            | "application/vnd.apple.mpegurl" => Self::M3u,
            _ => Self::Unknown,
        }
    }

    /// Guesses from a URL path's file extension.
    pub fn from_extension(path: &str) -> Self {
        let ext = path
            .rsplit('/')
            .next()
            .and_then(|name| name.rsplit_once('.'))
            .map(|(_, ext)| ext.to_ascii_lowercase());
        match ext.as_deref() {
            Some("mp3" | "mpga") => Self::Mp3,
            Some("aac" | "aacp" | "m4a") => Self::Aac,
            Some("ogg" | "oga" | "opus") => Self::Ogg,
            Some("nsv") => Self::Nsv,
            Some("pls") => Self::Pls,
            Some("m3u" | "m3u8") => Self::M3u,
            _ => Self::Unknown,
        }
    }

    /// Returns `true` for playlist formats.
    pub fn is_playlist(self) -> bool {
        matches!(self, Self::Pls | Self::M3u)
    }

    /// How the ring buffer should treat this content.
    pub fn buffer_kind(self) -> BufferKind {
        match self {
            Self::Ogg => BufferKind::Ogg,
            _ => BufferKind::Framed,
        }
    }

    /// Whether split points are searched for by silence.
    pub fn searches_silence(self) -> bool {
        self == Self::Mp3
    }

    /// Whether ID3 tags are written around tracks.
    pub fn takes_id3(self) -> bool {
        self == Self::Mp3
    }

    /// File extension for ripped tracks.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Mp3 => "mp3",
            Self::Aac => "aac",
            Self::Ogg => "ogg",
            Self::Nsv => "nsv",
            Self::Pls | Self::M3u | Self::Unknown => "bin",
        }
    }

    /// `Content-Type` announced to relay clients.
    pub fn mime(self) -> &'static str {
        match self {
            Self::Mp3 => "audio/mpeg",
            Self::Aac => "audio/aacp",
            Self::Ogg => "application/ogg",
            Self::Nsv => "video/nsv",
            Self::Pls => "audio/x-scpls",
            Self::M3u => "audio/x-mpegurl",
            Self::Unknown => "application/octet-stream",
        }
    }
}
