//! What the splitter hands to sinks: tracks and their bytes.

use std::path::PathBuf;
use std::sync::Arc;

use crate::format::ContentKind;
use crate::metadata::TrackInfo;

/// A track being written.
///
/// # Example
///
/// ```
/// use stream_rip::{ContentKind, Track, TrackInfo};
///
/// let track = Track::new(3, TrackInfo::untitled("AC/DC: Live?"), ContentKind::Mp3);
/// assert_eq!(track.file_name(), "AC_DC_ Live_.mp3");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
    /// 1-based number of the track within the session.
    pub number: u32,
    /// Metadata the track was started with.
    pub info: TrackInfo,
    /// Content kind, which decides the file extension.
    pub kind: ContentKind,
    /// `true` for the first track of a connection, which was joined midway.
    pub partial: bool,
}

impl Track {
    /// Creates a complete (not partial) track.
    pub fn new(number: u32, info: TrackInfo, kind: ContentKind) -> Self {
        Self {
            number,
            info,
            kind,
            partial: false,
        }
    }

    /// File name stem: `Artist - Title` with characters that are unsafe in
    /// file names replaced by `_`.
    pub fn file_stem(&self) -> String {
        let name = self.info.display_name();
        let cleaned: String = name
            .trim()
            .chars()
            .map(|c| match c {
                '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
                c if c.is_control() => '_',
                c => c,
            })
            .collect();
        let cleaned = cleaned.trim_matches('.').trim().to_string();
        if cleaned.is_empty() {
            format!("track {:03}", self.number)
        } else {
            cleaned
        }
    }

    /// File name with extension.
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.file_stem(), self.kind.extension())
    }
}

/// Events forwarded by [`ChannelSink`](crate::ChannelSink).
#[derive(Debug, Clone)]
pub enum TrackEvent {
    /// A track started.
    Started(Track),
    /// Bytes of the current track, tags included.
    Data(Arc<[u8]>),
    /// The current track ended.
    Finished {
        /// The track.
        track: Track,
        /// Where a file sink stored it, if any did.
        path: Option<PathBuf>,
    },
}
