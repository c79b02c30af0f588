//! Sink trait and implementations for track destinations.
//!
//! A [`TrackSink`] receives whole tracks: a start, the track's bytes (tags
//! included) and an end. The crate provides two built-in sinks:
//!
//! - [`FileSink`]: Writes each track to its own file
//! - [`ChannelSink`]: Forwards [`TrackEvent`](crate::TrackEvent)s to a tokio mpsc channel
//!
//! You can implement the [`TrackSink`] trait for custom destinations like
//! uploaders or analyzers.

mod channel;
mod file;

pub use channel::ChannelSink;
pub use file::FileSink;

use std::path::PathBuf;

use crate::{SinkError, Track};

/// A destination for ripped tracks.
///
/// Sinks are driven from the producer thread, one call at a time, in the
/// order `start_track`, any number of `write`s, `end_track`.
///
/// # Implementation Notes
///
/// - Calls are synchronous; keep them short, the producer waits for them
/// - Failed `start_track` and `end_track` calls are retried with
///   exponential backoff
/// - `write` is never retried, since a failed write may have stored part
///   of its bytes; the sink is skipped for the rest of the track instead
/// - A sink that keeps failing is skipped for the rest of the track
///
/// # Example
///
/// ```
/// use stream_rip::{SinkError, Track, TrackSink};
///
/// struct CountingSink {
///     bytes: usize,
/// }
///
/// impl TrackSink for CountingSink {
///     fn name(&self) -> &str {
///         "count"
///     }
///
///     fn start_track(&mut self, track: &Track) -> Result<(), SinkError> {
///         println!("#{} {}", track.number, track.info.display_name());
///         Ok(())
///     }
///
///     fn write(&mut self, bytes: &[u8]) -> Result<(), SinkError> {
///         self.bytes += bytes.len();
///         Ok(())
///     }
/// }
/// ```
pub trait TrackSink: Send {
    /// Human-readable name for logging and error messages.
    fn name(&self) -> &str;

    /// Called when a track starts, before any of its bytes.
    fn start_track(&mut self, track: &Track) -> Result<(), SinkError>;

    /// Appends bytes to the current track. Called once per chunk; an error
    /// ends this sink's part in the track.
    fn write(&mut self, bytes: &[u8]) -> Result<(), SinkError>;

    /// Called when the current track is complete.
    ///
    /// Returns where the track was stored, if the sink stores files.
    /// Default implementation does nothing.
    fn end_track(&mut self, _track: &Track) -> Result<Option<PathBuf>, SinkError> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ContentKind, TrackInfo};

    struct CountingSink {
        name: String,
        started: usize,
        bytes: usize,
    }

    impl TrackSink for CountingSink {
        fn name(&self) -> &str {
            &self.name
        }

        fn start_track(&mut self, _track: &Track) -> Result<(), SinkError> {
            self.started += 1;
            Ok(())
        }

        fn write(&mut self, bytes: &[u8]) -> Result<(), SinkError> {
            self.bytes += bytes.len();
            Ok(())
        }
    }

    #[test]
    fn test_sink_lifecycle() {
        let mut sink = CountingSink {
            name: "test".into(),
            started: 0,
            bytes: 0,
        };
        let track = Track::new(1, TrackInfo::untitled("x"), ContentKind::Mp3);

        sink.start_track(&track).unwrap();
        sink.write(&[0u8; 10]).unwrap();
        sink.write(&[0u8; 5]).unwrap();
        assert_eq!(sink.end_track(&track).unwrap(), None);

        assert_eq!(sink.started, 1);
        assert_eq!(sink.bytes, 15);
        assert_eq!(sink.name(), "test");
    }

    #[test]
    fn test_sink_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<Box<dyn TrackSink>>();
    }
}
