//! Tokio mpsc channel sink implementation.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::sink::TrackSink;
use crate::{SinkError, Track, TrackEvent};

/// A sink that forwards track events to a tokio mpsc channel.
///
/// Sends block the producer thread while the channel is full, so the
/// receiver must keep up or the stream will stall. Must not be used from
/// inside an async runtime worker.
///
/// # Example
///
/// ```
/// use stream_rip::{ChannelSink, TrackEvent};
/// use tokio::sync::mpsc;
///
/// let (tx, mut rx) = mpsc::channel::<TrackEvent>(100);
/// let sink = ChannelSink::new(tx);
///
/// // Use sink with StreamRip builder...
/// // Then receive events:
/// // while let Some(event) = rx.recv().await { ... }
/// ```
pub struct ChannelSink {
    name: String,
    sender: mpsc::Sender<TrackEvent>,
}

impl ChannelSink {
    /// Creates a new channel sink with the given sender.
    pub fn new(sender: mpsc::Sender<TrackEvent>) -> Self {
        Self {
            name: "channel".to_string(),
            sender,
        }
    }

    /// Creates a new channel sink with a custom name.
    pub fn with_name(name: impl Into<String>, sender: mpsc::Sender<TrackEvent>) -> Self {
        Self {
            name: name.into(),
            sender,
        }
    }

    fn send(&self, event: TrackEvent) -> Result<(), SinkError> {
        self.sender
            .blocking_send(event)
            .map_err(|_| SinkError::ChannelClosed)
    }
}

impl TrackSink for ChannelSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn start_track(&mut self, track: &Track) -> Result<(), SinkError> {
        self.send(TrackEvent::Started(track.clone()))
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), SinkError> {
        self.send(TrackEvent::Data(Arc::from(bytes)))
    }

    fn end_track(&mut self, track: &Track) -> Result<Option<PathBuf>, SinkError> {
        self.send(TrackEvent::Finished {
            track: track.clone(),
            path: None,
        })?;
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ContentKind, TrackInfo};

    fn track() -> Track {
        Track::new(1, TrackInfo::untitled("Song"), ContentKind::Mp3)
    }

    #[test]
    fn test_channel_sink_sends_events() {
        let (tx, mut rx) = mpsc::channel::<TrackEvent>(10);
        let mut sink = ChannelSink::new(tx);

        sink.start_track(&track()).unwrap();
        sink.write(&[1, 2, 3]).unwrap();
        sink.end_track(&track()).unwrap();

        assert!(matches!(rx.try_recv().unwrap(), TrackEvent::Started(t) if t.number == 1));
        match rx.try_recv().unwrap() {
            TrackEvent::Data(bytes) => assert_eq!(&bytes[..], &[1, 2, 3]),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            rx.try_recv().unwrap(),
            TrackEvent::Finished { path: None, .. }
        ));
    }

    #[test]
    fn test_channel_sink_closed() {
        let (tx, rx) = mpsc::channel::<TrackEvent>(10);
        let mut sink = ChannelSink::new(tx);

        // Drop the receiver
        drop(rx);

        let result = sink.write(&[1, 2, 3]);
        assert!(matches!(result, Err(SinkError::ChannelClosed)));
    }

    #[test]
    fn test_channel_sink_custom_name() {
        let (tx, _rx) = mpsc::channel::<TrackEvent>(10);
        let sink = ChannelSink::with_name("uploader", tx);
        assert_eq!(sink.name(), "uploader");
    }
}
