//! Status events for monitoring a ripping session.
//!
//! Events are queued on an unbounded channel and delivered to the status
//! callback on a dedicated dispatcher thread, so a slow callback never
//! stalls the producer or the relay. The callback must not stop the
//! session synchronously: [`Session::stop`](crate::Session::stop) called
//! from inside it only requests the stop.

use std::cell::Cell;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;

use tokio::sync::mpsc;

use crate::chunk::Track;
use crate::source::StreamInfo;

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// [`Session::stop`](crate::Session::stop) or a [`StopHandle`](crate::StopHandle).
    Requested,
    /// `max_bytes_ripped` was reached.
    MaxBytesRipped,
    /// A non-recoverable error, or a recoverable one with reconnect disabled.
    Failed(String),
}

/// Status events emitted during a session.
///
/// # Example
///
/// ```
/// use stream_rip::StatusEvent;
///
/// fn handle(event: StatusEvent) {
///     match event {
///         StatusEvent::TrackFinished { track, path } => {
///             println!("finished #{} {:?}", track.number, path);
///         }
///         StatusEvent::Reconnecting { attempt, reason } => {
///             eprintln!("reconnect #{attempt}: {reason}");
///         }
///         StatusEvent::Error { message, recoverable } => {
///             eprintln!("error ({recoverable}): {message}");
///         }
///         _ => {}
///     }
/// }
/// ```
#[derive(Debug, Clone)]
pub enum StatusEvent {
    /// The session started and is about to connect.
    Started {
        /// Stream URL, without credentials.
        url: String,
    },

    /// Connected; the server's announcement.
    Connected {
        /// What the server announced.
        stream: StreamInfo,
    },

    /// Waiting for the first audio to size the buffer.
    Buffering,

    /// Audio is flowing into the buffer.
    Ripping,

    /// A recoverable error occurred; reconnecting after the configured delay.
    Reconnecting {
        /// 1-based reconnect attempt since the last successful connect.
        attempt: u32,
        /// The error that caused it.
        reason: String,
    },

    /// A track started and is being written.
    TrackStarted {
        /// The track.
        track: Track,
    },

    /// A track was completed.
    TrackFinished {
        /// The track.
        track: Track,
        /// Where the first sink that reported a path stored it.
        path: Option<PathBuf>,
    },

    /// A track was not written because the metadata rules excluded it.
    TrackSkipped {
        /// The excluded track info.
        track: Track,
    },

    /// A relay client finished its handshake.
    RelayClientConnected {
        /// Client address.
        peer: SocketAddr,
    },

    /// A relay client was dropped.
    RelayClientDisconnected {
        /// Client address.
        peer: SocketAddr,
        /// Why.
        reason: String,
    },

    /// Something failed.
    ///
    /// Recoverable errors are followed by [`Reconnecting`](Self::Reconnecting)
    /// when auto-reconnect is on; sink errors are recoverable unless
    /// `stop_on_file_error` is set.
    Error {
        /// Description of the error.
        message: String,
        /// Whether the session keeps going.
        recoverable: bool,
    },

    /// The session ended. Always the last event.
    Done {
        /// Why.
        reason: StopReason,
    },
}

/// Callback type for receiving status events.
///
/// Register one via [`RipBuilder::on_status()`](crate::RipBuilder::on_status).
pub type StatusCallback = Arc<dyn Fn(StatusEvent) + Send + Sync>;

/// Creates a [`StatusCallback`] from a closure.
///
/// # Example
///
/// ```
/// use stream_rip::{status_callback, StatusEvent};
///
/// let callback = status_callback(|event| {
///     println!("Got event: {:?}", event);
/// });
/// callback(StatusEvent::Buffering);
/// ```
pub fn status_callback<F>(f: F) -> StatusCallback
where
    F: Fn(StatusEvent) + Send + Sync + 'static,
{
    Arc::new(f)
}

thread_local! {
    static IN_CALLBACK: Cell<bool> = const { Cell::new(false) };
}

/// `true` on the dispatcher thread while the callback runs.
pub(crate) fn in_callback() -> bool {
    IN_CALLBACK.with(Cell::get)
}

/// Sending half of the status queue. Cheap to clone; sending never blocks.
#[derive(Clone, Default)]
pub(crate) struct StatusSender {
    tx: Option<mpsc::UnboundedSender<StatusEvent>>,
}

impl StatusSender {
    /// A sender that drops every event.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Queues `event` for the callback.
    pub fn emit(&self, event: StatusEvent) {
        tracing::trace!(?event, "status");
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }

    /// A sender whose events land in the returned receiver.
    #[cfg(test)]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<StatusEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }
}

/// Starts the dispatcher thread for `callback`.
///
/// The thread exits once every [`StatusSender`] has been dropped and the
/// queue is drained.
pub(crate) fn spawn_dispatcher(
    callback: Option<StatusCallback>,
) -> std::io::Result<(StatusSender, Option<JoinHandle<()>>)> {
    let Some(callback) = callback else {
        return Ok((StatusSender::disabled(), None));
    };
    let (tx, mut rx) = mpsc::unbounded_channel::<StatusEvent>();
    let handle = std::thread::Builder::new()
        .name("stream-rip-status".into())
        .spawn(move || {
            while let Some(event) = rx.blocking_recv() {
                IN_CALLBACK.with(|flag| flag.set(true));
                callback(event);
                IN_CALLBACK.with(|flag| flag.set(false));
            }
        })?;
    Ok((StatusSender { tx: Some(tx) }, Some(handle)))
}
