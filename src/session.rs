//! Ripping session management.

use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Mutex, MutexGuard};

use crate::event::{self, StatusSender};
use crate::pipeline::{lock, SharedState};
use crate::source::client;
use crate::RipError;

/// Statistics about a ripping session.
#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    /// Audio bytes received from upstream, metadata excluded.
    pub bytes_ripped: u64,
    /// Tracks handed to the sinks and finished.
    pub tracks_completed: u64,
    /// Relay clients currently connected.
    pub relay_clients: usize,
    /// Reconnects performed after recoverable errors.
    pub reconnects: u64,
}

/// Internal state shared between Session and background threads.
pub(crate) struct SessionState {
    stop: AtomicBool,
    running: AtomicBool,
    pub bytes_ripped: AtomicU64,
    pub tracks_completed: AtomicU64,
    pub reconnects: AtomicU64,
    /// Clone of the producer's socket, closed to unblock a pending receive.
    upstream: Mutex<Option<TcpStream>>,
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            stop: AtomicBool::new(false),
            running: AtomicBool::new(true),
            bytes_ripped: AtomicU64::new(0),
            tracks_completed: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
            upstream: Mutex::new(None),
        }
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Sets the stop flag and closes the upstream socket. Returns `false`
    /// if a stop had already been requested.
    pub fn request_stop(&self) -> bool {
        if self.stop.swap(true, Ordering::SeqCst) {
            return false;
        }
        if let Some(socket) = self.upstream().as_ref() {
            client::force_close(socket);
        }
        true
    }

    /// Registers the socket of the current upstream connection.
    ///
    /// If a stop raced with the connect, the socket is closed right away.
    pub fn set_upstream(&self, socket: Option<TcpStream>) {
        let mut upstream = self.upstream();
        *upstream = socket;
        if self.stop_requested() {
            if let Some(socket) = upstream.as_ref() {
                client::force_close(socket);
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn finished(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn upstream(&self) -> MutexGuard<'_, Option<TcpStream>> {
        self.upstream.lock()
    }
}

/// Cloneable handle that requests a stop without waiting.
///
/// Unlike [`Session::stop`], this is safe to call from the status callback.
#[derive(Clone)]
pub struct StopHandle {
    state: Arc<SessionState>,
}

impl StopHandle {
    /// Asks the session to stop. Returns immediately.
    ///
    /// # Errors
    ///
    /// Returns [`RipError::AlreadyStopped`] if a stop was already requested.
    pub fn request_stop(&self) -> Result<(), RipError> {
        if self.state.request_stop() {
            Ok(())
        } else {
            Err(RipError::AlreadyStopped)
        }
    }

    /// Returns `true` once a stop was requested.
    pub fn is_stop_requested(&self) -> bool {
        self.state.stop_requested()
    }
}

impl std::fmt::Debug for StopHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StopHandle")
            .field("stop_requested", &self.state.stop_requested())
            .finish()
    }
}

/// Handle to a running ripping session.
///
/// The `Session` is returned by [`RipBuilder::start()`] and represents an
/// active rip. Ripping and relaying run on background threads until
/// `stop()` is called, the session is dropped, or a non-recoverable error
/// ends it.
///
/// # Lifecycle
///
/// 1. Created by [`RipBuilder::start()`]
/// 2. Ripping runs in background, reconnecting as configured
/// 3. Call [`stop()`](Session::stop) for graceful shutdown
/// 4. Dropping the `Session` also stops ripping (but prefer explicit `stop()`)
///
/// # Example
///
/// ```no_run
/// use stream_rip::{FileSink, StreamRip};
///
/// let session = StreamRip::builder()
///     .url("http://radio.example.com:8000/stream")
///     .add_sink(FileSink::new("rips"))
///     .start()?;
///
/// std::thread::sleep(std::time::Duration::from_secs(60));
/// println!("{:?}", session.stats());
///
/// // Graceful shutdown
/// session.stop()?;
/// # Ok::<(), stream_rip::RipError>(())
/// ```
///
/// [`RipBuilder::start()`]: crate::RipBuilder::start
pub struct Session {
    state: Arc<SessionState>,
    shared: SharedState,
    relay_port: Option<u16>,
    producer: Option<JoinHandle<()>>,
    dispatcher: Option<JoinHandle<()>>,
}

impl Session {
    pub(crate) fn new(
        state: Arc<SessionState>,
        shared: SharedState,
        relay_port: Option<u16>,
        producer: JoinHandle<()>,
        dispatcher: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            state,
            shared,
            relay_port,
            producer: Some(producer),
            dispatcher,
        }
    }

    /// Returns `true` until the session has ended.
    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }

    /// Port the relay server is listening on, if the relay is enabled.
    pub fn relay_port(&self) -> Option<u16> {
        self.relay_port
    }

    /// Returns current session statistics.
    pub fn stats(&self) -> SessionStats {
        SessionStats {
            bytes_ripped: self.state.bytes_ripped.load(Ordering::SeqCst),
            tracks_completed: self.state.tracks_completed.load(Ordering::SeqCst),
            relay_clients: lock(&self.shared).clients.len(),
            reconnects: self.state.reconnects.load(Ordering::SeqCst),
        }
    }

    /// Returns a handle that can request a stop from anywhere.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            state: Arc::clone(&self.state),
        }
    }

    /// Gracefully stops the session.
    ///
    /// This will:
    /// 1. Close the upstream connection
    /// 2. Flush the buffered audio to the current track and finish it
    /// 3. Stop the relay server and drop its clients
    /// 4. Wait for all background threads, including the status dispatcher
    ///
    /// Called from inside the status callback it only requests the stop;
    /// waiting there would deadlock the dispatcher.
    ///
    /// # Errors
    ///
    /// Returns [`RipError::Thread`] if a background thread panicked.
    pub fn stop(mut self) -> Result<(), RipError> {
        self.state.request_stop();
        if event::in_callback() {
            tracing::debug!("stop requested from status callback, not waiting");
            self.producer = None;
            self.dispatcher = None;
            return Ok(());
        }
        self.join()
    }

    /// Waits for the session to end on its own, e.g. after
    /// `max_bytes_ripped` was reached or a fatal error.
    ///
    /// # Errors
    ///
    /// Returns [`RipError::Thread`] if a background thread panicked.
    pub fn wait(mut self) -> Result<(), RipError> {
        self.join()
    }

    fn join(&mut self) -> Result<(), RipError> {
        let mut result = Ok(());
        if let Some(handle) = self.producer.take() {
            if handle.join().is_err() {
                result = Err(RipError::Thread("producer thread panicked".into()));
            }
        }

        // The dispatcher exits once the last sender is gone.
        lock(&self.shared).status = StatusSender::disabled();
        if let Some(handle) = self.dispatcher.take() {
            if handle.join().is_err() && result.is_ok() {
                result = Err(RipError::Thread("status dispatcher panicked".into()));
            }
        }
        result
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.state.is_running() {
            // Session dropped without explicit stop() - let the threads wind down
            self.state.request_stop();
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("running", &self.is_running())
            .field("relay_port", &self.relay_port)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_state_new() {
        let state = SessionState::new();
        assert!(state.is_running());
        assert!(!state.stop_requested());
        assert_eq!(state.bytes_ripped.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_stop_handle_reports_already_stopped() {
        let handle = StopHandle {
            state: Arc::new(SessionState::new()),
        };
        assert!(handle.request_stop().is_ok());
        assert!(handle.is_stop_requested());
        assert!(matches!(handle.request_stop(), Err(RipError::AlreadyStopped)));
    }

    #[test]
    fn test_request_stop_closes_upstream() {
        use std::io::Read;

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let socket = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (_server, _) = listener.accept().unwrap();

        let state = SessionState::new();
        state.set_upstream(Some(socket.try_clone().unwrap()));
        assert!(state.request_stop());

        let mut reader = socket;
        let mut buf = [0u8; 8];
        assert_eq!(reader.read(&mut buf).unwrap_or(0), 0);
    }

    #[test]
    fn test_session_stats_default() {
        let stats = SessionStats::default();
        assert_eq!(stats.bytes_ripped, 0);
        assert_eq!(stats.tracks_completed, 0);
        assert_eq!(stats.relay_clients, 0);
        assert_eq!(stats.reconnects, 0);
    }
}
