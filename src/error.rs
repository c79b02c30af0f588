//! Error types for stream-rip.
//!
//! Errors follow the layers of the engine:
//! - **Connection** ([`ConnectionError`]): network failures, always recoverable
//! - **Protocol** ([`ProtocolError`]): the server answered something we can't use
//! - **Buffer** ([`BufferError`]): "not enough data yet" or an internal invariant
//! - **Relay** ([`RelayError`]): affects exactly one downstream client
//! - **Metadata** ([`MetadataError`]): the interval's metadata is discarded
//! - **Sink** ([`SinkError`]): file output failures, reported to the status callback
//!
//! [`RipError`] wraps all of them and decides whether the session may reconnect.

use std::path::PathBuf;

/// Top-level error for a ripping session.
///
/// Returned from [`RipBuilder::start()`](crate::RipBuilder::start) and carried
/// (as text) inside [`StatusEvent::Error`](crate::StatusEvent::Error).
#[derive(Debug, thiserror::Error)]
pub enum RipError {
    /// The configuration is inconsistent or incomplete.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Network-level failure talking to the upstream server.
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// The upstream server's response could not be used.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Ring buffer operation failed.
    #[error(transparent)]
    Buffer(#[from] BufferError),

    /// Relay server failure (listener level, never per client).
    #[error(transparent)]
    Relay(#[from] RelayError),

    /// Metadata rules could not be loaded.
    #[error(transparent)]
    Metadata(#[from] MetadataError),

    /// Track output failed.
    #[error(transparent)]
    Sink(#[from] SinkError),

    /// The server announced inline metadata but never delivered usable track info.
    #[error("no track info received from stream")]
    NoTrackInfo,

    /// The session was already stopped.
    #[error("session already stopped")]
    AlreadyStopped,

    /// A session thread could not be spawned or joined.
    #[error("thread error: {0}")]
    Thread(String),
}

impl RipError {
    /// Returns `true` if the orchestrator may tear down and reconnect.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::NoTrackInfo)
    }
}

/// Network failures. Every variant is recoverable.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// Host name resolution failed.
    #[error("failed to resolve {host}: {source}")]
    Resolve {
        /// Host that failed to resolve.
        host: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// TCP connect failed.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        /// Address that refused or timed out.
        addr: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Sending the request failed.
    #[error("send failed: {0}")]
    Send(#[source] std::io::Error),

    /// Receiving stream data failed.
    #[error("receive failed: {0}")]
    Recv(#[source] std::io::Error),

    /// No data arrived within the receive timeout.
    #[error("receive timed out")]
    Timeout,

    /// The server closed the connection.
    #[error("connection closed by server")]
    Closed,
}

impl ConnectionError {
    /// Maps a receive error, folding timeouts into [`ConnectionError::Timeout`].
    pub fn from_recv(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => Self::Timeout,
            std::io::ErrorKind::UnexpectedEof => Self::Closed,
            _ => Self::Recv(err),
        }
    }
}

/// The server's response was unusable.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// HTTP/ICY 400.
    #[error("server rejected request (400 bad request)")]
    BadRequest,

    /// HTTP/ICY 401.
    #[error("server requires authentication (401)")]
    Unauthorized,

    /// HTTP/ICY 403.
    #[error("access forbidden (403)")]
    Forbidden,

    /// HTTP/ICY 404.
    #[error("stream not found (404)")]
    NotFound,

    /// HTTP 407.
    #[error("proxy requires authentication (407)")]
    ProxyAuthRequired,

    /// HTTP 502.
    #[error("bad gateway (502)")]
    BadGateway,

    /// Any other status code >= 400.
    #[error("unexpected status code {0}")]
    BadStatus(u16),

    /// The response did not start with an ICY or HTTP status line.
    #[error("missing status line in response")]
    MissingStatusLine,

    /// A header line or value could not be parsed.
    #[error("malformed header: {0}")]
    MalformedHeader(String),

    /// The response headers exceeded the size limit.
    #[error("response header exceeds {limit} bytes")]
    HeaderTooLarge {
        /// Header size limit in bytes.
        limit: usize,
    },

    /// The URL is not an `http://` URL with a host.
    #[error("unsupported url: {0}")]
    UnsupportedUrl(String),

    /// A playlist body had no usable entries.
    #[error("invalid playlist: {0}")]
    InvalidPlaylist(String),

    /// Too many redirects or playlist hops.
    #[error("gave up after {0} redirects or playlist hops")]
    TooManyHops(u32),
}

impl ProtocolError {
    /// Maps a status code >= 400 to its named condition.
    pub fn from_status(code: u16) -> Self {
        match code {
            400 => Self::BadRequest,
            401 => Self::Unauthorized,
            403 => Self::Forbidden,
            404 => Self::NotFound,
            407 => Self::ProxyAuthRequired,
            502 => Self::BadGateway,
            other => Self::BadStatus(other),
        }
    }
}

/// Ring buffer result codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BufferError {
    /// Not enough free space for an insert.
    #[error("buffer full: requested {requested} bytes, {free} free")]
    Full {
        /// Bytes the caller tried to insert.
        requested: usize,
        /// Bytes actually free.
        free: usize,
    },

    /// Not enough buffered data (or evictable Ogg pages).
    #[error("buffer empty: requested {requested} bytes, {available} available")]
    Empty {
        /// Bytes the caller asked for.
        requested: usize,
        /// Bytes actually available.
        available: usize,
    },
}

/// Relay failures. Per-client variants only ever disconnect that client.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// No port in the configured range could be bound.
    #[error("could not bind relay port in {first}..={last}")]
    Bind {
        /// First port tried.
        first: u16,
        /// Last port tried.
        last: u16,
        /// Error from the last attempt.
        #[source]
        source: std::io::Error,
    },

    /// No begin-of-stream or header-backed Ogg page to start a new client from.
    #[error("no ogg page boundary available for relay client")]
    NoOggPagesForRelay,

    /// The client fell behind the evicted region of the buffer.
    #[error("relay client too slow")]
    ClientTooSlow,

    /// The client's request could not be read.
    #[error("relay handshake failed: {0}")]
    Handshake(String),

    /// The stream hasn't produced any data yet.
    #[error("stream not ready for relay")]
    NotReady,

    /// The connection limit was reached.
    #[error("too many relay clients (max {0})")]
    TooManyClients(usize),

    /// The session is stopping.
    #[error("relay shutting down")]
    Shutdown,

    /// Socket error while serving a client.
    #[error("relay i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Metadata parsing failures.
#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    /// An inline metadata frame had no usable `StreamTitle`.
    #[error("invalid metadata frame: {0}")]
    InvalidFrame(String),

    /// A metadata rule line could not be parsed.
    #[error("invalid metadata rule on line {line}: {reason}")]
    InvalidRule {
        /// 1-based line number in the rules source.
        line: usize,
        /// What was wrong with it.
        reason: String,
    },

    /// The rules file could not be read.
    #[error("cannot read rules file {path}: {source}")]
    RulesFile {
        /// Path of the rules file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Failure decoding a window of audio into a volume curve.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// No decodable frame in the window.
    #[error("no decodable frames in window")]
    NoFrames,

    /// The decoder backend failed.
    #[error("decoder error: {0}")]
    Backend(String),
}

/// Errors that can occur within a [`TrackSink`](crate::TrackSink) implementation.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// A write operation failed.
    #[error("write failed: {reason}")]
    WriteFailed {
        /// Description of what went wrong.
        reason: String,
    },

    /// File I/O error.
    #[error("file error: {path}: {source}")]
    FileError {
        /// Path to the file.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Bytes were written before a track was started.
    #[error("no track started")]
    NotStarted,

    /// The receiving end of a channel sink was dropped.
    #[error("channel closed")]
    ChannelClosed,

    /// Custom error for user-implemented sinks.
    #[error("{0}")]
    Custom(String),
}

impl SinkError {
    /// Creates a custom sink error with the given message.
    pub fn custom(msg: impl Into<String>) -> Self {
        Self::Custom(msg.into())
    }

    /// Creates a write failed error with the given reason.
    pub fn write_failed(reason: impl Into<String>) -> Self {
        Self::WriteFailed {
            reason: reason.into(),
        }
    }

    /// Creates a file error for the given path.
    pub fn file_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileError {
            path: path.into(),
            source,
        }
    }
}
