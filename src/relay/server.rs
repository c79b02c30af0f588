//! Relay listener: port search, accept loop and client handshake.

use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::RelayClient;
use crate::config::RelayConfig;
use crate::event::StatusEvent;
use crate::pipeline::{lock, BufferKind, SharedState};
use crate::session::SessionState;
use crate::source::StreamInfo;
use crate::RelayError;

/// Pause between polls of the non-blocking listener.
const ACCEPT_POLL: Duration = Duration::from_millis(50);

/// Largest request accepted from a relay client.
const MAX_REQUEST_BYTES: usize = 8 * 1024;

/// Sent to clients that can't be served right now.
const UNAVAILABLE: &[u8] = b"HTTP/1.0 503 Service Unavailable\r\n\r\n";

/// Binds the first free port in the configured range.
pub(crate) fn bind(config: &RelayConfig) -> Result<(TcpListener, u16), RelayError> {
    let (first, last) = config.port_range();
    let mut last_error = None;
    for port in first..=last {
        match TcpListener::bind((config.bind_addr.as_str(), port)) {
            Ok(listener) => {
                let port = listener.local_addr()?.port();
                tracing::info!(addr = %config.bind_addr, port, "relay listening");
                return Ok((listener, port));
            }
            Err(e) => {
                tracing::debug!(port, error = %e, "relay port unavailable");
                last_error = Some(e);
            }
        }
    }
    Err(RelayError::Bind {
        first,
        last,
        source: last_error.unwrap_or_else(|| std::io::Error::from(ErrorKind::AddrNotAvailable)),
    })
}

/// Starts the accept thread. It exits once a stop is requested.
///
/// Each accepted client is handshaken on its own short-lived thread, so a
/// client that never sends its request can't hold up the others.
pub(crate) fn spawn_accept(
    listener: TcpListener,
    shared: SharedState,
    config: RelayConfig,
    session: Arc<SessionState>,
) -> std::io::Result<JoinHandle<()>> {
    listener.set_nonblocking(true)?;
    let config = Arc::new(config);
    std::thread::Builder::new()
        .name("stream-rip-relay-accept".into())
        .spawn(move || {
            while !session.stop_requested() {
                match listener.accept() {
                    Ok((socket, peer)) => {
                        if let Err(e) = spawn_handshake(socket, peer, &shared, &config) {
                            tracing::warn!(%peer, error = %e, "failed to spawn relay handshake thread");
                        }
                    }
                    Err(e) if e.kind() == ErrorKind::WouldBlock => std::thread::sleep(ACCEPT_POLL),
                    Err(e) if e.kind() == ErrorKind::Interrupted => {}
                    Err(e) => {
                        tracing::warn!(error = %e, "relay accept failed");
                        std::thread::sleep(ACCEPT_POLL);
                    }
                }
            }
            tracing::debug!("relay accept thread exiting");
        })
}

fn spawn_handshake(
    socket: TcpStream,
    peer: SocketAddr,
    shared: &SharedState,
    config: &Arc<RelayConfig>,
) -> std::io::Result<()> {
    let shared = Arc::clone(shared);
    let config = Arc::clone(config);
    std::thread::Builder::new()
        .name("stream-rip-relay-handshake".into())
        .spawn(move || {
            if let Err(e) = handshake(socket, peer, &shared, &config) {
                tracing::info!(%peer, error = %e, "relay client refused");
            }
        })
        .map(drop)
}

/// Reads the client's request, answers it and registers the client.
fn handshake(
    mut socket: TcpStream,
    peer: SocketAddr,
    shared: &SharedState,
    config: &RelayConfig,
) -> Result<(), RelayError> {
    socket.set_nonblocking(false)?;
    socket.set_read_timeout(Some(config.handshake_timeout()))?;
    socket.set_write_timeout(Some(config.handshake_timeout()))?;

    let request = read_request(&mut socket, config.handshake_timeout())?;
    let wants_metadata = wants_metadata(&request);

    let response = {
        let guard = lock(shared);
        match admission(&guard.ring, guard.clients.len(), config) {
            Ok(ring_kind) => {
                let metaint = (wants_metadata && ring_kind == BufferKind::Framed)
                    .then(|| guard.ring.as_ref().map(|ring| ring.chunk_size()))
                    .flatten();
                Ok((response_header(guard.info.as_ref(), metaint), metaint))
            }
            Err(e) => Err(e),
        }
    };
    let (header, metaint) = match response {
        Ok(response) => response,
        Err(e) => {
            let _ = socket.write_all(UNAVAILABLE);
            return Err(e);
        }
    };
    socket.write_all(header.as_bytes())?;

    let mut guard = lock(shared);
    admission(&guard.ring, guard.clients.len(), config)?;
    let Some(ring) = guard.ring.as_ref() else {
        return Err(RelayError::NotReady);
    };

    let count = ring.count();
    let backlog = config.burst_bytes.min(count);
    let mut offset = count - backlog;
    let mut header_bytes = None;
    if ring.kind() == BufferKind::Ogg {
        let (start, header) = ring
            .ogg_relay_start(offset)
            .ok_or(RelayError::NoOggPagesForRelay)?;
        offset = start;
        header_bytes = header;
    }

    let client = RelayClient::new(peer, socket, offset, metaint, header_bytes)?;
    tracing::info!(%peer, offset, metadata = metaint.is_some(), "relay client connected");
    guard.clients.push(client);
    guard.status.emit(StatusEvent::RelayClientConnected { peer });
    Ok(())
}

fn admission(
    ring: &Option<crate::pipeline::RingBuffer>,
    clients: usize,
    config: &RelayConfig,
) -> Result<BufferKind, RelayError> {
    let ring = ring.as_ref().ok_or(RelayError::NotReady)?;
    if clients >= config.max_connections {
        return Err(RelayError::TooManyClients(config.max_connections));
    }
    Ok(ring.kind())
}

/// Reads request headers until the blank line, the size limit or the
/// timeout. A client that sent something but never finished its headers is
/// still served.
fn read_request(socket: &mut TcpStream, timeout: Duration) -> Result<String, RelayError> {
    let deadline = Instant::now() + timeout;
    let mut request = Vec::new();
    let mut buf = [0u8; 1024];
    while request.len() < MAX_REQUEST_BYTES && Instant::now() < deadline {
        match socket.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                request.extend_from_slice(&buf[..n]);
                if request.windows(4).any(|w| w == b"\r\n\r\n")
                    || request.windows(2).any(|w| w == b"\n\n")
                {
                    break;
                }
            }
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => break,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    if request.is_empty() {
        return Err(RelayError::Handshake("no request received".into()));
    }
    Ok(String::from_utf8_lossy(&request).into_owned())
}

/// `true` when the request carries a non-zero `Icy-MetaData` header.
fn wants_metadata(request: &str) -> bool {
    request.lines().any(|line| {
        let Some((name, value)) = line.split_once(':') else {
            return false;
        };
        name.trim().eq_ignore_ascii_case("icy-metadata")
            && value.trim().parse::<u32>().is_ok_and(|n| n != 0)
    })
}

/// Builds the ICY response mirroring the upstream announcement.
fn response_header(info: Option<&StreamInfo>, metaint: Option<usize>) -> String {
    let mut header = String::from("ICY 200 OK\r\n");
    let (name, genre, homepage, mime, bitrate) = match info {
        Some(info) => (
            info.name.as_str(),
            info.genre.as_str(),
            info.homepage.as_str(),
            info.kind.mime(),
            info.bitrate,
        ),
        None => ("", "", "", "audio/mpeg", None),
    };
    header.push_str(&format!("icy-name:{name}\r\n"));
    header.push_str(&format!("icy-genre:{genre}\r\n"));
    header.push_str(&format!("icy-url:{homepage}\r\n"));
    header.push_str(&format!("content-type:{mime}\r\n"));
    header.push_str("icy-pub:0\r\n");
    if let Some(bitrate) = bitrate {
        header.push_str(&format!("icy-br:{}\r\n", bitrate / 1000));
    }
    if let Some(metaint) = metaint {
        header.push_str(&format!("icy-metaint:{metaint}\r\n"));
    }
    header.push_str("\r\n");
    header
}
