//! Upstream connection: proxying, redirects and playlist hops.

use std::io::{Chain, Cursor, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};

use url::Url;

use super::http::{self, ResponseHeader, StreamInfo};
use super::playlist;
use crate::config::RipConfig;
use crate::{ConnectionError, ProtocolError, RipError};

/// Largest playlist body read.
const MAX_PLAYLIST_BYTES: u64 = 64 * 1024;

/// Body reader: bytes that arrived with the header, then the socket.
pub type BodyReader = Chain<Cursor<Vec<u8>>, TcpStream>;

/// An open upstream stream, positioned at the first body byte.
pub struct Connection {
    /// What the server announced.
    pub info: StreamInfo,
    reader: BodyReader,
}

impl Connection {
    /// Another handle to the socket, used to unblock a pending receive by
    /// shutting it down.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket handle can't be duplicated.
    pub fn shutdown_handle(&self) -> std::io::Result<TcpStream> {
        self.reader.get_ref().1.try_clone()
    }

    /// Consumes the connection, returning the body reader.
    pub fn into_reader(self) -> BodyReader {
        self.reader
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").field("info", &self.info).finish_non_exhaustive()
    }
}

/// Opens `url`, following redirects and playlists.
///
/// Every redirect and every playlist entry tried costs one hop; more than
/// `config.max_hops` fails with [`ProtocolError::TooManyHops`].
///
/// # Errors
///
/// Returns [`ConnectionError`]s for network failures and
/// [`ProtocolError`]s for unusable responses.
pub fn connect(url: &Url, config: &RipConfig) -> Result<Connection, RipError> {
    let proxy = config
        .proxy
        .as_deref()
        .map(http::parse_url)
        .transpose()?;
    let mut hops = 0;
    open(url, proxy.as_ref(), config, &mut hops)
}

fn open(
    url: &Url,
    proxy: Option<&Url>,
    config: &RipConfig,
    hops: &mut u32,
) -> Result<Connection, RipError> {
    let mut target = url.clone();
    loop {
        let (header, leftover, socket) = request(&target, proxy, config)?;

        if header.status >= 400 {
            return Err(ProtocolError::from_status(header.status).into());
        }
        if header.is_redirect() {
            let location = header
                .get("location")
                .ok_or(ProtocolError::BadStatus(header.status))?;
            let next = target
                .join(location)
                .map_err(|e| ProtocolError::MalformedHeader(format!("location {location}: {e}")))?;
            take_hop(hops, config.max_hops)?;
            tracing::debug!(from = %http::redact(&target), to = %http::redact(&next), "following redirect");
            target = next;
            continue;
        }

        let kind = header.content_kind(&target);
        if kind.is_playlist() {
            let body = read_playlist(leftover, socket)?;
            let entries = playlist::parse(kind, &body, &target)?;
            return open_entries(&entries, proxy, config, hops);
        }

        let info = StreamInfo::from_response(&header, &target)?;
        tracing::info!(
            url = %info.url,
            server = ?info.server,
            kind = ?info.kind,
            metaint = ?info.metaint,
            bitrate = ?info.bitrate,
            "connected"
        );
        return Ok(Connection {
            info,
            reader: Cursor::new(leftover).chain(socket),
        });
    }
}

fn open_entries(
    entries: &[Url],
    proxy: Option<&Url>,
    config: &RipConfig,
    hops: &mut u32,
) -> Result<Connection, RipError> {
    let mut last_error = None;
    for entry in entries {
        take_hop(hops, config.max_hops)?;
        match open(entry, proxy, config, hops) {
            Ok(connection) => return Ok(connection),
            Err(RipError::Protocol(ProtocolError::TooManyHops(max))) => {
                return Err(ProtocolError::TooManyHops(max).into());
            }
            Err(e) => {
                tracing::warn!(entry = %http::redact(entry), error = %e, "playlist entry failed");
                last_error = Some(e);
            }
        }
    }
    Err(last_error.unwrap_or_else(|| ProtocolError::InvalidPlaylist("no entries".into()).into()))
}

fn take_hop(hops: &mut u32, max: u32) -> Result<(), ProtocolError> {
    *hops += 1;
    if *hops > max {
        return Err(ProtocolError::TooManyHops(max));
    }
    Ok(())
}

/// Connects, sends the request and reads the response header.
fn request(
    url: &Url,
    proxy: Option<&Url>,
    config: &RipConfig,
) -> Result<(ResponseHeader, Vec<u8>, TcpStream), RipError> {
    let endpoint = proxy.unwrap_or(url);
    let mut socket = open_socket(endpoint, config)?;

    let request = http::build_request(url, proxy, &config.user_agent);
    socket
        .write_all(request.as_bytes())
        .map_err(ConnectionError::Send)?;

    let (header, leftover) = http::read_response_header(&mut socket)?;
    tracing::debug!(status = header.status, fields = header.fields.len(), "response header");
    Ok((header, leftover, socket))
}

fn open_socket(url: &Url, config: &RipConfig) -> Result<TcpStream, ConnectionError> {
    let host = url.host_str().unwrap_or_default().to_string();
    let port = url.port_or_known_default().unwrap_or(80);
    let addrs: Vec<_> = (host.as_str(), port)
        .to_socket_addrs()
        .map_err(|source| ConnectionError::Resolve {
            host: host.clone(),
            source,
        })?
        .collect();

    let mut last_error = None;
    for addr in &addrs {
        match TcpStream::connect_timeout(addr, config.connect_timeout()) {
            Ok(socket) => {
                let timeout = Some(config.recv_timeout()).filter(|t| !t.is_zero());
                socket
                    .set_read_timeout(timeout)
                    .and_then(|()| socket.set_write_timeout(timeout))
                    .map_err(|source| ConnectionError::Connect {
                        addr: addr.to_string(),
                        source,
                    })?;
                return Ok(socket);
            }
            Err(e) => last_error = Some((addr.to_string(), e)),
        }
    }

    let (addr, source) = last_error.unwrap_or_else(|| {
        (
            format!("{host}:{port}"),
            std::io::Error::new(std::io::ErrorKind::NotFound, "no addresses"),
        )
    });
    Err(ConnectionError::Connect { addr, source })
}

fn read_playlist(leftover: Vec<u8>, socket: TcpStream) -> Result<String, RipError> {
    let mut body = Vec::new();
    Cursor::new(leftover)
        .chain(socket)
        .take(MAX_PLAYLIST_BYTES)
        .read_to_end(&mut body)
        .map_err(ConnectionError::from_recv)?;
    Ok(String::from_utf8_lossy(&body).into_owned())
}

/// Closes `socket` in both directions, ignoring errors.
pub fn force_close(socket: &TcpStream) {
    let _ = socket.shutdown(Shutdown::Both);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::ContentKind;
    use crate::source::mock::{icy_response, MockServer};

    fn config() -> RipConfig {
        RipConfig {
            connect_timeout_ms: 2000,
            recv_timeout_ms: 2000,
            ..RipConfig::default()
        }
    }

    #[test]
    fn test_connect_reads_announcement_and_body() {
        let server = MockServer::icy(
            &[("icy-name", "Test FM"), ("icy-metaint", "8192"), ("content-type", "audio/mpeg")],
            b"first-bytes".to_vec(),
        )
        .unwrap();
        let url = Url::parse(&server.url("/live")).unwrap();
        let connection = connect(&url, &config()).unwrap();
        assert_eq!(connection.info.name, "Test FM");
        assert_eq!(connection.info.metaint, Some(8192));
        assert_eq!(connection.info.kind, ContentKind::Mp3);

        let mut body = Vec::new();
        connection.into_reader().read_to_end(&mut body).unwrap();
        assert_eq!(body, b"first-bytes");

        let requests = server.requests();
        assert!(requests[0].starts_with("GET /live HTTP/1.0\r\n"));
        assert!(requests[0].contains("Icy-MetaData:1"));
    }

    #[test]
    fn test_error_status_maps_to_named_error() {
        let server =
            MockServer::start(vec![b"HTTP/1.0 404 Not Found\r\n\r\n".to_vec()]).unwrap();
        let url = Url::parse(&server.url("/missing")).unwrap();
        let result = connect(&url, &config());
        assert!(matches!(
            result,
            Err(RipError::Protocol(ProtocolError::NotFound))
        ));
    }

    #[test]
    fn test_follows_playlist_entry() {
        let stream = MockServer::icy(&[("icy-name", "Inner")], Vec::new()).unwrap();
        let body = format!("[playlist]\nFile1={}\nNumberOfEntries=1\n", stream.url("/s"));
        let mut response = b"HTTP/1.0 200 OK\r\nContent-Type: audio/x-scpls\r\n\r\n".to_vec();
        response.extend_from_slice(body.as_bytes());
        let list = MockServer::start(vec![response]).unwrap();

        let url = Url::parse(&list.url("/listen.pls")).unwrap();
        let connection = connect(&url, &config()).unwrap();
        assert_eq!(connection.info.name, "Inner");
        assert!(connection.info.url.ends_with("/s"));
    }

    #[test]
    fn test_redirect_loop_runs_out_of_hops() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let served = std::thread::spawn(move || {
            let mut served = 0;
            while let Ok((mut socket, _)) = listener.accept() {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf);
                let redirect =
                    format!("HTTP/1.0 302 Found\r\nLocation: http://{addr}/again\r\n\r\n");
                let _ = socket.write_all(redirect.as_bytes());
                served += 1;
                if served == 4 {
                    break;
                }
            }
            served
        });

        let cfg = RipConfig {
            max_hops: 3,
            ..config()
        };
        let url = Url::parse(&format!("http://{addr}/start")).unwrap();
        let result = connect(&url, &cfg);
        assert!(matches!(
            result,
            Err(RipError::Protocol(ProtocolError::TooManyHops(3)))
        ));
        assert_eq!(served.join().unwrap(), 4);
    }

    #[test]
    fn test_leftover_header_bytes_come_first() {
        let response = icy_response(&[("icy-br", "128")], b"abcdef");
        let server = MockServer::start(vec![response]).unwrap();
        let url = Url::parse(&server.url("/")).unwrap();
        let connection = connect(&url, &config()).unwrap();
        assert_eq!(connection.info.bitrate, Some(128_000));
        let mut reader = connection.into_reader();
        let mut first = [0u8; 3];
        reader.read_exact(&mut first).unwrap();
        assert_eq!(&first, b"abc");
    }
}
