//! One downstream relay client.

use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;

use crate::pipeline::RingBuffer;
use crate::RelayError;

/// Refill rounds per send cycle, so one fast client can't hold the guard.
const MAX_REFILLS: usize = 16;

/// A registered relay client.
///
/// The client never owns ring bytes. Its position is `offset`, the distance
/// from the ring's read cursor to the next byte it hasn't been sent; every
/// eviction shrinks it by the evicted length.
pub(crate) struct RelayClient {
    pub peer: SocketAddr,
    socket: TcpStream,
    offset: usize,
    /// Metadata interval when the client asked for inline metadata.
    metaint: Option<usize>,
    until_meta: usize,
    last_block: Option<Arc<[u8]>>,
    /// Ogg header pages to send before any ring bytes.
    header: Option<Arc<[u8]>>,
    pending: Vec<u8>,
    sent: usize,
}

impl RelayClient {
    /// Wraps an accepted socket, switching it to non-blocking mode.
    pub fn new(
        peer: SocketAddr,
        socket: TcpStream,
        offset: usize,
        metaint: Option<usize>,
        header: Option<Arc<[u8]>>,
    ) -> std::io::Result<Self> {
        socket.set_nonblocking(true)?;
        Ok(Self {
            peer,
            socket,
            offset,
            metaint,
            until_meta: metaint.unwrap_or(0),
            last_block: None,
            header,
            pending: Vec::new(),
            sent: 0,
        })
    }

    /// Distance from the read cursor to the next unsent byte.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Applies an eviction of `n` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::ClientTooSlow`] if bytes the client hasn't been
    /// sent yet were evicted.
    pub fn evicted(&mut self, n: usize) -> Result<(), RelayError> {
        self.offset = self
            .offset
            .checked_sub(n)
            .ok_or(RelayError::ClientTooSlow)?;
        Ok(())
    }

    /// Runs one send cycle for this client.
    ///
    /// A write that would block ends the cycle early; it is retried next
    /// cycle.
    ///
    /// # Errors
    ///
    /// Returns an error when the client closed its side or the socket
    /// failed; the caller drops the client.
    pub fn service(&mut self, ring: &RingBuffer, send_chunk: usize) -> Result<(), RelayError> {
        self.drain_incoming()?;

        for _ in 0..MAX_REFILLS {
            while self.sent < self.pending.len() {
                match self.socket.write(&self.pending[self.sent..]) {
                    Ok(0) => return Err(std::io::Error::from(ErrorKind::WriteZero).into()),
                    Ok(n) => self.sent += n,
                    Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(()),
                    Err(e) if e.kind() == ErrorKind::Interrupted => {}
                    Err(e) => return Err(e.into()),
                }
            }
            self.pending.clear();
            self.sent = 0;

            if !self.refill(ring, send_chunk)? {
                break;
            }
        }
        Ok(())
    }

    /// Discards whatever the client sent after its request.
    fn drain_incoming(&mut self) -> Result<(), RelayError> {
        let mut scratch = [0u8; 512];
        loop {
            match self.socket.read(&mut scratch) {
                Ok(0) => {
                    return Err(std::io::Error::new(
                        ErrorKind::UnexpectedEof,
                        "client closed the connection",
                    )
                    .into())
                }
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Queues the next run of bytes. Returns `false` when there is nothing
    /// to send.
    fn refill(&mut self, ring: &RingBuffer, send_chunk: usize) -> Result<bool, RelayError> {
        if let Some(header) = self.header.take() {
            self.pending.extend_from_slice(&header);
            return Ok(true);
        }

        let available = ring.count().saturating_sub(self.offset);
        if available == 0 {
            return Ok(false);
        }
        let mut n = available.min(send_chunk.max(1));
        if self.metaint.is_some() {
            n = n.min(self.until_meta);
        }

        let start = self.pending.len();
        self.pending.resize(start + n, 0);
        ring.peek_into(self.offset, &mut self.pending[start..])
            .map_err(|_| RelayError::ClientTooSlow)?;
        self.offset += n;

        if let Some(metaint) = self.metaint {
            self.until_meta -= n;
            if self.until_meta == 0 {
                self.until_meta = metaint;
                let block = ring.metadata_at(self.offset - 1);
                self.push_metadata(block);
            }
        }
        Ok(true)
    }

    /// Appends a metadata block, or a single zero byte when the client
    /// already has this one.
    fn push_metadata(&mut self, block: Option<Arc<[u8]>>) {
        match block {
            Some(block) if !self.already_sent(&block) => {
                self.pending.extend_from_slice(&block);
                self.last_block = Some(block);
            }
            _ => self.pending.push(0),
        }
    }

    fn already_sent(&self, block: &Arc<[u8]>) -> bool {
        self.last_block
            .as_ref()
            .is_some_and(|last| Arc::ptr_eq(last, block) || last[..] == block[..])
    }
}

impl std::fmt::Debug for RelayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayClient")
            .field("peer", &self.peer)
            .field("offset", &self.offset)
            .field("metaint", &self.metaint)
            .field("pending", &(self.pending.len() - self.sent))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::metadata::{Codeset, TrackInfo};
    use crate::pipeline::BufferKind;
    use std::net::TcpListener;
    use std::time::Duration;

    /// A connected socket pair: (server side, client side).
    pub(crate) fn socket_pair() -> (TcpStream, TcpStream, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let remote = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (local, peer) = listener.accept().unwrap();
        remote
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        (local, remote, peer)
    }

    fn read_exactly(socket: &mut TcpStream, n: usize) -> Vec<u8> {
        let mut out = vec![0u8; n];
        socket.read_exact(&mut out).unwrap();
        out
    }

    #[test]
    fn test_serves_from_offset() {
        let mut ring = RingBuffer::new(16, 8, BufferKind::Framed);
        let data: Vec<u8> = (0..64).collect();
        ring.insert(&data, None).unwrap();

        let (local, mut remote, peer) = socket_pair();
        let mut client = RelayClient::new(peer, local, 40, None, None).unwrap();
        client.service(&ring, 8).unwrap();

        assert_eq!(read_exactly(&mut remote, 24), &data[40..]);
        assert_eq!(client.offset(), 64);
    }

    #[test]
    fn test_injects_metadata_every_metaint() {
        let mut ring = RingBuffer::new(16, 8, BufferKind::Framed);
        let info = TrackInfo::from_fields("A", "B", "", Codeset::Utf8);
        ring.insert(&[7u8; 48], Some(&info)).unwrap();

        let (local, mut remote, peer) = socket_pair();
        let mut client = RelayClient::new(peer, local, 0, Some(16), None).unwrap();
        client.service(&ring, 64).unwrap();

        assert_eq!(read_exactly(&mut remote, 16), vec![7u8; 16]);
        let block = &info.icy_block;
        assert_eq!(read_exactly(&mut remote, block.len()), block.to_vec());
        assert_eq!(read_exactly(&mut remote, 16), vec![7u8; 16]);
        // Same title again: an empty metadata frame.
        assert_eq!(read_exactly(&mut remote, 1), vec![0]);
        assert_eq!(read_exactly(&mut remote, 16), vec![7u8; 16]);
    }

    #[test]
    fn test_header_bytes_come_first() {
        let mut ring = RingBuffer::new(16, 4, BufferKind::Framed);
        ring.insert(b"live", None).unwrap();

        let header: Arc<[u8]> = Arc::from(&b"HEAD"[..]);
        let (local, mut remote, peer) = socket_pair();
        let mut client = RelayClient::new(peer, local, 0, None, Some(header)).unwrap();
        client.service(&ring, 64).unwrap();

        assert_eq!(read_exactly(&mut remote, 8), b"HEADlive");
    }

    #[test]
    fn test_eviction_past_cursor_is_too_slow() {
        let (local, _remote, peer) = socket_pair();
        let mut client = RelayClient::new(peer, local, 10, None, None).unwrap();
        client.evicted(4).unwrap();
        assert_eq!(client.offset(), 6);
        assert!(matches!(client.evicted(7), Err(RelayError::ClientTooSlow)));
    }

    #[test]
    fn test_closed_client_is_an_error() {
        let ring = RingBuffer::new(16, 4, BufferKind::Framed);
        let (local, remote, peer) = socket_pair();
        let mut client = RelayClient::new(peer, local, 0, None, None).unwrap();
        drop(remote);
        std::thread::sleep(Duration::from_millis(50));
        assert!(client.service(&ring, 64).is_err());
    }
}
