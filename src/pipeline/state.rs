//! State shared between the producer and the relay threads.
//!
//! The ring buffer and the relay client list live behind one mutex. Every
//! operation that moves the ring's read cursor goes through [`StreamState`]
//! so the clients' offsets are updated, and too-slow clients dropped, in
//! the same critical section.

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::event::{StatusEvent, StatusSender};
use crate::metadata::TrackInfo;
use crate::pipeline::{BufferKind, RingBuffer};
use crate::relay::RelayClient;
use crate::source::StreamInfo;
use crate::{BufferError, RelayError};

/// The shared guard.
pub(crate) type SharedState = Arc<Mutex<StreamState>>;

/// Locks the shared state. `parking_lot` locks don't poison, so a panicked
/// relay thread can't wedge the producer.
pub(crate) fn lock(state: &SharedState) -> MutexGuard<'_, StreamState> {
    state.lock()
}

pub(crate) struct StreamState {
    /// `None` until the first connection sized the buffer.
    pub ring: Option<RingBuffer>,
    pub clients: Vec<RelayClient>,
    /// Announcement mirrored to relay clients.
    pub info: Option<StreamInfo>,
    pub status: StatusSender,
}

impl StreamState {
    pub fn new(status: StatusSender) -> Self {
        Self {
            ring: None,
            clients: Vec::new(),
            info: None,
            status,
        }
    }

    pub fn shared(status: StatusSender) -> SharedState {
        Arc::new(Mutex::new(Self::new(status)))
    }

    /// Installs a ring of the given shape, keeping the current one (and the
    /// relay clients reading it) when the shape is unchanged.
    pub fn prepare_ring(&mut self, chunk_size: usize, num_chunks: usize, kind: BufferKind) {
        if let Some(ring) = &self.ring {
            if ring.chunk_size() == chunk_size && ring.num_chunks() == num_chunks && ring.kind() == kind {
                tracing::debug!(chunk_size, num_chunks, "reusing ring buffer");
                return;
            }
        }
        tracing::debug!(chunk_size, num_chunks, ?kind, "allocating ring buffer");
        for client in self.clients.drain(..) {
            self.status.emit(StatusEvent::RelayClientDisconnected {
                peer: client.peer,
                reason: "stream format changed".into(),
            });
        }
        self.ring = Some(RingBuffer::new(chunk_size, num_chunks, kind));
    }

    /// Inserts framed content.
    pub fn insert(&mut self, bytes: &[u8], track: Option<&TrackInfo>) -> Result<usize, BufferError> {
        let ring = self.ring.as_mut().ok_or(BufferError::Full {
            requested: bytes.len(),
            free: 0,
        })?;
        ring.insert(bytes, track)
    }

    /// Inserts Ogg content, first evicting whole pages until it fits.
    pub fn insert_ogg(&mut self, bytes: &[u8], track: Option<&TrackInfo>) -> Result<usize, BufferError> {
        let full = BufferError::Full {
            requested: bytes.len(),
            free: 0,
        };
        let evicted = self
            .ring
            .as_mut()
            .ok_or(full)?
            .advance_to_free_ogg(bytes.len())?;
        self.evicted(evicted);
        self.ring.as_mut().ok_or(full)?.insert(bytes, track)
    }

    /// Removes and returns the oldest `n` bytes.
    pub fn extract(&mut self, n: usize) -> Result<Vec<u8>, BufferError> {
        let ring = self.ring.as_mut().ok_or(BufferError::Empty {
            requested: n,
            available: 0,
        })?;
        let bytes = ring.extract(n)?;
        self.evicted(n);
        Ok(bytes)
    }

    /// Discards the oldest `n` bytes.
    pub fn fast_forward(&mut self, n: usize) -> Result<(), BufferError> {
        let ring = self.ring.as_mut().ok_or(BufferError::Empty {
            requested: n,
            available: 0,
        })?;
        ring.fast_forward(n)?;
        self.evicted(n);
        Ok(())
    }

    /// Empties the ring after a disconnect and forgets partial pages.
    ///
    /// Relay clients that were caught up stay registered and continue with
    /// the next connection's bytes.
    pub fn restart_stream(&mut self) -> Result<(), BufferError> {
        let count = self.ring.as_ref().map_or(0, RingBuffer::count);
        if count > 0 {
            self.fast_forward(count)?;
        }
        if let Some(ring) = self.ring.as_mut() {
            ring.reset_stream();
        }
        Ok(())
    }

    /// Drops a client, reporting why.
    pub fn disconnect(&mut self, index: usize, reason: &RelayError) {
        let client = self.clients.remove(index);
        tracing::info!(peer = %client.peer, %reason, "relay client disconnected");
        self.status.emit(StatusEvent::RelayClientDisconnected {
            peer: client.peer,
            reason: reason.to_string(),
        });
    }

    /// Shifts every client by an eviction of `n` bytes, dropping those
    /// whose unsent bytes were evicted.
    fn evicted(&mut self, n: usize) {
        if n == 0 {
            return;
        }
        let mut i = 0;
        while i < self.clients.len() {
            match self.clients[i].evicted(n) {
                Ok(()) => i += 1,
                Err(e) => self.disconnect(i, &e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::client::tests::socket_pair;

    fn state_with_ring(chunk: usize, chunks: usize, kind: BufferKind) -> StreamState {
        let mut state = StreamState::new(StatusSender::disabled());
        state.prepare_ring(chunk, chunks, kind);
        state
    }

    fn add_client(state: &mut StreamState, offset: usize) {
        let (local, _remote, peer) = socket_pair();
        let client = RelayClient::new(peer, local, offset, None, None).unwrap();
        state.clients.push(client);
    }

    #[test]
    fn test_extract_shifts_client_offsets() {
        let mut state = state_with_ring(16, 4, BufferKind::Framed);
        state.insert(&[1u8; 40], None).unwrap();
        add_client(&mut state, 30);
        add_client(&mut state, 12);

        state.extract(10).unwrap();
        assert_eq!(state.clients.len(), 2);
        assert_eq!(state.clients[0].offset(), 20);
        assert_eq!(state.clients[1].offset(), 2);

        // The second client falls behind and is dropped; the first keeps its place.
        state.fast_forward(5).unwrap();
        assert_eq!(state.clients.len(), 1);
        assert_eq!(state.clients[0].offset(), 15);
    }

    #[test]
    fn test_ogg_insert_evicts_pages_and_clients() {
        use crate::source::mock::ogg_page;

        let page = ogg_page(0x00, 1, &[vec![0xAA; 30]]);
        let mut state = state_with_ring(page.len(), 3, BufferKind::Ogg);
        for _ in 0..3 {
            state.insert_ogg(&page, None).unwrap();
        }
        assert_eq!(state.ring.as_ref().unwrap().free_space(), 0);
        add_client(&mut state, 0);
        add_client(&mut state, page.len() * 2);

        state.insert_ogg(&page, None).unwrap();
        let ring = state.ring.as_ref().unwrap();
        assert_eq!(ring.count(), page.len() * 3);
        assert_eq!(ring.pages().len(), 3);
        assert_eq!(state.clients.len(), 1);
        assert_eq!(state.clients[0].offset(), page.len());
    }

    #[test]
    fn test_prepare_ring_reuses_same_shape() {
        let mut state = state_with_ring(16, 4, BufferKind::Framed);
        state.insert(&[1u8; 20], None).unwrap();
        add_client(&mut state, 20);

        state.prepare_ring(16, 4, BufferKind::Framed);
        assert_eq!(state.ring.as_ref().unwrap().count(), 20);
        assert_eq!(state.clients.len(), 1);

        state.prepare_ring(32, 4, BufferKind::Framed);
        assert_eq!(state.ring.as_ref().unwrap().count(), 0);
        assert!(state.clients.is_empty());
    }

    #[test]
    fn test_restart_keeps_caught_up_clients() {
        let mut state = state_with_ring(16, 4, BufferKind::Framed);
        state.insert(&[1u8; 20], None).unwrap();
        add_client(&mut state, 20);
        add_client(&mut state, 5);

        state.restart_stream().unwrap();
        assert_eq!(state.ring.as_ref().unwrap().count(), 0);
        assert_eq!(state.clients.len(), 1);
        assert_eq!(state.clients[0].offset(), 0);
    }

    #[test]
    fn test_without_ring_operations_fail() {
        let mut state = StreamState::new(StatusSender::disabled());
        assert!(state.insert(b"abc", None).is_err());
        assert!(state.extract(1).is_err());
        assert!(state.restart_stream().is_ok());
    }
}
