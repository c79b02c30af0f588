//! The relay send loop.

use std::sync::Arc;
use std::thread::JoinHandle;

use crate::config::RelayConfig;
use crate::pipeline::{lock, SharedState, StreamState};
use crate::session::SessionState;
use crate::RelayError;

/// Starts the send thread. On stop it drops every client.
pub(crate) fn spawn_sender(
    shared: SharedState,
    config: RelayConfig,
    session: Arc<SessionState>,
) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("stream-rip-relay-send".into())
        .spawn(move || {
            let interval = config.send_interval();
            while !session.stop_requested() {
                send_cycle(&mut lock(&shared), config.send_chunk_bytes);
                std::thread::sleep(interval);
            }

            let mut state = lock(&shared);
            while !state.clients.is_empty() {
                state.disconnect(0, &RelayError::Shutdown);
            }
            tracing::debug!("relay send thread exiting");
        })
}

/// Serves every client once, dropping the ones that failed.
pub(crate) fn send_cycle(state: &mut StreamState, send_chunk: usize) {
    let mut failed = Vec::new();
    if let Some(ring) = state.ring.as_ref() {
        for (i, client) in state.clients.iter_mut().enumerate() {
            if let Err(e) = client.service(ring, send_chunk) {
                failed.push((i, e));
            }
        }
    }
    for (i, e) in failed.into_iter().rev() {
        state.disconnect(i, &e);
    }
}
