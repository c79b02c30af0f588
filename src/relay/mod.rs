//! Relay server re-serving the captured stream to local listeners.
//!
//! Two threads share the producer's [`StreamState`](crate::pipeline::StreamState):
//!
//! ```text
//! accept thread → handshake → StreamState.clients ← send thread (every send_interval)
//! ```
//!
//! Clients read straight out of the ring buffer; a client whose unsent bytes
//! get evicted is dropped.

pub(crate) mod client;
mod send;
mod server;

use std::sync::Arc;
use std::thread::JoinHandle;

pub(crate) use client::RelayClient;

use crate::config::RelayConfig;
use crate::pipeline::SharedState;
use crate::session::SessionState;
use crate::RipError;

/// A bound relay and its threads.
pub(crate) struct RelayServer {
    pub port: u16,
    pub threads: Vec<JoinHandle<()>>,
}

/// Binds the listener and starts the accept and send threads.
pub(crate) fn start(
    config: &RelayConfig,
    shared: &SharedState,
    session: &Arc<SessionState>,
) -> Result<RelayServer, RipError> {
    let (listener, port) = server::bind(config)?;
    let accept = server::spawn_accept(
        listener,
        Arc::clone(shared),
        config.clone(),
        Arc::clone(session),
    )
    .map_err(|e| RipError::Thread(format!("failed to spawn relay accept thread: {e}")))?;
    let send = send::spawn_sender(Arc::clone(shared), config.clone(), Arc::clone(session))
        .map_err(|e| RipError::Thread(format!("failed to spawn relay send thread: {e}")))?;
    Ok(RelayServer {
        port,
        threads: vec![accept, send],
    })
}
