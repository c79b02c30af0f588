//! Rip pipeline components.
//!
//! One producer thread owns the upstream connection and the ripper; the
//! relay threads share the ring buffer with it:
//!
//! ```text
//! upstream → IcyReader → Producer ─┬→ Ring Buffer ← relay send thread
//!                                  └→ Ripper → SinkOps → Router → Sinks
//! ```
//!
//! - **Ring Buffer**: fixed-size chunked buffer holding the split look-back,
//!   the look-ahead and the relay burst
//! - **Ripper**: decides track boundaries and writes tracks out of the buffer
//! - **Router**: fans track output out to every sink with retry logic
//!
//! The ring buffer and relay clients live behind one mutex; sinks are only
//! called after it is released.

mod capture;
mod ring_buffer;
mod ripper;
mod router;
mod state;

pub(crate) use capture::{spawn_producer, Producer};
pub use ring_buffer::BufferKind;
pub(crate) use ring_buffer::RingBuffer;
pub(crate) use ripper::Ripper;
pub(crate) use router::TrackRouter;
pub(crate) use state::{lock, SharedState, StreamState};
