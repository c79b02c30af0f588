//! # stream-rip
//!
//! **Note:** This crate is under active development. The API may change before 1.0.
//!
//! Shoutcast/Icecast stream ripping with track splitting and a local relay.
//!
//! `stream-rip` connects to an ICY/HTTP audio stream, follows its inline
//! metadata, and cuts the stream into one tagged file per song, placing the
//! cut in the quietest moment around each title change. The live stream is
//! re-served to local listeners while it is being ripped.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use stream_rip::{ChannelSink, RipConfig, StreamRip, TrackEvent};
//! use tokio::sync::mpsc;
//!
//! let (tx, mut rx) = mpsc::channel::<TrackEvent>(64);
//!
//! let session = StreamRip::builder()
//!     .url("http://radio.example.com:8000/stream")
//!     .config(RipConfig::default())
//!     .output_dir("rips")                     // one file per song
//!     .add_sink(ChannelSink::new(tx))         // and the bytes, as they are cut
//!     .on_status(|e| tracing::info!(?e, "status"))
//!     .start()?;
//!
//! while let Some(event) = rx.blocking_recv() {
//!     if let TrackEvent::Finished { track, .. } = event {
//!         println!("ripped {}", track.file_name());
//!     }
//! }
//!
//! session.stop()?;
//! # Ok::<(), stream_rip::RipError>(())
//! ```
//!
//! ## Architecture
//!
//! - **Producer thread**: receives the stream, strips the inline metadata
//!   and feeds the ring buffer; the ripper decides track boundaries
//! - **Relay threads**: accept listeners and send from the same ring buffer
//! - **Status dispatcher**: delivers [`StatusEvent`]s to the callback in order
//!
//! Sinks are called from the producer thread outside the buffer lock, so a
//! slow sink delays ripping but never the relay.

#![warn(missing_docs)]
// Byte counts, bitrates and durations are converted between integer widths
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_lossless
)]
// unwrap/expect allowed in tests only
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]
// These doc lints are too strict for internal implementation details
#![allow(clippy::missing_panics_doc, clippy::missing_errors_doc)]

mod builder;
mod chunk;
mod config;
mod error;
mod event;
pub mod format;
pub mod metadata;
mod pipeline;
mod relay;
mod session;
mod sink;
pub mod source;
pub mod split;

pub use builder::{RipBuilder, StreamRip};
pub use chunk::{Track, TrackEvent};
pub use config::{OverwritePolicy, RelayConfig, RipConfig, RulesSource, SplitConfig};
pub use error::{
    BufferError, ConnectionError, DecodeError, MetadataError, ProtocolError, RelayError, RipError,
    SinkError,
};
pub use event::{status_callback, StatusCallback, StatusEvent, StopReason};
pub use format::ContentKind;
pub use metadata::{Codeset, TrackInfo};
pub use pipeline::BufferKind;
pub use session::{Session, SessionStats, StopHandle};
pub use sink::{ChannelSink, FileSink, TrackSink};
pub use source::{MockServer, MockStream, StreamInfo};
