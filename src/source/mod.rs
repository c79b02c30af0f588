//! Upstream side: talking to Shoutcast and Icecast servers.
//!
//! - [`client`]: connect, redirects, proxies and playlists
//! - [`http`]: request building and response header parsing
//! - [`icy`]: inline metadata demultiplexing
//! - [`playlist`]: PLS and M3U parsing
//! - [`mock`]: synthetic streams and a loopback server for tests

pub mod client;
pub mod http;
pub mod icy;
pub mod mock;
pub mod playlist;

pub use client::{connect, Connection};
pub use http::{ServerKind, StreamInfo};
pub use icy::{IcyPacket, IcyReader};
pub use mock::{MockServer, MockStream};
