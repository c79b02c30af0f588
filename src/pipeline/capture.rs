//! The producer thread: receive, buffer, rip, reconnect.
//!
//! One connection is handled by [`Producer::rip_once`]:
//! - Connect and announce the stream to the relay
//! - Read enough audio to learn the bitrate, then size the ring buffer
//! - Feed audio and titles to the ripper under the shared guard
//! - Hand the resulting sink operations to the router outside the guard
//!
//! [`Producer::run`] wraps it in the reconnect policy and reports every
//! transition through the status queue.

use std::io::Read;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use url::Url;

use crate::config::RipConfig;
use crate::event::{StatusEvent, StatusSender, StopReason};
use crate::format::{mpeg, ContentKind};
use crate::pipeline::ripper::Ripper;
use crate::pipeline::router::TrackRouter;
use crate::pipeline::{lock, SharedState};
use crate::session::SessionState;
use crate::source::http::redact;
use crate::source::{client, IcyPacket, IcyReader, StreamInfo};
use crate::split::SplitGeometry;
use crate::RipError;

/// Chunk size when the server sends no inline metadata.
const DEFAULT_CHUNK_SIZE: usize = 8192;

/// Audio read before the bitrate is decided.
const PROBE_BYTES: usize = 4096;

/// Granularity of interruptible sleeps.
const PAUSE_SLICE: Duration = Duration::from_millis(100);

/// Log progress every this many packets.
const PROGRESS_EVERY: u64 = 500;

/// Owns everything the producer thread touches.
pub(crate) struct Producer {
    pub url: Url,
    pub config: RipConfig,
    pub ripper: Ripper,
    pub router: TrackRouter,
    pub shared: SharedState,
    pub session: Arc<SessionState>,
    pub status: StatusSender,
    /// Relay threads, joined before `Done` is reported.
    pub relay_threads: Vec<JoinHandle<()>>,
}

/// Starts the producer thread.
pub(crate) fn spawn_producer(producer: Producer) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("stream-rip-producer".into())
        .spawn(move || producer.run())
}

impl Producer {
    /// Rips until stopped, the byte limit is hit or a fatal error occurs.
    pub fn run(mut self) {
        let url = redact(&self.url);
        tracing::info!(%url, "rip session starting");
        self.status.emit(StatusEvent::Started { url });

        let reason = self.rip_loop();

        self.session.request_stop();
        for handle in self.relay_threads.drain(..) {
            if handle.join().is_err() {
                tracing::warn!("relay thread panicked");
            }
        }
        self.session.finished();
        tracing::info!(?reason, bytes = self.session.bytes_ripped.load(Ordering::SeqCst), "rip session finished");
        self.status.emit(StatusEvent::Done { reason });
    }

    fn rip_loop(&mut self) -> StopReason {
        let mut attempt = 0u32;
        loop {
            if self.session.stop_requested() {
                return StopReason::Requested;
            }
            match self.rip_once(&mut attempt) {
                Ok(reason) => return reason,
                Err(_) if self.session.stop_requested() => return StopReason::Requested,
                Err(e) if e.is_recoverable() && self.config.auto_reconnect => {
                    attempt += 1;
                    self.session.reconnects.fetch_add(1, Ordering::SeqCst);
                    tracing::warn!(attempt, error = %e, "stream interrupted, reconnecting");
                    self.status.emit(StatusEvent::Error {
                        message: e.to_string(),
                        recoverable: true,
                    });
                    self.status.emit(StatusEvent::Reconnecting {
                        attempt,
                        reason: e.to_string(),
                    });
                    if !self.pause(self.config.reconnect_delay()) {
                        return StopReason::Requested;
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "rip failed");
                    self.status.emit(StatusEvent::Error {
                        message: e.to_string(),
                        recoverable: false,
                    });
                    return StopReason::Failed(e.to_string());
                }
            }
        }
    }

    /// Sleeps for `delay` unless a stop arrives first. Returns `false` if
    /// it did.
    fn pause(&self, delay: Duration) -> bool {
        let mut left = delay;
        while !left.is_zero() {
            if self.session.stop_requested() {
                return false;
            }
            let slice = left.min(PAUSE_SLICE);
            std::thread::sleep(slice);
            left -= slice;
        }
        !self.session.stop_requested()
    }

    /// Handles one upstream connection from connect to teardown.
    fn rip_once(&mut self, attempt: &mut u32) -> Result<StopReason, RipError> {
        let connection = client::connect(&self.url, &self.config)?;
        self.session.set_upstream(connection.shutdown_handle().ok());

        let info = connection.info.clone();
        tracing::info!(
            name = %info.name,
            server = ?info.server,
            kind = ?info.kind,
            bitrate = ?info.bitrate,
            metaint = ?info.metaint,
            "connected"
        );
        self.status.emit(StatusEvent::Connected {
            stream: info.clone(),
        });
        self.status.emit(StatusEvent::Buffering);
        lock(&self.shared).info = Some(info.clone());

        let mut reader = IcyReader::new(connection.into_reader(), info.metaint);
        let result = self.pump(&mut reader, &info, attempt);

        let finished = {
            let mut state = lock(&self.shared);
            let finished = self.ripper.finish(&mut state);
            let restarted = state.restart_stream().map_err(RipError::from);
            finished.and(restarted)
        };
        let ops = self.ripper.take_ops();
        let applied = self.router.apply(ops);
        self.session.set_upstream(None);

        match result {
            Ok(reason) => {
                finished?;
                applied?;
                Ok(reason)
            }
            Err(e) => {
                if let Err(teardown) = finished.and(applied) {
                    tracing::warn!(error = %teardown, "failed to finish track after stream error");
                }
                Err(e)
            }
        }
    }

    /// Reads the stream until it ends or the session stops.
    fn pump<R: Read>(
        &mut self,
        reader: &mut IcyReader<R>,
        info: &StreamInfo,
        attempt: &mut u32,
    ) -> Result<StopReason, RipError> {
        let chunk_size = info.metaint.unwrap_or(DEFAULT_CHUNK_SIZE);
        let mut buf = vec![0u8; chunk_size];

        // Titles that arrive while probing keep their position in the audio.
        let mut probe = Vec::with_capacity(PROBE_BYTES + chunk_size);
        let mut titles: Vec<(usize, Vec<u8>)> = Vec::new();
        while probe.len() < PROBE_BYTES {
            if self.session.stop_requested() {
                return Ok(StopReason::Requested);
            }
            match reader.next_packet(&mut buf)? {
                IcyPacket::Audio(n) => probe.extend_from_slice(&buf[..n]),
                IcyPacket::Title(raw) => titles.push((probe.len(), raw)),
            }
        }

        let bitrate = self.bitrate(info, &probe);
        let geometry = SplitGeometry::new(&self.config.split, bitrate, chunk_size);
        let burst = if self.config.relay.enabled {
            self.config.relay.burst_bytes
        } else {
            0
        };
        let chunks = geometry.buffer_chunks(info.kind, self.config.min_buffer_chunks, burst);
        tracing::info!(
            bitrate,
            chunk_size,
            chunks,
            look_back = geometry.look_back,
            look_ahead = geometry.look_ahead,
            "buffer sized"
        );
        lock(&self.shared).prepare_ring(chunk_size, chunks, info.kind.buffer_kind());
        self.ripper.begin(info, geometry, burst);

        self.status.emit(StatusEvent::Ripping);
        *attempt = 0;

        let mut at = 0;
        for (pos, raw) in titles {
            self.feed_audio(&probe[at..pos], chunk_size)?;
            self.feed_title(&raw)?;
            at = pos;
        }
        self.feed_audio(&probe[at..], chunk_size)?;
        if let Some(reason) = self.count(probe.len()) {
            return Ok(reason);
        }

        let mut packets = 0u64;
        loop {
            if self.session.stop_requested() {
                return Ok(StopReason::Requested);
            }
            match reader.next_packet(&mut buf)? {
                IcyPacket::Audio(n) => {
                    self.feed_audio(&buf[..n], chunk_size)?;
                    if let Some(reason) = self.count(n) {
                        return Ok(reason);
                    }
                }
                IcyPacket::Title(raw) => self.feed_title(&raw)?,
            }

            packets += 1;
            if packets % PROGRESS_EVERY == 0 {
                tracing::debug!(
                    packets,
                    bytes = self.session.bytes_ripped.load(Ordering::SeqCst),
                    clients = lock(&self.shared).clients.len(),
                    "ripping"
                );
            }
        }
    }

    /// Bitrate used to size the split window.
    fn bitrate(&self, info: &StreamInfo, probe: &[u8]) -> u32 {
        let detected = if info.kind == ContentKind::Mp3 {
            mpeg::steady_bitrate(probe)
        } else {
            None
        };
        match (detected, info.bitrate) {
            (Some(bitrate), _) => bitrate,
            (None, Some(bitrate)) => {
                tracing::debug!(bitrate, "using announced bitrate");
                bitrate
            }
            (None, None) => {
                tracing::debug!(bitrate = self.config.default_bitrate, "bitrate unknown, using default");
                self.config.default_bitrate
            }
        }
    }

    fn feed_audio(&mut self, bytes: &[u8], chunk_size: usize) -> Result<(), RipError> {
        for piece in bytes.chunks(chunk_size.max(1)) {
            let ops = {
                let mut state = lock(&self.shared);
                self.ripper.on_audio(&mut state, piece)?;
                self.ripper.take_ops()
            };
            self.router.apply(ops)?;
        }
        Ok(())
    }

    fn feed_title(&mut self, raw: &[u8]) -> Result<(), RipError> {
        let ops = {
            let mut state = lock(&self.shared);
            self.ripper.on_title(&mut state, raw)?;
            self.ripper.take_ops()
        };
        self.router.apply(ops)
    }

    /// Adds `n` ripped bytes. Returns a stop reason once the limit is hit.
    fn count(&self, n: usize) -> Option<StopReason> {
        let total = self.session.bytes_ripped.fetch_add(n as u64, Ordering::SeqCst) + n as u64;
        match self.config.max_bytes_ripped {
            Some(limit) if total >= limit => {
                tracing::info!(total, limit, "byte limit reached");
                Some(StopReason::MaxBytesRipped)
            }
            _ => None,
        }
    }
}
