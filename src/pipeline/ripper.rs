//! The rip state machine: turns the buffered stream into tracks.
//!
//! The ripper runs on the producer thread while it holds the shared guard.
//! It never touches a sink; it queues [`SinkOp`]s that the producer hands
//! to the router once the guard is released.
//!
//! Framed content (MP3, AAC, NSV) is written out of the ring buffer with
//! `extract`, so file output and eviction advance together. For MP3 a
//! metadata change becomes a [`PendingSplit`] that waits until the
//! look-ahead is buffered, then the quietest run around it is searched for.
//! Other framed kinds cut exactly at the metadata change. Ogg content is
//! split on begin-of-stream pages instead and written page by page.

use std::collections::VecDeque;

use crate::config::{RipConfig, SplitConfig};
use crate::format::{id3, ContentKind, VolumeDecoder};
use crate::metadata::{codeset, Codeset, RuleSet, TrackInfo};
use crate::pipeline::router::SinkOp;
use crate::pipeline::{BufferKind, StreamState};
use crate::source::StreamInfo;
use crate::split::ogg::{page_body, parse_comment_header};
use crate::split::{find_split, PageFlags, SplitGeometry, SplitPoint};
use crate::{BufferError, RipError, Track};

/// A metadata change whose split point hasn't been decided yet.
#[derive(Debug)]
struct PendingSplit {
    /// Offset of the change from the read cursor.
    boundary: usize,
    next: TrackInfo,
}

/// Ogg song assembly.
#[derive(Debug, Default)]
enum OggPhase {
    /// Waiting for the first begin-of-stream page.
    #[default]
    Idle,
    /// Holding the identification page until the comment page completes.
    Headers(Vec<u8>),
    /// Inside a song.
    Song,
}

pub(crate) struct Ripper {
    decoder: Box<dyn VolumeDecoder>,
    rules: RuleSet,
    codeset: Codeset,
    split: SplitConfig,
    id3v1: bool,
    id3v2: bool,
    /// Number the next saved track gets.
    next_number: u32,

    kind: ContentKind,
    geometry: Option<SplitGeometry>,
    /// Bytes kept buffered for relay bursts.
    retain: usize,
    stream_name: String,
    /// Newest track, active or pending.
    current: Option<TrackInfo>,
    /// Undecoded `StreamTitle` that produced `current`.
    last_title: Option<Vec<u8>>,
    active: Option<Track>,
    pending: VecDeque<PendingSplit>,
    ogg: OggPhase,
    ops: Vec<SinkOp>,
}

impl Ripper {
    pub fn new(config: &RipConfig, rules: RuleSet, decoder: Box<dyn VolumeDecoder>) -> Self {
        Self {
            decoder,
            rules,
            codeset: config.codeset,
            split: config.split,
            id3v1: config.id3v1,
            id3v2: config.id3v2,
            next_number: 1,
            kind: ContentKind::Mp3,
            geometry: None,
            retain: 0,
            stream_name: String::new(),
            current: None,
            last_title: None,
            active: None,
            pending: VecDeque::new(),
            ogg: OggPhase::Idle,
            ops: Vec::new(),
        }
    }

    /// Prepares for a new connection.
    ///
    /// A framed stream without inline metadata is ripped as one partial
    /// track named after the stream.
    pub fn begin(&mut self, info: &StreamInfo, geometry: SplitGeometry, retain: usize) {
        self.kind = info.kind;
        self.geometry = Some(geometry);
        self.retain = retain;
        self.stream_name = if info.name.is_empty() {
            "stream".to_string()
        } else {
            info.name.clone()
        };
        self.current = None;
        self.last_title = None;
        self.pending.clear();
        self.ogg = OggPhase::Idle;

        if info.metaint.is_none() && !self.is_ogg() {
            tracing::debug!(name = %self.stream_name, "no inline metadata, ripping a single track");
            let untitled = TrackInfo::untitled(&self.stream_name);
            self.current = Some(untitled.clone());
            self.start_track(untitled, true);
        }
    }

    /// Queued sink operations, oldest first.
    pub fn take_ops(&mut self) -> Vec<SinkOp> {
        std::mem::take(&mut self.ops)
    }

    /// Handles an undecoded `StreamTitle` received at the current write
    /// position. Only a change in its bytes marks a new track.
    ///
    /// # Errors
    ///
    /// Returns a buffer error if resolving an earlier split failed.
    pub fn on_title(&mut self, state: &mut StreamState, bytes: &[u8]) -> Result<(), RipError> {
        if self.is_ogg() {
            return Ok(());
        }
        if self.last_title.as_deref() == Some(bytes) {
            tracing::trace!(len = bytes.len(), "repeated metadata");
            return Ok(());
        }
        self.last_title = Some(bytes.to_vec());

        let raw = codeset::decode(bytes, self.codeset);
        let info = TrackInfo::from_raw(&raw, &self.rules, self.codeset);
        tracing::debug!(%raw, artist = %info.artist, title = %info.title, save = info.save_track, "metadata changed");
        self.current = Some(info.clone());

        if self.active.is_none() && self.pending.is_empty() {
            self.start_track(info, true);
            return Ok(());
        }

        if self.kind.searches_silence() {
            while !self.pending.is_empty() {
                self.resolve_front(state)?;
            }
        }
        let boundary = ring_count(state);
        self.pending.push_back(PendingSplit {
            boundary,
            next: info,
        });
        Ok(())
    }

    /// Buffers audio bytes and writes out whatever is no longer needed.
    ///
    /// # Errors
    ///
    /// Returns a buffer error if the bytes can't be made to fit.
    pub fn on_audio(&mut self, state: &mut StreamState, bytes: &[u8]) -> Result<(), RipError> {
        if bytes.is_empty() {
            return Ok(());
        }
        if self.is_ogg() {
            return self.on_ogg(state, bytes);
        }

        self.make_room(state, bytes.len())?;
        state.insert(bytes, self.current.as_ref())?;

        if self.kind.searches_silence() {
            let look_ahead = self.look_ahead();
            while let Some(front) = self.pending.front() {
                if ring_count(state) < front.boundary + look_ahead {
                    break;
                }
                self.resolve_front(state)?;
            }
        }

        let count = ring_count(state);
        let mut target = count.saturating_sub(self.retain);
        if self.kind.searches_silence() {
            let keep_from = self
                .pending
                .front()
                .map_or(count, |front| front.boundary)
                .saturating_sub(self.look_back());
            target = target.min(keep_from);
        }
        self.write_out(state, target)
    }

    /// Flushes everything buffered and ends the active track.
    ///
    /// # Errors
    ///
    /// Returns a buffer error if the buffered bytes couldn't be read.
    pub fn finish(&mut self, state: &mut StreamState) -> Result<(), RipError> {
        if self.is_ogg() {
            self.ogg = OggPhase::Idle;
        } else {
            if self.kind.searches_silence() {
                let count = ring_count(state);
                self.pending.retain(|split| split.boundary < count);
                while !self.pending.is_empty() {
                    self.resolve_front(state)?;
                }
            }
            let count = ring_count(state);
            self.write_out(state, count)?;
            self.pending.clear();
        }
        self.end_track();
        self.current = None;
        self.last_title = None;
        Ok(())
    }

    fn is_ogg(&self) -> bool {
        self.kind.buffer_kind() == BufferKind::Ogg
    }

    fn look_back(&self) -> usize {
        self.geometry.map_or(0, |g| g.look_back)
    }

    fn look_ahead(&self) -> usize {
        self.geometry.map_or(0, |g| g.look_ahead)
    }

    /// Frees space for an insert of `len` bytes. The pending split is
    /// resolved early, with a shorter look-ahead, if its look-back would
    /// otherwise be written out.
    fn make_room(&mut self, state: &mut StreamState, len: usize) -> Result<(), RipError> {
        loop {
            let free = state.ring.as_ref().map_or(0, |ring| ring.free_space());
            if free >= len {
                return Ok(());
            }
            let excess = len - free;
            if self.kind.searches_silence() {
                if let Some(front) = self.pending.front() {
                    if excess > front.boundary.saturating_sub(self.look_back()) {
                        tracing::debug!(excess, boundary = front.boundary, "buffer full, splitting early");
                        self.resolve_front(state)?;
                        continue;
                    }
                }
            }
            self.write_out(state, excess)?;
            return Ok(());
        }
    }

    /// Writes the oldest `n` bytes to the active track, switching tracks at
    /// pending boundaries on the way.
    fn write_out(&mut self, state: &mut StreamState, mut n: usize) -> Result<(), RipError> {
        while n > 0 {
            if let Some(front) = self.pending.front() {
                if front.boundary == 0 {
                    if let Some(split) = self.pending.pop_front() {
                        self.end_track();
                        self.start_track(split.next, false);
                    }
                    continue;
                }
            }
            let take = self
                .pending
                .front()
                .map_or(n, |front| front.boundary.min(n));
            let bytes = state.extract(take)?;
            for split in &mut self.pending {
                split.boundary -= take;
            }
            self.write_data(bytes);
            n -= take;
        }
        Ok(())
    }

    /// Decides the split point of the oldest pending change and switches
    /// tracks there.
    fn resolve_front(&mut self, state: &mut StreamState) -> Result<(), RipError> {
        let Some(split) = self.pending.pop_front() else {
            return Ok(());
        };
        let count = ring_count(state);
        let boundary = split.boundary.min(count);
        let window_start = boundary.saturating_sub(self.look_back());
        let relative = boundary - window_start;
        let window_len = (self.look_back() + self.look_ahead()).min(count - window_start);

        let point = self.search(state, window_start, window_len, relative)?;
        tracing::debug!(
            boundary,
            previous_end = window_start + point.previous_end,
            next_start = window_start + point.next_start,
            "split point"
        );

        self.write_out(state, window_start)?;
        let tail = peek(state, 0, point.previous_end)?;
        self.write_data(tail);
        self.end_track();

        state.fast_forward(point.next_start)?;
        for pending in &mut self.pending {
            pending.boundary = pending
                .boundary
                .saturating_sub(window_start + point.next_start);
        }
        self.start_track(split.next, false);
        Ok(())
    }

    fn search(
        &mut self,
        state: &StreamState,
        start: usize,
        len: usize,
        boundary: usize,
    ) -> Result<SplitPoint, RipError> {
        if len == 0 {
            return Ok(SplitPoint::at(boundary));
        }
        let window = peek(state, start, len)?;
        let point = match self.decoder.volume_curve(&window) {
            Ok(samples) => find_split(&samples, boundary, &self.split),
            Err(e) => {
                tracing::debug!(error = %e, "volume curve unavailable, cutting at the boundary");
                None
            }
        };
        Ok(point.unwrap_or_else(|| SplitPoint::at(boundary)))
    }

    fn on_ogg(&mut self, state: &mut StreamState, bytes: &[u8]) -> Result<(), RipError> {
        let completed = match state.insert_ogg(bytes, self.current.as_ref()) {
            Err(BufferError::Empty { requested, available }) => {
                // The partial page at the write end can't be evicted.
                tracing::warn!(requested, available, "ogg page overflows the buffer, resyncing");
                self.end_track();
                self.ogg = OggPhase::Idle;
                state.restart_stream()?;
                state.insert_ogg(bytes, self.current.as_ref())?
            }
            result => result?,
        };
        if completed == 0 {
            return Ok(());
        }

        let pages: Vec<(PageFlags, Vec<u8>)> = {
            let ring = state.ring.as_ref().ok_or(BufferError::Empty {
                requested: bytes.len(),
                available: 0,
            })?;
            let indexed = ring.pages();
            indexed
                .iter()
                .skip(indexed.len().saturating_sub(completed))
                .map(|page| Ok((page.flags, ring.page_data(page)?)))
                .collect::<Result<_, BufferError>>()?
        };

        for (flags, data) in pages {
            if flags.junk {
                continue;
            }
            if flags.bos {
                self.end_track();
                self.ogg = OggPhase::Headers(data);
                continue;
            }
            match std::mem::take(&mut self.ogg) {
                OggPhase::Idle => {}
                OggPhase::Headers(held) => {
                    let info = parse_comment_header(page_body(&data))
                        .map(|c| TrackInfo::from_fields(&c.artist, &c.title, &c.album, self.codeset))
                        .unwrap_or_else(|| TrackInfo::untitled(&self.stream_name));
                    self.current = Some(info.clone());
                    self.start_track(info, false);
                    self.write_data(held);
                    self.write_data(data);
                    self.ogg = OggPhase::Song;
                }
                OggPhase::Song => {
                    self.write_data(data);
                    if flags.eos {
                        self.end_track();
                    } else {
                        self.ogg = OggPhase::Song;
                    }
                }
            }
        }
        Ok(())
    }

    fn start_track(&mut self, info: TrackInfo, partial: bool) {
        if !info.save_track {
            let track = Track {
                number: 0,
                info,
                kind: self.kind,
                partial,
            };
            self.ops.push(SinkOp::Skip(track.clone()));
            self.active = Some(track);
            return;
        }

        let track = Track {
            number: self.next_number,
            info,
            kind: self.kind,
            partial,
        };
        self.next_number += 1;
        self.ops.push(SinkOp::Start(track.clone()));
        if self.id3v2 && self.kind.takes_id3() {
            self.ops
                .push(SinkOp::Data(id3::id3v2(&track.info, tag_number(&track))));
        }
        self.active = Some(track);
    }

    fn end_track(&mut self) {
        let Some(track) = self.active.take() else {
            return;
        };
        if !track.info.save_track {
            return;
        }
        if self.id3v1 && self.kind.takes_id3() {
            self.ops
                .push(SinkOp::Data(id3::id3v1(&track.info, tag_number(&track)).to_vec()));
        }
        self.ops.push(SinkOp::End(track));
    }

    /// Queues bytes for the active track; dropped when there is none or it
    /// isn't saved.
    fn write_data(&mut self, bytes: Vec<u8>) {
        if bytes.is_empty() {
            return;
        }
        if self.active.as_ref().is_some_and(|track| track.info.save_track) {
            self.ops.push(SinkOp::Data(bytes));
        }
    }
}

/// Track number written to tags: the one from the metadata if it parses,
/// else the session's count.
fn tag_number(track: &Track) -> u32 {
    track.info.track.trim().parse().unwrap_or(track.number)
}

fn ring_count(state: &StreamState) -> usize {
    state.ring.as_ref().map_or(0, |ring| ring.count())
}

fn peek(state: &StreamState, offset: usize, len: usize) -> Result<Vec<u8>, BufferError> {
    match state.ring.as_ref() {
        Some(ring) => ring.peek(offset, len),
        None if len == 0 => Ok(Vec::new()),
        None => Err(BufferError::Empty {
            requested: len,
            available: 0,
        }),
    }
}

impl std::fmt::Debug for Ripper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ripper")
            .field("kind", &self.kind)
            .field("active", &self.active.as_ref().map(Track::file_stem))
            .field("pending", &self.pending.len())
            .field("next_number", &self.next_number)
            .finish_non_exhaustive()
    }
}
