//! Ring buffer holding the most recent stream bytes.
//!
//! The byte store is a [`HeapRb`] of exactly `chunk_size * num_chunks`
//! bytes. Alongside it the buffer keeps the metadata marks used for relay
//! metadata injection and, for Ogg content, an index of the pages currently
//! held. Positions inside the store are ring indices; they are only ever
//! combined through [`RingBuffer::add`] and [`RingBuffer::offset_from`].

use std::collections::VecDeque;
use std::sync::Arc;

use ringbuf::traits::{Consumer, Observer, Producer};
use ringbuf::HeapRb;

use crate::metadata::TrackInfo;
use crate::split::ogg::{OggScanner, PageFlags, ScannedPage};
use crate::BufferError;

/// How the buffer's content is structured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    /// Frame-based audio (MP3, AAC, NSV); evicted by extraction only.
    Framed,
    /// Ogg pages; evicted a whole page at a time.
    Ogg,
}

/// Inline metadata in effect from a given chunk onward.
#[derive(Debug, Clone)]
pub struct MetadataMark {
    /// Ring chunk that held the write position when the mark was recorded.
    pub chunk: usize,
    /// Absolute stream position of the mark.
    position: u64,
    /// Composed inline metadata block.
    pub block: Arc<[u8]>,
}

/// An indexed Ogg page.
#[derive(Debug, Clone)]
pub struct OggPage {
    /// Ring index of the first byte.
    pub start: usize,
    /// Length in bytes.
    pub len: usize,
    /// Header-type flags.
    pub flags: PageFlags,
    /// First two pages of the song this page belongs to, when known.
    pub header: Option<Arc<[u8]>>,
}

/// Fixed-capacity byte ring with metadata marks and an Ogg page index.
pub struct RingBuffer {
    storage: HeapRb<u8>,
    capacity: usize,
    chunk_size: usize,
    kind: BufferKind,
    /// Ring index of the oldest byte.
    base: usize,
    /// Absolute stream position of `base`.
    evicted: u64,
    marks: VecDeque<MetadataMark>,
    pages: VecDeque<OggPage>,
    scanner: OggScanner,
    /// Ring index where the next page will start.
    next_page_start: usize,
    bos_page: Option<Vec<u8>>,
    song_header: Option<Arc<[u8]>>,
}

impl RingBuffer {
    /// Creates a buffer of `chunk_size * num_chunks` bytes.
    ///
    /// Both arguments are clamped to at least 1.
    pub fn new(chunk_size: usize, num_chunks: usize, kind: BufferKind) -> Self {
        let chunk_size = chunk_size.max(1);
        let capacity = chunk_size * num_chunks.max(1);
        Self {
            storage: HeapRb::new(capacity),
            capacity,
            chunk_size,
            kind,
            base: 0,
            evicted: 0,
            marks: VecDeque::new(),
            pages: VecDeque::new(),
            scanner: OggScanner::new(),
            next_page_start: 0,
            bos_page: None,
            song_header: None,
        }
    }

    /// Total capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Chunk size in bytes.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Number of chunks.
    pub fn num_chunks(&self) -> usize {
        self.capacity / self.chunk_size
    }

    /// Content kind.
    pub fn kind(&self) -> BufferKind {
        self.kind
    }

    /// Bytes currently held.
    pub fn count(&self) -> usize {
        self.storage.occupied_len()
    }

    /// Returns `true` if the buffer holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Bytes that can be inserted without eviction. Always `capacity - count`.
    pub fn free_space(&self) -> usize {
        self.storage.vacant_len()
    }

    /// Ring index of the oldest byte.
    pub fn base(&self) -> usize {
        self.base
    }

    /// Ring index where the next inserted byte goes.
    pub fn write_index(&self) -> usize {
        self.add(self.base, self.count())
    }

    /// Advances ring index `pos` by `n`.
    pub fn add(&self, pos: usize, n: usize) -> usize {
        (pos + n % self.capacity) % self.capacity
    }

    /// Distance from ring index `from` forward to ring index `to`.
    pub fn offset_from(&self, from: usize, to: usize) -> usize {
        (to + self.capacity - from) % self.capacity
    }

    /// Appends `bytes`, recording `track`'s metadata at the current chunk.
    ///
    /// Returns the number of Ogg pages completed by this insert (always 0
    /// for framed content).
    ///
    /// # Errors
    ///
    /// Returns [`BufferError::Full`] if `bytes` doesn't fit; nothing is
    /// modified in that case.
    pub fn insert(&mut self, bytes: &[u8], track: Option<&TrackInfo>) -> Result<usize, BufferError> {
        let free = self.free_space();
        if bytes.len() > free {
            return Err(BufferError::Full {
                requested: bytes.len(),
                free,
            });
        }

        if let Some(track) = track {
            self.record_mark(&track.icy_block);
        }

        let completed = if self.kind == BufferKind::Ogg {
            self.scanner.feed(bytes)
        } else {
            Vec::new()
        };

        let pushed = self.storage.push_slice(bytes);
        debug_assert_eq!(pushed, bytes.len());

        let count = completed.len();
        for page in completed {
            self.index_page(page);
        }
        Ok(count)
    }

    /// Removes and returns the oldest `n` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`BufferError::Empty`] if fewer than `n` bytes are held.
    pub fn extract(&mut self, n: usize) -> Result<Vec<u8>, BufferError> {
        self.check_available(0, n)?;
        let mut out = vec![0u8; n];
        let popped = self.storage.pop_slice(&mut out);
        debug_assert_eq!(popped, n);
        self.advance_base(n);
        Ok(out)
    }

    /// Discards the oldest `n` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`BufferError::Empty`] if fewer than `n` bytes are held.
    pub fn fast_forward(&mut self, n: usize) -> Result<(), BufferError> {
        self.check_available(0, n)?;
        let skipped = self.storage.skip(n);
        debug_assert_eq!(skipped, n);
        self.advance_base(n);
        Ok(())
    }

    /// Copies `len` bytes starting `offset` bytes after the read cursor.
    ///
    /// # Errors
    ///
    /// Returns [`BufferError::Empty`] if the range extends past the held data.
    pub fn peek(&self, offset: usize, len: usize) -> Result<Vec<u8>, BufferError> {
        let mut out = vec![0u8; len];
        self.peek_into(offset, &mut out)?;
        Ok(out)
    }

    /// Like [`peek`](Self::peek), writing into `out`.
    ///
    /// # Errors
    ///
    /// Returns [`BufferError::Empty`] if the range extends past the held data.
    pub fn peek_into(&self, offset: usize, out: &mut [u8]) -> Result<(), BufferError> {
        self.check_available(offset, out.len())?;
        let (head, tail) = self.storage.as_slices();
        let mut written = 0;
        let mut skip = offset;
        for segment in [head, tail] {
            if written == out.len() {
                break;
            }
            if skip >= segment.len() {
                skip -= segment.len();
                continue;
            }
            let take = (segment.len() - skip).min(out.len() - written);
            out[written..written + take].copy_from_slice(&segment[skip..skip + take]);
            written += take;
            skip = 0;
        }
        Ok(())
    }

    /// Evicts whole Ogg pages from the oldest end until at least
    /// `requested` bytes are free. Returns the number of bytes evicted.
    ///
    /// # Errors
    ///
    /// Returns [`BufferError::Empty`] if evicting every indexed page would
    /// still not free enough space; nothing is evicted in that case.
    pub fn advance_to_free_ogg(&mut self, requested: usize) -> Result<usize, BufferError> {
        let free = self.free_space();
        if free >= requested {
            return Ok(0);
        }
        let needed = requested - free;
        let indexed: usize = self.pages.iter().map(|p| p.len).sum();
        if indexed < needed {
            return Err(BufferError::Empty {
                requested,
                available: free + indexed,
            });
        }

        let mut evict = 0;
        for page in &self.pages {
            if evict >= needed {
                break;
            }
            evict += page.len;
        }
        self.fast_forward(evict)?;
        Ok(evict)
    }

    /// Newest metadata block in effect at the chunk holding `offset`.
    pub fn metadata_at(&self, offset: usize) -> Option<Arc<[u8]>> {
        let chunk_size = self.chunk_size as u64;
        let target_chunk = (self.evicted + offset as u64) / chunk_size;
        self.marks
            .iter()
            .rev()
            .find(|mark| mark.position / chunk_size <= target_chunk)
            .map(|mark| Arc::clone(&mark.block))
    }

    /// Metadata marks currently retained, oldest first.
    pub fn marks(&self) -> impl Iterator<Item = &MetadataMark> {
        self.marks.iter()
    }

    /// Indexed Ogg pages, oldest first.
    pub fn pages(&self) -> &VecDeque<OggPage> {
        &self.pages
    }

    /// Offset of `page` from the read cursor.
    pub fn page_offset(&self, page: &OggPage) -> usize {
        self.offset_from(self.base, page.start)
    }

    /// Copies the bytes of an indexed page.
    ///
    /// # Errors
    ///
    /// Returns [`BufferError::Empty`] if the page is no longer held.
    pub fn page_data(&self, page: &OggPage) -> Result<Vec<u8>, BufferError> {
        self.peek(self.page_offset(page), page.len)
    }

    /// Finds where a relay client that wants to start `offset` bytes after
    /// the read cursor can join an Ogg stream.
    ///
    /// Looks backward for a page that begins a stream, or that starts a
    /// fresh packet and has the song's header bytes. If there is none,
    /// looks forward. Returns the page offset and the header bytes the
    /// client must receive first (`None` when starting on a BOS page).
    pub fn ogg_relay_start(&self, offset: usize) -> Option<(usize, Option<Arc<[u8]>>)> {
        let joinable = |page: &&OggPage| {
            page.flags.bos || (!page.flags.continuation && page.header.is_some())
        };
        let pick = |page: &OggPage| {
            let header = if page.flags.bos {
                None
            } else {
                page.header.clone()
            };
            (self.page_offset(page), header)
        };

        self.pages
            .iter()
            .rev()
            .filter(|p| self.page_offset(p) <= offset)
            .find(joinable)
            .or_else(|| {
                self.pages
                    .iter()
                    .filter(|p| self.page_offset(p) > offset)
                    .find(joinable)
            })
            .map(pick)
    }

    /// Forgets any partial Ogg page and song header, e.g. after reconnecting.
    ///
    /// Bytes of a partial page still held are indexed as junk so they can be
    /// evicted like any other page.
    pub fn reset_stream(&mut self) {
        let pending = self.scanner.pending_len().min(self.count());
        if pending > 0 {
            self.pages.push_back(OggPage {
                start: self.next_page_start,
                len: pending,
                flags: PageFlags {
                    continuation: true,
                    junk: true,
                    ..PageFlags::default()
                },
                header: None,
            });
        }
        self.scanner.reset();
        self.bos_page = None;
        self.song_header = None;
        self.next_page_start = self.write_index();
    }

    fn check_available(&self, offset: usize, len: usize) -> Result<(), BufferError> {
        let count = self.count();
        if offset.saturating_add(len) > count {
            return Err(BufferError::Empty {
                requested: len,
                available: count.saturating_sub(offset),
            });
        }
        Ok(())
    }

    fn record_mark(&mut self, block: &Arc<[u8]>) {
        if let Some(last) = self.marks.back() {
            if Arc::ptr_eq(&last.block, block) || last.block[..] == block[..] {
                return;
            }
        }
        let position = self.evicted + self.count() as u64;
        self.marks.push_back(MetadataMark {
            chunk: self.write_index() / self.chunk_size,
            position,
            block: Arc::clone(block),
        });
    }

    fn index_page(&mut self, page: ScannedPage) {
        let start = self.next_page_start;
        let len = page.len();
        self.next_page_start = self.add(start, len);

        let header = if page.flags.junk {
            None
        } else if page.flags.bos {
            self.song_header = None;
            self.bos_page = Some(page.data);
            None
        } else if let Some(mut header) = self.bos_page.take() {
            header.extend_from_slice(&page.data);
            self.song_header = Some(header.into());
            None
        } else {
            self.song_header.clone()
        };

        if page.flags.eos {
            self.song_header = None;
        }

        self.pages.push_back(OggPage {
            start,
            len,
            flags: page.flags,
            header,
        });
    }

    fn advance_base(&mut self, n: usize) {
        self.base = self.add(self.base, n);
        self.evicted += n as u64;

        // Keep the newest mark at or before the read cursor; it still
        // describes the oldest held bytes.
        while self.marks.len() > 1 && self.marks[1].position <= self.evicted {
            self.marks.pop_front();
        }

        let mut remaining = n;
        while let Some(page) = self.pages.front() {
            if page.len > remaining {
                break;
            }
            remaining -= page.len;
            self.pages.pop_front();
        }
        if remaining > 0 && !self.pages.is_empty() {
            // A framed-style extract cut through a page; it can't be served.
            self.pages.pop_front();
        }
        if self.pages.is_empty() && self.kind == BufferKind::Ogg {
            if self.count() < self.scanner.pending_len() {
                self.scanner.reset();
            }
            self.next_page_start = self.offset_back(self.write_index(), self.scanner.pending_len());
        }
    }

    fn offset_back(&self, pos: usize, n: usize) -> usize {
        self.add(pos, self.capacity - n % self.capacity)
    }
}

impl std::fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("kind", &self.kind)
            .field("capacity", &self.capacity)
            .field("chunk_size", &self.chunk_size)
            .field("base", &self.base)
            .field("count", &self.count())
            .field("marks", &self.marks.len())
            .field("pages", &self.pages.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{Codeset, TrackInfo};
    use crate::source::mock::ogg_page;

    fn track(raw: &str) -> TrackInfo {
        TrackInfo::from_fields("", raw, "", Codeset::Utf8)
    }

    #[test]
    fn test_insert_extract_fifo_with_wraparound() {
        let mut ring = RingBuffer::new(4, 4, BufferKind::Framed);
        let mut expected = VecDeque::new();
        let mut next = 0u8;

        for round in 0..20 {
            let n = 1 + round % 7;
            if ring.free_space() >= n {
                let bytes: Vec<u8> = (0..n)
                    .map(|_| {
                        next = next.wrapping_add(1);
                        next
                    })
                    .collect();
                ring.insert(&bytes, None).unwrap();
                expected.extend(bytes);
            }
            let take = (round % 5).min(ring.count());
            let got = ring.extract(take).unwrap();
            let want: Vec<u8> = expected.drain(..take).collect();
            assert_eq!(got, want);
            assert!(ring.count() <= ring.capacity());
            assert_eq!(ring.free_space(), ring.capacity() - ring.count());
        }
    }

    #[test]
    fn test_full_buffer_rejects_insert() {
        let mut ring = RingBuffer::new(8, 2, BufferKind::Framed);
        ring.insert(&[1u8; 16], None).unwrap();
        assert_eq!(ring.free_space(), 0);
        assert_eq!(
            ring.insert(&[2], None),
            Err(BufferError::Full {
                requested: 1,
                free: 0
            })
        );
        assert_eq!(ring.count(), 16);
    }

    #[test]
    fn test_peek_across_wrap() {
        let mut ring = RingBuffer::new(4, 2, BufferKind::Framed);
        ring.insert(&[0, 1, 2, 3, 4, 5], None).unwrap();
        ring.fast_forward(5).unwrap();
        ring.insert(&[6, 7, 8, 9, 10, 11], None).unwrap();
        assert_eq!(ring.base(), 5);
        assert_eq!(ring.write_index(), 4);
        assert_eq!(ring.peek(0, 7).unwrap(), vec![5, 6, 7, 8, 9, 10, 11]);
        assert_eq!(ring.peek(2, 3).unwrap(), vec![7, 8, 9]);
        assert!(matches!(ring.peek(5, 3), Err(BufferError::Empty { .. })));
    }

    #[test]
    fn test_extract_more_than_held_fails() {
        let mut ring = RingBuffer::new(4, 2, BufferKind::Framed);
        ring.insert(&[1, 2, 3], None).unwrap();
        assert!(matches!(ring.extract(4), Err(BufferError::Empty { .. })));
        assert_eq!(ring.count(), 3);
    }

    #[test]
    fn test_wrap_helpers() {
        let ring = RingBuffer::new(4, 2, BufferKind::Framed);
        assert_eq!(ring.add(6, 3), 1);
        assert_eq!(ring.offset_from(6, 1), 3);
        assert_eq!(ring.offset_from(2, 2), 0);
    }

    #[test]
    fn test_metadata_marks_follow_chunks() {
        let mut ring = RingBuffer::new(4, 4, BufferKind::Framed);
        let a = track("a");
        let b = track("b");
        ring.insert(&[0; 4], Some(&a)).unwrap();
        ring.insert(&[0; 4], Some(&a)).unwrap();
        ring.insert(&[0; 4], Some(&b)).unwrap();
        assert_eq!(ring.marks().count(), 2);

        assert_eq!(ring.metadata_at(0).unwrap()[..], a.icy_block[..]);
        assert_eq!(ring.metadata_at(7).unwrap()[..], a.icy_block[..]);
        assert_eq!(ring.metadata_at(8).unwrap()[..], b.icy_block[..]);

        // Evicting past b's mark drops a's.
        ring.extract(9).unwrap();
        assert_eq!(ring.marks().count(), 1);
        assert_eq!(ring.metadata_at(0).unwrap()[..], b.icy_block[..]);
    }

    #[test]
    fn test_mark_kept_while_it_covers_the_base() {
        let mut ring = RingBuffer::new(4, 4, BufferKind::Framed);
        let a = track("a");
        ring.insert(&[0; 8], Some(&a)).unwrap();
        ring.extract(6).unwrap();
        ring.insert(&[0; 4], Some(&a)).unwrap();
        assert_eq!(ring.marks().count(), 1);
        assert!(ring.metadata_at(0).is_some());
    }

    fn ogg_stream() -> (Vec<u8>, Vec<usize>) {
        let pages = vec![
            ogg_page(0x02, 0, &[vec![1u8; 30]]),
            ogg_page(0x00, 1, &[vec![2u8; 40]]),
            ogg_page(0x00, 2, &[vec![3u8; 50]]),
            ogg_page(0x01, 3, &[vec![4u8; 60]]),
            ogg_page(0x00, 4, &[vec![5u8; 70]]),
        ];
        let lens = pages.iter().map(Vec::len).collect();
        (pages.concat(), lens)
    }

    #[test]
    fn test_ogg_pages_indexed_with_header() {
        let (stream, lens) = ogg_stream();
        let mut ring = RingBuffer::new(64, 8, BufferKind::Ogg);
        let mut completed = 0;
        for piece in stream.chunks(13) {
            completed += ring.insert(piece, None).unwrap();
        }
        assert_eq!(completed, 5);

        let pages = ring.pages();
        assert_eq!(pages.len(), 5);
        assert_eq!(pages.iter().map(|p| p.len).collect::<Vec<_>>(), lens);
        assert!(pages[0].flags.bos);
        assert!(pages[0].header.is_none());
        assert!(pages[1].header.is_none());
        let header = pages[2].header.clone().unwrap();
        assert_eq!(header.len(), lens[0] + lens[1]);
        assert!(Arc::ptr_eq(&header, pages[4].header.as_ref().unwrap()));
        assert_eq!(ring.page_data(&pages[2]).unwrap(), stream[lens[0] + lens[1]..][..lens[2]]);
    }

    #[test]
    fn test_advance_to_free_ogg_evicts_whole_pages() {
        let (stream, lens) = ogg_stream();
        let capacity = stream.len();
        let mut ring = RingBuffer::new(capacity, 1, BufferKind::Ogg);
        ring.insert(&stream, None).unwrap();
        assert_eq!(ring.free_space(), 0);

        let evicted = ring.advance_to_free_ogg(lens[0] + 1).unwrap();
        assert_eq!(evicted, lens[0] + lens[1]);
        assert_eq!(ring.pages().len(), 3);
        assert_eq!(ring.page_offset(&ring.pages()[0]), 0);
        assert_eq!(ring.free_space(), evicted);
    }

    #[test]
    fn test_advance_to_free_ogg_fails_when_pages_insufficient() {
        let (stream, _) = ogg_stream();
        let mut ring = RingBuffer::new(stream.len() + 10, 1, BufferKind::Ogg);
        ring.insert(&stream, None).unwrap();
        // A partial page isn't indexed and can't be evicted.
        ring.insert(b"OggS\0\0", None).unwrap();
        let result = ring.advance_to_free_ogg(ring.capacity());
        assert!(matches!(result, Err(BufferError::Empty { .. })));
        assert_eq!(ring.count(), stream.len() + 6);
    }

    #[test]
    fn test_ogg_relay_start_snaps_to_joinable_page() {
        let (stream, lens) = ogg_stream();
        let mut ring = RingBuffer::new(stream.len(), 1, BufferKind::Ogg);
        ring.insert(&stream, None).unwrap();

        // Page 3 is a continuation; snap back to page 2 with header.
        let page3 = lens[0] + lens[1] + lens[2];
        let (offset, header) = ring.ogg_relay_start(page3 + 5).unwrap();
        assert_eq!(offset, lens[0] + lens[1]);
        assert!(header.is_some());

        // Anywhere inside the first two pages snaps to the BOS page.
        let (offset, header) = ring.ogg_relay_start(lens[0] + 3).unwrap();
        assert_eq!(offset, 0);
        assert!(header.is_none());
    }

    #[test]
    fn test_ogg_relay_start_without_joinable_page() {
        let mut ring = RingBuffer::new(1024, 1, BufferKind::Ogg);
        let page = ogg_page(0x01, 7, &[vec![0u8; 20]]);
        ring.insert(&page, None).unwrap();
        assert!(ring.ogg_relay_start(0).is_none());
    }

    #[test]
    fn test_eos_clears_song_header() {
        let mut ring = RingBuffer::new(1024, 1, BufferKind::Ogg);
        let stream = [
            ogg_page(0x02, 0, &[vec![1u8; 10]]),
            ogg_page(0x00, 1, &[vec![1u8; 10]]),
            ogg_page(0x04, 2, &[vec![1u8; 10]]),
            ogg_page(0x00, 3, &[vec![1u8; 10]]),
        ]
        .concat();
        ring.insert(&stream, None).unwrap();
        let pages = ring.pages();
        assert!(pages[2].header.is_some());
        assert!(pages[3].header.is_none());
    }
}
