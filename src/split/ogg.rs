//! Ogg page scanning and comment header parsing.
//!
//! [`OggScanner`] is fed the raw stream in arbitrary slices and reports every
//! page as soon as its last byte has arrived. Bytes that don't belong to a
//! page (garbage before the first capture pattern, or between pages after a
//! resync) are reported as junk pages so that the reported lengths always
//! tile the input exactly.

const CAPTURE: &[u8; 4] = b"OggS";
const MIN_HEADER: usize = 27;

/// Largest possible page: the header, 255 lacing values and 255 segments
/// of 255 bytes.
pub const MAX_PAGE_LEN: usize = MIN_HEADER + 255 + 255 * 255;

const FLAG_CONTINUATION: u8 = 0x01;
const FLAG_BOS: u8 = 0x02;
const FLAG_EOS: u8 = 0x04;

/// Header-type flags of a page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageFlags {
    /// First packet continues one from the previous page.
    pub continuation: bool,
    /// Beginning of a logical stream.
    pub bos: bool,
    /// End of a logical stream.
    pub eos: bool,
    /// Not a page at all; bytes skipped while looking for a capture pattern.
    pub junk: bool,
}

impl PageFlags {
    fn from_header_type(header_type: u8) -> Self {
        Self {
            continuation: header_type & FLAG_CONTINUATION != 0,
            bos: header_type & FLAG_BOS != 0,
            eos: header_type & FLAG_EOS != 0,
            junk: false,
        }
    }

    fn junk() -> Self {
        Self {
            continuation: true,
            junk: true,
            ..Self::default()
        }
    }
}

/// A complete page (or junk run) found by the scanner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedPage {
    /// Header-type flags.
    pub flags: PageFlags,
    /// The page bytes, header included.
    pub data: Vec<u8>,
}

impl ScannedPage {
    /// Page length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` for an empty junk run (never produced by the scanner).
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Page body (packet data) without the header and segment table.
    pub fn body(&self) -> &[u8] {
        if self.flags.junk {
            return &[];
        }
        page_body(&self.data)
    }
}

/// Incremental Ogg page splitter.
#[derive(Debug, Default)]
pub struct OggScanner {
    pending: Vec<u8>,
}

impl OggScanner {
    /// Creates an empty scanner.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes received but not yet part of a reported page.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Discards any partial page.
    pub fn reset(&mut self) {
        self.pending.clear();
    }

    /// Appends `bytes` and returns every page completed by them, in order.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<ScannedPage> {
        self.pending.extend_from_slice(bytes);
        let mut pages = Vec::new();

        loop {
            match find_capture(&self.pending, 0) {
                None => {
                    // The tail may be the start of a capture pattern.
                    let keep = self.pending.len().min(CAPTURE.len() - 1);
                    let junk = self.pending.len() - keep;
                    if junk > 0 {
                        pages.push(self.take(junk, PageFlags::junk()));
                    }
                    break;
                }
                Some(pos) if pos > 0 => pages.push(self.take(pos, PageFlags::junk())),
                Some(_) => match page_length(&self.pending) {
                    PageLength::Incomplete => break,
                    PageLength::Invalid => {
                        let next = find_capture(&self.pending, 1).unwrap_or(self.pending.len());
                        pages.push(self.take(next, PageFlags::junk()));
                    }
                    PageLength::Complete(len) => {
                        let flags = PageFlags::from_header_type(self.pending[5]);
                        pages.push(self.take(len, flags));
                    }
                },
            }
        }
        pages
    }

    fn take(&mut self, len: usize, flags: PageFlags) -> ScannedPage {
        let data: Vec<u8> = self.pending.drain(..len).collect();
        ScannedPage { flags, data }
    }
}

enum PageLength {
    Incomplete,
    Invalid,
    Complete(usize),
}

/// `buf` starts with the capture pattern.
fn page_length(buf: &[u8]) -> PageLength {
    if buf.len() < MIN_HEADER {
        return PageLength::Incomplete;
    }
    if buf[4] != 0 {
        return PageLength::Invalid;
    }
    let segments = usize::from(buf[26]);
    let header_len = MIN_HEADER + segments;
    if buf.len() < header_len {
        return PageLength::Incomplete;
    }
    let body_len: usize = buf[MIN_HEADER..header_len]
        .iter()
        .map(|&b| usize::from(b))
        .sum();
    let total = header_len + body_len;
    if buf.len() < total {
        PageLength::Incomplete
    } else {
        PageLength::Complete(total)
    }
}

fn find_capture(buf: &[u8], from: usize) -> Option<usize> {
    buf.get(from..)?
        .windows(CAPTURE.len())
        .position(|w| w == CAPTURE)
        .map(|p| p + from)
}

/// Body of a complete page.
pub fn page_body(page: &[u8]) -> &[u8] {
    if page.len() < MIN_HEADER {
        return &[];
    }
    let header_len = MIN_HEADER + usize::from(page[26]);
    page.get(header_len..).unwrap_or(&[])
}

/// Artist, title and album from a Vorbis or Opus comment header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OggComments {
    /// `ARTIST` comment.
    pub artist: String,
    /// `TITLE` comment.
    pub title: String,
    /// `ALBUM` comment.
    pub album: String,
}

/// Parses the comment packet at the start of `body`.
///
/// Returns `None` if the body doesn't start with a Vorbis or Opus comment
/// header or the packet is truncated.
pub fn parse_comment_header(body: &[u8]) -> Option<OggComments> {
    let rest = if let Some(rest) = body.strip_prefix(b"\x03vorbis") {
        rest
    } else {
        body.strip_prefix(b"OpusTags")?
    };

    let mut cursor = Cursor { buf: rest };
    let vendor_len = cursor.read_u32()?;
    cursor.skip(vendor_len)?;
    let count = cursor.read_u32()?;

    let mut comments = OggComments::default();
    for _ in 0..count {
        let len = cursor.read_u32()?;
        let entry = cursor.take(len)?;
        let entry = String::from_utf8_lossy(entry);
        let Some((key, value)) = entry.split_once('=') else {
            continue;
        };
        let slot = match key.to_ascii_uppercase().as_str() {
            "ARTIST" => &mut comments.artist,
            "TITLE" => &mut comments.title,
            "ALBUM" => &mut comments.album,
            _ => continue,
        };
        if slot.is_empty() {
            *slot = value.to_string();
        }
    }
    Some(comments)
}

struct Cursor<'a> {
    buf: &'a [u8],
}

impl<'a> Cursor<'a> {
    fn take(&mut self, len: usize) -> Option<&'a [u8]> {
        if self.buf.len() < len {
            return None;
        }
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        Some(head)
    }

    fn skip(&mut self, len: usize) -> Option<()> {
        self.take(len).map(|_| ())
    }

    fn read_u32(&mut self) -> Option<usize> {
        let bytes = self.take(4)?;
        let value = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        usize::try_from(value).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::mock::{ogg_comment_packet, ogg_page};

    #[test]
    fn test_scanner_reports_complete_pages() {
        let bos = ogg_page(0x02, 1, &[b"\x01vorbis-id".to_vec()]);
        let data = ogg_page(0x00, 2, &[vec![7u8; 300]]);
        let mut stream = bos.clone();
        stream.extend_from_slice(&data);

        let mut scanner = OggScanner::new();
        let pages = scanner.feed(&stream);
        assert_eq!(pages.len(), 2);
        assert!(pages[0].flags.bos);
        assert_eq!(pages[0].data, bos);
        assert!(!pages[1].flags.bos);
        assert_eq!(pages[1].len(), data.len());
        assert_eq!(pages[1].body(), &[7u8; 300][..]);
        assert_eq!(scanner.pending_len(), 0);
    }

    #[test]
    fn test_scanner_handles_split_input() {
        let page = ogg_page(0x00, 5, &[vec![1u8; 1000]]);
        let mut scanner = OggScanner::new();
        let mut pages = Vec::new();
        for piece in page.chunks(7) {
            pages.extend(scanner.feed(piece));
        }
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].data, page);
    }

    #[test]
    fn test_scanner_emits_junk_before_capture() {
        let page = ogg_page(0x04, 9, &[vec![2u8; 10]]);
        let mut stream = b"garbage!".to_vec();
        stream.extend_from_slice(&page);

        let mut scanner = OggScanner::new();
        let pages = scanner.feed(&stream);
        assert_eq!(pages.len(), 2);
        assert!(pages[0].flags.junk);
        assert!(pages[0].flags.continuation);
        assert_eq!(pages[0].len(), 8);
        assert!(pages[1].flags.eos);
        let total: usize = pages.iter().map(ScannedPage::len).sum();
        assert_eq!(total, stream.len());
    }

    #[test]
    fn test_scanner_keeps_possible_capture_prefix() {
        let mut scanner = OggScanner::new();
        let pages = scanner.feed(b"xxxxOgg");
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].len(), 4);
        assert_eq!(scanner.pending_len(), 3);
    }

    #[test]
    fn test_parse_vorbis_comments() {
        let packet = ogg_comment_packet("Artist", "Title", "Album");
        let comments = parse_comment_header(&packet).unwrap();
        assert_eq!(comments.artist, "Artist");
        assert_eq!(comments.title, "Title");
        assert_eq!(comments.album, "Album");
    }

    #[test]
    fn test_parse_comments_rejects_other_packets() {
        assert!(parse_comment_header(b"\x01vorbis").is_none());
        assert!(parse_comment_header(b"\x03vorbis\xff\xff").is_none());
    }
}
