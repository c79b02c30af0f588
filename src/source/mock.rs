//! Synthetic streams for testing without a network radio station.
//!
//! Everything here produces bytes a real server would send: MPEG frames,
//! Ogg pages, ICY-interleaved bodies, and a loopback [`MockServer`] that
//! answers requests with canned responses.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crate::format::{mpeg, VolumeDecoder};
use crate::metadata::{compose_icy_block, Codeset};
use crate::split::VolumeSample;
use crate::DecodeError;

const V1_L3_BITRATES: [u32; 15] = [
    0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320,
];

/// Header plus stereo side information of an MPEG-1 layer III frame.
const FRAME_PREFIX: usize = 4 + 32;

/// Builds one MPEG-1 layer III frame at 44.1 kHz, joint stereo.
///
/// The side information is all zero so the frame decodes to silence; the
/// main data is filled with `fill`, which [`FillVolumeDecoder`] reads back
/// as the frame's loudness.
///
/// # Panics
///
/// Panics if `kbps` is not a valid MPEG-1 layer III bitrate.
pub fn mpeg_frame(kbps: u32, fill: u8) -> Vec<u8> {
    let index = V1_L3_BITRATES
        .iter()
        .position(|&rate| rate == kbps && rate != 0)
        .unwrap_or_else(|| panic!("{kbps} kbps is not a layer III bitrate"));
    let len = (144 * kbps * 1000 / 44100) as usize;

    let mut frame = vec![0u8; len];
    frame[0] = 0xFF;
    frame[1] = 0xFB;
    frame[2] = (index as u8) << 4;
    frame[3] = 0x44;
    frame[FRAME_PREFIX..].fill(fill);
    frame
}

/// Concatenates `count` frames of [`mpeg_frame`].
pub fn mpeg_frames(count: usize, kbps: u32, fill: u8) -> Vec<u8> {
    let frame = mpeg_frame(kbps, fill);
    frame.repeat(count)
}

/// Builds an Ogg page carrying `packets`, each terminated in the page.
///
/// The CRC field is left zero; nothing in the crate checks it.
pub fn ogg_page(header_type: u8, seq: u32, packets: &[Vec<u8>]) -> Vec<u8> {
    let mut lacing = Vec::new();
    for packet in packets {
        lacing.extend(std::iter::repeat(255u8).take(packet.len() / 255));
        lacing.push((packet.len() % 255) as u8);
    }

    let mut page = Vec::with_capacity(27 + lacing.len());
    page.extend_from_slice(b"OggS");
    page.push(0);
    page.push(header_type);
    page.extend_from_slice(&u64::from(seq).to_le_bytes());
    page.extend_from_slice(&0x5EED_u32.to_le_bytes());
    page.extend_from_slice(&seq.to_le_bytes());
    page.extend_from_slice(&[0u8; 4]);
    page.push(lacing.len() as u8);
    page.extend_from_slice(&lacing);
    for packet in packets {
        page.extend_from_slice(packet);
    }
    page
}

/// Builds a Vorbis comment packet.
pub fn ogg_comment_packet(artist: &str, title: &str, album: &str) -> Vec<u8> {
    let vendor = b"stream-rip mock";
    let comments: Vec<String> = [("ARTIST", artist), ("TITLE", title), ("ALBUM", album)]
        .iter()
        .filter(|(_, value)| !value.is_empty())
        .map(|(key, value)| format!("{key}={value}"))
        .collect();

    let mut packet = b"\x03vorbis".to_vec();
    packet.extend_from_slice(&(vendor.len() as u32).to_le_bytes());
    packet.extend_from_slice(vendor);
    packet.extend_from_slice(&(comments.len() as u32).to_le_bytes());
    for comment in comments {
        packet.extend_from_slice(&(comment.len() as u32).to_le_bytes());
        packet.extend_from_slice(comment.as_bytes());
    }
    packet.push(1);
    packet
}

/// The three pages that open an Ogg Vorbis song: identification, comments
/// and one audio page.
pub fn ogg_song(artist: &str, title: &str, first_seq: u32) -> Vec<Vec<u8>> {
    vec![
        ogg_page(0x02, first_seq, &[b"\x01vorbis-identification".to_vec()]),
        ogg_page(0x00, first_seq + 1, &[ogg_comment_packet(artist, title, "")]),
        ogg_page(0x00, first_seq + 2, &[vec![0x55; 400]]),
    ]
}

/// An upstream stream body under construction.
///
/// Audio is appended with [`audio`](Self::audio); [`title`](Self::title)
/// changes the `StreamTitle` announced at the next metadata slot.
/// [`body`](Self::body) interleaves the metadata every `metaint` bytes the
/// way a Shoutcast server does.
///
/// # Example
///
/// ```
/// use stream_rip::source::mock::{mpeg_frames, MockStream};
///
/// let mut stream = MockStream::new(4096);
/// stream.title("Artist - First");
/// stream.audio(&mpeg_frames(100, 128, 0));
/// stream.title("Artist - Second");
/// stream.audio(&mpeg_frames(100, 128, 0));
///
/// let body = stream.body();
/// assert!(body.len() > stream.audio_len());
/// ```
#[derive(Debug, Clone)]
pub struct MockStream {
    metaint: usize,
    audio: Vec<u8>,
    titles: Vec<(usize, String)>,
}

impl MockStream {
    /// Creates an empty stream with metadata every `metaint` audio bytes.
    pub fn new(metaint: usize) -> Self {
        Self {
            metaint: metaint.max(1),
            audio: Vec::new(),
            titles: Vec::new(),
        }
    }

    /// Appends audio bytes.
    pub fn audio(&mut self, bytes: &[u8]) -> &mut Self {
        self.audio.extend_from_slice(bytes);
        self
    }

    /// Announces `raw` from the next metadata slot on.
    pub fn title(&mut self, raw: &str) -> &mut Self {
        self.titles.push((self.audio.len(), raw.to_string()));
        self
    }

    /// Audio bytes appended so far.
    pub fn audio_len(&self) -> usize {
        self.audio.len()
    }

    /// The metadata interval.
    pub fn metaint(&self) -> usize {
        self.metaint
    }

    /// The interleaved body. A title set at audio position `p` is sent in
    /// the first metadata slot at or after `p`; slots with nothing new carry
    /// a zero length byte.
    pub fn body(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.audio.len() + self.audio.len() / self.metaint + 64);
        let mut next_title = 0;
        for (slot, chunk) in self.audio.chunks(self.metaint).enumerate() {
            let slot_end = (slot + 1) * self.metaint;
            let mut announce = None;
            while let Some((pos, raw)) = self.titles.get(next_title) {
                if *pos > slot_end {
                    break;
                }
                announce = Some(raw);
                next_title += 1;
            }
            out.extend_from_slice(chunk);
            if chunk.len() < self.metaint {
                break;
            }
            match announce {
                Some(raw) => out.extend_from_slice(&compose_icy_block(raw, Codeset::Utf8)),
                None => out.push(0),
            }
        }
        out
    }
}

/// A loopback server that answers each connection with the next canned
/// response, then closes it.
///
/// Requests are recorded so tests can check what the client sent.
pub struct MockServer {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<String>>>,
    handle: Option<JoinHandle<()>>,
}

impl MockServer {
    /// Binds `127.0.0.1:0` and serves `responses` in order.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener can't be bound.
    pub fn start(responses: Vec<Vec<u8>>) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?;
        let requests = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&requests);

        let handle = std::thread::spawn(move || {
            for response in responses {
                let Ok((mut socket, _)) = listener.accept() else {
                    return;
                };
                let request = read_request(&mut socket);
                if let Ok(mut requests) = recorded.lock() {
                    requests.push(request);
                }
                let _ = socket.write_all(&response);
                let _ = socket.flush();
            }
        });

        Ok(Self {
            addr,
            requests,
            handle: Some(handle),
        })
    }

    /// Serves a single `ICY 200 OK` response with the given extra headers
    /// and body.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener can't be bound.
    pub fn icy(headers: &[(&str, &str)], body: Vec<u8>) -> std::io::Result<Self> {
        Self::start(vec![icy_response(headers, &body)])
    }

    /// Address the server listens on.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// `http://` URL for `path` on this server.
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<String> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }

    /// Waits until every response has been served.
    pub fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// `ICY 200 OK` followed by `headers`, a blank line and `body`.
pub fn icy_response(headers: &[(&str, &str)], body: &[u8]) -> Vec<u8> {
    let mut response = b"ICY 200 OK\r\n".to_vec();
    for (name, value) in headers {
        response.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
    }
    response.extend_from_slice(b"\r\n");
    response.extend_from_slice(body);
    response
}

fn read_request(socket: &mut std::net::TcpStream) -> String {
    let mut request = Vec::new();
    let mut buf = [0u8; 512];
    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
        match socket.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => request.extend_from_slice(&buf[..n]),
        }
    }
    String::from_utf8_lossy(&request).into_owned()
}

/// [`VolumeDecoder`] that reports each frame's main-data fill byte as its
/// loudness, so tests can place silence with [`mpeg_frame`]'s `fill`.
#[derive(Debug, Default)]
pub struct FillVolumeDecoder;

impl VolumeDecoder for FillVolumeDecoder {
    fn volume_curve(&mut self, window: &[u8]) -> Result<Vec<VolumeSample>, DecodeError> {
        let samples: Vec<VolumeSample> = mpeg::frames(window)
            .map(|frame| VolumeSample {
                offset: frame.offset,
                len: frame.header.frame_len,
                duration_ms: frame.header.duration_ms(),
                rms: f64::from(window[frame.offset + FRAME_PREFIX]) / 255.0,
            })
            .collect();
        if samples.is_empty() {
            return Err(DecodeError::NoFrames);
        }
        Ok(samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::parse_icy_payload;

    #[test]
    fn test_mpeg_frame_lengths() {
        assert_eq!(mpeg_frame(128, 0).len(), 417);
        assert_eq!(mpeg_frame(192, 0).len(), 626);
        assert_eq!(mpeg_frames(3, 64, 9).len(), 3 * 208);
    }

    #[test]
    fn test_ogg_page_lacing() {
        let page = ogg_page(0x02, 1, &[vec![1u8; 600]]);
        // 600 = 255 + 255 + 90
        assert_eq!(page[26], 3);
        assert_eq!(&page[27..30], &[255, 255, 90]);
        assert_eq!(page.len(), 27 + 3 + 600);
        assert_eq!(page[5], 0x02);
    }

    #[test]
    fn test_stream_interleaves_metadata() {
        let mut stream = MockStream::new(100);
        stream.title("A - B");
        stream.audio(&[7u8; 250]);

        let body = stream.body();
        assert_eq!(&body[..100], &[7u8; 100][..]);
        let len = usize::from(body[100]) * 16;
        let payload = &body[101..101 + len];
        assert_eq!(parse_icy_payload(payload, Codeset::Utf8).unwrap(), "A - B");
        // second slot carries nothing new
        assert_eq!(body[101 + len + 100], 0);
        assert_eq!(body.len(), 250 + 1 + len + 1);
    }

    #[test]
    fn test_fill_decoder_reads_fill() {
        let window = [mpeg_frame(128, 0), mpeg_frame(128, 255)].concat();
        let curve = FillVolumeDecoder.volume_curve(&window).unwrap();
        assert_eq!(curve.len(), 2);
        assert_eq!(curve[0].rms, 0.0);
        assert_eq!(curve[1].rms, 1.0);
    }

    #[test]
    fn test_mock_server_records_request() {
        let server = MockServer::icy(&[("icy-name", "Test")], b"abc".to_vec()).unwrap();
        let mut socket = std::net::TcpStream::connect(server.addr()).unwrap();
        socket.write_all(b"GET / HTTP/1.0\r\n\r\n").unwrap();
        let mut response = Vec::new();
        socket.read_to_end(&mut response).unwrap();

        assert!(response.starts_with(b"ICY 200 OK\r\n"));
        assert!(response.ends_with(b"\r\n\r\nabc"));
        let requests = server.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].starts_with("GET / HTTP/1.0"));
    }
}
