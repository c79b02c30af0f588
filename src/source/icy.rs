//! Inline metadata demultiplexer.
//!
//! Shoutcast-style servers insert a metadata frame after every `metaint`
//! audio bytes: one length byte `n`, then `16 * n` bytes of payload. The
//! [`IcyReader`] strips those frames and hands back audio and titles
//! separately.

use std::io::Read;

use crate::metadata::stream_title_bytes;
use crate::{ConnectionError, RipError};

/// Invalid metadata frames tolerated in a row before giving up.
pub const MAX_INVALID_FRAMES: u32 = 8;

/// One unit read from the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IcyPacket {
    /// `n` audio bytes were written to the caller's buffer.
    Audio(usize),
    /// A metadata frame carried this `StreamTitle` value, undecoded.
    Title(Vec<u8>),
}

/// Splits an upstream body into audio and metadata.
pub struct IcyReader<R> {
    inner: R,
    metaint: Option<usize>,
    until_meta: usize,
    invalid_run: u32,
}

impl<R: Read> IcyReader<R> {
    /// Wraps `inner`. Without `metaint` every byte is audio.
    pub fn new(inner: R, metaint: Option<usize>) -> Self {
        Self {
            inner,
            metaint,
            until_meta: metaint.unwrap_or(0),
            invalid_run: 0,
        }
    }

    /// Reads the next packet into `buf`.
    ///
    /// Audio reads never cross a metadata frame. Empty metadata frames are
    /// skipped; frames without a usable title are discarded.
    ///
    /// # Errors
    ///
    /// Returns a [`ConnectionError`] when the read fails or the server
    /// closes the connection, and [`RipError::NoTrackInfo`] after more than
    /// [`MAX_INVALID_FRAMES`] consecutive invalid frames.
    pub fn next_packet(&mut self, buf: &mut [u8]) -> Result<IcyPacket, RipError> {
        loop {
            let Some(metaint) = self.metaint else {
                return self.read_audio(buf, buf.len());
            };
            if self.until_meta > 0 {
                let limit = self.until_meta.min(buf.len());
                return self.read_audio(buf, limit);
            }

            self.until_meta = metaint;
            let mut len = [0u8; 1];
            self.read_exact(&mut len)?;
            if len[0] == 0 {
                continue;
            }
            let mut payload = vec![0u8; usize::from(len[0]) * 16];
            self.read_exact(&mut payload)?;

            match stream_title_bytes(&payload) {
                Ok(title) => {
                    self.invalid_run = 0;
                    return Ok(IcyPacket::Title(title.to_vec()));
                }
                Err(e) => {
                    self.invalid_run += 1;
                    tracing::debug!(error = %e, run = self.invalid_run, "discarding metadata frame");
                    if self.invalid_run > MAX_INVALID_FRAMES {
                        return Err(RipError::NoTrackInfo);
                    }
                }
            }
        }
    }

    fn read_audio(&mut self, buf: &mut [u8], limit: usize) -> Result<IcyPacket, RipError> {
        loop {
            match self.inner.read(&mut buf[..limit]) {
                Ok(0) if limit > 0 => return Err(ConnectionError::Closed.into()),
                Ok(n) => {
                    self.until_meta = self.until_meta.saturating_sub(n);
                    return Ok(IcyPacket::Audio(n));
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => return Err(ConnectionError::from_recv(e).into()),
            }
        }
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), RipError> {
        self.inner
            .read_exact(buf)
            .map_err(|e| ConnectionError::from_recv(e).into())
    }
}
