//! Character set decoding for upstream metadata.
//!
//! Decoding is a pure function of the bytes and an explicit [`Codeset`];
//! nothing here touches process-wide locale state.

use serde::Deserialize;

/// Character set used to interpret metadata bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codeset {
    /// UTF-8 when the bytes are valid UTF-8, otherwise ISO-8859-1.
    #[default]
    Auto,
    /// UTF-8, replacing invalid sequences.
    Utf8,
    /// ISO-8859-1.
    Latin1,
}

/// Decodes `bytes` into a `String` using `codeset`.
pub fn decode(bytes: &[u8], codeset: Codeset) -> String {
    match codeset {
        Codeset::Auto => match std::str::from_utf8(bytes) {
            Ok(s) => s.to_string(),
            Err(_) => latin1(bytes),
        },
        Codeset::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
        Codeset::Latin1 => latin1(bytes),
    }
}

/// Encodes `text` for the wire using `codeset`.
///
/// Latin-1 output replaces characters outside the range with `?`.
pub fn encode(text: &str, codeset: Codeset) -> Vec<u8> {
    match codeset {
        Codeset::Latin1 => text
            .chars()
            .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
            .collect(),
        Codeset::Auto | Codeset::Utf8 => text.as_bytes().to_vec(),
    }
}

fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auto_prefers_utf8() {
        assert_eq!(decode("Björk".as_bytes(), Codeset::Auto), "Björk");
    }

    #[test]
    fn test_auto_falls_back_to_latin1() {
        assert_eq!(decode(b"Bj\xf6rk", Codeset::Auto), "Björk");
    }

    #[test]
    fn test_utf8_is_lossy() {
        assert_eq!(decode(b"a\xffb", Codeset::Utf8), "a\u{fffd}b");
    }

    #[test]
    fn test_latin1_encode() {
        assert_eq!(encode("Björk", Codeset::Latin1), b"Bj\xf6rk".to_vec());
        assert_eq!(encode("日本", Codeset::Latin1), b"??".to_vec());
        assert_eq!(encode("Björk", Codeset::Auto), "Björk".as_bytes().to_vec());
    }
}
