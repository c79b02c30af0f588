//! PLS and M3U playlist parsing.

use url::Url;

use crate::format::ContentKind;
use crate::ProtocolError;

/// Extracts the stream URLs of a playlist body, in the order they should
/// be tried.
///
/// Relative entries are resolved against `base`.
///
/// # Errors
///
/// Returns [`ProtocolError::InvalidPlaylist`] if the body has no usable
/// entries.
pub fn parse(kind: ContentKind, body: &str, base: &Url) -> Result<Vec<Url>, ProtocolError> {
    let entries = match kind {
        ContentKind::Pls => pls_entries(body),
        _ => m3u_entries(body),
    };

    let urls: Vec<Url> = entries
        .into_iter()
        .filter_map(|entry| base.join(entry.trim()).ok())
        .filter(|url| url.scheme() == "http")
        .collect();

    if urls.is_empty() {
        return Err(ProtocolError::InvalidPlaylist(format!(
            "no stream entries in {} bytes of {kind:?} playlist",
            body.len()
        )));
    }
    Ok(urls)
}

/// `FileN=` entries ordered by `N`.
fn pls_entries(body: &str) -> Vec<&str> {
    let mut entries: Vec<(u32, &str)> = body
        .lines()
        .filter_map(|line| {
            let (key, value) = line.trim().split_once('=')?;
            let index = key
                .get(..4)
                .filter(|prefix| prefix.eq_ignore_ascii_case("file"))
                .and(key.get(4..))?
                .parse()
                .ok()?;
            Some((index, value))
        })
        .filter(|(_, value)| !value.trim().is_empty())
        .collect();
    entries.sort_by_key(|(index, _)| *index);
    entries.into_iter().map(|(_, value)| value).collect()
}

/// Every non-empty line that isn't a comment or directive.
fn m3u_entries(body: &str) -> Vec<&str> {
    body.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("http://example.com/radio/listen.pls").unwrap()
    }

    #[test]
    fn test_pls_orders_by_index() {
        let body = "[playlist]\r\nNumberOfEntries=2\r\nFile2=http://b.example:8000/\r\n\
                    Title2=B\r\nFile1=http://a.example:8000/live\r\nTitle1=A\r\nVersion=2\r\n";
        let urls = parse(ContentKind::Pls, body, &base()).unwrap();
        assert_eq!(urls.len(), 2);
        assert_eq!(urls[0].as_str(), "http://a.example:8000/live");
        assert_eq!(urls[1].host_str(), Some("b.example"));
    }

    #[test]
    fn test_extended_m3u() {
        let body = "#EXTM3U\n#EXTINF:-1,Station\nhttp://s.example/stream\n\n#EXTINF:-1,Backup\nbackup.mp3\n";
        let urls = parse(ContentKind::M3u, body, &base()).unwrap();
        assert_eq!(urls[0].as_str(), "http://s.example/stream");
        assert_eq!(urls[1].as_str(), "http://example.com/radio/backup.mp3");
    }

    #[test]
    fn test_empty_playlist_is_invalid() {
        let result = parse(ContentKind::Pls, "[playlist]\nNumberOfEntries=0\n", &base());
        assert!(matches!(result, Err(ProtocolError::InvalidPlaylist(_))));

        let result = parse(ContentKind::M3u, "#EXTM3U\nhttps://secure.example/\n", &base());
        assert!(matches!(result, Err(ProtocolError::InvalidPlaylist(_))));
    }
}
