use url::Url;

/// Plain-text playlist formats a station URL may point at instead of audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaylistKind {
    M3u,
    Pls,
    Asf,
}

impl PlaylistKind {
    #[must_use]
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let mime = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match mime.as_str() {
            "audio/x-mpegurl" | "audio/mpegurl" => Some(Self::M3u),
            "audio/x-scpls" => Some(Self::Pls),
            "video/x-ms-asf" | "application/xspf+xml" => Some(Self::Asf),
            _ => None,
        }
    }
}

/// Extracts the first playable absolute URL, scanning lines from the end of
/// the body. Stations commonly list mirrors in ascending quality, the last
/// entries being the most current.
#[must_use]
pub fn first_playable_url(kind: PlaylistKind, body: &str) -> Option<Url> {
    body.lines()
        .rev()
        .find_map(|line| extract_url(kind, line))
        .and_then(|candidate| Url::parse(candidate).ok())
}

fn extract_url(kind: PlaylistKind, line: &str) -> Option<&str> {
    match kind {
        PlaylistKind::M3u => is_http(line).then_some(line.trim()),
        PlaylistKind::Pls => {
            let (_, value) = line.split_once('=')?;
            is_http(value).then_some(value.trim())
        }
        PlaylistKind::Asf => {
            let start = line.find("<REF HREF=\"")? + "<REF HREF=\"".len();
            let rest = &line[start..];
            let value = rest.split('"').next()?;
            is_http(value).then_some(value)
        }
    }
}

fn is_http(value: &str) -> bool {
    let value = value.trim();
    value.starts_with("http://") || value.starts_with("https://")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_types() {
        assert_eq!(
            PlaylistKind::from_content_type("audio/x-mpegurl"),
            Some(PlaylistKind::M3u)
        );
        assert_eq!(
            PlaylistKind::from_content_type("audio/x-scpls; charset=UTF-8"),
            Some(PlaylistKind::Pls)
        );
        assert_eq!(
            PlaylistKind::from_content_type("video/x-ms-asf"),
            Some(PlaylistKind::Asf)
        );
        assert_eq!(PlaylistKind::from_content_type("audio/mpeg"), None);
    }

    #[test]
    fn m3u_takes_last_http_line() {
        let body = "#EXTM3U\nhttp://first.example/stream\nhttp://second.example/stream\n";
        let url = first_playable_url(PlaylistKind::M3u, body).unwrap();
        assert_eq!(url.as_str(), "http://second.example/stream");
    }

    #[test]
    fn pls_parses_key_value_lines() {
        let body = "[playlist]\nNumberOfEntries=1\nFile1=http://host.example/live.mp3\nTitle1=Radio\n";
        let url = first_playable_url(PlaylistKind::Pls, body).unwrap();
        assert_eq!(url.as_str(), "http://host.example/live.mp3");
    }

    #[test]
    fn asf_parses_ref_href() {
        let body = "<ASX VERSION=\"3.0\">\n<ENTRY><REF HREF=\"http://host.example/wma\"/></ENTRY>\n</ASX>\n";
        let url = first_playable_url(PlaylistKind::Asf, body).unwrap();
        assert_eq!(url.as_str(), "http://host.example/wma");
    }

    #[test]
    fn unparseable_playlist_yields_none() {
        assert!(first_playable_url(PlaylistKind::M3u, "#EXTM3U\n# nothing here\n").is_none());
        assert!(first_playable_url(PlaylistKind::Pls, "[playlist]\nVersion=2\n").is_none());
    }
}
