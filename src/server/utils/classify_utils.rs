use url::Url;

/// what an origin url points at, as far as the proxy cares.
/// text kinds get their bodies rewritten, binary kinds get cached or piped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    PlaylistM3u8,
    SubtitleVtt,
    ManifestMpd,
    MediaSegment,
    Image,
    Opaque,
}

impl ResourceKind {
    pub fn is_text_rewritable(self) -> bool {
        matches!(
            self,
            ResourceKind::PlaylistM3u8 | ResourceKind::SubtitleVtt | ResourceKind::ManifestMpd
        )
    }

    /// binary kinds we're willing to hold in the cache tiers
    pub fn is_cacheable_binary(self) -> bool {
        matches!(self, ResourceKind::MediaSegment | ResourceKind::Image)
    }

    /// short tag mixed into handle signatures
    pub fn as_tag(self) -> &'static str {
        match self {
            ResourceKind::PlaylistM3u8 => "m3u8",
            ResourceKind::SubtitleVtt => "vtt",
            ResourceKind::ManifestMpd => "mpd",
            ResourceKind::MediaSegment => "seg",
            ResourceKind::Image => "img",
            ResourceKind::Opaque => "bin",
        }
    }
}

/// classify an origin url, suffix first and content-type second.
///
/// suffix wins because several streaming hosts label playlists as
/// application/octet-stream, the path is the more honest signal. total and
/// side-effect free, anything unrecognized lands on [`ResourceKind::Opaque`].
pub fn classify(url: &Url, content_type: Option<&str>) -> ResourceKind {
    if let Some(kind) = classify_by_suffix(url.path()) {
        return kind;
    }

    if let Some(ct) = content_type {
        if let Some(kind) = classify_by_content_type(ct) {
            return kind;
        }
    }

    ResourceKind::Opaque
}

fn classify_by_suffix(path: &str) -> Option<ResourceKind> {
    let lower = path.to_ascii_lowercase();
    let suffix = lower.rsplit('.').next()?;

    match suffix {
        "m3u8" | "m3u" => Some(ResourceKind::PlaylistM3u8),
        "vtt" | "srt" => Some(ResourceKind::SubtitleVtt),
        "mpd" => Some(ResourceKind::ManifestMpd),
        "ts" | "m4s" | "mp4" | "aac" | "m4a" | "mp3" | "key" => Some(ResourceKind::MediaSegment),
        "jpg" | "jpeg" | "png" | "gif" | "webp" | "ico" => Some(ResourceKind::Image),
        _ => None,
    }
}

fn classify_by_content_type(content_type: &str) -> Option<ResourceKind> {
    let ct = content_type.to_ascii_lowercase();

    if ct.contains("mpegurl") {
        return Some(ResourceKind::PlaylistM3u8);
    }
    if ct.starts_with("text/vtt") {
        return Some(ResourceKind::SubtitleVtt);
    }
    if ct.contains("dash+xml") || ct.starts_with("application/xml") {
        return Some(ResourceKind::ManifestMpd);
    }
    if ct.starts_with("video/") || ct.starts_with("audio/") {
        return Some(ResourceKind::MediaSegment);
    }
    if ct.starts_with("image/") {
        return Some(ResourceKind::Image);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(input: &str) -> Url {
        Url::parse(input).expect("test urls should be valid")
    }

    #[test]
    fn suffix_wins_over_content_type() {
        // hosts love serving playlists as octet-stream
        let kind = classify(
            &url("https://cdn.example/live/index.m3u8"),
            Some("application/octet-stream"),
        );
        assert_eq!(kind, ResourceKind::PlaylistM3u8);
    }

    #[test]
    fn content_type_used_when_suffix_unknown() {
        for (ct, expected) in [
            ("application/vnd.apple.mpegurl", ResourceKind::PlaylistM3u8),
            ("application/x-mpegurl", ResourceKind::PlaylistM3u8),
            ("text/vtt", ResourceKind::SubtitleVtt),
            ("application/dash+xml", ResourceKind::ManifestMpd),
            ("video/mp2t", ResourceKind::MediaSegment),
            ("image/png", ResourceKind::Image),
        ] {
            let kind = classify(&url("https://cdn.example/stream"), Some(ct));
            assert_eq!(kind, expected, "content type {ct}");
        }
    }

    #[test]
    fn query_string_does_not_confuse_suffix() {
        let kind = classify(&url("https://cdn.example/seg-001.ts?token=abc"), None);
        assert_eq!(kind, ResourceKind::MediaSegment);
    }

    #[test]
    fn unknown_everything_is_opaque() {
        assert_eq!(classify(&url("https://cdn.example/stream"), None), ResourceKind::Opaque);
        assert_eq!(
            classify(&url("https://cdn.example/stream"), Some("application/wasm")),
            ResourceKind::Opaque
        );
    }

    #[test]
    fn text_rewritable_split_matches_kinds() {
        assert!(ResourceKind::PlaylistM3u8.is_text_rewritable());
        assert!(ResourceKind::SubtitleVtt.is_text_rewritable());
        assert!(ResourceKind::ManifestMpd.is_text_rewritable());
        assert!(!ResourceKind::MediaSegment.is_text_rewritable());
        assert!(!ResourceKind::Opaque.is_text_rewritable());
    }
}
