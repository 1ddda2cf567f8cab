use once_cell::sync::Lazy;
use regex::Regex;

use crate::server::error::{AppResult, Error};

// keep the slug plus an optional numeric ?ep= marker, drop everything else.
// clients have a habit of tacking extra query junk onto episode ids
static EPISODE_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([^?]+)(\?ep=(\d+))?").expect("episode id regex is valid"));

/// normalize a raw `animeEpisodeId` query value into `base[?ep=digits]`.
///
/// the value is url-decoded exactly once before matching, so both
/// `steinsgate-3%3Fep%3D230` and `steinsgate-3?ep=230` land on the same key.
pub fn sanitize_episode_id(raw: &str) -> AppResult<String> {
    let decoded = urlencoding::decode(raw)
        .map_err(|_| Error::BadRequest("animeEpisodeId is not valid url encoding".to_string()))?;

    let trimmed = decoded.trim();
    if trimmed.is_empty() {
        return Err(Error::BadRequest("animeEpisodeId must not be empty".to_string()));
    }

    let captures = EPISODE_ID_RE
        .captures(trimmed)
        .ok_or_else(|| Error::BadRequest("animeEpisodeId is malformed".to_string()))?;

    let base = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
    if base.is_empty() {
        return Err(Error::BadRequest("animeEpisodeId is malformed".to_string()));
    }

    match captures.get(3) {
        Some(ep) => Ok(format!("{}?ep={}", base, ep.as_str())),
        None => Ok(base.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_id_passes_through() {
        assert_eq!(sanitize_episode_id("steinsgate-3").unwrap(), "steinsgate-3");
    }

    #[test]
    fn ep_marker_is_kept() {
        assert_eq!(
            sanitize_episode_id("steinsgate-3?ep=230").unwrap(),
            "steinsgate-3?ep=230"
        );
    }

    #[test]
    fn encoded_input_is_decoded_once() {
        assert_eq!(
            sanitize_episode_id("steinsgate-3%3Fep%3D230").unwrap(),
            "steinsgate-3?ep=230"
        );
    }

    #[test]
    fn trailing_query_junk_is_discarded() {
        assert_eq!(
            sanitize_episode_id("steinsgate-3?ep=230&foo=bar").unwrap(),
            "steinsgate-3?ep=230"
        );
        // non-numeric ep is junk too
        assert_eq!(
            sanitize_episode_id("steinsgate-3?ep=abc").unwrap(),
            "steinsgate-3"
        );
    }

    #[test]
    fn empty_input_is_rejected() {
        assert!(sanitize_episode_id("").is_err());
        assert!(sanitize_episode_id("   ").is_err());
        assert!(sanitize_episode_id("?ep=1").is_err());
    }
}
