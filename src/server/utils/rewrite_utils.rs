use std::sync::Arc;

use once_cell::sync::Lazy;
use quick_xml::events::{BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use regex::Regex;
use url::Url;

use crate::server::error::{AppResult, Error};
use crate::server::utils::classify_utils::{self, ResourceKind};
use crate::server::utils::signature_utils::HandleStore;

/// turns an absolute origin url into the url a player should request instead.
/// two strategies exist, pass-through and signed handles, the deployment
/// picks one and the rewriters don't care which
pub trait ProxyUrlMinter: Send + Sync {
    fn mint(&self, absolute_url: &str, kind: ResourceKind) -> String;
}

/// plain `?url=` pass-through, stateless but leaks origin urls to clients
pub struct PassThroughMinter {
    pub referer: Option<String>,
}

impl ProxyUrlMinter for PassThroughMinter {
    fn mint(&self, absolute_url: &str, _kind: ResourceKind) -> String {
        match &self.referer {
            Some(referer) => format!(
                "/m3u8?url={}&ref={}",
                urlencoding::encode(absolute_url),
                urlencoding::encode(referer)
            ),
            None => format!("/m3u8?url={}", urlencoding::encode(absolute_url)),
        }
    }
}

/// opaque signed handles, the origin url stays on our side of the fence
pub struct SignedHandleMinter {
    pub handles: Arc<HandleStore>,
    pub referer: Option<String>,
}

impl ProxyUrlMinter for SignedHandleMinter {
    fn mint(&self, absolute_url: &str, kind: ResourceKind) -> String {
        let handle = self
            .handles
            .mint(absolute_url, self.referer.as_deref(), kind);
        format!("/m3u8?h={}", urlencoding::encode(&handle))
    }
}

/// resolve a reference found inside a manifest against the manifest's own url.
///
/// absolute urls parse as-is, everything else (protocol-relative,
/// root-relative, plain relative) goes through rfc 3986 resolution on the base.
pub fn resolve_reference(base: &Url, reference: &str) -> Option<Url> {
    if reference.starts_with("http://") || reference.starts_with("https://") {
        return Url::parse(reference).ok();
    }
    base.join(reference).ok()
}

fn mint_resolved(base: &Url, reference: &str, minter: &dyn ProxyUrlMinter) -> Option<String> {
    let resolved = resolve_reference(base, reference)?;
    let kind = classify_utils::classify(&resolved, None);
    Some(minter.mint(resolved.as_str(), kind))
}

/// rewrite an m3u8 playlist so every reference routes back through the proxy.
///
/// line oriented: blank lines and directives are preserved byte for byte,
/// except directives carrying a `URI="…"` attribute (EXT-X-KEY, EXT-X-MAP,
/// EXT-X-MEDIA, session keys) whose quoted value is substituted in place.
/// every other line is a uri reference and becomes a proxy url. line count
/// and line endings survive the pass untouched.
pub fn rewrite_m3u8(
    body: &str,
    playlist_url: &Url,
    minter: &dyn ProxyUrlMinter,
) -> AppResult<String> {
    if body.trim().is_empty() {
        return Err(Error::EmptyUpstream);
    }

    let rewritten: Vec<String> = body
        .split('\n')
        .map(|line| {
            // carriage returns ride along with the line when splitting on \n
            let (content, ending) = match line.strip_suffix('\r') {
                Some(stripped) => (stripped, "\r"),
                None => (line, ""),
            };

            if content.trim().is_empty() {
                return line.to_string();
            }

            if content.starts_with('#') {
                if content.contains("URI=\"") {
                    return format!(
                        "{}{}",
                        rewrite_directive_uris(content, playlist_url, minter),
                        ending
                    );
                }
                return line.to_string();
            }

            match mint_resolved(playlist_url, content.trim(), minter) {
                Some(minted) => format!("{}{}", minted, ending),
                // unresolvable garbage stays as-is rather than breaking playback
                None => line.to_string(),
            }
        })
        .collect();

    Ok(rewritten.join("\n"))
}

/// substitute every `URI="…"` value inside a single directive line
fn rewrite_directive_uris(line: &str, base: &Url, minter: &dyn ProxyUrlMinter) -> String {
    let mut result = String::with_capacity(line.len() + 64);
    let mut rest = line;

    while let Some(start) = rest.find("URI=\"") {
        let value_start = start + 5;
        let Some(value_len) = rest[value_start..].find('"') else {
            // unterminated quote, bail and keep the tail verbatim
            break;
        };

        let value = &rest[value_start..value_start + value_len];
        result.push_str(&rest[..value_start]);
        match mint_resolved(base, value, minter) {
            Some(minted) => result.push_str(&minted),
            None => result.push_str(value),
        }
        result.push('"');

        rest = &rest[value_start + value_len + 1..];
    }

    result.push_str(rest);
    result
}

static VTT_URL_RE: Lazy<Regex> = Lazy::new(|| {
    // bare absolute urls plus ./ and ../ relative references. timing cues and
    // styling never match, which is exactly the point
    Regex::new(r#"(https?://[^\s"'<>]+|\.{1,2}/[^\s"'<>]+)"#).expect("vtt url regex is valid")
});

/// rewrite bare url references inside a webvtt file, preserving cues,
/// styling blocks and whitespace. line count is untouched since the regex
/// can't cross a newline
pub fn rewrite_vtt(body: &str, base: &Url, minter: &dyn ProxyUrlMinter) -> AppResult<String> {
    if body.trim().is_empty() {
        return Err(Error::EmptyUpstream);
    }

    let rewritten = VTT_URL_RE.replace_all(body, |caps: &regex::Captures<'_>| {
        let reference = &caps[0];
        mint_resolved(base, reference, minter).unwrap_or_else(|| reference.to_string())
    });

    Ok(rewritten.into_owned())
}

// dash segment templates expand client-side, so `$Number$` and friends must
// come out of the rewrite character for character
fn restore_dash_templates(minted: String) -> String {
    minted.replace("%24", "$")
}

const MPD_URL_ATTRS: [&[u8]; 4] = [b"sourceURL", b"media", b"initialization", b"xlink:href"];

/// rewrite url-bearing parts of a dash mpd manifest.
///
/// an attribute-aware pass over the xml: `<BaseURL>` text nodes plus
/// `sourceURL=` / `media=` / `initialization=` attributes are resolved and
/// proxied, everything else is written back out unchanged. template
/// placeholders like `$Number$` and `$Time$` survive verbatim.
pub fn rewrite_mpd(body: &str, manifest_url: &Url, minter: &dyn ProxyUrlMinter) -> AppResult<String> {
    if body.trim().is_empty() {
        return Err(Error::EmptyUpstream);
    }

    let mut reader = Reader::from_str(body);
    let mut writer = Writer::new(Vec::new());
    let mut in_base_url = false;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| Error::BadGateway(format!("manifest is not valid xml: {e}")))?;

        match event {
            Event::Start(start) => {
                if start.local_name().as_ref() == b"BaseURL" {
                    in_base_url = true;
                }
                let rewritten = rewrite_mpd_element(&start, manifest_url, minter)?;
                writer
                    .write_event(Event::Start(rewritten))
                    .map_err(xml_write_error)?;
            }
            Event::Empty(empty) => {
                let rewritten = rewrite_mpd_element(&empty, manifest_url, minter)?;
                writer
                    .write_event(Event::Empty(rewritten))
                    .map_err(xml_write_error)?;
            }
            Event::Text(text) if in_base_url => {
                let raw = text
                    .unescape()
                    .map_err(|e| Error::BadGateway(format!("bad text node in manifest: {e}")))?;
                let trimmed = raw.trim();
                // pretty-printed manifests put whitespace-only text nodes here
                let replacement = if trimmed.is_empty() {
                    raw.to_string()
                } else {
                    match mint_resolved(manifest_url, trimmed, minter) {
                        Some(minted) => restore_dash_templates(minted),
                        None => raw.to_string(),
                    }
                };
                writer
                    .write_event(Event::Text(BytesText::new(&replacement)))
                    .map_err(xml_write_error)?;
            }
            Event::End(end) => {
                if end.local_name().as_ref() == b"BaseURL" {
                    in_base_url = false;
                }
                writer.write_event(Event::End(end)).map_err(xml_write_error)?;
            }
            Event::Eof => break,
            other => {
                writer.write_event(other).map_err(xml_write_error)?;
            }
        }
    }

    String::from_utf8(writer.into_inner())
        .map_err(|_| Error::InternalServerErrorWithContext("rewritten mpd is not utf-8".to_string()))
}

fn rewrite_mpd_element<'a>(
    element: &BytesStart<'a>,
    manifest_url: &Url,
    minter: &dyn ProxyUrlMinter,
) -> AppResult<BytesStart<'static>> {
    let name = String::from_utf8_lossy(element.name().as_ref()).into_owned();
    let mut rewritten = BytesStart::new(name);

    for attr in element.attributes().with_checks(false) {
        let attr =
            attr.map_err(|e| Error::BadGateway(format!("bad attribute in manifest: {e}")))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|e| Error::BadGateway(format!("bad attribute value in manifest: {e}")))?;

        if MPD_URL_ATTRS.contains(&attr.key.as_ref()) && !value.trim().is_empty() {
            let replacement = match mint_resolved(manifest_url, &value, minter) {
                Some(minted) => restore_dash_templates(minted),
                None => value.into_owned(),
            };
            rewritten.push_attribute((key.as_str(), replacement.as_str()));
        } else {
            rewritten.push_attribute((key.as_str(), value.as_ref()));
        }
    }

    Ok(rewritten)
}

fn xml_write_error<E: std::fmt::Display>(e: E) -> Error {
    Error::InternalServerErrorWithContext(format!("failed to serialize manifest: {e}"))
}
