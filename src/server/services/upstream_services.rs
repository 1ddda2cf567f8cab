use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mockall::automock;
use reqwest::header;
use tracing::{error, warn};
use url::Url;

use crate::server::error::{AppResult, Error};
use crate::server::utils::classify_utils::ResourceKind;

// deadlines per resource shape. text has to arrive fast or the player stalls,
// binary gets a bit more room, nothing is allowed past the ceiling
const TEXT_DEADLINE: Duration = Duration::from_secs(8);
const BINARY_DEADLINE: Duration = Duration::from_secs(12);
const ABSOLUTE_CEILING: Duration = Duration::from_secs(30);

// playlists get retried on timeout, a segment that timed out is already
// useless to the player by the time a retry would land
const PLAYLIST_TIMEOUT_RETRIES: u32 = 2;
const RETRY_BACKOFF_MS: u64 = 200;

const DESKTOP_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

pub type DynUpstreamService = Arc<dyn UpstreamServiceTrait + Send + Sync>;

#[automock]
#[async_trait]
pub trait UpstreamServiceTrait {
    /// single fetch with browser-shaped headers and an optional forwarded Range
    async fn fetch<'a>(
        &self,
        url: &str,
        referer: Option<&'a str>,
        range: Option<&'a str>,
        kind: ResourceKind,
    ) -> AppResult<reqwest::Response>;

    /// fetch a text resource fully, retrying playlist timeouts.
    /// returns the body and the upstream content type
    async fn fetch_text<'a>(
        &self,
        url: &str,
        referer: Option<&'a str>,
        kind: ResourceKind,
    ) -> AppResult<(String, Option<String>)>;
}

pub struct UpstreamService {
    http: reqwest::Client,
}

impl UpstreamService {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    fn deadline(kind: ResourceKind) -> Duration {
        let base = if kind.is_text_rewritable() {
            TEXT_DEADLINE
        } else {
            BINARY_DEADLINE
        };
        base.min(ABSOLUTE_CEILING)
    }

    fn build_request(
        &self,
        url: &str,
        referer: Option<&str>,
        range: Option<&str>,
        kind: ResourceKind,
    ) -> reqwest::RequestBuilder {
        // identity encoding on purpose, a compressed body would wreck byte ranges
        let mut request = self
            .http
            .get(url)
            .timeout(Self::deadline(kind))
            .header(header::USER_AGENT, DESKTOP_USER_AGENT)
            .header(header::ACCEPT, "*/*")
            .header(header::ACCEPT_LANGUAGE, "en-US,en;q=0.9")
            .header(header::ACCEPT_ENCODING, "identity");

        if let Some(referer) = referer {
            request = request.header(header::REFERER, referer);
            // origins that check Referer usually check Origin too
            if let Some(origin) = origin_of(referer) {
                request = request.header(header::ORIGIN, origin);
            }
        }

        if let Some(range) = range {
            request = request.header(header::RANGE, range);
        }

        request
    }

    async fn send(
        &self,
        url: &str,
        referer: Option<&str>,
        range: Option<&str>,
        kind: ResourceKind,
    ) -> AppResult<reqwest::Response> {
        let response = self
            .build_request(url, referer, range, kind)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout(format!("origin did not answer in time: {url}"))
                } else if e.is_redirect() {
                    // our redirect policy tripped, most likely a hop into blocked space
                    Error::Forbidden("Forbidden host".to_string())
                } else {
                    error!("origin fetch failed for {}: {}", url, e);
                    Error::BadGateway(format!("origin fetch failed: {e}"))
                }
            })?;

        let status = response.status();
        if status.is_success() || status.is_redirection() {
            Ok(response)
        } else {
            Err(Error::UpstreamStatus(status.as_u16()))
        }
    }
}

/// scheme+host of a referer url, for the Origin header
fn origin_of(referer: &str) -> Option<String> {
    let url = Url::parse(referer).ok()?;
    let host = url.host_str()?;
    match url.port() {
        Some(port) => Some(format!("{}://{}:{}", url.scheme(), host, port)),
        None => Some(format!("{}://{}", url.scheme(), host)),
    }
}

#[async_trait]
impl UpstreamServiceTrait for UpstreamService {
    async fn fetch<'a>(
        &self,
        url: &str,
        referer: Option<&'a str>,
        range: Option<&'a str>,
        kind: ResourceKind,
    ) -> AppResult<reqwest::Response> {
        self.send(url, referer, range, kind).await
    }

    async fn fetch_text<'a>(
        &self,
        url: &str,
        referer: Option<&'a str>,
        kind: ResourceKind,
    ) -> AppResult<(String, Option<String>)> {
        let attempts = if kind == ResourceKind::PlaylistM3u8 {
            1 + PLAYLIST_TIMEOUT_RETRIES
        } else {
            1
        };

        let mut last_error = Error::InternalServerError;

        for attempt in 0..attempts {
            if attempt > 0 {
                let backoff = RETRY_BACKOFF_MS * (1 << (attempt - 1));
                warn!(
                    "retrying playlist fetch in {}ms ({}/{}): {}",
                    backoff, attempt, attempts - 1, url
                );
                tokio::time::sleep(Duration::from_millis(backoff)).await;
            }

            match self.send(url, referer, None, kind).await {
                Ok(response) => {
                    let content_type = response
                        .headers()
                        .get(header::CONTENT_TYPE)
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);

                    let body = response.text().await.map_err(|e| {
                        Error::BadGateway(format!("failed to read origin body: {e}"))
                    })?;

                    return Ok((body, content_type));
                }
                // only a timeout earns another attempt
                Err(Error::Timeout(msg)) => last_error = Error::Timeout(msg),
                Err(other) => return Err(other),
            }
        }

        Err(last_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_is_scheme_plus_host() {
        assert_eq!(
            origin_of("https://megacloud.club/embed/abc?k=1").as_deref(),
            Some("https://megacloud.club")
        );
        assert_eq!(
            origin_of("http://player.example:8080/watch").as_deref(),
            Some("http://player.example:8080")
        );
        assert_eq!(origin_of("not a url"), None);
    }

    #[test]
    fn deadlines_scale_with_kind() {
        assert_eq!(UpstreamService::deadline(ResourceKind::PlaylistM3u8), TEXT_DEADLINE);
        assert_eq!(UpstreamService::deadline(ResourceKind::SubtitleVtt), TEXT_DEADLINE);
        assert_eq!(UpstreamService::deadline(ResourceKind::MediaSegment), BINARY_DEADLINE);
        assert_eq!(UpstreamService::deadline(ResourceKind::Opaque), BINARY_DEADLINE);
    }
}
