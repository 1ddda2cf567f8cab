use axum::{
    Extension, Router,
    body::Body,
    extract::Query,
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use base64::{Engine as _, engine::general_purpose::URL_SAFE};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::server::{
    error::{AppResult, Error},
    services::app_services::AppServices,
    services::proxy_cache_services::{CachedSegment, cache_key},
    utils::{
        classify_utils::{self, ResourceKind},
        rewrite_utils::{self, PassThroughMinter, ProxyUrlMinter, SignedHandleMinter},
        url_guard_utils,
    },
};

// segments up to this size get buffered and cached, anything bigger is piped
// straight through
const SEGMENT_BUFFER_LIMIT: usize = 10 * 1024 * 1024;

#[derive(Deserialize)]
struct ProxyQuery {
    url: Option<String>,
    #[serde(rename = "ref")]
    referer: Option<String>,
    // opaque signed handle, alternative to url+ref
    h: Option<String>,
}

pub struct ProxyController;

impl ProxyController {
    pub fn app() -> Router {
        Router::new().route("/m3u8", get(Self::proxy_get).options(Self::proxy_options))
    }

    async fn proxy_options() -> impl IntoResponse {
        StatusCode::NO_CONTENT
    }

    /// the whole pipeline: validate -> guard -> classify -> cache -> fetch ->
    /// rewrite or stream -> store -> respond
    async fn proxy_get(
        Extension(services): Extension<AppServices>,
        Query(params): Query<ProxyQuery>,
        headers: HeaderMap,
    ) -> AppResult<Response> {
        let (target_url, referer) = Self::resolve_target(&services, &params)?;

        let own_host = headers.get(header::HOST).and_then(|v| v.to_str().ok());
        let origin = url_guard_utils::validate_origin_url(&target_url, own_host)?;

        let kind = classify_utils::classify(&origin, None);
        debug!("proxying {:?}: {}", kind, origin);

        let range = headers
            .get(header::RANGE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        if kind.is_text_rewritable() {
            return Self::serve_text(&services, &origin, referer.as_deref(), kind).await;
        }

        // range requests bypass the cache entirely, partial bodies must never
        // be persisted under a full-body key
        if let Some(range) = range {
            let response = services
                .upstream
                .fetch(origin.as_str(), referer.as_deref(), Some(&range), kind)
                .await?;
            return Ok(Self::pipe_response(response));
        }

        if kind.is_cacheable_binary() {
            return Self::serve_binary(&services, &origin, referer.as_deref(), kind).await;
        }

        // opaque: fetch first, the content type may tell us it was a playlist
        // hiding behind a bare path all along
        let response = services
            .upstream
            .fetch(origin.as_str(), referer.as_deref(), None, kind)
            .await?;

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let reclassified = classify_utils::classify(&origin, content_type.as_deref());
        if reclassified.is_text_rewritable() {
            let body = response
                .text()
                .await
                .map_err(|e| Error::BadGateway(format!("failed to read origin body: {e}")))?;
            return Self::rewrite_and_store(
                &services,
                &origin,
                referer.as_deref(),
                reclassified,
                body,
            )
            .await;
        }

        Ok(Self::pipe_response(response))
    }

    /// figure out what to fetch: either a signed handle or a plain url param
    fn resolve_target(
        services: &AppServices,
        params: &ProxyQuery,
    ) -> AppResult<(String, Option<String>)> {
        if let Some(handle) = &params.h {
            let entry = services
                .handles
                .redeem(handle)
                .ok_or_else(|| Error::NotFound("unknown or expired handle".to_string()))?;
            return Ok((entry.origin_url, entry.referer));
        }

        let raw = params
            .url
            .as_deref()
            .ok_or_else(|| Error::BadRequest("missing url parameter".to_string()))?;

        let target = Self::decode_url(raw)?;

        let referer = params
            .referer
            .clone()
            .filter(|r| !r.is_empty())
            .or_else(|| services.config.default_referer.clone());

        Ok((target, referer))
    }

    // url params arrive either percent-encoded (axum already undid that) or
    // base64url without padding
    fn decode_url(url_param: &str) -> AppResult<String> {
        if url_param.starts_with("http://") || url_param.starts_with("https://") {
            return Ok(url_param.to_string());
        }

        let mut padded = url_param.to_string();
        while padded.len() % 4 != 0 {
            padded.push('=');
        }

        URL_SAFE
            .decode(&padded)
            .map_err(|_| Error::BadRequest("invalid url encoding".to_string()))
            .and_then(|bytes| {
                String::from_utf8(bytes)
                    .map_err(|_| Error::BadRequest("invalid url encoding".to_string()))
            })
    }

    fn minter(services: &AppServices, referer: Option<&str>) -> Box<dyn ProxyUrlMinter> {
        if services.config.signed_urls {
            Box::new(SignedHandleMinter {
                handles: services.handles.clone(),
                referer: referer.map(str::to_string),
            })
        } else {
            Box::new(PassThroughMinter {
                referer: referer.map(str::to_string),
            })
        }
    }

    async fn serve_text(
        services: &AppServices,
        origin: &Url,
        referer: Option<&str>,
        kind: ResourceKind,
    ) -> AppResult<Response> {
        let key = cache_key(origin.as_str(), referer);

        if let Some(cached) = services.proxy_cache.get_playlist(&key).await {
            return Ok(Self::text_response(kind, cached));
        }

        let (body, _content_type) = services
            .upstream
            .fetch_text(origin.as_str(), referer, kind)
            .await?;

        Self::rewrite_and_store(services, origin, referer, kind, body).await
    }

    async fn rewrite_and_store(
        services: &AppServices,
        origin: &Url,
        referer: Option<&str>,
        kind: ResourceKind,
        body: String,
    ) -> AppResult<Response> {
        let minter = Self::minter(services, referer);

        let rewritten = match kind {
            ResourceKind::PlaylistM3u8 => rewrite_utils::rewrite_m3u8(&body, origin, &*minter)?,
            ResourceKind::SubtitleVtt => rewrite_utils::rewrite_vtt(&body, origin, &*minter)?,
            ResourceKind::ManifestMpd => rewrite_utils::rewrite_mpd(&body, origin, &*minter)?,
            _ => body,
        };

        // fire and forget, the response doesn't wait on cache io
        let cache = services.proxy_cache.clone();
        let key = cache_key(origin.as_str(), referer);
        let for_cache = rewritten.clone();
        tokio::spawn(async move {
            cache.put_playlist(&key, &for_cache).await;
        });

        Ok(Self::text_response(kind, rewritten))
    }

    async fn serve_binary(
        services: &AppServices,
        origin: &Url,
        referer: Option<&str>,
        kind: ResourceKind,
    ) -> AppResult<Response> {
        let key = cache_key(origin.as_str(), None);

        if let Some(segment) = services.proxy_cache.get_segment(&key).await {
            return Ok(Self::binary_response(segment));
        }

        let response = services
            .upstream
            .fetch(origin.as_str(), referer, None, kind)
            .await?;

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("video/mp2t")
            .to_string();

        // declared-huge segments are piped instead of buffered
        if let Some(length) = response.content_length() {
            if length as usize > SEGMENT_BUFFER_LIMIT {
                debug!("segment over buffer limit ({} bytes), piping", length);
                return Ok(Self::pipe_response(response));
            }
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::BadGateway(format!("failed to read origin body: {e}")))?;

        let segment = CachedSegment {
            bytes,
            content_type,
        };

        let cache = services.proxy_cache.clone();
        let for_cache = segment.clone();
        tokio::spawn(async move {
            cache.put_segment(&key, for_cache).await;
        });

        Ok(Self::binary_response(segment))
    }

    fn text_response(kind: ResourceKind, body: String) -> Response {
        let content_type = match kind {
            ResourceKind::PlaylistM3u8 => "application/vnd.apple.mpegurl",
            ResourceKind::SubtitleVtt => "text/vtt",
            ResourceKind::ManifestMpd => "application/dash+xml",
            _ => "text/plain",
        };

        // content length is recomputed from the rewritten body, never reused
        // from upstream
        (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, content_type),
                (header::CACHE_CONTROL, "public, max-age=10"),
            ],
            body,
        )
            .into_response()
    }

    fn binary_response(segment: CachedSegment) -> Response {
        // segment urls are content-unique per live window, cdns can pin them
        (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, segment.content_type.as_str()),
                (
                    header::CACHE_CONTROL,
                    "public, max-age=31536000, immutable",
                ),
                (header::ACCEPT_RANGES, "bytes"),
            ],
            Body::from(segment.bytes),
        )
            .into_response()
    }

    /// stream an origin response through without buffering, mirroring status
    /// and the headers a player cares about (206 keeps its Content-Range)
    fn pipe_response(upstream: reqwest::Response) -> Response {
        let status = StatusCode::from_u16(upstream.status().as_u16())
            .unwrap_or(StatusCode::BAD_GATEWAY);

        let mut response_headers = HeaderMap::new();
        for name in [
            header::CONTENT_TYPE,
            header::CONTENT_LENGTH,
            header::CONTENT_RANGE,
            header::ACCEPT_RANGES,
        ] {
            if let Some(value) = upstream.headers().get(&name) {
                response_headers.insert(name, value.clone());
            }
        }

        response_headers
            .entry(header::ACCEPT_RANGES)
            .or_insert_with(|| "bytes".parse().expect("static header value should parse"));

        (
            status,
            response_headers,
            Body::from_stream(upstream.bytes_stream()),
        )
            .into_response()
    }
}
