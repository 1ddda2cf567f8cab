use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use redis::AsyncCommands;
use sha2::{Digest, Sha256};
use tracing::{debug, error};

use crate::database::RedisDatabase;

const PLAYLIST_TTL_SECONDS: u64 = 10;
const SEGMENT_TTL_SECONDS: u64 = 86_400;

// payloads past this skip the remote tier, shoving multi-megabyte blobs
// through redis costs more than refetching them
const REMOTE_MAX_PAYLOAD_BYTES: usize = 10 * 1024 * 1024;

// byte budget for the in-process segment tier
const MEMORY_SEGMENT_BUDGET_BYTES: u64 = 256 * 1024 * 1024;
const MEMORY_PLAYLIST_ENTRIES: u64 = 4_096;

/// cache key for an origin reference: truncated sha256 of the absolute url.
/// rewritten playlists embed the referer, so it has to be part of their key
pub fn cache_key(url: &str, referer: Option<&str>) -> String {
    let digest = Sha256::digest(url.as_bytes());
    let short = hex::encode(&digest[..16]);

    match referer {
        Some(referer) => format!("{}::ref={}", short, referer),
        None => short,
    }
}

#[derive(Debug, Clone)]
pub struct CachedSegment {
    pub bytes: Bytes,
    pub content_type: String,
}

pub type DynProxyCacheService = Arc<dyn ProxyCacheServiceTrait + Send + Sync>;

#[mockall::automock]
#[async_trait::async_trait]
pub trait ProxyCacheServiceTrait {
    /// rewritten playlist text, memory first then redis
    async fn get_playlist(&self, key: &str) -> Option<String>;

    /// store rewritten playlist text in both tiers, short ttl
    async fn put_playlist(&self, key: &str, text: &str);

    /// segment bytes, memory first then redis
    async fn get_segment(&self, key: &str) -> Option<CachedSegment>;

    /// store segment bytes, long ttl, remote tier skipped past the size cap
    async fn put_segment(&self, key: &str, segment: CachedSegment);
}

/// two-tier cache: moka in-process in front of redis.
///
/// reads fall through memory -> redis -> caller, redis hits are backfilled
/// into memory. writes are full overwrites of both tiers and every redis
/// failure is logged and treated as a miss, the cache never takes a request
/// down with it
pub struct ProxyCacheService {
    redis: Arc<RedisDatabase>,
    memory_playlists: moka::future::Cache<String, String>,
    memory_segments: moka::future::Cache<String, CachedSegment>,
}

impl ProxyCacheService {
    pub fn new(redis: Arc<RedisDatabase>) -> Self {
        let memory_playlists = moka::future::Cache::builder()
            .max_capacity(MEMORY_PLAYLIST_ENTRIES)
            .time_to_live(Duration::from_secs(PLAYLIST_TTL_SECONDS))
            .build();

        // weighed by payload size so the budget means bytes, not entries
        let memory_segments = moka::future::Cache::builder()
            .max_capacity(MEMORY_SEGMENT_BUDGET_BYTES)
            .weigher(|_key: &String, segment: &CachedSegment| {
                segment.bytes.len().try_into().unwrap_or(u32::MAX)
            })
            .time_to_live(Duration::from_secs(SEGMENT_TTL_SECONDS))
            .build();

        Self {
            redis,
            memory_playlists,
            memory_segments,
        }
    }

    fn playlist_key(key: &str) -> String {
        format!("m3u8:{}", key)
    }

    fn segment_key(key: &str) -> String {
        format!("seg:{}", key)
    }

    fn segment_ct_key(key: &str) -> String {
        format!("seg:{}:ct", key)
    }
}

#[async_trait::async_trait]
impl ProxyCacheServiceTrait for ProxyCacheService {
    async fn get_playlist(&self, key: &str) -> Option<String> {
        if let Some(text) = self.memory_playlists.get(key).await {
            debug!("playlist cache HIT (memory) for {}", key);
            return Some(text);
        }

        let mut conn = self.redis.conn();
        let result: Result<Option<String>, redis::RedisError> =
            conn.get(Self::playlist_key(key)).await;

        match result {
            Ok(Some(text)) => {
                debug!("playlist cache HIT (redis) for {}", key);
                self.memory_playlists
                    .insert(key.to_string(), text.clone())
                    .await;
                Some(text)
            }
            Ok(None) => None,
            Err(e) => {
                error!("playlist cache GET failed: {}", e);
                None
            }
        }
    }

    async fn put_playlist(&self, key: &str, text: &str) {
        self.memory_playlists
            .insert(key.to_string(), text.to_string())
            .await;

        let mut conn = self.redis.conn();
        let result: Result<(), redis::RedisError> = conn
            .set_ex(Self::playlist_key(key), text, PLAYLIST_TTL_SECONDS)
            .await;

        match result {
            Ok(_) => debug!(
                "cached playlist ({} bytes, ttl {}s)",
                text.len(),
                PLAYLIST_TTL_SECONDS
            ),
            Err(e) => error!("failed to cache playlist: {}", e),
        }
    }

    async fn get_segment(&self, key: &str) -> Option<CachedSegment> {
        if let Some(segment) = self.memory_segments.get(key).await {
            debug!("segment cache HIT (memory) for {}", key);
            return Some(segment);
        }

        // both values in one round trip
        let mut conn = self.redis.conn();
        let result: Result<(Option<Vec<u8>>, Option<String>), redis::RedisError> = redis::pipe()
            .get(Self::segment_key(key))
            .get(Self::segment_ct_key(key))
            .query_async(&mut conn)
            .await;

        match result {
            Ok((Some(bytes), content_type)) => {
                debug!("segment cache HIT (redis) for {}", key);
                let segment = CachedSegment {
                    bytes: Bytes::from(bytes),
                    content_type: content_type.unwrap_or_else(|| "video/mp2t".to_string()),
                };
                self.memory_segments
                    .insert(key.to_string(), segment.clone())
                    .await;
                Some(segment)
            }
            Ok((None, _)) => None,
            Err(e) => {
                error!("segment cache GET failed: {}", e);
                None
            }
        }
    }

    async fn put_segment(&self, key: &str, segment: CachedSegment) {
        // memory always takes it, the weigher keeps the budget honest
        self.memory_segments
            .insert(key.to_string(), segment.clone())
            .await;

        if segment.bytes.len() > REMOTE_MAX_PAYLOAD_BYTES {
            debug!(
                "segment too large for remote tier ({} bytes), memory only",
                segment.bytes.len()
            );
            return;
        }

        let mut conn = self.redis.conn();
        let result: Result<((), ()), redis::RedisError> = redis::pipe()
            .set_ex(Self::segment_key(key), &segment.bytes[..], SEGMENT_TTL_SECONDS)
            .set_ex(Self::segment_ct_key(key), &segment.content_type, SEGMENT_TTL_SECONDS)
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => debug!(
                "cached segment ({} bytes, ttl {}s)",
                segment.bytes.len(),
                SEGMENT_TTL_SECONDS
            ),
            Err(e) => error!("failed to cache segment: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_is_stable_and_short() {
        let a = cache_key("https://cdn.example/a/master.m3u8", None);
        let b = cache_key("https://cdn.example/a/master.m3u8", None);
        assert_eq!(a, b);
        assert_eq!(a.len(), 32); // 16 bytes hex encoded
    }

    #[test]
    fn referer_splits_the_namespace() {
        let plain = cache_key("https://cdn.example/a/master.m3u8", None);
        let with_ref = cache_key(
            "https://cdn.example/a/master.m3u8",
            Some("https://player.example/"),
        );
        assert_ne!(plain, with_ref);
        assert!(with_ref.ends_with("::ref=https://player.example/"));
    }

    #[test]
    fn namespaces_do_not_collide() {
        let key = cache_key("https://cdn.example/seg-001.ts", None);
        assert_ne!(
            ProxyCacheService::playlist_key(&key),
            ProxyCacheService::segment_key(&key)
        );
        assert_ne!(
            ProxyCacheService::segment_key(&key),
            ProxyCacheService::segment_ct_key(&key)
        );
    }
}
