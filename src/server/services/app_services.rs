use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::{
    config::AppConfig,
    database::RedisDatabase,
    database::sources::RedisSourcesRepository,
    server::{
        services::{
            provider_services::ProviderService, proxy_cache_services::ProxyCacheService,
            source_services::SourceCacheService, upstream_services::UpstreamService,
        },
        utils::{
            signature_utils::{HandleStore, SignatureUtil},
            url_guard_utils,
        },
    },
};

use super::{
    provider_services::DynProviderService, proxy_cache_services::DynProxyCacheService,
    source_services::DynSourceCacheService, upstream_services::DynUpstreamService,
};

// a playlist fans out into hundreds of segment fetches per viewer, redirects
// past this depth are a loop or a trap
const MAX_REDIRECT_HOPS: usize = 10;

/// everything the handlers need, wired once at startup and cloned per request
#[derive(Clone)]
pub struct AppServices {
    pub upstream: DynUpstreamService,
    pub proxy_cache: DynProxyCacheService,
    pub provider: DynProviderService,
    pub sources: DynSourceCacheService,
    pub handles: Arc<HandleStore>,
    pub redis: Arc<RedisDatabase>,
    pub config: Arc<AppConfig>,
}

impl AppServices {
    pub fn new(redis_db: RedisDatabase, config: Arc<AppConfig>) -> Self {
        info!("starting services...");

        let redis = Arc::new(redis_db);

        // every redirect hop gets the same treatment as the original url,
        // an origin must not be able to bounce us into private address space
        let redirect_policy = reqwest::redirect::Policy::custom(|attempt| {
            if attempt.previous().len() > MAX_REDIRECT_HOPS {
                attempt.error("too many redirects")
            } else if url_guard_utils::host_is_blocked(attempt.url()) {
                attempt.error("redirect into blocked address space")
            } else {
                attempt.follow()
            }
        });

        // tuned for streaming workloads, lots of concurrent segment fetches
        // against a handful of cdn hosts
        let http = reqwest::Client::builder()
            .redirect(redirect_policy)
            .pool_max_idle_per_host(200)
            .connect_timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(120))
            .tcp_keepalive(Duration::from_secs(60))
            .build()
            .expect("Failed to build HTTP client");

        let upstream = Arc::new(UpstreamService::new(http)) as DynUpstreamService;

        let proxy_cache = Arc::new(ProxyCacheService::new(redis.clone())) as DynProxyCacheService;

        let provider =
            Arc::new(ProviderService::new(config.provider_api_url.clone())) as DynProviderService;

        let sources_repository = Arc::new(RedisSourcesRepository::new(redis.clone()));
        let sources = Arc::new(SourceCacheService::new(sources_repository, provider.clone()))
            as DynSourceCacheService;

        let handles = Arc::new(HandleStore::new(SignatureUtil::new(
            config.signing_secret.clone(),
        )));

        info!("services ready");

        Self {
            upstream,
            proxy_cache,
            provider,
            sources,
            handles,
            redis,
            config,
        }
    }
}
