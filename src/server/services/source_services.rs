use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use mockall::automock;
use serde_json::Value;
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::database::sources::{Category, DynSourcesRepository, SourcesRecord, composite_key};
use crate::server::error::{AppResult, Error};
use crate::server::services::provider_services::DynProviderService;
use crate::server::utils::id_utils;

/// records younger than this short-circuit discovery entirely
const SOURCES_FRESHNESS_SECONDS: i64 = 1_800;

// pre-warm fan-out cap against the discovery api
const PREWARM_CONCURRENCY: usize = 4;

// how long a follower waits on the in-flight leader before giving up
const INFLIGHT_WAIT: Duration = Duration::from_secs(15);

/// what a sources lookup resolved to and where it came from
#[derive(Debug, Clone)]
pub struct SourcesOutcome {
    pub data: Value,
    pub from_cache: bool,
    pub stale: bool,
}

pub type DynSourceCacheService = Arc<dyn SourceCacheServiceTrait + Send + Sync>;

#[automock]
#[async_trait]
pub trait SourceCacheServiceTrait {
    /// resolve sources for an episode, serving the cache when fresh and
    /// falling back to a stale record when a refresh attempt fails
    async fn get_sources(
        &self,
        episode_id: &str,
        category: Category,
        server: &str,
    ) -> AppResult<SourcesOutcome>;

    /// schedule background discovery for a batch of episode ids.
    /// returns the accepted count immediately, work happens off-request
    async fn prewarm(&self, episode_ids: Vec<String>, category: Category, server: String)
        -> usize;
}

pub struct SourceCacheService {
    repository: DynSourcesRepository,
    provider: DynProviderService,
    // single-flight per composite key, concurrent refreshes for the same
    // episode attach to the leader instead of stampeding the discovery api
    inflight: Arc<Mutex<HashMap<String, Arc<Notify>>>>,
}

impl SourceCacheService {
    pub fn new(repository: DynSourcesRepository, provider: DynProviderService) -> Self {
        Self {
            repository,
            provider,
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn unix_now() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }

    /// fetch from the discovery api and upsert the record, single-flight per
    /// composite key. followers wait for the leader and then re-read the cache
    async fn refresh(
        repository: &DynSourcesRepository,
        provider: &DynProviderService,
        inflight: &Arc<Mutex<HashMap<String, Arc<Notify>>>>,
        episode_id: &str,
        category: Category,
        server: &str,
        key: &str,
    ) -> AppResult<Value> {
        let (notify, is_leader) = {
            let mut map = inflight.lock().unwrap_or_else(|p| p.into_inner());
            match map.get(key) {
                Some(existing) => (existing.clone(), false),
                None => {
                    let fresh = Arc::new(Notify::new());
                    map.insert(key.to_string(), fresh.clone());
                    (fresh, true)
                }
            }
        };

        if !is_leader {
            debug!("attaching to in-flight discovery for {}", key);
            let _ = tokio::time::timeout(INFLIGHT_WAIT, notify.notified()).await;

            // the leader upserts only on success, so a fresh record is the
            // only proof its discovery call worked. a stale leftover means
            // the leader failed and the caller decides whether that leftover
            // is still worth serving
            if let Ok(Some(record)) = repository.get(key).await {
                if record.is_fresh(Self::unix_now(), SOURCES_FRESHNESS_SECONDS) {
                    return Ok(record.payload);
                }
            }
            return Err(Error::BadGateway("source discovery failed".to_string()));
        }

        let result = provider.episode_sources(episode_id, category, server).await;

        if let Ok(payload) = &result {
            let record = SourcesRecord {
                composite_key: key.to_string(),
                episode_id: episode_id.to_string(),
                category,
                server: server.to_string(),
                payload: payload.clone(),
                fetched_at: Self::unix_now(),
            };
            if let Err(e) = repository.upsert(&record).await {
                // a dead cache shouldn't fail the lookup
                error!("failed to upsert sources record for {}: {}", key, e);
            }
        }

        {
            let mut map = inflight.lock().unwrap_or_else(|p| p.into_inner());
            map.remove(key);
        }
        notify.notify_waiters();

        result
    }
}

#[async_trait]
impl SourceCacheServiceTrait for SourceCacheService {
    async fn get_sources(
        &self,
        episode_id: &str,
        category: Category,
        server: &str,
    ) -> AppResult<SourcesOutcome> {
        let key = composite_key(episode_id, category, server);
        let now = Self::unix_now();

        let cached = match self.repository.get(&key).await {
            Ok(record) => record,
            Err(e) => {
                error!("sources cache read failed for {}: {}", key, e);
                None
            }
        };

        if let Some(record) = &cached {
            if record.is_fresh(now, SOURCES_FRESHNESS_SECONDS) {
                debug!("sources cache fresh for {}", key);
                return Ok(SourcesOutcome {
                    data: record.payload.clone(),
                    from_cache: true,
                    stale: false,
                });
            }
        }

        match Self::refresh(
            &self.repository,
            &self.provider,
            &self.inflight,
            episode_id,
            category,
            server,
            &key,
        )
        .await
        {
            Ok(payload) => Ok(SourcesOutcome {
                data: payload,
                from_cache: false,
                stale: false,
            }),
            Err(e) => match cached {
                // a failed refresh doesn't invalidate what we already had
                Some(record) => {
                    warn!("discovery failed for {}, serving stale record: {}", key, e);
                    Ok(SourcesOutcome {
                        data: record.payload,
                        from_cache: true,
                        stale: true,
                    })
                }
                None => Err(e),
            },
        }
    }

    async fn prewarm(
        &self,
        episode_ids: Vec<String>,
        category: Category,
        server: String,
    ) -> usize {
        // sanitize and dedupe up front, the response only promises what we accepted
        let mut seen = HashSet::new();
        let accepted: Vec<String> = episode_ids
            .iter()
            .filter_map(|raw| id_utils::sanitize_episode_id(raw).ok())
            .filter(|id| seen.insert(id.clone()))
            .collect();

        if accepted.is_empty() {
            return 0;
        }

        let count = accepted.len();
        info!("scheduling pre-warm for {} episodes", count);

        let repository = self.repository.clone();
        let provider = self.provider.clone();
        let inflight = self.inflight.clone();

        // all of the work happens behind the response
        tokio::spawn(async move {
            let semaphore = Arc::new(Semaphore::new(PREWARM_CONCURRENCY));
            let mut join_set = JoinSet::new();

            for episode_id in accepted {
                let repository = repository.clone();
                let provider = provider.clone();
                let inflight = inflight.clone();
                let server = server.clone();
                let sem = semaphore.clone();

                join_set.spawn(async move {
                    let _permit = sem.acquire().await.expect("semaphore closed");

                    let key = composite_key(&episode_id, category, &server);

                    // fresh records don't need warming
                    if let Ok(Some(record)) = repository.get(&key).await {
                        if record.is_fresh(Self::unix_now(), SOURCES_FRESHNESS_SECONDS) {
                            debug!("pre-warm skip, {} already fresh", key);
                            return (key, Ok(()));
                        }
                    }

                    let result = Self::refresh(
                        &repository,
                        &provider,
                        &inflight,
                        &episode_id,
                        category,
                        &server,
                        &key,
                    )
                    .await
                    .map(|_| ());

                    (key, result)
                });
            }

            while let Some(completed) = join_set.join_next().await {
                match completed {
                    Ok((key, Ok(()))) => debug!("pre-warm done for {}", key),
                    Ok((key, Err(e))) => error!("pre-warm failed for {}: {}", key, e),
                    Err(e) => error!("pre-warm task panicked: {}", e),
                }
            }
        });

        count
    }
}
