use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mockall::automock;
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{error, info};

use crate::database::sources::Category;
use crate::server::error::{AppResult, Error};

pub type DynProviderService = Arc<dyn ProviderServiceTrait + Send + Sync>;

/// discovery client against the upstream metadata api. resolves catalog pages
/// and episode ids into playable source descriptors
#[automock]
#[async_trait]
pub trait ProviderServiceTrait {
    async fn home(&self) -> AppResult<Value>;
    async fn search(&self, query: &str) -> AppResult<Value>;
    async fn anime(&self, anime_id: &str) -> AppResult<Value>;
    async fn episode_servers(&self, episode_id: &str) -> AppResult<Value>;
    async fn episode_sources(
        &self,
        episode_id: &str,
        category: Category,
        server: &str,
    ) -> AppResult<Value>;
}

pub struct ProviderService {
    base_url: String,
    // the client spins up background workers, so it's built on first use.
    // OnceCell gives single-flight init for free, concurrent first requests
    // share one attempt and a failed attempt is retried by the next caller
    client: OnceCell<reqwest::Client>,
}

impl ProviderService {
    pub fn new(base_url: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: OnceCell::new(),
        }
    }

    async fn client(&self) -> AppResult<&reqwest::Client> {
        self.client
            .get_or_try_init(|| async {
                info!("initializing discovery client for {}", self.base_url);

                url::Url::parse(&self.base_url).map_err(|e| {
                    Error::Unavailable(format!("discovery api url is invalid: {e}"))
                })?;

                // i like to make it look like a real browser but it's really not needed
                reqwest::Client::builder()
                    .user_agent("Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:144.0) Gecko/20100101 Firefox/144.0")
                    .timeout(Duration::from_secs(30))
                    .connect_timeout(Duration::from_secs(10))
                    .http2_adaptive_window(true)
                    .build()
                    .map_err(|e| Error::Unavailable(format!("discovery client failed to start: {e}")))
            })
            .await
    }

    async fn get_json(&self, path_and_query: &str) -> AppResult<Value> {
        let client = self.client().await?;
        let url = format!("{}{}", self.base_url, path_and_query);

        let response = client
            .get(&url)
            .header("Accept", "application/json, text/plain, */*")
            .header("Accept-Language", "en-US,en;q=0.9")
            .send()
            .await
            .map_err(|e| {
                error!("discovery request failed for {}: {}", url, e);
                Error::BadGateway(format!("discovery request failed: {e}"))
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::NotFound("not found upstream".to_string()));
        }
        if !status.is_success() {
            error!("discovery api returned {} for {}", status, url);
            return Err(Error::BadGateway(format!("discovery api returned {status}")));
        }

        let body: Value = response.json().await.map_err(|e| {
            error!("discovery response was not json: {}", e);
            Error::BadGateway(format!("discovery response was not json: {e}"))
        })?;

        // upstream wraps everything in {data}, unwrap once so callers don't
        // end up with {data:{data:...}}
        match body {
            Value::Object(mut map) if map.contains_key("data") => {
                Ok(map.remove("data").unwrap_or(Value::Null))
            }
            other => Ok(other),
        }
    }
}

#[async_trait]
impl ProviderServiceTrait for ProviderService {
    async fn home(&self) -> AppResult<Value> {
        self.get_json("/hianime/home").await
    }

    async fn search(&self, query: &str) -> AppResult<Value> {
        self.get_json(&format!("/hianime/search?q={}", urlencoding::encode(query)))
            .await
    }

    async fn anime(&self, anime_id: &str) -> AppResult<Value> {
        self.get_json(&format!("/hianime/anime/{}", urlencoding::encode(anime_id)))
            .await
    }

    async fn episode_servers(&self, episode_id: &str) -> AppResult<Value> {
        self.get_json(&format!(
            "/hianime/episode/servers?animeEpisodeId={}",
            urlencoding::encode(episode_id)
        ))
        .await
    }

    async fn episode_sources(
        &self,
        episode_id: &str,
        category: Category,
        server: &str,
    ) -> AppResult<Value> {
        self.get_json(&format!(
            "/hianime/episode/sources?animeEpisodeId={}&category={}&server={}",
            urlencoding::encode(episode_id),
            category,
            urlencoding::encode(server)
        ))
        .await
    }
}
