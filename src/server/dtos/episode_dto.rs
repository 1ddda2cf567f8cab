use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::database::sources::Category;

/// generic `{data}` envelope for catalog passthroughs
#[derive(Debug, Serialize)]
pub struct DataResponse {
    pub data: Value,
}

#[derive(Debug, Deserialize)]
pub struct EpisodeQuery {
    #[serde(rename = "animeEpisodeId")]
    pub anime_episode_id: String,
}

#[derive(Debug, Deserialize)]
pub struct SourcesQuery {
    #[serde(rename = "animeEpisodeId")]
    pub anime_episode_id: String,
    pub category: Option<String>,
    pub server: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourcesResponse {
    pub data: Value,
    pub from_cache: bool,
    // only worth mentioning when it's true
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub stale: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrewarmRequest {
    pub episode_ids: Vec<String>,
    pub category: Option<String>,
    pub server: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PrewarmResponse {
    pub status: &'static str,
    pub count: usize,
}

// clients disagree on what the defaults should be, this is the single
// source of truth
pub const DEFAULT_SERVER: &str = "hd-1";
pub const DEFAULT_CATEGORY: Category = Category::Sub;
