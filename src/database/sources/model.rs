use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// translation category of an episode's audio/subtitle track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    #[default]
    Sub,
    Dub,
    Raw,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Sub => "sub",
            Category::Dub => "dub",
            Category::Raw => "raw",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "sub" => Some(Category::Sub),
            "dub" => Some(Category::Dub),
            "raw" => Some(Category::Raw),
            _ => None,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// one cached sources descriptor for an (episode, category, server) triple.
/// the composite key is what everything dedupes and upserts on
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcesRecord {
    pub composite_key: String,
    pub episode_id: String,
    pub category: Category,
    pub server: String,
    pub payload: serde_json::Value,
    pub fetched_at: i64,
}

impl SourcesRecord {
    /// a record is fresh while it's younger than the freshness window.
    /// stale records are still servable when a refresh attempt fails
    pub fn is_fresh(&self, now: i64, window_secs: i64) -> bool {
        now - self.fetched_at < window_secs
    }
}

pub fn composite_key(episode_id: &str, category: Category, server: &str) -> String {
    format!("{}::{}::{}", episode_id, category.as_str(), server)
}

pub type DynSourcesRepository = Arc<dyn SourcesRepository + Send + Sync>;

#[mockall::automock]
#[async_trait::async_trait]
pub trait SourcesRepository {
    async fn get(&self, composite_key: &str) -> Result<Option<SourcesRecord>>;
    async fn upsert(&self, record: &SourcesRecord) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composite_key_format() {
        assert_eq!(
            composite_key("steinsgate-3?ep=230", Category::Sub, "hd-1"),
            "steinsgate-3?ep=230::sub::hd-1"
        );
    }

    #[test]
    fn freshness_window() {
        let record = SourcesRecord {
            composite_key: "a::sub::hd-1".to_string(),
            episode_id: "a".to_string(),
            category: Category::Sub,
            server: "hd-1".to_string(),
            payload: serde_json::json!({}),
            fetched_at: 1_000,
        };

        assert!(record.is_fresh(1_000 + 1799, 1800));
        assert!(!record.is_fresh(1_000 + 1800, 1800));
    }

    #[test]
    fn category_round_trip() {
        for cat in [Category::Sub, Category::Dub, Category::Raw] {
            assert_eq!(Category::parse(cat.as_str()), Some(cat));
        }
        assert_eq!(Category::parse("latino"), None);
    }
}
