use anyhow::{Context, Result};
use redis::AsyncCommands;
use std::sync::Arc;
use tracing::debug;

use crate::database::RedisDatabase;
use crate::database::sources::model::{SourcesRecord, SourcesRepository};

// records expire out of redis a day after their last successful refresh.
// much longer than the freshness window on purpose, a stale record is still
// worth serving when the upstream discovery call falls over
const SOURCES_EXPIRY_SECONDS: u64 = 86_400;

pub struct RedisSourcesRepository {
    redis: Arc<RedisDatabase>,
}

impl RedisSourcesRepository {
    pub fn new(redis: Arc<RedisDatabase>) -> Self {
        Self { redis }
    }

    fn record_key(composite_key: &str) -> String {
        format!("src:{}", composite_key)
    }
}

#[async_trait::async_trait]
impl SourcesRepository for RedisSourcesRepository {
    async fn get(&self, composite_key: &str) -> Result<Option<SourcesRecord>> {
        let key = Self::record_key(composite_key);
        let mut conn = self.redis.conn();

        let raw: Option<String> = conn
            .get(&key)
            .await
            .context("Failed to read sources record")?;

        match raw {
            Some(json) => {
                let record: SourcesRecord =
                    serde_json::from_str(&json).context("Failed to decode sources record")?;
                debug!("sources record hit for {}", composite_key);
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    async fn upsert(&self, record: &SourcesRecord) -> Result<()> {
        let key = Self::record_key(&record.composite_key);
        let json = serde_json::to_string(record).context("Failed to encode sources record")?;

        let mut conn = self.redis.conn();
        conn.set_ex::<_, _, ()>(&key, json, SOURCES_EXPIRY_SECONDS)
            .await
            .context("Failed to store sources record")?;

        debug!("sources record upserted for {}", record.composite_key);
        Ok(())
    }
}
