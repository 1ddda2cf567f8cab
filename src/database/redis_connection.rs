use anyhow::Context;
use redis::Client;
use redis::aio::MultiplexedConnection;
use std::time::Instant;
use tracing::info;

/// the remote cache tier. one multiplexed connection is shared by every
/// tier consumer, [`conn`](Self::conn) hands out cheap handles onto it
#[derive(Debug, Clone)]
pub struct RedisDatabase {
    connection: MultiplexedConnection,
}

impl RedisDatabase {
    /// connect and verify the tier actually answers before the server
    /// starts taking traffic. a proxy with a dead remote tier would
    /// quietly degrade every request into an origin fetch
    pub async fn connect(connection_string: &str) -> anyhow::Result<Self> {
        let client =
            Client::open(connection_string).context("remote cache tier url is invalid")?;

        let connection = client
            .get_multiplexed_tokio_connection()
            .await
            .context("failed to reach the remote cache tier")?;

        let db = Self { connection };

        let latency = db.ping().await?;
        info!("remote cache tier up, ping {:.1}ms", latency);

        Ok(db)
    }

    /// fresh handle onto the shared multiplexed connection
    pub fn conn(&self) -> MultiplexedConnection {
        self.connection.clone()
    }

    /// round-trip latency in milliseconds, also what /health reports
    pub async fn ping(&self) -> anyhow::Result<f64> {
        let start = Instant::now();

        let mut conn = self.conn();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .context("remote cache tier did not answer PING")?;

        Ok(start.elapsed().as_secs_f64() * 1000.0)
    }
}
