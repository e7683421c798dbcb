use anyhow::Result;
use redis::aio::MultiplexedConnection;
use redis::streams::StreamReadReply;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;
use travel_checkout::bootstrap::build_orchestrator;
use travel_checkout::config::AppConfig;
use travel_checkout::service::account_erasure::{process_entry, EntryOutcome, PendingCursor};
use travel_checkout::service::payment_orchestrator::PaymentOrchestrator;

struct Consumer {
    stream: String,
    group: String,
    name: String,
}

impl Consumer {
    /// `"0"` re-reads this consumer's pending entries without blocking,
    /// `">"` waits for new ones.
    async fn read(&self, conn: &mut MultiplexedConnection, start_id: &str) -> redis::RedisResult<StreamReadReply> {
        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP").arg(&self.group).arg(&self.name).arg("COUNT").arg(50);
        if start_id == ">" {
            cmd.arg("BLOCK").arg(2000);
        }
        cmd.arg("STREAMS").arg(&self.stream).arg(start_id);
        cmd.query_async(conn).await
    }

    /// Returns (entries read, entries left pending).
    async fn handle(
        &self,
        conn: &mut MultiplexedConnection,
        orchestrator: &PaymentOrchestrator,
        reply: StreamReadReply,
    ) -> (usize, usize) {
        let mut read = 0;
        let mut retried = 0;
        for stream_key in reply.keys {
            for entry in stream_key.ids {
                read += 1;
                let raw = entry
                    .map
                    .get("event")
                    .and_then(|v| redis::from_redis_value::<String>(v).ok());

                match process_entry(orchestrator, &entry.id, raw.as_deref()).await {
                    EntryOutcome::Ack => {
                        let _: i64 = redis::cmd("XACK")
                            .arg(&self.stream)
                            .arg(&self.group)
                            .arg(&entry.id)
                            .query_async(conn)
                            .await
                            .unwrap_or(0);
                    }
                    EntryOutcome::Retry => retried += 1,
                }
            }
        }
        (read, retried)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cfg = AppConfig::from_env()?;
    let consumer = Consumer {
        stream: cfg.account_events_stream.clone(),
        group: cfg.account_events_group.clone(),
        name: std::env::var("ACCOUNT_CONSUMER_NAME").unwrap_or_else(|_| "erasure-worker-1".to_string()),
    };

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&cfg.database_url)
        .await?;

    let redis_client = redis::Client::open(cfg.redis_url.clone())?;
    let orchestrator = build_orchestrator(&cfg, pool, redis_client.clone());
    let mut conn = redis_client.get_multiplexed_async_connection().await?;

    // BUSYGROUP on restart is expected
    let _: redis::RedisResult<String> = redis::cmd("XGROUP")
        .arg("CREATE")
        .arg(&consumer.stream)
        .arg(&consumer.group)
        .arg("0")
        .arg("MKSTREAM")
        .query_async(&mut conn)
        .await;

    tracing::info!(stream = %consumer.stream, consumer = %consumer.name, "erasure worker started");

    let mut cursor = PendingCursor::default();
    loop {
        if cursor.wants_backlog() {
            match consumer.read(&mut conn, "0").await {
                Ok(reply) => {
                    let (read, retried) = consumer.handle(&mut conn, &orchestrator, reply).await;
                    cursor.record(true, read, retried);
                }
                Err(e) => tracing::warn!(error = %e, "reading pending account events failed"),
            }
        }

        match consumer.read(&mut conn, ">").await {
            Ok(reply) => {
                let (read, retried) = consumer.handle(&mut conn, &orchestrator, reply).await;
                cursor.record(false, read, retried);
            }
            Err(e) => {
                tracing::warn!(error = %e, "XREADGROUP failed");
                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
            }
        }
    }
}
