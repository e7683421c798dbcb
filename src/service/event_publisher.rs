use crate::domain::events::PaymentEvent;

/// Fire-and-forget event emission. Implementations must return immediately and
/// never surface delivery failures to the caller.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, topic: &'static str, key: String, event: PaymentEvent);
}

/// Appends events to one Redis stream per topic.
#[derive(Clone)]
pub struct RedisStreamPublisher {
    pub redis_client: redis::Client,
    pub max_len: usize,
}

impl RedisStreamPublisher {
    pub fn new(redis_client: redis::Client) -> Self {
        Self {
            redis_client,
            max_len: 1_000_000,
        }
    }

    async fn append(&self, topic: &str, key: &str, payload: String) -> anyhow::Result<String> {
        let mut conn = self.redis_client.get_multiplexed_async_connection().await?;
        let id: String = redis::cmd("XADD")
            .arg(topic)
            .arg("MAXLEN")
            .arg("~")
            .arg(self.max_len)
            .arg("*")
            .arg("key")
            .arg(key)
            .arg("event")
            .arg(payload)
            .query_async(&mut conn)
            .await?;
        Ok(id)
    }
}

impl EventPublisher for RedisStreamPublisher {
    fn publish(&self, topic: &'static str, key: String, event: PaymentEvent) {
        let payload = match serde_json::to_string(&event) {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(topic, key = %key, error = %e, "could not serialize payment event");
                return;
            }
        };

        let publisher = self.clone();
        tokio::spawn(async move {
            match publisher.append(topic, &key, payload).await {
                Ok(entry_id) => tracing::info!(topic, key = %key, entry_id = %entry_id, "payment event published"),
                Err(e) => tracing::warn!(topic, key = %key, error = %e, "payment event lost"),
            }
        });
    }
}
