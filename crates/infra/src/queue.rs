use planflow_domain::changes::ChangeAction;
use planflow_domain::ports::queue::{ChangeDelivery, ChangeQueue, ChangeQueueError};
use planflow_domain::util::uuid_v7_without_dashes;
use redis::Value;
use redis::aio::ConnectionManager;

const DEFAULT_PREFIX: &str = "planflow:changes";

/// Reliable-queue layout per action queue:
/// `<prefix>:<queue>:ready` / `:processing` lists of message ids,
/// `<prefix>:<queue>:payloads` and `:attempts` hashes keyed by message id,
/// and one shared `<prefix>:dead` list of settled poison payloads.
#[derive(Clone)]
pub struct RedisChangeQueue {
    manager: ConnectionManager,
    prefix: String,
}

struct QueueKeys {
    ready: String,
    processing: String,
    payloads: String,
    attempts: String,
}

impl RedisChangeQueue {
    pub async fn connect(redis_url: &str) -> Result<Self, ChangeQueueError> {
        Self::connect_with_prefix(redis_url, DEFAULT_PREFIX).await
    }

    pub async fn connect_with_prefix(
        redis_url: &str,
        prefix: impl Into<String>,
    ) -> Result<Self, ChangeQueueError> {
        let client = redis::Client::open(redis_url)
            .map_err(|err| ChangeQueueError::Unavailable(err.to_string()))?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|err| ChangeQueueError::Unavailable(err.to_string()))?;
        Ok(Self {
            manager,
            prefix: prefix.into(),
        })
    }

    fn keys(&self, action: ChangeAction) -> QueueKeys {
        let queue = action.queue_name();
        QueueKeys {
            ready: format!("{}:{queue}:ready", self.prefix),
            processing: format!("{}:{queue}:processing", self.prefix),
            payloads: format!("{}:{queue}:payloads", self.prefix),
            attempts: format!("{}:{queue}:attempts", self.prefix),
        }
    }

    fn dead_key(&self) -> String {
        format!("{}:dead", self.prefix)
    }
}

impl ChangeQueue for RedisChangeQueue {
    fn publish(
        &self,
        action: ChangeAction,
        payload: String,
    ) -> planflow_domain::ports::BoxFuture<'_, Result<(), ChangeQueueError>> {
        let keys = self.keys(action);
        let message_id = uuid_v7_without_dashes();
        Box::pin(async move {
            let mut conn = self.manager.clone();
            let mut pipeline = redis::pipe();
            pipeline.atomic();
            pipeline
                .cmd("HSET")
                .arg(&keys.payloads)
                .arg(&message_id)
                .arg(payload);
            pipeline
                .cmd("HSET")
                .arg(&keys.attempts)
                .arg(&message_id)
                .arg(1);
            pipeline.cmd("RPUSH").arg(&keys.ready).arg(&message_id);
            let _: Vec<Value> = pipeline
                .query_async(&mut conn)
                .await
                .map_err(|err| ChangeQueueError::Operation(err.to_string()))?;
            Ok(())
        })
    }

    fn dequeue(
        &self,
        action: ChangeAction,
        timeout_secs: u64,
    ) -> planflow_domain::ports::BoxFuture<'_, Result<Option<ChangeDelivery>, ChangeQueueError>>
    {
        let keys = self.keys(action);
        Box::pin(async move {
            let mut conn = self.manager.clone();
            let result: Option<String> = redis::cmd("BRPOPLPUSH")
                .arg(&keys.ready)
                .arg(&keys.processing)
                .arg(timeout_secs as usize)
                .query_async(&mut conn)
                .await
                .map_err(|err| ChangeQueueError::Operation(err.to_string()))?;
            let Some(message_id) = result else {
                return Ok(None);
            };

            let payload: Option<String> = redis::cmd("HGET")
                .arg(&keys.payloads)
                .arg(&message_id)
                .query_async(&mut conn)
                .await
                .map_err(|err| ChangeQueueError::Operation(err.to_string()))?;
            let Some(payload) = payload else {
                let _: i64 = redis::cmd("LREM")
                    .arg(&keys.processing)
                    .arg(1)
                    .arg(&message_id)
                    .query_async(&mut conn)
                    .await
                    .map_err(|err| ChangeQueueError::Operation(err.to_string()))?;
                return Err(ChangeQueueError::Operation(format!(
                    "missing payload for message_id {message_id}"
                )));
            };

            let attempt: Option<u32> = redis::cmd("HGET")
                .arg(&keys.attempts)
                .arg(&message_id)
                .query_async(&mut conn)
                .await
                .map_err(|err| ChangeQueueError::Operation(err.to_string()))?;

            Ok(Some(ChangeDelivery {
                message_id,
                action,
                attempt: attempt.unwrap_or(1),
                payload,
            }))
        })
    }

    fn ack(
        &self,
        delivery: &ChangeDelivery,
    ) -> planflow_domain::ports::BoxFuture<'_, Result<(), ChangeQueueError>> {
        let keys = self.keys(delivery.action);
        let message_id = delivery.message_id.clone();
        Box::pin(async move {
            let mut conn = self.manager.clone();
            let mut pipeline = redis::pipe();
            pipeline.atomic();
            pipeline
                .cmd("LREM")
                .arg(&keys.processing)
                .arg(1)
                .arg(&message_id);
            pipeline.cmd("HDEL").arg(&keys.payloads).arg(&message_id);
            pipeline.cmd("HDEL").arg(&keys.attempts).arg(&message_id);
            let _: Vec<Value> = pipeline
                .query_async(&mut conn)
                .await
                .map_err(|err| ChangeQueueError::Operation(err.to_string()))?;
            Ok(())
        })
    }

    fn nack(
        &self,
        delivery: &ChangeDelivery,
        requeue: bool,
    ) -> planflow_domain::ports::BoxFuture<'_, Result<(), ChangeQueueError>> {
        let keys = self.keys(delivery.action);
        let message_id = delivery.message_id.clone();
        Box::pin(async move {
            let mut conn = self.manager.clone();
            let mut pipeline = redis::pipe();
            pipeline.atomic();
            pipeline
                .cmd("LREM")
                .arg(&keys.processing)
                .arg(1)
                .arg(&message_id);
            if requeue {
                pipeline
                    .cmd("HINCRBY")
                    .arg(&keys.attempts)
                    .arg(&message_id)
                    .arg(1);
                // LPUSH so the redelivery goes out before younger messages
                pipeline.cmd("LPUSH").arg(&keys.ready).arg(&message_id);
            } else {
                pipeline.cmd("HDEL").arg(&keys.payloads).arg(&message_id);
                pipeline.cmd("HDEL").arg(&keys.attempts).arg(&message_id);
            }
            let _: Vec<Value> = pipeline
                .query_async(&mut conn)
                .await
                .map_err(|err| ChangeQueueError::Operation(err.to_string()))?;
            Ok(())
        })
    }

    fn dead_letter(
        &self,
        delivery: &ChangeDelivery,
    ) -> planflow_domain::ports::BoxFuture<'_, Result<(), ChangeQueueError>> {
        let keys = self.keys(delivery.action);
        let dead_key = self.dead_key();
        let message_id = delivery.message_id.clone();
        let payload = delivery.payload.clone();
        Box::pin(async move {
            let mut conn = self.manager.clone();
            let mut pipeline = redis::pipe();
            pipeline.atomic();
            pipeline
                .cmd("LREM")
                .arg(&keys.processing)
                .arg(1)
                .arg(&message_id);
            pipeline.cmd("HDEL").arg(&keys.payloads).arg(&message_id);
            pipeline.cmd("HDEL").arg(&keys.attempts).arg(&message_id);
            pipeline.cmd("RPUSH").arg(&dead_key).arg(payload);
            let _: Vec<Value> = pipeline
                .query_async(&mut conn)
                .await
                .map_err(|err| ChangeQueueError::Operation(err.to_string()))?;
            Ok(())
        })
    }

    fn reclaim(
        &self,
        action: ChangeAction,
    ) -> planflow_domain::ports::BoxFuture<'_, Result<usize, ChangeQueueError>> {
        let keys = self.keys(action);
        Box::pin(async move {
            let mut conn = self.manager.clone();
            let message_ids: Vec<String> = redis::cmd("LRANGE")
                .arg(&keys.processing)
                .arg(0)
                .arg(-1)
                .query_async(&mut conn)
                .await
                .map_err(|err| ChangeQueueError::Operation(err.to_string()))?;
            if message_ids.is_empty() {
                return Ok(0);
            }
            let _: i64 = redis::cmd("RPUSH")
                .arg(&keys.ready)
                .arg(message_ids.clone())
                .query_async(&mut conn)
                .await
                .map_err(|err| ChangeQueueError::Operation(err.to_string()))?;
            let _: String = redis::cmd("LTRIM")
                .arg(&keys.processing)
                .arg(message_ids.len() as i64)
                .arg(-1)
                .query_async(&mut conn)
                .await
                .map_err(|err| ChangeQueueError::Operation(err.to_string()))?;
            Ok(message_ids.len())
        })
    }
}
