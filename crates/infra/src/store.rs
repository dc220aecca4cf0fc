use planflow_domain::plan::Plan;
use planflow_domain::ports::store::{PlanStore, PlanStoreError, StoredPlan};
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};

const DEFAULT_PREFIX: &str = "planflow:plans";

/// On-disk shape of one stored aggregate: body plus its concurrency token.
#[derive(Debug, Serialize, Deserialize)]
struct PlanRecord {
    data: Plan,
    etag: String,
}

#[derive(Clone)]
pub struct RedisPlanStore {
    manager: ConnectionManager,
    prefix: String,
}

impl RedisPlanStore {
    pub async fn connect(redis_url: &str) -> Result<Self, PlanStoreError> {
        Self::connect_with_prefix(redis_url, DEFAULT_PREFIX).await
    }

    pub async fn connect_with_prefix(
        redis_url: &str,
        prefix: impl Into<String>,
    ) -> Result<Self, PlanStoreError> {
        let client = redis::Client::open(redis_url)
            .map_err(|err| PlanStoreError::Unavailable(err.to_string()))?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|err| PlanStoreError::Unavailable(err.to_string()))?;
        Ok(Self {
            manager,
            prefix: prefix.into(),
        })
    }

    fn record_key(&self, plan_id: &str) -> String {
        format!("{}:{plan_id}", self.prefix)
    }

    fn serialize(stored: &StoredPlan) -> Result<String, PlanStoreError> {
        let record = PlanRecord {
            data: stored.data.clone(),
            etag: stored.etag.clone(),
        };
        serde_json::to_string(&record)
            .map_err(|err| PlanStoreError::Serialization(err.to_string()))
    }

    fn deserialize(payload: &str) -> Result<StoredPlan, PlanStoreError> {
        let record: PlanRecord = serde_json::from_str(payload)
            .map_err(|err| PlanStoreError::Serialization(err.to_string()))?;
        Ok(StoredPlan {
            data: record.data,
            etag: record.etag,
        })
    }
}

impl PlanStore for RedisPlanStore {
    fn get(
        &self,
        plan_id: &str,
    ) -> planflow_domain::ports::BoxFuture<'_, Result<Option<StoredPlan>, PlanStoreError>> {
        let record_key = self.record_key(plan_id);
        Box::pin(async move {
            let mut conn = self.manager.clone();
            let value: Option<String> = conn
                .get(record_key)
                .await
                .map_err(|err| PlanStoreError::Operation(err.to_string()))?;
            match value {
                Some(payload) => Ok(Some(Self::deserialize(&payload)?)),
                None => Ok(None),
            }
        })
    }

    fn put(
        &self,
        stored: &StoredPlan,
    ) -> planflow_domain::ports::BoxFuture<'_, Result<(), PlanStoreError>> {
        let record_key = self.record_key(&stored.data.object_id);
        let payload = match Self::serialize(stored) {
            Ok(payload) => payload,
            Err(err) => return Box::pin(async move { Err(err) }),
        };
        Box::pin(async move {
            let mut conn = self.manager.clone();
            let _: () = conn
                .set(record_key, payload)
                .await
                .map_err(|err| PlanStoreError::Operation(err.to_string()))?;
            Ok(())
        })
    }

    fn delete(
        &self,
        plan_id: &str,
    ) -> planflow_domain::ports::BoxFuture<'_, Result<bool, PlanStoreError>> {
        let record_key = self.record_key(plan_id);
        Box::pin(async move {
            let mut conn = self.manager.clone();
            let removed: i64 = conn
                .del(record_key)
                .await
                .map_err(|err| PlanStoreError::Operation(err.to_string()))?;
            Ok(removed > 0)
        })
    }
}
