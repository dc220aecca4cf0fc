use std::sync::Arc;

use serde_json::Value;

use crate::DomainResult;
use crate::changes::ChangeMessage;
use crate::error::DomainError;
use crate::plan::{self, LinkedPlanService, Plan};
use crate::ports::index::{PlanIndex, PlanIndexError};
use crate::ports::queue::{ChangeQueue, ChangeQueueError};
use crate::ports::store::{PlanStore, PlanStoreError, StoredPlan};

/// Result of a conditional read.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadOutcome {
    NotModified,
    Found(StoredPlan),
}

/// The aggregate mutator. Every successful write goes to the authoritative
/// store first, then publishes exactly one change message and waits for the
/// broker acknowledgement before returning.
pub struct PlanService {
    store: Arc<dyn PlanStore>,
    queue: Arc<dyn ChangeQueue>,
    index: Arc<dyn PlanIndex>,
}

impl PlanService {
    pub fn new(
        store: Arc<dyn PlanStore>,
        queue: Arc<dyn ChangeQueue>,
        index: Arc<dyn PlanIndex>,
    ) -> Self {
        Self {
            store,
            queue,
            index,
        }
    }

    pub async fn create(&self, plan: Plan) -> DomainResult<StoredPlan> {
        plan::validate_plan(&plan)?;
        if self
            .store
            .get(&plan.object_id)
            .await
            .map_err(map_store_error)?
            .is_some()
        {
            return Err(DomainError::Conflict);
        }

        let etag = plan::compute_etag(&plan)?;
        let stored = StoredPlan { data: plan, etag };
        self.store.put(&stored).await.map_err(map_store_error)?;
        self.publish(ChangeMessage::create(stored.data.clone()))
            .await?;
        Ok(stored)
    }

    pub async fn get(&self, plan_id: &str, if_none_match: Option<&str>) -> DomainResult<ReadOutcome> {
        let stored = self
            .store
            .get(plan_id)
            .await
            .map_err(map_store_error)?
            .ok_or(DomainError::NotFound)?;
        if if_none_match.is_some_and(|token| token == stored.etag) {
            return Ok(ReadOutcome::NotModified);
        }
        Ok(ReadOutcome::Found(stored))
    }

    /// Patch semantics: merge the incoming linked-service entries into the
    /// stored aggregate. The concurrency check only applies when the caller
    /// supplied a token; an unguarded merge is allowed.
    pub async fn replace_children(
        &self,
        plan_id: &str,
        if_match: Option<&str>,
        incoming: Vec<LinkedPlanService>,
    ) -> DomainResult<StoredPlan> {
        let stored = self
            .store
            .get(plan_id)
            .await
            .map_err(map_store_error)?
            .ok_or(DomainError::NotFound)?;
        if if_match.is_some_and(|token| stored.etag != token) {
            return Err(DomainError::PreconditionFailed);
        }

        let mut plan = stored.data;
        plan.merge_linked_services(incoming);
        plan::validate_plan(&plan)?;

        let etag = plan::compute_etag(&plan)?;
        let updated = StoredPlan { data: plan, etag };
        self.store.put(&updated).await.map_err(map_store_error)?;
        self.publish(ChangeMessage::update(updated.data.clone()))
            .await?;
        Ok(updated)
    }

    pub async fn delete(&self, plan_id: &str) -> DomainResult<()> {
        let existed = self
            .store
            .delete(plan_id)
            .await
            .map_err(map_store_error)?;
        if !existed {
            return Err(DomainError::NotFound);
        }
        self.publish(ChangeMessage::delete(plan_id.to_string()))
            .await
    }

    /// Remove one child node from the aggregate. Besides the queued update,
    /// the child document is deleted from the index synchronously,
    /// best-effort: a failure there is logged and never fails the request.
    pub async fn delete_child(&self, plan_id: &str, child_id: &str) -> DomainResult<()> {
        let stored = self
            .store
            .get(plan_id)
            .await
            .map_err(map_store_error)?
            .ok_or(DomainError::NotFound)?;

        let mut plan = stored.data;
        if !plan.prune_child(child_id) {
            return Err(DomainError::NotFound);
        }

        let etag = plan::compute_etag(&plan)?;
        let updated = StoredPlan { data: plan, etag };
        self.store.put(&updated).await.map_err(map_store_error)?;
        self.publish(ChangeMessage::update(updated.data.clone()))
            .await?;

        if let Err(err) = self.index.delete_document(child_id, plan_id).await {
            tracing::warn!(
                plan_id,
                child_id,
                error = %err,
                "eager child index delete failed; projector will reconcile"
            );
        }
        Ok(())
    }

    pub async fn search(&self, query: &Value) -> DomainResult<Vec<Value>> {
        self.index.search(query).await.map_err(map_index_error)
    }

    async fn publish(&self, message: ChangeMessage) -> DomainResult<()> {
        let payload = serde_json::to_string(&message)
            .map_err(|err| DomainError::Infra(format!("change serialization: {err}")))?;
        self.queue
            .publish(message.action, payload)
            .await
            .map_err(map_queue_error)
    }
}

fn map_store_error(err: PlanStoreError) -> DomainError {
    DomainError::Infra(err.to_string())
}

fn map_queue_error(err: ChangeQueueError) -> DomainError {
    DomainError::Infra(err.to_string())
}

fn map_index_error(err: PlanIndexError) -> DomainError {
    DomainError::Infra(err.to_string())
}
