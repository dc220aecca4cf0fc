use thiserror::Error;

use super::BoxFuture;
use crate::plan::Plan;

#[derive(Debug, Error)]
pub enum PlanStoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store serialization failed: {0}")]
    Serialization(String),
    #[error("store operation failed: {0}")]
    Operation(String),
}

/// Aggregate body plus the concurrency token it was saved under.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredPlan {
    pub data: Plan,
    pub etag: String,
}

pub trait PlanStore: Send + Sync {
    fn get(&self, plan_id: &str) -> BoxFuture<'_, Result<Option<StoredPlan>, PlanStoreError>>;
    fn put(&self, stored: &StoredPlan) -> BoxFuture<'_, Result<(), PlanStoreError>>;
    /// Returns whether a record existed.
    fn delete(&self, plan_id: &str) -> BoxFuture<'_, Result<bool, PlanStoreError>>;
}
