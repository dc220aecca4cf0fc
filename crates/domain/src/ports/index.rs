use serde_json::Value;
use thiserror::Error;

use super::BoxFuture;

#[derive(Debug, Error)]
pub enum PlanIndexError {
    #[error("index unavailable: {0}")]
    Unavailable(String),
    #[error("index rejected request: {0}")]
    Rejected(String),
    #[error("index operation failed: {0}")]
    Operation(String),
}

/// One indexable document. `routing` is the root plan id, so every node of an
/// aggregate lands on the same shard as its parent.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanDocument {
    pub doc_id: String,
    pub routing: String,
    pub body: Value,
}

pub trait PlanIndex: Send + Sync {
    /// Create the index with its mappings if it does not exist. Never
    /// destructive.
    fn ensure_schema(&self) -> BoxFuture<'_, Result<(), PlanIndexError>>;

    /// Delete and recreate the index. Only reachable from an explicit
    /// migration invocation.
    fn reset_schema(&self) -> BoxFuture<'_, Result<(), PlanIndexError>>;

    fn bulk_index(&self, documents: &[PlanDocument]) -> BoxFuture<'_, Result<(), PlanIndexError>>;

    fn delete_document(
        &self,
        doc_id: &str,
        routing: &str,
    ) -> BoxFuture<'_, Result<(), PlanIndexError>>;

    /// Delete every document routed by `routing` (the whole aggregate).
    fn delete_routed(&self, routing: &str) -> BoxFuture<'_, Result<(), PlanIndexError>>;

    fn search(&self, query: &Value) -> BoxFuture<'_, Result<Vec<Value>, PlanIndexError>>;
}
