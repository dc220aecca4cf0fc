use thiserror::Error;

use super::BoxFuture;
use crate::changes::ChangeAction;

#[derive(Debug, Error)]
pub enum ChangeQueueError {
    #[error("queue unavailable: {0}")]
    Unavailable(String),
    #[error("queue serialization failed: {0}")]
    Serialization(String),
    #[error("queue operation failed: {0}")]
    Operation(String),
}

/// One in-flight message. `attempt` counts deliveries, starting at 1.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeDelivery {
    pub message_id: String,
    pub action: ChangeAction,
    pub attempt: u32,
    pub payload: String,
}

/// Durable per-action FIFO with explicit acknowledgement. `publish` resolves
/// only once the broker has accepted the message.
pub trait ChangeQueue: Send + Sync {
    fn publish(
        &self,
        action: ChangeAction,
        payload: String,
    ) -> BoxFuture<'_, Result<(), ChangeQueueError>>;

    /// Blocks up to `timeout_secs` for the next message on `action`'s queue,
    /// moving it to the in-flight set.
    fn dequeue(
        &self,
        action: ChangeAction,
        timeout_secs: u64,
    ) -> BoxFuture<'_, Result<Option<ChangeDelivery>, ChangeQueueError>>;

    fn ack(&self, delivery: &ChangeDelivery) -> BoxFuture<'_, Result<(), ChangeQueueError>>;

    /// `requeue = true` returns the message to the ready queue with an
    /// incremented delivery count; `false` drops it.
    fn nack(
        &self,
        delivery: &ChangeDelivery,
        requeue: bool,
    ) -> BoxFuture<'_, Result<(), ChangeQueueError>>;

    fn dead_letter(&self, delivery: &ChangeDelivery)
    -> BoxFuture<'_, Result<(), ChangeQueueError>>;

    /// Move every in-flight message on `action`'s queue back to ready.
    /// Called on consumer startup to recover deliveries orphaned by a crash
    /// between dequeue and settlement. Returns how many were moved.
    fn reclaim(&self, action: ChangeAction) -> BoxFuture<'_, Result<usize, ChangeQueueError>>;
}
