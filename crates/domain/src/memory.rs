//! In-memory port implementations backing unit and API tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde_json::Value;

use crate::changes::ChangeAction;
use crate::ports::BoxFuture;
use crate::ports::index::{PlanDocument, PlanIndex, PlanIndexError};
use crate::ports::queue::{ChangeDelivery, ChangeQueue, ChangeQueueError};
use crate::ports::store::{PlanStore, PlanStoreError, StoredPlan};

#[derive(Default)]
pub struct InMemoryPlanStore {
    records: Mutex<HashMap<String, StoredPlan>>,
}

impl InMemoryPlanStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PlanStore for InMemoryPlanStore {
    fn get(&self, plan_id: &str) -> BoxFuture<'_, Result<Option<StoredPlan>, PlanStoreError>> {
        let plan_id = plan_id.to_string();
        Box::pin(async move {
            let records = self.records.lock().unwrap();
            Ok(records.get(&plan_id).cloned())
        })
    }

    fn put(&self, stored: &StoredPlan) -> BoxFuture<'_, Result<(), PlanStoreError>> {
        let stored = stored.clone();
        Box::pin(async move {
            let mut records = self.records.lock().unwrap();
            records.insert(stored.data.object_id.clone(), stored);
            Ok(())
        })
    }

    fn delete(&self, plan_id: &str) -> BoxFuture<'_, Result<bool, PlanStoreError>> {
        let plan_id = plan_id.to_string();
        Box::pin(async move {
            let mut records = self.records.lock().unwrap();
            Ok(records.remove(&plan_id).is_some())
        })
    }
}

#[derive(Default)]
struct QueueState {
    ready: HashMap<&'static str, VecDeque<ChangeDelivery>>,
    processing: HashMap<String, ChangeDelivery>,
    dead: Vec<ChangeDelivery>,
}

#[derive(Default)]
pub struct InMemoryChangeQueue {
    state: Mutex<QueueState>,
    next_id: AtomicU64,
}

impl InMemoryChangeQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ready_len(&self, action: ChangeAction) -> usize {
        let state = self.state.lock().unwrap();
        state
            .ready
            .get(action.queue_name())
            .map_or(0, VecDeque::len)
    }

    pub fn dead_letters(&self) -> Vec<ChangeDelivery> {
        self.state.lock().unwrap().dead.clone()
    }
}

impl ChangeQueue for InMemoryChangeQueue {
    fn publish(
        &self,
        action: ChangeAction,
        payload: String,
    ) -> BoxFuture<'_, Result<(), ChangeQueueError>> {
        Box::pin(async move {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
            let delivery = ChangeDelivery {
                message_id: format!("msg-{id}"),
                action,
                attempt: 1,
                payload,
            };
            let mut state = self.state.lock().unwrap();
            state
                .ready
                .entry(action.queue_name())
                .or_default()
                .push_back(delivery);
            Ok(())
        })
    }

    fn dequeue(
        &self,
        action: ChangeAction,
        _timeout_secs: u64,
    ) -> BoxFuture<'_, Result<Option<ChangeDelivery>, ChangeQueueError>> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            let delivery = state
                .ready
                .get_mut(action.queue_name())
                .and_then(VecDeque::pop_front);
            if let Some(delivery) = &delivery {
                state
                    .processing
                    .insert(delivery.message_id.clone(), delivery.clone());
            }
            Ok(delivery)
        })
    }

    fn ack(&self, delivery: &ChangeDelivery) -> BoxFuture<'_, Result<(), ChangeQueueError>> {
        let message_id = delivery.message_id.clone();
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            state.processing.remove(&message_id);
            Ok(())
        })
    }

    fn nack(
        &self,
        delivery: &ChangeDelivery,
        requeue: bool,
    ) -> BoxFuture<'_, Result<(), ChangeQueueError>> {
        let message_id = delivery.message_id.clone();
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            let Some(mut delivery) = state.processing.remove(&message_id) else {
                return Ok(());
            };
            if requeue {
                delivery.attempt += 1;
                state
                    .ready
                    .entry(delivery.action.queue_name())
                    .or_default()
                    .push_front(delivery);
            }
            Ok(())
        })
    }

    fn dead_letter(
        &self,
        delivery: &ChangeDelivery,
    ) -> BoxFuture<'_, Result<(), ChangeQueueError>> {
        let delivery = delivery.clone();
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            state.processing.remove(&delivery.message_id);
            state.dead.push(delivery);
            Ok(())
        })
    }

    fn reclaim(&self, action: ChangeAction) -> BoxFuture<'_, Result<usize, ChangeQueueError>> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            let orphaned: Vec<String> = state
                .processing
                .iter()
                .filter(|(_, delivery)| delivery.action == action)
                .map(|(message_id, _)| message_id.clone())
                .collect();
            for message_id in &orphaned {
                if let Some(delivery) = state.processing.remove(message_id) {
                    state
                        .ready
                        .entry(delivery.action.queue_name())
                        .or_default()
                        .push_back(delivery);
                }
            }
            Ok(orphaned.len())
        })
    }
}

#[derive(Default)]
pub struct InMemoryPlanIndex {
    documents: Mutex<HashMap<String, PlanDocument>>,
    schema_ready: AtomicBool,
    unavailable: AtomicBool,
}

impl InMemoryPlanIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent index call fail, to exercise retry paths.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Relaxed);
    }

    pub fn schema_ready(&self) -> bool {
        self.schema_ready.load(Ordering::Relaxed)
    }

    pub fn documents(&self) -> Vec<PlanDocument> {
        let mut documents: Vec<PlanDocument> =
            self.documents.lock().unwrap().values().cloned().collect();
        documents.sort_by(|a, b| a.doc_id.cmp(&b.doc_id));
        documents
    }

    pub fn document(&self, doc_id: &str) -> Option<PlanDocument> {
        self.documents.lock().unwrap().get(doc_id).cloned()
    }

    fn check_available(&self) -> Result<(), PlanIndexError> {
        if self.unavailable.load(Ordering::Relaxed) {
            Err(PlanIndexError::Unavailable("simulated outage".to_string()))
        } else {
            Ok(())
        }
    }
}

impl PlanIndex for InMemoryPlanIndex {
    fn ensure_schema(&self) -> BoxFuture<'_, Result<(), PlanIndexError>> {
        Box::pin(async move {
            self.check_available()?;
            self.schema_ready.store(true, Ordering::Relaxed);
            Ok(())
        })
    }

    fn reset_schema(&self) -> BoxFuture<'_, Result<(), PlanIndexError>> {
        Box::pin(async move {
            self.check_available()?;
            self.documents.lock().unwrap().clear();
            self.schema_ready.store(true, Ordering::Relaxed);
            Ok(())
        })
    }

    fn bulk_index(&self, documents: &[PlanDocument]) -> BoxFuture<'_, Result<(), PlanIndexError>> {
        let documents = documents.to_vec();
        Box::pin(async move {
            self.check_available()?;
            let mut stored = self.documents.lock().unwrap();
            for document in documents {
                stored.insert(document.doc_id.clone(), document);
            }
            Ok(())
        })
    }

    fn delete_document(
        &self,
        doc_id: &str,
        routing: &str,
    ) -> BoxFuture<'_, Result<(), PlanIndexError>> {
        let doc_id = doc_id.to_string();
        let routing = routing.to_string();
        Box::pin(async move {
            self.check_available()?;
            let mut stored = self.documents.lock().unwrap();
            if stored
                .get(&doc_id)
                .is_some_and(|document| document.routing == routing)
            {
                stored.remove(&doc_id);
            }
            Ok(())
        })
    }

    fn delete_routed(&self, routing: &str) -> BoxFuture<'_, Result<(), PlanIndexError>> {
        let routing = routing.to_string();
        Box::pin(async move {
            self.check_available()?;
            let mut stored = self.documents.lock().unwrap();
            stored.retain(|_, document| document.routing != routing);
            Ok(())
        })
    }

    fn search(&self, _query: &Value) -> BoxFuture<'_, Result<Vec<Value>, PlanIndexError>> {
        Box::pin(async move {
            self.check_available()?;
            let stored = self.documents.lock().unwrap();
            Ok(stored.values().map(|document| document.body.clone()).collect())
        })
    }
}
