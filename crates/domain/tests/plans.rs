use std::sync::Arc;

use planflow_domain::changes::{ChangeAction, ChangeMessage};
use planflow_domain::error::DomainError;
use planflow_domain::memory::{InMemoryChangeQueue, InMemoryPlanIndex, InMemoryPlanStore};
use planflow_domain::plan::{CostShare, LinkedPlanService, LinkedService, Plan, compute_etag};
use planflow_domain::plans::{PlanService, ReadOutcome};
use planflow_domain::ports::index::{PlanDocument, PlanIndex};
use planflow_domain::ports::queue::ChangeQueue;
use planflow_domain::projection::project_plan;
use serde_json::json;

fn cost_share(id: &str) -> CostShare {
    CostShare {
        object_id: id.to_string(),
        object_type: "membercostshare".to_string(),
        deductible: 2000,
        copay: 23,
        org: "example.com".to_string(),
    }
}

fn linked_entry(id: &str, service_id: &str) -> LinkedPlanService {
    LinkedPlanService {
        object_id: id.to_string(),
        object_type: "planservice".to_string(),
        org: "example.com".to_string(),
        linked_service: Some(LinkedService {
            object_id: service_id.to_string(),
            object_type: "service".to_string(),
            name: "Yearly physical".to_string(),
            org: "example.com".to_string(),
        }),
        planservice_cost_shares: None,
    }
}

fn sample_plan(id: &str) -> Plan {
    Plan {
        object_id: id.to_string(),
        object_type: "plan".to_string(),
        plan_type: Some("inNetwork".to_string()),
        creation_date: Some("2017-12-12".to_string()),
        org: "example.com".to_string(),
        plan_cost_shares: Some(cost_share(&format!("{id}-cs"))),
        linked_plan_services: vec![linked_entry(&format!("{id}-lps"), &format!("{id}-svc"))],
    }
}

struct Harness {
    service: PlanService,
    queue: Arc<InMemoryChangeQueue>,
    index: Arc<InMemoryPlanIndex>,
}

fn harness() -> Harness {
    let store = Arc::new(InMemoryPlanStore::new());
    let queue = Arc::new(InMemoryChangeQueue::new());
    let index = Arc::new(InMemoryPlanIndex::new());
    Harness {
        service: PlanService::new(store, queue.clone(), index.clone()),
        queue,
        index,
    }
}

async fn next_message(queue: &InMemoryChangeQueue, action: ChangeAction) -> ChangeMessage {
    let delivery = queue
        .dequeue(action, 0)
        .await
        .unwrap()
        .expect("expected a queued message");
    serde_json::from_str(&delivery.payload).unwrap()
}

#[tokio::test]
async fn create_then_read_round_trips_with_digest_etag() {
    let h = harness();
    let plan = sample_plan("plan-1");

    let created = h.service.create(plan.clone()).await.unwrap();
    assert_eq!(created.etag, compute_etag(&plan).unwrap());

    match h.service.get("plan-1", None).await.unwrap() {
        ReadOutcome::Found(stored) => {
            assert_eq!(stored.data, plan);
            assert_eq!(stored.etag, created.etag);
        }
        other => panic!("unexpected read outcome: {other:?}"),
    }

    let message = next_message(&h.queue, ChangeAction::Create).await;
    assert_eq!(message.action, ChangeAction::Create);
    assert_eq!(message.plan_id, "plan-1");
    assert_eq!(message.plan, Some(plan));
}

#[tokio::test]
async fn create_duplicate_id_conflicts() {
    let h = harness();
    h.service.create(sample_plan("plan-1")).await.unwrap();
    let err = h.service.create(sample_plan("plan-1")).await.unwrap_err();
    assert!(matches!(err, DomainError::Conflict));
    assert_eq!(h.queue.ready_len(ChangeAction::Create), 1);
}

#[tokio::test]
async fn conditional_read_returns_not_modified_on_matching_token() {
    let h = harness();
    let created = h.service.create(sample_plan("plan-1")).await.unwrap();

    let outcome = h
        .service
        .get("plan-1", Some(created.etag.as_str()))
        .await
        .unwrap();
    assert_eq!(outcome, ReadOutcome::NotModified);

    let outcome = h.service.get("plan-1", Some("stale")).await.unwrap();
    assert!(matches!(outcome, ReadOutcome::Found(_)));
}

#[tokio::test]
async fn read_missing_plan_is_not_found() {
    let h = harness();
    let err = h.service.get("nope", None).await.unwrap_err();
    assert!(matches!(err, DomainError::NotFound));
}

#[tokio::test]
async fn patch_merges_children_and_rotates_etag() {
    let h = harness();
    let created = h.service.create(sample_plan("plan-1")).await.unwrap();

    let replacement = linked_entry("plan-1-lps", "new-svc");
    let fresh = linked_entry("extra-lps", "extra-svc");
    let updated = h
        .service
        .replace_children(
            "plan-1",
            Some(created.etag.as_str()),
            vec![replacement.clone(), fresh.clone()],
        )
        .await
        .unwrap();

    assert_ne!(updated.etag, created.etag);
    assert_eq!(updated.etag, compute_etag(&updated.data).unwrap());
    let ids: Vec<&str> = updated
        .data
        .linked_plan_services
        .iter()
        .map(|entry| entry.object_id.as_str())
        .collect();
    assert_eq!(ids, vec!["plan-1-lps", "extra-lps"]);
    assert_eq!(updated.data.linked_plan_services[0], replacement);

    let message = next_message(&h.queue, ChangeAction::Update).await;
    assert_eq!(message.plan, Some(updated.data));
}

#[tokio::test]
async fn stale_if_match_fails_without_mutation() {
    let h = harness();
    let created = h.service.create(sample_plan("plan-1")).await.unwrap();

    let err = h
        .service
        .replace_children("plan-1", Some("stale-token"), vec![linked_entry("x", "y")])
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::PreconditionFailed));

    match h.service.get("plan-1", None).await.unwrap() {
        ReadOutcome::Found(stored) => assert_eq!(stored, created),
        other => panic!("unexpected read outcome: {other:?}"),
    }
    assert_eq!(h.queue.ready_len(ChangeAction::Update), 0);
}

#[tokio::test]
async fn patch_without_token_merges_unguarded() {
    let h = harness();
    let created = h.service.create(sample_plan("plan-1")).await.unwrap();

    let fresh = linked_entry("extra-lps", "extra-svc");
    let updated = h
        .service
        .replace_children("plan-1", None, vec![fresh.clone()])
        .await
        .unwrap();

    assert_ne!(updated.etag, created.etag);
    assert_eq!(updated.data.linked_plan_services.len(), 2);
    assert_eq!(updated.data.linked_plan_services[1], fresh);

    let message = next_message(&h.queue, ChangeAction::Update).await;
    assert_eq!(message.action, ChangeAction::Update);
}

#[tokio::test]
async fn patch_missing_plan_is_not_found() {
    let h = harness();
    let err = h
        .service
        .replace_children("nope", Some("token"), vec![])
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::NotFound));
}

#[tokio::test]
async fn delete_publishes_id_only_message() {
    let h = harness();
    h.service.create(sample_plan("plan-1")).await.unwrap();
    h.service.delete("plan-1").await.unwrap();

    let err = h.service.get("plan-1", None).await.unwrap_err();
    assert!(matches!(err, DomainError::NotFound));

    let message = next_message(&h.queue, ChangeAction::Delete).await;
    assert_eq!(message.action, ChangeAction::Delete);
    assert_eq!(message.plan_id, "plan-1");
    assert_eq!(message.plan, None);
}

#[tokio::test]
async fn delete_missing_plan_is_not_found() {
    let h = harness();
    let err = h.service.delete("nope").await.unwrap_err();
    assert!(matches!(err, DomainError::NotFound));
    assert_eq!(h.queue.ready_len(ChangeAction::Delete), 0);
}

#[tokio::test]
async fn delete_child_prunes_and_publishes_update() {
    let h = harness();
    let plan = sample_plan("plan-1");
    h.service.create(plan.clone()).await.unwrap();
    h.index.bulk_index(&project_plan(&plan)).await.unwrap();

    h.service.delete_child("plan-1", "plan-1-lps").await.unwrap();

    // The pruned child is removed from the index synchronously; the rest of
    // the aggregate waits for the projector.
    assert!(h.index.document("plan-1-lps").is_none());
    assert!(h.index.document("plan-1").is_some());

    match h.service.get("plan-1", None).await.unwrap() {
        ReadOutcome::Found(stored) => {
            assert!(stored.data.linked_plan_services.is_empty());
            assert_eq!(stored.etag, compute_etag(&stored.data).unwrap());
        }
        other => panic!("unexpected read outcome: {other:?}"),
    }

    let message = next_message(&h.queue, ChangeAction::Update).await;
    assert_eq!(message.action, ChangeAction::Update);
    assert!(message.plan.unwrap().linked_plan_services.is_empty());
}

#[tokio::test]
async fn delete_child_unknown_id_is_not_found_and_untouched() {
    let h = harness();
    let created = h.service.create(sample_plan("plan-1")).await.unwrap();

    let err = h.service.delete_child("plan-1", "nope").await.unwrap_err();
    assert!(matches!(err, DomainError::NotFound));

    match h.service.get("plan-1", None).await.unwrap() {
        ReadOutcome::Found(stored) => assert_eq!(stored, created),
        other => panic!("unexpected read outcome: {other:?}"),
    }
    assert_eq!(h.queue.ready_len(ChangeAction::Update), 0);
}

#[tokio::test]
async fn delete_child_survives_index_outage() {
    let h = harness();
    h.service.create(sample_plan("plan-1")).await.unwrap();

    h.index.set_unavailable(true);
    h.service.delete_child("plan-1", "plan-1-cs").await.unwrap();
    h.index.set_unavailable(false);

    match h.service.get("plan-1", None).await.unwrap() {
        ReadOutcome::Found(stored) => assert!(stored.data.plan_cost_shares.is_none()),
        other => panic!("unexpected read outcome: {other:?}"),
    }
    assert_eq!(h.queue.ready_len(ChangeAction::Update), 1);
}

#[tokio::test]
async fn search_passes_queries_through_to_the_index() {
    let h = harness();
    h.index
        .bulk_index(&[PlanDocument {
            doc_id: "plan-1".to_string(),
            routing: "plan-1".to_string(),
            body: json!({ "objectId": "plan-1", "objectType": "plan" }),
        }])
        .await
        .unwrap();

    let hits = h
        .service
        .search(&json!({ "query": { "match_all": {} } }))
        .await
        .unwrap();
    assert_eq!(hits, vec![json!({ "objectId": "plan-1", "objectType": "plan" })]);

    h.index.set_unavailable(true);
    let err = h
        .service
        .search(&json!({ "query": { "match_all": {} } }))
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::Infra(_)));
}

#[tokio::test]
async fn create_rejects_duplicate_ids_within_aggregate() {
    let h = harness();
    let mut plan = sample_plan("plan-1");
    plan.linked_plan_services
        .push(linked_entry("plan-1-lps", "other-svc"));

    let err = h.service.create(plan).await.unwrap_err();
    assert!(matches!(err, DomainError::Validation(_)));
    assert_eq!(h.queue.ready_len(ChangeAction::Create), 0);
}
