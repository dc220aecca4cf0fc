use std::sync::Arc;

use serde_json::{Value, json};

use crate::changes::{ChangeAction, ChangeMessage};
use crate::plan::Plan;
use crate::ports::index::{PlanDocument, PlanIndex, PlanIndexError};
use crate::ports::queue::ChangeDelivery;

pub const RELATION_PLAN: &str = "plan";
pub const RELATION_PLAN_COST_SHARE: &str = "planCostShare";
pub const RELATION_LINKED_PLAN_SERVICE: &str = "linkedPlanService";
pub const RELATION_SERVICE: &str = "service";
pub const RELATION_MEMBER_COST_SHARE: &str = "membercostshare";

fn child_doc(routing: &str, doc_id: &str, mut body: Value, relation: &str, parent: &str) -> PlanDocument {
    body["join_field"] = json!({ "name": relation, "parent": parent });
    PlanDocument {
        doc_id: doc_id.to_string(),
        routing: routing.to_string(),
        body,
    }
}

/// Flatten the aggregate into one document per tree node. Every document is
/// routed by the root id; child documents carry a parent pointer in
/// `join_field`, the root carries the bare relation name.
pub fn project_plan(plan: &Plan) -> Vec<PlanDocument> {
    let routing = plan.object_id.as_str();
    let mut documents = Vec::new();

    let mut root = json!({
        "objectId": plan.object_id,
        "objectType": plan.object_type,
        "_org": plan.org,
        "join_field": RELATION_PLAN,
    });
    if let Some(plan_type) = &plan.plan_type {
        root["planType"] = json!(plan_type);
    }
    if let Some(creation_date) = &plan.creation_date {
        root["creationDate"] = json!(creation_date);
    }
    documents.push(PlanDocument {
        doc_id: plan.object_id.clone(),
        routing: routing.to_string(),
        body: root,
    });

    if let Some(share) = &plan.plan_cost_shares {
        documents.push(child_doc(
            routing,
            &share.object_id,
            serde_json::to_value(share).unwrap_or_default(),
            RELATION_PLAN_COST_SHARE,
            routing,
        ));
    }

    for entry in &plan.linked_plan_services {
        let body = json!({
            "objectId": entry.object_id,
            "objectType": entry.object_type,
            "_org": entry.org,
        });
        documents.push(child_doc(
            routing,
            &entry.object_id,
            body,
            RELATION_LINKED_PLAN_SERVICE,
            routing,
        ));

        if let Some(service) = &entry.linked_service {
            documents.push(child_doc(
                routing,
                &service.object_id,
                serde_json::to_value(service).unwrap_or_default(),
                RELATION_SERVICE,
                &entry.object_id,
            ));
        }
        if let Some(share) = &entry.planservice_cost_shares {
            documents.push(child_doc(
                routing,
                &share.object_id,
                serde_json::to_value(share).unwrap_or_default(),
                RELATION_MEMBER_COST_SHARE,
                &entry.object_id,
            ));
        }
    }

    documents
}

/// What the consumer loop should do with a delivery once handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    Retry,
    DeadLetter,
}

/// Applies change messages to the document index. Redelivery-safe: an
/// aggregate is always projected by deleting everything under its routing and
/// bulk-inserting the fresh document set.
pub struct Projector {
    index: Arc<dyn PlanIndex>,
    max_delivery_attempts: u32,
}

impl Projector {
    pub fn new(index: Arc<dyn PlanIndex>, max_delivery_attempts: u32) -> Self {
        Self {
            index,
            max_delivery_attempts,
        }
    }

    pub async fn handle(&self, delivery: &ChangeDelivery) -> Disposition {
        let message: ChangeMessage = match serde_json::from_str(&delivery.payload) {
            Ok(message) => message,
            Err(err) => {
                tracing::error!(
                    message_id = %delivery.message_id,
                    error = %err,
                    "undecodable change payload"
                );
                return Disposition::DeadLetter;
            }
        };

        let result = match (message.action, &message.plan) {
            (ChangeAction::Create | ChangeAction::Update, Some(plan)) => {
                self.reproject(plan).await
            }
            (ChangeAction::Create | ChangeAction::Update, None) => {
                tracing::error!(
                    message_id = %delivery.message_id,
                    plan_id = %message.plan_id,
                    "change message missing aggregate body"
                );
                return Disposition::DeadLetter;
            }
            (ChangeAction::Delete, _) => self.index.delete_routed(&message.plan_id).await,
        };

        match result {
            Ok(()) => Disposition::Ack,
            Err(err) => {
                tracing::warn!(
                    message_id = %delivery.message_id,
                    plan_id = %message.plan_id,
                    attempt = delivery.attempt,
                    error = %err,
                    "change application failed"
                );
                if delivery.attempt >= self.max_delivery_attempts {
                    Disposition::DeadLetter
                } else {
                    Disposition::Retry
                }
            }
        }
    }

    async fn reproject(&self, plan: &Plan) -> Result<(), PlanIndexError> {
        self.index.delete_routed(&plan.object_id).await?;
        self.index.bulk_index(&project_plan(plan)).await
    }
}
