use serde::{Deserialize, Serialize};

use crate::plan::Plan;
use crate::util::{format_ms_rfc3339, now_ms};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    Create,
    Update,
    Delete,
}

impl ChangeAction {
    pub const ALL: [ChangeAction; 3] = [
        ChangeAction::Create,
        ChangeAction::Update,
        ChangeAction::Delete,
    ];

    pub fn queue_name(self) -> &'static str {
        match self {
            ChangeAction::Create => "plan.create",
            ChangeAction::Update => "plan.update",
            ChangeAction::Delete => "plan.delete",
        }
    }
}

/// Wire payload published after every successful mutation. Delete messages
/// carry the plan id only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeMessage {
    pub action: ChangeAction,
    #[serde(rename = "planId")]
    pub plan_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<Plan>,
    pub timestamp: String,
}

impl ChangeMessage {
    pub fn create(plan: Plan) -> Self {
        Self {
            action: ChangeAction::Create,
            plan_id: plan.object_id.clone(),
            plan: Some(plan),
            timestamp: format_ms_rfc3339(now_ms()),
        }
    }

    pub fn update(plan: Plan) -> Self {
        Self {
            action: ChangeAction::Update,
            plan_id: plan.object_id.clone(),
            plan: Some(plan),
            timestamp: format_ms_rfc3339(now_ms()),
        }
    }

    pub fn delete(plan_id: String) -> Self {
        Self {
            action: ChangeAction::Delete,
            plan_id,
            plan: None,
            timestamp: format_ms_rfc3339(now_ms()),
        }
    }
}
