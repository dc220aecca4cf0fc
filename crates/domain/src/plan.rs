use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use validator::Validate;

use crate::DomainResult;
use crate::error::DomainError;

/// Root aggregate. Field names follow the external JSON contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct Plan {
    #[serde(rename = "objectId")]
    #[validate(length(min = 1))]
    pub object_id: String,
    #[serde(rename = "objectType")]
    #[validate(length(min = 1))]
    pub object_type: String,
    #[serde(rename = "planType", default, skip_serializing_if = "Option::is_none")]
    pub plan_type: Option<String>,
    #[serde(
        rename = "creationDate",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub creation_date: Option<String>,
    #[serde(rename = "_org")]
    pub org: String,
    #[serde(
        rename = "planCostShares",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    #[validate(nested)]
    pub plan_cost_shares: Option<CostShare>,
    #[serde(rename = "linkedPlanServices", default)]
    #[validate(nested)]
    pub linked_plan_services: Vec<LinkedPlanService>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct CostShare {
    #[serde(rename = "objectId")]
    #[validate(length(min = 1))]
    pub object_id: String,
    #[serde(rename = "objectType")]
    #[validate(length(min = 1))]
    pub object_type: String,
    pub deductible: i64,
    pub copay: i64,
    #[serde(rename = "_org")]
    pub org: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct LinkedPlanService {
    #[serde(rename = "objectId")]
    #[validate(length(min = 1))]
    pub object_id: String,
    #[serde(rename = "objectType")]
    #[validate(length(min = 1))]
    pub object_type: String,
    #[serde(rename = "_org")]
    pub org: String,
    #[serde(
        rename = "linkedService",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    #[validate(nested)]
    pub linked_service: Option<LinkedService>,
    #[serde(
        rename = "planserviceCostShares",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    #[validate(nested)]
    pub planservice_cost_shares: Option<CostShare>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct LinkedService {
    #[serde(rename = "objectId")]
    #[validate(length(min = 1))]
    pub object_id: String,
    #[serde(rename = "objectType")]
    #[validate(length(min = 1))]
    pub object_type: String,
    #[validate(length(min = 1))]
    pub name: String,
    #[serde(rename = "_org")]
    pub org: String,
}

/// Concurrency token: hex SHA-256 over the serialized body. A pure function
/// of the aggregate, so equal bodies always carry equal tokens.
pub fn compute_etag(plan: &Plan) -> DomainResult<String> {
    let body = serde_json::to_vec(plan)
        .map_err(|err| DomainError::Infra(format!("etag serialization: {err}")))?;
    let mut hasher = Sha256::new();
    hasher.update(&body);
    Ok(hex::encode(hasher.finalize()))
}

fn collect_node_ids(plan: &Plan) -> Vec<&str> {
    let mut ids = vec![plan.object_id.as_str()];
    if let Some(share) = &plan.plan_cost_shares {
        ids.push(share.object_id.as_str());
    }
    for entry in &plan.linked_plan_services {
        ids.push(entry.object_id.as_str());
        if let Some(service) = &entry.linked_service {
            ids.push(service.object_id.as_str());
        }
        if let Some(share) = &entry.planservice_cost_shares {
            ids.push(share.object_id.as_str());
        }
    }
    ids
}

/// Field-level constraints come from the `Validate` derives; the cross-node
/// objectId uniqueness invariant spans the whole tree and is checked by hand.
pub fn validate_plan(plan: &Plan) -> DomainResult<()> {
    plan.validate()
        .map_err(|err| DomainError::Validation(err.to_string()))?;

    let ids = collect_node_ids(plan);
    let mut seen = HashSet::new();
    for id in ids {
        if !seen.insert(id) {
            return Err(DomainError::Validation(format!(
                "duplicate objectId in aggregate: {id}"
            )));
        }
    }
    Ok(())
}

impl Plan {
    /// Remove the node with `child_id` from the tree. The search order is
    /// fixed: root cost-share first, then whole linked-service entries, then
    /// the optional nodes inside each remaining entry. The per-entry pass
    /// clears every occurrence rather than stopping at the first hit.
    pub fn prune_child(&mut self, child_id: &str) -> bool {
        if self
            .plan_cost_shares
            .as_ref()
            .is_some_and(|share| share.object_id == child_id)
        {
            self.plan_cost_shares = None;
            return true;
        }

        let before = self.linked_plan_services.len();
        self.linked_plan_services
            .retain(|entry| entry.object_id != child_id);
        if self.linked_plan_services.len() != before {
            return true;
        }

        let mut removed = false;
        for entry in &mut self.linked_plan_services {
            if entry
                .linked_service
                .as_ref()
                .is_some_and(|service| service.object_id == child_id)
            {
                entry.linked_service = None;
                removed = true;
            }
            if entry
                .planservice_cost_shares
                .as_ref()
                .is_some_and(|share| share.object_id == child_id)
            {
                entry.planservice_cost_shares = None;
                removed = true;
            }
        }
        removed
    }

    /// Set-union merge of linked-service entries keyed by `objectId`:
    /// existing entries whose id reappears in `incoming` are dropped, then the
    /// incoming entries are appended in order. Duplicate ids within
    /// `incoming` keep the first occurrence.
    pub fn merge_linked_services(&mut self, incoming: Vec<LinkedPlanService>) {
        let incoming_ids: HashSet<&str> = incoming
            .iter()
            .map(|entry| entry.object_id.as_str())
            .collect();
        self.linked_plan_services
            .retain(|entry| !incoming_ids.contains(entry.object_id.as_str()));

        let mut seen: HashSet<String> = HashSet::new();
        for entry in incoming {
            if seen.insert(entry.object_id.clone()) {
                self.linked_plan_services.push(entry);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cost_share(id: &str) -> CostShare {
        CostShare {
            object_id: id.to_string(),
            object_type: "membercostshare".to_string(),
            deductible: 2000,
            copay: 23,
            org: "example.com".to_string(),
        }
    }

    fn linked_entry(id: &str, service_id: &str, share_id: &str) -> LinkedPlanService {
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
            planservice_cost_shares: Some(cost_share(share_id)),
        }
    }

    fn sample_plan() -> Plan {
        Plan {
            object_id: "plan-1".to_string(),
            object_type: "plan".to_string(),
            plan_type: Some("inNetwork".to_string()),
            creation_date: Some("2017-12-12".to_string()),
            org: "example.com".to_string(),
            plan_cost_shares: Some(cost_share("cs-root")),
            linked_plan_services: vec![linked_entry("lps-1", "svc-1", "cs-1")],
        }
    }

    #[test]
    fn etag_is_pure() {
        let plan = sample_plan();
        assert_eq!(compute_etag(&plan).unwrap(), compute_etag(&plan).unwrap());
    }

    #[test]
    fn etag_changes_with_any_field() {
        let plan = sample_plan();
        let base = compute_etag(&plan).unwrap();

        let mut changed = plan.clone();
        changed.plan_type = Some("outOfNetwork".to_string());
        assert_ne!(base, compute_etag(&changed).unwrap());

        let mut changed = plan.clone();
        changed.plan_cost_shares.as_mut().unwrap().copay = 24;
        assert_ne!(base, compute_etag(&changed).unwrap());

        let mut changed = plan;
        changed.linked_plan_services[0]
            .linked_service
            .as_mut()
            .unwrap()
            .name = "Quarterly physical".to_string();
        assert_ne!(base, compute_etag(&changed).unwrap());
    }

    #[test]
    fn validate_rejects_empty_node_id() {
        let mut plan = sample_plan();
        plan.linked_plan_services[0].object_id = String::new();
        assert!(matches!(
            validate_plan(&plan),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn validate_rejects_empty_object_type_in_nested_node() {
        let mut plan = sample_plan();
        plan.plan_cost_shares.as_mut().unwrap().object_type = String::new();
        assert!(matches!(
            validate_plan(&plan),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn validate_rejects_duplicate_node_ids() {
        let mut plan = sample_plan();
        plan.plan_cost_shares.as_mut().unwrap().object_id = "svc-1".to_string();
        assert!(matches!(
            validate_plan(&plan),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn prune_removes_root_cost_share_first() {
        let mut plan = sample_plan();
        assert!(plan.prune_child("cs-root"));
        assert!(plan.plan_cost_shares.is_none());
        assert_eq!(plan.linked_plan_services.len(), 1);
    }

    #[test]
    fn prune_removes_whole_entry_by_id() {
        let mut plan = sample_plan();
        assert!(plan.prune_child("lps-1"));
        assert!(plan.linked_plan_services.is_empty());
    }

    #[test]
    fn prune_clears_nested_nodes_without_short_circuit() {
        let mut plan = sample_plan();
        plan.linked_plan_services
            .push(linked_entry("lps-2", "shared", "cs-2"));
        plan.linked_plan_services[0]
            .planservice_cost_shares
            .as_mut()
            .unwrap()
            .object_id = "shared".to_string();

        assert!(plan.prune_child("shared"));
        assert!(plan.linked_plan_services[0].planservice_cost_shares.is_none());
        assert!(plan.linked_plan_services[1].linked_service.is_none());
    }

    #[test]
    fn prune_unknown_id_leaves_body_untouched() {
        let mut plan = sample_plan();
        let before = plan.clone();
        assert!(!plan.prune_child("nope"));
        assert_eq!(plan, before);
    }

    #[test]
    fn merge_replaces_matching_ids_and_appends_new() {
        let mut plan = sample_plan();
        plan.linked_plan_services
            .push(linked_entry("lps-2", "svc-2", "cs-2"));

        let mut replacement = linked_entry("lps-1", "svc-9", "cs-9");
        replacement.org = "replacement.example.com".to_string();
        let fresh = linked_entry("lps-3", "svc-3", "cs-3");
        plan.merge_linked_services(vec![replacement.clone(), fresh.clone()]);

        let ids: Vec<&str> = plan
            .linked_plan_services
            .iter()
            .map(|entry| entry.object_id.as_str())
            .collect();
        assert_eq!(ids, vec!["lps-2", "lps-1", "lps-3"]);
        assert_eq!(plan.linked_plan_services[1], replacement);
        assert_eq!(plan.linked_plan_services[2], fresh);
    }

    #[test]
    fn merge_dedupes_within_incoming() {
        let mut plan = sample_plan();
        let first = linked_entry("lps-2", "svc-2", "cs-2");
        let mut second = linked_entry("lps-2", "svc-9", "cs-9");
        second.org = "late.example.com".to_string();
        plan.merge_linked_services(vec![first.clone(), second]);

        assert_eq!(plan.linked_plan_services.len(), 2);
        assert_eq!(plan.linked_plan_services[1], first);
    }

    #[test]
    fn optional_nodes_are_omitted_from_json() {
        let mut plan = sample_plan();
        plan.plan_cost_shares = None;
        plan.plan_type = None;
        let value = serde_json::to_value(&plan).unwrap();
        assert!(value.get("planCostShares").is_none());
        assert!(value.get("planType").is_none());
        assert_eq!(value["_org"], "example.com");
    }
}
