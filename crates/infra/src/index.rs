use planflow_domain::ports::index::{PlanDocument, PlanIndex, PlanIndexError};
use reqwest::StatusCode;
use serde_json::{Value, json};

use crate::config::AppConfig;

/// Elasticsearch client over the plain REST API: `_bulk` with per-document
/// routing, `_delete_by_query` for whole aggregates, `_doc` deletes for
/// single children, `_search` for queries.
#[derive(Clone)]
pub struct ElasticPlanIndex {
    http: reqwest::Client,
    base_url: String,
    index_name: String,
}

pub fn index_mappings() -> Value {
    json!({
        "mappings": {
            "properties": {
                "objectId": { "type": "keyword" },
                "objectType": { "type": "keyword" },
                "planType": { "type": "keyword" },
                "_org": { "type": "keyword" },
                "name": { "type": "text" },
                "deductible": { "type": "long" },
                "copay": { "type": "long" },
                "creationDate": {
                    "type": "date",
                    "format": "MM-dd-yyyy||yyyy-MM-dd"
                },
                "join_field": {
                    "type": "join",
                    "relations": {
                        "plan": ["planCostShare", "linkedPlanService"],
                        "linkedPlanService": ["membercostshare", "service"]
                    }
                }
            }
        }
    })
}

impl ElasticPlanIndex {
    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(&config.elastic_url, &config.elastic_index)
    }

    pub fn new(base_url: &str, index_name: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            index_name: index_name.to_string(),
        }
    }

    fn index_url(&self) -> String {
        format!("{}/{}", self.base_url, self.index_name)
    }

    async fn create_index(&self) -> Result<(), PlanIndexError> {
        let response = self
            .http
            .put(self.index_url())
            .json(&index_mappings())
            .send()
            .await
            .map_err(transport_error)?;
        check_response(response).await
    }

    async fn ensure_schema_inner(&self) -> Result<(), PlanIndexError> {
        let response = self
            .http
            .head(self.index_url())
            .send()
            .await
            .map_err(transport_error)?;
        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => self.create_index().await,
            status => Err(status_error(status, String::new())),
        }
    }

    async fn reset_schema_inner(&self) -> Result<(), PlanIndexError> {
        let response = self
            .http
            .delete(self.index_url())
            .send()
            .await
            .map_err(transport_error)?;
        if !response.status().is_success() && response.status() != StatusCode::NOT_FOUND {
            let status = response.status();
            let message = response.text().await.unwrap_or_default();
            return Err(status_error(status, message));
        }
        self.create_index().await
    }

    async fn bulk_index_inner(&self, documents: Vec<PlanDocument>) -> Result<(), PlanIndexError> {
        if documents.is_empty() {
            return Ok(());
        }
        let mut body = String::new();
        for document in &documents {
            let action = json!({
                "index": {
                    "_index": self.index_name,
                    "_id": document.doc_id,
                    "routing": document.routing,
                }
            });
            body.push_str(&action.to_string());
            body.push('\n');
            body.push_str(&document.body.to_string());
            body.push('\n');
        }

        let response = self
            .http
            .post(format!("{}/_bulk?refresh=true", self.base_url))
            .header("content-type", "application/x-ndjson")
            .body(body)
            .send()
            .await
            .map_err(transport_error)?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(status_error(status, message));
        }

        let report: Value = response
            .json()
            .await
            .map_err(|err| PlanIndexError::Operation(err.to_string()))?;
        if report["errors"].as_bool().unwrap_or(false) {
            return Err(PlanIndexError::Rejected(format!(
                "bulk insert reported item failures: {report}"
            )));
        }
        Ok(())
    }

    async fn delete_document_inner(
        &self,
        doc_id: String,
        routing: String,
    ) -> Result<(), PlanIndexError> {
        let response = self
            .http
            .delete(format!(
                "{}/_doc/{doc_id}?routing={routing}&refresh=true",
                self.index_url()
            ))
            .send()
            .await
            .map_err(transport_error)?;
        let status = response.status();
        // already gone is fine
        if status.is_success() || status == StatusCode::NOT_FOUND {
            return Ok(());
        }
        let message = response.text().await.unwrap_or_default();
        Err(status_error(status, message))
    }

    async fn delete_routed_inner(&self, routing: String) -> Result<(), PlanIndexError> {
        let response = self
            .http
            .post(format!(
                "{}/_delete_by_query?routing={routing}&conflicts=proceed&refresh=true",
                self.index_url()
            ))
            .json(&json!({ "query": { "match_all": {} } }))
            .send()
            .await
            .map_err(transport_error)?;
        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            return Ok(());
        }
        let message = response.text().await.unwrap_or_default();
        Err(status_error(status, message))
    }

    async fn search_inner(&self, query: Value) -> Result<Vec<Value>, PlanIndexError> {
        let response = self
            .http
            .post(format!("{}/_search", self.index_url()))
            .json(&query)
            .send()
            .await
            .map_err(transport_error)?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(status_error(status, message));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|err| PlanIndexError::Operation(err.to_string()))?;
        let hits = body["hits"]["hits"]
            .as_array()
            .cloned()
            .unwrap_or_default();
        Ok(hits
            .into_iter()
            .filter_map(|hit| hit.get("_source").cloned())
            .collect())
    }
}

fn transport_error(err: reqwest::Error) -> PlanIndexError {
    PlanIndexError::Unavailable(err.to_string())
}

fn status_error(status: StatusCode, message: String) -> PlanIndexError {
    if status.is_client_error() {
        PlanIndexError::Rejected(format!("status {}: {message}", status.as_u16()))
    } else {
        PlanIndexError::Operation(format!("status {}: {message}", status.as_u16()))
    }
}

async fn check_response(response: reqwest::Response) -> Result<(), PlanIndexError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let message = response.text().await.unwrap_or_default();
    Err(status_error(status, message))
}

impl PlanIndex for ElasticPlanIndex {
    fn ensure_schema(&self) -> planflow_domain::ports::BoxFuture<'_, Result<(), PlanIndexError>> {
        Box::pin(self.ensure_schema_inner())
    }

    fn reset_schema(&self) -> planflow_domain::ports::BoxFuture<'_, Result<(), PlanIndexError>> {
        Box::pin(self.reset_schema_inner())
    }

    fn bulk_index(
        &self,
        documents: &[PlanDocument],
    ) -> planflow_domain::ports::BoxFuture<'_, Result<(), PlanIndexError>> {
        let documents = documents.to_vec();
        Box::pin(self.bulk_index_inner(documents))
    }

    fn delete_document(
        &self,
        doc_id: &str,
        routing: &str,
    ) -> planflow_domain::ports::BoxFuture<'_, Result<(), PlanIndexError>> {
        Box::pin(self.delete_document_inner(doc_id.to_string(), routing.to_string()))
    }

    fn delete_routed(
        &self,
        routing: &str,
    ) -> planflow_domain::ports::BoxFuture<'_, Result<(), PlanIndexError>> {
        Box::pin(self.delete_routed_inner(routing.to_string()))
    }

    fn search(
        &self,
        query: &Value,
    ) -> planflow_domain::ports::BoxFuture<'_, Result<Vec<Value>, PlanIndexError>> {
        Box::pin(self.search_inner(query.clone()))
    }
}
