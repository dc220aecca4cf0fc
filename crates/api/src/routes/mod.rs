use axum::extract::{Path, State};
use axum::{
    Json, Router,
    http::{HeaderMap, StatusCode, header},
    middleware,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use planflow_domain::plan::{LinkedPlanService, Plan};
use planflow_domain::plans::ReadOutcome;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use validator::Validate;

use crate::observability;
use crate::{error::ApiError, middleware as app_middleware, state::AppState};

pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/v1/plan", post(create_plan))
        .route(
            "/v1/plan/:plan_id",
            get(get_plan).patch(patch_plan).delete(delete_plan),
        )
        .route(
            "/v1/plan/:plan_id/children/:child_id",
            delete(delete_plan_child),
        )
        .route("/v1/plan/search", post(search_plans))
        .route_layer(middleware::from_fn(app_middleware::require_auth_middleware));

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .merge(protected)
        .layer(middleware::from_fn(app_middleware::metrics_layer))
        .layer(app_middleware::timeout_layer())
        .layer(app_middleware::trace_layer())
        .layer(app_middleware::set_request_id_layer())
        .layer(app_middleware::propagate_request_id_layer())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            app_middleware::auth_middleware,
        ))
        .layer(middleware::from_fn(
            app_middleware::correlation_id_middleware,
        ))
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    environment: String,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        environment: state.config.app_env.clone(),
    })
}

async fn metrics() -> Response {
    match observability::render_metrics() {
        Some(body) => (StatusCode::OK, body).into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "recorder not installed").into_response(),
    }
}

async fn create_plan(
    State(state): State<AppState>,
    Json(plan): Json<Plan>,
) -> Result<Response, ApiError> {
    plan.validate()?;
    let stored = state.plans.create(plan).await?;
    observability::register_change_published("create");
    Ok(plan_response(StatusCode::CREATED, &stored.etag, &stored.data))
}

async fn get_plan(
    State(state): State<AppState>,
    Path(plan_id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let token = conditional_token(&headers, header::IF_NONE_MATCH);
    match state.plans.get(&plan_id, token.as_deref()).await? {
        ReadOutcome::NotModified => Ok(StatusCode::NOT_MODIFIED.into_response()),
        ReadOutcome::Found(stored) => Ok(plan_response(StatusCode::OK, &stored.etag, &stored.data)),
    }
}

#[derive(Debug, Deserialize, Validate)]
struct PatchPlanRequest {
    #[serde(rename = "linkedPlanServices", default)]
    #[validate(nested)]
    linked_plan_services: Vec<LinkedPlanService>,
}

async fn patch_plan(
    State(state): State<AppState>,
    Path(plan_id): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<PatchPlanRequest>,
) -> Result<Response, ApiError> {
    payload.validate()?;
    // Without an If-Match header the merge is unguarded.
    let token = conditional_token(&headers, header::IF_MATCH);
    let stored = state
        .plans
        .replace_children(&plan_id, token.as_deref(), payload.linked_plan_services)
        .await?;
    observability::register_change_published("update");
    Ok(plan_response(StatusCode::OK, &stored.etag, &stored.data))
}

async fn delete_plan(
    State(state): State<AppState>,
    Path(plan_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.plans.delete(&plan_id).await?;
    observability::register_change_published("delete");
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_plan_child(
    State(state): State<AppState>,
    Path((plan_id, child_id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    state.plans.delete_child(&plan_id, &child_id).await?;
    observability::register_change_published("update");
    Ok(StatusCode::NO_CONTENT)
}

async fn search_plans(
    State(state): State<AppState>,
    Json(query): Json<Value>,
) -> Result<Json<Vec<Value>>, ApiError> {
    let hits = state.plans.search(&query).await?;
    Ok(Json(hits))
}

fn plan_response(status: StatusCode, etag: &str, plan: &Plan) -> Response {
    let mut response = (status, Json(plan)).into_response();
    if let Ok(value) = format!("\"{etag}\"").parse() {
        response.headers_mut().insert(header::ETAG, value);
    }
    response
}

// Accepts quoted and weak validator forms; comparison happens on the bare digest.
fn conditional_token(headers: &HeaderMap, name: header::HeaderName) -> Option<String> {
    let value = headers.get(name)?.to_str().ok()?;
    let value = value.trim();
    let value = value.strip_prefix("W/").unwrap_or(value);
    let value = value.trim_matches('"');
    if value.is_empty() {
        return None;
    }
    Some(value.to_string())
}
