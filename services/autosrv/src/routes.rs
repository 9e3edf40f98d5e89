//! Management API routes and handlers
//!
//! JSON in, JSON out. Engine errors map onto HTTP status codes; the
//! engine itself never sees HTTP types.

#![allow(clippy::disallowed_methods)] // json! macro used in multiple functions

use crate::engine::AutomationEngine;
use crate::error::EngineError;
use crate::types::{DataSource, Rule};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use summit_vars::Value;
use tracing::debug;

/// Shared state for all handlers
pub struct AppState {
    pub engine: Arc<AutomationEngine>,
    pub started_at_ms: i64,
}

/// Engine error as an HTTP response
struct ApiError(EngineError);

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            EngineError::InvalidArgument(_) | EngineError::Serialization(_) => {
                StatusCode::BAD_REQUEST
            },
            EngineError::ResourceExhausted(_) => StatusCode::TOO_MANY_REQUESTS,
            EngineError::NotSupported(_) => StatusCode::NOT_IMPLEMENTED,
            EngineError::Transport(_) => StatusCode::BAD_GATEWAY,
            EngineError::Hardware(_) | EngineError::Config(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            },
        };
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Create all API routes with state
pub fn create_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/status", get(engine_status))
        // Rule management
        .route("/api/rules", get(list_rules).post(register_rule))
        .route("/api/rules/{id}", get(get_rule).delete(unregister_rule))
        .route("/api/rules/{id}/enable", post(enable_rule))
        .route("/api/rules/{id}/disable", post(disable_rule))
        .route("/api/rules/{id}/trigger", post(trigger_rule))
        // Data source management
        .route("/api/sources", get(list_sources).post(register_source))
        .route("/api/sources/{id}", get(get_source).delete(unregister_source))
        .route("/api/sources/{id}/enable", post(enable_source))
        .route("/api/sources/{id}/disable", post(disable_source))
        // Variables
        .route("/api/variables", get(list_variables))
        .route(
            "/api/variables/{name}",
            get(get_variable).put(set_variable),
        )
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn engine_status(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let status = state.engine.status();
    Json(json!({
        "status": status,
        "uptime_ms": now_ms() - state.started_at_ms,
    }))
}

// Rules

async fn list_rules(State(state): State<Arc<AppState>>) -> Json<Vec<Rule>> {
    Json(state.engine.list_rules())
}

async fn register_rule(
    State(state): State<Arc<AppState>>,
    Json(rule): Json<Rule>,
) -> ApiResult<Json<serde_json::Value>> {
    let id = rule.id.clone();
    let replaced = state.engine.register_rule(rule)?;
    debug!(rule_id = %id, replaced, "rule registered via API");
    Ok(Json(json!({ "id": id, "replaced": replaced })))
}

async fn get_rule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Rule>> {
    Ok(Json(state.engine.get_rule(&id)?))
}

async fn unregister_rule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    state.engine.unregister_rule(&id)?;
    Ok(Json(json!({ "id": id, "removed": true })))
}

async fn enable_rule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    state.engine.set_rule_enabled(&id, true)?;
    Ok(Json(json!({ "id": id, "enabled": true })))
}

async fn disable_rule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    state.engine.set_rule_enabled(&id, false)?;
    Ok(Json(json!({ "id": id, "enabled": false })))
}

async fn trigger_rule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    state.engine.trigger(&id, now_ms())?;
    Ok(Json(json!({ "id": id, "triggered": true })))
}

// Sources

async fn list_sources(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!(state.engine.list_sources()))
}

async fn register_source(
    State(state): State<Arc<AppState>>,
    Json(source): Json<DataSource>,
) -> ApiResult<Json<serde_json::Value>> {
    let id = source.id.clone();
    let replaced = state.engine.register_source(source)?;
    Ok(Json(json!({ "id": id, "replaced": replaced })))
}

async fn get_source(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    Ok(Json(json!(state.engine.get_source(&id)?)))
}

async fn unregister_source(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    state.engine.unregister_source(&id)?;
    Ok(Json(json!({ "id": id, "removed": true })))
}

async fn enable_source(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    state.engine.set_source_enabled(&id, true)?;
    Ok(Json(json!({ "id": id, "enabled": true })))
}

async fn disable_source(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    state.engine.set_source_enabled(&id, false)?;
    Ok(Json(json!({ "id": id, "enabled": false })))
}

// Variables

async fn list_variables(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let mut entries = state.engine.vars().entries();
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Json(json!(entries))
}

async fn get_variable(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let var = state
        .engine
        .vars()
        .get_var(&name)
        .map_err(EngineError::from)?;
    Ok(Json(json!(var)))
}

#[derive(Debug, Deserialize)]
struct SetVariableBody {
    value: Value,
}

async fn set_variable(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(body): Json<SetVariableBody>,
) -> ApiResult<Json<serde_json::Value>> {
    state
        .engine
        .vars()
        .set(&name, body.value, now_ms())
        .map_err(EngineError::from)?;
    Ok(Json(json!({ "name": name, "set": true })))
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::actions::ActionExecutor;
    use crate::drivers::sim::SimBackend;
    use crate::engine::EngineSettings;
    use axum::{body::Body, http::Request};
    use summit_vars::VarStore;
    use tower::util::ServiceExt;

    fn build_test_state() -> Arc<AppState> {
        let vars = Arc::new(VarStore::new());
        let executor = Arc::new(ActionExecutor::with_sim(
            vars.clone(),
            Arc::new(SimBackend::new()),
        ));
        let engine = Arc::new(AutomationEngine::new(
            vars,
            executor,
            EngineSettings::default(),
        ));
        Arc::new(AppState {
            engine,
            started_at_ms: now_ms(),
        })
    }

    async fn body_json(resp: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_ok() {
        let app = create_routes(build_test_state());
        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_rule_crud_and_trigger() {
        let state = build_test_state();
        let app = create_routes(state.clone());

        let rule = serde_json::json!({
            "id": "r1",
            "name": "api rule",
            "actions": [
                { "type": "set_variable", "variable": "poked", "value": 1 }
            ]
        });
        let req = Request::builder()
            .uri("/api/rules")
            .method("POST")
            .header("content-type", "application/json")
            .body(Body::from(rule.to_string()))
            .unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let req = Request::builder()
            .uri("/api/rules/r1")
            .body(Body::empty())
            .unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["id"], "r1");

        let req = Request::builder()
            .uri("/api/rules/r1/trigger")
            .method("POST")
            .body(Body::empty())
            .unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        // dispatch runs on the worker; drain it before asserting
        state.engine.shutdown().await;
        assert_eq!(
            state.engine.vars().get("poked").unwrap(),
            summit_vars::Value::Int(1)
        );

        let req = Request::builder()
            .uri("/api/rules/unknown")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_bad_rule_is_400() {
        let app = create_routes(build_test_state());
        // gt without a literal fails normalization
        let rule = serde_json::json!({
            "id": "bad",
            "conditions": { "conditions": [ { "variable": "x", "op": "gt" } ] }
        });
        let req = Request::builder()
            .uri("/api/rules")
            .method("POST")
            .header("content-type", "application/json")
            .body(Body::from(rule.to_string()))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_variable_get_set() {
        let app = create_routes(build_test_state());
        let req = Request::builder()
            .uri("/api/variables/cpu.temp")
            .method("PUT")
            .header("content-type", "application/json")
            .body(Body::from(r#"{ "value": 55.5 }"#))
            .unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let req = Request::builder()
            .uri("/api/variables/cpu.temp")
            .body(Body::empty())
            .unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["value"], 55.5);

        let req = Request::builder()
            .uri("/api/variables/ghost")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_source_capacity_is_429() {
        let vars = Arc::new(VarStore::new());
        let executor = Arc::new(ActionExecutor::with_sim(
            vars.clone(),
            Arc::new(SimBackend::new()),
        ));
        let engine = Arc::new(AutomationEngine::new(
            vars,
            executor,
            EngineSettings {
                max_sources: 1,
                ..EngineSettings::default()
            },
        ));
        let app = create_routes(Arc::new(AppState {
            engine,
            started_at_ms: now_ms(),
        }));

        let source = |id: &str| {
            serde_json::json!({
                "id": id,
                "kind": "rest_poll",
                "endpoint": "http://127.0.0.1:1/x",
                "mappings": []
            })
        };
        for (id, expected) in [("s1", StatusCode::OK), ("s2", StatusCode::TOO_MANY_REQUESTS)] {
            let req = Request::builder()
                .uri("/api/sources")
                .method("POST")
                .header("content-type", "application/json")
                .body(Body::from(source(id).to_string()))
                .unwrap();
            let resp = app.clone().oneshot(req).await.unwrap();
            assert_eq!(resp.status(), expected, "source {}", id);
        }
    }
}
