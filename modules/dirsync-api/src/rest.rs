//! The REST control surface: search CRUD, result-cache queries, runtime
//! log-level changes, and health probes.

use std::sync::{Arc, RwLock};

use axum::extract::{Form, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post, put};
use axum::Router;
use serde::Deserialize;
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::warn;
use tracing_subscriber::{reload, EnvFilter, Registry};

use dirsync_common::SearchSpec;
use dirsync_engine::SyncEngine;

pub struct AppState {
    pub engine: SyncEngine,
    pub loglevel: RwLock<String>,
    pub reload: reload::Handle<EnvFilter, Registry>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/search", post(create_search).get(get_search))
        .route("/search/{id}", put(update_search).delete(delete_search))
        .route("/results/{id}", get(search_results))
        .route("/loglevel", get(get_loglevel).put(put_loglevel))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// --- Form / query structs ---

#[derive(Deserialize)]
pub struct SearchForm {
    id: Option<String>,
    filter: Option<String>,
    refresh: Option<String>,
    #[serde(rename = "baseDN")]
    base_dn: Option<String>,
    #[serde(rename = "oneShot")]
    one_shot: Option<String>,
}

#[derive(Deserialize)]
pub struct GetSearchQuery {
    id: Option<String>,
}

#[derive(Deserialize)]
pub struct ResultsQuery {
    full: Option<bool>,
}

#[derive(Deserialize)]
pub struct LogLevelBody {
    level: String,
}

/// Validate form fields into a spec. `id_override` comes from the path on
/// PUT. Any missing required field or parse failure is a 400.
fn form_to_spec(form: SearchForm, id_override: Option<String>) -> Result<SearchSpec, String> {
    let id = id_override
        .or(form.id)
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .ok_or("id is required")?;
    let filter = form
        .filter
        .map(|f| f.trim().to_string())
        .filter(|f| !f.is_empty())
        .ok_or("filter is required")?;
    let refresh = form
        .refresh
        .ok_or("refresh is required")?
        .trim()
        .parse::<u64>()
        .map_err(|_| "refresh must be an integer number of seconds")?;
    let oneshot = match form.one_shot {
        None => true,
        Some(v) => v
            .trim()
            .parse::<bool>()
            .map_err(|_| "oneShot must be a boolean")?,
    };
    let base_dn = form
        .base_dn
        .map(|b| b.trim().to_string())
        .filter(|b| !b.is_empty());
    Ok(SearchSpec {
        id,
        filter,
        refresh,
        base_dn,
        oneshot,
    })
}

// --- Handlers ---

async fn create_search(
    State(state): State<Arc<AppState>>,
    Form(form): Form<SearchForm>,
) -> impl IntoResponse {
    let spec = match form_to_spec(form, None) {
        Ok(spec) => spec,
        Err(msg) => return (StatusCode::BAD_REQUEST, msg).into_response(),
    };
    match state.engine.registry.create(spec).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    }
}

async fn get_search(
    State(state): State<Arc<AppState>>,
    Query(query): Query<GetSearchQuery>,
) -> impl IntoResponse {
    match query.id {
        Some(id) => match state.engine.registry.get(&id) {
            Some(spec) => Json(spec).into_response(),
            None => StatusCode::NOT_FOUND.into_response(),
        },
        None => Json(state.engine.registry.list()).into_response(),
    }
}

async fn update_search(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Form(form): Form<SearchForm>,
) -> impl IntoResponse {
    let spec = match form_to_spec(form, Some(id)) {
        Ok(spec) => spec,
        Err(msg) => return (StatusCode::BAD_REQUEST, msg).into_response(),
    };
    match state.engine.registry.replace(spec).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    }
}

async fn delete_search(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.engine.registry.remove(&id).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn search_results(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<ResultsQuery>,
) -> impl IntoResponse {
    let Some(entries) = state.engine.detector.entries(&id) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let full = query.full.unwrap_or(false);
    let items: Vec<serde_json::Value> = entries
        .iter()
        .map(|entry| {
            if full {
                json!({"dn": entry.dn, "content": entry.content})
            } else {
                json!({"dn": entry.dn})
            }
        })
        .collect();
    Json(items).into_response()
}

async fn get_loglevel(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let level = state.loglevel.read().unwrap().clone();
    Json(json!({"level": level}))
}

async fn put_loglevel(
    State(state): State<Arc<AppState>>,
    Json(body): Json<LogLevelBody>,
) -> impl IntoResponse {
    if !matches!(body.level.as_str(), "debug" | "info" | "warn" | "error") {
        return (
            StatusCode::BAD_REQUEST,
            "level must be one of debug|info|warn|error".to_string(),
        )
            .into_response();
    }
    if let Err(e) = state.reload.reload(EnvFilter::new(&body.level)) {
        warn!(error = %e, "Log level reload failed");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    *state.loglevel.write().unwrap() = body.level.clone();
    Json(json!({"level": body.level})).into_response()
}

async fn healthz() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

async fn readyz() -> impl IntoResponse {
    Json(json!({"status": "ready"}))
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request};
    use tower::ServiceExt;

    use dirsync_common::{AttrValue, HookRetryConfig};
    use dirsync_engine::testing::{source_entry, MemoryDirectory, StubSource};
    use dirsync_engine::{DirectoryWriter, SourceClient};

    fn test_state() -> Arc<AppState> {
        let source: Arc<dyn SourceClient> = StubSource::new();
        let writer: Arc<dyn DirectoryWriter> = MemoryDirectory::new();
        let engine = SyncEngine::build(
            vec![],
            HookRetryConfig::default(),
            "dc=src".to_string(),
            source,
            writer,
            None,
        );
        let (layer, handle) = reload::Layer::new(EnvFilter::new("info"));
        // Keep the layer's Arc alive: `handle` only holds a Weak reference,
        // and without an owner the layer is dropped immediately, making
        // every `handle.reload()` call fail.
        std::mem::forget(layer);
        Arc::new(AppState {
            engine,
            loglevel: RwLock::new("info".to_string()),
            reload: handle,
        })
    }

    fn form_request(method: &str, uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn create_then_list_and_get() {
        let state = test_state();
        let app = router(Arc::clone(&state));

        let response = app
            .clone()
            .oneshot(form_request(
                "POST",
                "/search",
                "id=s1&filter=%28uid%3D*%29&refresh=5&oneShot=false",
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app.clone().oneshot(
            Request::builder().uri("/search").body(Body::empty()).unwrap(),
        )
        .await
        .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let listed = body_json(response).await;
        assert_eq!(listed.as_array().map(|a| a.len()), Some(1));
        assert_eq!(listed[0]["id"], "s1");
        assert_eq!(listed[0]["oneshot"], false);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/search?id=s1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let spec = body_json(response).await;
        assert_eq!(spec["filter"], "(uid=*)");

        state.engine.registry.shutdown();
    }

    #[tokio::test]
    async fn missing_fields_and_bad_values_are_400() {
        let state = test_state();
        let app = router(Arc::clone(&state));

        let response = app
            .clone()
            .oneshot(form_request("POST", "/search", "id=s1&refresh=5"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .clone()
            .oneshot(form_request(
                "POST",
                "/search",
                "id=s1&filter=x&refresh=soon",
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .clone()
            .oneshot(form_request(
                "POST",
                "/search",
                "id=s1&filter=x&refresh=5&oneShot=maybe",
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        state.engine.registry.shutdown();
    }

    #[tokio::test]
    async fn duplicate_create_and_unknown_update_are_400() {
        let state = test_state();
        let app = router(Arc::clone(&state));

        let create = "id=s1&filter=x&refresh=5";
        let response = app
            .clone()
            .oneshot(form_request("POST", "/search", create))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let response = app
            .clone()
            .oneshot(form_request("POST", "/search", create))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .clone()
            .oneshot(form_request("PUT", "/search/unknown", "filter=x&refresh=5"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        state.engine.registry.shutdown();
    }

    #[tokio::test]
    async fn delete_is_200_then_404() {
        let state = test_state();
        let app = router(Arc::clone(&state));

        app.clone()
            .oneshot(form_request("POST", "/search", "id=s1&filter=x&refresh=5"))
            .await
            .unwrap();

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/search/s1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/search/s1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        state.engine.registry.shutdown();
    }

    #[tokio::test]
    async fn results_come_in_thin_and_full_forms() {
        let state = test_state();
        state.engine.detector.ensure_cache("s1");
        state.engine.detector.observe(
            "s1",
            &source_entry("uid=a,dc=x", &[("cn", AttrValue::text("A"))]),
        );
        let app = router(Arc::clone(&state));

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/results/s1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let thin = body_json(response).await;
        assert_eq!(thin, serde_json::json!([{"dn": "uid=a,dc=x"}]));

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/results/s1?full=true")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let full = body_json(response).await;
        assert_eq!(full[0]["content"]["cn"], "A");

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/results/unknown")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn loglevel_round_trip_and_validation() {
        let state = test_state();
        let app = router(Arc::clone(&state));

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/loglevel")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(body_json(response).await, serde_json::json!({"level": "info"}));

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/loglevel")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"level":"debug"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(*state.loglevel.read().unwrap(), "debug");

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/loglevel")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"level":"loud"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn health_probes_answer() {
        let state = test_state();
        let app = router(state);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/healthz")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(body_json(response).await, serde_json::json!({"status": "ok"}));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/readyz")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(
            body_json(response).await,
            serde_json::json!({"status": "ready"})
        );
    }
}
