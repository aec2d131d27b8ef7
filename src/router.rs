//! The HTTP surface: one dynamic mount per database object.
//!
//! Routes are static (`/:namespace/:object`); the per-object dispatch lives
//! in the published resolver set, so a schema rebuild never re-binds the
//! listener. Handlers grab the current set once and keep it for the whole
//! request.

use crate::error::AppError;
use crate::filter::{CallRequest, CreateRequest, KeyRequest, PostBody};
use crate::resolver::{callable, relation, ResolvedObject};
use crate::state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/version", get(version))
        .route(
            "/:namespace/:object",
            get(get_object)
                .post(post_object)
                .put(put_object)
                .delete(delete_object),
        )
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn ready(State(state): State<AppState>) -> Response {
    if sqlx::query("SELECT 1")
        .fetch_optional(&state.pool)
        .await
        .is_err()
    {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "status": "degraded", "database": "unavailable" })),
        )
            .into_response();
    }
    Json(serde_json::json!({ "status": "ok", "database": "ok" })).into_response()
}

async fn version() -> Json<Value> {
    Json(serde_json::json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn with_timeout<F, T>(limit: Duration, fut: F) -> Result<T, AppError>
where
    F: Future<Output = Result<T, AppError>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| AppError::Unavailable("request timed out".into()))?
}

async fn get_object(
    State(state): State<AppState>,
    Path((namespace, object)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Response, AppError> {
    let set = state.current();
    with_timeout(state.config.request_timeout, async {
        match set.lookup(&namespace, &object) {
            Some(ResolvedObject::Relation(rel)) => {
                let body =
                    relation::list(&state.pool, &set, rel, &state.config, &params).await?;
                Ok(Json(body).into_response())
            }
            // Callables answer POST only.
            _ => Err(AppError::NotFound(format!("{}/{}", namespace, object))),
        }
    })
    .await
}

async fn post_object(
    State(state): State<AppState>,
    Path((namespace, object)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Result<Response, AppError> {
    let set = state.current();
    with_timeout(state.config.request_timeout, async {
        match set.lookup(&namespace, &object) {
            Some(ResolvedObject::Relation(rel)) => match PostBody::parse(body)? {
                PostBody::Filter(doc) => {
                    let reply =
                        relation::query(&state.pool, &set, rel, &state.config, &doc).await?;
                    Ok(Json(reply).into_response())
                }
                PostBody::Update(req) => {
                    let row =
                        relation::update(&state.pool, &set, rel, &state.config, &req).await?;
                    Ok(Json(row).into_response())
                }
            },
            Some(ResolvedObject::Callable(c)) => {
                let req: CallRequest = serde_json::from_value(body)
                    .map_err(|e| AppError::BadRequest(format!("invalid call request: {}", e)))?;
                let reply = callable::call(&state.pool, &set, c, &state.config, &req).await?;
                Ok(Json(reply).into_response())
            }
            None => Err(AppError::NotFound(format!("{}/{}", namespace, object))),
        }
    })
    .await
}

async fn put_object(
    State(state): State<AppState>,
    Path((namespace, object)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Result<Response, AppError> {
    let set = state.current();
    with_timeout(state.config.request_timeout, async {
        match set.lookup(&namespace, &object) {
            Some(ResolvedObject::Relation(rel)) => {
                let req: CreateRequest = serde_json::from_value(body).map_err(|e| {
                    AppError::BadRequest(format!("invalid create request: {}", e))
                })?;
                let batch = req.data.is_batch();
                let mut created =
                    relation::create(&state.pool, &set, rel, &state.config, &req).await?;
                let reply = if batch {
                    Value::Array(created)
                } else {
                    created.pop().unwrap_or(Value::Null)
                };
                Ok((StatusCode::CREATED, Json(reply)).into_response())
            }
            _ => Err(AppError::NotFound(format!("{}/{}", namespace, object))),
        }
    })
    .await
}

async fn delete_object(
    State(state): State<AppState>,
    Path((namespace, object)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Result<Response, AppError> {
    let set = state.current();
    with_timeout(state.config.request_timeout, async {
        match set.lookup(&namespace, &object) {
            Some(ResolvedObject::Relation(rel)) => {
                let req: KeyRequest = serde_json::from_value(body).map_err(|e| {
                    AppError::BadRequest(format!("invalid delete request: {}", e))
                })?;
                let reply =
                    relation::delete(&state.pool, &set, rel, &state.config, &req).await?;
                // An idempotent repeat hits nothing and reports 404.
                let status = if reply.deleted == 0 {
                    StatusCode::NOT_FOUND
                } else {
                    StatusCode::OK
                };
                Ok((status, Json(reply)).into_response())
            }
            _ => Err(AppError::NotFound(format!("{}/{}", namespace, object))),
        }
    })
    .await
}
