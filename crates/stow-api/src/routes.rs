use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, put};
use axum::{Json, Router};
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use stow_core::models::Payload;
use stow_core::remote::{RecordEnvelope, RemoteRecord, OWNER_HEADER};
use stow_core::{Note, OwnerId, RecordKind, Task, TimerConfig};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::AppConfig;
use crate::error::AppError;
use crate::store::MemoryStore;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    store: MemoryStore,
}

impl AppState {
    pub fn from_config(config: Arc<AppConfig>) -> Self {
        Self {
            config,
            store: MemoryStore::new(),
        }
    }
}

pub fn app_router(state: AppState) -> Router {
    let resource_routes = Router::new()
        .route("/{resource}", get(list_records).post(create_record))
        .route(
            "/{resource}/{remote_id}",
            put(update_record).delete(delete_record),
        );

    Router::new()
        .route("/healthz", get(healthz))
        .nest("/v1", resource_routes)
        .layer(DefaultBodyLimit::max(state.config.max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods(Any),
        )
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: i64,
    records: usize,
}

async fn healthz(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().timestamp(),
        records: state.store.total().await,
    })
}

async fn list_records(
    State(state): State<AppState>,
    Path(resource): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Vec<RemoteRecord<Value>>>, AppError> {
    let kind = resolve_kind(&resource)?;
    let owner = require_owner(&headers)?;
    Ok(Json(state.store.list(&owner, kind).await))
}

async fn create_record(
    State(state): State<AppState>,
    Path(resource): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<RemoteRecord<Value>>), AppError> {
    let kind = resolve_kind(&resource)?;
    let owner = require_owner(&headers)?;
    let payload = parse_envelope(kind, &owner, &body)?;

    let record = state.store.create(&owner, kind, payload).await?;
    tracing::info!(
        resource = kind.resource(),
        remote_id = %record.remote_id,
        "Created record"
    );
    Ok((StatusCode::CREATED, Json(record)))
}

async fn update_record(
    State(state): State<AppState>,
    Path((resource, remote_id)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<RemoteRecord<Value>>, AppError> {
    let kind = resolve_kind(&resource)?;
    let owner = require_owner(&headers)?;
    let payload = parse_envelope(kind, &owner, &body)?;

    let record = state
        .store
        .update(&owner, kind, &remote_id, payload)
        .await
        .ok_or_else(|| AppError::record_not_found(format!("{kind} {remote_id}")))?;
    tracing::info!(resource = kind.resource(), %remote_id, "Updated record");
    Ok(Json(record))
}

async fn delete_record(
    State(state): State<AppState>,
    Path((resource, remote_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<StatusCode, AppError> {
    let kind = resolve_kind(&resource)?;
    let owner = require_owner(&headers)?;

    if !state.store.delete(&owner, kind, &remote_id).await {
        return Err(AppError::record_not_found(format!("{kind} {remote_id}")));
    }
    tracing::info!(resource = kind.resource(), %remote_id, "Deleted record");
    Ok(StatusCode::NO_CONTENT)
}

fn resolve_kind(resource: &str) -> Result<RecordKind, AppError> {
    RecordKind::from_resource(resource)
        .ok_or_else(|| AppError::not_found(format!("unknown resource '{resource}'")))
}

fn require_owner(headers: &HeaderMap) -> Result<OwnerId, AppError> {
    let raw = headers
        .get(OWNER_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| AppError::bad_request(format!("missing {OWNER_HEADER} header")))?;
    OwnerId::new(raw).map_err(|_| AppError::bad_request(format!("empty {OWNER_HEADER} header")))
}

/// Decode a create/update body and check it against the resource's payload type
fn parse_envelope(kind: RecordKind, owner: &OwnerId, body: &[u8]) -> Result<Value, AppError> {
    let envelope: RecordEnvelope<Value> = serde_json::from_slice(body)
        .map_err(|error| AppError::bad_request(format!("malformed record body: {error}")))?;
    if &envelope.owner != owner {
        return Err(AppError::bad_request(format!(
            "body owner does not match the {OWNER_HEADER} header"
        )));
    }

    match kind {
        RecordKind::Note => validate_payload::<Note>(&envelope.payload)?,
        RecordKind::Task => validate_payload::<Task>(&envelope.payload)?,
        RecordKind::Timer => validate_payload::<TimerConfig>(&envelope.payload)?,
    }
    Ok(envelope.payload)
}

fn validate_payload<T: Payload>(payload: &Value) -> Result<(), AppError> {
    let typed: T = serde_json::from_value(payload.clone()).map_err(|error| {
        AppError::bad_request(format!("invalid {} payload: {error}", T::KIND))
    })?;
    typed.validate()?;
    Ok(())
}
