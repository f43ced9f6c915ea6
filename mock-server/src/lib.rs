//! In-memory stand-in for the push provider's HTTP API.
//!
//! Every request is captured before authentication so tests can assert on
//! exactly what a client sent. A single failure status can be armed with
//! `AppState::fail_next` to exercise error paths.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use axum::{
    body::{Body, Bytes},
    extract::{Path, Query, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use serde_json::{json, Value};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tokio::{net::TcpListener, sync::RwLock};
use uuid::Uuid;

/// A request as received by the server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub authorization: Option<String>,
    pub content_type: Option<String>,
    pub body: Option<String>,
}

#[derive(Clone, Debug, Default)]
struct Registration {
    alias: Option<String>,
    tags: BTreeSet<String>,
}

#[derive(Clone, Debug)]
struct FeedbackEntry {
    device_token: String,
    alias: Option<String>,
    marked_inactive_on: OffsetDateTime,
}

#[derive(Default)]
struct Store {
    device_tokens: HashMap<String, Registration>,
    apids: HashMap<String, Registration>,
    tags: BTreeSet<String>,
    feedback: Vec<FeedbackEntry>,
}

struct Inner {
    authorization: String,
    store: RwLock<Store>,
    requests: Mutex<Vec<RecordedRequest>>,
    fail_next: Mutex<Option<StatusCode>>,
}

/// Shared server state. Cheap to clone; clones observe the same data.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<Inner>,
}

impl AppState {
    /// State accepting basic auth for `key`/`secret` only.
    pub fn new(key: &str, secret: &str) -> Self {
        let authorization = format!("Basic {}", STANDARD.encode(format!("{key}:{secret}")));
        Self {
            inner: Arc::new(Inner {
                authorization,
                store: RwLock::new(Store::default()),
                requests: Mutex::new(Vec::new()),
                fail_next: Mutex::new(None),
            }),
        }
    }

    /// Requests received so far, oldest first.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.inner.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn last_request(&self) -> Option<RecordedRequest> {
        self.requests().pop()
    }

    pub fn clear_requests(&self) {
        if let Ok(mut requests) = self.inner.requests.lock() {
            requests.clear();
        }
    }

    /// Answer the next authorized request with `status` instead of routing it.
    pub fn fail_next(&self, status: u16) {
        if let (Ok(mut slot), Ok(status)) = (self.inner.fail_next.lock(), StatusCode::from_u16(status)) {
            *slot = Some(status);
        }
    }

    fn record(&self, request: RecordedRequest) {
        if let Ok(mut requests) = self.inner.requests.lock() {
            requests.push(request);
        }
    }

    fn take_failure(&self) -> Option<StatusCode> {
        self.inner.fail_next.lock().ok()?.take()
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/api/device_tokens/feedback/", get(feedback))
        .route(
            "/api/device_tokens/{token}",
            put(register_device_token).get(get_device_token).delete(delete_device_token),
        )
        .route("/api/device_tokens/{token}/tags/", get(get_device_tags))
        .route(
            "/api/device_tokens/{token}/tags/{tag}",
            put(add_device_tag).delete(remove_device_tag),
        )
        .route("/api/apids/{apid}", put(register_apid).get(get_apid).delete(delete_apid))
        .route("/api/push/", post(push))
        .route("/api/push/batch/", post(batch_push))
        .route("/api/push/broadcast/", post(broadcast))
        .route("/api/tags/", get(list_tags))
        .route("/api/tags/{tag}", put(create_tag).delete(delete_tag).post(modify_tag))
        .layer(middleware::from_fn_with_state(state.clone(), capture_and_authorize))
        .with_state(state)
}

pub async fn run(listener: TcpListener, state: AppState) -> Result<(), std::io::Error> {
    axum::serve(listener, app(state)).await
}

async fn capture_and_authorize(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let (parts, body) = request.into_parts();
    let bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(_) => return error(StatusCode::BAD_REQUEST, "unreadable body"),
    };
    let header_value = |name: header::HeaderName| {
        parts
            .headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    let authorization = header_value(header::AUTHORIZATION);
    state.record(RecordedRequest {
        method: parts.method.to_string(),
        path: parts.uri.path().to_string(),
        query: parts.uri.query().map(str::to_string),
        authorization: authorization.clone(),
        content_type: header_value(header::CONTENT_TYPE),
        body: (!bytes.is_empty()).then(|| String::from_utf8_lossy(&bytes).into_owned()),
    });

    if authorization.as_deref() != Some(state.inner.authorization.as_str()) {
        tracing::debug!(path = %parts.uri.path(), "rejecting unauthorized request");
        return error(StatusCode::UNAUTHORIZED, "unauthorized");
    }
    if let Some(status) = state.take_failure() {
        return error(status, "injected failure");
    }
    next.run(Request::from_parts(parts, Body::from(bytes))).await
}

fn error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

fn not_found() -> Response {
    error(StatusCode::NOT_FOUND, "not found")
}

/// Parse an optional JSON body. An empty body yields `None`.
fn parse_body(body: &Bytes) -> Result<Option<Value>, Response> {
    if body.is_empty() {
        return Ok(None);
    }
    serde_json::from_slice(body)
        .map(Some)
        .map_err(|_| error(StatusCode::BAD_REQUEST, "malformed JSON"))
}

fn apply_registration(registration: &mut Registration, payload: Option<&Value>, tags: &mut BTreeSet<String>) {
    let Some(payload) = payload else { return };
    if let Some(alias) = payload.get("alias").and_then(Value::as_str) {
        registration.alias = Some(alias.to_string());
    }
    if let Some(list) = payload.get("tags").and_then(Value::as_array) {
        registration.tags = list.iter().filter_map(Value::as_str).map(str::to_string).collect();
        tags.extend(registration.tags.iter().cloned());
    }
}

fn created_or_ok(created: bool) -> StatusCode {
    if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    }
}

// --- device tokens ---

async fn register_device_token(State(state): State<AppState>, Path(token): Path<String>, body: Bytes) -> Response {
    let payload = match parse_body(&body) {
        Ok(payload) => payload,
        Err(rejection) => return rejection,
    };
    let mut store = state.inner.store.write().await;
    let Store { device_tokens, tags, .. } = &mut *store;
    let created = !device_tokens.contains_key(&token);
    let registration = device_tokens.entry(token).or_default();
    apply_registration(registration, payload.as_ref(), tags);
    created_or_ok(created).into_response()
}

async fn get_device_token(State(state): State<AppState>, Path(token): Path<String>) -> Response {
    let store = state.inner.store.read().await;
    match store.device_tokens.get(&token) {
        Some(r) => Json(json!({
            "device_token": token,
            "active": true,
            "alias": r.alias,
            "tags": r.tags,
        }))
        .into_response(),
        None => not_found(),
    }
}

async fn delete_device_token(State(state): State<AppState>, Path(token): Path<String>) -> Response {
    let mut store = state.inner.store.write().await;
    match store.device_tokens.remove(&token) {
        Some(r) => {
            store.feedback.push(FeedbackEntry {
                device_token: token,
                alias: r.alias,
                marked_inactive_on: OffsetDateTime::now_utc(),
            });
            StatusCode::NO_CONTENT.into_response()
        }
        None => not_found(),
    }
}

#[derive(Deserialize)]
struct FeedbackQuery {
    since: String,
}

async fn feedback(State(state): State<AppState>, Query(query): Query<FeedbackQuery>) -> Response {
    let Ok(since) = OffsetDateTime::parse(&query.since, &Rfc3339) else {
        return error(StatusCode::BAD_REQUEST, "invalid since");
    };
    let store = state.inner.store.read().await;
    let entries: Vec<Value> = store
        .feedback
        .iter()
        .filter(|e| e.marked_inactive_on >= since)
        .map(|e| {
            json!({
                "device_token": e.device_token,
                "marked_inactive_on": e.marked_inactive_on.format(&Rfc3339).unwrap_or_default(),
                "alias": e.alias,
            })
        })
        .collect();
    Json(entries).into_response()
}

async fn get_device_tags(State(state): State<AppState>, Path(token): Path<String>) -> Response {
    let store = state.inner.store.read().await;
    match store.device_tokens.get(&token) {
        Some(r) => Json(json!({ "tags": r.tags })).into_response(),
        None => not_found(),
    }
}

async fn add_device_tag(State(state): State<AppState>, Path((token, tag)): Path<(String, String)>) -> Response {
    let mut store = state.inner.store.write().await;
    let Store { device_tokens, tags, .. } = &mut *store;
    let Some(registration) = device_tokens.get_mut(&token) else {
        return not_found();
    };
    tags.insert(tag.clone());
    created_or_ok(registration.tags.insert(tag)).into_response()
}

async fn remove_device_tag(
    State(state): State<AppState>,
    Path((token, tag)): Path<(String, String)>,
) -> Response {
    let mut store = state.inner.store.write().await;
    let removed = store
        .device_tokens
        .get_mut(&token)
        .is_some_and(|r| r.tags.remove(&tag));
    if removed {
        StatusCode::NO_CONTENT.into_response()
    } else {
        not_found()
    }
}

// --- APIDs ---

async fn register_apid(State(state): State<AppState>, Path(apid): Path<String>, body: Bytes) -> Response {
    let payload = match parse_body(&body) {
        Ok(payload) => payload,
        Err(rejection) => return rejection,
    };
    let mut store = state.inner.store.write().await;
    let Store { apids, tags, .. } = &mut *store;
    let created = !apids.contains_key(&apid);
    let registration = apids.entry(apid).or_default();
    apply_registration(registration, payload.as_ref(), tags);
    created_or_ok(created).into_response()
}

async fn get_apid(State(state): State<AppState>, Path(apid): Path<String>) -> Response {
    let store = state.inner.store.read().await;
    match store.apids.get(&apid) {
        Some(r) => Json(json!({
            "apid": apid,
            "active": true,
            "alias": r.alias,
            "tags": r.tags,
        }))
        .into_response(),
        None => not_found(),
    }
}

async fn delete_apid(State(state): State<AppState>, Path(apid): Path<String>) -> Response {
    let mut store = state.inner.store.write().await;
    match store.apids.remove(&apid) {
        Some(_) => StatusCode::NO_CONTENT.into_response(),
        None => not_found(),
    }
}

// --- push ---

fn push_ids(count: usize) -> Response {
    let ids: Vec<Uuid> = (0..count).map(|_| Uuid::new_v4()).collect();
    Json(json!({ "push_ids": ids })).into_response()
}

async fn push(body: Bytes) -> Response {
    match parse_body(&body) {
        Ok(Some(Value::Object(_))) => push_ids(1),
        Ok(_) => error(StatusCode::BAD_REQUEST, "push payload must be a JSON object"),
        Err(rejection) => rejection,
    }
}

async fn batch_push(body: Bytes) -> Response {
    match parse_body(&body) {
        Ok(Some(Value::Array(items))) if items.iter().all(Value::is_object) => push_ids(items.len()),
        Ok(_) => error(StatusCode::BAD_REQUEST, "batch payload must be a JSON array of objects"),
        Err(rejection) => rejection,
    }
}

async fn broadcast(body: Bytes) -> Response {
    push(body).await
}

// --- tags ---

async fn list_tags(State(state): State<AppState>) -> Json<Value> {
    let store = state.inner.store.read().await;
    Json(json!({ "tags": store.tags }))
}

async fn create_tag(State(state): State<AppState>, Path(tag): Path<String>) -> StatusCode {
    let mut store = state.inner.store.write().await;
    created_or_ok(store.tags.insert(tag))
}

async fn delete_tag(State(state): State<AppState>, Path(tag): Path<String>) -> Response {
    let mut store = state.inner.store.write().await;
    if !store.tags.remove(&tag) {
        return not_found();
    }
    let Store { device_tokens, apids, .. } = &mut *store;
    for registration in device_tokens.values_mut().chain(apids.values_mut()) {
        registration.tags.remove(&tag);
    }
    StatusCode::NO_CONTENT.into_response()
}

#[derive(Deserialize, Default)]
struct TagChanges {
    #[serde(default)]
    add: Vec<String>,
    #[serde(default)]
    remove: Vec<String>,
}

#[derive(Deserialize)]
struct ModifyTag {
    device_tokens: TagChanges,
}

async fn modify_tag(State(state): State<AppState>, Path(tag): Path<String>, body: Bytes) -> Response {
    let Ok(changes) = serde_json::from_slice::<ModifyTag>(&body) else {
        return error(StatusCode::BAD_REQUEST, "expected {\"device_tokens\": {\"add\": [], \"remove\": []}}");
    };
    let changes = changes.device_tokens;
    let mut store = state.inner.store.write().await;
    store.tags.insert(tag.clone());
    for token in &changes.add {
        store.device_tokens.entry(token.clone()).or_default().tags.insert(tag.clone());
    }
    let mut removed = 0;
    for token in &changes.remove {
        if let Some(r) = store.device_tokens.get_mut(token) {
            if r.tags.remove(&tag) {
                removed += 1;
            }
        }
    }
    Json(json!({ "added": changes.add.len(), "removed": removed })).into_response()
}
