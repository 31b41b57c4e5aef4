#![allow(dead_code)]

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

pub type TestResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

pub const ORG: &str = "contoso";

#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    pub path: String,
    pub query: HashMap<String, String>,
    pub authorization: Option<String>,
    pub content_type: Option<String>,
}

#[derive(Default)]
pub struct MockState {
    pub agents: Vec<Value>,
    pub repos: Vec<Value>,
    pub work_items: Vec<Value>,
    /// States the PATCH endpoint answers with 400.
    pub refused_states: Vec<String>,
    pub unauthorized: bool,
    pub fail_fetches: bool,
    pub requests: Vec<Recorded>,
}

type Shared = Arc<Mutex<MockState>>;

fn lock(state: &Shared) -> std::sync::MutexGuard<'_, MockState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

fn header_text(headers: &HeaderMap, name: header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn record(
    state: &Shared,
    method: &str,
    uri: &Uri,
    headers: &HeaderMap,
    query: &HashMap<String, String>,
) {
    lock(state).requests.push(Recorded {
        method: method.to_string(),
        path: uri.path().to_string(),
        query: query.clone(),
        authorization: header_text(headers, header::AUTHORIZATION),
        content_type: header_text(headers, header::CONTENT_TYPE),
    });
}

fn unavailable() -> Response {
    (StatusCode::SERVICE_UNAVAILABLE, "maintenance").into_response()
}

async fn pools(
    State(state): State<Shared>,
    uri: Uri,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    record(&state, "GET", &uri, &headers, &query);
    if lock(&state).fail_fetches {
        return unavailable();
    }
    Json(json!({ "count": 1, "value": [{ "id": 1, "name": "Default" }] })).into_response()
}

async fn agents(
    State(state): State<Shared>,
    Path(_pool): Path<i64>,
    uri: Uri,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    record(&state, "GET", &uri, &headers, &query);
    let agents = lock(&state).agents.clone();
    Json(json!({ "count": agents.len(), "value": agents })).into_response()
}

async fn repositories(
    State(state): State<Shared>,
    Path(_project): Path<String>,
    uri: Uri,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    record(&state, "GET", &uri, &headers, &query);
    let state = lock(&state);
    if state.fail_fetches {
        return unavailable();
    }
    Json(json!({ "count": state.repos.len(), "value": state.repos })).into_response()
}

async fn wiql(
    State(state): State<Shared>,
    Path(_project): Path<String>,
    uri: Uri,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    record(&state, "POST", &uri, &headers, &query);
    let refs: Vec<Value> = lock(&state)
        .work_items
        .iter()
        .map(|w| json!({ "id": w["id"] }))
        .collect();
    Json(json!({ "queryType": "flat", "workItems": refs })).into_response()
}

async fn work_items(
    State(state): State<Shared>,
    uri: Uri,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    record(&state, "GET", &uri, &headers, &query);
    let ids: Vec<i64> = query
        .get("ids")
        .map(|ids| ids.split(',').filter_map(|id| id.parse().ok()).collect())
        .unwrap_or_default();
    let items: Vec<Value> = lock(&state)
        .work_items
        .iter()
        .filter(|w| w["id"].as_i64().is_some_and(|id| ids.contains(&id)))
        .cloned()
        .collect();
    Json(json!({ "count": items.len(), "value": items })).into_response()
}

async fn update_work_item(
    State(state): State<Shared>,
    Path(id): Path<i64>,
    uri: Uri,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> Response {
    record(&state, "PATCH", &uri, &headers, &query);
    let patch: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    let new_state = patch[0]["value"].as_str().unwrap_or_default().to_string();

    let mut state = lock(&state);
    if state.unauthorized {
        return (StatusCode::UNAUTHORIZED, "token expired").into_response();
    }
    if state.fail_fetches {
        return (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response();
    }
    if state.refused_states.contains(&new_state) {
        return (StatusCode::BAD_REQUEST, "invalid state transition").into_response();
    }
    match state
        .work_items
        .iter_mut()
        .find(|w| w["id"].as_i64() == Some(id))
    {
        Some(item) => {
            item["fields"]["System.State"] = Value::String(new_state);
            Json(item.clone()).into_response()
        }
        None => (StatusCode::NOT_FOUND, "no such work item").into_response(),
    }
}

pub struct MockDevOps {
    port: u16,
    state: Shared,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl MockDevOps {
    pub async fn start() -> TestResult<Self> {
        let port = find_free_port()?;
        let state: Shared = Arc::new(Mutex::new(MockState::default()));
        let app = Router::new()
            .route("/contoso/_apis/distributedtask/pools", get(pools))
            .route(
                "/contoso/_apis/distributedtask/pools/{pool}/agents",
                get(agents),
            )
            .route("/contoso/_apis/wit/workitems", get(work_items))
            .route(
                "/contoso/_apis/wit/workitems/{id}",
                axum::routing::patch(update_work_item),
            )
            .route("/contoso/{project}/_apis/git/repositories", get(repositories))
            .route("/contoso/{project}/_apis/wit/wiql", post(wiql))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port)).await?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await;
        });

        Ok(Self {
            port,
            state,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    /// Starts the server, or returns `None` when the sandbox forbids binding.
    pub async fn start_or_skip() -> Option<Self> {
        match Self::start().await {
            Ok(server) => Some(server),
            Err(err) if err.to_string().contains("Operation not permitted") => {
                eprintln!("Skipping: socket bind not permitted");
                None
            }
            Err(err) => panic!("mock server failed to start: {}", err),
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}/{}", self.port, ORG)
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut MockState) -> R) -> R {
        f(&mut lock(&self.state))
    }

    pub fn requests(&self) -> Vec<Recorded> {
        lock(&self.state).requests.clone()
    }

    pub fn requests_to(&self, suffix: &str) -> Vec<Recorded> {
        self.requests()
            .into_iter()
            .filter(|r| r.path.ends_with(suffix))
            .collect()
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

pub fn agent(id: i64, name: &str, status: &str) -> Value {
    json!({
        "id": id,
        "name": name,
        "status": status,
        "enabled": true,
        "version": "3.236.1",
        "osDescription": "Linux 6.5",
        "systemCapabilities": { "Agent.OS": "Linux", "java": "11" },
        "userCapabilities": { "java": "17" }
    })
}

pub fn work_item(id: i64, title: &str, state: &str) -> Value {
    json!({
        "id": id,
        "fields": {
            "System.Id": id,
            "System.Title": title,
            "System.State": state,
            "System.WorkItemType": "User Story",
            "System.AssignedTo": { "displayName": "Dana Lee" },
            "System.ChangedDate": "2024-05-01T10:00:00Z"
        }
    })
}

pub fn repo(id: &str, name: &str, remote_url: &str) -> Value {
    json!({
        "id": id,
        "name": name,
        "remoteUrl": remote_url,
        "defaultBranch": "refs/heads/main"
    })
}

pub fn find_free_port() -> TestResult<u16> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let port = listener.local_addr()?.port();
    drop(listener);
    Ok(port)
}
