//! A minimal lab controller speaking the subset of the REST API the tools use.

use super::constants::*;
use axum::{
    extract::{Path, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio::sync::Semaphore;

pub struct FakeState {
    pub logins: AtomicUsize,
    pub failed_logins: AtomicUsize,
    /// Requests to `/system_stats` block until a permit is added.
    pub stats_gate: Semaphore,
    pub stats_waiting: AtomicUsize,
    pub created_labs: Mutex<Vec<Value>>,
    pub started_labs: Mutex<Vec<String>>,
    pub created_users: Mutex<Vec<Value>>,
    pub imported_labs: Mutex<Vec<Value>>,
}

impl Default for FakeState {
    fn default() -> Self {
        Self {
            logins: AtomicUsize::new(0),
            failed_logins: AtomicUsize::new(0),
            stats_gate: Semaphore::new(0),
            stats_waiting: AtomicUsize::new(0),
            created_labs: Mutex::new(Vec::new()),
            started_labs: Mutex::new(Vec::new()),
            created_users: Mutex::new(Vec::new()),
            imported_labs: Mutex::new(Vec::new()),
        }
    }
}

pub struct FakeController {
    pub base_url: String,
    pub state: Arc<FakeState>,
    _shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl FakeController {
    pub async fn spawn() -> Self {
        let state = Arc::new(FakeState::default());

        let api = Router::new()
            .route("/authenticate", post(authenticate))
            .route("/authok", get(authok))
            .route("/system_information", get(system_information))
            .route("/system_health", get(system_health))
            .route("/system_stats", get(system_stats))
            .route("/users", get(list_users).post(create_user))
            .route("/users/{username}/id", get(user_id))
            .route("/users/{id}", get(user))
            .route("/labs", get(list_labs).post(create_lab))
            .route("/labs/{id}", get(get_lab))
            .route("/labs/{id}/start", put(start_lab))
            .route("/labs/{id}/download", get(download_lab))
            .route("/import", post(import_lab))
            .route("/labs/{id}/check_if_converged", get(check_converged))
            .with_state(state.clone());
        let app = Router::new().nest("/api/v0", api);

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind fake controller");
        let port = listener.local_addr().unwrap().port();
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .expect("Fake controller failed");
        });

        Self {
            base_url: format!("http://127.0.0.1:{}", port),
            state,
            _shutdown_tx: Some(shutdown_tx),
        }
    }

    /// Let `n` blocked `/system_stats` requests complete.
    #[allow(dead_code)]
    pub fn release_stats(&self, n: usize) {
        self.state.stats_gate.add_permits(n);
    }

    #[allow(dead_code)]
    pub fn logins(&self) -> usize {
        self.state.logins.load(Ordering::SeqCst)
    }
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| {
            v == format!("Bearer {}", ADMIN_TOKEN) || v == format!("Bearer {}", VIEWER_TOKEN)
        })
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"description": "No valid token"})),
    )
        .into_response()
}

async fn authenticate(State(state): State<Arc<FakeState>>, Json(body): Json<Value>) -> Response {
    if body["username"] == ADMIN_USER && body["password"] == ADMIN_PASS {
        state.logins.fetch_add(1, Ordering::SeqCst);
        Json(json!(ADMIN_TOKEN)).into_response()
    } else if body["username"] == VIEWER_USER && body["password"] == VIEWER_PASS {
        state.logins.fetch_add(1, Ordering::SeqCst);
        Json(json!(VIEWER_TOKEN)).into_response()
    } else {
        state.failed_logins.fetch_add(1, Ordering::SeqCst);
        (
            StatusCode::FORBIDDEN,
            Json(json!({"description": "Authentication failed"})),
        )
            .into_response()
    }
}

async fn authok(headers: HeaderMap) -> Response {
    if authorized(&headers) {
        Json(json!(true)).into_response()
    } else {
        unauthorized()
    }
}

async fn system_information(headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    Json(json!({"version": "2.8.0", "ready": true})).into_response()
}

async fn system_health(headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    Json(json!({"valid": true, "is_licensed": true, "computes": {}})).into_response()
}

async fn system_stats(State(state): State<Arc<FakeState>>, headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    state.stats_waiting.fetch_add(1, Ordering::SeqCst);
    let permit = state.stats_gate.acquire().await;
    state.stats_waiting.fetch_sub(1, Ordering::SeqCst);
    if let Ok(permit) = permit {
        permit.forget();
    }
    Json(json!({"all": {"cpu": {"percent": 12.5}}})).into_response()
}

async fn list_users(headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    Json(json!([
        {"id": format!("user-{}", ADMIN_USER), "username": ADMIN_USER, "admin": true},
        {"id": format!("user-{}", VIEWER_USER), "username": VIEWER_USER, "admin": false}
    ]))
    .into_response()
}

async fn create_user(
    State(state): State<Arc<FakeState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    state.created_users.lock().unwrap().push(body);
    Json(json!({"id": "user-new"})).into_response()
}

async fn user_id(headers: HeaderMap, Path(username): Path<String>) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    Json(json!(format!("user-{}", username))).into_response()
}

async fn user(headers: HeaderMap, Path(id): Path<String>) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    let admin = id == format!("user-{}", ADMIN_USER);
    Json(json!({"id": id, "username": id.trim_start_matches("user-"), "admin": admin}))
        .into_response()
}

fn lab(id: &str) -> Option<Value> {
    match id {
        LAB_1_ID => Some(json!({
            "id": LAB_1_ID,
            "lab_title": LAB_1_TITLE,
            "owner_username": ADMIN_USER,
            "state": "STOPPED"
        })),
        LAB_2_ID => Some(json!({
            "id": LAB_2_ID,
            "lab_title": "Beta",
            "owner_username": LAB_2_OWNER,
            "state": "STARTED"
        })),
        _ => None,
    }
}

async fn list_labs(headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    Json(json!([LAB_1_ID, LAB_2_ID])).into_response()
}

async fn get_lab(headers: HeaderMap, Path(id): Path<String>) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    match lab(&id) {
        Some(lab) => Json(lab).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"description": format!("Lab not found: {}", id)})),
        )
            .into_response(),
    }
}

async fn create_lab(
    State(state): State<Arc<FakeState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    state.created_labs.lock().unwrap().push(body);
    Json(json!({"id": "lab-new"})).into_response()
}

async fn start_lab(
    State(state): State<Arc<FakeState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    state.started_labs.lock().unwrap().push(id);
    StatusCode::NO_CONTENT.into_response()
}

async fn check_converged(headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    Json(json!(true)).into_response()
}

async fn download_lab(headers: HeaderMap, Path(id): Path<String>) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    match lab(&id) {
        Some(lab) => format!(
            "lab:\n  title: {}\n  version: 0.2.2\nnodes: []\nlinks: []\n",
            lab["lab_title"].as_str().unwrap_or_default()
        )
        .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn import_lab(
    State(state): State<Arc<FakeState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    state.imported_labs.lock().unwrap().push(body);
    Json(json!({"id": "lab-imported"})).into_response()
}
