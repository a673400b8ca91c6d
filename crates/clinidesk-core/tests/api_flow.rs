use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, RawQuery, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use clinidesk_core::poll::{fetch_summary_status, request_summary, PollEvent, PollState};
use clinidesk_core::{
    ApiGateway, AppContext, Consultation, CredentialPair, Patient, Payload, ResourceList,
    SessionError, SessionStore, StatusLevel, SummaryPoller, TokenStore,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

#[derive(Clone, Default)]
struct TestState {
    queries: Arc<Mutex<Vec<String>>>,
    auth_headers: Arc<Mutex<Vec<Option<String>>>>,
    statuses: Arc<Mutex<VecDeque<&'static str>>>,
    status_checks: Arc<Mutex<Vec<i64>>>,
    generated: Arc<Mutex<Vec<i64>>>,
}

fn record_auth(state: &TestState, headers: &HeaderMap) {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    state.auth_headers.lock().unwrap().push(auth);
}

async fn login_handler(Json(body): Json<Value>) -> Response {
    if body["username"] == "doc" && body["password"] == "secret" {
        Json(json!({"access": "acc-1", "refresh": "ref-1"})).into_response()
    } else {
        (StatusCode::UNAUTHORIZED, Json(json!({"error": "Invalid credentials"}))).into_response()
    }
}

async fn list_patients(
    State(state): State<TestState>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
) -> Response {
    record_auth(&state, &headers);
    let query = query.unwrap_or_default();
    state.queries.lock().unwrap().push(query.clone());

    if query.contains("email=fail") {
        return (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response();
    }

    Json(json!([
        {"id": 1, "full_name": "Ana Diaz", "date_of_birth": "1990-01-02", "email": "a@b.com"},
        {"id": 2, "full_name": "Bo Lind", "date_of_birth": "1985-06-30", "email": "bo@example.com"}
    ]))
    .into_response()
}

async fn create_patient(State(state): State<TestState>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    record_auth(&state, &headers);
    let mut created = body.clone();
    created["id"] = json!(77);
    (StatusCode::CREATED, Json(created)).into_response()
}

async fn list_consultations(State(state): State<TestState>, RawQuery(query): RawQuery) -> Json<Value> {
    state.queries.lock().unwrap().push(query.unwrap_or_default());
    Json(json!({
        "count": 12,
        "next": "http://testserver/api/consultations/?page=2",
        "previous": null,
        "results": [
            {"id": 42, "patient": 1, "symptoms": "cough", "diagnosis": "cold", "summary": null},
            {"id": 41, "patient": 2, "symptoms": "fever", "diagnosis": "flu", "summary": "Rest."}
        ]
    }))
}

async fn create_consultation(Json(body): Json<Value>) -> Response {
    if body["patient"].is_number() {
        let mut created = body.clone();
        created["id"] = json!(43);
        (StatusCode::CREATED, Json(created)).into_response()
    } else {
        (StatusCode::BAD_REQUEST, Json(json!({"detail": "A valid patient is required"}))).into_response()
    }
}

async fn generate_summary(State(state): State<TestState>, Path(id): Path<i64>) -> StatusCode {
    state.generated.lock().unwrap().push(id);
    StatusCode::ACCEPTED
}

async fn summary_status(State(state): State<TestState>, Path(id): Path<i64>) -> Json<Value> {
    state.status_checks.lock().unwrap().push(id);
    let status = state.statuses.lock().unwrap().pop_front().unwrap_or("done");
    Json(json!({"status": status}))
}

async fn spawn_server(state: TestState) -> String {
    let api = Router::new()
        .route("/accounts/login/", post(login_handler))
        .route("/patients/", get(list_patients).post(create_patient))
        .route("/consultations/", get(list_consultations).post(create_consultation))
        .route("/consultations/generate-summary/:id/", post(generate_summary))
        .route("/consultations/:id/summary_status/", get(summary_status))
        .with_state(state);
    let app = Router::new().nest("/api", api);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{addr}/api")
}

fn session_in(dir: &tempfile::TempDir, ctx: &AppContext) -> (SessionStore, TokenStore) {
    let store = TokenStore::new(
        dir.path().join("session.json"),
        chrono::Duration::days(1),
        chrono::Duration::days(7),
    );
    (SessionStore::new(ctx.clone(), store.clone()), store)
}

#[tokio::test]
async fn login_persists_tokens_and_authorizes_requests() {
    let state = TestState::default();
    let base = spawn_server(state.clone()).await;
    let dir = tempfile::tempdir().unwrap();
    let ctx = AppContext::new();
    let gateway = ApiGateway::new(&base, ctx.clone());
    let (session, store) = session_in(&dir, &ctx);

    let pair = session.login(&gateway, "doc", "secret").await.expect("login succeeds");
    assert_eq!(pair.access_token, "acc-1");
    assert_eq!(store.load().unwrap(), Some(pair));

    let mut patients = ResourceList::<Patient>::new();
    assert!(patients.load(&gateway, 1).await);
    assert_eq!(
        state.auth_headers.lock().unwrap().last().cloned().flatten().as_deref(),
        Some("Bearer acc-1")
    );
}

#[tokio::test]
async fn login_failure_keeps_previous_credentials() {
    let base = spawn_server(TestState::default()).await;
    let dir = tempfile::tempdir().unwrap();
    let ctx = AppContext::new();
    let gateway = ApiGateway::new(&base, ctx.clone());
    let (session, store) = session_in(&dir, &ctx);

    let previous = CredentialPair {
        access_token: "old-acc".into(),
        refresh_token: "old-ref".into(),
    };
    store.save(&previous).unwrap();
    session.restore();

    let err = session.login(&gateway, "doc", "wrong").await.unwrap_err();
    assert!(matches!(err, SessionError::Rejected(ref m) if m == "Invalid credentials"));
    assert_eq!(ctx.credentials(), Some(previous.clone()));
    assert_eq!(store.load().unwrap(), Some(previous));

    let status = ctx.status().unwrap();
    assert_eq!(status.level, StatusLevel::Error);
    assert_eq!(status.text, "Invalid credentials");
}

#[tokio::test]
async fn blank_filters_never_reach_the_server() {
    let state = TestState::default();
    let base = spawn_server(state.clone()).await;
    let gateway = ApiGateway::new(&base, AppContext::new());

    let mut patients = ResourceList::<Patient>::new();
    patients.filters.set("full_name", "");
    patients.filters.set("email", "a@b.com");
    assert!(patients.load(&gateway, 1).await);

    let query = state.queries.lock().unwrap().last().cloned().unwrap();
    assert_eq!(query, "page=1&email=a%40b.com");
    assert_eq!(patients.page.total_count, 2);
    assert!(!patients.page.has_next);
}

#[tokio::test]
async fn envelope_response_sets_pagination() {
    let base = spawn_server(TestState::default()).await;
    let gateway = ApiGateway::new(&base, AppContext::new());

    let mut consultations = ResourceList::<Consultation>::new();
    assert!(consultations.load(&gateway, 1).await);
    assert_eq!(consultations.page.total_count, 12);
    assert!(consultations.page.has_next);
    assert!(!consultations.page.has_previous);
    assert_eq!(consultations.next_page(), Some(2));
    assert_eq!(consultations.items()[1].summary.as_deref(), Some("Rest."));
}

#[tokio::test]
async fn failed_load_keeps_page_and_reports_raw_text() {
    let base = spawn_server(TestState::default()).await;
    let ctx = AppContext::new();
    let gateway = ApiGateway::new(&base, ctx.clone());

    let mut patients = ResourceList::<Patient>::new();
    assert!(patients.load(&gateway, 1).await);
    let before = patients.page.clone();

    patients.filters.set("email", "fail");
    assert!(!patients.load(&gateway, 2).await);
    assert_eq!(patients.page, before);
    assert_eq!(ctx.status().unwrap().text, "Internal Server Error");
}

#[tokio::test]
async fn create_prepends_on_success_and_keeps_draft_on_failure() {
    let base = spawn_server(TestState::default()).await;
    let ctx = AppContext::new();
    let gateway = ApiGateway::new(&base, ctx.clone());

    let mut patients = ResourceList::<Patient>::new();
    assert!(patients.load(&gateway, 1).await);
    patients.draft.set("full_name", "Cy New");
    patients.draft.set("date_of_birth", "2001-02-03");
    patients.draft.set("email", "cy@example.com");
    assert!(patients.create(&gateway).await);
    assert_eq!(patients.items()[0].id, 77);
    assert_eq!(patients.items()[0].full_name, "Cy New");
    assert!(patients.draft.fields().iter().all(|f| f.value.is_empty()));

    let mut consultations = ResourceList::<Consultation>::new();
    consultations.draft.set("patient", "not a number");
    consultations.draft.set("symptoms", "headache");
    assert!(!consultations.create(&gateway).await);
    assert_eq!(consultations.draft.get("symptoms"), Some("headache"));
    assert!(consultations.items().is_empty());
    assert_eq!(ctx.status().unwrap().text, "A valid patient is required");
}

#[tokio::test]
async fn transport_failure_is_normalized() {
    let ctx = AppContext::new();
    // Port 1 is reserved; nothing listens there
    let gateway = ApiGateway::new("http://127.0.0.1:1", ctx.clone());

    let response = gateway.get("/patients/").await;
    assert!(!response.ok);
    assert_eq!(response.status, None);
    match response.data {
        Payload::Text(message) => assert!(message.starts_with("Network error")),
        other => panic!("unexpected payload {other:?}"),
    }
    assert!(ctx.status().unwrap().text.starts_with("Network error"));
}

#[tokio::test]
async fn summary_poll_reloads_consultations_when_done() {
    let state = TestState::default();
    state.statuses.lock().unwrap().extend(["processing", "processing", "done"]);
    let base = spawn_server(state.clone()).await;
    let gateway = ApiGateway::new(&base, AppContext::new());

    let mut consultations = ResourceList::<Consultation>::new();
    let (tx, mut rx) = mpsc::unbounded_channel::<PollEvent>();
    let mut poller = SummaryPoller::new(Duration::from_millis(40), Duration::from_millis(20), tx);

    assert!(request_summary(&gateway, 42).await);
    let generation = poller.start(42);
    let mut reloads = 0;

    while !poller.is_idle() {
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("poll loop stalled")
            .expect("channel open");
        if let Some(id) = poller.handle(event) {
            let status = fetch_summary_status(&gateway, id).await;
            if poller.on_status(generation, status.as_deref()) {
                assert!(matches!(poller.state(), PollState::Ready { consultation_id: 42, .. }));
                assert!(consultations.load(&gateway, 1).await);
                reloads += 1;
            }
        }
    }

    assert_eq!(reloads, 1);
    assert_eq!(*state.generated.lock().unwrap(), vec![42]);
    assert_eq!(*state.status_checks.lock().unwrap(), vec![42, 42, 42]);
    assert!(!poller.dialog().visible);
    assert_eq!(consultations.items().len(), 2);
}
