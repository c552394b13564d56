use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

use jobscout::backend::{Backend, BackendError};
use jobscout::config::{self, Config};
use jobscout::coordinator::Coordinator;
use jobscout::extract::JobFields;
use jobscout::protocol::{actions, CaptureRequest, Envelope, Stage};
use jobscout::store::{self, AuthSession};
use jobscout::tabs::Tabs;

async fn setup_pool() -> store::Pool {
    let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
    store::run_migrations(&pool).await.unwrap();
    pool
}

fn test_config() -> Config {
    let mut cfg: Config = serde_yaml::from_str(config::example()).unwrap();
    cfg.capture.retry_delay_ms = 0;
    cfg
}

#[derive(Default)]
struct RecordingBackend {
    profile_responses: Mutex<VecDeque<Result<Value, BackendError>>>,
    profile_calls: AtomicUsize,
    save_responses: Mutex<VecDeque<Result<Value, BackendError>>>,
    scrape_calls: Mutex<Vec<CaptureRequest>>,
    ingest_calls: Mutex<Vec<CaptureRequest>>,
    jobs: Mutex<Vec<Value>>,
}

impl RecordingBackend {
    fn with_profile_responses(responses: Vec<Result<Value, BackendError>>) -> Self {
        RecordingBackend {
            profile_responses: Mutex::new(VecDeque::from(responses)),
            ..Default::default()
        }
    }

    async fn pop_save_response(&self) -> Result<Value, BackendError> {
        self.save_responses
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Ok(json!({ "status": "created" })))
    }
}

#[async_trait]
impl Backend for RecordingBackend {
    async fn fetch_profile(&self, _token: &str) -> Result<Value, BackendError> {
        self.profile_calls.fetch_add(1, Ordering::SeqCst);
        self.profile_responses
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Ok(json!({ "id": 7, "email": "user@example.com" })))
    }

    async fn list_jobs(&self, _token: &str) -> Result<Vec<Value>, BackendError> {
        Ok(self.jobs.lock().await.clone())
    }

    async fn scrape_linkedin(
        &self,
        _token: &str,
        request: &CaptureRequest,
    ) -> Result<Value, BackendError> {
        self.scrape_calls.lock().await.push(request.clone());
        self.pop_save_response().await
    }

    async fn ingest_html(
        &self,
        _token: &str,
        request: &CaptureRequest,
    ) -> Result<Value, BackendError> {
        self.ingest_calls.lock().await.push(request.clone());
        self.pop_save_response().await
    }
}

#[derive(Default)]
struct FakeTabs {
    url: Mutex<Option<String>>,
    opened: Mutex<Vec<String>>,
    snapshot_html: Mutex<Option<String>>,
}

#[async_trait]
impl Tabs for FakeTabs {
    async fn active_url(&self) -> Option<String> {
        self.url.lock().await.clone()
    }

    async fn open(&self, url: &str) -> Result<()> {
        self.opened.lock().await.push(url.to_string());
        Ok(())
    }

    async fn snapshot(&self) -> Result<String> {
        self.snapshot_html
            .lock()
            .await
            .clone()
            .ok_or_else(|| anyhow::anyhow!("no active tab"))
    }
}

struct Harness {
    pool: store::Pool,
    backend: Arc<RecordingBackend>,
    tabs: Arc<FakeTabs>,
    coordinator: Coordinator,
}

async fn harness(backend: RecordingBackend) -> Harness {
    let pool = setup_pool().await;
    let backend = Arc::new(backend);
    let tabs = Arc::new(FakeTabs::default());
    let coordinator = Coordinator::new(
        pool.clone(),
        backend.clone(),
        tabs.clone(),
        test_config(),
    );
    Harness {
        pool,
        backend,
        tabs,
        coordinator,
    }
}

async fn seed_valid_session(pool: &store::Pool) {
    store::save_auth_session(
        pool,
        &AuthSession {
            token: "tok-live".into(),
            expires_at_epoch_ms: Utc::now().timestamp_millis() + 3_600_000,
        },
    )
    .await
    .unwrap();
}

fn capture_request(url: &str) -> CaptureRequest {
    CaptureRequest {
        url: url.to_string(),
        canonical_url: None,
        stage: Stage::Bookmarked,
        excitement: 3,
        html_content: Some("<html><body>job</body></html>".into()),
        fallback_data: JobFields::unknown(),
    }
}

async fn send(h: &Harness, action: &str, payload: Option<Value>) -> Value {
    h.coordinator
        .handle(Envelope {
            action: action.to_string(),
            payload,
        })
        .await
}

#[tokio::test]
async fn check_auth_without_token_is_unauthenticated() {
    let h = harness(RecordingBackend::default()).await;
    let response = send(&h, actions::CHECK_AUTH, None).await;
    assert_eq!(response["authenticated"], false);
    assert_eq!(h.backend.profile_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn check_auth_purges_locally_expired_token() {
    let h = harness(RecordingBackend::default()).await;
    store::save_auth_session(
        &h.pool,
        &AuthSession {
            token: "tok-old".into(),
            expires_at_epoch_ms: Utc::now().timestamp_millis() - 1_000,
        },
    )
    .await
    .unwrap();

    let response = send(&h, actions::CHECK_AUTH, None).await;
    assert_eq!(response["authenticated"], false);
    assert!(store::load_auth_session(&h.pool).await.unwrap().is_none());
    // Never verified with the backend.
    assert_eq!(h.backend.profile_calls.load(Ordering::SeqCst), 0);

    // Idempotent on repeat.
    let response = send(&h, actions::CHECK_AUTH, None).await;
    assert_eq!(response["authenticated"], false);
}

#[tokio::test]
async fn check_auth_verifies_against_backend() {
    let h = harness(RecordingBackend::default()).await;
    seed_valid_session(&h.pool).await;

    let response = send(&h, actions::CHECK_AUTH, None).await;
    assert_eq!(response["authenticated"], true);
    assert_eq!(response["user"]["email"], "user@example.com");
    assert_eq!(h.backend.profile_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn check_auth_purges_on_backend_rejection() {
    let h = harness(RecordingBackend::with_profile_responses(vec![Err(
        BackendError::Unauthorized,
    )]))
    .await;
    seed_valid_session(&h.pool).await;

    let response = send(&h, actions::CHECK_AUTH, None).await;
    assert_eq!(response["authenticated"], false);
    assert!(store::load_auth_session(&h.pool).await.unwrap().is_none());
}

#[tokio::test]
async fn unreachable_backend_yields_degraded_auth_without_purge() {
    let h = harness(RecordingBackend::with_profile_responses(vec![Err(
        BackendError::Unreachable("connection refused".into()),
    )]))
    .await;
    seed_valid_session(&h.pool).await;

    let response = send(&h, actions::CHECK_AUTH, None).await;
    assert_eq!(response["authenticated"], true);
    assert_eq!(response["user"]["degraded"], true);
    // The session survives: network trouble is not invalid credentials.
    assert!(store::load_auth_session(&h.pool).await.unwrap().is_some());
}

#[tokio::test]
async fn save_job_routes_by_source_host() {
    let h = harness(RecordingBackend::default()).await;
    seed_valid_session(&h.pool).await;

    let linkedin = capture_request("https://www.linkedin.com/jobs/view/42/");
    let response = send(
        &h,
        actions::SAVE_JOB,
        Some(serde_json::to_value(&linkedin).unwrap()),
    )
    .await;
    assert_eq!(response["success"], true);

    let other = capture_request("https://jobs.example.com/postings/9");
    let response = send(
        &h,
        actions::SAVE_JOB,
        Some(serde_json::to_value(&other).unwrap()),
    )
    .await;
    assert_eq!(response["success"], true);

    let scrape_calls = h.backend.scrape_calls.lock().await;
    let ingest_calls = h.backend.ingest_calls.lock().await;
    assert_eq!(scrape_calls.len(), 1);
    assert_eq!(scrape_calls[0].url, "https://www.linkedin.com/jobs/view/42/");
    assert_eq!(ingest_calls.len(), 1);
    assert_eq!(ingest_calls[0].url, "https://jobs.example.com/postings/9");
}

#[tokio::test]
async fn save_job_401_purges_session_and_reports_expiry() {
    let backend = RecordingBackend::default();
    backend
        .save_responses
        .lock()
        .await
        .push_back(Err(BackendError::Unauthorized));
    let h = harness(backend).await;
    seed_valid_session(&h.pool).await;

    let request = capture_request("https://www.linkedin.com/jobs/view/1/");
    let response = send(
        &h,
        actions::SAVE_JOB,
        Some(serde_json::to_value(&request).unwrap()),
    )
    .await;
    assert_eq!(response["success"], false);
    assert!(response["error"].as_str().unwrap().contains("expired"));
    assert!(store::load_auth_session(&h.pool).await.unwrap().is_none());
}

#[tokio::test]
async fn save_job_requires_authentication() {
    let h = harness(RecordingBackend::default()).await;
    let request = capture_request("https://www.linkedin.com/jobs/view/1/");
    let response = send(
        &h,
        actions::SAVE_JOB,
        Some(serde_json::to_value(&request).unwrap()),
    )
    .await;
    assert_eq!(response["success"], false);
    assert_eq!(response["error"], "Not authenticated");
    assert!(h.backend.scrape_calls.lock().await.is_empty());
}

#[tokio::test]
async fn set_auth_token_then_auth_completed_sees_it() {
    let h = harness(RecordingBackend::default()).await;

    let response = send(&h, actions::AUTH_COMPLETED, None).await;
    assert_eq!(response["has_token"], false);

    let response = send(
        &h,
        actions::SET_AUTH_TOKEN,
        Some(json!({ "token": "tok-new", "expiry": Utc::now().timestamp_millis() + 60_000 })),
    )
    .await;
    assert_eq!(response["success"], true);

    let response = send(&h, actions::AUTH_COMPLETED, None).await;
    assert_eq!(response["has_token"], true);

    let session = store::load_auth_session(&h.pool).await.unwrap().unwrap();
    assert_eq!(session.token, "tok-new");
}

#[tokio::test]
async fn set_auth_token_accepts_callback_url_form() {
    let h = harness(RecordingBackend::default()).await;
    let response = send(
        &h,
        actions::SET_AUTH_TOKEN,
        Some(json!({ "url": "https://ext.invalid/auth.html#access_token=tok-cb&expires_in=3600" })),
    )
    .await;
    assert_eq!(response["success"], true);

    let session = store::load_auth_session(&h.pool).await.unwrap().unwrap();
    assert_eq!(session.token, "tok-cb");
    assert!(session.expires_at_epoch_ms > Utc::now().timestamp_millis());
}

#[tokio::test]
async fn sign_out_is_idempotent() {
    let h = harness(RecordingBackend::default()).await;
    seed_valid_session(&h.pool).await;

    let response = send(&h, actions::SIGN_OUT, None).await;
    assert_eq!(response["success"], true);
    assert!(store::load_auth_session(&h.pool).await.unwrap().is_none());

    let response = send(&h, actions::SIGN_OUT, None).await;
    assert_eq!(response["success"], true);
}

#[tokio::test]
async fn open_auth_builds_install_specific_callback() {
    let h = harness(RecordingBackend::default()).await;
    let response = send(&h, actions::OPEN_AUTH, None).await;
    assert_eq!(response["success"], true);

    let install_id = store::install_id(&h.pool).await.unwrap();
    let opened = h.tabs.opened.lock().await;
    assert_eq!(opened.len(), 1);
    assert!(opened[0].starts_with("https://app.jobscout.dev/login?redirect_uri="));
    assert!(opened[0].contains(&install_id));
}

#[tokio::test]
async fn get_jobs_returns_backend_list() {
    let backend = RecordingBackend::default();
    *backend.jobs.lock().await = vec![json!({ "job_title": "SRE" })];
    let h = harness(backend).await;
    seed_valid_session(&h.pool).await;

    let response = send(&h, actions::GET_JOBS, None).await;
    assert_eq!(response["success"], true);
    assert_eq!(response["jobs"][0]["job_title"], "SRE");
}

#[tokio::test]
async fn get_profile_requires_auth_and_returns_user() {
    let h = harness(RecordingBackend::default()).await;

    let response = send(&h, actions::GET_PROFILE, None).await;
    assert_eq!(response["success"], false);
    assert_eq!(response["error"], "Not authenticated");

    seed_valid_session(&h.pool).await;
    let response = send(&h, actions::GET_PROFILE, None).await;
    assert_eq!(response["success"], true);
    assert_eq!(response["profile"]["email"], "user@example.com");
}

#[tokio::test]
async fn open_dashboard_opens_the_web_app() {
    let h = harness(RecordingBackend::default()).await;
    let response = send(&h, actions::OPEN_DASHBOARD, None).await;
    assert_eq!(response["success"], true);
    let opened = h.tabs.opened.lock().await;
    assert_eq!(opened.len(), 1);
    assert_eq!(opened[0], "https://app.jobscout.dev");
}

#[tokio::test]
async fn unknown_action_gets_a_failure_response() {
    let h = harness(RecordingBackend::default()).await;
    let response = send(&h, "explodePlease", None).await;
    assert_eq!(response["success"], false);
    assert!(response["error"].as_str().unwrap().contains("unknown action"));
}

#[tokio::test]
async fn get_job_data_runs_extraction_over_inline_snapshot() {
    let h = harness(RecordingBackend::default()).await;
    let html = r#"
        <html><body><div class="jobs-details">
        <h1 class="topcard__title">Backend Engineer</h1>
        <a class="topcard__org-name-link">Acme Co.</a>
        </div></body></html>"#;
    let response = send(
        &h,
        actions::GET_JOB_DATA,
        Some(json!({ "url": "https://www.linkedin.com/jobs/view/5/", "html": html })),
    )
    .await;
    assert_eq!(response["success"], true);
    assert_eq!(response["is_job_page"], true);
    assert_eq!(response["fallback_data"]["job_title"], "Backend Engineer");
    assert_eq!(response["fallback_data"]["company"], "Acme Co.");
}

#[tokio::test]
async fn get_job_data_survives_missing_tab() {
    let h = harness(RecordingBackend::default()).await;
    // No payload and no active tab: the extractor degrades, never errors.
    let response = send(&h, actions::GET_JOB_DATA, None).await;
    assert_eq!(response["success"], true);
    assert_eq!(response["is_job_page"], Value::Null);
}

#[tokio::test]
async fn autofill_uses_stored_profile() {
    let h = harness(RecordingBackend::default()).await;
    store::save_application_profile(
        &h.pool,
        &store::ApplicationProfile {
            first_name: Some("Ada".into()),
            email: Some("ada@example.com".into()),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    let html = r#"
        <html><body><form>
        <input name="first_name"><input type="email" name="email">
        </form></body></html>"#;
    let response = send(
        &h,
        actions::AUTOFILL_FORM,
        Some(json!({ "url": "https://boards.greenhouse.io/acme/jobs/1", "html": html })),
    )
    .await;
    assert_eq!(response["success"], true);
    assert_eq!(response["filled_count"], 2);
    assert!(response["message"]
        .as_str()
        .unwrap()
        .contains("greenhouse"));
}

#[tokio::test]
async fn autofill_without_profile_asks_for_data_first() {
    let h = harness(RecordingBackend::default()).await;
    let response = send(
        &h,
        actions::AUTOFILL_FORM,
        Some(json!({ "url": "https://boards.greenhouse.io/acme/jobs/1", "html": "<form></form>" })),
    )
    .await;
    assert_eq!(response["success"], false);
    assert!(response["message"]
        .as_str()
        .unwrap()
        .contains("No application data"));
}

#[tokio::test]
async fn check_application_page_reports_site_without_filling() {
    let h = harness(RecordingBackend::default()).await;
    let response = send(
        &h,
        actions::CHECK_APPLICATION_PAGE,
        Some(json!({ "url": "https://jobs.lever.co/acme/1", "html": "" })),
    )
    .await;
    assert_eq!(response["is_application_page"], true);
    assert_eq!(response["site"], "lever");

    let response = send(
        &h,
        actions::CHECK_APPLICATION_PAGE,
        Some(json!({ "url": "https://example.com/", "html": "" })),
    )
    .await;
    assert_eq!(response["is_application_page"], false);
}

#[tokio::test]
async fn spawned_coordinator_answers_every_request_once() {
    let pool = setup_pool().await;
    let backend = Arc::new(RecordingBackend::default());
    let tabs = Arc::new(FakeTabs::default());
    let port = Coordinator::new(pool, backend, tabs, test_config()).spawn();

    let first = port.request(Envelope::new(actions::CHECK_AUTH)).await.unwrap();
    assert_eq!(first["authenticated"], false);

    let second = port.request(Envelope::new(actions::SIGN_OUT)).await.unwrap();
    assert_eq!(second["success"], true);
}
