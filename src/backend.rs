//! HTTP client for the job-capture backend, consumed as a black box.
//!
//! Failures are classified into `BackendError` so the coordinator's
//! valid / invalid / unreachable branch is typed rather than string-matched:
//! a 401 is the only thing that invalidates the local session, and a
//! transport failure must never be conflated with bad credentials.

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::warn;

use crate::config::Config;
use crate::protocol::CaptureRequest;

const PROFILE_PATH: &str = "api/profile";
const JOBS_PATH: &str = "api/jobs";
const SCRAPE_LINKEDIN_PATH: &str = "api/jobs/scrape-linkedin";
const INGEST_HTML_PATH: &str = "api/jobs/ingest-html";

#[derive(Debug, Error)]
pub enum BackendError {
    /// The backend rejected the bearer token. The message is what reaches
    /// the panel, which routes on the "expired" substring.
    #[error("Token has expired. Please log in again.")]
    Unauthorized,
    /// Transport-level failure: the backend could not be reached at all.
    #[error("backend unreachable: {0}")]
    Unreachable(String),
    #[error("backend error {status}: {message}")]
    Api { status: StatusCode, message: String },
    #[error("invalid backend response: {0}")]
    Decode(#[source] reqwest::Error),
}

/// The coordinator's view of the backend. Tests substitute recording fakes.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn fetch_profile(&self, token: &str) -> Result<Value, BackendError>;
    async fn list_jobs(&self, token: &str) -> Result<Vec<Value>, BackendError>;
    async fn scrape_linkedin(
        &self,
        token: &str,
        request: &CaptureRequest,
    ) -> Result<Value, BackendError>;
    async fn ingest_html(
        &self,
        token: &str,
        request: &CaptureRequest,
    ) -> Result<Value, BackendError>;
}

#[derive(Clone)]
pub struct HttpBackend {
    http: Client,
    base_url: Url,
}

impl std::fmt::Debug for HttpBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpBackend")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl HttpBackend {
    pub fn from_config(cfg: &Config) -> Result<Self, BackendError> {
        let base_url = Url::parse(&cfg.app.api_base_url).map_err(|_| BackendError::Api {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: format!("invalid api_base_url: {}", cfg.app.api_base_url),
        })?;
        Ok(Self::with_base_url(base_url))
    }

    pub fn with_base_url(base_url: Url) -> Self {
        let http = Client::builder()
            .user_agent("jobscout/0.1")
            .build()
            .expect("reqwest client");
        HttpBackend { http, base_url }
    }

    fn endpoint(&self, path: &str) -> Url {
        self.base_url.join(path).expect("valid backend URL join")
    }

    pub fn build_get(&self, path: &str, token: &str) -> Result<reqwest::Request, BackendError> {
        self.http
            .get(self.endpoint(path))
            .bearer_auth(token)
            .header("Content-Type", "application/json")
            .build()
            .map_err(|err| BackendError::Unreachable(err.to_string()))
    }

    async fn get_json(&self, path: &str, token: &str) -> Result<Value, BackendError> {
        let request = self.build_get(path, token)?;
        let res = self
            .http
            .execute(request)
            .await
            .map_err(|err| BackendError::Unreachable(err.to_string()))?;
        read_json(res).await
    }

    async fn post_json(&self, path: &str, token: &str, body: &Value) -> Result<Value, BackendError> {
        let res = self
            .http
            .post(self.endpoint(path))
            .bearer_auth(token)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|err| BackendError::Unreachable(err.to_string()))?;
        read_json(res).await
    }
}

async fn read_json(res: reqwest::Response) -> Result<Value, BackendError> {
    let status = res.status();
    if status == StatusCode::UNAUTHORIZED {
        return Err(BackendError::Unauthorized);
    }
    if !status.is_success() {
        let body = res.text().await.unwrap_or_default();
        // The backend reports failures as {"detail": "..."}; fall back to the
        // raw body when it doesn't.
        let message = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| v.get("detail").and_then(Value::as_str).map(str::to_string))
            .unwrap_or(body);
        warn!(%status, %message, "backend request failed");
        return Err(BackendError::Api { status, message });
    }
    res.json().await.map_err(BackendError::Decode)
}

/// Payload for the job-board-specific scrape endpoint.
pub fn build_linkedin_payload(request: &CaptureRequest) -> Value {
    json!({
        "url": request.url,
        "canonical_url": request.canonical_url,
        "stage": request.stage,
        "excitement": request.excitement,
        "html_content": request.html_content,
        "fallback_data": request.fallback_data,
    })
}

/// Payload for the generic ingestion endpoint: `{html, source_url}` plus the
/// capture metadata the backend may use.
pub fn build_ingest_payload(request: &CaptureRequest) -> Value {
    let source_url = if !request.url.is_empty() {
        request.url.clone()
    } else {
        request.canonical_url.clone().unwrap_or_default()
    };
    json!({
        "html": request.html_content.clone().unwrap_or_default(),
        "source_url": source_url,
        "url": source_url,
        "canonical_url": request.canonical_url,
        "stage": request.stage,
        "excitement": request.excitement,
        "fallback_data": request.fallback_data,
    })
}

#[async_trait]
impl Backend for HttpBackend {
    async fn fetch_profile(&self, token: &str) -> Result<Value, BackendError> {
        self.get_json(PROFILE_PATH, token).await
    }

    async fn list_jobs(&self, token: &str) -> Result<Vec<Value>, BackendError> {
        let value = self.get_json(JOBS_PATH, token).await?;
        match value {
            Value::Array(jobs) => Ok(jobs),
            other => Ok(vec![other]),
        }
    }

    async fn scrape_linkedin(
        &self,
        token: &str,
        request: &CaptureRequest,
    ) -> Result<Value, BackendError> {
        self.post_json(SCRAPE_LINKEDIN_PATH, token, &build_linkedin_payload(request))
            .await
    }

    async fn ingest_html(
        &self,
        token: &str,
        request: &CaptureRequest,
    ) -> Result<Value, BackendError> {
        self.post_json(INGEST_HTML_PATH, token, &build_ingest_payload(request))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::JobFields;
    use crate::protocol::Stage;

    fn sample_request() -> CaptureRequest {
        CaptureRequest {
            url: "https://www.linkedin.com/jobs/view/42/".into(),
            canonical_url: Some("https://www.linkedin.com/jobs/view/42".into()),
            stage: Stage::Bookmarked,
            excitement: 4,
            html_content: Some("<html></html>".into()),
            fallback_data: JobFields::unknown(),
        }
    }

    #[test]
    fn linkedin_payload_carries_capture_fields() {
        let body = build_linkedin_payload(&sample_request());
        assert_eq!(body["url"], "https://www.linkedin.com/jobs/view/42/");
        assert_eq!(body["canonical_url"], "https://www.linkedin.com/jobs/view/42");
        assert_eq!(body["stage"], "Bookmarked");
        assert_eq!(body["excitement"], 4);
        assert_eq!(body["html_content"], "<html></html>");
        assert_eq!(body["fallback_data"]["job_title"], "Unknown Job Title");
    }

    #[test]
    fn ingest_payload_uses_html_and_source_url() {
        let body = build_ingest_payload(&sample_request());
        assert_eq!(body["html"], "<html></html>");
        assert_eq!(body["source_url"], "https://www.linkedin.com/jobs/view/42/");
        assert_eq!(body["url"], body["source_url"]);
    }

    #[test]
    fn ingest_payload_falls_back_to_canonical_url() {
        let mut request = sample_request();
        request.url = String::new();
        request.html_content = None;
        let body = build_ingest_payload(&request);
        assert_eq!(body["html"], "");
        assert_eq!(body["source_url"], "https://www.linkedin.com/jobs/view/42");
    }

    #[test]
    fn build_get_sets_bearer_and_content_type() {
        let backend =
            HttpBackend::with_base_url(Url::parse("https://api.jobscout.dev/").unwrap());
        let request = backend.build_get(PROFILE_PATH, "token-1").unwrap();
        assert_eq!(request.method(), reqwest::Method::GET);
        assert_eq!(request.url().path(), "/api/profile");
        let headers = request.headers();
        assert_eq!(
            headers
                .get("Authorization")
                .and_then(|h| h.to_str().ok())
                .unwrap(),
            "Bearer token-1"
        );
        assert_eq!(
            headers
                .get("Content-Type")
                .and_then(|h| h.to_str().ok())
                .unwrap(),
            "application/json"
        );
    }
}
