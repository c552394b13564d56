//! Background Coordinator: the singleton that owns the auth session, routes
//! every panel request, and performs all outbound network calls.
//!
//! Each inbound envelope is handled independently: no invariant depends on
//! in-memory continuity between messages, so a respawned coordinator picks up
//! exactly where the last one stopped, reading everything durable from the
//! Session Store. Handlers never let an error cross the message boundary:
//! every request gets exactly one `{success, ...}` response.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Url;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, instrument, warn};

use crate::autofill::{self, FillOutcome};
use crate::backend::{Backend, BackendError};
use crate::config::Config;
use crate::extract::{self, PageSource, StaticPage};
use crate::protocol::{
    actions, Ack, AuthCompletedResponse, AuthStatus, AutofillResponse, ApplicationPageResponse,
    CaptureRequest, Envelope, GetJobDataResponse, JobsResponse, PageSnapshot, ProfileResponse,
    SaveJobResponse, SetAuthToken,
};
use crate::store::{self, AuthSession, Pool};
use crate::tabs::Tabs;

pub struct Coordinator {
    pool: Pool,
    backend: Arc<dyn Backend>,
    tabs: Arc<dyn Tabs>,
    cfg: Config,
}

/// Handle for sending envelopes to a spawned coordinator. Each request is
/// answered over its own oneshot channel.
#[derive(Clone)]
pub struct MessagePort {
    tx: mpsc::Sender<(Envelope, oneshot::Sender<Value>)>,
}

impl MessagePort {
    pub async fn request(&self, envelope: Envelope) -> Result<Value> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send((envelope, reply_tx))
            .await
            .map_err(|_| anyhow!("coordinator stopped"))?;
        reply_rx
            .await
            .map_err(|_| anyhow!("coordinator dropped the response channel"))
    }
}

fn to_wire<T: serde::Serialize>(response: T) -> Value {
    serde_json::to_value(response)
        .unwrap_or_else(|err| json!({ "success": false, "error": format!("encode error: {err}") }))
}

/// `PageSource` backed by the active tab.
struct TabPage {
    tabs: Arc<dyn Tabs>,
    url: String,
}

#[async_trait]
impl PageSource for TabPage {
    fn url(&self) -> &str {
        &self.url
    }

    async fn snapshot(&self) -> Result<String> {
        self.tabs.snapshot().await
    }
}

impl Coordinator {
    pub fn new(pool: Pool, backend: Arc<dyn Backend>, tabs: Arc<dyn Tabs>, cfg: Config) -> Self {
        Coordinator {
            pool,
            backend,
            tabs,
            cfg,
        }
    }

    /// Run the coordinator as a task serving envelopes until every port is
    /// dropped. Messages are handled concurrently (a hung extraction must
    /// not stall auth checks) and each one gets its response on its own
    /// reply channel.
    pub fn spawn(self) -> MessagePort {
        let (tx, mut rx) = mpsc::channel::<(Envelope, oneshot::Sender<Value>)>(16);
        let this = Arc::new(self);
        tokio::spawn(async move {
            while let Some((envelope, reply)) = rx.recv().await {
                let this = this.clone();
                tokio::spawn(async move {
                    let response = this.handle(envelope).await;
                    if reply.send(response).is_err() {
                        warn!("requester went away before the response was delivered");
                    }
                });
            }
        });
        MessagePort { tx }
    }

    /// Dispatch one envelope. Always produces a response value.
    #[instrument(skip_all, fields(action = %envelope.action))]
    pub async fn handle(&self, envelope: Envelope) -> Value {
        match envelope.action.as_str() {
            actions::CHECK_AUTH => to_wire(self.check_auth().await),
            actions::OPEN_AUTH => to_wire(self.open_auth().await),
            actions::SIGN_OUT => to_wire(self.sign_out().await),
            actions::OPEN_DASHBOARD => to_wire(self.open_dashboard().await),
            actions::GET_JOBS => to_wire(self.get_jobs().await),
            actions::SAVE_JOB => to_wire(self.save_job(envelope.payload).await),
            actions::SET_AUTH_TOKEN => to_wire(self.set_auth_token(envelope.payload).await),
            actions::AUTH_COMPLETED => to_wire(self.auth_completed().await),
            actions::GET_JOB_DATA => to_wire(self.get_job_data(envelope.payload).await),
            actions::GET_PROFILE => to_wire(self.get_profile().await),
            actions::AUTOFILL_FORM => to_wire(self.autofill_form(envelope.payload).await),
            actions::CHECK_APPLICATION_PAGE => {
                to_wire(self.check_application_page(envelope.payload).await)
            }
            other => {
                warn!(action = other, "unknown action");
                to_wire(Ack::err(format!("unknown action: {other}")))
            }
        }
    }

    /// Three-way auth check: valid, invalid, or unreachable. An unreachable
    /// backend must never be conflated with invalid credentials.
    async fn check_auth(&self) -> AuthStatus {
        match self.check_auth_inner().await {
            Ok(status) => status,
            Err(err) => {
                warn!(?err, "auth check failed");
                AuthStatus {
                    authenticated: false,
                    user: None,
                    error: Some(format!("authentication check failed: {err:#}")),
                }
            }
        }
    }

    async fn check_auth_inner(&self) -> Result<AuthStatus> {
        let not_authenticated = |reason: &str| AuthStatus {
            authenticated: false,
            user: None,
            error: Some(reason.to_string()),
        };

        let session = match store::load_auth_session(&self.pool).await? {
            Some(session) => session,
            None => return Ok(not_authenticated("no authentication token found")),
        };

        if session.is_expired(Utc::now().timestamp_millis()) {
            info!("stored token expired; purging");
            store::purge_auth_session(&self.pool).await?;
            return Ok(not_authenticated("authentication token has expired"));
        }

        match self.backend.fetch_profile(&session.token).await {
            Ok(user) => Ok(AuthStatus {
                authenticated: true,
                user: Some(user),
                error: None,
            }),
            Err(BackendError::Unreachable(err)) => {
                // Degraded-but-valid: the token is locally unexpired and the
                // verifier is down, so the session is preserved.
                warn!(?err, "backend unreachable; using cached authentication");
                Ok(AuthStatus {
                    authenticated: true,
                    user: Some(json!({ "degraded": true })),
                    error: None,
                })
            }
            Err(err) => {
                info!(%err, "token verification failed; purging");
                store::purge_auth_session(&self.pool).await?;
                Ok(not_authenticated(&err.to_string()))
            }
        }
    }

    async fn open_auth(&self) -> Ack {
        match self.open_auth_inner().await {
            Ok(()) => Ack::ok(),
            Err(err) => Ack::err(format!("failed to open sign-in page: {err:#}")),
        }
    }

    async fn open_auth_inner(&self) -> Result<()> {
        let install_id = store::install_id(&self.pool).await?;
        let redirect_uri = format!("jobscout://auth/{install_id}");
        let mut login = Url::parse(&self.cfg.app.web_app_url)?.join("login")?;
        login
            .query_pairs_mut()
            .append_pair("redirect_uri", &redirect_uri);
        self.tabs.open(login.as_str()).await
    }

    /// Unconditional purge; idempotent.
    async fn sign_out(&self) -> Ack {
        match store::purge_auth_session(&self.pool).await {
            Ok(()) => Ack::ok(),
            Err(err) => Ack::err(format!("sign out failed: {err:#}")),
        }
    }

    async fn open_dashboard(&self) -> Ack {
        match self.tabs.open(&self.cfg.app.web_app_url).await {
            Ok(()) => Ack::ok(),
            Err(err) => Ack::err(format!("failed to open dashboard: {err:#}")),
        }
    }

    async fn get_jobs(&self) -> JobsResponse {
        let token = match self.require_token().await {
            Ok(token) => token,
            Err(message) => {
                return JobsResponse {
                    success: false,
                    jobs: Vec::new(),
                    error: Some(message),
                }
            }
        };
        match self.backend.list_jobs(&token).await {
            Ok(jobs) => JobsResponse {
                success: true,
                jobs,
                error: None,
            },
            Err(err) => JobsResponse {
                success: false,
                jobs: Vec::new(),
                error: Some(self.classify_backend_error(err).await),
            },
        }
    }

    /// Route the capture to one of the two ingestion paths by source host.
    async fn save_job(&self, payload: Option<Value>) -> SaveJobResponse {
        let request: CaptureRequest = match payload.and_then(|p| serde_json::from_value(p).ok()) {
            Some(request) => request,
            None => {
                return SaveJobResponse {
                    success: false,
                    data: None,
                    error: Some("invalid saveJob payload".to_string()),
                }
            }
        };

        let token = match self.require_token().await {
            Ok(token) => token,
            Err(message) => {
                return SaveJobResponse {
                    success: false,
                    data: None,
                    error: Some(message),
                }
            }
        };

        let is_linkedin = request.url.contains("linkedin.com");
        info!(
            url = %request.url,
            endpoint = if is_linkedin { "scrape-linkedin" } else { "ingest-html" },
            "saving job"
        );
        let result = if is_linkedin {
            self.backend.scrape_linkedin(&token, &request).await
        } else {
            self.backend.ingest_html(&token, &request).await
        };

        match result {
            Ok(data) => SaveJobResponse {
                success: true,
                data: Some(data),
                error: None,
            },
            Err(err) => SaveJobResponse {
                success: false,
                data: None,
                error: Some(self.classify_backend_error(err).await),
            },
        }
    }

    /// Wholesale session write. Accepts either the `{token, expiry}` pair or
    /// the raw sign-in redirect URL from the callback page, which carries the
    /// token in its fragment or query.
    async fn set_auth_token(&self, payload: Option<Value>) -> Ack {
        let payload = match payload {
            Some(payload) => payload,
            None => return Ack::err("invalid setAuthToken payload"),
        };
        let parsed: Option<SetAuthToken> = serde_json::from_value(payload.clone())
            .ok()
            .or_else(|| {
                payload
                    .get("url")
                    .and_then(Value::as_str)
                    .and_then(crate::protocol::parse_auth_callback)
            });
        let payload = match parsed {
            Some(payload) => payload,
            None => return Ack::err("invalid setAuthToken payload"),
        };
        let session = AuthSession {
            token: payload.token,
            expires_at_epoch_ms: payload.expiry,
        };
        match store::save_auth_session(&self.pool, &session).await {
            Ok(()) => Ack::ok(),
            Err(err) => Ack::err(format!("failed to store token: {err:#}")),
        }
    }

    async fn auth_completed(&self) -> AuthCompletedResponse {
        let has_token = store::session_get(&self.pool, store::AUTH_TOKEN_KEY)
            .await
            .ok()
            .flatten()
            .is_some();
        AuthCompletedResponse {
            success: true,
            has_token,
        }
    }

    /// Run the Page Extractor over the active page (or an inline snapshot)
    /// and return its result across the boundary. The extractor never throws;
    /// an internal failure arrives as `is_job_page: null`.
    async fn get_job_data(&self, payload: Option<Value>) -> GetJobDataResponse {
        let retry_delay = Duration::from_millis(self.cfg.capture.retry_delay_ms);
        let snapshot: Option<PageSnapshot> =
            payload.and_then(|p| serde_json::from_value(p).ok());
        let result = match snapshot {
            Some(snapshot) => {
                let page = StaticPage::new(snapshot.url, snapshot.html);
                extract::run(&page, retry_delay).await
            }
            None => {
                let url = self.tabs.active_url().await.unwrap_or_default();
                let page = TabPage {
                    tabs: self.tabs.clone(),
                    url,
                };
                extract::run(&page, retry_delay).await
            }
        };
        GetJobDataResponse {
            success: true,
            result,
        }
    }

    async fn get_profile(&self) -> ProfileResponse {
        let token = match self.require_token().await {
            Ok(token) => token,
            Err(message) => {
                return ProfileResponse {
                    success: false,
                    profile: None,
                    error: Some(message),
                }
            }
        };
        match self.backend.fetch_profile(&token).await {
            Ok(profile) => ProfileResponse {
                success: true,
                profile: Some(profile),
                error: None,
            },
            Err(err) => ProfileResponse {
                success: false,
                profile: None,
                error: Some(self.classify_backend_error(err).await),
            },
        }
    }

    async fn autofill_form(&self, payload: Option<Value>) -> AutofillResponse {
        let profile = match store::load_application_profile(&self.pool).await {
            Ok(Some(profile)) => profile,
            Ok(None) => {
                return AutofillResponse {
                    success: false,
                    message: "No application data found. Please fill out your profile first."
                        .to_string(),
                    filled_count: 0,
                    actions: Vec::new(),
                }
            }
            Err(err) => {
                return AutofillResponse {
                    success: false,
                    message: format!("failed to load application data: {err:#}"),
                    filled_count: 0,
                    actions: Vec::new(),
                }
            }
        };

        let retry_delay = Duration::from_millis(self.cfg.capture.retry_delay_ms);
        let outcome = match payload.and_then(|p| serde_json::from_value::<PageSnapshot>(p).ok()) {
            Some(snapshot) => {
                let page = StaticPage::new(snapshot.url, snapshot.html);
                autofill::run(&page, &profile, retry_delay).await
            }
            None => {
                let url = self.tabs.active_url().await.unwrap_or_default();
                let page = TabPage {
                    tabs: self.tabs.clone(),
                    url,
                };
                autofill::run(&page, &profile, retry_delay).await
            }
        };

        match outcome {
            FillOutcome::UnrecognizedSite => AutofillResponse {
                success: false,
                message: "Not on a recognized application site".to_string(),
                filled_count: 0,
                actions: Vec::new(),
            },
            FillOutcome::Filled { site, actions } => AutofillResponse {
                success: true,
                message: format!("Filled {} fields on {}", actions.len(), site),
                filled_count: actions.len(),
                actions,
            },
        }
    }

    async fn check_application_page(&self, payload: Option<Value>) -> ApplicationPageResponse {
        let url = match payload.and_then(|p| serde_json::from_value::<PageSnapshot>(p).ok()) {
            Some(snapshot) => snapshot.url,
            None => self.tabs.active_url().await.unwrap_or_default(),
        };
        let site = autofill::detect_site_for_url(&url);
        ApplicationPageResponse {
            success: true,
            is_application_page: site.is_some(),
            site: site.map(|s| s.to_string()),
        }
    }

    /// Fetch the stored token, purging and refusing when locally expired.
    async fn require_token(&self) -> Result<String, String> {
        let session = store::load_auth_session(&self.pool)
            .await
            .map_err(|err| format!("session store error: {err:#}"))?;
        let session = session.ok_or_else(|| "Not authenticated".to_string())?;
        if session.is_expired(Utc::now().timestamp_millis()) {
            if let Err(err) = store::purge_auth_session(&self.pool).await {
                warn!(?err, "failed to purge expired session");
            }
            return Err("Token has expired. Please log in again.".to_string());
        }
        Ok(session.token)
    }

    /// A 401 is interpreted as "log out" here and only here; everything else
    /// is surfaced verbatim with no automatic retry.
    async fn classify_backend_error(&self, err: BackendError) -> String {
        if matches!(err, BackendError::Unauthorized) {
            info!("backend rejected token; purging session");
            if let Err(purge_err) = store::purge_auth_session(&self.pool).await {
                warn!(?purge_err, "failed to purge session after 401");
            }
        }
        err.to_string()
    }
}
