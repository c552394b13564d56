//! Panel Controller: the user-facing control surface for one open panel.
//!
//! A `PanelSession` owns everything the panel used to keep in globals (the
//! last observed URL, the rating and stage, the polling task) and publishes
//! view transitions over a `watch` channel. It is constructed on panel open
//! and torn down on close; dropping it aborts the poller so no timer leaks.

use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

use crate::config::Capture;
use crate::coordinator::MessagePort;
use crate::extract::{self, ExtractionResult, LOGIN_REQUIRED, UNKNOWN_TITLE};
use crate::protocol::{
    actions, AuthStatus, CaptureRequest, Envelope, GetJobDataResponse, JobsResponse,
    SaveJobResponse, Stage,
};
use crate::tabs::Tabs;

/// View state machine: `Loading` on every (re-)check, then one of the three
/// terminal views for that check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanelView {
    Loading,
    NotSignedIn,
    JobCapture,
    Dashboard,
}

/// What one save attempt produced, ready for user-facing copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved {
        job_title: Option<String>,
        company: Option<String>,
    },
    /// The backend already has this posting.
    AlreadySaved,
    /// Hard stop before any network call; guide the user to a job page.
    NotJobPage,
    /// The target site, not us, wants a login first.
    LoginRequired,
    /// Our session lapsed mid-save; the view has moved to `NotSignedIn`.
    SessionExpired,
    Failed(String),
}

#[derive(Debug, Clone, Copy)]
struct FormState {
    rating: u8,
    stage: Stage,
}

impl Default for FormState {
    fn default() -> Self {
        FormState {
            rating: 1,
            stage: Stage::Bookmarked,
        }
    }
}

struct PanelInner {
    port: MessagePort,
    tabs: Arc<dyn Tabs>,
    capture: Capture,
    view: watch::Sender<PanelView>,
    last_url: Mutex<Option<String>>,
    form: Mutex<FormState>,
    save_in_flight: AtomicBool,
}

pub struct PanelSession {
    inner: Arc<PanelInner>,
    poller: JoinHandle<()>,
}

impl PanelSession {
    /// Build the session, run the initial status check, and start the
    /// URL-change poller.
    pub async fn open(port: MessagePort, tabs: Arc<dyn Tabs>, capture: Capture) -> PanelSession {
        let (view, _) = watch::channel(PanelView::Loading);
        let inner = Arc::new(PanelInner {
            port,
            tabs,
            capture,
            view,
            last_url: Mutex::new(None),
            form: Mutex::new(FormState::default()),
            save_in_flight: AtomicBool::new(false),
        });

        *inner.last_url.lock().await = inner.tabs.active_url().await;
        inner.check_status().await;

        let poller = tokio::spawn(poll_url_changes(inner.clone()));
        PanelSession { inner, poller }
    }

    /// Subscribe to view transitions.
    pub fn views(&self) -> watch::Receiver<PanelView> {
        self.inner.view.subscribe()
    }

    pub fn current_view(&self) -> PanelView {
        *self.inner.view.borrow()
    }

    /// Excitement rating, clamped to 1..=5.
    pub async fn set_rating(&self, rating: u8) {
        self.inner.form.lock().await.rating = rating.clamp(1, 5);
    }

    pub async fn set_stage(&self, stage: Stage) {
        self.inner.form.lock().await.stage = stage;
    }

    pub async fn form_state(&self) -> (u8, Stage) {
        let form = self.inner.form.lock().await;
        (form.rating, form.stage)
    }

    /// Re-run the auth + URL check (sign-in completion, manual refresh).
    pub async fn refresh(&self) {
        self.inner.check_status().await;
    }

    pub async fn handle_sign_in(&self) -> Result<(), String> {
        let response = self
            .inner
            .request_ack(Envelope::new(actions::OPEN_AUTH))
            .await?;
        if response {
            Ok(())
        } else {
            Err("failed to open sign-in page".to_string())
        }
    }

    pub async fn handle_sign_out(&self) {
        if let Err(err) = self.inner.request_ack(Envelope::new(actions::SIGN_OUT)).await {
            warn!(%err, "sign out request failed");
        }
        let _ = self.inner.view.send(PanelView::NotSignedIn);
    }

    /// Jobs for the dashboard view.
    pub async fn load_dashboard_jobs(&self) -> Result<Vec<Value>, String> {
        let value = self
            .inner
            .request(Envelope::new(actions::GET_JOBS))
            .await?;
        let response: JobsResponse =
            serde_json::from_value(value).map_err(|err| format!("bad jobs response: {err}"))?;
        if response.success {
            Ok(response.jobs)
        } else {
            Err(response
                .error
                .unwrap_or_else(|| "failed to load jobs".to_string()))
        }
    }

    /// The capture flow: extraction raced against a hard timeout, the
    /// not-a-job-page stop, then the save and its outcome branching.
    #[instrument(skip_all)]
    pub async fn handle_save_job(&self) -> SaveOutcome {
        // One save at a time; the trigger is disabled while one is in flight.
        if self.inner.save_in_flight.swap(true, Ordering::SeqCst) {
            return SaveOutcome::Failed("a save is already in progress".to_string());
        }
        let outcome = self.inner.save_job().await;
        self.inner.save_in_flight.store(false, Ordering::SeqCst);

        if matches!(outcome, SaveOutcome::Saved { .. } | SaveOutcome::AlreadySaved) {
            // Leave the success message up, then reset the form.
            let inner = self.inner.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(inner.capture.form_reset_delay_ms)).await;
                *inner.form.lock().await = FormState::default();
            });
        }
        outcome
    }

    /// Tear down the session, cancelling the poller.
    pub fn close(self) {
        self.poller.abort();
    }
}

impl Drop for PanelSession {
    fn drop(&mut self) {
        self.poller.abort();
    }
}

/// Fixed-interval poll of the active tab URL; re-checks status at most once
/// per distinct URL value.
async fn poll_url_changes(inner: Arc<PanelInner>) {
    let mut interval =
        tokio::time::interval(Duration::from_millis(inner.capture.url_poll_interval_ms));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    interval.tick().await; // immediate first tick; the open() check covered it
    loop {
        interval.tick().await;
        let current = inner.tabs.active_url().await;
        let changed = {
            let mut last = inner.last_url.lock().await;
            if current.is_some() && current != *last {
                *last = current.clone();
                true
            } else {
                false
            }
        };
        if changed {
            info!(url = current.as_deref().unwrap_or(""), "active tab url changed");
            inner.check_status().await;
        }
    }
}

impl PanelInner {
    async fn request(&self, envelope: Envelope) -> Result<Value, String> {
        self.port
            .request(envelope)
            .await
            .map_err(|err| format!("no response from background: {err:#}"))
    }

    async fn request_ack(&self, envelope: Envelope) -> Result<bool, String> {
        let value = self.request(envelope).await?;
        Ok(value.get("success").and_then(Value::as_bool) == Some(true))
    }

    /// Transition rule: not authenticated → NotSignedIn; otherwise route on
    /// the active tab's shape.
    async fn check_status(&self) {
        let _ = self.view.send(PanelView::Loading);

        let auth: AuthStatus = match self.request(Envelope::new(actions::CHECK_AUTH)).await {
            Ok(value) => serde_json::from_value(value).unwrap_or_default(),
            Err(err) => {
                warn!(%err, "status check failed");
                AuthStatus::default()
            }
        };
        if !auth.authenticated {
            let _ = self.view.send(PanelView::NotSignedIn);
            return;
        }

        let url = self.tabs.active_url().await.unwrap_or_default();
        let view = if extract::looks_like_job_url(&url) {
            PanelView::JobCapture
        } else {
            PanelView::Dashboard
        };
        let _ = self.view.send(view);
    }

    async fn save_job(&self) -> SaveOutcome {
        // Extraction must complete or time out strictly before the save.
        let extraction = self.extract_with_timeout().await;

        // The target site wants a login first; instruct instead of submitting
        // LOGIN_REQUIRED sentinels.
        if extraction.is_login_page {
            return SaveOutcome::LoginRequired;
        }
        // A determined "not a job page" is a hard stop before any network
        // call. An undetermined verdict (timeout, extractor failure) still
        // proceeds with whatever was captured.
        if extraction.is_job_page == Some(false) {
            return SaveOutcome::NotJobPage;
        }

        let tab_url = self.tabs.active_url().await.unwrap_or_default();
        let url = extraction
            .canonical_url
            .clone()
            .filter(|u| !u.is_empty())
            .unwrap_or(tab_url);
        let form = *self.form.lock().await;
        let request = CaptureRequest {
            url,
            canonical_url: extraction.canonical_url.clone(),
            stage: form.stage,
            excitement: form.rating.clamp(1, 5),
            html_content: extraction.html_content.clone(),
            fallback_data: extraction.fallback_data.clone(),
        };

        let envelope = match Envelope::with_payload(actions::SAVE_JOB, &request) {
            Ok(envelope) => envelope,
            Err(err) => return SaveOutcome::Failed(format!("could not encode save request: {err}")),
        };
        let response: SaveJobResponse = match self.request(envelope).await {
            Ok(value) => serde_json::from_value(value)
                .unwrap_or_else(|err| SaveJobResponse {
                    success: false,
                    data: None,
                    error: Some(format!("bad save response: {err}")),
                }),
            Err(err) => return SaveOutcome::Failed(err),
        };

        if response.success {
            if response.is_duplicate() {
                return SaveOutcome::AlreadySaved;
            }
            let (job_title, company) = echoed_job_info(&response, &extraction);
            return SaveOutcome::Saved { job_title, company };
        }

        let error = response
            .error
            .unwrap_or_else(|| "Unknown error".to_string());
        if error.contains("expired") {
            // Forces re-auth: the stored session is gone.
            let _ = self.view.send(PanelView::NotSignedIn);
            SaveOutcome::SessionExpired
        } else if error.contains("log in to LinkedIn") {
            SaveOutcome::LoginRequired
        } else {
            SaveOutcome::Failed(error)
        }
    }

    /// Race extraction against the hard deadline; on elapse proceed with a
    /// degraded result rather than blocking the user. The losing request is
    /// abandoned, not cancelled.
    async fn extract_with_timeout(&self) -> ExtractionResult {
        let deadline = Duration::from_millis(self.capture.extraction_timeout_ms);
        let request = self.request(Envelope::new(actions::GET_JOB_DATA));
        match tokio::time::timeout(deadline, request).await {
            Ok(Ok(value)) => serde_json::from_value::<GetJobDataResponse>(value)
                .map(|r| r.result)
                .unwrap_or_else(|err| {
                    warn!(%err, "bad extraction response");
                    ExtractionResult::failure()
                }),
            Ok(Err(err)) => {
                warn!(%err, "extraction request failed");
                ExtractionResult::failure()
            }
            Err(_) => {
                warn!("extraction timed out; proceeding with fallback fields");
                ExtractionResult::failure()
            }
        }
    }
}

/// Structured fields for the confirmation: backend echo first, then the
/// extractor's own fallback when it resolved something real.
fn echoed_job_info(
    response: &SaveJobResponse,
    extraction: &ExtractionResult,
) -> (Option<String>, Option<String>) {
    if let Some(extracted) = response
        .data
        .as_ref()
        .and_then(|data| data.get("extracted_data"))
    {
        let title = extracted
            .get("job_title")
            .and_then(Value::as_str)
            .map(str::to_string);
        let company = extracted
            .get("company")
            .and_then(Value::as_str)
            .map(str::to_string);
        if title.is_some() || company.is_some() {
            return (title, company);
        }
    }
    let fields = &extraction.fallback_data;
    let title = (fields.job_title != UNKNOWN_TITLE && fields.job_title != LOGIN_REQUIRED)
        .then(|| fields.job_title.clone());
    let company = fields
        .company_resolved()
        .then(|| fields.company.clone());
    (title, company)
}
