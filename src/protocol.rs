//! Cross-context message envelope and wire types.
//!
//! Every call between components is an `{action, payload?}` envelope answered
//! by exactly one `{success, ...}` response. Responses are typed so the panel
//! never string-picks fields out of loose JSON; the coordinator serializes
//! them back to `Value` at the boundary.

use chrono::Utc;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::autofill::FillAction;
use crate::extract::{ExtractionResult, JobFields};

/// Action names, exactly as they appear on the wire.
pub mod actions {
    pub const CHECK_AUTH: &str = "checkAuth";
    pub const OPEN_AUTH: &str = "openAuth";
    pub const SIGN_OUT: &str = "signOut";
    pub const OPEN_DASHBOARD: &str = "openDashboard";
    pub const GET_JOBS: &str = "getJobs";
    pub const SAVE_JOB: &str = "saveJob";
    pub const SET_AUTH_TOKEN: &str = "setAuthToken";
    pub const AUTH_COMPLETED: &str = "authCompleted";
    pub const GET_JOB_DATA: &str = "get_job_data";
    pub const GET_PROFILE: &str = "getProfile";
    pub const AUTOFILL_FORM: &str = "autofillForm";
    pub const CHECK_APPLICATION_PAGE: &str = "checkApplicationPage";
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Envelope {
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl Envelope {
    pub fn new(action: &str) -> Self {
        Envelope {
            action: action.to_string(),
            payload: None,
        }
    }

    pub fn with_payload<T: Serialize>(action: &str, payload: &T) -> anyhow::Result<Self> {
        Ok(Envelope {
            action: action.to_string(),
            payload: Some(serde_json::to_value(payload)?),
        })
    }
}

/// Tracking stage for a captured job.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum Stage {
    #[default]
    Bookmarked,
    Applying,
    Applied,
    Interviewing,
    Accepted,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Bookmarked => "Bookmarked",
            Stage::Applying => "Applying",
            Stage::Applied => "Applied",
            Stage::Interviewing => "Interviewing",
            Stage::Accepted => "Accepted",
        }
    }
}

/// Payload of a `saveJob` request. Constructed fresh per capture, never
/// persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CaptureRequest {
    pub url: String,
    pub canonical_url: Option<String>,
    pub stage: Stage,
    pub excitement: u8,
    pub html_content: Option<String>,
    pub fallback_data: JobFields,
}

/// Payload of `setAuthToken`, written by the auth-callback page.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SetAuthToken {
    pub token: String,
    pub expiry: i64,
}

/// Payload of `get_job_data` / `autofillForm` / `checkApplicationPage`: the
/// visited page as seen by the host shim.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PageSnapshot {
    pub url: String,
    pub html: String,
}

const DEFAULT_EXPIRES_IN_SECS: i64 = 86_400;

/// Parse the sign-in redirect URL into a `setAuthToken` payload. The token
/// may arrive via fragment (`#access_token=`) or query (`?access_token=`);
/// `expires_in` defaults to one day when missing or malformed.
pub fn parse_auth_callback(url: &str) -> Option<SetAuthToken> {
    let parsed = Url::parse(url).ok()?;
    let from_pairs = |raw: &str, key: &str| -> Option<String> {
        raw.split('&').find_map(|pair| {
            let (k, v) = pair.split_once('=')?;
            (k == key && !v.is_empty()).then(|| v.to_string())
        })
    };
    let fragment = parsed.fragment().unwrap_or("");
    let query = parsed.query().unwrap_or("");
    let token = from_pairs(fragment, "access_token").or_else(|| from_pairs(query, "access_token"))?;
    let expires_in = from_pairs(fragment, "expires_in")
        .or_else(|| from_pairs(query, "expires_in"))
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(DEFAULT_EXPIRES_IN_SECS);
    Some(SetAuthToken {
        token,
        expiry: Utc::now().timestamp_millis() + expires_in * 1_000,
    })
}

// ---- responses ----

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Ack {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Ack {
    pub fn ok() -> Self {
        Ack {
            success: true,
            error: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Ack {
            success: false,
            error: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthStatus {
    pub authenticated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobsResponse {
    pub success: bool,
    #[serde(default)]
    pub jobs: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SaveJobResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SaveJobResponse {
    /// Whether the backend recognized the posting as already saved.
    pub fn is_duplicate(&self) -> bool {
        let data = match &self.data {
            Some(data) => data,
            None => return false,
        };
        data.get("is_duplicate").and_then(Value::as_bool) == Some(true)
            || data.get("status").and_then(Value::as_str) == Some("duplicate")
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthCompletedResponse {
    pub success: bool,
    pub has_token: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProfileResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GetJobDataResponse {
    pub success: bool,
    #[serde(flatten)]
    pub result: ExtractionResult,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AutofillResponse {
    pub success: bool,
    pub message: String,
    pub filled_count: usize,
    /// The fill plan for the host shim to apply, dispatching
    /// input/change/blur so host-page validation observes each write.
    #[serde(default)]
    pub actions: Vec<FillAction>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApplicationPageResponse {
    pub success: bool,
    pub is_application_page: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_round_trips_without_payload() {
        let envelope = Envelope::new(actions::CHECK_AUTH);
        let raw = serde_json::to_string(&envelope).unwrap();
        assert_eq!(raw, r#"{"action":"checkAuth"}"#);
        let back: Envelope = serde_json::from_str(&raw).unwrap();
        assert_eq!(back, envelope);
    }

    #[test]
    fn stage_serializes_by_name() {
        assert_eq!(
            serde_json::to_string(&Stage::Interviewing).unwrap(),
            r#""Interviewing""#
        );
        assert_eq!(Stage::default(), Stage::Bookmarked);
    }

    #[test]
    fn auth_callback_from_fragment() {
        let parsed =
            parse_auth_callback("https://ext.invalid/auth.html#access_token=tok-1&expires_in=60")
                .unwrap();
        assert_eq!(parsed.token, "tok-1");
        let delta = parsed.expiry - Utc::now().timestamp_millis();
        assert!((50_000..=60_000).contains(&delta), "delta was {delta}");
    }

    #[test]
    fn auth_callback_from_query_with_default_expiry() {
        let parsed = parse_auth_callback("https://ext.invalid/auth.html?access_token=tok-2").unwrap();
        assert_eq!(parsed.token, "tok-2");
        let delta = parsed.expiry - Utc::now().timestamp_millis();
        assert!(delta > 86_000_000, "default expiry applied, delta {delta}");
    }

    #[test]
    fn auth_callback_missing_token_is_none() {
        assert!(parse_auth_callback("https://ext.invalid/auth.html#expires_in=60").is_none());
        assert!(parse_auth_callback("not a url").is_none());
    }

    #[test]
    fn malformed_expires_in_falls_back_to_default() {
        let parsed = parse_auth_callback(
            "https://ext.invalid/auth.html#access_token=tok-3&expires_in=soon",
        )
        .unwrap();
        let delta = parsed.expiry - Utc::now().timestamp_millis();
        assert!(delta > 86_000_000);
    }

    #[test]
    fn duplicate_echo_is_recognized_in_both_forms() {
        let by_flag = SaveJobResponse {
            success: true,
            data: Some(serde_json::json!({"is_duplicate": true})),
            error: None,
        };
        assert!(by_flag.is_duplicate());

        let by_status = SaveJobResponse {
            success: true,
            data: Some(serde_json::json!({"status": "duplicate"})),
            error: None,
        };
        assert!(by_status.is_duplicate());

        let fresh = SaveJobResponse {
            success: true,
            data: Some(serde_json::json!({"status": "created"})),
            error: None,
        };
        assert!(!fresh.is_duplicate());
    }
}
