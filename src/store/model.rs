use chrono::Utc;
use serde::{Deserialize, Serialize};

/// A persisted authentication session. Owned exclusively by the coordinator;
/// other components only see it through coordinator-mediated messages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthSession {
    pub token: String,
    pub expires_at_epoch_ms: i64,
}

impl AuthSession {
    /// Expiry must be checked against the wall clock before every use; an
    /// expired session is treated as absent and purged by the caller.
    pub fn is_expired(&self, now_epoch_ms: i64) -> bool {
        now_epoch_ms > self.expires_at_epoch_ms
    }

    pub fn is_expired_now(&self) -> bool {
        self.is_expired(Utc::now().timestamp_millis())
    }
}

/// Device-local applicant profile used by the Form Autofiller. Never sent to
/// the job-capture backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ApplicationProfile {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
    pub country: Option<String>,
    pub current_title: Option<String>,
    pub linkedin_url: Option<String>,
    pub portfolio_url: Option<String>,
    pub work_auth_us: Option<String>,
    pub requires_sponsorship: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_is_strictly_after_deadline() {
        let session = AuthSession {
            token: "t".into(),
            expires_at_epoch_ms: 1_000,
        };
        assert!(!session.is_expired(999));
        assert!(!session.is_expired(1_000));
        assert!(session.is_expired(1_001));
    }

    #[test]
    fn profile_round_trips_with_missing_fields() {
        let profile: ApplicationProfile =
            serde_json::from_str(r#"{"first_name":"Ada","email":"ada@example.com"}"#).unwrap();
        assert_eq!(profile.first_name.as_deref(), Some("Ada"));
        assert!(profile.phone.is_none());
    }
}
