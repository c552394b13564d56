use super::model::{ApplicationProfile, AuthSession};
use anyhow::{Context, Result};
use sqlx::SqlitePool;
use tracing::instrument;
use uuid::Uuid;

pub type Pool = SqlitePool;

/// Session-scoped keys (purged together on sign-out / 401).
pub const AUTH_TOKEN_KEY: &str = "auth_token";
pub const TOKEN_EXPIRY_KEY: &str = "token_expiry";

/// Device-local keys (survive sign-out).
pub const INSTALL_ID_KEY: &str = "install_id";
pub const APPLICATION_DATA_KEY: &str = "application_data";
pub const OPENAI_API_KEY_KEY: &str = "openai_api_key";

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized).await?;
    // Enable WAL and stricter durability.
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/` and ensure the
/// parent directory exists. Leaves in-memory URLs untouched.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") {
        return url.to_string();
    }
    if url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);

    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = if let Some(rest) = path_part.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            format!("{}/{}", home.trim_end_matches('/'), rest)
        } else {
            path_part.to_string()
        }
    } else {
        path_part.to_string()
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let mut rebuilt = String::from("sqlite://");
    rebuilt.push_str(&expanded_path);
    if let Some(q) = query_part {
        rebuilt.push('?');
        rebuilt.push_str(q);
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn session_get(pool: &Pool, key: &str) -> Result<Option<String>> {
    let value = sqlx::query_scalar::<_, String>("SELECT value FROM session_kv WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await?;
    Ok(value)
}

#[instrument(skip_all)]
pub async fn session_set(pool: &Pool, key: &str, value: &str) -> Result<()> {
    sqlx::query(
        "INSERT INTO session_kv (key, value, updated_at) VALUES (?, ?, datetime('now')) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
    )
    .bind(key)
    .bind(value)
    .execute(pool)
    .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn session_remove(pool: &Pool, key: &str) -> Result<()> {
    sqlx::query("DELETE FROM session_kv WHERE key = ?")
        .bind(key)
        .execute(pool)
        .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn device_get(pool: &Pool, key: &str) -> Result<Option<String>> {
    let value = sqlx::query_scalar::<_, String>("SELECT value FROM device_kv WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await?;
    Ok(value)
}

#[instrument(skip_all)]
pub async fn device_set(pool: &Pool, key: &str, value: &str) -> Result<()> {
    sqlx::query(
        "INSERT INTO device_kv (key, value, updated_at) VALUES (?, ?, datetime('now')) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
    )
    .bind(key)
    .bind(value)
    .execute(pool)
    .await?;
    Ok(())
}

/// Load the persisted auth session, if both halves are present and the expiry
/// parses. A malformed expiry is treated as no session.
#[instrument(skip_all)]
pub async fn load_auth_session(pool: &Pool) -> Result<Option<AuthSession>> {
    let token = session_get(pool, AUTH_TOKEN_KEY).await?;
    let expiry = session_get(pool, TOKEN_EXPIRY_KEY).await?;
    match (token, expiry) {
        (Some(token), Some(expiry)) => match expiry.parse::<i64>() {
            Ok(expires_at_epoch_ms) => Ok(Some(AuthSession {
                token,
                expires_at_epoch_ms,
            })),
            Err(_) => Ok(None),
        },
        _ => Ok(None),
    }
}

/// Write a session wholesale. Sessions are only ever replaced, never
/// refreshed in place.
#[instrument(skip_all)]
pub async fn save_auth_session(pool: &Pool, session: &AuthSession) -> Result<()> {
    session_set(pool, AUTH_TOKEN_KEY, &session.token).await?;
    session_set(
        pool,
        TOKEN_EXPIRY_KEY,
        &session.expires_at_epoch_ms.to_string(),
    )
    .await?;
    Ok(())
}

/// Remove both halves of the session. Idempotent.
#[instrument(skip_all)]
pub async fn purge_auth_session(pool: &Pool) -> Result<()> {
    session_remove(pool, AUTH_TOKEN_KEY).await?;
    session_remove(pool, TOKEN_EXPIRY_KEY).await?;
    Ok(())
}

/// Return the persisted per-install identity, minting one on first use. The
/// id makes the sign-in callback URL unique to this installation.
#[instrument(skip_all)]
pub async fn install_id(pool: &Pool) -> Result<String> {
    if let Some(id) = device_get(pool, INSTALL_ID_KEY).await? {
        return Ok(id);
    }
    let id = Uuid::new_v4().to_string();
    device_set(pool, INSTALL_ID_KEY, &id).await?;
    Ok(id)
}

#[instrument(skip_all)]
pub async fn load_application_profile(pool: &Pool) -> Result<Option<ApplicationProfile>> {
    let raw = device_get(pool, APPLICATION_DATA_KEY).await?;
    match raw {
        Some(raw) => {
            let profile =
                serde_json::from_str(&raw).context("malformed application profile JSON")?;
            Ok(Some(profile))
        }
        None => Ok(None),
    }
}

#[instrument(skip_all)]
pub async fn save_application_profile(pool: &Pool, profile: &ApplicationProfile) -> Result<()> {
    let raw = serde_json::to_string(profile)?;
    device_set(pool, APPLICATION_DATA_KEY, &raw).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_pool() -> Pool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        pool
    }

    #[test]
    fn sqlite_url_normalization() {
        assert_eq!(prepare_sqlite_url("sqlite::memory:"), "sqlite::memory:");
        assert_eq!(
            prepare_sqlite_url("postgres://host/db"),
            "postgres://host/db"
        );
        assert_eq!(
            prepare_sqlite_url("sqlite://relative/path.db?mode=rwc"),
            "sqlite://relative/path.db?mode=rwc"
        );
    }

    #[tokio::test]
    async fn session_kv_round_trip_and_remove() {
        let pool = setup_pool().await;
        assert_eq!(session_get(&pool, AUTH_TOKEN_KEY).await.unwrap(), None);

        session_set(&pool, AUTH_TOKEN_KEY, "tok-1").await.unwrap();
        session_set(&pool, AUTH_TOKEN_KEY, "tok-2").await.unwrap();
        assert_eq!(
            session_get(&pool, AUTH_TOKEN_KEY).await.unwrap().as_deref(),
            Some("tok-2")
        );

        session_remove(&pool, AUTH_TOKEN_KEY).await.unwrap();
        assert_eq!(session_get(&pool, AUTH_TOKEN_KEY).await.unwrap(), None);
        // Removing again is a no-op.
        session_remove(&pool, AUTH_TOKEN_KEY).await.unwrap();
    }

    #[tokio::test]
    async fn auth_session_round_trip() {
        let pool = setup_pool().await;
        assert!(load_auth_session(&pool).await.unwrap().is_none());

        let session = AuthSession {
            token: "bearer-token".into(),
            expires_at_epoch_ms: 1_700_000_000_000,
        };
        save_auth_session(&pool, &session).await.unwrap();
        assert_eq!(load_auth_session(&pool).await.unwrap(), Some(session));

        purge_auth_session(&pool).await.unwrap();
        assert!(load_auth_session(&pool).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn half_written_session_reads_as_absent() {
        let pool = setup_pool().await;
        session_set(&pool, AUTH_TOKEN_KEY, "orphan").await.unwrap();
        assert!(load_auth_session(&pool).await.unwrap().is_none());

        session_set(&pool, TOKEN_EXPIRY_KEY, "not-a-number")
            .await
            .unwrap();
        assert!(load_auth_session(&pool).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn install_id_is_stable() {
        let pool = setup_pool().await;
        let first = install_id(&pool).await.unwrap();
        let second = install_id(&pool).await.unwrap();
        assert_eq!(first, second);
        assert!(!first.is_empty());
    }

    #[tokio::test]
    async fn purge_does_not_touch_device_storage() {
        let pool = setup_pool().await;
        let profile = ApplicationProfile {
            first_name: Some("Ada".into()),
            ..Default::default()
        };
        save_application_profile(&pool, &profile).await.unwrap();
        save_auth_session(
            &pool,
            &AuthSession {
                token: "t".into(),
                expires_at_epoch_ms: 1,
            },
        )
        .await
        .unwrap();

        purge_auth_session(&pool).await.unwrap();
        assert_eq!(
            load_application_profile(&pool).await.unwrap(),
            Some(profile)
        );
    }
}
