//! HTTP authentication endpoint.
//!
//! One route: `POST /auth` with form fields `username` and `password`. The
//! response body is always `PASS` or `FAIL` with status 200: malformed
//! requests, a missing key and internal failures all collapse into `FAIL`
//! so the endpoint leaks nothing about why an attempt was rejected.
//!
//! This is a local service; the listener stays on loopback unless the
//! operator explicitly binds elsewhere.

use anyhow::{anyhow, Result};
use axum::extract::{Form, State};
use axum::routing::post;
use axum::Router;
use serde::Deserialize;
use shield_core::paths::StorePaths;
use shield_core::{AdminKey, Authenticator, KeyHolder, SecureStore};
use std::fs;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};
use zeroize::Zeroizing;

const KEY_LEN: usize = 32;

#[derive(Clone)]
struct AppState {
    auth: Authenticator,
    holder: Arc<KeyHolder>,
}

#[derive(Debug, Deserialize)]
struct AuthRequest {
    username: Option<String>,
    password: Option<String>,
}

pub async fn serve(
    bind: IpAddr,
    port: u16,
    store: Arc<SecureStore>,
    holder: Arc<KeyHolder>,
) -> Result<()> {
    let state = AppState {
        auth: Authenticator::new(store),
        holder: holder.clone(),
    };
    let app = Router::new()
        .route("/auth", post(auth_handler))
        .with_state(state);

    let listener = TcpListener::bind((bind, port)).await?;
    info!("listening on {bind}:{port}");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            if let Err(e) = signal::ctrl_c().await {
                warn!("shutdown signal listener failed: {e}");
            }
            info!("shutting down");
        })
        .await?;

    // In-flight requests have drained; drop the key material.
    holder.clear();
    info!("admin key cleared");
    Ok(())
}

async fn auth_handler(State(state): State<AppState>, Form(req): Form<AuthRequest>) -> &'static str {
    let (Some(username), Some(password)) = (req.username, req.password) else {
        return "FAIL";
    };
    if username.is_empty() || password.is_empty() {
        return "FAIL";
    }
    let Some(key) = state.holder.get() else {
        warn!("authentication request while no admin key is loaded");
        return "FAIL";
    };

    let auth = state.auth.clone();
    let outcome =
        tokio::task::spawn_blocking(move || auth.authenticate(&key, &username, &password)).await;
    match outcome {
        Ok(Ok(decision)) => decision.as_str(),
        Ok(Err(e)) => {
            warn!("authentication error: {e}");
            "FAIL"
        }
        Err(e) => {
            warn!("authentication task failed: {e}");
            "FAIL"
        }
    }
}

/// Write the derived admin key to the one-shot cache consumed by the next
/// `serve`. Lives in the scratch directory, owner-only.
pub fn cache_key(paths: &StorePaths, key: &AdminKey) -> Result<PathBuf> {
    let path = paths.cached_key_file();
    fs::create_dir_all(&paths.scratch_dir)?;
    fs::write(&path, key.as_bytes())?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o600))?;
    }
    Ok(path)
}

/// Take the cached admin key if one is present. The file is deleted before
/// the bytes are inspected, so the cache is single-use even on error.
pub fn consume_cached_key(paths: &StorePaths) -> Result<Option<AdminKey>> {
    let path = paths.cached_key_file();
    if !path.exists() {
        return Ok(None);
    }
    let bytes = Zeroizing::new(fs::read(&path)?);
    fs::remove_file(&path)?;
    let raw: [u8; KEY_LEN] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| anyhow!("cached key at {} has wrong length", path.display()))?;
    Ok(Some(AdminKey::from_bytes(raw)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use shield_core::{admin, credentials};

    fn state_with_user() -> (tempfile::TempDir, AppState, AdminKey) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SecureStore::new(StorePaths::under(dir.path())));
        let key = credentials::initialize(&store, "admin-secret", false).unwrap();
        admin::create_user(&store, &key, "alice", 1, &["p1", "p2", "p3"]).unwrap();
        let holder = Arc::new(KeyHolder::new());
        holder.set(key.clone());
        let state = AppState {
            auth: Authenticator::new(store),
            holder,
        };
        (dir, state, key)
    }

    fn request(username: Option<&str>, password: Option<&str>) -> Form<AuthRequest> {
        Form(AuthRequest {
            username: username.map(String::from),
            password: password.map(String::from),
        })
    }

    #[tokio::test]
    async fn pass_then_blocked_fail() {
        let (_dir, state, _key) = state_with_user();
        let body = auth_handler(State(state.clone()), request(Some("alice"), Some("p1"))).await;
        assert_eq!(body, "PASS");
        let body = auth_handler(State(state), request(Some("alice"), Some("p1"))).await;
        assert_eq!(body, "FAIL");
    }

    #[tokio::test]
    async fn malformed_requests_fail() {
        let (_dir, state, _key) = state_with_user();
        assert_eq!(
            auth_handler(State(state.clone()), request(None, Some("p1"))).await,
            "FAIL"
        );
        assert_eq!(
            auth_handler(State(state.clone()), request(Some("alice"), None)).await,
            "FAIL"
        );
        assert_eq!(
            auth_handler(State(state), request(Some(""), Some("p1"))).await,
            "FAIL"
        );
    }

    #[tokio::test]
    async fn cleared_key_fails_closed() {
        let (_dir, state, _key) = state_with_user();
        state.holder.clear();
        assert_eq!(
            auth_handler(State(state), request(Some("alice"), Some("p1"))).await,
            "FAIL"
        );
    }

    #[test]
    fn key_cache_is_single_use() {
        let dir = tempfile::tempdir().unwrap();
        let paths = StorePaths::under(dir.path());
        fs::create_dir_all(&paths.scratch_dir).unwrap();
        assert!(consume_cached_key(&paths).unwrap().is_none());

        let key = AdminKey::from_bytes([3u8; KEY_LEN]);
        let path = cache_key(&paths, &key).unwrap();
        assert!(path.exists());

        let loaded = consume_cached_key(&paths).unwrap().unwrap();
        assert_eq!(loaded, key);
        assert!(!path.exists());
        assert!(consume_cached_key(&paths).unwrap().is_none());
    }

    #[test]
    fn truncated_cached_key_is_rejected_and_removed() {
        let dir = tempfile::tempdir().unwrap();
        let paths = StorePaths::under(dir.path());
        fs::create_dir_all(&paths.scratch_dir).unwrap();
        fs::write(paths.cached_key_file(), [1u8; 5]).unwrap();
        assert!(consume_cached_key(&paths).is_err());
        assert!(!paths.cached_key_file().exists());
    }
}
