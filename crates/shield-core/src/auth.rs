//! Anti-replay authenticator: the PASS/FAIL decision and the blocked-window
//! recomputation.
//!
//! Every call runs inside one writable session, so all of its writes persist
//! atomically together or not at all, and the writable gate keeps the whole
//! five-step sequence on one consistent view.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Utc;
use rusqlite::{params, Connection};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::debug;

use crate::error::Result;
use crate::kdf::AdminKey;
use crate::session::SecureStore;
use crate::store;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Pass,
    Fail,
}

impl Decision {
    pub fn as_str(self) -> &'static str {
        match self {
            Decision::Pass => "PASS",
            Decision::Fail => "FAIL",
        }
    }
}

/// Stable digest for pool passwords: SHA-256, base64 text encoding.
pub fn hash_password(password: &str) -> String {
    let digest = Sha256::digest(password.as_bytes());
    BASE64.encode(digest)
}

/// Display hint: first and last character around a fixed mask. The mask
/// width is constant so the hint does not reveal the password length.
pub fn make_hint(password: &str) -> String {
    let mut chars = password.chars();
    match (chars.next(), password.chars().next_back()) {
        (Some(first), Some(last)) => format!("{first}*****{last}"),
        _ => "****".to_string(),
    }
}

#[derive(Debug, Clone)]
pub struct Authenticator {
    store: Arc<SecureStore>,
}

impl Authenticator {
    pub fn new(store: Arc<SecureStore>) -> Self {
        Self { store }
    }

    pub fn authenticate(&self, key: &AdminKey, username: &str, password: &str) -> Result<Decision> {
        self.authenticate_at(key, username, password, Utc::now().timestamp_millis())
    }

    /// Same as [`authenticate`](Self::authenticate) with an explicit clock,
    /// which deterministic tests rely on.
    pub fn authenticate_at(
        &self,
        key: &AdminKey,
        username: &str,
        password: &str,
        now: i64,
    ) -> Result<Decision> {
        let mut session = self.store.open_writable(key)?;
        let decision = session
            .connection()
            .and_then(|conn| decide(conn, username, password, now));
        let close_result = session.close();
        let decision = decision?;
        close_result?;
        debug!(username, outcome = decision.as_str(), "authentication");
        Ok(decision)
    }
}

fn decide(conn: &Connection, username: &str, password: &str, now: i64) -> Result<Decision> {
    // Unknown user: FAIL with no side effects, so the outcome is no oracle
    // for user existence.
    let Some(block_count) = store::block_count(conn, username)? else {
        return Ok(Decision::Fail);
    };

    // Absorb any pending administrative block_count change before matching.
    refresh_blocked_state(conn, username, block_count)?;

    let hash = hash_password(password);
    let Some(entry) = store::find_pool_entry(conn, username, &hash)? else {
        return Ok(Decision::Fail);
    };

    if entry.blocked {
        // A blocked password still counts as used for ranking, but its
        // hit_count stays untouched.
        store::touch_last_use(conn, entry.id, now)?;
        refresh_blocked_state(conn, username, block_count)?;
        return Ok(Decision::Fail);
    }

    store::insert_history(conn, username, &hash, &entry.pw_hint, now)?;
    store::record_hit(conn, entry.id, now)?;
    refresh_blocked_state(conn, username, block_count)?;
    Ok(Decision::Pass)
}

/// Recompute the blocked window from its definition: unblock everything,
/// then block exactly the `block_count` entries with the largest positive
/// `last_use`. Ties break by id descending (newest entry first). Entries
/// never used (`last_use = 0`) are never blocked. Idempotent.
pub fn refresh_blocked_state(conn: &Connection, username: &str, block_count: u32) -> Result<()> {
    conn.execute(
        "UPDATE password_pool SET blocked=0 WHERE username=?1",
        params![username],
    )?;
    if block_count == 0 {
        return Ok(());
    }
    conn.execute(
        "UPDATE password_pool SET blocked=1
         WHERE id IN (
             SELECT id FROM password_pool
             WHERE username=?1 AND last_use > 0
             ORDER BY last_use DESC, id DESC
             LIMIT ?2
         )",
        params![username, block_count],
    )?;
    Ok(())
}
