//! Administrative store operations: user lifecycle, pool maintenance,
//! block-count tuning, and a full dump for inspection.
//!
//! Every operation opens one session, runs, and closes it, so management
//! writes persist immediately. Validation failures surface as
//! [`ShieldError::Configuration`] before anything is written.

use tracing::info;

use crate::auth::{self, hash_password, make_hint};
use crate::error::{Result, ShieldError};
use crate::kdf::AdminKey;
use crate::session::{SecureStore, Session};
use crate::store::{self, HistoryEntry, PoolEntry, UserConfig};

/// A pool smaller than this gives too little room to rotate through.
pub const MIN_POOL_SIZE: u32 = 3;

/// Snapshot of every table, for the manage console's dump view.
#[derive(Debug, Clone)]
pub struct StoreDump {
    pub users: Vec<UserConfig>,
    pub pool: Vec<PoolEntry>,
    pub history: Vec<HistoryEntry>,
}

pub fn user_exists(store: &SecureStore, key: &AdminKey, username: &str) -> Result<bool> {
    read_session(store, key, |session| {
        store::user_exists(session.connection()?, username)
    })
}

pub fn list_users(store: &SecureStore, key: &AdminKey) -> Result<Vec<UserConfig>> {
    read_session(store, key, |session| {
        store::all_users(session.connection()?)
    })
}

pub fn list_pool(store: &SecureStore, key: &AdminKey, username: &str) -> Result<Vec<PoolEntry>> {
    read_session(store, key, |session| {
        let conn = session.connection()?;
        require_user(conn, username)?;
        store::pool_entries(conn, username)
    })
}

pub fn list_history(
    store: &SecureStore,
    key: &AdminKey,
    username: &str,
) -> Result<Vec<HistoryEntry>> {
    read_session(store, key, |session| {
        let conn = session.connection()?;
        require_user(conn, username)?;
        store::history_entries(conn, username)
    })
}

pub fn dump(store: &SecureStore, key: &AdminKey) -> Result<StoreDump> {
    read_session(store, key, |session| {
        let conn = session.connection()?;
        Ok(StoreDump {
            users: store::all_users(conn)?,
            pool: store::all_pool_entries(conn)?,
            history: store::all_history_entries(conn)?,
        })
    })
}

/// Create a user with their initial password pool. The pool needs at least
/// [`MIN_POOL_SIZE`] distinct passwords and `block_count` must leave at
/// least one entry unblocked.
pub fn create_user(
    store: &SecureStore,
    key: &AdminKey,
    username: &str,
    block_count: u32,
    passwords: &[&str],
) -> Result<()> {
    if username.trim().is_empty() {
        return Err(ShieldError::Configuration("username must not be empty".into()));
    }
    let pool_size = passwords.len() as u32;
    if pool_size < MIN_POOL_SIZE {
        return Err(ShieldError::Configuration(format!(
            "password pool needs at least {MIN_POOL_SIZE} entries, got {pool_size}"
        )));
    }
    check_block_count(block_count, pool_size)?;
    let hashes: Vec<String> = passwords.iter().map(|pw| hash_password(pw)).collect();
    for (i, hash) in hashes.iter().enumerate() {
        if hashes[..i].contains(hash) {
            return Err(ShieldError::Configuration(
                "password pool contains duplicate passwords".into(),
            ));
        }
    }

    write_session(store, key, |session| {
        let conn = session.connection()?;
        if store::user_exists(conn, username)? {
            return Err(ShieldError::Configuration(format!(
                "user '{username}' already exists"
            )));
        }
        store::insert_user(conn, username, block_count)?;
        for (password, hash) in passwords.iter().zip(&hashes) {
            store::insert_pool_entry(conn, username, hash, &make_hint(password))?;
        }
        Ok(())
    })?;
    info!(username, block_count, pool_size, "created user");
    Ok(())
}

/// Remove a user with their pool and history. Returns false when no such
/// user existed.
pub fn delete_user(store: &SecureStore, key: &AdminKey, username: &str) -> Result<bool> {
    let deleted = write_session(store, key, |session| {
        store::delete_user_cascade(session.connection()?, username)
    })?;
    if deleted {
        info!(username, "deleted user");
    }
    Ok(deleted)
}

/// Add one password to an existing user's pool. Rejects a password already
/// present in the pool.
pub fn add_password(
    store: &SecureStore,
    key: &AdminKey,
    username: &str,
    password: &str,
) -> Result<()> {
    let hash = hash_password(password);
    write_session(store, key, |session| {
        let conn = session.connection()?;
        require_user(conn, username)?;
        if store::pool_hashes(conn, username)?.contains(&hash) {
            return Err(ShieldError::Configuration(
                "password is already in the pool".into(),
            ));
        }
        store::insert_pool_entry(conn, username, &hash, &make_hint(password))
    })?;
    info!(username, "added pool password");
    Ok(())
}

/// Remove one pool entry by id. The pool may not shrink below
/// [`MIN_POOL_SIZE`]; if the removal leaves `block_count` with no unblocked
/// entry, `block_count` is clamped down and the blocked window recomputed.
pub fn remove_password(store: &SecureStore, key: &AdminKey, username: &str, id: i64) -> Result<()> {
    write_session(store, key, |session| {
        let conn = session.connection()?;
        let block_count = require_user(conn, username)?;
        let pool_size = store::pool_count(conn, username)?;
        if pool_size <= MIN_POOL_SIZE {
            return Err(ShieldError::Configuration(format!(
                "pool is at the minimum size of {MIN_POOL_SIZE}; add a password first"
            )));
        }
        if store::delete_pool_entry(conn, username, id)? == 0 {
            return Err(ShieldError::Configuration(format!(
                "no pool entry {id} for user '{username}'"
            )));
        }
        let new_size = pool_size - 1;
        let effective = if block_count >= new_size {
            let clamped = new_size - 1;
            store::set_block_count(conn, username, clamped)?;
            clamped
        } else {
            block_count
        };
        auth::refresh_blocked_state(conn, username, effective)
    })?;
    info!(username, id, "removed pool password");
    Ok(())
}

/// Change how many recently used passwords stay blocked. Must leave at
/// least one entry usable; the window is recomputed immediately.
pub fn set_block_count(
    store: &SecureStore,
    key: &AdminKey,
    username: &str,
    block_count: u32,
) -> Result<()> {
    write_session(store, key, |session| {
        let conn = session.connection()?;
        require_user(conn, username)?;
        let pool_size = store::pool_count(conn, username)?;
        check_block_count(block_count, pool_size)?;
        store::set_block_count(conn, username, block_count)?;
        auth::refresh_blocked_state(conn, username, block_count)
    })?;
    info!(username, block_count, "updated block count");
    Ok(())
}

fn check_block_count(block_count: u32, pool_size: u32) -> Result<()> {
    if block_count >= pool_size {
        return Err(ShieldError::Configuration(format!(
            "block count {block_count} must be smaller than the pool size {pool_size}"
        )));
    }
    Ok(())
}

fn require_user(conn: &rusqlite::Connection, username: &str) -> Result<u32> {
    store::block_count(conn, username)?.ok_or_else(|| {
        ShieldError::Configuration(format!("no such user '{username}'"))
    })
}

fn read_session<T>(
    store: &SecureStore,
    key: &AdminKey,
    body: impl FnOnce(&Session) -> Result<T>,
) -> Result<T> {
    let mut session = store.open_read_only(key)?;
    let out = body(&session);
    let close_result = session.close();
    let out = out?;
    close_result?;
    Ok(out)
}

fn write_session<T>(
    store: &SecureStore,
    key: &AdminKey,
    body: impl FnOnce(&Session) -> Result<T>,
) -> Result<T> {
    let mut session = store.open_writable(key)?;
    let out = body(&session);
    let close_result = session.close();
    let out = out?;
    close_result?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KEY_LEN;
    use crate::paths::StorePaths;

    fn setup() -> (tempfile::TempDir, SecureStore, AdminKey) {
        let dir = tempfile::tempdir().unwrap();
        let store = SecureStore::new(StorePaths::under(dir.path()));
        let key = AdminKey::from_bytes([7u8; KEY_LEN]);
        // First writable session creates the empty store.
        let mut session = store.open_writable(&key).unwrap();
        session.close().unwrap();
        drop(session);
        (dir, store, key)
    }

    #[test]
    fn create_user_validations() {
        let (_dir, store, key) = setup();
        assert!(matches!(
            create_user(&store, &key, "", 1, &["p1", "p2", "p3"]).unwrap_err(),
            ShieldError::Configuration(_)
        ));
        assert!(matches!(
            create_user(&store, &key, "alice", 1, &["p1", "p2"]).unwrap_err(),
            ShieldError::Configuration(_)
        ));
        assert!(matches!(
            create_user(&store, &key, "alice", 3, &["p1", "p2", "p3"]).unwrap_err(),
            ShieldError::Configuration(_)
        ));
        assert!(matches!(
            create_user(&store, &key, "alice", 1, &["p1", "p1", "p3"]).unwrap_err(),
            ShieldError::Configuration(_)
        ));
        create_user(&store, &key, "alice", 2, &["p1", "p2", "p3"]).unwrap();
        assert!(matches!(
            create_user(&store, &key, "alice", 1, &["q1", "q2", "q3"]).unwrap_err(),
            ShieldError::Configuration(_)
        ));
        assert!(user_exists(&store, &key, "alice").unwrap());
        assert_eq!(list_pool(&store, &key, "alice").unwrap().len(), 3);
    }

    #[test]
    fn delete_user_reports_absence() {
        let (_dir, store, key) = setup();
        create_user(&store, &key, "alice", 1, &["p1", "p2", "p3"]).unwrap();
        assert!(delete_user(&store, &key, "alice").unwrap());
        assert!(!delete_user(&store, &key, "alice").unwrap());
        assert!(!user_exists(&store, &key, "alice").unwrap());
    }

    #[test]
    fn add_password_rejects_duplicates() {
        let (_dir, store, key) = setup();
        create_user(&store, &key, "alice", 1, &["p1", "p2", "p3"]).unwrap();
        add_password(&store, &key, "alice", "p4").unwrap();
        assert_eq!(list_pool(&store, &key, "alice").unwrap().len(), 4);
        assert!(matches!(
            add_password(&store, &key, "alice", "p4").unwrap_err(),
            ShieldError::Configuration(_)
        ));
        assert!(matches!(
            add_password(&store, &key, "ghost", "p1").unwrap_err(),
            ShieldError::Configuration(_)
        ));
    }

    #[test]
    fn remove_password_enforces_minimum_pool() {
        let (_dir, store, key) = setup();
        create_user(&store, &key, "alice", 1, &["p1", "p2", "p3"]).unwrap();
        let pool = list_pool(&store, &key, "alice").unwrap();
        assert!(matches!(
            remove_password(&store, &key, "alice", pool[0].id).unwrap_err(),
            ShieldError::Configuration(_)
        ));
        add_password(&store, &key, "alice", "p4").unwrap();
        remove_password(&store, &key, "alice", pool[0].id).unwrap();
        assert_eq!(list_pool(&store, &key, "alice").unwrap().len(), 3);
        assert!(matches!(
            remove_password(&store, &key, "alice", 9999).unwrap_err(),
            ShieldError::Configuration(_)
        ));
    }

    #[test]
    fn remove_password_clamps_block_count() {
        let (_dir, store, key) = setup();
        create_user(&store, &key, "alice", 3, &["p1", "p2", "p3", "p4"]).unwrap();
        let pool = list_pool(&store, &key, "alice").unwrap();
        remove_password(&store, &key, "alice", pool[0].id).unwrap();
        let users = list_users(&store, &key).unwrap();
        assert_eq!(users[0].block_count, 2);
    }

    #[test]
    fn set_block_count_recomputes_window() {
        let (_dir, store, key) = setup();
        create_user(&store, &key, "alice", 2, &["p1", "p2", "p3"]).unwrap();
        // Simulate three uses so the window is saturated.
        {
            let mut session = store.open_writable(&key).unwrap();
            let conn = session.connection().unwrap();
            for (i, entry) in store::pool_entries(conn, "alice").unwrap().iter().enumerate() {
                store::touch_last_use(conn, entry.id, 100 * (i as i64 + 1)).unwrap();
            }
            auth::refresh_blocked_state(conn, "alice", 2).unwrap();
            session.close().unwrap();
        }
        let blocked = |pool: &[PoolEntry]| pool.iter().filter(|e| e.blocked).count();
        assert_eq!(blocked(&list_pool(&store, &key, "alice").unwrap()), 2);

        set_block_count(&store, &key, "alice", 1).unwrap();
        assert_eq!(blocked(&list_pool(&store, &key, "alice").unwrap()), 1);

        assert!(matches!(
            set_block_count(&store, &key, "alice", 3).unwrap_err(),
            ShieldError::Configuration(_)
        ));
    }

    #[test]
    fn dump_covers_all_tables() {
        let (_dir, store, key) = setup();
        create_user(&store, &key, "alice", 1, &["p1", "p2", "p3"]).unwrap();
        create_user(&store, &key, "bob", 2, &["q1", "q2", "q3"]).unwrap();
        let dump = dump(&store, &key).unwrap();
        assert_eq!(dump.users.len(), 2);
        assert_eq!(dump.pool.len(), 6);
        assert!(dump.history.is_empty());
    }
}
