//! SQLite schema and row-level queries for the decrypted scratch store.
//!
//! `blocked` is a derived, cached column, never a source of truth. It is
//! recomputed from `last_use` by [`crate::auth::refresh_blocked_state`].

use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserConfig {
    pub username: String,
    pub block_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolEntry {
    pub id: i64,
    pub username: String,
    pub pw_hash: String,
    pub pw_hint: String,
    pub hit_count: i64,
    pub blocked: bool,
    pub last_use: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub id: i64,
    pub username: String,
    pub pw_hash: String,
    pub pw_hint: String,
    pub created_at: i64,
}

/// Open the scratch SQLite file. A fresh (empty) file gets the schema
/// created; an existing file gets it validated.
pub fn open(path: &Path) -> Result<Connection> {
    let fresh = !path.exists() || std::fs::metadata(path)?.len() == 0;
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    if fresh {
        init_schema(&conn)?;
    } else {
        ensure_schema(&conn)?;
    }
    Ok(conn)
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS user_config (
             username TEXT PRIMARY KEY,
             block_count INTEGER NOT NULL
         );

         CREATE TABLE IF NOT EXISTS password_pool (
             id INTEGER PRIMARY KEY AUTOINCREMENT,
             username TEXT NOT NULL,
             pw_hash TEXT NOT NULL,
             pw_hint TEXT NOT NULL,
             hit_count INTEGER NOT NULL DEFAULT 0,
             blocked INTEGER NOT NULL DEFAULT 0,
             last_use INTEGER NOT NULL DEFAULT 0,
             FOREIGN KEY(username) REFERENCES user_config(username)
         );

         CREATE TABLE IF NOT EXISTS password_history (
             id INTEGER PRIMARY KEY AUTOINCREMENT,
             username TEXT NOT NULL,
             pw_hash TEXT NOT NULL,
             pw_hint TEXT NOT NULL,
             created_at INTEGER NOT NULL,
             FOREIGN KEY(username) REFERENCES user_config(username)
         );",
    )?;
    Ok(())
}

fn ensure_schema(conn: &Connection) -> Result<()> {
    let present: Option<String> = conn
        .query_row(
            "SELECT name FROM sqlite_master WHERE type='table' AND name='user_config'",
            [],
            |row| row.get(0),
        )
        .optional()?;
    if present.is_none() {
        init_schema(conn)?;
    }
    Ok(())
}

pub fn user_exists(conn: &Connection, username: &str) -> Result<bool> {
    let row: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM user_config WHERE username=?1",
            params![username],
            |row| row.get(0),
        )
        .optional()?;
    Ok(row.is_some())
}

pub fn block_count(conn: &Connection, username: &str) -> Result<Option<u32>> {
    let count: Option<u32> = conn
        .query_row(
            "SELECT block_count FROM user_config WHERE username=?1",
            params![username],
            |row| row.get(0),
        )
        .optional()?;
    Ok(count)
}

pub fn insert_user(conn: &Connection, username: &str, block_count: u32) -> Result<()> {
    conn.execute(
        "INSERT INTO user_config(username, block_count) VALUES(?1, ?2)",
        params![username, block_count],
    )?;
    Ok(())
}

pub fn set_block_count(conn: &Connection, username: &str, block_count: u32) -> Result<()> {
    conn.execute(
        "UPDATE user_config SET block_count=?1 WHERE username=?2",
        params![block_count, username],
    )?;
    Ok(())
}

/// Delete a user with their pool and history. Returns false when the user
/// did not exist.
pub fn delete_user_cascade(conn: &Connection, username: &str) -> Result<bool> {
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "DELETE FROM password_pool WHERE username=?1",
        params![username],
    )?;
    tx.execute(
        "DELETE FROM password_history WHERE username=?1",
        params![username],
    )?;
    let deleted = tx.execute(
        "DELETE FROM user_config WHERE username=?1",
        params![username],
    )?;
    tx.commit()?;
    Ok(deleted > 0)
}

pub fn insert_pool_entry(
    conn: &Connection,
    username: &str,
    pw_hash: &str,
    pw_hint: &str,
) -> Result<()> {
    conn.execute(
        "INSERT INTO password_pool(username, pw_hash, pw_hint, hit_count, blocked)
         VALUES(?1, ?2, ?3, 0, 0)",
        params![username, pw_hash, pw_hint],
    )?;
    Ok(())
}

/// Returns the number of rows removed (0 or 1).
pub fn delete_pool_entry(conn: &Connection, username: &str, id: i64) -> Result<usize> {
    let deleted = conn.execute(
        "DELETE FROM password_pool WHERE id=?1 AND username=?2",
        params![id, username],
    )?;
    Ok(deleted)
}

pub fn pool_count(conn: &Connection, username: &str) -> Result<u32> {
    let count: u32 = conn.query_row(
        "SELECT COUNT(*) FROM password_pool WHERE username=?1",
        params![username],
        |row| row.get(0),
    )?;
    Ok(count)
}

pub fn pool_hashes(conn: &Connection, username: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT pw_hash FROM password_pool WHERE username=?1")?;
    let hashes = stmt
        .query_map(params![username], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(hashes)
}

pub fn find_pool_entry(
    conn: &Connection,
    username: &str,
    pw_hash: &str,
) -> Result<Option<PoolEntry>> {
    conn.query_row(
        "SELECT id, username, pw_hash, pw_hint, hit_count, blocked, last_use
         FROM password_pool WHERE username=?1 AND pw_hash=?2",
        params![username, pw_hash],
        row_to_pool_entry,
    )
    .optional()
    .map_err(Into::into)
}

pub fn pool_entries(conn: &Connection, username: &str) -> Result<Vec<PoolEntry>> {
    let mut stmt = conn.prepare(
        "SELECT id, username, pw_hash, pw_hint, hit_count, blocked, last_use
         FROM password_pool WHERE username=?1 ORDER BY id",
    )?;
    let entries = stmt
        .query_map(params![username], row_to_pool_entry)?
        .collect::<rusqlite::Result<Vec<PoolEntry>>>()?;
    Ok(entries)
}

/// A blocked match still "counts as used": only `last_use` moves.
pub fn touch_last_use(conn: &Connection, id: i64, now: i64) -> Result<()> {
    conn.execute(
        "UPDATE password_pool SET last_use=?1 WHERE id=?2",
        params![now, id],
    )?;
    Ok(())
}

pub fn record_hit(conn: &Connection, id: i64, now: i64) -> Result<()> {
    conn.execute(
        "UPDATE password_pool SET hit_count = hit_count + 1, last_use=?1 WHERE id=?2",
        params![now, id],
    )?;
    Ok(())
}

pub fn insert_history(
    conn: &Connection,
    username: &str,
    pw_hash: &str,
    pw_hint: &str,
    created_at: i64,
) -> Result<()> {
    conn.execute(
        "INSERT INTO password_history(username, pw_hash, pw_hint, created_at)
         VALUES(?1, ?2, ?3, ?4)",
        params![username, pw_hash, pw_hint, created_at],
    )?;
    Ok(())
}

pub fn history_entries(conn: &Connection, username: &str) -> Result<Vec<HistoryEntry>> {
    let mut stmt = conn.prepare(
        "SELECT id, username, pw_hash, pw_hint, created_at
         FROM password_history WHERE username=?1 ORDER BY id",
    )?;
    let entries = stmt
        .query_map(params![username], row_to_history_entry)?
        .collect::<rusqlite::Result<Vec<HistoryEntry>>>()?;
    Ok(entries)
}

pub fn all_users(conn: &Connection) -> Result<Vec<UserConfig>> {
    let mut stmt =
        conn.prepare("SELECT username, block_count FROM user_config ORDER BY username")?;
    let users = stmt
        .query_map([], |row| {
            Ok(UserConfig {
                username: row.get(0)?,
                block_count: row.get(1)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<UserConfig>>>()?;
    Ok(users)
}

pub fn all_pool_entries(conn: &Connection) -> Result<Vec<PoolEntry>> {
    let mut stmt = conn.prepare(
        "SELECT id, username, pw_hash, pw_hint, hit_count, blocked, last_use
         FROM password_pool ORDER BY username, id",
    )?;
    let entries = stmt
        .query_map([], row_to_pool_entry)?
        .collect::<rusqlite::Result<Vec<PoolEntry>>>()?;
    Ok(entries)
}

pub fn all_history_entries(conn: &Connection) -> Result<Vec<HistoryEntry>> {
    let mut stmt = conn.prepare(
        "SELECT id, username, pw_hash, pw_hint, created_at
         FROM password_history ORDER BY id",
    )?;
    let entries = stmt
        .query_map([], row_to_history_entry)?
        .collect::<rusqlite::Result<Vec<HistoryEntry>>>()?;
    Ok(entries)
}

fn row_to_pool_entry(row: &rusqlite::Row) -> rusqlite::Result<PoolEntry> {
    Ok(PoolEntry {
        id: row.get(0)?,
        username: row.get(1)?,
        pw_hash: row.get(2)?,
        pw_hint: row.get(3)?,
        hit_count: row.get(4)?,
        blocked: row.get::<_, i64>(5)? != 0,
        last_use: row.get(6)?,
    })
}

fn row_to_history_entry(row: &rusqlite::Row) -> rusqlite::Result<HistoryEntry> {
    Ok(HistoryEntry {
        id: row.get(0)?,
        username: row.get(1)?,
        pw_hash: row.get(2)?,
        pw_hint: row.get(3)?,
        created_at: row.get(4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> (tempfile::TempDir, Connection) {
        let dir = tempfile::tempdir().unwrap();
        let conn = open(&dir.path().join("scratch.db")).unwrap();
        (dir, conn)
    }

    #[test]
    fn schema_created_on_fresh_file() {
        let (_dir, conn) = temp_store();
        assert!(!user_exists(&conn, "alice").unwrap());
        insert_user(&conn, "alice", 2).unwrap();
        assert!(user_exists(&conn, "alice").unwrap());
        assert_eq!(block_count(&conn, "alice").unwrap(), Some(2));
    }

    #[test]
    fn reopen_validates_existing_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scratch.db");
        {
            let conn = open(&path).unwrap();
            insert_user(&conn, "bob", 1).unwrap();
        }
        let conn = open(&path).unwrap();
        assert!(user_exists(&conn, "bob").unwrap());
    }

    #[test]
    fn delete_user_cascades() {
        let (_dir, conn) = temp_store();
        insert_user(&conn, "alice", 1).unwrap();
        insert_pool_entry(&conn, "alice", "h1", "a*****1").unwrap();
        insert_history(&conn, "alice", "h1", "a*****1", 1_000).unwrap();
        assert!(delete_user_cascade(&conn, "alice").unwrap());
        assert_eq!(pool_count(&conn, "alice").unwrap(), 0);
        assert!(history_entries(&conn, "alice").unwrap().is_empty());
        assert!(!delete_user_cascade(&conn, "alice").unwrap());
    }

    #[test]
    fn pool_entry_lookup_and_updates() {
        let (_dir, conn) = temp_store();
        insert_user(&conn, "alice", 1).unwrap();
        insert_pool_entry(&conn, "alice", "h1", "a*****1").unwrap();
        let entry = find_pool_entry(&conn, "alice", "h1").unwrap().unwrap();
        assert_eq!(entry.hit_count, 0);
        assert_eq!(entry.last_use, 0);
        assert!(!entry.blocked);

        record_hit(&conn, entry.id, 42).unwrap();
        let entry = find_pool_entry(&conn, "alice", "h1").unwrap().unwrap();
        assert_eq!(entry.hit_count, 1);
        assert_eq!(entry.last_use, 42);

        touch_last_use(&conn, entry.id, 99).unwrap();
        let entry = find_pool_entry(&conn, "alice", "h1").unwrap().unwrap();
        assert_eq!(entry.hit_count, 1);
        assert_eq!(entry.last_use, 99);

        assert!(find_pool_entry(&conn, "alice", "nope").unwrap().is_none());
    }
}
