//! Ephemeral secure session: decrypt the store into memory-backed scratch,
//! operate on it, re-encrypt on close, always scrub the scratch file.
//!
//! Because every session round-trips the entire store through
//! decrypt → operate → encrypt, two concurrently open writable sessions
//! would lose updates: the second decrypts a stale snapshot and its close
//! overwrites the first session's writes. [`SecureStore`] therefore owns a
//! process-wide gate that serializes writable sessions for their whole
//! lifetime. Read-only sessions run concurrently and may observe a snapshot
//! stale relative to an in-flight writer.

use parking_lot::{Mutex, MutexGuard};
use rusqlite::Connection;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;
use zeroize::Zeroizing;

use crate::crypto;
use crate::error::{attach, Result, ShieldError};
use crate::kdf::AdminKey;
use crate::paths::StorePaths;
use crate::store;

/// Owns the at-rest file locations and the writable-session gate.
#[derive(Debug)]
pub struct SecureStore {
    paths: StorePaths,
    write_gate: Mutex<()>,
}

impl SecureStore {
    pub fn new(paths: StorePaths) -> Self {
        Self {
            paths,
            write_gate: Mutex::new(()),
        }
    }

    pub fn paths(&self) -> &StorePaths {
        &self.paths
    }

    /// Open a read-only session. Requires an existing encrypted store.
    pub fn open_read_only(&self, key: &AdminKey) -> Result<Session<'_>> {
        if !self.paths.encrypted_store.exists() {
            return Err(ShieldError::Initialization(
                "encrypted store not found; run init first".into(),
            ));
        }
        self.open_session(key.clone(), key.clone(), false, None)
    }

    /// Open a writable session. Tolerates a missing encrypted store (first
    /// creation); the session re-encrypts and atomically replaces the store
    /// on close. Blocks until any in-flight writable session has closed.
    pub fn open_writable(&self, key: &AdminKey) -> Result<Session<'_>> {
        let gate = self.write_gate.lock();
        self.open_session(key.clone(), key.clone(), true, Some(gate))
    }

    /// Writable session that decrypts under `current_key` but persists under
    /// `new_key`. This is the admin password change path.
    pub fn open_writable_rekey(
        &self,
        current_key: &AdminKey,
        new_key: AdminKey,
    ) -> Result<Session<'_>> {
        let gate = self.write_gate.lock();
        self.open_session(current_key.clone(), new_key, true, Some(gate))
    }

    fn open_session<'a>(
        &'a self,
        decrypt_key: AdminKey,
        persist_key: AdminKey,
        writable: bool,
        gate: Option<MutexGuard<'a, ()>>,
    ) -> Result<Session<'a>> {
        let scratch = self.paths.create_scratch_file()?;
        match self.materialize(&decrypt_key, &scratch) {
            Ok(conn) => Ok(Session {
                persist_key,
                enc_path: self.paths.encrypted_store.clone(),
                scratch,
                conn: Some(conn),
                writable,
                closed: false,
                _gate: gate,
            }),
            Err(e) => {
                // A failed open never leaves partial scratch plaintext behind.
                delete_quietly(&scratch);
                Err(e)
            }
        }
    }

    fn materialize(&self, key: &AdminKey, scratch: &Path) -> Result<Connection> {
        if self.paths.encrypted_store.exists() {
            crypto::decrypt_file(key.as_bytes(), &self.paths.encrypted_store, scratch)?;
        }
        store::open(scratch)
    }
}

/// One open session. Operations are rejected after `close`; dropping an
/// unclosed session closes it best-effort so scratch plaintext never
/// outlives the session.
#[derive(Debug)]
pub struct Session<'a> {
    persist_key: AdminKey,
    enc_path: PathBuf,
    scratch: PathBuf,
    conn: Option<Connection>,
    writable: bool,
    closed: bool,
    _gate: Option<MutexGuard<'a, ()>>,
}

impl Session<'_> {
    pub fn connection(&self) -> Result<&Connection> {
        if self.closed {
            return Err(ShieldError::UseAfterClose);
        }
        self.conn.as_ref().ok_or(ShieldError::UseAfterClose)
    }

    pub fn scratch_path(&self) -> &Path {
        &self.scratch
    }

    /// Close the session: (a) close the store handle, (b) if writable,
    /// re-encrypt the scratch bytes and atomically replace the encrypted
    /// store, (c) delete the scratch file. All three run regardless of
    /// earlier failures; failures aggregate into one error. A second call
    /// is a no-op.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let mut failure: Option<ShieldError> = None;

        if let Some(conn) = self.conn.take() {
            if let Err((_conn, e)) = conn.close() {
                attach(
                    &mut failure,
                    ShieldError::Store(format!("failed to close store handle: {e}")),
                );
            }
        }

        if self.writable {
            if let Err(e) = self.persist() {
                attach(&mut failure, e);
            }
        }

        if let Err(e) = fs::remove_file(&self.scratch) {
            if e.kind() != std::io::ErrorKind::NotFound {
                attach(
                    &mut failure,
                    ShieldError::SystemEnvironment(format!(
                        "failed to delete scratch file {}: {e}",
                        self.scratch.display()
                    )),
                );
            }
        }

        match failure {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }

    fn persist(&self) -> Result<()> {
        let plain = Zeroizing::new(fs::read(&self.scratch)?);
        let blob = crypto::encrypt(self.persist_key.as_bytes(), &plain)?;
        if let Some(parent) = self.enc_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.enc_path.with_extension("enc.tmp");
        fs::write(&tmp, &blob)?;
        fs::rename(&tmp, &self.enc_path)?;
        Ok(())
    }
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.close() {
                warn!("secure session close during drop failed: {e}");
            }
        }
    }
}

fn delete_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("failed to delete scratch file {}: {e}", path.display());
        }
    }
}
