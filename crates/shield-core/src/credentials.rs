//! Admin password lifecycle: initialization, verification, change.
//!
//! The admin password is never stored, not even hashed. It only exists as
//! the KDF input; whether it is correct is learned by attempting to decrypt
//! the store. Verification deliberately collapses every decrypt-path failure
//! into [`ShieldError::AdminAuth`] so a wrong password, a corrupted store and
//! a tampered store are indistinguishable to the caller.

use std::fs;

use tracing::info;
use zeroize::Zeroizing;

use crate::error::{Result, ShieldError};
use crate::kdf::{self, AdminKey, SALT_LEN};
use crate::session::SecureStore;

/// Create the salt and an empty encrypted store under a key derived from
/// `password`. Refuses to clobber an existing store unless `allow_overwrite`
/// is set; overwriting discards all stored data.
pub fn initialize(store: &SecureStore, password: &str, allow_overwrite: bool) -> Result<AdminKey> {
    let paths = store.paths();
    if paths.encrypted_store.exists() && !allow_overwrite {
        return Err(ShieldError::Initialization(format!(
            "encrypted store already exists at {}",
            paths.encrypted_store.display()
        )));
    }
    if paths.encrypted_store.exists() {
        // Re-init drops the old store; a writable session would otherwise
        // try to decrypt it under the new key.
        fs::remove_file(&paths.encrypted_store)?;
    }

    let salt = kdf::generate_salt();
    save_salt(store, &salt)?;
    let key = kdf::derive_key(password, &salt);

    let mut session = store.open_writable(&key)?;
    let schema_ready = session.connection().map(|_| ());
    let close_result = session.close();
    schema_ready?;
    close_result?;

    info!(store = %paths.encrypted_store.display(), "initialized encrypted store");
    Ok(key)
}

/// Derive the key for `password` and prove it by opening the store and
/// reading its schema catalogue. Any failure along the decrypt path maps to
/// [`ShieldError::AdminAuth`]; missing salt or store stays an
/// initialization error.
pub fn verify(store: &SecureStore, password: &str) -> Result<AdminKey> {
    let salt = load_salt(store)?;
    let key = kdf::derive_key(password, &salt);

    let outcome = structural_read(store, &key);
    match outcome {
        Ok(()) => Ok(key),
        Err(e @ ShieldError::Initialization(_)) => Err(e),
        Err(e @ ShieldError::SystemEnvironment(_)) => Err(e),
        Err(_) => Err(ShieldError::AdminAuth),
    }
}

fn structural_read(store: &SecureStore, key: &AdminKey) -> Result<()> {
    let mut session = store.open_read_only(key)?;
    let probe = session.connection().and_then(|conn| {
        conn.query_row("SELECT name FROM sqlite_master LIMIT 1", [], |_row| Ok(()))
            .map_err(ShieldError::from)
    });
    let close_result = session.close();
    probe?;
    close_result
}

/// Verify `current_password`, then re-encrypt the store under a key derived
/// from `new_password` with a fresh salt. Stored data is untouched. The salt
/// file is replaced only after the re-encrypted store is in place.
pub fn change_admin_password(
    store: &SecureStore,
    current_password: &str,
    new_password: &str,
) -> Result<AdminKey> {
    let current_key = verify(store, current_password)?;

    let salt = kdf::generate_salt();
    let new_key = kdf::derive_key(new_password, &salt);

    let mut session = store.open_writable_rekey(&current_key, new_key.clone())?;
    let opened = session.connection().map(|_| ());
    let close_result = session.close();
    opened?;
    close_result?;

    save_salt(store, &salt)?;
    info!("admin password changed");
    Ok(new_key)
}

fn save_salt(store: &SecureStore, salt: &[u8; SALT_LEN]) -> Result<()> {
    let path = &store.paths().salt_file;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("bin.tmp");
    fs::write(&tmp, salt)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn load_salt(store: &SecureStore) -> Result<[u8; SALT_LEN]> {
    let path = &store.paths().salt_file;
    if !path.exists() {
        return Err(ShieldError::Initialization(format!(
            "salt file not found at {}; run init first",
            path.display()
        )));
    }
    let bytes = Zeroizing::new(fs::read(path)?);
    let salt: [u8; SALT_LEN] = bytes.as_slice().try_into().map_err(|_| {
        ShieldError::Initialization(format!(
            "salt file {} has wrong length {} (expected {SALT_LEN})",
            path.display(),
            bytes.len()
        ))
    })?;
    Ok(salt)
}
