//! Path resolution for the salt file, the encrypted store, and the
//! memory-backed scratch directory.
//!
//! The scratch directory must live on a RAM-backed filesystem; the service
//! binary verifies that before this core runs. Here we only need "create a
//! uniquely named file there".

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Result, ShieldError};

pub const SYSTEM_SALT_FILE: &str = "/etc/replayshield/salt.bin";
pub const SYSTEM_ENCRYPTED_STORE: &str = "/var/lib/replayshield/store.enc";
pub const SYSTEM_SCRATCH_DIR: &str = "/dev/shm/replayshield";

#[derive(Debug, Clone)]
pub struct StorePaths {
    pub salt_file: PathBuf,
    pub encrypted_store: PathBuf,
    pub scratch_dir: PathBuf,
}

impl StorePaths {
    /// The fixed system layout used by a deployed service.
    pub fn system() -> Self {
        Self {
            salt_file: PathBuf::from(SYSTEM_SALT_FILE),
            encrypted_store: PathBuf::from(SYSTEM_ENCRYPTED_STORE),
            scratch_dir: PathBuf::from(SYSTEM_SCRATCH_DIR),
        }
    }

    /// Everything rooted under one directory. Used by tests and the
    /// `--root` override.
    pub fn under(root: &Path) -> Self {
        Self {
            salt_file: root.join("salt.bin"),
            encrypted_store: root.join("store.enc"),
            scratch_dir: root.join("scratch"),
        }
    }

    /// One-shot cache for the derived admin key, consumed by a headless
    /// `serve`. Lives in the scratch dir so it never survives a reboot.
    pub fn cached_key_file(&self) -> PathBuf {
        self.scratch_dir.join("admin.key")
    }

    /// Allocate a uniquely named scratch file for one session. Owner-only
    /// permissions; the caller deletes it when the session ends.
    pub fn create_scratch_file(&self) -> Result<PathBuf> {
        fs::create_dir_all(&self.scratch_dir).map_err(|e| {
            ShieldError::SystemEnvironment(format!(
                "cannot create scratch dir {}: {e}",
                self.scratch_dir.display()
            ))
        })?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.scratch_dir, fs::Permissions::from_mode(0o700))?;
        }
        let (_file, path) = tempfile::Builder::new()
            .prefix("replayshield")
            .suffix(".db")
            .tempfile_in(&self.scratch_dir)
            .map_err(|e| {
                ShieldError::SystemEnvironment(format!("cannot create scratch file: {e}"))
            })?
            .keep()
            .map_err(|e| {
                ShieldError::SystemEnvironment(format!("cannot keep scratch file: {e}"))
            })?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scratch_files_are_unique() {
        let dir = tempfile::tempdir().unwrap();
        let paths = StorePaths::under(dir.path());
        let a = paths.create_scratch_file().unwrap();
        let b = paths.create_scratch_file().unwrap();
        assert_ne!(a, b);
        assert!(a.exists());
        assert!(b.exists());
    }

    #[cfg(unix)]
    #[test]
    fn scratch_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let paths = StorePaths::under(dir.path());
        let file = paths.create_scratch_file().unwrap();
        let mode = fs::metadata(&file).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }
}
