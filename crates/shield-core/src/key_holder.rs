//! Process-wide holder for the derived admin key.
//!
//! One `KeyHolder` is shared (via `Arc`) with every component that needs the
//! key while the server runs. `clear` is the single teardown path and must
//! run on shutdown, including abnormal termination, after in-flight sessions
//! have drained.

use parking_lot::RwLock;

use crate::kdf::AdminKey;

#[derive(Debug, Default)]
pub struct KeyHolder {
    key: RwLock<Option<AdminKey>>,
}

impl KeyHolder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a key, zeroizing any previously held key first.
    pub fn set(&self, key: AdminKey) {
        let mut guard = self.key.write();
        // The old AdminKey zeroizes on drop.
        *guard = Some(key);
    }

    pub fn get(&self) -> Option<AdminKey> {
        self.key.read().clone()
    }

    pub fn is_set(&self) -> bool {
        self.key.read().is_some()
    }

    /// Zeroize the held key bytes and drop the reference.
    pub fn clear(&self) {
        self.key.write().take();
    }
}
