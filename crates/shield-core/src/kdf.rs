//! Admin key derivation: PBKDF2-HMAC-SHA256.

use pbkdf2::pbkdf2_hmac;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::KEY_LEN;

pub const PBKDF2_ITERATIONS: u32 = 200_000;
pub const SALT_LEN: usize = 32;

/// The derived 256-bit admin key. Never persisted raw; zeroized on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct AdminKey([u8; KEY_LEN]);

impl AdminKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for AdminKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AdminKey(..)")
    }
}

/// Stretch the admin password and salt into an [`AdminKey`].
pub fn derive_key(password: &str, salt: &[u8]) -> AdminKey {
    let mut out = [0u8; KEY_LEN];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, PBKDF2_ITERATIONS, &mut out);
    AdminKey(out)
}

/// Fresh random salt, generated once at init and on admin password change.
pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    salt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivation_is_deterministic() {
        let salt = [3u8; SALT_LEN];
        assert_eq!(derive_key("hunter2", &salt), derive_key("hunter2", &salt));
    }

    #[test]
    fn password_and_salt_both_matter() {
        let salt = [3u8; SALT_LEN];
        let other_salt = [4u8; SALT_LEN];
        let base = derive_key("hunter2", &salt);
        assert_ne!(base, derive_key("hunter3", &salt));
        assert_ne!(base, derive_key("hunter2", &other_salt));
    }

    #[test]
    fn fresh_salts_differ() {
        assert_ne!(generate_salt(), generate_salt());
    }
}
