//! Envelope cipher: AES-256-GCM over opaque byte blobs.
//!
//! Blob format: `[ nonce (12 bytes) | ciphertext + tag (16 bytes) ]`
//! A fresh random nonce is drawn for every encryption; the nonce is never
//! reused. A wrong key and corrupted data are indistinguishable on decrypt:
//! both surface as the same `Crypto` error, which the credential lifecycle
//! exploits as its password-correctness oracle.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use std::fs;
use std::path::Path;
use zeroize::Zeroizing;

use crate::error::{Result, ShieldError};

pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;
pub const KEY_LEN: usize = 32;

/// Encrypt `plaintext`, prepending the fresh random nonce.
pub fn encrypt(key: &[u8; KEY_LEN], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| ShieldError::Crypto("encryption failed".into()))?;
    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt a `nonce ‖ ciphertext ‖ tag` blob. The returned plaintext is
/// zeroized on drop.
pub fn decrypt(key: &[u8; KEY_LEN], blob: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    if blob.len() < NONCE_LEN + TAG_LEN {
        return Err(ShieldError::Crypto("encrypted blob too short".into()));
    }
    let (nonce, ciphertext) = blob.split_at(NONCE_LEN);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| ShieldError::Crypto("decryption failed".into()))?;
    Ok(Zeroizing::new(plaintext))
}

/// Encrypt the contents of `plain_path` into `enc_path`. The plaintext
/// buffer is scrubbed as soon as the blob is built.
pub fn encrypt_file(key: &[u8; KEY_LEN], plain_path: &Path, enc_path: &Path) -> Result<()> {
    let plain = Zeroizing::new(fs::read(plain_path)?);
    let blob = encrypt(key, &plain)?;
    fs::write(enc_path, blob)?;
    Ok(())
}

/// Decrypt `enc_path` into `plain_path` (the scratch file).
pub fn decrypt_file(key: &[u8; KEY_LEN], enc_path: &Path, plain_path: &Path) -> Result<()> {
    let blob = fs::read(enc_path)?;
    let plain = decrypt(key, &blob)?;
    fs::write(plain_path, plain.as_slice())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(byte: u8) -> [u8; KEY_LEN] {
        [byte; KEY_LEN]
    }

    #[test]
    fn roundtrip() {
        let plaintext = b"user_config rows".to_vec();
        let blob = encrypt(&key(1), &plaintext).unwrap();
        assert_eq!(blob.len(), NONCE_LEN + plaintext.len() + TAG_LEN);
        let decrypted = decrypt(&key(1), &blob).unwrap();
        assert_eq!(decrypted.as_slice(), plaintext.as_slice());
    }

    #[test]
    fn wrong_key_fails() {
        let blob = encrypt(&key(1), b"secret").unwrap();
        let err = decrypt(&key(2), &blob).unwrap_err();
        assert!(matches!(err, ShieldError::Crypto(_)));
    }

    #[test]
    fn tampered_blob_fails() {
        let mut blob = encrypt(&key(1), b"secret").unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0x01;
        assert!(decrypt(&key(1), &blob).is_err());
    }

    #[test]
    fn truncated_blob_rejected() {
        let blob = vec![0u8; NONCE_LEN + TAG_LEN - 1];
        let err = decrypt(&key(1), &blob).unwrap_err();
        assert!(matches!(err, ShieldError::Crypto(_)));
    }

    #[test]
    fn nonce_is_fresh_per_encryption() {
        let a = encrypt(&key(1), b"same input").unwrap();
        let b = encrypt(&key(1), b"same input").unwrap();
        assert_ne!(a[..NONCE_LEN], b[..NONCE_LEN]);
    }

    #[test]
    fn file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let plain = dir.path().join("plain.db");
        let enc = dir.path().join("store.enc");
        let restored = dir.path().join("restored.db");
        fs::write(&plain, b"sqlite bytes").unwrap();
        encrypt_file(&key(7), &plain, &enc).unwrap();
        decrypt_file(&key(7), &enc, &restored).unwrap();
        assert_eq!(fs::read(&restored).unwrap(), b"sqlite bytes");
    }
}
