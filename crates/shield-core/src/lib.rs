//! shield-core — ReplayShield's encrypted credential store and anti-replay
//! authenticator.
//!
//! Each user owns a pool of valid passwords; the most recently used entries
//! form a blocked window and temporarily fail, forcing rotation through the
//! remainder. The relational store is AES-256-GCM encrypted at rest and is
//! only ever decrypted into a memory-backed scratch file for the duration of
//! one session.
//!
//! # Module layout
//! - `crypto`      — envelope cipher (AES-256-GCM, nonce-prepended blobs)
//! - `kdf`         — PBKDF2-HMAC-SHA256 admin key derivation
//! - `key_holder`  — process-wide admin key handle, zeroized on teardown
//! - `paths`       — salt / encrypted store / scratch path resolution
//! - `store`       — SQLite schema and row-level queries
//! - `session`     — ephemeral secure session (decrypt, operate, re-encrypt, scrub)
//! - `auth`        — PASS/FAIL decision and blocked-window recomputation
//! - `credentials` — admin password lifecycle (init, verify, change)
//! - `admin`       — administrative store operations (users, pools, block counts)
//! - `error`       — unified error taxonomy

pub mod admin;
pub mod auth;
pub mod credentials;
pub mod crypto;
pub mod error;
pub mod kdf;
pub mod key_holder;
pub mod paths;
pub mod session;
pub mod store;

pub use auth::{Authenticator, Decision};
pub use error::{Result, ShieldError};
pub use kdf::AdminKey;
pub use key_holder::KeyHolder;
pub use paths::StorePaths;
pub use session::SecureStore;
