//! Unified error taxonomy for ReplayShield.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ShieldError>;

#[derive(Debug, Error)]
pub enum ShieldError {
    #[error("environment error: {0}")]
    SystemEnvironment(String),

    #[error("initialization error: {0}")]
    Initialization(String),

    /// Wrong admin password. Crypto failures and store corruption are
    /// deliberately collapsed into this one message so callers learn nothing
    /// beyond pass/fail.
    #[error("invalid admin password")]
    AdminAuth,

    #[error("crypto failure: {0}")]
    Crypto(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("secure session already closed")]
    UseAfterClose,

    /// Aggregated close-time failure: the primary cause plus every secondary
    /// failure encountered while the remaining close steps still ran.
    #[error("session close failed: {primary}{}", render_secondary(.secondary))]
    SessionClose {
        primary: Box<ShieldError>,
        secondary: Vec<ShieldError>,
    },
}

impl From<std::io::Error> for ShieldError {
    fn from(e: std::io::Error) -> Self {
        ShieldError::SystemEnvironment(e.to_string())
    }
}

impl From<rusqlite::Error> for ShieldError {
    fn from(e: rusqlite::Error) -> Self {
        ShieldError::Store(e.to_string())
    }
}

fn render_secondary(secondary: &[ShieldError]) -> String {
    if secondary.is_empty() {
        return String::new();
    }
    let causes: Vec<String> = secondary.iter().map(|e| e.to_string()).collect();
    format!(" (also: {})", causes.join("; "))
}

/// Fold `next` into `slot`, promoting to a `SessionClose` aggregate once more
/// than one failure has been seen. The first failure stays the primary cause.
pub(crate) fn attach(slot: &mut Option<ShieldError>, next: ShieldError) {
    *slot = Some(match slot.take() {
        None => next,
        Some(ShieldError::SessionClose {
            primary,
            mut secondary,
        }) => {
            secondary.push(next);
            ShieldError::SessionClose { primary, secondary }
        }
        Some(first) => ShieldError::SessionClose {
            primary: Box::new(first),
            secondary: vec![next],
        },
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attach_keeps_first_failure_primary() {
        let mut slot = None;
        attach(&mut slot, ShieldError::Store("handle close".into()));
        attach(&mut slot, ShieldError::Crypto("re-encrypt".into()));
        attach(&mut slot, ShieldError::SystemEnvironment("scratch delete".into()));
        let err = slot.unwrap();
        match &err {
            ShieldError::SessionClose { primary, secondary } => {
                assert!(matches!(**primary, ShieldError::Store(_)));
                assert_eq!(secondary.len(), 2);
            }
            other => panic!("unexpected error shape: {other:?}"),
        }
        let message = err.to_string();
        assert!(message.contains("handle close"));
        assert!(message.contains("re-encrypt"));
        assert!(message.contains("scratch delete"));
    }

    #[test]
    fn single_failure_stays_unwrapped() {
        let mut slot = None;
        attach(&mut slot, ShieldError::UseAfterClose);
        assert!(matches!(slot, Some(ShieldError::UseAfterClose)));
    }
}
