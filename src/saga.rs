//! Artifact tracking for compensation.
//!
//! Every object-store key a run creates is registered here **before** the
//! corresponding upload is awaited. That ordering is the whole point: if
//! the run later fails terminally — even mid-upload, even cancelled at an
//! await point — the compensation path can enumerate exactly the keys that
//! may exist and delete them. An upload can fail after registration (the
//! delete then hits a missing key, which is harmless), but a key can never
//! exist in the store without being registered.

use std::sync::Mutex;

/// Ordered, deduplicating record of object-store keys created by one run.
///
/// Shared across the concurrent upload tasks of a run; retried attempts
/// re-register the same keys, which dedup makes idempotent.
#[derive(Debug, Default)]
pub struct ArtifactTracker {
    keys: Mutex<Vec<String>>,
}

impl ArtifactTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a key about to be uploaded. Re-registering is a no-op.
    pub fn register(&self, key: &str) {
        let mut keys = self.keys.lock().expect("artifact tracker poisoned");
        if !keys.iter().any(|k| k == key) {
            keys.push(key.to_string());
        }
    }

    /// Snapshot of every registered key, in registration order.
    pub fn keys(&self) -> Vec<String> {
        self.keys.lock().expect("artifact tracker poisoned").clone()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.lock().expect("artifact tracker poisoned").is_empty()
    }
}
