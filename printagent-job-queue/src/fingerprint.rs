//! Time-windowed content hashes for jobs without an identifier.

use std::collections::HashMap;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::time::Instant;

use crate::types::Job;

pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// SHA-256 over invoice, copy count and payload, hex encoded.
pub fn fingerprint(job: &Job) -> String {
    let mut hasher = Sha256::new();
    hasher.update(job.invoice.as_bytes());
    // unit separator keeps ("A1", "2") apart from ("A", "12")
    hasher.update([0x1f]);
    hasher.update(job.copies.to_string().as_bytes());
    hasher.update([0x1f]);
    hasher.update(job.payload.as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug)]
pub struct FingerprintCache {
    window: Duration,
    seen: HashMap<String, Instant>,
}

impl Default for FingerprintCache {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

impl FingerprintCache {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            seen: HashMap::new(),
        }
    }

    #[inline]
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Drop entries that fell out of the window.
    pub fn purge(&mut self, now: Instant) {
        let window = self.window;
        self.seen
            .retain(|_, last| now.saturating_duration_since(*last) < window);
    }

    /// Record `hash` unless it was seen within the window.
    ///
    /// Returns `false` for a duplicate. A duplicate does not refresh the
    /// original timestamp, so a stream of repeats prints again once the
    /// first sighting expires.
    pub fn check_and_record(&mut self, hash: &str, now: Instant) -> bool {
        self.purge(now);
        if self.seen.contains_key(hash) {
            return false;
        }
        self.seen.insert(hash.to_owned(), now);
        true
    }

    /// Drop `hash` so the same content may print again (used after a failed print).
    pub fn forget(&mut self, hash: &str) {
        self.seen.remove(hash);
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
