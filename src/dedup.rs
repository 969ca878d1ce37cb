//! Duplicate suppression.
//!
//! Relays commonly repeat products, both within one connection and when a
//! client fails over between servers. Suppression runs on completed
//! products: the fingerprint is the filename plus a SHA-1 digest of the
//! assembled bytes, remembered for a fixed window.

use sha1::{Digest, Sha1};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::metrics::{Metrics, NoMetrics};

/// How long an emitted product's fingerprint suppresses repeats.
pub const DEFAULT_DEDUP_TTL: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Fingerprint {
    filename: String,
    digest: [u8; 20],
}

/// Time-windowed set of recently emitted product fingerprints.
pub struct DuplicateFilter {
    ttl: Duration,
    seen: HashMap<Fingerprint, Instant>,
    metrics: Arc<dyn Metrics>,
}

impl DuplicateFilter {
    pub fn new() -> Self {
        Self::with_metrics(DEFAULT_DEDUP_TTL, Arc::new(NoMetrics))
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self::with_metrics(ttl, Arc::new(NoMetrics))
    }

    pub fn with_metrics(ttl: Duration, metrics: Arc<dyn Metrics>) -> Self {
        DuplicateFilter {
            ttl,
            seen: HashMap::new(),
            metrics,
        }
    }

    /// Returns `true` if the product is fresh and may proceed, or `false`
    /// if an identical product was emitted within the window. A fresh
    /// product's fingerprint is inserted with a full TTL.
    pub fn check_and_insert(&mut self, filename: &str, contents: &[u8]) -> bool {
        self.check_at(Instant::now(), filename, contents)
    }

    fn check_at(&mut self, now: Instant, filename: &str, contents: &[u8]) -> bool {
        let fingerprint = Fingerprint {
            filename: filename.to_string(),
            digest: Sha1::digest(contents).into(),
        };
        match self.seen.get(&fingerprint) {
            Some(&emitted_at) if now.duration_since(emitted_at) < self.ttl => {
                self.metrics.duplicate_suppressed();
                false
            }
            _ => {
                self.seen.insert(fingerprint, now);
                true
            }
        }
    }

    /// Evict fingerprints that have outlived the TTL.
    pub fn sweep(&mut self) {
        self.sweep_at(Instant::now())
    }

    fn sweep_at(&mut self, now: Instant) {
        let ttl = self.ttl;
        self.seen
            .retain(|_, &mut emitted_at| now.duration_since(emitted_at) < ttl);
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

impl Default for DuplicateFilter {
    fn default() -> Self {
        Self::new()
    }
}
