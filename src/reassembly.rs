//! Segment reassembly with bounded lifetimes.
//!
//! Blocks for one product can arrive in any order, interleaved with other
//! products, and may repeat. The reassembler buckets them by
//! `(filename, timestamp)` and emits a completed bundle exactly when the
//! last missing block lands. Bundles that never complete age out; partial
//! products are never emitted.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::metrics::{Metrics, NoMetrics};
use crate::segment::{Segment, Timestamp};

/// How long an incomplete bundle may wait for its missing blocks.
pub const DEFAULT_BUNDLE_TTL: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Key {
    filename: String,
    timestamp: Timestamp,
}

#[derive(Debug)]
struct Bundle {
    /// Sized from the first-seen segment's block count; never resized.
    slots: Vec<Option<Segment>>,
    first_seen: Instant,
}

impl Bundle {
    fn new(total_blocks: usize, now: Instant) -> Self {
        Bundle {
            slots: (0..total_blocks).map(|_| None).collect(),
            first_seen: now,
        }
    }

    fn complete(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }
}

/// All blocks of one product, in order.
#[derive(Debug)]
pub struct CompletedBundle {
    segments: Vec<Segment>,
}

impl CompletedBundle {
    pub fn filename(&self) -> &str {
        &self.segments[0].filename
    }

    pub fn timestamp(&self) -> Timestamp {
        self.segments[0].timestamp
    }

    pub fn source(&self) -> &str {
        &self.segments[0].source
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn into_segments(self) -> Vec<Segment> {
        self.segments
    }
}

/// Collects segments into complete products.
///
/// Not thread-safe; when several connections feed one reassembler, the
/// caller serializes access. Bundle mutation must be atomic per key.
pub struct Reassembler {
    ttl: Duration,
    bundles: HashMap<Key, Bundle>,
    metrics: Arc<dyn Metrics>,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::with_metrics(DEFAULT_BUNDLE_TTL, Arc::new(NoMetrics))
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self::with_metrics(ttl, Arc::new(NoMetrics))
    }

    pub fn with_metrics(ttl: Duration, metrics: Arc<dyn Metrics>) -> Self {
        Reassembler {
            ttl,
            bundles: HashMap::new(),
            metrics,
        }
    }

    /// Insert one segment, returning the finished bundle if it was the
    /// last missing block.
    ///
    /// A segment whose block number falls outside its bundle's range is
    /// dropped: a corrupted header can survive the checksum when the
    /// corruption is confined to the header itself.
    pub fn submit(&mut self, segment: Segment) -> Option<CompletedBundle> {
        self.submit_at(Instant::now(), segment)
    }

    fn submit_at(&mut self, now: Instant, segment: Segment) -> Option<CompletedBundle> {
        let key = Key {
            filename: segment.filename.clone(),
            timestamp: segment.timestamp,
        };

        // An expired entry never completes; a fresh delivery restarts it
        if let Some(bundle) = self.bundles.get(&key) {
            if now.duration_since(bundle.first_seen) >= self.ttl {
                log::debug!("{}: bundle expired with missing blocks", key.filename);
                self.bundles.remove(&key);
                self.metrics.bundle_expired();
            }
        }

        let bundle = self
            .bundles
            .entry(key.clone())
            .or_insert_with(|| Bundle::new(segment.total_blocks as usize, now));

        let block_number = segment.block_number as usize;
        if block_number == 0 || block_number > bundle.slots.len() {
            log::debug!(
                "{}: dropping block {}/{} outside bundle of {}",
                key.filename,
                segment.block_number,
                segment.total_blocks,
                bundle.slots.len()
            );
            self.metrics.segment_rejected();
            return None;
        }

        // Overwrite: a repeated delivery of the same block replaces it
        bundle.slots[block_number - 1] = Some(segment);

        if bundle.complete() {
            self.bundles.remove(&key).map(|bundle| CompletedBundle {
                segments: bundle.slots.into_iter().flatten().collect(),
            })
        } else {
            None
        }
    }

    /// Evict bundles that have outlived the TTL.
    pub fn sweep(&mut self) {
        self.sweep_at(Instant::now())
    }

    fn sweep_at(&mut self, now: Instant) {
        let ttl = self.ttl;
        let metrics = &self.metrics;
        self.bundles.retain(|key, bundle| {
            let keep = now.duration_since(bundle.first_seen) < ttl;
            if !keep {
                log::debug!("{}: bundle expired with missing blocks", key.filename);
                metrics.bundle_expired();
            }
            keep
        });
    }

    /// Number of in-progress bundles.
    pub fn len(&self) -> usize {
        self.bundles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bundles.is_empty()
    }
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use crate::segment::Version;

    fn segment(filename: &str, block: u32, total: u32, content: &[u8]) -> Segment {
        Segment {
            filename: filename.to_string(),
            block_number: block,
            total_blocks: total,
            checksum: content.iter().map(|&b| b as u32).sum(),
            timestamp: Timestamp::parse("6/5/2015 12:56:00 AM").unwrap(),
            version: Version::V1,
            declared_length: content.len() as u32,
            content: Bytes::copy_from_slice(content),
            source: "test".to_string(),
        }
    }

    #[test]
    fn single_block_completes_immediately() {
        let mut reassembler = Reassembler::new();
        let bundle = reassembler.submit(segment("A.TXT", 1, 1, b"hello")).unwrap();
        assert_eq!(bundle.filename(), "A.TXT");
        assert_eq!(bundle.segments().len(), 1);
        assert!(reassembler.is_empty());
    }

    #[test]
    fn completes_in_any_permutation() {
        let orders: [&[u32]; 4] = [&[1, 2, 3, 4], &[4, 3, 2, 1], &[2, 4, 1, 3], &[3, 1, 4, 2]];
        for order in orders {
            let mut reassembler = Reassembler::new();
            let mut completed = Vec::new();
            for &block in order {
                let content = format!("block {} ", block);
                if let Some(bundle) =
                    reassembler.submit(segment("A.TXT", block, 4, content.as_bytes()))
                {
                    completed.push(bundle);
                }
            }
            assert_eq!(completed.len(), 1, "order {:?}", order);
            let blocks: Vec<u32> = completed[0]
                .segments()
                .iter()
                .map(|s| s.block_number)
                .collect();
            assert_eq!(blocks, [1, 2, 3, 4], "order {:?}", order);
        }
    }

    #[test]
    fn distinct_keys_do_not_interfere() {
        let mut reassembler = Reassembler::new();
        assert!(reassembler.submit(segment("A.TXT", 1, 2, b"a1")).is_none());
        assert!(reassembler.submit(segment("B.TXT", 1, 2, b"b1")).is_none());
        let bundle = reassembler.submit(segment("A.TXT", 2, 2, b"a2")).unwrap();
        assert_eq!(bundle.filename(), "A.TXT");
        assert_eq!(reassembler.len(), 1);
    }

    #[test]
    fn repeated_block_overwrites_its_slot() {
        let mut reassembler = Reassembler::new();
        assert!(reassembler.submit(segment("A.TXT", 1, 2, b"old")).is_none());
        assert!(reassembler.submit(segment("A.TXT", 1, 2, b"new")).is_none());
        let bundle = reassembler.submit(segment("A.TXT", 2, 2, b"tail")).unwrap();
        assert_eq!(&bundle.segments()[0].content[..], b"new");
    }

    #[test]
    fn out_of_range_block_is_dropped() {
        let mut reassembler = Reassembler::new();
        assert!(reassembler.submit(segment("A.TXT", 1, 2, b"a1")).is_none());
        // Claims 9 of 2: corrupted header, drop it
        assert!(reassembler.submit(segment("A.TXT", 9, 2, b"bogus")).is_none());
        let bundle = reassembler.submit(segment("A.TXT", 2, 2, b"a2")).unwrap();
        assert_eq!(bundle.segments().len(), 2);
    }

    #[test]
    fn expired_bundle_is_not_completed_by_a_late_block() {
        let mut reassembler = Reassembler::new();
        let t0 = Instant::now();
        assert!(reassembler
            .submit_at(t0, segment("A.TXT", 1, 2, b"a1"))
            .is_none());

        // The late block lands after expiry: it restarts the key instead
        // of completing the stale bundle
        let late = t0 + DEFAULT_BUNDLE_TTL + Duration::from_secs(1);
        assert!(reassembler
            .submit_at(late, segment("A.TXT", 2, 2, b"a2"))
            .is_none());
        assert_eq!(reassembler.len(), 1);
    }

    #[test]
    fn sweep_evicts_abandoned_bundles() {
        let mut reassembler = Reassembler::new();
        let t0 = Instant::now();
        assert!(reassembler
            .submit_at(t0, segment("A.TXT", 1, 2, b"a1"))
            .is_none());
        assert!(reassembler
            .submit_at(t0 + Duration::from_secs(119), segment("B.TXT", 1, 2, b"b1"))
            .is_none());

        reassembler.sweep_at(t0 + Duration::from_secs(121));
        assert_eq!(reassembler.len(), 1);

        reassembler.sweep_at(t0 + Duration::from_secs(300));
        assert!(reassembler.is_empty());
    }
}
