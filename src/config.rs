use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::dedup::DEFAULT_DEDUP_TTL;
use crate::metrics::{Metrics, NoMetrics};
use crate::product::Product;
use crate::reassembly::DEFAULT_BUNDLE_TTL;
use crate::segment::Segment;
use crate::server_list::ServerList;

/// Pass/reject predicate over decoded segments, evaluated before
/// reassembly.
pub type SegmentFilter = Arc<dyn Fn(&Segment) -> bool + Send + Sync>;

/// Pass/reject predicate over completed products, evaluated before
/// emission.
pub type ProductFilter = Arc<dyn Fn(&Product) -> bool + Send + Sync>;

/// Client configuration.
///
/// # Example
///
/// ```
/// let config = emwin_byteblaster::Config::new("you@example.com")
///     .adopt_server_lists(false)
///     .segment_filter(|segment| segment.filename.ends_with(".TXT"));
/// # std::mem::drop(config);
/// ```
#[derive(Clone)]
pub struct Config {
    /// Identity sent in the logon line. The relay operators ask that it
    /// be a reachable email address.
    pub(crate) email: String,
    pub(crate) servers: ServerList,
    pub(crate) adopt_server_lists: bool,
    pub(crate) segment_filter: Option<SegmentFilter>,
    pub(crate) product_filter: Option<ProductFilter>,
    pub(crate) metrics: Arc<dyn Metrics>,
    pub(crate) bundle_ttl: Duration,
    pub(crate) dedup_ttl: Duration,
}

impl Config {
    pub fn new(email: impl Into<String>) -> Self {
        Config {
            email: email.into(),
            servers: ServerList::default(),
            adopt_server_lists: true,
            segment_filter: None,
            product_filter: None,
            metrics: Arc::new(NoMetrics),
            bundle_ttl: DEFAULT_BUNDLE_TTL,
            dedup_ttl: DEFAULT_DEDUP_TTL,
        }
    }

    /// Seed the relay pool, replacing the built-in defaults.
    pub fn servers(mut self, servers: ServerList) -> Self {
        self.servers = servers;
        self
    }

    /// Whether wire-delivered server lists replace the working pool.
    /// Defaults to `true`.
    pub fn adopt_server_lists(mut self, adopt: bool) -> Self {
        self.adopt_server_lists = adopt;
        self
    }

    /// Reject segments before they reach reassembly.
    pub fn segment_filter(
        mut self,
        filter: impl Fn(&Segment) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.segment_filter = Some(Arc::new(filter));
        self
    }

    /// Reject completed products before they are emitted.
    pub fn product_filter(
        mut self,
        filter: impl Fn(&Product) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.product_filter = Some(Arc::new(filter));
        self
    }

    /// Receive diagnostic counters.
    pub fn metrics(mut self, metrics: Arc<dyn Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// How long an incomplete bundle may wait for its missing blocks.
    pub fn bundle_ttl(mut self, ttl: Duration) -> Self {
        self.bundle_ttl = ttl;
        self
    }

    /// How long an emitted product suppresses identical repeats.
    pub fn dedup_ttl(mut self, ttl: Duration) -> Self {
        self.dedup_ttl = ttl;
        self
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("email", &self.email)
            .field("servers", &self.servers)
            .field("adopt_server_lists", &self.adopt_server_lists)
            .field("segment_filter", &self.segment_filter.is_some())
            .field("product_filter", &self.product_filter.is_some())
            .field("bundle_ttl", &self.bundle_ttl)
            .field("dedup_ttl", &self.dedup_ttl)
            .finish_non_exhaustive()
    }
}
