/// Observability sink for client internals.
///
/// The client calls these hooks as it works; implementations typically
/// increment counters. Every method has a no-op default, so an
/// implementation only overrides what it cares about. The sink is handed
/// to components at construction; there is no global instrumentation
/// state.
pub trait Metrics: Send + Sync {
    /// Bytes arrived on the active connection.
    fn bytes_received(&self, _count: usize) {}
    /// A segment decoded and passed validation.
    fn segment_decoded(&self) {}
    /// The decoder abandoned a frame.
    fn decode_error(&self) {}
    /// The decoder discarded buffered data and resynchronized.
    fn resync(&self) {}
    /// A segment's block number fell outside its bundle and was dropped.
    fn segment_rejected(&self) {}
    /// An incomplete bundle aged out and its segments were discarded.
    fn bundle_expired(&self) {}
    /// A completed product was suppressed as a duplicate.
    fn duplicate_suppressed(&self) {}
    /// A product was delivered downstream.
    fn product_delivered(&self) {}
    /// A wire-delivered server list replaced the working pool.
    fn server_list_adopted(&self) {}
    /// A connection was established.
    fn connected(&self) {}
    /// A connection ended, for any reason.
    fn disconnected(&self) {}
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoMetrics;

impl Metrics for NoMetrics {}
