//! Storage metrics.

#[derive(Debug, vise::Metrics)]
#[metrics(prefix = "fastfinality_storage_view_sequence_cache")]
pub(crate) struct ViewSequenceCache {
    /// Number of committed entries.
    pub(crate) entries: vise::Gauge<u64>,
    /// Entries deleted by pruning.
    pub(crate) pruned: vise::Counter,
}

#[vise::register]
pub(crate) static CACHE: vise::Global<ViewSequenceCache> = vise::Global::new();

#[derive(Debug, vise::Metrics)]
#[metrics(prefix = "fastfinality_storage_rocksdb")]
pub(crate) struct RocksDbStore {
    /// Latency of a successful `save()` call.
    #[metrics(unit = vise::Unit::Seconds, buckets = vise::Buckets::LATENCIES)]
    pub(crate) save_latency: vise::Histogram<std::time::Duration>,
    /// Latency of a successful `load()` call.
    #[metrics(unit = vise::Unit::Seconds, buckets = vise::Buckets::LATENCIES)]
    pub(crate) load_latency: vise::Histogram<std::time::Duration>,
}

#[vise::register]
pub(crate) static ROCKSDB: vise::Global<RocksDbStore> = vise::Global::new();
