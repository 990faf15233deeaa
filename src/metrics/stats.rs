use metriken::*;

#[metric(
    name = "ingress",
    description = "Total number of envelopes ingressed by the agent"
)]
pub static INGRESS: LazyCounter = LazyCounter::new(Counter::default);

#[metric(
    name = "dropped",
    description = "Total number of dropped envelopes",
    metadata = { direction = "ingress" }
)]
pub static DROPPED: LazyCounter = LazyCounter::new(Counter::default);

#[metric(
    name = "envelopes_written",
    description = "Total number of envelopes written to the envelope collector"
)]
pub static ENVELOPES_WRITTEN: LazyCounter = LazyCounter::new(Counter::default);

#[metric(
    name = "expired_metrics",
    description = "Total number of collected metrics removed after exceeding the ttl"
)]
pub static EXPIRED_METRICS: LazyCounter = LazyCounter::new(Counter::default);

#[metric(
    name = "expired_sources",
    description = "Total number of source ids removed after exceeding the ttl"
)]
pub static EXPIRED_SOURCES: LazyCounter = LazyCounter::new(Counter::default);

#[metric(
    name = "origin_mappings",
    description = "Total number of envelopes where the origin tag is used as the source_id"
)]
pub static ORIGIN_MAPPINGS: LazyCounter = LazyCounter::new(Counter::default);
