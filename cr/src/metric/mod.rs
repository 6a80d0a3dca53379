//! Metric collection and per-cycle aggregation

mod aggregator;

pub use aggregator::{FlushTrigger, MetricAggregator, MetricTable, RawTable};
