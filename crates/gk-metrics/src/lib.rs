//! Observability: Prometheus counters/histograms for the order pipeline
//! and the paper-trading statistics that back the pre-live checklist.

mod collector;
mod stats;

pub use collector::MetricsCollector;
pub use stats::{
    LifecycleOutcome, OrderRecord, PreLiveStatus, StatisticsCollector, StatsSummary,
};
