//! pmw-metrics: per-plugin counters and gauges, and the server-wide overview
//!
//! Each plugin's sample lives behind its own lock, so a read always sees an
//! internally consistent sample. The overview walks plugins one lock at a
//! time; it is not a global snapshot. Cross-plugin consistency is
//! best-effort in exchange for never blocking reporters on a shared lock.

pub mod aggregator;
pub mod sample;

pub use aggregator::{
    ActionOutcomeKind, MetricsAggregator, MetricsOverview, OverviewSummary, ProcessCounters,
    RankedPlugin, TopPlugins,
};
pub use sample::{EventRecord, MetricReport, MetricSample};
