//! Per-contig calling: job construction, scheduling, merging.

pub mod jobs;
pub mod merge;
mod metrics;
pub mod scheduler;
pub mod stages;

#[cfg(test)]
mod pipeline_integration_tests;

pub use jobs::{partition, CallJob, JobContext, JobSet};
pub use merge::{merge, MergeMetadata};
pub use metrics::{Metrics, MetricsReporter, MetricsSnapshot};
pub use scheduler::{ScheduleReport, Scheduler, SchedulerConfig};
pub use stages::PreparedInputs;
