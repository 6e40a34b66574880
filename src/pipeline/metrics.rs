//! Progress monitoring and metrics collection.

use serde::{Serialize, Serializer};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_f64(duration.as_secs_f64())
}

/// Metrics for a variant calling run.
#[derive(Debug, Default)]
pub struct Metrics {
    /// Number of per-contig jobs in the run
    pub jobs_total: AtomicU64,

    /// Pipelines started
    pub jobs_launched: AtomicU64,

    /// Pipelines whose two processes both exited successfully
    pub jobs_succeeded: AtomicU64,

    /// Pipelines with a failing process
    pub jobs_failed: AtomicU64,

    /// Highest number of pipelines observed running at once
    pub peak_running: AtomicU64,

    /// Processes terminated while aborting a run
    pub processes_terminated: AtomicU64,

    /// Start time
    start_time: Option<Instant>,

    /// Time spent preparing inputs and the reference (microseconds)
    pub prepare_us: AtomicU64,

    /// Time spent merging partial results (microseconds)
    pub merge_us: AtomicU64,
}

impl Metrics {
    /// Create new metrics.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        })
    }

    pub fn set_jobs_total(&self, count: u64) {
        self.jobs_total.store(count, Ordering::Relaxed);
    }

    /// Record a launched pipeline and the resulting number of running ones.
    pub fn add_launched(&self, running: u64) {
        self.jobs_launched.fetch_add(1, Ordering::Relaxed);
        self.peak_running.fetch_max(running, Ordering::Relaxed);
    }

    pub fn add_succeeded(&self) {
        self.jobs_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_failed(&self) {
        self.jobs_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_terminated(&self, count: u64) {
        self.processes_terminated.fetch_add(count, Ordering::Relaxed);
    }

    /// Record time spent preparing working copies (in microseconds).
    pub fn add_prepare_time(&self, duration: Duration) {
        self.prepare_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    /// Record time spent merging (in microseconds).
    pub fn add_merge_time(&self, duration: Duration) {
        self.merge_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    /// Get elapsed time since start.
    pub fn elapsed(&self) -> Duration {
        self.start_time.map_or(Duration::ZERO, |t| t.elapsed())
    }

    /// Get finished jobs per minute.
    pub fn jobs_per_minute(&self) -> f64 {
        let done = self.jobs_succeeded.load(Ordering::Relaxed);
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            done as f64 * 60.0 / elapsed
        } else {
            0.0
        }
    }

    /// Get a snapshot of current metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            jobs_total: self.jobs_total.load(Ordering::Relaxed),
            jobs_launched: self.jobs_launched.load(Ordering::Relaxed),
            jobs_succeeded: self.jobs_succeeded.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
            peak_running: self.peak_running.load(Ordering::Relaxed),
            processes_terminated: self.processes_terminated.load(Ordering::Relaxed),
            elapsed: self.elapsed(),
            jobs_per_minute: self.jobs_per_minute(),
            prepare_secs: self.prepare_us.load(Ordering::Relaxed) as f64 / 1_000_000.0,
            merge_secs: self.merge_us.load(Ordering::Relaxed) as f64 / 1_000_000.0,
        }
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub jobs_total: u64,
    pub jobs_launched: u64,
    pub jobs_succeeded: u64,
    pub jobs_failed: u64,
    pub peak_running: u64,
    pub processes_terminated: u64,
    #[serde(serialize_with = "serialize_duration")]
    pub elapsed: Duration,
    pub jobs_per_minute: f64,
    /// Wall time spent creating working copies and indices (seconds)
    pub prepare_secs: f64,
    /// Wall time spent merging partial results (seconds)
    pub merge_secs: f64,
}

impl MetricsSnapshot {
    /// Save metrics to a JSON file.
    pub fn save_to_file(&self, path: &str) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        tracing::info!("Metrics saved to {}", path);
        Ok(())
    }

    /// Pipelines launched but not yet finished.
    pub fn running(&self) -> u64 {
        self.jobs_launched
            .saturating_sub(self.jobs_succeeded + self.jobs_failed)
    }
}

impl std::fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Contigs: {}/{} done, {} running, {} pending | Failures: {} | \
             Peak parallelism: {} | Rate: {:.1} contigs/min | Elapsed: {:.1}s",
            self.jobs_succeeded,
            self.jobs_total,
            self.running(),
            self.jobs_total.saturating_sub(self.jobs_launched),
            self.jobs_failed,
            self.peak_running,
            self.jobs_per_minute,
            self.elapsed.as_secs_f64(),
        )
    }
}

/// Periodic metrics reporter, driven from the scheduler's polling loop.
pub struct MetricsReporter {
    metrics: Arc<Metrics>,
    interval: Duration,
    last_report: Instant,
}

impl MetricsReporter {
    /// Create a new metrics reporter.
    pub fn new(metrics: Arc<Metrics>, interval_secs: u64) -> Self {
        Self {
            metrics,
            interval: Duration::from_secs(interval_secs),
            last_report: Instant::now(),
        }
    }

    /// Log a progress line if the reporting interval has passed.
    /// Returns whether a report was emitted.
    pub fn maybe_report(&mut self) -> bool {
        if self.last_report.elapsed() < self.interval {
            return false;
        }
        self.last_report = Instant::now();

        let snapshot = self.metrics.snapshot();
        let progress = if snapshot.jobs_total > 0 {
            snapshot.jobs_succeeded as f64 / snapshot.jobs_total as f64 * 100.0
        } else {
            0.0
        };
        tracing::info!("[{:.1}%] {}", progress, snapshot);
        true
    }

    /// Print a final summary.
    pub fn print_summary(&self) {
        let snapshot = self.metrics.snapshot();

        eprintln!("\n=== Variant Calling Summary ===");
        eprintln!("Total time: {:.1}s", snapshot.elapsed.as_secs_f64());
        eprintln!("Contigs called: {}/{}", snapshot.jobs_succeeded, snapshot.jobs_total);
        eprintln!("Peak parallel pipelines: {}", snapshot.peak_running);
        eprintln!("Processing rate: {:.1} contigs/min", snapshot.jobs_per_minute);
        eprintln!("Failures: {}", snapshot.jobs_failed);
        if snapshot.processes_terminated > 0 {
            eprintln!("Processes terminated: {}", snapshot.processes_terminated);
        }

        let staged = snapshot.prepare_secs + snapshot.merge_secs;
        if staged > 0.0 {
            eprintln!("\n--- Stage Time ---");
            eprintln!("Preparation: {:>7.1}s", snapshot.prepare_secs);
            eprintln!("Merge:       {:>7.1}s", snapshot.merge_secs);
        }
        eprintln!("===============================\n");
    }
}
