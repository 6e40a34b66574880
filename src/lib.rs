//! Parallel variant calling
//!
//! Runs a pileup generator and a variant caller once per reference contig,
//! with a bounded number of contigs in flight, and merges the per-contig call
//! sets into a single output in reference order.
//!
//! # Architecture
//!
//! The run consists of:
//!
//! - **Header**: contig dictionaries, read groups and the reference genome
//! - **Reconcile**: pre-flight checks that make all inputs agree on naming
//! - **I/O**: external tool templates and the temporary workspace
//! - **Pipeline**: per-contig jobs, the polling scheduler, the final merge
//!
//! # Usage
//!
//! ```no_run
//! use varcall::{run_pipeline, Config};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = Config::from_file("config.yaml".as_ref())?;
//!     run_pipeline(&config, "varcall run")?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod header;
pub mod io;
pub mod pipeline;
pub mod reconcile;

pub use config::Config;
pub use error::{Result, VarcallError};
pub use pipeline::{CallJob, Metrics, MetricsSnapshot, ScheduleReport, Scheduler, SchedulerConfig};
pub use reconcile::{reconcile, ReconcileOptions, Reconciliation};

use header::{fasta, InputHeader};
use io::Workspace;
use pipeline::{stages, JobContext, MergeMetadata, MetricsReporter};
use std::time::{Duration, Instant};

/// Summary of a finished run.
#[derive(Debug, Clone)]
pub struct RunStats {
    /// Contigs called
    pub contigs: usize,

    /// Whether input working copies had to be reheadered
    pub reheadered: bool,

    /// Depth ceiling passed to the pileup generator
    pub effective_max_depth: u64,

    pub schedule: ScheduleReport,
    pub metrics: MetricsSnapshot,
}

impl std::fmt::Display for RunStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Contigs: {}, Max depth: {}, Reheadered: {}, {}",
            self.contigs, self.effective_max_depth, self.reheadered, self.schedule
        )
    }
}

/// Run variant calling with the given configuration.
///
/// `command_line` is recorded in the output header. All temporary files are
/// removed before this returns, whether the run succeeded or not.
pub fn run_pipeline(config: &Config, command_line: &str) -> Result<RunStats> {
    config.validate()?;

    tracing::info!(
        "Starting variant calling on {} aligned reads file(s)",
        config.input.alignments.len()
    );

    let headers = stages::read_input_headers(&config.tools, &config.input.alignments)?;
    let reconciliation = reconcile_inputs(config, headers)?;
    let contigs = reconciliation.canonical_contigs();

    let metrics = Metrics::new();
    let mut workspace = Workspace::create(config.processing.temp_dir.as_deref())?;

    let started = Instant::now();
    let inputs = stages::prepare_inputs(
        &config.input.alignments,
        &config.input.index_files,
        &reconciliation,
        &config.tools,
        &mut workspace,
    )?;
    let reference = stages::prepare_reference(&config.input.reference, &config.tools, &mut workspace)?;
    metrics.add_prepare_time(started.elapsed());

    let jobs = pipeline::partition(
        contigs,
        &JobContext {
            pileup: &config.tools.pileup,
            caller: &config.tools.caller,
            reference: &reference,
            inputs: &inputs.alignments,
            max_depth: reconciliation.effective_max_depth,
        },
        &mut workspace,
    );
    let canonical_outputs = jobs.canonical_outputs;

    let scheduler = Scheduler::new(metrics.clone(), scheduler_config(config));
    let schedule = scheduler.run(jobs.stack)?;

    inputs.release(&mut workspace);

    let started = Instant::now();
    let meta = MergeMetadata::new(
        &config.input.reference,
        command_line,
        reconciliation.all_read_groups().into_iter().cloned().collect(),
    );
    pipeline::merge(
        &canonical_outputs,
        &meta,
        config.output.path.as_deref(),
        &config.tools,
        &mut workspace,
    )?;
    metrics.add_merge_time(started.elapsed());

    workspace.close();

    let snapshot = metrics.snapshot();
    if config.processing.enable_metrics {
        MetricsReporter::new(metrics.clone(), config.processing.metrics_interval_secs).print_summary();
    }
    if let Some(ref path) = config.processing.metrics_output_path {
        if let Err(e) = snapshot.save_to_file(path) {
            tracing::warn!("Failed to save metrics to {}: {}", path, e);
        }
    }

    let stats = RunStats {
        contigs: canonical_outputs.len(),
        reheadered: reconciliation.require_reheader,
        effective_max_depth: reconciliation.effective_max_depth,
        schedule,
        metrics: snapshot,
    };
    tracing::info!("Variant calling complete: {}", stats);
    Ok(stats)
}

/// What a run would do, computed without launching any calling pipeline.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub reconciliation: Reconciliation,

    /// Jobs in declared contig order, rendered against the original inputs
    pub jobs: Vec<CallJob>,
}

/// Read and reconcile the inputs and render every per-contig job.
pub fn plan(config: &Config) -> Result<RunPlan> {
    config.validate()?;

    let headers = stages::read_input_headers(&config.tools, &config.input.alignments)?;
    let reconciliation = reconcile_inputs(config, headers)?;

    // Output names are reserved but never created
    let mut workspace = Workspace::create(config.processing.temp_dir.as_deref())?;
    let jobs = pipeline::partition(
        reconciliation.canonical_contigs(),
        &JobContext {
            pileup: &config.tools.pileup,
            caller: &config.tools.caller,
            reference: &config.input.reference,
            inputs: &config.input.alignments,
            max_depth: reconciliation.effective_max_depth,
        },
        &mut workspace,
    );
    let jobs = jobs.iter_declared().cloned().collect();

    Ok(RunPlan {
        reconciliation,
        jobs,
    })
}

fn reconcile_inputs(
    config: &Config,
    headers: Vec<InputHeader>,
) -> Result<Reconciliation> {
    let with_checksums = reconcile::checksums_usable(&headers, config.calling.use_checksums);
    let reference = fasta::scan_reference(&config.input.reference, with_checksums)?;

    let options = ReconcileOptions {
        group_by_read_group_id: config.calling.group_by_read_group_id,
        use_checksums: config.calling.use_checksums,
        max_depth: config.calling.max_depth,
    };
    let reconciliation = reconcile(headers, &reference, &options)?;

    for (from, to) in &reconciliation.renamed_contigs {
        tracing::info!("Contig {} matches reference sequence {} by checksum", from, to);
    }
    for (id, from, to) in &reconciliation.renamed_samples {
        tracing::info!("Read group {}: sample {} is called as {}", id, from, to);
    }
    tracing::info!(
        "{} contigs to call, effective max depth {}",
        reconciliation.canonical_contigs().len(),
        reconciliation.effective_max_depth
    );

    Ok(reconciliation)
}

fn scheduler_config(config: &Config) -> SchedulerConfig {
    SchedulerConfig {
        max_workers: config.processing.max_workers,
        poll_interval: Duration::from_millis(config.processing.poll_interval_ms),
        stderr_buffer_bytes: config.processing.stderr_buffer_bytes,
        enable_metrics: config.processing.enable_metrics,
        metrics_interval_secs: config.processing.metrics_interval_secs,
    }
}
