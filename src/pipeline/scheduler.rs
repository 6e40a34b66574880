//! Bounded-concurrency execution of per-contig calling pipelines.
//!
//! The scheduler is a single polling loop. Parallelism comes from the child
//! processes themselves: at most `max_workers` producer/consumer pairs are
//! alive at any time, and the loop checks on them without blocking. Each
//! child's stderr is drained by a background thread into a bounded buffer,
//! since a full, unread pipe would stall the child forever.
//!
//! The first failing pipeline aborts the whole batch. Every other child is
//! killed and reaped, and the error names the contig and both command lines.

use crate::error::{Result, VarcallError};
use crate::pipeline::jobs::CallJob;
use crate::pipeline::{Metrics, MetricsReporter};
use std::fs::File;
use std::io::{self, Read};
use std::process::{Child, ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// How long to wait for stderr drain threads once their process has exited.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Configuration for the scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Maximum number of pipelines running at once
    pub max_workers: usize,

    /// Pause between polling cycles
    pub poll_interval: Duration,

    /// Bytes of stderr kept per process
    pub stderr_buffer_bytes: usize,

    /// Enable progress reporting
    pub enable_metrics: bool,

    /// Metrics reporting interval in seconds
    pub metrics_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            poll_interval: Duration::from_millis(500),
            stderr_buffer_bytes: 1 << 20,
            enable_metrics: true,
            metrics_interval_secs: 30,
        }
    }
}

/// Scheduler for running calling pipelines under a worker limit.
pub struct Scheduler {
    metrics: Arc<Metrics>,
    config: SchedulerConfig,
}

impl Scheduler {
    /// Create a new scheduler.
    pub fn new(metrics: Arc<Metrics>, config: SchedulerConfig) -> Self {
        Self { metrics, config }
    }

    /// Run every job in `pending`, popping from the end.
    ///
    /// Returns once all pipelines succeeded, or with the first failure after
    /// all other pipelines have been terminated.
    pub fn run(&self, mut pending: Vec<CallJob>) -> Result<ScheduleReport> {
        let max_workers = self.config.max_workers.max(1);
        let mut running: Vec<RunningPipeline> = Vec::with_capacity(max_workers);
        let mut report = ScheduleReport::default();
        let mut reporter = self
            .config
            .enable_metrics
            .then(|| MetricsReporter::new(self.metrics.clone(), self.config.metrics_interval_secs));

        self.metrics.set_jobs_total(pending.len() as u64);
        tracing::info!(
            "Scheduling {} contigs for calling ({} concurrent)",
            pending.len(),
            max_workers
        );

        while !pending.is_empty() || !running.is_empty() {
            while running.len() < max_workers {
                let Some(job) = pending.pop() else { break };
                let contig = job.contig.name.clone();

                let pipeline = match self.launch(job) {
                    Ok(pipeline) => pipeline,
                    Err(e) => {
                        self.terminate_all(&mut running);
                        return Err(e);
                    }
                };

                running.push(pipeline);
                report.launch_order.push(contig);
                report.peak_running = report.peak_running.max(running.len());
                self.metrics.add_launched(running.len() as u64);
            }

            let mut idx = 0;
            while idx < running.len() {
                let state = running[idx].poll();
                match state {
                    Ok(PipelineState::Running) => idx += 1,
                    Ok(PipelineState::Succeeded) => {
                        let mut done = running.remove(idx);
                        done.finish_drains(DRAIN_GRACE);
                        done.log_stderr(tracing::Level::DEBUG);
                        tracing::debug!("Finished calling on {}", done.job.contig.name);
                        self.metrics.add_succeeded();
                        report.completion_order.push(done.job.contig.name.clone());
                    }
                    Ok(PipelineState::Failed(reason)) => {
                        let failed = running.remove(idx);
                        return Err(self.abort(failed, reason, &mut running));
                    }
                    Err(e) => {
                        let failed = running.remove(idx);
                        let reason = format!("could not query process status: {}", e);
                        return Err(self.abort(failed, reason, &mut running));
                    }
                }
            }

            if let Some(reporter) = reporter.as_mut() {
                reporter.maybe_report();
            }

            if !running.is_empty() {
                thread::sleep(self.config.poll_interval);
            }
        }

        tracing::info!(
            "All {} contigs called (peak parallelism {})",
            report.completion_order.len(),
            report.peak_running
        );
        Ok(report)
    }

    /// Start `producer | consumer > output` for one job.
    fn launch(&self, job: CallJob) -> Result<RunningPipeline> {
        let output = File::create(&job.output_path)?;

        let mut producer_cmd = job.producer.command();
        producer_cmd
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let mut producer = producer_cmd
            .spawn()
            .map_err(|e| launch_error(&job, "producer", &e))?;

        let Some(pipe) = producer.stdout.take() else {
            reap(&mut producer);
            return Err(launch_error(
                &job,
                "producer",
                &io::Error::new(io::ErrorKind::BrokenPipe, "no stdout handle"),
            ));
        };

        let mut consumer_cmd = job.consumer.command();
        consumer_cmd
            .stdin(Stdio::from(pipe))
            .stdout(Stdio::from(output))
            .stderr(Stdio::piped());
        let spawned = consumer_cmd.spawn();
        // Closes our ends of the pipe and the output file
        drop(consumer_cmd);

        let mut consumer = match spawned {
            Ok(child) => child,
            Err(e) => {
                reap(&mut producer);
                return Err(launch_error(&job, "consumer", &e));
            }
        };

        let limit = self.config.stderr_buffer_bytes;
        let (producer_stderr, producer_drain) = drain_stderr(&mut producer, limit);
        let (consumer_stderr, consumer_drain) = drain_stderr(&mut consumer, limit);

        tracing::debug!("Launched {}", job.command_line());

        Ok(RunningPipeline {
            job,
            producer,
            consumer,
            producer_status: None,
            consumer_status: None,
            producer_stderr,
            consumer_stderr,
            drains: [producer_drain, consumer_drain].into_iter().flatten().collect(),
        })
    }

    /// Tear down the batch after `failed` reported an error.
    fn abort(
        &self,
        mut failed: RunningPipeline,
        reason: String,
        running: &mut Vec<RunningPipeline>,
    ) -> VarcallError {
        self.metrics.add_failed();
        let killed = failed.terminate();
        failed.finish_drains(DRAIN_GRACE);
        failed.log_stderr(tracing::Level::ERROR);

        self.terminate_all(running);
        self.metrics.add_terminated(killed as u64);

        let contig = failed.job.contig.name.clone();
        tracing::error!("Calling on contig {} failed: {}", contig, reason);

        VarcallError::ExternalTool {
            message: format!("Variant calling on contig {} failed: {}", contig, reason),
            command: failed.job.command_line(),
            contig: Some(contig),
            stderr: failed.combined_stderr(),
        }
    }

    /// Best-effort termination of every running pipeline.
    fn terminate_all(&self, running: &mut Vec<RunningPipeline>) {
        let mut killed = 0;
        for mut pipeline in running.drain(..) {
            tracing::warn!("Terminating calling on contig {}", pipeline.job.contig.name);
            killed += pipeline.terminate();
        }
        self.metrics.add_terminated(killed as u64);
    }
}

fn launch_error(job: &CallJob, stage: &str, err: &io::Error) -> VarcallError {
    VarcallError::ExternalTool {
        message: format!(
            "Could not start the {} for contig {}: {}",
            stage, job.contig.name, err
        ),
        command: job.command_line(),
        contig: Some(job.contig.name.clone()),
        stderr: String::new(),
    }
}

/// Outcome of a successful scheduler run.
#[derive(Debug, Default, Clone)]
pub struct ScheduleReport {
    /// Contig names in the order their pipelines were started
    pub launch_order: Vec<String>,

    /// Contig names in the order their pipelines were seen to finish
    pub completion_order: Vec<String>,

    /// Highest number of pipelines running at once
    pub peak_running: usize,
}

impl std::fmt::Display for ScheduleReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Launched: {}, Completed: {}, Peak running: {}",
            self.launch_order.len(),
            self.completion_order.len(),
            self.peak_running
        )
    }
}

#[derive(Debug, PartialEq, Eq)]
enum PipelineState {
    Running,
    Succeeded,
    Failed(String),
}

/// A launched producer/consumer pair.
struct RunningPipeline {
    job: CallJob,
    producer: Child,
    consumer: Child,
    producer_status: Option<ExitStatus>,
    consumer_status: Option<ExitStatus>,
    producer_stderr: Arc<Mutex<StderrBuffer>>,
    consumer_stderr: Arc<Mutex<StderrBuffer>>,
    drains: Vec<JoinHandle<()>>,
}

impl RunningPipeline {
    /// Check both processes without blocking.
    fn poll(&mut self) -> io::Result<PipelineState> {
        if self.producer_status.is_none() {
            self.producer_status = self.producer.try_wait()?;
        }
        if self.consumer_status.is_none() {
            self.consumer_status = self.consumer.try_wait()?;
        }

        for (stage, status) in [("producer", self.producer_status), ("consumer", self.consumer_status)] {
            if let Some(status) = status {
                if !status.success() {
                    return Ok(PipelineState::Failed(format!("{} exited with {}", stage, status)));
                }
            }
        }

        Ok(match (self.producer_status, self.consumer_status) {
            (Some(_), Some(_)) => PipelineState::Succeeded,
            _ => PipelineState::Running,
        })
    }

    /// Kill and reap whichever process is still alive. Returns how many were killed.
    fn terminate(&mut self) -> usize {
        let mut killed = 0;
        if self.producer_status.is_none() {
            killed += usize::from(kill(&mut self.producer));
            self.producer_status = reap(&mut self.producer);
        }
        if self.consumer_status.is_none() {
            killed += usize::from(kill(&mut self.consumer));
            self.consumer_status = reap(&mut self.consumer);
        }
        killed
    }

    /// Give the drain threads a moment to reach end of stream.
    ///
    /// Threads still blocked afterwards (e.g. on a pipe held open by a
    /// grandchild) are detached.
    fn finish_drains(&mut self, grace: Duration) {
        let deadline = Instant::now() + grace;
        while self.drains.iter().any(|h| !h.is_finished()) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        for handle in self.drains.drain(..) {
            if handle.is_finished() {
                let _ = handle.join();
            }
        }
    }

    fn log_stderr(&self, level: tracing::Level) {
        for (stage, buffer) in [("producer", &self.producer_stderr), ("consumer", &self.consumer_stderr)] {
            let text = read_buffer(buffer);
            let text = text.trim_end();
            if text.is_empty() {
                continue;
            }
            if level == tracing::Level::ERROR {
                tracing::error!("{} stderr for {}:\n{}", stage, self.job.contig.name, text);
            } else {
                tracing::debug!("{} stderr for {}:\n{}", stage, self.job.contig.name, text);
            }
        }
    }

    fn combined_stderr(&self) -> String {
        let producer = read_buffer(&self.producer_stderr);
        let consumer = read_buffer(&self.consumer_stderr);
        format!(
            "[{}]\n{}\n[{}]\n{}",
            self.job.producer.program,
            producer.trim_end(),
            self.job.consumer.program,
            consumer.trim_end()
        )
    }
}

impl Drop for RunningPipeline {
    fn drop(&mut self) {
        self.terminate();
    }
}

fn kill(child: &mut Child) -> bool {
    match child.kill() {
        Ok(()) => true,
        Err(e) => {
            tracing::debug!("Could not kill process {}: {}", child.id(), e);
            false
        }
    }
}

fn reap(child: &mut Child) -> Option<ExitStatus> {
    let _ = child.kill();
    match child.wait() {
        Ok(status) => Some(status),
        Err(e) => {
            tracing::warn!("Could not reap process {}: {}", child.id(), e);
            None
        }
    }
}

/// Most recent bytes written to a process's stderr.
#[derive(Debug)]
struct StderrBuffer {
    data: Vec<u8>,
    limit: usize,
    truncated: bool,
}

impl StderrBuffer {
    fn new(limit: usize) -> Self {
        Self {
            data: Vec::new(),
            limit: limit.max(1),
            truncated: false,
        }
    }

    fn push(&mut self, chunk: &[u8]) {
        self.data.extend_from_slice(chunk);
        if self.data.len() > self.limit {
            let excess = self.data.len() - self.limit;
            self.data.drain(..excess);
            self.truncated = true;
        }
    }

    fn text(&self) -> String {
        let text = String::from_utf8_lossy(&self.data);
        if self.truncated {
            format!("[...]{}", text)
        } else {
            text.into_owned()
        }
    }
}

fn read_buffer(buffer: &Mutex<StderrBuffer>) -> String {
    match buffer.lock() {
        Ok(guard) => guard.text(),
        Err(poisoned) => poisoned.into_inner().text(),
    }
}

/// Start a thread that copies `child`'s stderr into a bounded buffer.
fn drain_stderr(child: &mut Child, limit: usize) -> (Arc<Mutex<StderrBuffer>>, Option<JoinHandle<()>>) {
    let buffer = Arc::new(Mutex::new(StderrBuffer::new(limit)));
    let handle = child.stderr.take().map(|source| spawn_drain(source, buffer.clone()));
    (buffer, handle)
}

fn spawn_drain<R: Read + Send + 'static>(mut source: R, buffer: Arc<Mutex<StderrBuffer>>) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut chunk = [0u8; 8192];
        loop {
            match source.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => match buffer.lock() {
                    Ok(mut guard) => guard.push(&chunk[..n]),
                    Err(poisoned) => poisoned.into_inner().push(&chunk[..n]),
                },
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
    })
}
