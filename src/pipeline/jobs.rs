//! Per-contig job construction.

use crate::header::Contig;
use crate::io::{Bindings, CommandSpec, ToolTemplate, Workspace};
use std::path::{Path, PathBuf};

/// One contig's two-stage calling pipeline: `producer | consumer > output_path`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallJob {
    pub contig: Contig,
    pub producer: CommandSpec,
    pub consumer: CommandSpec,
    pub output_path: PathBuf,
}

impl CallJob {
    /// The full pipeline as a single shell-like line, for logs and errors.
    pub fn command_line(&self) -> String {
        format!("{} | {} > {}", self.producer, self.consumer, self.output_path.display())
    }
}

/// Everything the per-contig templates are rendered against.
#[derive(Debug, Clone)]
pub struct JobContext<'a> {
    pub pileup: &'a ToolTemplate,
    pub caller: &'a ToolTemplate,
    pub reference: &'a Path,
    pub inputs: &'a [PathBuf],
    pub max_depth: u64,
}

/// Jobs of a run plus the order their outputs must be merged in.
#[derive(Debug, Clone)]
pub struct JobSet {
    /// Pending jobs; popping yields them in declared contig order
    pub stack: Vec<CallJob>,

    /// Per-contig outputs in declared contig order
    pub canonical_outputs: Vec<PathBuf>,
}

impl JobSet {
    pub fn len(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    /// Jobs in declared order, without consuming the set.
    pub fn iter_declared(&self) -> impl Iterator<Item = &CallJob> {
        self.stack.iter().rev()
    }
}

/// Build one job per contig.
///
/// Every job gets a fresh output file reserved in `workspace`.
pub fn partition(contigs: &[Contig], ctx: &JobContext<'_>, workspace: &mut Workspace) -> JobSet {
    let base = Bindings::new()
        .set_path("reference", ctx.reference)
        .set_list("inputs", ctx.inputs.iter().map(|p| p.to_string_lossy().into_owned()))
        .set("max_depth", ctx.max_depth.to_string());

    let mut canonical_outputs = Vec::with_capacity(contigs.len());
    let mut stack = Vec::with_capacity(contigs.len());

    for contig in contigs {
        let output_path = workspace.reserve(&format!("{}_", contig.name), ".bcf");
        let bindings = base
            .clone()
            .set("contig", contig.name.clone())
            .set("region", format!("{}:", contig.name));

        canonical_outputs.push(output_path.clone());
        stack.push(CallJob {
            contig: contig.clone(),
            producer: ctx.pileup.render(&bindings),
            consumer: ctx.caller.render(&bindings),
            output_path,
        });
    }
    stack.reverse();

    tracing::debug!("Partitioned work into {} per-contig jobs", stack.len());

    JobSet {
        stack,
        canonical_outputs,
    }
}
