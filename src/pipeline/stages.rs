//! Working copies and indices of the run's inputs.
//!
//! Nothing the user passed in is ever modified. Alignment files are either
//! rewritten with their reconciled header (when reconciliation renamed a
//! contig or a sample) or hard-linked into the workspace, and are then
//! indexed there. The reference genome is linked and indexed the same way.

use crate::config::ToolsConfig;
use crate::error::Result;
use crate::header::{sam, InputHeader};
use crate::io::{run_tool, Bindings, StdoutTarget, Workspace};
use crate::reconcile::Reconciliation;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

/// Read and parse the header of one aligned reads file.
pub fn read_input_header(tools: &ToolsConfig, path: &Path) -> Result<InputHeader> {
    let spec = tools
        .header_reader
        .render(&Bindings::new().set_path("input", path));
    let raw = run_tool(
        &spec,
        StdoutTarget::Capture,
        &format!("Could not read the header of {}", path.display()),
    )?;
    let text = String::from_utf8_lossy(&raw);
    let header = sam::parse_header_text(&text, &path.display().to_string())?;

    tracing::debug!(
        "{}: {} contigs, {} read groups",
        path.display(),
        header.contigs.len(),
        header.read_groups.len()
    );
    for rg in &header.read_groups {
        tracing::debug!("  read group {} (sample {})", rg.id, rg.sample_name);
    }

    Ok(header)
}

/// Read the headers of all inputs, in order.
pub fn read_input_headers(tools: &ToolsConfig, paths: &[PathBuf]) -> Result<Vec<InputHeader>> {
    paths.iter().map(|p| read_input_header(tools, p)).collect()
}

/// Indexed working copies of the aligned reads files.
#[derive(Debug, Clone)]
pub struct PreparedInputs {
    /// Working copy per input, in input order
    pub alignments: Vec<PathBuf>,

    /// Everything created for these copies, including indices
    resources: Vec<PathBuf>,
}

impl PreparedInputs {
    /// Delete the working copies and their indices.
    pub fn release(self, workspace: &mut Workspace) {
        for path in &self.resources {
            workspace.release(path);
        }
        tracing::debug!("Released {} input working files", self.resources.len());
    }
}

/// Create an indexed working copy of every aligned reads file.
///
/// `index_files`, when non-empty, holds one pre-built index per input. They
/// are only reused when the inputs keep their original headers.
pub fn prepare_inputs(
    alignments: &[PathBuf],
    index_files: &[PathBuf],
    reconciliation: &Reconciliation,
    tools: &ToolsConfig,
    workspace: &mut Workspace,
) -> Result<PreparedInputs> {
    let mut prepared = PreparedInputs {
        alignments: Vec::with_capacity(alignments.len()),
        resources: Vec::new(),
    };

    for (idx, (source, header)) in alignments.iter().zip(&reconciliation.headers).enumerate() {
        let copy = if reconciliation.require_reheader {
            reheader(source, header, tools, workspace)?
        } else {
            workspace.link_copy(source, "input_", ".bam")?
        };
        prepared.resources.push(copy.clone());

        let index = with_added_extension(&copy, "bai");
        match index_files.get(idx) {
            Some(user_index) if !reconciliation.require_reheader => {
                workspace.link_copy_to(user_index, &index)?;
            }
            _ => {
                workspace.track(&index);
                let spec = tools
                    .alignment_indexer
                    .render(&Bindings::new().set_path("input", &copy));
                run_tool(
                    &spec,
                    StdoutTarget::Capture,
                    &format!("Could not index {}", source.display()),
                )?;
            }
        }
        prepared.resources.push(index);
        prepared.alignments.push(copy);
    }

    Ok(prepared)
}

fn reheader(
    source: &Path,
    header: &InputHeader,
    tools: &ToolsConfig,
    workspace: &mut Workspace,
) -> Result<PathBuf> {
    let header_file = workspace.reserve("header_", ".sam");
    fs::write(&header_file, sam::to_header_text(header))?;

    let target = workspace.reserve("input_", ".bam");
    let spec = tools.reheader.render(
        &Bindings::new()
            .set_path("header", &header_file)
            .set_path("input", source),
    );
    run_tool(
        &spec,
        StdoutTarget::File(&target),
        &format!("Could not rewrite the header of {}", source.display()),
    )?;
    workspace.release(&header_file);

    tracing::debug!("Reheadered {} -> {}", source.display(), target.display());
    Ok(target)
}

/// Create an indexed working copy of the reference genome.
pub fn prepare_reference(
    reference: &Path,
    tools: &ToolsConfig,
    workspace: &mut Workspace,
) -> Result<PathBuf> {
    let copy = workspace.link_copy(reference, "reference_", ".fa")?;
    workspace.track(with_added_extension(&copy, "fai"));

    let spec = tools
        .reference_indexer
        .render(&Bindings::new().set_path("input", &copy));
    run_tool(
        &spec,
        StdoutTarget::Capture,
        &format!("Could not index the reference genome {}", reference.display()),
    )?;
    Ok(copy)
}

/// `a/b.bam` -> `a/b.bam.bai`
fn with_added_extension(path: &Path, ext: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(".");
    name.push(ext);
    PathBuf::from(name)
}
