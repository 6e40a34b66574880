//! Merging per-contig call sets into the final output.

use crate::config::ToolsConfig;
use crate::error::{Result, VarcallError};
use crate::header::vcf::escape_meta_string;
use crate::header::{ReadGroup, VcfHeader};
use crate::io::{run_tool, Bindings, StdoutTarget, Workspace};
use std::fs;
use std::path::{Path, PathBuf};

/// Provenance recorded in the merged header.
#[derive(Debug, Clone)]
pub struct MergeMetadata {
    /// Reference genome as given by the user
    pub reference: PathBuf,

    pub tool_name: String,
    pub tool_version: String,

    /// The command line this run was started with
    pub command_line: String,

    /// Read groups of all inputs, in input order
    pub read_groups: Vec<ReadGroup>,
}

impl MergeMetadata {
    pub fn new(reference: &Path, command_line: &str, read_groups: Vec<ReadGroup>) -> Self {
        Self {
            reference: reference.to_path_buf(),
            tool_name: env!("CARGO_PKG_NAME").to_string(),
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            command_line: command_line.to_string(),
            read_groups,
        }
    }
}

/// Rewrite a per-contig header so it describes the whole run.
///
/// Lines written by the wrapped tools are replaced by our own provenance and
/// a numbered `##rginfo` entry per read group.
pub fn build_merged_header(mut header: VcfHeader, meta: &MergeMetadata, wrapped_prefixes: &[String]) -> VcfHeader {
    let removed = header.remove_keys_with_prefix(wrapped_prefixes);
    tracing::debug!("Dropped {} header lines of wrapped tools", removed);

    let not_applicable = format!("n.a. (wrapped by {})", meta.tool_name);
    header.set("reference", &meta.reference.to_string_lossy());
    header.set(
        "source",
        &format!("{} (version {})", meta.tool_name, meta.tool_version),
    );
    header.set(&format!("{}Command", meta.tool_name), &meta.command_line);
    header.set("samtoolsCommand", &not_applicable);
    header.set("bcftools_callCommand", &not_applicable);

    header.remove("rginfo");
    for (number, rg) in meta.read_groups.iter().enumerate() {
        let mut fields = vec![
            ("ID", number.to_string()),
            ("Rgid", escape_meta_string(&rg.id)),
            ("Name", escape_meta_string(&rg.sample_name)),
        ];
        if let Some(description) = &rg.description {
            fields.push(("Description", escape_meta_string(description)));
        }
        header.push_structured("rginfo", &fields);
    }

    header
}

/// Concatenate `parts` (in the given order) behind a merged header.
///
/// Writes to `output`, or to standard output when it is `None`.
pub fn merge(
    parts: &[PathBuf],
    meta: &MergeMetadata,
    output: Option<&Path>,
    tools: &ToolsConfig,
    workspace: &mut Workspace,
) -> Result<()> {
    let first = parts
        .first()
        .ok_or_else(|| VarcallError::validation("Nothing to merge"))?;

    let spec = tools
        .vcf_header_reader
        .render(&Bindings::new().set_path("input", first));
    let raw = run_tool(&spec, StdoutTarget::Capture, "Could not read a partial call set header")?;
    let header = VcfHeader::parse(&String::from_utf8_lossy(&raw), &first.display().to_string())?;

    let header = build_merged_header(header, meta, &tools.wrapped_tool_prefixes);
    let header_path = workspace.reserve("header_", ".vcf");
    fs::write(&header_path, header.to_text())?;

    let spec = tools.concatenator.render(
        &Bindings::new()
            .set_path("header", &header_path)
            .set_list("parts", parts.iter().map(|p| p.to_string_lossy().into_owned())),
    );
    tracing::info!(
        "Merging {} partial call sets into {}",
        parts.len(),
        output.map_or_else(|| "standard output".to_string(), |p| p.display().to_string())
    );
    let failure_message = "Merging the partial call sets failed";
    match output {
        Some(path) => {
            // The user's file is only replaced once the concatenator succeeded
            let staged = workspace.reserve("merged_", ".out");
            run_tool(&spec, StdoutTarget::File(&staged), failure_message)?;
            publish(&staged, path)?;
            workspace.release(&staged);
        }
        None => {
            run_tool(&spec, StdoutTarget::Inherit, failure_message)?;
        }
    }

    workspace.release(&header_path);
    Ok(())
}

/// Move a finished file to its destination, copying across file systems.
fn publish(staged: &Path, destination: &Path) -> Result<()> {
    if fs::rename(staged, destination).is_err() {
        fs::copy(staged, destination)?;
    }
    Ok(())
}
