//! Pre-flight reconciliation of contig and sample naming across inputs.
//!
//! All checks run before any external process is launched. On success every
//! input header declares the same contig dictionary, contig names agree with
//! the reference genome, and every read group has a usable sample name.

use crate::error::{Result, VarcallError};
use crate::header::{Contig, InputHeader, ReadGroup, ReferenceGenome};
use std::collections::{BTreeMap, HashSet};

/// Options controlling reconciliation.
#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    /// Never pool read groups that merely share a sample name
    pub group_by_read_group_id: bool,

    /// Match contigs to the reference by checksum when every contig has one
    pub use_checksums: bool,

    /// Requested per-input pileup depth ceiling
    pub max_depth: u32,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            group_by_read_group_id: false,
            use_checksums: true,
            max_depth: 250,
        }
    }
}

/// Outcome of a successful reconciliation.
#[derive(Debug, Clone)]
pub struct Reconciliation {
    /// Input headers after contig and sample renaming
    pub headers: Vec<InputHeader>,

    /// Whether any header changed, so inputs need rewritten working copies
    pub require_reheader: bool,

    /// Depth ceiling scaled by the largest per-input sample count
    pub effective_max_depth: u64,

    /// Contig renames applied, as (input name, reference name)
    pub renamed_contigs: Vec<(String, String)>,

    /// Sample renames applied, as (read group id, old name, new name)
    pub renamed_samples: Vec<(String, String, String)>,
}

impl Reconciliation {
    /// Contigs in canonical order (the first input's dictionary).
    pub fn canonical_contigs(&self) -> &[Contig] {
        &self.headers[0].contigs
    }

    /// Read groups of all inputs, in input order.
    pub fn all_read_groups(&self) -> Vec<&ReadGroup> {
        self.headers.iter().flat_map(|h| h.read_groups.iter()).collect()
    }
}

/// Whether checksum-based contig matching applies to these headers.
pub fn checksums_usable(headers: &[InputHeader], use_checksums: bool) -> bool {
    use_checksums && !headers.is_empty() && headers.iter().all(InputHeader::all_checksummed)
}

/// Validate and normalize input headers against each other and the reference.
pub fn reconcile(
    mut headers: Vec<InputHeader>,
    reference: &ReferenceGenome,
    options: &ReconcileOptions,
) -> Result<Reconciliation> {
    if headers.is_empty() {
        return Err(VarcallError::validation("No input files to call variants from"));
    }

    if let Some(idx) = headers.iter().position(|h| h.contigs.is_empty()) {
        return Err(VarcallError::validation(format!(
            "Input {} has no sequence dictionary in its header; \
             this does not look like an aligned reads file",
            idx + 1
        )));
    }

    let use_checksums = checksums_usable(&headers, options.use_checksums);
    let mut renamed_contigs = Vec::new();

    if use_checksums {
        renamed_contigs = rename_by_checksum(&mut headers, reference)?;
        if let Some(idx) = first_mismatching_dictionary(&headers) {
            return Err(VarcallError::validation(format!(
                "Input {} declares a different sequence dictionary than input 1, \
                 even after matching sequences by checksum",
                idx + 1
            )));
        }
    } else {
        if let Some(idx) = first_mismatching_dictionary(&headers) {
            return Err(VarcallError::validation(format!(
                "Input {} uses a different reference sequence dictionary than input 1; \
                 cannot start combined variant calling",
                idx + 1
            )));
        }
        let mut seen = HashSet::new();
        let missing: Vec<&str> = headers
            .iter()
            .flat_map(|h| h.contigs.iter())
            .map(|c| c.name.as_str())
            .filter(|name| !reference.contains(name) && seen.insert(*name))
            .collect();
        if !missing.is_empty() {
            return Err(VarcallError::validation(format!(
                "Sequences not found in the reference genome: {}. \
                 Use the reference genome the reads were aligned to",
                missing.join(", ")
            )));
        }
    }

    let unnamed: Vec<&str> = headers
        .iter()
        .flat_map(|h| h.read_groups.iter())
        .filter(|rg| rg.sample_name.is_empty())
        .map(|rg| rg.id.as_str())
        .collect();
    if !unnamed.is_empty() {
        return Err(VarcallError::validation(format!(
            "Variant calling requires a sample name for every read group; \
             missing for read group(s): {}",
            unnamed.join(", ")
        )));
    }

    let renamed_samples = if options.group_by_read_group_id {
        uniquify_sample_names(&mut headers)
    } else {
        Vec::new()
    };

    let max_samples = headers
        .iter()
        .map(InputHeader::distinct_samples)
        .max()
        .unwrap_or(1)
        .max(1);
    let effective_max_depth = u64::from(options.max_depth) * max_samples as u64;

    let require_reheader = !renamed_contigs.is_empty() || !renamed_samples.is_empty();

    Ok(Reconciliation {
        headers,
        require_reheader,
        effective_max_depth,
        renamed_contigs,
        renamed_samples,
    })
}

fn first_mismatching_dictionary(headers: &[InputHeader]) -> Option<usize> {
    let first = &headers[0];
    headers
        .iter()
        .enumerate()
        .skip(1)
        .find(|(_, h)| !h.same_dictionary(first))
        .map(|(idx, _)| idx)
}

/// Rename every contig to the reference name carrying the same checksum.
///
/// The reference name always wins over the name declared in the input.
fn rename_by_checksum(
    headers: &mut [InputHeader],
    reference: &ReferenceGenome,
) -> Result<Vec<(String, String)>> {
    if !reference.has_checksums() {
        return Err(VarcallError::validation(
            "Reference checksums are required to match sequences by checksum",
        ));
    }

    let mut renames: Vec<(String, String)> = Vec::new();

    for header in headers.iter_mut() {
        for contig in header.contigs.iter_mut() {
            let checksum = contig.checksum.as_deref().unwrap_or_default();
            let ref_name = reference.name_for_checksum(checksum).ok_or_else(|| {
                VarcallError::validation(format!(
                    "Sequence '{}' (checksum {}) has no counterpart in the reference genome; \
                     use the reference genome the reads were aligned to",
                    contig.name, checksum
                ))
            })?;

            if ref_name != contig.name {
                let rename = (contig.name.clone(), ref_name.to_string());
                if !renames.contains(&rename) {
                    renames.push(rename);
                }
                contig.name = ref_name.to_string();
            }
        }

        let mut seen = HashSet::new();
        if let Some(dup) = header.contigs.iter().find(|c| !seen.insert(c.name.as_str())) {
            return Err(VarcallError::validation(format!(
                "Several sequences map to reference sequence '{}' by checksum",
                dup.name
            )));
        }
    }

    Ok(renames)
}

/// Make sample names unique across all read groups of all inputs.
///
/// Only read groups whose sample name is shared with another read group are
/// renamed, to `<sample>_<read group id>`. Should that still collide, the
/// 1-based input number and then a counter are appended.
fn uniquify_sample_names(headers: &mut [InputHeader]) -> Vec<(String, String, String)> {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for rg in headers.iter().flat_map(|h| h.read_groups.iter()) {
        *counts.entry(rg.sample_name.clone()).or_default() += 1;
    }

    let mut taken: HashSet<String> = counts
        .iter()
        .filter(|(_, &n)| n == 1)
        .map(|(name, _)| name.clone())
        .collect();

    let mut renames = Vec::new();
    for (input_idx, header) in headers.iter_mut().enumerate() {
        for rg in header.read_groups.iter_mut() {
            if counts[&rg.sample_name] < 2 {
                continue;
            }

            let base = format!("{}_{}", rg.sample_name, rg.id);
            let mut candidate = base.clone();
            if taken.contains(&candidate) {
                candidate = format!("{}_{}", base, input_idx + 1);
                let mut n = 2;
                while taken.contains(&candidate) {
                    candidate = format!("{}_{}_{}", base, input_idx + 1, n);
                    n += 1;
                }
            }

            taken.insert(candidate.clone());
            let old = std::mem::replace(&mut rg.sample_name, candidate.clone());
            renames.push((rg.id.clone(), old, candidate));
        }
    }

    renames
}
