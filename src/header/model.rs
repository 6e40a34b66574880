//! In-memory header records shared by reconciliation, job building and merging.

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;

/// A named reference sequence as declared in an alignment header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contig {
    /// Sequence name (SAM `SN`), the join key across inputs
    pub name: String,

    /// Sequence length (SAM `LN`)
    pub length: u64,

    /// Content checksum (SAM `M5`), lowercase hex
    pub checksum: Option<String>,

    /// Any other `@SQ` tags, preserved for reheadering
    pub other_tags: Vec<(String, String)>,
}

impl Contig {
    pub fn new(name: impl Into<String>, length: u64) -> Self {
        Self {
            name: name.into(),
            length,
            checksum: None,
            other_tags: Vec::new(),
        }
    }

    pub fn with_checksum(mut self, checksum: impl Into<String>) -> Self {
        self.checksum = Some(checksum.into().to_ascii_lowercase());
        self
    }
}

/// A read group as declared in an alignment header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadGroup {
    /// Read group identifier (SAM `ID`), unique only within its source file
    pub id: String,

    /// Sample name (SAM `SM`); empty when the header does not declare one
    pub sample_name: String,

    /// Free-text description (SAM `DS`)
    pub description: Option<String>,

    /// Any other `@RG` tags, preserved for reheadering
    pub other_tags: Vec<(String, String)>,
}

impl ReadGroup {
    pub fn new(id: impl Into<String>, sample_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            sample_name: sample_name.into(),
            description: None,
            other_tags: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Contig dictionary and read groups of one input file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InputHeader {
    /// Contigs in declaration order
    pub contigs: Vec<Contig>,

    pub read_groups: Vec<ReadGroup>,

    /// `@HD` line, kept verbatim
    pub hd_line: Option<String>,

    /// `@PG`, `@CO` and unrecognised lines, kept verbatim and in order
    pub other_lines: Vec<String>,
}

impl InputHeader {
    pub fn new(contigs: Vec<Contig>, read_groups: Vec<ReadGroup>) -> Self {
        Self {
            contigs,
            read_groups,
            hd_line: None,
            other_lines: Vec::new(),
        }
    }

    /// Contig names in declaration order.
    pub fn contig_names(&self) -> Vec<&str> {
        self.contigs.iter().map(|c| c.name.as_str()).collect()
    }

    /// Number of distinct sample names among this input's read groups.
    pub fn distinct_samples(&self) -> usize {
        self.read_groups
            .iter()
            .map(|rg| rg.sample_name.as_str())
            .collect::<BTreeSet<_>>()
            .len()
    }

    /// Whether every contig carries a checksum.
    pub fn all_checksummed(&self) -> bool {
        self.contigs.iter().all(|c| c.checksum.is_some())
    }

    /// Compare contig dictionaries by name and length only.
    pub fn same_dictionary(&self, other: &InputHeader) -> bool {
        self.contigs.len() == other.contigs.len()
            && self
                .contigs
                .iter()
                .zip(&other.contigs)
                .all(|(a, b)| a.name == b.name && a.length == b.length)
    }
}

/// The reference genome the inputs were aligned against.
#[derive(Debug, Clone, Default)]
pub struct ReferenceGenome {
    /// Path of the reference FASTA as given by the user
    pub path: PathBuf,

    /// Sequence identifiers in file order
    pub contig_names: Vec<String>,

    /// Sequence lengths keyed by identifier
    pub contig_lengths: HashMap<String, u64>,

    /// Sequence checksum to identifier; empty unless checksums were computed
    pub contig_checksums: HashMap<String, String>,
}

impl ReferenceGenome {
    pub fn contains(&self, name: &str) -> bool {
        self.contig_lengths.contains_key(name)
    }

    /// Reference name of the sequence with this checksum.
    pub fn name_for_checksum(&self, checksum: &str) -> Option<&str> {
        self.contig_checksums.get(checksum).map(String::as_str)
    }

    pub fn has_checksums(&self) -> bool {
        !self.contig_checksums.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distinct_samples() {
        let header = InputHeader::new(
            vec![Contig::new("chr1", 100)],
            vec![
                ReadGroup::new("a", "S1"),
                ReadGroup::new("b", "S1"),
                ReadGroup::new("c", "S2"),
            ],
        );
        assert_eq!(header.distinct_samples(), 2);
    }

    #[test]
    fn test_same_dictionary_ignores_checksums() {
        let a = InputHeader::new(vec![Contig::new("chr1", 100).with_checksum("AB")], vec![]);
        let b = InputHeader::new(vec![Contig::new("chr1", 100)], vec![]);
        let c = InputHeader::new(vec![Contig::new("chr1", 101)], vec![]);
        assert!(a.same_dictionary(&b));
        assert!(!a.same_dictionary(&c));
        assert_eq!(a.contigs[0].checksum.as_deref(), Some("ab"));
    }

    #[test]
    fn test_all_checksummed() {
        let header = InputHeader::new(
            vec![Contig::new("chr1", 1).with_checksum("aa"), Contig::new("chr2", 1)],
            vec![],
        );
        assert!(!header.all_checksummed());
    }
}
