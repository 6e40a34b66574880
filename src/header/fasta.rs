//! Reference FASTA scanning: sequence identifiers, lengths and MD5 checksums.

use super::model::ReferenceGenome;
use crate::error::{Result, VarcallError};
use md5::{Digest, Md5};
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

/// Characters that may not appear in a contig identifier written to VCF.
const INVALID_ID_CHARS: &[char] = &[',', '<', '>', '=', '"'];

/// Scan a reference FASTA file.
///
/// Checksums follow the SAM `M5` convention (MD5 of the upper-cased sequence
/// with all whitespace removed) and are only computed when `with_checksums`
/// is set, since that requires hashing the whole genome.
pub fn scan_reference(path: &Path, with_checksums: bool) -> Result<ReferenceGenome> {
    let file = File::open(path)?;
    let origin = path.display().to_string();
    let mut genome = scan_reader(BufReader::new(file), &origin, with_checksums)?;
    genome.path = path.to_path_buf();
    Ok(genome)
}

/// Scan FASTA content from any reader.
pub fn scan_reader<R: Read>(reader: R, origin: &str, with_checksums: bool) -> Result<ReferenceGenome> {
    let mut genome = ReferenceGenome::default();
    let mut current: Option<SequenceState> = None;

    for (line_no, line) in BufReader::new(reader).lines().enumerate() {
        let line = line?;
        let line = line.trim_end();

        if let Some(title) = line.strip_prefix('>') {
            if let Some(done) = current.take() {
                done.finish(&mut genome, with_checksums);
            }
            let id = title.split_whitespace().next().unwrap_or_default();
            validate_identifier(id, origin, line_no + 1)?;
            if genome.contig_lengths.contains_key(id) {
                return Err(VarcallError::format(
                    origin,
                    format!("line {}: duplicate sequence identifier '{}'", line_no + 1, id),
                ));
            }
            // Reserve the name so duplicates are caught before the sequence ends
            genome.contig_lengths.insert(id.to_string(), 0);
            genome.contig_names.push(id.to_string());
            current = Some(SequenceState::new(id));
        } else if !line.is_empty() {
            let seq = current.as_mut().ok_or_else(|| {
                VarcallError::format(
                    origin,
                    format!("line {}: sequence data before first '>' title", line_no + 1),
                )
            })?;
            seq.push(line, with_checksums);
        }
    }

    if let Some(done) = current.take() {
        done.finish(&mut genome, with_checksums);
    }

    if genome.contig_names.is_empty() {
        return Err(VarcallError::format(origin, "no sequences found"));
    }

    Ok(genome)
}

/// Check that a sequence identifier can be used as a VCF contig ID.
pub fn validate_identifier(id: &str, origin: &str, line_no: usize) -> Result<()> {
    if id.is_empty() {
        return Err(VarcallError::format(
            origin,
            format!("line {}: empty sequence identifier", line_no),
        ));
    }
    if let Some(bad) = id.chars().find(|c| INVALID_ID_CHARS.contains(c) || c.is_whitespace()) {
        return Err(VarcallError::format(
            origin,
            format!(
                "line {}: sequence identifier '{}' contains '{}', which is not allowed in VCF contig names",
                line_no, id, bad
            ),
        ));
    }
    Ok(())
}

struct SequenceState {
    name: String,
    length: u64,
    hasher: Md5,
}

impl SequenceState {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            length: 0,
            hasher: Md5::new(),
        }
    }

    fn push(&mut self, line: &str, with_checksums: bool) {
        let bases: Vec<u8> = line
            .bytes()
            .filter(|b| !b.is_ascii_whitespace())
            .map(|b| b.to_ascii_uppercase())
            .collect();
        self.length += bases.len() as u64;
        if with_checksums {
            self.hasher.update(&bases);
        }
    }

    fn finish(self, genome: &mut ReferenceGenome, with_checksums: bool) {
        if with_checksums {
            let digest = format!("{:x}", self.hasher.finalize());
            genome.contig_checksums.insert(digest, self.name.clone());
        }
        genome.contig_lengths.insert(self.name, self.length);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FASTA: &str = ">I description text\nACGT\nacgt\n>II\nNNNN\n";

    #[test]
    fn test_scan_names_and_lengths() {
        let genome = scan_reader(FASTA.as_bytes(), "ref.fa", false).unwrap();
        assert_eq!(genome.contig_names, vec!["I", "II"]);
        assert_eq!(genome.contig_lengths["I"], 8);
        assert_eq!(genome.contig_lengths["II"], 4);
        assert!(!genome.has_checksums());
    }

    #[test]
    fn test_checksums_are_case_insensitive() {
        let upper = scan_reader(">a\nACGTACGT\n".as_bytes(), "x", true).unwrap();
        let mixed = scan_reader(">b\nACGT\nacgt\n".as_bytes(), "x", true).unwrap();
        let (sum, name) = upper.contig_checksums.iter().next().unwrap();
        assert_eq!(name, "a");
        assert_eq!(mixed.name_for_checksum(sum), Some("b"));
        assert_eq!(sum.len(), 32);
    }

    #[test]
    fn test_known_md5() {
        // md5("ACGT")
        let genome = scan_reader(">x\nACGT\n".as_bytes(), "x", true).unwrap();
        assert_eq!(
            genome.name_for_checksum("f1f8f4bf413b16ad135722aa4591043e"),
            Some("x")
        );
    }

    #[test]
    fn test_invalid_identifier() {
        let err = scan_reader(">chr1,alt\nACGT\n".as_bytes(), "ref.fa", false).unwrap_err();
        assert!(matches!(err, VarcallError::FormatParse { .. }));
    }

    #[test]
    fn test_duplicate_identifier() {
        assert!(scan_reader(">a\nAC\n>a\nGT\n".as_bytes(), "x", false).is_err());
    }

    #[test]
    fn test_data_before_title() {
        assert!(scan_reader("ACGT\n>a\nAC\n".as_bytes(), "x", false).is_err());
        assert!(scan_reader("".as_bytes(), "x", false).is_err());
    }
}
