//! Header models and the text formats they are read from and written to.

pub mod fasta;
mod model;
pub mod sam;
pub mod vcf;

pub use model::{Contig, InputHeader, ReadGroup, ReferenceGenome};
pub use vcf::VcfHeader;
