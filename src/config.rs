//! Configuration for a parallel variant calling run.

use crate::error::{Result, VarcallError};
use crate::io::ToolTemplate;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration for the variant calling pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Input configuration
    #[serde(default)]
    pub input: InputConfig,

    /// Output configuration
    #[serde(default)]
    pub output: OutputConfig,

    /// Variant calling options
    #[serde(default)]
    pub calling: CallingConfig,

    /// Scheduling and resource configuration
    #[serde(default)]
    pub processing: ProcessingConfig,

    /// External program command templates
    #[serde(default)]
    pub tools: ToolsConfig,

    /// Console reporting
    #[serde(default)]
    pub reporting: ReportingConfig,
}

/// Input data configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InputConfig {
    /// Reference genome FASTA the reads were aligned to
    #[serde(default)]
    pub reference: PathBuf,

    /// Aligned reads files (BAM)
    #[serde(default)]
    pub alignments: Vec<PathBuf>,

    /// Optional pre-built index files, one per alignment file
    #[serde(default)]
    pub index_files: Vec<PathBuf>,
}

/// Output configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Combined call set; written to standard output when unset
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Variant calling options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallingConfig {
    /// Per-input pileup depth ceiling, before scaling by sample count
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,

    /// Never pool read groups that merely share a sample name
    #[serde(default)]
    pub group_by_read_group_id: bool,

    /// Match contigs to the reference by MD5 when every contig has one
    #[serde(default = "default_true")]
    pub use_checksums: bool,
}

impl Default for CallingConfig {
    fn default() -> Self {
        Self {
            max_depth: 250,
            group_by_read_group_id: false,
            use_checksums: true,
        }
    }
}

/// Scheduling and resource configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Maximum number of per-contig pipelines running at once
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Pause between two polling cycles of the scheduler
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Directory in which the run's private workspace is created
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,

    /// Bytes of stderr kept per external process (the most recent ones)
    #[serde(default = "default_stderr_buffer_bytes")]
    pub stderr_buffer_bytes: usize,

    /// Enable periodic progress reports
    #[serde(default = "default_true")]
    pub enable_metrics: bool,

    /// Progress reporting interval in seconds
    #[serde(default = "default_metrics_interval")]
    pub metrics_interval_secs: u64,

    /// Optional path to save metrics JSON after run completes
    #[serde(default)]
    pub metrics_output_path: Option<String>,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            poll_interval_ms: default_poll_interval_ms(),
            temp_dir: None,
            stderr_buffer_bytes: default_stderr_buffer_bytes(),
            enable_metrics: true,
            metrics_interval_secs: default_metrics_interval(),
            metrics_output_path: None,
        }
    }
}

/// Command templates for every external program.
///
/// Placeholders: `{input}`, `{inputs}`, `{reference}`, `{contig}`, `{region}`,
/// `{max_depth}`, `{header}`, `{parts}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Prints the SAM header of `{input}` to stdout
    #[serde(default = "default_header_reader")]
    pub header_reader: ToolTemplate,

    /// Writes `{input}` with the SAM header from file `{header}` to stdout
    #[serde(default = "default_reheader")]
    pub reheader: ToolTemplate,

    /// Indexes alignment file `{input}` next to it
    #[serde(default = "default_alignment_indexer")]
    pub alignment_indexer: ToolTemplate,

    /// Indexes reference FASTA `{input}` next to it
    #[serde(default = "default_reference_indexer")]
    pub reference_indexer: ToolTemplate,

    /// Pileup generator; writes per-position evidence for one contig to stdout
    #[serde(default = "default_pileup")]
    pub pileup: ToolTemplate,

    /// Variant caller; reads the pileup on stdin, writes calls to stdout
    #[serde(default = "default_caller")]
    pub caller: ToolTemplate,

    /// Prints the VCF header of `{input}` to stdout
    #[serde(default = "default_vcf_header_reader")]
    pub vcf_header_reader: ToolTemplate,

    /// Concatenates `{header}` and `{parts}` to stdout
    #[serde(default = "default_concatenator")]
    pub concatenator: ToolTemplate,

    /// Header lines whose key starts with one of these are dropped on merge
    #[serde(default = "default_wrapped_tool_prefixes")]
    pub wrapped_tool_prefixes: Vec<String>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            header_reader: default_header_reader(),
            reheader: default_reheader(),
            alignment_indexer: default_alignment_indexer(),
            reference_indexer: default_reference_indexer(),
            pileup: default_pileup(),
            caller: default_caller(),
            vcf_header_reader: default_vcf_header_reader(),
            concatenator: default_concatenator(),
            wrapped_tool_prefixes: default_wrapped_tool_prefixes(),
        }
    }
}

/// Console reporting options. These never change what gets computed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportingConfig {
    #[serde(default)]
    pub verbose: bool,

    #[serde(default)]
    pub quiet: bool,
}

impl ReportingConfig {
    /// Default log level, used unless `RUST_LOG` is set.
    pub fn log_level(&self) -> tracing::Level {
        if self.verbose {
            tracing::Level::DEBUG
        } else if self.quiet {
            tracing::Level::WARN
        } else {
            tracing::Level::INFO
        }
    }
}

impl Config {
    /// Load configuration from a YAML or JSON file.
    /// Format is auto-detected from file extension (.yaml, .yml, or .json).
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        let config: Config = match ext {
            "json" => serde_json::from_str(&contents)?,
            // YAML is a superset of JSON
            _ => Self::from_yaml(&contents)?,
        };
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        if yaml.trim().is_empty() {
            return Ok(Config::default());
        }
        let config: Config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Load configuration from a JSON string.
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        Ok(config)
    }

    /// Serialize configuration to YAML.
    pub fn to_yaml(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.input.reference.as_os_str().is_empty() {
            return Err(VarcallError::validation("A reference genome is required"));
        }
        if self.input.alignments.is_empty() {
            return Err(VarcallError::validation(
                "At least one aligned reads file is required",
            ));
        }
        if !self.input.index_files.is_empty()
            && self.input.index_files.len() != self.input.alignments.len()
        {
            return Err(VarcallError::validation(format!(
                "Got {} index files for {} aligned reads files; \
                 provide one index per input or none",
                self.input.index_files.len(),
                self.input.alignments.len()
            )));
        }
        if self.calling.max_depth == 0 {
            return Err(VarcallError::validation("max_depth must be > 0"));
        }
        if self.processing.max_workers == 0 {
            return Err(VarcallError::validation("max_workers must be > 0"));
        }
        if self.processing.poll_interval_ms == 0 {
            return Err(VarcallError::validation("poll_interval_ms must be > 0"));
        }
        if self.reporting.verbose && self.reporting.quiet {
            return Err(VarcallError::validation(
                "verbose and quiet cannot both be set",
            ));
        }
        Ok(())
    }
}

// Default value functions for serde
fn default_max_depth() -> u32 { 250 }
fn default_true() -> bool { true }
fn default_max_workers() -> usize { num_cpus::get().max(1) }
fn default_poll_interval_ms() -> u64 { 500 }
fn default_stderr_buffer_bytes() -> usize { 1 << 20 }
fn default_metrics_interval() -> u64 { 30 }
fn default_header_reader() -> ToolTemplate { ToolTemplate::new("samtools", &["view", "-H", "{input}"]) }
fn default_reheader() -> ToolTemplate { ToolTemplate::new("samtools", &["reheader", "{header}", "{input}"]) }
fn default_alignment_indexer() -> ToolTemplate { ToolTemplate::new("samtools", &["index", "{input}"]) }
fn default_reference_indexer() -> ToolTemplate { ToolTemplate::new("samtools", &["faidx", "{input}"]) }
fn default_pileup() -> ToolTemplate {
    ToolTemplate::new(
        "samtools",
        &[
            "mpileup", "-d", "{max_depth}", "-r", "{region}", "-t", "DP,DPR", "-gu", "-f",
            "{reference}", "{inputs}",
        ],
    )
}
fn default_caller() -> ToolTemplate {
    ToolTemplate::new("bcftools", &["call", "-m", "-A", "-f", "GQ", "-O", "b", "-"])
}
fn default_vcf_header_reader() -> ToolTemplate { ToolTemplate::new("bcftools", &["view", "-h", "{input}"]) }
fn default_concatenator() -> ToolTemplate {
    ToolTemplate::new("bcftools", &["concat", "-O", "b", "{header}", "{parts}"])
}
fn default_wrapped_tool_prefixes() -> Vec<String> { vec!["samtools".to_string(), "bcftools".to_string()] }

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        let mut config = Config::default();
        config.input.reference = PathBuf::from("ref.fa");
        config.input.alignments = vec![PathBuf::from("a.bam"), PathBuf::from("b.bam")];
        config
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.calling.max_depth, 250);
        assert!(config.calling.use_checksums);
        assert!(!config.calling.group_by_read_group_id);
        assert!(config.processing.max_workers >= 1);
        assert!(config.output.path.is_none());
        assert_eq!(config.tools.caller.program, "bcftools");
        assert_eq!(config.tools.wrapped_tool_prefixes, vec!["samtools", "bcftools"]);
    }

    #[test]
    fn test_config_validation_ok() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_config_validation_invalid() {
        let mut config = valid_config();
        config.processing.max_workers = 0;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.input.alignments.clear();
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.input.index_files = vec![PathBuf::from("a.bam.bai")];
        assert!(config.validate().unwrap_err().is_validation());

        let mut config = valid_config();
        config.reporting.verbose = true;
        config.reporting.quiet = true;
        assert!(config.validate().is_err());

        assert!(Config::default().validate().is_err());
    }

    #[test]
    fn test_yaml_partial_uses_defaults() {
        let yaml = r#"
input:
  reference: ref.fa
  alignments: [a.bam]
calling:
  max_depth: 100
processing:
  max_workers: 3
tools:
  caller:
    program: /opt/bcftools
    args: [call, -m, -]
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.calling.max_depth, 100);
        assert!(config.calling.use_checksums);
        assert_eq!(config.processing.max_workers, 3);
        assert_eq!(config.processing.poll_interval_ms, 500);
        assert_eq!(config.tools.caller.program, "/opt/bcftools");
        assert_eq!(config.tools.pileup.program, "samtools");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_yaml_roundtrip() {
        let config = valid_config();
        let yaml = config.to_yaml().unwrap();
        let parsed = Config::from_yaml(&yaml).unwrap();
        assert_eq!(parsed.input.alignments, config.input.alignments);
        assert_eq!(parsed.tools.pileup, config.tools.pileup);
    }

    #[test]
    fn test_json_and_empty() {
        let config = Config::from_json(r#"{"output": {"path": "calls.bcf"}}"#).unwrap();
        assert_eq!(config.output.path, Some(PathBuf::from("calls.bcf")));
        assert!(Config::from_yaml("").is_ok());
    }

    #[test]
    fn test_reporting_log_level() {
        assert_eq!(ReportingConfig::default().log_level(), tracing::Level::INFO);

        let config = Config::from_yaml("reporting:\n  quiet: true\n").unwrap();
        assert_eq!(config.reporting.log_level(), tracing::Level::WARN);

        let config = Config::from_yaml("reporting:\n  verbose: true\n").unwrap();
        assert_eq!(config.reporting.log_level(), tracing::Level::DEBUG);
    }
}
