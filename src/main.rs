//! varcall CLI
//!
//! Parallel per-contig variant calling with samtools/bcftools-style tools.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use varcall::config::ReportingConfig;
use varcall::{plan, run_pipeline, Config};

#[derive(Parser)]
#[command(name = "varcall")]
#[command(about = "Call variants in parallel, one pipeline per contig", long_about = None)]
struct Cli {
    /// Path to configuration file (YAML or JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the number of contigs called in parallel
    #[arg(short = 'p', long, env = "VARCALL_MAX_WORKERS", global = true)]
    max_workers: Option<usize>,

    /// Log per-contig progress and captured tool output
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Call variants (default if no command specified)
    Run(InputArgs),

    /// Reconcile the inputs and show the per-contig jobs without running them
    Plan(InputArgs),

    /// Validate configuration
    Validate(InputArgs),

    /// Generate a sample configuration file
    GenerateConfig {
        /// Output path for configuration file
        #[arg(short, long, default_value = "varcall.yaml")]
        output: PathBuf,
    },
}

/// Inputs and calling options; each one overrides the configuration file.
#[derive(Args, Debug, Default)]
struct InputArgs {
    /// Reference genome (FASTA) the reads were aligned to
    reference: Option<PathBuf>,

    /// Aligned reads files (BAM)
    alignments: Vec<PathBuf>,

    /// Pre-built index file, one per aligned reads file
    #[arg(long = "index-file")]
    index_files: Vec<PathBuf>,

    /// Output file (default: standard output)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Per-input pileup depth ceiling
    #[arg(short = 'd', long)]
    max_depth: Option<u32>,

    /// Treat every read group as its own sample
    #[arg(long = "group-by-id")]
    group_by_id: bool,

    /// Match contigs by name only, ignoring MD5 checksums
    #[arg(long)]
    no_checksums: bool,

    /// Directory for temporary files
    #[arg(long)]
    temp_dir: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.command {
        None => Some(cli_config(&cli, &InputArgs::default())?),
        Some(Commands::Run(args) | Commands::Plan(args) | Commands::Validate(args)) => {
            Some(cli_config(&cli, args)?)
        }
        Some(Commands::GenerateConfig { .. }) => None,
    };

    // Logs go to stderr; stdout may carry the call set
    let reporting = config.as_ref().map_or_else(
        || ReportingConfig {
            verbose: cli.verbose,
            quiet: cli.quiet,
        },
        |c| c.reporting.clone(),
    );
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(log_filter(std::env::var(EnvFilter::DEFAULT_ENV).ok(), reporting.log_level()))
        .init();

    let invocation = std::env::args().collect::<Vec<_>>().join(" ");

    match (&cli.command, &config) {
        (Some(Commands::GenerateConfig { output }), _) => generate_config_command(output)?,
        (Some(Commands::Plan(_)), Some(config)) => plan_command(config)?,
        (Some(Commands::Validate(_)), Some(config)) => validate_command(config)?,
        (_, Some(config)) => run_command(config, &invocation)?,
        (_, None) => {}
    }

    Ok(())
}

/// `RUST_LOG` wins when it holds a usable filter; otherwise log at `level`.
fn log_filter(rust_log: Option<String>, level: tracing::Level) -> EnvFilter {
    rust_log
        .filter(|directives| !directives.trim().is_empty())
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::default().add_directive(level.into()))
}

/// Load the configuration file (if any) and apply command line overrides.
fn cli_config(cli: &Cli, args: &InputArgs) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => Config::default(),
    };

    if let Some(reference) = &args.reference {
        config.input.reference = reference.clone();
    }
    if !args.alignments.is_empty() {
        config.input.alignments = args.alignments.clone();
    }
    if !args.index_files.is_empty() {
        config.input.index_files = args.index_files.clone();
    }
    if let Some(output) = &args.output {
        config.output.path = Some(output.clone());
    }
    if let Some(depth) = args.max_depth {
        config.calling.max_depth = depth;
    }
    if args.group_by_id {
        config.calling.group_by_read_group_id = true;
    }
    if args.no_checksums {
        config.calling.use_checksums = false;
    }
    if let Some(dir) = &args.temp_dir {
        config.processing.temp_dir = Some(dir.clone());
    }
    if let Some(workers) = cli.max_workers {
        config.processing.max_workers = workers;
    }
    if cli.verbose {
        config.reporting.verbose = true;
    }
    if cli.quiet {
        config.reporting.quiet = true;
    }

    Ok(config)
}

fn run_command(config: &Config, invocation: &str) -> Result<()> {
    config.validate()?;
    run_pipeline(config, invocation)?;
    Ok(())
}

fn plan_command(config: &Config) -> Result<()> {
    let plan = plan(config)?;
    let reconciliation = &plan.reconciliation;

    println!("\n=== Variant Calling Plan ===");
    println!("Reference: {}", config.input.reference.display());
    println!("Inputs: {}", config.input.alignments.len());
    println!("Contigs: {}", plan.jobs.len());
    println!("Read groups: {}", reconciliation.all_read_groups().len());
    println!("Reheader inputs: {}", reconciliation.require_reheader);
    println!("Effective max depth: {}", reconciliation.effective_max_depth);
    println!("Parallel pipelines: {}", config.processing.max_workers);

    if !reconciliation.renamed_contigs.is_empty() {
        println!("\n--- Contigs renamed by checksum ---");
        for (from, to) in &reconciliation.renamed_contigs {
            println!("{} -> {}", from, to);
        }
    }
    if !reconciliation.renamed_samples.is_empty() {
        println!("\n--- Samples renamed ---");
        for (id, from, to) in &reconciliation.renamed_samples {
            println!("{} ({}) -> {}", from, id, to);
        }
    }

    println!("\n--- Jobs ---");
    for job in &plan.jobs {
        println!("{}: {} | {}", job.contig.name, job.producer, job.consumer);
    }
    println!("============================\n");

    Ok(())
}

fn validate_command(config: &Config) -> Result<()> {
    config.validate()?;
    for path in config
        .input
        .alignments
        .iter()
        .chain(&config.input.index_files)
        .chain(std::iter::once(&config.input.reference))
    {
        if !path.exists() {
            anyhow::bail!("Input file not found: {}", path.display());
        }
    }
    println!("Configuration is valid");
    Ok(())
}

fn generate_config_command(output: &Path) -> Result<()> {
    let yaml = r#"# varcall configuration

# === INPUT ===
input:
  # Reference genome the reads were aligned to
  reference: "genome.fa"

  # Aligned reads files; all must share one sequence dictionary
  alignments:
    - "sample1.bam"
    - "sample2.bam"

  # Optional pre-built indices, one per alignment file (in the same order).
  # Ignored when the inputs need to be reheadered.
  # index_files: ["sample1.bam.bai", "sample2.bam.bai"]

# === OUTPUT ===
output:
  # Combined call set (BCF). Omit to write to standard output.
  path: "calls.bcf"

# === CALLING ===
calling:
  # Per-input depth ceiling; multiplied by the largest number of samples
  # found in a single input
  max_depth: 250

  # Treat every read group as a separate sample, even if sample names repeat
  group_by_read_group_id: false

  # Match contigs to the reference by MD5 (M5 tags) when all contigs have one
  use_checksums: true

# === PROCESSING ===
processing:
  # Contigs called in parallel (default: number of CPUs)
  # max_workers: 8

  # Pause between two checks on the running pipelines
  poll_interval_ms: 500

  # Where the private temporary directory is created (default: system temp)
  # temp_dir: "/scratch"

  # Bytes of stderr kept per external process
  stderr_buffer_bytes: 1048576

  # Print progress during the run
  enable_metrics: true
  metrics_interval_secs: 30
  # metrics_output_path: "varcall_metrics.json"

# === TOOLS ===
# Command templates. Placeholders: {input} {inputs} {reference} {contig}
# {region} {max_depth} {header} {parts}
tools:
  pileup:
    program: samtools
    args: [mpileup, -d, "{max_depth}", -r, "{region}", -t, "DP,DPR", -gu, -f, "{reference}", "{inputs}"]
  caller:
    program: bcftools
    args: [call, -m, -A, -f, GQ, -O, b, "-"]
  concatenator:
    program: bcftools
    args: [concat, -O, b, "{header}", "{parts}"]
"#;

    std::fs::write(output, yaml)?;
    println!("Generated sample configuration at: {}", output.display());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_default() {
        // No subcommand - should default to Run
        let cli = Cli::try_parse_from(["varcall"]);
        assert!(cli.is_ok());
        assert!(cli.unwrap().command.is_none());
    }

    #[test]
    fn test_cli_parse_run_overrides() {
        let cli = Cli::try_parse_from([
            "varcall", "run", "ref.fa", "a.bam", "b.bam", "-o", "out.bcf", "--max-depth", "100",
            "--group-by-id", "--no-checksums", "--max-workers", "3",
        ])
        .unwrap();

        let Some(Commands::Run(ref args)) = cli.command else {
            panic!("expected run");
        };
        let config = cli_config(&cli, args).unwrap();
        assert_eq!(config.input.reference, PathBuf::from("ref.fa"));
        assert_eq!(config.input.alignments.len(), 2);
        assert_eq!(config.output.path, Some(PathBuf::from("out.bcf")));
        assert_eq!(config.calling.max_depth, 100);
        assert!(config.calling.group_by_read_group_id);
        assert!(!config.calling.use_checksums);
        assert_eq!(config.processing.max_workers, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_cli_verbose_conflicts_with_quiet() {
        assert!(Cli::try_parse_from(["varcall", "-v", "-q", "run"]).is_err());
    }

    #[test]
    fn test_cli_parse_validate() {
        let cli = Cli::try_parse_from(["varcall", "validate", "-c", "test.json"]);
        assert!(cli.is_ok());
    }

    #[test]
    fn test_generated_config_is_valid() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("varcall.yaml");
        generate_config_command(&path).unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.input.alignments.len(), 2);
        assert_eq!(config.tools.pileup, Config::default().tools.pileup);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_file_sets_log_level() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("quiet.yaml");
        std::fs::write(&path, "reporting:\n  quiet: true\n").unwrap();

        let cli = Cli::try_parse_from(["varcall", "-c", path.to_str().unwrap(), "plan"]).unwrap();
        let Some(Commands::Plan(ref args)) = cli.command else {
            panic!("expected plan");
        };
        let config = cli_config(&cli, args).unwrap();
        assert_eq!(config.reporting.log_level(), tracing::Level::WARN);

        let cli = Cli::try_parse_from(["varcall", "-c", path.to_str().unwrap(), "-v", "run"]).unwrap();
        let Some(Commands::Run(ref args)) = cli.command else {
            panic!("expected run");
        };
        // A CLI flag adds to the file; the combination is rejected on validation
        let config = cli_config(&cli, args).unwrap();
        assert!(config.reporting.verbose && config.reporting.quiet);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_log_filter_prefers_rust_log() {
        let filter = log_filter(Some("varcall=trace".to_string()), tracing::Level::WARN);
        assert!(filter.to_string().to_lowercase().contains("varcall=trace"));

        let filter = log_filter(None, tracing::Level::WARN);
        assert!(filter.to_string().to_lowercase().contains("warn"));

        let filter = log_filter(Some("  ".to_string()), tracing::Level::DEBUG);
        assert!(filter.to_string().to_lowercase().contains("debug"));
    }
}
