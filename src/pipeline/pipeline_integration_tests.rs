//! End-to-end runs with shell stand-ins for the external tools.
//!
//! "Aligned reads files" are text files: SAM header lines followed by a body.
//! The stand-in producer checks that every working copy is indexed and
//! declares the contig, then emits one record `<contig>\t<max_depth>`; the
//! stand-in caller prepends a minimal VCF header.

#![cfg(unix)]

use crate::config::{Config, ToolsConfig};
use crate::error::VarcallError;
use crate::io::ToolTemplate;
use crate::{plan, run_pipeline};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const MD5_ACGT: &str = "f1f8f4bf413b16ad135722aa4591043e";
const MD5_GGCC: &str = "1ab520b9a89ee12d10dfc2391db04ff4";

const PRODUCER: &str = "for f in {inputs}; do \
    test -f \"$f.bai\" || exit 3; \
    grep -q \"^@SQ.SN:{contig}\" \"$f\" || exit 4; \
    done; printf '{contig}\\t{max_depth}\\n'";

const CALLER: &str = "printf '##fileformat=VCFv4.2\\n##bcftools_callCommand=call -m\\n#CHROM\\tPOS\\n'; cat";

fn sh(script: &str) -> ToolTemplate {
    ToolTemplate::new("sh", &["-c", script])
}

fn stub_tools() -> ToolsConfig {
    ToolsConfig {
        header_reader: sh("grep '^@' {input}"),
        reheader: sh("cat {header}; grep -v '^@' {input}"),
        alignment_indexer: sh("touch {input}.bai"),
        reference_indexer: sh("touch {input}.fai"),
        pileup: sh(PRODUCER),
        caller: sh(CALLER),
        vcf_header_reader: sh("grep '^#' {input}"),
        concatenator: ToolTemplate::new(
            "sh",
            &[
                "-c",
                "cat \"$0\"; for f in \"$@\"; do grep -v '^#' \"$f\"; done",
                "{header}",
                "{parts}",
            ],
        ),
        ..ToolsConfig::default()
    }
}

struct Fixture {
    dir: TempDir,
    scratch: PathBuf,
    config: Config,
}

impl Fixture {
    fn new(reference: &[(&str, &str)], inputs: &[&str]) -> Self {
        let dir = TempDir::new().unwrap();
        let scratch = dir.path().join("scratch");
        fs::create_dir(&scratch).unwrap();

        let fasta = dir.path().join("ref.fa");
        let mut text = String::new();
        for (name, seq) in reference {
            text.push_str(&format!(">{}\n{}\n", name, seq));
        }
        fs::write(&fasta, text).unwrap();

        let alignments = inputs
            .iter()
            .enumerate()
            .map(|(idx, header)| {
                let path = dir.path().join(format!("input{}.bam", idx + 1));
                fs::write(&path, format!("{}BODY {}\n", header, idx + 1)).unwrap();
                path
            })
            .collect();

        let mut config = Config::default();
        config.input.reference = fasta;
        config.input.alignments = alignments;
        config.output.path = Some(dir.path().join("calls.vcf"));
        config.processing.max_workers = 2;
        config.processing.poll_interval_ms = 10;
        config.processing.temp_dir = Some(scratch.clone());
        config.processing.enable_metrics = false;
        config.tools = stub_tools();

        Self {
            dir,
            scratch,
            config,
        }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn output(&self) -> String {
        fs::read_to_string(self.config.output.path.as_ref().unwrap()).unwrap()
    }

    fn records(&self) -> Vec<String> {
        self.output()
            .lines()
            .filter(|l| !l.starts_with('#'))
            .map(str::to_string)
            .collect()
    }

    fn rginfo(&self) -> Vec<String> {
        self.output()
            .lines()
            .filter(|l| l.starts_with("##rginfo="))
            .map(str::to_string)
            .collect()
    }

    fn assert_no_leftovers(&self) {
        let left: Vec<_> = fs::read_dir(&self.scratch).unwrap().collect();
        assert!(left.is_empty(), "temporary files left behind: {:?}", left);
    }
}

fn script_with(script: &str, marker: &Path) -> ToolTemplate {
    sh(&script.replace("@MARKER@", &marker.to_string_lossy()))
}

#[test]
fn test_two_inputs_same_sample_not_reheadered() {
    let header = "@HD\tVN:1.6\n@SQ\tSN:chr1\tLN:1000\n@RG\tID:1\tSM:S1\n";
    let fx = Fixture::new(&[("chr1", "ACGT")], &[header, header]);

    let stats = run_pipeline(&fx.config, "varcall run").unwrap();

    assert!(!stats.reheadered);
    assert_eq!(stats.contigs, 1);
    assert_eq!(stats.schedule.launch_order, vec!["chr1"]);
    assert_eq!(fx.records(), vec!["chr1\t250"]);
    assert_eq!(
        fx.rginfo(),
        vec![
            "##rginfo=<ID=0,Rgid=\"1\",Name=\"S1\">",
            "##rginfo=<ID=1,Rgid=\"1\",Name=\"S1\">",
        ]
    );

    let output = fx.output();
    assert!(output.starts_with("##fileformat=VCFv4.2\n"));
    assert!(output.contains("##varcallCommand=varcall run\n"));
    assert!(output.contains("##bcftools_callCommand=n.a. (wrapped by varcall)\n"));
    assert!(!output.contains("call -m"));
    fx.assert_no_leftovers();
}

#[test]
fn test_bounded_concurrency_one_job_per_contig() {
    let header = "@SQ\tSN:c1\tLN:4\n@SQ\tSN:c2\tLN:4\n@SQ\tSN:c3\tLN:4\n\
                  @SQ\tSN:c4\tLN:4\n@SQ\tSN:c5\tLN:4\n@RG\tID:a\tSM:S1\n";
    let reference: Vec<(&str, &str)> = ["c1", "c2", "c3", "c4", "c5"]
        .iter()
        .map(|name| (*name, "ACGT"))
        .collect();
    let mut fx = Fixture::new(&reference, &[header, header, header]);

    let probe = fx.path("probe");
    fs::create_dir(&probe).unwrap();
    let counts = fx.path("counts");
    let producer = format!(
        "touch {probe}/{{contig}}; ls {probe} | wc -l >> {counts}; sleep 0.2; \
         rm {probe}/{{contig}}; printf '{{contig}}\\n'",
        probe = probe.display(),
        counts = counts.display()
    );
    fx.config.tools.pileup = sh(&producer);

    let stats = run_pipeline(&fx.config, "varcall").unwrap();

    assert_eq!(stats.schedule.launch_order, vec!["c1", "c2", "c3", "c4", "c5"]);
    assert_eq!(stats.schedule.completion_order.len(), 5);
    assert!(stats.schedule.peak_running <= 2);
    assert_eq!(stats.metrics.jobs_succeeded, 5);

    let observed: Vec<usize> = fs::read_to_string(&counts)
        .unwrap()
        .lines()
        .map(|l| l.trim().parse().unwrap())
        .collect();
    assert_eq!(observed.len(), 5);
    assert!(observed.iter().all(|&n| (1..=2).contains(&n)), "{:?}", observed);

    assert_eq!(fx.records(), vec!["c1", "c2", "c3", "c4", "c5"]);
    fx.assert_no_leftovers();
}

#[test]
fn test_merge_order_independent_of_completion_order() {
    let header = "@SQ\tSN:chr2\tLN:4\n@SQ\tSN:chr1\tLN:4\n@RG\tID:a\tSM:S1\n";
    let mut fx = Fixture::new(&[("chr1", "ACGT"), ("chr2", "ACGT")], &[header]);
    fx.config.tools.pileup = sh("if [ {contig} = chr2 ]; then sleep 0.5; fi; printf '{contig}\\n'");

    let stats = run_pipeline(&fx.config, "varcall").unwrap();

    assert_eq!(stats.schedule.launch_order, vec!["chr2", "chr1"]);
    assert_eq!(stats.schedule.completion_order, vec!["chr1", "chr2"]);
    assert_eq!(fx.records(), vec!["chr2", "chr1"]);
}

#[test]
fn test_failing_consumer_aborts_batch() {
    let header = "@SQ\tSN:chr1\tLN:4\n@SQ\tSN:chr2\tLN:4\n@SQ\tSN:chr3\tLN:4\n\
                  @SQ\tSN:chr4\tLN:4\n@RG\tID:a\tSM:S1\n";
    let reference: Vec<(&str, &str)> = ["chr1", "chr2", "chr3", "chr4"]
        .iter()
        .map(|name| (*name, "ACGT"))
        .collect();
    let mut fx = Fixture::new(&reference, &[header]);

    let merged_marker = fx.path("merged");
    fx.config.tools.caller =
        sh("cat > /dev/null; if [ {contig} = chr3 ]; then echo 'caller: bad input' >&2; exit 1; fi");
    fx.config.tools.concatenator = script_with("touch @MARKER@", &merged_marker);
    // chr4 would otherwise outlive the failure
    fx.config.tools.pileup = sh("if [ {contig} = chr4 ]; then exec sleep 30; fi; printf '{contig}\\n'");

    let started = std::time::Instant::now();
    let err = run_pipeline(&fx.config, "varcall").unwrap_err();

    assert_eq!(err.failed_contig(), Some("chr3"));
    match &err {
        VarcallError::ExternalTool { command, stderr, .. } => {
            assert!(command.contains(" | "));
            assert!(stderr.contains("caller: bad input"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(started.elapsed() < std::time::Duration::from_secs(20));
    assert!(!merged_marker.exists());
    assert!(!fx.config.output.path.as_ref().unwrap().exists());
    fx.assert_no_leftovers();
}

#[test]
fn test_failing_producer_aborts_batch() {
    let header = "@SQ\tSN:chr1\tLN:4\n@SQ\tSN:chr2\tLN:4\n@SQ\tSN:chr3\tLN:4\n@RG\tID:a\tSM:S1\n";
    let reference: Vec<(&str, &str)> = ["chr1", "chr2", "chr3"]
        .iter()
        .map(|name| (*name, "ACGT"))
        .collect();
    let mut fx = Fixture::new(&reference, &[header]);

    let merged_marker = fx.path("merged");
    fx.config.tools.concatenator = script_with("touch @MARKER@", &merged_marker);
    // The caller reaches end of input and exits 0; only the producer fails
    fx.config.tools.pileup = sh(
        "if [ {contig} = chr2 ]; then echo 'pileup: truncated file' >&2; exit 5; fi; printf '{contig}\\n'",
    );

    let err = run_pipeline(&fx.config, "varcall").unwrap_err();

    assert_eq!(err.failed_contig(), Some("chr2"));
    match &err {
        VarcallError::ExternalTool { message, stderr, .. } => {
            assert!(message.contains("producer exited with exit status: 5"), "{message}");
            assert!(stderr.contains("pileup: truncated file"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!merged_marker.exists());
    assert!(!fx.config.output.path.as_ref().unwrap().exists());
    fx.assert_no_leftovers();
}

#[test]
fn test_producer_killed_by_signal_aborts_batch() {
    let header = "@SQ\tSN:chr1\tLN:4\n@RG\tID:a\tSM:S1\n";
    let mut fx = Fixture::new(&[("chr1", "ACGT")], &[header]);

    let merged_marker = fx.path("merged");
    fx.config.tools.concatenator = script_with("touch @MARKER@", &merged_marker);
    fx.config.tools.pileup = sh("kill -9 $$");

    let err = run_pipeline(&fx.config, "varcall").unwrap_err();

    assert_eq!(err.failed_contig(), Some("chr1"));
    match &err {
        VarcallError::ExternalTool { message, .. } => {
            assert!(message.contains("producer exited with signal"), "{message}");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!merged_marker.exists());
    assert!(!fx.config.output.path.as_ref().unwrap().exists());
    fx.assert_no_leftovers();
}

#[test]
fn test_empty_dictionary_spawns_nothing() {
    let mut fx = Fixture::new(&[("chr1", "ACGT")], &["@RG\tID:a\tSM:S1\n"]);
    let marker = fx.path("spawned");
    fx.config.tools.pileup = script_with("touch @MARKER@", &marker);

    let err = run_pipeline(&fx.config, "varcall").unwrap_err();

    assert!(err.is_validation());
    assert!(!marker.exists());
    fx.assert_no_leftovers();
}

#[test]
fn test_differing_dictionaries_rejected() {
    let mut fx = Fixture::new(
        &[("chr1", "ACGT"), ("chr2", "ACGT")],
        &[
            "@SQ\tSN:chr1\tLN:4\n@RG\tID:a\tSM:S1\n",
            "@SQ\tSN:chr2\tLN:4\n@RG\tID:b\tSM:S2\n",
        ],
    );
    let marker = fx.path("spawned");
    fx.config.tools.pileup = script_with("touch @MARKER@", &marker);

    let err = run_pipeline(&fx.config, "varcall").unwrap_err();

    assert!(err.is_validation());
    assert!(!marker.exists());
}

#[test]
fn test_checksum_rename_reheaders_inputs() {
    let header = format!(
        "@SQ\tSN:chrI\tLN:4\tM5:{}\n@SQ\tSN:chrII\tLN:4\tM5:{}\n@RG\tID:a\tSM:S1\n",
        MD5_ACGT, MD5_GGCC
    );
    let fx = Fixture::new(&[("I", "ACGT"), ("II", "GGCC")], &[header.as_str(), header.as_str()]);

    let stats = run_pipeline(&fx.config, "varcall").unwrap();

    assert!(stats.reheadered);
    assert_eq!(stats.schedule.launch_order, vec!["I", "II"]);
    assert_eq!(fx.records(), vec!["I\t250", "II\t250"]);

    // Inputs are never modified
    let original = fs::read_to_string(&fx.config.input.alignments[0]).unwrap();
    assert!(original.contains("SN:chrI\t"));
    fx.assert_no_leftovers();
}

#[test]
fn test_group_by_id_yields_distinct_samples() {
    let fx_headers = [
        "@SQ\tSN:chr1\tLN:4\n@RG\tID:lane1\tSM:S1\n",
        "@SQ\tSN:chr1\tLN:4\n@RG\tID:lane2\tSM:S1\n",
    ];
    let mut fx = Fixture::new(&[("chr1", "ACGT")], &fx_headers);
    fx.config.calling.group_by_read_group_id = true;

    let stats = run_pipeline(&fx.config, "varcall").unwrap();

    assert!(stats.reheadered);
    assert_eq!(
        fx.rginfo(),
        vec![
            "##rginfo=<ID=0,Rgid=\"lane1\",Name=\"S1_lane1\">",
            "##rginfo=<ID=1,Rgid=\"lane2\",Name=\"S1_lane2\">",
        ]
    );
}

#[test]
fn test_depth_scales_with_samples_per_input() {
    let fx = Fixture::new(
        &[("chr1", "ACGT")],
        &["@SQ\tSN:chr1\tLN:4\n@RG\tID:a\tSM:S1\n@RG\tID:b\tSM:S2\n@RG\tID:c\tSM:S3\n@RG\tID:d\tSM:S3\n"],
    );

    let stats = run_pipeline(&fx.config, "varcall").unwrap();

    assert_eq!(stats.effective_max_depth, 750);
    assert_eq!(fx.records(), vec!["chr1\t750"]);
}

#[test]
fn test_repeated_runs_produce_identical_metadata() {
    let header = "@SQ\tSN:chr1\tLN:4\n@SQ\tSN:chr2\tLN:4\n@RG\tID:a\tSM:S1\tDS:first lane\n";
    let mut fx = Fixture::new(&[("chr1", "ACGT"), ("chr2", "ACGT")], &[header, header]);

    run_pipeline(&fx.config, "varcall run").unwrap();
    let first = fx.output();
    fx.assert_no_leftovers();

    fx.config.output.path = Some(fx.path("calls2.vcf"));
    run_pipeline(&fx.config, "varcall run").unwrap();
    let second = fx.output();
    fx.assert_no_leftovers();

    assert_eq!(first, second);
    assert!(first.contains("Description=\"first lane\""));
}

#[test]
fn test_plan_runs_no_pipeline() {
    let header = "@SQ\tSN:chr1\tLN:4\n@SQ\tSN:chr2\tLN:4\n@RG\tID:a\tSM:S1\n";
    let mut fx = Fixture::new(&[("chr1", "ACGT"), ("chr2", "ACGT")], &[header]);
    let marker = fx.path("spawned");
    fx.config.tools.pileup = script_with("touch @MARKER@", &marker);

    let plan = plan(&fx.config).unwrap();

    let names: Vec<&str> = plan.jobs.iter().map(|j| j.contig.name.as_str()).collect();
    assert_eq!(names, vec!["chr1", "chr2"]);
    assert!(!marker.exists());
    fx.assert_no_leftovers();
}
