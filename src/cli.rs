use std::error::Error;
use std::fs;
use std::path::PathBuf;

use clap::{Parser, error::ErrorKind};

use crate::config::{DeidConfig, IndexFailurePolicy, PathLayout};
use crate::constants::discovery::{DOCUMENT_EXTENSION, IMAGE_EXTENSION};
use crate::constants::layout::DEFAULT_KEEP_COMPONENTS;
use crate::constants::notices::MISSING_ANNOTATIONS;
use crate::pipeline::{CaseEvent, Deidentifier};
use crate::report::{CaseReport, RunReport};

#[derive(Debug, Parser)]
#[command(
    name = "deid",
    version,
    disable_help_subcommand = true,
    about = "De-identify paired DICOM image objects and AIM annotation documents",
    long_about = "Scramble SOP instance identifiers consistently across image objects and the annotation documents that reference them, scrub identifying annotation fields, and write everything to a mirrored output tree.",
    after_help = "Each case folder gets its own identifier mapping; pass --seed to reproduce a previous run."
)]
/// CLI for `deid`.
///
/// Common usage:
/// - Immediate subdirectories as cases: `deid -s /data/root -d /data/root_deid`
/// - Every `ct` directory as a case: `--case-dir-name ct`
/// - Re-root at a named directory instead of the last 7 components: `--anchor root`
struct DeidCli {
    #[arg(short, long, value_name = "DIR", help = "Source root containing case folders")]
    source: PathBuf,
    #[arg(
        short,
        long,
        value_name = "DIR",
        help = "Destination root for the mirrored output tree"
    )]
    dest: PathBuf,
    #[arg(long, help = "Deterministic run seed (random and logged when omitted)")]
    seed: Option<u64>,
    #[arg(
        long = "keep-components",
        value_name = "N",
        default_value_t = DEFAULT_KEEP_COMPONENTS,
        value_parser = parse_positive_usize,
        help = "Number of trailing source path components kept under the destination"
    )]
    keep_components: usize,
    #[arg(
        long,
        value_name = "NAME",
        conflicts_with = "keep_components",
        help = "Re-root at the last path component with this name instead of keeping N components"
    )]
    anchor: Option<String>,
    #[arg(
        long = "case-dir-name",
        value_name = "NAME",
        help = "Treat every directory with this name as a case folder (default: immediate subdirectories)"
    )]
    case_dir_name: Option<String>,
    #[arg(long = "image-ext", default_value = IMAGE_EXTENSION, help = "Image-object file extension")]
    image_extension: String,
    #[arg(
        long = "document-ext",
        default_value = DOCUMENT_EXTENSION,
        help = "Annotation-document file extension"
    )]
    document_extension: String,
    #[arg(long = "follow-links", help = "Follow symlinks while walking case folders")]
    follow_links: bool,
    #[arg(
        long = "skip-unreadable",
        help = "Skip files that fail to index instead of aborting that file kind for the case"
    )]
    skip_unreadable: bool,
    #[arg(
        long = "reject-collisions",
        help = "Fail files whose destination is already claimed by another source file"
    )]
    reject_collisions: bool,
    #[arg(long, help = "Process case folders in parallel")]
    parallel: bool,
    #[arg(long, value_name = "PATH", help = "Write a JSON run report to PATH")]
    report: Option<PathBuf>,
}

impl DeidCli {
    fn into_config(self) -> (DeidConfig, PathBuf, PathBuf, Option<PathBuf>) {
        let layout = match self.anchor {
            Some(anchor) => PathLayout::Anchor(anchor),
            None => PathLayout::KeepLast(self.keep_components),
        };
        let index_failure_policy = if self.skip_unreadable {
            IndexFailurePolicy::SkipFile
        } else {
            IndexFailurePolicy::AbortKind
        };
        let config = DeidConfig {
            seed: self.seed,
            layout,
            case_dir_name: self.case_dir_name,
            image_extension: self.image_extension,
            document_extension: self.document_extension,
            follow_links: self.follow_links,
            index_failure_policy,
            reject_collisions: self.reject_collisions,
            parallel_cases: self.parallel,
        };
        (config, self.source, self.dest, self.report)
    }
}

/// Parse `args_iter` (without the program name) and run a de-identification pass.
pub fn run_deid_cli<I>(args_iter: I) -> Result<(), Box<dyn Error>>
where
    I: Iterator<Item = String>,
{
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    let Some(cli) = parse_cli::<DeidCli, _>(std::iter::once("deid".to_string()).chain(args_iter))?
    else {
        return Ok(());
    };
    let (config, source, dest, report_path) = cli.into_config();

    let deidentifier = Deidentifier::new(config);
    let report = deidentifier.run_with_progress(&source, &dest, print_case_event)?;
    print_run_summary(&report);

    if let Some(path) = report_path {
        fs::write(&path, report.to_json()?)?;
        println!("run report written to {}", path.display());
    }
    Ok(())
}

fn print_case_event(event: CaseEvent<'_>) {
    match event {
        CaseEvent::Started { index, total, case } => {
            println!("processing case: count {} of {}", index + 1, total);
            println!("{case}");
        }
        CaseEvent::Finished { report, .. } => print_case_report(report),
    }
}

fn print_case_report(report: &CaseReport) {
    if report.missing_annotations {
        println!("  {}", capitalize(MISSING_ANNOTATIONS));
    }
    println!(
        "  images: {}/{} written | documents: {}/{} written | occurrences: {} | joined: {} ids, {} rows",
        report.images_written,
        report.images_found,
        report.documents_written,
        report.documents_found,
        report.occurrences,
        report.joined_identifiers,
        report.joined_rows
    );
    for kind in &report.aborted_kinds {
        eprintln!("  {kind:?} indexing aborted for this case");
    }
    for failure in &report.failures {
        eprintln!(
            "  failed [{:?}/{:?}] {}{}: {}",
            failure.kind,
            failure.stage,
            failure.path,
            failure
                .identifier
                .as_deref()
                .map(|id| format!(" ({id})"))
                .unwrap_or_default(),
            failure.message
        );
    }
}

fn print_run_summary(report: &RunReport) {
    println!("=== de-identification summary ===");
    println!("seed: {}", report.seed);
    println!("cases: {}", report.cases.len());
    println!("images written: {}", report.images_written());
    println!("documents written: {}", report.documents_written());
    println!("failures: {}", report.failures().count());
    if report.interrupted {
        println!("run interrupted before all case folders were processed");
    }
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn parse_positive_usize(raw: &str) -> Result<usize, String> {
    let parsed = raw.parse::<usize>().map_err(|_| {
        format!(
            "Could not parse --keep-components value '{}' as a positive integer",
            raw
        )
    })?;
    if parsed == 0 {
        return Err("--keep-components must be greater than zero".to_string());
    }
    Ok(parsed)
}

fn parse_cli<T, I>(args: I) -> Result<Option<T>, Box<dyn Error>>
where
    T: Parser,
    I: IntoIterator,
    I::Item: Into<std::ffi::OsString> + Clone,
{
    match T::try_parse_from(args) {
        Ok(cli) => Ok(Some(cli)),
        Err(err) => match err.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                err.print()?;
                Ok(None)
            }
            _ => Err(err.into()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> DeidCli {
        parse_cli::<DeidCli, _>(std::iter::once("deid").chain(args.iter().copied()))
            .unwrap()
            .unwrap()
    }

    #[test]
    fn defaults_match_the_library_config() {
        let (config, source, dest, report) = parse(&["-s", "/in", "-d", "/out"]).into_config();
        assert_eq!(source, PathBuf::from("/in"));
        assert_eq!(dest, PathBuf::from("/out"));
        assert!(report.is_none());
        assert_eq!(config.layout, PathLayout::KeepLast(DEFAULT_KEEP_COMPONENTS));
        assert_eq!(config.index_failure_policy, IndexFailurePolicy::AbortKind);
        assert_eq!(config.image_extension, "dcm");
        assert_eq!(config.document_extension, "xml");
        assert!(config.seed.is_none());
    }

    #[test]
    fn flags_map_onto_config_fields() {
        let (config, _, _, report) = parse(&[
            "--source",
            "/in",
            "--dest",
            "/out",
            "--seed",
            "7",
            "--anchor",
            "root",
            "--case-dir-name",
            "ct",
            "--skip-unreadable",
            "--reject-collisions",
            "--parallel",
            "--report",
            "/tmp/report.json",
        ])
        .into_config();
        assert_eq!(config.seed, Some(7));
        assert_eq!(config.layout, PathLayout::Anchor("root".to_string()));
        assert_eq!(config.case_dir_name.as_deref(), Some("ct"));
        assert_eq!(config.index_failure_policy, IndexFailurePolicy::SkipFile);
        assert!(config.reject_collisions);
        assert!(config.parallel_cases);
        assert_eq!(report, Some(PathBuf::from("/tmp/report.json")));
    }

    #[test]
    fn zero_keep_components_is_rejected() {
        let result = parse_cli::<DeidCli, _>(
            ["deid", "-s", "/in", "-d", "/out", "--keep-components", "0"].into_iter(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn anchor_conflicts_with_explicit_keep_components() {
        let result = parse_cli::<DeidCli, _>(
            [
                "deid",
                "-s",
                "/in",
                "-d",
                "/out",
                "--keep-components",
                "5",
                "--anchor",
                "root",
            ]
            .into_iter(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn help_returns_none() {
        let result = parse_cli::<DeidCli, _>(["deid", "--help"].into_iter()).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn notices_are_capitalized_for_display() {
        assert_eq!(capitalize(MISSING_ANNOTATIONS), "No annotation document found");
        assert_eq!(capitalize(""), "");
    }
}
