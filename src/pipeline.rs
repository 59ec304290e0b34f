//! Per-case de-identification pass and the run driver.
//!
//! Each case folder goes through `ENUMERATE -> INDEX -> JOIN -> MUTATE ->
//! MAP_PATHS -> REWRITE_IMAGES -> REWRITE_DOCS -> DONE` exactly once. Indices,
//! the correspondence table, and the mutation map are owned by the pass and
//! dropped with it, so no identifier mapping crosses case folders.

use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use rand::Rng;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::DeidConfig;
use crate::constants::notices::{FILE_FAILURE_MSG, MISSING_ANNOTATIONS};
use crate::errors::DeidError;
use crate::image::{DicomCodec, ImageCodec};
use crate::index::{DocumentRefs, ImageRef, index_documents, index_images};
use crate::join::CorrespondenceTable;
use crate::layout::DestinationLedger;
use crate::mutation::{MutationMap, case_seed};
use crate::report::{CaseReport, FileFailure, FileKind, RunReport};
use crate::rewrite::{rewrite_annotation, rewrite_image};
use crate::transport::fs::FileEnumerator;
use crate::types::CaseId;

/// States of a case folder pass, in execution order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum PassStage {
    /// List image objects and annotation documents in the case folder.
    Enumerate,
    /// Build both identifier index tables.
    Index,
    /// Inner-join the indices on identifier.
    Join,
    /// Build the mutation map from the union of identifiers.
    Mutate,
    /// Compute and claim destination paths.
    MapPaths,
    /// Write de-identified image objects.
    RewriteImages,
    /// Write scrubbed annotation documents.
    RewriteDocs,
    /// Pass finished.
    Done,
}

/// Progress notification emitted by [`Deidentifier::run_with_progress`].
#[derive(Clone, Copy, Debug)]
pub enum CaseEvent<'a> {
    /// A case folder pass is starting.
    Started {
        /// Zero-based case position.
        index: usize,
        /// Number of case folders in the run.
        total: usize,
        /// Case folder relative to the source root.
        case: &'a str,
    },
    /// A case folder pass finished.
    Finished {
        /// Zero-based case position.
        index: usize,
        /// Number of case folders in the run.
        total: usize,
        /// Outcome of the pass.
        report: &'a CaseReport,
    },
}

/// Tracks the current stage and records visited stages into the case report.
struct CasePass {
    stage: PassStage,
    report: CaseReport,
}

impl CasePass {
    fn new(case: CaseId) -> Self {
        Self {
            stage: PassStage::Enumerate,
            report: CaseReport {
                case,
                stages: vec![PassStage::Enumerate],
                ..CaseReport::default()
            },
        }
    }

    fn advance(&mut self, next: PassStage) {
        debug_assert!(next > self.stage, "{next:?} does not follow {:?}", self.stage);
        debug!(case = %self.report.case, from = ?self.stage, to = ?next, "stage");
        self.stage = next;
        self.report.stages.push(next);
    }

    fn fail(
        &mut self,
        kind: FileKind,
        path: &Path,
        identifier: Option<&str>,
        error: &DeidError,
    ) {
        warn!(
            case = %self.report.case,
            stage = ?self.stage,
            path = %path.display(),
            identifier = identifier.unwrap_or(""),
            error = %error,
            "{}",
            FILE_FAILURE_MSG
        );
        self.report
            .failures
            .push(FileFailure::new(kind, self.stage, path, identifier, error));
    }
}

/// De-identification driver: configuration, image codec, and abort checkpoint.
pub struct Deidentifier {
    config: DeidConfig,
    codec: Box<dyn ImageCodec>,
    abort: Option<Arc<AtomicBool>>,
}

impl Deidentifier {
    /// Create a driver using the DICOM codec.
    pub fn new(config: DeidConfig) -> Self {
        Self::with_codec(config, DicomCodec)
    }

    /// Create a driver using a custom image codec.
    pub fn with_codec(config: DeidConfig, codec: impl ImageCodec + 'static) -> Self {
        Self {
            config,
            codec: Box::new(codec),
            abort: None,
        }
    }

    /// Check `flag` before each case folder; once set, remaining folders are skipped.
    pub fn with_abort_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.abort = Some(flag);
        self
    }

    /// Active configuration.
    pub fn config(&self) -> &DeidConfig {
        &self.config
    }

    /// De-identify every case folder under `source_root` into `dest_root`.
    pub fn run(&self, source_root: &Path, dest_root: &Path) -> Result<RunReport, DeidError> {
        self.run_with_progress(source_root, dest_root, |_| {})
    }

    /// Like [`Deidentifier::run`], reporting case start/finish to `on_event`.
    pub fn run_with_progress<F>(
        &self,
        source_root: &Path,
        dest_root: &Path,
        on_event: F,
    ) -> Result<RunReport, DeidError>
    where
        F: Fn(CaseEvent<'_>) + Sync,
    {
        let started_at = Utc::now();
        let source_root = fs::canonicalize(source_root).map_err(|err| {
            DeidError::Configuration(format!(
                "source root '{}' is not accessible: {err}",
                source_root.display()
            ))
        })?;
        let dest_root = validate_dest_root(&source_root, dest_root)?;
        let enumerator = FileEnumerator::new().with_follow_links(self.config.follow_links);
        let cases = enumerator.case_folders(&source_root, self.config.case_dir_name.as_deref())?;
        fs::create_dir_all(&dest_root)?;

        let seed = self.config.seed.unwrap_or_else(|| rand::rng().random());
        info!(
            seed,
            source = %source_root.display(),
            dest = %dest_root.display(),
            cases = cases.len(),
            "starting de-identification run"
        );

        let total = cases.len();
        let run_case = |index: usize, case_dir: &PathBuf| -> Option<CaseReport> {
            if self.abort_requested() {
                return None;
            }
            let case = case_id(&source_root, case_dir);
            on_event(CaseEvent::Started {
                index,
                total,
                case: &case,
            });
            let seed = case_seed(seed, &case);
            let report = self.process_case(&enumerator, case_dir, case, &dest_root, seed);
            on_event(CaseEvent::Finished {
                index,
                total,
                report: &report,
            });
            Some(report)
        };

        let outcomes: Vec<Option<CaseReport>> = if self.config.parallel_cases {
            cases
                .par_iter()
                .enumerate()
                .map(|(index, case_dir)| run_case(index, case_dir))
                .collect()
        } else {
            let mut outcomes = Vec::with_capacity(total);
            for (index, case_dir) in cases.iter().enumerate() {
                let outcome = run_case(index, case_dir);
                let stop = outcome.is_none();
                outcomes.push(outcome);
                if stop {
                    break;
                }
            }
            outcomes
        };
        let reports: Vec<CaseReport> = outcomes.into_iter().flatten().collect();
        let interrupted = reports.len() < total;
        if interrupted {
            warn!(
                processed = reports.len(),
                total, "run interrupted before all case folders were processed"
            );
        }
        Ok(RunReport {
            seed,
            source_root: source_root.to_string_lossy().into_owned(),
            dest_root: dest_root.to_string_lossy().into_owned(),
            started_at,
            finished_at: Utc::now(),
            interrupted,
            cases: reports,
        })
    }

    /// Run one case folder pass with its own mutation map seeded by `seed`.
    pub fn process_case(
        &self,
        enumerator: &FileEnumerator,
        case_dir: &Path,
        case: CaseId,
        dest_root: &Path,
        seed: u64,
    ) -> CaseReport {
        let mut pass = CasePass::new(case);

        let image_paths = enumerator.files_with_extension(case_dir, &self.config.image_extension);
        let document_paths =
            enumerator.files_with_extension(case_dir, &self.config.document_extension);
        pass.report.images_found = image_paths.len();
        pass.report.documents_found = document_paths.len();
        if document_paths.is_empty() {
            pass.report.missing_annotations = true;
            pass.report.notices.push(MISSING_ANNOTATIONS.to_string());
            info!(case = %pass.report.case, "{}", MISSING_ANNOTATIONS);
        }

        pass.advance(PassStage::Index);
        let policy = self.config.index_failure_policy;
        let images = index_images(self.codec.as_ref(), &image_paths, policy);
        for (path, err) in &images.failures {
            pass.fail(FileKind::Image, path, None, err);
        }
        if images.aborted {
            pass.report.aborted_kinds.push(FileKind::Image);
        }
        let documents = index_documents(&document_paths, policy);
        for (path, err) in &documents.failures {
            pass.fail(FileKind::Document, path, None, err);
        }
        if documents.aborted {
            pass.report.aborted_kinds.push(FileKind::Document);
        }
        let (image_index, document_index) = (images.index, documents.index);
        pass.report.images_indexed = image_index.len();
        pass.report.documents_indexed = document_index.len();
        pass.report.occurrences = document_index.occurrence_count();

        pass.advance(PassStage::Join);
        let table = CorrespondenceTable::join(&image_index, &document_index);
        pass.report.joined_identifiers = table.len();
        pass.report.joined_rows = table.rows().len();

        pass.advance(PassStage::Mutate);
        let identifiers = image_index
            .identifiers()
            .chain(document_index.rows().map(|(_, identifier)| identifier));
        let map = MutationMap::build(seed, identifiers);
        pass.report.distinct_identifiers = map.len();

        pass.advance(PassStage::MapPaths);
        let mut ledger = DestinationLedger::new(self.config.reject_collisions);
        let mut image_plan: Vec<(&ImageRef, PathBuf)> = Vec::with_capacity(image_index.len());
        for image in &image_index.rows {
            match self.plan(&mut ledger, &image.path, dest_root) {
                Ok(dest) => image_plan.push((image, dest)),
                Err(err) => pass.fail(FileKind::Image, &image.path, Some(&image.identifier), &err),
            }
        }
        let mut document_plan: Vec<(&DocumentRefs, PathBuf)> =
            Vec::with_capacity(document_index.len());
        for document in &document_index.documents {
            match self.plan(&mut ledger, &document.path, dest_root) {
                Ok(dest) => document_plan.push((document, dest)),
                Err(err) => pass.fail(
                    FileKind::Document,
                    &document.path,
                    document.first_identifier(),
                    &err,
                ),
            }
        }

        if !image_index.is_empty() {
            pass.advance(PassStage::RewriteImages);
            for (image, dest) in &image_plan {
                match rewrite_image(self.codec.as_ref(), image, dest, &map) {
                    Ok(()) => pass.report.images_written += 1,
                    Err(err) => pass.fail(FileKind::Image, &image.path, Some(&image.identifier), &err),
                }
            }
        }

        if !document_index.is_empty() {
            pass.advance(PassStage::RewriteDocs);
            for (document, dest) in &document_plan {
                match rewrite_annotation(document, dest, &map) {
                    Ok(stats) => {
                        pass.report.documents_written += 1;
                        pass.report.identifiers_replaced += stats.identifiers_replaced;
                        pass.report.fields_scrubbed += stats.fields_scrubbed;
                    }
                    Err(err) => pass.fail(
                        FileKind::Document,
                        &document.path,
                        document.first_identifier(),
                        &err,
                    ),
                }
            }
        }

        pass.advance(PassStage::Done);
        info!(
            case = %pass.report.case,
            images = pass.report.images_written,
            documents = pass.report.documents_written,
            joined = pass.report.joined_identifiers,
            failures = pass.report.failures.len(),
            "case complete"
        );
        pass.report
    }

    fn plan(
        &self,
        ledger: &mut DestinationLedger,
        source: &Path,
        dest_root: &Path,
    ) -> Result<PathBuf, DeidError> {
        let dest = self.config.layout.map(source, dest_root)?;
        ledger.claim(source, &dest)?;
        Ok(dest)
    }

    fn abort_requested(&self) -> bool {
        self.abort
            .as_ref()
            .map(|flag| flag.load(Ordering::SeqCst))
            .unwrap_or(false)
    }
}

/// De-identify `source_root` into `dest_root` with the default configuration.
pub fn run_deid(source_root: &Path, dest_root: &Path) -> Result<RunReport, DeidError> {
    Deidentifier::new(DeidConfig::default()).run(source_root, dest_root)
}

fn validate_dest_root(source_root: &Path, dest_root: &Path) -> Result<PathBuf, DeidError> {
    let dest = resolve_dest_root(dest_root)?;
    if dest.starts_with(source_root) {
        return Err(DeidError::Configuration(format!(
            "destination '{}' must not be inside the source root '{}'",
            dest.display(),
            source_root.display()
        )));
    }
    Ok(dest)
}

/// Absolute form of `dest_root` with symlinks and `..` resolved, even when
/// trailing components do not exist yet.
fn resolve_dest_root(dest_root: &Path) -> Result<PathBuf, DeidError> {
    let mut resolved = PathBuf::new();
    for component in std::path::absolute(dest_root)?.components() {
        match component {
            Component::ParentDir => {
                resolved.pop();
            }
            Component::CurDir => {}
            other => {
                resolved.push(other);
                if resolved.exists() {
                    resolved = fs::canonicalize(&resolved)?;
                }
            }
        }
    }
    Ok(resolved)
}

fn case_id(source_root: &Path, case_dir: &Path) -> CaseId {
    let rel = case_dir.strip_prefix(source_root).unwrap_or(case_dir);
    let parts: Vec<String> = rel
        .components()
        .map(|component| component.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.is_empty() {
        ".".to_string()
    } else {
        parts.join("/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn stages_are_ordered() {
        assert!(PassStage::Enumerate < PassStage::Index);
        assert!(PassStage::RewriteImages < PassStage::RewriteDocs);
        assert!(PassStage::RewriteDocs < PassStage::Done);
    }

    #[test]
    fn case_ids_are_relative_and_slash_joined() {
        let root = Path::new("/data/root");
        assert_eq!(case_id(root, Path::new("/data/root/p1/ct")), "p1/ct");
        assert_eq!(case_id(root, root), ".");
    }

    #[test]
    fn destination_inside_source_is_rejected() {
        let temp = tempdir().unwrap();
        let source = fs::canonicalize(temp.path()).unwrap();
        let err = validate_dest_root(&source, &source.join("out")).unwrap_err();
        assert!(matches!(err, DeidError::Configuration(_)));
        let err = validate_dest_root(&source, &source).unwrap_err();
        assert!(matches!(err, DeidError::Configuration(_)));
        let sibling = source.with_file_name(format!(
            "{}_deid",
            source.file_name().unwrap().to_string_lossy()
        ));
        assert!(validate_dest_root(&source, &sibling).is_ok());
    }

    #[test]
    fn parent_components_are_resolved_before_the_containment_check() {
        let temp = tempdir().unwrap();
        let root = fs::canonicalize(temp.path()).unwrap();
        let source = root.join("source");
        fs::create_dir_all(&source).unwrap();

        let through_missing = root.join("other/../source/out");
        let err = validate_dest_root(&source, &through_missing).unwrap_err();
        assert!(matches!(err, DeidError::Configuration(_)));

        let through_existing = root.join("source/../source/nested/out");
        let err = validate_dest_root(&source, &through_existing).unwrap_err();
        assert!(matches!(err, DeidError::Configuration(_)));

        let escaped = validate_dest_root(&source, &root.join("source/../out")).unwrap();
        assert_eq!(escaped, root.join("out"));
    }
}
