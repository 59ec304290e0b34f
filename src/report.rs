use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::errors::DeidError;
use crate::pipeline::PassStage;
use crate::types::{CaseId, Identifier, Notice, PathString};

/// Record kind a failure or abort refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum FileKind {
    /// Binary image object.
    Image,
    /// Annotation document.
    Document,
}

/// A per-file failure with enough context to re-run just that file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FileFailure {
    /// Record kind.
    pub kind: FileKind,
    /// Stage the failure happened in.
    pub stage: PassStage,
    /// Source location.
    pub path: PathString,
    /// Original identifier, when it was known at failure time.
    pub identifier: Option<Identifier>,
    /// Rendered error.
    pub message: String,
}

impl FileFailure {
    pub(crate) fn new(
        kind: FileKind,
        stage: PassStage,
        path: &std::path::Path,
        identifier: Option<&str>,
        error: &DeidError,
    ) -> Self {
        Self {
            kind,
            stage,
            path: path.to_string_lossy().into_owned(),
            identifier: identifier.map(str::to_string),
            message: error.to_string(),
        }
    }
}

/// Outcome of one case folder pass.
#[derive(Clone, Debug, Default, Serialize)]
pub struct CaseReport {
    /// Case folder path relative to the source root.
    pub case: CaseId,
    /// Image objects discovered in the case folder.
    pub images_found: usize,
    /// Image objects whose identifier was read.
    pub images_indexed: usize,
    /// De-identified image objects written.
    pub images_written: usize,
    /// Annotation documents discovered in the case folder.
    pub documents_found: usize,
    /// Annotation documents scanned successfully.
    pub documents_indexed: usize,
    /// Scrubbed annotation documents written.
    pub documents_written: usize,
    /// Identifier occurrences across indexed documents.
    pub occurrences: usize,
    /// Identifiers present in both record kinds.
    pub joined_identifiers: usize,
    /// Joined (image, document) rows.
    pub joined_rows: usize,
    /// Distinct identifiers in the mutation map.
    pub distinct_identifiers: usize,
    /// Identifier occurrences replaced across written documents.
    pub identifiers_replaced: usize,
    /// Role attributes overwritten with scrub values.
    pub fields_scrubbed: usize,
    /// No annotation document was found for the case.
    pub missing_annotations: bool,
    /// Kinds whose indexing was aborted by a failure.
    pub aborted_kinds: Vec<FileKind>,
    /// Stages visited, in order.
    pub stages: Vec<PassStage>,
    /// Informational notices, such as a missing annotation document.
    pub notices: Vec<Notice>,
    /// Per-file failures, in the order they happened.
    pub failures: Vec<FileFailure>,
}

impl CaseReport {
    /// True if the pass recorded no failure and aborted no kind.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.aborted_kinds.is_empty()
    }
}

/// Outcome of a whole run.
#[derive(Clone, Debug, Serialize)]
pub struct RunReport {
    /// Run seed; replaying with it reproduces every case's mutations.
    pub seed: u64,
    /// Canonical source root.
    pub source_root: PathString,
    /// Resolved destination root.
    pub dest_root: PathString,
    /// Run start time.
    pub started_at: DateTime<Utc>,
    /// Run finish time.
    pub finished_at: DateTime<Utc>,
    /// The abort flag stopped the run before every case was processed.
    pub interrupted: bool,
    /// Reports of the processed case folders, in case order.
    pub cases: Vec<CaseReport>,
}

impl RunReport {
    /// Total image objects written.
    pub fn images_written(&self) -> usize {
        self.cases.iter().map(|case| case.images_written).sum()
    }

    /// Total annotation documents written.
    pub fn documents_written(&self) -> usize {
        self.cases.iter().map(|case| case.documents_written).sum()
    }

    /// All failures across cases.
    pub fn failures(&self) -> impl Iterator<Item = &FileFailure> {
        self.cases.iter().flat_map(|case| case.failures.iter())
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> Result<String, DeidError> {
        serde_json::to_string_pretty(self)
            .map_err(|err| DeidError::Configuration(format!("report serialization failed: {err}")))
    }
}
