//! Identifier index builder for image objects and annotation documents.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::annotation::scan_identifiers;
use crate::config::IndexFailurePolicy;
use crate::errors::DeidError;
use crate::image::ImageCodec;
use crate::types::Identifier;

/// One image object and the identifier it carries.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageRef {
    /// Source location.
    pub path: PathBuf,
    /// Decoded identifier.
    pub identifier: Identifier,
}

/// One annotation document and its identifier occurrences in document order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DocumentRefs {
    /// Source location.
    pub path: PathBuf,
    /// Identifier of each identifier-bearing element, in traversal order.
    pub occurrences: Vec<Identifier>,
}

impl DocumentRefs {
    /// First referenced identifier, used to label failures of this document.
    pub fn first_identifier(&self) -> Option<&str> {
        self.occurrences.first().map(String::as_str)
    }
}

/// Image-object index table: one row per file.
#[derive(Clone, Debug, Default)]
pub struct ImageIndex {
    /// Rows in enumeration order.
    pub rows: Vec<ImageRef>,
}

impl ImageIndex {
    /// Number of indexed image objects.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True when no image object was indexed.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Identifiers in row order (duplicates kept).
    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        self.rows.iter().map(|row| row.identifier.as_str())
    }
}

/// Annotation-document index table: one row per identifier occurrence.
#[derive(Clone, Debug, Default)]
pub struct DocumentIndex {
    /// Documents in enumeration order.
    pub documents: Vec<DocumentRefs>,
}

impl DocumentIndex {
    /// Number of indexed documents.
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    /// True when no document was indexed.
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Total identifier occurrences across all documents.
    pub fn occurrence_count(&self) -> usize {
        self.documents.iter().map(|doc| doc.occurrences.len()).sum()
    }

    /// `(document, identifier)` rows, one per occurrence, in document order.
    pub fn rows(&self) -> impl Iterator<Item = (&Path, &str)> {
        self.documents.iter().flat_map(|doc| {
            doc.occurrences
                .iter()
                .map(move |identifier| (doc.path.as_path(), identifier.as_str()))
        })
    }
}

/// Result of indexing one file kind for a case folder.
#[derive(Debug, Default)]
pub struct IndexOutcome<T> {
    /// Rows built from the files that decoded.
    pub index: T,
    /// Files that failed, with their error.
    pub failures: Vec<(PathBuf, DeidError)>,
    /// True when [`IndexFailurePolicy::AbortKind`] stopped this kind; `index` is then empty.
    pub aborted: bool,
}

/// Decode one image object into an index row.
pub fn index_image(codec: &dyn ImageCodec, path: &Path) -> Result<ImageRef, DeidError> {
    let identifier = codec.read_identifier(path)?;
    Ok(ImageRef {
        path: path.to_path_buf(),
        identifier,
    })
}

/// Scan one annotation document into an index row.
pub fn index_document(path: &Path) -> Result<DocumentRefs, DeidError> {
    let occurrences = scan_identifiers(path)?;
    Ok(DocumentRefs {
        path: path.to_path_buf(),
        occurrences,
    })
}

/// Build the image-object index for `paths`.
pub fn index_images(
    codec: &dyn ImageCodec,
    paths: &[PathBuf],
    policy: IndexFailurePolicy,
) -> IndexOutcome<ImageIndex> {
    let outcome = index_with(paths, policy, |path| index_image(codec, path));
    let IndexOutcome {
        index: rows,
        failures,
        aborted,
    } = outcome;
    let mut seen = std::collections::HashSet::new();
    for row in &rows {
        if !seen.insert(row.identifier.as_str()) {
            warn!(
                path = %row.path.display(),
                identifier = %row.identifier,
                "duplicate image identifier; files will share one mutated value"
            );
        }
    }
    IndexOutcome {
        index: ImageIndex { rows },
        failures,
        aborted,
    }
}

/// Build the annotation-document index for `paths`.
pub fn index_documents(paths: &[PathBuf], policy: IndexFailurePolicy) -> IndexOutcome<DocumentIndex> {
    let IndexOutcome {
        index: documents,
        failures,
        aborted,
    } = index_with(paths, policy, index_document);
    for doc in &documents {
        if doc.occurrences.is_empty() {
            debug!(path = %doc.path.display(), "annotation document has no identifier occurrences");
        }
    }
    IndexOutcome {
        index: DocumentIndex { documents },
        failures,
        aborted,
    }
}

fn index_with<T, F>(
    paths: &[PathBuf],
    policy: IndexFailurePolicy,
    mut build: F,
) -> IndexOutcome<Vec<T>>
where
    F: FnMut(&Path) -> Result<T, DeidError>,
{
    let mut rows = Vec::with_capacity(paths.len());
    let mut failures = Vec::new();
    for path in paths {
        match build(path) {
            Ok(row) => rows.push(row),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "indexing failed");
                failures.push((path.clone(), err));
                if policy == IndexFailurePolicy::AbortKind {
                    return IndexOutcome {
                        index: Vec::new(),
                        failures,
                        aborted: true,
                    };
                }
            }
        }
    }
    IndexOutcome {
        index: rows,
        failures,
        aborted: false,
    }
}
