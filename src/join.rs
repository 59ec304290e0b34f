//! Inner join of the image and annotation indices on identifier.

use std::path::{Path, PathBuf};

use indexmap::{IndexMap, IndexSet};

use crate::index::{DocumentIndex, ImageIndex};
use crate::types::Identifier;

/// One joined row: an image object and an annotation document sharing an identifier.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CorrespondenceRow {
    /// Shared identifier.
    pub identifier: Identifier,
    /// Image-object location.
    pub image: PathBuf,
    /// Annotation-document location.
    pub document: PathBuf,
}

/// Locations carrying one identifier on both sides of the join.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Correspondence {
    /// Image objects carrying the identifier.
    pub images: Vec<PathBuf>,
    /// Annotation documents referencing the identifier (each listed once).
    pub documents: Vec<PathBuf>,
}

/// Identifiers present in both record kinds, in image-index order.
#[derive(Clone, Debug, Default)]
pub struct CorrespondenceTable {
    entries: IndexMap<Identifier, Correspondence>,
}

impl CorrespondenceTable {
    /// Inner-join `images` and `documents` on identifier.
    ///
    /// Identifiers present on only one side are excluded from the table; they
    /// are still mutated and written by the pipeline.
    pub fn join(images: &ImageIndex, documents: &DocumentIndex) -> Self {
        let mut referenced: IndexMap<&str, IndexSet<&Path>> = IndexMap::new();
        for (document, identifier) in documents.rows() {
            referenced.entry(identifier).or_default().insert(document);
        }
        let mut entries: IndexMap<Identifier, Correspondence> = IndexMap::new();
        for row in &images.rows {
            if row.identifier.is_empty() {
                continue;
            }
            let Some(docs) = referenced.get(row.identifier.as_str()) else {
                continue;
            };
            let entry = entries
                .entry(row.identifier.clone())
                .or_insert_with(|| Correspondence {
                    images: Vec::new(),
                    documents: docs.iter().map(|doc| doc.to_path_buf()).collect(),
                });
            entry.images.push(row.path.clone());
        }
        Self { entries }
    }

    /// Number of distinct joined identifiers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no identifier is shared by both kinds.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up the locations joined on `identifier`.
    pub fn get(&self, identifier: &str) -> Option<&Correspondence> {
        self.entries.get(identifier)
    }

    /// Joined identifiers in image-index order.
    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Flattened rows, one per (image, document) pair.
    pub fn rows(&self) -> Vec<CorrespondenceRow> {
        let mut rows = Vec::new();
        for (identifier, correspondence) in &self.entries {
            for image in &correspondence.images {
                for document in &correspondence.documents {
                    rows.push(CorrespondenceRow {
                        identifier: identifier.clone(),
                        image: image.clone(),
                        document: document.clone(),
                    });
                }
            }
        }
        rows
    }
}
