use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::{DirEntry, WalkDir};

use crate::errors::DeidError;

/// Filesystem enumerator for case folders and the record files inside them.
///
/// Every listing is sorted so index order, and therefore seeded mutation
/// output, does not depend on directory iteration order.
#[derive(Clone, Debug, Default)]
pub struct FileEnumerator {
    follow_links: bool,
}

impl FileEnumerator {
    /// Create an enumerator that does not follow symlinks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure symlink traversal.
    pub fn with_follow_links(mut self, follow_links: bool) -> Self {
        self.follow_links = follow_links;
        self
    }

    /// List case folders under `root`.
    ///
    /// With `case_dir_name = None` every immediate subdirectory is a case
    /// folder. Otherwise every directory named `case_dir_name` at any depth is
    /// one; a match nested inside another match is folded into the outer case.
    pub fn case_folders(
        &self,
        root: &Path,
        case_dir_name: Option<&str>,
    ) -> Result<Vec<PathBuf>, DeidError> {
        if !root.is_dir() {
            return Err(DeidError::Configuration(format!(
                "source root '{}' is not a directory",
                root.display()
            )));
        }
        let mut walker = WalkDir::new(root)
            .min_depth(1)
            .follow_links(self.follow_links);
        if case_dir_name.is_none() {
            walker = walker.max_depth(1);
        }
        let mut folders: Vec<PathBuf> = walker
            .into_iter()
            .filter_map(|entry| readable_entry(root, entry))
            .filter(|entry| entry.file_type().is_dir())
            .filter(|entry| match case_dir_name {
                Some(name) => entry.file_name().to_str() == Some(name),
                None => true,
            })
            .map(|entry| entry.into_path())
            .collect();
        folders.sort();
        let mut outermost: Vec<PathBuf> = Vec::with_capacity(folders.len());
        for folder in folders {
            if outermost.iter().any(|outer| folder.starts_with(outer)) {
                debug!(path = %folder.display(), "nested case folder folded into parent");
                continue;
            }
            outermost.push(folder);
        }
        Ok(outermost)
    }

    /// List files under `dir` (recursively) whose extension matches `extension`.
    pub fn files_with_extension(&self, dir: &Path, extension: &str) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = WalkDir::new(dir)
            .follow_links(self.follow_links)
            .into_iter()
            .filter_map(|entry| readable_entry(dir, entry))
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| has_extension(path, extension))
            .collect();
        files.sort();
        files
    }
}

fn readable_entry(root: &Path, entry: walkdir::Result<DirEntry>) -> Option<DirEntry> {
    match entry {
        Ok(entry) => Some(entry),
        Err(err) => {
            debug!(root = %root.display(), error = %err, "skipping unreadable directory entry");
            None
        }
    }
}

/// True if the path has the given extension (case-insensitive, without the dot).
pub fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case(extension.trim_start_matches('.')))
        .unwrap_or(false)
}
