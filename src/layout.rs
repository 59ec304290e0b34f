//! Output path mapping: re-root a source location under the destination directory.
//!
//! Mapping keeps a suffix of the source path, so two distinct sources with the
//! same kept suffix map to the same destination. That is part of the layout
//! scheme; [`DestinationLedger`] makes such collisions visible and can reject
//! them.

use std::collections::HashMap;
use std::fs;
use std::path::{Component, Path, PathBuf};

use tracing::warn;

use crate::config::PathLayout;
use crate::errors::DeidError;

impl PathLayout {
    /// Compute the destination of `source` under `dest_root`.
    pub fn map(&self, source: &Path, dest_root: &Path) -> Result<PathBuf, DeidError> {
        let components = normal_components(source)?;
        let start = match self {
            PathLayout::KeepLast(keep) => {
                if *keep == 0 {
                    return Err(DeidError::Configuration(
                        "keep-last layout needs at least one component".to_string(),
                    ));
                }
                if components.len() < *keep {
                    return Err(DeidError::PathDepth {
                        path: source.to_path_buf(),
                        depth: components.len(),
                        required: *keep,
                    });
                }
                components.len() - keep
            }
            PathLayout::Anchor(anchor) => components
                .iter()
                .rposition(|component| component.to_str() == Some(anchor.as_str()))
                .ok_or_else(|| DeidError::AnchorNotFound {
                    path: source.to_path_buf(),
                    anchor: anchor.clone(),
                })?,
        };
        let mut dest = dest_root.to_path_buf();
        for component in &components[start..] {
            dest.push(component);
        }
        Ok(dest)
    }
}

fn normal_components(path: &Path) -> Result<Vec<&std::ffi::OsStr>, DeidError> {
    let mut out = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(name) => out.push(name),
            Component::ParentDir => {
                return Err(DeidError::UnsupportedPath {
                    path: path.to_path_buf(),
                    reason: "contains a '..' component".to_string(),
                });
            }
            Component::RootDir | Component::Prefix(_) | Component::CurDir => {}
        }
    }
    Ok(out)
}

/// Create the parent directory of `dest` (and its ancestors) if absent.
///
/// Safe to call repeatedly for the same directory.
pub fn ensure_parent_dir(dest: &Path) -> Result<(), DeidError> {
    if let Some(parent) = dest.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Destinations claimed during one case pass.
#[derive(Debug, Default)]
pub struct DestinationLedger {
    claims: HashMap<PathBuf, PathBuf>,
    reject_collisions: bool,
}

impl DestinationLedger {
    /// Create a ledger; with `reject_collisions` a second claimant is an error.
    pub fn new(reject_collisions: bool) -> Self {
        Self {
            claims: HashMap::new(),
            reject_collisions,
        }
    }

    /// Record that `source` writes to `destination`.
    ///
    /// Re-claiming by the same source is a no-op.
    pub fn claim(&mut self, source: &Path, destination: &Path) -> Result<(), DeidError> {
        match self.claims.get(destination) {
            Some(existing) if existing == source => Ok(()),
            Some(existing) => {
                if self.reject_collisions {
                    return Err(DeidError::PathCollision {
                        destination: destination.to_path_buf(),
                        existing: existing.clone(),
                        requested: source.to_path_buf(),
                    });
                }
                warn!(
                    destination = %destination.display(),
                    existing = %existing.display(),
                    requested = %source.display(),
                    "destination collision; later write wins"
                );
                self.claims
                    .insert(destination.to_path_buf(), source.to_path_buf());
                Ok(())
            }
            None => {
                self.claims
                    .insert(destination.to_path_buf(), source.to_path_buf());
                Ok(())
            }
        }
    }

    /// Number of distinct destinations claimed.
    pub fn len(&self) -> usize {
        self.claims.len()
    }

    /// True when nothing has been claimed.
    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn keep_last_reroots_the_trailing_components() {
        let layout = PathLayout::KeepLast(7);
        let dest = layout
            .map(Path::new("/x/a/b/c/d/e/f/g.dcm"), Path::new("/out"))
            .unwrap();
        assert_eq!(dest, PathBuf::from("/out/a/b/c/d/e/f/g.dcm"));
    }

    #[test]
    fn shallow_paths_fail_instead_of_truncating() {
        let layout = PathLayout::KeepLast(7);
        let err = layout
            .map(Path::new("/a/b/c/d/e/f"), Path::new("/out"))
            .unwrap_err();
        assert!(matches!(
            err,
            DeidError::PathDepth {
                depth: 6,
                required: 7,
                ..
            }
        ));
    }

    #[test]
    fn relative_paths_use_their_normal_components() {
        let layout = PathLayout::KeepLast(2);
        let dest = layout
            .map(Path::new("./case/ct/img.dcm"), Path::new("out"))
            .unwrap();
        assert_eq!(dest, PathBuf::from("out/ct/img.dcm"));
        let err = layout
            .map(Path::new("case/../ct/img.dcm"), Path::new("out"))
            .unwrap_err();
        assert!(matches!(err, DeidError::UnsupportedPath { .. }));
    }

    #[test]
    fn anchor_layout_keeps_from_the_last_anchor() {
        let layout = PathLayout::Anchor("root".to_string());
        let dest = layout
            .map(Path::new("/mnt/root/archive/root/p1/ct/1.dcm"), Path::new("/out"))
            .unwrap();
        assert_eq!(dest, PathBuf::from("/out/root/p1/ct/1.dcm"));
        let err = layout
            .map(Path::new("/mnt/other/1.dcm"), Path::new("/out"))
            .unwrap_err();
        assert!(matches!(err, DeidError::AnchorNotFound { .. }));
    }

    #[test]
    fn equal_suffixes_collide_to_one_destination() {
        let layout = PathLayout::KeepLast(2);
        let left = layout.map(Path::new("/src1/ct/a.dcm"), Path::new("/out")).unwrap();
        let right = layout.map(Path::new("/src2/ct/a.dcm"), Path::new("/out")).unwrap();
        assert_eq!(left, right);

        let mut lenient = DestinationLedger::new(false);
        lenient.claim(Path::new("/src1/ct/a.dcm"), &left).unwrap();
        lenient.claim(Path::new("/src1/ct/a.dcm"), &left).unwrap();
        lenient.claim(Path::new("/src2/ct/a.dcm"), &right).unwrap();
        assert_eq!(lenient.len(), 1);

        let mut strict = DestinationLedger::new(true);
        strict.claim(Path::new("/src1/ct/a.dcm"), &left).unwrap();
        let err = strict.claim(Path::new("/src2/ct/a.dcm"), &right).unwrap_err();
        assert!(matches!(err, DeidError::PathCollision { .. }));
    }

    #[test]
    fn parent_creation_is_idempotent() {
        let temp = tempdir().unwrap();
        let dest = temp.path().join("a/b/c/file.dcm");
        ensure_parent_dir(&dest).unwrap();
        ensure_parent_dir(&dest).unwrap();
        assert!(temp.path().join("a/b/c").is_dir());
        ensure_parent_dir(Path::new("file.dcm")).unwrap();
    }
}
