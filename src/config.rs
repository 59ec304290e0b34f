use serde::{Deserialize, Serialize};

use crate::constants::discovery::{DOCUMENT_EXTENSION, IMAGE_EXTENSION};
use crate::constants::layout::DEFAULT_KEEP_COMPONENTS;

/// Controls how a source path is re-rooted under the destination directory.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PathLayout {
    /// Keep the last N normal path components.
    KeepLast(usize),
    /// Keep everything from the last component equal to this name onward.
    Anchor(String),
}

impl Default for PathLayout {
    fn default() -> Self {
        Self::KeepLast(DEFAULT_KEEP_COMPONENTS)
    }
}

/// What to do when a file fails to decode or parse while building the indices.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexFailurePolicy {
    /// Abort the remaining work for that file kind in the case folder.
    #[default]
    AbortKind,
    /// Record the failure and keep indexing the other files of that kind.
    SkipFile,
}

/// Top-level de-identification configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeidConfig {
    /// Run seed. `None` draws a fresh seed and logs it so the run can be replayed.
    pub seed: Option<u64>,
    /// Output path layout.
    pub layout: PathLayout,
    /// Case folder directory name. `None` treats every immediate subdirectory
    /// of the source root as a case folder.
    pub case_dir_name: Option<String>,
    /// Image-object file extension without the dot.
    pub image_extension: String,
    /// Annotation-document file extension without the dot.
    pub document_extension: String,
    /// Follow symlinks while walking case folders.
    pub follow_links: bool,
    /// Policy for files that fail during indexing.
    pub index_failure_policy: IndexFailurePolicy,
    /// Fail files whose destination is already claimed by another source file.
    ///
    /// When disabled, collisions are logged and the later write wins.
    pub reject_collisions: bool,
    /// Process case folders concurrently; each case keeps its own mutation map.
    pub parallel_cases: bool,
}

impl Default for DeidConfig {
    fn default() -> Self {
        Self {
            seed: None,
            layout: PathLayout::default(),
            case_dir_name: None,
            image_extension: IMAGE_EXTENSION.to_string(),
            document_extension: DOCUMENT_EXTENSION.to_string(),
            follow_links: false,
            index_failure_policy: IndexFailurePolicy::default(),
            reject_collisions: false,
            parallel_cases: false,
        }
    }
}
