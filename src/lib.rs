#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

/// Annotation document roles, identifier scan, and streaming rewrite.
pub mod annotation;
/// Command-line front end.
pub mod cli;
/// De-identification configuration types.
pub mod config;
/// Centralized constants for scrubbing, layout, discovery, and mutation.
pub mod constants;
mod errors;
/// Image-object codecs.
pub mod image;
/// Identifier index builder.
pub mod index;
/// Correspondence join between image objects and annotation documents.
pub mod join;
/// Output path mapping.
pub mod layout;
/// Identifier mutation and the memoized mutation map.
pub mod mutation;
/// Per-case pass state machine and run driver.
pub mod pipeline;
/// Case and run reports.
pub mod report;
/// Record rewriter.
pub mod rewrite;
/// Input transports (filesystem today).
pub mod transport;
/// Shared type aliases.
pub mod types;

pub use annotation::{ElementRole, RewriteStats};
pub use config::{DeidConfig, IndexFailurePolicy, PathLayout};
pub use errors::DeidError;
pub use image::{DicomCodec, ImageCodec};
pub use index::{DocumentIndex, DocumentRefs, ImageIndex, ImageRef};
pub use join::{Correspondence, CorrespondenceRow, CorrespondenceTable};
pub use layout::DestinationLedger;
pub use mutation::{MutationMap, case_seed, scramble_identifier};
pub use pipeline::{CaseEvent, Deidentifier, PassStage, run_deid};
pub use report::{CaseReport, FileFailure, FileKind, RunReport};
pub use transport::fs::FileEnumerator;
pub use types::{CaseId, Identifier, Notice, PathString};
