/// Constants used when scrubbing annotation documents.
pub mod scrub {
    /// Placeholder written into free-text and identifying annotation fields.
    pub const PLACEHOLDER: &str = "9999";
    /// Retired/test SOP class identifier written into image-format class fields.
    pub const RETIRED_SOP_CLASS_UID: &str = "1.2.999.10008.5.1.4.3.2.7";
    /// Attribute carrying identifier values on AIM identifier elements.
    pub const ROOT_ATTRIBUTE: &str = "root";
    /// Attribute carrying literal values on AIM value elements.
    pub const VALUE_ATTRIBUTE: &str = "value";
}

/// Constants used by the output path mapper.
pub mod layout {
    /// Default number of trailing path components kept when re-rooting.
    ///
    /// Seven components cover `case/ct/patient/study/series/.../file` for the
    /// archive layouts this tool was built for.
    pub const DEFAULT_KEEP_COMPONENTS: usize = 7;
}

/// Constants used by case folder and file discovery.
pub mod discovery {
    /// Default image-object file extension (matched case-insensitively).
    pub const IMAGE_EXTENSION: &str = "dcm";
    /// Default annotation-document file extension (matched case-insensitively).
    pub const DOCUMENT_EXTENSION: &str = "xml";
}

/// Constants used by identifier mutation.
pub mod mutation {
    /// Number of re-draws attempted when a permutation collides with another mapping.
    pub const MUTATION_RETRY_LIMIT: usize = 8;
    /// Segment delimiter inside identifiers.
    pub const SEGMENT_DELIMITER: char = '.';
    /// Shortest segment length that can be permuted.
    pub const MIN_PERMUTABLE_SEGMENT: usize = 2;
}

/// Constants used for operator notices.
pub mod notices {
    /// Notice attached to a case with no annotation documents.
    pub const MISSING_ANNOTATIONS: &str = "no annotation document found";
    /// Log message used when a per-file failure is recorded and the pass continues.
    pub const FILE_FAILURE_MSG: &str = "skipping file after per-file failure";
}
