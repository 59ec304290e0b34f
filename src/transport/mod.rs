/// Filesystem enumeration of case folders and record files.
pub mod fs;
