//! Image-object codecs.

use std::path::Path;

use dicom_core::{DataElement, PrimitiveValue, VR};
use dicom_dictionary_std::tags;
use dicom_object::open_file;

use crate::errors::DeidError;
use crate::types::Identifier;

/// Reads and rewrites the single identifier carried by an image object.
pub trait ImageCodec: Send + Sync {
    /// Decode the object at `path` and return its identifier.
    fn read_identifier(&self, path: &Path) -> Result<Identifier, DeidError>;

    /// Decode `source`, replace its identifier, and encode the result to `dest`.
    ///
    /// `source` is never modified.
    fn write_with_identifier(
        &self,
        source: &Path,
        dest: &Path,
        identifier: &str,
    ) -> Result<(), DeidError>;
}

/// DICOM Part 10 codec keyed on `SOPInstanceUID (0008,0018)`.
#[derive(Clone, Copy, Debug, Default)]
pub struct DicomCodec;

impl ImageCodec for DicomCodec {
    fn read_identifier(&self, path: &Path) -> Result<Identifier, DeidError> {
        let object = open_file(path).map_err(|err| DeidError::decode(path, err))?;
        let element = object
            .element(tags::SOP_INSTANCE_UID)
            .map_err(|err| DeidError::decode(path, err))?;
        let value = element
            .to_str()
            .map_err(|err| DeidError::decode(path, err))?;
        let identifier = trim_uid(&value);
        if identifier.is_empty() {
            return Err(DeidError::decode(path, "empty SOPInstanceUID"));
        }
        Ok(identifier.to_string())
    }

    fn write_with_identifier(
        &self,
        source: &Path,
        dest: &Path,
        identifier: &str,
    ) -> Result<(), DeidError> {
        let mut object = open_file(source).map_err(|err| DeidError::decode(source, err))?;
        let padded = pad_uid(identifier);
        object.put(DataElement::new(
            tags::SOP_INSTANCE_UID,
            VR::UI,
            PrimitiveValue::from(padded.clone()),
        ));
        // The file meta group carries its own copy of the instance UID.
        let meta = object.meta_mut();
        meta.media_storage_sop_instance_uid = padded;
        meta.update_information_group_length();
        object
            .write_to_file(dest)
            .map_err(|err| DeidError::encode(dest, err))
    }
}

/// Strip the NUL/space padding DICOM adds to odd-length UI values.
pub fn trim_uid(value: &str) -> &str {
    value.trim_end_matches(['\0', ' ']).trim_start()
}

/// Pad a UID to even length with a trailing NUL.
pub fn pad_uid(identifier: &str) -> String {
    let mut padded = identifier.to_string();
    if padded.len() % 2 == 1 {
        padded.push('\0');
    }
    padded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uid_padding_round_trips() {
        assert_eq!(pad_uid("1.2.3"), "1.2.3\0");
        assert_eq!(pad_uid("1.23"), "1.23");
        assert_eq!(trim_uid("1.2.3\0"), "1.2.3");
        assert_eq!(trim_uid(" 1.2.3 "), "1.2.3");
    }

    #[test]
    fn undecodable_files_surface_decode_errors() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("broken.dcm");
        std::fs::write(&path, b"not a dicom file").unwrap();
        let err = DicomCodec.read_identifier(&path).unwrap_err();
        assert!(matches!(err, DeidError::Decode { .. }));
    }
}
