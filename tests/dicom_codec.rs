use std::fs;
use std::path::Path;

use deid::image::{pad_uid, trim_uid};
use deid::{DeidConfig, DeidError, Deidentifier, DicomCodec, ImageCodec, PathLayout};
use dicom_core::{DataElement, PrimitiveValue, VR};
use dicom_dictionary_std::{tags, uids};
use dicom_object::{FileMetaTableBuilder, InMemDicomObject, open_file};
use tempfile::tempdir;

const CT_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.2";
const INSTANCE_UID: &str = "1.3.6.1.4.1.14519.5.2.1.6279.6001.1234567";

fn write_dicom(path: &Path, instance_uid: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    let object = InMemDicomObject::from_element_iter([
        DataElement::new(
            tags::SOP_CLASS_UID,
            VR::UI,
            PrimitiveValue::from(pad_uid(CT_IMAGE_STORAGE)),
        ),
        DataElement::new(
            tags::SOP_INSTANCE_UID,
            VR::UI,
            PrimitiveValue::from(pad_uid(instance_uid)),
        ),
        DataElement::new(tags::PATIENT_ID, VR::LO, PrimitiveValue::from("ANON01")),
    ]);
    let file = object
        .with_meta(
            FileMetaTableBuilder::new()
                .transfer_syntax(uids::EXPLICIT_VR_LITTLE_ENDIAN)
                .media_storage_sop_class_uid(CT_IMAGE_STORAGE)
                .media_storage_sop_instance_uid(instance_uid),
        )
        .unwrap();
    file.write_to_file(path).unwrap();
}

#[test]
fn reads_the_unpadded_instance_uid() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("img.dcm");
    write_dicom(&path, INSTANCE_UID);
    assert_eq!(DicomCodec.read_identifier(&path).unwrap(), INSTANCE_UID);
}

#[test]
fn rewrite_updates_dataset_and_meta_group_only() {
    let temp = tempdir().unwrap();
    let source = temp.path().join("img.dcm");
    let dest = temp.path().join("out.dcm");
    write_dicom(&source, INSTANCE_UID);
    let before = fs::read(&source).unwrap();

    DicomCodec
        .write_with_identifier(&source, &dest, "1.2.3.45")
        .unwrap();
    assert_eq!(fs::read(&source).unwrap(), before);

    let written = open_file(&dest).unwrap();
    assert_eq!(DicomCodec.read_identifier(&dest).unwrap(), "1.2.3.45");
    assert_eq!(
        trim_uid(&written.meta().media_storage_sop_instance_uid),
        "1.2.3.45"
    );
    let patient = written.element(tags::PATIENT_ID).unwrap().to_str().unwrap();
    assert_eq!(patient.trim(), "ANON01");
}

#[test]
fn non_dicom_bytes_fail_to_decode() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("junk.dcm");
    fs::write(&path, b"not a dicom file").unwrap();
    let err = DicomCodec.read_identifier(&path).unwrap_err();
    assert!(matches!(err, DeidError::Decode { .. }));
}

#[test]
fn full_pass_with_dicom_objects_keeps_annotation_in_sync() {
    let temp = tempdir().unwrap();
    let source = temp.path().join("source");
    let dest = temp.path().join("dest");
    write_dicom(&source.join("case1/series/1.dcm"), INSTANCE_UID);
    fs::create_dir_all(source.join("case1/aim")).unwrap();
    fs::write(
        source.join("case1/aim/ann.xml"),
        format!(r#"<ImageAnnotationCollection><sopInstanceUid root="{INSTANCE_UID}"/></ImageAnnotationCollection>"#),
    )
    .unwrap();

    let report = Deidentifier::new(DeidConfig {
        seed: Some(21),
        layout: PathLayout::KeepLast(3),
        ..DeidConfig::default()
    })
    .run(&source, &dest)
    .unwrap();
    assert!(report.cases[0].is_clean());

    let mutated = DicomCodec
        .read_identifier(&dest.join("case1/series/1.dcm"))
        .unwrap();
    assert_ne!(mutated, INSTANCE_UID);
    let document = deid::annotation::scan_identifiers(&dest.join("case1/aim/ann.xml")).unwrap();
    assert_eq!(document, vec![mutated]);
}
