/// Dot-segmented identifier carried by an image object and referenced by annotations.
/// Example: `1.3.6.1.4.1.14519.5.2.1.6279.6001.1002`
pub type Identifier = String;
/// Case folder path relative to the source root, used as a logical case id.
/// Examples: `LIDC-0001/ct`, `patient_07`
pub type CaseId = String;
/// Path strings used in reports and tests.
/// Example: `LIDC-0001/ct/study/series/000001.dcm`
pub type PathString = String;
/// Operator-facing notice text attached to a case report.
/// Example: `no annotation document found`
pub type Notice = String;
