//! Record rewriter: writes de-identified copies of image objects and annotation documents.

use std::fs;
use std::path::Path;

use crate::annotation::{RewriteStats, rewrite_document};
use crate::errors::DeidError;
use crate::image::ImageCodec;
use crate::index::{DocumentRefs, ImageRef};
use crate::layout::ensure_parent_dir;
use crate::mutation::MutationMap;
use crate::types::Identifier;

/// Write a copy of `image` to `dest` carrying its mutated identifier.
pub fn rewrite_image(
    codec: &dyn ImageCodec,
    image: &ImageRef,
    dest: &Path,
    map: &MutationMap,
) -> Result<(), DeidError> {
    let mutated = lookup(map, &image.identifier)?;
    guard_source(&image.path, dest)?;
    ensure_parent_dir(dest)?;
    codec.write_with_identifier(&image.path, dest, mutated)
}

/// Write a scrubbed copy of `document` to `dest`.
///
/// Each indexed occurrence receives the mutated value of its original
/// identifier, in the order the occurrences were indexed. A document without
/// occurrences is still scrubbed.
pub fn rewrite_annotation(
    document: &DocumentRefs,
    dest: &Path,
    map: &MutationMap,
) -> Result<RewriteStats, DeidError> {
    let replacements = document
        .occurrences
        .iter()
        .map(|identifier| lookup(map, identifier).map(str::to_string))
        .collect::<Result<Vec<Identifier>, DeidError>>()?;
    guard_source(&document.path, dest)?;
    ensure_parent_dir(dest)?;
    rewrite_document(&document.path, dest, &document.occurrences, &replacements)
}

fn lookup<'a>(map: &'a MutationMap, identifier: &str) -> Result<&'a str, DeidError> {
    map.get(identifier)
        .ok_or_else(|| DeidError::UnmappedIdentifier {
            identifier: identifier.to_string(),
        })
}

/// Refuse a destination that resolves to the source file itself.
fn guard_source(source: &Path, dest: &Path) -> Result<(), DeidError> {
    if !dest.exists() {
        return Ok(());
    }
    if fs::canonicalize(source)? == fs::canonicalize(dest)? {
        return Err(DeidError::SourceOverwrite {
            path: source.to_path_buf(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::tempdir;

    struct TextCodec;

    impl ImageCodec for TextCodec {
        fn read_identifier(&self, path: &Path) -> Result<Identifier, DeidError> {
            Ok(fs::read_to_string(path)?.trim().to_string())
        }

        fn write_with_identifier(
            &self,
            _source: &Path,
            dest: &Path,
            identifier: &str,
        ) -> Result<(), DeidError> {
            fs::write(dest, identifier)?;
            Ok(())
        }
    }

    #[test]
    fn image_copy_carries_the_mapped_identifier() {
        let temp = tempdir().unwrap();
        let source = temp.path().join("src.dcm");
        fs::write(&source, "1.234.5678").unwrap();
        let image = ImageRef {
            path: source.clone(),
            identifier: "1.234.5678".to_string(),
        };
        let map = MutationMap::build(3, ["1.234.5678"]);
        let dest = temp.path().join("out/nested/dst.dcm");

        rewrite_image(&TextCodec, &image, &dest, &map).unwrap();
        assert_eq!(
            fs::read_to_string(&dest).unwrap(),
            map.get("1.234.5678").unwrap()
        );
        assert_eq!(fs::read_to_string(&source).unwrap(), "1.234.5678");
    }

    #[test]
    fn rewriting_onto_the_source_is_refused() {
        let temp = tempdir().unwrap();
        let source = temp.path().join("src.dcm");
        fs::write(&source, "1.23").unwrap();
        let image = ImageRef {
            path: source.clone(),
            identifier: "1.23".to_string(),
        };
        let map = MutationMap::build(3, ["1.23"]);
        let err = rewrite_image(&TextCodec, &image, &source, &map).unwrap_err();
        assert!(matches!(err, DeidError::SourceOverwrite { .. }));
    }

    #[test]
    fn unmapped_identifiers_are_reported() {
        let document = DocumentRefs {
            path: PathBuf::from("/nowhere/doc.xml"),
            occurrences: vec!["1.99".to_string()],
        };
        let map = MutationMap::new(1);
        let err = rewrite_annotation(&document, Path::new("/nowhere/out.xml"), &map).unwrap_err();
        assert!(matches!(err, DeidError::UnmappedIdentifier { .. }));
    }

    #[test]
    fn annotation_occurrences_share_the_image_mutation() {
        let temp = tempdir().unwrap();
        let source = temp.path().join("doc.xml");
        fs::write(
            &source,
            r#"<a><sopInstanceUid root="1.2345"/><sopInstanceUid root="1.2345"/></a>"#,
        )
        .unwrap();
        let document = DocumentRefs {
            path: source,
            occurrences: vec!["1.2345".to_string(), "1.2345".to_string()],
        };
        let map = MutationMap::build(8, ["1.2345"]);
        let dest = temp.path().join("out/doc.xml");

        let stats = rewrite_annotation(&document, &dest, &map).unwrap();
        assert_eq!(stats.identifiers_replaced, 2);
        let mutated = map.get("1.2345").unwrap();
        assert_eq!(
            crate::annotation::scan_identifiers(&dest).unwrap(),
            vec![mutated.to_string(), mutated.to_string()]
        );
    }
}
