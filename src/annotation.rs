//! AIM annotation documents: element roles, identifier scan, and streaming rewrite.
//!
//! Documents are processed as a quick-xml event stream. Events that are not
//! touched are written back verbatim, so namespace declarations, prefixes,
//! comments, and the XML declaration survive unchanged.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use quick_xml::Reader;
use quick_xml::Writer;
use quick_xml::events::{BytesStart, Event};
use serde::Serialize;

use crate::constants::scrub::{
    PLACEHOLDER, RETIRED_SOP_CLASS_UID, ROOT_ATTRIBUTE, VALUE_ATTRIBUTE,
};
use crate::errors::DeidError;
use crate::types::Identifier;

/// Identifying element roles recognized inside annotation documents.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum ElementRole {
    /// Reference to an image object's SOP instance identifier.
    SopInstanceUid,
    /// The annotation's own unique identifier.
    UniqueIdentifier,
    /// Free-text comment.
    Comment,
    /// Template identifier.
    TemplateUid,
    /// Study or series instance identifier.
    InstanceUid,
    /// Patient birth date.
    BirthDate,
    /// Image-format (SOP) class identifier.
    SopClassUid,
}

impl ElementRole {
    /// Roles overwritten with constants during rewrite, in application order.
    pub const SCRUBBED: [ElementRole; 6] = [
        ElementRole::UniqueIdentifier,
        ElementRole::Comment,
        ElementRole::TemplateUid,
        ElementRole::InstanceUid,
        ElementRole::BirthDate,
        ElementRole::SopClassUid,
    ];

    /// Case-sensitive substring matched against the element's local name.
    pub fn tag_pattern(self) -> &'static str {
        match self {
            ElementRole::SopInstanceUid => "sopInstanceUid",
            ElementRole::UniqueIdentifier => "uniqueIdentifier",
            ElementRole::Comment => "comment",
            ElementRole::TemplateUid => "templateUid",
            ElementRole::InstanceUid => "instanceUid",
            ElementRole::BirthDate => "birthDate",
            ElementRole::SopClassUid => "sopClassUid",
        }
    }

    /// Attribute holding the role's value.
    pub fn attribute(self) -> &'static str {
        match self {
            ElementRole::Comment | ElementRole::BirthDate => VALUE_ATTRIBUTE,
            _ => ROOT_ATTRIBUTE,
        }
    }

    /// Constant written by the scrubber, `None` for the identifier role.
    pub fn scrub_value(self) -> Option<&'static str> {
        match self {
            ElementRole::SopInstanceUid => None,
            ElementRole::SopClassUid => Some(RETIRED_SOP_CLASS_UID),
            _ => Some(PLACEHOLDER),
        }
    }

    /// True if an element with this local name plays the role.
    pub fn matches(self, local_name: &str) -> bool {
        local_name.contains(self.tag_pattern())
    }
}

/// Counters returned by [`rewrite_document`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RewriteStats {
    /// Identifier-bearing elements whose identifier was replaced.
    pub identifiers_replaced: usize,
    /// Attributes overwritten with scrub constants.
    pub fields_scrubbed: usize,
}

/// Scan a document and return identifier occurrences in document order.
///
/// An occurrence is an element whose local name matches
/// [`ElementRole::SopInstanceUid`] and whose `root` attribute is present and
/// non-empty. Repeated identifiers are kept; each occurrence is one entry.
pub fn scan_identifiers(path: &Path) -> Result<Vec<Identifier>, DeidError> {
    let mut reader = open_reader(path)?;
    let mut buf = Vec::new();
    let mut occurrences = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(element)) | Ok(Event::Empty(element)) => {
                if let Some(identifier) = identifier_of(path, &element)? {
                    occurrences.push(identifier);
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(err) => return Err(parse_error(path, &reader, err)),
        }
        buf.clear();
    }
    Ok(occurrences)
}

/// Rewrite `source` into `dest`, replacing identifier occurrences and scrubbing roles.
///
/// `originals[n]` is the identifier indexed for the nth occurrence and
/// `replacements[n]` the value it receives. The document must still contain
/// exactly those occurrences in that order.
///
/// Output is staged next to `dest` and renamed into place on success; a failed
/// rewrite leaves any existing `dest` untouched.
pub fn rewrite_document(
    source: &Path,
    dest: &Path,
    originals: &[Identifier],
    replacements: &[Identifier],
) -> Result<RewriteStats, DeidError> {
    let staging = staging_path(dest);
    let result = write_rewritten(source, &staging, originals, replacements).and_then(|stats| {
        fs::rename(&staging, dest).map_err(|err| DeidError::write(dest, err))?;
        Ok(stats)
    });
    if result.is_err() {
        let _ = fs::remove_file(&staging);
    }
    result
}

fn staging_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    dest.with_file_name(name)
}

fn write_rewritten(
    source: &Path,
    dest: &Path,
    originals: &[Identifier],
    replacements: &[Identifier],
) -> Result<RewriteStats, DeidError> {
    if originals.len() != replacements.len() {
        return Err(DeidError::Configuration(format!(
            "{} indexed occurrences but {} replacements for '{}'",
            originals.len(),
            replacements.len(),
            source.display()
        )));
    }
    let mut reader = open_reader(source)?;
    let file = File::create(dest)?;
    let mut writer = Writer::new(BufWriter::new(file));
    let mut buf = Vec::new();
    let mut stats = RewriteStats::default();
    loop {
        let event = match reader.read_event_into(&mut buf) {
            Ok(event) => event,
            Err(err) => return Err(parse_error(source, &reader, err)),
        };
        let out = match event {
            Event::Start(element) => Event::Start(rewrite_element(
                source,
                &element,
                originals,
                replacements,
                &mut stats,
            )?),
            Event::Empty(element) => Event::Empty(rewrite_element(
                source,
                &element,
                originals,
                replacements,
                &mut stats,
            )?),
            Event::Eof => break,
            other => other,
        };
        writer
            .write_event(out)
            .map_err(|err| DeidError::write(dest, err))?;
        buf.clear();
    }
    if stats.identifiers_replaced != originals.len() {
        return Err(DeidError::OccurrenceMismatch {
            path: source.to_path_buf(),
            ordinal: stats.identifiers_replaced,
            details: format!(
                "is missing, {} of {} indexed occurrences found",
                stats.identifiers_replaced,
                originals.len()
            ),
        });
    }
    writer
        .into_inner()
        .flush()
        .map_err(|err| DeidError::write(dest, err))?;
    Ok(stats)
}

fn rewrite_element(
    path: &Path,
    element: &BytesStart<'_>,
    originals: &[Identifier],
    replacements: &[Identifier],
    stats: &mut RewriteStats,
) -> Result<BytesStart<'static>, DeidError> {
    let local = local_name(path, element)?;
    let mut overrides: Vec<(&'static str, &str)> = Vec::new();

    if let Some(current) = identifier_of(path, element)? {
        let ordinal = stats.identifiers_replaced;
        let Some(expected) = originals.get(ordinal) else {
            return Err(DeidError::OccurrenceMismatch {
                path: path.to_path_buf(),
                ordinal,
                details: format!("'{current}' was not indexed"),
            });
        };
        if *expected != current {
            return Err(DeidError::OccurrenceMismatch {
                path: path.to_path_buf(),
                ordinal,
                details: format!("holds '{current}', indexed '{expected}'"),
            });
        }
        overrides.push((ROOT_ATTRIBUTE, replacements[ordinal].as_str()));
        stats.identifiers_replaced += 1;
    }

    for role in ElementRole::SCRUBBED {
        if !role.matches(&local) {
            continue;
        }
        if let Some(value) = role.scrub_value() {
            let attribute = role.attribute();
            overrides.retain(|(name, _)| *name != attribute);
            overrides.push((attribute, value));
            stats.fields_scrubbed += 1;
        }
    }

    let name = String::from_utf8_lossy(element.name().as_ref()).into_owned();
    let mut out = BytesStart::new(name);
    let mut applied = vec![false; overrides.len()];
    for attr in element.attributes() {
        let attr = attr.map_err(|err| DeidError::parse(path, err))?;
        let position = overrides
            .iter()
            .position(|(name, _)| name.as_bytes() == attr.key.as_ref());
        match position {
            Some(idx) => {
                out.push_attribute(overrides[idx]);
                applied[idx] = true;
            }
            None => out.push_attribute(attr),
        }
    }
    for (idx, (name, value)) in overrides.iter().enumerate() {
        if !applied[idx] {
            out.push_attribute((*name, *value));
        }
    }
    Ok(out.into_owned())
}

/// Identifier carried by an identifier-bearing element, if `element` is one.
fn identifier_of(path: &Path, element: &BytesStart<'_>) -> Result<Option<Identifier>, DeidError> {
    let local = local_name(path, element)?;
    if !ElementRole::SopInstanceUid.matches(&local) {
        return Ok(None);
    }
    for attr in element.attributes() {
        let attr = attr.map_err(|err| DeidError::parse(path, err))?;
        if attr.key.as_ref() != ROOT_ATTRIBUTE.as_bytes() {
            continue;
        }
        let value = attr
            .unescape_value()
            .map_err(|err| DeidError::parse(path, err))?;
        if value.is_empty() {
            return Ok(None);
        }
        return Ok(Some(value.into_owned()));
    }
    Ok(None)
}

fn local_name(path: &Path, element: &BytesStart<'_>) -> Result<String, DeidError> {
    let local = element.local_name();
    std::str::from_utf8(local.as_ref())
        .map(str::to_string)
        .map_err(|err| DeidError::parse(path, err))
}

fn open_reader(path: &Path) -> Result<Reader<BufReader<File>>, DeidError> {
    let file = File::open(path)?;
    Ok(Reader::from_reader(BufReader::new(file)))
}

fn parse_error<R>(path: &Path, reader: &Reader<R>, err: quick_xml::Error) -> DeidError {
    DeidError::parse(
        path,
        format!("{err} at byte {}", reader.buffer_position()),
    )
}
