//! Relationships handling for OPC packages
//!
//! Parses and generates `.rels` files

use crate::error::{Error, Result};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};
use std::collections::HashMap;
use std::io::{BufRead, Write};

/// Collection of relationships belonging to a single source part (or the
/// package root). Id uniqueness is enforced per-collection, matching OPC's
/// per-source-part uniqueness requirement (see the Open Question resolution
/// in the design notes: uniqueness is scoped per source part, not global).
#[derive(Clone, Debug, Default)]
pub struct Relationships {
    /// Relationships by ID
    items: HashMap<String, Relationship>,
}

/// A single relationship
#[derive(Clone, Debug)]
pub struct Relationship {
    /// Relationship ID (e.g., "R3F2A9B10")
    pub id: String,
    /// Relationship type URI
    pub rel_type: String,
    /// Target path (relative or absolute)
    pub target: String,
    /// Target mode
    pub target_mode: TargetMode,
}

/// Target mode for relationships
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TargetMode {
    /// Internal target (part within the package)
    #[default]
    Internal,
    /// External target (hyperlink, TSA URL, etc.)
    External,
}

/// Source of candidate relationship ids.
///
/// Ids are of the form `R` followed by an uppercase hex rendering of a
/// random 32-bit value. The source is injectable so tests can supply a
/// deterministic sequence and assert exact ids; [`RandomIdSource`] (backed
/// by `rand::random`) is the production default.
pub trait RelationshipIdSource {
    fn next_candidate(&mut self) -> String;
}

/// Default [`RelationshipIdSource`], backed by `rand`.
#[derive(Debug, Default)]
pub struct RandomIdSource;

impl RelationshipIdSource for RandomIdSource {
    fn next_candidate(&mut self) -> String {
        let value: u32 = rand::random();
        format!("R{:08X}", value)
    }
}

impl Relationships {
    /// Create empty relationships
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from XML string
    pub fn from_xml(xml: &str) -> Result<Self> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        Self::from_reader(&mut reader)
    }

    /// Parse from a reader
    pub fn from_reader<R: BufRead>(reader: &mut Reader<R>) -> Result<Self> {
        let mut rels = Self::new();
        let mut buf = Vec::new();

        loop {
            match reader.read_event_into(&mut buf)? {
                Event::Empty(e) | Event::Start(e) => {
                    let name = e.name();
                    if name.local_name().as_ref() == b"Relationship" {
                        let rel = parse_relationship(&e)?;
                        rels.items.insert(rel.id.clone(), rel);
                    }
                }
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }

        Ok(rels)
    }

    /// Serialize to XML string
    pub fn to_xml(&self) -> String {
        let mut buf = Vec::new();
        self.write_to(&mut buf).expect("write to Vec should not fail");
        String::from_utf8(buf).expect("XML should be valid UTF-8")
    }

    /// Write to a writer. Relationships are emitted in `Id` order so
    /// serialization is stable across runs.
    pub fn write_to<W: Write>(&self, writer: W) -> Result<()> {
        let mut xml = Writer::new(writer);

        xml.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), Some("yes"))))?;

        let mut rels_elem = BytesStart::new("Relationships");
        rels_elem.push_attribute(("xmlns", NS_RELATIONSHIPS));
        xml.write_event(Event::Start(rels_elem))?;

        let mut sorted: Vec<&Relationship> = self.items.values().collect();
        sorted.sort_by(|a, b| a.id.cmp(&b.id));

        for rel in sorted {
            let mut rel_elem = BytesStart::new("Relationship");
            rel_elem.push_attribute(("Id", rel.id.as_str()));
            rel_elem.push_attribute(("Type", rel.rel_type.as_str()));
            rel_elem.push_attribute(("Target", rel.target.as_str()));

            if rel.target_mode == TargetMode::External {
                rel_elem.push_attribute(("TargetMode", "External"));
            }

            xml.write_event(Event::Empty(rel_elem))?;
        }

        xml.write_event(Event::End(BytesEnd::new("Relationships")))?;

        Ok(())
    }

    /// Get a relationship by ID
    pub fn get(&self, id: &str) -> Option<&Relationship> {
        self.items.get(id)
    }

    /// Get a relationship by type (returns first match, in id order)
    pub fn by_type(&self, rel_type: &str) -> Option<&Relationship> {
        self.all_by_type(rel_type).into_iter().next()
    }

    /// Get all relationships of a given type, sorted by id
    pub fn all_by_type(&self, rel_type: &str) -> Vec<&Relationship> {
        let mut found: Vec<&Relationship> = self
            .items
            .values()
            .filter(|r| r.rel_type == rel_type)
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        found
    }

    /// Add an internal relationship with a random id, retried on collision.
    pub fn add(&mut self, rel_type: &str, target: &str) -> String {
        self.add_with_source(rel_type, target, TargetMode::Internal, &mut RandomIdSource)
    }

    /// Add an external relationship (hyperlink, TSA URL, ...) with a random id.
    pub fn add_external(&mut self, rel_type: &str, target: &str) -> String {
        self.add_with_source(rel_type, target, TargetMode::External, &mut RandomIdSource)
    }

    /// Add a relationship using a caller-supplied id source. Exposed so
    /// tests can inject a deterministic [`RelationshipIdSource`].
    pub fn add_with_source(
        &mut self,
        rel_type: &str,
        target: &str,
        mode: TargetMode,
        source: &mut impl RelationshipIdSource,
    ) -> String {
        let id = self.generate_id(source);
        self.add_with_id(&id, rel_type, target, mode);
        id
    }

    /// Add a relationship with a specific, caller-chosen ID.
    pub fn add_with_id(&mut self, id: &str, rel_type: &str, target: &str, mode: TargetMode) {
        let rel = Relationship {
            id: id.to_string(),
            rel_type: rel_type.to_string(),
            target: target.to_string(),
            target_mode: mode,
        };
        self.items.insert(id.to_string(), rel);
    }

    /// Remove a relationship by ID
    pub fn remove(&mut self, id: &str) -> Option<Relationship> {
        self.items.remove(id)
    }

    /// Iterate over all relationships
    pub fn iter(&self) -> impl Iterator<Item = &Relationship> {
        self.items.values()
    }

    /// Number of relationships
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn generate_id(&self, source: &mut impl RelationshipIdSource) -> String {
        loop {
            let candidate = source.next_candidate();
            if !self.items.contains_key(&candidate) {
                return candidate;
            }
        }
    }
}

/// Parse a single Relationship element
fn parse_relationship(element: &BytesStart) -> Result<Relationship> {
    let mut id = None;
    let mut rel_type = None;
    let mut target = None;
    let mut target_mode = TargetMode::Internal;

    for attr in element.attributes() {
        let attr = attr?;
        let key = attr.key.local_name();
        let value = String::from_utf8_lossy(&attr.value).to_string();

        match key.as_ref() {
            b"Id" => id = Some(value),
            b"Type" => rel_type = Some(value),
            b"Target" => target = Some(value),
            b"TargetMode" => {
                if value == "External" {
                    target_mode = TargetMode::External;
                }
            }
            _ => {}
        }
    }

    Ok(Relationship {
        id: id.ok_or_else(|| Error::MissingAttribute {
            element: "Relationship".into(),
            attr: "Id".into(),
        })?,
        rel_type: rel_type.ok_or_else(|| Error::MissingAttribute {
            element: "Relationship".into(),
            attr: "Type".into(),
        })?,
        target: target.ok_or_else(|| Error::MissingAttribute {
            element: "Relationship".into(),
            attr: "Target".into(),
        })?,
        target_mode,
    })
}

// Namespace
const NS_RELATIONSHIPS: &str = "http://schemas.openxmlformats.org/package/2006/relationships";

/// Well-known relationship types used by the digital-signature subsystem.
pub mod rel_types {
    pub const DIGITAL_SIGNATURE_ORIGIN: &str =
        "http://schemas.openxmlformats.org/package/2006/relationships/digital-signature/origin";
    pub const DIGITAL_SIGNATURE: &str =
        "http://schemas.openxmlformats.org/package/2006/relationships/digital-signature/signature";
    pub const DIGITAL_SIGNATURE_CERTIFICATE: &str =
        "http://schemas.openxmlformats.org/package/2006/relationships/digital-signature/certificate";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_relationships() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
  <Relationship Id="R00000001" Type="http://schemas.openxmlformats.org/package/2006/relationships/digital-signature/origin" Target="package/services/digital-signature/origin.psdsor"/>
  <Relationship Id="R00000002" Type="http://timestamp.example/type" Target="http://timestamp.digicert.com" TargetMode="External"/>
</Relationships>"#;

        let rels = Relationships::from_xml(xml).unwrap();

        assert_eq!(rels.len(), 2);

        let r1 = rels.get("R00000001").unwrap();
        assert_eq!(r1.target, "package/services/digital-signature/origin.psdsor");
        assert_eq!(r1.target_mode, TargetMode::Internal);

        let r2 = rels.get("R00000002").unwrap();
        assert_eq!(r2.target, "http://timestamp.digicert.com");
        assert_eq!(r2.target_mode, TargetMode::External);
    }

    #[test]
    fn test_by_type() {
        let mut rels = Relationships::new();
        rels.add(rel_types::DIGITAL_SIGNATURE_ORIGIN, "package/services/digital-signature/origin.psdsor");

        let origin = rels.by_type(rel_types::DIGITAL_SIGNATURE_ORIGIN).unwrap();
        assert_eq!(origin.target, "package/services/digital-signature/origin.psdsor");
    }

    #[test]
    fn test_roundtrip() {
        let mut rels = Relationships::new();
        rels.add(rel_types::DIGITAL_SIGNATURE_ORIGIN, "origin.psdsor");
        rels.add_external("http://example/type", "https://example.com");

        let xml = rels.to_xml();
        let rels2 = Relationships::from_xml(&xml).unwrap();

        assert_eq!(rels2.len(), 2);
        assert!(rels2.by_type(rel_types::DIGITAL_SIGNATURE_ORIGIN).is_some());
    }

    /// An id source that returns a fixed sequence, to exercise the
    /// collision-retry path deterministically.
    struct SequenceIdSource {
        remaining: Vec<&'static str>,
    }

    impl RelationshipIdSource for SequenceIdSource {
        fn next_candidate(&mut self) -> String {
            self.remaining.remove(0).to_string()
        }
    }

    #[test]
    fn test_collision_retry() {
        let mut rels = Relationships::new();
        rels.add_with_id("RAAAAAAA", "type", "target", TargetMode::Internal);

        let mut source = SequenceIdSource {
            remaining: vec!["RAAAAAAA", "RBBBBBBB"],
        };
        let id = rels.add_with_source("type2", "target2", TargetMode::Internal, &mut source);

        assert_eq!(id, "RBBBBBBB");
        assert_eq!(rels.len(), 2);
    }

    #[test]
    fn test_deterministic_serialization_order() {
        let mut rels = Relationships::new();
        rels.add_with_id("RZZZZZZZ", "type", "z", TargetMode::Internal);
        rels.add_with_id("RAAAAAAA", "type", "a", TargetMode::Internal);

        let xml = rels.to_xml();
        let a_pos = xml.find("RAAAAAAA").unwrap();
        let z_pos = xml.find("RZZZZZZZ").unwrap();
        assert!(a_pos < z_pos);
    }
}
