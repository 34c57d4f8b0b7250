//! Content Types handling for OPC packages
//!
//! Parses and generates `[Content_Types].xml`

use crate::error::{Error, Result};
use crate::opc::PartUri;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};
use std::collections::HashMap;
use std::io::{BufRead, Write};

/// Content types definition for an OPC package.
///
/// Entries are kept in an insertion-ordered `Vec`, mirrored by a lookup
/// `HashMap`, so that repeated signs of an unchanged package serialize
/// byte-for-byte identically instead of depending on `HashMap`'s
/// unspecified iteration order.
#[derive(Clone, Debug, Default)]
pub struct ContentTypes {
    /// Default extension mappings, in insertion order (extension, content type).
    defaults: Vec<(String, String)>,
    default_index: HashMap<String, usize>,
    /// Override mappings, in insertion order (part URI, content type).
    overrides: Vec<(PartUri, String)>,
    override_index: HashMap<PartUri, usize>,
}

impl ContentTypes {
    /// Create a new ContentTypes with standard defaults
    pub fn new() -> Self {
        let mut ct = Self::default();

        ct.add_default("rels", RELATIONSHIPS);
        ct.add_default("xml", XML);

        ct
    }

    /// Parse from XML string
    pub fn from_xml(xml: &str) -> Result<Self> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        Self::from_reader(&mut reader)
    }

    /// Parse from a reader
    pub fn from_reader<R: BufRead>(reader: &mut Reader<R>) -> Result<Self> {
        let mut ct = Self::default();
        let mut buf = Vec::new();

        loop {
            match reader.read_event_into(&mut buf)? {
                Event::Empty(e) => {
                    let name = e.name();
                    let local_name = name.local_name();
                    let local_name_ref = local_name.as_ref();

                    match local_name_ref {
                        b"Default" => {
                            let ext = get_attr(&e, "Extension")?;
                            let content_type = get_attr(&e, "ContentType")?;
                            ct.add_default(&ext, &content_type);
                        }
                        b"Override" => {
                            let part_name = get_attr(&e, "PartName")?;
                            let content_type = get_attr(&e, "ContentType")?;
                            let uri = PartUri::new(&part_name)?;
                            ct.add_override(&uri, &content_type);
                        }
                        _ => {}
                    }
                }
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }

        Ok(ct)
    }

    /// Serialize to XML string
    pub fn to_xml(&self) -> String {
        let mut buf = Vec::new();
        self.write_to(&mut buf)
            .expect("write to Vec should not fail");
        String::from_utf8(buf).expect("XML should be valid UTF-8")
    }

    /// Write to a writer
    pub fn write_to<W: Write>(&self, writer: W) -> Result<()> {
        let mut xml = Writer::new(writer);

        xml.write_event(Event::Decl(BytesDecl::new(
            "1.0",
            Some("UTF-8"),
            Some("yes"),
        )))?;

        let mut types = BytesStart::new("Types");
        types.push_attribute(("xmlns", NS_CONTENT_TYPES));
        xml.write_event(Event::Start(types))?;

        for (ext, content_type) in &self.defaults {
            let mut default = BytesStart::new("Default");
            default.push_attribute(("Extension", ext.as_str()));
            default.push_attribute(("ContentType", content_type.as_str()));
            xml.write_event(Event::Empty(default))?;
        }

        for (uri, content_type) in &self.overrides {
            let mut override_elem = BytesStart::new("Override");
            override_elem.push_attribute(("PartName", uri.as_str()));
            override_elem.push_attribute(("ContentType", content_type.as_str()));
            xml.write_event(Event::Empty(override_elem))?;
        }

        xml.write_event(Event::End(BytesEnd::new("Types")))?;

        Ok(())
    }

    /// Add (or replace) a default extension mapping
    pub fn add_default(&mut self, extension: &str, content_type: &str) {
        let ext = extension.to_lowercase();
        if let Some(&idx) = self.default_index.get(&ext) {
            self.defaults[idx].1 = content_type.to_string();
            return;
        }
        self.default_index.insert(ext.clone(), self.defaults.len());
        self.defaults.push((ext, content_type.to_string()));
    }

    /// Add (or replace) an override for a specific part
    pub fn add_override(&mut self, uri: &PartUri, content_type: &str) {
        if let Some(&idx) = self.override_index.get(uri) {
            self.overrides[idx].1 = content_type.to_string();
            return;
        }
        self.override_index.insert(uri.clone(), self.overrides.len());
        self.overrides.push((uri.clone(), content_type.to_string()));
    }

    /// Resolve the content type for a part: `Override` first, then
    /// `Default` by lowercased extension.
    pub fn get(&self, uri: &PartUri) -> Option<&str> {
        if let Some(&idx) = self.override_index.get(uri) {
            return Some(self.overrides[idx].1.as_str());
        }

        let ext = uri.extension()?.to_lowercase();
        let idx = *self.default_index.get(&ext)?;
        Some(self.defaults[idx].1.as_str())
    }

    /// Resolve the content type for a part, failing with
    /// [`Error::UnknownContentType`] if no entry applies.
    pub fn resolve(&self, uri: &PartUri) -> Result<&str> {
        self.get(uri)
            .ok_or_else(|| Error::UnknownContentType(uri.as_str().to_string()))
    }

    /// Remove an override
    pub fn remove_override(&mut self, uri: &PartUri) -> Option<String> {
        let idx = self.override_index.remove(uri)?;
        let (_, content_type) = self.overrides.remove(idx);
        self.reindex_overrides();
        Some(content_type)
    }

    fn reindex_overrides(&mut self) {
        self.override_index.clear();
        for (i, (uri, _)) in self.overrides.iter().enumerate() {
            self.override_index.insert(uri.clone(), i);
        }
    }
}

/// Get an attribute value from an XML element
fn get_attr(element: &BytesStart, name: &str) -> Result<String> {
    for attr in element.attributes() {
        let attr = attr?;
        if attr.key.local_name().as_ref() == name.as_bytes() {
            return Ok(String::from_utf8_lossy(&attr.value).to_string());
        }
    }
    Err(Error::MissingAttribute {
        element: String::from_utf8_lossy(element.name().as_ref()).to_string(),
        attr: name.to_string(),
    })
}

// Namespace
const NS_CONTENT_TYPES: &str = "http://schemas.openxmlformats.org/package/2006/content-types";

// Well-known content types
pub const RELATIONSHIPS: &str = "application/vnd.openxmlformats-package.relationships+xml";
pub const XML: &str = "application/xml";
pub const DIGITAL_SIGNATURE_ORIGIN: &str =
    "application/vnd.openxmlformats-package.digital-signature-origin";
pub const DIGITAL_SIGNATURE_XML: &str =
    "application/vnd.openxmlformats-package.digital-signature-xmlsignature+xml";
