//! Canonical XML 1.0, without comments
//! (<http://www.w3.org/TR/2001/REC-xml-c14n-20010315>).
//!
//! Parsing uses `quick-xml`'s pull reader in the same manual event-loop
//! style as [`crate::opc::ContentTypes`] and [`crate::opc::Relationships`],
//! because canonicalization must observe raw lexical details (attribute
//! declaration order as written, insignificant whitespace) that a
//! higher-level DOM would normalize away before the *correct* canonical
//! ordering can be applied.
//!
//! Scope note: this canonicalizer targets the documents this crate itself
//! produces or consumes — `[Content_Types].xml`, `.rels` files, and the
//! `Signature`/`Manifest`/`SignedInfo` XML this crate emits — which declare
//! at most one default namespace at the document root and never re-declare
//! or shadow a prefix deeper in the tree. It is not a conformant
//! implementation for arbitrary namespace-heavy documents (nested prefix
//! redeclaration, xml:space/xml:lang inheritance are not modeled), matching
//! the "not a general XML-DSig library" non-goal applied to canonicalization.
//! Attribute/text values are fully unescaped then re-escaped canonically
//! rather than preserving the raw literal-vs-entity-reference distinction
//! from the source bytes, which keeps `C14N(C14N(x)) == C14N(x)` exactly
//! (our own canonical output never contains a literal tab/CR/LF inside an
//! attribute value, only its `&#xN;` form) without requiring a full
//! XML-spec-conformant attribute-value normalizer.

use crate::error::Result;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::HashMap;

/// Canonicalize an XML document per C14N 1.0 (no comments).
pub fn c14n(xml: &[u8]) -> Result<Vec<u8>> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(false);

    let mut out = Vec::new();
    let mut buf = Vec::new();
    // ns_stack[i] is the fully-merged (inherited + own) namespace scope
    // visible *inside* the i-th currently open element; index 0 is the
    // implicit empty root scope.
    let mut ns_stack: Vec<HashMap<String, String>> = vec![HashMap::new()];

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => {
                write_open_tag(&e, &mut ns_stack, &mut out)?;
            }
            Event::Empty(e) => {
                write_open_tag(&e, &mut ns_stack, &mut out)?;
                ns_stack.pop();
                write_close_tag(&e, &mut out);
            }
            Event::End(e) => {
                ns_stack.pop();
                write_close_tag(&e, &mut out);
            }
            Event::Text(t) => {
                let text = t.unescape()?;
                escape_text(&text, &mut out);
            }
            Event::CData(c) => {
                let text = String::from_utf8_lossy(&c.into_inner()).into_owned();
                escape_text(&text, &mut out);
            }
            Event::Comment(_) | Event::PI(_) | Event::Decl(_) | Event::DocType(_) => {}
            Event::Eof => break,
        }
        buf.clear();
    }

    Ok(out)
}

fn write_close_tag(e: &BytesStart, out: &mut Vec<u8>) {
    out.extend_from_slice(b"</");
    out.extend_from_slice(e.name().as_ref());
    out.push(b'>');
}

fn write_open_tag(
    e: &BytesStart,
    ns_stack: &mut Vec<HashMap<String, String>>,
    out: &mut Vec<u8>,
) -> Result<()> {
    let parent_scope = ns_stack.last().cloned().unwrap_or_default();

    let mut own_decls: Vec<(String, String)> = Vec::new();
    let mut regular_attrs: Vec<(String, String)> = Vec::new();

    for attr in e.attributes() {
        let attr = attr?;
        let key = attr.key.as_ref();
        let value = attr.unescape_value()?.into_owned();

        if key == b"xmlns" {
            own_decls.push((String::new(), value));
        } else if let Some(prefix) = key.strip_prefix(b"xmlns:") {
            own_decls.push((String::from_utf8_lossy(prefix).into_owned(), value));
        } else {
            let qname = String::from_utf8_lossy(key).into_owned();
            regular_attrs.push((qname, value));
        }
    }

    // Namespace declarations actually rendered at this node: new or
    // overriding the inherited scope (redundant re-declarations that match
    // an ancestor's value are suppressed, per C14N).
    let mut to_render: Vec<(String, String)> = own_decls
        .iter()
        .filter(|(prefix, uri)| parent_scope.get(prefix) != Some(uri))
        .cloned()
        .collect();
    to_render.sort_by(|a, b| a.0.cmp(&b.0));

    let mut merged = parent_scope;
    for (prefix, uri) in &own_decls {
        merged.insert(prefix.clone(), uri.clone());
    }
    ns_stack.push(merged);

    regular_attrs.sort_by(|a, b| a.0.cmp(&b.0));

    out.push(b'<');
    out.extend_from_slice(e.name().as_ref());

    for (prefix, uri) in &to_render {
        out.push(b' ');
        out.extend_from_slice(b"xmlns");
        if !prefix.is_empty() {
            out.push(b':');
            out.extend_from_slice(prefix.as_bytes());
        }
        out.extend_from_slice(b"=\"");
        escape_attr(uri, out);
        out.push(b'"');
    }

    for (qname, value) in &regular_attrs {
        out.push(b' ');
        out.extend_from_slice(qname.as_bytes());
        out.extend_from_slice(b"=\"");
        escape_attr(value, out);
        out.push(b'"');
    }

    out.push(b'>');
    Ok(())
}

fn escape_text(s: &str, out: &mut Vec<u8>) {
    for ch in s.chars() {
        match ch {
            '&' => out.extend_from_slice(b"&amp;"),
            '<' => out.extend_from_slice(b"&lt;"),
            '>' => out.extend_from_slice(b"&gt;"),
            '\r' => out.extend_from_slice(b"&#xD;"),
            c => {
                let mut buf = [0u8; 4];
                out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            }
        }
    }
}

fn escape_attr(s: &str, out: &mut Vec<u8>) {
    for ch in s.chars() {
        match ch {
            '&' => out.extend_from_slice(b"&amp;"),
            '<' => out.extend_from_slice(b"&lt;"),
            '"' => out.extend_from_slice(b"&quot;"),
            '\t' => out.extend_from_slice(b"&#x9;"),
            '\n' => out.extend_from_slice(b"&#xA;"),
            '\r' => out.extend_from_slice(b"&#xD;"),
            c => {
                let mut buf = [0u8; 4];
                out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_ordering() {
        let xml = br#"<a z="1" b="2" xmlns="urn:x"/>"#;
        let out = c14n(xml).unwrap();
        let s = String::from_utf8(out).unwrap();
        assert_eq!(s, r#"<a xmlns="urn:x" b="2" z="1"></a>"#);
    }

    #[test]
    fn test_empty_element_becomes_tag_pair() {
        let xml = br#"<a/>"#;
        let out = c14n(xml).unwrap();
        assert_eq!(out, b"<a></a>");
    }

    #[test]
    fn test_redundant_namespace_suppressed() {
        let xml = br#"<a xmlns="urn:x"><b xmlns="urn:x"/></a>"#;
        let out = c14n(xml).unwrap();
        let s = String::from_utf8(out).unwrap();
        assert_eq!(s, r#"<a xmlns="urn:x"><b></b></a>"#);
    }

    #[test]
    fn test_overriding_namespace_rendered() {
        let xml = br#"<a xmlns="urn:x"><b xmlns="urn:y"/></a>"#;
        let out = c14n(xml).unwrap();
        let s = String::from_utf8(out).unwrap();
        assert_eq!(s, r#"<a xmlns="urn:x"><b xmlns="urn:y"></b></a>"#);
    }

    #[test]
    fn test_text_escaping() {
        let xml = "<a>1 &lt; 2 &amp; 3 &gt; 0</a>".as_bytes();
        let out = c14n(xml).unwrap();
        assert_eq!(out, b"<a>1 &lt; 2 &amp; 3 &gt; 0</a>");
    }

    #[test]
    fn test_idempotent() {
        let xml = br#"<a z="1" b="2" xmlns="urn:x"><c>text</c></a>"#;
        let once = c14n(xml).unwrap();
        let twice = c14n(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_no_xml_declaration_in_output() {
        let xml = br#"<?xml version="1.0" encoding="UTF-8"?><a/>"#;
        let out = c14n(xml).unwrap();
        assert_eq!(out, b"<a></a>");
    }
}
