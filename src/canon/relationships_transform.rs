//! The OPC "Relationships Transform"
//! (`http://schemas.openxmlformats.org/package/2006/RelationshipTransform`).
//!
//! Pre-filters a `.rels` document down to the relationships the signature
//! reference actually covers, normalizes their attribute set, and sorts
//! them by `Id`. The caller passes the result through [`crate::canon::c14n`]
//! next — this module never canonicalizes on its own.

use crate::error::{Error, Result};
use crate::xml::get_attr;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};
use std::collections::BTreeSet;

const NS_RELATIONSHIPS: &str = "http://schemas.openxmlformats.org/package/2006/relationships";

struct Entry {
    id: String,
    rel_type: String,
    target: String,
    target_mode: Option<String>,
}

/// Apply the Relationships Transform. `ids`, if given, restricts the
/// output to relationships whose `Id` is a member; `None` retains all of
/// them.
pub fn apply(xml: &[u8], ids: Option<&BTreeSet<String>>) -> Result<Vec<u8>> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);

    let mut entries = Vec::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Empty(e) | Event::Start(e) => {
                if e.name().local_name().as_ref() == b"Relationship" {
                    entries.push(parse_entry(&e)?);
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    let mut filtered: Vec<Entry> = entries
        .into_iter()
        .filter(|e| ids.map(|set| set.contains(&e.id)).unwrap_or(true))
        .collect();
    filtered.sort_by(|a, b| a.id.cmp(&b.id));

    let mut out = Vec::new();
    {
        let mut writer = Writer::new(&mut out);
        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), Some("yes"))))?;

        let mut root = BytesStart::new("Relationships");
        root.push_attribute(("xmlns", NS_RELATIONSHIPS));
        writer.write_event(Event::Start(root))?;

        for entry in &filtered {
            let mut el = BytesStart::new("Relationship");
            el.push_attribute(("Id", entry.id.as_str()));
            el.push_attribute(("Type", entry.rel_type.as_str()));
            el.push_attribute(("Target", entry.target.as_str()));
            if let Some(mode) = &entry.target_mode {
                el.push_attribute(("TargetMode", mode.as_str()));
            }
            writer.write_event(Event::Empty(el))?;
        }

        writer.write_event(Event::End(BytesEnd::new("Relationships")))?;
    }

    Ok(out)
}

fn parse_entry(e: &BytesStart) -> Result<Entry> {
    Ok(Entry {
        id: get_attr(e, "Id").ok_or_else(|| Error::MissingAttribute {
            element: "Relationship".into(),
            attr: "Id".into(),
        })?,
        rel_type: get_attr(e, "Type").ok_or_else(|| Error::MissingAttribute {
            element: "Relationship".into(),
            attr: "Type".into(),
        })?,
        target: get_attr(e, "Target").ok_or_else(|| Error::MissingAttribute {
            element: "Relationship".into(),
            attr: "Target".into(),
        })?,
        target_mode: get_attr(e, "TargetMode"),
    })
}
