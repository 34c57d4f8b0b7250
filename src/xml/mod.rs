//! Generic XML parsing helpers shared by the content-types, relationships,
//! canonicalization and XML-DSig modules.

use quick_xml::events::BytesStart;

/// Helper to get an attribute value from a `BytesStart`, by local name
/// (ignoring any namespace prefix).
pub fn get_attr(element: &BytesStart, name: &str) -> Option<String> {
    element
        .attributes()
        .filter_map(|a| a.ok())
        .find(|a| a.key.local_name().as_ref() == name.as_bytes())
        .map(|a| String::from_utf8_lossy(&a.value).to_string())
}
