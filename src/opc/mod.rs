//! Open Packaging Convention (OPC) implementation
//!
//! This module handles the ZIP-based package format used by VSIX (and
//! other OPC-based) files: the abstract part store, the content-types
//! registry, and the relationships store.

mod content_types;
mod package;
mod part;
mod part_uri;
mod relationships;

pub use content_types::{ContentTypes, DIGITAL_SIGNATURE_ORIGIN, DIGITAL_SIGNATURE_XML, RELATIONSHIPS, XML};
pub use package::{OpenMode, Package};
pub use part::Part;
pub use part_uri::{well_known, PartUri};
pub use relationships::{rel_types, RandomIdSource, Relationship, RelationshipIdSource, Relationships, TargetMode};
