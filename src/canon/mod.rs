//! XML canonicalization: C14N 1.0 (no comments) and the OPC Relationships
//! Transform, sharing a single [`Transform::apply`] entry point so the part
//! digester and the signature builder don't duplicate canonicalization call
//! sites.

pub mod c14n;
pub mod relationships_transform;

use crate::error::Result;
use std::collections::BTreeSet;

pub const C14N_ALGORITHM: &str = "http://www.w3.org/TR/2001/REC-xml-c14n-20010315";
pub const RELATIONSHIPS_TRANSFORM_ALGORITHM: &str =
    "http://schemas.openxmlformats.org/package/2006/RelationshipTransform";

/// A canonicalization transform, identified by the XML-DSig/OPC transform
/// algorithm URI it corresponds to.
#[derive(Clone, Debug)]
pub enum Transform {
    /// Canonical XML 1.0, without comments.
    C14n,
    /// The OPC Relationships Transform, restricted to `ids` if given.
    Relationships { ids: Option<BTreeSet<String>> },
}

impl Transform {
    pub fn algorithm_uri(&self) -> &'static str {
        match self {
            Transform::C14n => C14N_ALGORITHM,
            Transform::Relationships { .. } => RELATIONSHIPS_TRANSFORM_ALGORITHM,
        }
    }

    /// Apply this transform to `xml`, producing canonical or filtered
    /// bytes respectively.
    pub fn apply(&self, xml: &[u8]) -> Result<Vec<u8>> {
        match self {
            Transform::C14n => c14n::c14n(xml),
            Transform::Relationships { ids } => {
                relationships_transform::apply(xml, ids.as_ref())
            }
        }
    }
}

/// Apply a left-to-right chain of transforms, as a `Reference`'s
/// `Transforms` list would specify.
pub fn apply_chain(transforms: &[Transform], xml: &[u8]) -> Result<Vec<u8>> {
    let mut current = xml.to_vec();
    for t in transforms {
        current = t.apply(&current)?;
    }
    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_relationships_then_c14n() {
        let xml = br#"<?xml version="1.0"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
  <Relationship Id="R2" Type="t" Target="b"/>
  <Relationship Id="R1" Type="t" Target="a"/>
</Relationships>"#;

        let chain = vec![
            Transform::Relationships { ids: None },
            Transform::C14n,
        ];
        let out = apply_chain(&chain, xml).unwrap();
        let s = String::from_utf8(out).unwrap();
        assert!(s.starts_with(r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">"#));
        assert!(s.find("R1").unwrap() < s.find("R2").unwrap());
    }
}
