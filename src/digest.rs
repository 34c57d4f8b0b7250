//! Digesting a single package part: canonicalize, if applicable, then hash.
//!
//! The signature builder calls into this module once per enqueued
//! reference; it owns the "is this part XML, and does its digest need a
//! transform chain first" decision so the builder itself only ever deals in
//! `Reference` values, never raw bytes.

use crate::canon::{self, Transform};
use crate::error::{Error, Result};
use crate::identity::DigestAlgorithm;
use base64::Engine;

/// Whether `content_type` denotes an XML media type: `application/xml`
/// exactly, or any `+xml` suffix (ignoring a trailing `; charset=...`).
pub fn is_xml_content_type(content_type: &str) -> bool {
    let ct = content_type
        .split(';')
        .next()
        .unwrap_or(content_type)
        .trim()
        .to_ascii_lowercase();
    ct == "application/xml" || ct.ends_with("+xml")
}

/// Digest `data`: if `content_type` is XML and `transforms` is non-empty,
/// apply the transform chain first and hash the canonical result; otherwise
/// hash `data` as-is. Returns the raw digest bytes; callers base64-encode
/// for `DigestValue`.
///
/// A declared-XML part whose body does not parse surfaces as
/// [`Error::MalformedPackage`] rather than silently falling back to a raw
/// hash — signing must fail loudly rather than attest to content a
/// consumer cannot canonicalize identically.
pub fn digest_part(
    content_type: &str,
    data: &[u8],
    transforms: &[Transform],
    algorithm: DigestAlgorithm,
) -> Result<Vec<u8>> {
    if is_xml_content_type(content_type) && !transforms.is_empty() {
        let canonical = canon::apply_chain(transforms, data).map_err(as_malformed_if_xml_parse)?;
        Ok(algorithm.digest(&canonical))
    } else {
        Ok(algorithm.digest(data))
    }
}

/// [`digest_part`], base64-encoded, the form a `DigestValue` element needs.
pub fn digest_part_base64(
    content_type: &str,
    data: &[u8],
    transforms: &[Transform],
    algorithm: DigestAlgorithm,
) -> Result<String> {
    let raw = digest_part(content_type, data, transforms, algorithm)?;
    Ok(base64::engine::general_purpose::STANDARD.encode(raw))
}

fn as_malformed_if_xml_parse(e: Error) -> Error {
    match e {
        Error::Xml(_) | Error::XmlEncoding(_) | Error::XmlAttr(_) | Error::Utf8(_) => {
            Error::MalformedPackage(format!("declared-XML part failed to parse: {e}"))
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_xml_content_type() {
        assert!(is_xml_content_type("application/xml"));
        assert!(is_xml_content_type("application/vnd.openxmlformats-package.relationships+xml"));
        assert!(is_xml_content_type("text/xml; charset=utf-8") == false);
        assert!(!is_xml_content_type("application/octet-stream"));
        assert!(!is_xml_content_type("image/png"));
    }

    #[test]
    fn test_raw_bytes_digest_without_transforms() {
        let data = b"hello world";
        let digest = digest_part("application/octet-stream", data, &[], DigestAlgorithm::Sha256).unwrap();
        assert_eq!(digest, DigestAlgorithm::Sha256.digest(data));
    }

    #[test]
    fn test_xml_without_transforms_hashes_raw() {
        let data = b"<a><b/></a>";
        let digest = digest_part("application/xml", data, &[], DigestAlgorithm::Sha256).unwrap();
        assert_eq!(digest, DigestAlgorithm::Sha256.digest(data));
    }

    #[test]
    fn test_xml_with_c14n_transform_hashes_canonical_form() {
        let data = br#"<a  xmlns="urn:x"  z="1" b="2"/>"#;
        let canonical = canon::c14n::c14n(data).unwrap();
        let digest = digest_part(
            "application/xml",
            data,
            &[Transform::C14n],
            DigestAlgorithm::Sha256,
        )
        .unwrap();
        assert_eq!(digest, DigestAlgorithm::Sha256.digest(&canonical));
    }

    #[test]
    fn test_malformed_declared_xml_errors() {
        let data = b"<a><b></a>"; // mismatched close tag
        let result = digest_part(
            "application/xml",
            data,
            &[Transform::C14n],
            DigestAlgorithm::Sha256,
        );
        assert!(matches!(result, Err(Error::MalformedPackage(_))));
    }

    #[test]
    fn test_base64_encoding() {
        let data = b"x";
        let b64 = digest_part_base64("application/octet-stream", data, &[], DigestAlgorithm::Sha1).unwrap();
        let decoded = base64::engine::general_purpose::STANDARD.decode(&b64).unwrap();
        assert_eq!(decoded, DigestAlgorithm::Sha1.digest(data));
    }
}
