//! Signature enumerator and remover: discovers existing signatures via the
//! origin part's relationships and supports removing them, cascading to
//! the origin itself when the last signature is removed.
//!
//! `SignatureHandle` deliberately does not hold a `&Package` — the "cyclic
//! ownership" design note calls for modeling a signature as (package,
//! signature index) rather than a two-way reference, so the handle is pure
//! data (a relationship id plus the signature part's URI) and every
//! mutating or reading operation takes the package as an explicit
//! parameter instead.

use crate::error::{Error, Result};
use crate::opc::{rel_types, well_known, Package, PartUri};
use base64::Engine;
use quick_xml::events::Event;
use quick_xml::Reader;

/// A read-only snapshot of a signature's headline facts, produced on
/// demand by [`SignatureHandle::summary`] — the original tool's `list`
/// command surface, without requiring the caller to parse XML-DSig itself.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignatureSummary {
    pub part_uri: String,
    pub signer_subject: Option<String>,
    pub signature_algorithm_uri: Option<String>,
    pub digest_algorithm_uri: Option<String>,
    pub has_timestamp: bool,
}

/// A handle to one signature discovered in a package. Becomes invalid
/// after [`SignatureHandle::remove`]; every other method then fails with
/// [`Error::InvalidOperation`].
#[derive(Debug)]
pub struct SignatureHandle {
    origin_relationship_id: String,
    part_uri: PartUri,
    removed: bool,
}

/// Discover the signatures present in `package` by reading the
/// signature-origin part's relationships. Returns an empty list if the
/// package is unsigned.
pub fn signatures(package: &Package) -> Vec<SignatureHandle> {
    let origin_uri = well_known::signature_origin();
    let Some(origin_part) = package.part(&origin_uri) else {
        return Vec::new();
    };
    let Some(rels) = origin_part.relationships() else {
        return Vec::new();
    };

    rels.all_by_type(rel_types::DIGITAL_SIGNATURE)
        .into_iter()
        .filter_map(|r| {
            let part_uri = origin_uri.resolve(&r.target).ok()?;
            Some(SignatureHandle {
                origin_relationship_id: r.id.clone(),
                part_uri,
                removed: false,
            })
        })
        .collect()
}

impl SignatureHandle {
    /// The signature part's URI, or `None` if this handle has been removed.
    pub fn part_uri(&self) -> Option<&PartUri> {
        if self.removed {
            None
        } else {
            Some(&self.part_uri)
        }
    }

    /// Parse just enough of the signature XML to answer the original
    /// tool's `list` command: signer subject, algorithm, timestamp
    /// presence.
    pub fn summary(&self, package: &Package) -> Result<SignatureSummary> {
        if self.removed {
            return Err(Error::InvalidOperation);
        }
        let part = package
            .part(&self.part_uri)
            .ok_or_else(|| Error::PartNotFound(self.part_uri.as_str().to_string()))?;
        parse_summary(self.part_uri.as_str(), part.data())
    }

    /// Remove this signature: deletes the signature part, the
    /// origin→signature relationship, and — if no signature remains —
    /// the origin part and the root→origin relationship too.
    pub fn remove(&mut self, package: &mut Package) -> Result<()> {
        if self.removed {
            return Err(Error::InvalidOperation);
        }

        package.remove_part(&self.part_uri)?;

        let origin_uri = well_known::signature_origin();
        let mut origin_now_empty = false;
        if let Some(origin_part) = package.part_mut(&origin_uri) {
            if let Some(rels) = origin_part.relationships_mut() {
                rels.remove(&self.origin_relationship_id);
                origin_now_empty = rels.is_empty();
            }
        }

        if origin_now_empty {
            package.remove_part(&origin_uri)?;
            let root_rel_id = package
                .relationships()
                .by_type(rel_types::DIGITAL_SIGNATURE_ORIGIN)
                .map(|r| r.id.clone());
            if let Some(id) = root_rel_id {
                package.relationships_mut().remove(&id);
            }
        }

        self.removed = true;
        log::info!("removed signature part {}", self.part_uri);
        Ok(())
    }

    /// Countersign this signature with an RFC 3161 timestamp. See
    /// [`crate::timestamp::timestamp_signature`].
    pub fn timestamp(
        &self,
        package: &mut Package,
        options: &crate::timestamp::TimestampOptions,
    ) -> Result<()> {
        if self.removed {
            return Err(Error::InvalidOperation);
        }
        crate::timestamp::timestamp_signature(package, &self.part_uri, options)
    }
}

fn parse_summary(part_uri: &str, xml: &[u8]) -> Result<SignatureSummary> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);

    let mut signature_algorithm_uri = None;
    let mut digest_algorithm_uri = None;
    let mut signer_subject = None;
    let mut has_timestamp = false;
    let mut in_x509_certificate = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) | Event::Empty(e) => {
                let local = e.name().local_name().as_ref().to_vec();
                match local.as_slice() {
                    b"SignatureMethod" if signature_algorithm_uri.is_none() => {
                        signature_algorithm_uri = crate::xml::get_attr(&e, "Algorithm");
                    }
                    b"DigestMethod" if digest_algorithm_uri.is_none() => {
                        digest_algorithm_uri = crate::xml::get_attr(&e, "Algorithm");
                    }
                    b"SignatureTimeStamp" => has_timestamp = true,
                    b"X509Certificate" if signer_subject.is_none() => in_x509_certificate = true,
                    _ => {}
                }
            }
            Event::Text(t) if in_x509_certificate && signer_subject.is_none() => {
                let text = t.unescape()?.into_owned();
                let cleaned: String = text.chars().filter(|c| !c.is_whitespace()).collect();
                if let Ok(der) = base64::engine::general_purpose::STANDARD.decode(&cleaned) {
                    signer_subject = x509_subject(&der);
                }
                in_x509_certificate = false;
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(SignatureSummary {
        part_uri: part_uri.to_string(),
        signer_subject,
        signature_algorithm_uri,
        digest_algorithm_uri,
        has_timestamp,
    })
}

fn x509_subject(der: &[u8]) -> Option<String> {
    use x509_parser::prelude::FromDer;
    let (_, cert) = x509_parser::certificate::X509Certificate::from_der(der).ok()?;
    Some(cert.subject().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{DigestAlgorithm, RsaSigningIdentity};
    use crate::opc::Package;
    use crate::opc::{Part, PartUri};
    use crate::signature::{self, VsixPreset};

    const RSA_PK8: &str = include_str!("../tests/fixtures/rsa_signer.pk8.pem");
    const RSA_CRT_PEM: &str = include_str!("../tests/fixtures/rsa_signer.crt.pem");

    fn pem_to_der(pem: &str) -> Vec<u8> {
        let body: String = pem
            .lines()
            .filter(|l| !l.starts_with("-----"))
            .collect::<Vec<_>>()
            .join("");
        base64::Engine::decode(&base64::engine::general_purpose::STANDARD, body).unwrap()
    }

    fn signed_package() -> Package {
        let mut pkg = Package::new();
        let uri = PartUri::new("/extension.vsixmanifest").unwrap();
        pkg.add_part(Part::new(uri, "text/xml", b"<PackageManifest/>".to_vec()))
            .unwrap();

        let identity =
            RsaSigningIdentity::from_pkcs8_pem(RSA_PK8, vec![pem_to_der(RSA_CRT_PEM)]).unwrap();
        signature::sign(&mut pkg, &VsixPreset, DigestAlgorithm::Sha256, &identity).unwrap();
        pkg
    }

    #[test]
    fn test_signatures_discovers_one_signature() {
        let pkg = signed_package();
        let handles = signatures(&pkg);
        assert_eq!(handles.len(), 1);
    }

    #[test]
    fn test_summary_reports_algorithm_and_subject() {
        let pkg = signed_package();
        let handles = signatures(&pkg);
        let summary = handles[0].summary(&pkg).unwrap();
        assert_eq!(
            summary.signature_algorithm_uri.as_deref(),
            Some("http://www.w3.org/2001/04/xmldsig-more#rsa-sha256")
        );
        assert!(summary.signer_subject.is_some());
        assert!(!summary.has_timestamp);
    }

    #[test]
    fn test_remove_clears_signature_and_origin() {
        let mut pkg = signed_package();
        let mut handles = signatures(&pkg);
        handles[0].remove(&mut pkg).unwrap();

        assert!(signatures(&pkg).is_empty());
        assert!(!pkg.has_part(&well_known::signature_origin()));
        assert!(!pkg.has_root_relationship_of_type(rel_types::DIGITAL_SIGNATURE_ORIGIN));
    }

    #[test]
    fn test_operations_after_remove_fail() {
        let mut pkg = signed_package();
        let mut handles = signatures(&pkg);
        handles[0].remove(&mut pkg).unwrap();

        assert!(matches!(handles[0].remove(&mut pkg), Err(Error::InvalidOperation)));
        assert!(matches!(handles[0].summary(&pkg), Err(Error::InvalidOperation)));
        assert!(handles[0].part_uri().is_none());
    }
}
