//! Integration tests for the end-to-end signing, re-signing, timestamping
//! and removal pipeline, covering the invariants and scenarios this engine
//! is expected to uphold across a full open -> sign -> flush round trip.
//!
//! Scenarios 1-3 and 4 in the distilled spec call for a PKCS#12-backed
//! identity and a live TSA; this suite substitutes an in-memory
//! `SigningIdentity` built from a fixture keypair/certificate and an
//! in-memory `FnTransport` mock, per the adaptation recorded in
//! SPEC_FULL.md and DESIGN.md. The observable assertions (method URI,
//! certificate bytes, timestamp presence) are unchanged.

use base64::Engine as _;
use pretty_assertions::assert_eq;
use vsix_sign::{
    DigestAlgorithm, EcdsaSigningIdentity, Error, FnTransport, Package, Part, PartUri,
    RsaSigningIdentity, SigningOptions, TimestampOptions,
};

const RSA_PK8: &str = include_str!("fixtures/rsa_signer.pk8.pem");
const RSA_CRT_PEM: &str = include_str!("fixtures/rsa_signer.crt.pem");
const ECDSA_PK8: &str = include_str!("fixtures/ecdsa_signer.pk8.pem");
const ECDSA_CRT_PEM: &str = include_str!("fixtures/ecdsa_signer.crt.pem");

fn pem_to_der(pem: &str) -> Vec<u8> {
    let body: String = pem
        .lines()
        .filter(|l| !l.starts_with("-----"))
        .collect::<Vec<_>>()
        .join("");
    base64::engine::general_purpose::STANDARD.decode(body).unwrap()
}

fn rsa_identity() -> RsaSigningIdentity {
    RsaSigningIdentity::from_pkcs8_pem(RSA_PK8, vec![pem_to_der(RSA_CRT_PEM)]).unwrap()
}

fn ecdsa_identity() -> EcdsaSigningIdentity {
    EcdsaSigningIdentity::from_pkcs8_pem(ECDSA_PK8, vec![pem_to_der(ECDSA_CRT_PEM)]).unwrap()
}

/// A small multi-part package: a manifest, an image-like binary asset, and
/// a nested XML part with its own relationships, so the VSIX preset has
/// more than a single trivial reference to enumerate.
fn sample_package() -> Package {
    let mut pkg = Package::new();

    pkg.add_part(Part::new(
        PartUri::new("/extension.vsixmanifest").unwrap(),
        "text/xml",
        b"<?xml version=\"1.0\"?><PackageManifest><Metadata><Identity Id=\"sample\"/></Metadata></PackageManifest>".to_vec(),
    ))
    .unwrap();

    pkg.add_part(Part::new(
        PartUri::new("/extension/icon.png").unwrap(),
        "image/png",
        vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A],
    ))
    .unwrap();

    let manifest_uri = PartUri::new("/extension.vsixmanifest").unwrap();
    pkg.part_mut(&manifest_uri)
        .unwrap()
        .ensure_relationships()
        .add(
            "http://schemas.microsoft.com/developer/vsx/2009/license",
            "extension/icon.png",
        );

    pkg
}

#[test]
fn scenario_1_sign_with_sha256_produces_exactly_one_signature() {
    let mut pkg = sample_package();
    let identity = rsa_identity();
    let options = SigningOptions::vsix(DigestAlgorithm::Sha256);

    vsix_sign::sign_package(&mut pkg, &options, &identity).unwrap();

    let summaries = vsix_sign::list_signatures(&pkg).unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(
        summaries[0].signature_algorithm_uri.as_deref(),
        Some("http://www.w3.org/2001/04/xmldsig-more#rsa-sha256")
    );
}

#[test]
fn scenario_1b_signed_package_round_trips_through_bytes() {
    let mut pkg = sample_package();
    let identity = rsa_identity();
    let options = SigningOptions::vsix(DigestAlgorithm::Sha256);
    vsix_sign::sign_package(&mut pkg, &options, &identity).unwrap();

    let bytes = pkg.to_bytes().unwrap();
    let reopened = Package::from_bytes(&bytes).unwrap();

    // Invariant 1: re-opening a signed package yields exactly one signature.
    assert_eq!(vsix_sign::list_signatures(&reopened).unwrap().len(), 1);
}

#[test]
fn scenario_2_resigning_with_a_new_algorithm_leaves_exactly_one_signature() {
    let mut pkg = sample_package();
    let identity = rsa_identity();

    vsix_sign::sign_package(&mut pkg, &SigningOptions::vsix(DigestAlgorithm::Sha1), &identity)
        .unwrap();
    assert_eq!(vsix_sign::list_signatures(&pkg).unwrap().len(), 1);

    vsix_sign::sign_package(&mut pkg, &SigningOptions::vsix(DigestAlgorithm::Sha256), &identity)
        .unwrap();

    let summaries = vsix_sign::list_signatures(&pkg).unwrap();
    assert_eq!(summaries.len(), 1, "a bare re-sign replaces the prior signature");
    assert_eq!(
        summaries[0].signature_algorithm_uri.as_deref(),
        Some("http://www.w3.org/2001/04/xmldsig-more#rsa-sha256")
    );
}

#[test]
fn scenario_2b_remove_then_resign_yields_exactly_one_signature_with_new_algorithm() {
    let mut pkg = sample_package();
    let identity = rsa_identity();

    vsix_sign::sign_package(&mut pkg, &SigningOptions::vsix(DigestAlgorithm::Sha1), &identity)
        .unwrap();
    vsix_sign::remove_signatures(&mut pkg).unwrap();
    vsix_sign::sign_package(&mut pkg, &SigningOptions::vsix(DigestAlgorithm::Sha256), &identity)
        .unwrap();

    let summaries = vsix_sign::list_signatures(&pkg).unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(
        summaries[0].signature_algorithm_uri.as_deref(),
        Some("http://www.w3.org/2001/04/xmldsig-more#rsa-sha256")
    );
}

#[test]
fn scenario_3_sha512_digest_and_certificate_in_key_info() {
    let mut pkg = sample_package();
    let identity = rsa_identity();
    let options = SigningOptions::vsix(DigestAlgorithm::Sha512);

    vsix_sign::sign_package(&mut pkg, &options, &identity).unwrap();

    let summaries = vsix_sign::list_signatures(&pkg).unwrap();
    assert_eq!(
        summaries[0].signature_algorithm_uri.as_deref(),
        Some("http://www.w3.org/2001/04/xmldsig-more#rsa-sha512")
    );

    let sig_part_uri = PartUri::new(&summaries[0].part_uri).unwrap();
    let sig_xml = pkg.part(&sig_part_uri).unwrap().data_as_str().unwrap();
    let expected_cert_b64 =
        base64::engine::general_purpose::STANDARD.encode(pem_to_der(RSA_CRT_PEM));
    assert!(
        sig_xml.contains(&expected_cert_b64),
        "KeyInfo/X509Certificate must carry the signing certificate's DER bytes"
    );
}

#[test]
fn ecdsa_identity_signs_end_to_end() {
    let mut pkg = sample_package();
    let identity = ecdsa_identity();
    let options = SigningOptions::vsix(DigestAlgorithm::Sha256);

    vsix_sign::sign_package(&mut pkg, &options, &identity).unwrap();

    let summaries = vsix_sign::list_signatures(&pkg).unwrap();
    assert_eq!(
        summaries[0].signature_algorithm_uri.as_deref(),
        Some("http://www.w3.org/2001/04/xmldsig-more#ecdsa-sha256")
    );
}

#[test]
fn scenario_4_timestamp_embeds_token_reported_by_summary() {
    let mut pkg = sample_package();
    let identity = rsa_identity();
    vsix_sign::sign_package(&mut pkg, &SigningOptions::vsix(DigestAlgorithm::Sha256), &identity)
        .unwrap();

    let transport = FnTransport(|_url: &str, content_type: &str, body: &[u8]| {
        assert_eq!(content_type, "application/timestamp-query");
        Ok(mock_tsa_response(body))
    });
    let options = TimestampOptions::new(
        "http://timestamp.example/tsa",
        DigestAlgorithm::Sha256,
        &transport,
    );

    vsix_sign::timestamp_package(&mut pkg, &options).unwrap();

    let summaries = vsix_sign::list_signatures(&pkg).unwrap();
    assert!(summaries[0].has_timestamp);
}

#[test]
fn scenario_5_remove_then_timestamp_fails_with_invalid_operation() {
    let mut pkg = sample_package();
    let identity = rsa_identity();
    vsix_sign::sign_package(&mut pkg, &SigningOptions::vsix(DigestAlgorithm::Sha256), &identity)
        .unwrap();

    let mut handles = vsix_sign::signatures(&pkg);
    handles[0].remove(&mut pkg).unwrap();
    assert!(handles[0].part_uri().is_none());

    let transport = FnTransport(|_: &str, _: &str, _: &[u8]| {
        unreachable!("handle is invalid, transport should never be called")
    });
    let options = TimestampOptions::new(
        "http://timestamp.example/tsa",
        DigestAlgorithm::Sha256,
        &transport,
    );
    let result = handles[0].timestamp(&mut pkg, &options);
    assert!(matches!(result, Err(Error::InvalidOperation)));
}

#[test]
fn invariant_2_remove_clears_signature_origin_and_relationship() {
    let mut pkg = sample_package();
    let identity = rsa_identity();
    vsix_sign::sign_package(&mut pkg, &SigningOptions::vsix(DigestAlgorithm::Sha256), &identity)
        .unwrap();

    let removed = vsix_sign::remove_signatures(&mut pkg).unwrap();
    assert_eq!(removed, 1);
    assert_eq!(vsix_sign::list_signatures(&pkg).unwrap().len(), 0);
}

#[test]
fn scenario_6_read_only_package_rejects_sign_and_leaves_file_untouched() {
    let pkg = sample_package();
    let original_bytes = pkg.to_bytes().unwrap();

    let tmp = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(tmp.path(), &original_bytes).unwrap();

    let mut ro = Package::open_read_only(tmp.path()).unwrap();
    let identity = rsa_identity();
    let result = vsix_sign::sign_package(
        &mut ro,
        &SigningOptions::vsix(DigestAlgorithm::Sha256),
        &identity,
    );

    assert!(matches!(result, Err(Error::ReadOnly)));

    let on_disk = std::fs::read(tmp.path()).unwrap();
    assert_eq!(on_disk, original_bytes, "read-only file must be byte-identical after a rejected sign");
}

/// Builds a minimal, self-consistent DER `TimeStampResp` that grants the
/// request embedded in `request_der`, mirroring a real TSA closely enough
/// to exercise the full verify-then-embed path without a network call.
fn mock_tsa_response(request_der: &[u8]) -> vsix_sign::TimestampResponse {
    use vsix_sign_der_test_helpers::*;
    let fields = expect_sequence(request_der);
    let message_imprint = children(fields[1].content);
    let hashed = message_imprint[1].content.to_vec();
    let nonce = bytes_to_u64(fields[2].content);

    let tst_info = sequence(&[
        integer(1),
        oid("1.2.3.4"),
        sequence(&[sequence(&[oid_sha256(), null()]), octet_string(&hashed)]),
        integer(7),
        octet_string(b"20260101000000Z"),
        integer(nonce),
    ]);
    let encap_content_info = sequence(&[
        oid("1.2.840.113549.1.9.16.1.4"),
        tlv(0xA0, &octet_string(&tst_info)),
    ]);
    let signed_data = sequence(&[
        integer(3),
        tlv(0x31, &[]),
        encap_content_info,
        tlv(0x31, &[]),
    ]);
    let content_info = sequence(&[oid("1.2.840.113549.1.7.2"), tlv(0xA0, &signed_data)]);
    let status_info = sequence(&[integer(0)]);
    let body = sequence(&[status_info, content_info]);

    vsix_sign::TimestampResponse {
        status: 200,
        content_type: "application/timestamp-reply".to_string(),
        body,
    }
}

/// A tiny re-implementation of the minimal DER primitives this test needs,
/// kept separate from the crate's own `der` module (which is private)
/// so the test exercises the public `timestamp_package` surface honestly,
/// the same way the teacher's integration tests avoid reaching into
/// private internals.
mod vsix_sign_der_test_helpers {
    pub struct Element<'a> {
        pub content: &'a [u8],
    }

    fn encode_length(len: usize) -> Vec<u8> {
        if len < 0x80 {
            vec![len as u8]
        } else {
            let mut bytes = Vec::new();
            let mut n = len;
            while n > 0 {
                bytes.insert(0, (n & 0xFF) as u8);
                n >>= 8;
            }
            let mut out = vec![0x80 | bytes.len() as u8];
            out.extend(bytes);
            out
        }
    }

    pub fn tlv(tag: u8, content: &[u8]) -> Vec<u8> {
        let mut out = vec![tag];
        out.extend(encode_length(content.len()));
        out.extend_from_slice(content);
        out
    }

    pub fn sequence(children: &[Vec<u8>]) -> Vec<u8> {
        tlv(0x30, &children.concat())
    }

    pub fn integer(value: u64) -> Vec<u8> {
        let mut bytes = value.to_be_bytes().to_vec();
        while bytes.len() > 1 && bytes[0] == 0 {
            bytes.remove(0);
        }
        if bytes[0] & 0x80 != 0 {
            bytes.insert(0, 0);
        }
        tlv(0x02, &bytes)
    }

    pub fn octet_string(data: &[u8]) -> Vec<u8> {
        tlv(0x04, data)
    }

    pub fn null() -> Vec<u8> {
        tlv(0x05, &[])
    }

    pub fn oid(dotted: &str) -> Vec<u8> {
        let arcs: Vec<u64> = dotted.split('.').map(|s| s.parse().unwrap()).collect();
        let mut content = vec![(arcs[0] * 40 + arcs[1]) as u8];
        for &arc in &arcs[2..] {
            content.extend(base128(arc));
        }
        tlv(0x06, &content)
    }

    pub fn oid_sha256() -> Vec<u8> {
        oid("2.16.840.1.101.3.4.2.1")
    }

    fn base128(mut value: u64) -> Vec<u8> {
        let mut bytes = vec![(value & 0x7F) as u8];
        value >>= 7;
        while value > 0 {
            bytes.push(((value & 0x7F) as u8) | 0x80);
            value >>= 7;
        }
        bytes.reverse();
        bytes
    }

    fn parse_length(input: &[u8]) -> (usize, usize) {
        let first = input[0];
        if first & 0x80 == 0 {
            (first as usize, 1)
        } else {
            let n = (first & 0x7F) as usize;
            let mut len = 0usize;
            for &b in &input[1..1 + n] {
                len = (len << 8) | b as usize;
            }
            (len, 1 + n)
        }
    }

    fn parse_one(input: &[u8]) -> (Element<'_>, &[u8]) {
        let (len, header_len) = parse_length(&input[1..]);
        let start = 1 + header_len;
        let end = start + len;
        (Element { content: &input[start..end] }, &input[end..])
    }

    pub fn children(content: &[u8]) -> Vec<Element<'_>> {
        let mut out = Vec::new();
        let mut rest = content;
        while !rest.is_empty() {
            let (el, tail) = parse_one(rest);
            out.push(el);
            rest = tail;
        }
        out
    }

    pub fn expect_sequence(input: &[u8]) -> Vec<Element<'_>> {
        let (el, _) = parse_one(input);
        children(el.content)
    }

    pub fn bytes_to_u64(bytes: &[u8]) -> u64 {
        let mut value: u64 = 0;
        for &b in bytes {
            value = (value << 8) | b as u64;
        }
        value
    }
}
