//! The signature builder: accumulates part references, emits a `Manifest`
//! and `SignedInfo`, signs, and writes the complete `Signature` part plus
//! its OPC wiring (signature-origin part and relationships) back into the
//! package.
//!
//! Scope note, matching the "not a general XML-DSig library" non-goal: the
//! `Manifest`/`SignatureProperties` fragments are emitted with their own
//! explicit `xmlns` declaration so each is independently well-formed and
//! independently canonicalizable, rather than resolved in the inherited
//! namespace context of the enclosing `Signature` document the way a fully
//! general XML-DSig processor would. This crate only ever canonicalizes
//! documents it produces itself, so the two approaches agree in practice;
//! `Transform` elements likewise carry only their `Algorithm` URI, without
//! modeling the `RelationshipReference` child elements a fully general
//! Relationships Transform implementation would serialize.

use crate::canon::{self, Transform, C14N_ALGORITHM};
use crate::digest;
use crate::enumerate;
use crate::error::{Error, Result};
use crate::identity::{DigestAlgorithm, SignatureAlgorithm, SigningIdentity};
use crate::opc::{rel_types, well_known, Package, Part, PartUri};
use base64::Engine;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use quick_xml::Writer;
use std::collections::BTreeSet;

const DSIG_NS: &str = "http://www.w3.org/2000/09/xmldsig#";
const MDSSI_NS: &str = "http://schemas.openxmlformats.org/package/2006/digital-signature";

const MANIFEST_ID: &str = "idManifest";
const PROPERTIES_ID: &str = "idSignatureProperties";
const SIGNATURE_TIME_ID: &str = "idSignatureTime";
const SIGNATURE_ID: &str = "idPackageSignature";

/// One entry the `Manifest` attests to: a part (or `.rels` file) URI, the
/// transform chain applied before hashing, and the resulting digest.
#[derive(Clone, Debug)]
pub struct Reference {
    pub uri: String,
    pub transforms: Vec<Transform>,
    pub digest_value: Vec<u8>,
}

/// A capability that enumerates the references a signature should cover,
/// given a package and the chosen digest algorithm.
///
/// Preset variants are data, not subclasses: `VsixPreset` is the only one
/// this crate ships, but a host application could implement another
/// (e.g. an OOXML document preset with a different exclusion list) without
/// the signature builder changing.
pub trait Preset {
    fn enumerate_references(
        &self,
        package: &Package,
        algorithm: DigestAlgorithm,
    ) -> Result<Vec<Reference>>;
}

/// The reference set VSIX packages are signed with: every part except the
/// signature subsystem's own parts, plus one relationships reference per
/// non-empty `.rels` file (restricted to non-signature relationship ids).
pub struct VsixPreset;

impl Preset for VsixPreset {
    fn enumerate_references(
        &self,
        package: &Package,
        algorithm: DigestAlgorithm,
    ) -> Result<Vec<Reference>> {
        let mut references = Vec::new();

        for (uri, part) in package.parts() {
            if is_signature_subsystem_part(uri) {
                continue;
            }
            let digest_value =
                digest::digest_part(part.content_type(), part.data(), &[], algorithm)?;
            references.push(Reference {
                uri: reference_uri(uri, part.content_type()),
                transforms: Vec::new(),
                digest_value,
            });

            if let Some(rels) = part.relationships() {
                if let Some(r) = relationships_reference(&uri.relationships_uri(), rels, algorithm)? {
                    references.push(r);
                }
            }
        }

        if let Some(r) = relationships_reference(
            &well_known::package_rels(),
            package.relationships(),
            algorithm,
        )? {
            references.push(r);
        }

        Ok(references)
    }
}

fn is_signature_subsystem_part(uri: &PartUri) -> bool {
    let s = uri.as_str();
    s == well_known::signature_origin().as_str()
        || s.starts_with("/package/services/digital-signature/xml-signature/")
}

fn reference_uri(uri: &PartUri, content_type: &str) -> String {
    format!("{}?ContentType={}", uri.as_str(), content_type)
}

/// Build the Relationships Transform reference for a single `.rels`
/// collection, restricted to non-signature relationship ids. Returns
/// `None` if no non-signature relationships remain (the part carries no
/// reference in that case, matching "one reference per non-empty `.rels`
/// part").
fn relationships_reference(
    rels_uri: &PartUri,
    rels: &crate::opc::Relationships,
    algorithm: DigestAlgorithm,
) -> Result<Option<Reference>> {
    let ids: BTreeSet<String> = rels
        .iter()
        .filter(|r| !is_signature_relationship_type(&r.rel_type))
        .map(|r| r.id.clone())
        .collect();

    if ids.is_empty() {
        return Ok(None);
    }

    let xml = rels.to_xml().into_bytes();
    let transforms = vec![Transform::Relationships { ids: Some(ids) }, Transform::C14n];
    let digest_value = digest::digest_part(crate::opc::RELATIONSHIPS, &xml, &transforms, algorithm)?;

    Ok(Some(Reference {
        uri: rels_uri.as_str().to_string(),
        transforms,
        digest_value,
    }))
}

fn is_signature_relationship_type(rel_type: &str) -> bool {
    rel_type == rel_types::DIGITAL_SIGNATURE_ORIGIN
        || rel_type == rel_types::DIGITAL_SIGNATURE
        || rel_type == rel_types::DIGITAL_SIGNATURE_CERTIFICATE
}

/// Sign `package` with `identity` using digest algorithm `algorithm` and
/// reference set `preset`. On success, returns the new signature part's
/// URI. Fails without mutating the package on any error (all writes happen
/// only after every fallible step below has already succeeded).
///
/// A bare `sign` replaces rather than accumulates: any signatures already
/// present are removed first (per the "exactly one signature" invariant),
/// so re-signing an already-signed package — with the same algorithm or a
/// different one — always leaves exactly the new signature behind.
pub fn sign(
    package: &mut Package,
    preset: &dyn Preset,
    algorithm: DigestAlgorithm,
    identity: &dyn SigningIdentity,
) -> Result<PartUri> {
    if package.is_read_only() {
        return Err(Error::ReadOnly);
    }

    let references = preset.enumerate_references(package, algorithm)?;
    if references.is_empty() {
        return Err(Error::NoReferencesEnqueued);
    }

    let signature_algorithm = identity.signature_algorithm(algorithm);
    let signing_time = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string();

    let manifest_xml = write_manifest(&references, algorithm)?;
    let properties_xml = write_signature_properties(&signing_time)?;

    let manifest_digest = algorithm.digest(&canon::apply_chain(&[Transform::C14n], &manifest_xml)?);
    let properties_digest =
        algorithm.digest(&canon::apply_chain(&[Transform::C14n], &properties_xml)?);

    let signed_info_xml =
        write_signed_info(signature_algorithm, algorithm, &manifest_digest, &properties_digest)?;
    let signed_info_canonical = canon::apply_chain(&[Transform::C14n], &signed_info_xml)?;

    let signature_value = identity.sign(algorithm, &signed_info_canonical)?;

    let signature_xml = write_signature(
        &signed_info_xml,
        &signature_value,
        identity.certificate_chain(),
        &manifest_xml,
        &properties_xml,
    )?;

    log::info!(
        "signing package with {:?} over {} references",
        signature_algorithm,
        references.len()
    );

    // Every fallible step above has already succeeded; only package
    // mutation remains. Drop any pre-existing signatures now so a bare
    // `sign` replaces them instead of accumulating alongside them.
    let mut previous = enumerate::signatures(package);
    for handle in &mut previous {
        handle.remove(package)?;
    }

    let guid = uuid::Uuid::new_v4().simple().to_string();
    let signature_uri = well_known::xml_signature(&guid);
    package.write_part(&signature_uri, crate::opc::DIGITAL_SIGNATURE_XML, signature_xml)?;

    let origin_uri = well_known::signature_origin();
    if !package.has_part(&origin_uri) {
        package.write_part(&origin_uri, crate::opc::DIGITAL_SIGNATURE_ORIGIN, Vec::new())?;
    }
    package
        .part_mut(&origin_uri)
        .expect("origin part was just ensured")
        .ensure_relationships()
        .add(rel_types::DIGITAL_SIGNATURE, &format!("xml-signature/{guid}.psdsxs"));

    if !package.has_root_relationship_of_type(rel_types::DIGITAL_SIGNATURE_ORIGIN) {
        package.add_relationship(
            rel_types::DIGITAL_SIGNATURE_ORIGIN,
            origin_uri.zip_entry_name(),
        )?;
    }

    Ok(signature_uri)
}

fn write_manifest(references: &[Reference], algorithm: DigestAlgorithm) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut w = Writer::new(&mut out);

    let mut manifest = BytesStart::new("Manifest");
    manifest.push_attribute(("xmlns", DSIG_NS));
    manifest.push_attribute(("Id", MANIFEST_ID));
    w.write_event(Event::Start(manifest))?;

    for r in references {
        let mut reference = BytesStart::new("Reference");
        reference.push_attribute(("URI", r.uri.as_str()));
        w.write_event(Event::Start(reference))?;

        if !r.transforms.is_empty() {
            w.write_event(Event::Start(BytesStart::new("Transforms")))?;
            for t in &r.transforms {
                let mut te = BytesStart::new("Transform");
                te.push_attribute(("Algorithm", t.algorithm_uri()));
                w.write_event(Event::Empty(te))?;
            }
            w.write_event(Event::End(BytesEnd::new("Transforms")))?;
        }

        let mut dm = BytesStart::new("DigestMethod");
        dm.push_attribute(("Algorithm", algorithm.digest_method_uri()));
        w.write_event(Event::Empty(dm))?;

        w.write_event(Event::Start(BytesStart::new("DigestValue")))?;
        w.write_event(Event::Text(quick_xml::events::BytesText::new(
            &base64::engine::general_purpose::STANDARD.encode(&r.digest_value),
        )))?;
        w.write_event(Event::End(BytesEnd::new("DigestValue")))?;

        w.write_event(Event::End(BytesEnd::new("Reference")))?;
    }

    w.write_event(Event::End(BytesEnd::new("Manifest")))?;
    Ok(out)
}

fn write_signature_properties(signing_time: &str) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut w = Writer::new(&mut out);

    let mut props = BytesStart::new("SignatureProperties");
    props.push_attribute(("xmlns", DSIG_NS));
    props.push_attribute(("xmlns:mdssi", MDSSI_NS));
    props.push_attribute(("Id", PROPERTIES_ID));
    w.write_event(Event::Start(props))?;

    let mut prop = BytesStart::new("SignatureProperty");
    prop.push_attribute(("Id", SIGNATURE_TIME_ID));
    prop.push_attribute(("Target", format!("#{SIGNATURE_ID}").as_str()));
    w.write_event(Event::Start(prop))?;

    w.write_event(Event::Start(BytesStart::new("mdssi:SignatureTime")))?;

    w.write_event(Event::Start(BytesStart::new("mdssi:Format")))?;
    w.write_event(Event::Text(quick_xml::events::BytesText::new(
        "YYYY-MM-DDThh:mm:ss.sTZD",
    )))?;
    w.write_event(Event::End(BytesEnd::new("mdssi:Format")))?;

    w.write_event(Event::Start(BytesStart::new("mdssi:Value")))?;
    w.write_event(Event::Text(quick_xml::events::BytesText::new(signing_time)))?;
    w.write_event(Event::End(BytesEnd::new("mdssi:Value")))?;

    w.write_event(Event::End(BytesEnd::new("mdssi:SignatureTime")))?;
    w.write_event(Event::End(BytesEnd::new("SignatureProperty")))?;
    w.write_event(Event::End(BytesEnd::new("SignatureProperties")))?;

    Ok(out)
}

fn write_signed_info(
    signature_algorithm: SignatureAlgorithm,
    algorithm: DigestAlgorithm,
    manifest_digest: &[u8],
    properties_digest: &[u8],
) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut w = Writer::new(&mut out);

    let mut signed_info = BytesStart::new("SignedInfo");
    signed_info.push_attribute(("xmlns", DSIG_NS));
    w.write_event(Event::Start(signed_info))?;

    let mut c14n_method = BytesStart::new("CanonicalizationMethod");
    c14n_method.push_attribute(("Algorithm", C14N_ALGORITHM));
    w.write_event(Event::Empty(c14n_method))?;

    let mut sig_method = BytesStart::new("SignatureMethod");
    sig_method.push_attribute(("Algorithm", signature_algorithm.signature_method_uri()));
    w.write_event(Event::Empty(sig_method))?;

    write_signed_info_reference(
        &mut w,
        &format!("#{MANIFEST_ID}"),
        &format!("{DSIG_NS}Manifest"),
        algorithm,
        manifest_digest,
    )?;
    write_signed_info_reference(
        &mut w,
        &format!("#{PROPERTIES_ID}"),
        &format!("{DSIG_NS}SignatureProperties"),
        algorithm,
        properties_digest,
    )?;

    w.write_event(Event::End(BytesEnd::new("SignedInfo")))?;
    Ok(out)
}

fn write_signed_info_reference<W: std::io::Write>(
    w: &mut Writer<W>,
    uri: &str,
    ref_type: &str,
    algorithm: DigestAlgorithm,
    digest_value: &[u8],
) -> Result<()> {
    let mut reference = BytesStart::new("Reference");
    reference.push_attribute(("URI", uri));
    reference.push_attribute(("Type", ref_type));
    w.write_event(Event::Start(reference))?;

    w.write_event(Event::Start(BytesStart::new("Transforms")))?;
    let mut t = BytesStart::new("Transform");
    t.push_attribute(("Algorithm", C14N_ALGORITHM));
    w.write_event(Event::Empty(t))?;
    w.write_event(Event::End(BytesEnd::new("Transforms")))?;

    let mut dm = BytesStart::new("DigestMethod");
    dm.push_attribute(("Algorithm", algorithm.digest_method_uri()));
    w.write_event(Event::Empty(dm))?;

    w.write_event(Event::Start(BytesStart::new("DigestValue")))?;
    w.write_event(Event::Text(quick_xml::events::BytesText::new(
        &base64::engine::general_purpose::STANDARD.encode(digest_value),
    )))?;
    w.write_event(Event::End(BytesEnd::new("DigestValue")))?;

    w.write_event(Event::End(BytesEnd::new("Reference")))?;
    Ok(())
}

fn write_signature(
    signed_info_xml: &[u8],
    signature_value: &[u8],
    certificate_chain: &[Vec<u8>],
    manifest_xml: &[u8],
    properties_xml: &[u8],
) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    {
        let mut w = Writer::new(&mut out);
        w.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), Some("yes"))))?;

        let mut signature = BytesStart::new("Signature");
        signature.push_attribute(("xmlns", DSIG_NS));
        signature.push_attribute(("Id", SIGNATURE_ID));
        w.write_event(Event::Start(signature))?;
    }

    out.extend_from_slice(signed_info_xml);

    {
        let mut w = Writer::new(&mut out);
        w.write_event(Event::Start(BytesStart::new("SignatureValue")))?;
        w.write_event(Event::Text(quick_xml::events::BytesText::new(
            &base64::engine::general_purpose::STANDARD.encode(signature_value),
        )))?;
        w.write_event(Event::End(BytesEnd::new("SignatureValue")))?;

        w.write_event(Event::Start(BytesStart::new("KeyInfo")))?;
        w.write_event(Event::Start(BytesStart::new("X509Data")))?;
        for cert in certificate_chain {
            w.write_event(Event::Start(BytesStart::new("X509Certificate")))?;
            w.write_event(Event::Text(quick_xml::events::BytesText::new(
                &base64::engine::general_purpose::STANDARD.encode(cert),
            )))?;
            w.write_event(Event::End(BytesEnd::new("X509Certificate")))?;
        }
        w.write_event(Event::End(BytesEnd::new("X509Data")))?;
        w.write_event(Event::End(BytesEnd::new("KeyInfo")))?;

        w.write_event(Event::Start(BytesStart::new("Object")))?;
    }
    out.extend_from_slice(manifest_xml);
    {
        let mut w = Writer::new(&mut out);
        w.write_event(Event::End(BytesEnd::new("Object")))?;
        w.write_event(Event::Start(BytesStart::new("Object")))?;
    }
    out.extend_from_slice(properties_xml);
    {
        let mut w = Writer::new(&mut out);
        w.write_event(Event::End(BytesEnd::new("Object")))?;
        w.write_event(Event::End(BytesEnd::new("Signature")))?;
    }

    Ok(out)
}

/// Whether `part` already carries the unsigned timestamp `Object` — used
/// by the timestamp builder to append its own `Object` alongside these
/// without disturbing `SignedInfo`/`SignatureValue` bytes.
pub(crate) fn signature_document_id() -> &'static str {
    SIGNATURE_ID
}
