//! RFC 3161 timestamp builder: requests a countersignature over a
//! signature's `SignatureValue`, validates the response, and embeds the
//! returned token as an unsigned XML-DSig property.
//!
//! DER encoding/decoding here is hand-rolled and scoped to exactly the
//! fields this module touches (`TimeStampReq`, `PKIStatusInfo`, the
//! `MessageImprint`/`TSTInfo` fields needed to verify a response) — this
//! mirrors the "not a general XML-DSig library" non-goal applied to ASN.1:
//! the engine is not a general CMS/PKIX library either, and re-embeds the
//! TSA-returned `timeStampToken` bytes verbatim rather than round-tripping
//! them through a full CMS model.

use crate::error::{Error, Result};
use crate::identity::DigestAlgorithm;
use crate::opc::{Package, PartUri};
use base64::Engine;
use quick_xml::events::Event;
use quick_xml::Reader;

/// Minimal DER primitives: just enough TLV encode/decode to build a
/// `TimeStampReq` and pick apart a `TimeStampResp`/`TimeStampToken`.
pub mod der {
    use crate::error::{Error, Result};

    #[derive(Debug, Clone, Copy)]
    pub struct Element<'a> {
        pub tag: u8,
        pub content: &'a [u8],
    }

    pub fn encode_length(len: usize) -> Vec<u8> {
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

    pub fn integer_from_u64(value: u64) -> Vec<u8> {
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

    pub fn boolean(value: bool) -> Vec<u8> {
        tlv(0x01, &[if value { 0xFF } else { 0x00 }])
    }

    pub fn null() -> Vec<u8> {
        tlv(0x05, &[])
    }

    pub fn oid(dotted: &str) -> Result<Vec<u8>> {
        let arcs: Vec<u64> = dotted
            .split('.')
            .map(|s| {
                s.parse::<u64>()
                    .map_err(|_| Error::CryptoFailure(format!("invalid OID arc in {dotted}")))
            })
            .collect::<Result<_>>()?;
        if arcs.len() < 2 {
            return Err(Error::CryptoFailure(format!("OID too short: {dotted}")));
        }
        let mut content = vec![(arcs[0] * 40 + arcs[1]) as u8];
        for &arc in &arcs[2..] {
            content.extend(base128(arc));
        }
        Ok(tlv(0x06, &content))
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

    fn parse_length(input: &[u8]) -> Result<(usize, usize)> {
        if input.is_empty() {
            return Err(Error::TimestampFailed("truncated DER length".into()));
        }
        let first = input[0];
        if first & 0x80 == 0 {
            Ok((first as usize, 1))
        } else {
            let n = (first & 0x7F) as usize;
            if input.len() < 1 + n {
                return Err(Error::TimestampFailed("truncated DER length".into()));
            }
            let mut len = 0usize;
            for &b in &input[1..1 + n] {
                len = (len << 8) | b as usize;
            }
            Ok((len, 1 + n))
        }
    }

    /// Parse a single TLV at the start of `input`, returning it and the
    /// remaining bytes.
    pub fn parse_one(input: &[u8]) -> Result<(Element<'_>, &[u8])> {
        if input.len() < 2 {
            return Err(Error::TimestampFailed("truncated DER value".into()));
        }
        let tag = input[0];
        let (len, header_len) = parse_length(&input[1..])?;
        let start = 1 + header_len;
        let end = start + len;
        if input.len() < end {
            return Err(Error::TimestampFailed("truncated DER value".into()));
        }
        Ok((
            Element {
                tag,
                content: &input[start..end],
            },
            &input[end..],
        ))
    }

    /// Walk all immediate children of a constructed value's content.
    pub fn children(content: &[u8]) -> Result<Vec<Element<'_>>> {
        let mut out = Vec::new();
        let mut rest = content;
        while !rest.is_empty() {
            let (el, tail) = parse_one(rest)?;
            out.push(el);
            rest = tail;
        }
        Ok(out)
    }

    /// Expect a SEQUENCE (tag `0x30`) and return its children.
    pub fn expect_sequence(input: &[u8]) -> Result<Vec<Element<'_>>> {
        let (el, _) = parse_one(input)?;
        if el.tag != 0x30 {
            return Err(Error::TimestampFailed(format!(
                "expected SEQUENCE, got tag 0x{:02X}",
                el.tag
            )));
        }
        children(el.content)
    }
}

/// An HTTP transport capable of issuing the single POST a TSA exchange
/// needs. The seam named by the "out of scope" collaborator list.
pub trait TimestampTransport {
    fn post(&self, url: &str, content_type: &str, body: &[u8]) -> Result<TimestampResponse>;
}

/// The raw HTTP response to a timestamp request.
pub struct TimestampResponse {
    pub status: u16,
    pub content_type: String,
    pub body: Vec<u8>,
}

/// An in-memory transport for tests: calls a closure instead of reaching
/// the network.
pub struct FnTransport<F>(pub F)
where
    F: Fn(&str, &str, &[u8]) -> Result<TimestampResponse>;

impl<F> TimestampTransport for FnTransport<F>
where
    F: Fn(&str, &str, &[u8]) -> Result<TimestampResponse>,
{
    fn post(&self, url: &str, content_type: &str, body: &[u8]) -> Result<TimestampResponse> {
        (self.0)(url, content_type, body)
    }
}

/// The default, blocking, network-backed transport. Feature-gated because
/// the engine core must not force a TLS stack on callers who never
/// timestamp.
#[cfg(feature = "http-timestamp")]
pub struct ReqwestTimestampTransport {
    client: reqwest::blocking::Client,
}

#[cfg(feature = "http-timestamp")]
impl ReqwestTimestampTransport {
    pub fn new() -> Self {
        Self {
            client: reqwest::blocking::Client::new(),
        }
    }
}

#[cfg(feature = "http-timestamp")]
impl Default for ReqwestTimestampTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "http-timestamp")]
impl TimestampTransport for ReqwestTimestampTransport {
    fn post(&self, url: &str, content_type: &str, body: &[u8]) -> Result<TimestampResponse> {
        let resp = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(body.to_vec())
            .send()
            .map_err(|e| Error::TimestampFailed(e.to_string()))?;

        let status = resp.status().as_u16();
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let body = resp
            .bytes()
            .map_err(|e| Error::TimestampFailed(e.to_string()))?
            .to_vec();

        Ok(TimestampResponse {
            status,
            content_type,
            body,
        })
    }
}

/// Configuration for a single timestamp request, the configuration surface
/// the engine exposes in lieu of a CLI-parsed equivalent.
pub struct TimestampOptions<'a> {
    pub tsa_url: String,
    pub digest_algorithm: DigestAlgorithm,
    pub transport: &'a dyn TimestampTransport,
}

impl<'a> TimestampOptions<'a> {
    pub fn new(
        tsa_url: impl Into<String>,
        digest_algorithm: DigestAlgorithm,
        transport: &'a dyn TimestampTransport,
    ) -> Self {
        Self {
            tsa_url: tsa_url.into(),
            digest_algorithm,
            transport,
        }
    }
}

fn hash_algorithm_oid(alg: DigestAlgorithm) -> &'static str {
    match alg {
        DigestAlgorithm::Sha1 => "1.3.14.3.2.26",
        DigestAlgorithm::Sha256 => "2.16.840.1.101.3.4.2.1",
        DigestAlgorithm::Sha384 => "2.16.840.1.101.3.4.2.2",
        DigestAlgorithm::Sha512 => "2.16.840.1.101.3.4.2.3",
    }
}

fn encode_message_imprint(alg: DigestAlgorithm, hashed_message: &[u8]) -> Result<Vec<u8>> {
    let algorithm_identifier = der::sequence(&[der::oid(hash_algorithm_oid(alg))?, der::null()]);
    Ok(der::sequence(&[
        algorithm_identifier,
        der::octet_string(hashed_message),
    ]))
}

/// Build a `TimeStampReq`: version 1, the message imprint, a random
/// 64-bit nonce, and `certReq = true`.
pub fn build_time_stamp_req(alg: DigestAlgorithm, message_hash: &[u8], nonce: u64) -> Result<Vec<u8>> {
    Ok(der::sequence(&[
        der::integer_from_u64(1),
        encode_message_imprint(alg, message_hash)?,
        der::integer_from_u64(nonce),
        der::boolean(true),
    ]))
}

struct ParsedResponse {
    status: i64,
    time_stamp_token_der: Option<Vec<u8>>,
}

fn bytes_to_i64(bytes: &[u8]) -> i64 {
    let mut value: i64 = 0;
    for &b in bytes {
        value = (value << 8) | b as i64;
    }
    value
}

fn bytes_to_u64(bytes: &[u8]) -> u64 {
    let mut value: u64 = 0;
    for &b in bytes {
        value = (value << 8) | b as u64;
    }
    value
}

fn parse_time_stamp_resp(resp_der: &[u8]) -> Result<ParsedResponse> {
    let top = der::expect_sequence(resp_der)?;
    if top.is_empty() {
        return Err(Error::TimestampFailed("empty TimeStampResp".into()));
    }

    let status_info = der::children(top[0].content)?;
    if status_info.is_empty() {
        return Err(Error::TimestampFailed("PKIStatusInfo missing status".into()));
    }
    if status_info[0].tag != 0x02 {
        return Err(Error::TimestampFailed("PKIStatus is not an INTEGER".into()));
    }
    let status = bytes_to_i64(status_info[0].content);

    let time_stamp_token_der = top.get(1).map(|el| der::tlv(el.tag, el.content));

    Ok(ParsedResponse {
        status,
        time_stamp_token_der,
    })
}

/// Pull the DER-encoded `TSTInfo` out of a `TimeStampToken`
/// (`ContentInfo` wrapping a CMS `SignedData` whose `encapContentInfo`
/// carries `TSTInfo` as its `eContent`).
fn extract_tst_info(token_der: &[u8]) -> Result<Vec<u8>> {
    let content_info = der::expect_sequence(token_der)?;
    if content_info.len() < 2 {
        return Err(Error::TimestampFailed("malformed TimeStampToken".into()));
    }
    let explicit_content = content_info[1];
    if explicit_content.tag != 0xA0 {
        return Err(Error::TimestampFailed(
            "TimeStampToken content is not explicitly tagged".into(),
        ));
    }

    let signed_data = der::expect_sequence(explicit_content.content)?;
    if signed_data.len() < 3 {
        return Err(Error::TimestampFailed("malformed SignedData".into()));
    }

    let encap_content_info = der::children(signed_data[2].content)?;
    if encap_content_info.len() < 2 {
        return Err(Error::TimestampFailed(
            "SignedData missing encapsulated content".into(),
        ));
    }
    let econtent_wrapper = encap_content_info[1];
    if econtent_wrapper.tag != 0xA0 {
        return Err(Error::TimestampFailed("eContent is not explicitly tagged".into()));
    }

    let (octet_string, _) = der::parse_one(econtent_wrapper.content)?;
    if octet_string.tag != 0x04 {
        return Err(Error::TimestampFailed("eContent is not an OCTET STRING".into()));
    }

    Ok(octet_string.content.to_vec())
}

fn verify_token_matches_request(
    tst_info_der: &[u8],
    expected_hash: &[u8],
    expected_nonce: u64,
    expected_alg: DigestAlgorithm,
) -> Result<()> {
    let fields = der::expect_sequence(tst_info_der)?;
    if fields.len() < 5 {
        return Err(Error::TimestampFailed("TSTInfo missing required fields".into()));
    }

    let message_imprint = der::children(fields[2].content)?;
    if message_imprint.len() < 2 {
        return Err(Error::TimestampFailed("TSTInfo missing messageImprint".into()));
    }

    let algorithm_identifier = der::children(message_imprint[0].content)?;
    if algorithm_identifier.is_empty() {
        return Err(Error::TimestampFailed("messageImprint missing algorithm".into()));
    }
    let expected_oid = der::oid(hash_algorithm_oid(expected_alg))?;
    let (expected_oid_element, _) = der::parse_one(&expected_oid)?;
    if algorithm_identifier[0].content != expected_oid_element.content {
        return Err(Error::TimestampFailed(
            "hash algorithm mismatch in timestamp token".into(),
        ));
    }

    if message_imprint[1].content != expected_hash {
        return Err(Error::TimestampFailed(
            "messageImprint mismatch in timestamp token".into(),
        ));
    }

    let nonce_matches = fields[5..]
        .iter()
        .any(|el| el.tag == 0x02 && bytes_to_u64(el.content) == expected_nonce);
    if !nonce_matches {
        return Err(Error::TimestampFailed("nonce mismatch in timestamp token".into()));
    }

    Ok(())
}

fn extract_signature_value(xml: &[u8]) -> Result<Vec<u8>> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut in_value = false;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) if e.name().local_name().as_ref() == b"SignatureValue" => {
                in_value = true;
            }
            Event::Text(t) if in_value => {
                let text = t.unescape()?.into_owned();
                let cleaned: String = text.chars().filter(|c| !c.is_whitespace()).collect();
                return Ok(base64::engine::general_purpose::STANDARD.decode(&cleaned)?);
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Err(Error::MalformedPackage(
        "signature part is missing a SignatureValue element".into(),
    ))
}

const XADES_NS: &str = "http://uri.etsi.org/01903/v1.1.1#";

fn embed_timestamp_object(signature_xml: &[u8], token_der: &[u8]) -> Result<Vec<u8>> {
    let target = format!("#{}", crate::signature::signature_document_id());
    let encapsulated = base64::engine::general_purpose::STANDARD.encode(token_der);
    let object = format!(
        "<Object><xd:QualifyingProperties xmlns:xd=\"{XADES_NS}\" Target=\"{target}\">\
<xd:UnsignedProperties><xd:UnsignedSignatureProperties>\
<xd:SignatureTimeStamp><xd:EncapsulatedTimeStamp>{encapsulated}</xd:EncapsulatedTimeStamp></xd:SignatureTimeStamp>\
</xd:UnsignedSignatureProperties></xd:UnsignedProperties></xd:QualifyingProperties></Object>"
    );

    let haystack =
        std::str::from_utf8(signature_xml).map_err(Error::Utf8)?;
    let pos = haystack.rfind("</Signature>").ok_or_else(|| {
        Error::MalformedPackage("signature part is missing a closing </Signature>".into())
    })?;

    let mut out = String::with_capacity(haystack.len() + object.len());
    out.push_str(&haystack[..pos]);
    out.push_str(&object);
    out.push_str(&haystack[pos..]);
    Ok(out.into_bytes())
}

/// Countersign the signature at `signature_part_uri` with an RFC 3161
/// timestamp: builds the request over `H(SignatureValue)`, posts it via
/// `options.transport`, validates the response, and rewrites the
/// signature part with the token embedded. `SignedInfo`/`SignatureValue`
/// bytes are untouched; only a new `Object` is appended.
pub fn timestamp_signature(
    package: &mut Package,
    signature_part_uri: &PartUri,
    options: &TimestampOptions,
) -> Result<()> {
    if package.is_read_only() {
        return Err(Error::ReadOnly);
    }

    let signature_xml = package
        .part(signature_part_uri)
        .ok_or_else(|| Error::PartNotFound(signature_part_uri.as_str().to_string()))?
        .data()
        .to_vec();

    let signature_value = extract_signature_value(&signature_xml)?;
    let message_hash = options.digest_algorithm.digest(&signature_value);
    let nonce: u64 = rand::random();

    let request_der = build_time_stamp_req(options.digest_algorithm, &message_hash, nonce)?;

    log::info!("requesting RFC 3161 timestamp from {}", options.tsa_url);
    let response = options
        .transport
        .post(&options.tsa_url, "application/timestamp-query", &request_der)?;

    if response.status != 200 || !response.content_type.starts_with("application/timestamp-reply") {
        return Err(Error::TimestampFailed(format!(
            "unexpected TSA response: status {} content-type '{}'",
            response.status, response.content_type
        )));
    }

    let parsed = parse_time_stamp_resp(&response.body)?;
    if parsed.status != 0 && parsed.status != 1 {
        return Err(Error::TimestampFailed(format!(
            "TSA rejected the request (PKIStatus {})",
            parsed.status
        )));
    }

    let token_der = parsed
        .time_stamp_token_der
        .ok_or_else(|| Error::TimestampFailed("TSA granted status but returned no token".into()))?;

    let tst_info = extract_tst_info(&token_der)?;
    verify_token_matches_request(&tst_info, &message_hash, nonce, options.digest_algorithm)?;

    let updated_xml = embed_timestamp_object(&signature_xml, &token_der)?;
    package.write_part(
        signature_part_uri,
        crate::opc::DIGITAL_SIGNATURE_XML,
        updated_xml,
    )?;

    log::info!("embedded RFC 3161 timestamp token into {}", signature_part_uri);
    Ok(())
}
