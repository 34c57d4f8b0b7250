//! Signing identities and the hash/signature algorithm mapping.
//!
//! `DigestAlgorithm`/`SignatureAlgorithm` translate a hash choice and key
//! kind into the XML-DSig algorithm URIs the signature builder needs;
//! `SigningIdentity` is the object-capability seam a certificate-store
//! collaborator (PFX file, HSM, OS key store, ...) implements so the
//! engine never has to parse a private key itself.

use crate::error::{Error, Result};
use digest::Digest;
use ecdsa::signature::hazmat::PrehashSigner;
use rsa::pkcs8::DecodePrivateKey;
use rsa::Pkcs1v15Sign;

/// A hash algorithm usable for both part digesting and signing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DigestAlgorithm {
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

impl DigestAlgorithm {
    /// The `DigestMethod`/transform-output algorithm URI.
    pub fn digest_method_uri(&self) -> &'static str {
        match self {
            DigestAlgorithm::Sha1 => "http://www.w3.org/2000/09/xmldsig#sha1",
            DigestAlgorithm::Sha256 => "http://www.w3.org/2001/04/xmlenc#sha256",
            DigestAlgorithm::Sha384 => "http://www.w3.org/2001/04/xmldsig-more#sha384",
            DigestAlgorithm::Sha512 => "http://www.w3.org/2001/04/xmlenc#sha512",
        }
    }

    /// Output length of this hash, in bytes.
    pub fn output_len(&self) -> usize {
        match self {
            DigestAlgorithm::Sha1 => 20,
            DigestAlgorithm::Sha256 => 32,
            DigestAlgorithm::Sha384 => 48,
            DigestAlgorithm::Sha512 => 64,
        }
    }

    /// Hash `data` with this algorithm.
    pub fn digest(&self, data: &[u8]) -> Vec<u8> {
        match self {
            DigestAlgorithm::Sha1 => sha1::Sha1::digest(data).to_vec(),
            DigestAlgorithm::Sha256 => sha2::Sha256::digest(data).to_vec(),
            DigestAlgorithm::Sha384 => sha2::Sha384::digest(data).to_vec(),
            DigestAlgorithm::Sha512 => sha2::Sha512::digest(data).to_vec(),
        }
    }
}

/// A signature algorithm: a key kind paired with the digest algorithm it
/// signs over.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SignatureAlgorithm {
    Rsa(DigestAlgorithm),
    Ecdsa(DigestAlgorithm),
}

impl SignatureAlgorithm {
    /// The `SignatureMethod` algorithm URI, per the table in the signature
    /// builder component design.
    pub fn signature_method_uri(&self) -> &'static str {
        match self {
            SignatureAlgorithm::Rsa(DigestAlgorithm::Sha1) => {
                "http://www.w3.org/2000/09/xmldsig#rsa-sha1"
            }
            SignatureAlgorithm::Rsa(DigestAlgorithm::Sha256) => {
                "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256"
            }
            SignatureAlgorithm::Rsa(DigestAlgorithm::Sha384) => {
                "http://www.w3.org/2001/04/xmldsig-more#rsa-sha384"
            }
            SignatureAlgorithm::Rsa(DigestAlgorithm::Sha512) => {
                "http://www.w3.org/2001/04/xmldsig-more#rsa-sha512"
            }
            SignatureAlgorithm::Ecdsa(DigestAlgorithm::Sha1) => {
                "http://www.w3.org/2001/04/xmldsig-more#ecdsa-sha1"
            }
            SignatureAlgorithm::Ecdsa(DigestAlgorithm::Sha256) => {
                "http://www.w3.org/2001/04/xmldsig-more#ecdsa-sha256"
            }
            SignatureAlgorithm::Ecdsa(DigestAlgorithm::Sha384) => {
                "http://www.w3.org/2001/04/xmldsig-more#ecdsa-sha384"
            }
            SignatureAlgorithm::Ecdsa(DigestAlgorithm::Sha512) => {
                "http://www.w3.org/2001/04/xmldsig-more#ecdsa-sha512"
            }
        }
    }

    pub fn digest_algorithm(&self) -> DigestAlgorithm {
        match self {
            SignatureAlgorithm::Rsa(d) | SignatureAlgorithm::Ecdsa(d) => *d,
        }
    }
}

/// A certificate and private-key provider capable of signing a digest with
/// RSA or ECDSA.
///
/// This is the object-capability seam named by the "out of scope" list in
/// the purpose statement: an external crate can plug in a PFX-backed, an
/// HSM-backed, or (for tests) an in-memory identity without the signing
/// engine knowing the difference.
pub trait SigningIdentity {
    /// The signing certificate chain, DER-encoded, leaf certificate first.
    fn certificate_chain(&self) -> &[Vec<u8>];

    /// The signature algorithm this identity will use for a given digest
    /// algorithm choice (fixes the key kind; the caller chooses the hash).
    fn signature_algorithm(&self, digest_algorithm: DigestAlgorithm) -> SignatureAlgorithm;

    /// Sign `message` (already reduced to bytes to be signed, e.g. a
    /// canonicalized `SignedInfo`) using `digest_algorithm`. Implementations
    /// hash the message themselves with `digest_algorithm` and apply the
    /// appropriate padding/curve operation.
    fn sign(&self, digest_algorithm: DigestAlgorithm, message: &[u8]) -> Result<Vec<u8>>;
}

/// An in-memory RSA [`SigningIdentity`], typically constructed from a PEM
/// or DER PKCS#8 private key and a self-signed or CA-issued certificate.
/// Production callers would more commonly obtain this from a PKCS#12 (PFX)
/// loader; that parsing step is a certificate-store collaborator's
/// responsibility, not this crate's.
pub struct RsaSigningIdentity {
    key: rsa::RsaPrivateKey,
    chain: Vec<Vec<u8>>,
}

impl RsaSigningIdentity {
    /// Build from a PKCS#8 PEM-encoded private key and a chain of DER
    /// certificates (leaf first).
    pub fn from_pkcs8_pem(pem: &str, chain: Vec<Vec<u8>>) -> Result<Self> {
        let key = rsa::RsaPrivateKey::from_pkcs8_pem(pem)
            .map_err(|e| Error::CertificateDecode(e.to_string()))?;
        Ok(Self { key, chain })
    }
}

impl SigningIdentity for RsaSigningIdentity {
    fn certificate_chain(&self) -> &[Vec<u8>] {
        &self.chain
    }

    fn signature_algorithm(&self, digest_algorithm: DigestAlgorithm) -> SignatureAlgorithm {
        SignatureAlgorithm::Rsa(digest_algorithm)
    }

    fn sign(&self, digest_algorithm: DigestAlgorithm, message: &[u8]) -> Result<Vec<u8>> {
        let hashed = digest_algorithm.digest(message);
        let scheme = match digest_algorithm {
            DigestAlgorithm::Sha1 => Pkcs1v15Sign::new::<sha1::Sha1>(),
            DigestAlgorithm::Sha256 => Pkcs1v15Sign::new::<sha2::Sha256>(),
            DigestAlgorithm::Sha384 => Pkcs1v15Sign::new::<sha2::Sha384>(),
            DigestAlgorithm::Sha512 => Pkcs1v15Sign::new::<sha2::Sha512>(),
        };
        self.key
            .sign(scheme, &hashed)
            .map_err(|e| Error::CryptoFailure(e.to_string()))
    }
}

/// An in-memory ECDSA (P-256) [`SigningIdentity`].
pub struct EcdsaSigningIdentity {
    key: p256::ecdsa::SigningKey,
    chain: Vec<Vec<u8>>,
}

impl EcdsaSigningIdentity {
    /// Build from a PKCS#8 PEM-encoded EC private key and a chain of DER
    /// certificates (leaf first).
    pub fn from_pkcs8_pem(pem: &str, chain: Vec<Vec<u8>>) -> Result<Self> {
        let key = p256::ecdsa::SigningKey::from_pkcs8_pem(pem)
            .map_err(|e| Error::CertificateDecode(e.to_string()))?;
        Ok(Self { key, chain })
    }
}

impl SigningIdentity for EcdsaSigningIdentity {
    fn certificate_chain(&self) -> &[Vec<u8>] {
        &self.chain
    }

    fn signature_algorithm(&self, digest_algorithm: DigestAlgorithm) -> SignatureAlgorithm {
        SignatureAlgorithm::Ecdsa(digest_algorithm)
    }

    fn sign(&self, digest_algorithm: DigestAlgorithm, message: &[u8]) -> Result<Vec<u8>> {
        let hashed = digest_algorithm.digest(message);
        let signature: p256::ecdsa::Signature = self
            .key
            .sign_prehash(&hashed)
            .map_err(|e| Error::CryptoFailure(e.to_string()))?;
        Ok(signature.to_bytes().to_vec())
    }
}
