//! # vsix-sign
//!
//! A VSIX/OPC package signing engine for Rust.
//!
//! ## Features
//!
//! - Detached XML-DSig signing of VSIX (OPC/ZIP) packages, wired into the
//!   package via `[Content_Types].xml` overrides and relationship parts
//! - RSA and ECDSA signing identities, pluggable via the [`SigningIdentity`]
//!   trait so a certificate store or HSM can back signing without this
//!   crate parsing a private key itself
//! - RFC 3161 countersignatures, requested through the [`TimestampTransport`]
//!   trait so the engine core never hard-depends on an HTTP stack
//! - Signature discovery and removal, including cascading removal of the
//!   signature-origin part once the last signature is gone
//! - Only the canonicalization algorithms OPC actually requires: Canonical
//!   XML 1.0 and the OPC Relationships Transform — this is not a general
//!   XML-DSig library
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use vsix_sign::{DigestAlgorithm, Package, RsaSigningIdentity, SigningOptions, sign_package};
//!
//! let mut package = Package::open_read_write("extension.vsix")?;
//! let identity = RsaSigningIdentity::from_pkcs8_pem(private_key_pem, vec![cert_der])?;
//! let options = SigningOptions::vsix(DigestAlgorithm::Sha256);
//!
//! sign_package(&mut package, &options, &identity)?;
//! package.flush()?;
//! ```

pub mod canon;
pub mod digest;
pub mod engine;
pub mod enumerate;
pub mod error;
pub mod identity;
pub mod opc;
pub mod signature;
pub mod timestamp;
pub mod xml;

pub use engine::{list_signatures, remove_signatures, sign_package, timestamp_package, SigningOptions};
pub use enumerate::{signatures, SignatureHandle, SignatureSummary};
pub use error::{Error, Result};
pub use identity::{
    DigestAlgorithm, EcdsaSigningIdentity, RsaSigningIdentity, SignatureAlgorithm, SigningIdentity,
};
pub use opc::{Package, Part, PartUri};
pub use signature::{Preset, Reference, VsixPreset};
pub use timestamp::{FnTransport, TimestampOptions, TimestampResponse, TimestampTransport};

#[cfg(feature = "http-timestamp")]
pub use timestamp::ReqwestTimestampTransport;
