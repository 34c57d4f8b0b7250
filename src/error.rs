//! Error types for vsix-sign

use thiserror::Error;

/// Main error type.
///
/// This is the single public error surface for the crate: every fallible
/// external call (`zip`, `quick-xml`, certificate decoding, ...) is wrapped
/// via `#[from]` or an explicit variant, never `unwrap`/`expect` outside
/// tests.
#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("XML encoding error: {0}")]
    XmlEncoding(#[from] quick_xml::encoding::EncodingError),

    #[error("XML attribute error: {0}")]
    XmlAttr(#[from] quick_xml::events::attributes::AttrError),

    #[error("UTF-8 error: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("missing required part: {0}")]
    MissingPart(String),

    #[error("invalid part URI: {0}")]
    InvalidPartUri(String),

    #[error("unknown content type for part: {0}")]
    UnknownContentType(String),

    #[error("invalid relationship: {0}")]
    InvalidRelationship(String),

    #[error("missing attribute '{attr}' on element '{element}'")]
    MissingAttribute { element: String, attr: String },

    #[error("malformed package: {0}")]
    MalformedPackage(String),

    #[error("part not found: {0}")]
    PartNotFound(String),

    #[error("mutation attempted on a read-only package")]
    ReadOnly,

    #[error("no references enqueued for signing")]
    NoReferencesEnqueued,

    #[error("operation attempted on a removed or finalized signature handle")]
    InvalidOperation,

    #[error("cryptographic failure: {0}")]
    CryptoFailure(String),

    #[error("certificate decode error: {0}")]
    CertificateDecode(String),

    #[error("timestamp request failed: {0}")]
    TimestampFailed(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Maps an error to the exit-code policy described by the CLI surface:
    /// `1` for validation failures, `2` for cryptographic or I/O failure.
    ///
    /// A CLI collaborator is expected to call this instead of re-deriving
    /// the 0/1/2 policy on its own.
    pub fn suggested_exit_code(&self) -> i32 {
        match self {
            Error::ReadOnly
            | Error::NoReferencesEnqueued
            | Error::InvalidOperation
            | Error::UnknownContentType(_)
            | Error::MalformedPackage(_)
            | Error::InvalidPartUri(_)
            | Error::InvalidRelationship(_)
            | Error::MissingAttribute { .. }
            | Error::MissingPart(_)
            | Error::PartNotFound(_) => 1,
            Error::Io(_)
            | Error::Zip(_)
            | Error::Xml(_)
            | Error::XmlEncoding(_)
            | Error::XmlAttr(_)
            | Error::Utf8(_)
            | Error::Base64(_)
            | Error::CryptoFailure(_)
            | Error::CertificateDecode(_)
            | Error::TimestampFailed(_) => 2,
        }
    }
}
