//! Top-level entry points: the small, opinionated surface a CLI or build
//! step would call, assembled from the lower-level builder/enumerator/
//! timestamp modules.

use crate::enumerate::{self, SignatureSummary};
use crate::error::{Error, Result};
use crate::identity::{DigestAlgorithm, SigningIdentity};
use crate::opc::Package;
use crate::signature::{self, Preset, VsixPreset};
use crate::timestamp::TimestampOptions;

/// Configuration for [`sign_package`]. Keeping this as a struct (rather
/// than threading each parameter through the call) is what lets a host
/// swap in a different reference-set preset without touching the engine.
pub struct SigningOptions<'a> {
    pub digest_algorithm: DigestAlgorithm,
    pub preset: &'a dyn Preset,
}

impl<'a> SigningOptions<'a> {
    /// The VSIX reference set at the given digest algorithm.
    pub fn vsix(digest_algorithm: DigestAlgorithm) -> Self {
        Self {
            digest_algorithm,
            preset: &VsixPreset,
        }
    }
}

/// Sign `package` with `identity`, using `options` to choose the digest
/// algorithm and reference-set preset. Returns the new signature part's
/// URI as a string (stable across the handle types the enumerator hands
/// back).
pub fn sign_package(
    package: &mut Package,
    options: &SigningOptions,
    identity: &dyn SigningIdentity,
) -> Result<String> {
    let uri = signature::sign(package, options.preset, options.digest_algorithm, identity)?;
    Ok(uri.as_str().to_string())
}

/// List every signature currently present in `package`.
pub fn list_signatures(package: &Package) -> Result<Vec<SignatureSummary>> {
    enumerate::signatures(package)
        .iter()
        .map(|h| h.summary(package))
        .collect()
}

/// Remove every signature present in `package`. Returns the number
/// removed (zero for an already-unsigned package; this is not an error,
/// matching the edge case that removing from an unsigned package is a
/// no-op rather than a failure).
pub fn remove_signatures(package: &mut Package) -> Result<usize> {
    let mut handles = enumerate::signatures(package);
    let count = handles.len();
    for handle in &mut handles {
        handle.remove(package)?;
    }
    Ok(count)
}

/// Countersign the package's sole signature with an RFC 3161 timestamp.
/// Fails with [`Error::InvalidOperation`] if the package carries no
/// signature, or more than one — this convenience entry point has no
/// basis for picking among several, so a package with more than one
/// signature is out of scope here (use [`enumerate::signatures`] directly
/// and call [`crate::enumerate::SignatureHandle::timestamp`] on the
/// handle you want).
pub fn timestamp_package(package: &mut Package, options: &TimestampOptions) -> Result<()> {
    let mut handles = enumerate::signatures(package);
    if handles.len() != 1 {
        return Err(Error::InvalidOperation);
    }
    handles[0].timestamp(package, options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::RsaSigningIdentity;
    use crate::opc::{Part, PartUri};
    use base64::Engine as _;

    const RSA_PK8: &str = include_str!("../tests/fixtures/rsa_signer.pk8.pem");
    const RSA_CRT_PEM: &str = include_str!("../tests/fixtures/rsa_signer.crt.pem");

    fn pem_to_der(pem: &str) -> Vec<u8> {
        let body: String = pem
            .lines()
            .filter(|l| !l.starts_with("-----"))
            .collect::<Vec<_>>()
            .join("");
        base64::engine::general_purpose::STANDARD.decode(body).unwrap()
    }

    fn unsigned_package() -> Package {
        let mut pkg = Package::new();
        let uri = PartUri::new("/extension.vsixmanifest").unwrap();
        pkg.add_part(Part::new(uri, "text/xml", b"<PackageManifest/>".to_vec()))
            .unwrap();
        pkg
    }

    #[test]
    fn test_sign_and_list_round_trip() {
        let mut pkg = unsigned_package();
        let identity =
            RsaSigningIdentity::from_pkcs8_pem(RSA_PK8, vec![pem_to_der(RSA_CRT_PEM)]).unwrap();
        let options = SigningOptions::vsix(DigestAlgorithm::Sha256);

        sign_package(&mut pkg, &options, &identity).unwrap();

        let summaries = list_signatures(&pkg).unwrap();
        assert_eq!(summaries.len(), 1);
        assert!(!summaries[0].has_timestamp);
    }

    #[test]
    fn test_remove_signatures_on_unsigned_package_is_noop() {
        let mut pkg = unsigned_package();
        let removed = remove_signatures(&mut pkg).unwrap();
        assert_eq!(removed, 0);
    }

    #[test]
    fn test_remove_signatures_clears_all() {
        let mut pkg = unsigned_package();
        let identity =
            RsaSigningIdentity::from_pkcs8_pem(RSA_PK8, vec![pem_to_der(RSA_CRT_PEM)]).unwrap();
        let options = SigningOptions::vsix(DigestAlgorithm::Sha256);
        sign_package(&mut pkg, &options, &identity).unwrap();

        let removed = remove_signatures(&mut pkg).unwrap();
        assert_eq!(removed, 1);
        assert!(list_signatures(&pkg).unwrap().is_empty());
    }

    #[test]
    fn test_timestamp_package_without_signature_fails() {
        let mut pkg = unsigned_package();
        let transport = crate::timestamp::FnTransport(|_: &str, _: &str, _: &[u8]| {
            unreachable!("no signature to timestamp")
        });
        let options = TimestampOptions::new("http://timestamp.example/tsa", DigestAlgorithm::Sha256, &transport);
        let result = timestamp_package(&mut pkg, &options);
        assert!(matches!(result, Err(Error::InvalidOperation)));
    }
}
