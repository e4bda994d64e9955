//! Certificate-based ("keyless") verification.
//!
//! The signer's key is not configured up front; it comes from the
//! short-lived leaf certificate that travels with each attestation. The
//! leaf must chain to one of the configured roots, possibly through
//! intermediates shipped in the same PEM chain.

use der::{Decode, Encode};
use sigstore::crypto::{CosignVerificationKey, Signature};
use tracing::debug;
use x509_cert::Certificate;

use crate::error::SignatureError;
use crate::pem;
use crate::signature::{SignatureVerifier, VerifyOptions};

/// Longest chain walked before giving up.
const MAX_CHAIN_DEPTH: usize = 8;

/// Verifies signatures with the key of a certificate that chains to a
/// trusted root.
pub struct CertificateVerifier {
    roots: Vec<Certificate>,
    authority: String,
}

impl std::fmt::Debug for CertificateVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateVerifier")
            .field("roots", &self.roots.len())
            .field("authority", &self.authority)
            .finish()
    }
}

impl CertificateVerifier {
    /// Build from PEM-encoded trusted roots.
    ///
    /// `authority` names the issuing certificate authority; it is used in
    /// logs and reports only.
    pub fn from_pem_roots(
        roots_pem: &str,
        authority: impl Into<String>,
    ) -> Result<Self, SignatureError> {
        let roots = parse_chain(roots_pem)?;
        if roots.is_empty() {
            return Err(SignatureError::Certificate(
                "no root certificates found in PEM input".to_owned(),
            ));
        }
        Ok(Self {
            roots,
            authority: authority.into(),
        })
    }

    /// Walk from `leaf` to a trusted root, checking each link's signature.
    fn verify_chain(
        &self,
        leaf: &Certificate,
        intermediates: &[Certificate],
    ) -> Result<(), SignatureError> {
        let mut current = leaf.clone();

        for _ in 0..MAX_CHAIN_DEPTH {
            if self.roots.iter().any(|root| *root == current) {
                return Ok(());
            }

            let issuer_name = &current.tbs_certificate.issuer;
            if let Some(root) = self
                .roots
                .iter()
                .find(|root| root.tbs_certificate.subject == *issuer_name)
            {
                verify_issued_by(&current, root)?;
                debug!(authority = %self.authority, "certificate chains to trusted root");
                return Ok(());
            }

            let issuer = intermediates
                .iter()
                .find(|c| c.tbs_certificate.subject == *issuer_name && **c != current)
                .ok_or_else(|| {
                    SignatureError::Certificate(format!(
                        "no issuer found for certificate `{}`",
                        current.tbs_certificate.subject
                    ))
                })?;
            verify_issued_by(&current, issuer)?;
            current = issuer.clone();
        }

        Err(SignatureError::Certificate(format!(
            "certificate chain longer than {MAX_CHAIN_DEPTH}"
        )))
    }
}

impl SignatureVerifier for CertificateVerifier {
    fn verify_signature(
        &self,
        signature: &[u8],
        message: &[u8],
        options: &VerifyOptions<'_>,
    ) -> Result<(), SignatureError> {
        let chain_pem = options.certificate_chain.ok_or_else(|| {
            SignatureError::Certificate("attestation carries no certificate chain".to_owned())
        })?;
        let chain = parse_chain(chain_pem)?;
        let (leaf, intermediates) = chain.split_first().ok_or_else(|| {
            SignatureError::Certificate("certificate chain is empty".to_owned())
        })?;

        self.verify_chain(leaf, intermediates)?;

        if signature.is_empty() {
            return Err(SignatureError::InvalidSignature("empty signature".to_owned()));
        }
        certificate_key(leaf)?
            .verify_signature(Signature::Raw(signature), message)
            .map_err(|e| SignatureError::InvalidSignature(format!("certificate key: {e}")))
    }
}

fn parse_chain(pem_chain: &str) -> Result<Vec<Certificate>, SignatureError> {
    pem::pem_blocks(pem_chain)
        .iter()
        .map(|der| {
            Certificate::from_der(der).map_err(|e| {
                SignatureError::Certificate(format!("failed to parse X.509 certificate: {e}"))
            })
        })
        .collect()
}

fn certificate_key(cert: &Certificate) -> Result<CosignVerificationKey, SignatureError> {
    let spki_der = cert
        .tbs_certificate
        .subject_public_key_info
        .to_der()
        .map_err(|e| SignatureError::Certificate(format!("failed to encode SPKI: {e}")))?;
    CosignVerificationKey::try_from_der(&spki_der).map_err(|e| {
        SignatureError::UnsupportedKey(format!("unsupported key type in certificate: {e}"))
    })
}

/// Check that `issuer`'s key signed `cert`.
fn verify_issued_by(cert: &Certificate, issuer: &Certificate) -> Result<(), SignatureError> {
    let tbs = cert
        .tbs_certificate
        .to_der()
        .map_err(|e| SignatureError::Certificate(format!("failed to encode TBS: {e}")))?;
    certificate_key(issuer)?
        .verify_signature(Signature::Raw(cert.signature.raw_bytes()), &tbs)
        .map_err(|e| {
            SignatureError::Certificate(format!(
                "certificate `{}` not signed by `{}`: {e}",
                cert.tbs_certificate.subject, issuer.tbs_certificate.subject
            ))
        })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::str::FromStr;
    use std::time::Duration;

    use aws_lc_rs::signature::EcdsaKeyPair;
    use p256::ecdsa::{DerSignature, SigningKey};
    use x509_cert::builder::{Builder, CertificateBuilder, Profile};
    use x509_cert::name::Name;
    use x509_cert::serial_number::SerialNumber;
    use x509_cert::spki::SubjectPublicKeyInfoOwned;
    use x509_cert::time::Validity;

    use crate::dsse::envelope_verifier;
    use crate::dsse::tests::signed_envelope;
    use crate::signature::tests::generate_test_keypair;

    /// A root -> intermediate -> leaf chain whose leaf key signs envelopes.
    pub(crate) struct TestChain {
        pub(crate) root: Certificate,
        pub(crate) intermediate: Certificate,
        pub(crate) leaf: Certificate,
        pub(crate) leaf_key: EcdsaKeyPair,
    }

    impl TestChain {
        pub(crate) fn new() -> Self {
            let root_key = ca_key(1);
            let intermediate_key = ca_key(2);
            let root = issue("CN=Test Root", None, &p256_spki(&root_key), &root_key, 1);
            let intermediate = issue(
                "CN=Test Intermediate",
                Some("CN=Test Root"),
                &p256_spki(&intermediate_key),
                &root_key,
                2,
            );
            let (leaf_key, leaf_pem) = generate_test_keypair();
            let leaf_spki = SubjectPublicKeyInfoOwned::from_der(
                &pem::pem_to_der(&leaf_pem).expect("leaf key PEM"),
            )
            .expect("leaf SPKI");
            let leaf = issue(
                "CN=signer@example.com",
                Some("CN=Test Intermediate"),
                &leaf_spki,
                &intermediate_key,
                3,
            );
            Self {
                root,
                intermediate,
                leaf,
                leaf_key,
            }
        }

        pub(crate) fn roots_pem(&self) -> String {
            to_pem(&self.root)
        }

        /// Leaf first, as shipped with an attestation.
        pub(crate) fn chain_pem(&self) -> String {
            format!("{}{}", to_pem(&self.leaf), to_pem(&self.intermediate))
        }
    }

    fn ca_key(seed: u8) -> SigningKey {
        SigningKey::from_slice(&[seed; 32]).expect("valid scalar")
    }

    fn p256_spki(key: &SigningKey) -> SubjectPublicKeyInfoOwned {
        SubjectPublicKeyInfoOwned::from_key(*key.verifying_key()).expect("SPKI")
    }

    fn issue(
        subject: &str,
        issuer: Option<&str>,
        spki: &SubjectPublicKeyInfoOwned,
        signer: &SigningKey,
        serial: u8,
    ) -> Certificate {
        let profile = Profile::Manual {
            issuer: issuer.map(|name| Name::from_str(name).expect("issuer name")),
        };
        CertificateBuilder::new(
            profile,
            SerialNumber::new(&[serial]).expect("serial"),
            Validity::from_now(Duration::from_secs(600)).expect("validity"),
            Name::from_str(subject).expect("subject name"),
            spki.clone(),
            signer,
        )
        .expect("builder")
        .build::<DerSignature>()
        .expect("certificate")
    }

    fn to_pem(cert: &Certificate) -> String {
        pem::der_to_pem(&cert.to_der().expect("encode"), "CERTIFICATE")
    }

    fn verify_with(
        roots_pem: &str,
        chain_pem: Option<&str>,
        env: &[u8],
    ) -> Result<(), SignatureError> {
        let roots = CertificateVerifier::from_pem_roots(roots_pem, "https://fulcio.example")?;
        let verifier = envelope_verifier(roots);
        let options = VerifyOptions {
            keyid: None,
            certificate_chain: chain_pem,
        };
        verifier.verify_signature(&[], env, &options)
    }

    #[test]
    fn leaf_chaining_through_intermediate_is_accepted() {
        let chain = TestChain::new();
        let env = signed_envelope(&chain.leaf_key, "text/plain", b"hello", None);
        let chain_pem = chain.chain_pem();
        verify_with(&chain.roots_pem(), Some(&chain_pem), &env).expect("chain verifies");
    }

    #[test]
    fn foreign_root_with_same_name_is_rejected() {
        let chain = TestChain::new();
        let impostor_key = ca_key(9);
        let impostor = issue("CN=Test Root", None, &p256_spki(&impostor_key), &impostor_key, 1);
        let env = signed_envelope(&chain.leaf_key, "text/plain", b"hello", None);

        let chain_pem = chain.chain_pem();
        let err = verify_with(&to_pem(&impostor), Some(&chain_pem), &env).unwrap_err();
        assert!(err.to_string().contains("not signed by"), "got: {err}");
    }

    #[test]
    fn unrelated_root_finds_no_issuer() {
        let chain = TestChain::new();
        let other_key = ca_key(7);
        let other = issue("CN=Other Root", None, &p256_spki(&other_key), &other_key, 1);
        let env = signed_envelope(&chain.leaf_key, "text/plain", b"hello", None);

        let chain_pem = chain.chain_pem();
        let err = verify_with(&to_pem(&other), Some(&chain_pem), &env).unwrap_err();
        assert!(err.to_string().contains("no issuer found"), "got: {err}");
    }

    #[test]
    fn tampered_intermediate_is_rejected() {
        let chain = TestChain::new();
        let mut tampered = chain.intermediate.clone();
        tampered.tbs_certificate.serial_number = SerialNumber::new(&[0x42]).expect("serial");
        let chain_pem = format!("{}{}", to_pem(&chain.leaf), to_pem(&tampered));
        let env = signed_envelope(&chain.leaf_key, "text/plain", b"hello", None);

        let err = verify_with(&chain.roots_pem(), Some(&chain_pem), &env).unwrap_err();
        assert!(matches!(err, SignatureError::Certificate(_)), "got: {err}");
    }

    #[test]
    fn missing_chain_is_rejected() {
        let chain = TestChain::new();
        let env = signed_envelope(&chain.leaf_key, "text/plain", b"hello", None);
        let err = verify_with(&chain.roots_pem(), None, &env).unwrap_err();
        assert!(err.to_string().contains("no certificate chain"), "got: {err}");
    }

    #[test]
    fn envelope_signed_by_other_key_is_rejected() {
        let chain = TestChain::new();
        let (other_key, _) = generate_test_keypair();
        let env = signed_envelope(&other_key, "text/plain", b"hello", None);
        let chain_pem = chain.chain_pem();
        assert!(verify_with(&chain.roots_pem(), Some(&chain_pem), &env).is_err());
    }

    #[test]
    fn leaf_that_is_a_root_is_trusted_directly() {
        let chain = TestChain::new();
        let env = signed_envelope(&chain.leaf_key, "text/plain", b"hello", None);
        let roots = format!("{}{}", chain.roots_pem(), to_pem(&chain.leaf));
        let leaf_pem = to_pem(&chain.leaf);
        verify_with(&roots, Some(&leaf_pem), &env).expect("pinned leaf");
    }

    #[test]
    fn empty_root_bundle_is_rejected() {
        let err = CertificateVerifier::from_pem_roots("", "https://fulcio.example").unwrap_err();
        assert!(matches!(err, SignatureError::Certificate(_)));
    }

    #[test]
    fn garbage_root_is_rejected() {
        let pem = pem::der_to_pem(b"definitely not DER", "CERTIFICATE");
        let err = CertificateVerifier::from_pem_roots(&pem, "https://fulcio.example").unwrap_err();
        assert!(err.to_string().contains("X.509"), "got: {err}");
    }

    #[test]
    fn parse_chain_skips_nothing_on_empty_input() {
        assert!(parse_chain("no pem here").unwrap().is_empty());
    }

    #[test]
    fn garbage_chain_is_a_certificate_error() {
        let pem = pem::der_to_pem(&[0x30, 0x03, 0x02, 0x01, 0x01], "CERTIFICATE");
        assert!(matches!(
            parse_chain(&pem),
            Err(SignatureError::Certificate(_))
        ));
    }
}
