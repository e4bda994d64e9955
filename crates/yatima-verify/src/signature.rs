//! Raw signature verifiers.
//!
//! A [`SignatureVerifier`] checks a `(signature, message)` pair. Two key
//! paths exist:
//! - **P-256**: ECDSA P-256 / SHA-256 through `aws-lc-rs`, used for the
//!   common `cosign generate-key-pair` keys.
//! - **Other key types**: whatever `sigstore`'s `CosignVerificationKey`
//!   understands (P-384, Ed25519, RSA), also used for certificate keys.

use std::sync::Arc;

use aws_lc_rs::signature::{ECDSA_P256_SHA256_ASN1, UnparsedPublicKey};
use sigstore::crypto::{CosignVerificationKey, Signature};

use crate::error::SignatureError;
use crate::pem;

/// Per-call context for a signature check.
#[derive(Debug, Clone, Copy, Default)]
pub struct VerifyOptions<'a> {
    /// Only envelope signatures carrying this key id (or none) are tried.
    pub keyid: Option<&'a str>,
    /// PEM certificate chain (leaf first) that came with the signature.
    pub certificate_chain: Option<&'a str>,
}

/// Checks a signature over a message.
pub trait SignatureVerifier: Send + Sync {
    /// Verify `signature` over `message`.
    fn verify_signature(
        &self,
        signature: &[u8],
        message: &[u8],
        options: &VerifyOptions<'_>,
    ) -> Result<(), SignatureError>;
}

impl<T: SignatureVerifier + ?Sized> SignatureVerifier for Arc<T> {
    fn verify_signature(
        &self,
        signature: &[u8],
        message: &[u8],
        options: &VerifyOptions<'_>,
    ) -> Result<(), SignatureError> {
        (**self).verify_signature(signature, message, options)
    }
}

impl<T: SignatureVerifier + ?Sized> SignatureVerifier for Box<T> {
    fn verify_signature(
        &self,
        signature: &[u8],
        message: &[u8],
        options: &VerifyOptions<'_>,
    ) -> Result<(), SignatureError> {
        (**self).verify_signature(signature, message, options)
    }
}

/// ECDSA P-256 verifier backed by `aws-lc-rs`.
#[derive(Debug, Clone)]
pub struct EcdsaP256Verifier {
    point: Vec<u8>,
}

impl EcdsaP256Verifier {
    /// Build from SPKI DER; fails for anything but an uncompressed P-256 key.
    pub fn from_spki_der(spki_der: &[u8]) -> Result<Self, SignatureError> {
        let point = pem::p256_point(spki_der).ok_or_else(|| {
            SignatureError::UnsupportedKey("not an uncompressed P-256 public key".to_owned())
        })?;
        Ok(Self {
            point: point.to_vec(),
        })
    }
}

impl SignatureVerifier for EcdsaP256Verifier {
    fn verify_signature(
        &self,
        signature: &[u8],
        message: &[u8],
        _options: &VerifyOptions<'_>,
    ) -> Result<(), SignatureError> {
        if signature.is_empty() {
            return Err(SignatureError::InvalidSignature("empty signature".to_owned()));
        }
        UnparsedPublicKey::new(&ECDSA_P256_SHA256_ASN1, &self.point)
            .verify(message, signature)
            .map_err(|e| SignatureError::InvalidSignature(format!("ECDSA verification failed: {e}")))
    }
}

/// Verifier for any key type `sigstore` can parse.
pub struct CosignKeyVerifier {
    key: CosignVerificationKey,
}

impl CosignKeyVerifier {
    /// Build from SPKI DER, auto-detecting the algorithm.
    pub fn from_spki_der(spki_der: &[u8]) -> Result<Self, SignatureError> {
        let key = CosignVerificationKey::try_from_der(spki_der)
            .map_err(|e| SignatureError::UnsupportedKey(e.to_string()))?;
        Ok(Self { key })
    }
}

impl SignatureVerifier for CosignKeyVerifier {
    fn verify_signature(
        &self,
        signature: &[u8],
        message: &[u8],
        _options: &VerifyOptions<'_>,
    ) -> Result<(), SignatureError> {
        if signature.is_empty() {
            return Err(SignatureError::InvalidSignature("empty signature".to_owned()));
        }
        self.key
            .verify_signature(Signature::Raw(signature), message)
            .map_err(|e| SignatureError::InvalidSignature(e.to_string()))
    }
}

/// Build a verifier from a PEM-encoded public key.
///
/// P-256 keys take the `aws-lc-rs` path; every other key type is handed
/// to `sigstore`.
pub fn public_key_verifier(public_key_pem: &str) -> Result<Arc<dyn SignatureVerifier>, SignatureError> {
    let spki_der = pem::pem_to_der(public_key_pem)
        .ok_or_else(|| SignatureError::UnsupportedKey("invalid PEM public key".to_owned()))?;

    if pem::p256_point(&spki_der).is_some() {
        return Ok(Arc::new(EcdsaP256Verifier::from_spki_der(&spki_der)?));
    }
    Ok(Arc::new(CosignKeyVerifier::from_spki_der(&spki_der)?))
}
