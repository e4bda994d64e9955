//! DSSE envelope verification and the envelope-aware adapter.
//!
//! [`DsseVerifier`] checks a whole envelope: it expects the envelope JSON
//! in the *signature* slot, ignores the message slot, and verifies each
//! envelope signature over the pre-authentication encoding with a raw
//! verifier.
//!
//! The attestation pipeline hands an envelope over in the *message* slot
//! (there is no detached signature for an attestation, the envelope is
//! the signed object). [`EnvelopeVerifier`] bridges the two conventions:
//! it drops whatever arrives in the signature slot and forwards the
//! message to the wrapped verifier's signature slot.

use base64::Engine;
use yatima_envelope::Envelope;

use crate::error::SignatureError;
use crate::signature::{SignatureVerifier, VerifyOptions};

/// Verifies a DSSE envelope passed in the signature slot.
#[derive(Debug, Clone)]
pub struct DsseVerifier<V> {
    inner: V,
}

impl<V: SignatureVerifier> DsseVerifier<V> {
    /// Wrap a raw `(signature, message)` verifier.
    pub const fn new(inner: V) -> Self {
        Self { inner }
    }
}

impl<V: SignatureVerifier> SignatureVerifier for DsseVerifier<V> {
    fn verify_signature(
        &self,
        signature: &[u8],
        _message: &[u8],
        options: &VerifyOptions<'_>,
    ) -> Result<(), SignatureError> {
        let envelope = Envelope::from_slice(signature)?;
        if envelope.signatures.is_empty() {
            return Err(SignatureError::NoSignatures);
        }
        let pae = envelope.pae()?;

        let mut last_error = None;
        for sig in &envelope.signatures {
            if let (Some(wanted), Some(found)) = (options.keyid, sig.key_id())
                && wanted != found
            {
                continue;
            }

            let raw = match base64::engine::general_purpose::STANDARD.decode(&sig.sig) {
                Ok(raw) => raw,
                Err(e) => {
                    last_error = Some(SignatureError::InvalidSignature(format!(
                        "invalid base64 signature: {e}"
                    )));
                    continue;
                }
            };

            match self.inner.verify_signature(&raw, &pae, options) {
                Ok(()) => return Ok(()),
                Err(e) => last_error = Some(e),
            }
        }

        Err(last_error.unwrap_or_else(|| {
            SignatureError::KeyIdMismatch(options.keyid.unwrap_or_default().to_owned())
        }))
    }
}

/// Adapter that takes the envelope from the message slot.
///
/// The signature slot is never read, so its contents cannot influence the
/// outcome.
#[derive(Debug, Clone)]
pub struct EnvelopeVerifier<V> {
    inner: V,
}

impl<V: SignatureVerifier> EnvelopeVerifier<V> {
    /// Wrap a verifier that expects the envelope in its signature slot.
    pub const fn new(inner: V) -> Self {
        Self { inner }
    }
}

impl<V: SignatureVerifier> SignatureVerifier for EnvelopeVerifier<V> {
    fn verify_signature(
        &self,
        _signature: &[u8],
        message: &[u8],
        options: &VerifyOptions<'_>,
    ) -> Result<(), SignatureError> {
        self.inner.verify_signature(message, &[], options)
    }
}

/// The verifier the attestation pipeline uses for a raw key verifier.
pub const fn envelope_verifier<V: SignatureVerifier>(raw: V) -> EnvelopeVerifier<DsseVerifier<V>> {
    EnvelopeVerifier::new(DsseVerifier::new(raw))
}
