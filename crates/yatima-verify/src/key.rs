//! Verification key selection.
//!
//! A [`KeySource`] is resolved once per run into the envelope-aware
//! verifier used for every attestation.

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::dsse::envelope_verifier;
use crate::error::VerificationError;
use crate::keyless::CertificateVerifier;
use crate::signature::{SignatureVerifier, public_key_verifier};
use crate::token::{TokenDriver, token_verifier};

/// Certificate authority used when none is named.
pub const DEFAULT_CERTIFICATE_AUTHORITY: &str = "https://fulcio.sigstore.dev";

/// Where the verification key comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySource {
    /// A PEM-encoded public key.
    InlinePublicKey(String),
    /// A key held by a hardware token.
    HardwareToken {
        /// Token slot holding the key.
        slot: String,
    },
    /// Short-lived certificates issued per signature (keyless).
    EphemeralCertificate {
        /// Issuing certificate authority.
        authority: String,
    },
}

impl KeySource {
    /// Read a PEM public key from `path`.
    pub fn public_key_file(path: &Path) -> Result<Self, VerificationError> {
        let pem = std::fs::read_to_string(path).map_err(|e| {
            VerificationError::Key(format!("cannot read key {}: {e}", path.display()))
        })?;
        Ok(Self::InlinePublicKey(pem))
    }

    /// Keyless verification against the default authority.
    pub fn keyless() -> Self {
        Self::EphemeralCertificate {
            authority: DEFAULT_CERTIFICATE_AUTHORITY.to_owned(),
        }
    }

    /// Whether this source needs the experimental flag.
    pub const fn is_keyless(&self) -> bool {
        matches!(self, Self::EphemeralCertificate { .. })
    }

    /// Short description for reports.
    pub fn describe(&self) -> String {
        match self {
            Self::InlinePublicKey(_) => "public key".to_owned(),
            Self::HardwareToken { slot } => format!("hardware token (slot {slot})"),
            Self::EphemeralCertificate { authority } => format!("keyless ({authority})"),
        }
    }
}

/// Inputs key resolution may need besides the source itself.
#[derive(Clone, Copy, Default)]
pub struct KeyContext<'a> {
    /// Keyless verification is allowed.
    pub experimental: bool,
    /// PEM roots for keyless verification.
    pub root_certificates: Option<&'a str>,
    /// Driver for hardware tokens.
    pub token_driver: Option<&'a dyn TokenDriver>,
}

/// Resolve `source` into an envelope-aware verifier.
///
/// Configuration problems are reported before any key material is
/// touched.
pub fn resolve_key(
    source: &KeySource,
    ctx: &KeyContext<'_>,
) -> Result<Arc<dyn SignatureVerifier>, VerificationError> {
    if source.is_keyless() && !ctx.experimental {
        return Err(VerificationError::Configuration(
            "keyless verification is experimental; enable the experimental flag".to_owned(),
        ));
    }
    let verifier: Arc<dyn SignatureVerifier> = match source {
        KeySource::InlinePublicKey(pem) => Arc::new(envelope_verifier(
            public_key_verifier(pem).map_err(|e| VerificationError::Key(e.to_string()))?,
        )),
        KeySource::HardwareToken { slot } => {
            let driver = ctx.token_driver.ok_or_else(|| {
                VerificationError::Configuration(
                    "hardware token keys are not supported by this build".to_owned(),
                )
            })?;
            Arc::new(envelope_verifier(
                token_verifier(driver, slot).map_err(|e| VerificationError::Key(e.to_string()))?,
            ))
        }
        KeySource::EphemeralCertificate { authority } => {
            let roots = ctx.root_certificates.ok_or_else(|| {
                VerificationError::Configuration(
                    "keyless verification needs root certificates".to_owned(),
                )
            })?;
            let verifier = CertificateVerifier::from_pem_roots(roots, authority.as_str())
                .map_err(|e| VerificationError::Key(e.to_string()))?;
            Arc::new(envelope_verifier(verifier))
        }
    };
    info!(key = %source.describe(), "verification key resolved");
    Ok(verifier)
}
