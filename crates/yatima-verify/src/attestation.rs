//! Per-image attestation verification.
//!
//! Fetches every attestation attached to an image and keeps the ones
//! whose signature verifies, whose claims cover the image (when a claim
//! verifier is configured) and that appear in the transparency log (when
//! a log endpoint is configured). Anything that fails one of these
//! checks is dropped with a warning; only fetch and log-client failures
//! end the image.

use std::sync::Arc;

use tracing::{debug, warn};
use yatima_envelope::Envelope;
use yatima_envelope::envelope::envelope_digest;

use crate::cancel::CancelSignal;
use crate::claims::ClaimVerifier;
use crate::error::{SignatureError, VerificationError};
use crate::fetch::{AttestationFetcher, FetchedAttestation};
use crate::rekor::TransparencyLog;
use crate::signature::{SignatureVerifier, VerifyOptions};

/// A transparency log to consult for every verified envelope.
pub struct LogCheck {
    /// Base URL of the log.
    pub endpoint: String,
    /// Client used for lookups.
    pub client: Box<dyn TransparencyLog>,
}

/// What to check for each attestation.
pub struct CheckOptions {
    /// Envelope-aware verifier; receives the envelope in the message slot.
    pub sig_verifier: Arc<dyn SignatureVerifier>,
    /// Checks statement claims against the image digest.
    pub claim_verifier: Option<Box<dyn ClaimVerifier>>,
    /// Transparency log confirmation.
    pub transparency_log: Option<LogCheck>,
}

/// An envelope that passed every configured check.
#[derive(Debug, Clone)]
pub struct VerifiedEnvelope {
    /// Parsed envelope.
    pub envelope: Envelope,
    /// Bytes as fetched; what the signature and log entry cover.
    pub raw: Vec<u8>,
    /// `sha256:<hex>` of `raw`.
    pub digest: String,
}

/// Outcome of verifying one image's attestations.
#[derive(Debug, Clone, Default)]
pub struct VerificationResult {
    /// Envelopes that passed, in fetch order.
    pub verified: Vec<VerifiedEnvelope>,
    /// Whether the transparency log confirmed every verified envelope.
    pub bundle_verified: bool,
    /// Number of attestations dropped.
    pub rejected: usize,
}

/// Verify the attestations attached to `image`.
pub fn verify_attestations(
    image: &str,
    fetcher: &dyn AttestationFetcher,
    options: &CheckOptions,
    cancel: &CancelSignal,
) -> Result<VerificationResult, VerificationError> {
    cancel.check()?;
    let set = fetcher
        .fetch_attestations(image)
        .map_err(|source| VerificationError::Fetch {
            image: image.to_owned(),
            source,
        })?;
    debug!(image, count = set.attestations.len(), "fetched attestations");

    let mut result = VerificationResult::default();
    for attestation in set.attestations {
        let digest = envelope_digest(&attestation.envelope);

        let envelope = match check_envelope(&attestation, set.image_digest.as_deref(), options) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(image, envelope = %digest, error = %e, "dropping attestation");
                result.rejected += 1;
                continue;
            }
        };

        if let Some(log) = &options.transparency_log {
            cancel.check()?;
            let included = log
                .client
                .check_inclusion(&attestation.envelope, &log.endpoint)
                .map_err(|source| VerificationError::TransparencyLog {
                    image: image.to_owned(),
                    source,
                })?;
            if !included {
                warn!(
                    image,
                    envelope = %digest,
                    error = %SignatureError::NotInLog,
                    "dropping attestation"
                );
                result.rejected += 1;
                continue;
            }
        }

        debug!(image, envelope = %digest, "attestation verified");
        result.verified.push(VerifiedEnvelope {
            envelope,
            raw: attestation.envelope,
            digest,
        });
    }

    result.bundle_verified = options.transparency_log.is_some() && !result.verified.is_empty();
    Ok(result)
}

fn check_envelope(
    attestation: &FetchedAttestation,
    image_digest: Option<&str>,
    options: &CheckOptions,
) -> Result<Envelope, SignatureError> {
    let verify_options = VerifyOptions {
        keyid: None,
        certificate_chain: attestation.certificate_chain.as_deref(),
    };
    options
        .sig_verifier
        .verify_signature(&[], &attestation.envelope, &verify_options)?;

    let envelope = Envelope::from_slice(&attestation.envelope)?;
    if let Some(claims) = &options.claim_verifier {
        claims.verify_claims(&envelope, image_digest)?;
    }
    Ok(envelope)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::claims::SubjectDigestClaimVerifier;
    use crate::dsse::envelope_verifier;
    use crate::dsse::tests::signed_envelope;
    use crate::error::{FetchError, LogError};
    use crate::fetch::AttestationSet;
    use crate::signature::public_key_verifier;
    use crate::signature::tests::generate_test_keypair;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use yatima_envelope::IN_TOTO_PAYLOAD_TYPE;

    /// Fetcher serving fixed sets per image and counting calls.
    #[derive(Default)]
    pub(crate) struct StaticFetcher {
        pub(crate) sets: std::collections::HashMap<String, AttestationSet>,
        pub(crate) failing: Vec<String>,
        pub(crate) calls: Arc<AtomicUsize>,
    }

    impl StaticFetcher {
        pub(crate) fn with(mut self, image: &str, envelopes: Vec<Vec<u8>>) -> Self {
            self.sets.insert(
                image.to_owned(),
                AttestationSet {
                    image_digest: Some("sha256:abc123".to_owned()),
                    attestations: envelopes
                        .into_iter()
                        .map(|envelope| FetchedAttestation {
                            envelope,
                            certificate_chain: None,
                        })
                        .collect(),
                },
            );
            self
        }

        pub(crate) fn failing(mut self, image: &str) -> Self {
            self.failing.push(image.to_owned());
            self
        }
    }

    impl AttestationFetcher for StaticFetcher {
        fn fetch_attestations(&self, image: &str) -> Result<AttestationSet, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing.iter().any(|i| i == image) {
                return Err(FetchError::Transport("registry unreachable".to_owned()));
            }
            Ok(self.sets.get(image).cloned().unwrap_or_default())
        }
    }

    struct FixedLog(Result<bool, ()>);

    impl TransparencyLog for FixedLog {
        fn check_inclusion(&self, _envelope: &[u8], _endpoint: &str) -> Result<bool, LogError> {
            self.0
                .map_err(|()| LogError::Malformed("log exploded".to_owned()))
        }
    }

    pub(crate) fn custom_statement(data: &serde_json::Value) -> Vec<u8> {
        serde_json::json!({
            "_type": "https://in-toto.io/Statement/v0.1",
            "predicateType": "cosign.sigstore.dev/attestation/v1",
            "subject": [{ "name": "example.com/app", "digest": { "sha256": "abc123" } }],
            "predicate": { "Data": data, "Timestamp": "2024-01-01T00:00:00Z" }
        })
        .to_string()
        .into_bytes()
    }

    fn options_for(pub_pem: &str) -> CheckOptions {
        CheckOptions {
            sig_verifier: Arc::new(envelope_verifier(public_key_verifier(pub_pem).unwrap())),
            claim_verifier: None,
            transparency_log: None,
        }
    }

    #[test]
    fn zero_attestations_is_empty_not_error() {
        let (_, pub_pem) = generate_test_keypair();
        let fetcher = StaticFetcher::default();
        let result = verify_attestations(
            "example.com/app:v1",
            &fetcher,
            &options_for(&pub_pem),
            &CancelSignal::new(),
        )
        .expect("no error");
        assert!(result.verified.is_empty());
        assert_eq!(result.rejected, 0);
        assert!(!result.bundle_verified);
    }

    #[test]
    fn bad_signature_drops_only_that_envelope() {
        let (key_pair, pub_pem) = generate_test_keypair();
        let (other_pair, _) = generate_test_keypair();
        let payload = custom_statement(&serde_json::json!("foo"));
        let good = signed_envelope(&key_pair, IN_TOTO_PAYLOAD_TYPE, &payload, None);
        let bad = signed_envelope(&other_pair, IN_TOTO_PAYLOAD_TYPE, &payload, None);
        let fetcher = StaticFetcher::default().with("example.com/app:v1", vec![bad, good.clone()]);

        let result = verify_attestations(
            "example.com/app:v1",
            &fetcher,
            &options_for(&pub_pem),
            &CancelSignal::new(),
        )
        .unwrap();
        assert_eq!(result.verified.len(), 1);
        assert_eq!(result.rejected, 1);
        assert_eq!(result.verified[0].raw, good);
        assert_eq!(result.verified[0].digest, envelope_digest(&good));
    }

    #[test]
    fn claim_mismatch_drops_envelope() {
        let (key_pair, pub_pem) = generate_test_keypair();
        let payload = custom_statement(&serde_json::json!("foo"));
        let env = signed_envelope(&key_pair, IN_TOTO_PAYLOAD_TYPE, &payload, None);
        let mut fetcher = StaticFetcher::default().with("img", vec![env]);
        fetcher.sets.get_mut("img").unwrap().image_digest = Some("sha256:ffff".to_owned());

        let mut options = options_for(&pub_pem);
        options.claim_verifier = Some(Box::new(SubjectDigestClaimVerifier));
        let result = verify_attestations("img", &fetcher, &options, &CancelSignal::new()).unwrap();
        assert!(result.verified.is_empty());
        assert_eq!(result.rejected, 1);
    }

    #[test]
    fn log_confirmation_sets_bundle_verified() {
        let (key_pair, pub_pem) = generate_test_keypair();
        let payload = custom_statement(&serde_json::json!("foo"));
        let env = signed_envelope(&key_pair, IN_TOTO_PAYLOAD_TYPE, &payload, None);
        let fetcher = StaticFetcher::default().with("img", vec![env]);

        let mut options = options_for(&pub_pem);
        options.transparency_log = Some(LogCheck {
            endpoint: "https://rekor.example".to_owned(),
            client: Box::new(FixedLog(Ok(true))),
        });
        let result = verify_attestations("img", &fetcher, &options, &CancelSignal::new()).unwrap();
        assert_eq!(result.verified.len(), 1);
        assert!(result.bundle_verified);
    }

    #[test]
    fn missing_log_entry_drops_envelope() {
        let (key_pair, pub_pem) = generate_test_keypair();
        let payload = custom_statement(&serde_json::json!("foo"));
        let env = signed_envelope(&key_pair, IN_TOTO_PAYLOAD_TYPE, &payload, None);
        let fetcher = StaticFetcher::default().with("img", vec![env]);

        let mut options = options_for(&pub_pem);
        options.transparency_log = Some(LogCheck {
            endpoint: "https://rekor.example".to_owned(),
            client: Box::new(FixedLog(Ok(false))),
        });
        let result = verify_attestations("img", &fetcher, &options, &CancelSignal::new()).unwrap();
        assert!(result.verified.is_empty());
        assert!(!result.bundle_verified);
    }

    #[test]
    fn log_client_error_ends_the_image() {
        let (key_pair, pub_pem) = generate_test_keypair();
        let payload = custom_statement(&serde_json::json!("foo"));
        let env = signed_envelope(&key_pair, IN_TOTO_PAYLOAD_TYPE, &payload, None);
        let fetcher = StaticFetcher::default().with("img", vec![env]);

        let mut options = options_for(&pub_pem);
        options.transparency_log = Some(LogCheck {
            endpoint: "https://rekor.example".to_owned(),
            client: Box::new(FixedLog(Err(()))),
        });
        let err = verify_attestations("img", &fetcher, &options, &CancelSignal::new()).unwrap_err();
        assert!(matches!(err, VerificationError::TransparencyLog { .. }));
    }

    #[test]
    fn fetch_error_is_wrapped_with_image() {
        let (_, pub_pem) = generate_test_keypair();
        let fetcher = StaticFetcher::default().failing("img");
        let err = verify_attestations("img", &fetcher, &options_for(&pub_pem), &CancelSignal::new())
            .unwrap_err();
        assert!(matches!(err, VerificationError::Fetch { ref image, .. } if image == "img"));
    }

    #[test]
    fn cancelled_before_fetch() {
        let (_, pub_pem) = generate_test_keypair();
        let fetcher = StaticFetcher::default();
        let cancel = CancelSignal::new();
        cancel.cancel();
        let err = verify_attestations("img", &fetcher, &options_for(&pub_pem), &cancel).unwrap_err();
        assert!(matches!(err, VerificationError::Cancelled));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }
}
