//! Claim checks on verified statements.

use tracing::debug;
use yatima_envelope::{Envelope, IN_TOTO_PAYLOAD_TYPE, StatementHeader};

use crate::error::SignatureError;

/// Checks what a signed statement claims about the image.
pub trait ClaimVerifier: Send + Sync {
    /// `Ok` when the statement in `envelope` covers the image.
    fn verify_claims(
        &self,
        envelope: &Envelope,
        image_digest: Option<&str>,
    ) -> Result<(), SignatureError>;
}

/// Requires one of the statement's subjects to carry the image digest.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubjectDigestClaimVerifier;

impl ClaimVerifier for SubjectDigestClaimVerifier {
    fn verify_claims(
        &self,
        envelope: &Envelope,
        image_digest: Option<&str>,
    ) -> Result<(), SignatureError> {
        let digest = image_digest.ok_or_else(|| {
            SignatureError::Claims("image digest unknown, cannot check subjects".to_owned())
        })?;
        let (algorithm, hex) = digest.split_once(':').ok_or_else(|| {
            SignatureError::Claims(format!("image digest `{digest}` is not `alg:hex`"))
        })?;

        if envelope.payload_type != IN_TOTO_PAYLOAD_TYPE {
            return Err(SignatureError::Claims(format!(
                "payload type `{}` carries no in-toto subjects",
                envelope.payload_type
            )));
        }
        let header = StatementHeader::from_slice(&envelope.decode_payload()?)?;

        if header.subject.iter().any(|s| s.has_digest(algorithm, hex)) {
            debug!(digest, "statement subject matches image digest");
            Ok(())
        } else {
            Err(SignatureError::Claims(format!(
                "no subject of the statement has digest {digest}"
            )))
        }
    }
}
