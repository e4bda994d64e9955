//! DSSE envelope model and pre-authentication encoding.
//!
//! See: <https://github.com/secure-systems-lab/dsse/blob/master/envelope.md>

use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::EnvelopeError;

/// Payload type of an envelope carrying an in-toto statement.
pub const IN_TOTO_PAYLOAD_TYPE: &str = "application/vnd.in-toto+json";

/// A DSSE envelope as stored next to a container image.
///
/// Envelopes are never mutated after they are parsed; decoding borrows
/// the payload and returns fresh buffers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Media type of the decoded payload.
    pub payload_type: String,
    /// Standard base64 encoding of the payload bytes.
    pub payload: String,
    /// Signatures over the pre-authentication encoding, in order.
    #[serde(default)]
    pub signatures: Vec<EnvelopeSignature>,
}

/// One signature inside a DSSE envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeSignature {
    /// Optional hint identifying the signing key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyid: Option<String>,
    /// Standard base64 encoding of the signature bytes.
    pub sig: String,
}

impl EnvelopeSignature {
    /// The key id, treating an empty string the same as an absent one.
    pub fn key_id(&self) -> Option<&str> {
        self.keyid.as_deref().filter(|k| !k.is_empty())
    }
}

impl Envelope {
    /// Build an unsigned envelope around `payload`.
    pub fn new(payload_type: impl Into<String>, payload: &[u8]) -> Self {
        Self {
            payload_type: payload_type.into(),
            payload: base64::engine::general_purpose::STANDARD.encode(payload),
            signatures: Vec::new(),
        }
    }

    /// Parse an envelope from its JSON bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        serde_json::from_slice(bytes).map_err(EnvelopeError::json("envelope"))
    }

    /// Decode the base64 payload into raw bytes.
    pub fn decode_payload(&self) -> Result<Vec<u8>, EnvelopeError> {
        Ok(base64::engine::general_purpose::STANDARD.decode(&self.payload)?)
    }

    /// The byte string the envelope signatures are computed over.
    pub fn pae(&self) -> Result<Vec<u8>, EnvelopeError> {
        let payload = self.decode_payload()?;
        Ok(pre_authentication_encoding(&self.payload_type, &payload))
    }
}

/// DSSE v1 pre-authentication encoding:
/// `"DSSEv1" SP len(type) SP type SP len(body) SP body`.
pub fn pre_authentication_encoding(payload_type: &str, payload: &[u8]) -> Vec<u8> {
    let type_len = payload_type.len().to_string();
    let payload_len = payload.len().to_string();

    let mut pae = Vec::with_capacity(
        16 + type_len.len() + payload_type.len() + payload_len.len() + payload.len(),
    );
    pae.extend_from_slice(b"DSSEv1 ");
    pae.extend_from_slice(type_len.as_bytes());
    pae.push(b' ');
    pae.extend_from_slice(payload_type.as_bytes());
    pae.push(b' ');
    pae.extend_from_slice(payload_len.as_bytes());
    pae.push(b' ');
    pae.extend_from_slice(payload);
    pae
}

/// `sha256:<hex>` digest of raw envelope bytes, used to name envelopes
/// in logs and reports.
pub fn envelope_digest(raw: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw);
    format!("sha256:{}", hex::encode(hasher.finalize()))
}
