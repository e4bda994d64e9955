//! Error types for the verification subsystem.
//!
//! Errors are split by how far they reach: a [`SignatureError`] only
//! disqualifies one envelope, a [`PolicyError`] comes out of a policy
//! engine, and a [`VerificationError`] ends processing of an image (or,
//! for configuration problems, of the whole run).

use yatima_envelope::{EnvelopeError, PredicateKind};

/// Why a single envelope was not accepted.
#[derive(Debug, thiserror::Error)]
pub enum SignatureError {
    /// The cryptographic check failed.
    #[error("signature verification failed: {0}")]
    InvalidSignature(String),

    /// The envelope could not be parsed.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(#[from] EnvelopeError),

    /// The envelope carries no signatures at all.
    #[error("envelope carries no signatures")]
    NoSignatures,

    /// No signature carried the requested key id.
    #[error("no envelope signature has key id `{0}`")]
    KeyIdMismatch(String),

    /// The signing certificate is missing or does not chain to a trusted root.
    #[error("certificate verification failed: {0}")]
    Certificate(String),

    /// The key material could not be used.
    #[error("unsupported verification key: {0}")]
    UnsupportedKey(String),

    /// The statement's claims do not cover the image.
    #[error("claim verification failed: {0}")]
    Claims(String),

    /// The transparency log holds no usable entry for the envelope.
    #[error("no valid transparency log entry for envelope")]
    NotInLog,
}

/// Failures reported by a policy engine.
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    /// A policy source could not be read, parsed or compiled.
    #[error("policy source `{location}` is unusable: {reason}")]
    Source {
        /// Where the source came from.
        location: String,
        /// What went wrong.
        reason: String,
    },

    /// The predicate violates the policy.
    #[error("policy `{location}` denied the predicate: {reason}")]
    Denied {
        /// The policy document (or documents) that denied.
        location: String,
        /// The violated constraint or the query outcome.
        reason: String,
    },

    /// The predicate JSON cannot be presented to the engine.
    #[error("predicate cannot be evaluated: {0}")]
    Input(String),
}

/// Errors from fetch collaborators.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The image reference cannot be used.
    #[error("invalid image reference `{0}`")]
    InvalidReference(String),

    /// A stored attestation could not be read.
    #[error("attestation store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Transport-level failure reported by a registry client.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Errors from transparency log clients.
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    /// HTTP request failed.
    #[error("transparency log request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The endpoint URL cannot be used.
    #[error("invalid transparency log endpoint `{0}`")]
    Endpoint(String),

    /// The log answered with something that is not a log entry.
    #[error("malformed transparency log response: {0}")]
    Malformed(String),
}

/// Errors that stop processing of an image or of the run.
#[derive(Debug, thiserror::Error)]
pub enum VerificationError {
    /// Invalid or inconsistent configuration. Raised before any network access.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Verification key could not be loaded or resolved.
    #[error("key error: {0}")]
    Key(String),

    /// Attestations for an image could not be fetched.
    #[error("fetching attestations for `{image}` failed: {source}")]
    Fetch {
        /// The image reference.
        image: String,
        /// The collaborator's error.
        #[source]
        source: FetchError,
    },

    /// The transparency log could not be consulted.
    #[error("transparency log lookup for `{image}` failed: {source}")]
    TransparencyLog {
        /// The image reference.
        image: String,
        /// The client's error.
        #[source]
        source: LogError,
    },

    /// A verified envelope could not be decoded.
    #[error("failed to decode attestation {envelope} of `{image}`: {source}")]
    Decode {
        /// The image reference.
        image: String,
        /// Digest of the offending envelope.
        envelope: String,
        /// The decode error.
        #[source]
        source: EnvelopeError,
    },

    /// A policy source could not be loaded or compiled.
    #[error("policy error for attestation {envelope} of `{image}` (policies: {sources}): {reason}")]
    PolicySource {
        /// The image reference.
        image: String,
        /// Digest of the envelope being evaluated.
        envelope: String,
        /// Policy source locations, comma separated.
        sources: String,
        /// What went wrong.
        reason: String,
    },

    /// The predicate violates policy.
    #[error("policy denied attestation {envelope} of `{image}` (policies: {sources}): {reason}")]
    PolicyDenied {
        /// The image reference.
        image: String,
        /// Digest of the denied envelope.
        envelope: String,
        /// Policy source locations, comma separated.
        sources: String,
        /// The violated constraint.
        reason: String,
    },

    /// Strict mode: no envelope survived verification.
    #[error("no attestation of `{image}` passed verification")]
    NoVerifiedAttestations {
        /// The image reference.
        image: String,
    },

    /// Strict mode: no verified envelope carried the requested predicate kind.
    #[error("no verified `{kind}` attestation found for `{image}`")]
    NoMatchingPredicate {
        /// The image reference.
        image: String,
        /// The requested kind.
        kind: PredicateKind,
    },

    /// The run was cancelled or its deadline passed.
    #[error("verification cancelled")]
    Cancelled,
}

impl VerificationError {
    /// `true` when the error is a policy verdict rather than a failure to
    /// reach one.
    pub const fn is_denial(&self) -> bool {
        matches!(
            self,
            Self::PolicyDenied { .. }
                | Self::NoVerifiedAttestations { .. }
                | Self::NoMatchingPredicate { .. }
        )
    }
}
