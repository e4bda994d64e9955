//! Error types for envelope and statement decoding.

/// Errors from decoding DSSE envelopes and in-toto statements.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    /// The document is not valid JSON of the expected shape.
    #[error("malformed {what}: {source}")]
    Json {
        /// What was being parsed (`"envelope"`, `"statement"`, ...).
        what: &'static str,
        /// The underlying parse error.
        #[source]
        source: serde_json::Error,
    },

    /// The envelope payload is not valid standard base64.
    #[error("envelope payload is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    /// Re-serializing a predicate failed.
    #[error("failed to serialize predicate: {0}")]
    Serialize(#[source] serde_json::Error),

    /// The caller asked for a predicate type name that does not exist.
    #[error("unknown predicate type `{0}` (expected one of: custom, link, slsaprovenance, spdx)")]
    UnknownPredicateType(String),
}

impl EnvelopeError {
    pub(crate) fn json(what: &'static str) -> impl FnOnce(serde_json::Error) -> Self {
        move |source| Self::Json { what, source }
    }
}
