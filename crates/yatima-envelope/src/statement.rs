//! in-toto attestation statements.
//!
//! See: <https://github.com/in-toto/attestation/blob/main/spec/v1/statement.md>

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::EnvelopeError;
use crate::predicate::Predicate;

/// The predicate types this crate can decode.
///
/// Each kind has a short name used on the command line and the predicate
/// type URI carried inside the statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PredicateKind {
    /// Free-form `cosign attest --type custom` predicate.
    Custom,
    /// in-toto link metadata.
    Link,
    /// SLSA provenance v0.2.
    #[serde(rename = "slsaprovenance")]
    SlsaProvenance,
    /// SPDX software bill of materials.
    Spdx,
}

impl PredicateKind {
    /// Every recognized kind, in a stable order.
    pub const ALL: [Self; 4] = [Self::Custom, Self::Link, Self::SlsaProvenance, Self::Spdx];

    /// Short name (`custom`, `link`, `slsaprovenance`, `spdx`).
    pub const fn name(self) -> &'static str {
        match self {
            Self::Custom => "custom",
            Self::Link => "link",
            Self::SlsaProvenance => "slsaprovenance",
            Self::Spdx => "spdx",
        }
    }

    /// The `predicateType` URI written into statements of this kind.
    pub const fn uri(self) -> &'static str {
        match self {
            Self::Custom => "cosign.sigstore.dev/attestation/v1",
            Self::Link => "https://in-toto.io/Link/v1",
            Self::SlsaProvenance => "https://slsa.dev/provenance/v0.2",
            Self::Spdx => "https://spdx.dev/Document",
        }
    }

    /// Map a statement's `predicateType` URI back to a kind.
    pub fn from_uri(uri: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.uri() == uri)
    }
}

impl fmt::Display for PredicateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PredicateKind {
    type Err = EnvelopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| EnvelopeError::UnknownPredicateType(s.to_owned()))
    }
}

/// An artifact the statement makes claims about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    /// Artifact name (for images, usually the repository).
    #[serde(default)]
    pub name: String,
    /// Digests keyed by algorithm name (`sha256`, ...), hex values.
    #[serde(default)]
    pub digest: BTreeMap<String, String>,
}

impl Subject {
    /// Whether this subject carries `algorithm:hex` among its digests.
    pub fn has_digest(&self, algorithm: &str, hex: &str) -> bool {
        self.digest
            .get(algorithm)
            .is_some_and(|value| value.eq_ignore_ascii_case(hex))
    }
}

/// The fields every statement carries regardless of predicate type.
///
/// Parsing the header first lets dispatch decide what to do with an
/// unknown `predicateType` without attempting a full decode.
#[derive(Debug, Clone, Deserialize)]
pub struct StatementHeader {
    /// Statement type URI (`https://in-toto.io/Statement/v0.1`, ...).
    #[serde(rename = "_type", default)]
    pub statement_type: String,
    /// Predicate type URI.
    #[serde(rename = "predicateType")]
    pub predicate_type: String,
    /// Subjects of the statement.
    #[serde(default)]
    pub subject: Vec<Subject>,
}

impl StatementHeader {
    /// Parse the shared statement fields from decoded payload bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        serde_json::from_slice(bytes).map_err(EnvelopeError::json("statement"))
    }
}

/// A fully decoded statement of one recognized predicate kind.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    /// Statement type URI.
    pub statement_type: String,
    /// Subjects of the statement.
    pub subject: Vec<Subject>,
    /// The typed predicate body.
    pub predicate: Predicate,
}

/// Wire shape of a statement with a statically known predicate type.
#[derive(Deserialize)]
struct RawStatement<P> {
    #[serde(rename = "_type", default)]
    statement_type: String,
    #[serde(default)]
    subject: Vec<Subject>,
    predicate: P,
}

impl Statement {
    /// Decode `bytes` as a statement whose predicate has the shape of `kind`.
    pub fn parse(kind: PredicateKind, bytes: &[u8]) -> Result<Self, EnvelopeError> {
        match kind {
            PredicateKind::Custom => parse_as(bytes, Predicate::Custom),
            PredicateKind::Link => parse_as(bytes, Predicate::Link),
            PredicateKind::SlsaProvenance => parse_as(bytes, Predicate::SlsaProvenance),
            PredicateKind::Spdx => parse_as(bytes, Predicate::Spdx),
        }
    }
}

fn parse_as<P: DeserializeOwned>(
    bytes: &[u8],
    wrap: impl FnOnce(P) -> Predicate,
) -> Result<Statement, EnvelopeError> {
    let raw: RawStatement<P> =
        serde_json::from_slice(bytes).map_err(EnvelopeError::json("statement"))?;
    Ok(Statement {
        statement_type: raw.statement_type,
        subject: raw.subject,
        predicate: wrap(raw.predicate),
    })
}
