//! Typed predicate bodies for the recognized predicate kinds.
//!
//! Only the predicate is handed to policy engines. Subjects and statement
//! metadata stay behind so that policies are written against predicate
//! content alone.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::EnvelopeError;
use crate::statement::PredicateKind;

/// Digests keyed by algorithm name.
pub type DigestSet = BTreeMap<String, String>;

/// A decoded predicate, one variant per [`PredicateKind`].
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// `cosign attest --type custom`: any JSON, passed through as written.
    Custom(serde_json::Value),
    /// in-toto link metadata.
    Link(LinkPredicate),
    /// SLSA provenance v0.2.
    SlsaProvenance(ProvenancePredicate),
    /// SPDX document.
    Spdx(SpdxDocument),
}

impl Predicate {
    /// The kind of this predicate.
    pub const fn kind(&self) -> PredicateKind {
        match self {
            Self::Custom(_) => PredicateKind::Custom,
            Self::Link(_) => PredicateKind::Link,
            Self::SlsaProvenance(_) => PredicateKind::SlsaProvenance,
            Self::Spdx(_) => PredicateKind::Spdx,
        }
    }

    /// Serialize the predicate body alone to JSON bytes.
    pub fn to_json(&self) -> Result<Vec<u8>, EnvelopeError> {
        match self {
            Self::Custom(p) => serde_json::to_vec(p),
            Self::Link(p) => serde_json::to_vec(p),
            Self::SlsaProvenance(p) => serde_json::to_vec(p),
            Self::Spdx(p) => serde_json::to_vec(p),
        }
        .map_err(EnvelopeError::Serialize)
    }
}

/// Unknown keys of a predicate object, carried through to policy input.
pub type Extra = serde_json::Map<String, serde_json::Value>;

/// in-toto link metadata (v0.2 layout).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LinkPredicate {
    /// Step name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Command that was run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,
    /// Inputs, keyed by path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub materials: Option<BTreeMap<String, DigestSet>>,
    /// Outputs, keyed by path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub products: Option<BTreeMap<String, DigestSet>>,
    /// Side outputs such as stdout / return value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub byproducts: Option<serde_json::Value>,
    /// Environment the step ran in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<serde_json::Value>,
    /// Keys not modelled above.
    #[serde(flatten)]
    pub extra: Extra,
}

/// SLSA provenance predicate, v0.2.
///
/// See: <https://slsa.dev/provenance/v0.2>
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvenancePredicate {
    /// Identifies the build platform.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub builder: Option<ProvenanceBuilder>,
    /// URI describing the build template.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_type: Option<String>,
    /// How the build was started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invocation: Option<ProvenanceInvocation>,
    /// Build-type-specific steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_config: Option<serde_json::Value>,
    /// Timing and completeness claims.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ProvenanceMetadata>,
    /// Build inputs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub materials: Option<Vec<ProvenanceMaterial>>,
    /// Keys not modelled above.
    #[serde(flatten)]
    pub extra: Extra,
}

/// The build platform that produced the artifact.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProvenanceBuilder {
    /// Builder identifier URI.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Keys not modelled above.
    #[serde(flatten)]
    pub extra: Extra,
}

/// How a SLSA build was invoked.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvenanceInvocation {
    /// Where the build recipe came from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_source: Option<ConfigSource>,
    /// Parameters supplied by the user or trigger.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
    /// Platform-provided environment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<serde_json::Value>,
    /// Keys not modelled above.
    #[serde(flatten)]
    pub extra: Extra,
}

/// Source of the build recipe.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigSource {
    /// Recipe location.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    /// Recipe digest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<DigestSet>,
    /// Entry point within the recipe.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_point: Option<String>,
    /// Keys not modelled above.
    #[serde(flatten)]
    pub extra: Extra,
}

/// Timing and completeness claims of a SLSA build.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvenanceMetadata {
    /// Platform-assigned invocation id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_invocation_id: Option<String>,
    /// RFC 3339 start time, kept verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_started_on: Option<String>,
    /// RFC 3339 finish time, kept verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_finished_on: Option<String>,
    /// Which parts of the invocation are complete.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completeness: Option<Completeness>,
    /// Whether the build claims to be reproducible.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reproducible: Option<bool>,
    /// Keys not modelled above.
    #[serde(flatten)]
    pub extra: Extra,
}

/// Completeness flags of a SLSA provenance.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Completeness {
    /// Parameters are complete.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<bool>,
    /// Environment is complete.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<bool>,
    /// Materials are complete.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub materials: Option<bool>,
    /// Keys not modelled above.
    #[serde(flatten)]
    pub extra: Extra,
}

/// An input to a SLSA build.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProvenanceMaterial {
    /// Material location.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    /// Material digests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<DigestSet>,
    /// Keys not modelled above.
    #[serde(flatten)]
    pub extra: Extra,
}

/// An SPDX 2.x document.
///
/// Top-level identity fields are typed; everything else (packages, files,
/// relationships and any extension keys) rides along in `extra` so that
/// policies see it unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SpdxDocument {
    /// SPDX specification version, e.g. `SPDX-2.3`.
    #[serde(rename = "spdxVersion", default, skip_serializing_if = "Option::is_none")]
    pub spdx_version: Option<String>,
    /// Document license, normally `CC0-1.0`.
    #[serde(rename = "dataLicense", default, skip_serializing_if = "Option::is_none")]
    pub data_license: Option<String>,
    /// Document identifier, normally `SPDXRef-DOCUMENT`.
    #[serde(rename = "SPDXID", default, skip_serializing_if = "Option::is_none")]
    pub spdx_id: Option<String>,
    /// Document name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Unique namespace URI of the document.
    #[serde(rename = "documentNamespace", default, skip_serializing_if = "Option::is_none")]
    pub document_namespace: Option<String>,
    /// Packages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub packages: Option<Vec<serde_json::Value>>,
    /// Keys not modelled above.
    #[serde(flatten)]
    pub extra: Extra,
}
