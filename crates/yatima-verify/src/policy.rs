//! Policy evaluation for decoded predicates.
//!
//! The `PolicyEvaluator` trait defines the evaluation contract shared by
//! both engines. `ConstraintEvaluator` provides JSON-configurable
//! constraints without an external policy language; `RegoEvaluator`
//! (in `policy_rego`) runs Rego policies.

use std::cmp::Ordering;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Number, Value};

use crate::error::PolicyError;
use crate::policy_rego::RegoEvaluator;

/// A loaded policy document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicySource {
    /// Where the document was loaded from; used in errors and reports.
    pub location: String,
    /// Raw document bytes.
    pub contents: Vec<u8>,
}

impl PolicySource {
    /// Build a source from in-memory contents.
    pub fn new(location: impl Into<String>, contents: impl Into<Vec<u8>>) -> Self {
        Self {
            location: location.into(),
            contents: contents.into(),
        }
    }

    pub(crate) fn text(&self) -> Result<&str, PolicyError> {
        std::str::from_utf8(&self.contents).map_err(|e| PolicyError::Source {
            location: self.location.clone(),
            reason: format!("not valid UTF-8: {e}"),
        })
    }
}

/// Loads policy documents by location.
pub trait PolicySourceLoader: Send + Sync {
    /// Read the document at `location`.
    fn load(&self, location: &str) -> Result<Vec<u8>, PolicyError>;
}

/// Loads policy documents from the filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsPolicyLoader;

impl PolicySourceLoader for FsPolicyLoader {
    fn load(&self, location: &str) -> Result<Vec<u8>, PolicyError> {
        std::fs::read(location).map_err(|e| PolicyError::Source {
            location: location.to_owned(),
            reason: e.to_string(),
        })
    }
}

/// A policy engine evaluates predicate JSON against policy sources.
///
/// `Ok(())` means allowed. Evaluation is a pure function of its inputs.
pub trait PolicyEvaluator: Send + Sync {
    /// Short engine name for logs and reports.
    fn name(&self) -> &'static str;

    /// Evaluate `predicate_json` against all `sources`.
    fn evaluate(&self, predicate_json: &[u8], sources: &[PolicySource]) -> Result<(), PolicyError>;
}

/// The recorded outcome of evaluating one envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicyDecision {
    /// Digest of the evaluated envelope.
    pub envelope: String,
    /// Whether the policy allowed the predicate.
    pub allowed: bool,
    /// Why it was denied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Locations of the policy sources evaluated.
    pub sources: Vec<String>,
}

/// Which engine evaluates the policy sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// JSON constraint documents.
    Constraints,
    /// Rego policies queried at `data.signature.allow`.
    Rego,
}

impl EngineKind {
    /// Pick an engine from policy file extensions: any `.rego` source
    /// selects Rego, anything else the constraint engine.
    pub fn detect<S: AsRef<str>>(locations: &[S]) -> Self {
        let is_rego = |loc: &S| {
            Path::new(loc.as_ref())
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("rego"))
        };
        if locations.iter().any(is_rego) {
            Self::Rego
        } else {
            Self::Constraints
        }
    }

    /// Build the evaluator for this engine.
    pub fn evaluator(self) -> Box<dyn PolicyEvaluator> {
        match self {
            Self::Constraints => Box::new(ConstraintEvaluator),
            Self::Rego => Box::new(RegoEvaluator),
        }
    }
}

impl FromStr for EngineKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "constraints" | "json" => Ok(Self::Constraints),
            "rego" => Ok(Self::Rego),
            other => Err(format!(
                "unknown policy engine `{other}` (expected `constraints` or `rego`)"
            )),
        }
    }
}

/// JSON type names accepted by the `type` constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JsonType {
    Null,
    Boolean,
    Number,
    Integer,
    String,
    Array,
    Object,
}

impl JsonType {
    const fn name(self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Boolean => "boolean",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::String => "string",
            Self::Array => "array",
            Self::Object => "object",
        }
    }

    fn matches(self, value: &Value) -> bool {
        match self {
            Self::Null => value.is_null(),
            Self::Boolean => value.is_boolean(),
            Self::Number => value.is_number(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::String => value.is_string(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
        }
    }
}

/// One constraint on the value at `path`.
///
/// Every constraint requires the path to exist; the other fields are
/// optional and all of them must hold.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Constraint {
    /// RFC 6901 JSON pointer into the predicate.
    pub path: String,
    /// Exact value.
    #[serde(default, deserialize_with = "present")]
    pub equals: Option<Value>,
    /// Allowed values.
    pub one_of: Option<Vec<Value>>,
    /// Required JSON type.
    #[serde(rename = "type")]
    pub value_type: Option<JsonType>,
    /// Minimum array length.
    pub min_items: Option<usize>,
    /// Inclusive lower bound for numbers.
    pub minimum: Option<Number>,
    /// Inclusive upper bound for numbers.
    pub maximum: Option<Number>,
    /// Required string prefix.
    pub prefix: Option<String>,
}

/// Keeps an explicit `"equals": null` distinct from an absent field.
fn present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

/// A constraint policy document.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConstraintDocument {
    /// Constraints, all of which must hold.
    pub constraints: Vec<Constraint>,
}

impl ConstraintDocument {
    /// Parse and validate a document.
    pub fn parse(source: &PolicySource) -> Result<Self, PolicyError> {
        let source_error = |reason: String| PolicyError::Source {
            location: source.location.clone(),
            reason,
        };

        let doc: Self = serde_json::from_slice(&source.contents)
            .map_err(|e| source_error(format!("invalid constraint document: {e}")))?;
        if doc.constraints.is_empty() {
            return Err(source_error("document has no constraints".to_owned()));
        }
        for (i, c) in doc.constraints.iter().enumerate() {
            if !c.path.is_empty() && !c.path.starts_with('/') {
                return Err(source_error(format!(
                    "constraint #{i}: `{}` is not a JSON pointer",
                    c.path
                )));
            }
        }
        Ok(doc)
    }
}

impl Constraint {
    /// Check this constraint; `Err` describes the violation.
    fn check(&self, predicate: &Value) -> Result<(), String> {
        let Some(value) = predicate.pointer(&self.path) else {
            return Err("path not present".to_owned());
        };

        if let Some(expected) = &self.equals
            && !values_equal(value, expected)
        {
            return Err(format!("expected {expected}, found {value}"));
        }

        if let Some(allowed) = &self.one_of
            && !allowed.iter().any(|a| values_equal(value, a))
        {
            return Err(format!(
                "expected one of {}, found {value}",
                Value::Array(allowed.clone())
            ));
        }

        if let Some(ty) = self.value_type
            && !ty.matches(value)
        {
            return Err(format!("expected type {}, found {value}", ty.name()));
        }

        if let Some(min) = self.min_items {
            let len = value
                .as_array()
                .ok_or_else(|| format!("expected an array, found {value}"))?
                .len();
            if len < min {
                return Err(format!("expected at least {min} items, found {len}"));
            }
        }

        if self.minimum.is_some() || self.maximum.is_some() {
            let Value::Number(n) = value else {
                return Err(format!("expected a number, found {value}"));
            };
            if let Some(min) = &self.minimum
                && matches!(compare_numbers(n, min), Some(Ordering::Less) | None)
            {
                return Err(format!("expected at least {min}, found {n}"));
            }
            if let Some(max) = &self.maximum
                && matches!(compare_numbers(n, max), Some(Ordering::Greater) | None)
            {
                return Err(format!("expected at most {max}, found {n}"));
            }
        }

        if let Some(prefix) = &self.prefix {
            let s = value
                .as_str()
                .ok_or_else(|| format!("expected a string, found {value}"))?;
            if !s.starts_with(prefix.as_str()) {
                return Err(format!("expected prefix {prefix:?}, found {value}"));
            }
        }

        Ok(())
    }
}

fn as_i128(n: &Number) -> Option<i128> {
    n.as_i64()
        .map(i128::from)
        .or_else(|| n.as_u64().map(i128::from))
}

/// Numeric comparison, exact for integers.
fn compare_numbers(a: &Number, b: &Number) -> Option<Ordering> {
    match (as_i128(a), as_i128(b)) {
        (Some(x), Some(y)) => Some(x.cmp(&y)),
        _ => a.as_f64()?.partial_cmp(&b.as_f64()?),
    }
}

/// JSON equality where `1` and `1.0` are the same number.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => compare_numbers(x, y) == Some(Ordering::Equal),
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(xm), Value::Object(ym)) => {
            xm.len() == ym.len()
                && xm
                    .iter()
                    .all(|(k, x)| ym.get(k).is_some_and(|y| values_equal(x, y)))
        }
        _ => a == b,
    }
}

/// Declarative engine over JSON constraint documents.
///
/// ```json
/// { "constraints": [ { "path": "/Data", "equals": "foo" } ] }
/// ```
///
/// All constraints of all documents must hold.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConstraintEvaluator;

impl PolicyEvaluator for ConstraintEvaluator {
    fn name(&self) -> &'static str {
        "constraints"
    }

    fn evaluate(&self, predicate_json: &[u8], sources: &[PolicySource]) -> Result<(), PolicyError> {
        if sources.is_empty() {
            return Err(PolicyError::Source {
                location: String::new(),
                reason: "no policy sources".to_owned(),
            });
        }
        let documents = sources
            .iter()
            .map(|s| ConstraintDocument::parse(s).map(|doc| (s, doc)))
            .collect::<Result<Vec<_>, _>>()?;

        let predicate: Value = serde_json::from_slice(predicate_json)
            .map_err(|e| PolicyError::Input(format!("predicate is not JSON: {e}")))?;

        for (source, doc) in &documents {
            for (i, constraint) in doc.constraints.iter().enumerate() {
                if let Err(violation) = constraint.check(&predicate) {
                    return Err(PolicyError::Denied {
                        location: source.location.clone(),
                        reason: format!("constraint #{i} on `{}`: {violation}", constraint.path),
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(json: &str) -> PolicySource {
        PolicySource::new("policy.json", json.as_bytes())
    }

    fn denied_reason(result: Result<(), PolicyError>) -> String {
        match result {
            Err(PolicyError::Denied { reason, .. }) => reason,
            other => panic!("expected denial, got {other:?}"),
        }
    }

    #[test]
    fn data_equals_foo_is_allowed() {
        let sources = [doc(r#"{"constraints":[{"path":"/Data","equals":"foo"}]}"#)];
        ConstraintEvaluator
            .evaluate(br#"{"Data":"foo"}"#, &sources)
            .expect("allowed");
    }

    #[test]
    fn data_equals_bar_is_denied_naming_the_mismatch() {
        let sources = [doc(r#"{"constraints":[{"path":"/Data","equals":"bar"}]}"#)];
        let err = ConstraintEvaluator
            .evaluate(br#"{"Data":"foo"}"#, &sources)
            .unwrap_err();
        match err {
            PolicyError::Denied { location, reason } => {
                assert_eq!(location, "policy.json");
                assert_eq!(
                    reason,
                    r#"constraint #0 on `/Data`: expected "bar", found "foo""#
                );
            }
            other => panic!("expected denial, got {other:?}"),
        }
    }

    #[test]
    fn missing_path_is_denied() {
        let sources = [doc(r#"{"constraints":[{"path":"/invocation"}]}"#)];
        let reason = denied_reason(ConstraintEvaluator.evaluate(br#"{"Data":"foo"}"#, &sources));
        assert!(reason.contains("path not present"), "got: {reason}");
    }

    #[test]
    fn one_of_and_prefix() {
        let sources = [doc(r#"{"constraints":[
            {"path":"/builder/id","one_of":["https://ci.example/a","https://ci.example/b"]},
            {"path":"/buildType","prefix":"https://"}
        ]}"#)];
        let ok = br#"{"builder":{"id":"https://ci.example/b"},"buildType":"https://slsa.dev/x"}"#;
        ConstraintEvaluator.evaluate(ok, &sources).expect("allowed");

        let bad_builder = br#"{"builder":{"id":"https://evil"},"buildType":"https://x"}"#;
        let reason = denied_reason(ConstraintEvaluator.evaluate(bad_builder, &sources));
        assert!(reason.starts_with("constraint #0"), "got: {reason}");

        let bad_type = br#"{"builder":{"id":"https://ci.example/a"},"buildType":"make"}"#;
        let reason = denied_reason(ConstraintEvaluator.evaluate(bad_type, &sources));
        assert!(reason.starts_with("constraint #1"), "got: {reason}");
    }

    #[test]
    fn type_and_min_items() {
        let sources = [doc(r#"{"constraints":[
            {"path":"/metadata/reproducible","type":"boolean"},
            {"path":"/materials","min_items":1}
        ]}"#)];
        ConstraintEvaluator
            .evaluate(
                br#"{"metadata":{"reproducible":true},"materials":[{"uri":"git+x"}]}"#,
                &sources,
            )
            .expect("allowed");

        let reason = denied_reason(ConstraintEvaluator.evaluate(
            br#"{"metadata":{"reproducible":"yes"},"materials":[]}"#,
            &sources,
        ));
        assert!(reason.contains("expected type boolean"), "got: {reason}");

        let reason = denied_reason(ConstraintEvaluator.evaluate(
            br#"{"metadata":{"reproducible":false},"materials":[]}"#,
            &sources,
        ));
        assert!(reason.contains("at least 1 items"), "got: {reason}");
    }

    #[test]
    fn numeric_bounds_are_exact_for_large_integers() {
        let sources = [doc(
            r#"{"constraints":[{"path":"/count","minimum":9223372036854775807}]}"#,
        )];
        ConstraintEvaluator
            .evaluate(br#"{"count":18446744073709551615}"#, &sources)
            .expect("u64::MAX >= i64::MAX");
        let reason = denied_reason(
            ConstraintEvaluator.evaluate(br#"{"count":9223372036854775806}"#, &sources),
        );
        assert!(reason.contains("at least"), "got: {reason}");
    }

    #[test]
    fn bounds_mix_integers_and_floats() {
        let sources = [doc(r#"{"constraints":[{"path":"/count","minimum":1,"maximum":10}]}"#)];
        ConstraintEvaluator
            .evaluate(br#"{"count":2.5}"#, &sources)
            .expect("in range");
        assert!(
            ConstraintEvaluator
                .evaluate(br#"{"count":10.5}"#, &sources)
                .is_err()
        );
        assert!(
            ConstraintEvaluator
                .evaluate(br#"{"count":"5"}"#, &sources)
                .is_err()
        );
    }

    #[test]
    fn integer_equals_float_form() {
        let sources = [doc(r#"{"constraints":[{"path":"/n","equals":1}]}"#)];
        ConstraintEvaluator
            .evaluate(br#"{"n":1.0}"#, &sources)
            .expect("1 == 1.0");
    }

    #[test]
    fn explicit_null_is_a_real_expectation() {
        let sources = [doc(r#"{"constraints":[{"path":"/Timestamp","equals":null}]}"#)];
        ConstraintEvaluator
            .evaluate(br#"{"Timestamp":null}"#, &sources)
            .expect("null matches");
        assert!(
            ConstraintEvaluator
                .evaluate(br#"{"Timestamp":"2024"}"#, &sources)
                .is_err()
        );
    }

    #[test]
    fn every_document_must_allow() {
        let sources = [
            doc(r#"{"constraints":[{"path":"/Data","equals":"foo"}]}"#),
            PolicySource::new(
                "strict.json",
                r#"{"constraints":[{"path":"/Timestamp"}]}"#.as_bytes(),
            ),
        ];
        let err = ConstraintEvaluator
            .evaluate(br#"{"Data":"foo"}"#, &sources)
            .unwrap_err();
        assert!(matches!(err, PolicyError::Denied { ref location, .. } if location == "strict.json"));
    }

    #[test]
    fn unknown_field_is_a_source_error() {
        let sources = [doc(r#"{"constraints":[{"path":"/Data","equal":"foo"}]}"#)];
        assert!(matches!(
            ConstraintEvaluator.evaluate(br#"{"Data":"foo"}"#, &sources),
            Err(PolicyError::Source { .. })
        ));
    }

    #[test]
    fn empty_document_is_a_source_error() {
        let sources = [doc(r#"{"constraints":[]}"#)];
        assert!(matches!(
            ConstraintEvaluator.evaluate(br#"{"Data":"foo"}"#, &sources),
            Err(PolicyError::Source { .. })
        ));
    }

    #[test]
    fn relative_pointer_is_a_source_error() {
        let sources = [doc(r#"{"constraints":[{"path":"Data"}]}"#)];
        assert!(matches!(
            ConstraintEvaluator.evaluate(br#"{"Data":"foo"}"#, &sources),
            Err(PolicyError::Source { .. })
        ));
    }

    #[test]
    fn source_error_wins_over_denial() {
        let sources = [
            doc(r#"{"constraints":[{"path":"/Data","equals":"bar"}]}"#),
            PolicySource::new("broken.json", b"not json".to_vec()),
        ];
        assert!(matches!(
            ConstraintEvaluator.evaluate(br#"{"Data":"foo"}"#, &sources),
            Err(PolicyError::Source { ref location, .. }) if location == "broken.json"
        ));
    }

    #[test]
    fn no_sources_is_a_source_error() {
        assert!(matches!(
            ConstraintEvaluator.evaluate(br#"{"Data":"foo"}"#, &[]),
            Err(PolicyError::Source { .. })
        ));
    }

    #[test]
    fn non_json_predicate_is_an_input_error() {
        let sources = [doc(r#"{"constraints":[{"path":"/Data"}]}"#)];
        assert!(matches!(
            ConstraintEvaluator.evaluate(b"\xff", &sources),
            Err(PolicyError::Input(_))
        ));
    }

    #[test]
    fn fs_loader_reads_and_reports_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.json");
        std::fs::write(&path, "{}").unwrap();
        let location = path.to_string_lossy();
        assert_eq!(FsPolicyLoader.load(&location).unwrap(), b"{}");

        let missing = dir.path().join("missing.json");
        assert!(matches!(
            FsPolicyLoader.load(&missing.to_string_lossy()),
            Err(PolicyError::Source { .. })
        ));
    }

    #[test]
    fn engine_detection_by_extension() {
        assert_eq!(EngineKind::detect(&["a.json"][..]), EngineKind::Constraints);
        assert_eq!(EngineKind::detect(&["a.json", "b.REGO"][..]), EngineKind::Rego);
        assert_eq!(EngineKind::detect::<&str>(&[]), EngineKind::Constraints);
        assert_eq!("rego".parse::<EngineKind>().unwrap(), EngineKind::Rego);
        assert!("opa".parse::<EngineKind>().is_err());
        assert_eq!(EngineKind::Rego.evaluator().name(), "rego");
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// An `equals` constraint allows exactly the expected string.
            #[test]
            fn equals_allows_only_the_expected_value(
                expected in "[a-z]{1,12}",
                actual in "[a-z]{1,12}",
            ) {
                let policy = serde_json::json!({
                    "constraints": [{ "path": "/Data", "equals": expected }]
                });
                let sources = [PolicySource::new("p.json", policy.to_string().into_bytes())];
                let predicate = serde_json::json!({ "Data": actual }).to_string();

                let allowed = ConstraintEvaluator
                    .evaluate(predicate.as_bytes(), &sources)
                    .is_ok();
                prop_assert_eq!(allowed, expected == actual);
            }
        }
    }
}
