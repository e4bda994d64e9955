//! Rego policy engine.
//!
//! All sources are compiled into one `regorus` engine and the predicate
//! is queried at [`ALLOW_QUERY`]. Only a literal `true` allows.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use crate::error::PolicyError;
use crate::policy::{PolicyEvaluator, PolicySource};

/// The query every policy must answer.
pub const ALLOW_QUERY: &str = "data.signature.allow";

/// Integers above this magnitude are not exact in an `f64`.
const MAX_EXACT_FLOAT_INT: f64 = 9_007_199_254_740_992.0;

/// Evaluates Rego policies with `regorus`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegoEvaluator;

impl PolicyEvaluator for RegoEvaluator {
    fn name(&self) -> &'static str {
        "rego"
    }

    fn evaluate(&self, predicate_json: &[u8], sources: &[PolicySource]) -> Result<(), PolicyError> {
        let locations = || {
            sources
                .iter()
                .map(|s| s.location.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        };
        if sources.is_empty() {
            return Err(PolicyError::Source {
                location: String::new(),
                reason: "no policy sources".to_owned(),
            });
        }

        let mut engine = regorus::Engine::new();
        for source in sources {
            let text = source.text()?;
            engine
                .add_policy(source.location.clone(), text.to_owned())
                .map_err(|e| PolicyError::Source {
                    location: source.location.clone(),
                    reason: format!("failed to compile: {e}"),
                })?;
        }

        let predicate: serde_json::Value = serde_json::from_slice(predicate_json)
            .map_err(|e| PolicyError::Input(format!("predicate is not JSON: {e}")))?;
        engine.set_input(to_rego_value(&predicate)?);

        let results = engine
            .eval_query(ALLOW_QUERY.to_owned(), false)
            .map_err(|e| PolicyError::Source {
                location: locations(),
                reason: format!("evaluation failed: {e}"),
            })?;

        let outcome = results
            .result
            .first()
            .and_then(|r| r.expressions.first())
            .map(|expr| &expr.value);
        debug!(query = ALLOW_QUERY, ?outcome, "rego query evaluated");

        match outcome {
            Some(regorus::Value::Bool(true)) => Ok(()),
            Some(regorus::Value::Bool(false)) => Err(PolicyError::Denied {
                location: locations(),
                reason: format!("{ALLOW_QUERY} is false"),
            }),
            Some(other) => Err(PolicyError::Denied {
                location: locations(),
                reason: format!("{ALLOW_QUERY} is not a boolean: {other:?}"),
            }),
            None => Err(PolicyError::Denied {
                location: locations(),
                reason: format!("{ALLOW_QUERY} is undefined"),
            }),
        }
    }
}

/// Convert JSON into a Rego value, keeping 64-bit integers exact.
///
/// An integral number that only fits a float and is too large to be exact
/// there is rejected instead of rounded.
pub fn to_rego_value(json: &serde_json::Value) -> Result<regorus::Value, PolicyError> {
    match json {
        serde_json::Value::Null => Ok(regorus::Value::Null),
        serde_json::Value::Bool(b) => Ok(regorus::Value::Bool(*b)),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(regorus::Value::Number(i.into()))
            } else if let Some(u) = n.as_u64() {
                Ok(regorus::Value::Number(u.into()))
            } else {
                let f = n
                    .as_f64()
                    .ok_or_else(|| PolicyError::Input(format!("unrepresentable number {n}")))?;
                if f.fract() == 0.0 && f.abs() > MAX_EXACT_FLOAT_INT {
                    return Err(PolicyError::Input(format!(
                        "integer {n} does not fit in 64 bits"
                    )));
                }
                Ok(regorus::Value::Number(f.into()))
            }
        }
        serde_json::Value::String(s) => Ok(regorus::Value::String(Arc::from(s.as_str()))),
        serde_json::Value::Array(arr) => {
            let items = arr
                .iter()
                .map(to_rego_value)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(regorus::Value::Array(Arc::new(items)))
        }
        serde_json::Value::Object(obj) => {
            let mut map = BTreeMap::new();
            for (key, value) in obj {
                map.insert(
                    regorus::Value::String(Arc::from(key.as_str())),
                    to_rego_value(value)?,
                );
            }
            Ok(regorus::Value::Object(Arc::new(map)))
        }
    }
}
