//! Predicate decode and dispatch.
//!
//! Turns a verified envelope into a typed statement of the requested
//! predicate kind, or says why the envelope was passed over. Skips are
//! values, not errors: an image routinely carries attestations of several
//! kinds and only one kind is evaluated per run.

use crate::envelope::{Envelope, IN_TOTO_PAYLOAD_TYPE};
use crate::error::EnvelopeError;
use crate::statement::{PredicateKind, Statement, StatementHeader};

/// What dispatch made of one envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// A statement of the requested kind.
    Matched(Statement),
    /// The envelope does not carry an in-toto statement.
    PayloadTypeMismatch {
        /// The envelope's payload type.
        payload_type: String,
    },
    /// A recognized predicate kind other than the requested one.
    OtherKind {
        /// The kind found in the statement.
        kind: PredicateKind,
    },
    /// A predicate type URI this crate does not recognize.
    Unsupported {
        /// The unrecognized `predicateType`.
        predicate_type: String,
    },
}

impl Dispatch {
    /// The matched statement, if any.
    pub const fn matched(&self) -> Option<&Statement> {
        match self {
            Self::Matched(statement) => Some(statement),
            _ => None,
        }
    }

    /// Human-readable reason for a skip; `None` for a match.
    pub fn skip_reason(&self) -> Option<String> {
        match self {
            Self::Matched(_) => None,
            Self::PayloadTypeMismatch { payload_type } => {
                Some(format!("payload type `{payload_type}` is not an in-toto statement"))
            }
            Self::OtherKind { kind } => Some(format!("predicate kind `{kind}` was not requested")),
            Self::Unsupported { predicate_type } => {
                Some(format!("unsupported predicate type `{predicate_type}`"))
            }
        }
    }
}

/// Decode `envelope` and keep it only if it carries a `requested` predicate.
///
/// The envelope is borrowed and never modified. Malformed base64 or a
/// statement that does not fit its declared predicate shape is an error;
/// every other mismatch is reported as a skip.
pub fn decode_predicate(
    envelope: &Envelope,
    requested: PredicateKind,
) -> Result<Dispatch, EnvelopeError> {
    if envelope.payload_type != IN_TOTO_PAYLOAD_TYPE {
        return Ok(Dispatch::PayloadTypeMismatch {
            payload_type: envelope.payload_type.clone(),
        });
    }

    let payload = envelope.decode_payload()?;
    let header = StatementHeader::from_slice(&payload)?;

    let Some(kind) = PredicateKind::from_uri(&header.predicate_type) else {
        tracing::debug!(
            predicate_type = %header.predicate_type,
            "skipping statement with unsupported predicate type"
        );
        return Ok(Dispatch::Unsupported {
            predicate_type: header.predicate_type,
        });
    };

    if kind != requested {
        return Ok(Dispatch::OtherKind { kind });
    }

    Statement::parse(kind, &payload).map(Dispatch::Matched)
}
