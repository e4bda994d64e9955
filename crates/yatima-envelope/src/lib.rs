//! DSSE envelopes and in-toto statements for Yatima.
//!
//! `yatima-envelope` parses the signed envelopes attached to container
//! images, builds their pre-authentication encoding, and turns the
//! enclosed in-toto statement into a typed predicate for policy
//! evaluation.
//!
//! Nothing in this crate touches keys or the network; signature checks
//! live in `yatima-verify`.

pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod predicate;
pub mod statement;

// Re-export primary types for convenience.
pub use dispatch::{Dispatch, decode_predicate};
pub use envelope::{Envelope, EnvelopeSignature, IN_TOTO_PAYLOAD_TYPE};
pub use error::EnvelopeError;
pub use predicate::Predicate;
pub use statement::{PredicateKind, Statement, StatementHeader, Subject};
