//! Verification and policy enforcement for container image attestations.
//!
//! `yatima-verify` checks the DSSE envelopes attached to an image,
//! decodes the in-toto predicate of the requested kind and evaluates it
//! against policy.
//!
//! The pipeline has three phases per image:
//! 1. **Signature**: every envelope is verified with the resolved key
//!    (public key, hardware token or keyless certificate), optionally
//!    followed by subject-digest claims and a transparency log lookup
//! 2. **Dispatch**: verified statements of the requested predicate kind
//!    are decoded, everything else is skipped
//! 3. **Policy**: the predicate is evaluated by JSON constraints or Rego

pub mod attestation;
pub mod cancel;
pub mod claims;
pub mod dsse;
pub mod error;
pub mod fetch;
pub mod key;
pub mod keyless;
pub mod pem;
pub mod policy;
pub mod policy_rego;
pub mod rekor;
pub mod signature;
pub mod token;
pub mod verify;

// Re-export primary types for convenience.
pub use cancel::CancelSignal;
pub use error::{FetchError, LogError, PolicyError, SignatureError, VerificationError};
pub use key::KeySource;
pub use policy::{EngineKind, PolicyDecision, PolicyEvaluator};
pub use verify::{ImageOutcome, ImageReport, Orchestrator, RunReport, Services, VerifyConfig};
