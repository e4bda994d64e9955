//! Hardware token key access.
//!
//! Tokens are opened through a [`TokenDriver`] and held by a
//! [`TokenGuard`] only long enough to read the public key. The resulting
//! verifier owns nothing but the key, so the token is released before
//! any attestation is checked.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::SignatureError;
use crate::signature::{SignatureVerifier, public_key_verifier};

/// Opens sessions on a hardware token.
pub trait TokenDriver: Send + Sync {
    /// Open the token in `slot`.
    fn open(&self, slot: &str) -> Result<Box<dyn TokenSession>, SignatureError>;
}

/// An open token session.
pub trait TokenSession {
    /// PEM-encoded public key held in the session's slot.
    fn public_key_pem(&self) -> Result<String, SignatureError>;

    /// Release the token.
    fn close(&mut self) -> Result<(), SignatureError>;
}

/// Closes a [`TokenSession`] exactly once, when dropped or explicitly.
pub struct TokenGuard {
    session: Option<Box<dyn TokenSession>>,
}

impl TokenGuard {
    /// Take ownership of an open session.
    pub fn new(session: Box<dyn TokenSession>) -> Self {
        Self {
            session: Some(session),
        }
    }

    /// Access the underlying session.
    pub fn session(&self) -> Option<&dyn TokenSession> {
        self.session.as_deref()
    }

    /// Close the session now and report the outcome.
    pub fn release(mut self) -> Result<(), SignatureError> {
        self.close_inner()
    }

    fn close_inner(&mut self) -> Result<(), SignatureError> {
        match self.session.take() {
            Some(mut session) => session.close(),
            None => Ok(()),
        }
    }
}

impl Drop for TokenGuard {
    fn drop(&mut self) {
        if let Err(e) = self.close_inner() {
            warn!(error = %e, "failed to release hardware token");
        }
    }
}

/// Build a verifier from the key stored in a token slot.
///
/// The token is released on every path, including when the key cannot
/// be read or parsed.
pub fn token_verifier(
    driver: &dyn TokenDriver,
    slot: &str,
) -> Result<Arc<dyn SignatureVerifier>, SignatureError> {
    let guard = TokenGuard::new(driver.open(slot)?);
    let pem = guard
        .session()
        .ok_or_else(|| SignatureError::UnsupportedKey("token session already closed".to_owned()))?
        .public_key_pem()?;
    let verifier = public_key_verifier(&pem)?;
    guard.release()?;
    debug!(slot, "loaded verification key from hardware token");
    Ok(verifier)
}
