//! Cooperative cancellation for a verification run.

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::error::VerificationError;

/// Cancellation token plus an optional deadline.
///
/// Checked before every blocking call (fetch, log lookup, policy load).
/// Clones share the token, so cancelling one cancels all of them.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl CancelSignal {
    /// A signal that only fires when cancelled explicitly.
    pub fn new() -> Self {
        Self::default()
    }

    /// A signal that also fires once `timeout` has elapsed.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: Instant::now().checked_add(timeout),
        }
    }

    /// Wrap an existing token, e.g. one tied to a signal handler.
    pub const fn from_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether the run should stop.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// `Err(Cancelled)` once the run should stop.
    pub fn check(&self) -> Result<(), VerificationError> {
        if self.is_cancelled() {
            Err(VerificationError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_signal_passes() {
        assert!(CancelSignal::new().check().is_ok());
    }

    #[test]
    fn cancel_is_shared_between_clones() {
        let signal = CancelSignal::new();
        let clone = signal.clone();
        clone.cancel();
        assert!(matches!(signal.check(), Err(VerificationError::Cancelled)));
    }

    #[test]
    fn elapsed_deadline_cancels() {
        let signal = CancelSignal::with_timeout(Duration::ZERO);
        assert!(signal.is_cancelled());
    }

    #[test]
    fn distant_deadline_does_not_cancel() {
        let signal = CancelSignal::with_timeout(Duration::from_secs(3600));
        assert!(signal.check().is_ok());
    }

    #[test]
    fn external_token_drives_signal() {
        let token = CancellationToken::new();
        let signal = CancelSignal::from_token(token.clone());
        token.cancel();
        assert!(signal.is_cancelled());
    }
}
