use std::sync::Arc;
use std::sync::OnceLock;

use tokio_util::sync::CancellationToken;

use super::TransportError;

/// A cancellable lifetime with a closure cause. Closing is idempotent and
/// the cause is fixed at the first close; it is propagated to every pending
/// call and to the cooperative tasks observing [`Lifetime::closing`].
#[derive(Clone)]
pub struct Lifetime {
    token: CancellationToken,
    cause: Arc<OnceLock<TransportError>>,
}

impl Lifetime {
    pub fn new() -> Self {
        Self { token: CancellationToken::new(), cause: Arc::new(OnceLock::new()) }
    }

    /// Cancel the lifetime. Only the first call sets the cause.
    pub fn close(&self, cause: TransportError) {
        let _ = self.cause.set(cause);
        self.token.cancel();
    }

    /// Resolves when the lifetime has been closed.
    pub async fn closing(&self) {
        self.token.cancelled().await
    }

    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }

    /// The closure cause, or `None` while still alive.
    pub fn err(&self) -> Option<TransportError> {
        if self.is_closed() {
            Some(self.cause())
        } else {
            None
        }
    }

    /// The closure cause with a generic fallback for a bare cancel.
    pub fn cause(&self) -> TransportError {
        self.cause
            .get()
            .cloned()
            .unwrap_or_else(|| TransportError::Closed("lifetime ended".into()))
    }

    /// A token cancelled together with this lifetime, for scoping child
    /// work to the connection.
    pub fn child_token(&self) -> CancellationToken {
        self.token.child_token()
    }
}

impl Default for Lifetime {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cause_is_fixed_at_first_close() {
        let lifetime = Lifetime::new();
        assert!(lifetime.err().is_none());

        lifetime.close(TransportError::Closed("first".into()));
        lifetime.close(TransportError::Closed("second".into()));

        assert!(lifetime.is_closed());
        assert!(matches!(lifetime.err(), Some(TransportError::Closed(c)) if c == "first"));
        // closing() resolves immediately once closed
        lifetime.closing().await;
    }

    #[tokio::test]
    async fn child_token_observes_close() {
        let lifetime = Lifetime::new();
        let child = lifetime.child_token();
        lifetime.close(TransportError::Cancelled);
        child.cancelled().await;
    }
}
