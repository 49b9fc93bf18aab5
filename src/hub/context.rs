//! Per-call deadline and cancellation.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Deadline and cancellation signal carried by one hub call.
///
/// A context without a deadline gets the client's default timeout. An explicit
/// deadline is used as-is, whether it is shorter or longer than the default.
/// Cancellation only stops the client from waiting; the transport may still
/// complete the call.
///
/// # Example
///
/// ```ignore
/// let ctx = CallContext::with_timeout(Duration::from_secs(10));
/// let status = client.get_service_status(&ctx).await?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    deadline: Option<Instant>,
    cancellation: Option<CancellationToken>,
}

impl CallContext {
    /// No deadline and no cancellation.
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            cancellation: None,
        }
    }

    /// Stop waiting when `token` is cancelled.
    pub fn cancelled_by(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Resolves when the caller cancels. Never resolves without a token.
    pub(crate) async fn cancelled(&self) {
        match &self.cancellation {
            Some(token) => token.cancelled().await,
            None => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_background_has_no_deadline() {
        assert!(CallContext::background().deadline().is_none());
    }

    #[tokio::test]
    async fn test_with_timeout_sets_deadline() {
        let before = Instant::now();
        let ctx = CallContext::with_timeout(Duration::from_secs(5));
        let deadline = ctx.deadline().unwrap();
        assert!(deadline >= before + Duration::from_secs(5));
        assert!(deadline <= Instant::now() + Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_cancelled_resolves_after_cancel() {
        let token = CancellationToken::new();
        let ctx = CallContext::background().cancelled_by(token.clone());
        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), ctx.cancelled())
            .await
            .expect("cancellation should resolve");
    }

    #[tokio::test]
    async fn test_cancelled_pending_without_token() {
        let ctx = CallContext::background();
        let waited = tokio::time::timeout(Duration::from_millis(20), ctx.cancelled()).await;
        assert!(waited.is_err());
    }
}
