//! Per-invocation scrape context: cancellation and round-trip observation.

use std::future::Future;
use std::time::{Duration, Instant};

use observability::ScrapeMetrics;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::{CollectorError, CollectorResult};

/// Round trips beyond this threshold are logged but not failed; hard
/// timeouts are the orchestrator's business.
pub const SLOW_REQUEST_THRESHOLD: Duration = Duration::from_secs(60);

/// Carries the cancellation signal for one plugin invocation.
///
/// Plugins check the token at every suspension point (backend HTTP calls,
/// cache refreshes, pagination steps) and return [`CollectorError::Canceled`]
/// without writing partial state.
#[derive(Clone, Debug, Default)]
pub struct ScrapeContext {
    token: CancellationToken,
}

impl ScrapeContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: CancellationToken) -> Self {
        Self { token }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Returns `Err(Canceled)` once the invocation has been canceled.
    pub fn check_canceled(&self) -> CollectorResult<()> {
        if self.token.is_cancelled() {
            Err(CollectorError::Canceled)
        } else {
            Ok(())
        }
    }

    /// Runs one backend round trip, racing it against cancellation and
    /// logging it when it exceeds [`SLOW_REQUEST_THRESHOLD`].
    pub async fn round_trip<T, F>(
        &self,
        service: &str,
        operation: &str,
        request: F,
    ) -> CollectorResult<T>
    where
        F: Future<Output = CollectorResult<T>>,
    {
        self.check_canceled()?;
        let started = Instant::now();

        let result = tokio::select! {
            _ = self.token.cancelled() => return Err(CollectorError::Canceled),
            result = request => result,
        };

        let elapsed = started.elapsed();
        if elapsed > SLOW_REQUEST_THRESHOLD {
            warn!(
                service = service,
                operation = operation,
                elapsed_secs = elapsed.as_secs(),
                "slow backend round trip"
            );
            ScrapeMetrics::record_slow_request(service);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fresh_context_is_not_canceled() {
        let ctx = ScrapeContext::new();
        assert!(ctx.check_canceled().is_ok());
    }

    #[tokio::test]
    async fn canceled_context_aborts_round_trips() {
        let token = CancellationToken::new();
        token.cancel();
        let ctx = ScrapeContext::with_token(token);

        assert!(matches!(
            ctx.check_canceled(),
            Err(CollectorError::Canceled)
        ));

        let result = ctx
            .round_trip("compute", "list-servers", async { Ok(42u64) })
            .await;
        assert!(matches!(result, Err(CollectorError::Canceled)));
    }

    #[tokio::test]
    async fn cancellation_during_request_wins() {
        let token = CancellationToken::new();
        let ctx = ScrapeContext::with_token(token.clone());

        let pending = ctx.round_trip("compute", "list-servers", async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(1u64)
        });
        token.cancel();

        assert!(matches!(pending.await, Err(CollectorError::Canceled)));
    }
}
