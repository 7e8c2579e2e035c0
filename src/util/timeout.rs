//! Deadlines for refresh exchanges.

use std::future::Future;
use std::time::Duration;

use crate::error::SessionError;

/// Run `future`, failing with [`SessionError::Timeout`] once `limit` passes.
///
/// A zero limit means no deadline.
pub async fn with_timeout<T, F>(limit: Duration, future: F) -> Result<T, SessionError>
where
    F: Future<Output = Result<T, SessionError>>,
{
    if limit.is_zero() {
        return future.await;
    }
    tokio::time::timeout(limit, future).await.unwrap_or_else(|_| {
        let timeout_ms = limit.as_millis() as u64;
        tracing::debug!(timeout_ms, "Deadline elapsed");
        Err(SessionError::Timeout(timeout_ms))
    })
}
