//! Deadline controller: enforces the per-request gateway timeout
//! independently of tunnel liveness.
//!
//! `tokio::time::timeout` already gives a one-shot timer that is dropped
//! (stopped) as soon as the guarded future resolves first, which covers the
//! "best-effort" stop-on-completion requirement without extra bookkeeping.
//! On expiry we still must explicitly cancel the registry entry — the timer
//! firing does not by itself remove the pending record.

use crate::error::TunnelError;
use crate::frame::FramedResponse;
use crate::registry::Registry;
use std::time::Duration;
use tokio::sync::oneshot;

/// Awaits a response on `rx`, bounded by `timeout`. On expiry, cancels `id`
/// in `registry` so a late arrival finds nothing to deliver to.
pub async fn await_response(
    rx: oneshot::Receiver<FramedResponse>,
    timeout: Duration,
    id: &str,
    registry: &Registry,
) -> Result<FramedResponse, TunnelError> {
    match tokio::time::timeout(timeout, rx).await {
        Ok(Ok(response)) => Ok(response),
        Ok(Err(_recv_error)) => {
            // Sender dropped without sending: tunnel teardown raced ahead of
            // the timeout. The registry entry is already gone in that case.
            Err(TunnelError::TunnelIo("tunnel closed while waiting".into()))
        }
        Err(_elapsed) => {
            registry.cancel(id);
            Err(TunnelError::Timeout)
        }
    }
}
