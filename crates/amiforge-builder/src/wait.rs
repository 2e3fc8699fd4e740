//! Waiting on remote state with exponential backoff and cancellation.
//!
//! Used where the provider offers no job to poll, e.g. an AMI copy becoming
//! available in the destination region.

use crate::error::BuildError;
use anyhow::Result;
use backon::{BackoffBuilder, ExponentialBuilder};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Configuration for resource waiting with exponential backoff.
#[derive(Debug, Clone)]
pub struct WaitConfig {
    /// Initial delay between checks
    pub initial_delay: Duration,
    /// Maximum delay between checks (cap for exponential growth)
    pub max_delay: Duration,
    /// Maximum total time to wait before timeout
    pub timeout: Duration,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
            timeout: Duration::from_secs(30 * 60),
        }
    }
}

/// Result of one readiness check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    Pending,
    /// The resource reached a state it will not recover from
    Failed(String),
}

/// Wait for a resource to become ready with exponential backoff.
///
/// # Returns
/// * `Ok(())` - Resource is ready
/// * `Err` - [`BuildError::Cancelled`], [`BuildError::DeadlineExceeded`], a
///   failed state, or the check's own error
pub async fn wait_for_resource<F, Fut>(
    config: &WaitConfig,
    cancel: &CancellationToken,
    check: F,
    resource_name: &str,
) -> Result<()>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<Readiness>>,
{
    let start = Instant::now();
    let mut attempts = 0u32;

    let mut delays = ExponentialBuilder::default()
        .with_min_delay(config.initial_delay)
        .with_max_delay(config.max_delay)
        .with_factor(2.0)
        .without_max_times()
        .build();

    loop {
        attempts += 1;

        if cancel.is_cancelled() {
            return Err(BuildError::Cancelled.into());
        }
        if start.elapsed() >= config.timeout {
            warn!(resource = %resource_name, attempts, "Timed out waiting for resource");
            return Err(BuildError::DeadlineExceeded(config.timeout).into());
        }

        match check().await? {
            Readiness::Ready => {
                debug!(resource = %resource_name, attempts, "Resource ready");
                return Ok(());
            }
            Readiness::Failed(state) => {
                anyhow::bail!("{resource_name} entered state '{state}'");
            }
            Readiness::Pending => {
                let remaining = config.timeout.saturating_sub(start.elapsed());
                let delay = delays.next().unwrap_or(config.max_delay).min(remaining);
                debug!(
                    resource = %resource_name,
                    attempt = attempts,
                    delay_ms = delay.as_millis(),
                    "Resource not ready, retrying"
                );

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => return Err(BuildError::Cancelled.into()),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::find_build_error;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> WaitConfig {
        WaitConfig {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(4),
            timeout: Duration::from_secs(30),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn ready_after_retries() {
        let calls = AtomicU32::new(0);
        wait_for_resource(
            &fast(),
            &CancellationToken::new(),
            || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                Ok(if n >= 2 { Readiness::Ready } else { Readiness::Pending })
            },
            "ami-123",
        )
        .await
        .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out() {
        let err = wait_for_resource(
            &fast(),
            &CancellationToken::new(),
            || async { Ok(Readiness::Pending) },
            "ami-123",
        )
        .await
        .unwrap_err();
        assert!(matches!(
            find_build_error(&err),
            Some(BuildError::DeadlineExceeded(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_state_stops_waiting() {
        let err = wait_for_resource(
            &fast(),
            &CancellationToken::new(),
            || async { Ok(Readiness::Failed("failed".into())) },
            "ami-123",
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("failed"));
    }

    #[tokio::test]
    async fn cancelled_before_first_check() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let calls = AtomicU32::new(0);

        let err = wait_for_resource(
            &fast(),
            &cancel,
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(Readiness::Pending)
            },
            "ami-123",
        )
        .await
        .unwrap_err();
        assert!(matches!(find_build_error(&err), Some(BuildError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn check_error_propagates() {
        let err = wait_for_resource(
            &fast(),
            &CancellationToken::new(),
            || async { Err::<Readiness, _>(anyhow::anyhow!("describe failed")) },
            "ami-123",
        )
        .await
        .unwrap_err();
        assert_eq!(err.to_string(), "describe failed");
    }
}
