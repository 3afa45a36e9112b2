//! Waiting on eventually-consistent AWS state
//!
//! Several resources webship creates are not usable the moment the create
//! call returns: IAM roles take seconds to become visible to ECS, ACM fills
//! in certificate validation records asynchronously, and issuance itself can
//! take minutes. This module provides a generic poll-with-backoff primitive
//! with jitter, an overall deadline, and cooperative cancellation.

use anyhow::Result;
use backon::{BackoffBuilder, ExponentialBuilder};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Polling schedule for [`wait_until`].
#[derive(Debug, Clone)]
pub struct WaitConfig {
    /// Delay before the second attempt
    pub initial_delay: Duration,
    /// Cap for the exponentially growing delay
    pub max_delay: Duration,
    /// Overall deadline across all attempts
    pub timeout: Duration,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            timeout: Duration::from_secs(60),
        }
    }
}

impl WaitConfig {
    /// Schedule suited to ACM certificate issuance, which routinely takes
    /// minutes even when the validation record is already in place.
    pub fn certificate() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(30),
            timeout: Duration::from_secs(600),
        }
    }
}

/// Poll `check` until it yields a value, with exponential backoff.
///
/// `check` returns `Ok(Some(v))` when the awaited state is reached,
/// `Ok(None)` to poll again, and `Err` to abort immediately. The `what`
/// string only feeds log lines and error messages.
///
/// # Errors
/// Fails on deadline expiry, cancellation, or a failing check.
pub async fn wait_until<T, F, Fut>(
    config: WaitConfig,
    cancel: Option<&CancellationToken>,
    check: F,
    what: &str,
) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let start = std::time::Instant::now();
    let mut delays = ExponentialBuilder::default()
        .with_min_delay(config.initial_delay)
        .with_max_delay(config.max_delay)
        .with_factor(2.0)
        .with_jitter()
        .build();
    let mut attempts = 0u32;

    loop {
        attempts += 1;

        if let Some(token) = cancel {
            if token.is_cancelled() {
                anyhow::bail!("Wait for {what} cancelled");
            }
        }
        if start.elapsed() >= config.timeout {
            anyhow::bail!(
                "Timeout waiting for {what} after {:?} ({attempts} attempts)",
                config.timeout
            );
        }

        if let Some(value) = check().await? {
            debug!(what, attempts, "Ready");
            return Ok(value);
        }

        let delay = delays.next().unwrap_or(config.max_delay);
        debug!(what, attempt = attempts, delay_ms = delay.as_millis() as u64, "Not ready, retrying");

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = async {
                match cancel {
                    Some(token) => token.cancelled().await,
                    None => std::future::pending::<()>().await,
                }
            } => {
                anyhow::bail!("Wait for {what} cancelled");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_config() -> WaitConfig {
        WaitConfig {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            timeout: Duration::from_secs(2),
        }
    }

    #[tokio::test]
    async fn returns_value_once_ready() {
        let calls = AtomicU32::new(0);
        let value = wait_until(
            fast_config(),
            None,
            || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                Ok(if n >= 2 { Some("ready") } else { None })
            },
            "test-resource",
        )
        .await
        .unwrap();

        assert_eq!(value, "ready");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn times_out_when_never_ready() {
        let config = WaitConfig {
            timeout: Duration::from_millis(20),
            ..fast_config()
        };
        let result: Result<()> =
            wait_until(config, None, || async { Ok(None) }, "never-ready").await;

        let err = result.unwrap_err().to_string();
        assert!(err.contains("Timeout"), "unexpected error: {err}");
    }

    #[tokio::test]
    async fn check_errors_abort_immediately() {
        let result: Result<()> = wait_until(
            fast_config(),
            None,
            || async { anyhow::bail!("boom") },
            "erroring",
        )
        .await;

        assert_eq!(result.unwrap_err().to_string(), "boom");
    }

    #[tokio::test]
    async fn cancellation_stops_the_wait() {
        let token = CancellationToken::new();
        token.cancel();

        let result: Result<()> = wait_until(
            fast_config(),
            Some(&token),
            || async { Ok(None) },
            "cancelled-resource",
        )
        .await;

        let err = result.unwrap_err().to_string();
        assert!(err.contains("cancelled"), "unexpected error: {err}");
    }
}
