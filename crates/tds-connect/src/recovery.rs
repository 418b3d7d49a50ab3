//! Connection resiliency.
//!
//! When session recovery is negotiated at login, a connection broken
//! mid-query may be reopened and its session state restored. The
//! reconnect loop is bounded by `connectRetryCount` attempts of at most
//! `loginTimeout` each, sleeping `connectRetryInterval` between attempts.
//!
//! One rule overrides the loop: if a query timeout is set and the retry
//! interval exceeds it, the reconnect would outlive the user's query
//! deadline, so the query-timeout error is returned immediately instead of
//! blocking.

use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, timeout};

use crate::config::Config;
use crate::error::{Error, Result};

/// Captured session state for transparent recovery.
///
/// Filled from the login exchange and maintained through environment
/// changes; replayed after a successful reconnect.
#[derive(Debug, Clone, Default)]
pub struct SessionRecoveryState {
    /// Whether the server acknowledged the session-recovery feature.
    pub negotiated: bool,
    /// Database at capture time.
    pub database: Option<String>,
    /// Language at capture time.
    pub language: Option<String>,
    /// Collation bytes at capture time.
    pub collation: Option<Vec<u8>>,
    /// Negotiated packet size.
    pub packet_size: Option<usize>,
    /// Transaction descriptor (0 in auto-commit).
    pub transaction_descriptor: u64,
}

/// Bounds of the reconnect loop.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    /// Attempts to make; 0 disables reconnection.
    pub retry_count: u8,
    /// Sleep between attempts.
    pub retry_interval: Duration,
    /// Bound on each attempt.
    pub login_timeout: Duration,
}

impl ReconnectPolicy {
    /// Policy from a configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            retry_count: config.connect_retry_count,
            retry_interval: Duration::from_secs(u64::from(config.connect_retry_interval_s)),
            login_timeout: Duration::from_secs(u64::from(config.login_timeout_s)),
        }
    }
}

/// Run the reconnect loop.
///
/// `connect` is invoked per attempt with the attempt index; each call is
/// bounded by the login timeout. The last failure is returned when every
/// attempt is exhausted.
pub async fn run_reconnect<T, F, Fut>(
    policy: &ReconnectPolicy,
    query_timeout: Option<Duration>,
    mut connect: F,
) -> Result<T>
where
    F: FnMut(u8) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    if policy.retry_count == 0 {
        return Err(Error::ConnectionClosed);
    }

    // Reconnecting would block past the user's query deadline; give the
    // query-timeout error right away.
    if let Some(query_timeout) = query_timeout {
        if policy.retry_interval > query_timeout {
            tracing::debug!(
                retry_interval_s = policy.retry_interval.as_secs(),
                query_timeout_s = query_timeout.as_secs(),
                "retry interval exceeds the query timeout; failing immediately"
            );
            return Err(Error::QueryTimedOut);
        }
    }

    let mut last_error = Error::ConnectionClosed;

    for attempt in 0..policy.retry_count {
        tracing::info!(
            attempt = attempt + 1,
            of = policy.retry_count,
            "attempting connection recovery"
        );

        match timeout(policy.login_timeout, connect(attempt)).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "recovery attempt failed");
                last_error = e;
            }
            Err(_) => {
                tracing::warn!(
                    timeout_s = policy.login_timeout.as_secs(),
                    "recovery attempt timed out"
                );
                last_error = Error::Channel(tds_channel::ChannelError::ConnectionTimedOut);
            }
        }

        if attempt + 1 < policy.retry_count {
            sleep(policy.retry_interval).await;
        }
    }

    Err(last_error)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn policy(count: u8, interval_s: u64, login_s: u64) -> ReconnectPolicy {
        ReconnectPolicy {
            retry_count: count,
            retry_interval: Duration::from_secs(interval_s),
            login_timeout: Duration::from_secs(login_s),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn zero_retry_count_surfaces_immediately() {
        let result: Result<()> =
            run_reconnect(&policy(0, 10, 5), None, |_| async { Ok(()) }).await;
        assert!(matches!(result, Err(Error::ConnectionClosed)));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_interval_beyond_query_timeout_fails_fast() {
        let started = Instant::now();
        let result: Result<()> = run_reconnect(
            &policy(2, 30, 5),
            Some(Duration::from_secs(10)),
            |_| async { Ok(()) },
        )
        .await;
        assert!(matches!(result, Err(Error::QueryTimedOut)));
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn default_envelope_two_attempts() {
        // count=2, login=5s, interval=10s: blocked attempts consume
        // 5 + 10 + 5 = 20 seconds.
        let started = Instant::now();
        let result: Result<()> = run_reconnect(&policy(2, 10, 5), None, |_| async {
            std::future::pending::<Result<()>>().await
        })
        .await;

        assert!(result.is_err());
        let elapsed = started.elapsed();
        assert!(
            elapsed >= Duration::from_secs(20) && elapsed <= Duration::from_secs(25),
            "elapsed {elapsed:?} outside the 20s..25s envelope"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn single_attempt_envelope() {
        // count=1, login=15s: one blocked attempt, no interval sleep.
        let started = Instant::now();
        let result: Result<()> = run_reconnect(&policy(1, 10, 15), None, |_| async {
            std::future::pending::<Result<()>>().await
        })
        .await;

        assert!(result.is_err());
        let elapsed = started.elapsed();
        assert!(
            elapsed <= Duration::from_secs(16),
            "elapsed {elapsed:?} beyond the 16s bound"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_second_attempt() {
        let attempts = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&attempts);

        let result = run_reconnect(&policy(3, 2, 5), None, move |_| {
            let seen = Arc::clone(&seen);
            async move {
                if seen.fetch_add(1, Ordering::AcqRel) == 0 {
                    Err(Error::ConnectionClosed)
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::Acquire), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn interval_equal_to_query_timeout_still_retries() {
        // Equality is allowed; only a strictly longer interval fails fast.
        let result = run_reconnect(
            &policy(1, 10, 5),
            Some(Duration::from_secs(10)),
            |_| async { Ok(7) },
        )
        .await;
        assert_eq!(result.unwrap(), 7);
    }
}
