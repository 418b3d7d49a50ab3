//! Socket finding: address resolution and connection racing.
//!
//! Mirrors the connection director's multi-subnet failover and
//! transparent-network-IP-resolution (TNIR) behavior:
//!
//! - serial connects go to the first resolved address, bounded by the
//!   login timeout (or the short TNIR timeout on a TNIR first attempt);
//! - parallel connects partition the resolved addresses by family, try
//!   IPv4 before IPv6, and within a family race every address at once,
//!   adopting the first socket that completes and closing the rest;
//! - a host resolving to more than 64 addresses silently downgrades TNIR
//!   and is a fatal unsupported configuration for multi-subnet failover.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::task::JoinSet;
use tokio::time::{Instant, timeout, timeout_at};

use crate::error::ChannelError;

/// Hard cap on resolved addresses for parallel connection attempts.
pub const IP_ADDRESS_LIMIT: usize = 64;

/// Timeout used for a TNIR first attempt.
pub const TNIR_FIRST_ATTEMPT_TIMEOUT: Duration = Duration::from_millis(500);

/// Floor applied to per-family timeouts when racing in parallel.
const MIN_PARALLEL_TIMEOUT: Duration = Duration::from_millis(1500);

/// Options steering [`find_socket`].
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Login timeout governing each connect attempt.
    pub login_timeout: Duration,
    /// Multi-subnet failover: race all resolved addresses.
    pub use_parallel: bool,
    /// Transparent network IP resolution.
    pub use_tnir: bool,
    /// Whether this is the short first TNIR attempt.
    pub is_tnir_first_attempt: bool,
    /// Full timeout used when TNIR is downgraded.
    pub full_timeout: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            login_timeout: Duration::from_secs(15),
            use_parallel: false,
            use_tnir: false,
            is_tnir_first_attempt: false,
            full_timeout: Duration::from_secs(15),
        }
    }
}

/// Locate a connected socket for `host:port` under the given options.
pub async fn find_socket(
    host: &str,
    port: u16,
    opts: &ConnectOptions,
) -> Result<TcpStream, ChannelError> {
    let mut use_tnir = opts.use_tnir;
    let mut login_timeout = opts.login_timeout;

    // Addresses are only needed for parallel or TNIR connects.
    let addrs: Vec<SocketAddr> = if opts.use_parallel || use_tnir {
        let resolved = resolve(host, port).await?;
        if use_tnir && resolved.len() > IP_ADDRESS_LIMIT {
            tracing::debug!(
                addresses = resolved.len(),
                "too many addresses for TNIR; falling back to full timeout"
            );
            use_tnir = false;
            login_timeout = opts.full_timeout;
        }
        resolved
    } else {
        Vec::new()
    };

    if !opts.use_parallel {
        if use_tnir && opts.is_tnir_first_attempt {
            return connect_first(host, port, TNIR_FIRST_ATTEMPT_TIMEOUT).await;
        }
        if !use_tnir {
            return connect_first(host, port, login_timeout).await;
        }
        // TNIR beyond the first attempt behaves like a parallel connect.
    }

    if addrs.len() > IP_ADDRESS_LIMIT {
        return Err(ChannelError::UnsupportedConfig(format!(
            "host resolved to more than {IP_ADDRESS_LIMIT} addresses; \
             multiSubnetFailover does not support this"
        )));
    }

    let (v4, v6): (Vec<_>, Vec<_>) = addrs.into_iter().partition(SocketAddr::is_ipv4);

    let per_family = if !v4.is_empty() && !v6.is_empty() {
        (login_timeout / 2).max(MIN_PARALLEL_TIMEOUT)
    } else {
        login_timeout.max(MIN_PARALLEL_TIMEOUT)
    };

    let mut first_failure: Option<ChannelError> = None;

    for family in [v4, v6] {
        if family.is_empty() {
            continue;
        }
        tracing::debug!(
            candidates = family.len(),
            timeout_ms = per_family.as_millis() as u64,
            "racing connection candidates"
        );
        match race_addresses(family, per_family).await {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                first_failure = Some(prefer_failure(first_failure.take(), e));
            }
        }
    }

    Err(first_failure.unwrap_or(ChannelError::ConnectionTimedOut))
}

async fn resolve(host: &str, port: u16) -> Result<Vec<SocketAddr>, ChannelError> {
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
        .await
        .map_err(|source| ChannelError::Resolution {
            host: host.to_string(),
            source,
        })?
        .collect();

    if addrs.is_empty() {
        return Err(ChannelError::Resolution {
            host: host.to_string(),
            source: std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "host resolved to no addresses",
            ),
        });
    }
    Ok(addrs)
}

/// Serial connect to the first resolved address, bounded by `deadline`.
async fn connect_first(
    host: &str,
    port: u16,
    deadline: Duration,
) -> Result<TcpStream, ChannelError> {
    match timeout(deadline, TcpStream::connect((host, port))).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(ChannelError::Resolution {
                host: host.to_string(),
                source: e,
            })
        }
        Ok(Err(e)) => Err(ChannelError::Io(e)),
        Err(_) => Err(ChannelError::ConnectionTimedOut),
    }
}

/// Race every address; the first completed connect wins and the
/// remaining attempts are aborted (closing their sockets).
///
/// Failures are accumulated with non-timeout errors preferred; with no
/// winner and nothing observed the result is a connection timeout.
pub async fn race_addresses(
    addrs: Vec<SocketAddr>,
    deadline: Duration,
) -> Result<TcpStream, ChannelError> {
    if addrs.len() == 1 {
        let addr = addrs[0];
        return match timeout(deadline, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => Err(ChannelError::Io(e)),
            Err(_) => Err(ChannelError::ConnectionTimedOut),
        };
    }

    let mut attempts = JoinSet::new();
    for addr in addrs {
        attempts.spawn(async move {
            let result = TcpStream::connect(addr).await;
            (addr, result)
        });
    }

    let expires = Instant::now() + deadline;
    let mut selected: Option<ChannelError> = None;

    loop {
        match timeout_at(expires, attempts.join_next()).await {
            // Deadline passed while attempts are still outstanding.
            Err(_) => break,
            // All attempts finished without a winner.
            Ok(None) => break,
            Ok(Some(Err(join_error))) => {
                tracing::debug!(error = %join_error, "connect attempt task failed");
            }
            Ok(Some(Ok((addr, Ok(stream))))) => {
                tracing::debug!(%addr, "selected connection candidate");
                attempts.abort_all();
                return Ok(stream);
            }
            Ok(Some(Ok((addr, Err(e))))) => {
                tracing::debug!(%addr, error = %e, "connection candidate failed");
                selected = Some(prefer_failure(selected.take(), ChannelError::Io(e)));
            }
        }
    }

    attempts.abort_all();
    Err(selected.unwrap_or(ChannelError::ConnectionTimedOut))
}

/// Keep the more informative of two failures: any non-timeout error is
/// preferred over a timeout.
fn prefer_failure(current: Option<ChannelError>, new: ChannelError) -> ChannelError {
    match current {
        None => new,
        Some(ChannelError::ConnectionTimedOut) | Some(ChannelError::Timeout) => new,
        Some(existing) => existing,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn failure_preference_keeps_non_timeout() {
        let io = ChannelError::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "refused",
        ));
        let kept = prefer_failure(Some(ChannelError::ConnectionTimedOut), io);
        assert!(matches!(kept, ChannelError::Io(_)));

        let io = ChannelError::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "refused",
        ));
        let kept = prefer_failure(Some(io), ChannelError::ConnectionTimedOut);
        assert!(matches!(kept, ChannelError::Io(_)));
    }
}
