//! Commands and the cooperative timeout timer.
//!
//! A [`Command`] tracks one statement execution: its timeouts, whether an
//! interrupt (cancel or query timeout) is pending, and the attention
//! accounting that pairs exactly one attention packet with one
//! acknowledgment. The command is the reader's [`ResponseSink`], so the
//! packet pump observes the interrupt flag between read slices.
//!
//! [`TimeoutTimer`] is a cooperative timer: it sleeps in one-second steps
//! so cancellation is observed within a second, and on expiry interrupts
//! its command or, for the ownerless connection-keepalive timer,
//! terminates the connection.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tds_codec::ResponseSink;

use crate::error::DriverErrorCode;

#[derive(Default)]
struct CommandState {
    interrupted: AtomicBool,
    timed_out: AtomicBool,
    interrupt_reason: Mutex<Option<String>>,
    attention_sent: AtomicBool,
    attention_acked: AtomicBool,
    response_complete: AtomicBool,
    closed: AtomicBool,
}

/// One statement execution on a connection.
#[derive(Clone)]
pub struct Command {
    state: Arc<CommandState>,
    query_timeout: Option<Duration>,
    cancel_timeout: Option<Duration>,
}

impl Command {
    /// Create a command with the given timeouts.
    #[must_use]
    pub fn new(query_timeout: Option<Duration>, cancel_timeout: Option<Duration>) -> Self {
        Self {
            state: Arc::new(CommandState::default()),
            query_timeout,
            cancel_timeout,
        }
    }

    /// Query timeout, if any.
    #[must_use]
    pub fn query_timeout(&self) -> Option<Duration> {
        self.query_timeout
    }

    /// Cancel-query timeout, if any.
    #[must_use]
    pub fn cancel_timeout(&self) -> Option<Duration> {
        self.cancel_timeout
    }

    /// Request an interrupt. Idempotent: the first reason wins and
    /// repeated calls while an attention is pending are no-ops.
    pub fn interrupt(&self, reason: &str) {
        if self
            .state
            .interrupted
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            if let Ok(mut slot) = self.state.interrupt_reason.lock() {
                *slot = Some(reason.to_string());
            }
            tracing::debug!(reason = %reason, "command interrupted");
        }
    }

    /// Interrupt because the query timer expired.
    ///
    /// Sets the timed-out flag so callers can classify the outcome by
    /// state rather than by reason text.
    pub fn interrupt_for_timeout(&self) {
        self.state.timed_out.store(true, Ordering::Release);
        self.interrupt("the query has timed out");
    }

    /// Whether the interrupt came from the query timer.
    #[must_use]
    pub fn timed_out(&self) -> bool {
        self.state.timed_out.load(Ordering::Acquire)
    }

    /// Whether an interrupt has been requested.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.state.interrupted.load(Ordering::Acquire)
    }

    /// The first interrupt reason, if any.
    #[must_use]
    pub fn interrupt_reason(&self) -> Option<String> {
        self.state
            .interrupt_reason
            .lock()
            .ok()
            .and_then(|slot| slot.clone())
    }

    /// Whether the interrupt's attention has been acknowledged.
    #[must_use]
    pub fn attention_acked(&self) -> bool {
        self.state.attention_acked.load(Ordering::Acquire)
    }

    /// Record the attention acknowledgment from the server.
    pub fn note_attention_acked(&self) {
        self.state.attention_acked.store(true, Ordering::Release);
    }

    /// Whether the response end-of-message has arrived.
    #[must_use]
    pub fn response_complete(&self) -> bool {
        self.state.response_complete.load(Ordering::Acquire)
    }

    /// Observe a pending interrupt at a token boundary.
    ///
    /// Called by the parser before DONE tokens; the attention itself is
    /// sent by the packet pump, this only keeps the accounting honest.
    pub fn check_interrupt(&self) {
        if self.is_interrupted() && !self.state.attention_sent.load(Ordering::Acquire) {
            tracing::trace!("interrupt pending; attention will go out on the next read slice");
        }
    }

    /// Mark the command terminally complete.
    pub fn complete(&self) {
        self.state.closed.store(true, Ordering::Release);
    }
}

impl ResponseSink for Command {
    fn reading_response(&self) -> bool {
        !self.state.closed.load(Ordering::Acquire)
    }

    fn interrupt_pending(&self) -> bool {
        self.is_interrupted()
    }

    fn attention_sent(&self) -> bool {
        self.state.attention_sent.load(Ordering::Acquire)
    }

    fn note_attention_sent(&self) {
        self.state.attention_sent.store(true, Ordering::Release);
    }

    fn on_response_eom(&self) {
        self.state.response_complete.store(true, Ordering::Release);
    }
}

/// What an expiring timer acts on.
pub enum TimerTarget {
    /// Interrupt a command with a query-timeout reason.
    Command(Command),
    /// Terminate the connection (keepalive timer with no owning
    /// command).
    Watchdog(Arc<ConnectionWatchdog>),
}

/// Terminated-state flag shared between a connection and its timers.
#[derive(Default)]
pub struct ConnectionWatchdog {
    terminated: AtomicBool,
    code: Mutex<Option<DriverErrorCode>>,
}

impl ConnectionWatchdog {
    /// Create a live watchdog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Terminate the connection with a code.
    pub fn terminate(&self, code: DriverErrorCode) {
        self.terminated.store(true, Ordering::Release);
        if let Ok(mut slot) = self.code.lock() {
            slot.get_or_insert(code);
        }
    }

    /// Whether the connection is terminated.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    /// Termination code, when terminated.
    #[must_use]
    pub fn code(&self) -> Option<DriverErrorCode> {
        self.code.lock().ok().and_then(|slot| *slot)
    }
}

/// Cooperative timeout timer.
///
/// Runs as a background task polling once per second so a stop is
/// observed promptly. If the timer expires before being stopped it fires
/// its target exactly once.
pub struct TimeoutTimer {
    cancelled: Arc<AtomicBool>,
    handle: tokio::task::JoinHandle<()>,
}

impl TimeoutTimer {
    /// Start a timer of `seconds` against the target.
    #[must_use]
    pub fn start(seconds: u64, target: TimerTarget) -> Self {
        let cancelled = Arc::new(AtomicBool::new(false));
        let observed = Arc::clone(&cancelled);

        let handle = tokio::spawn(async move {
            let mut remaining = seconds;
            while remaining > 0 {
                if observed.load(Ordering::Acquire) {
                    return;
                }
                tokio::time::sleep(Duration::from_secs(1)).await;
                remaining -= 1;
            }
            if observed.load(Ordering::Acquire) {
                return;
            }

            match target {
                TimerTarget::Command(command) => {
                    command.interrupt_for_timeout();
                }
                TimerTarget::Watchdog(watchdog) => {
                    tracing::warn!("connection keepalive timer expired; terminating");
                    watchdog.terminate(DriverErrorCode::IoFailed);
                }
            }
        });

        Self { cancelled, handle }
    }

    /// Start a query-timeout timer for a command, if it has one.
    #[must_use]
    pub fn start_for_command(command: &Command) -> Option<Self> {
        command.query_timeout().map(|timeout| {
            Self::start(timeout.as_secs().max(1), TimerTarget::Command(command.clone()))
        })
    }

    /// Stop the timer. Safe to call after expiry.
    pub fn stop(&self) {
        self.cancelled.store(true, Ordering::Release);
        self.handle.abort();
    }
}

impl Drop for TimeoutTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn interrupt_is_idempotent() {
        let command = Command::new(None, None);
        assert!(!command.is_interrupted());

        command.interrupt("cancelled by user");
        command.interrupt("second reason");
        assert!(command.is_interrupted());
        assert_eq!(
            command.interrupt_reason().as_deref(),
            Some("cancelled by user")
        );
    }

    #[test]
    fn attention_accounting() {
        let command = Command::new(None, None);
        command.interrupt("cancel");
        assert!(command.interrupt_pending());
        assert!(!command.attention_sent());

        command.note_attention_sent();
        assert!(command.attention_sent());
        assert!(!command.attention_acked());

        command.note_attention_acked();
        assert!(command.attention_acked());
    }

    #[tokio::test(start_paused = true)]
    async fn timer_fires_after_its_seconds() {
        let command = Command::new(Some(Duration::from_secs(3)), None);
        let _timer = TimeoutTimer::start_for_command(&command).unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        tokio::task::yield_now().await;
        assert!(!command.is_interrupted());

        tokio::time::advance(Duration::from_secs(2)).await;
        // Give the timer task a chance to run to completion.
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(command.is_interrupted());
        assert_eq!(
            command.interrupt_reason().as_deref(),
            Some("the query has timed out")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_timer_never_fires() {
        let command = Command::new(Some(Duration::from_secs(2)), None);
        let timer = TimeoutTimer::start_for_command(&command).unwrap();

        tokio::time::advance(Duration::from_secs(1)).await;
        timer.stop();
        tokio::time::advance(Duration::from_secs(5)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(!command.is_interrupted());
    }

    #[tokio::test(start_paused = true)]
    async fn ownerless_timer_terminates_the_connection() {
        let watchdog = Arc::new(ConnectionWatchdog::new());
        let _timer = TimeoutTimer::start(2, TimerTarget::Watchdog(Arc::clone(&watchdog)));

        tokio::time::advance(Duration::from_secs(3)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(watchdog.is_terminated());
        assert_eq!(watchdog.code(), Some(DriverErrorCode::IoFailed));
    }
}
