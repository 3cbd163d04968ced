// ============================================
// File: crates/latchlink-daemon/src/lifecycle/mod.rs
// ============================================
//! # Connection Lifecycle State Machine
//!
//! ## Creation Reason
//! The lock drops idle links and the radio path is unreliable. Recovery
//! (backoff, forced renewal, hiding short drops from observers) is the
//! part most likely to go subtly wrong, so the decisions live in a pure
//! state machine that tests can drive without timers or radios.
//!
//! ## Main Functionality
//! - `Lifecycle`: Pure transitions returning `Action`s
//! - [`driver`]: The single task that owns a lock and executes actions
//! - [`observation`]: What observers receive
//!
//! ## State Machine
//! ```text
//!   Idle ──start──► Scanning ──found──► Connecting ──link──► Handshaking
//!    ▲                 │                    ▲  │                 │   │
//!    └──── not found ──┘                    │  │ fail       fail │   │ ok
//!                                           │  ▼                 ▼   ▼
//!                               backoff ◄── ReconnectBackoff ◄── Authenticated
//!                               elapsed                   drop
//!
//!   any ──close──► Closed (terminal)
//! ```
//!
//! ## Backoff
//! | Attempt | Delay |
//! |---------|-------|
//! | 1 | 2s |
//! | 2 | 5s |
//! | 3 | 10s |
//! | 4 | 30s |
//! | 5+ | 60s |
//!
//! The index only goes back to the start after a link stayed
//! authenticated for `stable_after`.
//!
//! ## ⚠️ Important Note for Next Developer
//! - Keep this module free of I/O and clocks: every time-dependent input
//!   takes `now` as a parameter
//! - Availability is tracked as last *reported*, not as actual link state;
//!   that is what makes the grace window work
//!
//! ## Last Modified
//! v0.1.0 - Initial lifecycle

pub mod driver;
pub mod observation;

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::LifecycleConfig;
use crate::error::ErrorKind;

pub use observation::{ActivityEvent, LockSnapshot, Observation};

// ============================================
// ConnectionState
// ============================================

/// Connection state of one lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Not started.
    Idle,
    /// Looking for the lock.
    Scanning,
    /// Opening the radio link.
    Connecting,
    /// Link open, authenticating.
    Handshaking,
    /// Session established.
    Authenticated,
    /// Waiting before the next attempt.
    ReconnectBackoff,
    /// Closed for good.
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Scanning => "scanning",
            Self::Connecting => "connecting",
            Self::Handshaking => "handshaking",
            Self::Authenticated => "authenticated",
            Self::ReconnectBackoff => "reconnect backoff",
            Self::Closed => "closed",
        })
    }
}

// ============================================
// Inputs / Outputs
// ============================================

/// Why a connection attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    /// Radio, proxy or link problem.
    Transport,
    /// Credentials refused.
    Authentication,
    /// Malformed traffic.
    Protocol,
    /// Cloud call needed for the attempt failed.
    Cloud,
}

/// Side effect requested by a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Scan for the lock.
    Scan,
    /// Start a connection attempt.
    Connect {
        /// Renew the certificate before connecting.
        renew_first: bool,
    },
    /// Wake up for the next attempt after this delay.
    ArmReconnect(Duration),
    /// Report unavailability after this delay unless cancelled.
    ArmGrace(Duration),
    /// Drop the pending unavailability report.
    CancelGrace,
    /// Deliver to observers.
    Emit(Observation),
}

// ============================================
// Lifecycle
// ============================================

/// Pure connection lifecycle.
#[derive(Debug)]
pub struct Lifecycle {
    state: ConnectionState,
    backoff: Vec<Duration>,
    backoff_index: usize,
    grace: Duration,
    stable_after: Duration,
    max_auth_failures: u32,

    authenticated_since: Option<Instant>,
    reported_available: bool,
    grace_armed: bool,

    renew_next: bool,
    renewed: bool,
    auth_failures: u32,
    escalated: bool,
}

impl Lifecycle {
    /// Creates an idle machine.
    #[must_use]
    pub fn new(config: &LifecycleConfig) -> Self {
        let mut backoff = config.backoff();
        if backoff.is_empty() {
            backoff.push(Duration::from_secs(1));
        }
        Self {
            state: ConnectionState::Idle,
            backoff,
            backoff_index: 0,
            grace: config.grace(),
            stable_after: config.stable_after(),
            max_auth_failures: config.max_auth_failures.max(1),
            authenticated_since: None,
            reported_available: false,
            grace_armed: false,
            renew_next: false,
            renewed: false,
            auth_failures: 0,
            escalated: false,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether observers currently consider the lock available.
    #[must_use]
    pub const fn reported_available(&self) -> bool {
        self.reported_available
    }

    /// Whether a persistent authentication error has been reported.
    #[must_use]
    pub const fn escalated(&self) -> bool {
        self.escalated
    }

    fn next_delay(&mut self) -> Duration {
        let last = self.backoff.len() - 1;
        let delay = self.backoff[self.backoff_index.min(last)];
        self.backoff_index = (self.backoff_index + 1).min(last);
        delay
    }

    fn enter(&mut self, state: ConnectionState) {
        debug!(from = %self.state, to = %state, "Lifecycle transition");
        self.state = state;
    }

    // ========================================
    // Transitions
    // ========================================

    /// Begins the first scan.
    pub fn start(&mut self) -> Vec<Action> {
        if self.state != ConnectionState::Idle {
            return Vec::new();
        }
        self.enter(ConnectionState::Scanning);
        vec![Action::Scan]
    }

    /// First scan finished. Not finding the lock returns to `Idle`.
    pub fn scan_finished(&mut self, found: bool) -> Vec<Action> {
        if self.state != ConnectionState::Scanning {
            return Vec::new();
        }
        if found {
            self.enter(ConnectionState::Connecting);
            vec![Action::Connect { renew_first: false }]
        } else {
            self.enter(ConnectionState::Idle);
            Vec::new()
        }
    }

    /// Radio link opened; the handshake starts.
    pub fn link_opened(&mut self) -> Vec<Action> {
        if self.state == ConnectionState::Connecting {
            self.enter(ConnectionState::Handshaking);
        }
        Vec::new()
    }

    /// Handshake completed.
    pub fn authenticated(&mut self, now: Instant) -> Vec<Action> {
        if self.state != ConnectionState::Handshaking {
            return Vec::new();
        }
        self.enter(ConnectionState::Authenticated);
        self.authenticated_since = Some(now);
        self.renew_next = false;
        self.renewed = false;
        self.auth_failures = 0;
        self.escalated = false;

        let mut actions = Vec::new();
        if self.grace_armed {
            self.grace_armed = false;
            actions.push(Action::CancelGrace);
        }
        if !self.reported_available {
            self.reported_available = true;
            actions.push(Action::Emit(Observation::Available));
        }
        actions
    }

    /// A connection attempt failed before authentication.
    pub fn attempt_failed(&mut self, failure: Failure, _now: Instant) -> Vec<Action> {
        if !matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Handshaking
        ) {
            return Vec::new();
        }
        let mut actions = Vec::new();

        if failure == Failure::Authentication && !self.escalated {
            if self.renewed {
                self.auth_failures += 1;
            }
            if self.auth_failures >= self.max_auth_failures {
                self.escalated = true;
                warn!(
                    failures = self.auth_failures,
                    "Authentication keeps failing after renewal"
                );
                actions.push(Action::Emit(Observation::PersistentError(
                    ErrorKind::Authentication,
                    format!(
                        "lock refused a freshly renewed certificate {} times; check the configured device",
                        self.auth_failures
                    ),
                )));
            } else {
                self.renew_next = true;
            }
        }

        self.enter(ConnectionState::ReconnectBackoff);
        let delay = self.next_delay();
        actions.push(Action::ArmReconnect(delay));
        actions
    }

    /// The authenticated link went away.
    pub fn link_lost(&mut self, now: Instant) -> Vec<Action> {
        if self.state != ConnectionState::Authenticated {
            return Vec::new();
        }
        if let Some(since) = self.authenticated_since.take() {
            if now.saturating_duration_since(since) >= self.stable_after {
                self.backoff_index = 0;
            }
        }
        self.enter(ConnectionState::ReconnectBackoff);

        let mut actions = Vec::new();
        if self.reported_available && !self.grace_armed {
            self.grace_armed = true;
            actions.push(Action::ArmGrace(self.grace));
        }
        let delay = self.next_delay();
        actions.push(Action::ArmReconnect(delay));
        actions
    }

    /// Backoff delay elapsed.
    pub fn backoff_elapsed(&mut self) -> Vec<Action> {
        if self.state != ConnectionState::ReconnectBackoff {
            return Vec::new();
        }
        self.enter(ConnectionState::Connecting);
        let renew_first = std::mem::take(&mut self.renew_next) && !self.escalated;
        vec![Action::Connect { renew_first }]
    }

    /// Outcome of a forced renewal.
    pub fn renewal_finished(&mut self, ok: bool) -> Vec<Action> {
        if ok {
            self.renewed = true;
        } else {
            // try again before the next attempt
            self.renew_next = true;
        }
        Vec::new()
    }

    /// Grace window elapsed without recovery.
    pub fn grace_elapsed(&mut self) -> Vec<Action> {
        if !self.grace_armed {
            return Vec::new();
        }
        self.grace_armed = false;
        if self.reported_available && self.state != ConnectionState::Authenticated {
            self.reported_available = false;
            return vec![Action::Emit(Observation::Unavailable)];
        }
        Vec::new()
    }

    /// Deliberate shutdown.
    pub fn close(&mut self) -> Vec<Action> {
        if self.state == ConnectionState::Closed {
            return Vec::new();
        }
        self.enter(ConnectionState::Closed);
        self.authenticated_since = None;
        let mut actions = Vec::new();
        if self.grace_armed {
            self.grace_armed = false;
            actions.push(Action::CancelGrace);
        }
        if self.reported_available {
            self.reported_available = false;
            actions.push(Action::Emit(Observation::Unavailable));
        }
        actions
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> Lifecycle {
        Lifecycle::new(&LifecycleConfig::default())
    }

    fn delays(actions: &[Action]) -> Vec<Duration> {
        actions
            .iter()
            .filter_map(|a| match a {
                Action::ArmReconnect(d) => Some(*d),
                _ => None,
            })
            .collect()
    }

    fn connected(m: &mut Lifecycle, now: Instant) {
        m.start();
        m.scan_finished(true);
        m.link_opened();
        m.authenticated(now);
    }

    #[test]
    fn test_happy_path() {
        let mut m = machine();
        assert_eq!(m.start(), vec![Action::Scan]);
        assert_eq!(m.state(), ConnectionState::Scanning);
        assert_eq!(m.scan_finished(true), vec![Action::Connect { renew_first: false }]);
        m.link_opened();
        assert_eq!(m.state(), ConnectionState::Handshaking);
        assert_eq!(
            m.authenticated(Instant::now()),
            vec![Action::Emit(Observation::Available)]
        );
        assert_eq!(m.state(), ConnectionState::Authenticated);
    }

    #[test]
    fn test_first_scan_failure_returns_to_idle() {
        let mut m = machine();
        m.start();
        assert!(m.scan_finished(false).is_empty());
        assert_eq!(m.state(), ConnectionState::Idle);
    }

    #[test]
    fn test_backoff_sequence_caps() {
        let mut m = machine();
        let now = Instant::now();
        m.start();
        m.scan_finished(true);

        let mut seen = Vec::new();
        for _ in 0..7 {
            seen.extend(delays(&m.attempt_failed(Failure::Transport, now)));
            assert_eq!(m.backoff_elapsed(), vec![Action::Connect { renew_first: false }]);
        }
        let secs: Vec<u64> = seen.iter().map(Duration::as_secs).collect();
        assert_eq!(secs, vec![2, 5, 10, 30, 60, 60, 60]);
    }

    #[test]
    fn test_short_session_does_not_reset_backoff() {
        let mut m = machine();
        let t0 = Instant::now();
        m.start();
        m.scan_finished(true);
        m.attempt_failed(Failure::Transport, t0);
        m.backoff_elapsed();
        m.attempt_failed(Failure::Transport, t0);
        m.backoff_elapsed();
        m.link_opened();
        m.authenticated(t0);

        let actions = m.link_lost(t0 + Duration::from_secs(5));
        assert_eq!(delays(&actions), vec![Duration::from_secs(10)]);
    }

    #[test]
    fn test_stable_session_resets_backoff() {
        let mut m = machine();
        let t0 = Instant::now();
        m.start();
        m.scan_finished(true);
        m.attempt_failed(Failure::Transport, t0);
        m.backoff_elapsed();
        m.link_opened();
        m.authenticated(t0);

        let actions = m.link_lost(t0 + Duration::from_secs(61));
        assert_eq!(delays(&actions), vec![Duration::from_secs(2)]);
    }

    #[test]
    fn test_grace_hides_quick_recovery() {
        let mut m = machine();
        let t0 = Instant::now();
        connected(&mut m, t0);

        let actions = m.link_lost(t0);
        assert!(actions.contains(&Action::ArmGrace(Duration::from_secs(15))));
        m.backoff_elapsed();
        m.link_opened();
        let actions = m.authenticated(t0);
        assert_eq!(actions, vec![Action::CancelGrace]);
        assert!(m.grace_elapsed().is_empty());
    }

    #[test]
    fn test_grace_expiry_reports_once() {
        let mut m = machine();
        let t0 = Instant::now();
        connected(&mut m, t0);

        m.link_lost(t0);
        assert_eq!(m.grace_elapsed(), vec![Action::Emit(Observation::Unavailable)]);
        m.backoff_elapsed();
        m.attempt_failed(Failure::Transport, t0);
        assert!(m.grace_elapsed().is_empty());
        m.backoff_elapsed();
        m.link_opened();
        assert_eq!(m.authenticated(t0), vec![Action::Emit(Observation::Available)]);
    }

    #[test]
    fn test_auth_failure_forces_renewal_then_escalates() {
        let mut m = machine();
        let now = Instant::now();
        m.start();
        m.scan_finished(true);
        m.link_opened();

        m.attempt_failed(Failure::Authentication, now);
        let mut escalations = 0;
        for _ in 0..3 {
            assert_eq!(m.backoff_elapsed(), vec![Action::Connect { renew_first: true }]);
            m.renewal_finished(true);
            m.link_opened();
            escalations += m
                .attempt_failed(Failure::Authentication, now)
                .iter()
                .filter(|a| matches!(a, Action::Emit(Observation::PersistentError(..))))
                .count();
        }
        assert_eq!(escalations, 1);
        assert!(m.escalated());

        // retries continue without renewals
        assert_eq!(m.backoff_elapsed(), vec![Action::Connect { renew_first: false }]);
        m.link_opened();
        let actions = m.attempt_failed(Failure::Authentication, now);
        assert!(!actions
            .iter()
            .any(|a| matches!(a, Action::Emit(Observation::PersistentError(..)))));
        assert_eq!(m.backoff_elapsed(), vec![Action::Connect { renew_first: false }]);
    }

    #[test]
    fn test_transport_failure_never_renews() {
        let mut m = machine();
        m.start();
        m.scan_finished(true);
        for _ in 0..10 {
            m.attempt_failed(Failure::Transport, Instant::now());
            assert_eq!(m.backoff_elapsed(), vec![Action::Connect { renew_first: false }]);
        }
    }

    #[test]
    fn test_close_is_terminal() {
        let mut m = machine();
        let t0 = Instant::now();
        connected(&mut m, t0);
        m.link_lost(t0);

        let actions = m.close();
        assert!(actions.contains(&Action::CancelGrace));
        assert!(actions.contains(&Action::Emit(Observation::Unavailable)));
        assert_eq!(m.state(), ConnectionState::Closed);
        assert!(m.backoff_elapsed().is_empty());
        assert!(m.start().is_empty());
        assert!(m.close().is_empty());
        assert_eq!(m.state(), ConnectionState::Closed);
    }
}
