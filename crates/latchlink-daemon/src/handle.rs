// ============================================
// File: crates/latchlink-daemon/src/handle.rs
// ============================================
//! # Lock Handle
//!
//! ## Creation Reason
//! The host layer needs a small, cloneable-by-reference surface per lock:
//! invoke commands, read the current snapshot, follow observations. All
//! of it is message passing into the lock's driver task.
//!
//! ## Main Functionality
//! - `LockHandle::new()`: Spawns the driver and the resolver's renewal
//!   watcher
//! - `start()`: First scan; errors if the lock is not found
//! - `lock()` / `unlock()` / `pull()` / `unlock_and_pull()` / `status()`
//! - `subscribe()`: Observation stream
//! - `close()`: Terminal shutdown
//!
//! ## ⚠️ Important Note for Next Developer
//! - Commands sent while the lock is not authenticated fail at once with
//!   a transport error; there is no hidden retry here
//! - `close()` waits for the driver to finish so no link outlives it
//!
//! ## Last Modified
//! v0.1.0 - Initial handle

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use latchlink_common::time::Clock;
use latchlink_core::protocol::{Command, LockMode, LockState, Response, UnlockMode};
use latchlink_transport::{RadioTransport, ScanFilter, TransportError};

use crate::config::LifecycleConfig;
use crate::error::{CommandError, DaemonError, Result};
use crate::lifecycle::driver::{Driver, DriverDeps, DriverPorts, Request};
use crate::lifecycle::{ConnectionState, LockSnapshot, Observation};
use crate::resolver::ActivityResolver;
use crate::store::CredentialStore;

/// Pending caller requests per lock.
const REQUEST_QUEUE: usize = 16;

/// Observations buffered for slow subscribers before they lag.
const OBSERVATION_BUFFER: usize = 256;

/// Everything one lock connection needs.
pub struct LockSetup {
    /// Direct radio or proxy.
    pub transport: Arc<dyn RadioTransport>,
    /// Credential record owner.
    pub store: Arc<CredentialStore>,
    /// Actor id resolver.
    pub resolver: Arc<ActivityResolver>,
    /// Wall clock for activity timestamps.
    pub clock: Arc<dyn Clock>,
    /// How to find the lock.
    pub scan: ScanFilter,
    /// Timing.
    pub lifecycle: LifecycleConfig,
}

/// Host-facing handle of one lock.
pub struct LockHandle {
    requests: mpsc::Sender<Request>,
    shutdown: watch::Sender<bool>,
    state: watch::Receiver<ConnectionState>,
    snapshot: watch::Receiver<LockSnapshot>,
    observations: broadcast::Sender<Observation>,
    pull_wait: Duration,
    driver: Mutex<Option<JoinHandle<()>>>,
    watcher: JoinHandle<()>,
}

impl LockHandle {
    /// Spawns the driver for one lock. Nothing happens on the radio
    /// until [`start`](Self::start).
    #[must_use]
    pub fn new(setup: LockSetup) -> Self {
        let (requests_tx, requests) = mpsc::channel(REQUEST_QUEUE);
        let (shutdown_tx, shutdown) = watch::channel(false);
        let (state_tx, state) = watch::channel(ConnectionState::Idle);
        let (snapshot_tx, snapshot) = watch::channel(LockSnapshot::default());
        let (observations, _) = broadcast::channel(OBSERVATION_BUFFER);

        let watcher = setup
            .resolver
            .watch_renewals(setup.store.subscribe_renewals());
        let pull_wait = setup.lifecycle.pull_wait();

        let driver = Driver::new(
            DriverDeps {
                transport: setup.transport,
                store: setup.store,
                resolver: setup.resolver,
                clock: setup.clock,
                filter: setup.scan,
                config: setup.lifecycle,
            },
            DriverPorts {
                requests,
                shutdown,
                state: state_tx,
                snapshot: snapshot_tx,
                observations: observations.clone(),
            },
        );
        let driver = tokio::spawn(driver.run());

        Self {
            requests: requests_tx,
            shutdown: shutdown_tx,
            state,
            snapshot,
            observations,
            pull_wait,
            driver: Mutex::new(Some(driver)),
            watcher,
        }
    }

    // ========================================
    // Lifecycle
    // ========================================

    /// Scans for the lock and starts connecting.
    ///
    /// # Errors
    /// The scan error if the lock was not found; the lifecycle then stays
    /// idle and `start` may be called again.
    pub async fn start(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.requests
            .send(Request::Start(reply))
            .await
            .map_err(|_| DaemonError::Closed)?;
        rx.await.map_err(|_| DaemonError::Closed)?
    }

    /// Closes the connection for good and waits for the driver to stop.
    pub async fn close(&self) {
        info!("Close requested");
        self.shutdown.send_replace(true);
        self.watcher.abort();
        let driver = self.driver.lock().take();
        if let Some(driver) = driver {
            if let Err(e) = driver.await {
                debug!(error = %e, "Driver task ended abnormally");
            }
        }
    }

    // ========================================
    // Commands
    // ========================================

    /// Sends a raw command and waits for the lock's answer.
    ///
    /// # Errors
    /// `Transport` if not connected or the link drops, `Command` if the
    /// lock rejects it or does not answer, `Closed` after `close()`.
    pub async fn command(&self, command: Command) -> Result<Response> {
        let (reply, rx) = oneshot::channel();
        self.requests
            .send(Request::Command { command, reply })
            .await
            .map_err(|_| DaemonError::Closed)?;
        rx.await.map_err(|_| DaemonError::Closed)?
    }

    /// Locks.
    ///
    /// # Errors
    /// See [`command`](Self::command).
    pub async fn lock(&self) -> Result<()> {
        self.command(Command::lock(LockMode::Normal)).await.map(drop)
    }

    /// Unlocks.
    ///
    /// # Errors
    /// See [`command`](Self::command).
    pub async fn unlock(&self) -> Result<()> {
        self.command(Command::unlock(UnlockMode::Normal)).await.map(drop)
    }

    /// Pulls the latch spring.
    ///
    /// # Errors
    /// See [`command`](Self::command).
    pub async fn pull(&self) -> Result<()> {
        self.command(Command::pull_spring()).await.map(drop)
    }

    /// Unlocks, waits for the lock to report unlocked, then pulls.
    ///
    /// # Errors
    /// `Command(NotUnlocked)` if the unlocked state is not reported in
    /// time, `Transport(NotConnected)` as soon as the session is lost
    /// while waiting; otherwise as [`command`](Self::command).
    pub async fn unlock_and_pull(&self) -> Result<()> {
        self.unlock().await?;
        let mut snapshot = self.snapshot.clone();
        let mut state = self.state.clone();
        let outcome = tokio::time::timeout(self.pull_wait, async {
            tokio::select! {
                reached = snapshot.wait_for(|s| s.lock_state == Some(LockState::Unlocked)) => {
                    Ok(reached.is_ok())
                }
                _ = state.wait_for(|s| *s != ConnectionState::Authenticated) => {
                    Err(DaemonError::from(TransportError::NotConnected))
                }
            }
        })
        .await;
        match outcome {
            Ok(Ok(true)) => self.pull().await,
            Ok(Err(e)) => Err(e),
            Ok(Ok(false)) | Err(_) => Err(CommandError::NotUnlocked.into()),
        }
    }

    /// Refreshes the state from the lock and returns the snapshot.
    ///
    /// # Errors
    /// See [`command`](Self::command).
    pub async fn status(&self) -> Result<LockSnapshot> {
        self.command(Command::get_state()).await?;
        Ok(self.snapshot())
    }

    // ========================================
    // Observation
    // ========================================

    /// New observation stream. Slow receivers lag; they never block the
    /// connection.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Observation> {
        self.observations.subscribe()
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Connection state updates.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> LockSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Snapshot updates.
    #[must_use]
    pub fn watch_snapshot(&self) -> watch::Receiver<LockSnapshot> {
        self.snapshot.clone()
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
        self.watcher.abort();
    }
}

impl std::fmt::Debug for LockHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockHandle")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
