// ============================================
// File: crates/latchlink-daemon/src/resolver.rs
// ============================================
//! # Activity / User Resolver
//!
//! ## Creation Reason
//! Lock notifications carry a bare numeric actor id. Observers want a
//! name, and the only source of names is the cloud activity log.
//!
//! ## Main Functionality
//! - `resolve()`: Synchronous lookup, never blocks
//! - `refresh()`: Wholesale rebuild of the user map from the activity log
//! - `watch_renewals()`: Refresh after every certificate renewal
//!
//! ## Refresh Triggers
//! ```text
//! resolve(miss) ──► first miss for this id? ──► refresh in flight? ──► spawn
//!                          │ no                        │ yes
//!                          ▼                           ▼
//!                     placeholder              remember id; once the
//!                                              refresh ends, refresh
//!                                              again if still unknown
//!
//! renewal ──► forget triggered ids ──► refresh
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - A failed refresh keeps the stale map; resolution keeps working
//! - An id that already triggered a refresh does not trigger another
//!   until a renewal refresh clears the triggered set, except once when
//!   it missed while an older fetch was in flight
//!
//! ## Last Modified
//! v0.1.0 - Initial resolver

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashSet;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use latchlink_common::time::{Clock, Timestamp};
use latchlink_common::types::{ActorId, DeviceId};

use crate::cloud::CloudService;
use crate::error::{DaemonError, Result};
use crate::store::write_private;

// ============================================
// Resolved
// ============================================

/// Outcome of a lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    /// Known actor.
    Name(String),
    /// Actor not in the map yet.
    Unknown(ActorId),
    /// No actor attributed (id 0).
    Unattributed,
}

impl Resolved {
    /// Display name, if any actor was attributed.
    #[must_use]
    pub fn label(&self) -> Option<String> {
        match self {
            Self::Name(name) => Some(name.clone()),
            Self::Unknown(id) => Some(id.to_string()),
            Self::Unattributed => None,
        }
    }
}

impl fmt::Display for Resolved {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => f.write_str(name),
            Self::Unknown(id) => write!(f, "{id}"),
            Self::Unattributed => f.write_str("-"),
        }
    }
}

// ============================================
// UserMap
// ============================================

/// Actor id to display name.
#[derive(Debug, Clone, Default)]
pub struct UserMap {
    users: HashMap<ActorId, String>,
    refreshed_at: Option<Timestamp>,
}

impl UserMap {
    /// Builds a map; the first entry for an id wins.
    pub fn from_entries(
        entries: impl IntoIterator<Item = (ActorId, String)>,
        refreshed_at: Timestamp,
    ) -> Self {
        let mut users = HashMap::new();
        for (actor, name) in entries {
            users.entry(actor).or_insert(name);
        }
        Self {
            users,
            refreshed_at: Some(refreshed_at),
        }
    }

    /// Looks up a name.
    #[must_use]
    pub fn get(&self, actor: ActorId) -> Option<&str> {
        self.users.get(&actor).map(String::as_str)
    }

    /// Number of known actors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// Returns `true` if no actor is known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Time of the last successful refresh.
    #[must_use]
    pub const fn refreshed_at(&self) -> Option<Timestamp> {
        self.refreshed_at
    }

    /// Entries sorted by id.
    #[must_use]
    pub fn entries(&self) -> Vec<(ActorId, String)> {
        let mut entries: Vec<_> = self
            .users
            .iter()
            .map(|(id, name)| (*id, name.clone()))
            .collect();
        entries.sort_by_key(|(id, _)| *id);
        entries
    }
}

#[derive(Serialize, Deserialize)]
struct StoredUser {
    id: ActorId,
    name: String,
}

#[derive(Serialize, Deserialize)]
struct StoredUserMap {
    refreshed_at: Option<Timestamp>,
    users: Vec<StoredUser>,
}

impl From<&UserMap> for StoredUserMap {
    fn from(map: &UserMap) -> Self {
        Self {
            refreshed_at: map.refreshed_at,
            users: map
                .entries()
                .into_iter()
                .map(|(id, name)| StoredUser { id, name })
                .collect(),
        }
    }
}

impl From<StoredUserMap> for UserMap {
    fn from(stored: StoredUserMap) -> Self {
        Self {
            users: stored.users.into_iter().map(|u| (u.id, u.name)).collect(),
            refreshed_at: stored.refreshed_at,
        }
    }
}

// ============================================
// ActivityResolver
// ============================================

/// User map cache backed by the cloud activity log.
pub struct ActivityResolver {
    cloud: Arc<dyn CloudService>,
    clock: Arc<dyn Clock>,
    device_id: DeviceId,
    path: Option<PathBuf>,
    map: RwLock<UserMap>,
    refreshing: AtomicBool,
    triggered: DashSet<ActorId>,
    missed_in_flight: Mutex<Vec<ActorId>>,
}

impl ActivityResolver {
    /// Creates a resolver with an empty, unpersisted map.
    #[must_use]
    pub fn new(cloud: Arc<dyn CloudService>, clock: Arc<dyn Clock>, device_id: DeviceId) -> Self {
        Self {
            cloud,
            clock,
            device_id,
            path: None,
            map: RwLock::new(UserMap::default()),
            refreshing: AtomicBool::new(false),
            triggered: DashSet::new(),
            missed_in_flight: Mutex::new(Vec::new()),
        }
    }

    /// Creates a resolver persisted at `path`, loading the saved map.
    ///
    /// An unreadable file is logged and replaced on the next refresh.
    pub async fn load(
        cloud: Arc<dyn CloudService>,
        clock: Arc<dyn Clock>,
        device_id: DeviceId,
        path: impl Into<PathBuf>,
    ) -> Self {
        let path = path.into();
        let mut resolver = Self::new(cloud, clock, device_id);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => match serde_json::from_str::<StoredUserMap>(&content) {
                Ok(stored) => {
                    let map = UserMap::from(stored);
                    debug!(users = map.len(), "User map loaded");
                    *resolver.map.get_mut() = map;
                }
                Err(e) => warn!(path = %path.display(), error = %e, "Ignoring corrupt user map"),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "Cannot read user map"),
        }
        resolver.path = Some(path);
        resolver
    }

    /// Resolves an actor id without waiting.
    ///
    /// A miss returns a placeholder and, the first time this id misses,
    /// schedules a refresh.
    pub fn resolve(self: &Arc<Self>, actor: ActorId) -> Resolved {
        if actor.is_none() {
            return Resolved::Unattributed;
        }
        if let Some(name) = self.map.read().get(actor) {
            return Resolved::Name(name.to_string());
        }
        if self.triggered.insert(actor) {
            debug!(actor = %actor, "Unknown actor, scheduling refresh");
            if !self.spawn_refresh() {
                // the running fetch may predate this actor
                self.missed_in_flight.lock().push(actor);
            }
        }
        Resolved::Unknown(actor)
    }

    /// Copy of the current map.
    #[must_use]
    pub fn snapshot(&self) -> UserMap {
        self.map.read().clone()
    }

    /// Returns `true` while a background refresh runs.
    #[must_use]
    pub fn is_refreshing(&self) -> bool {
        self.refreshing.load(Ordering::Acquire)
    }

    fn claim_refresh(&self) -> bool {
        self.refreshing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Returns `false` if a refresh is already in flight.
    fn spawn_refresh(self: &Arc<Self>) -> bool {
        if !self.claim_refresh() {
            return false;
        }
        let this = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let _ = this.refresh().await;
                this.refreshing.store(false, Ordering::Release);
                // succeeded or failed, ids that missed mid-fetch get one more
                if !this.still_missing_after_refresh() || !this.claim_refresh() {
                    break;
                }
                debug!("Actors arrived during refresh, refreshing again");
            }
        });
        true
    }

    /// Drains the ids that missed while a fetch ran; `true` if any of them
    /// is still unknown.
    fn still_missing_after_refresh(&self) -> bool {
        let missed = std::mem::take(&mut *self.missed_in_flight.lock());
        let map = self.map.read();
        missed.iter().any(|actor| map.get(*actor).is_none())
    }

    /// Rebuilds the map from the activity log.
    ///
    /// # Errors
    /// `Cloud` if the log cannot be fetched; the previous map stays.
    pub async fn refresh(&self) -> Result<usize> {
        let entries = match self.cloud.get_activity_log(self.device_id).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "User map refresh failed, keeping stale map");
                return Err(DaemonError::Cloud(e));
            }
        };

        let map = UserMap::from_entries(
            entries.into_iter().map(|e| (e.actor, e.name)),
            self.clock.now(),
        );
        let count = map.len();
        if let Some(path) = &self.path {
            match serde_json::to_vec_pretty(&StoredUserMap::from(&map)) {
                Ok(content) => {
                    if let Err(e) = write_private(path, &content).await {
                        warn!(error = %e, "Cannot persist user map");
                    }
                }
                Err(e) => warn!(error = %e, "Cannot encode user map"),
            }
        }
        *self.map.write() = map;
        info!(users = count, "User map refreshed");
        Ok(count)
    }

    /// Refreshes after every renewal until the sender goes away.
    pub fn watch_renewals(self: &Arc<Self>, mut renewals: broadcast::Receiver<()>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match renewals.recv().await {
                    Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => {
                        debug!("Certificate renewed, refreshing user map");
                        this.triggered.clear();
                        let _ = this.refresh().await;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

impl fmt::Debug for ActivityResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActivityResolver")
            .field("device_id", &self.device_id)
            .field("users", &self.map.read().len())
            .finish_non_exhaustive()
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulator::SimulatedCloud;
    use latchlink_common::time::ManualClock;
    use std::time::Duration;

    fn setup() -> (Arc<SimulatedCloud>, Arc<ActivityResolver>) {
        let clock = ManualClock::new(Timestamp::from_secs(1_700_000_000));
        let cloud = Arc::new(SimulatedCloud::new(clock.clone(), DeviceId(42)));
        cloud.add_user(ActorId(7), "Alice");
        let resolver = Arc::new(ActivityResolver::new(cloud.clone(), Arc::new(clock), DeviceId(42)));
        (cloud, resolver)
    }

    #[tokio::test(start_paused = true)]
    async fn test_miss_triggers_single_refresh() {
        let (cloud, resolver) = setup();
        cloud.set_activity_delay(Duration::from_secs(1));

        assert_eq!(resolver.resolve(ActorId(7)), Resolved::Unknown(ActorId(7)));
        assert_eq!(resolver.resolve(ActorId(7)), Resolved::Unknown(ActorId(7)));
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(cloud.activity_calls(), 1);
        assert_eq!(resolver.resolve(ActorId(7)), Resolved::Name("Alice".into()));
        assert_eq!(cloud.activity_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unresolved_id_does_not_refresh_again() {
        let (cloud, resolver) = setup();
        assert_eq!(resolver.resolve(ActorId(99)), Resolved::Unknown(ActorId(99)));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(resolver.resolve(ActorId(99)), Resolved::Unknown(ActorId(99)));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(cloud.activity_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_miss_during_failed_refresh_refreshes_again() {
        let (cloud, resolver) = setup();
        cloud.add_user(ActorId(8), "Bob");
        cloud.fail_activity(true);
        cloud.set_activity_delay(Duration::from_secs(1));

        assert_eq!(resolver.resolve(ActorId(99)), Resolved::Unknown(ActorId(99)));
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(resolver.is_refreshing());
        assert_eq!(resolver.resolve(ActorId(8)), Resolved::Unknown(ActorId(8)));

        // the fetch for 99 fails at 1s; the follow-up covers 8
        tokio::time::sleep(Duration::from_millis(600)).await;
        cloud.fail_activity(false);
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(cloud.activity_calls(), 2);
        assert!(!resolver.is_refreshing());
        assert_eq!(resolver.resolve(ActorId(8)), Resolved::Name("Bob".into()));
        assert_eq!(cloud.activity_calls(), 2);
    }

    #[tokio::test]
    async fn test_unattributed() {
        let (cloud, resolver) = setup();
        assert_eq!(resolver.resolve(ActorId(0)), Resolved::Unattributed);
        assert_eq!(Resolved::Unattributed.label(), None);
        assert_eq!(cloud.activity_calls(), 0);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_map() {
        let (cloud, resolver) = setup();
        resolver.refresh().await.unwrap();
        cloud.fail_activity(true);
        assert!(resolver.refresh().await.is_err());
        assert_eq!(resolver.snapshot().get(ActorId(7)), Some("Alice"));
    }

    #[tokio::test]
    async fn test_first_entry_wins() {
        let map = UserMap::from_entries(
            vec![(ActorId(1), "Newest".to_string()), (ActorId(1), "Older".to_string())],
            Timestamp::from_secs(1_700_000_000),
        );
        assert_eq!(map.get(ActorId(1)), Some("Newest"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_renewal_refreshes_and_forgets_misses() {
        let (cloud, resolver) = setup();
        let (tx, rx) = broadcast::channel(4);
        let _watcher = resolver.watch_renewals(rx);

        assert_eq!(resolver.resolve(ActorId(8)), Resolved::Unknown(ActorId(8)));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(cloud.activity_calls(), 1);

        cloud.add_user(ActorId(8), "Bob");
        tx.send(()).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(cloud.activity_calls(), 2);
        assert_eq!(resolver.resolve(ActorId(8)), Resolved::Name("Bob".into()));
    }

    #[tokio::test]
    async fn test_persisted_map_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.json");
        let clock = ManualClock::new(Timestamp::from_secs(1_700_000_000));
        let cloud = Arc::new(SimulatedCloud::new(clock.clone(), DeviceId(42)));
        cloud.add_user(ActorId(7), "Alice");

        let resolver =
            ActivityResolver::load(cloud.clone(), Arc::new(clock.clone()), DeviceId(42), &path).await;
        assert_eq!(resolver.refresh().await.unwrap(), 1);

        let reloaded =
            Arc::new(ActivityResolver::load(cloud.clone(), Arc::new(clock), DeviceId(42), &path).await);
        assert_eq!(reloaded.resolve(ActorId(7)), Resolved::Name("Alice".into()));
        assert_eq!(cloud.activity_calls(), 1);
    }
}
