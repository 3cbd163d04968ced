//! Lock lifecycle tests
//!
//! Full stack against the simulated cloud and lock on the in-memory radio
//! host. Every test runs on a paused tokio clock, so the backoff, grace
//! and keep-alive timings are exact.

use std::sync::Arc;
use std::time::Duration;

use latchlink_common::time::Timestamp;
use latchlink_common::types::ActorId;
use latchlink_core::protocol::{DoorState, LockState, Opcode, StatusChange, Trigger};
use latchlink_daemon::error::{CommandError, DaemonError};
use latchlink_daemon::simulator::SimulatedSite;
use latchlink_daemon::{ConnectionState, ErrorKind, LifecycleConfig, LockHandle, Observation};
use latchlink_transport::TransportError;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;

const START: i64 = 1_700_000_000;
const DAY: Duration = Duration::from_secs(24 * 3600);

fn site() -> SimulatedSite {
    SimulatedSite::new(Timestamp::from_secs(START)).unwrap()
}

async fn wait_for_state(handle: &LockHandle, state: ConnectionState, within: Duration) {
    let mut rx = handle.watch_state();
    tokio::time::timeout(within, rx.wait_for(|s| *s == state))
        .await
        .unwrap_or_else(|_| panic!("no {state} within {within:?}, still {}", handle.state()))
        .unwrap();
}

/// Starts the handle and waits for the first session.
async fn connected(site: &SimulatedSite) -> LockHandle {
    let (handle, _store) = site.handle(LifecycleConfig::default()).await.unwrap();
    handle.start().await.unwrap();
    wait_for_state(&handle, ConnectionState::Authenticated, Duration::from_secs(5)).await;
    // let the initial state and battery queries settle
    tokio::time::sleep(Duration::from_millis(100)).await;
    handle
}

fn drain(rx: &mut broadcast::Receiver<Observation>) -> Vec<Observation> {
    let mut out = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(observation) => out.push(observation),
            Err(TryRecvError::Lagged(_)) => {}
            Err(TryRecvError::Empty | TryRecvError::Closed) => return out,
        }
    }
}

fn count(observations: &[Observation], want: &Observation) -> usize {
    observations.iter().filter(|o| *o == want).count()
}

fn activity_states(observations: &[Observation]) -> Vec<LockState> {
    observations
        .iter()
        .filter_map(|o| match o {
            Observation::Activity(activity) => Some(activity.state),
            _ => None,
        })
        .collect()
}

fn remote_change(state: LockState, actor: u32) -> StatusChange {
    StatusChange {
        state,
        jammed: false,
        trigger: Trigger::Remote,
        actor: ActorId(actor),
        door: DoorState::Closed,
    }
}

// ============================================
// Connecting and commands
// ============================================

#[tokio::test(start_paused = true)]
async fn first_session_reports_available_and_snapshot() {
    let site = site();
    let (handle, _store) = site.handle(LifecycleConfig::default()).await.unwrap();
    let mut rx = handle.subscribe();

    handle.start().await.unwrap();
    wait_for_state(&handle, ConnectionState::Authenticated, Duration::from_secs(5)).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let observations = drain(&mut rx);
    assert_eq!(count(&observations, &Observation::Available), 1);
    let snapshot = handle.snapshot();
    assert!(snapshot.available);
    assert_eq!(snapshot.lock_state, Some(LockState::Locked));
    assert_eq!(snapshot.battery_level, Some(87));
    assert_eq!(site.lock.handshakes(), 1);
    assert_eq!(site.lock.commands(), vec![Opcode::GetState, Opcode::GetBattery]);
}

#[tokio::test(start_paused = true)]
async fn start_without_lock_in_range_stays_idle() {
    let site = site();
    site.host.set_in_range(&site.address, false);
    let (handle, _store) = site.handle(LifecycleConfig::default()).await.unwrap();

    let err = handle.start().await.unwrap_err();
    assert!(matches!(err, DaemonError::Transport(_)));
    assert_eq!(handle.state(), ConnectionState::Idle);
    assert!(site.host.connect_attempts().is_empty());
}

#[tokio::test(start_paused = true)]
async fn command_before_session_fails_fast() {
    let site = site();
    let (handle, _store) = site.handle(LifecycleConfig::default()).await.unwrap();

    let err = handle.lock().await.unwrap_err();
    assert!(matches!(
        err,
        DaemonError::Transport(TransportError::NotConnected)
    ));
}

#[tokio::test(start_paused = true)]
async fn unlock_reports_unlocking_then_unlocked() {
    let site = site();
    let handle = connected(&site).await;
    let mut rx = handle.subscribe();

    handle.unlock().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let observations = drain(&mut rx);
    assert_eq!(
        activity_states(&observations),
        vec![LockState::Unlocking, LockState::Unlocked]
    );
    assert_eq!(handle.snapshot().lock_state, Some(LockState::Unlocked));
    assert_eq!(site.lock.lock_state(), LockState::Unlocked);
}

#[tokio::test(start_paused = true)]
async fn unlock_and_pull_waits_for_unlocked() {
    let site = site();
    let handle = connected(&site).await;

    handle.unlock_and_pull().await.unwrap();

    let commands = site.lock.commands();
    let unlock = commands.iter().position(|o| *o == Opcode::Unlock).unwrap();
    let pull = commands.iter().position(|o| *o == Opcode::PullSpring).unwrap();
    assert!(unlock < pull);
}

#[tokio::test(start_paused = true)]
async fn unlock_and_pull_stops_waiting_when_link_drops() {
    let site = site();
    let handle = Arc::new(connected(&site).await);
    site.lock.stall_motor(true);

    let started = tokio::time::Instant::now();
    let waiting = {
        let handle = Arc::clone(&handle);
        tokio::spawn(async move { handle.unlock_and_pull().await })
    };
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(!waiting.is_finished());
    site.lock.drop_link();

    let err = waiting.await.unwrap().unwrap_err();
    assert!(matches!(
        err,
        DaemonError::Transport(TransportError::NotConnected)
    ));
    // well before the 15s unlocked wait
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(!site.lock.commands().contains(&Opcode::PullSpring));
}

#[tokio::test(start_paused = true)]
async fn rejected_command_is_a_command_error() {
    let site = site();
    let handle = connected(&site).await;

    // pull needs the bolt unlocked
    let err = handle.pull().await.unwrap_err();
    assert!(matches!(err, DaemonError::Command(CommandError::Rejected { .. })));
    assert_eq!(handle.state(), ConnectionState::Authenticated);
}

#[tokio::test(start_paused = true)]
async fn status_refreshes_snapshot() {
    let site = site();
    let handle = connected(&site).await;

    site.lock.set_lock_state(LockState::Unlocked);
    let snapshot = handle.status().await.unwrap();
    assert_eq!(snapshot.lock_state, Some(LockState::Unlocked));
}

#[tokio::test(start_paused = true)]
async fn keepalive_probes_idle_link() {
    let site = site();
    let handle = connected(&site).await;
    let before = site.lock.commands().len();

    tokio::time::sleep(Duration::from_secs(100)).await;

    let probes = site.lock.commands()[before..]
        .iter()
        .filter(|o| **o == Opcode::GetState)
        .count();
    assert_eq!(probes, 2);
    assert_eq!(handle.state(), ConnectionState::Authenticated);
}

#[tokio::test(start_paused = true)]
async fn battery_polled_every_ten_minutes() {
    let site = site();
    let handle = connected(&site).await;
    let battery_reads = |site: &SimulatedSite| {
        site.lock
            .commands()
            .iter()
            .filter(|o| **o == Opcode::GetBattery)
            .count()
    };
    assert_eq!(battery_reads(&site), 1);

    site.lock.set_battery_level(41);
    tokio::time::sleep(Duration::from_secs(595)).await;
    assert_eq!(battery_reads(&site), 1);
    assert_eq!(handle.snapshot().battery_level, Some(87));

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(battery_reads(&site), 2);
    assert_eq!(handle.snapshot().battery_level, Some(41));

    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(battery_reads(&site), 3);
    assert_eq!(handle.state(), ConnectionState::Authenticated);
}

// ============================================
// Events
// ============================================

#[tokio::test(start_paused = true)]
async fn events_forwarded_in_delivery_order() {
    let site = site();
    let handle = connected(&site).await;
    let mut rx = handle.subscribe();

    let sequence = [
        LockState::Unlocking,
        LockState::Unlocked,
        LockState::Locking,
        LockState::Locked,
    ];
    for state in sequence {
        site.lock.emit_status(remote_change(state, 0));
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(activity_states(&drain(&mut rx)), sequence.to_vec());
}

#[tokio::test(start_paused = true)]
async fn events_arrive_while_command_outstanding() {
    let site = site();
    let handle = Arc::new(connected(&site).await);
    let mut rx = handle.subscribe();

    site.lock.set_silent(true);
    let pending = {
        let handle = Arc::clone(&handle);
        tokio::spawn(async move { handle.lock().await })
    };
    tokio::time::sleep(Duration::from_secs(1)).await;
    site.lock.emit_status(remote_change(LockState::Unlocked, 0));
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(!pending.is_finished());
    assert_eq!(activity_states(&drain(&mut rx)), vec![LockState::Unlocked]);

    let err = pending.await.unwrap().unwrap_err();
    assert!(matches!(
        err,
        DaemonError::Command(CommandError::Timeout {
            opcode: Opcode::Lock
        })
    ));
}

#[tokio::test(start_paused = true)]
async fn unknown_actor_triggers_single_refresh() {
    let site = site();
    let handle = connected(&site).await;
    let mut rx = handle.subscribe();
    let calls = site.cloud.activity_calls();

    site.lock.emit_status(remote_change(LockState::Unlocked, 55));
    site.lock.emit_status(remote_change(LockState::Locked, 55));
    tokio::time::sleep(Duration::from_millis(100)).await;
    site.lock.emit_status(remote_change(LockState::Unlocked, 55));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(site.cloud.activity_calls(), calls + 1);

    site.cloud.add_user(ActorId(56), "Carol");
    site.lock.emit_status(remote_change(LockState::Locked, 56));
    tokio::time::sleep(Duration::from_millis(100)).await;
    site.lock.emit_status(remote_change(LockState::Unlocked, 56));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(site.cloud.activity_calls(), calls + 2);

    let last = drain(&mut rx)
        .into_iter()
        .filter_map(|o| match o {
            Observation::Activity(activity) => Some(activity),
            _ => None,
        })
        .last()
        .unwrap();
    assert_eq!(last.user.label().as_deref(), Some("Carol"));
    assert_eq!(handle.snapshot().last_user.as_deref(), Some("Carol"));
}

#[tokio::test(start_paused = true)]
async fn lock_asking_for_time_gets_signed_time() {
    let site = site();
    let _handle = connected(&site).await;

    site.lock.request_time();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(site.lock.commands().last(), Some(&Opcode::SetSignedDatetime));
}

// ============================================
// Reconnecting
// ============================================

#[tokio::test(start_paused = true)]
async fn drop_mid_command_fails_it_and_backs_off() {
    let site = site();
    let handle = connected(&site).await;

    site.lock.drop_on(Opcode::Lock);
    let err = handle.lock().await.unwrap_err();
    assert!(matches!(err, DaemonError::Transport(_)));
    assert_eq!(handle.state(), ConnectionState::ReconnectBackoff);

    wait_for_state(&handle, ConnectionState::Authenticated, Duration::from_secs(5)).await;
    assert_eq!(site.lock.handshakes(), 2);
}

#[tokio::test(start_paused = true)]
async fn reconnect_delays_follow_backoff() {
    let site = site();
    let handle = connected(&site).await;

    site.host.fail_next_connects(4);
    site.lock.drop_link();
    tokio::time::sleep(Duration::from_secs(2 + 5 + 10 + 30 + 60 + 1)).await;
    assert_eq!(handle.state(), ConnectionState::Authenticated);

    let attempts = site.host.connect_attempts();
    assert_eq!(attempts.len(), 6);
    let gaps: Vec<u64> = attempts[1..]
        .windows(2)
        .map(|w| w[1].1.duration_since(w[0].1).as_secs())
        .collect();
    assert_eq!(gaps, vec![5, 10, 30, 60]);
}

#[tokio::test(start_paused = true)]
async fn stable_session_restarts_backoff() {
    let site = site();
    let handle = connected(&site).await;

    site.host.fail_next_connects(2);
    site.lock.drop_link();
    tokio::time::sleep(Duration::from_secs(2 + 5 + 10 + 1)).await;
    assert_eq!(handle.state(), ConnectionState::Authenticated);

    // held longer than the stable period: the next drop starts over at 2s
    tokio::time::sleep(Duration::from_secs(120)).await;
    let before = site.host.connect_attempts().len();
    site.lock.drop_link();
    tokio::time::sleep(Duration::from_millis(2100)).await;
    assert_eq!(site.host.connect_attempts().len(), before + 1);
    assert_eq!(handle.state(), ConnectionState::Authenticated);
}

#[tokio::test(start_paused = true)]
async fn short_outage_is_hidden_by_grace() {
    let site = site();
    let handle = connected(&site).await;
    let mut rx = handle.subscribe();

    site.lock.drop_link();
    tokio::time::sleep(Duration::from_secs(30)).await;

    let observations = drain(&mut rx);
    assert_eq!(handle.state(), ConnectionState::Authenticated);
    assert_eq!(count(&observations, &Observation::Unavailable), 0);
    assert_eq!(count(&observations, &Observation::Available), 0);
    assert!(handle.snapshot().available);
}

#[tokio::test(start_paused = true)]
async fn long_outage_reports_unavailable_once() {
    let site = site();
    let handle = connected(&site).await;
    let mut rx = handle.subscribe();

    site.host.set_in_range(&site.address, false);
    tokio::time::sleep(Duration::from_secs(14)).await;
    assert_eq!(count(&drain(&mut rx), &Observation::Unavailable), 0);
    assert!(handle.snapshot().available);

    tokio::time::sleep(Duration::from_secs(2)).await;
    let observations = drain(&mut rx);
    assert_eq!(count(&observations, &Observation::Unavailable), 1);
    assert!(!handle.snapshot().available);

    site.host.set_in_range(&site.address, true);
    tokio::time::sleep(Duration::from_secs(60)).await;
    let observations = drain(&mut rx);
    assert_eq!(handle.state(), ConnectionState::Authenticated);
    assert_eq!(count(&observations, &Observation::Unavailable), 0);
    assert_eq!(count(&observations, &Observation::Available), 1);
}

// ============================================
// Credentials
// ============================================

#[tokio::test(start_paused = true)]
async fn certificate_near_expiry_renews_in_background() {
    let site = site();
    let handle = connected(&site).await;
    let lifetime = site.cloud.certificate_lifetime();

    site.clock.advance(lifetime - 4 * DAY);
    tokio::time::sleep(Duration::from_secs(50)).await;

    assert_eq!(site.cloud.renewal_calls(), 1);
    assert_eq!(handle.state(), ConnectionState::Authenticated);
}

#[tokio::test(start_paused = true)]
async fn expired_certificate_renews_before_reconnect() {
    let site = site();
    let handle = connected(&site).await;
    let lifetime = site.cloud.certificate_lifetime();

    site.lock.drop_link();
    site.host.fail_next_connects(2);
    site.clock.advance(lifetime + DAY);
    tokio::time::sleep(Duration::from_secs(2 + 5 + 10 + 1)).await;

    assert_eq!(handle.state(), ConnectionState::Authenticated);
    assert_eq!(site.cloud.renewal_calls(), 1);
    assert_eq!(site.lock.handshakes(), 2);

    // renewal did not stretch the backoff cadence
    let attempts = site.host.connect_attempts();
    let gaps: Vec<u64> = attempts[1..]
        .windows(2)
        .map(|w| w[1].1.duration_since(w[0].1).as_secs())
        .collect();
    assert_eq!(gaps, vec![5, 10]);
}

#[tokio::test(start_paused = true)]
async fn auth_failures_escalate_once() {
    let site = site();
    site.lock.reject_handshakes(true);
    let (handle, _store) = site.handle(LifecycleConfig::default()).await.unwrap();
    let mut rx = handle.subscribe();

    handle.start().await.unwrap();
    tokio::time::sleep(Duration::from_secs(600)).await;

    let errors: Vec<_> = drain(&mut rx)
        .into_iter()
        .filter_map(|o| match o {
            Observation::PersistentError(kind, _) => Some(kind),
            _ => None,
        })
        .collect();
    assert_eq!(errors, vec![ErrorKind::Authentication]);
    // one renewal before each of the three counted failures
    assert_eq!(site.cloud.renewal_calls(), 3);
    assert_eq!(handle.state(), ConnectionState::ReconnectBackoff);
    assert_eq!(site.lock.handshakes(), 0);
}

#[tokio::test(start_paused = true)]
async fn auth_recovers_after_renewal() {
    let site = site();
    site.lock.reject_handshakes(true);
    let (handle, _store) = site.handle(LifecycleConfig::default()).await.unwrap();
    let mut rx = handle.subscribe();

    handle.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(handle.state(), ConnectionState::ReconnectBackoff);

    site.lock.reject_handshakes(false);
    wait_for_state(&handle, ConnectionState::Authenticated, Duration::from_secs(5)).await;

    assert_eq!(site.cloud.renewal_calls(), 1);
    let observations = drain(&mut rx);
    assert!(!observations
        .iter()
        .any(|o| matches!(o, Observation::PersistentError(..))));
}

// ============================================
// Closing
// ============================================

#[tokio::test(start_paused = true)]
async fn close_fails_outstanding_and_later_commands() {
    let site = site();
    let handle = Arc::new(connected(&site).await);
    let mut rx = handle.subscribe();

    site.lock.set_silent(true);
    let pending = {
        let handle = Arc::clone(&handle);
        tokio::spawn(async move { handle.unlock().await })
    };
    tokio::time::sleep(Duration::from_secs(1)).await;

    handle.close().await;
    assert!(matches!(pending.await.unwrap(), Err(DaemonError::Closed)));
    assert!(matches!(handle.lock().await, Err(DaemonError::Closed)));
    assert_eq!(handle.state(), ConnectionState::Closed);
    assert_eq!(count(&drain(&mut rx), &Observation::Unavailable), 1);

    // closed stays closed: nothing reconnects
    let attempts = site.host.connect_attempts().len();
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(site.host.connect_attempts().len(), attempts);
}
