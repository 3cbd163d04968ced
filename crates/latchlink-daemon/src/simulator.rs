// ============================================
// File: crates/latchlink-daemon/src/simulator.rs
// ============================================
//! # Simulated Cloud and Lock
//!
//! ## Creation Reason
//! Every lifecycle property (backoff, grace, renewal, escalation) is
//! about timing against a real peer. These fixtures give the engine a
//! cloud and a lock that behave like the real ones, on the in-memory
//! radio host, so tests and `latchlink simulate` can run the full stack
//! with no hardware.
//!
//! ## Main Functionality
//! - `SimulatedCloud`: Certificate authority, signed time, activity log
//! - `LockSimulator`: Lock firmware on a `MockPeripheral`, running the
//!   real lock-side handshake and session cipher
//! - `SimulatedSite`: Both wired together on one `MockHost`
//!
//! ## Fault Injection
//! | Control | Effect |
//! |---------|--------|
//! | `SimulatedCloud::fail_renewals` | Renewal calls fail |
//! | `SimulatedCloud::fail_activity` | Activity log calls fail |
//! | `LockSimulator::reject_handshakes` | Lock answers with a certificate alert |
//! | `LockSimulator::drop_on` | Link dropped when the opcode arrives |
//! | `LockSimulator::set_silent` | Commands are never answered |
//! | `LockSimulator::drop_link` | Link dropped now |
//! | `MockHost::set_in_range` | Lock unreachable |
//!
//! ## Last Modified
//! v0.1.0 - Initial simulator

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use latchlink_common::time::{Clock, ManualClock, Timestamp};
use latchlink_common::types::{ActorId, DeviceAddress, DeviceId, MobileId, SerialNumber};
use latchlink_core::crypto::{
    Certificate, IdentityKeyPair, IdentityPublicKey, LockHandshake, LockIdentity, LockStep,
    Session, SignedTimestamp,
};
use latchlink_core::protocol::codec::{decode_command, encode_inbound};
use latchlink_core::protocol::{
    AlertCode, BatteryReport, Command, DoorState, Event, Inbound, LockState, Opcode,
    Response, ResultCode, StateReport, StatusChange, Trigger,
};
use latchlink_transport::gatt::{
    notify_characteristic, service_uuid_for_serial, MockHost, MockPeripheral, PeripheralLink,
    CHAR_COMMANDS, CHAR_HANDSHAKE_RX,
};
use latchlink_transport::{Channel, DirectRadio, RadioTransport, ScanFilter};

use crate::cloud::{
    ActivityEntry, CloudResult, CloudService, IssuedCertificate, LockInfo, Registration,
};
use crate::config::LifecycleConfig;
use crate::error::{CloudError, Result};
use crate::handle::{LockHandle, LockSetup};
use crate::resolver::ActivityResolver;
use crate::store::CredentialStore;

/// Validity of simulated certificates.
pub const CERTIFICATE_LIFETIME: Duration = Duration::from_secs(30 * 24 * 3600);

/// How far a signed time may drift from the simulated lock clock.
pub const TIME_FRESHNESS: Duration = Duration::from_secs(300);

/// Address of the simulated lock.
pub const SIM_ADDRESS: &str = "C0:FF:EE:00:00:01";

/// Serial of the simulated lock.
pub const SIM_SERIAL: &str = "10530206-030484";

/// Cloud id of the simulated lock.
pub const SIM_DEVICE_ID: DeviceId = DeviceId(12345);

// ============================================
// SimulatedCloud
// ============================================

#[derive(Default)]
struct CloudState {
    reject_registration: bool,
    fail_renewals: bool,
    fail_activity: bool,
    renewal_calls: usize,
    activity_calls: usize,
    activity_delay: Duration,
    users: Vec<ActivityEntry>,
    mobiles: HashMap<MobileId, IdentityPublicKey>,
    next_mobile: u64,
}

/// In-process cloud identity service.
pub struct SimulatedCloud {
    clock: ManualClock,
    authority: IdentityKeyPair,
    lock_key: Arc<IdentityKeyPair>,
    device_id: DeviceId,
    state: Mutex<CloudState>,
}

impl SimulatedCloud {
    /// Creates a cloud with a fresh authority and lock key.
    #[must_use]
    pub fn new(clock: ManualClock, device_id: DeviceId) -> Self {
        Self {
            clock,
            authority: IdentityKeyPair::generate(),
            lock_key: Arc::new(IdentityKeyPair::generate()),
            device_id,
            state: Mutex::new(CloudState {
                next_mobile: 1000,
                ..CloudState::default()
            }),
        }
    }

    /// Identity the simulated lock needs to trust this cloud.
    #[must_use]
    pub fn lock_identity(&self) -> LockIdentity {
        LockIdentity {
            identity: Arc::clone(&self.lock_key),
            authority: self.authority.public_key(),
            device_id: self.device_id,
            clock: Arc::new(self.clock.clone()),
            freshness: TIME_FRESHNESS,
        }
    }

    /// Validity of issued certificates.
    #[must_use]
    pub const fn certificate_lifetime(&self) -> Duration {
        CERTIFICATE_LIFETIME
    }

    /// Refuses registrations as if the token lacked scopes.
    pub fn reject_registration(&self, reject: bool) {
        self.state.lock().reject_registration = reject;
    }

    /// Makes renewals fail.
    pub fn fail_renewals(&self, fail: bool) {
        self.state.lock().fail_renewals = fail;
    }

    /// Makes activity log calls fail.
    pub fn fail_activity(&self, fail: bool) {
        self.state.lock().fail_activity = fail;
    }

    /// Delays activity log answers.
    pub fn set_activity_delay(&self, delay: Duration) {
        self.state.lock().activity_delay = delay;
    }

    /// Adds a user as the newest activity log entry.
    pub fn add_user(&self, actor: ActorId, name: &str) {
        self.state.lock().users.insert(
            0,
            ActivityEntry {
                actor,
                name: name.to_string(),
            },
        );
    }

    /// Renewal calls so far, failed ones included.
    #[must_use]
    pub fn renewal_calls(&self) -> usize {
        self.state.lock().renewal_calls
    }

    /// Activity log calls so far.
    #[must_use]
    pub fn activity_calls(&self) -> usize {
        self.state.lock().activity_calls
    }

    fn issue(&self, subject: IdentityPublicKey) -> IssuedCertificate {
        let now = self.clock.now();
        IssuedCertificate {
            certificate: Certificate::issue(
                &self.authority,
                subject,
                self.device_id,
                now,
                now + CERTIFICATE_LIFETIME,
            ),
            lock_key: self.lock_key.public_key(),
        }
    }
}

#[async_trait]
impl CloudService for SimulatedCloud {
    async fn register_device(
        &self,
        public_key: &IdentityPublicKey,
        _access_token: &str,
        device_id: DeviceId,
    ) -> CloudResult<Registration> {
        let mobile_id = {
            let mut state = self.state.lock();
            if state.reject_registration {
                return Err(CloudError::Unauthorized {
                    reason: "token lacks the device scopes".into(),
                });
            }
            if device_id != self.device_id {
                return Err(CloudError::Status {
                    status: 404,
                    messages: vec![format!("device {device_id} not found")],
                });
            }
            state.next_mobile += 1;
            let mobile_id = MobileId(state.next_mobile);
            state.mobiles.insert(mobile_id, *public_key);
            mobile_id
        };
        debug!(mobile_id = %mobile_id, "Simulated registration");
        Ok(Registration {
            mobile_id,
            issued: self.issue(*public_key),
        })
    }

    async fn renew_certificate(
        &self,
        mobile_id: MobileId,
        device_id: DeviceId,
    ) -> CloudResult<IssuedCertificate> {
        let subject = {
            let mut state = self.state.lock();
            state.renewal_calls += 1;
            if state.fail_renewals {
                return Err(CloudError::unavailable("renewals disabled"));
            }
            if device_id != self.device_id {
                return Err(CloudError::Status {
                    status: 404,
                    messages: vec![format!("device {device_id} not found")],
                });
            }
            *state
                .mobiles
                .get(&mobile_id)
                .ok_or_else(|| CloudError::Unauthorized {
                    reason: format!("mobile {mobile_id} not registered"),
                })?
        };
        Ok(self.issue(subject))
    }

    async fn get_signed_timestamp(&self) -> CloudResult<SignedTimestamp> {
        Ok(SignedTimestamp::issue(&self.authority, self.clock.now()))
    }

    async fn get_activity_log(&self, device_id: DeviceId) -> CloudResult<Vec<ActivityEntry>> {
        let delay = {
            let mut state = self.state.lock();
            state.activity_calls += 1;
            state.activity_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let state = self.state.lock();
        if state.fail_activity {
            return Err(CloudError::unavailable("activity log disabled"));
        }
        if device_id != self.device_id {
            return Ok(Vec::new());
        }
        Ok(state.users.clone())
    }

    async fn list_locks(&self) -> CloudResult<Vec<LockInfo>> {
        Ok(vec![LockInfo {
            id: self.device_id,
            name: "Simulated lock".into(),
            serial: SIM_SERIAL.into(),
        }])
    }

    async fn delete_mobile(&self, mobile_id: MobileId) -> CloudResult<()> {
        match self.state.lock().mobiles.remove(&mobile_id) {
            Some(_) => Ok(()),
            None => Err(CloudError::Status {
                status: 404,
                messages: vec![format!("mobile {mobile_id} not found")],
            }),
        }
    }
}

impl std::fmt::Debug for SimulatedCloud {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedCloud")
            .field("device_id", &self.device_id)
            .field("authority", &self.authority.public_key().fingerprint())
            .finish_non_exhaustive()
    }
}

// ============================================
// LockSimulator
// ============================================

struct LockFirmware {
    lock_state: LockState,
    door: DoorState,
    jammed: bool,
    battery_level: u8,
    charging: bool,
    remote_actor: ActorId,
    reject_handshakes: bool,
    silent: bool,
    stalled: bool,
    drop_on: Option<Opcode>,
    handshakes: usize,
    commands: Vec<Opcode>,
}

impl Default for LockFirmware {
    fn default() -> Self {
        Self {
            lock_state: LockState::Locked,
            door: DoorState::Closed,
            jammed: false,
            battery_level: 87,
            charging: false,
            remote_actor: ActorId(0),
            reject_handshakes: false,
            silent: false,
            stalled: false,
            drop_on: None,
            handshakes: 0,
            commands: Vec::new(),
        }
    }
}

impl LockFirmware {
    fn change(&mut self, state: LockState) -> Event {
        self.lock_state = state;
        Event::StatusChange(StatusChange {
            state,
            jammed: self.jammed,
            trigger: Trigger::Remote,
            actor: self.remote_actor,
            door: self.door,
        })
    }

    /// Runs a command: result, response data, events that follow.
    fn execute(&mut self, command: &Command) -> (ResultCode, Bytes, Vec<Event>) {
        let none = Bytes::new();
        match command.opcode {
            Opcode::GetState => {
                let report = StateReport {
                    state: self.lock_state,
                    jammed: self.jammed,
                    door: self.door,
                };
                (ResultCode::Success, Bytes::copy_from_slice(&report.to_bytes()), Vec::new())
            }
            Opcode::GetBattery => {
                let report = BatteryReport {
                    level: self.battery_level,
                    charging: self.charging,
                };
                (ResultCode::Success, Bytes::copy_from_slice(&report.to_bytes()), Vec::new())
            }
            Opcode::Lock | Opcode::Unlock | Opcode::PullSpring if self.jammed => {
                (ResultCode::Error, none, Vec::new())
            }
            Opcode::Lock => {
                let events = vec![self.change(LockState::Locking), self.change(LockState::Locked)];
                (ResultCode::Success, none, events)
            }
            Opcode::Unlock if self.stalled => {
                (ResultCode::Success, none, vec![self.change(LockState::Unlocking)])
            }
            Opcode::Unlock => {
                let events = vec![
                    self.change(LockState::Unlocking),
                    self.change(LockState::Unlocked),
                ];
                (ResultCode::Success, none, events)
            }
            Opcode::PullSpring if !self.lock_state.is_unlocked() => {
                (ResultCode::Error, none, Vec::new())
            }
            Opcode::PullSpring => {
                let events = vec![self.change(LockState::Pulling), self.change(LockState::Unlocked)];
                (ResultCode::Success, none, events)
            }
            Opcode::SetSignedDatetime => (
                ResultCode::Success,
                none,
                vec![Event::SignedDatetimeAck(ResultCode::Success)],
            ),
        }
    }
}

enum Control {
    Drop,
    Emit(Event),
}

/// Lock firmware on a [`MockPeripheral`].
pub struct LockSimulator {
    firmware: Arc<Mutex<LockFirmware>>,
    control: mpsc::UnboundedSender<Control>,
    task: JoinHandle<()>,
}

impl LockSimulator {
    /// Starts serving connections on `peripheral`.
    #[must_use]
    pub fn spawn(peripheral: MockPeripheral, identity: LockIdentity) -> Self {
        let firmware = Arc::new(Mutex::new(LockFirmware::default()));
        let (control, control_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(serve(peripheral, identity, Arc::clone(&firmware), control_rx));
        Self {
            firmware,
            control,
            task,
        }
    }

    /// Actor reported for remote operations.
    pub fn set_remote_actor(&self, actor: ActorId) {
        self.firmware.lock().remote_actor = actor;
    }

    /// Answers every handshake with a certificate alert.
    pub fn reject_handshakes(&self, reject: bool) {
        self.firmware.lock().reject_handshakes = reject;
    }

    /// Stops answering commands.
    pub fn set_silent(&self, silent: bool) {
        self.firmware.lock().silent = silent;
    }

    /// Accepts unlocks but leaves the bolt moving.
    pub fn stall_motor(&self, stalled: bool) {
        self.firmware.lock().stalled = stalled;
    }

    /// Battery level reported from now on.
    pub fn set_battery_level(&self, level: u8) {
        self.firmware.lock().battery_level = level;
    }

    /// Drops the link the next time `opcode` arrives.
    pub fn drop_on(&self, opcode: Opcode) {
        self.firmware.lock().drop_on = Some(opcode);
    }

    /// Drops the current link.
    pub fn drop_link(&self) {
        let _ = self.control.send(Control::Drop);
    }

    /// Sets the bolt state without notifying.
    pub fn set_lock_state(&self, state: LockState) {
        self.firmware.lock().lock_state = state;
    }

    /// Notifies a status change on the current session.
    pub fn emit_status(&self, change: StatusChange) {
        self.firmware.lock().lock_state = change.state;
        let _ = self.control.send(Control::Emit(Event::StatusChange(change)));
    }

    /// Asks the controller for signed time.
    pub fn request_time(&self) {
        let _ = self.control.send(Control::Emit(Event::NeedDateTime));
    }

    /// Bolt state.
    #[must_use]
    pub fn lock_state(&self) -> LockState {
        self.firmware.lock().lock_state
    }

    /// Completed handshakes.
    #[must_use]
    pub fn handshakes(&self) -> usize {
        self.firmware.lock().handshakes
    }

    /// Commands received, in order.
    #[must_use]
    pub fn commands(&self) -> Vec<Opcode> {
        self.firmware.lock().commands.clone()
    }
}

impl Drop for LockSimulator {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl std::fmt::Debug for LockSimulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockSimulator")
            .field("lock_state", &self.lock_state())
            .field("handshakes", &self.handshakes())
            .finish_non_exhaustive()
    }
}

async fn serve(
    mut peripheral: MockPeripheral,
    identity: LockIdentity,
    firmware: Arc<Mutex<LockFirmware>>,
    mut control: mpsc::UnboundedReceiver<Control>,
) {
    loop {
        tokio::select! {
            link = peripheral.accept() => match link {
                Some(link) => serve_link(link, &identity, &firmware, &mut control).await,
                None => break,
            },
            Some(_) = control.recv() => trace!("No controller connected, control ignored"),
        }
    }
}

async fn serve_link(
    mut link: PeripheralLink,
    identity: &LockIdentity,
    firmware: &Mutex<LockFirmware>,
    control: &mut mpsc::UnboundedReceiver<Control>,
) {
    debug!("Simulated lock accepted a connection");
    let mut handshake = LockHandshake::new(identity.clone());
    let mut session: Option<Session> = None;
    loop {
        tokio::select! {
            write = link.next_write() => {
                let Some(write) = write else {
                    debug!("Controller disconnected from simulated lock");
                    return;
                };
                let keep = if write.characteristic.eq_ignore_ascii_case(CHAR_HANDSHAKE_RX) {
                    on_handshake(&link, &mut handshake, &mut session, firmware, &write.data)
                } else if write.characteristic.eq_ignore_ascii_case(CHAR_COMMANDS) {
                    on_command(&link, session.as_mut(), firmware, &write.data)
                } else {
                    true
                };
                if !keep {
                    return;
                }
            }
            Some(message) = control.recv() => match message {
                Control::Drop => {
                    link.drop_link("simulated drop");
                    return;
                }
                Control::Emit(event) => {
                    if let Some(session) = session.as_mut() {
                        send(&link, session, &Inbound::Event(event), Channel::Notification);
                    }
                }
            },
        }
    }
}

fn on_handshake(
    link: &PeripheralLink,
    handshake: &mut LockHandshake,
    session: &mut Option<Session>,
    firmware: &Mutex<LockFirmware>,
    frame: &[u8],
) -> bool {
    let handshake_tx = notify_characteristic(Channel::Handshake);
    if firmware.lock().reject_handshakes {
        link.notify(handshake_tx, &AlertCode::InvalidCertificate.to_frame());
        return true;
    }
    match handshake.on_frame(frame) {
        Ok(LockStep::Send(frames)) => {
            for frame in frames {
                link.notify(handshake_tx, &frame);
            }
        }
        Ok(LockStep::Wait) => {}
        Ok(LockStep::Established { session: s, send }) => {
            for frame in send {
                link.notify(handshake_tx, &frame);
            }
            firmware.lock().handshakes += 1;
            info!(session = %s.id(), "Simulated lock session established");
            *session = Some(s);
        }
        Ok(LockStep::Rejected { alert, code }) => {
            warn!(alert = %code, "Simulated lock rejected controller");
            link.notify(handshake_tx, &alert);
        }
        Err(e) => warn!(error = %e, "Simulated lock got a bad handshake frame"),
    }
    true
}

/// Returns `false` if the link was dropped.
fn on_command(
    link: &PeripheralLink,
    session: Option<&mut Session>,
    firmware: &Mutex<LockFirmware>,
    record: &[u8],
) -> bool {
    let Some(session) = session else {
        debug!("Command before session, ignored");
        return true;
    };
    let frame = match session.open(record).and_then(|plain| decode_command(&plain)) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(error = %e, "Simulated lock dropped a bad command");
            return true;
        }
    };

    let (result, data, events) = {
        let mut fw = firmware.lock();
        fw.commands.push(frame.command.opcode);
        if fw.drop_on == Some(frame.command.opcode) {
            fw.drop_on = None;
            drop(fw);
            link.drop_link("simulated drop on command");
            return false;
        }
        if fw.silent {
            return true;
        }
        fw.execute(&frame.command)
    };

    let response = Response {
        tag: frame.tag,
        opcode: frame.command.opcode,
        result,
        data,
    };
    send(link, session, &Inbound::Response(response), Channel::Command);
    for event in events {
        send(link, session, &Inbound::Event(event), Channel::Notification);
    }
    true
}

fn send(link: &PeripheralLink, session: &mut Session, inbound: &Inbound, channel: Channel) {
    match session.seal(&encode_inbound(inbound)) {
        Ok(record) => {
            if !link.notify(notify_characteristic(channel), &record) {
                debug!(channel = %channel, "Simulated lock could not notify");
            }
        }
        Err(e) => warn!(error = %e, "Simulated lock cannot seal"),
    }
}

// ============================================
// SimulatedSite
// ============================================

/// Cloud, radio host and lock wired together.
pub struct SimulatedSite {
    /// Shared clock of cloud, lock and controller.
    pub clock: ManualClock,
    /// Cloud identity service.
    pub cloud: Arc<SimulatedCloud>,
    /// In-memory radio host.
    pub host: MockHost,
    /// Lock firmware.
    pub lock: LockSimulator,
    /// Direct transport over `host`.
    pub transport: Arc<dyn RadioTransport>,
    /// Lock address.
    pub address: DeviceAddress,
    /// Lock serial.
    pub serial: SerialNumber,
}

impl SimulatedSite {
    /// Builds a site whose clocks start at `start`.
    ///
    /// # Errors
    /// Only if the built-in serial fails to parse.
    pub fn new(start: Timestamp) -> Result<Self> {
        let clock = ManualClock::new(start);
        let cloud = Arc::new(SimulatedCloud::new(clock.clone(), SIM_DEVICE_ID));
        let serial: SerialNumber = SIM_SERIAL.parse()?;

        let host = MockHost::new();
        let peripheral = host.add_peripheral(
            SIM_ADDRESS,
            "Simulated lock",
            vec![service_uuid_for_serial(&serial)],
        );
        let lock = LockSimulator::spawn(peripheral, cloud.lock_identity());
        let transport: Arc<dyn RadioTransport> = Arc::new(DirectRadio::new(Arc::new(host.clone())));

        Ok(Self {
            clock,
            cloud,
            host,
            lock,
            transport,
            address: DeviceAddress::new(SIM_ADDRESS),
            serial,
        })
    }

    /// Scan filter selecting the simulated lock.
    #[must_use]
    pub fn scan_filter(&self) -> ScanFilter {
        ScanFilter::for_serial(&self.serial, Duration::from_secs(10))
    }

    /// In-memory store, registered with the simulated cloud.
    ///
    /// # Errors
    /// `Registration` if the cloud was told to refuse.
    pub async fn registered_store(&self, margin: Duration) -> Result<Arc<CredentialStore>> {
        let store = CredentialStore::in_memory(
            Arc::clone(&self.cloud) as Arc<dyn CloudService>,
            Arc::new(self.clock.clone()),
            margin,
        );
        store.register("simulated-token", SIM_DEVICE_ID).await?;
        Ok(Arc::new(store))
    }

    /// In-memory resolver backed by the simulated cloud.
    #[must_use]
    pub fn resolver(&self) -> Arc<ActivityResolver> {
        Arc::new(ActivityResolver::new(
            Arc::clone(&self.cloud) as Arc<dyn CloudService>,
            Arc::new(self.clock.clone()),
            SIM_DEVICE_ID,
        ))
    }

    /// Handle for the simulated lock with a freshly registered store.
    ///
    /// # Errors
    /// As [`registered_store`](Self::registered_store).
    pub async fn handle(&self, lifecycle: LifecycleConfig) -> Result<(LockHandle, Arc<CredentialStore>)> {
        let store = self
            .registered_store(Duration::from_secs(5 * 24 * 3600))
            .await?;
        let handle = LockHandle::new(LockSetup {
            transport: Arc::clone(&self.transport),
            store: Arc::clone(&store),
            resolver: self.resolver(),
            clock: Arc::new(self.clock.clone()),
            scan: self.scan_filter(),
            lifecycle,
        });
        Ok((handle, store))
    }
}

impl std::fmt::Debug for SimulatedSite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedSite")
            .field("address", &self.address)
            .field("serial", &self.serial)
            .finish_non_exhaustive()
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_firmware_unlock_sequence() {
        let mut fw = LockFirmware {
            remote_actor: ActorId(7),
            ..LockFirmware::default()
        };
        let (result, _, events) = fw.execute(&Command::unlock(latchlink_core::protocol::UnlockMode::Normal));
        assert!(result.is_success());
        let states: Vec<_> = events
            .iter()
            .map(|e| match e {
                Event::StatusChange(c) => c.state,
                other => panic!("unexpected event {other:?}"),
            })
            .collect();
        assert_eq!(states, vec![LockState::Unlocking, LockState::Unlocked]);
        assert_eq!(fw.lock_state, LockState::Unlocked);
    }

    #[test]
    fn test_firmware_refuses_when_jammed() {
        let mut fw = LockFirmware {
            jammed: true,
            ..LockFirmware::default()
        };
        let (result, _, events) = fw.execute(&Command::lock(latchlink_core::protocol::LockMode::Normal));
        assert_eq!(result, ResultCode::Error);
        assert!(events.is_empty());
    }

    #[test]
    fn test_pull_needs_unlocked() {
        let mut fw = LockFirmware::default();
        let (result, _, _) = fw.execute(&Command::pull_spring());
        assert_eq!(result, ResultCode::Error);
    }

    #[tokio::test]
    async fn test_cloud_renewal_needs_registration() {
        let clock = ManualClock::new(Timestamp::from_secs(1_700_000_000));
        let cloud = SimulatedCloud::new(clock, SIM_DEVICE_ID);
        let err = cloud
            .renew_certificate(MobileId(1), SIM_DEVICE_ID)
            .await
            .unwrap_err();
        assert!(matches!(err, CloudError::Unauthorized { .. }));
        assert_eq!(cloud.renewal_calls(), 1);
    }
}
