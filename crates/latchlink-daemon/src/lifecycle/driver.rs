// ============================================
// File: crates/latchlink-daemon/src/lifecycle/driver.rs
// ============================================
//! # Lock Connection Driver
//!
//! ## Creation Reason
//! One task per lock owns everything that changes: the lifecycle
//! machine, the radio link, the session keys, the pending command and the
//! timers. Serializing through a single task is what keeps correlation
//! tags unambiguous and state transitions race-free.
//!
//! ## Main Functionality
//! - Executes lifecycle actions (scan, connect, timers, observations)
//! - Runs the handshake for each attempt
//! - Sends one command at a time and matches the tagged response
//! - Forwards events to observers as they arrive
//!
//! ## Event Loop
//! ```text
//!                  ┌──────────────────────────────┐
//!  requests ──────►│                              │──► observations (broadcast)
//!  link events ───►│   select! (biased)           │──► state / snapshot (watch)
//!  internal ──────►│   one branch at a time       │──► radio writes
//!  timers ────────►│                              │
//!                  └──────────────────────────────┘
//!  timers: command deadline, reconnect, grace, keep-alive, poll
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Requests are only polled while nothing is in flight; that is the
//!   whole queueing mechanism for callers
//! - Cloud calls outside of connecting run in spawned tasks and report
//!   back on the internal channel; never await them in the loop
//! - A link must always be `disconnect()`ed before it is dropped
//!
//! ## Last Modified
//! v0.1.0 - Initial driver

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, info, trace, warn};

use latchlink_common::time::Clock;
use latchlink_common::types::DeviceAddress;
use latchlink_core::crypto::{ClientCredentials, ClientHandshake, ClientStep, Session, SignedTimestamp};
use latchlink_core::protocol::codec::{decode_inbound, encode_command};
use latchlink_core::protocol::{Command, DoorState, Event, Inbound, Opcode, Response};
use latchlink_core::CoreError;
use latchlink_transport::{
    Advertisement, Channel, LinkEvent, RadioLink, RadioTransport, ScanFilter, TransportError,
};

use super::{Action, ConnectionState, Failure, Lifecycle, LockSnapshot, Observation};
use super::observation::ActivityEvent;
use crate::config::LifecycleConfig;
use crate::error::{CommandError, DaemonError, Result};
use crate::resolver::ActivityResolver;
use crate::store::{CredentialRecord, CredentialStore};

// ============================================
// Messages
// ============================================

/// Caller request.
#[derive(Debug)]
pub(crate) enum Request {
    /// Begin the first scan; answered once it finished.
    Start(oneshot::Sender<Result<()>>),
    /// Send a command; answered with the lock's response.
    Command {
        command: Command,
        reply: oneshot::Sender<Result<Response>>,
    },
}

/// Result of work spawned off the loop.
#[derive(Debug)]
enum Internal {
    SignedTime(Result<SignedTimestamp>),
    RenewalDone(bool),
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Scan,
    Connect { renew_first: bool },
}

struct Queued {
    command: Command,
    reply: Option<oneshot::Sender<Result<Response>>>,
}

impl Queued {
    /// Command issued by the driver itself.
    fn internal(command: Command) -> Self {
        Self {
            command,
            reply: None,
        }
    }
}

struct Pending {
    tag: u8,
    opcode: Opcode,
    reply: Option<oneshot::Sender<Result<Response>>>,
    deadline: Instant,
}

struct ActiveLink {
    link: Arc<dyn RadioLink>,
    session: Session,
    events: mpsc::UnboundedReceiver<LinkEvent>,
    protocol_errors: u32,
}

/// Link opened, credentials ready, handshake not yet run.
struct Opened {
    record: Arc<CredentialRecord>,
    signed_time: SignedTimestamp,
    link: Arc<dyn RadioLink>,
    events: mpsc::UnboundedReceiver<LinkEvent>,
}

/// Channel ends the driver owns.
pub(crate) struct DriverPorts {
    pub requests: mpsc::Receiver<Request>,
    pub shutdown: watch::Receiver<bool>,
    pub state: watch::Sender<ConnectionState>,
    pub snapshot: watch::Sender<LockSnapshot>,
    pub observations: broadcast::Sender<Observation>,
}

/// Collaborators of one lock.
pub(crate) struct DriverDeps {
    pub transport: Arc<dyn RadioTransport>,
    pub store: Arc<CredentialStore>,
    pub resolver: Arc<ActivityResolver>,
    pub clock: Arc<dyn Clock>,
    pub filter: ScanFilter,
    pub config: LifecycleConfig,
}

// ============================================
// Driver
// ============================================

/// Single sequencing point of one lock.
pub(crate) struct Driver {
    machine: Lifecycle,
    deps: DriverDeps,
    ports: DriverPorts,

    address: Option<DeviceAddress>,
    link: Option<ActiveLink>,
    next_phase: Option<Phase>,
    closing: bool,

    pending: Option<Pending>,
    queue: VecDeque<Queued>,
    next_tag: u8,

    reconnect_at: Option<Instant>,
    grace_at: Option<Instant>,
    keepalive_at: Option<Instant>,
    poll_at: Option<Instant>,

    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
    start_reply: Option<oneshot::Sender<Result<()>>>,
    snapshot: LockSnapshot,
    renewing: bool,
    fetching_time: bool,
    reported_fatal: bool,
}

impl Driver {
    pub(crate) fn new(deps: DriverDeps, ports: DriverPorts) -> Self {
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        Self {
            machine: Lifecycle::new(&deps.config),
            deps,
            ports,
            address: None,
            link: None,
            next_phase: None,
            closing: false,
            pending: None,
            queue: VecDeque::new(),
            next_tag: 1,
            reconnect_at: None,
            grace_at: None,
            keepalive_at: None,
            poll_at: None,
            internal_tx,
            internal_rx,
            start_reply: None,
            snapshot: LockSnapshot::default(),
            renewing: false,
            fetching_time: false,
            reported_fatal: false,
        }
    }

    /// Runs until `close()` or until every handle is gone.
    pub(crate) async fn run(mut self) {
        debug!("Lock driver started");
        while !self.closing {
            if let Some(phase) = self.next_phase.take() {
                match phase {
                    Phase::Scan => self.scan().await,
                    Phase::Connect { renew_first } => self.connect(renew_first).await,
                }
                continue;
            }
            self.pump().await;
            self.step().await;
        }
        self.finish().await;
    }

    // ========================================
    // Main Loop
    // ========================================

    async fn step(&mut self) {
        let accepting = self.pending.is_none() && self.queue.is_empty();
        let deadline = self.pending.as_ref().map(|p| p.deadline);

        tokio::select! {
            biased;

            changed = self.ports.shutdown.changed() => {
                if changed.is_err() || *self.ports.shutdown.borrow() {
                    self.closing = true;
                }
            }
            event = next_link_event(&mut self.link) => match event {
                Some(LinkEvent::Frame { channel, data }) => self.on_frame(channel, &data).await,
                Some(LinkEvent::Disconnected { reason }) => self.drop_link(&reason).await,
                None => self.drop_link("link event channel closed").await,
            },
            Some(message) = self.internal_rx.recv() => self.on_internal(message),
            () = sleep_until_opt(deadline) => self.on_command_timeout().await,
            () = sleep_until_opt(self.reconnect_at) => {
                self.reconnect_at = None;
                let actions = self.machine.backoff_elapsed();
                self.apply(actions);
            }
            () = sleep_until_opt(self.grace_at) => self.on_grace_elapsed(),
            () = sleep_until_opt(self.keepalive_at) => self.on_keepalive(),
            () = sleep_until_opt(self.poll_at) => self.on_poll(),
            request = self.ports.requests.recv(), if accepting => match request {
                Some(request) => self.on_request(request),
                None => {
                    debug!("All handles dropped");
                    self.closing = true;
                }
            },
        }
    }

    /// Awaits `work` while still honouring shutdown, the grace timer and
    /// callers. Returns `None` if the driver is closing.
    async fn guarded<T>(&mut self, work: impl Future<Output = T>) -> Option<T> {
        tokio::pin!(work);
        loop {
            tokio::select! {
                biased;

                changed = self.ports.shutdown.changed() => {
                    if changed.is_err() || *self.ports.shutdown.borrow() {
                        self.closing = true;
                        return None;
                    }
                }
                () = sleep_until_opt(self.grace_at) => self.on_grace_elapsed(),
                Some(request) = self.ports.requests.recv() => self.on_request(request),
                out = &mut work => return Some(out),
            }
        }
    }

    fn apply(&mut self, actions: Vec<Action>) {
        let now = Instant::now();
        for action in actions {
            match action {
                Action::Scan => self.next_phase = Some(Phase::Scan),
                Action::Connect { renew_first } => {
                    self.next_phase = Some(Phase::Connect { renew_first });
                }
                Action::ArmReconnect(delay) => {
                    debug!(delay_secs = delay.as_secs(), "Reconnect scheduled");
                    self.reconnect_at = Some(now + delay);
                }
                Action::ArmGrace(delay) => self.grace_at = Some(now + delay),
                Action::CancelGrace => self.grace_at = None,
                Action::Emit(observation) => self.emit(observation),
            }
        }
        self.publish_state();
    }

    fn emit(&mut self, observation: Observation) {
        let availability = match observation {
            Observation::Available => Some(true),
            Observation::Unavailable => Some(false),
            _ => None,
        };
        match &observation {
            Observation::Available => info!("Lock available"),
            Observation::Unavailable => warn!("Lock unavailable"),
            Observation::PersistentError(kind, message) => {
                warn!(kind = %kind, message = %message, "Persistent error reported");
            }
            _ => {}
        }
        // no receivers is fine
        let _ = self.ports.observations.send(observation);
        if let Some(available) = availability {
            self.snapshot.available = available;
            self.publish_snapshot();
        }
    }

    fn publish_state(&self) {
        let state = self.machine.state();
        self.ports.state.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }

    fn publish_snapshot(&self) {
        self.ports.snapshot.send_replace(self.snapshot.clone());
        let _ = self
            .ports
            .observations
            .send(Observation::Snapshot(self.snapshot.clone()));
    }

    // ========================================
    // Phases
    // ========================================

    async fn scan(&mut self) {
        self.publish_state();
        let work = find_lock(Arc::clone(&self.deps.transport), self.deps.filter.clone());
        let Some(result) = self.guarded(work).await else {
            return;
        };
        match result {
            Ok(advert) => {
                info!(address = %advert.address, rssi = advert.rssi, "Lock found");
                self.address = Some(advert.address);
                let actions = self.machine.scan_finished(true);
                self.apply(actions);
                if let Some(reply) = self.start_reply.take() {
                    let _ = reply.send(Ok(()));
                }
            }
            Err(e) => {
                warn!(error = %e, "Lock not found");
                let actions = self.machine.scan_finished(false);
                self.apply(actions);
                if let Some(reply) = self.start_reply.take() {
                    let _ = reply.send(Err(e));
                }
            }
        }
    }

    async fn connect(&mut self, renew_first: bool) {
        self.publish_state();
        let Some(address) = self.address.clone() else {
            let actions = self.machine.attempt_failed(Failure::Transport, Instant::now());
            self.apply(actions);
            return;
        };

        let work = open_link(
            Arc::clone(&self.deps.transport),
            Arc::clone(&self.deps.store),
            address,
            renew_first,
            self.deps.config.connect_timeout(),
        );
        let Some((renewal, result)) = self.guarded(work).await else {
            return;
        };
        if let Some(ok) = renewal {
            let actions = self.machine.renewal_finished(ok);
            self.apply(actions);
        }
        let opened = match result {
            Ok(opened) => opened,
            Err(e) => return self.attempt_failed(&e),
        };

        let actions = self.machine.link_opened();
        self.apply(actions);

        let link = Arc::clone(&opened.link);
        let work = handshake(opened, self.deps.config.handshake_timeout());
        let Some(result) = self.guarded(work).await else {
            let _ = link.disconnect().await;
            return;
        };
        match result {
            Ok((session, events)) => self.authenticated(link, session, events),
            Err(e) => self.attempt_failed(&e),
        }
    }

    fn authenticated(
        &mut self,
        link: Arc<dyn RadioLink>,
        session: Session,
        events: mpsc::UnboundedReceiver<LinkEvent>,
    ) {
        info!(address = %link.address(), session = %session.id(), "Session established");
        self.link = Some(ActiveLink {
            link,
            session,
            events,
            protocol_errors: 0,
        });
        self.reported_fatal = false;
        let actions = self.machine.authenticated(Instant::now());
        self.apply(actions);

        self.keepalive_at = Some(Instant::now() + self.deps.config.keepalive());
        self.poll_at = Some(Instant::now() + self.deps.config.poll_interval());
        self.queue.push_back(Queued::internal(Command::get_state()));
        self.queue.push_back(Queued::internal(Command::get_battery()));
    }

    fn attempt_failed(&mut self, error: &DaemonError) {
        let failure = failure_of(error);
        warn!(error = %error, kind = %error.kind(), "Connection attempt failed");
        if failure == Failure::Cloud && error.is_fatal() && !self.reported_fatal {
            self.reported_fatal = true;
            self.emit(Observation::PersistentError(error.kind(), error.to_string()));
        }
        let actions = self.machine.attempt_failed(failure, Instant::now());
        self.apply(actions);
    }

    // ========================================
    // Commands
    // ========================================

    fn on_request(&mut self, request: Request) {
        match request {
            Request::Start(reply) => {
                if self.machine.state() == ConnectionState::Idle {
                    self.start_reply = Some(reply);
                    let actions = self.machine.start();
                    self.apply(actions);
                } else {
                    let _ = reply.send(Ok(()));
                }
            }
            Request::Command { command, reply } => {
                if self.machine.state() == ConnectionState::Authenticated && self.link.is_some() {
                    self.queue.push_back(Queued {
                        command,
                        reply: Some(reply),
                    });
                } else {
                    debug!(opcode = %command.opcode, state = %self.machine.state(), "Command refused, not connected");
                    let _ = reply.send(Err(TransportError::NotConnected.into()));
                }
            }
        }
    }

    /// Sends the next queued command if nothing is in flight.
    async fn pump(&mut self) {
        if self.pending.is_some() {
            return;
        }
        let Some(active) = self.link.as_mut() else {
            return;
        };
        let Some(queued) = self.queue.pop_front() else {
            return;
        };

        let tag = self.next_tag;
        self.next_tag = self.next_tag.wrapping_add(1).max(1);
        let opcode = queued.command.opcode;
        let frame = encode_command(tag, &queued.command);

        let record = match active.session.seal(&frame) {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, opcode = %opcode, "Cannot seal command");
                if let Some(reply) = queued.reply {
                    let _ = reply.send(Err(e.into()));
                }
                return;
            }
        };
        trace!(tag, opcode = %opcode, "Sending command");
        if let Err(e) = active.link.write(Channel::Command, &record).await {
            warn!(error = %e, opcode = %opcode, "Command write failed");
            if let Some(reply) = queued.reply {
                let _ = reply.send(Err(e.into()));
            }
            self.drop_link("command write failed").await;
            return;
        }

        let now = Instant::now();
        self.keepalive_at = Some(now + self.deps.config.keepalive());
        self.pending = Some(Pending {
            tag,
            opcode,
            reply: queued.reply,
            deadline: now + self.deps.config.command_timeout(),
        });
    }

    async fn on_command_timeout(&mut self) {
        if let Some(pending) = self.pending.take() {
            warn!(opcode = %pending.opcode, "Command timed out, treating link as dead");
            if let Some(reply) = pending.reply {
                let _ = reply.send(Err(CommandError::Timeout {
                    opcode: pending.opcode,
                }
                .into()));
            }
        }
        self.drop_link("command timed out").await;
    }

    fn fail_outstanding(&mut self, error: impl Fn() -> DaemonError) {
        if let Some(pending) = self.pending.take() {
            if let Some(reply) = pending.reply {
                let _ = reply.send(Err(error()));
            }
        }
        for queued in self.queue.drain(..) {
            if let Some(reply) = queued.reply {
                let _ = reply.send(Err(error()));
            }
        }
    }

    // ========================================
    // Inbound
    // ========================================

    async fn on_frame(&mut self, channel: Channel, data: &[u8]) {
        if channel == Channel::Handshake {
            debug!("Ignoring handshake frame on an established session");
            return;
        }
        let Some(active) = self.link.as_mut() else {
            return;
        };
        self.keepalive_at = Some(Instant::now() + self.deps.config.keepalive());

        let inbound = active
            .session
            .open(data)
            .and_then(|plain| decode_inbound(&plain));
        match inbound {
            Ok(inbound) => {
                active.protocol_errors = 0;
                match inbound {
                    Inbound::Response(response) => self.on_response(response),
                    Inbound::Event(event) => self.on_event(event),
                }
            }
            Err(e) => self.on_protocol_error(&e).await,
        }
    }

    async fn on_protocol_error(&mut self, error: &CoreError) {
        let Some(active) = self.link.as_mut() else {
            return;
        };
        active.protocol_errors += 1;
        warn!(error = %error, count = active.protocol_errors, "Dropping malformed frame");
        if active.protocol_errors > self.deps.config.max_protocol_errors {
            self.drop_link("too many malformed frames").await;
        }
    }

    fn on_response(&mut self, response: Response) {
        let pending = match self.pending.take() {
            Some(p) if p.tag == response.tag && p.opcode == response.opcode => p,
            other => {
                self.pending = other;
                debug!(tag = response.tag, opcode = %response.opcode, "Dropping unmatched response");
                return;
            }
        };

        if response.result.is_success() {
            self.record_response(&response);
        } else {
            warn!(opcode = %response.opcode, result = %response.result, "Lock rejected command");
        }
        match pending.reply {
            Some(reply) => {
                let result = if response.result.is_success() {
                    Ok(response)
                } else {
                    Err(CommandError::Rejected {
                        opcode: response.opcode,
                        result: response.result,
                    }
                    .into())
                };
                let _ = reply.send(result);
            }
            None => trace!(opcode = %response.opcode, "Internal command answered"),
        }
    }

    fn record_response(&mut self, response: &Response) {
        match response.opcode {
            Opcode::GetState => match response.state_report() {
                Ok(report) => {
                    self.snapshot.lock_state = Some(report.state);
                    self.snapshot.jammed = report.jammed;
                    if report.door != DoorState::Unknown {
                        self.snapshot.door_state = Some(report.door);
                    }
                    self.publish_snapshot();
                }
                Err(e) => warn!(error = %e, "Bad state report"),
            },
            Opcode::GetBattery => match response.battery_report() {
                Ok(report) => {
                    self.snapshot.battery_level = Some(report.level);
                    self.snapshot.battery_charging = Some(report.charging);
                    self.publish_snapshot();
                }
                Err(e) => warn!(error = %e, "Bad battery report"),
            },
            _ => {}
        }
    }

    fn on_event(&mut self, event: Event) {
        match event {
            Event::StatusChange(change) => {
                let user = self.deps.resolver.resolve(change.actor);
                debug!(state = %change.state, trigger = %change.trigger, user = %user, "Status change");
                self.snapshot.apply_change(&change, &user);
                let _ = self.ports.observations.send(Observation::Activity(ActivityEvent {
                    kind: change.kind(),
                    state: change.state,
                    trigger: change.trigger,
                    actor: change.actor,
                    user,
                    at: self.deps.clock.now(),
                }));
                self.publish_snapshot();
            }
            Event::SignedDatetimeAck(result) => {
                if result.is_success() {
                    info!("Lock accepted signed time");
                } else {
                    warn!(result = %result, "Lock refused signed time");
                }
            }
            Event::NeedDateTime => self.spawn_time_fetch(),
            Event::DeviceStats(stats) => trace!(len = stats.len(), "Device stats"),
        }
    }

    fn on_internal(&mut self, message: Internal) {
        match message {
            Internal::SignedTime(result) => {
                self.fetching_time = false;
                match result {
                    Ok(signed) if self.link.is_some() => {
                        self.queue
                            .push_back(Queued::internal(Command::set_signed_datetime(&signed)));
                    }
                    Ok(_) => debug!("Signed time arrived after link loss"),
                    Err(e) => warn!(error = %e, "Cannot fetch signed time for lock"),
                }
            }
            Internal::RenewalDone(ok) => {
                self.renewing = false;
                debug!(ok, "Background renewal finished");
            }
        }
    }

    fn spawn_time_fetch(&mut self) {
        if self.fetching_time {
            return;
        }
        info!("Lock asked for signed time");
        self.fetching_time = true;
        let store = Arc::clone(&self.deps.store);
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = store.get_signed_timestamp().await;
            let _ = tx.send(Internal::SignedTime(result));
        });
    }

    fn spawn_renewal(&mut self) {
        if self.renewing {
            return;
        }
        self.renewing = true;
        let store = Arc::clone(&self.deps.store);
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let ok = match store.renew().await {
                Ok(_) => true,
                Err(e) => {
                    warn!(error = %e, "Background renewal failed");
                    false
                }
            };
            let _ = tx.send(Internal::RenewalDone(ok));
        });
    }

    // ========================================
    // Timers
    // ========================================

    fn on_keepalive(&mut self) {
        self.keepalive_at = None;
        if self.link.is_none() {
            return;
        }
        if self.pending.is_none() && self.queue.is_empty() {
            trace!("Keep-alive probe");
            self.queue.push_back(Queued::internal(Command::get_state()));
        } else {
            self.keepalive_at = Some(Instant::now() + self.deps.config.keepalive());
        }
        if self.deps.store.needs_renewal() {
            self.spawn_renewal();
        }
    }

    /// Battery level is only ever reported on request.
    fn on_poll(&mut self) {
        self.poll_at = None;
        if self.link.is_none() {
            return;
        }
        debug!("Periodic state and battery refresh");
        self.queue.push_back(Queued::internal(Command::get_state()));
        self.queue.push_back(Queued::internal(Command::get_battery()));
        self.poll_at = Some(Instant::now() + self.deps.config.poll_interval());
    }

    fn on_grace_elapsed(&mut self) {
        self.grace_at = None;
        let actions = self.machine.grace_elapsed();
        self.apply(actions);
    }

    // ========================================
    // Teardown
    // ========================================

    async fn drop_link(&mut self, reason: &str) {
        let Some(active) = self.link.take() else {
            return;
        };
        warn!(reason, "Link lost");
        self.keepalive_at = None;
        self.poll_at = None;
        let actions = self.machine.link_lost(Instant::now());
        self.apply(actions);
        self.fail_outstanding(|| TransportError::NotConnected.into());
        // session keys go with `active`
        if let Err(e) = active.link.disconnect().await {
            debug!(error = %e, "Disconnect after link loss failed");
        }
    }

    async fn finish(mut self) {
        info!("Closing lock connection");
        self.reconnect_at = None;
        self.keepalive_at = None;
        self.poll_at = None;
        self.grace_at = None;
        self.next_phase = None;
        if let Some(active) = self.link.take() {
            if let Err(e) = active.link.disconnect().await {
                debug!(error = %e, "Disconnect on close failed");
            }
        }
        self.fail_outstanding(|| DaemonError::Closed);
        if let Some(reply) = self.start_reply.take() {
            let _ = reply.send(Err(DaemonError::Closed));
        }
        let actions = self.machine.close();
        self.apply(actions);

        self.ports.requests.close();
        while let Ok(request) = self.ports.requests.try_recv() {
            match request {
                Request::Start(reply) => {
                    let _ = reply.send(Err(DaemonError::Closed));
                }
                Request::Command { reply, .. } => {
                    let _ = reply.send(Err(DaemonError::Closed));
                }
            }
        }
        debug!("Lock driver stopped");
    }
}

// ============================================
// Helpers
// ============================================

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn next_link_event(link: &mut Option<ActiveLink>) -> Option<LinkEvent> {
    match link {
        Some(active) => active.events.recv().await,
        None => std::future::pending().await,
    }
}

fn failure_of(error: &DaemonError) -> Failure {
    if error.is_authentication_failure() {
        Failure::Authentication
    } else if error.is_protocol_error() {
        Failure::Protocol
    } else if matches!(error, DaemonError::Transport(_)) {
        Failure::Transport
    } else {
        Failure::Cloud
    }
}

async fn find_lock(transport: Arc<dyn RadioTransport>, filter: ScanFilter) -> Result<Advertisement> {
    debug!(transport = transport.kind(), "Scanning for lock");
    let mut scan = transport.scan(filter).await?;
    scan.next()
        .await
        .ok_or_else(|| TransportError::timeout("scan for lock").into())
}

/// Credentials, signed time and an open link for one attempt.
///
/// Also returns the outcome of a forced renewal, if one was requested.
async fn open_link(
    transport: Arc<dyn RadioTransport>,
    store: Arc<CredentialStore>,
    address: DeviceAddress,
    renew_first: bool,
    connect_timeout: Duration,
) -> (Option<bool>, Result<Opened>) {
    let renewal = if renew_first {
        info!("Renewing certificate before reconnecting");
        match store.renew().await {
            Ok(_) => Some(true),
            Err(e) => {
                warn!(error = %e, "Forced renewal failed");
                Some(false)
            }
        }
    } else {
        None
    };

    let opened = prepare(&transport, &store, &address, connect_timeout).await;
    (renewal, opened)
}

async fn prepare(
    transport: &Arc<dyn RadioTransport>,
    store: &CredentialStore,
    address: &DeviceAddress,
    connect_timeout: Duration,
) -> Result<Opened> {
    let record = store.get_active_credential().await?;
    let signed_time = store.get_signed_timestamp().await?;
    debug!(%address, transport = transport.kind(), "Connecting");
    let link: Arc<dyn RadioLink> = timeout(connect_timeout, transport.connect(address))
        .await
        .map_err(|_| TransportError::timeout("connect"))??
        .into();
    let (tx, events) = mpsc::unbounded_channel();
    if let Err(e) = link.subscribe(tx) {
        let _ = link.disconnect().await;
        return Err(e.into());
    }
    Ok(Opened {
        record,
        signed_time,
        link,
        events,
    })
}

/// Runs the handshake on an opened link; disconnects it on failure.
async fn handshake(
    opened: Opened,
    limit: Duration,
) -> Result<(Session, mpsc::UnboundedReceiver<LinkEvent>)> {
    let Opened {
        record,
        signed_time,
        link,
        mut events,
    } = opened;

    let credentials = record.credentials(signed_time);
    let result = match timeout(limit, exchange(link.as_ref(), &mut events, credentials)).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::timeout("handshake").into()),
    };
    match result {
        Ok(session) => Ok((session, events)),
        Err(e) => {
            let _ = link.disconnect().await;
            Err(e)
        }
    }
}

async fn exchange(
    link: &dyn RadioLink,
    events: &mut mpsc::UnboundedReceiver<LinkEvent>,
    credentials: ClientCredentials<'_>,
) -> Result<Session> {
    let (mut client, hello) = ClientHandshake::new(credentials, link.mtu());
    link.write(Channel::Handshake, &hello).await?;
    loop {
        match events.recv().await {
            Some(LinkEvent::Frame {
                channel: Channel::Handshake,
                data,
            }) => match client.on_frame(&data)? {
                ClientStep::Send(frames) => {
                    for frame in frames {
                        link.write(Channel::Handshake, &frame).await?;
                    }
                }
                ClientStep::Wait => {}
                ClientStep::Established(session) => return Ok(session),
            },
            Some(LinkEvent::Frame { channel, .. }) => {
                trace!(channel = %channel, "Ignoring frame during handshake");
            }
            Some(LinkEvent::Disconnected { reason }) => {
                debug!(reason = %reason, "Link lost during handshake");
                return Err(TransportError::NotConnected.into());
            }
            None => return Err(TransportError::NotConnected.into()),
        }
    }
}
