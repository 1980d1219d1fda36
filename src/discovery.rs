//! Discovery state machine.
//!
//! A single orchestration worker owns the [`DiscoveryState`] and everything
//! that feeds it. Every input arrives as a [`Command`] on one channel:
//!
//! - discovery requests and aborts from the public API
//! - scanner reports, from whatever thread the vendor layer uses
//! - watchdog, grace and cooldown timer expiries
//! - wired attach/detach events
//! - transport lease requests from the connection worker
//!
//! Commands are handled one at a time, so state transitions are linearizable
//! without locks. After each command the worker publishes a
//! [`DiscoveryStatus`] snapshot that readers can take without queueing, and
//! only then answers the discovery callers that command resolved.
//!
//! # Sessions
//!
//! Each scan phase, cleanup and cooldown runs under its own session. Reports
//! and timer expiries carry the session they belong to and are ignored once
//! it is no longer current, so a late vendor callback after a watchdog reset
//! can never change state or leak into a later result.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::config::{CoordinatorConfig, DiscoveryStrategy};
use crate::error::{Error, Result};
use crate::hotplug::{WiredAccessory, WirelessPredicate};
use crate::registry::DeviceRegistry;
use crate::scanner::{ForcedCleanup, ScanEvent, ScanSink, TransportScanner};
use crate::session::{SessionId, SessionPurpose, SessionTracker};
use crate::types::{DeviceRecord, DiscoveryState, DiscoveryStatus, RefusalReason, ScanTarget};
use crate::watchdog::{Deadline, WatchdogRegistry};

pub(crate) type DiscoveryReply = Sender<Result<Vec<DeviceRecord>>>;

// =============================================================================
// Requests and commands
// =============================================================================

/// A discovery request with its scan timeout already resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryRequest {
    Lan(Duration),
    Bluetooth(Duration),
    /// Synchronous USB enumeration, which has no scanner timeout.
    Usb,
    All(Duration),
}

impl DiscoveryRequest {
    fn single_target(&self) -> Option<ScanTarget> {
        match self {
            DiscoveryRequest::Lan(_) => Some(ScanTarget::Lan),
            DiscoveryRequest::Bluetooth(_) => Some(ScanTarget::Bluetooth),
            DiscoveryRequest::Usb => Some(ScanTarget::Usb),
            DiscoveryRequest::All(_) => None,
        }
    }
}

/// Input to the orchestration worker.
#[derive(Debug)]
pub(crate) enum Command {
    Discover {
        request: DiscoveryRequest,
        reply: DiscoveryReply,
    },
    Abort,
    Scan {
        session: SessionId,
        target: ScanTarget,
        event: ScanEvent,
    },
    WatchdogFired(SessionId),
    GraceElapsed(SessionId),
    CleanupFinished(SessionId),
    CooldownElapsed(SessionId),
    WiredAttached(WiredAccessory),
    WiredDetached(String),
    MarkWiredUsed,
    ResetRadioSuppression,
    AcquireLease {
        target: ScanTarget,
        reply: Sender<TransportLease>,
    },
    ReleaseLease(ScanTarget),
    /// Wired accessories currently attached, ordered by id.
    AttachedAccessories(Sender<Vec<WiredAccessory>>),
    /// Answered once every earlier command has been handled and published.
    Barrier(Sender<()>),
    Shutdown,
}

/// Exclusive use of a transport for a connect attempt.
///
/// While any lease on a transport is alive, discovery skips that transport.
/// Dropping the lease releases it, including when it is dropped unread inside
/// a reply channel whose receiver gave up waiting.
#[derive(Debug)]
pub(crate) struct TransportLease {
    target: ScanTarget,
    tx: Sender<Command>,
}

impl TransportLease {
    pub(crate) fn target(&self) -> ScanTarget {
        self.target
    }
}

impl Drop for TransportLease {
    fn drop(&mut self) {
        let _ = self.tx.send(Command::ReleaseLease(self.target));
    }
}

// =============================================================================
// Plan
// =============================================================================

/// One scan pass over one or more scanners, run under a single session.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Phase {
    targets: Vec<ScanTarget>,
    timeout: Option<Duration>,
    /// Skip this phase if earlier phases already found something.
    only_if_empty: bool,
}

impl Phase {
    fn single(target: ScanTarget, timeout: Option<Duration>) -> Self {
        Self {
            targets: vec![target],
            timeout,
            only_if_empty: false,
        }
    }

    fn fallback(mut self) -> Self {
        self.only_if_empty = true;
        self
    }
}

fn plan(request: DiscoveryRequest, config: &CoordinatorConfig) -> VecDeque<Phase> {
    match request {
        DiscoveryRequest::Lan(timeout) => [Phase::single(ScanTarget::Lan, Some(timeout))].into(),
        DiscoveryRequest::Bluetooth(timeout) => {
            [Phase::single(ScanTarget::Bluetooth, Some(timeout))].into()
        }
        DiscoveryRequest::Usb => [Phase::single(ScanTarget::Usb, None)].into(),
        DiscoveryRequest::All(timeout) => match config.strategy {
            DiscoveryStrategy::Sequential => [
                Phase::single(ScanTarget::Lan, Some(timeout)),
                Phase::single(ScanTarget::Bluetooth, Some(timeout)),
                Phase::single(ScanTarget::Usb, None),
            ]
            .into(),
            DiscoveryStrategy::CombinedFirst => [
                Phase {
                    targets: ScanTarget::all().to_vec(),
                    timeout: Some(timeout),
                    only_if_empty: false,
                },
                Phase::single(ScanTarget::Lan, Some(config.lan_timeout)).fallback(),
                Phase::single(ScanTarget::Bluetooth, Some(config.bluetooth_timeout)).fallback(),
                Phase::single(ScanTarget::Usb, None).fallback(),
            ]
            .into(),
        },
    }
}

// =============================================================================
// Orchestrator
// =============================================================================

struct RunningPhase {
    session: SessionId,
    pending: HashSet<ScanTarget>,
    found: DeviceRegistry,
}

struct ActiveDiscovery {
    request: DiscoveryRequest,
    reply: DiscoveryReply,
    remaining: VecDeque<Phase>,
    current: Option<RunningPhase>,
    results: DeviceRegistry,
}

/// Collaborators the orchestrator drives.
pub(crate) struct OrchestratorParts {
    pub config: CoordinatorConfig,
    pub scanners: Vec<Box<dyn TransportScanner>>,
    pub forced_cleanup: Arc<dyn ForcedCleanup>,
    pub is_wireless: Arc<WirelessPredicate>,
}

pub(crate) struct Orchestrator {
    config: CoordinatorConfig,
    tx: Sender<Command>,
    scanners: HashMap<ScanTarget, Box<dyn TransportScanner>>,
    forced_cleanup: Arc<dyn ForcedCleanup>,
    is_wireless: Arc<WirelessPredicate>,

    tracker: SessionTracker,
    watchdogs: WatchdogRegistry,
    state: DiscoveryState,
    active: Option<ActiveDiscovery>,
    recovery_timer: Option<Deadline>,

    radio_suppressed: bool,
    wired_attached: HashMap<String, WiredAccessory>,
    wireless_attached: HashSet<String>,
    last_refusal: Option<RefusalReason>,

    leases: HashMap<ScanTarget, usize>,
    lease_waiters: Vec<(ScanTarget, Sender<TransportLease>)>,

    /// Answers held back until the snapshot of the current command is published.
    outbox: Vec<(DiscoveryReply, Result<Vec<DeviceRecord>>)>,
    status: Arc<Mutex<DiscoveryStatus>>,
}

/// Start the orchestration worker thread.
pub(crate) fn spawn(
    parts: OrchestratorParts,
    tx: Sender<Command>,
    rx: Receiver<Command>,
    status: Arc<Mutex<DiscoveryStatus>>,
) -> JoinHandle<()> {
    let orchestrator = Orchestrator::new(parts, tx, status);
    thread::spawn(move || orchestrator.run(rx))
}

impl Orchestrator {
    fn new(
        parts: OrchestratorParts,
        tx: Sender<Command>,
        status: Arc<Mutex<DiscoveryStatus>>,
    ) -> Self {
        let watchdog_tx = tx.clone();
        let watchdogs = WatchdogRegistry::new(move |session| {
            let _ = watchdog_tx.send(Command::WatchdogFired(session));
        });

        let mut scanners = HashMap::new();
        for scanner in parts.scanners {
            let kind = scanner.kind();
            if scanners.insert(kind, scanner).is_some() {
                log::warn!("discovery: replacing duplicate {} scanner", kind);
            }
        }

        Self {
            config: parts.config,
            tx,
            scanners,
            forced_cleanup: parts.forced_cleanup,
            is_wireless: parts.is_wireless,
            tracker: SessionTracker::new(),
            watchdogs,
            state: DiscoveryState::Idle,
            active: None,
            recovery_timer: None,
            radio_suppressed: false,
            wired_attached: HashMap::new(),
            wireless_attached: HashSet::new(),
            last_refusal: None,
            leases: HashMap::new(),
            lease_waiters: Vec::new(),
            outbox: Vec::new(),
            status,
        }
    }

    fn run(mut self, rx: Receiver<Command>) {
        log::debug!("discovery: orchestrator started");
        while let Ok(command) = rx.recv() {
            match command {
                Command::Shutdown => break,
                Command::Barrier(reply) => {
                    let _ = reply.send(());
                }
                command => {
                    self.handle(command);
                    self.publish();
                    self.flush_answers();
                }
            }
        }
        self.shutdown();
        self.publish();
        self.flush_answers();
        log::debug!("discovery: orchestrator stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Discover { request, reply } => self.discover(request, reply),
            Command::Abort => self.abort(),
            Command::Scan {
                session,
                target,
                event,
            } => self.scan_event(session, target, event),
            Command::WatchdogFired(session) => self.watchdog_fired(session),
            Command::GraceElapsed(session) => self.grace_elapsed(session),
            Command::CleanupFinished(session) => self.cleanup_finished(session),
            Command::CooldownElapsed(session) => self.cooldown_elapsed(session),
            Command::WiredAttached(accessory) => self.wired_attached(accessory),
            Command::WiredDetached(id) => self.wired_detached(id),
            Command::MarkWiredUsed => {
                log::info!("hotplug: wired connection opened, radio suppressed");
                self.suppress_radio();
            }
            Command::ResetRadioSuppression => {
                if self.radio_suppressed {
                    log::info!("hotplug: radio suppression reset");
                }
                self.radio_suppressed = false;
            }
            Command::AcquireLease { target, reply } => self.acquire_lease(target, reply),
            Command::ReleaseLease(target) => self.release_lease(target),
            Command::AttachedAccessories(reply) => {
                let mut attached: Vec<_> = self.wired_attached.values().cloned().collect();
                attached.sort_by(|a, b| a.id.cmp(&b.id));
                let _ = reply.send(attached);
            }
            Command::Barrier(_) | Command::Shutdown => {}
        }
    }

    // -------------------------------------------------------------------------
    // Discovery
    // -------------------------------------------------------------------------

    fn discover(&mut self, request: DiscoveryRequest, reply: DiscoveryReply) {
        if let Some(reason) = self.refusal_for(request) {
            log::debug!(
                "discovery: refused {:?} in state {} ({})",
                request,
                self.state,
                reason
            );
            self.last_refusal = Some(reason);
            self.answer(reply, Err(Error::DiscoveryRefused(reason)));
            return;
        }

        log::debug!("discovery: starting {:?}", request);
        self.active = Some(ActiveDiscovery {
            request,
            reply,
            remaining: plan(request, &self.config),
            current: None,
            results: DeviceRegistry::new(),
        });
        self.advance();
    }

    fn refusal_for(&self, request: DiscoveryRequest) -> Option<RefusalReason> {
        match self.state {
            DiscoveryState::CleaningUp => return Some(RefusalReason::CleaningUp),
            DiscoveryState::SuspendedAfterWiredDisconnect => {
                return Some(RefusalReason::CoolingDown)
            }
            _ => {}
        }
        if self.active.is_some() || !self.state.is_idle() {
            return Some(RefusalReason::DiscoveryInProgress);
        }
        match request.single_target() {
            Some(ScanTarget::Bluetooth) if self.radio_suppressed => {
                Some(RefusalReason::RadioSuppressed)
            }
            Some(target) if self.is_leased(target) => Some(RefusalReason::TransportBusy),
            _ => None,
        }
    }

    /// Start the next runnable phase, or complete the discovery when none is left.
    fn advance(&mut self) {
        loop {
            let Some(active) = self.active.as_mut() else {
                return;
            };
            let Some(phase) = active.remaining.pop_front() else {
                self.complete();
                return;
            };
            if phase.only_if_empty && !active.results.is_empty() {
                log::debug!(
                    "discovery: skipping fallback {:?}, {} found already",
                    phase.targets,
                    active.results.len()
                );
                continue;
            }

            let targets = self.runnable_targets(&phase.targets);
            if targets.is_empty() {
                continue;
            }

            let session = self
                .tracker
                .next_session(SessionPurpose::Discovery(targets.clone()));
            self.state = targets[0].scanning_state();
            let watchdog = self.config.watchdog_for(self.phase_budget(&phase, &targets));
            self.watchdogs.arm(session, watchdog);
            log::debug!(
                "discovery: session {} scanning {:?} (state {})",
                session,
                targets,
                self.state
            );

            let mut pending = HashSet::new();
            for &target in &targets {
                let timeout = match target {
                    ScanTarget::Usb => None,
                    _ => phase.timeout,
                };
                let sink = ScanSink::new(session, target, self.tx.clone());
                let Some(scanner) = self.scanners.get_mut(&target) else {
                    continue;
                };
                match scanner.start(timeout, sink) {
                    Ok(()) => {
                        pending.insert(target);
                    }
                    Err(source) => {
                        let err = Error::ScanFailed {
                            transport: target,
                            source,
                        };
                        log::warn!("discovery: {}", err);
                    }
                }
            }

            if let Some(active) = self.active.as_mut() {
                active.current = Some(RunningPhase {
                    session,
                    pending,
                    found: DeviceRegistry::new(),
                });
            }
            if self.phase_done() {
                self.finish_phase();
                continue;
            }
            return;
        }
    }

    fn runnable_targets(&self, targets: &[ScanTarget]) -> Vec<ScanTarget> {
        targets
            .iter()
            .copied()
            .filter(|&target| {
                if target == ScanTarget::Bluetooth && self.radio_suppressed {
                    log::debug!("discovery: skipping Bluetooth, radio suppressed by wired link");
                    return false;
                }
                if self.is_leased(target) {
                    log::debug!("discovery: skipping {}, held by a connect attempt", target);
                    return false;
                }
                if !self.scanners.contains_key(&target) {
                    log::warn!("discovery: no {} scanner registered", target);
                    return false;
                }
                true
            })
            .collect()
    }

    fn phase_budget(&self, phase: &Phase, targets: &[ScanTarget]) -> Duration {
        targets
            .iter()
            .map(|&target| match target {
                ScanTarget::Usb => self.config.usb_timeout,
                _ => phase
                    .timeout
                    .unwrap_or_else(|| self.config.scan_timeout(target)),
            })
            .max()
            .unwrap_or(self.config.usb_timeout)
    }

    fn phase_done(&self) -> bool {
        self.active
            .as_ref()
            .and_then(|a| a.current.as_ref())
            .is_some_and(|phase| phase.pending.is_empty())
    }

    fn scan_event(&mut self, session: SessionId, target: ScanTarget, event: ScanEvent) {
        if !self.tracker.is_current(session) {
            log::debug!(
                "discovery: dropping stale {} report from session {}",
                target,
                session
            );
            return;
        }
        let Some(phase) = self.active.as_mut().and_then(|a| a.current.as_mut()) else {
            return;
        };
        if phase.session != session || !phase.pending.contains(&target) {
            return;
        }

        match event {
            ScanEvent::Found(device) => match device.into_record(target) {
                Some(record) => {
                    log::debug!("discovery: found {}", record);
                    phase.found.merge(record);
                }
                None => log::debug!("discovery: ignoring {} result without identifier", target),
            },
            ScanEvent::Finished => {
                phase.pending.remove(&target);
            }
            ScanEvent::Failed(source) => {
                phase.pending.remove(&target);
                let err = Error::ScanFailed {
                    transport: target,
                    source,
                };
                log::warn!("discovery: {}", err);
            }
        }

        if self.phase_done() {
            self.finish_phase();
            self.advance();
        }
    }

    /// Merge the running phase into the overall results and retire its session.
    fn finish_phase(&mut self) {
        let Some(phase) = self.active.as_mut().and_then(|a| a.current.take()) else {
            return;
        };
        self.watchdogs.disarm(phase.session);
        self.tracker.retire();
        log::debug!(
            "discovery: session {} finished with {} device(s)",
            phase.session,
            phase.found.len()
        );
        if let Some(active) = self.active.as_mut() {
            active.results.merge_all(phase.found);
        }
        self.state = DiscoveryState::Idle;
        self.grant_waiting_leases();
    }

    fn complete(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        self.state = DiscoveryState::Idle;
        let records = active.results.into_records();
        log::info!(
            "discovery: {:?} returned {} device(s)",
            active.request,
            records.len()
        );
        self.answer(active.reply, Ok(records));
        self.grant_waiting_leases();
    }

    /// Stop the running discovery and answer its caller with `outcome`.
    fn cancel_discovery<F>(&mut self, outcome: F)
    where
        F: FnOnce(&DeviceRegistry) -> Result<Vec<DeviceRecord>>,
    {
        self.abandon_phase();
        let Some(active) = self.active.take() else {
            return;
        };
        let result = outcome(&active.results);
        self.answer(active.reply, result);
        self.grant_waiting_leases();
    }

    /// Stop the running phase's outstanding scanners and retire its session.
    fn abandon_phase(&mut self) -> Option<RunningPhase> {
        let phase = self.active.as_mut().and_then(|a| a.current.take())?;
        self.watchdogs.disarm(phase.session);
        if self.tracker.is_current(phase.session) {
            self.tracker.retire();
        }
        for target in &phase.pending {
            if let Some(scanner) = self.scanners.get_mut(target) {
                scanner.stop();
            }
        }
        if self.state.scanning().is_some() {
            self.state = DiscoveryState::Idle;
        }
        Some(phase)
    }

    fn answer(&mut self, reply: DiscoveryReply, result: Result<Vec<DeviceRecord>>) {
        self.outbox.push((reply, result));
    }

    fn flush_answers(&mut self) {
        for (reply, result) in self.outbox.drain(..) {
            let _ = reply.send(result);
        }
    }

    fn abort(&mut self) {
        if self.active.is_some() {
            log::info!("discovery: aborted in state {}", self.state);
            self.cancel_discovery(|_| Ok(Vec::new()));
        } else if self.state.is_wired_recovery() {
            log::info!("discovery: aborted wired recovery in state {}", self.state);
            if let Some(session) = self.tracker.retire() {
                self.watchdogs.disarm(session.id);
            }
            self.recovery_timer = None;
            self.state = DiscoveryState::Idle;
        }
    }

    fn watchdog_fired(&mut self, session: SessionId) {
        self.watchdogs.fired(session);
        if !self.tracker.is_current(session) || self.state.is_idle() {
            return;
        }

        log::warn!(
            "discovery: watchdog expired for session {} in state {}",
            session,
            self.state
        );
        if self.state.is_wired_recovery() {
            self.tracker.retire();
            self.end_recovery();
            return;
        }

        let combined = self
            .active
            .as_ref()
            .is_some_and(|a| a.request.single_target().is_none());
        if !combined {
            self.cancel_discovery(|_| Err(Error::WatchdogTimeout { session }));
            return;
        }

        // A hung transport counts as zero results; the rest of the plan still runs.
        let Some(phase) = self.abandon_phase() else {
            return;
        };
        log::warn!(
            "discovery: no completion from {:?}, continuing without them",
            phase.pending
        );
        if let Some(active) = self.active.as_mut() {
            for record in phase.found.into_records() {
                if !phase.pending.contains(&record.transport().scan_target()) {
                    active.results.merge(record);
                }
            }
        }
        self.grant_waiting_leases();
        self.advance();
    }

    // -------------------------------------------------------------------------
    // Wired accessories
    // -------------------------------------------------------------------------

    fn wired_attached(&mut self, accessory: WiredAccessory) {
        if self.wired_attached.contains_key(&accessory.id)
            || self.wireless_attached.contains(&accessory.id)
        {
            log::debug!("hotplug: {} already known", accessory.id);
            return;
        }
        if (self.is_wireless)(&accessory) {
            log::debug!(
                "hotplug: {} ({}) classified as wireless, ignoring",
                accessory.id,
                accessory.name
            );
            self.wireless_attached.insert(accessory.id);
            return;
        }

        log::info!(
            "hotplug: wired accessory {} ({}) attached, radio suppressed",
            accessory.id,
            accessory.name
        );
        self.wired_attached.insert(accessory.id.clone(), accessory);
        self.suppress_radio();
    }

    /// Mark the radio suppressed and drop any Bluetooth scan still in flight.
    fn suppress_radio(&mut self) {
        self.radio_suppressed = true;

        let Some(phase) = self.active.as_mut().and_then(|a| a.current.as_mut()) else {
            return;
        };
        if !phase.pending.remove(&ScanTarget::Bluetooth) {
            return;
        }
        log::debug!(
            "discovery: cancelling Bluetooth wait in session {}",
            phase.session
        );
        if let Some(scanner) = self.scanners.get_mut(&ScanTarget::Bluetooth) {
            scanner.stop();
        }
        if self.phase_done() {
            self.finish_phase();
            self.advance();
        }
    }

    fn wired_detached(&mut self, id: String) {
        if self.wireless_attached.remove(&id) {
            log::debug!("hotplug: wireless accessory {} detached", id);
            return;
        }
        let known = self.wired_attached.remove(&id).is_some();
        if !self.radio_suppressed {
            log::debug!("hotplug: {} detached, no wired session to clean up", id);
            return;
        }
        if self.state.is_wired_recovery() {
            log::debug!("hotplug: {} detached, recovery already running", id);
            return;
        }

        log::info!(
            "hotplug: wired accessory {} detached{}, starting cleanup",
            id,
            if known { "" } else { " (unknown id)" }
        );
        self.cancel_discovery(|_| Err(Error::DiscoveryRefused(RefusalReason::CleaningUp)));

        let session = self.tracker.next_session(SessionPurpose::Cleanup);
        self.state = DiscoveryState::CleaningUp;
        // The forced cleanup itself gets one margin on top of the grace delay.
        let watchdog = self
            .config
            .watchdog_for(self.config.cleanup_grace + self.config.watchdog_margin);
        self.watchdogs.arm(session, watchdog);
        let tx = self.tx.clone();
        self.recovery_timer = Some(Deadline::start(self.config.cleanup_grace, move || {
            let _ = tx.send(Command::GraceElapsed(session));
        }));
    }

    fn grace_elapsed(&mut self, session: SessionId) {
        if !self.tracker.is_current(session) || self.state != DiscoveryState::CleaningUp {
            return;
        }
        self.recovery_timer = None;
        log::debug!("hotplug: running forced cleanup for session {}", session);

        let cleanup = Arc::clone(&self.forced_cleanup);
        let tx = self.tx.clone();
        thread::spawn(move || {
            if let Err(e) = cleanup.force_cleanup() {
                log::warn!("hotplug: forced cleanup failed: {}", e);
            }
            let _ = tx.send(Command::CleanupFinished(session));
        });
    }

    fn cleanup_finished(&mut self, session: SessionId) {
        if !self.tracker.is_current(session) || self.state != DiscoveryState::CleaningUp {
            log::debug!("hotplug: dropping stale cleanup completion {}", session);
            return;
        }
        self.watchdogs.disarm(session);
        self.tracker.retire();

        let cooldown = self.tracker.next_session(SessionPurpose::Cooldown);
        self.state = DiscoveryState::SuspendedAfterWiredDisconnect;
        let watchdog = self.config.watchdog_for(self.config.cooldown);
        self.watchdogs.arm(cooldown, watchdog);
        let tx = self.tx.clone();
        self.recovery_timer = Some(Deadline::start(self.config.cooldown, move || {
            let _ = tx.send(Command::CooldownElapsed(cooldown));
        }));
        log::debug!("hotplug: cooling down under session {}", cooldown);
    }

    fn cooldown_elapsed(&mut self, session: SessionId) {
        if !self.tracker.is_current(session)
            || self.state != DiscoveryState::SuspendedAfterWiredDisconnect
        {
            return;
        }
        self.watchdogs.disarm(session);
        self.tracker.retire();
        self.end_recovery();
    }

    /// Leave wired recovery. Discovery is not resumed; the next request must be explicit.
    fn end_recovery(&mut self) {
        self.recovery_timer = None;
        self.state = DiscoveryState::Idle;
        if self.wired_attached.is_empty() {
            self.radio_suppressed = false;
            log::info!("hotplug: recovery finished, radio available");
        } else {
            log::info!("hotplug: recovery finished, wired accessory still attached");
        }
        self.grant_waiting_leases();
    }

    // -------------------------------------------------------------------------
    // Transport leases
    // -------------------------------------------------------------------------

    fn is_leased(&self, target: ScanTarget) -> bool {
        self.leases.get(&target).is_some_and(|&n| n > 0)
    }

    fn is_scanning(&self, target: ScanTarget) -> bool {
        self.active
            .as_ref()
            .and_then(|a| a.current.as_ref())
            .is_some_and(|phase| phase.pending.contains(&target))
    }

    fn acquire_lease(&mut self, target: ScanTarget, reply: Sender<TransportLease>) {
        if self.is_scanning(target) {
            log::debug!("connection: waiting for {} scan to finish", target);
            self.lease_waiters.push((target, reply));
            return;
        }
        self.grant_lease(target, reply);
    }

    fn grant_lease(&mut self, target: ScanTarget, reply: Sender<TransportLease>) {
        *self.leases.entry(target).or_insert(0) += 1;
        let lease = TransportLease {
            target,
            tx: self.tx.clone(),
        };
        // A refused send drops the lease, which queues its own release.
        let _ = reply.send(lease);
    }

    fn release_lease(&mut self, target: ScanTarget) {
        if let Some(count) = self.leases.get_mut(&target) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.leases.remove(&target);
            }
        }
    }

    fn grant_waiting_leases(&mut self) {
        let waiters = std::mem::take(&mut self.lease_waiters);
        for (target, reply) in waiters {
            if self.is_scanning(target) {
                self.lease_waiters.push((target, reply));
            } else {
                self.grant_lease(target, reply);
            }
        }
    }

    // -------------------------------------------------------------------------
    // Snapshot
    // -------------------------------------------------------------------------

    fn publish(&self) {
        let pending_work_queued = self
            .active
            .as_ref()
            .is_some_and(|a| !a.remaining.is_empty())
            || self.recovery_timer.is_some()
            || !self.lease_waiters.is_empty();

        let session_id = self
            .tracker
            .current()
            .map(|s| s.id)
            .unwrap_or_else(|| self.tracker.last_issued());

        let snapshot = DiscoveryStatus {
            state: self.state,
            session_id: session_id.get(),
            radio_suppressed: self.radio_suppressed,
            pending_work_queued,
            last_refusal: self.last_refusal,
        };
        match self.status.lock() {
            Ok(mut status) => *status = snapshot,
            Err(poisoned) => *poisoned.into_inner() = snapshot,
        }
    }

    fn shutdown(&mut self) {
        self.cancel_discovery(|_| Err(Error::Stopped));
        self.recovery_timer = None;
        self.watchdogs.clear();
        self.lease_waiters.clear();
        for scanner in self.scanners.values_mut() {
            scanner.stop();
        }
    }
}
