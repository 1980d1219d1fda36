//! The public coordinator handle.
//!
//! [`PrinterCoordinator`] owns the orchestration worker and the connection
//! worker and turns blocking method calls into messages for them. It is
//! `Send + Sync`, so one instance can serve callers on many threads.

use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::config::CoordinatorConfig;
use crate::connection::{self, ConnectionCommand, Connector};
use crate::discovery::{self, Command, DiscoveryRequest, OrchestratorParts};
use crate::error::{Error, Result};
use crate::hotplug::{self, HotplugSink, UsbDiagnostics, WiredAccessory, WirelessPredicate};
use crate::scanner::{
    BondedDevices, ForcedCleanup, NoBondedDevices, NoopCleanup, TransportScanner,
};
use crate::types::{DeviceRecord, DiscoveryStatus, PrinterStatus, ScanTarget, Target};

// =============================================================================
// Builder
// =============================================================================

/// Assembles a [`PrinterCoordinator`] from its collaborators.
///
/// # Example
///
/// ```no_run
/// use printer_link::{CoordinatorBuilder, CoordinatorConfig, EnumerationScanner, FoundDevice, ScanError};
/// use std::time::Duration;
///
/// let coordinator = CoordinatorBuilder::new()
///     .config(CoordinatorConfig::default().with_cooldown(Duration::from_secs(5)))
///     .scanner(EnumerationScanner::usb(|| -> Result<Vec<FoundDevice>, ScanError> {
///         Ok(vec![FoundDevice::new("USB:").with_name("TM-T20III")])
///     }))
///     .build()
///     .unwrap();
///
/// for device in coordinator.discover_usb() {
///     println!("{}", device.composite());
/// }
/// ```
pub struct CoordinatorBuilder {
    config: CoordinatorConfig,
    scanners: Vec<Box<dyn TransportScanner>>,
    connectors: Vec<Arc<dyn Connector>>,
    forced_cleanup: Arc<dyn ForcedCleanup>,
    is_wireless: Arc<WirelessPredicate>,
    bonded: Arc<dyn BondedDevices>,
}

impl Default for CoordinatorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CoordinatorBuilder {
    pub fn new() -> Self {
        Self {
            config: CoordinatorConfig::default(),
            scanners: Vec::new(),
            connectors: Vec::new(),
            forced_cleanup: Arc::new(NoopCleanup),
            is_wireless: hotplug::default_predicate(),
            bonded: Arc::new(NoBondedDevices),
        }
    }

    pub fn config(mut self, config: CoordinatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Register a scanner. A later scanner of the same kind replaces an earlier one.
    pub fn scanner<S: TransportScanner + 'static>(mut self, scanner: S) -> Self {
        self.scanners.push(Box::new(scanner));
        self
    }

    /// Register a connector. The first one supporting a transport is used for it.
    pub fn connector<C: Connector>(mut self, connector: C) -> Self {
        self.connectors.push(Arc::new(connector));
        self
    }

    /// Set the hook run after a wired accessory is unplugged.
    pub fn forced_cleanup<F: ForcedCleanup>(mut self, cleanup: F) -> Self {
        self.forced_cleanup = Arc::new(cleanup);
        self
    }

    /// Replace the name-based wireless accessory classifier.
    pub fn wireless_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&WiredAccessory) -> bool + Send + Sync + 'static,
    {
        self.is_wireless = Arc::new(predicate);
        self
    }

    /// Set where pairing looks when its scan finds nothing.
    pub fn bonded_devices<B: BondedDevices>(mut self, bonded: B) -> Self {
        self.bonded = Arc::new(bonded);
        self
    }

    /// Validate the configuration and start the workers.
    pub fn build(self) -> Result<PrinterCoordinator> {
        self.config.validate()?;

        let status = Arc::new(Mutex::new(DiscoveryStatus::default()));
        let connected = Arc::new(Mutex::new(None));

        let (orchestrator_tx, orchestrator_rx) = mpsc::channel();
        let orchestrator = discovery::spawn(
            OrchestratorParts {
                config: self.config.clone(),
                scanners: self.scanners,
                forced_cleanup: self.forced_cleanup,
                is_wireless: self.is_wireless,
            },
            orchestrator_tx.clone(),
            orchestrator_rx,
            Arc::clone(&status),
        );

        let (connection_tx, connection_rx) = mpsc::channel();
        let connection = connection::spawn(
            self.connectors,
            orchestrator_tx.clone(),
            Arc::clone(&status),
            Arc::clone(&connected),
            connection_rx,
        );

        Ok(PrinterCoordinator {
            config: self.config,
            bonded: self.bonded,
            orchestrator: orchestrator_tx,
            connection: connection_tx,
            status,
            connected,
            threads: vec![connection, orchestrator],
        })
    }
}

// =============================================================================
// Coordinator
// =============================================================================

/// Discovery and connection coordinator for receipt printers.
///
/// Discovery calls block until their scan completes, is refused, or is reset
/// by its watchdog; they never fail, answering with an empty list instead.
/// Use [`try_discover`](Self::try_discover) to see why a list came back empty.
pub struct PrinterCoordinator {
    config: CoordinatorConfig,
    bonded: Arc<dyn BondedDevices>,
    orchestrator: Sender<Command>,
    connection: Sender<ConnectionCommand>,
    status: Arc<Mutex<DiscoveryStatus>>,
    connected: Arc<Mutex<Option<DeviceRecord>>>,
    threads: Vec<JoinHandle<()>>,
}

impl PrinterCoordinator {
    pub fn builder() -> CoordinatorBuilder {
        CoordinatorBuilder::new()
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    // -------------------------------------------------------------------------
    // Discovery
    // -------------------------------------------------------------------------

    /// Run a discovery and report why it produced nothing, if it did.
    pub fn try_discover(&self, request: DiscoveryRequest) -> Result<Vec<DeviceRecord>> {
        let (reply, rx) = mpsc::channel();
        self.orchestrator
            .send(Command::Discover { request, reply })
            .map_err(|_| Error::Stopped)?;
        rx.recv().map_err(|_| Error::Stopped)?
    }

    fn discover(&self, request: DiscoveryRequest) -> Vec<DeviceRecord> {
        match self.try_discover(request) {
            Ok(records) => records,
            Err(e) if e.is_discovery_soft_failure() => {
                log::debug!("discovery: {:?} answered empty: {}", request, e);
                Vec::new()
            }
            Err(e) => {
                log::warn!("discovery: {:?} failed: {}", request, e);
                Vec::new()
            }
        }
    }

    /// Scan the local network.
    pub fn discover_lan(&self, timeout: Duration) -> Vec<DeviceRecord> {
        self.discover(DiscoveryRequest::Lan(timeout))
    }

    /// Scan for Bluetooth printers. Empty while a wired link suppresses the radio.
    pub fn discover_bluetooth(&self, timeout: Duration) -> Vec<DeviceRecord> {
        self.discover(DiscoveryRequest::Bluetooth(timeout))
    }

    /// Enumerate attached USB printers.
    pub fn discover_usb(&self) -> Vec<DeviceRecord> {
        self.discover(DiscoveryRequest::Usb)
    }

    /// Scan every transport and merge the results.
    pub fn discover_all(&self, timeout: Duration) -> Vec<DeviceRecord> {
        self.discover(DiscoveryRequest::All(timeout))
    }

    /// Force the state machine back to idle.
    ///
    /// Advisory: a vendor scan already running is not preempted, but its
    /// eventual report is ignored. A no-op when idle.
    pub fn abort(&self) {
        self.post_and_sync(Command::Abort);
    }

    /// Snapshot of the discovery state machine.
    pub fn state(&self) -> DiscoveryStatus {
        self.status
            .lock()
            .map(|s| s.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    /// Pick a Bluetooth printer to connect to.
    ///
    /// Runs a short Bluetooth scan and answers the first Bluetooth printer's
    /// target (`BT:<address>`), falling back to the bonded device list when
    /// the scan finds nothing. `Ok(None)` means neither had a printer.
    /// Refusals are returned as errors, so nothing is picked while a wired
    /// link suppresses the radio.
    pub fn pair_bluetooth(&self) -> Result<Option<Target>> {
        let request = DiscoveryRequest::Bluetooth(self.config.pair_timeout);
        let scanned = match self.try_discover(request) {
            Ok(records) => records,
            Err(Error::WatchdogTimeout { session }) => {
                log::warn!("pairing: scan reset by watchdog (session {})", session);
                Vec::new()
            }
            Err(e) => return Err(e),
        };
        if let Some(target) = first_bluetooth_target(scanned) {
            log::info!("pairing: picked {} from scan", target);
            return Ok(Some(target));
        }

        let bonded = match self.bonded.bonded() {
            Ok(devices) => devices,
            Err(e) => {
                log::warn!("pairing: bonded device list unavailable: {}", e);
                Vec::new()
            }
        };
        let target = first_bluetooth_target(
            bonded
                .into_iter()
                .filter_map(|device| device.into_record(ScanTarget::Bluetooth)),
        );
        match &target {
            Some(target) => log::info!("pairing: picked {} from bonded devices", target),
            None => log::info!("pairing: no Bluetooth printer found"),
        }
        Ok(target)
    }

    /// Wired accessories currently attached, ordered by id.
    pub fn attached_accessories(&self) -> Vec<WiredAccessory> {
        let (reply, rx) = mpsc::channel();
        if self
            .orchestrator
            .send(Command::AttachedAccessories(reply))
            .is_err()
        {
            return Vec::new();
        }
        rx.recv().unwrap_or_default()
    }

    /// Report attached wired accessories and run a USB-only discovery pass.
    ///
    /// A failing USB scanner shows up as an empty `discovered` list, as it does
    /// for [`discover_usb`](Self::discover_usb); `discovery_error` is set only
    /// when the pass was refused or reset.
    pub fn usb_diagnostics(&self) -> UsbDiagnostics {
        let attached = self.attached_accessories();
        let vendor_matches = attached
            .iter()
            .filter(|a| a.vendor_id.is_some_and(|id| self.config.is_printer_vendor(id)))
            .count();
        let (discovered, discovery_error) = match self.try_discover(DiscoveryRequest::Usb) {
            Ok(records) => (records, None),
            Err(e) => (Vec::new(), Some(e.to_string())),
        };
        log::debug!(
            "diagnostics: {} wired accessory(ies), {} vendor match(es), {} USB printer(s)",
            attached.len(),
            vendor_matches,
            discovered.len()
        );
        UsbDiagnostics {
            attached,
            vendor_matches,
            discovered,
            discovery_error,
        }
    }

    /// Clear the radio suppression left by a wired connection.
    pub fn reset_radio_suppression(&self) {
        self.post_and_sync(Command::ResetRadioSuppression);
    }

    // -------------------------------------------------------------------------
    // Hotplug
    // -------------------------------------------------------------------------

    /// Handle for platform code that reports attach/detach asynchronously.
    pub fn hotplug_sink(&self) -> HotplugSink {
        HotplugSink::new(self.orchestrator.clone())
    }

    /// Report a wired accessory attach and wait until it has been applied.
    pub fn wired_attached(&self, accessory: WiredAccessory) {
        self.post_and_sync(Command::WiredAttached(accessory));
    }

    /// Report a wired accessory detach and wait until it has been applied.
    pub fn wired_detached(&self, id: impl Into<String>) {
        self.post_and_sync(Command::WiredDetached(id.into()));
    }

    fn post_and_sync(&self, command: Command) {
        if self.orchestrator.send(command).is_err() {
            return;
        }
        let (reply, rx) = mpsc::channel();
        if self.orchestrator.send(Command::Barrier(reply)).is_ok() {
            let _ = rx.recv();
        }
    }

    // -------------------------------------------------------------------------
    // Connection
    // -------------------------------------------------------------------------

    /// Connect to a printer, closing any current connection first.
    ///
    /// `identifier` is either a prefixed target (`"TCP:10.0.0.5"`) or a bare
    /// identifier resolved with `transport_hint`. Without a `timeout` the
    /// configured default for the transport applies.
    pub fn connect(
        &self,
        identifier: &str,
        transport_hint: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let target = Target::parse(identifier, transport_hint)?;
        let timeout = timeout.unwrap_or_else(|| self.config.connect_timeout_for(target.transport));
        self.request(|reply| ConnectionCommand::Connect {
            target,
            timeout,
            reply,
        })?
    }

    /// Close the current connection. Idempotent.
    pub fn disconnect(&self) {
        let _ = self.request(|reply| ConnectionCommand::Disconnect { reply });
    }

    pub fn is_connected(&self) -> bool {
        self.connected_device().is_some()
    }

    /// The device of the open connection, if any.
    pub fn connected_device(&self) -> Option<DeviceRecord> {
        self.connected
            .lock()
            .map(|c| c.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    /// Send one opaque command buffer.
    pub fn send(&self, buffer: &[u8]) -> Result<()> {
        self.send_all(vec![buffer.to_vec()])
    }

    /// Send command buffers in order, stopping at the first failure.
    pub fn send_all(&self, buffers: Vec<Vec<u8>>) -> Result<()> {
        self.request(|reply| ConnectionCommand::Send { buffers, reply })?
    }

    /// Query the connected printer's status.
    pub fn status(&self) -> Result<PrinterStatus> {
        self.request(|reply| ConnectionCommand::Status { reply })?
    }

    /// Pulse the cash drawer of the connected printer.
    pub fn open_cash_drawer(&self) -> Result<()> {
        self.request(|reply| ConnectionCommand::OpenDrawer { reply })?
    }

    fn request<T>(&self, command: impl FnOnce(Sender<T>) -> ConnectionCommand) -> Result<T> {
        let (reply, rx) = mpsc::channel();
        self.connection
            .send(command(reply))
            .map_err(|_| Error::Stopped)?;
        rx.recv().map_err(|_| Error::Stopped)
    }
}

fn first_bluetooth_target(records: impl IntoIterator<Item = DeviceRecord>) -> Option<Target> {
    records
        .into_iter()
        .find(|record| record.transport().scan_target() == ScanTarget::Bluetooth)
        .map(|record| Target::new(record.transport(), record.identifier()))
}

impl Drop for PrinterCoordinator {
    fn drop(&mut self) {
        let _ = self.connection.send(ConnectionCommand::Shutdown);
        let _ = self.orchestrator.send(Command::Shutdown);
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::{EnumerationScanner, FoundDevice};
    use crate::error::ScanError;
    use crate::types::{DiscoveryState, RefusalReason};

    fn usb_coordinator() -> PrinterCoordinator {
        CoordinatorBuilder::new()
            .scanner(EnumerationScanner::usb(
                || -> std::result::Result<Vec<FoundDevice>, ScanError> {
                    Ok(vec![FoundDevice::new("").with_name("TM-T20III")])
                },
            ))
            .build()
            .unwrap()
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let result = CoordinatorBuilder::new()
            .config(CoordinatorConfig::default().with_watchdog_margin(Duration::from_millis(10)))
            .build();
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_usb_discovery_end_to_end() {
        let coordinator = usb_coordinator();
        let devices = coordinator.discover_usb();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].composite(), "USB::TM-T20III");
        assert_eq!(coordinator.state().state, DiscoveryState::Idle);
        assert_eq!(coordinator.state().session_id, 1);
    }

    #[test]
    fn test_missing_scanner_yields_empty() {
        let coordinator = usb_coordinator();
        assert!(coordinator.discover_lan(Duration::from_millis(100)).is_empty());
    }

    #[test]
    fn test_wired_attach_is_applied_before_return() {
        let coordinator = usb_coordinator();
        coordinator.wired_attached(WiredAccessory::new("usb-1", "TM-T88VII"));
        assert!(coordinator.state().radio_suppressed);

        let result = coordinator.try_discover(DiscoveryRequest::Bluetooth(Duration::from_secs(1)));
        assert!(matches!(
            result,
            Err(Error::DiscoveryRefused(RefusalReason::RadioSuppressed))
        ));
        assert_eq!(
            coordinator.state().last_refusal,
            Some(RefusalReason::RadioSuppressed)
        );

        coordinator.reset_radio_suppression();
        assert!(!coordinator.state().radio_suppressed);
    }

    #[test]
    fn test_connection_calls_without_connection() {
        let coordinator = usb_coordinator();
        assert!(!coordinator.is_connected());
        assert!(matches!(coordinator.send(b"x"), Err(Error::NotConnected)));
        assert!(matches!(coordinator.status(), Err(Error::NotConnected)));
        assert!(matches!(
            coordinator.open_cash_drawer(),
            Err(Error::NotConnected)
        ));
        coordinator.disconnect();
    }

    #[test]
    fn test_connect_validates_arguments_first() {
        let coordinator = usb_coordinator();
        let err = coordinator.connect("10.0.0.5", None, None).unwrap_err();
        assert_eq!(err.code(), "INVALID_ARGUMENTS");

        let err = coordinator
            .connect("TCP:10.0.0.5", None, Some(Duration::from_millis(100)))
            .unwrap_err();
        assert_eq!(err.code(), "CONNECTION_FAILED");
    }
}
