//! Transport scanner seam.
//!
//! A scanner wraps one vendor discovery API. It is started on the
//! orchestration worker and reports back through a [`ScanSink`] from whatever
//! thread the vendor layer calls it on. Each report is tagged with the session
//! the scan was started for, so reports from superseded scans are dropped.

use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::discovery::Command;
use crate::error::{LinkError, ScanError};
use crate::session::SessionId;
use crate::types::{DeviceRecord, ScanTarget, Transport};

// =============================================================================
// Found devices
// =============================================================================

/// A device as reported by a scanner, before normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoundDevice {
    /// Target string, either prefixed (`"TCPS:AA:BB:..."`) or a bare identifier.
    pub target: String,
    pub display_name: Option<String>,
    /// Hardware address reported alongside the target, if the vendor API has one.
    pub mac_address: Option<String>,
}

impl FoundDevice {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            display_name: None,
            mac_address: None,
        }
    }

    /// Set the display name (builder pattern).
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Set the hardware address (builder pattern).
    pub fn with_mac_address(mut self, mac: impl Into<String>) -> Self {
        self.mac_address = Some(mac.into());
        self
    }

    /// Normalize into a [`DeviceRecord`].
    ///
    /// A known prefix on the target selects the transport; otherwise the
    /// scanner's default transport applies. Returns `None` for an empty
    /// identifier on anything but USB.
    pub fn into_record(self, scanned_by: ScanTarget) -> Option<DeviceRecord> {
        let raw = self.target.trim();
        let (transport, identifier) = match raw.split_once(':') {
            Some((prefix, rest)) => match Transport::from_prefix(prefix) {
                Some(transport) => (transport, rest.trim()),
                None => (scanned_by.default_transport(), raw),
            },
            None => (scanned_by.default_transport(), raw),
        };

        if identifier.is_empty() && transport != Transport::Usb {
            return None;
        }

        let display_name = self
            .display_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| transport.scan_target().default_device_name());

        Some(match self.mac_address.as_deref() {
            Some(mac) => {
                DeviceRecord::with_hardware_address(transport, identifier, display_name, mac)
            }
            None => DeviceRecord::new(transport, identifier, display_name),
        })
    }
}

// =============================================================================
// Scan sink
// =============================================================================

/// What a scanner reported.
#[derive(Debug)]
pub(crate) enum ScanEvent {
    Found(FoundDevice),
    Finished,
    Failed(ScanError),
}

/// Callback handle a scanner reports through.
///
/// Cheap to clone and safe to use from any thread. Once the scan's session is
/// no longer current every report is ignored, so a scanner never needs to
/// know whether it was superseded.
#[derive(Debug, Clone)]
pub struct ScanSink {
    session: SessionId,
    target: ScanTarget,
    tx: Sender<Command>,
}

impl ScanSink {
    pub(crate) fn new(session: SessionId, target: ScanTarget, tx: Sender<Command>) -> Self {
        Self {
            session,
            target,
            tx,
        }
    }

    /// Session this scan was started for.
    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Scanner kind this sink belongs to.
    pub fn target(&self) -> ScanTarget {
        self.target
    }

    /// Report a discovered device.
    pub fn found(&self, device: FoundDevice) {
        self.post(ScanEvent::Found(device));
    }

    /// Signal that the scan completed. Only the first completion counts.
    pub fn finish(&self) {
        self.post(ScanEvent::Finished);
    }

    /// Signal that the scan failed. Counts as completion with the results so far.
    pub fn fail(&self, error: ScanError) {
        self.post(ScanEvent::Failed(error));
    }

    fn post(&self, event: ScanEvent) {
        // The orchestrator may already be gone during shutdown.
        let _ = self.tx.send(Command::Scan {
            session: self.session,
            target: self.target,
            event,
        });
    }
}

// =============================================================================
// Scanner traits
// =============================================================================

/// One vendor discovery API for one transport kind.
///
/// `start` must not block for the length of the scan: it kicks the scan off
/// and returns, reporting results later through the sink. `timeout` is `None`
/// for synchronous enumeration that has no timeout of its own.
pub trait TransportScanner: Send {
    /// Which transport this scanner discovers.
    fn kind(&self) -> ScanTarget;

    /// Begin scanning.
    fn start(&mut self, timeout: Option<Duration>, sink: ScanSink) -> Result<(), ScanError>;

    /// Stop an in-flight scan. Advisory; the scanner may still report later.
    fn stop(&mut self) {}
}

/// A blocking hardware enumeration, such as listing attached USB printers.
pub trait DeviceEnumerator: Send + 'static {
    fn enumerate(&mut self) -> Result<Vec<FoundDevice>, ScanError>;
}

impl<F> DeviceEnumerator for F
where
    F: FnMut() -> Result<Vec<FoundDevice>, ScanError> + Send + 'static,
{
    fn enumerate(&mut self) -> Result<Vec<FoundDevice>, ScanError> {
        self()
    }
}

/// Adapts a [`DeviceEnumerator`] into a [`TransportScanner`].
///
/// The enumeration runs on a helper thread so the orchestration worker stays
/// responsive while it blocks.
pub struct EnumerationScanner<E> {
    kind: ScanTarget,
    enumerator: Arc<Mutex<E>>,
}

impl<E: DeviceEnumerator> EnumerationScanner<E> {
    pub fn new(kind: ScanTarget, enumerator: E) -> Self {
        Self {
            kind,
            enumerator: Arc::new(Mutex::new(enumerator)),
        }
    }

    /// A USB scanner backed by `enumerator`.
    pub fn usb(enumerator: E) -> Self {
        Self::new(ScanTarget::Usb, enumerator)
    }
}

impl<E: DeviceEnumerator> TransportScanner for EnumerationScanner<E> {
    fn kind(&self) -> ScanTarget {
        self.kind
    }

    fn start(&mut self, _timeout: Option<Duration>, sink: ScanSink) -> Result<(), ScanError> {
        let enumerator = Arc::clone(&self.enumerator);
        thread::spawn(move || {
            let result = match enumerator.lock() {
                Ok(mut enumerator) => enumerator.enumerate(),
                Err(poisoned) => poisoned.into_inner().enumerate(),
            };
            match result {
                Ok(devices) => {
                    for device in devices {
                        sink.found(device);
                    }
                    sink.finish();
                }
                Err(e) => sink.fail(e),
            }
        });
        Ok(())
    }
}

/// Lists the Bluetooth printers the host is already bonded with.
///
/// Pairing falls back to this when a short scan finds nothing.
pub trait BondedDevices: Send + Sync + 'static {
    fn bonded(&self) -> Result<Vec<FoundDevice>, ScanError>;
}

impl<F> BondedDevices for F
where
    F: Fn() -> Result<Vec<FoundDevice>, ScanError> + Send + Sync + 'static,
{
    fn bonded(&self) -> Result<Vec<FoundDevice>, ScanError> {
        self()
    }
}

/// Host without a bonded device list.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBondedDevices;

impl BondedDevices for NoBondedDevices {
    fn bonded(&self) -> Result<Vec<FoundDevice>, ScanError> {
        Ok(Vec::new())
    }
}

/// Releases transport resources after a wired accessory is unplugged.
///
/// Vendor SDKs keep stale handles to a detached USB printer; this is the hook
/// that forces them closed before discovery is allowed again. Runs on a helper
/// thread, never on the orchestration worker.
pub trait ForcedCleanup: Send + Sync + 'static {
    fn force_cleanup(&self) -> Result<(), LinkError>;
}

/// Cleanup that has nothing to release.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCleanup;

impl ForcedCleanup for NoopCleanup {
    fn force_cleanup(&self) -> Result<(), LinkError> {
        Ok(())
    }
}
