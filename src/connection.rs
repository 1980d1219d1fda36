//! Connection manager.
//!
//! Owns at most one open [`PrinterLink`] and serializes every operation on it
//! through a dedicated connection worker thread, so a slow connect never
//! blocks discovery. Before opening a transport the worker takes a transport
//! lease from the orchestrator, which keeps scans and connect attempts on the
//! same transport from overlapping.

use std::fmt;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::discovery::{Command, TransportLease};
use crate::error::{Error, LinkError, Result};
use crate::types::{DeviceRecord, DiscoveryStatus, PrinterStatus, Target, Transport};

// =============================================================================
// Link traits
// =============================================================================

/// Cash drawer connector pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawerPin {
    Pin2,
    Pin5,
}

impl DrawerPin {
    fn selector(&self) -> u8 {
        match self {
            DrawerPin::Pin2 => 0,
            DrawerPin::Pin5 => 1,
        }
    }
}

/// Build the ESC/POS drawer kick (`ESC p m t1 t2`) for a pulse length.
///
/// Pulse timing is encoded in 2 ms units and saturates at 510 ms.
pub fn drawer_kick_command(pin: DrawerPin, pulse: Duration) -> [u8; 5] {
    let units = (pulse.as_millis() / 2).min(u8::MAX as u128) as u8;
    [0x1B, 0x70, pin.selector(), units, units]
}

/// Drawer kicks to try in order until one is accepted.
const DRAWER_ATTEMPTS: [(DrawerPin, Duration); 4] = [
    (DrawerPin::Pin2, Duration::from_millis(100)),
    (DrawerPin::Pin2, Duration::from_millis(200)),
    (DrawerPin::Pin5, Duration::from_millis(100)),
    (DrawerPin::Pin5, Duration::from_millis(200)),
];

/// An open channel to a printer.
pub trait PrinterLink: Send {
    /// Write one opaque command buffer.
    fn write(&mut self, data: &[u8]) -> std::result::Result<(), LinkError>;

    /// Query printer status. Links without a status channel report online.
    fn status(&mut self) -> std::result::Result<PrinterStatus, LinkError> {
        Ok(PrinterStatus::online())
    }

    /// Pulse the cash drawer. Defaults to the raw ESC/POS command.
    fn kick_drawer(
        &mut self,
        pin: DrawerPin,
        pulse: Duration,
    ) -> std::result::Result<(), LinkError> {
        self.write(&drawer_kick_command(pin, pulse))
    }

    /// Close the channel.
    fn close(&mut self) -> std::result::Result<(), LinkError> {
        Ok(())
    }
}

/// Opens links for one or more transports.
///
/// `open` may block up to `timeout`; it always runs on a helper thread, and a
/// link that arrives after the caller gave up is closed.
pub trait Connector: Send + Sync + 'static {
    /// Whether this connector can open `transport`.
    fn supports(&self, transport: Transport) -> bool {
        let _ = transport;
        true
    }

    fn open(
        &self,
        target: &Target,
        timeout: Duration,
    ) -> std::result::Result<Box<dyn PrinterLink>, LinkError>;
}

// =============================================================================
// Connection handle
// =============================================================================

/// The currently open connection.
pub struct ConnectionHandle {
    pub device: DeviceRecord,
    pub opened_at: Instant,
    link: Box<dyn PrinterLink>,
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("device", &self.device)
            .field("opened_at", &self.opened_at)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Worker
// =============================================================================

pub(crate) enum ConnectionCommand {
    Connect {
        target: Target,
        timeout: Duration,
        reply: Sender<Result<()>>,
    },
    Disconnect {
        reply: Sender<()>,
    },
    Send {
        buffers: Vec<Vec<u8>>,
        reply: Sender<Result<()>>,
    },
    Status {
        reply: Sender<Result<PrinterStatus>>,
    },
    OpenDrawer {
        reply: Sender<Result<()>>,
    },
    Shutdown,
}

pub(crate) struct ConnectionManager {
    connectors: Vec<Arc<dyn Connector>>,
    orchestrator: Sender<Command>,
    discovery_status: Arc<Mutex<DiscoveryStatus>>,
    connected: Arc<Mutex<Option<DeviceRecord>>>,
    handle: Option<ConnectionHandle>,
}

/// Start the connection worker thread.
pub(crate) fn spawn(
    connectors: Vec<Arc<dyn Connector>>,
    orchestrator: Sender<Command>,
    discovery_status: Arc<Mutex<DiscoveryStatus>>,
    connected: Arc<Mutex<Option<DeviceRecord>>>,
    rx: Receiver<ConnectionCommand>,
) -> JoinHandle<()> {
    let manager = ConnectionManager {
        connectors,
        orchestrator,
        discovery_status,
        connected,
        handle: None,
    };
    thread::spawn(move || manager.run(rx))
}

impl ConnectionManager {
    fn run(mut self, rx: Receiver<ConnectionCommand>) {
        while let Ok(command) = rx.recv() {
            match command {
                ConnectionCommand::Connect {
                    target,
                    timeout,
                    reply,
                } => {
                    let _ = reply.send(self.connect(target, timeout));
                }
                ConnectionCommand::Disconnect { reply } => {
                    self.disconnect();
                    let _ = reply.send(());
                }
                ConnectionCommand::Send { buffers, reply } => {
                    let _ = reply.send(self.send(&buffers));
                }
                ConnectionCommand::Status { reply } => {
                    let _ = reply.send(self.status());
                }
                ConnectionCommand::OpenDrawer { reply } => {
                    let _ = reply.send(self.open_drawer());
                }
                ConnectionCommand::Shutdown => break,
            }
        }
        self.disconnect();
    }

    fn radio_suppressed(&self) -> bool {
        self.discovery_status
            .lock()
            .map(|s| s.radio_suppressed)
            .unwrap_or_else(|poisoned| poisoned.into_inner().radio_suppressed)
    }

    fn set_connected(&self, device: Option<DeviceRecord>) {
        match self.connected.lock() {
            Ok(mut connected) => *connected = device,
            Err(poisoned) => *poisoned.into_inner() = device,
        }
    }

    fn connect(&mut self, target: Target, timeout: Duration) -> Result<()> {
        // Connecting to a new device implicitly closes the old one, even when
        // the new attempt is turned away.
        self.disconnect();

        if target.transport.is_wireless() && self.radio_suppressed() {
            return Err(Error::connection_failed(
                "Bluetooth is disabled while a wired connection is in use; unplug USB to use Bluetooth",
            ));
        }

        let connector = self
            .connectors
            .iter()
            .find(|c| c.supports(target.transport))
            .cloned()
            .ok_or_else(|| {
                Error::connection_failed(format!("no connector for {}", target.transport))
            })?;

        let deadline = Instant::now() + timeout;
        let lease = self.acquire_lease(&target, timeout)?;
        log::debug!("connection: holding {} lease", lease.target());
        let remaining = deadline.saturating_duration_since(Instant::now());
        log::info!("connection: opening {} ({:?})", target, remaining);

        let link = open_with_timeout(connector, target.clone(), remaining)?;
        drop(lease);

        let device = DeviceRecord::new(
            target.transport,
            target.identifier.clone(),
            target.transport.scan_target().default_device_name(),
        );
        self.set_connected(Some(device.clone()));
        self.handle = Some(ConnectionHandle {
            device,
            opened_at: Instant::now(),
            link,
        });
        log::info!("connection: connected to {}", target);

        if target.transport == Transport::Usb {
            let _ = self.orchestrator.send(Command::MarkWiredUsed);
        }
        Ok(())
    }

    fn acquire_lease(&self, target: &Target, timeout: Duration) -> Result<TransportLease> {
        let (reply, rx) = mpsc::channel();
        self.orchestrator
            .send(Command::AcquireLease {
                target: target.transport.scan_target(),
                reply,
            })
            .map_err(|_| Error::Stopped)?;

        match rx.recv_timeout(timeout) {
            Ok(lease) => Ok(lease),
            Err(RecvTimeoutError::Timeout) => Err(Error::connection_failed(format!(
                "{} is busy scanning",
                target.transport.scan_target()
            ))),
            Err(RecvTimeoutError::Disconnected) => Err(Error::Stopped),
        }
    }

    fn disconnect(&mut self) {
        let Some(mut handle) = self.handle.take() else {
            return;
        };
        self.set_connected(None);
        if let Err(e) = handle.link.close() {
            log::warn!("connection: error closing {}: {}", handle.device.target(), e);
        }
        log::info!(
            "connection: disconnected from {} after {:?}",
            handle.device.target(),
            handle.opened_at.elapsed()
        );
    }

    fn link(&mut self) -> Result<&mut Box<dyn PrinterLink>> {
        self.handle
            .as_mut()
            .map(|h| &mut h.link)
            .ok_or(Error::NotConnected)
    }

    fn send(&mut self, buffers: &[Vec<u8>]) -> Result<()> {
        let link = self.link()?;
        for buffer in buffers {
            if let Err(e) = link.write(buffer) {
                return Err(self.link_failed(e));
            }
        }
        Ok(())
    }

    fn status(&mut self) -> Result<PrinterStatus> {
        let link = self.link()?;
        match link.status() {
            Ok(status) => Ok(status),
            Err(e) => Err(self.link_failed(e)),
        }
    }

    fn open_drawer(&mut self) -> Result<()> {
        let link = self.link()?;

        let mut last_error = None;
        for (pin, pulse) in DRAWER_ATTEMPTS {
            match link.kick_drawer(pin, pulse) {
                Ok(()) => return Ok(()),
                Err(e) => last_error = Some(e),
            }
        }
        // Some vendor layers reject their own pulse API; fall back to the raw command.
        for (pin, pulse) in DRAWER_ATTEMPTS {
            match link.write(&drawer_kick_command(pin, pulse)) {
                Ok(()) => return Ok(()),
                Err(e) => last_error = Some(e),
            }
        }

        Err(self.link_failed(last_error.unwrap_or(LinkError::Closed)))
    }

    /// Map a link error to `SendFailed`, dropping the handle if the link is gone.
    fn link_failed(&mut self, error: LinkError) -> Error {
        if matches!(error, LinkError::Closed) {
            log::warn!("connection: link closed by peer");
            self.handle = None;
            self.set_connected(None);
        }
        Error::send_failed(error.to_string())
    }
}

/// Open a link on a helper thread, giving up after `timeout`.
fn open_with_timeout(
    connector: Arc<dyn Connector>,
    target: Target,
    timeout: Duration,
) -> Result<Box<dyn PrinterLink>> {
    let (tx, rx) = mpsc::channel();
    let label = target.to_string();
    thread::spawn(move || {
        let result = connector.open(&target, timeout);
        if let Err(mpsc::SendError(Ok(mut late))) = tx.send(result) {
            log::debug!("connection: closing late link to {}", target);
            let _ = late.close();
        }
    });

    match rx.recv_timeout(timeout) {
        Ok(Ok(link)) => Ok(link),
        Ok(Err(e)) => Err(Error::connection_failed(format!("{label}: {e}"))),
        Err(RecvTimeoutError::Timeout) => Err(Error::connection_failed(format!(
            "{label}: timed out after {timeout:?}"
        ))),
        Err(RecvTimeoutError::Disconnected) => Err(Error::connection_failed(format!(
            "{label}: connector exited"
        ))),
    }
}
