//! Discovery and connection coordination for receipt printers.
//!
//! This crate sits between vendor printer SDKs and an application. It runs
//! discovery over LAN, Bluetooth and USB through pluggable scanners, merges
//! what they report into one deduplicated device list, and holds at most one
//! open printer connection for print, status and cash drawer commands.
//!
//! Discovery is driven by a single orchestration worker: one discovery runs at
//! a time, every scan is bounded by a watchdog, and late reports from an
//! abandoned scan are ignored. Unplugging a wired printer suspends discovery
//! for a cleanup and cooldown period so the vendor stack can settle.
//!
//! # Getting Started
//!
//! ```no_run
//! use printer_link::{
//!     CoordinatorBuilder, EnumerationScanner, FoundDevice, RawTcpConnector, ScanError, ScanTarget,
//! };
//! use std::time::Duration;
//!
//! // A scanner that returns whatever the vendor SDK enumerates
//! let lan = EnumerationScanner::new(ScanTarget::Lan, || -> Result<Vec<FoundDevice>, ScanError> {
//!     Ok(vec![FoundDevice::new("TCP:192.168.1.50").with_name("TM-T88VII")])
//! });
//!
//! let coordinator = CoordinatorBuilder::new()
//!     .scanner(lan)
//!     .connector(RawTcpConnector::new())
//!     .build()
//!     .unwrap();
//!
//! // Devices come back as "<prefix>:<identifier>:<name>" composites
//! for device in coordinator.discover_lan(Duration::from_secs(5)) {
//!     println!("{}", device);
//! }
//!
//! coordinator.connect("TCP:192.168.1.50", None, None).unwrap();
//! coordinator.send(b"\x1b@Hello\n\n\n\x1dV\x00").unwrap();
//! coordinator.open_cash_drawer().unwrap();
//! coordinator.disconnect();
//! ```
//!
//! # Scanners and connectors
//!
//! Vendor SDK bindings plug in through these traits:
//!
//! - [`TransportScanner`] starts an asynchronous scan and reports through a
//!   [`ScanSink`]. Synchronous enumerations can use [`EnumerationScanner`].
//! - [`Connector`] opens a [`PrinterLink`] to a [`Target`].
//! - [`BondedDevices`] lists bonded Bluetooth printers for
//!   [`PrinterCoordinator::pair_bluetooth`].
//!
//! # Features
//!
//! - `raw-tcp` (default): [`RawTcpConnector`], ESC/POS over a plain TCP socket
//! - `dispatch` (default): JSON method-call surface in [`dispatch`]
//! - `serde`: `Serialize`/`Deserialize` on configuration and data types

pub mod config;
mod connection;
mod coordinator;
mod discovery;
#[cfg(feature = "dispatch")]
pub mod dispatch;
mod error;
mod hotplug;
#[cfg(feature = "raw-tcp")]
pub mod net;
mod registry;
mod scanner;
pub mod session;
pub mod types;
pub mod watchdog;

// Crate-level error types
pub use error::{Error, LinkError, Result, ScanError};

// Configuration
pub use config::{CoordinatorConfig, DiscoveryStrategy, DEFAULT_PRINTER_VENDOR_IDS};

// Coordinator
pub use coordinator::{CoordinatorBuilder, PrinterCoordinator};
pub use discovery::DiscoveryRequest;

// Core types
pub use types::{
    normalize_hardware_key, DeviceRecord, DiscoveryState, DiscoveryStatus, PrinterStatus,
    RefusalReason, ScanTarget, Target, Transport,
};
pub use session::SessionId;

// Discovery plumbing
pub use registry::DeviceRegistry;
pub use scanner::{
    BondedDevices, DeviceEnumerator, EnumerationScanner, FoundDevice, ForcedCleanup,
    NoBondedDevices, NoopCleanup, ScanSink, TransportScanner,
};

// Hotplug
pub use hotplug::{looks_wireless, HotplugSink, UsbDiagnostics, WiredAccessory};

// Connections
pub use connection::{drawer_kick_command, Connector, DrawerPin, PrinterLink};

#[cfg(feature = "dispatch")]
pub use dispatch::ErrorReply;

#[cfg(feature = "raw-tcp")]
pub use net::{RawTcpConnector, RawTcpLink, RAW_PRINT_PORT};
