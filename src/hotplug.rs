//! Wired accessory attach/detach notifications.
//!
//! Platform code forwards physical attach and detach events through a
//! [`HotplugSink`]. The orchestrator uses them to track radio suppression and
//! to drive the cleanup and cooldown that follow a wired disconnect.

use std::sync::mpsc::Sender;
use std::sync::Arc;

use crate::discovery::Command;
use crate::types::DeviceRecord;

/// A wired accessory reported by the platform's accessory enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WiredAccessory {
    /// Stable id for the lifetime of the attachment (connection id, bus path).
    pub id: String,
    pub name: String,
    pub vendor_id: Option<u16>,
}

impl WiredAccessory {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            vendor_id: None,
        }
    }

    /// Set the USB vendor id (builder pattern).
    pub fn with_vendor_id(mut self, vendor_id: u16) -> Self {
        self.vendor_id = Some(vendor_id);
        self
    }
}

/// Snapshot of the wired USB side, for troubleshooting printers that do not show up.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UsbDiagnostics {
    /// Wired accessories currently attached, ordered by id.
    pub attached: Vec<WiredAccessory>,
    /// How many of `attached` carry a known printer vendor id.
    pub vendor_matches: usize,
    /// Printers a USB-only discovery pass found.
    pub discovered: Vec<DeviceRecord>,
    /// Why the discovery pass was refused or reset, if it was.
    pub discovery_error: Option<String>,
}

/// Decides whether an accessory is really a wireless device surfaced through
/// the wired enumeration API.
pub type WirelessPredicate = dyn Fn(&WiredAccessory) -> bool + Send + Sync + 'static;

/// Default wireless classifier, based on the accessory name.
///
/// Matches names containing `BLUETOOTH` or `BLE` as a word, or ending in
/// `-BT`/`_BT`. A wired printer whose model name happens to match is
/// misclassified; install a better predicate where vendor ids are known.
pub fn looks_wireless(accessory: &WiredAccessory) -> bool {
    let name = accessory.name.to_ascii_uppercase();
    if name.contains("BLUETOOTH") {
        return true;
    }
    if name.ends_with("-BT") || name.ends_with("_BT") {
        return true;
    }
    name.split(|c: char| !c.is_ascii_alphanumeric())
        .any(|word| word == "BLE")
}

pub(crate) fn default_predicate() -> Arc<WirelessPredicate> {
    Arc::new(looks_wireless)
}

/// Handle for forwarding hotplug events to the coordinator.
///
/// Cloneable and usable from any thread, such as a platform notification
/// callback.
#[derive(Debug, Clone)]
pub struct HotplugSink {
    tx: Sender<Command>,
}

impl HotplugSink {
    pub(crate) fn new(tx: Sender<Command>) -> Self {
        Self { tx }
    }

    /// A wired accessory was attached.
    pub fn attached(&self, accessory: WiredAccessory) {
        let _ = self.tx.send(Command::WiredAttached(accessory));
    }

    /// A wired accessory was detached.
    pub fn detached(&self, id: impl Into<String>) {
        let _ = self.tx.send(Command::WiredDetached(id.into()));
    }
}
