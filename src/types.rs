//! Transport, device and discovery-state types.
//!
//! Provides the transport variants a printer can be reached through, the
//! immutable [`DeviceRecord`] produced by discovery, and the state values the
//! discovery state machine publishes for introspection.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};

// =============================================================================
// Transports
// =============================================================================

/// Logical channel a printer is reachable through.
///
/// Each variant has a fixed prefix used in target strings (`TCP:10.0.0.5`,
/// `BT:00:11:22:33:44:55`). `Tcps` is the security-wrapped form of the same
/// LAN endpoint that some printers advertise alongside the plain one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Transport {
    /// Plain TCP on the local network.
    Tcp,
    /// TLS-wrapped TCP on the local network.
    Tcps,
    /// Bluetooth Classic (SPP).
    Bluetooth,
    /// Bluetooth Low Energy.
    BluetoothLe,
    /// USB, wired.
    Usb,
}

impl Transport {
    /// Returns all transport variants.
    pub fn all() -> &'static [Transport] {
        &[
            Transport::Tcp,
            Transport::Tcps,
            Transport::Bluetooth,
            Transport::BluetoothLe,
            Transport::Usb,
        ]
    }

    /// Target-string prefix for this transport.
    pub fn prefix(&self) -> &'static str {
        match self {
            Transport::Tcp => "TCP",
            Transport::Tcps => "TCPS",
            Transport::Bluetooth => "BT",
            Transport::BluetoothLe => "BLE",
            Transport::Usb => "USB",
        }
    }

    /// Look up a transport by its target-string prefix (case-insensitive).
    pub fn from_prefix(prefix: &str) -> Option<Self> {
        Self::all()
            .iter()
            .copied()
            .find(|t| t.prefix().eq_ignore_ascii_case(prefix))
    }

    /// Parse a caller-supplied transport hint.
    ///
    /// Accepts descriptive names (`lan`, `bluetooth`, `ble`, `usb`), the
    /// target prefixes themselves, and the numeric port types used by older
    /// callers (`1`=TCP, `2`=BT, `3`=USB, `4`=BLE).
    pub fn from_hint(hint: &str) -> Option<Self> {
        let hint = hint.trim();
        match hint.to_ascii_lowercase().as_str() {
            "lan" | "tcp" | "network" | "1" => Some(Transport::Tcp),
            "tcps" => Some(Transport::Tcps),
            "bluetooth" | "bt" | "2" => Some(Transport::Bluetooth),
            "ble" | "bluetoothle" | "bluetooth_le" | "4" => Some(Transport::BluetoothLe),
            "usb" | "3" => Some(Transport::Usb),
            _ => None,
        }
    }

    /// The scanner that discovers devices on this transport.
    pub fn scan_target(&self) -> ScanTarget {
        match self {
            Transport::Tcp | Transport::Tcps => ScanTarget::Lan,
            Transport::Bluetooth | Transport::BluetoothLe => ScanTarget::Bluetooth,
            Transport::Usb => ScanTarget::Usb,
        }
    }

    /// Rank used when two records describe the same physical device. Lower wins.
    ///
    /// A plain channel outranks its secured or alternate form of the same
    /// protocol because it has already been round-trip verified by the scan.
    pub fn precedence(&self) -> u8 {
        match self {
            Transport::Tcp => 0,
            Transport::Tcps => 1,
            Transport::Usb => 2,
            Transport::Bluetooth => 3,
            Transport::BluetoothLe => 4,
        }
    }

    /// Returns true for the radio transports a wired link can suppress.
    pub fn is_wireless(&self) -> bool {
        matches!(self, Transport::Bluetooth | Transport::BluetoothLe)
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// Kind of transport scanner. One scanner instance exists per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ScanTarget {
    Lan,
    Bluetooth,
    Usb,
}

impl ScanTarget {
    /// Returns all scan targets in the order combined discovery visits them.
    pub fn all() -> &'static [ScanTarget] {
        &[ScanTarget::Lan, ScanTarget::Bluetooth, ScanTarget::Usb]
    }

    /// Transport assumed for targets the scanner reports without a prefix.
    pub fn default_transport(&self) -> Transport {
        match self {
            ScanTarget::Lan => Transport::Tcp,
            ScanTarget::Bluetooth => Transport::Bluetooth,
            ScanTarget::Usb => Transport::Usb,
        }
    }

    /// Display name used for records that arrive without one.
    pub fn default_device_name(&self) -> &'static str {
        match self {
            ScanTarget::Usb => "USB Printer",
            _ => "Printer",
        }
    }

    /// Discovery state while this target is being scanned.
    pub fn scanning_state(&self) -> DiscoveryState {
        match self {
            ScanTarget::Lan => DiscoveryState::ScanningLan,
            ScanTarget::Bluetooth => DiscoveryState::ScanningBluetooth,
            ScanTarget::Usb => DiscoveryState::ScanningUsb,
        }
    }
}

impl fmt::Display for ScanTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ScanTarget::Lan => "LAN",
            ScanTarget::Bluetooth => "Bluetooth",
            ScanTarget::Usb => "USB",
        })
    }
}

// =============================================================================
// Hardware keys
// =============================================================================

/// Normalize a MAC-like address into a hardware key (`AA:BB:CC:DD:EE:FF`).
///
/// Accepts colon- or dash-separated pairs and 12 bare hex digits. Anything
/// else (IP addresses, serial numbers, hostnames) has no hardware key.
pub fn normalize_hardware_key(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let digits: String = if raw.contains(':') || raw.contains('-') {
        let groups: Vec<&str> = raw.split([':', '-']).collect();
        if groups.len() != 6 || groups.iter().any(|g| g.len() != 2) {
            return None;
        }
        groups.concat()
    } else {
        raw.to_string()
    };

    if digits.len() != 12 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }

    let upper = digits.to_ascii_uppercase();
    let pairs: Vec<&str> = (0..6).map(|i| &upper[i * 2..i * 2 + 2]).collect();
    Some(pairs.join(":"))
}

// =============================================================================
// Device records
// =============================================================================

/// A discovered printer.
///
/// Immutable once created. The composite form
/// `"<prefix>:<identifier>:<displayName>"` is what callers receive from
/// discovery; it is a compatibility format and is never escaped.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DeviceRecord {
    transport: Transport,
    identifier: String,
    display_name: String,
    hardware_key: String,
}

impl DeviceRecord {
    /// Create a record, deriving the hardware key from the identifier if it is a MAC.
    pub fn new(
        transport: Transport,
        identifier: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        let identifier = identifier.into();
        let hardware_key = normalize_hardware_key(&identifier).unwrap_or_default();
        Self {
            transport,
            identifier,
            display_name: display_name.into(),
            hardware_key,
        }
    }

    /// Create a record with an explicitly reported hardware address.
    ///
    /// Falls back to the identifier when `mac` does not normalize.
    pub fn with_hardware_address(
        transport: Transport,
        identifier: impl Into<String>,
        display_name: impl Into<String>,
        mac: &str,
    ) -> Self {
        let mut record = Self::new(transport, identifier, display_name);
        if let Some(key) = normalize_hardware_key(mac) {
            record.hardware_key = key;
        }
        record
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }

    /// Transport-specific address without the prefix.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Normalized physical address, empty when unknown.
    pub fn hardware_key(&self) -> &str {
        &self.hardware_key
    }

    /// The connect target, `"<prefix>:<identifier>"`.
    pub fn target(&self) -> String {
        format!("{}:{}", self.transport.prefix(), self.identifier)
    }

    /// The composite string handed to callers.
    pub fn composite(&self) -> String {
        format!(
            "{}:{}:{}",
            self.transport.prefix(),
            self.identifier,
            self.display_name
        )
    }

    /// Parse a composite string back into a record.
    ///
    /// The prefix runs to the first `:` and the display name starts after the
    /// last one, so identifiers may themselves contain colons.
    pub fn parse_composite(composite: &str) -> Option<Self> {
        let (prefix, rest) = composite.split_once(':')?;
        let transport = Transport::from_prefix(prefix)?;
        let (identifier, name) = rest.rsplit_once(':')?;
        Some(Self::new(transport, identifier, name))
    }
}

impl fmt::Display for DeviceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.composite())
    }
}

// =============================================================================
// Connect targets
// =============================================================================

/// A parsed connect target.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Target {
    pub transport: Transport,
    pub identifier: String,
}

impl Target {
    pub fn new(transport: Transport, identifier: impl Into<String>) -> Self {
        Self {
            transport,
            identifier: identifier.into(),
        }
    }

    /// Resolve a caller identifier and optional transport hint into a target.
    ///
    /// A prefixed identifier (`"BT:00:11:62:AA:BB:CC"`) wins over the hint.
    /// A bare identifier takes its transport from the hint.
    pub fn parse(identifier: &str, hint: Option<&str>) -> Result<Self> {
        let identifier = identifier.trim();
        if identifier.is_empty() {
            return Err(Error::invalid_arguments("identifier is empty"));
        }

        if let Some((prefix, rest)) = identifier.split_once(':') {
            if let Some(transport) = Transport::from_prefix(prefix) {
                return Self::checked(transport, rest);
            }
        }

        let hint = hint.ok_or_else(|| {
            Error::invalid_arguments(format!(
                "no transport prefix or hint for identifier {identifier}"
            ))
        })?;
        let transport = Transport::from_hint(hint)
            .ok_or_else(|| Error::invalid_arguments(format!("unknown transport hint: {hint}")))?;
        Self::checked(transport, identifier)
    }

    fn checked(transport: Transport, identifier: &str) -> Result<Self> {
        // An empty USB identifier selects the first attached USB printer.
        if identifier.is_empty() && transport != Transport::Usb {
            return Err(Error::invalid_arguments(format!(
                "empty {} identifier",
                transport.prefix()
            )));
        }
        Ok(Self::new(transport, identifier))
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.transport.prefix(), self.identifier)
    }
}

// =============================================================================
// Discovery state
// =============================================================================

/// State of the discovery state machine. Exactly one value is live at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum DiscoveryState {
    #[default]
    Idle,
    ScanningLan,
    ScanningBluetooth,
    ScanningUsb,
    CleaningUp,
    SuspendedAfterWiredDisconnect,
}

impl DiscoveryState {
    /// Stable string form reported through `getDiscoveryState`.
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscoveryState::Idle => "idle",
            DiscoveryState::ScanningLan => "scanningLan",
            DiscoveryState::ScanningBluetooth => "scanningBluetooth",
            DiscoveryState::ScanningUsb => "scanningUsb",
            DiscoveryState::CleaningUp => "cleaningUp",
            DiscoveryState::SuspendedAfterWiredDisconnect => "suspendedAfterWiredDisconnect",
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, DiscoveryState::Idle)
    }

    /// States entered after a wired disconnect, during which discovery is refused.
    pub fn is_wired_recovery(&self) -> bool {
        matches!(
            self,
            DiscoveryState::CleaningUp | DiscoveryState::SuspendedAfterWiredDisconnect
        )
    }

    /// The scanner occupied by this state, if any.
    pub fn scanning(&self) -> Option<ScanTarget> {
        match self {
            DiscoveryState::ScanningLan => Some(ScanTarget::Lan),
            DiscoveryState::ScanningBluetooth => Some(ScanTarget::Bluetooth),
            DiscoveryState::ScanningUsb => Some(ScanTarget::Usb),
            _ => None,
        }
    }
}

impl fmt::Display for DiscoveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a discovery request returned without scanning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum RefusalReason {
    /// Another discovery is already in flight.
    DiscoveryInProgress,
    /// The forced cleanup after a wired disconnect is running.
    CleaningUp,
    /// The cooldown after a wired disconnect has not elapsed.
    CoolingDown,
    /// A wired link has disabled the printer's radio.
    RadioSuppressed,
    /// A connection attempt holds the transport.
    TransportBusy,
}

impl RefusalReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefusalReason::DiscoveryInProgress => "discoveryInProgress",
            RefusalReason::CleaningUp => "cleaningUp",
            RefusalReason::CoolingDown => "coolingDown",
            RefusalReason::RadioSuppressed => "radioSuppressed",
            RefusalReason::TransportBusy => "transportBusy",
        }
    }
}

impl fmt::Display for RefusalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only snapshot of the discovery state machine.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DiscoveryStatus {
    pub state: DiscoveryState,
    /// Current session, or the last one issued when idle.
    pub session_id: u64,
    /// A wired link has been used this runtime session.
    pub radio_suppressed: bool,
    /// Phases, timers or connect leases are still waiting on the queue.
    pub pending_work_queued: bool,
    /// Reason the most recent refused discovery was turned away.
    pub last_refusal: Option<RefusalReason>,
}

/// Printer status as reported over an open link.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PrinterStatus {
    pub online: bool,
    pub detail: String,
}

impl PrinterStatus {
    pub fn online() -> Self {
        Self {
            online: true,
            detail: "OK".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_roundtrip_for_all_transports() {
        for transport in Transport::all() {
            assert_eq!(Transport::from_prefix(transport.prefix()), Some(*transport));
        }
        assert_eq!(Transport::from_prefix("tcp"), Some(Transport::Tcp));
        assert_eq!(Transport::from_prefix("SERIAL"), None);
    }

    #[test]
    fn test_hint_accepts_names_and_port_types() {
        assert_eq!(Transport::from_hint("lan"), Some(Transport::Tcp));
        assert_eq!(Transport::from_hint("Bluetooth"), Some(Transport::Bluetooth));
        assert_eq!(Transport::from_hint("4"), Some(Transport::BluetoothLe));
        assert_eq!(Transport::from_hint("3"), Some(Transport::Usb));
        assert_eq!(Transport::from_hint("carrier-pigeon"), None);
    }

    #[test]
    fn test_plain_lan_outranks_secured_lan() {
        assert!(Transport::Tcp.precedence() < Transport::Tcps.precedence());
        assert!(Transport::Bluetooth.precedence() < Transport::BluetoothLe.precedence());
    }

    #[test]
    fn test_normalize_hardware_key_formats() {
        assert_eq!(
            normalize_hardware_key("aa:bb:cc:dd:ee:01").as_deref(),
            Some("AA:BB:CC:DD:EE:01")
        );
        assert_eq!(
            normalize_hardware_key("AA-BB-CC-DD-EE-01").as_deref(),
            Some("AA:BB:CC:DD:EE:01")
        );
        assert_eq!(
            normalize_hardware_key("aabbccddee01").as_deref(),
            Some("AA:BB:CC:DD:EE:01")
        );
        assert_eq!(normalize_hardware_key("192.168.1.20"), None);
        assert_eq!(normalize_hardware_key("fe80::1"), None);
        assert_eq!(normalize_hardware_key("J2UN012345"), None);
    }

    #[test]
    fn test_record_composite_format() {
        let record = DeviceRecord::new(Transport::Tcp, "AA:BB:CC:DD:EE:01", "P1");
        assert_eq!(record.composite(), "TCP:AA:BB:CC:DD:EE:01:P1");
        assert_eq!(record.target(), "TCP:AA:BB:CC:DD:EE:01");
        assert_eq!(record.hardware_key(), "AA:BB:CC:DD:EE:01");
    }

    #[test]
    fn test_record_without_mac_has_empty_key() {
        let record = DeviceRecord::new(Transport::Tcp, "10.0.0.7", "TM-m30III");
        assert_eq!(record.hardware_key(), "");

        let record =
            DeviceRecord::with_hardware_address(Transport::Tcp, "10.0.0.7", "TM", "00:11:62:0a:0b:0c");
        assert_eq!(record.hardware_key(), "00:11:62:0A:0B:0C");
    }

    #[test]
    fn test_parse_composite_splits_on_first_and_last_colon() {
        let record = DeviceRecord::parse_composite("BT:00:11:62:AA:BB:CC:TM-m30").unwrap();
        assert_eq!(record.transport(), Transport::Bluetooth);
        assert_eq!(record.identifier(), "00:11:62:AA:BB:CC");
        assert_eq!(record.display_name(), "TM-m30");

        let usb = DeviceRecord::parse_composite("USB::TM-T88VII").unwrap();
        assert_eq!(usb.identifier(), "");

        assert!(DeviceRecord::parse_composite("garbage").is_none());
        assert!(DeviceRecord::parse_composite("XYZ:1:2").is_none());
    }

    #[test]
    fn test_target_prefix_wins_over_hint() {
        let target = Target::parse("TCP:AA:BB:CC:DD:EE:01", Some("bluetooth")).unwrap();
        assert_eq!(target.transport, Transport::Tcp);
        assert_eq!(target.identifier, "AA:BB:CC:DD:EE:01");
    }

    #[test]
    fn test_target_bare_identifier_uses_hint() {
        let target = Target::parse("192.168.1.30", Some("lan")).unwrap();
        assert_eq!(target.to_string(), "TCP:192.168.1.30");

        let err = Target::parse("192.168.1.30", None).unwrap_err();
        assert_eq!(err.code(), "INVALID_ARGUMENTS");
        assert!(Target::parse("192.168.1.30", Some("zigbee")).is_err());
        assert!(Target::parse("  ", Some("lan")).is_err());
    }

    #[test]
    fn test_target_empty_identifier_only_for_usb() {
        assert!(Target::parse("USB:", None).is_ok());
        assert!(Target::parse("TCP:", None).is_err());
    }

    #[test]
    fn test_state_strings_and_classification() {
        assert_eq!(DiscoveryState::default(), DiscoveryState::Idle);
        assert_eq!(DiscoveryState::ScanningLan.as_str(), "scanningLan");
        assert!(DiscoveryState::CleaningUp.is_wired_recovery());
        assert!(DiscoveryState::SuspendedAfterWiredDisconnect.is_wired_recovery());
        assert!(!DiscoveryState::ScanningUsb.is_wired_recovery());
        assert_eq!(
            DiscoveryState::ScanningBluetooth.scanning(),
            Some(ScanTarget::Bluetooth)
        );
        assert_eq!(ScanTarget::Usb.scanning_state(), DiscoveryState::ScanningUsb);
    }
}
