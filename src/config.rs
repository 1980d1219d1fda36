//! Coordinator configuration.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::types::{ScanTarget, Transport};

/// Smallest watchdog margin accepted. Scanners routinely overrun their own
/// timeout by a second or more before reporting completion.
pub const MIN_WATCHDOG_MARGIN: Duration = Duration::from_secs(2);

/// How `discover_all` walks the transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum DiscoveryStrategy {
    /// LAN, then Bluetooth, then USB, one after another.
    #[default]
    Sequential,
    /// Every scanner at once; individual passes only if that found nothing.
    ///
    /// The combined pass and the fallback passes have independent timeouts,
    /// so a slow device can answer the combined pass after it was given up on
    /// and show up again in a fallback pass.
    CombinedFirst,
}

/// Timeouts and strategy for a [`PrinterCoordinator`](crate::PrinterCoordinator).
///
/// Every watchdog is the transport's own timeout plus `watchdog_margin`.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CoordinatorConfig {
    /// LAN scan timeout when the caller does not give one (default: 5s).
    #[cfg_attr(feature = "serde", serde(with = "duration_millis"))]
    pub lan_timeout: Duration,

    /// Bluetooth scan timeout when the caller does not give one (default: 4s).
    #[cfg_attr(feature = "serde", serde(with = "duration_millis"))]
    pub bluetooth_timeout: Duration,

    /// Budget for synchronous USB enumeration, used only to size its watchdog (default: 4s).
    #[cfg_attr(feature = "serde", serde(with = "duration_millis"))]
    pub usb_timeout: Duration,

    /// Default `discover_all` timeout, also used for the all-scanners pass of
    /// [`DiscoveryStrategy::CombinedFirst`] (default: 6s).
    #[cfg_attr(feature = "serde", serde(with = "duration_millis"))]
    pub combined_timeout: Duration,

    /// How far each watchdog trails its scanner's timeout (default: 2.5s, minimum 2s).
    #[cfg_attr(feature = "serde", serde(with = "duration_millis"))]
    pub watchdog_margin: Duration,

    /// Delay between a wired detach and the forced cleanup (default: 1s).
    #[cfg_attr(feature = "serde", serde(with = "duration_millis"))]
    pub cleanup_grace: Duration,

    /// Quiet period after cleanup before discovery is allowed again (default: 3s).
    ///
    /// Must be longer than `cleanup_grace`.
    #[cfg_attr(feature = "serde", serde(with = "duration_millis"))]
    pub cooldown: Duration,

    /// Connect timeout for every transport but BLE (default: 15s).
    #[cfg_attr(feature = "serde", serde(with = "duration_millis"))]
    pub connect_timeout: Duration,

    /// Connect timeout for BLE, whose pairing handshake is slow (default: 30s).
    #[cfg_attr(feature = "serde", serde(with = "duration_millis"))]
    pub ble_connect_timeout: Duration,

    /// Bluetooth scan length when pairing
    /// ([`pair_bluetooth`](crate::PrinterCoordinator::pair_bluetooth), default: 3.5s).
    #[cfg_attr(feature = "serde", serde(with = "duration_millis"))]
    pub pair_timeout: Duration,

    /// USB vendor ids counted as printer makers by
    /// [`usb_diagnostics`](crate::PrinterCoordinator::usb_diagnostics)
    /// (default: Epson `0x04b8`, Star `0x0519`).
    pub printer_vendor_ids: Vec<u16>,

    pub strategy: DiscoveryStrategy,
}

/// Epson and Star Micronics.
pub const DEFAULT_PRINTER_VENDOR_IDS: [u16; 2] = [0x04b8, 0x0519];

#[cfg(feature = "serde")]
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis().min(u64::MAX as u128) as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            lan_timeout: Duration::from_millis(5000),
            bluetooth_timeout: Duration::from_millis(4000),
            usb_timeout: Duration::from_millis(4000),
            combined_timeout: Duration::from_millis(6000),
            watchdog_margin: Duration::from_millis(2500),
            cleanup_grace: Duration::from_millis(1000),
            cooldown: Duration::from_millis(3000),
            connect_timeout: Duration::from_millis(15000),
            ble_connect_timeout: Duration::from_millis(30000),
            pair_timeout: Duration::from_millis(3500),
            printer_vendor_ids: DEFAULT_PRINTER_VENDOR_IDS.to_vec(),
            strategy: DiscoveryStrategy::Sequential,
        }
    }
}

impl CoordinatorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default LAN scan timeout (builder pattern).
    pub fn with_lan_timeout(mut self, timeout: Duration) -> Self {
        self.lan_timeout = timeout;
        self
    }

    /// Set the default Bluetooth scan timeout (builder pattern).
    pub fn with_bluetooth_timeout(mut self, timeout: Duration) -> Self {
        self.bluetooth_timeout = timeout;
        self
    }

    /// Set the USB enumeration budget (builder pattern).
    pub fn with_usb_timeout(mut self, timeout: Duration) -> Self {
        self.usb_timeout = timeout;
        self
    }

    /// Set the combined-pass timeout (builder pattern).
    pub fn with_combined_timeout(mut self, timeout: Duration) -> Self {
        self.combined_timeout = timeout;
        self
    }

    /// Set the watchdog margin (builder pattern).
    pub fn with_watchdog_margin(mut self, margin: Duration) -> Self {
        self.watchdog_margin = margin;
        self
    }

    /// Set the post-detach cleanup grace delay (builder pattern).
    pub fn with_cleanup_grace(mut self, grace: Duration) -> Self {
        self.cleanup_grace = grace;
        self
    }

    /// Set the post-cleanup cooldown (builder pattern).
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Set the connect timeout for non-BLE transports (builder pattern).
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the BLE connect timeout (builder pattern).
    pub fn with_ble_connect_timeout(mut self, timeout: Duration) -> Self {
        self.ble_connect_timeout = timeout;
        self
    }

    /// Set the pairing scan length (builder pattern).
    pub fn with_pair_timeout(mut self, timeout: Duration) -> Self {
        self.pair_timeout = timeout;
        self
    }

    /// Set the vendor ids treated as printer makers (builder pattern).
    pub fn with_printer_vendor_ids(mut self, vendor_ids: impl Into<Vec<u16>>) -> Self {
        self.printer_vendor_ids = vendor_ids.into();
        self
    }

    /// Whether `vendor_id` belongs to a known printer maker.
    pub fn is_printer_vendor(&self, vendor_id: u16) -> bool {
        self.printer_vendor_ids.contains(&vendor_id)
    }

    /// Set the combined discovery strategy (builder pattern).
    pub fn with_strategy(mut self, strategy: DiscoveryStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Check that the configuration can drive the state machine.
    pub fn validate(&self) -> Result<()> {
        let durations = [
            ("lan_timeout", self.lan_timeout),
            ("bluetooth_timeout", self.bluetooth_timeout),
            ("usb_timeout", self.usb_timeout),
            ("combined_timeout", self.combined_timeout),
            ("cleanup_grace", self.cleanup_grace),
            ("cooldown", self.cooldown),
            ("connect_timeout", self.connect_timeout),
            ("ble_connect_timeout", self.ble_connect_timeout),
            ("pair_timeout", self.pair_timeout),
        ];
        if let Some((name, _)) = durations.iter().find(|(_, d)| d.is_zero()) {
            return Err(Error::invalid_config(format!("{name} must be non-zero")));
        }
        if self.watchdog_margin < MIN_WATCHDOG_MARGIN {
            return Err(Error::invalid_config(format!(
                "watchdog_margin must be at least {:?}, got {:?}",
                MIN_WATCHDOG_MARGIN, self.watchdog_margin
            )));
        }
        if self.cooldown <= self.cleanup_grace {
            return Err(Error::invalid_config(format!(
                "cooldown ({:?}) must be longer than cleanup_grace ({:?})",
                self.cooldown, self.cleanup_grace
            )));
        }
        Ok(())
    }

    /// Default scan timeout for a scanner kind.
    pub fn scan_timeout(&self, target: ScanTarget) -> Duration {
        match target {
            ScanTarget::Lan => self.lan_timeout,
            ScanTarget::Bluetooth => self.bluetooth_timeout,
            ScanTarget::Usb => self.usb_timeout,
        }
    }

    /// Watchdog budget for a scan that was given `timeout`.
    pub fn watchdog_for(&self, timeout: Duration) -> Duration {
        timeout + self.watchdog_margin
    }

    /// Default connect timeout for a transport.
    pub fn connect_timeout_for(&self, transport: Transport) -> Duration {
        match transport {
            Transport::BluetoothLe => self.ble_connect_timeout,
            _ => self.connect_timeout,
        }
    }
}
