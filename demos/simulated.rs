//! Simulated printer walkthrough.
//!
//! Registers a simulated LAN scanner, a simulated USB enumeration, and a
//! connector that logs what it would print, then runs discovery, prints a
//! short receipt, opens the drawer and plays a USB plug/unplug cycle.
//!
//! Run with: `cargo run --example simulated`
//!
//! Pass a host to print to a real raw TCP printer instead:
//! `cargo run --example simulated -- 192.168.1.50`

use std::thread;
use std::time::Duration;

use log::info;
use printer_link::{
    Connector, CoordinatorBuilder, CoordinatorConfig, EnumerationScanner, FoundDevice, LinkError,
    PrinterLink, RawTcpConnector, Result, ScanError, ScanSink, ScanTarget, Target, Transport,
    TransportScanner, WiredAccessory,
};

/// LAN scanner that "finds" two printers, one of them twice.
struct SimulatedLan;

impl TransportScanner for SimulatedLan {
    fn kind(&self) -> ScanTarget {
        ScanTarget::Lan
    }

    fn start(
        &mut self,
        timeout: Option<Duration>,
        sink: ScanSink,
    ) -> std::result::Result<(), ScanError> {
        info!("LAN scan started (timeout {:?})", timeout);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(300));
            sink.found(FoundDevice::new("TCP:AA:BB:CC:DD:EE:01").with_name("Kitchen"));
            sink.found(FoundDevice::new("TCPS:AA:BB:CC:DD:EE:01").with_name("Kitchen"));
            thread::sleep(Duration::from_millis(200));
            sink.found(
                FoundDevice::new("10.0.0.21")
                    .with_name("Front desk")
                    .with_mac_address("00-11-62-0A-0B-0C"),
            );
            sink.finish();
        });
        Ok(())
    }
}

/// Connector that logs instead of printing.
struct LoggingConnector;

impl Connector for LoggingConnector {
    fn open(
        &self,
        target: &Target,
        _timeout: Duration,
    ) -> std::result::Result<Box<dyn PrinterLink>, LinkError> {
        thread::sleep(Duration::from_millis(100));
        Ok(Box::new(LoggingLink {
            target: target.to_string(),
        }))
    }
}

struct LoggingLink {
    target: String,
}

impl PrinterLink for LoggingLink {
    fn write(&mut self, data: &[u8]) -> std::result::Result<(), LinkError> {
        let hex: Vec<String> = data.iter().map(|b| format!("{b:02X}")).collect();
        info!("{} <- {}", self.target, hex.join(" "));
        Ok(())
    }

    fn close(&mut self) -> std::result::Result<(), LinkError> {
        info!("{} closed", self.target);
        Ok(())
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let host = std::env::args().nth(1);

    let mut builder = CoordinatorBuilder::new()
        .config(
            CoordinatorConfig::default()
                .with_cleanup_grace(Duration::from_millis(500))
                .with_cooldown(Duration::from_millis(1500)),
        )
        .scanner(SimulatedLan)
        .scanner(EnumerationScanner::usb(
            || -> std::result::Result<Vec<FoundDevice>, ScanError> {
                Ok(vec![FoundDevice::new("USB:").with_name("TM-T20III")])
            },
        ));
    if host.is_some() {
        builder = builder.connector(RawTcpConnector::new());
    }
    let coordinator = builder.connector(LoggingConnector).build()?;

    info!("Discovering on every transport...");
    let devices = coordinator.discover_all(Duration::from_secs(2));
    for device in &devices {
        info!("  {}", device);
    }

    let target = match &host {
        Some(host) => format!("{}:{}", Transport::Tcp.prefix(), host),
        None => devices
            .first()
            .map(|d| d.target())
            .unwrap_or_else(|| "TCP:10.0.0.21".to_string()),
    };

    info!("Connecting to {}", target);
    coordinator.connect(&target, None, None)?;
    coordinator.send_all(vec![
        b"\x1b@".to_vec(),
        b"Table 4\n2x Espresso\n\n".to_vec(),
        b"\x1dV\x41\x03".to_vec(),
    ])?;
    info!("Status: {:?}", coordinator.status()?);
    coordinator.open_cash_drawer()?;
    coordinator.disconnect();

    info!("Plugging in a USB printer...");
    coordinator.wired_attached(WiredAccessory::new("usb-1", "TM-T20III").with_vendor_id(0x04b8));
    info!(
        "Bluetooth discovery while wired: {:?}",
        coordinator.discover_bluetooth(Duration::from_secs(2))
    );

    info!("Unplugging it...");
    coordinator.wired_detached("usb-1");
    while coordinator.state().state.is_wired_recovery() {
        info!("  state: {}", coordinator.state().state);
        thread::sleep(Duration::from_millis(400));
    }
    info!("Discovery available again: {:?}", coordinator.state());

    Ok(())
}
