//! Fake scanners and connectors shared by the end-to-end tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use printer_link::{
    Connector, CoordinatorConfig, DiscoveryStatus, DrawerPin, ForcedCleanup, FoundDevice,
    LinkError, PrinterCoordinator, PrinterLink, PrinterStatus, ScanError, ScanSink, ScanTarget,
    Target, TransportScanner,
};

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Config with the shortest timers validation allows.
pub fn fast_config() -> CoordinatorConfig {
    CoordinatorConfig::default()
        .with_lan_timeout(Duration::from_millis(200))
        .with_bluetooth_timeout(Duration::from_millis(200))
        .with_usb_timeout(Duration::from_millis(200))
        .with_combined_timeout(Duration::from_millis(200))
        .with_watchdog_margin(Duration::from_secs(2))
        .with_cleanup_grace(Duration::from_millis(50))
        .with_cooldown(Duration::from_millis(150))
}

/// Poll the coordinator's snapshot until `pred` holds or `timeout` elapses.
pub fn wait_for_state(
    coordinator: &PrinterCoordinator,
    timeout: Duration,
    pred: impl Fn(&DiscoveryStatus) -> bool,
) -> DiscoveryStatus {
    let deadline = Instant::now() + timeout;
    loop {
        let status = coordinator.state();
        if pred(&status) || Instant::now() > deadline {
            return status;
        }
        thread::sleep(Duration::from_millis(10));
    }
}

// =============================================================================
// Scanners
// =============================================================================

/// What a [`FakeScanner`] does on one start.
#[derive(Debug, Clone)]
pub enum Script {
    /// Report the devices after `delay`, then finish.
    Report {
        devices: Vec<FoundDevice>,
        delay: Duration,
    },
    /// Report a scan failure after `delay`.
    Fail { message: String, delay: Duration },
    /// Refuse to start.
    RefuseStart,
    /// Never report; the sink is kept for the test to use later.
    Hang,
}

impl Script {
    pub fn report(devices: Vec<FoundDevice>) -> Self {
        Script::Report {
            devices,
            delay: Duration::from_millis(20),
        }
    }

    pub fn fail(message: &str) -> Self {
        Script::Fail {
            message: message.to_string(),
            delay: Duration::from_millis(20),
        }
    }
}

/// Scanner driven by a queue of scripts, one per start. The last script
/// repeats once the queue is down to one entry.
#[derive(Clone)]
pub struct FakeScanner {
    kind: ScanTarget,
    scripts: Arc<Mutex<VecDeque<Script>>>,
    starts: Arc<AtomicUsize>,
    held: Arc<Mutex<Vec<ScanSink>>>,
}

impl FakeScanner {
    pub fn new(kind: ScanTarget, scripts: Vec<Script>) -> Self {
        Self {
            kind,
            scripts: Arc::new(Mutex::new(scripts.into())),
            starts: Arc::new(AtomicUsize::new(0)),
            held: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn reporting(kind: ScanTarget, devices: Vec<FoundDevice>) -> Self {
        Self::new(kind, vec![Script::report(devices)])
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    /// Take the sink a hanging start kept.
    pub fn take_held_sink(&self) -> Option<ScanSink> {
        self.held.lock().unwrap().pop()
    }

    fn next_script(&self) -> Script {
        let mut scripts = self.scripts.lock().unwrap();
        if scripts.len() > 1 {
            scripts.pop_front().unwrap()
        } else {
            scripts.front().cloned().unwrap_or(Script::Hang)
        }
    }
}

impl TransportScanner for FakeScanner {
    fn kind(&self) -> ScanTarget {
        self.kind
    }

    fn start(&mut self, _timeout: Option<Duration>, sink: ScanSink) -> Result<(), ScanError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        match self.next_script() {
            Script::Report { devices, delay } => {
                thread::spawn(move || {
                    thread::sleep(delay);
                    for device in devices {
                        sink.found(device);
                    }
                    sink.finish();
                });
            }
            Script::Fail { message, delay } => {
                thread::spawn(move || {
                    thread::sleep(delay);
                    sink.fail(ScanError::failed(message));
                });
            }
            Script::RefuseStart => {
                return Err(ScanError::Unavailable("radio off".to_string()));
            }
            Script::Hang => self.held.lock().unwrap().push(sink),
        }
        Ok(())
    }
}

/// Forced cleanup that counts its invocations.
#[derive(Clone, Default)]
pub struct CountingCleanup {
    calls: Arc<AtomicUsize>,
}

impl CountingCleanup {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ForcedCleanup for CountingCleanup {
    fn force_cleanup(&self) -> Result<(), LinkError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// =============================================================================
// Connectors
// =============================================================================

/// Everything the fake links saw.
#[derive(Debug, Default)]
pub struct LinkLog {
    pub opened: Vec<Target>,
    pub writes: Vec<Vec<u8>>,
    pub kicks: Vec<(DrawerPin, Duration)>,
    pub closed: usize,
}

/// Connector whose links record into a shared [`LinkLog`].
#[derive(Clone, Default)]
pub struct FakeConnector {
    pub log: Arc<Mutex<LinkLog>>,
    open_delay: Duration,
    refuse: bool,
    offline: bool,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }

    pub fn refusing(mut self) -> Self {
        self.refuse = true;
        self
    }

    pub fn offline(mut self) -> Self {
        self.offline = true;
        self
    }

    pub fn opened(&self) -> Vec<Target> {
        self.log.lock().unwrap().opened.clone()
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.log.lock().unwrap().writes.clone()
    }

    pub fn closed(&self) -> usize {
        self.log.lock().unwrap().closed
    }
}

impl Connector for FakeConnector {
    fn open(&self, target: &Target, _timeout: Duration) -> Result<Box<dyn PrinterLink>, LinkError> {
        thread::sleep(self.open_delay);
        if self.refuse {
            return Err(LinkError::Open(format!("{target} refused")));
        }
        self.log.lock().unwrap().opened.push(target.clone());
        Ok(Box::new(FakeLink {
            log: Arc::clone(&self.log),
            offline: self.offline,
        }))
    }
}

struct FakeLink {
    log: Arc<Mutex<LinkLog>>,
    offline: bool,
}

impl PrinterLink for FakeLink {
    fn write(&mut self, data: &[u8]) -> Result<(), LinkError> {
        self.log.lock().unwrap().writes.push(data.to_vec());
        Ok(())
    }

    fn status(&mut self) -> Result<PrinterStatus, LinkError> {
        Ok(PrinterStatus {
            online: !self.offline,
            detail: if self.offline { "cover open" } else { "OK" }.to_string(),
        })
    }

    fn kick_drawer(&mut self, pin: DrawerPin, pulse: Duration) -> Result<(), LinkError> {
        self.log.lock().unwrap().kicks.push((pin, pulse));
        Ok(())
    }

    fn close(&mut self) -> Result<(), LinkError> {
        self.log.lock().unwrap().closed += 1;
        Ok(())
    }
}
