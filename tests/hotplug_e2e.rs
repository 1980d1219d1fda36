//! End-to-end tests for wired attach/detach handling.
//!
//! A wired link disables the printer's radio, so Bluetooth discovery is cut
//! short until the wired accessory is unplugged and the cleanup and cooldown
//! that follow have run.

mod common;

use std::thread;
use std::time::{Duration, Instant};

use common::{fast_config, init_logger, wait_for_state, CountingCleanup, FakeScanner, Script};
use printer_link::{
    CoordinatorBuilder, CoordinatorConfig, DiscoveryRequest, DiscoveryState, Error, FoundDevice,
    PrinterCoordinator, RefusalReason, ScanTarget, WiredAccessory,
};

struct Rig {
    coordinator: PrinterCoordinator,
    bluetooth: FakeScanner,
    cleanup: CountingCleanup,
}

fn rig() -> Rig {
    rig_with(fast_config())
}

fn rig_with(config: CoordinatorConfig) -> Rig {
    init_logger();
    let bluetooth = FakeScanner::reporting(
        ScanTarget::Bluetooth,
        vec![FoundDevice::new("BT:00:11:62:AA:BB:CC").with_name("TM-P20")],
    );
    let lan = FakeScanner::reporting(
        ScanTarget::Lan,
        vec![FoundDevice::new("TCP:10.0.0.5").with_name("Kitchen")],
    );
    let cleanup = CountingCleanup::default();
    let coordinator = CoordinatorBuilder::new()
        .config(config)
        .scanner(bluetooth.clone())
        .scanner(lan)
        .forced_cleanup(cleanup.clone())
        .build()
        .unwrap();
    Rig {
        coordinator,
        bluetooth,
        cleanup,
    }
}

#[test]
fn test_wired_cycle_suppresses_then_restores_bluetooth() {
    let Rig {
        coordinator,
        bluetooth,
        cleanup,
    } = rig();

    coordinator.wired_attached(WiredAccessory::new("usb-1", "TM-T88VII").with_vendor_id(0x04b8));
    assert!(coordinator.state().radio_suppressed);

    let started = Instant::now();
    assert!(coordinator
        .discover_bluetooth(Duration::from_millis(5000))
        .is_empty());
    assert!(started.elapsed() < Duration::from_millis(500));
    assert_eq!(bluetooth.starts(), 0);

    coordinator.wired_detached("usb-1");
    assert!(coordinator.state().state.is_wired_recovery());

    let refused = coordinator.try_discover(DiscoveryRequest::Lan(Duration::from_secs(1)));
    assert!(matches!(
        refused,
        Err(Error::DiscoveryRefused(
            RefusalReason::CleaningUp | RefusalReason::CoolingDown
        ))
    ));

    let status = wait_for_state(&coordinator, Duration::from_secs(3), |s| {
        s.state == DiscoveryState::Idle
    });
    assert_eq!(status.state, DiscoveryState::Idle);
    assert!(!status.radio_suppressed);
    assert!(!status.pending_work_queued);
    assert_eq!(cleanup.calls(), 1);

    // Nothing resumes on its own after the cooldown
    assert_eq!(bluetooth.starts(), 0);

    let devices = coordinator.discover_bluetooth(Duration::from_millis(5000));
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].composite(), "BT:00:11:62:AA:BB:CC:TM-P20");
    assert_eq!(bluetooth.starts(), 1);
}

#[test]
fn test_recovery_passes_through_both_phases() {
    let Rig { coordinator, .. } = rig_with(fast_config().with_cooldown(Duration::from_secs(2)));
    coordinator.wired_attached(WiredAccessory::new("usb-1", "TSP143IIIU"));
    coordinator.wired_detached("usb-1");

    let status = wait_for_state(&coordinator, Duration::from_secs(2), |s| {
        s.state == DiscoveryState::SuspendedAfterWiredDisconnect
    });
    assert_eq!(status.state, DiscoveryState::SuspendedAfterWiredDisconnect);
    assert!(status.pending_work_queued);

    let refused = coordinator.try_discover(DiscoveryRequest::Usb);
    assert!(matches!(
        refused,
        Err(Error::DiscoveryRefused(RefusalReason::CoolingDown))
    ));
    assert_eq!(
        coordinator.state().last_refusal,
        Some(RefusalReason::CoolingDown)
    );
}

#[test]
fn test_wireless_accessory_does_not_suppress() {
    let Rig {
        coordinator,
        bluetooth,
        ..
    } = rig();

    coordinator.wired_attached(WiredAccessory::new("acc-7", "TM-m30II-BT"));
    assert!(!coordinator.state().radio_suppressed);

    // Its detach is not a wired disconnect either
    coordinator.wired_detached("acc-7");
    assert_eq!(coordinator.state().state, DiscoveryState::Idle);

    assert_eq!(
        coordinator
            .discover_bluetooth(Duration::from_secs(1))
            .len(),
        1
    );
    assert_eq!(bluetooth.starts(), 1);
}

#[test]
fn test_custom_wireless_predicate() {
    init_logger();
    let coordinator = CoordinatorBuilder::new()
        .wireless_predicate(|accessory| accessory.vendor_id == Some(0x0519))
        .build()
        .unwrap();

    coordinator.wired_attached(WiredAccessory::new("a", "Star SM-L200").with_vendor_id(0x0519));
    assert!(!coordinator.state().radio_suppressed);

    // The name heuristic is no longer consulted
    coordinator.wired_attached(WiredAccessory::new("b", "Printer Bluetooth"));
    assert!(coordinator.state().radio_suppressed);
}

#[test]
fn test_detach_without_wired_use_is_ignored() {
    let Rig {
        coordinator,
        cleanup,
        ..
    } = rig();

    coordinator.wired_detached("usb-1");
    thread::sleep(Duration::from_millis(100));
    assert_eq!(coordinator.state().state, DiscoveryState::Idle);
    assert_eq!(cleanup.calls(), 0);
}

#[test]
fn test_attach_during_bluetooth_scan_ends_the_wait() {
    init_logger();
    let bluetooth = FakeScanner::new(ScanTarget::Bluetooth, vec![Script::Hang]);
    let coordinator = CoordinatorBuilder::new()
        .config(fast_config())
        .scanner(bluetooth)
        .build()
        .unwrap();

    thread::scope(|s| {
        let scan = s.spawn(|| {
            let started = Instant::now();
            let devices = coordinator.discover_bluetooth(Duration::from_secs(10));
            (devices, started.elapsed())
        });
        wait_for_state(&coordinator, Duration::from_secs(2), |s| {
            s.state == DiscoveryState::ScanningBluetooth
        });

        coordinator.wired_attached(WiredAccessory::new("usb-1", "TM-T20III"));
        let (devices, elapsed) = scan.join().unwrap();
        assert!(devices.is_empty());
        assert!(elapsed < Duration::from_secs(2));
    });
    assert_eq!(coordinator.state().state, DiscoveryState::Idle);
}

#[test]
fn test_detach_cancels_running_discovery() {
    init_logger();
    let lan = FakeScanner::new(ScanTarget::Lan, vec![Script::Hang]);
    let coordinator = CoordinatorBuilder::new()
        .config(fast_config().with_cooldown(Duration::from_secs(2)))
        .scanner(lan)
        .build()
        .unwrap();
    coordinator.wired_attached(WiredAccessory::new("usb-1", "TM-T20III"));

    thread::scope(|s| {
        let scan =
            s.spawn(|| coordinator.try_discover(DiscoveryRequest::Lan(Duration::from_secs(10))));
        wait_for_state(&coordinator, Duration::from_secs(2), |s| {
            s.state == DiscoveryState::ScanningLan
        });

        coordinator.wired_detached("usb-1");
        assert!(matches!(
            scan.join().unwrap(),
            Err(Error::DiscoveryRefused(RefusalReason::CleaningUp))
        ));
    });
    assert!(coordinator.state().state.is_wired_recovery());
}

#[test]
fn test_abort_ends_recovery_but_keeps_suppression() {
    init_logger();
    let coordinator = CoordinatorBuilder::new()
        .config(
            fast_config()
                .with_cleanup_grace(Duration::from_secs(5))
                .with_cooldown(Duration::from_secs(10)),
        )
        .build()
        .unwrap();

    coordinator.wired_attached(WiredAccessory::new("usb-1", "TM-T20III"));
    coordinator.wired_detached("usb-1");
    assert_eq!(coordinator.state().state, DiscoveryState::CleaningUp);

    coordinator.abort();
    let status = coordinator.state();
    assert_eq!(status.state, DiscoveryState::Idle);
    assert!(status.radio_suppressed);
    assert!(!status.pending_work_queued);

    coordinator.reset_radio_suppression();
    assert!(!coordinator.state().radio_suppressed);
}

#[test]
fn test_hotplug_sink_from_platform_thread() {
    let Rig { coordinator, .. } = rig();
    let sink = coordinator.hotplug_sink();

    thread::spawn(move || sink.attached(WiredAccessory::new("usb-9", "TM-T88VII")))
        .join()
        .unwrap();

    let status = wait_for_state(&coordinator, Duration::from_secs(1), |s| s.radio_suppressed);
    assert!(status.radio_suppressed);
}

// =============================================================================
// USB diagnostics
// =============================================================================

#[test]
fn test_usb_diagnostics_reports_accessories_and_scan() {
    init_logger();
    let usb = FakeScanner::reporting(
        ScanTarget::Usb,
        vec![FoundDevice::new("USB:").with_name("TSP143IIIU")],
    );
    let coordinator = CoordinatorBuilder::new()
        .config(fast_config())
        .scanner(usb.clone())
        .build()
        .unwrap();

    coordinator.wired_attached(WiredAccessory::new("usb-2", "TSP143IIIU").with_vendor_id(0x0519));
    coordinator.wired_attached(WiredAccessory::new("usb-1", "USB hub").with_vendor_id(0x05e3));
    coordinator.wired_attached(WiredAccessory::new("ea-1", "TM-m30II-BT"));

    let report = coordinator.usb_diagnostics();
    let ids: Vec<&str> = report.attached.iter().map(|a| a.id.as_str()).collect();
    assert_eq!(ids, vec!["usb-1", "usb-2"]);
    assert_eq!(report.vendor_matches, 1);
    assert_eq!(report.discovered.len(), 1);
    assert_eq!(report.discovered[0].composite(), "USB::TSP143IIIU");
    assert_eq!(report.discovery_error, None);
    assert_eq!(usb.starts(), 1);

    coordinator.wired_detached("usb-1");
    let remaining: Vec<String> = coordinator
        .attached_accessories()
        .into_iter()
        .map(|a| a.id)
        .collect();
    assert_eq!(remaining, vec!["usb-2".to_string()]);
}

#[test]
fn test_usb_diagnostics_during_recovery_reports_refusal() {
    let Rig { coordinator, .. } = rig_with(fast_config().with_cooldown(Duration::from_secs(2)));
    coordinator.wired_attached(WiredAccessory::new("usb-1", "TM-T20III").with_vendor_id(0x04b8));
    coordinator.wired_detached("usb-1");

    let report = coordinator.usb_diagnostics();
    assert!(report.attached.is_empty());
    assert_eq!(report.vendor_matches, 0);
    assert!(report.discovered.is_empty());
    assert!(report.discovery_error.is_some());
}
