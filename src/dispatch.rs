//! Method-call request surface.
//!
//! Maps a method name plus a JSON argument object onto one
//! [`PrinterCoordinator`] operation and renders the outcome as JSON. This is
//! the shape a plugin bridge or RPC layer hands over:
//!
//! ```no_run
//! # use printer_link::{dispatch, PrinterCoordinator};
//! # use serde_json::json;
//! # let coordinator = PrinterCoordinator::builder().build().unwrap();
//! let devices = dispatch::dispatch(&coordinator, "discoverLan", &json!({ "timeoutMs": 3000 }));
//! ```
//!
//! Discovered devices are returned as composite strings
//! (`"TCP:10.0.0.5:TM-T88VII"`). Failures become an [`ErrorReply`] carrying
//! the stable code from [`Error::code`].

use std::fmt;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::coordinator::PrinterCoordinator;
use crate::error::Error;
use crate::hotplug::UsbDiagnostics;
use crate::types::{DeviceRecord, DiscoveryStatus, Target};

/// Error half of a dispatch reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReply {
    pub code: String,
    pub message: String,
}

impl From<Error> for ErrorReply {
    fn from(e: Error) -> Self {
        Self {
            code: e.code().to_string(),
            message: e.to_string(),
        }
    }
}

impl fmt::Display for ErrorReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ErrorReply {}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TimeoutArgs {
    timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectArgs {
    identifier: String,
    #[serde(default, alias = "hint", alias = "portType")]
    transport_hint: Option<HintArg>,
    timeout_ms: Option<u64>,
}

/// Transport hints arrive as names (`"lan"`) or numeric port types (`1`).
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum HintArg {
    Name(String),
    Number(u64),
}

impl HintArg {
    fn into_string(self) -> String {
        match self {
            HintArg::Name(name) => name,
            HintArg::Number(n) => n.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SendArgs {
    commands: Vec<CommandBuffer>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CommandBuffer {
    Bytes(Vec<u8>),
    Text(String),
}

impl CommandBuffer {
    fn into_bytes(self) -> Vec<u8> {
        match self {
            CommandBuffer::Bytes(bytes) => bytes,
            CommandBuffer::Text(text) => text.into_bytes(),
        }
    }
}

fn parse_args<T: DeserializeOwned>(method: &str, args: &Value) -> Result<T, Error> {
    let args = match args {
        Value::Null => Value::Object(Map::new()),
        other => other.clone(),
    };
    serde_json::from_value(args)
        .map_err(|e| Error::invalid_arguments(format!("{method}: {e}")))
}

fn timeout_arg(method: &str, args: &Value, default: Duration) -> Result<Duration, Error> {
    let parsed: TimeoutArgs = parse_args(method, args)?;
    match parsed.timeout_ms {
        Some(0) => Err(Error::invalid_arguments(format!(
            "{method}: timeoutMs must be positive"
        ))),
        Some(ms) => Ok(Duration::from_millis(ms)),
        None => Ok(default),
    }
}

fn composites(records: Vec<DeviceRecord>) -> Value {
    Value::Array(
        records
            .iter()
            .map(|record| Value::String(record.composite()))
            .collect(),
    )
}

/// JSON form of a discovery snapshot.
pub fn discovery_state_value(status: &DiscoveryStatus) -> Value {
    json!({
        "state": status.state.as_str(),
        "sessionId": status.session_id,
        "radioSuppressed": status.radio_suppressed,
        "pendingWorkQueued": status.pending_work_queued,
        "lastRefusal": status.last_refusal.map(|r| r.as_str()),
    })
}

/// JSON form of a pairing outcome. `resultCode` is 0 when a printer was picked.
pub fn pairing_value(target: Option<&Target>) -> Value {
    let result_code = if target.is_some() { 0 } else { -1 };
    json!({
        "target": target.map(Target::to_string),
        "resultCode": result_code,
    })
}

/// JSON form of a USB diagnostics report.
pub fn usb_diagnostics_value(report: &UsbDiagnostics) -> Value {
    let attached: Vec<Value> = report
        .attached
        .iter()
        .map(|accessory| {
            json!({
                "id": accessory.id,
                "name": accessory.name,
                "vendorId": accessory.vendor_id,
            })
        })
        .collect();
    json!({
        "attachedDevices": attached,
        "vendorMatches": report.vendor_matches,
        "printersDiscovered": report.discovered.len(),
        "printers": report
            .discovered
            .iter()
            .map(DeviceRecord::composite)
            .collect::<Vec<_>>(),
        "discoveryError": report.discovery_error,
    })
}

/// Run `method` against `coordinator`.
///
/// Methods without a result answer `null`.
pub fn dispatch(
    coordinator: &PrinterCoordinator,
    method: &str,
    args: &Value,
) -> Result<Value, ErrorReply> {
    log::debug!("dispatch: {}", method);
    call(coordinator, method, args).map_err(ErrorReply::from)
}

fn call(coordinator: &PrinterCoordinator, method: &str, args: &Value) -> Result<Value, Error> {
    let config = coordinator.config();
    match method {
        "discoverLan" => {
            let timeout = timeout_arg(method, args, config.lan_timeout)?;
            Ok(composites(coordinator.discover_lan(timeout)))
        }
        "discoverBluetooth" => {
            let timeout = timeout_arg(method, args, config.bluetooth_timeout)?;
            Ok(composites(coordinator.discover_bluetooth(timeout)))
        }
        "discoverUsb" => Ok(composites(coordinator.discover_usb())),
        "discoverAll" => {
            let timeout = timeout_arg(method, args, config.combined_timeout)?;
            Ok(composites(coordinator.discover_all(timeout)))
        }
        "connect" => {
            let parsed: ConnectArgs = parse_args(method, args)?;
            let hint = parsed.transport_hint.map(HintArg::into_string);
            let timeout = match parsed.timeout_ms {
                Some(0) => {
                    return Err(Error::invalid_arguments(
                        "connect: timeoutMs must be positive",
                    ))
                }
                Some(ms) => Some(Duration::from_millis(ms)),
                None => None,
            };
            coordinator.connect(&parsed.identifier, hint.as_deref(), timeout)?;
            Ok(Value::Null)
        }
        "disconnect" => {
            coordinator.disconnect();
            Ok(Value::Null)
        }
        "isConnected" => Ok(Value::Bool(coordinator.is_connected())),
        "send" => {
            let parsed: SendArgs = parse_args(method, args)?;
            let buffers = parsed
                .commands
                .into_iter()
                .map(CommandBuffer::into_bytes)
                .collect();
            coordinator.send_all(buffers)?;
            Ok(Value::Null)
        }
        "getStatus" => {
            let status = coordinator.status()?;
            Ok(json!({ "online": status.online, "detail": status.detail }))
        }
        "openCashDrawer" => {
            coordinator.open_cash_drawer()?;
            Ok(Value::Null)
        }
        "getDiscoveryState" => Ok(discovery_state_value(&coordinator.state())),
        "abortDiscovery" => {
            coordinator.abort();
            Ok(Value::Null)
        }
        "resetRadioSuppression" => {
            coordinator.reset_radio_suppression();
            Ok(Value::Null)
        }
        "pairBluetoothDevice" => {
            let target = coordinator.pair_bluetooth()?;
            Ok(pairing_value(target.as_ref()))
        }
        "usbDiagnostics" => Ok(usb_diagnostics_value(&coordinator.usb_diagnostics())),
        other => Err(Error::NotImplemented(other.to_string())),
    }
}
