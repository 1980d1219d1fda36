//! Raw TCP printer connector.
//!
//! Most LAN receipt printers accept ESC/POS on a plain TCP socket (port 9100,
//! "raw" or "JetDirect" printing). This connector opens that socket directly,
//! so the crate can print without a vendor SDK.

use std::io::{self, Read, Write};
use std::net::{IpAddr, Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use socket2::{Domain, Protocol, SockAddr, Socket, Type};

use crate::connection::{Connector, PrinterLink};
use crate::error::LinkError;
use crate::types::{normalize_hardware_key, PrinterStatus, Target, Transport};

/// Default raw printing port.
pub const RAW_PRINT_PORT: u16 = 9100;

/// Real-time status request, printer status (`DLE EOT 1`).
const STATUS_REQUEST: [u8; 3] = [0x10, 0x04, 0x01];

/// Status byte bit set while the printer is offline.
const STATUS_OFFLINE: u8 = 0x08;

/// Connector for `TCP:` targets addressed by IP or hostname.
///
/// Identifiers may carry a port (`"10.0.0.5:9101"`, `"[fe80::1]:9100"`);
/// otherwise [`RAW_PRINT_PORT`] is used. MAC-only identifiers cannot be
/// resolved without a vendor SDK and fail to open.
#[derive(Debug, Clone)]
pub struct RawTcpConnector {
    port: u16,
    io_timeout: Duration,
}

impl Default for RawTcpConnector {
    fn default() -> Self {
        Self {
            port: RAW_PRINT_PORT,
            io_timeout: Duration::from_secs(10),
        }
    }
}

impl RawTcpConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the port used when the identifier has none (builder pattern).
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the read/write timeout on open sockets (builder pattern).
    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }

    fn resolve(&self, identifier: &str) -> Result<SocketAddr, LinkError> {
        if normalize_hardware_key(identifier).is_some() {
            return Err(LinkError::Open(format!(
                "{identifier} is a hardware address; raw TCP needs an IP or hostname"
            )));
        }
        if let Ok(addr) = identifier.parse::<SocketAddr>() {
            return Ok(addr);
        }
        if let Ok(ip) = identifier.parse::<IpAddr>() {
            return Ok(SocketAddr::new(ip, self.port));
        }

        let resolved = match identifier.rsplit_once(':') {
            Some((_, port)) if port.parse::<u16>().is_ok() => identifier.to_socket_addrs(),
            _ => (identifier, self.port).to_socket_addrs(),
        };
        resolved?
            .next()
            .ok_or_else(|| LinkError::Open(format!("{identifier} did not resolve")))
    }

    fn connect(&self, addr: SocketAddr, timeout: Duration) -> io::Result<TcpStream> {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_nodelay(true)?;
        socket.set_keepalive(true)?;
        socket.connect_timeout(&SockAddr::from(addr), timeout)?;
        socket.set_write_timeout(Some(self.io_timeout))?;
        socket.set_read_timeout(Some(self.io_timeout))?;
        Ok(TcpStream::from(socket))
    }
}

impl Connector for RawTcpConnector {
    fn supports(&self, transport: Transport) -> bool {
        transport == Transport::Tcp
    }

    fn open(&self, target: &Target, timeout: Duration) -> Result<Box<dyn PrinterLink>, LinkError> {
        let addr = self.resolve(&target.identifier)?;
        log::debug!("connection: raw tcp connect to {}", addr);
        let stream = self.connect(addr, timeout).map_err(|e| match e.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => LinkError::Timeout,
            _ => LinkError::Open(format!("{addr}: {e}")),
        })?;
        Ok(Box::new(RawTcpLink { stream, addr }))
    }
}

/// An open raw TCP printer socket.
#[derive(Debug)]
pub struct RawTcpLink {
    stream: TcpStream,
    addr: SocketAddr,
}

fn write_error(e: io::Error) -> LinkError {
    match e.kind() {
        io::ErrorKind::BrokenPipe
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::UnexpectedEof => LinkError::Closed,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => LinkError::Timeout,
        _ => LinkError::Io(e),
    }
}

impl PrinterLink for RawTcpLink {
    fn write(&mut self, data: &[u8]) -> Result<(), LinkError> {
        self.stream.write_all(data).map_err(write_error)?;
        self.stream.flush().map_err(write_error)
    }

    fn status(&mut self) -> Result<PrinterStatus, LinkError> {
        self.write(&STATUS_REQUEST)?;
        let mut byte = [0u8; 1];
        match self.stream.read(&mut byte) {
            Ok(0) => Err(LinkError::Closed),
            Ok(_) => {
                let online = byte[0] & STATUS_OFFLINE == 0;
                Ok(PrinterStatus {
                    online,
                    detail: if online { "OK" } else { "offline" }.to_string(),
                })
            }
            Err(e) => Err(write_error(e)),
        }
    }

    fn close(&mut self) -> Result<(), LinkError> {
        log::debug!("connection: closing raw tcp link to {}", self.addr);
        match self.stream.shutdown(Shutdown::Both) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(LinkError::Io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn test_resolve_forms() {
        let connector = RawTcpConnector::new();
        assert_eq!(
            connector.resolve("10.0.0.5").unwrap(),
            "10.0.0.5:9100".parse().unwrap()
        );
        assert_eq!(
            connector.resolve("10.0.0.5:9101").unwrap(),
            "10.0.0.5:9101".parse().unwrap()
        );
        assert_eq!(
            connector.with_port(515).resolve("::1").unwrap(),
            "[::1]:515".parse().unwrap()
        );
    }

    #[test]
    fn test_mac_identifier_cannot_open() {
        let err = RawTcpConnector::new()
            .resolve("AA:BB:CC:DD:EE:01")
            .unwrap_err();
        assert!(matches!(err, LinkError::Open(_)));
    }

    #[test]
    fn test_only_plain_tcp_supported() {
        let connector = RawTcpConnector::new();
        assert!(connector.supports(Transport::Tcp));
        assert!(!connector.supports(Transport::Tcps));
        assert!(!connector.supports(Transport::Bluetooth));
    }

    #[test]
    fn test_write_and_status_against_local_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            let mut received = [0u8; 5];
            conn.read_exact(&mut received).unwrap();
            let mut request = [0u8; 3];
            conn.read_exact(&mut request).unwrap();
            assert_eq!(request, STATUS_REQUEST);
            conn.write_all(&[0x12]).unwrap();
            received
        });

        let target = Target::new(Transport::Tcp, addr.to_string());
        let mut link = RawTcpConnector::new()
            .open(&target, Duration::from_secs(2))
            .unwrap();
        link.write(b"hello").unwrap();
        let status = link.status().unwrap();
        assert!(status.online);
        link.close().unwrap();

        assert_eq!(&server.join().unwrap(), b"hello");
    }

    #[test]
    fn test_refused_connection_is_open_error() {
        // Bind then drop to get a port with nothing listening.
        let port = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let target = Target::new(Transport::Tcp, format!("127.0.0.1:{port}"));
        let result = RawTcpConnector::new().open(&target, Duration::from_secs(1));
        assert!(result.is_err());
    }
}
