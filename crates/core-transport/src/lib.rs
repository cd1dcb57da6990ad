//! core-transport: byte transports underneath the packet codecs.
//!
//! Every device family speaks its protocol over one of three media —
//! serial, USB bulk endpoints, or a Bluetooth RFCOMM channel. Drivers see
//! only the [`Transport`] trait: bounded reads with an initial and a
//! subsequent timeout, writes, and an input-readiness poll. The two-timeout
//! read is the load-bearing part of the contract: it is the only way a
//! codec can distinguish "partial frame still arriving" from "idle line".
//!
//! Failure taxonomy: everything collapses to transient-empty (a read
//! returning 0), [`TransportError::Busy`] (retry next tick), or
//! [`TransportError::Disconnected`] (driver must be torn down). There are
//! no other observable failure modes.

use std::fmt;
use std::time::Duration;

pub mod mock;
pub mod rfcomm;
pub mod serial;
pub mod usb;

pub use mock::{MockTransport, SharedMockTransport};
pub use rfcomm::RfcommTransport;
pub use serial::SerialTransport;
pub use usb::{UsbChannelDefinition, UsbTransport};

/// Timeout between consecutive bytes of one frame, and the default
/// first-byte timeout for blocking reads.
pub const SUBSEQUENT_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The device or host stack refused the operation for now.
    #[error("transport busy: {0}")]
    Busy(String),
    /// The endpoint is gone; the driver must be reconstructed.
    #[error("transport disconnected: {0}")]
    Disconnected(String),
    /// The operation makes no sense on this medium.
    #[error("unsupported on this transport: {0}")]
    Unsupported(&'static str),
    /// The endpoint string could not be understood or opened.
    #[error("cannot open endpoint {0}: {1}")]
    Open(String, String),
}

pub type TransportResult<T> = Result<T, TransportError>;

/// A bidirectional byte stream with bounded waits.
pub trait Transport {
    /// Wait up to `timeout` for input to become readable.
    fn await_input(&mut self, timeout: Duration) -> TransportResult<bool>;

    /// Read up to `buffer.len()` bytes. When `block_first` the first byte
    /// is awaited for [`SUBSEQUENT_TIMEOUT`], otherwise only already
    /// buffered data is returned; subsequent bytes always get the
    /// inter-byte timeout. `Ok(0)` means no data (transient empty).
    fn read(&mut self, buffer: &mut [u8], block_first: bool) -> TransportResult<usize>;

    /// Write the whole buffer, returning the byte count.
    fn write(&mut self, bytes: &[u8]) -> TransportResult<usize>;

    /// Drop any pending input.
    fn discard_input(&mut self) -> TransportResult<()> {
        let mut sink = [0u8; 64];
        while self.read(&mut sink, false)? > 0 {}
        Ok(())
    }

    /// Change the line speed, where the medium has one. Returns `false`
    /// when speeds do not apply (USB, RFCOMM), so baud-cycling probes can
    /// run once and stop.
    fn set_baud(&mut self, _baud: u32) -> TransportResult<bool> {
        Ok(false)
    }

    /// Milliseconds the medium needs to move `count` bytes; drivers
    /// accumulate this into the display's write delay.
    fn transfer_millis(&self, count: usize) -> u64 {
        (count as u64 / 16) + 1
    }
}

/// A parsed device endpoint string.
///
/// Accepted forms: `serial:/dev/ttyUSB0` (or a bare path starting with
/// `/`), `usb:` (first matching device) or `usb:SERIAL`, and
/// `bluetooth:AA:BB:CC:DD:EE:FF`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Serial { path: String },
    Usb { serial_number: Option<String> },
    Bluetooth { address: [u8; 6] },
}

impl Endpoint {
    pub fn parse(spec: &str) -> TransportResult<Self> {
        if let Some(path) = spec.strip_prefix("serial:") {
            return Ok(Endpoint::Serial { path: path.into() });
        }
        if spec.starts_with('/') {
            return Ok(Endpoint::Serial { path: spec.into() });
        }
        if let Some(rest) = spec.strip_prefix("usb:") {
            return Ok(Endpoint::Usb {
                serial_number: if rest.is_empty() {
                    None
                } else {
                    Some(rest.into())
                },
            });
        }
        if let Some(rest) = spec.strip_prefix("bluetooth:") {
            return Ok(Endpoint::Bluetooth {
                address: parse_bdaddr(rest)
                    .ok_or_else(|| TransportError::Open(spec.into(), "bad address".into()))?,
            });
        }
        Err(TransportError::Open(
            spec.into(),
            "unknown endpoint scheme".into(),
        ))
    }

    pub fn is_serial(&self) -> bool {
        matches!(self, Endpoint::Serial { .. })
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Serial { path } => write!(f, "serial:{path}"),
            Endpoint::Usb { serial_number: Some(s) } => write!(f, "usb:{s}"),
            Endpoint::Usb { serial_number: None } => write!(f, "usb:"),
            Endpoint::Bluetooth { address } => {
                // Stored little-endian; display big-endian.
                let a = address;
                write!(
                    f,
                    "bluetooth:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
                    a[5], a[4], a[3], a[2], a[1], a[0]
                )
            }
        }
    }
}

/// Parse `AA:BB:CC:DD:EE:FF` into wire (little-endian) byte order.
fn parse_bdaddr(text: &str) -> Option<[u8; 6]> {
    let mut bytes = [0u8; 6];
    let mut count = 0;
    for part in text.split(':') {
        if count == 6 || part.len() != 2 {
            return None;
        }
        // Address strings are big-endian; the socket wants the reverse.
        bytes[5 - count] = u8::from_str_radix(part, 16).ok()?;
        count += 1;
    }
    (count == 6).then_some(bytes)
}

/// Hex-dump helper for packet logging.
pub fn log_bytes(label: &str, bytes: &[u8]) {
    if tracing::enabled!(tracing::Level::TRACE) {
        let dump: String = bytes
            .iter()
            .map(|b| format!("{b:02X} "))
            .collect::<String>()
            .trim_end()
            .to_string();
        tracing::trace!(target: "transport.io", "{label}: [{dump}]");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_serial_specs() {
        assert_eq!(
            Endpoint::parse("serial:/dev/ttyS0").unwrap(),
            Endpoint::Serial {
                path: "/dev/ttyS0".into()
            }
        );
        assert_eq!(
            Endpoint::parse("/dev/ttyUSB1").unwrap(),
            Endpoint::Serial {
                path: "/dev/ttyUSB1".into()
            }
        );
    }

    #[test]
    fn parses_usb_specs() {
        assert_eq!(
            Endpoint::parse("usb:").unwrap(),
            Endpoint::Usb {
                serial_number: None
            }
        );
        assert_eq!(
            Endpoint::parse("usb:XY123").unwrap(),
            Endpoint::Usb {
                serial_number: Some("XY123".into())
            }
        );
    }

    #[test]
    fn parses_and_reverses_bluetooth_address() {
        let ep = Endpoint::parse("bluetooth:01:23:45:67:89:AB").unwrap();
        assert_eq!(
            ep,
            Endpoint::Bluetooth {
                address: [0xAB, 0x89, 0x67, 0x45, 0x23, 0x01]
            }
        );
        assert_eq!(ep.to_string(), "bluetooth:01:23:45:67:89:AB");
    }

    #[test]
    fn rejects_garbage() {
        assert!(Endpoint::parse("midi:thing").is_err());
        assert!(Endpoint::parse("bluetooth:nope").is_err());
    }
}
