//! Byte-stuffed framing ("protocol B", Vario family).
//!
//! A frame is `ESC`, a type byte, then a type-determined number of payload
//! bytes; an `ESC` inside the body is transmitted doubled. One type
//! (routing keys) has a length that depends on the negotiated cell count,
//! which is why the codec carries that one piece of state.
//!
//! Decoder discipline, matching the device's quirks:
//! * a lone byte outside a frame is discarded (logged);
//! * a fresh `ESC` in the middle of a frame abandons it ("short packet")
//!   and starts over;
//! * line idle in the middle of a frame abandons it ("partial packet").

use core_transport::{Transport, TransportResult, log_bytes};

use crate::ascii::ESC;

/// Host-to-device request codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Request {
    DisplayData = 0x01,
    DeviceIdentity = 0x84,
}

/// Device-to-host response codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Response {
    CellCount = 0x01,
    VersionNumber = 0x05,
    ModeSetting = 0x11,
    CommunicationChannel = 0x16,
    RoutingKeys = 0x22,
    TopKeys = 0x24,
    ErrorCode = 0x40,
    DeviceIdentity = 0x84,
    SerialNumber = 0x8A,
    BluetoothName = 0x8C,
}

pub const DEVICE_IDENTITY_LENGTH: usize = 16;
pub const SERIAL_NUMBER_LENGTH: usize = 8;
pub const BLUETOOTH_NAME_LENGTH: usize = 14;

/// Largest frame body the protocol can produce (device identity).
pub const MAX_PACKET: usize = 1 + DEVICE_IDENTITY_LENGTH;

/// One decoded frame: type byte followed by its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Packet {
    bytes: [u8; MAX_PACKET],
    length: usize,
}

impl Packet {
    pub fn code(&self) -> u8 {
        self.bytes[0]
    }

    pub fn payload(&self) -> &[u8] {
        &self.bytes[1..self.length]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.length]
    }
}

/// Codec for one endpoint. Holds only the negotiated cell count (which
/// selects the routing-key frame length).
#[derive(Debug, Clone)]
pub struct VarioCodec {
    cell_count: u8,
}

impl Default for VarioCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl VarioCodec {
    pub fn new() -> Self {
        Self { cell_count: 0 }
    }

    pub fn set_cell_count(&mut self, cells: u8) {
        self.cell_count = cells;
    }

    /// Total frame length (type byte included), or `None` for
    /// unrecognised types.
    fn packet_length(&self, code: u8) -> Option<usize> {
        Some(match code {
            c if c == Response::CellCount as u8 => 2,
            c if c == Response::VersionNumber as u8 => 2,
            c if c == Response::ModeSetting as u8 => 3,
            c if c == Response::CommunicationChannel as u8 => 2,
            c if c == Response::RoutingKeys as u8 => {
                if self.cell_count > 40 {
                    11
                } else {
                    6
                }
            }
            c if c == Response::TopKeys as u8 => 2,
            c if c == Response::ErrorCode as u8 => 2,
            c if c == Response::DeviceIdentity as u8 => 17,
            c if c == Response::SerialNumber as u8 => 9,
            c if c == Response::BluetoothName as u8 => 15,
            _ => return None,
        })
    }

    /// Pull one frame off the transport. `Ok(None)` means the line is idle
    /// (or a partial frame was abandoned); errors are fatal transport
    /// failures only.
    pub fn read_packet(&mut self, io: &mut dyn Transport) -> TransportResult<Option<Packet>> {
        let mut packet = Packet {
            bytes: [0; MAX_PACKET],
            length: 0,
        };
        let mut started = false;
        let mut escape = false;
        let mut offset = 0usize;
        let mut length = 0usize;

        loop {
            let mut byte = [0u8; 1];
            if io.read(&mut byte, started)? == 0 {
                if offset > 0 {
                    log_bytes("vario partial packet", &packet.bytes[..offset]);
                    tracing::debug!(target: "proto.vario", offset, "partial packet dropped");
                }
                return Ok(None);
            }
            let byte = byte[0];

            if byte == ESC {
                escape = !escape;
                if escape {
                    continue;
                }
                // Doubled escape: fall through with ESC as a data byte.
            } else if escape {
                escape = false;
                if offset > 0 {
                    log_bytes("vario short packet", &packet.bytes[..offset]);
                    tracing::debug!(target: "proto.vario", offset, "short packet restarted");
                    offset = 0;
                } else {
                    started = true;
                }
            }

            if !started {
                tracing::debug!(target: "proto.vario", byte = format_args!("{byte:02X}"), "discarded");
                continue;
            }

            if offset == 0 {
                match self.packet_length(byte) {
                    Some(total) => length = total,
                    None => {
                        tracing::debug!(
                            target: "proto.vario",
                            code = format_args!("{byte:02X}"),
                            "unknown packet type"
                        );
                        started = false;
                        continue;
                    }
                }
            }

            packet.bytes[offset] = byte;
            offset += 1;
            if offset == length {
                packet.length = length;
                log_bytes("vario input packet", packet.as_bytes());
                return Ok(Some(packet));
            }
        }
    }

    /// Frame and send one payload (type byte first), doubling escapes.
    pub fn write_packet(io: &mut dyn Transport, payload: &[u8]) -> TransportResult<()> {
        let mut buffer = Vec::with_capacity(1 + payload.len() * 2);
        buffer.push(ESC);
        for &byte in payload {
            buffer.push(byte);
            if byte == ESC {
                buffer.push(ESC);
            }
        }
        log_bytes("vario output packet", &buffer);
        io.write(&buffer)?;
        Ok(())
    }
}
