//! Length-prefixed framing ("protocol A", Terminal family).
//!
//! Revision 1 frames are binary: `STX`, an id byte (`'S'` host→device
//! write, `'I'` identity, `'K'` key event), big-endian address and length
//! words, payload, `ETX`. The length counts the whole frame including the
//! framing bytes. An error report replaces the address/length words with a
//! single code byte.
//!
//! Revision 2 frames are nibble-armoured: `STX`, `0x40|command`,
//! `0x50|len-hi-nibble`, `0x50|len-lo-nibble`, payload as `0x30|nibble`
//! pairs (identity payloads are sent raw), `ETX`.

use core_transport::{Transport, TransportResult, log_bytes};

use crate::ascii::{ETX, STX};

pub const ID_SEND: u8 = b'S';
pub const ID_IDENTIFY: u8 = b'I';
pub const ID_RECEIVE: u8 = b'K';

/// Total length of a revision-1 identity frame.
pub const IDENTITY_LENGTH: usize = 10;

/// Transmit-space addresses (what the host writes into the device).
pub mod xmt {
    /// Cells for the braille display.
    pub const BRAILLE_DATA: u16 = 0x0000;
    /// Per-cell write mode: 0 = translate via the device table, 1 = raw.
    pub const BRAILLE_WRITE: u16 = 0x0200;
}

/// Receive-space key code bases (what key events report).
pub mod rcv {
    /// Physical and logical function keys.
    pub const KEY_FUNC: u16 = 0x0000;
    /// Routing keys.
    pub const KEY_ROUTE: u16 = 0x0300;
}

/// One decoded revision-1 frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet1 {
    Identity {
        id: u8,
        major: u8,
        minor: u8,
    },
    Key {
        code: u16,
        pressed: bool,
        time: u16,
    },
    /// Device-side complaint about something we wrote.
    Error {
        code: u8,
    },
}

/// Human text for the device error codes.
pub fn error_message(code: u8) -> &'static str {
    match code {
        0x03 => "missing identification byte",
        0x04 => "data too long",
        0x05 => "data starts beyond end of structure",
        0x06 => "data extends beyond end of structure",
        0x07 => "data framing error",
        _ => "unknown device error",
    }
}

/// Build the deliberately malformed write (zero length word) whose
/// rejection provokes a revision-1 device into identifying itself.
pub const BAD_PACKET: [u8; 7] = [STX, ID_SEND, 0, 0, 0, 0, ETX];

/// The reset sequence sent after corrupt input.
pub const RESET_SEQUENCE: [u8; 3] = [STX, 0x01, ETX];

fn read_exact(
    io: &mut dyn Transport,
    buffer: &mut [u8],
    offset: &mut usize,
    count: usize,
) -> TransportResult<bool> {
    let end = *offset + count;
    while *offset < end {
        let block = *offset > 0;
        let got = io.read(&mut buffer[*offset..end], block)?;
        if got == 0 {
            if *offset > 0 {
                log_bytes("terminal partial packet", &buffer[..*offset]);
            }
            return Ok(false);
        }
        *offset += got;
    }
    Ok(true)
}

/// Revision-1 codec.
#[derive(Debug, Default, Clone)]
pub struct Terminal1Codec;

impl Terminal1Codec {
    /// Write `data` at transmit address `address`.
    pub fn write_packet(
        io: &mut dyn Transport,
        address: u16,
        data: &[u8],
    ) -> TransportResult<()> {
        if data.is_empty() {
            return Ok(());
        }
        let size = 6 + data.len() + 1;
        let mut buffer = Vec::with_capacity(size);
        buffer.push(STX);
        buffer.push(ID_SEND);
        buffer.push((address >> 8) as u8);
        buffer.push((address & 0xFF) as u8);
        buffer.push((size >> 8) as u8);
        buffer.push((size & 0xFF) as u8);
        buffer.extend_from_slice(data);
        buffer.push(ETX);
        log_bytes("terminal output packet", &buffer);
        io.write(&buffer)?;
        Ok(())
    }

    /// Send the reset sequence after corrupt input.
    pub fn send_reset(io: &mut dyn Transport) -> TransportResult<()> {
        tracing::warn!(target: "proto.terminal", "resetting terminal");
        io.discard_input()?;
        io.write(&RESET_SEQUENCE)?;
        Ok(())
    }

    /// Pull one frame. `Ok(None)` means idle line or a dropped corrupt
    /// frame (after which the reset sequence has been sent).
    pub fn read_packet(io: &mut dyn Transport) -> TransportResult<Option<Packet1>> {
        let mut buffer = [0u8; 0x100];
        let mut offset = 0usize;

        // Hunt for STX.
        loop {
            if !read_exact(io, &mut buffer, &mut offset, 1)? {
                return Ok(None);
            }
            if buffer[offset - 1] == STX {
                break;
            }
            tracing::debug!(
                target: "proto.terminal",
                byte = format_args!("{:02X}", buffer[offset - 1]),
                "ignored byte"
            );
            offset = 0;
        }
        // Keep the STX at index 0.
        buffer[0] = STX;
        offset = 1;

        if !read_exact(io, &mut buffer, &mut offset, 1)? {
            Self::send_reset(io)?;
            return Ok(None);
        }

        match buffer[1] {
            ID_IDENTIFY => {
                if !read_exact(io, &mut buffer, &mut offset, IDENTITY_LENGTH - 2)? {
                    Self::send_reset(io)?;
                    return Ok(None);
                }
                if buffer[IDENTITY_LENGTH - 1] != ETX {
                    log_bytes("terminal corrupt packet", &buffer[..IDENTITY_LENGTH]);
                    Self::send_reset(io)?;
                    return Ok(None);
                }
                log_bytes("terminal input packet", &buffer[..IDENTITY_LENGTH]);
                Ok(Some(Packet1::Identity {
                    id: buffer[2],
                    major: buffer[3],
                    minor: buffer[4] * 10 + buffer[5],
                }))
            }

            ID_RECEIVE => {
                if !read_exact(io, &mut buffer, &mut offset, 4)? {
                    Self::send_reset(io)?;
                    return Ok(None);
                }
                let length = ((buffer[4] as usize) << 8) | buffer[5] as usize;
                if length != 10 {
                    tracing::warn!(target: "proto.terminal", length, "unexpected input packet length");
                    Self::send_reset(io)?;
                    return Ok(None);
                }
                if !read_exact(io, &mut buffer, &mut offset, length - 6)? {
                    Self::send_reset(io)?;
                    return Ok(None);
                }
                if buffer[length - 1] != ETX {
                    log_bytes("terminal corrupt packet", &buffer[..length]);
                    Self::send_reset(io)?;
                    return Ok(None);
                }
                log_bytes("terminal input packet", &buffer[..length]);
                Ok(Some(Packet1::Key {
                    code: ((buffer[2] as u16) << 8) | buffer[3] as u16,
                    pressed: buffer[6] == 1,
                    time: ((buffer[7] as u16) << 8) | buffer[8] as u16,
                }))
            }

            code @ 0x03..=0x07 => {
                if !read_exact(io, &mut buffer, &mut offset, 1)? || buffer[2] != ETX {
                    Self::send_reset(io)?;
                    return Ok(None);
                }
                tracing::warn!(
                    target: "proto.terminal",
                    code = format_args!("{code:02X}"),
                    "output packet error: {}",
                    error_message(code)
                );
                Ok(Some(Packet1::Error { code }))
            }

            other => {
                tracing::debug!(
                    target: "proto.terminal",
                    code = format_args!("{other:02X}"),
                    "unknown packet id"
                );
                io.discard_input()?;
                Ok(None)
            }
        }
    }
}

/// Largest revision-2 payload.
pub const MAX_PACKET2: usize = 0xFF;

/// One decoded revision-2 frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet2 {
    pub kind: u8,
    pub data: Vec<u8>,
}

/// Revision-2 frame kinds seen from the device.
pub mod packet2 {
    /// Identity response.
    pub const IDENTITY: u8 = 0x0A;
    /// Input-state bitmap.
    pub const KEYS: u8 = 0x0B;
    /// Braille keyboard chord.
    pub const KEYBOARD: u8 = 0x0C;
}

fn low_nibble(byte: u8) -> u8 {
    byte & 0x0F
}

/// Revision-2 codec.
#[derive(Debug, Default, Clone)]
pub struct Terminal2Codec;

impl Terminal2Codec {
    /// Write a command frame, nibble-armouring the payload.
    pub fn write_packet(io: &mut dyn Transport, command: u8, data: &[u8]) -> TransportResult<()> {
        let mut buffer = Vec::with_capacity(data.len() * 2 + 5);
        buffer.push(STX);
        buffer.push(0x40 | command);
        buffer.push(0x50 | (data.len() as u8 >> 4));
        buffer.push(0x50 | (data.len() as u8 & 0x0F));
        for &byte in data {
            buffer.push(0x30 | (byte >> 4));
            buffer.push(0x30 | (byte & 0x0F));
        }
        buffer.push(ETX);
        log_bytes("terminal2 output packet", &buffer);
        io.write(&buffer)?;
        Ok(())
    }

    /// Pull one frame off the transport, resynchronising on anything that
    /// violates the armour.
    pub fn read_packet(io: &mut dyn Transport) -> TransportResult<Option<Packet2>> {
        let mut buffer = [0u8; 0x203];
        let mut offset = 0usize;
        let mut size = 0usize;
        let mut identity = false;
        let mut kind = 0u8;
        let mut length = 0u8;
        let mut data = [0u8; MAX_PACKET2];

        loop {
            if !read_exact(io, &mut buffer, &mut offset, 1)? {
                return Ok(None);
            }
            let byte = buffer[offset - 1];
            let nibble_type = byte & 0xF0;
            let value = low_nibble(byte);

            let corrupt = match byte {
                STX => {
                    if offset > 1 {
                        log_bytes("terminal2 discarded bytes", &buffer[..offset - 1]);
                        buffer[0] = STX;
                        offset = 1;
                    }
                    continue;
                }
                ETX => {
                    if offset >= 5 && offset == size {
                        log_bytes("terminal2 input packet", &buffer[..offset]);
                        let count = length as usize;
                        return Ok(Some(Packet2 {
                            kind,
                            data: data[..count].to_vec(),
                        }));
                    }
                    log_bytes("terminal2 short packet", &buffer[..offset]);
                    offset = 0;
                    continue;
                }
                _ => match offset {
                    1 => {
                        tracing::debug!(
                            target: "proto.terminal",
                            byte = format_args!("{byte:02X}"),
                            "ignored byte"
                        );
                        offset = 0;
                        continue;
                    }
                    2 => {
                        if nibble_type == 0x40 {
                            kind = value;
                            identity = value == packet2::IDENTITY;
                            continue;
                        }
                        true
                    }
                    3 => {
                        if nibble_type == 0x50 {
                            length = value << 4;
                            continue;
                        }
                        true
                    }
                    4 => {
                        if nibble_type == 0x50 {
                            length |= value;
                            size = length as usize;
                            if !identity {
                                size *= 2;
                            }
                            size += 5;
                            continue;
                        }
                        true
                    }
                    _ => {
                        if nibble_type == 0x30 {
                            if offset == size {
                                // Data runs past the declared length.
                                true
                            } else {
                                let index = offset - 5;
                                if identity {
                                    // Identity bytes keep their armour; the
                                    // interpreter reads nibbles out of them.
                                    data[index] = byte;
                                } else {
                                    let slot = index / 2;
                                    if index % 2 == 0 {
                                        data[slot] = value << 4;
                                    } else {
                                        data[slot] |= value;
                                    }
                                }
                                continue;
                            }
                        } else {
                            true
                        }
                    }
                },
            };

            if corrupt {
                log_bytes("terminal2 corrupt packet", &buffer[..offset]);
                offset = 0;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_transport::MockTransport;

    #[test]
    fn writes_framed_payload() {
        let mut io = MockTransport::new();
        Terminal1Codec::write_packet(&mut io, xmt::BRAILLE_DATA + 5, &[0xAA, 0xBB]).unwrap();
        // size = 6 header + 2 data + 1 trailer
        assert_eq!(io.written, vec![STX, b'S', 0x00, 0x05, 0x00, 0x09, 0xAA, 0xBB, ETX]);
    }

    #[test]
    fn reads_identity_frame() {
        let mut io = MockTransport::new();
        io.push_input(&[STX, b'I', 2, 3, 4, 5, 0, 0, 0, ETX]);
        let packet = Terminal1Codec::read_packet(&mut io).unwrap().expect("frame");
        assert_eq!(
            packet,
            Packet1::Identity {
                id: 2,
                major: 3,
                minor: 45
            }
        );
    }

    #[test]
    fn reads_key_frame() {
        let mut io = MockTransport::new();
        // code 0x0303, pressed, time 0x1234; length word = 10
        io.push_input(&[STX, b'K', 0x03, 0x03, 0x00, 0x0A, 1, 0x12, 0x34, ETX]);
        let packet = Terminal1Codec::read_packet(&mut io).unwrap().expect("frame");
        assert_eq!(
            packet,
            Packet1::Key {
                code: 0x0303,
                pressed: true,
                time: 0x1234
            }
        );
    }

    #[test]
    fn error_frame_decodes() {
        let mut io = MockTransport::new();
        io.push_input(&[STX, 0x04, ETX]);
        let packet = Terminal1Codec::read_packet(&mut io).unwrap().expect("frame");
        assert_eq!(packet, Packet1::Error { code: 0x04 });
        assert_eq!(error_message(0x04), "data too long");
    }

    #[test]
    fn bad_length_resets_terminal() {
        let mut io = MockTransport::new();
        io.push_input(&[STX, b'K', 0x00, 0x00, 0x00, 0x0B, 1, 2, 3, 4, ETX]);
        assert!(Terminal1Codec::read_packet(&mut io).unwrap().is_none());
        // The reset sequence went out and pending input was flushed.
        assert_eq!(io.written, RESET_SEQUENCE.to_vec());
        assert_eq!(io.pending_input(), 0);
    }

    #[test]
    fn leading_noise_is_ignored() {
        let mut io = MockTransport::new();
        io.push_input(&[0x55, 0xAA, STX, 0x05, ETX]);
        let packet = Terminal1Codec::read_packet(&mut io).unwrap().expect("frame");
        assert_eq!(packet, Packet1::Error { code: 0x05 });
    }

    #[test]
    fn protocol2_round_trips() {
        let mut io = MockTransport::new();
        Terminal2Codec::write_packet(&mut io, 3, &[0x12, 0xAB]).unwrap();
        assert_eq!(
            io.written,
            vec![STX, 0x43, 0x50, 0x52, 0x31, 0x32, 0x3A, 0x3B, ETX]
        );

        // Feed it back as if the device had echoed a keys packet.
        let mut io = MockTransport::new();
        io.push_input(&[STX, 0x4B, 0x50, 0x52, 0x31, 0x32, 0x3A, 0x3B, ETX]);
        let packet = Terminal2Codec::read_packet(&mut io).unwrap().expect("frame");
        assert_eq!(packet.kind, packet2::KEYS);
        assert_eq!(packet.data, vec![0x12, 0xAB]);
    }

    #[test]
    fn protocol2_identity_payload_keeps_armour() {
        let mut io = MockTransport::new();
        // kind 0x0A, length 5: identity data is not nibble-paired, so the
        // frame is 5 + 5 bytes and each data byte arrives still armoured.
        io.push_input(&[STX, 0x4A, 0x50, 0x55, 0x31, 0x32, 0x33, 0x34, 0x35, ETX]);
        let packet = Terminal2Codec::read_packet(&mut io).unwrap().expect("frame");
        assert_eq!(packet.kind, packet2::IDENTITY);
        assert_eq!(packet.data, vec![0x31, 0x32, 0x33, 0x34, 0x35]);
    }

    #[test]
    fn protocol2_resyncs_on_garbage() {
        let mut io = MockTransport::new();
        io.push_input(&[
            0x99, // ignored
            STX, 0x4B, 0x50, 0x51, 0x99, // corrupt data nibble
            STX, 0x4B, 0x50, 0x51, 0x37, 0x3F, ETX, // valid single-byte frame
        ]);
        let packet = Terminal2Codec::read_packet(&mut io).unwrap().expect("frame");
        assert_eq!(packet.kind, packet2::KEYS);
        assert_eq!(packet.data, vec![0x7F]);
    }
}
