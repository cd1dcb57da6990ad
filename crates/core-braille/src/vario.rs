//! Driver for the Vario family (byte-stuffed protocol B).
//!
//! Probe: send the identity request and size the display from the model
//! string in the reply. Writes: the device takes the whole cell array in
//! one frame, so the change detector only decides whether to send at all.
//! Keys: six "top" keys and one routing key per cell; chords resolve
//! through the pressed/active latch, parameterised blocks take the routing
//! key's index as their argument.

use std::time::Duration;

use core_cmd::{BrlCmd, CmdFlags, Command, CommandContext, blk};
use smallvec::SmallVec;
use core_proto::vario::{DEVICE_IDENTITY_LENGTH, Request, Response, VarioCodec};
use core_transport::{Endpoint, RfcommTransport, SerialTransport, Transport, UsbChannelDefinition, UsbTransport};

use crate::dots::{DotsTable, OutputTable, make_output_table};
use crate::keys::{KeyLatch, MAX_CELLS};
use crate::{BrailleDisplay, DriverError, DriverResult, changed_span};

pub const KEY_TL1: u32 = 0o01;
pub const KEY_TL2: u32 = 0o02;
pub const KEY_TL3: u32 = 0o04;
pub const KEY_TR1: u32 = 0o10;
pub const KEY_TR2: u32 = 0o20;
pub const KEY_TR3: u32 = 0o40;

const PROBE_ATTEMPTS: usize = 5;
const PROBE_TIMEOUT: Duration = Duration::from_millis(500);

const SERIAL_BAUD: u32 = 19200;
const USB_CHANNELS: &[UsbChannelDefinition] = &[UsbChannelDefinition {
    vendor: 0x0403,
    product: 0xFE72,
    configuration: 1,
    interface: 0,
    alternative: 0,
    input_endpoint: 1,
    output_endpoint: 2,
}];
const BLUETOOTH_CHANNEL: u8 = 1;

pub struct VarioDriver {
    io: Box<dyn Transport>,
    codec: VarioCodec,
    output_table: OutputTable,
    cell_count: usize,
    /// Last window accepted, internal dot layout.
    internal_cells: [u8; MAX_CELLS],
    latch: KeyLatch,
}

impl VarioDriver {
    /// Open the endpoint's transport and probe the device.
    pub fn connect(endpoint: &Endpoint) -> DriverResult<(Self, BrailleDisplay)> {
        let io: Box<dyn Transport> = match endpoint {
            Endpoint::Serial { path } => {
                Box::new(SerialTransport::open(path, SERIAL_BAUD, false)?)
            }
            Endpoint::Usb { serial_number } => Box::new(UsbTransport::open(
                USB_CHANNELS,
                serial_number.as_deref(),
            )?),
            Endpoint::Bluetooth { address } => {
                Box::new(RfcommTransport::open(*address, BLUETOOTH_CHANNEL)?)
            }
        };
        Self::probe(io)
    }

    /// Probe an already-open transport. Split out so tests can hand in a
    /// scripted mock.
    pub fn probe(mut io: Box<dyn Transport>) -> DriverResult<(Self, BrailleDisplay)> {
        let mut codec = VarioCodec::new();
        let mut cells = None;

        'probe: for _ in 0..PROBE_ATTEMPTS {
            VarioCodec::write_packet(io.as_mut(), &[Request::DeviceIdentity as u8])?;
            while io.await_input(PROBE_TIMEOUT)? {
                let Some(packet) = codec.read_packet(io.as_mut())? else {
                    continue;
                };
                if packet.code() != Response::DeviceIdentity as u8 {
                    continue;
                }
                if let Some(count) = identify_display(packet.payload()) {
                    cells = Some(count);
                    break 'probe;
                }
            }
        }

        let Some(cells) = cells else {
            return Err(DriverError::ProbeFailed(PROBE_ATTEMPTS));
        };

        codec.set_cell_count(cells as u8);
        let mut driver = Self {
            io,
            codec,
            output_table: make_output_table(DotsTable::ISO_11548_1),
            cell_count: cells,
            internal_cells: [0; MAX_CELLS],
            latch: KeyLatch::new(),
        };
        let mut display = BrailleDisplay::new(cells, 1);
        display.key_bindings = format!("vario{cells}");

        // Clear the device so it starts in a known state.
        driver.send_cells(&mut display)?;
        Ok((driver, display))
    }

    /// Push the whole cell array, translated to wire order.
    fn send_cells(&mut self, brl: &mut BrailleDisplay) -> DriverResult<()> {
        let mut packet = [0u8; 1 + MAX_CELLS];
        packet[0] = Request::DisplayData as u8;
        for (i, &cell) in self.internal_cells[..self.cell_count].iter().enumerate() {
            packet[1 + i] = self.output_table[cell as usize];
        }
        VarioCodec::write_packet(self.io.as_mut(), &packet[..1 + self.cell_count])?;
        brl.write_delay += self.io.transfer_millis(1 + self.cell_count);
        Ok(())
    }

    fn command_for_chord(&self) -> Command {
        let keys = self.latch.active.keys;
        let routing: SmallVec<[usize; 4]> = self.latch.active.routing_indices().collect();

        match routing.len() {
            0 => {
                let cmd = match keys {
                    k if k == KEY_TL2 => Some(BrlCmd::FWinLt),
                    k if k == KEY_TR2 => Some(BrlCmd::FWinRt),

                    k if k == KEY_TL1 | KEY_TL3 => Some(BrlCmd::ChrLt),
                    k if k == KEY_TR1 | KEY_TR3 => Some(BrlCmd::ChrRt),

                    k if k == KEY_TL1 | KEY_TL2 | KEY_TL3 => Some(BrlCmd::LnBeg),
                    k if k == KEY_TR1 | KEY_TR2 | KEY_TR3 => Some(BrlCmd::LnEnd),

                    k if k == KEY_TL1 => Some(BrlCmd::LnUp),
                    k if k == KEY_TL3 => Some(BrlCmd::LnDn),
                    k if k == KEY_TR1 => Some(BrlCmd::Top),
                    k if k == KEY_TR3 => Some(BrlCmd::Bot),

                    k if k == KEY_TL2 | KEY_TL1 => Some(BrlCmd::PrDifLn),
                    k if k == KEY_TL2 | KEY_TL3 => Some(BrlCmd::NxDifLn),
                    k if k == KEY_TR2 | KEY_TR1 => Some(BrlCmd::AttrUp),
                    k if k == KEY_TR2 | KEY_TR3 => Some(BrlCmd::AttrDn),

                    k if k == KEY_TL1 | KEY_TR1 => Some(BrlCmd::Home),
                    k if k == KEY_TL2 | KEY_TR2 => Some(BrlCmd::Paste),
                    k if k == KEY_TL3 | KEY_TR3 => Some(BrlCmd::CsrJmpVert),

                    k if k == KEY_TL1 | KEY_TL2 | KEY_TR1 => Some(BrlCmd::Freeze),
                    k if k == KEY_TL1 | KEY_TL2 | KEY_TR2 => Some(BrlCmd::Help),
                    k if k == KEY_TL1 | KEY_TL2 | KEY_TL3 | KEY_TR1 => Some(BrlCmd::PrefMenu),
                    k if k == KEY_TL1 | KEY_TL2 | KEY_TL3 | KEY_TR2 => Some(BrlCmd::PrefLoad),
                    k if k == KEY_TL2 | KEY_TL3 | KEY_TR1 => Some(BrlCmd::Info),
                    k if k == KEY_TL2 | KEY_TL3 | KEY_TR1 | KEY_TR2 => Some(BrlCmd::CsrTrk),
                    k if k == KEY_TL1 | KEY_TL3 | KEY_TR3 => Some(BrlCmd::Back),
                    k if k == KEY_TL2 | KEY_TR1 | KEY_TR2 | KEY_TR3 => Some(BrlCmd::PrefSave),
                    _ => None,
                };
                match cmd {
                    Some(c) => Command::simple(c),
                    None => match keys {
                        k if k == KEY_TL2 | KEY_TL3 | KEY_TR2 => Command::simple(BrlCmd::SixDots)
                            .with_flags(CmdFlags::TOGGLE_ON.bits()),
                        k if k == KEY_TL2 | KEY_TL3 | KEY_TR3 => Command::simple(BrlCmd::SixDots)
                            .with_flags(CmdFlags::TOGGLE_OFF.bits()),
                        _ => Command::NOOP,
                    },
                }
            }
            1 => {
                let key = routing[0] as u8;
                let block = match keys {
                    0 => Some(blk::ROUTE),
                    k if k == KEY_TL1 => Some(blk::CUTBEGIN),
                    k if k == KEY_TL2 => Some(blk::CUTAPPEND),
                    k if k == KEY_TR1 => Some(blk::CUTLINE),
                    k if k == KEY_TR2 => Some(blk::CUTRECT),
                    k if k == KEY_TL3 => Some(blk::DESCCHAR),
                    k if k == KEY_TR3 => Some(blk::SETLEFT),
                    k if k == KEY_TL2 | KEY_TL1 => Some(blk::PRINDENT),
                    k if k == KEY_TL2 | KEY_TL3 => Some(blk::NXINDENT),
                    k if k == KEY_TR2 | KEY_TR1 => Some(blk::SETMARK),
                    k if k == KEY_TR2 | KEY_TR3 => Some(blk::GOTOMARK),
                    _ => None,
                };
                match block {
                    Some(b) => Command::block(b, key),
                    None => Command::NOOP,
                }
            }
            // Multi-routing chords are reserved for region operations on
            // other families; this device defines none.
            _ => Command::NOOP,
        }
    }
}

/// Parse the 16-byte identity string into a supported cell count.
fn identify_display(payload: &[u8]) -> Option<usize> {
    let text: String = payload[..DEVICE_IDENTITY_LENGTH.min(payload.len())]
        .iter()
        .map(|&b| b as char)
        .collect();
    let identity = text.trim_end_matches([' ', '\0']);
    tracing::info!(target: "driver.vario", identity, "detected display");

    let digits: String = identity
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    let cells: usize = digits.parse().ok()?;
    match cells {
        24 | 32 | 40 | 64 | 80 => Some(cells),
        other => {
            tracing::warn!(target: "driver.vario", cells = other, "unsupported cell count");
            None
        }
    }
}

impl crate::Driver for VarioDriver {
    fn write_window(&mut self, brl: &mut BrailleDisplay, _text: &[char]) -> DriverResult<()> {
        let count = self.cell_count.min(brl.buffer.len());
        if changed_span(&mut self.internal_cells[..count], &brl.buffer[..count]).is_some() {
            self.send_cells(brl)?;
        }
        Ok(())
    }

    fn read_command(
        &mut self,
        _brl: &mut BrailleDisplay,
        _context: CommandContext,
    ) -> DriverResult<Option<Command>> {
        let key_pressed = loop {
            let Some(packet) = self.codec.read_packet(self.io.as_mut())? else {
                return Ok(None);
            };

            match packet.code() {
                c if c == Response::TopKeys as u8 => {
                    break self.latch.update_keys(packet.payload()[0] as u32);
                }
                c if c == Response::RoutingKeys as u8 => {
                    let mut bits = 0u128;
                    for (byte_index, &byte) in packet.payload().iter().enumerate() {
                        for bit in 0..8 {
                            let key = byte_index * 8 + bit;
                            if key >= self.cell_count {
                                break;
                            }
                            if byte & (1 << bit) != 0 {
                                bits |= 1 << key;
                            }
                        }
                    }
                    break self.latch.update_routing(bits);
                }
                other => {
                    tracing::debug!(
                        target: "driver.vario",
                        code = format_args!("{other:02X}"),
                        "packet ignored"
                    );
                }
            }
        };

        let mut command = self.command_for_chord();
        if key_pressed {
            command = command.with_flags(CmdFlags::REPEAT_DELAY.bits());
        } else {
            // A poll that added nothing consumes the latched chord.
            self.latch.active.clear();
        }
        Ok(Some(command))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Driver;
    use core_transport::SharedMockTransport;

    const ESC: u8 = 0x1B;

    fn identity_reply(name: &str) -> Vec<u8> {
        let mut payload = [b' '; DEVICE_IDENTITY_LENGTH];
        payload[..name.len()].copy_from_slice(name.as_bytes());
        let mut frame = vec![ESC, 0x84];
        for &b in &payload {
            frame.push(b);
            if b == ESC {
                frame.push(ESC);
            }
        }
        frame
    }

    fn probed(name: &'static str) -> (VarioDriver, BrailleDisplay, SharedMockTransport) {
        let mock = SharedMockTransport::new();
        mock.respond_with(move |frame| {
            if frame == [ESC, 0x84] {
                identity_reply(name)
            } else {
                Vec::new()
            }
        });
        let (driver, display) = VarioDriver::probe(Box::new(mock.clone())).expect("probe");
        (driver, display, mock)
    }

    fn read(driver: &mut VarioDriver, brl: &mut BrailleDisplay) -> Option<Command> {
        driver
            .read_command(brl, CommandContext::Screen)
            .expect("read")
    }

    #[test]
    fn identity_probe_selects_forty_cells_and_blanks_them() {
        let (driver, display, mock) = probed("Baum Vario40");
        assert_eq!(display.text_columns, 40);
        assert_eq!(display.text_rows, 1);
        assert_eq!(driver.cell_count, 40);

        let frames = mock.take_writes();
        // Identity request, then a full 40-cell blank window.
        assert_eq!(frames[0], vec![ESC, 0x84]);
        assert_eq!(frames[1][..2], [ESC, 0x01]);
        assert_eq!(frames[1].len(), 2 + 40);
        assert!(frames[1][2..].iter().all(|&b| b == 0));
    }

    #[test]
    fn unsupported_model_fails_probe() {
        let mock = SharedMockTransport::new();
        mock.respond_with(|frame| {
            if frame == [ESC, 0x84] {
                identity_reply("Baum Vario99")
            } else {
                Vec::new()
            }
        });
        let result = VarioDriver::probe(Box::new(mock));
        assert!(matches!(result, Err(DriverError::ProbeFailed(_))));
    }

    #[test]
    fn unchanged_window_writes_nothing() {
        let (mut driver, mut display, mock) = probed("Baum Vario40");
        mock.take_writes();

        // Same all-blank content as the probe sent.
        driver.write_window(&mut display, &[]).unwrap();
        assert!(mock.take_writes().is_empty());

        display.buffer[5] = 0x1C;
        driver.write_window(&mut display, &[]).unwrap();
        assert_eq!(mock.take_writes().len(), 1);
        // And again: no change, no bytes.
        driver.write_window(&mut display, &[]).unwrap();
        assert!(mock.take_writes().is_empty());
    }

    #[test]
    fn routing_chord_yields_one_block_command() {
        let (mut driver, mut display, mock) = probed("Baum Vario40");

        // TL2 down.
        mock.push_input(&[ESC, 0x24, KEY_TL2 as u8]);
        let cmd = read(&mut driver, &mut display).expect("press");
        assert_eq!(cmd.cmd(), BrlCmd::FWinLt as u32);
        assert!(cmd.has(CmdFlags::REPEAT_DELAY));

        // Routing key 17 down (bitmap byte 2, bit 1).
        mock.push_input(&[ESC, 0x22, 0x00, 0x00, 0x02, 0x00, 0x00]);
        let cmd = read(&mut driver, &mut display).expect("chord");
        assert_eq!(cmd.cmd(), blk::CUTAPPEND | 17);
        assert!(cmd.has(CmdFlags::REPEAT_DELAY));

        // Routing key released: the chord fires without repeat flags.
        mock.push_input(&[ESC, 0x22, 0x00, 0x00, 0x00, 0x00, 0x00]);
        let cmd = read(&mut driver, &mut display).expect("release");
        assert_eq!(cmd, Command::block(blk::CUTAPPEND, 17));

        // TL2 released: latch is already consumed.
        mock.push_input(&[ESC, 0x24, 0x00]);
        let cmd = read(&mut driver, &mut display).expect("final release");
        assert_eq!(cmd, Command::NOOP);

        // Quiet line.
        assert_eq!(read(&mut driver, &mut display), None);
    }

    #[test]
    fn routing_key_alone_routes() {
        let (mut driver, mut display, mock) = probed("Baum Vario40");
        mock.push_input(&[ESC, 0x22, 0x08, 0x00, 0x00, 0x00, 0x00]);
        let cmd = read(&mut driver, &mut display).expect("press");
        assert_eq!(cmd.cmd(), blk::ROUTE | 3);
        mock.push_input(&[ESC, 0x22, 0x00, 0x00, 0x00, 0x00, 0x00]);
        let cmd = read(&mut driver, &mut display).expect("release");
        assert_eq!(cmd, Command::block(blk::ROUTE, 3));
    }

    #[test]
    fn six_dot_toggles_carry_flags() {
        let (mut driver, mut display, mock) = probed("Baum Vario40");
        mock.push_input(&[ESC, 0x24, (KEY_TL2 | KEY_TL3 | KEY_TR2) as u8]);
        let cmd = read(&mut driver, &mut display).expect("press");
        assert_eq!(cmd.cmd(), BrlCmd::SixDots as u32);
        assert!(cmd.has(CmdFlags::TOGGLE_ON));
    }

    #[test]
    fn disconnect_surfaces_as_fatal() {
        let (mut driver, mut display, mock) = probed("Baum Vario40");
        mock.set_disconnected(true);
        let err = driver
            .read_command(&mut display, CommandContext::Screen)
            .unwrap_err();
        assert!(err.is_fatal());
    }
}
