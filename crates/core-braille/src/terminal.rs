//! Driver for the Terminal family (length-prefixed protocol A).
//!
//! One device family, two wire protocols. Revision 1 is addressed memory:
//! the host writes cell ranges at transmit offsets and receives one key
//! event per frame. Revision 2 is a nibble-armoured exchange where key
//! state arrives as a whole bitmap and the display is refreshed as one
//! image. Which protocol a given unit speaks is discovered at probe time:
//! a deliberately malformed revision-1 write provokes a revision-1 unit
//! into identifying itself; units that stay quiet are queried with the
//! revision-2 identity request instead. Serial probes additionally cycle
//! through the supported line speeds.

use std::time::Duration;

use core_cmd::{BrlCmd, CmdFlags, Command, CommandContext, blk};
use smallvec::SmallVec;
use core_proto::terminal::{
    BAD_PACKET, Packet1, Terminal1Codec, Terminal2Codec, packet2, rcv, xmt,
};
use core_transport::{
    Endpoint, RfcommTransport, SerialTransport, Transport, UsbChannelDefinition, UsbTransport,
};

use crate::dots::{DotsTable, INTERNAL_DOTS, OutputTable, make_output_table};
use crate::keys::{KeyLatch, MAX_CELLS};
use crate::{BrailleDisplay, DriverError, DriverResult, changed_span};

/// Geometry and key fit-out per model identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelEntry {
    pub identifier: u8,
    pub name: &'static str,
    pub text_columns: usize,
    pub status_count: usize,
    pub front_keys: usize,
    pub has_bar: bool,
    pub left_keys: usize,
    pub right_keys: usize,
    pub protocol_revision: u8,
}

pub const MODELS: &[ModelEntry] = &[
    ModelEntry { identifier: 0, name: "Compact 486", text_columns: 40, status_count: 0, front_keys: 9, has_bar: false, left_keys: 0, right_keys: 0, protocol_revision: 1 },
    ModelEntry { identifier: 1, name: "2D Lite Plus", text_columns: 40, status_count: 13, front_keys: 9, has_bar: false, left_keys: 0, right_keys: 0, protocol_revision: 1 },
    ModelEntry { identifier: 2, name: "Compact Tiny", text_columns: 24, status_count: 0, front_keys: 9, has_bar: false, left_keys: 0, right_keys: 0, protocol_revision: 1 },
    ModelEntry { identifier: 3, name: "IB 80 CR Soft", text_columns: 80, status_count: 4, front_keys: 9, has_bar: false, left_keys: 0, right_keys: 0, protocol_revision: 1 },
    ModelEntry { identifier: 0x40, name: "EL 40", text_columns: 40, status_count: 1, front_keys: 0, has_bar: true, left_keys: 1, right_keys: 1, protocol_revision: 1 },
    ModelEntry { identifier: 0x42, name: "EL 66", text_columns: 66, status_count: 2, front_keys: 0, has_bar: true, left_keys: 1, right_keys: 1, protocol_revision: 1 },
    ModelEntry { identifier: 0x43, name: "EL 80", text_columns: 80, status_count: 2, front_keys: 0, has_bar: true, left_keys: 1, right_keys: 1, protocol_revision: 1 },
    ModelEntry { identifier: 0x15, name: "EL 40s", text_columns: 40, status_count: 0, front_keys: 0, has_bar: true, left_keys: 1, right_keys: 1, protocol_revision: 2 },
    ModelEntry { identifier: 0x16, name: "EL 80s", text_columns: 80, status_count: 2, front_keys: 0, has_bar: true, left_keys: 1, right_keys: 1, protocol_revision: 2 },
];

fn find_model(identifier: u8) -> Option<&'static ModelEntry> {
    MODELS.iter().find(|m| m.identifier == identifier)
}

/// Per-medium probe parameters.
struct IoProfile {
    bauds: &'static [u32],
    hardware_flow: bool,
    try_protocol_1: bool,
    protocol_2_tries: usize,
}

const SERIAL_PROFILE: IoProfile = IoProfile { bauds: &[19200, 38400], hardware_flow: true, try_protocol_1: true, protocol_2_tries: 1 };
const USB_PROFILE: IoProfile = IoProfile { bauds: &[115200, 57600], hardware_flow: false, try_protocol_1: false, protocol_2_tries: 3 };
const BLUETOOTH_PROFILE: IoProfile = IoProfile { bauds: &[115200], hardware_flow: false, try_protocol_1: false, protocol_2_tries: 3 };

const USB_CHANNELS: &[UsbChannelDefinition] = &[UsbChannelDefinition {
    vendor: 0x0403,
    product: 0xF208,
    configuration: 1,
    interface: 0,
    alternative: 0,
    input_endpoint: 1,
    output_endpoint: 2,
}];
const BLUETOOTH_CHANNEL: u8 = 1;

// Non-routing key bit assignments in the latch.
pub const KEY_FRONT0: u32 = 1 << 0; // front key N is bit N, 0-based from the top
pub const KEY_BAR_UP1: u32 = 1 << 16;
pub const KEY_BAR_UP2: u32 = 1 << 17;
pub const KEY_BAR_DOWN1: u32 = 1 << 18;
pub const KEY_BAR_DOWN2: u32 = 1 << 19;
pub const KEY_BAR_LEFT1: u32 = 1 << 20;
pub const KEY_BAR_LEFT2: u32 = 1 << 21;
pub const KEY_BAR_RIGHT1: u32 = 1 << 22;
pub const KEY_BAR_RIGHT2: u32 = 1 << 23;
const KEY_STATUS_BASE: u32 = 24; // status keys occupy bits 24..=31

/// Key identities used by the revision-2 input map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum KeySet {
    #[default]
    None,
    /// Non-routing key; the payload is the latch bit index.
    Nav(u8),
    /// Primary routing key row; payload is the cell index.
    Routing1(u8),
    /// Secondary routing row and status-cell routing keys: received,
    /// currently unbound.
    Ignored,
}

struct Protocol1 {
    rcv_status_first: i32,
    rcv_status_last: i32,
    rcv_cursor_first: i32,
    rcv_cursor_last: i32,
    rcv_front_first: i32,
    rcv_front_last: i32,
    rcv_bar_first: i32,
    rcv_bar_last: i32,
    rcv_switch_first: i32,
    rcv_switch_last: i32,
    xmt_status_offset: u16,
    xmt_text_offset: u16,
}

impl Protocol1 {
    fn for_model(model: &ModelEntry) -> Self {
        // Routing key codes: status cells first, then cursor cells, three
        // codes per key.
        let rcv_status_first = rcv::KEY_ROUTE as i32;
        let rcv_status_last = rcv_status_first + 3 * (model.status_count as i32 - 1);
        let rcv_cursor_first = rcv_status_last + 3;
        let rcv_cursor_last = rcv_cursor_first + 3 * (model.text_columns as i32 - 1);

        // Function key codes: front keys, then bar, then switches.
        let bar_keys = if model.has_bar { 8 } else { 0 };
        let rcv_front_first = rcv::KEY_FUNC as i32 + 3;
        let rcv_front_last = rcv_front_first + 3 * (model.front_keys as i32 - 1);
        let rcv_bar_first = rcv_front_last + 3;
        let rcv_bar_last = rcv_bar_first + 3 * (bar_keys - 1);
        let rcv_switch_first = rcv_bar_last + 3;
        let rcv_switch_last = rcv_switch_first + 3 * (bar_keys - 1);

        let xmt_status_offset = 0u16;
        let xmt_text_offset = xmt_status_offset + model.status_count as u16;

        tracing::debug!(
            target: "driver.terminal",
            status = format_args!("{rcv_status_first:03X}-{rcv_status_last:03X}"),
            cursor = format_args!("{rcv_cursor_first:03X}-{rcv_cursor_last:03X}"),
            front = format_args!("{rcv_front_first:03X}-{rcv_front_last:03X}"),
            bar = format_args!("{rcv_bar_first:03X}-{rcv_bar_last:03X}"),
            "revision 1 key ranges"
        );

        Self {
            rcv_status_first,
            rcv_status_last,
            rcv_cursor_first,
            rcv_cursor_last,
            rcv_front_first,
            rcv_front_last,
            rcv_bar_first,
            rcv_bar_last,
            rcv_switch_first,
            rcv_switch_last,
            xmt_status_offset,
            xmt_text_offset,
        }
    }
}

struct Protocol2 {
    input_map: Vec<KeySet>,
    input_state: Vec<u8>,
    input_key_size: usize,
    refresh_required: bool,
}

impl Protocol2 {
    fn for_model(model: &ModelEntry) -> Self {
        let input_key_size = if model.protocol_revision < 2 { 4 } else { 8 };
        let key_count = model.left_keys + model.right_keys;
        let input_bytes = key_count
            + 1
            + ((key_count * input_key_size
                + (model.text_columns + model.status_count) * 2)
                + 7)
                / 8;
        let mut this = Self {
            input_map: vec![KeySet::None; input_bytes * 8],
            input_state: vec![0; input_bytes],
            input_key_size,
            refresh_required: true,
        };
        this.map_input_modules(model, input_bytes);
        this
    }

    fn map_input_modules(&mut self, model: &ModelEntry, input_bytes: usize) {
        struct Module {
            byte: usize,
            bit: usize,
            size: usize,
        }
        let mut module = Module { byte: input_bytes, bit: 0, size: 0 };
        let rev = model.protocol_revision;

        let mut next = |module: &mut Module, size: usize| -> bool {
            if module.bit == 0 {
                if module.byte == 0 {
                    return false;
                }
                module.byte -= 1;
                module.bit = 8;
            }
            module.bit -= size;
            module.size = size;
            true
        };

        let map = &mut self.input_map;
        let mut add = |module: &Module, bit_offset: usize, set: KeySet| {
            let bit = if rev < 2 {
                bit_offset + module.bit
            } else {
                bit_offset + 8 - module.bit - module.size
            };
            map[module.byte * 8 + bit] = set;
        };

        // Right-hand rocker keys.
        for _ in 0..model.right_keys {
            next(&mut module, self.input_key_size);
            add(&module, 0, KeySet::Nav(28)); // right rear
            add(&module, 1, KeySet::Nav(29)); // right front
        }

        // Routing keys, interleaved second row / first row, right to left.
        let mut column = model.text_columns;
        while column > 0 {
            column -= 1;
            next(&mut module, 1);
            add(&module, 0, KeySet::Ignored); // second routing row
            next(&mut module, 1);
            add(&module, 0, KeySet::Routing1(column as u8));
        }

        // Left-hand rocker keys.
        for _ in 0..model.left_keys {
            next(&mut module, self.input_key_size);
            add(&module, 0, KeySet::Nav(26)); // left rear
            add(&module, 1, KeySet::Nav(27)); // left front
        }

        // Status cell keys.
        let mut cell = model.status_count;
        while cell > 0 {
            next(&mut module, 1);
            add(&module, 0, KeySet::Ignored); // status routing row
            next(&mut module, 1);
            let bit = KEY_STATUS_BASE as usize + (cell - 1).min(7);
            add(&module, 0, KeySet::Nav(bit as u8));
            cell -= 1;
        }

        // The easy-access bar occupies the first byte.
        module.bit = 0;
        next(&mut module, 8);
        add(&module, 0, KeySet::Nav(17)); // up 2
        add(&module, 1, KeySet::Nav(16)); // up 1
        add(&module, 2, KeySet::Nav(18)); // down 1
        add(&module, 3, KeySet::Nav(19)); // down 2
        add(&module, 4, KeySet::Nav(22)); // right 1
        add(&module, 5, KeySet::Nav(20)); // left 1
        add(&module, 6, KeySet::Nav(23)); // right 2
        add(&module, 7, KeySet::Nav(21)); // left 2
    }
}

enum Protocol {
    One(Protocol1),
    Two(Protocol2),
}

pub struct TerminalDriver {
    io: Box<dyn Transport>,
    model: &'static ModelEntry,
    protocol: Protocol,
    output_table: OutputTable,
    latch: KeyLatch,
    pending: Option<Command>,
    /// Last accepted window cells, internal layout.
    current_text: [u8; MAX_CELLS],
    current_status: [u8; MAX_CELLS],
}

impl TerminalDriver {
    pub fn connect(endpoint: &Endpoint) -> DriverResult<(Self, BrailleDisplay)> {
        let profile = match endpoint {
            Endpoint::Serial { .. } => &SERIAL_PROFILE,
            Endpoint::Usb { .. } => &USB_PROFILE,
            Endpoint::Bluetooth { .. } => &BLUETOOTH_PROFILE,
        };
        let io: Box<dyn Transport> = match endpoint {
            Endpoint::Serial { path } => Box::new(SerialTransport::open(
                path,
                profile.bauds[0],
                profile.hardware_flow,
            )?),
            Endpoint::Usb { serial_number } => {
                Box::new(UsbTransport::open(USB_CHANNELS, serial_number.as_deref())?)
            }
            Endpoint::Bluetooth { address } => {
                Box::new(RfcommTransport::open(*address, BLUETOOTH_CHANNEL)?)
            }
        };
        Self::probe(io, profile)
    }

    /// Probe an open transport with the medium's parameters.
    fn probe(mut io: Box<dyn Transport>, profile: &IoProfile) -> DriverResult<(Self, BrailleDisplay)> {
        let mut found: Option<(&'static ModelEntry, bool)> = None;

        'bauds: for &baud in profile.bauds {
            let speed_applies = io.set_baud(baud)?;
            io.discard_input()?;
            tracing::debug!(target: "driver.terminal", baud, "probing");

            if profile.try_protocol_1 {
                if let Some(model) = identify_protocol_1(io.as_mut())? {
                    found = Some((model, false));
                    break 'bauds;
                }
            }
            for _ in 0..profile.protocol_2_tries {
                if let Some(model) = identify_protocol_2(io.as_mut())? {
                    found = Some((model, true));
                    break 'bauds;
                }
            }

            if !speed_applies {
                break;
            }
        }

        let Some((model, revision_2)) = found else {
            return Err(DriverError::ProbeFailed(profile.bauds.len()));
        };

        let (protocol, output_table) = if revision_2 {
            // Revision 2 wants the dots mirrored.
            (
                Protocol::Two(Protocol2::for_model(model)),
                make_output_table(DotsTable([0x80, 0x40, 0x20, 0x10, 0x08, 0x04, 0x02, 0x01])),
            )
        } else {
            (
                Protocol::One(Protocol1::for_model(model)),
                make_output_table(DotsTable::ISO_11548_1),
            )
        };

        let mut driver = Self {
            io,
            model,
            protocol,
            output_table,
            latch: KeyLatch::new(),
            pending: None,
            current_text: [0; MAX_CELLS],
            current_status: [0; MAX_CELLS],
        };

        let mut display = BrailleDisplay::new(model.text_columns, 1);
        display.status_columns = model.status_count;
        display.status_rows = if model.status_count > 0 { 1 } else { 0 };
        display.key_bindings = model.name.replace(' ', "_").to_lowercase();
        driver.initialize_terminal(&mut display)?;

        Ok((driver, display))
    }

    fn initialize_terminal(&mut self, brl: &mut BrailleDisplay) -> DriverResult<()> {
        match &mut self.protocol {
            Protocol::One(p1) => {
                // Take over cell translation, then paint the current image.
                let ones = [1u8; MAX_CELLS];
                if self.model.status_count > 0 {
                    Terminal1Codec::write_packet(
                        self.io.as_mut(),
                        xmt::BRAILLE_WRITE + p1.xmt_status_offset,
                        &ones[..self.model.status_count],
                    )?;
                }
                Terminal1Codec::write_packet(
                    self.io.as_mut(),
                    xmt::BRAILLE_WRITE + p1.xmt_text_offset,
                    &ones[..self.model.text_columns],
                )?;

                let status: Vec<u8> = self.current_status[..self.model.status_count]
                    .iter()
                    .map(|&c| self.output_table[c as usize])
                    .collect();
                if !status.is_empty() {
                    Terminal1Codec::write_packet(
                        self.io.as_mut(),
                        xmt::BRAILLE_DATA + p1.xmt_status_offset,
                        &status,
                    )?;
                }
                let text: Vec<u8> = self.current_text[..self.model.text_columns]
                    .iter()
                    .map(|&c| self.output_table[c as usize])
                    .collect();
                Terminal1Codec::write_packet(
                    self.io.as_mut(),
                    xmt::BRAILLE_DATA + p1.xmt_text_offset,
                    &text,
                )?;
                brl.write_delay += self.io.transfer_millis(self.model.text_columns + 7);
            }
            Protocol::Two(p2) => {
                p2.input_state.iter_mut().for_each(|b| *b = 0);
                p2.refresh_required = true;
                self.flush_cells(brl)?;
            }
        }
        Ok(())
    }

    /// Revision 2: push the whole display image when marked dirty.
    fn flush_cells(&mut self, brl: &mut BrailleDisplay) -> DriverResult<()> {
        let Protocol::Two(p2) = &mut self.protocol else {
            return Ok(());
        };
        if !p2.refresh_required {
            return Ok(());
        }
        let mut image = Vec::with_capacity(MAX_CELLS * 2);
        for &cell in &self.current_status[..self.model.status_count] {
            image.push(self.output_table[cell as usize]);
        }
        if self.model.protocol_revision < 2 {
            for _ in 0..self.model.left_keys {
                image.extend_from_slice(&[0, 0]);
            }
        }
        for &cell in &self.current_text[..self.model.text_columns] {
            image.push(self.output_table[cell as usize]);
        }
        if self.model.protocol_revision < 2 {
            for _ in 0..self.model.right_keys {
                image.extend_from_slice(&[0, 0]);
            }
        }
        Terminal2Codec::write_packet(self.io.as_mut(), 3, &image)?;
        brl.write_delay += self.io.transfer_millis(image.len() * 2 + 5);
        p2.refresh_required = false;
        Ok(())
    }

    /// Map one revision-1 key code onto latch state.
    fn handle_key_1(&mut self, code: u16, pressed: bool) -> bool {
        let p1 = match &self.protocol {
            Protocol::One(p1) => p1,
            Protocol::Two(_) => return false,
        };
        let code = code as i32;

        let nav_bit = if (p1.rcv_front_first..=p1.rcv_front_last).contains(&code) {
            Some(((code - p1.rcv_front_first) / 3) as u32)
        } else if (p1.rcv_status_first..=p1.rcv_status_last).contains(&code) {
            Some(KEY_STATUS_BASE + (((code - p1.rcv_status_first) / 3) as u32).min(7))
        } else if (p1.rcv_bar_first..=p1.rcv_bar_last).contains(&code) {
            Some(16 + ((code - p1.rcv_bar_first) / 3) as u32)
        } else if (p1.rcv_switch_first..=p1.rcv_switch_last).contains(&code) {
            // Side switches carry mode state we do not bind.
            None
        } else if (p1.rcv_cursor_first..=p1.rcv_cursor_last).contains(&code) {
            let index = ((code - p1.rcv_cursor_first) / 3) as usize;
            let mut routing = self.latch.pressed.routing;
            if pressed {
                routing |= 1 << index;
            } else {
                routing &= !(1 << index);
            }
            return self.latch.update_routing(routing);
        } else {
            tracing::warn!(target: "driver.terminal", code = format_args!("{code:04X}"), "unexpected key");
            None
        };

        match nav_bit {
            Some(bit) => {
                let mask = 1u32 << bit;
                let keys = if pressed {
                    self.latch.pressed.keys | mask
                } else {
                    self.latch.pressed.keys & !mask
                };
                self.latch.update_keys(keys)
            }
            None => false,
        }
    }

    /// Derive the command for the latched chord. Region operations
    /// resolve to a pair; the second command is returned separately so the
    /// caller can hold it until the first has been delivered.
    fn command_for_chord(&self) -> (Command, Option<Command>) {
        let keys = self.latch.active.keys;
        let routing: SmallVec<[usize; 4]> = self.latch.active.routing_indices().collect();

        match routing.len() {
            0 => {
                let cmd = match keys {
                    0 => return (Command::NOOP, None),

                    // Front-key models.
                    k if k == KEY_FRONT0 => Some(BrlCmd::Help),
                    k if k == KEY_FRONT0 << 1 => Some(BrlCmd::HWinLt),
                    k if k == KEY_FRONT0 << 2 => Some(BrlCmd::PrDifLn),
                    k if k == KEY_FRONT0 << 3 => Some(BrlCmd::LnUp),
                    k if k == KEY_FRONT0 << 4 => Some(BrlCmd::Home),
                    k if k == KEY_FRONT0 << 5 => Some(BrlCmd::LnDn),
                    k if k == KEY_FRONT0 << 6 => Some(BrlCmd::NxDifLn),
                    k if k == KEY_FRONT0 << 7 => Some(BrlCmd::HWinRt),
                    k if k == KEY_FRONT0 << 8 => Some(BrlCmd::Info),
                    k if k == KEY_FRONT0 << 3 | KEY_FRONT0 << 4 => Some(BrlCmd::Top),
                    k if k == KEY_FRONT0 << 4 | KEY_FRONT0 << 5 => Some(BrlCmd::Bot),
                    k if k == KEY_FRONT0 << 1 | KEY_FRONT0 << 2 => Some(BrlCmd::LnBeg),
                    k if k == KEY_FRONT0 << 6 | KEY_FRONT0 << 7 => Some(BrlCmd::LnEnd),
                    k if k == KEY_FRONT0 | KEY_FRONT0 << 1 => Some(BrlCmd::Freeze),
                    k if k == KEY_FRONT0 << 7 | KEY_FRONT0 << 8 => Some(BrlCmd::Paste),
                    k if k == KEY_FRONT0 | KEY_FRONT0 << 8 => Some(BrlCmd::PrefMenu),
                    k if k == KEY_FRONT0 << 2 | KEY_FRONT0 << 3 => Some(BrlCmd::AttrUp),
                    k if k == KEY_FRONT0 << 5 | KEY_FRONT0 << 6 => Some(BrlCmd::AttrDn),
                    k if k == KEY_FRONT0 << 4 | KEY_FRONT0 << 8 => Some(BrlCmd::CsrTrk),
                    k if k == KEY_FRONT0 | KEY_FRONT0 << 4 => Some(BrlCmd::DispMd),

                    // Bar models.
                    k if k == KEY_BAR_UP1 => Some(BrlCmd::LnUp),
                    k if k == KEY_BAR_DOWN1 => Some(BrlCmd::LnDn),
                    k if k == KEY_BAR_LEFT1 => Some(BrlCmd::FWinLt),
                    k if k == KEY_BAR_RIGHT1 => Some(BrlCmd::FWinRt),
                    k if k == KEY_BAR_UP2 => Some(BrlCmd::PrDifLn),
                    k if k == KEY_BAR_DOWN2 => Some(BrlCmd::NxDifLn),
                    k if k == KEY_BAR_LEFT2 => Some(BrlCmd::LnBeg),
                    k if k == KEY_BAR_RIGHT2 => Some(BrlCmd::LnEnd),
                    k if k == KEY_BAR_UP1 | KEY_BAR_DOWN1 => Some(BrlCmd::Home),
                    k if k == KEY_BAR_LEFT1 | KEY_BAR_RIGHT1 => Some(BrlCmd::Back),
                    k if k == KEY_BAR_UP1 | KEY_BAR_LEFT1 => Some(BrlCmd::TopLeft),
                    k if k == KEY_BAR_DOWN1 | KEY_BAR_LEFT1 => Some(BrlCmd::BotLeft),
                    k if k == 1 << 26 => Some(BrlCmd::CsrTrk), // left rear
                    k if k == 1 << 27 => Some(BrlCmd::DispMd), // left front
                    k if k == 1 << 28 => Some(BrlCmd::Freeze), // right rear
                    k if k == 1 << 29 => Some(BrlCmd::Info),   // right front
                    _ => None,
                };
                match cmd {
                    Some(c) => (Command::simple(c), None),
                    None => (Command::NOOP, None),
                }
            }
            1 => {
                let key = routing[0] as u8;
                let block = match keys {
                    0 => Some(blk::ROUTE),
                    k if k == KEY_FRONT0 => Some(blk::CUTBEGIN),
                    k if k == KEY_FRONT0 << 1 => Some(blk::CUTAPPEND),
                    k if k == KEY_FRONT0 << 7 => Some(blk::CUTRECT),
                    k if k == KEY_FRONT0 << 8 => Some(blk::CUTLINE),
                    k if k == KEY_FRONT0 << 2 => Some(blk::PRINDENT),
                    k if k == KEY_FRONT0 << 6 => Some(blk::NXINDENT),
                    k if k == KEY_FRONT0 << 4 => Some(blk::DESCCHAR),
                    k if k == KEY_BAR_LEFT1 => Some(blk::CUTBEGIN),
                    k if k == KEY_BAR_RIGHT1 => Some(blk::CUTLINE),
                    k if k == KEY_BAR_UP1 => Some(blk::PRINDENT),
                    k if k == KEY_BAR_DOWN1 => Some(blk::NXINDENT),
                    k if k == KEY_BAR_LEFT2 => Some(blk::SETLEFT),
                    k if k == KEY_BAR_RIGHT2 => Some(blk::DESCCHAR),
                    k if k == KEY_BAR_UP2 => Some(blk::SETMARK),
                    k if k == KEY_BAR_DOWN2 => Some(blk::GOTOMARK),
                    _ => None,
                };
                match block {
                    Some(b) => (Command::block(b, key), None),
                    None => (Command::NOOP, None),
                }
            }
            2 if keys == 0 => {
                // A two-key routing chord marks a region: capture from the
                // first cell through the second.
                (
                    Command::block(blk::CUTBEGIN, routing[0] as u8),
                    Some(Command::block(blk::CUTLINE, routing[1] as u8)),
                )
            }
            _ => (Command::NOOP, None),
        }
    }

    fn finish_key_poll(&mut self, key_pressed: bool) -> Command {
        let (mut command, secondary) = self.command_for_chord();
        if key_pressed {
            // The chord is still forming; any region pair stays tentative.
            command = command.with_flags(CmdFlags::REPEAT_DELAY.bits());
        } else {
            self.pending = secondary;
            self.latch.active.clear();
        }
        command
    }

    fn read_command_1(&mut self, brl: &mut BrailleDisplay) -> DriverResult<Option<Command>> {
        loop {
            let Some(packet) = Terminal1Codec::read_packet(self.io.as_mut())? else {
                return Ok(None);
            };
            match packet {
                Packet1::Identity { id, major, minor } => {
                    tracing::info!(target: "driver.terminal", id, major, minor, "identity re-announced");
                    if let Some(model) = find_model(id) {
                        if model.text_columns != self.model.text_columns {
                            brl.resize_required = true;
                        }
                        self.model = model;
                        self.protocol = Protocol::One(Protocol1::for_model(model));
                    }
                    self.initialize_terminal(brl)?;
                }
                Packet1::Error { code } => {
                    tracing::warn!(target: "driver.terminal", code = format_args!("{code:02X}"), "device rejected output");
                    self.initialize_terminal(brl)?;
                }
                Packet1::Key { code, pressed, .. } => {
                    let newly = self.handle_key_1(code, pressed);
                    return Ok(Some(self.finish_key_poll(newly)));
                }
            }
        }
    }

    fn read_command_2(&mut self, _brl: &mut BrailleDisplay) -> DriverResult<Option<Command>> {
        loop {
            let Some(packet) = Terminal2Codec::read_packet(self.io.as_mut())? else {
                return Ok(None);
            };
            match packet.kind {
                packet2::KEYS => {
                    let Protocol::Two(p2) = &mut self.protocol else {
                        return Ok(None);
                    };
                    let bytes = packet.data.len().min(p2.input_state.len());

                    let mut nav = self.latch.pressed.keys;
                    let mut routing = self.latch.pressed.routing;
                    let mut apply = |set: KeySet, down: bool| match set {
                        KeySet::Nav(bit) => {
                            let mask = 1u32 << bit;
                            if down {
                                nav |= mask;
                            } else {
                                nav &= !mask;
                            }
                        }
                        KeySet::Routing1(cell) => {
                            let mask = 1u128 << cell;
                            if down {
                                routing |= mask;
                            } else {
                                routing &= !mask;
                            }
                        }
                        KeySet::None | KeySet::Ignored => {}
                    };

                    // Releases first, then presses, so a rollover between
                    // two keys never looks like a chord.
                    for byte in 0..bytes {
                        let old = p2.input_state[byte];
                        let new = packet.data[byte];
                        for bit in 0..8 {
                            let mask = 1u8 << bit;
                            if old & mask != 0 && new & mask == 0 {
                                apply(p2.input_map[byte * 8 + bit], false);
                            }
                        }
                    }
                    for byte in 0..bytes {
                        let old = p2.input_state[byte];
                        let new = packet.data[byte];
                        for bit in 0..8 {
                            let mask = 1u8 << bit;
                            if new & mask != 0 && old & mask == 0 {
                                apply(p2.input_map[byte * 8 + bit], true);
                            }
                        }
                        p2.input_state[byte] = new;
                    }

                    let newly = {
                        let a = self.latch.update_keys(nav);
                        let b = self.latch.update_routing(routing);
                        a || b
                    };
                    return Ok(Some(self.finish_key_poll(newly)));
                }
                packet2::KEYBOARD => {
                    // A typed chord arrives complete: modifiers then dots.
                    let dot_byte = packet.data.get(1).copied().unwrap_or(0);
                    let mut dots = 0u8;
                    for bit in 0..8 {
                        if dot_byte & (1 << bit) != 0 {
                            dots |= INTERNAL_DOTS[bit];
                        }
                    }
                    return Ok(Some(Command::block(blk::PASSDOTS, dots)));
                }
                other => {
                    tracing::debug!(target: "driver.terminal", kind = format_args!("{other:02X}"), "packet ignored");
                }
            }
        }
    }
}

fn identify_protocol_1(io: &mut dyn Transport) -> DriverResult<Option<&'static ModelEntry>> {
    io.write(&BAD_PACKET)?;
    if !io.await_input(Duration::from_millis(1000))? {
        return Ok(None);
    }
    while let Some(packet) = Terminal1Codec::read_packet(io)? {
        if let Packet1::Identity { id, major, minor } = packet {
            tracing::info!(target: "driver.terminal", id, major, minor, "revision 1 identity");
            match find_model(id) {
                Some(model) => {
                    tracing::info!(target: "driver.terminal", name = model.name, columns = model.text_columns, "model");
                    return Ok(Some(model));
                }
                None => {
                    tracing::warn!(target: "driver.terminal", id, "unknown model identifier");
                    return Ok(None);
                }
            }
        }
    }
    Ok(None)
}

fn identify_protocol_2(io: &mut dyn Transport) -> DriverResult<Option<&'static ModelEntry>> {
    Terminal2Codec::write_packet(io, 2, &[])?;
    if !io.await_input(Duration::from_millis(100))? {
        return Ok(None);
    }
    while let Some(packet) = Terminal2Codec::read_packet(io)? {
        if packet.kind == packet2::IDENTITY && packet.data.len() >= 5 {
            let id = ((packet.data[0] & 0x0F) << 4) | (packet.data[1] & 0x0F);
            let major = packet.data[2] & 0x0F;
            let minor = (packet.data[3] & 0x0F) * 10 + (packet.data[4] & 0x0F);
            tracing::info!(target: "driver.terminal", id, major, minor, "revision 2 identity");
            match find_model(id) {
                Some(model) => return Ok(Some(model)),
                None => {
                    tracing::warn!(target: "driver.terminal", id, "unknown model identifier");
                    return Ok(None);
                }
            }
        }
    }
    Ok(None)
}

impl crate::Driver for TerminalDriver {
    fn write_window(&mut self, brl: &mut BrailleDisplay, _text: &[char]) -> DriverResult<()> {
        let count = self.model.text_columns.min(brl.buffer.len());
        let span = changed_span(&mut self.current_text[..count], &brl.buffer[..count]);
        match &mut self.protocol {
            Protocol::One(p1) => {
                if let Some((from, to)) = span {
                    let cells: Vec<u8> = self.current_text[from..to]
                        .iter()
                        .map(|&c| self.output_table[c as usize])
                        .collect();
                    let address = xmt::BRAILLE_DATA + p1.xmt_text_offset + from as u16;
                    Terminal1Codec::write_packet(self.io.as_mut(), address, &cells)?;
                    brl.write_delay += self.io.transfer_millis(cells.len() + 7);
                }
            }
            Protocol::Two(p2) => {
                if span.is_some() {
                    p2.refresh_required = true;
                }
                self.flush_cells(brl)?;
            }
        }
        Ok(())
    }

    fn write_status(&mut self, brl: &mut BrailleDisplay, cells: &[u8]) -> DriverResult<()> {
        let count = self.model.status_count;
        if count == 0 {
            return Ok(());
        }
        let mut padded = [0u8; MAX_CELLS];
        let used = cells.len().min(count);
        padded[..used].copy_from_slice(&cells[..used]);
        let span = changed_span(&mut self.current_status[..count], &padded[..count]);
        match &mut self.protocol {
            Protocol::One(p1) => {
                if let Some((from, to)) = span {
                    let cells: Vec<u8> = self.current_status[from..to]
                        .iter()
                        .map(|&c| self.output_table[c as usize])
                        .collect();
                    let address = xmt::BRAILLE_DATA + p1.xmt_status_offset + from as u16;
                    Terminal1Codec::write_packet(self.io.as_mut(), address, &cells)?;
                }
            }
            Protocol::Two(p2) => {
                if span.is_some() {
                    p2.refresh_required = true;
                }
                self.flush_cells(brl)?;
            }
        }
        Ok(())
    }

    fn read_command(
        &mut self,
        brl: &mut BrailleDisplay,
        _context: CommandContext,
    ) -> DriverResult<Option<Command>> {
        if let Some(pending) = self.pending.take() {
            return Ok(Some(pending));
        }
        match self.protocol {
            Protocol::One(_) => self.read_command_1(brl),
            Protocol::Two(_) => self.read_command_2(brl),
        }
    }

    fn set_firmness(&mut self, _brl: &mut BrailleDisplay, level: u8) -> DriverResult<bool> {
        match self.protocol {
            Protocol::One(_) => Ok(false),
            Protocol::Two(_) => {
                let scaled = (level as u16 * 98 / self.max_firmness() as u16) as u8 + 2;
                Terminal2Codec::write_packet(self.io.as_mut(), 6, &[scaled, 0x99])?;
                Ok(true)
            }
        }
    }

    fn max_firmness(&self) -> u8 {
        match self.protocol {
            Protocol::One(_) => 0,
            Protocol::Two(_) => 0xFF,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Driver;
    use core_proto::ascii::{ETX, STX};
    use core_transport::SharedMockTransport;

    /// Device model answering the revision-1 identity provocation.
    fn rev1_device(id: u8) -> SharedMockTransport {
        let mock = SharedMockTransport::new();
        mock.respond_with(move |frame| {
            if frame == BAD_PACKET {
                vec![STX, b'I', id, 1, 2, 3, 0, 0, 0, ETX]
            } else {
                Vec::new()
            }
        });
        mock
    }

    /// Device model that only speaks revision 2.
    fn rev2_device(id: u8) -> SharedMockTransport {
        let mock = SharedMockTransport::new();
        mock.respond_with(move |frame| {
            if frame == [STX, 0x42, 0x50, 0x50, ETX] {
                let hi = 0x30 | (id >> 4);
                let lo = 0x30 | (id & 0x0F);
                // Identity: id nibbles, version 1.05, three pad bytes.
                vec![STX, 0x4A, 0x50, 0x58, hi, lo, 0x31, 0x30, 0x35, 0x30, 0x30, 0x30, ETX]
            } else {
                Vec::new()
            }
        });
        mock
    }

    fn probe_rev1(id: u8) -> (TerminalDriver, BrailleDisplay, SharedMockTransport) {
        let mock = rev1_device(id);
        let (driver, display) =
            TerminalDriver::probe(Box::new(mock.clone()), &SERIAL_PROFILE).expect("probe");
        (driver, display, mock)
    }

    fn probe_rev2(id: u8) -> (TerminalDriver, BrailleDisplay, SharedMockTransport) {
        let mock = rev2_device(id);
        let (driver, display) =
            TerminalDriver::probe(Box::new(mock.clone()), &USB_PROFILE).expect("probe");
        (driver, display, mock)
    }

    fn read(driver: &mut TerminalDriver, brl: &mut BrailleDisplay) -> Option<Command> {
        driver.read_command(brl, CommandContext::Screen).expect("read")
    }

    #[test]
    fn revision1_identity_initialises_geometry() {
        let (driver, display, mock) = probe_rev1(3);
        assert_eq!(driver.model.name, "IB 80 CR Soft");
        assert_eq!(display.text_columns, 80);
        assert_eq!(display.status_columns, 4);

        let frames = mock.take_writes();
        // Bad packet, then translation disable for status and text, then
        // the initial status and text images.
        assert_eq!(frames[0], BAD_PACKET.to_vec());
        assert_eq!(frames[1][1], b'S');
        let address = ((frames[1][2] as u16) << 8) | frames[1][3] as u16;
        assert_eq!(address, xmt::BRAILLE_WRITE);
        let address = ((frames[2][2] as u16) << 8) | frames[2][3] as u16;
        assert_eq!(address, xmt::BRAILLE_WRITE + 4);
        assert_eq!(frames.len(), 5);
    }

    #[test]
    fn revision1_writes_only_the_changed_cells() {
        let (mut driver, mut display, mock) = probe_rev1(3);
        mock.take_writes();

        driver.write_window(&mut display, &[]).unwrap();
        assert!(mock.take_writes().is_empty());

        display.buffer[10] = 0x07;
        display.buffer[11] = 0x1C;
        driver.write_window(&mut display, &[]).unwrap();
        let frames = mock.take_writes();
        assert_eq!(frames.len(), 1);
        let frame = &frames[0];
        let address = ((frame[2] as u16) << 8) | frame[3] as u16;
        // Text region begins after the four status cells.
        assert_eq!(address, xmt::BRAILLE_DATA + 4 + 10);
        // size = 6 header + 2 cells + ETX
        assert_eq!(frame.len(), 9);
        assert_eq!(frame[frame.len() - 1], ETX);
    }

    #[test]
    fn revision1_routing_key_routes() {
        let (mut driver, mut display, mock) = probe_rev1(3);
        mock.take_writes();
        // Cursor routing range starts after the 4 status keys: base
        // 0x300 + 4*3. Key 5 is 15 codes further.
        let code = 0x300 + 12 + 15;
        mock.push_input(&[STX, b'K', (code >> 8) as u8, (code & 0xFF) as u8, 0x00, 0x0A, 1, 0, 0, ETX]);
        let cmd = read(&mut driver, &mut display).expect("press");
        assert_eq!(cmd.cmd(), blk::ROUTE | 5);
        assert!(cmd.has(CmdFlags::REPEAT_DELAY));

        mock.push_input(&[STX, b'K', (code >> 8) as u8, (code & 0xFF) as u8, 0x00, 0x0A, 0, 0, 0, ETX]);
        let cmd = read(&mut driver, &mut display).expect("release");
        assert_eq!(cmd, Command::block(blk::ROUTE, 5));
    }

    #[test]
    fn revision1_front_key_commands() {
        let (mut driver, mut display, mock) = probe_rev1(0);
        mock.take_writes();
        // Front key 4 (0-based), i.e. the fifth key: code 3 + 4*3.
        let code = 3 + 12;
        mock.push_input(&[STX, b'K', 0, code as u8, 0x00, 0x0A, 1, 0, 0, ETX]);
        let cmd = read(&mut driver, &mut display).expect("press");
        assert_eq!(cmd.cmd(), BrlCmd::Home as u32);

        mock.push_input(&[STX, b'K', 0, code as u8, 0x00, 0x0A, 0, 0, 0, ETX]);
        let cmd = read(&mut driver, &mut display).expect("release");
        assert_eq!(cmd, Command::simple(BrlCmd::Home));
    }

    #[test]
    fn two_routing_keys_capture_a_region() {
        let (mut driver, mut display, mock) = probe_rev1(0);
        mock.take_writes();
        // No status cells on this model: cursor base is 0x300.
        let key = |index: u16, pressed: u8| {
            let code = 0x300 + index * 3;
            vec![STX, b'K', (code >> 8) as u8, (code & 0xFF) as u8, 0x00, 0x0A, pressed, 0, 0, ETX]
        };
        mock.push_input(&key(2, 1));
        let _ = read(&mut driver, &mut display);
        mock.push_input(&key(9, 1));
        let _ = read(&mut driver, &mut display);
        // First release resolves the chord.
        mock.push_input(&key(9, 0));
        let begin = read(&mut driver, &mut display).expect("begin");
        assert_eq!(begin, Command::block(blk::CUTBEGIN, 2));
        // The matching end command is held pending.
        let end = read(&mut driver, &mut display).expect("pending");
        assert_eq!(end, Command::block(blk::CUTLINE, 9));
    }

    #[test]
    fn revision2_negotiated_when_rev1_is_silent() {
        let (mut driver, display, mock) = probe_rev2(0x16);
        assert_eq!(driver.model.name, "EL 80s");
        assert_eq!(display.text_columns, 80);
        mock.take_writes();

        // Firmness is a revision-2 capability.
        let mut brl = display.clone();
        assert!(driver.set_firmness(&mut brl, 0xFF).unwrap());
        let frames = mock.take_writes();
        assert_eq!(frames.len(), 1);
        // 98 + 2, then the 0x99 terminator, nibble-armoured.
        assert_eq!(frames[0], vec![STX, 0x46, 0x50, 0x52, 0x36, 0x34, 0x39, 0x39, ETX]);
    }

    #[test]
    fn revision2_window_flushes_whole_image() {
        let (mut driver, mut display, mock) = probe_rev2(0x16);
        mock.take_writes();

        driver.write_window(&mut display, &[]).unwrap();
        assert!(mock.take_writes().is_empty(), "clean window writes nothing");

        display.buffer[0] = 0x01;
        driver.write_window(&mut display, &[]).unwrap();
        let frames = mock.take_writes();
        assert_eq!(frames.len(), 1);
        // Command 3, image = 2 status + 80 text cells.
        assert_eq!(frames[0][1], 0x43);
        let nibbles = (frames[0].len() - 5) / 2;
        assert_eq!(nibbles, 82);
    }

    #[test]
    fn serial_probe_cycles_bauds_before_failing() {
        let mock = SharedMockTransport::new();
        let result = TerminalDriver::probe(Box::new(mock.clone()), &SERIAL_PROFILE);
        assert!(matches!(result, Err(DriverError::ProbeFailed(_))));
        assert_eq!(mock.bauds_seen(), vec![19200, 38400]);
    }
}
