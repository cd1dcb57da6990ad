//! Reversible mapping between command words and 64-bit API key codes.
//!
//! Remote clients see commands as a wider code: pass-through characters and
//! special keys become keysym values (X11 numbering, with the 0x01000000
//! Unicode escape for code points above 0xFF), everything else becomes a
//! "command"-typed code carrying the block and argument. Flag bits move to
//! the high word so a client can mask them off uniformly.
//!
//! Laws:
//! * `api_to_cmd(cmd_to_api(c)) == Some(c)` for every command whose bits
//!   the mapping covers (block, argument, and the flags meaningful for
//!   that block).
//! * An API code that names no representable command maps to `None`.

use crate::{BrlKey, CharFlags, CmdFlags, Command, LineFlags, MSK_ARG, blk};

pub const KEY_TYPE_MASK: u64 = 0xE000_0000;
pub const KEY_TYPE_CMD: u64 = 0x2000_0000;
pub const KEY_TYPE_SYM: u64 = 0x0000_0000;
pub const KEY_CODE_MASK: u64 = 0x1FFF_FFFF;
pub const KEY_CMD_BLK_SHIFT: u32 = 8;
pub const KEY_CMD_BLK_MASK: u64 = 0x1FFF_FF00;
pub const KEY_CMD_ARG_MASK: u64 = 0x0000_00FF;

pub const KEY_SYM_BACKSPACE: u64 = 0xFF08;
pub const KEY_SYM_TAB: u64 = 0xFF09;
pub const KEY_SYM_LINEFEED: u64 = 0xFF0A;
pub const KEY_SYM_ESCAPE: u64 = 0xFF1B;
pub const KEY_SYM_HOME: u64 = 0xFF50;
pub const KEY_SYM_LEFT: u64 = 0xFF51;
pub const KEY_SYM_UP: u64 = 0xFF52;
pub const KEY_SYM_RIGHT: u64 = 0xFF53;
pub const KEY_SYM_DOWN: u64 = 0xFF54;
pub const KEY_SYM_PAGE_UP: u64 = 0xFF55;
pub const KEY_SYM_PAGE_DOWN: u64 = 0xFF56;
pub const KEY_SYM_END: u64 = 0xFF57;
pub const KEY_SYM_INSERT: u64 = 0xFF63;
pub const KEY_SYM_DELETE: u64 = 0xFFFF;
pub const KEY_SYM_FUNCTION: u64 = 0xFFBE;
pub const KEY_SYM_UNICODE: u64 = 0x0100_0000;

/// Flag bits occupy the word above the 32-bit code.
pub const KEY_FLG_TOGGLE_ON: u64 = 1 << 32;
pub const KEY_FLG_TOGGLE_OFF: u64 = 1 << 33;
pub const KEY_FLG_ROUTE: u64 = 1 << 34;
pub const KEY_FLG_REPEAT_INITIAL: u64 = 1 << 35;
pub const KEY_FLG_REPEAT_DELAY: u64 = 1 << 36;
pub const KEY_FLG_LINE_SCALED: u64 = 1 << 37;
pub const KEY_FLG_LINE_TOLEFT: u64 = 1 << 38;
pub const KEY_FLG_CONTROL: u64 = 1 << 39;
pub const KEY_FLG_META: u64 = 1 << 40;
pub const KEY_FLG_UPPER: u64 = 1 << 41;
pub const KEY_FLG_SHIFT: u64 = 1 << 42;

fn key_to_sym(arg: u8) -> u64 {
    use BrlKey as K;
    match arg {
        a if a == K::Enter as u8 => KEY_SYM_LINEFEED,
        a if a == K::Tab as u8 => KEY_SYM_TAB,
        a if a == K::Backspace as u8 => KEY_SYM_BACKSPACE,
        a if a == K::Escape as u8 => KEY_SYM_ESCAPE,
        a if a == K::CursorLeft as u8 => KEY_SYM_LEFT,
        a if a == K::CursorRight as u8 => KEY_SYM_RIGHT,
        a if a == K::CursorUp as u8 => KEY_SYM_UP,
        a if a == K::CursorDown as u8 => KEY_SYM_DOWN,
        a if a == K::PageUp as u8 => KEY_SYM_PAGE_UP,
        a if a == K::PageDown as u8 => KEY_SYM_PAGE_DOWN,
        a if a == K::Home as u8 => KEY_SYM_HOME,
        a if a == K::End as u8 => KEY_SYM_END,
        a if a == K::Insert as u8 => KEY_SYM_INSERT,
        a if a == K::Delete as u8 => KEY_SYM_DELETE,
        a => KEY_SYM_FUNCTION + (a - BrlKey::Function as u8) as u64,
    }
}

fn sym_to_key(sym: u64) -> Option<u8> {
    Some(match sym {
        KEY_SYM_LINEFEED => BrlKey::Enter as u8,
        KEY_SYM_TAB => BrlKey::Tab as u8,
        KEY_SYM_BACKSPACE => BrlKey::Backspace as u8,
        KEY_SYM_ESCAPE => BrlKey::Escape as u8,
        KEY_SYM_LEFT => BrlKey::CursorLeft as u8,
        KEY_SYM_RIGHT => BrlKey::CursorRight as u8,
        KEY_SYM_UP => BrlKey::CursorUp as u8,
        KEY_SYM_DOWN => BrlKey::CursorDown as u8,
        KEY_SYM_PAGE_UP => BrlKey::PageUp as u8,
        KEY_SYM_PAGE_DOWN => BrlKey::PageDown as u8,
        KEY_SYM_HOME => BrlKey::Home as u8,
        KEY_SYM_END => BrlKey::End as u8,
        KEY_SYM_INSERT => BrlKey::Insert as u8,
        KEY_SYM_DELETE => BrlKey::Delete as u8,
        s if (KEY_SYM_FUNCTION..KEY_SYM_FUNCTION + 35).contains(&s) => {
            BrlKey::Function as u8 + (s - KEY_SYM_FUNCTION) as u8
        }
        _ => return None,
    })
}

/// Translate a command word into its API key code.
pub fn cmd_to_api(command: Command) -> u64 {
    let mut code = match command.blk() {
        blk::PASSCHAR => {
            // The argument byte is Latin-1; anything wider would take the
            // Unicode escape.
            let wc = command.arg() as u64;
            if wc < 0x100 { wc } else { KEY_SYM_UNICODE | wc }
        }
        blk::PASSKEY => key_to_sym(command.arg()),
        _ => {
            KEY_TYPE_CMD
                | (((command.blk() as u64) >> 8) << KEY_CMD_BLK_SHIFT)
                | (command.0 as u64 & MSK_ARG as u64)
        }
    };

    if command.blk() == blk::GOTOLINE {
        let lf = command.line_flags();
        if lf.contains(LineFlags::SCALED) {
            code |= KEY_FLG_LINE_SCALED;
        }
        if lf.contains(LineFlags::TOLEFT) {
            code |= KEY_FLG_LINE_TOLEFT;
        }
    }

    if command.blk() == blk::PASSCHAR || command.blk() == blk::PASSKEY {
        let cf = command.char_flags();
        if cf.contains(CharFlags::CONTROL) {
            code |= KEY_FLG_CONTROL;
        }
        if cf.contains(CharFlags::META) {
            code |= KEY_FLG_META;
        }
        if cf.contains(CharFlags::UPPER) {
            code |= KEY_FLG_UPPER;
        }
        if cf.contains(CharFlags::SHIFT) {
            code |= KEY_FLG_SHIFT;
        }
    } else {
        let cf = command.cmd_flags();
        if cf.contains(CmdFlags::TOGGLE_ON) {
            code |= KEY_FLG_TOGGLE_ON;
        }
        if cf.contains(CmdFlags::TOGGLE_OFF) {
            code |= KEY_FLG_TOGGLE_OFF;
        }
        if cf.contains(CmdFlags::MOTION_ROUTE) {
            code |= KEY_FLG_ROUTE;
        }
    }

    if command.has(CmdFlags::REPEAT_INITIAL) {
        code |= KEY_FLG_REPEAT_INITIAL;
    }
    if command.has(CmdFlags::REPEAT_DELAY) {
        code |= KEY_FLG_REPEAT_DELAY;
    }

    code
}

/// Translate an API key code back into a command word. `None` when the
/// code names no representable command.
pub fn api_to_cmd(code: u64) -> Option<Command> {
    let cmd = match code & KEY_TYPE_MASK {
        KEY_TYPE_CMD => {
            (((code & KEY_CMD_BLK_MASK) >> KEY_CMD_BLK_SHIFT) as u32) << 8
                | (code & KEY_CMD_ARG_MASK) as u32
        }
        KEY_TYPE_SYM => {
            let keysym = code & KEY_CODE_MASK;
            if let Some(key) = sym_to_key(keysym) {
                blk::PASSKEY | key as u32
            } else if keysym < 0x100 {
                blk::PASSCHAR | keysym as u32
            } else if keysym & 0x1F00_0000 == KEY_SYM_UNICODE {
                let value = keysym & 0x00FF_FFFF;
                if value < 0x100 {
                    blk::PASSCHAR | value as u32
                } else {
                    // Not representable in the 8-bit argument.
                    return None;
                }
            } else {
                return None;
            }
        }
        _ => return None,
    };

    let mut flags = 0u32;
    if code & KEY_FLG_TOGGLE_ON != 0 {
        flags |= CmdFlags::TOGGLE_ON.bits();
    }
    if code & KEY_FLG_TOGGLE_OFF != 0 {
        flags |= CmdFlags::TOGGLE_OFF.bits();
    }
    if code & KEY_FLG_ROUTE != 0 {
        flags |= CmdFlags::MOTION_ROUTE.bits();
    }
    if code & KEY_FLG_REPEAT_INITIAL != 0 {
        flags |= CmdFlags::REPEAT_INITIAL.bits();
    }
    if code & KEY_FLG_REPEAT_DELAY != 0 {
        flags |= CmdFlags::REPEAT_DELAY.bits();
    }
    if code & KEY_FLG_LINE_SCALED != 0 {
        flags |= LineFlags::SCALED.bits();
    }
    if code & KEY_FLG_LINE_TOLEFT != 0 {
        flags |= LineFlags::TOLEFT.bits();
    }
    if code & KEY_FLG_CONTROL != 0 {
        flags |= CharFlags::CONTROL.bits();
    }
    if code & KEY_FLG_META != 0 {
        flags |= CharFlags::META.bits();
    }
    if code & KEY_FLG_UPPER != 0 {
        flags |= CharFlags::UPPER.bits();
    }
    if code & KEY_FLG_SHIFT != 0 {
        flags |= CharFlags::SHIFT.bits();
    }

    Some(Command(cmd | flags))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BrlCmd;

    #[test]
    fn simple_commands_round_trip() {
        for cmd in [
            Command::simple(BrlCmd::LnUp),
            Command::simple(BrlCmd::Home),
            Command::simple(BrlCmd::CsrVis).with_flags(CmdFlags::TOGGLE_ON.bits()),
            Command::simple(BrlCmd::FWinRt).with_flags(CmdFlags::REPEAT_DELAY.bits()),
        ] {
            assert_eq!(api_to_cmd(cmd_to_api(cmd)), Some(cmd), "{cmd}");
        }
    }

    #[test]
    fn block_commands_round_trip() {
        for cmd in [
            Command::block(blk::ROUTE, 7),
            Command::block(blk::CUTAPPEND, 17),
            Command::block(blk::GOTOLINE, 200)
                .with_flags(LineFlags::SCALED.bits() | LineFlags::TOLEFT.bits()),
            Command::block(blk::SETMARK, 3),
        ] {
            assert_eq!(api_to_cmd(cmd_to_api(cmd)), Some(cmd), "{cmd}");
        }
    }

    #[test]
    fn pass_through_round_trips_as_keysyms() {
        let enter = Command::block(blk::PASSKEY, BrlKey::Enter as u8);
        assert_eq!(cmd_to_api(enter) & KEY_CODE_MASK, KEY_SYM_LINEFEED);
        assert_eq!(api_to_cmd(cmd_to_api(enter)), Some(enter));

        let f5 = Command::block(blk::PASSKEY, BrlKey::Function as u8 + 4);
        assert_eq!(cmd_to_api(f5) & KEY_CODE_MASK, KEY_SYM_FUNCTION + 4);
        assert_eq!(api_to_cmd(cmd_to_api(f5)), Some(f5));

        let ch = Command::block(blk::PASSCHAR, b'a').with_flags(CharFlags::CONTROL.bits());
        assert_eq!(api_to_cmd(cmd_to_api(ch)), Some(ch));
    }

    #[test]
    fn unicode_escape_decodes_when_narrow() {
        let code = KEY_SYM_UNICODE | 0xE9; // é
        assert_eq!(api_to_cmd(code), Some(Command::block(blk::PASSCHAR, 0xE9)));
        let wide = KEY_SYM_UNICODE | 0x2603;
        assert_eq!(api_to_cmd(wide), None);
    }

    #[test]
    fn unknown_codes_reject() {
        assert_eq!(api_to_cmd(0x4000_0000), None);
        assert_eq!(api_to_cmd(KEY_SYM_FUNCTION + 100), None);
    }
}
