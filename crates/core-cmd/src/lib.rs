//! core-cmd: the command vocabulary shared by drivers and the dispatcher.
//!
//! A command is a 24-bit word, `FLAGS[23:16] | BLK[15:8] | ARG[7:0]`.
//! `blk == 0` denotes a simple command whose code lives in the argument
//! byte; non-zero blocks are parameterised commands whose argument carries
//! a cell index, character, dot pattern, or similar.
//!
//! The code-point numbering is load-bearing: remote API clients address
//! commands by these exact values, so the enum discriminants and block
//! constants below must never be renumbered. New simple commands append,
//! new blocks take the next free block byte.
//!
//! Invariants:
//! * `Command::from_parts(c.blk(), c.arg(), c.flags()) == c` for any word.
//! * Flag bytes are context-dependent: the same bit means `TOGGLE_ON` on a
//!   simple command and `CHAR_CONTROL` on a pass-through block. The typed
//!   accessors below exist so call sites never test a flag in the wrong
//!   context.

use std::fmt;

pub mod alert;
pub mod api;
pub mod repeat;

pub use alert::{Alert, AlertSink, NullAlerts};

/// Dispatch mode passed to a driver's command read; it gates which
/// commands the driver's tables may produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommandContext {
    #[default]
    Screen,
    Help,
    Status,
    Menu,
    Message,
    Waiting,
}

/// Mask for the argument byte of a command word.
pub const MSK_ARG: u32 = 0x0000FF;
/// Mask for the block byte of a command word.
pub const MSK_BLK: u32 = 0x00FF00;
/// Mask for the flag byte of a command word.
pub const MSK_FLG: u32 = 0xFF0000;
/// Mask for the block + argument portion (the command proper).
pub const MSK_CMD: u32 = MSK_BLK | MSK_ARG;

/// Simple (block-zero) commands.
///
/// Discriminants follow the legacy numbering and must stay stable; the
/// groups below mirror the original ordering (vertical motion, horizontal
/// motion, implicit motion, feature toggles, mode selection, preference
/// control, menu navigation, speech, terminal switching, miscellaneous).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BrlCmd {
    Noop = 0,

    LnUp = 1,
    LnDn = 2,
    WinUp = 3,
    WinDn = 4,
    PrDifLn = 5,
    NxDifLn = 6,
    AttrUp = 7,
    AttrDn = 8,
    Top = 9,
    Bot = 10,
    TopLeft = 11,
    BotLeft = 12,
    PrPgrph = 13,
    NxPgrph = 14,
    PrPrompt = 15,
    NxPrompt = 16,
    PrSearch = 17,
    NxSearch = 18,

    ChrLt = 19,
    ChrRt = 20,
    HWinLt = 21,
    HWinRt = 22,
    FWinLt = 23,
    FWinRt = 24,
    FWinLtSkip = 25,
    FWinRtSkip = 26,
    LnBeg = 27,
    LnEnd = 28,

    Home = 29,
    Back = 30,
    Return = 31,

    Freeze = 32,
    DispMd = 33,
    SixDots = 34,
    SlideWin = 35,
    SkpIdLns = 36,
    SkpBlnkWins = 37,
    CsrVis = 38,
    CsrHide = 39,
    CsrTrk = 40,
    CsrSize = 41,
    CsrBlink = 42,
    AttrVis = 43,
    AttrBlink = 44,
    CapBlink = 45,
    Tunes = 46,
    Autorepeat = 47,
    Autospeak = 48,

    Help = 49,
    Info = 50,
    Learn = 51,

    PrefMenu = 52,
    PrefSave = 53,
    PrefLoad = 54,

    MenuFirstItem = 55,
    MenuLastItem = 56,
    MenuPrevItem = 57,
    MenuNextItem = 58,
    MenuPrevSetting = 59,
    MenuNextSetting = 60,

    Mute = 61,
    SpkHome = 62,
    SayLine = 63,
    SayAbove = 64,
    SayBelow = 65,
    SaySlower = 66,
    SayFaster = 67,
    SaySofter = 68,
    SayLouder = 69,

    SwitchVtPrev = 70,
    SwitchVtNext = 71,

    CsrJmpVert = 72,
    Paste = 73,
    RestartBrl = 74,
    RestartSpeech = 75,

    Offline = 76,
}

impl BrlCmd {
    /// Decode a block-zero argument byte. Unknown codes map to `None` so
    /// the dispatcher can reject them with a cue instead of panicking.
    pub fn from_arg(arg: u8) -> Option<Self> {
        if arg <= BrlCmd::Offline as u8 {
            // Discriminants are dense from 0; the bound check makes the
            // transmute-free match below total.
            Some(match arg {
                0 => BrlCmd::Noop,
                1 => BrlCmd::LnUp,
                2 => BrlCmd::LnDn,
                3 => BrlCmd::WinUp,
                4 => BrlCmd::WinDn,
                5 => BrlCmd::PrDifLn,
                6 => BrlCmd::NxDifLn,
                7 => BrlCmd::AttrUp,
                8 => BrlCmd::AttrDn,
                9 => BrlCmd::Top,
                10 => BrlCmd::Bot,
                11 => BrlCmd::TopLeft,
                12 => BrlCmd::BotLeft,
                13 => BrlCmd::PrPgrph,
                14 => BrlCmd::NxPgrph,
                15 => BrlCmd::PrPrompt,
                16 => BrlCmd::NxPrompt,
                17 => BrlCmd::PrSearch,
                18 => BrlCmd::NxSearch,
                19 => BrlCmd::ChrLt,
                20 => BrlCmd::ChrRt,
                21 => BrlCmd::HWinLt,
                22 => BrlCmd::HWinRt,
                23 => BrlCmd::FWinLt,
                24 => BrlCmd::FWinRt,
                25 => BrlCmd::FWinLtSkip,
                26 => BrlCmd::FWinRtSkip,
                27 => BrlCmd::LnBeg,
                28 => BrlCmd::LnEnd,
                29 => BrlCmd::Home,
                30 => BrlCmd::Back,
                31 => BrlCmd::Return,
                32 => BrlCmd::Freeze,
                33 => BrlCmd::DispMd,
                34 => BrlCmd::SixDots,
                35 => BrlCmd::SlideWin,
                36 => BrlCmd::SkpIdLns,
                37 => BrlCmd::SkpBlnkWins,
                38 => BrlCmd::CsrVis,
                39 => BrlCmd::CsrHide,
                40 => BrlCmd::CsrTrk,
                41 => BrlCmd::CsrSize,
                42 => BrlCmd::CsrBlink,
                43 => BrlCmd::AttrVis,
                44 => BrlCmd::AttrBlink,
                45 => BrlCmd::CapBlink,
                46 => BrlCmd::Tunes,
                47 => BrlCmd::Autorepeat,
                48 => BrlCmd::Autospeak,
                49 => BrlCmd::Help,
                50 => BrlCmd::Info,
                51 => BrlCmd::Learn,
                52 => BrlCmd::PrefMenu,
                53 => BrlCmd::PrefSave,
                54 => BrlCmd::PrefLoad,
                55 => BrlCmd::MenuFirstItem,
                56 => BrlCmd::MenuLastItem,
                57 => BrlCmd::MenuPrevItem,
                58 => BrlCmd::MenuNextItem,
                59 => BrlCmd::MenuPrevSetting,
                60 => BrlCmd::MenuNextSetting,
                61 => BrlCmd::Mute,
                62 => BrlCmd::SpkHome,
                63 => BrlCmd::SayLine,
                64 => BrlCmd::SayAbove,
                65 => BrlCmd::SayBelow,
                66 => BrlCmd::SaySlower,
                67 => BrlCmd::SayFaster,
                68 => BrlCmd::SaySofter,
                69 => BrlCmd::SayLouder,
                70 => BrlCmd::SwitchVtPrev,
                71 => BrlCmd::SwitchVtNext,
                72 => BrlCmd::CsrJmpVert,
                73 => BrlCmd::Paste,
                74 => BrlCmd::RestartBrl,
                75 => BrlCmd::RestartSpeech,
                76 => BrlCmd::Offline,
                _ => unreachable!(),
            })
        } else {
            None
        }
    }
}

/// Parameterised command blocks (the BLK byte, pre-shifted).
pub mod blk {
    /// Bring cursor to character.
    pub const ROUTE: u32 = 0x100;
    /// Start new clipboard capture at character.
    pub const CUTBEGIN: u32 = 0x200;
    /// Append to existing capture from character.
    pub const CUTAPPEND: u32 = 0x300;
    /// Rectangular cut to character.
    pub const CUTRECT: u32 = 0x400;
    /// Linear cut to character.
    pub const CUTLINE: u32 = 0x500;
    /// Switch to virtual terminal.
    pub const SWITCHVT: u32 = 0x600;
    /// Go up to nearest line without greater indent.
    pub const PRINDENT: u32 = 0x700;
    /// Go down to nearest line without greater indent.
    pub const NXINDENT: u32 = 0x800;
    /// Describe character.
    pub const DESCCHAR: u32 = 0x900;
    /// Position left end of window at character.
    pub const SETLEFT: u32 = 0xA00;
    /// Remember current window position.
    pub const SETMARK: u32 = 0xB00;
    /// Go to remembered window position.
    pub const GOTOMARK: u32 = 0xC00;
    /// Go to screen row.
    pub const GOTOLINE: u32 = 0xD00;
    /// Go up to nearest line with a different character in this column.
    pub const PRDIFCHAR: u32 = 0xE00;
    /// Go down to nearest line with a different character in this column.
    pub const NXDIFCHAR: u32 = 0xF00;

    /// Input a special key.
    pub const PASSKEY: u32 = 0x2000;
    /// Input a character by value.
    pub const PASSCHAR: u32 = 0x2100;
    /// Input a character as braille dots.
    pub const PASSDOTS: u32 = 0x2200;
}

/// Special keys for the `PASSKEY` block argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BrlKey {
    Enter = 0,
    Tab = 1,
    Backspace = 2,
    Escape = 3,
    CursorLeft = 4,
    CursorRight = 5,
    CursorUp = 6,
    CursorDown = 7,
    PageUp = 8,
    PageDown = 9,
    Home = 10,
    End = 11,
    Insert = 12,
    Delete = 13,
    /// Function keys occupy `FUNCTION + n`.
    Function = 14,
}

bitflags::bitflags! {
    /// Flags valid on simple commands and non-pass-through blocks.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct CmdFlags: u32 {
        /// Set the toggle rather than flip it.
        const TOGGLE_ON      = 0x010000;
        /// Clear the toggle rather than flip it.
        const TOGGLE_OFF     = 0x020000;
        /// After motion, route the cursor into the new window.
        const MOTION_ROUTE   = 0x040000;
        /// Autorepeat: wait the delay before the first repeat.
        const REPEAT_DELAY   = 0x400000;
        /// Autorepeat: fire once immediately as well.
        const REPEAT_INITIAL = 0x800000;
    }
}

bitflags::bitflags! {
    /// Flags valid on `PASSKEY`/`PASSCHAR`/`PASSDOTS`.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct CharFlags: u32 {
        const CONTROL = 0x010000;
        const META    = 0x020000;
        const UPPER   = 0x040000;
        const SHIFT   = 0x080000;
    }
}

bitflags::bitflags! {
    /// Flags valid on `GOTOLINE`.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct LineFlags: u32 {
        /// The argument is scaled onto 0..rows-1 from the full byte range.
        const SCALED = 0x010000;
        /// Also move the window to the left margin.
        const TOLEFT = 0x020000;
    }
}

/// One 24-bit command word.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Command(pub u32);

impl Command {
    pub const NOOP: Command = Command(0);

    pub fn simple(cmd: BrlCmd) -> Self {
        Command(cmd as u32)
    }

    pub fn block(block: u32, arg: u8) -> Self {
        debug_assert_eq!(block & !MSK_BLK, 0, "block byte out of position");
        Command(block | arg as u32)
    }

    pub fn from_parts(blk: u32, arg: u8, flags: u32) -> Self {
        Command((blk & MSK_BLK) | arg as u32 | (flags & MSK_FLG))
    }

    pub fn blk(self) -> u32 {
        self.0 & MSK_BLK
    }

    pub fn arg(self) -> u8 {
        (self.0 & MSK_ARG) as u8
    }

    /// Block + argument with the flag byte stripped.
    pub fn cmd(self) -> u32 {
        self.0 & MSK_CMD
    }

    pub fn flags(self) -> u32 {
        self.0 & MSK_FLG
    }

    /// The simple command, when `blk == 0`.
    pub fn brl_cmd(self) -> Option<BrlCmd> {
        if self.blk() == 0 {
            BrlCmd::from_arg(self.arg())
        } else {
            None
        }
    }

    pub fn is(self, cmd: BrlCmd) -> bool {
        self.cmd() == cmd as u32
    }

    pub fn with_flags(self, flags: u32) -> Self {
        Command(self.0 | (flags & MSK_FLG))
    }

    pub fn has(self, flags: CmdFlags) -> bool {
        self.0 & flags.bits() == flags.bits()
    }

    pub fn cmd_flags(self) -> CmdFlags {
        CmdFlags::from_bits_truncate(self.flags())
    }

    pub fn char_flags(self) -> CharFlags {
        CharFlags::from_bits_truncate(self.flags())
    }

    pub fn line_flags(self) -> LineFlags {
        LineFlags::from_bits_truncate(self.flags())
    }

    /// Replace the simple command, keeping argument and flags. Used by the
    /// skip-identical-lines remap in the dispatcher.
    pub fn retarget(self, cmd: BrlCmd) -> Self {
        Command((self.0 & !MSK_CMD) | cmd as u32)
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Command({:06X})", self.0)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:06X}", self.0)
    }
}

/// Rescale an integer from one inclusive range onto another, rounding to
/// nearest. Used by `GOTOLINE` with `LineFlags::SCALED`.
pub fn rescale(value: u32, from_max: u32, to_max: u32) -> u32 {
    if from_max == 0 {
        return 0;
    }
    ((value * to_max) + (from_max / 2)) / from_max
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn legacy_code_points_preserved() {
        // Spot checks against the historical numbering.
        assert_eq!(BrlCmd::Noop as u32, 0);
        assert_eq!(BrlCmd::LnUp as u32, 1);
        assert_eq!(BrlCmd::NxSearch as u32, 18);
        assert_eq!(BrlCmd::LnEnd as u32, 28);
        assert_eq!(BrlCmd::Autospeak as u32, 48);
        assert_eq!(BrlCmd::RestartSpeech as u32, 75);
        assert_eq!(blk::ROUTE, 0x100);
        assert_eq!(blk::GOTOMARK, 0xC00);
        assert_eq!(blk::PASSKEY, 0x2000);
        assert_eq!(blk::PASSDOTS, 0x2200);
        assert_eq!(CmdFlags::TOGGLE_ON.bits(), 0x010000);
        assert_eq!(CmdFlags::REPEAT_INITIAL.bits(), 0x800000);
        assert_eq!(CharFlags::SHIFT.bits(), 0x080000);
    }

    #[test]
    fn word_round_trips_through_parts() {
        let c = Command::from_parts(blk::CUTAPPEND, 17, CmdFlags::REPEAT_DELAY.bits());
        assert_eq!(c.blk(), blk::CUTAPPEND);
        assert_eq!(c.arg(), 17);
        assert_eq!(c.flags(), CmdFlags::REPEAT_DELAY.bits());
        assert_eq!(Command::from_parts(c.blk(), c.arg(), c.flags()), c);
    }

    #[test]
    fn every_simple_code_decodes() {
        for arg in 0..=BrlCmd::Offline as u8 {
            let cmd = BrlCmd::from_arg(arg).expect("dense numbering");
            assert_eq!(cmd as u8, arg);
        }
        assert_eq!(BrlCmd::from_arg(BrlCmd::Offline as u8 + 1), None);
    }

    #[test]
    fn retarget_keeps_flags() {
        let c = Command::simple(BrlCmd::LnUp).with_flags(CmdFlags::REPEAT_DELAY.bits());
        let r = c.retarget(BrlCmd::PrDifLn);
        assert_eq!(r.brl_cmd(), Some(BrlCmd::PrDifLn));
        assert_eq!(r.flags(), CmdFlags::REPEAT_DELAY.bits());
    }

    #[test]
    fn rescale_endpoints() {
        assert_eq!(rescale(0, 255, 24), 0);
        assert_eq!(rescale(255, 255, 24), 24);
        assert_eq!(rescale(128, 255, 24), 12);
    }
}
