//! Autorepeat flag filtering.
//!
//! Drivers attach `REPEAT_DELAY`/`REPEAT_INITIAL` to every command produced
//! while a key is still going down; this module decides what actually fires
//! and when. Only an allow-list of commands may repeat; repeat flags on
//! anything else are stripped (and a delayed press of a non-repeatable
//! command is swallowed entirely, since the device will re-emit it on
//! release).
//!
//! Time is supplied by the caller as a tick timestamp so the whole state
//! machine is deterministic under test; no clock is read here.

use std::time::Duration;

use crate::{BrlCmd, CmdFlags, Command, blk};

/// Both repeat flag bits.
pub const REPEAT_MASK: u32 = CmdFlags::REPEAT_DELAY.bits() | CmdFlags::REPEAT_INITIAL.bits();

/// Autorepeat state owned by the dispatcher.
#[derive(Debug, Clone)]
pub struct RepeatState {
    command: Option<Command>,
    timeout: Option<Duration>,
    started: bool,
    at: Duration,
}

impl Default for RepeatState {
    fn default() -> Self {
        Self::new()
    }
}

impl RepeatState {
    pub fn new() -> Self {
        Self {
            command: None,
            timeout: None,
            started: false,
            at: Duration::ZERO,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// True when a repeat is armed and will fire once its timeout elapses.
    pub fn is_armed(&self) -> bool {
        self.timeout.is_some()
    }
}

fn is_repeatable(command: Command, panning: bool) -> bool {
    match command.blk() {
        blk::PASSCHAR | blk::PASSDOTS => true,
        blk::PASSKEY => {
            use crate::BrlKey as K;
            matches!(
                command.arg(),
                a if a == K::Backspace as u8
                    || a == K::Delete as u8
                    || a == K::PageUp as u8
                    || a == K::PageDown as u8
                    || a == K::CursorUp as u8
                    || a == K::CursorDown as u8
                    || a == K::CursorLeft as u8
                    || a == K::CursorRight as u8
            )
        }
        0 => match command.brl_cmd() {
            Some(BrlCmd::FWinLt) | Some(BrlCmd::FWinRt) => panning,
            Some(
                BrlCmd::LnUp
                | BrlCmd::LnDn
                | BrlCmd::PrDifLn
                | BrlCmd::NxDifLn
                | BrlCmd::ChrLt
                | BrlCmd::ChrRt
                | BrlCmd::MenuPrevItem
                | BrlCmd::MenuNextItem
                | BrlCmd::MenuPrevSetting
                | BrlCmd::MenuNextSetting,
            ) => true,
            _ => false,
        },
        _ => false,
    }
}

/// Apply autorepeat semantics to one driver read.
///
/// `command` is the driver's output for this poll (`None` = nothing read).
/// With `state` present (autorepeat enabled): a quiet poll may be replaced
/// by a re-fire of the stored command once the armed timeout has elapsed; a
/// fresh command arms or cancels the repeat according to its flags. With
/// `state` absent, repeat flags are stripped and delayed presses swallowed.
pub fn handle_repeat_flags(
    command: &mut Option<Command>,
    state: Option<&mut RepeatState>,
    now: Duration,
    panning: bool,
    delay: Duration,
    interval: Duration,
) {
    let Some(state) = state else {
        if let Some(cmd) = command.as_mut() {
            if cmd.has(CmdFlags::REPEAT_DELAY) {
                *cmd = Command::NOOP;
            } else {
                *cmd = Command(cmd.0 & !REPEAT_MASK);
            }
        }
        return;
    };

    match command {
        None => {
            if let Some(timeout) = state.timeout {
                if now.saturating_sub(state.at) >= timeout {
                    *command = state.command;
                    state.at = now;
                    state.timeout = Some(interval);
                    state.started = true;
                    tracing::trace!(target: "dispatch.repeat", cmd = %command.unwrap_or(Command::NOOP), "refire");
                }
            }
        }
        Some(cmd) => {
            let mut flags = cmd.flags() & REPEAT_MASK;
            *cmd = Command(cmd.0 & !REPEAT_MASK);

            if !is_repeatable(*cmd, panning) {
                if flags & CmdFlags::REPEAT_DELAY.bits() != 0 {
                    *cmd = Command::NOOP;
                }
                flags = 0;
            }

            if state.started {
                state.started = false;
                if Some(*cmd) == state.command {
                    // Release of the key whose press already fired.
                    *cmd = Command::NOOP;
                    flags = 0;
                }
            }
            state.command = Some(*cmd);

            if flags & CmdFlags::REPEAT_DELAY.bits() != 0 {
                state.at = now;
                state.timeout = Some(delay);
                if flags & CmdFlags::REPEAT_INITIAL.bits() != 0 {
                    state.started = true;
                } else {
                    *cmd = Command::NOOP;
                }
            } else if flags & CmdFlags::REPEAT_INITIAL.bits() != 0 {
                state.at = now;
                state.timeout = Some(interval);
                state.started = true;
            } else {
                state.timeout = None;
            }
        }
    }
}
