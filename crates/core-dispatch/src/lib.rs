//! core-dispatch: apply device commands to the session, screen and
//! clipboard.
//!
//! One [`Dispatcher::poll`] call consumes at most one driver command: it
//! honours a held pending command first, asks the driver otherwise,
//! filters the result through autorepeat, and applies it. Window motions
//! update the motion anchor (breaking cursor-tracking lock) and invalidate
//! the contraction mapping; `MOTION_ROUTE`-flagged motions then pull the
//! console cursor into the new window.
//!
//! The dispatcher never blocks: a quiet driver yields [`PollOutcome::Idle`]
//! and the update loop moves on to rendering.

use std::path::Path;
use std::time::Duration;

use core_braille::{BrailleDisplay, Driver, DriverResult, TextTable};
use core_clipboard::Clipboard;
use core_cmd::repeat::{RepeatState, handle_repeat_flags};
use core_cmd::{
    Alert, AlertSink, BrlCmd, BrlKey, CharFlags, CmdFlags, Command, CommandContext, LineFlags,
    blk, rescale,
};
use core_config::Preferences;
use core_render::{BlinkState, ContractionEngine, WindowLayout};
use core_screen::{
    FrozenScreen, KeyModifiers, KeyPress, RoutingStatus, Screen, ScreenDescription, ScreenKey,
    Speech,
};
use core_session::{ContractionTrack, Session, WindowDims, track_cursor};

mod input;
mod motion;

/// Everything a dispatch pass works on. The update loop assembles this
/// fresh each tick from its own state.
pub struct DispatchEnv<'a> {
    pub ses: &'a mut Session,
    /// Description of the effective (possibly frozen) screen this tick.
    pub scr: &'a ScreenDescription,
    /// The live back-end; reads go through the frozen snapshot when one
    /// is active.
    pub screen: &'a mut dyn Screen,
    pub frozen: &'a mut Option<FrozenScreen>,
    pub prefs: &'a mut Preferences,
    pub prefs_path: &'a Path,
    pub clipboard: &'a mut Clipboard,
    pub alerts: &'a mut dyn AlertSink,
    pub speech: &'a mut dyn Speech,
    pub blink: &'a mut BlinkState,
    pub contraction: &'a mut ContractionEngine,
    pub contraction_track: &'a mut ContractionTrack,
    pub layout: WindowLayout,
    pub dims: WindowDims,
    pub text_table: &'a TextTable,
    pub info_mode: &'a mut bool,
    /// Window pan distances, derived from the display geometry.
    pub full_shift: usize,
    pub half_shift: usize,
    pub vertical_shift: usize,
    /// Out-parameter: a string the loop should flash on the display.
    pub message: Option<String>,
}

/// The effective screen for reads.
fn reading<'x>(frozen: &'x Option<FrozenScreen>, live: &'x dyn Screen) -> &'x dyn Screen {
    match frozen {
        Some(snapshot) => snapshot,
        None => live,
    }
}

impl DispatchEnv<'_> {
    fn alert(&mut self, alert: Alert) {
        if self.prefs.alert_tunes {
            self.alerts.alert(alert);
        }
    }

    fn rejected(&mut self) {
        self.alert(Alert::CommandRejected);
    }

    /// Map a window cell offset to a screen coordinate. `arg == 0xFF`
    /// addresses the cursor itself.
    fn character_coordinates(
        &self,
        arg: u8,
        end: bool,
        relaxed: bool,
    ) -> Option<(usize, usize)> {
        if arg == 0xFF {
            if self.scr.cursor_ok() {
                return Some((self.scr.posx, self.scr.posy));
            }
            return None;
        }
        let offset = self.text_offset(arg as usize, end, relaxed)?;
        Some((self.ses.winx + offset, self.ses.winy))
    }

    /// Window cell index → offset into the window's screen text span.
    fn text_offset(&self, value: usize, end: bool, relaxed: bool) -> Option<usize> {
        let value = value.checked_sub(self.layout.text_start)?;
        if value >= self.layout.text_count {
            return None;
        }
        let mut value = value;
        if self.ses.winx + value >= self.scr.cols {
            if !relaxed || self.scr.cols == 0 {
                return None;
            }
            value = self.scr.cols - 1 - self.ses.winx;
        }
        if self.contraction.is_active() {
            value = self.contraction.cell_to_input(value, end);
        }
        Some(value)
    }
}

/// Set, clear or flip a toggle per the command's flag bits, returning the
/// final state.
fn toggle_flag(
    flag: &mut bool,
    command: Command,
    env_prefs_tunes: bool,
    alerts: &mut dyn AlertSink,
    audible: bool,
) -> bool {
    let flags = command.cmd_flags();
    let both = CmdFlags::TOGGLE_ON | CmdFlags::TOGGLE_OFF;
    if !flags.contains(both) {
        *flag = if flags.contains(CmdFlags::TOGGLE_ON) {
            true
        } else if flags.contains(CmdFlags::TOGGLE_OFF) {
            false
        } else {
            !*flag
        };
    }
    if audible && env_prefs_tunes {
        alerts.alert(if *flag { Alert::ToggleOn } else { Alert::ToggleOff });
    }
    *flag
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Nothing to do this poll; the loop should stop draining.
    Idle,
    /// A command was consumed (possibly a no-op).
    Handled,
    /// The driver must be torn down and reconstructed.
    RestartRequested,
}

#[derive(Debug, Default)]
pub struct Dispatcher {
    repeat: RepeatState,
    pending: Option<Command>,
    offline: bool,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset_autorepeat(&mut self) {
        self.repeat.reset();
    }

    /// Hold a command to be returned by the next poll, ahead of the
    /// driver.
    pub fn push_pending(&mut self, command: Command) {
        self.pending = Some(command);
    }

    pub fn is_offline(&self) -> bool {
        self.offline
    }

    /// Read and apply one command. `now` is the tick timestamp used by
    /// autorepeat.
    pub fn poll(
        &mut self,
        driver: &mut dyn Driver,
        brl: &mut BrailleDisplay,
        env: &mut DispatchEnv<'_>,
        now: Duration,
    ) -> DriverResult<PollOutcome> {
        let old_winx = env.ses.winx;
        let old_winy = env.ses.winy;

        let mut command = match self.pending.take() {
            Some(held) => Some(held),
            None => driver.read_command(brl, CommandContext::Screen)?,
        };

        if let Some(cmd) = command.as_mut() {
            // Skipping identical lines inverts the plain/different line
            // pairs so the primary keys do the smart motion.
            if env.prefs.skip_identical_lines {
                let retargeted = match cmd.brl_cmd() {
                    Some(BrlCmd::LnUp) => Some(BrlCmd::PrDifLn),
                    Some(BrlCmd::LnDn) => Some(BrlCmd::NxDifLn),
                    Some(BrlCmd::PrDifLn) => Some(BrlCmd::LnUp),
                    Some(BrlCmd::NxDifLn) => Some(BrlCmd::LnDn),
                    _ => None,
                };
                if let Some(target) = retargeted {
                    tracing::debug!(target: "dispatch", from = %cmd, "remapped for identical-line skip");
                    *cmd = cmd.retarget(target);
                }
            }
            tracing::debug!(target: "dispatch", command = %cmd, "command");

            if cmd.is(BrlCmd::Offline) {
                if !self.offline {
                    tracing::debug!(target: "dispatch", "braille display offline");
                    self.offline = true;
                }
                return Ok(PollOutcome::Handled);
            }
        }
        if self.offline {
            tracing::debug!(target: "dispatch", "braille display online");
            self.offline = false;
        }

        {
            let state = env.prefs.autorepeat.then_some(&mut self.repeat);
            handle_repeat_flags(
                &mut command,
                state,
                now,
                env.prefs.autorepeat_panning,
                env.prefs.autorepeat_delay_time(),
                env.prefs.autorepeat_interval_time(),
            );
        }
        let Some(command) = command else {
            return Ok(PollOutcome::Idle);
        };

        // Offer the command to the back-end first.
        let outcome = if env.screen.execute_command(command) {
            PollOutcome::Handled
        } else {
            self.execute(command, env)
        };

        if env.ses.winx != old_winx || env.ses.winy != old_winy {
            // The window moved deliberately: re-anchor and drop any
            // contracted mapping.
            env.ses.anchor_motion();
            env.contraction.invalidate();
        }

        if command.blk() == 0 && command.has(CmdFlags::MOTION_ROUTE) {
            self.route_cursor_into_window(env);
        }

        Ok(outcome)
    }

    fn execute(&mut self, command: Command, env: &mut DispatchEnv<'_>) -> PollOutcome {
        if command.blk() != 0 {
            return self.execute_block(command, env);
        }
        let Some(cmd) = command.brl_cmd() else {
            tracing::warn!(target: "dispatch", command = %command, "unrecognized command");
            env.rejected();
            return PollOutcome::Handled;
        };

        match cmd {
            BrlCmd::Noop => {
                if command.has(CmdFlags::TOGGLE_ON) {
                    env.alert(Alert::ToggleOn);
                } else if command.has(CmdFlags::TOGGLE_OFF) {
                    env.alert(Alert::ToggleOff);
                }
            }

            BrlCmd::TopLeft => {
                env.ses.winx = 0;
                env.ses.winy = 0;
            }
            BrlCmd::Top => env.ses.winy = 0,
            BrlCmd::BotLeft => {
                env.ses.winx = 0;
                env.ses.winy = env.dims.max_winy(env.scr.rows);
            }
            BrlCmd::Bot => env.ses.winy = env.dims.max_winy(env.scr.rows),

            BrlCmd::WinUp => {
                if env.ses.winy > 0 {
                    env.ses.winy = env.ses.winy.saturating_sub(env.vertical_shift);
                } else {
                    env.alert(Alert::Bounce);
                }
            }
            BrlCmd::WinDn => {
                let max = env.dims.max_winy(env.scr.rows);
                if env.ses.winy < max {
                    env.ses.winy = (env.ses.winy + env.vertical_shift).min(max);
                } else {
                    env.alert(Alert::Bounce);
                }
            }

            BrlCmd::LnUp => motion::step_line(env, true),
            BrlCmd::LnDn => motion::step_line(env, false),
            BrlCmd::PrDifLn => motion::different_line(env, true, motion::Compare::Text),
            BrlCmd::NxDifLn => motion::different_line(env, false, motion::Compare::Text),
            BrlCmd::AttrUp => motion::different_line(env, true, motion::Compare::Attributes),
            BrlCmd::AttrDn => motion::different_line(env, false, motion::Compare::Attributes),

            BrlCmd::PrPgrph => motion::find_paragraph(env, true),
            BrlCmd::NxPgrph => motion::find_paragraph(env, false),
            BrlCmd::PrPrompt => motion::find_prompt(env, true),
            BrlCmd::NxPrompt => motion::find_prompt(env, false),
            BrlCmd::PrSearch => motion::search(env, true),
            BrlCmd::NxSearch => motion::search(env, false),

            BrlCmd::LnBeg => {
                if env.ses.winx > 0 {
                    env.ses.winx = 0;
                } else {
                    env.alert(Alert::Bounce);
                }
            }
            BrlCmd::LnEnd => {
                let end = env.scr.cols.max(env.layout.text_count) - env.layout.text_count;
                if env.ses.winx < end {
                    env.ses.winx = end;
                } else {
                    env.alert(Alert::Bounce);
                }
            }

            BrlCmd::ChrLt => {
                if env.ses.winx == 0 {
                    env.alert(Alert::Bounce);
                } else {
                    env.ses.winx -= 1;
                }
            }
            BrlCmd::ChrRt => {
                if env.ses.winx < env.scr.cols.saturating_sub(1) {
                    env.ses.winx += 1;
                } else {
                    env.alert(Alert::Bounce);
                }
            }

            BrlCmd::HWinLt => {
                if env.ses.winx == 0 {
                    env.alert(Alert::Bounce);
                } else {
                    env.ses.winx = env.ses.winx.saturating_sub(env.half_shift);
                }
            }
            BrlCmd::HWinRt => {
                if env.ses.winx + env.half_shift < env.scr.cols {
                    env.ses.winx += env.half_shift;
                } else {
                    env.alert(Alert::Bounce);
                }
            }

            BrlCmd::FWinLt => motion::full_window_left(env),
            BrlCmd::FWinRt => motion::full_window_right(env),
            BrlCmd::FWinLtSkip => motion::full_window_left_skip(env),
            BrlCmd::FWinRtSkip => motion::full_window_right_skip(env),

            BrlCmd::Return => {
                if env.ses.winx != env.ses.motx || env.ses.winy != env.ses.moty {
                    env.ses.winx = env.ses.motx;
                    env.ses.winy = env.ses.moty;
                } else {
                    self.go_home(env);
                }
            }
            BrlCmd::Back => {
                env.ses.winx = env.ses.motx;
                env.ses.winy = env.ses.moty;
            }
            BrlCmd::Home => self.go_home(env),

            BrlCmd::Freeze => {
                if env.frozen.is_none() {
                    match FrozenScreen::capture(env.screen) {
                        Some(snapshot) => {
                            *env.frozen = Some(snapshot);
                            env.alert(Alert::ScreenFrozen);
                        }
                        None => env.rejected(),
                    }
                } else {
                    *env.frozen = None;
                    env.alert(Alert::ScreenUnfrozen);
                }
            }

            BrlCmd::DispMd => {
                let mut mode = env.ses.display_mode;
                toggle_flag(&mut mode, command, false, env.alerts, false);
                env.ses.display_mode = mode;
            }
            BrlCmd::SixDots => {
                let mut value = env.prefs.six_dot_text;
                toggle_flag(&mut value, command, env.prefs.alert_tunes, env.alerts, true);
                env.prefs.six_dot_text = value;
            }
            BrlCmd::SlideWin => {
                let mut value = env.prefs.sliding_window;
                toggle_flag(&mut value, command, env.prefs.alert_tunes, env.alerts, true);
                env.prefs.sliding_window = value;
            }
            BrlCmd::SkpIdLns => {
                let mut value = env.prefs.skip_identical_lines;
                toggle_flag(&mut value, command, env.prefs.alert_tunes, env.alerts, true);
                env.prefs.skip_identical_lines = value;
            }
            BrlCmd::SkpBlnkWins => {
                let mut value = env.prefs.skip_blank_windows;
                toggle_flag(&mut value, command, env.prefs.alert_tunes, env.alerts, true);
                env.prefs.skip_blank_windows = value;
            }
            BrlCmd::CsrVis => {
                let mut value = env.prefs.show_cursor;
                toggle_flag(&mut value, command, env.prefs.alert_tunes, env.alerts, true);
                env.prefs.show_cursor = value;
            }
            BrlCmd::CsrHide => {
                let mut value = env.ses.hide_cursor;
                toggle_flag(&mut value, command, false, env.alerts, false);
                env.ses.hide_cursor = value;
            }
            BrlCmd::CsrSize => {
                let mut value = env.prefs.block_cursor;
                toggle_flag(&mut value, command, env.prefs.alert_tunes, env.alerts, true);
                env.prefs.block_cursor = value;
            }
            BrlCmd::CsrTrk => {
                let mut value = env.ses.track_cursor;
                toggle_flag(&mut value, command, false, env.alerts, false);
                env.ses.track_cursor = value;
                if value {
                    env.alert(Alert::CursorLinked);
                    self.go_home(env);
                } else {
                    env.alert(Alert::CursorUnlinked);
                }
            }
            BrlCmd::CsrBlink => {
                env.blink.set_cursor(env.prefs, true);
                let mut value = env.prefs.blinking_cursor;
                toggle_flag(&mut value, command, env.prefs.alert_tunes, env.alerts, true);
                env.prefs.blinking_cursor = value;
                if value {
                    env.blink.set_attributes(env.prefs, true);
                    env.blink.set_capitals(env.prefs, false);
                }
            }
            BrlCmd::AttrVis => {
                let mut value = env.prefs.show_attributes;
                toggle_flag(&mut value, command, env.prefs.alert_tunes, env.alerts, true);
                env.prefs.show_attributes = value;
            }
            BrlCmd::AttrBlink => {
                env.blink.set_attributes(env.prefs, true);
                let mut value = env.prefs.blinking_attributes;
                toggle_flag(&mut value, command, env.prefs.alert_tunes, env.alerts, true);
                env.prefs.blinking_attributes = value;
                if value {
                    env.blink.set_capitals(env.prefs, true);
                    env.blink.set_cursor(env.prefs, false);
                }
            }
            BrlCmd::CapBlink => {
                env.blink.set_capitals(env.prefs, true);
                let mut value = env.prefs.blinking_capitals;
                toggle_flag(&mut value, command, env.prefs.alert_tunes, env.alerts, true);
                env.prefs.blinking_capitals = value;
                if value {
                    env.blink.set_attributes(env.prefs, false);
                    env.blink.set_cursor(env.prefs, false);
                }
            }
            BrlCmd::Tunes => {
                let mut value = env.prefs.alert_tunes;
                toggle_flag(&mut value, command, true, env.alerts, true);
                env.prefs.alert_tunes = value;
            }
            BrlCmd::Autorepeat => {
                let mut value = env.prefs.autorepeat;
                toggle_flag(&mut value, command, env.prefs.alert_tunes, env.alerts, true);
                env.prefs.autorepeat = value;
                if value {
                    self.repeat.reset();
                }
            }
            BrlCmd::Autospeak => {
                let mut value = env.prefs.autospeak;
                toggle_flag(&mut value, command, env.prefs.alert_tunes, env.alerts, true);
                env.prefs.autospeak = value;
            }

            BrlCmd::Help => {
                env.message = Some("help not available".into());
            }
            BrlCmd::Learn => {
                env.message = Some("command learn mode not available".into());
            }
            BrlCmd::Info => {
                let mut value = *env.info_mode;
                toggle_flag(&mut value, command, false, env.alerts, false);
                *env.info_mode = value;
            }

            BrlCmd::PrefMenu => {
                env.message = Some("preferences menu not available".into());
            }
            BrlCmd::PrefSave => match env.prefs.save(env.prefs_path) {
                Ok(()) => env.alert(Alert::CommandDone),
                Err(error) => {
                    tracing::warn!(target: "dispatch", %error, "preferences save failed");
                    env.rejected();
                }
            },
            BrlCmd::PrefLoad => match Preferences::load(Some(env.prefs_path)) {
                Ok(loaded) => {
                    *env.prefs = loaded;
                    env.blink.reset(env.prefs);
                    env.alert(Alert::CommandDone);
                }
                Err(error) => {
                    tracing::warn!(target: "dispatch", %error, "preferences load failed");
                    env.rejected();
                }
            },

            BrlCmd::MenuFirstItem
            | BrlCmd::MenuLastItem
            | BrlCmd::MenuPrevItem
            | BrlCmd::MenuNextItem
            | BrlCmd::MenuPrevSetting
            | BrlCmd::MenuNextSetting => env.rejected(),

            BrlCmd::Mute => env.speech.mute(),
            BrlCmd::SayLine => input::say_lines(env, env.ses.winy, 1),
            BrlCmd::SayAbove => input::say_lines(env, 0, env.ses.winy + 1),
            BrlCmd::SayBelow => {
                let from = env.ses.winy;
                input::say_lines(env, from, env.scr.rows - from);
            }
            BrlCmd::SaySlower => {
                if !env.speech.adjust_rate(-1) {
                    env.rejected();
                }
            }
            BrlCmd::SayFaster => {
                if !env.speech.adjust_rate(1) {
                    env.rejected();
                }
            }
            BrlCmd::SaySofter => {
                if !env.speech.adjust_volume(-1) {
                    env.rejected();
                }
            }
            BrlCmd::SayLouder => {
                if !env.speech.adjust_volume(1) {
                    env.rejected();
                }
            }

            BrlCmd::SwitchVtPrev => {
                if !env.screen.switch_virtual_terminal(env.scr.number - 1) {
                    env.rejected();
                }
            }
            BrlCmd::SwitchVtNext => {
                if !env.screen.switch_virtual_terminal(env.scr.number + 1) {
                    env.rejected();
                }
            }

            BrlCmd::CsrJmpVert => {
                let row = env.ses.winy;
                let number = env.scr.number;
                if env.screen.route_cursor(None, row, number) {
                    env.alert(Alert::RoutingStarted);
                } else {
                    env.rejected();
                }
            }

            BrlCmd::Paste => {
                let allowed = env.frozen.is_none() && !env.screen.is_routing();
                if allowed && env.clipboard.paste(env.screen) {
                    // Injection done; nothing to announce.
                } else {
                    env.rejected();
                }
            }

            BrlCmd::RestartBrl => return PollOutcome::RestartRequested,
            BrlCmd::RestartSpeech => {
                tracing::info!(target: "dispatch", "speech restart requested (external)");
            }
            BrlCmd::Offline => unreachable!("handled before execution"),
        }
        PollOutcome::Handled
    }

    fn execute_block(&mut self, command: Command, env: &mut DispatchEnv<'_>) -> PollOutcome {
        let arg = command.arg();
        match command.blk() {
            blk::ROUTE => match env.character_coordinates(arg, false, true) {
                Some((column, row)) => {
                    if env.frozen.is_none()
                        && env.screen.route_cursor(Some(column), row, env.scr.number)
                    {
                        env.alert(Alert::RoutingStarted);
                    } else {
                        env.rejected();
                    }
                }
                None => env.rejected(),
            },

            blk::CUTBEGIN => match env.character_coordinates(arg, false, false) {
                Some((column, row)) => {
                    let (clipboard, alerts) = (&mut *env.clipboard, &mut *env.alerts);
                    clipboard.start(column, row, alerts);
                }
                None => env.rejected(),
            },
            blk::CUTAPPEND => match env.character_coordinates(arg, false, false) {
                Some((column, row)) => {
                    let (clipboard, alerts) = (&mut *env.clipboard, &mut *env.alerts);
                    clipboard.extend(column, row, alerts);
                }
                None => env.rejected(),
            },
            blk::CUTRECT => {
                let done = env.character_coordinates(arg, true, true).is_some_and(
                    |(column, row)| {
                        let source = reading(env.frozen, env.screen);
                        env.clipboard
                            .rectangular_copy(source, column, row, env.alerts)
                    },
                );
                if !done {
                    env.rejected();
                }
            }
            blk::CUTLINE => {
                let done = env.character_coordinates(arg, true, true).is_some_and(
                    |(column, row)| {
                        let source = reading(env.frozen, env.screen);
                        env.clipboard.linear_copy(source, column, row, env.alerts)
                    },
                );
                if !done {
                    env.rejected();
                }
            }

            blk::DESCCHAR => match env.character_coordinates(arg, false, false) {
                Some((column, row)) => input::describe_character(env, column, row),
                None => env.rejected(),
            },

            blk::SETLEFT => match env.character_coordinates(arg, false, false) {
                Some((column, row)) => {
                    env.ses.winx = column;
                    env.ses.winy = row;
                }
                None => env.rejected(),
            },

            blk::GOTOLINE => {
                let mut line = arg as usize;
                if command.line_flags().contains(LineFlags::SCALED) {
                    line = rescale(line as u32, 0xFF, env.scr.rows.saturating_sub(1) as u32)
                        as usize;
                }
                if line < env.scr.rows {
                    env.ses.slide_window_vertically(env.dims, line);
                    if command.line_flags().contains(LineFlags::TOLEFT) {
                        env.ses.winx = 0;
                    }
                } else {
                    env.rejected();
                }
            }

            blk::SETMARK => {
                env.ses.marks[arg as usize] = core_session::WindowLocation {
                    column: env.ses.winx,
                    row: env.ses.winy,
                };
                env.alert(Alert::MarkSet);
            }
            blk::GOTOMARK => {
                let mark = env.ses.marks[arg as usize];
                env.ses.winx = mark.column;
                env.ses.winy = mark.row;
            }

            blk::SWITCHVT => {
                if !env.screen.switch_virtual_terminal(arg as i32 + 1) {
                    env.rejected();
                }
            }

            blk::PRINDENT | blk::NXINDENT => {
                let up = command.blk() == blk::PRINDENT;
                match env.character_coordinates(arg, false, false) {
                    Some((column, row)) => {
                        env.ses.winy = row;
                        motion::find_indent(env, column, up);
                    }
                    None => env.rejected(),
                }
            }

            blk::PRDIFCHAR | blk::NXDIFCHAR => {
                let up = command.blk() == blk::PRDIFCHAR;
                match env.character_coordinates(arg, false, false) {
                    Some((column, row)) => {
                        env.ses.winy = row;
                        motion::different_character(env, column, up);
                    }
                    None => env.rejected(),
                }
            }

            blk::PASSKEY => input::pass_key(env, arg, command.char_flags()),
            blk::PASSCHAR => {
                input::insert_key(env, ScreenKey::Char(char::from(arg)), command.char_flags());
            }
            blk::PASSDOTS => match env.text_table.character(arg) {
                Some(character) => {
                    input::insert_key(env, ScreenKey::Char(character), command.char_flags());
                }
                None => env.rejected(),
            },

            other => {
                tracing::warn!(
                    target: "dispatch",
                    block = format_args!("{other:04X}"),
                    "unrecognized command block"
                );
                env.rejected();
            }
        }
        PollOutcome::Handled
    }

    /// `HOME`: bring the window back to the cursor.
    fn go_home(&mut self, env: &mut DispatchEnv<'_>) {
        let moved = {
            let screen = reading(env.frozen, env.screen);
            track_cursor(
                env.ses,
                env.scr,
                screen,
                env.prefs,
                env.dims,
                env.contraction_track,
                true,
            )
        };
        if !moved {
            env.rejected();
        }
    }

    /// Post-motion `MOTION_ROUTE`: if the cursor fell outside the moved
    /// window, route it to the nearest cell inside, then re-align the
    /// window with wherever the cursor actually landed.
    fn route_cursor_into_window(&mut self, env: &mut DispatchEnv<'_>) {
        if env.frozen.is_some() || env.scr.cols == 0 || env.scr.rows == 0 {
            return;
        }
        let left = env.ses.winx;
        let right = (left + env.layout.text_count).min(env.scr.cols) - 1;
        let top = env.ses.winy;
        let bottom = (top + env.dims.text_rows).min(env.scr.rows) - 1;

        if env.scr.posx < left
            || env.scr.posx > right
            || env.scr.posy < top
            || env.scr.posy > bottom
        {
            let column = env.scr.posx.clamp(left, right);
            let row = env.scr.posy.clamp(top, bottom);
            if env.screen.route_cursor(Some(column), row, env.scr.number) {
                env.alert(Alert::RoutingStarted);
                let status = env.screen.routing_status(true);
                if status == RoutingStatus::Failed {
                    env.alert(Alert::RoutingFailed);
                }

                let description = env.screen.describe();
                if description.number == env.scr.number && description.unreadable.is_none() {
                    env.ses
                        .slide_window_vertically(env.dims, description.posy);
                    env.ses.place_window_horizontally(env.dims, description.posx);
                }
            }
        }
    }
}

/// Build a synthesised key press from pass-through flags.
pub(crate) fn key_press(key: ScreenKey, flags: CharFlags) -> KeyPress {
    KeyPress {
        key,
        modifiers: KeyModifiers {
            shift: flags.contains(CharFlags::SHIFT),
            upper: flags.contains(CharFlags::UPPER),
            control: flags.contains(CharFlags::CONTROL),
            meta: flags.contains(CharFlags::META),
        },
    }
}

pub(crate) fn screen_key_for(arg: u8) -> ScreenKey {
    use BrlKey as K;
    match arg {
        a if a == K::Enter as u8 => ScreenKey::Enter,
        a if a == K::Tab as u8 => ScreenKey::Tab,
        a if a == K::Backspace as u8 => ScreenKey::Backspace,
        a if a == K::Escape as u8 => ScreenKey::Escape,
        a if a == K::CursorLeft as u8 => ScreenKey::CursorLeft,
        a if a == K::CursorRight as u8 => ScreenKey::CursorRight,
        a if a == K::CursorUp as u8 => ScreenKey::CursorUp,
        a if a == K::CursorDown as u8 => ScreenKey::CursorDown,
        a if a == K::PageUp as u8 => ScreenKey::PageUp,
        a if a == K::PageDown as u8 => ScreenKey::PageDown,
        a if a == K::Home as u8 => ScreenKey::Home,
        a if a == K::End as u8 => ScreenKey::End,
        a if a == K::Insert as u8 => ScreenKey::Insert,
        a if a == K::Delete as u8 => ScreenKey::Delete,
        a => ScreenKey::Function(a - K::Function as u8),
    }
}
