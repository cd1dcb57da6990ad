//! End-to-end dispatcher behaviour over a scripted driver and an
//! in-memory screen.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::Duration;

use core_braille::{BrailleDisplay, Driver, DriverResult, TextTable, dots};
use core_clipboard::Clipboard;
use core_cmd::alert::RecordingAlerts;
use core_cmd::{Alert, BrlCmd, CmdFlags, Command, CommandContext, LineFlags, blk};
use core_config::Preferences;
use core_dispatch::{DispatchEnv, Dispatcher, PollOutcome};
use core_render::{BlinkState, ContractionEngine, WindowLayout};
use core_screen::speech::RecordingSpeech;
use core_screen::{BufferScreen, FrozenScreen, Screen, ScreenKey};
use core_session::{ContractionTrack, Session, WindowDims};

/// Driver double that replays queued commands.
#[derive(Default)]
struct ScriptedDriver {
    queue: VecDeque<Command>,
}

impl Driver for ScriptedDriver {
    fn write_window(&mut self, _brl: &mut BrailleDisplay, _text: &[char]) -> DriverResult<()> {
        Ok(())
    }

    fn read_command(
        &mut self,
        _brl: &mut BrailleDisplay,
        _context: CommandContext,
    ) -> DriverResult<Option<Command>> {
        Ok(self.queue.pop_front())
    }
}

struct Rig {
    dispatcher: Dispatcher,
    driver: ScriptedDriver,
    brl: BrailleDisplay,
    ses: Session,
    screen: BufferScreen,
    frozen: Option<FrozenScreen>,
    prefs: Preferences,
    prefs_path: PathBuf,
    clipboard: Clipboard,
    alerts: RecordingAlerts,
    speech: RecordingSpeech,
    blink: BlinkState,
    contraction: ContractionEngine,
    track: ContractionTrack,
    table: TextTable,
    info_mode: bool,
    last_message: Option<String>,
}

impl Rig {
    fn new(cols: usize, rows: usize, lines: &[&str]) -> Self {
        let prefs = Preferences::default();
        let blink = BlinkState::new(&prefs);
        Self {
            dispatcher: Dispatcher::new(),
            driver: ScriptedDriver::default(),
            brl: BrailleDisplay::new(10, 1),
            ses: Session::new(),
            screen: BufferScreen::from_lines(cols, rows, lines),
            frozen: None,
            prefs,
            prefs_path: std::env::temp_dir().join("braild-dispatch-test.toml"),
            clipboard: Clipboard::new(),
            alerts: RecordingAlerts::new(),
            speech: RecordingSpeech::new(),
            blink,
            contraction: ContractionEngine::default(),
            track: ContractionTrack::default(),
            table: TextTable::default(),
            info_mode: false,
            last_message: None,
        }
    }

    fn poll_at(&mut self, command: Option<Command>, at_ms: u64) -> PollOutcome {
        if let Some(command) = command {
            self.driver.queue.push_back(command);
        }
        let layout = WindowLayout::full(self.brl.text_columns);
        let dims = WindowDims::new(layout.text_count, self.brl.text_rows);
        let scr = match &self.frozen {
            Some(snapshot) => snapshot.describe(),
            None => self.screen.describe(),
        };
        self.ses.clamp_to(&scr, dims);

        let mut env = DispatchEnv {
            ses: &mut self.ses,
            scr: &scr,
            screen: &mut self.screen,
            frozen: &mut self.frozen,
            prefs: &mut self.prefs,
            prefs_path: &self.prefs_path,
            clipboard: &mut self.clipboard,
            alerts: &mut self.alerts,
            speech: &mut self.speech,
            blink: &mut self.blink,
            contraction: &mut self.contraction,
            contraction_track: &mut self.track,
            layout,
            dims,
            text_table: &self.table,
            info_mode: &mut self.info_mode,
            full_shift: layout.text_count,
            half_shift: layout.text_count / 2,
            vertical_shift: 5,
            message: None,
        };
        let outcome = self
            .dispatcher
            .poll(&mut self.driver, &mut self.brl, &mut env, Duration::from_millis(at_ms))
            .expect("poll");
        if env.message.is_some() {
            self.last_message = env.message;
        }
        outcome
    }

    fn run(&mut self, command: Command) -> PollOutcome {
        self.poll_at(Some(command), 0)
    }
}

#[test]
fn autorepeat_refires_at_delay_then_interval() {
    let mut rig = Rig::new(40, 25, &[]);
    rig.prefs.autorepeat_delay = 25; // 250 ms
    rig.prefs.autorepeat_interval = 10; // 100 ms

    let press = Command::simple(BrlCmd::LnDn)
        .with_flags(CmdFlags::REPEAT_DELAY.bits() | CmdFlags::REPEAT_INITIAL.bits());

    // t=0: the initial fire moves one line.
    assert_eq!(rig.poll_at(Some(press), 0), PollOutcome::Handled);
    assert_eq!(rig.ses.winy, 1);

    // t=100: nothing from the driver, delay not elapsed.
    assert_eq!(rig.poll_at(None, 100), PollOutcome::Idle);
    assert_eq!(rig.ses.winy, 1);

    // t=250/350/450: refires on the interval.
    for (t, expected) in [(250, 2), (350, 3), (450, 4)] {
        assert_eq!(rig.poll_at(None, t), PollOutcome::Handled);
        assert_eq!(rig.ses.winy, expected);
    }

    // Release: the device re-emits the bare command; it is swallowed and
    // the repeat cancelled.
    assert_eq!(
        rig.poll_at(Some(Command::simple(BrlCmd::LnDn)), 500),
        PollOutcome::Handled
    );
    assert_eq!(rig.ses.winy, 4);
    assert_eq!(rig.poll_at(None, 5_000), PollOutcome::Idle);
    assert_eq!(rig.ses.winy, 4);
}

#[test]
fn non_repeatable_commands_fire_exactly_once() {
    let mut rig = Rig::new(40, 25, &[]);
    // A delayed press of a non-repeatable command is swallowed; the
    // device re-emits it bare on release and that single emission fires.
    let press = Command::simple(BrlCmd::Bot)
        .with_flags(CmdFlags::REPEAT_DELAY.bits() | CmdFlags::REPEAT_INITIAL.bits());
    assert_eq!(rig.run(press), PollOutcome::Handled);
    assert_eq!(rig.ses.winy, 0, "delayed press waits for release");

    assert_eq!(rig.run(Command::simple(BrlCmd::Bot)), PollOutcome::Handled);
    assert_eq!(rig.ses.winy, 24);

    // Nothing repeats afterwards: the flags were stripped.
    rig.ses.winy = 0;
    assert_eq!(rig.poll_at(None, 10_000), PollOutcome::Idle);
    assert_eq!(rig.ses.winy, 0);
}

#[test]
fn toggle_flags_set_clear_and_flip() {
    let mut rig = Rig::new(40, 25, &[]);

    rig.run(Command::simple(BrlCmd::CsrVis).with_flags(CmdFlags::TOGGLE_OFF.bits()));
    assert!(!rig.prefs.show_cursor);
    assert_eq!(rig.alerts.take(), vec![Alert::ToggleOff]);

    // Explicit clear is idempotent.
    rig.run(Command::simple(BrlCmd::CsrVis).with_flags(CmdFlags::TOGGLE_OFF.bits()));
    assert!(!rig.prefs.show_cursor);

    // Bare command flips.
    rig.run(Command::simple(BrlCmd::CsrVis));
    assert!(rig.prefs.show_cursor);
    assert_eq!(rig.alerts.take(), vec![Alert::ToggleOff, Alert::ToggleOn]);
}

#[test]
fn window_motion_re_anchors_and_back_returns() {
    let mut rig = Rig::new(80, 25, &[]);
    rig.run(Command::simple(BrlCmd::FWinRt));
    assert_eq!(rig.ses.winx, 10);
    assert_eq!(rig.ses.motx, 10, "anchor follows deliberate motion");

    rig.ses.winx = 30; // e.g. cursor tracking moved the window
    rig.run(Command::simple(BrlCmd::Back));
    assert_eq!(rig.ses.winx, 10);
}

#[test]
fn routing_key_routes_the_cursor() {
    let mut rig = Rig::new(40, 25, &[]);
    rig.ses.winx = 4;
    rig.run(Command::block(blk::ROUTE, 3));
    assert_eq!(rig.screen.routed.last(), Some(&(Some(7), 0, 1)));
    assert_eq!(rig.alerts.take(), vec![Alert::RoutingStarted]);
}

#[test]
fn cut_and_paste_round_trip() {
    let mut rig = Rig::new(40, 25, &["hello world"]);
    rig.run(Command::block(blk::CUTBEGIN, 0));
    rig.run(Command::block(blk::CUTRECT, 4));
    assert_eq!(rig.clipboard.content().iter().collect::<String>(), "hello");

    rig.run(Command::simple(BrlCmd::Paste));
    assert_eq!(rig.screen.typed_string(), "hello");
}

#[test]
fn search_finds_clipboard_content_beyond_the_window() {
    let mut rig = Rig::new(40, 25, &["", "", "", "      needle here"]);
    rig.run(Command::block(blk::CUTBEGIN, 0));
    // Prime the clipboard directly through a copy of the word itself.
    rig.screen.set_row_text(0, "needle");
    rig.run(Command::block(blk::CUTRECT, 5));
    rig.screen.set_row_text(0, "");

    rig.run(Command::simple(BrlCmd::NxSearch));
    assert_eq!(rig.ses.winy, 3);
    // Window lands on the multiple of the window width containing it.
    assert_eq!(rig.ses.winx, 0);
}

#[test]
fn freeze_reads_a_snapshot_until_released() {
    let mut rig = Rig::new(40, 25, &["before"]);
    rig.run(Command::simple(BrlCmd::Freeze));
    assert!(rig.frozen.is_some());
    assert_eq!(rig.alerts.take(), vec![Alert::ScreenFrozen]);

    // The live screen changes; a copy still sees the snapshot.
    rig.screen.set_row_text(0, "after!");
    rig.run(Command::block(blk::CUTBEGIN, 0));
    rig.run(Command::block(blk::CUTRECT, 5));
    assert_eq!(rig.clipboard.content().iter().collect::<String>(), "before");

    rig.run(Command::simple(BrlCmd::Freeze));
    assert!(rig.frozen.is_none());
    assert_eq!(
        rig.alerts.take(),
        vec![Alert::CopyBegin, Alert::CopyEnd, Alert::ScreenUnfrozen]
    );
}

#[test]
fn describe_character_reports_colours() {
    let mut rig = Rig::new(40, 25, &["x"]);
    rig.run(Command::block(blk::DESCCHAR, 0));
    let message = rig.last_message.take().expect("description");
    assert!(message.contains("char 120"));
    assert!(message.contains("light grey on black"));
}

#[test]
fn goto_line_scales_and_homes_left() {
    let mut rig = Rig::new(40, 25, &[]);
    rig.ses.winx = 7;
    let cmd = Command::block(blk::GOTOLINE, 0xFF)
        .with_flags(LineFlags::SCALED.bits() | LineFlags::TOLEFT.bits());
    rig.run(cmd);
    assert_eq!(rig.ses.winy, 24);
    assert_eq!(rig.ses.winx, 0);
}

#[test]
fn marks_remember_and_restore_positions() {
    let mut rig = Rig::new(80, 25, &[]);
    rig.ses.winx = 20;
    rig.ses.winy = 7;
    rig.run(Command::block(blk::SETMARK, 3));
    assert_eq!(rig.alerts.take(), vec![Alert::MarkSet]);

    rig.ses.winx = 0;
    rig.ses.winy = 0;
    rig.run(Command::block(blk::GOTOMARK, 3));
    assert_eq!((rig.ses.winx, rig.ses.winy), (20, 7));
}

#[test]
fn pass_dots_synthesises_the_mapped_character() {
    let mut rig = Rig::new(40, 25, &[]);
    let dots_for_a = dots::cell(&[1]);
    rig.run(Command::block(blk::PASSDOTS, dots_for_a));
    assert_eq!(rig.screen.typed_string(), "a");

    rig.run(Command::block(blk::PASSKEY, core_cmd::BrlKey::Enter as u8));
    assert_eq!(
        rig.screen.inserted.last().map(|k| k.key),
        Some(ScreenKey::Enter)
    );
}

#[test]
fn identical_line_skip_remaps_primary_motions() {
    let mut rig = Rig::new(40, 25, &["top", "same", "same", "same", "end"]);
    rig.prefs.skip_identical_lines = true;
    rig.ses.winy = 1;
    rig.run(Command::simple(BrlCmd::LnDn));
    // Remapped to next-different-line: lands on "end".
    assert_eq!(rig.ses.winy, 4);
    let cues = rig.alerts.take();
    assert_eq!(cues[0], Alert::SkipFirst);
}

#[test]
fn offline_commands_latch_and_release() {
    let mut rig = Rig::new(40, 25, &[]);
    assert_eq!(rig.run(Command::simple(BrlCmd::Offline)), PollOutcome::Handled);
    assert!(rig.dispatcher.is_offline());
    rig.run(Command::simple(BrlCmd::LnDn));
    assert!(!rig.dispatcher.is_offline());
    assert_eq!(rig.ses.winy, 1);
}

#[test]
fn restart_surfaces_to_the_loop() {
    let mut rig = Rig::new(40, 25, &[]);
    assert_eq!(
        rig.run(Command::simple(BrlCmd::RestartBrl)),
        PollOutcome::RestartRequested
    );
}

#[test]
fn say_commands_reach_the_synthesiser() {
    let mut rig = Rig::new(40, 25, &["read me"]);
    rig.run(Command::simple(BrlCmd::SayLine));
    let spoken = rig.speech.take();
    assert_eq!(spoken.len(), 1);
    assert!(spoken[0].starts_with("read me"));

    rig.run(Command::simple(BrlCmd::Mute));
    assert_eq!(rig.speech.muted, 1);

    // Rate control is not supported by the null-ish recorder.
    rig.run(Command::simple(BrlCmd::SayFaster));
    assert_eq!(rig.alerts.take(), vec![Alert::CommandRejected]);
}

#[test]
fn full_window_wraps_between_lines() {
    let mut rig = Rig::new(20, 25, &["first line of text!!", "second one"]);
    // Panning right past the margin wraps to the next line's start.
    rig.ses.winx = 10;
    rig.run(Command::simple(BrlCmd::FWinRt));
    assert_eq!((rig.ses.winx, rig.ses.winy), (0, 1));
    assert_eq!(rig.alerts.take(), vec![Alert::WrapDown]);

    // And left from the margin wraps back to the previous line's end.
    rig.run(Command::simple(BrlCmd::FWinLt));
    assert_eq!((rig.ses.winx, rig.ses.winy), (10, 0));
    assert_eq!(rig.alerts.take(), vec![Alert::WrapUp]);

    // At the very top-left there is nowhere to go.
    rig.ses.winx = 0;
    rig.run(Command::simple(BrlCmd::FWinLt));
    assert_eq!((rig.ses.winx, rig.ses.winy), (0, 0));
    assert_eq!(rig.alerts.take(), vec![Alert::Bounce]);
}

#[test]
fn blank_window_skip_walks_to_content() {
    let mut rig = Rig::new(40, 25, &["start", "", "", "    interesting"]);
    rig.prefs.skip_blank_windows = true;
    rig.prefs.blank_windows_skip_mode = core_config::BlankSkipMode::All;
    rig.screen.has_cursor = false;

    // Window width is 10; everything between "start" and row 3 is blank
    // and gets skipped in one motion.
    rig.run(Command::simple(BrlCmd::FWinRt));
    assert_eq!(rig.ses.winy, 3);
    assert_eq!(rig.ses.winx, 0);
    let cues = rig.alerts.take();
    assert!(cues.contains(&Alert::WrapDown));
}

#[test]
fn end_of_line_skip_pulls_the_window_back() {
    let mut rig = Rig::new(40, 25, &["short", "next row here"]);
    rig.prefs.skip_blank_windows = true;
    rig.prefs.blank_windows_skip_mode = core_config::BlankSkipMode::EndOfLine;
    rig.screen.has_cursor = false;
    rig.ses.winy = 1;

    // Wrapping up from the second row lands on the tail of "short"
    // rather than the blank last window of that line.
    rig.run(Command::simple(BrlCmd::FWinLt));
    assert_eq!(rig.ses.winy, 0);
    assert_eq!(rig.ses.winx, 0, "window pulled back to cover the text");
    assert_eq!(rig.alerts.take(), vec![Alert::WrapUp]);
}

#[test]
fn home_requires_a_cursor() {
    let mut rig = Rig::new(40, 25, &[]);
    rig.screen.has_cursor = false;
    rig.run(Command::simple(BrlCmd::Home));
    assert_eq!(rig.alerts.take(), vec![Alert::CommandRejected]);
}
