//! Row-wise window motions: different-line scans, single-line steps, and
//! the generic row finder behind indent and prompt navigation.

use core_cmd::Alert;
use core_screen::{Screen, ScreenBox};

use crate::{MotionContext, Session, is_same_row, show_cursor};

/// Which per-cell comparison a scan uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareMode {
    Text,
    Attributes,
}

impl CompareMode {
    /// In attributes display mode a text scan compares attributes, since
    /// that is what the user is looking at.
    fn effective(self, ses: &Session) -> Self {
        if self == CompareMode::Text && ses.display_mode {
            CompareMode::Attributes
        } else {
            self
        }
    }
}

/// Move row-by-row until a row differs from the starting one (or the
/// cursor row enters the comparison column range). Plays the skip cue
/// progression for each identical row passed: once for the first, again
/// for each of the next four, then every fourth. Returns false (with a
/// bounce) when the boundary arrives first.
pub fn to_different_line(
    ses: &mut Session,
    ctx: &mut MotionContext<'_>,
    mode: CompareMode,
    up: bool,
    from: usize,
    width: usize,
) -> bool {
    let mode = mode.effective(ses);
    let max_winy = ctx.dims.max_winy(ctx.scr.rows);
    let can_move = |winy: usize| if up { winy > 0 } else { winy < max_winy };

    if can_move(ses.winy) {
        let reference = ctx
            .screen
            .read_characters(ScreenBox::row(from, ses.winy, width));
        let mut skipped = 0usize;

        loop {
            ses.winy = if up { ses.winy - 1 } else { ses.winy + 1 };
            let row = ctx
                .screen
                .read_characters(ScreenBox::row(from, ses.winy, width));

            let cursor_here = show_cursor(ses, ctx.prefs, ctx.scr)
                && ctx.scr.posy == ses.winy
                && ctx.scr.posx >= from
                && ctx.scr.posx < from + width;
            if !is_same_row(&reference, &row, mode) || cursor_here {
                return true;
            }

            if skipped == 0 {
                ctx.alert(Alert::SkipFirst);
            } else if skipped <= 4 {
                ctx.alert(Alert::Skip);
            } else if skipped % 4 == 0 {
                ctx.alert(Alert::SkipMore);
            }
            skipped += 1;

            if !can_move(ses.winy) {
                break;
            }
        }
    }

    ctx.alert(Alert::Bounce);
    false
}

pub fn up_one_line(ses: &mut Session, ctx: &mut MotionContext<'_>) {
    if ses.winy > 0 {
        ses.winy -= 1;
    } else {
        ctx.alert(Alert::Bounce);
    }
}

pub fn down_one_line(ses: &mut Session, ctx: &mut MotionContext<'_>) {
    if ses.winy < ctx.dims.max_winy(ctx.scr.rows) {
        ses.winy += 1;
    } else {
        ctx.alert(Alert::Bounce);
    }
}

/// One line up, or up-to-different when skipping identical lines.
pub fn up_line(ses: &mut Session, ctx: &mut MotionContext<'_>, mode: CompareMode) {
    if ctx.prefs.skip_identical_lines {
        to_different_line(ses, ctx, mode, true, 0, ctx.scr.cols);
    } else {
        up_one_line(ses, ctx);
    }
}

/// One line down, or down-to-different when skipping identical lines.
pub fn down_line(ses: &mut Session, ctx: &mut MotionContext<'_>, mode: CompareMode) {
    if ctx.prefs.skip_identical_lines {
        to_different_line(ses, ctx, mode, false, 0, ctx.scr.cols);
    } else {
        down_one_line(ses, ctx);
    }
}

/// Scan rows in one direction for the first that satisfies `test`,
/// landing the window there. Bounces when none does.
pub fn find_row(
    ses: &mut Session,
    ctx: &mut MotionContext<'_>,
    column: usize,
    up: bool,
    test: impl Fn(usize, usize, &dyn Screen) -> bool,
) {
    let max_winy = ctx.dims.max_winy(ctx.scr.rows) as i64;
    let step: i64 = if up { -1 } else { 1 };
    let mut row = ses.winy as i64 + step;
    while row >= 0 && row <= max_winy {
        if test(column, row as usize, ctx.screen) {
            ses.winy = row as usize;
            return;
        }
        row += step;
    }
    ctx.alert(Alert::Bounce);
}

/// True when the row has any non-blank character at or left of `column`
/// (i.e. its indent does not exceed the reference column).
pub fn test_indent(column: usize, row: usize, screen: &dyn Screen) -> bool {
    let characters = screen.read_characters(ScreenBox::row(0, row, column + 1));
    characters.iter().any(|c| c.text != ' ')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Session, WindowDims};
    use core_cmd::alert::RecordingAlerts;
    use core_config::Preferences;
    use core_screen::{BufferScreen, ScreenDescription};

    fn desc(screen: &BufferScreen) -> ScreenDescription {
        screen.describe()
    }

    fn ctx<'a>(
        scr: &'a ScreenDescription,
        screen: &'a BufferScreen,
        prefs: &'a Preferences,
        alerts: &'a mut RecordingAlerts,
    ) -> MotionContext<'a> {
        MotionContext {
            scr,
            screen,
            prefs,
            dims: WindowDims::new(10, 1),
            alerts,
        }
    }

    #[test]
    fn different_line_skips_identical_rows_with_cues() {
        let mut screen = BufferScreen::from_lines(
            10,
            6,
            &["top", "same", "same", "same", "same", "bottom"],
        );
        screen.cursor = (0, 0);
        let scr = desc(&screen);
        let prefs = Preferences::default();
        let mut alerts = RecordingAlerts::new();
        let mut ses = Session::new();
        ses.winy = 1;

        let mut context = ctx(&scr, &screen, &prefs, &mut alerts);
        assert!(to_different_line(
            &mut ses,
            &mut context,
            CompareMode::Text,
            false,
            0,
            10
        ));
        assert_eq!(ses.winy, 5);
        assert_eq!(
            alerts.take(),
            vec![Alert::SkipFirst, Alert::Skip, Alert::Skip]
        );
    }

    #[test]
    fn different_line_bounces_at_boundary() {
        let screen = BufferScreen::from_lines(10, 3, &["same", "same", "same"]);
        let scr = desc(&screen);
        let prefs = Preferences::default();
        let mut alerts = RecordingAlerts::new();
        let mut ses = Session::new();
        ses.winy = 0;

        let mut context = ctx(&scr, &screen, &prefs, &mut alerts);
        assert!(!to_different_line(
            &mut ses,
            &mut context,
            CompareMode::Text,
            false,
            0,
            10
        ));
        let cues = alerts.take();
        assert_eq!(cues.last(), Some(&Alert::Bounce));
    }

    #[test]
    fn different_line_stops_on_cursor_row() {
        let mut screen =
            BufferScreen::from_lines(10, 4, &["same", "same", "same", "same"]);
        screen.cursor = (3, 2);
        let scr = desc(&screen);
        let prefs = Preferences::default();
        let mut alerts = RecordingAlerts::new();
        let mut ses = Session::new();
        ses.winy = 0;

        let mut context = ctx(&scr, &screen, &prefs, &mut alerts);
        assert!(to_different_line(
            &mut ses,
            &mut context,
            CompareMode::Text,
            false,
            0,
            10
        ));
        assert_eq!(ses.winy, 2);
    }

    #[test]
    fn attribute_scan_in_display_mode() {
        let mut screen = BufferScreen::from_lines(10, 3, &["aaa", "aaa", "aaa"]);
        screen.set_row_attributes(2, 0x70);
        screen.cursor = (0, 0);
        let scr = desc(&screen);
        let prefs = Preferences::default();
        let mut alerts = RecordingAlerts::new();
        let mut ses = Session::new();
        ses.display_mode = true;

        // Text compare is silently promoted to attributes.
        let mut context = ctx(&scr, &screen, &prefs, &mut alerts);
        assert!(to_different_line(
            &mut ses,
            &mut context,
            CompareMode::Text,
            false,
            0,
            10
        ));
        assert_eq!(ses.winy, 2);
    }

    #[test]
    fn find_row_lands_on_matching_indent() {
        let screen = BufferScreen::from_lines(
            10,
            5,
            &["top", "    deep", "      deeper", "  out", "x"],
        );
        let scr = desc(&screen);
        let prefs = Preferences::default();
        let mut alerts = RecordingAlerts::new();
        let mut ses = Session::new();
        ses.winy = 2;

        // Looking down for a line indented at most 3 columns.
        let mut context = ctx(&scr, &screen, &prefs, &mut alerts);
        find_row(&mut ses, &mut context, 3, false, test_indent);
        assert_eq!(ses.winy, 3);

        // Looking up likewise finds row 0.
        let mut context = ctx(&scr, &screen, &prefs, &mut alerts);
        find_row(&mut ses, &mut context, 3, true, test_indent);
        assert_eq!(ses.winy, 0);
    }

    #[test]
    fn one_line_steps_bounce_at_edges() {
        let screen = BufferScreen::from_lines(10, 2, &["a", "b"]);
        let scr = desc(&screen);
        let prefs = Preferences::default();
        let mut alerts = RecordingAlerts::new();
        let mut ses = Session::new();

        let mut context = ctx(&scr, &screen, &prefs, &mut alerts);
        up_one_line(&mut ses, &mut context);
        assert_eq!(ses.winy, 0);
        down_one_line(&mut ses, &mut context);
        assert_eq!(ses.winy, 1);
        down_one_line(&mut ses, &mut context);
        assert_eq!(ses.winy, 1);
        assert_eq!(alerts.take(), vec![Alert::Bounce, Alert::Bounce]);
    }
}
