//! core-session: per-virtual-terminal window state and motion logic.
//!
//! A [`Session`] exists for every virtual terminal ever observed and is
//! reused when that terminal comes back. It owns the window origin, the
//! motion anchor that breaks cursor-tracking lock, the last tracked cursor
//! position, the pointer latch, display mode, and the mark table.
//!
//! Invariants (clamped after every screen change, held after every
//! motion):
//! * `winy <= max(0, rows - text_rows)` and likewise for `moty`;
//! * `winx <= max(0, cols - 1)` and likewise for `motx`.

use std::collections::HashMap;

use core_cmd::{Alert, AlertSink};
use core_config::Preferences;
use core_screen::{Screen, ScreenBox, ScreenCharacter, ScreenDescription};

pub mod motion;

pub use motion::{
    CompareMode, down_line, down_one_line, find_row, test_indent, to_different_line, up_line,
    up_one_line,
};

pub const MARK_COUNT: usize = 0x100;

/// A remembered window position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WindowLocation {
    pub column: usize,
    pub row: usize,
}

/// Window geometry the session math needs: how many cells of one row the
/// display shows, and how many rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowDims {
    pub text_count: usize,
    pub text_rows: usize,
}

impl WindowDims {
    pub fn new(text_count: usize, text_rows: usize) -> Self {
        Self {
            text_count,
            text_rows,
        }
    }

    /// Greatest valid `winy` for a screen of `rows`.
    pub fn max_winy(&self, rows: usize) -> usize {
        rows.saturating_sub(self.text_rows)
    }
}

/// Contracted-braille coupling between renderer and tracking. The
/// renderer raises `active` while it is rendering contracted output;
/// cursor tracking raises `track_pending` to ask the renderer to walk the
/// window toward the cursor on the next pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContractionTrack {
    pub active: bool,
    pub track_pending: bool,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub winx: usize,
    pub winy: usize,
    /// Where the window was last deliberately moved to.
    pub motx: usize,
    pub moty: usize,
    /// Cursor position the tracker last followed.
    pub trkx: usize,
    pub trky: usize,
    /// Pointer latch; `None` until the pointer is first seen.
    pub ptrx: Option<usize>,
    pub ptry: Option<usize>,
    pub track_cursor: bool,
    pub hide_cursor: bool,
    /// Attributes display instead of text.
    pub display_mode: bool,
    pub marks: Vec<WindowLocation>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            winx: 0,
            winy: 0,
            motx: 0,
            moty: 0,
            trkx: 0,
            trky: 0,
            ptrx: None,
            ptry: None,
            track_cursor: true,
            hide_cursor: false,
            display_mode: false,
            marks: vec![WindowLocation::default(); MARK_COUNT],
        }
    }

    /// Clamp window and motion anchor into the screen. Run after every
    /// describe, since screens resize underneath us.
    pub fn clamp_to(&mut self, scr: &ScreenDescription, dims: WindowDims) {
        let max_y = dims.max_winy(scr.rows);
        self.winy = self.winy.min(max_y);
        self.moty = self.moty.min(max_y);

        let max_x = scr.cols.saturating_sub(1);
        self.winx = self.winx.min(max_x);
        self.motx = self.motx.min(max_x);
    }

    /// Record the current window position as the motion anchor.
    pub fn anchor_motion(&mut self) {
        self.motx = self.winx;
        self.moty = self.winy;
    }

    pub fn slide_window_vertically(&mut self, dims: WindowDims, y: usize) {
        if y < self.winy {
            self.winy = y;
        } else if y >= self.winy + dims.text_rows {
            self.winy = y - (dims.text_rows - 1);
        }
    }

    pub fn place_window_horizontally(&mut self, dims: WindowDims, x: usize) {
        self.winx = x / dims.text_count * dims.text_count;
    }
}

/// Sessions keyed by virtual-terminal number, created on first sighting.
#[derive(Debug, Default)]
pub struct SessionMap {
    sessions: HashMap<i32, Session>,
}

impl SessionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry(&mut self, number: i32) -> &mut Session {
        self.sessions.entry(number).or_insert_with(|| {
            tracing::debug!(target: "session", number, "new session");
            Session::new()
        })
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// Whether the cursor should currently be drawn at all.
pub fn show_cursor(ses: &Session, prefs: &Preferences, scr: &ScreenDescription) -> bool {
    scr.has_cursor && prefs.show_cursor && !ses.hide_cursor
}

/// Move the window so the cursor is visible.
///
/// With `place`, a cursor outside the window recentres it horizontally
/// first. A sliding window then drifts by 3/10 of the window width when
/// the cursor crosses the trigger columns; otherwise the window jumps in
/// whole-window steps. Contracted rendering takes over entirely: the row
/// follows the cursor and the renderer is asked to walk the window right
/// in word-boundary steps.
pub fn track_cursor(
    ses: &mut Session,
    scr: &ScreenDescription,
    screen: &dyn Screen,
    prefs: &Preferences,
    dims: WindowDims,
    contraction: &mut ContractionTrack,
    place: bool,
) -> bool {
    if !scr.cursor_ok() {
        return false;
    }

    if contraction.active {
        ses.winy = scr.posy;
        if scr.posx < ses.winx {
            // Pull the window back to the start of the word the cursor
            // sits in (or the end of the previous one).
            let mut length = scr.posx + 1;
            let characters = screen.read_characters(ScreenBox::row(0, ses.winy, length));
            let mut onspace = true;
            while length > 0 {
                length -= 1;
                if characters[length].text.is_whitespace() != onspace {
                    if onspace {
                        onspace = false;
                    } else {
                        length += 1;
                        break;
                    }
                }
            }
            ses.winx = length;
        }
        contraction.track_pending = true;
        return true;
    }

    if place
        && (scr.posx < ses.winx
            || scr.posx >= ses.winx + dims.text_count
            || scr.posy < ses.winy
            || scr.posy >= ses.winy + dims.text_rows)
    {
        ses.place_window_horizontally(dims, scr.posx);
    }

    if prefs.sliding_window {
        let reset = dims.text_count * 3 / 10;
        let trigger = if prefs.eager_sliding_window {
            dims.text_count * 3 / 20
        } else {
            0
        };

        if scr.posx < ses.winx + trigger {
            ses.winx = scr.posx.saturating_sub(reset);
        } else if scr.posx >= ses.winx + dims.text_count - trigger {
            let right = (scr.posx + reset + 1).min(scr.cols);
            ses.winx = right.saturating_sub(dims.text_count);
        }
    } else if scr.posx < ses.winx {
        let back = ((ses.winx - scr.posx - 1) / dims.text_count + 1) * dims.text_count;
        ses.winx = ses.winx.saturating_sub(back);
    } else {
        ses.winx += (scr.posx - ses.winx) / dims.text_count * dims.text_count;
    }

    ses.slide_window_vertically(dims, scr.posy);
    true
}

/// Follow the back-end pointer, latched so one pointer move scrolls at
/// most once.
pub fn check_pointer(
    ses: &mut Session,
    screen: &dyn Screen,
    prefs: &Preferences,
    dims: WindowDims,
) -> bool {
    if !prefs.window_follows_pointer {
        ses.ptrx = None;
        ses.ptry = None;
        return false;
    }
    let Some((column, row)) = screen.pointer() else {
        ses.ptrx = None;
        ses.ptry = None;
        return false;
    };

    let mut moved = false;
    if ses.ptrx != Some(column) {
        if ses.ptrx.is_some() {
            moved = true;
        }
        ses.ptrx = Some(column);
    }
    if ses.ptry != Some(row) {
        if ses.ptry.is_some() {
            moved = true;
        }
        ses.ptry = Some(row);
    }

    if moved {
        if column < ses.winx {
            ses.winx = column;
        } else if column >= ses.winx + dims.text_count {
            ses.winx = column + 1 - dims.text_count;
        }
        if row < ses.winy {
            ses.winy = row;
        } else if row >= ses.winy + dims.text_rows {
            ses.winy = row + 1 - dims.text_rows;
        }
    }
    moved
}

/// Put the left edge so the window *ends* at `column`: whole-window
/// steps normally, contracted-length steps when contracting.
pub fn place_right_edge(
    ses: &mut Session,
    dims: WindowDims,
    column: usize,
    contracted_length: Option<&dyn Fn(usize, usize) -> usize>,
) {
    match contracted_length {
        Some(length_at) => {
            ses.winx = 0;
            loop {
                let length = length_at(ses.winx, ses.winy).max(1);
                let end = ses.winx + length;
                if end > column {
                    break;
                }
                ses.winx = end;
            }
        }
        None => {
            ses.winx = column / dims.text_count * dims.text_count;
        }
    }
}

/// One window left. False at the left margin.
pub fn shift_window_left(
    ses: &mut Session,
    dims: WindowDims,
    full_shift: usize,
    contracted_length: Option<&dyn Fn(usize, usize) -> usize>,
) -> bool {
    if ses.winx == 0 {
        return false;
    }
    match contracted_length {
        Some(length_at) => place_right_edge(ses, dims, ses.winx - 1, Some(length_at)),
        None => ses.winx = ses.winx.saturating_sub(full_shift),
    }
    true
}

/// One window right. False at the right margin.
pub fn shift_window_right(
    ses: &mut Session,
    scr: &ScreenDescription,
    full_shift: usize,
    contracted_length: Option<&dyn Fn(usize, usize) -> usize>,
) -> bool {
    let shift = match contracted_length {
        Some(length_at) => length_at(ses.winx, ses.winy).max(1),
        None => full_shift,
    };
    if ses.winx + shift >= scr.cols {
        return false;
    }
    ses.winx += shift;
    true
}

/// Compare two rows cell-for-cell.
pub fn is_same_row(
    a: &[ScreenCharacter],
    b: &[ScreenCharacter],
    mode: CompareMode,
) -> bool {
    a.len() == b.len()
        && a.iter().zip(b).all(|(x, y)| match mode {
            CompareMode::Text => x.text == y.text,
            CompareMode::Attributes => x.attributes == y.attributes,
        })
}

/// Shared context bundle for the motion helpers; keeps their signatures
/// from sprawling.
pub struct MotionContext<'a> {
    pub scr: &'a ScreenDescription,
    pub screen: &'a dyn Screen,
    pub prefs: &'a Preferences,
    pub dims: WindowDims,
    pub alerts: &'a mut dyn AlertSink,
}

impl MotionContext<'_> {
    pub fn alert(&mut self, alert: Alert) {
        if self.prefs.alert_tunes {
            self.alerts.alert(alert);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_screen::BufferScreen;

    fn desc(cols: usize, rows: usize, posx: usize, posy: usize) -> ScreenDescription {
        ScreenDescription {
            cols,
            rows,
            posx,
            posy,
            number: 1,
            has_cursor: true,
            unreadable: None,
        }
    }

    fn dims(count: usize) -> WindowDims {
        WindowDims::new(count, 1)
    }

    #[test]
    fn clamp_holds_window_invariant() {
        let mut ses = Session::new();
        ses.winx = 500;
        ses.winy = 500;
        ses.motx = 500;
        ses.moty = 500;
        ses.clamp_to(&desc(80, 25, 0, 0), dims(40));
        assert_eq!(ses.winy, 24);
        assert_eq!(ses.winx, 79);
        assert_eq!(ses.moty, 24);
        assert_eq!(ses.motx, 79);

        // Screens smaller than the display still clamp sanely.
        ses.clamp_to(&desc(20, 1, 0, 0), dims(40));
        assert_eq!(ses.winy, 0);
        assert_eq!(ses.winx, 19);
    }

    #[test]
    fn jumping_track_moves_in_window_multiples() {
        let screen = BufferScreen::new(80, 25);
        let prefs = Preferences::default();
        let mut contraction = ContractionTrack::default();
        let mut ses = Session::new();

        let scr = desc(80, 25, 45, 3);
        assert!(track_cursor(
            &mut ses,
            &scr,
            &screen,
            &prefs,
            dims(40),
            &mut contraction,
            false
        ));
        assert_eq!(ses.winx, 40);
        assert_eq!(ses.winy, 3);

        let scr = desc(80, 25, 5, 3);
        track_cursor(&mut ses, &scr, &screen, &prefs, dims(40), &mut contraction, false);
        assert_eq!(ses.winx, 0);
    }

    #[test]
    fn sliding_track_drifts_by_reset_amount() {
        let screen = BufferScreen::new(80, 25);
        let mut prefs = Preferences::default();
        prefs.sliding_window = true;
        let mut contraction = ContractionTrack::default();
        let mut ses = Session::new();

        // Cursor just past the right edge: window slides so the cursor
        // sits reset cells from the edge.
        let scr = desc(80, 25, 40, 0);
        track_cursor(&mut ses, &scr, &screen, &prefs, dims(40), &mut contraction, false);
        // right = min(40+12+1, 80) = 53; winx = 53-40 = 13.
        assert_eq!(ses.winx, 13);
    }

    #[test]
    fn contracted_track_walks_to_word_boundary() {
        let screen = BufferScreen::from_lines(80, 2, &["", "the quick brown fox"]);
        let prefs = Preferences::default();
        let mut contraction = ContractionTrack {
            active: true,
            track_pending: false,
        };
        let mut ses = Session::new();
        ses.winx = 10;

        // Cursor behind the window, inside "quick".
        let scr = desc(80, 2, 6, 1);
        assert!(track_cursor(
            &mut ses,
            &scr,
            &screen,
            &prefs,
            dims(20),
            &mut contraction,
            false
        ));
        assert_eq!(ses.winy, 1);
        // Start of "quick".
        assert_eq!(ses.winx, 4);
        assert!(contraction.track_pending);
    }

    #[test]
    fn place_recentres_when_cursor_out_of_window() {
        let screen = BufferScreen::new(100, 25);
        let prefs = Preferences::default();
        let mut contraction = ContractionTrack::default();
        let mut ses = Session::new();
        ses.winx = 0;

        let scr = desc(100, 25, 87, 0);
        track_cursor(&mut ses, &scr, &screen, &prefs, dims(40), &mut contraction, true);
        assert_eq!(ses.winx, 80);
    }

    #[test]
    fn pointer_following_latches() {
        let mut screen = BufferScreen::new(80, 25);
        let mut prefs = Preferences::default();
        prefs.window_follows_pointer = true;
        let mut ses = Session::new();

        // First sighting primes the latch without scrolling.
        screen.pointer = Some((60, 10));
        assert!(!check_pointer(&mut ses, &screen, &prefs, dims(40)));
        assert_eq!(ses.winx, 0);

        // An actual move scrolls once.
        screen.pointer = Some((61, 10));
        assert!(check_pointer(&mut ses, &screen, &prefs, dims(40)));
        assert_eq!(ses.winx, 61 + 1 - 40);
        assert_eq!(ses.winy, 10);

        // Stationary pointer stays quiet.
        assert!(!check_pointer(&mut ses, &screen, &prefs, dims(40)));
    }

    #[test]
    fn window_shifts_respect_margins() {
        let mut ses = Session::new();
        let scr = desc(100, 25, 0, 0);

        assert!(!shift_window_left(&mut ses, dims(40), 40, None));
        ses.winx = 60;
        assert!(shift_window_left(&mut ses, dims(40), 40, None));
        assert_eq!(ses.winx, 20);

        assert!(shift_window_right(&mut ses, &scr, 40, None));
        assert_eq!(ses.winx, 60);
        assert!(!shift_window_right(&mut ses, &scr, 40, None));
    }

    #[test]
    fn contracted_shifts_use_consumed_lengths() {
        let mut ses = Session::new();
        // Each window consumes 12 screen cells regardless of position.
        let lengths = |_x: usize, _y: usize| 12usize;

        place_right_edge(&mut ses, dims(20), 30, Some(&lengths));
        assert_eq!(ses.winx, 24);

        let scr = desc(100, 25, 0, 0);
        assert!(shift_window_right(&mut ses, &scr, 20, Some(&lengths)));
        assert_eq!(ses.winx, 36);
    }

    #[test]
    fn sessions_are_created_once_per_terminal() {
        let mut map = SessionMap::new();
        map.entry(3).winx = 17;
        map.entry(4).winx = 5;
        assert_eq!(map.entry(3).winx, 17);
        assert_eq!(map.len(), 2);
    }
}
