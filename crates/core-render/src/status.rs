//! Status cells, the status/text separator, and the info-mode line.

use core_braille::dots::{DOT1, DOT2, DOT3, DOT4, DOT5, DOT6, DOT7, DOT8};
use core_braille::TextTable;
use core_config::{Preferences, StatusField, StatusSeparator};
use core_screen::ScreenDescription;
use core_session::Session;

/// Mode flags carried into the status renderer by the update loop.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusFlags {
    pub frozen: bool,
    pub info_mode: bool,
}

/// Render one two-cell number, 1-based like the historical displays.
fn number_cells(table: &TextTable, value: usize, out: &mut Vec<u8>) {
    let shown = (value + 1).min(99);
    out.push(table.dots(char::from(b'0' + (shown / 10) as u8)));
    out.push(table.dots(char::from(b'0' + (shown % 10) as u8)));
}

/// One cell of mode flags, one dot per toggle.
fn state_dots(ses: &Session, prefs: &Preferences, flags: StatusFlags) -> u8 {
    let mut dots = 0;
    if ses.track_cursor {
        dots |= DOT1;
    }
    if prefs.show_cursor {
        dots |= DOT2;
    }
    if ses.display_mode {
        dots |= DOT3;
    }
    if flags.frozen {
        dots |= DOT4;
    }
    if prefs.six_dot_text {
        dots |= DOT5;
    }
    if prefs.blinking_capitals {
        dots |= DOT6;
    }
    dots
}

/// Render the configured status fields into dot cells.
pub fn render_status_fields(
    table: &TextTable,
    ses: &Session,
    scr: &ScreenDescription,
    prefs: &Preferences,
    flags: StatusFlags,
) -> Vec<u8> {
    let mut cells = Vec::new();
    for field in &prefs.status_fields {
        match field {
            StatusField::WindowColumn => number_cells(table, ses.winx, &mut cells),
            StatusField::WindowRow => number_cells(table, ses.winy, &mut cells),
            StatusField::CursorColumn => number_cells(table, scr.posx, &mut cells),
            StatusField::CursorRow => number_cells(table, scr.posy, &mut cells),
            StatusField::ScreenNumber => {
                number_cells(table, (scr.number.max(1) as usize).saturating_sub(1), &mut cells)
            }
            StatusField::StateDots => cells.push(state_dots(ses, prefs, flags)),
        }
    }
    cells
}

const SEPARATOR_TEXT_LEFT: char = '\u{23B8}'; // LEFT VERTICAL BOX LINE
const SEPARATOR_TEXT_RIGHT: char = '\u{23B9}'; // RIGHT VERTICAL BOX LINE
const SEPARATOR_TEXT_BLOCK: char = '\u{2503}'; // BOX DRAWINGS HEAVY VERTICAL

const SEPARATOR_DOTS_LEFT: u8 = DOT1 | DOT2 | DOT3 | DOT7;
const SEPARATOR_DOTS_RIGHT: u8 = DOT4 | DOT5 | DOT6 | DOT8;

/// Paint the separator column between status and text regions.
///
/// `column` is the separator's window column; `status_on_right` flips the
/// side-dependent styles.
pub fn fill_status_separator(
    text: &mut [char],
    dots: &mut [u8],
    column: usize,
    columns: usize,
    rows: usize,
    style: StatusSeparator,
    status_on_right: bool,
) {
    let (separator_text, separator_dots) = match style {
        StatusSeparator::None => return,
        StatusSeparator::Block => (SEPARATOR_TEXT_BLOCK, SEPARATOR_DOTS_LEFT | SEPARATOR_DOTS_RIGHT),
        StatusSeparator::StatusSide => {
            if status_on_right {
                (SEPARATOR_TEXT_RIGHT, SEPARATOR_DOTS_RIGHT)
            } else {
                (SEPARATOR_TEXT_LEFT, SEPARATOR_DOTS_LEFT)
            }
        }
        StatusSeparator::TextSide => {
            if status_on_right {
                (SEPARATOR_TEXT_LEFT, SEPARATOR_DOTS_LEFT)
            } else {
                (SEPARATOR_TEXT_RIGHT, SEPARATOR_DOTS_RIGHT)
            }
        }
    };

    for row in 0..rows {
        let index = row * columns + column;
        text[index] = separator_text;
        dots[index] = separator_dots;
    }
}

/// The info-mode summary line: window and cursor coordinates, screen
/// number, and the flag letters (tracking, cursor, display mode, frozen,
/// text style, capitals blink).
pub fn info_line(
    ses: &Session,
    scr: &ScreenDescription,
    prefs: &Preferences,
    flags: StatusFlags,
) -> String {
    format!(
        "{:02}:{:02} {:02}:{:02} {:02} {}{}{}{}{}{}",
        ses.winx + 1,
        ses.winy + 1,
        scr.posx + 1,
        scr.posy + 1,
        scr.number,
        if ses.track_cursor { 't' } else { ' ' },
        if prefs.show_cursor {
            if prefs.blinking_cursor { 'B' } else { 'v' }
        } else if prefs.blinking_cursor {
            'b'
        } else {
            ' '
        },
        if ses.display_mode { 'a' } else { 't' },
        if flags.frozen { 'f' } else { ' ' },
        if prefs.six_dot_text { '6' } else { '8' },
        if prefs.blinking_capitals { 'B' } else { ' ' },
    )
}
