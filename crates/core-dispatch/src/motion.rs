//! Window panning, line motions, and content searches.

use core_cmd::Alert;
use core_screen::{Screen, ScreenBox};
use core_session::motion::{
    CompareMode, down_line, down_one_line, find_row, test_indent, to_different_line, up_line,
    up_one_line,
};
use core_session::{
    MotionContext, place_right_edge, shift_window_left, shift_window_right, show_cursor,
};
use core_config::BlankSkipMode;

use crate::{DispatchEnv, reading};

pub(crate) use core_session::motion::CompareMode as Compare;

/// Run `body` with a `MotionContext` split out of the env's fields.
macro_rules! with_motion_ctx {
    ($env:expr, $ctx:ident, $ses:ident, $body:expr) => {{
        let $ses = &mut *$env.ses;
        let screen: &dyn Screen = reading($env.frozen, $env.screen);
        let mut $ctx = MotionContext {
            scr: $env.scr,
            screen,
            prefs: &*$env.prefs,
            dims: $env.dims,
            alerts: &mut *$env.alerts,
        };
        $body
    }};
}

pub(crate) fn step_line(env: &mut DispatchEnv<'_>, up: bool) {
    with_motion_ctx!(env, ctx, ses, {
        if up {
            up_one_line(ses, &mut ctx);
        } else {
            down_one_line(ses, &mut ctx);
        }
    })
}

pub(crate) fn different_line(env: &mut DispatchEnv<'_>, up: bool, mode: CompareMode) {
    let cols = env.scr.cols;
    with_motion_ctx!(env, ctx, ses, {
        to_different_line(ses, &mut ctx, mode, up, 0, cols);
    })
}

pub(crate) fn different_character(env: &mut DispatchEnv<'_>, column: usize, up: bool) {
    with_motion_ctx!(env, ctx, ses, {
        to_different_line(ses, &mut ctx, CompareMode::Text, up, column, 1);
    })
}

pub(crate) fn find_indent(env: &mut DispatchEnv<'_>, column: usize, up: bool) {
    with_motion_ctx!(env, ctx, ses, {
        find_row(ses, &mut ctx, column, up, test_indent);
    })
}

/// Move to the last line of the previous paragraph / first line of the
/// next: scan for a blank-line gap, then for the first printed line
/// beyond it.
pub(crate) fn find_paragraph(env: &mut DispatchEnv<'_>, up: bool) {
    let cols = env.scr.cols;
    let max_winy = env.dims.max_winy(env.scr.rows) as i64;
    let screen = reading(env.frozen, env.screen);

    let mut find_blank = true;
    let mut found = false;
    let mut line = env.ses.winy as i64;
    while line >= 0 && line <= max_winy {
        let row = screen.read_characters(ScreenBox::row(0, line as usize, cols));
        let blank = row.iter().all(|c| c.text == ' ');
        if blank == find_blank {
            if !find_blank {
                found = true;
                env.ses.winy = line as usize;
                env.ses.winx = 0;
                break;
            }
            find_blank = false;
        }
        line += if up { -1 } else { 1 };
    }
    if !found {
        env.alert(Alert::Bounce);
    }
}

/// Navigate to the previous/next row starting with the same prompt (the
/// current row's text up to its first blank).
pub(crate) fn find_prompt(env: &mut DispatchEnv<'_>, up: bool) {
    let cols = env.scr.cols;
    let prompt = {
        let screen = reading(env.frozen, env.screen);
        screen.read_characters(ScreenBox::row(0, env.ses.winy, cols))
    };
    let length = prompt
        .iter()
        .position(|c| c.text == ' ')
        .unwrap_or(cols);
    if length >= cols {
        env.rejected();
        return;
    }

    with_motion_ctx!(env, ctx, ses, {
        find_row(ses, &mut ctx, length, up, |column, row, screen| {
            let candidate = screen.read_characters(ScreenBox::row(0, row, column + 1));
            candidate
                .iter()
                .zip(prompt.iter())
                .all(|(a, b)| a.text == b.text)
        });
    })
}

/// Find the needle (case-insensitively) in a haystack of characters.
fn find_in(haystack: &[char], needle: &[char]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    (0..=haystack.len() - needle.len())
        .find(|&start| haystack[start..start + needle.len()] == *needle)
}

fn rfind_in(haystack: &[char], needle: &[char]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    (0..=haystack.len() - needle.len())
        .rev()
        .find(|&start| haystack[start..start + needle.len()] == *needle)
}

/// Search the screen for the clipboard contents. The starting row is
/// windowed so repeated searches walk past the current window rather than
/// refinding it.
pub(crate) fn search(env: &mut DispatchEnv<'_>, up: bool) {
    if env.clipboard.is_empty() {
        env.rejected();
        return;
    }
    let needle: Vec<char> = env
        .clipboard
        .content()
        .iter()
        .flat_map(|c| c.to_lowercase())
        .collect();

    let cols = env.scr.cols;
    let max_winy = env.dims.max_winy(env.scr.rows) as i64;
    let mut found = false;

    if needle.len() <= cols {
        let screen = reading(env.frozen, env.screen);
        let mut line = env.ses.winy as i64;
        while line >= 0 && line <= max_winy {
            let buffer: Vec<char> = screen
                .read_text(ScreenBox::row(0, line as usize, cols))
                .iter()
                .flat_map(|c| c.to_lowercase())
                .collect();

            // On the starting row, look only behind (up) or beyond
            // (down) the current window.
            let (start, slice): (usize, &[char]) = if line as usize == env.ses.winy {
                if up {
                    let end = (env.ses.winx + needle.len()).saturating_sub(1).min(buffer.len());
                    (0, &buffer[..end])
                } else {
                    let from = (env.ses.winx + env.layout.text_count).min(buffer.len());
                    (from, &buffer[from..])
                }
            } else {
                (0, &buffer[..])
            };

            let position = if up {
                rfind_in(slice, &needle)
            } else {
                find_in(slice, &needle)
            };
            if let Some(position) = position {
                let column = start + position;
                env.ses.winy = line as usize;
                env.ses.winx = column / env.layout.text_count * env.layout.text_count;
                found = true;
                break;
            }
            line += if up { -1 } else { 1 };
        }
    }

    if !found {
        env.alert(Alert::Bounce);
    }
}

/// The screen span one window covers from `(winx, winy)`: the contracted
/// consumption when contracting, the cell count otherwise.
fn window_length(env: &DispatchEnv<'_>) -> usize {
    if env.contraction.is_active() {
        env.contraction.length_at(
            reading(env.frozen, env.screen),
            env.scr.cols,
            env.layout.text_count * env.dims.text_rows,
            env.ses.winx,
            env.ses.winy,
            None,
        )
    } else {
        env.layout.text_count
    }
}

fn shift_left(env: &mut DispatchEnv<'_>) -> bool {
    if env.contraction.is_active() {
        let engine = &*env.contraction;
        let screen = reading(env.frozen, env.screen);
        let cols = env.scr.cols;
        let cells = env.layout.text_count * env.dims.text_rows;
        let length = |x: usize, y: usize| engine.length_at(screen, cols, cells, x, y, None);
        shift_window_left(env.ses, env.dims, env.full_shift, Some(&length))
    } else {
        shift_window_left(env.ses, env.dims, env.full_shift, None)
    }
}

fn shift_right(env: &mut DispatchEnv<'_>) -> bool {
    if env.contraction.is_active() {
        let engine = &*env.contraction;
        let screen = reading(env.frozen, env.screen);
        let cols = env.scr.cols;
        let cells = env.layout.text_count * env.dims.text_rows;
        let length = |x: usize, y: usize| engine.length_at(screen, cols, cells, x, y, None);
        shift_window_right(env.ses, env.scr, env.full_shift, Some(&length))
    } else {
        shift_window_right(env.ses, env.scr, env.full_shift, None)
    }
}

fn place_window_right(env: &mut DispatchEnv<'_>) {
    place_edge_at(env, env.scr.cols.saturating_sub(1));
}

fn place_edge_at(env: &mut DispatchEnv<'_>, column: usize) {
    if env.contraction.is_active() {
        let engine = &*env.contraction;
        let screen = reading(env.frozen, env.screen);
        let cols = env.scr.cols;
        let cells = env.layout.text_count * env.dims.text_rows;
        let length = |x: usize, y: usize| engine.length_at(screen, cols, cells, x, y, None);
        place_right_edge(env.ses, env.dims, column, Some(&length));
    } else {
        place_right_edge(env.ses, env.dims, column, None);
    }
}

/// After a leftward wrap with end-of-line skipping: pull the window back
/// to cover the line's last printed character (or the cursor, whichever
/// is further right).
fn skip_end_of_line(env: &mut DispatchEnv<'_>) {
    if !(env.prefs.skip_blank_windows
        && env.prefs.blank_windows_skip_mode == BlankSkipMode::EndOfLine)
    {
        return;
    }
    let cols = env.scr.cols;
    let row = {
        let screen = reading(env.frozen, env.screen);
        screen.read_characters(ScreenBox::row(0, env.ses.winy, cols))
    };
    let mut last = row.iter().rposition(|c| c.text != ' ').unwrap_or(0);
    if show_cursor(env.ses, env.prefs, env.scr)
        && env.scr.posy == env.ses.winy
        && env.scr.posx < cols
    {
        last = last.max(env.scr.posx);
    }
    if last < env.ses.winx {
        place_edge_at(env, last);
    }
}

/// True when the window region at the current position is entirely blank
/// (ignoring a cursor parked in it).
fn window_is_blank_here(env: &DispatchEnv<'_>, from: usize, count: usize) -> bool {
    let screen = reading(env.frozen, env.screen);
    let row = screen.read_characters(ScreenBox::row(from, env.ses.winy, count));
    row.iter().all(|c| c.text == ' ')
}

pub(crate) fn full_window_left(env: &mut DispatchEnv<'_>) {
    if env.prefs.skip_blank_windows
        && env.prefs.blank_windows_skip_mode == BlankSkipMode::All
    {
        return full_window_left_skip(env);
    }

    let old_x = env.ses.winx;
    if shift_left(env) {
        let mut wrap = false;
        if env.prefs.skip_blank_windows
            && env.prefs.blank_windows_skip_mode != BlankSkipMode::EndOfLine
        {
            let char_count = env.scr.cols.min(env.ses.winx + env.layout.text_count);
            let cursor_here = show_cursor(env.ses, env.prefs, env.scr)
                && env.scr.posy == env.ses.winy
                && env.scr.posx < char_count;
            if !cursor_here && window_is_blank_here(env, 0, char_count) {
                wrap = true;
            }
        }
        if !wrap {
            skip_end_of_line(env);
            return;
        }
    }

    // Wrap to the previous line's right edge.
    if env.ses.winy == 0 {
        env.alert(Alert::Bounce);
        env.ses.winx = old_x;
        return;
    }
    env.alert(Alert::WrapUp);
    with_motion_ctx!(env, ctx, ses, {
        up_line(ses, &mut ctx, CompareMode::Text);
    });
    place_window_right(env);
    skip_end_of_line(env);
}

pub(crate) fn full_window_left_skip(env: &mut DispatchEnv<'_>) {
    let old_x = env.ses.winx;
    let old_y = env.ses.winy;
    let mut wrap_cues = 3;

    loop {
        if !shift_left(env) {
            if env.ses.winy == 0 {
                env.alert(Alert::Bounce);
                env.ses.winx = old_x;
                env.ses.winy = old_y;
                return;
            }
            if wrap_cues > 0 {
                env.alert(Alert::WrapUp);
                wrap_cues -= 1;
            }
            with_motion_ctx!(env, ctx, ses, {
                up_line(ses, &mut ctx, CompareMode::Text);
            });
            place_window_right(env);
        }

        let count = window_length(env).min(env.scr.cols.saturating_sub(env.ses.winx));
        let screen = reading(env.frozen, env.screen);
        let row = screen.read_characters(ScreenBox::row(env.ses.winx, env.ses.winy, count));
        let mut last: i64 = row
            .iter()
            .rposition(|c| c.text != ' ')
            .map(|p| p as i64)
            .unwrap_or(-1);
        if show_cursor(env.ses, env.prefs, env.scr)
            && env.scr.posy == env.ses.winy
            && env.scr.posx < env.ses.winx + count
        {
            last = last.max(env.scr.posx as i64 - env.ses.winx as i64);
        }
        if last >= 0 {
            return;
        }
    }
}

pub(crate) fn full_window_right(env: &mut DispatchEnv<'_>) {
    if env.prefs.skip_blank_windows
        && env.prefs.blank_windows_skip_mode == BlankSkipMode::All
    {
        return full_window_right_skip(env);
    }

    let old_x = env.ses.winx;
    if shift_right(env) {
        let mut wrap = false;
        if env.prefs.skip_blank_windows {
            let cursor_behind = show_cursor(env.ses, env.prefs, env.scr)
                && env.scr.posy == env.ses.winy
                && env.scr.posx >= env.ses.winx;
            if !cursor_behind {
                let count = env.scr.cols.saturating_sub(env.ses.winx);
                if count == 0 || window_is_blank_here(env, env.ses.winx, count) {
                    wrap = true;
                }
            }
        }
        if !wrap {
            return;
        }
    }

    // Wrap to the start of the next line.
    if env.ses.winy >= env.dims.max_winy(env.scr.rows) {
        env.alert(Alert::Bounce);
        env.ses.winx = old_x;
        return;
    }
    env.alert(Alert::WrapDown);
    with_motion_ctx!(env, ctx, ses, {
        down_line(ses, &mut ctx, CompareMode::Text);
    });
    env.ses.winx = 0;
}

pub(crate) fn full_window_right_skip(env: &mut DispatchEnv<'_>) {
    let old_x = env.ses.winx;
    let old_y = env.ses.winy;
    let mut wrap_cues = 3;

    loop {
        if !shift_right(env) {
            if env.ses.winy >= env.dims.max_winy(env.scr.rows) {
                env.alert(Alert::Bounce);
                env.ses.winx = old_x;
                env.ses.winy = old_y;
                return;
            }
            if wrap_cues > 0 {
                env.alert(Alert::WrapDown);
                wrap_cues -= 1;
            }
            with_motion_ctx!(env, ctx, ses, {
                down_line(ses, &mut ctx, CompareMode::Text);
            });
            env.ses.winx = 0;
        }

        let count = window_length(env).min(env.scr.cols.saturating_sub(env.ses.winx));
        let screen = reading(env.frozen, env.screen);
        let row = screen.read_characters(ScreenBox::row(env.ses.winx, env.ses.winy, count));
        let mut first = row
            .iter()
            .position(|c| c.text != ' ')
            .unwrap_or(count);
        if show_cursor(env.ses, env.prefs, env.scr)
            && env.scr.posy == env.ses.winy
            && env.scr.posx < env.scr.cols
            && env.scr.posx >= env.ses.winx
        {
            first = first.min(env.scr.posx - env.ses.winx);
        }
        if first < count {
            return;
        }
    }
}
