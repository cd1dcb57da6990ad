//! Stand-in screen back-end for running the daemon without a console
//! back-end compiled in. Serves static text — a banner or a file — so
//! the whole device path (probe, render, keys, panning) can be exercised
//! end to end.

use std::path::Path;

use core_screen::BufferScreen;

const DEFAULT_COLS: usize = 80;
const DEFAULT_ROWS: usize = 25;

pub fn banner_screen() -> BufferScreen {
    let lines = [
        "braild demo screen",
        "",
        "This is a static text buffer standing in for a console",
        "back-end. Window panning, cursor routing and clipboard",
        "commands all work against it.",
        "",
        "The quick brown fox jumps over the lazy dog.",
    ];
    let mut screen = BufferScreen::from_lines(DEFAULT_COLS, DEFAULT_ROWS, &lines);
    screen.cursor = (0, 0);
    screen
}

pub fn screen_from_file(path: &Path) -> std::io::Result<BufferScreen> {
    let content = std::fs::read_to_string(path)?;
    let lines: Vec<&str> = content.lines().collect();
    let cols = lines
        .iter()
        .map(|l| l.chars().count())
        .max()
        .unwrap_or(DEFAULT_COLS)
        .max(1);
    let rows = lines.len().max(1);
    Ok(BufferScreen::from_lines(cols, rows, &lines))
}
