//! core-clipboard: capture regions of the screen, paste them back as
//! synthesised keys.
//!
//! The buffer is linear text with `\r` separating captured rows. A
//! capture is anchored by `begin`: starting a capture clears the buffer,
//! extending one re-anchors at the current end, and every copy *replaces*
//! everything after the anchor — which is what lets the user drag the end
//! point of a capture without stacking up partial copies.

use core_cmd::{Alert, AlertSink};
use core_screen::{KeyPress, Screen, ScreenBox, ScreenKey};

const ROW_SEPARATOR: char = '\r';

#[derive(Debug, Default)]
pub struct Clipboard {
    buffer: Vec<char>,
    begin_column: usize,
    begin_row: usize,
    /// Where the next copy appends; `None` until a capture starts.
    begin_offset: Option<usize>,
}

impl Clipboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn content(&self) -> &[char] {
        &self.buffer
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
        self.begin_offset = None;
    }

    /// Begin a fresh capture at `(column, row)`.
    pub fn start(&mut self, column: usize, row: usize, alerts: &mut dyn AlertSink) {
        self.clear();
        self.extend(column, row, alerts);
    }

    /// Re-anchor at `(column, row)`, keeping what was captured so far.
    pub fn extend(&mut self, column: usize, row: usize, alerts: &mut dyn AlertSink) {
        self.begin_column = column;
        self.begin_row = row;
        self.begin_offset = Some(self.buffer.len());
        alerts.alert(Alert::CopyBegin);
    }

    /// Read the raw grid between the anchor and `(to_column, to_row)`,
    /// substituting control and whitespace characters with plain spaces
    /// and separating rows.
    fn copy_grid(
        &self,
        screen: &dyn Screen,
        from_column: usize,
        from_row: usize,
        to_column: usize,
        to_row: usize,
    ) -> Option<Vec<char>> {
        if to_column < from_column || to_row < from_row {
            return None;
        }
        self.begin_offset?;

        let columns = to_column - from_column + 1;
        let rows = to_row - from_row + 1;
        let grid = screen.read_text(ScreenBox::new(from_column, from_row, columns, rows));

        let mut out = Vec::with_capacity(rows * (columns + 1));
        for row in 0..rows {
            for column in 0..columns {
                let mut character = grid[row * columns + column];
                if character.is_control() || character.is_whitespace() {
                    character = ' ';
                }
                out.push(character);
            }
            if row != rows - 1 {
                out.push(ROW_SEPARATOR);
            }
        }
        Some(out)
    }

    /// Splice `addition` in at the anchor, discarding any previous copy
    /// beyond it.
    fn append(&mut self, addition: Vec<char>, alerts: &mut dyn AlertSink) {
        let offset = self.begin_offset.unwrap_or(0);
        self.buffer.truncate(offset);
        self.buffer.extend(addition);
        tracing::debug!(target: "clipboard", length = self.buffer.len(), "capture appended");
        alerts.alert(Alert::CopyEnd);
    }

    /// Rectangular copy: the box from the anchor to `(column, row)`,
    /// trailing blanks trimmed from each row.
    pub fn rectangular_copy(
        &mut self,
        screen: &dyn Screen,
        column: usize,
        row: usize,
        alerts: &mut dyn AlertSink,
    ) -> bool {
        let Some(grid) = self.copy_grid(
            screen,
            self.begin_column,
            self.begin_row,
            column,
            row,
        ) else {
            return false;
        };

        let mut out = Vec::with_capacity(grid.len());
        let mut spaces = 0usize;
        for character in grid {
            match character {
                ' ' => {
                    spaces += 1;
                    continue;
                }
                ROW_SEPARATOR => spaces = 0,
                _ => {}
            }
            for _ in 0..spaces {
                out.push(' ');
            }
            spaces = 0;
            out.push(character);
        }

        self.append(out, alerts);
        true
    }

    /// Linear copy: to the right margin on the first row, full rows in
    /// between, through `column` on the last; space runs around row
    /// boundaries collapse to a single space.
    pub fn linear_copy(
        &mut self,
        screen: &dyn Screen,
        column: usize,
        row: usize,
        alerts: &mut dyn AlertSink,
    ) -> bool {
        let description = screen.describe();
        if description.cols == 0 {
            return false;
        }
        let right_column = description.cols - 1;

        let Some(mut buffer) = self.copy_grid(screen, 0, self.begin_row, right_column, row)
        else {
            return false;
        };

        // Truncate the last row to the requested column.
        if column < right_column {
            let last_row_start = buffer
                .iter()
                .rposition(|&c| c == ROW_SEPARATOR)
                .map(|p| p + 1)
                .unwrap_or(0);
            let last_row_length = buffer.len() - last_row_start;
            if last_row_length > column + 1 {
                buffer.truncate(last_row_start + column + 1);
            }
        }

        // Trim the first row's prefix up to the anchor column (but never
        // past the first row separator).
        if self.begin_column > 0 {
            let first_separator = buffer
                .iter()
                .position(|&c| c == ROW_SEPARATOR)
                .unwrap_or(buffer.len());
            let start = first_separator.min(self.begin_column);
            buffer.drain(..start);
        }

        // Collapse whitespace around row boundaries.
        let mut out = Vec::with_capacity(buffer.len());
        let mut spaces = 0usize;
        let mut newlines = 0usize;
        for character in buffer {
            match character {
                ' ' => {
                    spaces += 1;
                    continue;
                }
                ROW_SEPARATOR => {
                    newlines += 1;
                    continue;
                }
                _ => {}
            }
            if newlines > 0 {
                if newlines > 1 || spaces > 0 {
                    spaces = 1;
                }
                newlines = 0;
            }
            for _ in 0..spaces {
                out.push(' ');
            }
            spaces = 0;
            out.push(character);
        }

        self.append(out, alerts);
        true
    }

    /// Inject the buffer as keystrokes. Fails (and stops) on the first
    /// rejected key.
    pub fn paste(&self, screen: &mut dyn Screen) -> bool {
        if self.buffer.is_empty() {
            return false;
        }
        for &character in &self.buffer {
            let key = if character == ROW_SEPARATOR {
                ScreenKey::Enter
            } else {
                ScreenKey::Char(character)
            };
            if !screen.insert_key(KeyPress::plain(key)) {
                tracing::warn!(target: "clipboard", "paste aborted mid-injection");
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_cmd::NullAlerts;
    use core_cmd::alert::RecordingAlerts;
    use core_screen::BufferScreen;

    fn screen() -> BufferScreen {
        BufferScreen::from_lines(
            12,
            4,
            &["alpha  beta", "  gamma", "", "delta   end"],
        )
    }

    fn chars(s: &str) -> Vec<char> {
        s.chars().collect()
    }

    #[test]
    fn rectangular_copy_trims_row_tails() {
        let screen = screen();
        let mut alerts = NullAlerts;
        let mut clipboard = Clipboard::new();
        clipboard.start(0, 0, &mut alerts);
        assert!(clipboard.rectangular_copy(&screen, 6, 1, &mut alerts));
        // Rows 0..=1, columns 0..=6, trailing blanks dropped per row.
        assert_eq!(clipboard.content(), chars("alpha\r  gamma").as_slice());
    }

    #[test]
    fn append_replaces_beyond_the_anchor() {
        let screen = screen();
        let mut alerts = NullAlerts;
        let mut clipboard = Clipboard::new();
        clipboard.start(0, 0, &mut alerts);
        clipboard.rectangular_copy(&screen, 4, 0, &mut alerts);
        let first = clipboard.content().to_vec();
        assert_eq!(first, chars("alpha"));

        // Dragging the end point re-copies from the same anchor.
        clipboard.rectangular_copy(&screen, 6, 1, &mut alerts);
        assert_eq!(clipboard.content(), chars("alpha\r  gamma").as_slice());

        // Extending appends after what's there.
        clipboard.extend(0, 3, &mut alerts);
        clipboard.rectangular_copy(&screen, 4, 3, &mut alerts);
        assert_eq!(
            clipboard.content(),
            chars("alpha\r  gammadelta").as_slice()
        );
    }

    #[test]
    fn linear_copy_collapses_boundary_whitespace() {
        let screen = screen();
        let mut alerts = NullAlerts;
        let mut clipboard = Clipboard::new();
        // Anchor inside the first row.
        clipboard.start(7, 0, &mut alerts);
        assert!(clipboard.linear_copy(&screen, 6, 1, &mut alerts));
        // First row from column 7 ("beta"), then the run of blanks and
        // the row boundary collapse to one space.
        assert_eq!(clipboard.content(), chars("beta gamma").as_slice());
    }

    #[test]
    fn linear_copy_truncates_last_row() {
        let screen = screen();
        let mut alerts = NullAlerts;
        let mut clipboard = Clipboard::new();
        clipboard.start(0, 3, &mut alerts);
        assert!(clipboard.linear_copy(&screen, 4, 3, &mut alerts));
        assert_eq!(clipboard.content(), chars("delta").as_slice());
    }

    #[test]
    fn copy_before_start_is_refused() {
        let screen = screen();
        let mut alerts = NullAlerts;
        let mut clipboard = Clipboard::new();
        assert!(!clipboard.rectangular_copy(&screen, 3, 0, &mut alerts));
        assert!(clipboard.is_empty());
    }

    #[test]
    fn paste_injects_and_aborts_on_failure() {
        let mut target = BufferScreen::new(10, 2);
        let mut alerts = NullAlerts;
        let mut clipboard = Clipboard::new();
        let source = screen();
        clipboard.start(0, 0, &mut alerts);
        clipboard.rectangular_copy(&source, 4, 0, &mut alerts);

        assert!(clipboard.paste(&mut target));
        assert_eq!(target.typed_string(), "alpha");

        target.inserted.clear();
        target.fail_insert_after = Some(2);
        assert!(!clipboard.paste(&mut target));
        assert_eq!(target.typed_string(), "al");
    }

    #[test]
    fn empty_paste_reports_failure() {
        let mut target = BufferScreen::new(4, 1);
        let clipboard = Clipboard::new();
        assert!(!clipboard.paste(&mut target));
    }

    #[test]
    fn cues_mark_capture_milestones() {
        let screen = screen();
        let mut alerts = RecordingAlerts::new();
        let mut clipboard = Clipboard::new();
        clipboard.start(0, 0, &mut alerts);
        clipboard.rectangular_copy(&screen, 4, 0, &mut alerts);
        assert_eq!(alerts.take(), vec![Alert::CopyBegin, Alert::CopyEnd]);
    }
}
