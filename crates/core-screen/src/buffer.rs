//! In-memory screen back-end.
//!
//! Drives every integration test and scenario in the workspace: content is
//! set as lines of text, the cursor and VT number are plain fields, and all
//! side effects (synthesised keys, routing requests, VT switches,
//! highlights) are recorded so tests can assert on them.

use crate::{
    KeyPress, RoutingStatus, Screen, ScreenBox, ScreenCharacter, ScreenDescription, ScreenKey,
    attrs,
};

#[derive(Debug, Clone)]
pub struct BufferScreen {
    cols: usize,
    rows: usize,
    cells: Vec<ScreenCharacter>,
    pub cursor: (usize, usize),
    pub number: i32,
    pub has_cursor: bool,
    pub unreadable: Option<String>,
    /// Every key injected via `insert_key`, in order.
    pub inserted: Vec<KeyPress>,
    /// When set, `insert_key` fails after this many accepted keys.
    pub fail_insert_after: Option<usize>,
    /// Routing requests observed, most recent last.
    pub routed: Vec<(Option<usize>, usize, i32)>,
    pub routing_result: RoutingStatus,
    /// Whether route_cursor calls report success.
    pub accept_routing: bool,
    pub switched: Vec<i32>,
    pub highlight: Option<(usize, usize, usize, usize)>,
    pub pointer: Option<(usize, usize)>,
}

impl BufferScreen {
    pub fn new(cols: usize, rows: usize) -> Self {
        Self {
            cols,
            rows,
            cells: vec![ScreenCharacter::BLANK; cols * rows],
            cursor: (0, 0),
            number: 1,
            has_cursor: true,
            unreadable: None,
            inserted: Vec::new(),
            fail_insert_after: None,
            routed: Vec::new(),
            routing_result: RoutingStatus::None,
            accept_routing: true,
            switched: Vec::new(),
            highlight: None,
            pointer: None,
        }
    }

    /// Fill the matrix from text lines; short lines pad with blanks and
    /// extra lines are dropped.
    pub fn from_lines(cols: usize, rows: usize, lines: &[&str]) -> Self {
        let mut screen = Self::new(cols, rows);
        for (row, line) in lines.iter().take(rows).enumerate() {
            screen.set_row_text(row, line);
        }
        screen
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn set_row_text(&mut self, row: usize, text: &str) {
        assert!(row < self.rows, "row {row} out of range");
        let base = row * self.cols;
        for col in 0..self.cols {
            self.cells[base + col] = ScreenCharacter::BLANK;
        }
        for (col, ch) in text.chars().take(self.cols).enumerate() {
            self.cells[base + col] = ScreenCharacter::new(ch, attrs::DEFAULT);
        }
    }

    pub fn set_cell(&mut self, col: usize, row: usize, cell: ScreenCharacter) {
        assert!(col < self.cols && row < self.rows);
        self.cells[row * self.cols + col] = cell;
    }

    pub fn set_row_attributes(&mut self, row: usize, attributes: u8) {
        let base = row * self.cols;
        for col in 0..self.cols {
            self.cells[base + col].attributes = attributes;
        }
    }

    pub fn cell(&self, col: usize, row: usize) -> ScreenCharacter {
        if col < self.cols && row < self.rows {
            self.cells[row * self.cols + col]
        } else {
            ScreenCharacter::BLANK
        }
    }

    /// The characters typed so far, for paste assertions.
    pub fn typed_string(&self) -> String {
        self.inserted
            .iter()
            .filter_map(|k| match k.key {
                ScreenKey::Char(c) => Some(c),
                ScreenKey::Enter => Some('\n'),
                _ => None,
            })
            .collect()
    }
}

impl Screen for BufferScreen {
    fn describe(&self) -> ScreenDescription {
        ScreenDescription {
            cols: self.cols,
            rows: self.rows,
            posx: self.cursor.0,
            posy: self.cursor.1,
            number: self.number,
            has_cursor: self.has_cursor,
            unreadable: self.unreadable.clone(),
        }
    }

    fn read_characters(&self, region: ScreenBox) -> Vec<ScreenCharacter> {
        let mut out = Vec::with_capacity(region.width * region.height);
        for row in region.top..region.top + region.height {
            for col in region.left..region.left + region.width {
                out.push(self.cell(col, row));
            }
        }
        out
    }

    fn route_cursor(&mut self, column: Option<usize>, row: usize, screen: i32) -> bool {
        self.routed.push((column, row, screen));
        if self.accept_routing {
            if let Some(col) = column {
                self.cursor = (col.min(self.cols.saturating_sub(1)), row);
            } else {
                self.cursor.1 = row;
            }
            self.routing_result = RoutingStatus::Done;
            true
        } else {
            self.routing_result = RoutingStatus::Failed;
            false
        }
    }

    fn routing_status(&mut self, _wait: bool) -> RoutingStatus {
        std::mem::replace(&mut self.routing_result, RoutingStatus::None)
    }

    fn insert_key(&mut self, key: KeyPress) -> bool {
        if let Some(limit) = self.fail_insert_after {
            if self.inserted.len() >= limit {
                return false;
            }
        }
        self.inserted.push(key);
        true
    }

    fn switch_virtual_terminal(&mut self, number: i32) -> bool {
        if number < 1 {
            return false;
        }
        self.switched.push(number);
        self.number = number;
        true
    }

    fn current_virtual_terminal(&self) -> i32 {
        self.number
    }

    fn highlight_region(&mut self, left: usize, right: usize, top: usize, bottom: usize) {
        self.highlight = Some((left, right, top, bottom));
    }

    fn unhighlight_region(&mut self) {
        self.highlight = None;
    }

    fn pointer(&self) -> Option<(usize, usize)> {
        self.pointer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_are_row_major_and_pad() {
        let screen = BufferScreen::from_lines(10, 3, &["hello", "world"]);
        let cells = screen.read_characters(ScreenBox::new(3, 0, 4, 2));
        let text: String = cells.iter().map(|c| c.text).collect();
        assert_eq!(text, "lo  ld  ");
        // Over-reading the right edge yields blanks.
        let over = screen.read_characters(ScreenBox::row(8, 0, 4));
        assert!(over.iter().all(|c| c.text == ' '));
        assert_eq!(over.len(), 4);
    }

    #[test]
    fn insert_failure_kicks_in_at_limit() {
        let mut screen = BufferScreen::new(4, 2);
        screen.fail_insert_after = Some(1);
        assert!(screen.insert_key(KeyPress::plain(ScreenKey::Char('a'))));
        assert!(!screen.insert_key(KeyPress::plain(ScreenKey::Char('b'))));
        assert_eq!(screen.typed_string(), "a");
    }

    #[test]
    fn routing_moves_cursor_and_reports() {
        let mut screen = BufferScreen::new(10, 5);
        assert!(screen.route_cursor(Some(7), 2, 1));
        assert_eq!(screen.cursor, (7, 2));
        assert_eq!(screen.routing_status(false), RoutingStatus::Done);
        assert_eq!(screen.routing_status(false), RoutingStatus::None);
    }
}
