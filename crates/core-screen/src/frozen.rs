//! Frozen-screen snapshot.
//!
//! Freezing captures the entire cell matrix and cursor of the live screen;
//! review commands then run against the copy while the console keeps
//! moving underneath. Writes (key injection, routing, VT switches) are
//! rejected — the snapshot is inert by construction.

use crate::{KeyPress, Screen, ScreenBox, ScreenCharacter, ScreenDescription};

#[derive(Debug, Clone)]
pub struct FrozenScreen {
    description: ScreenDescription,
    cells: Vec<ScreenCharacter>,
}

impl FrozenScreen {
    /// Snapshot the live screen. Fails when it is unreadable.
    pub fn capture(live: &dyn Screen) -> Option<Self> {
        let description = live.describe();
        if description.unreadable.is_some() {
            return None;
        }
        let cells = live.read_characters(ScreenBox::new(
            0,
            0,
            description.cols,
            description.rows,
        ));
        tracing::debug!(
            target: "screen.frozen",
            cols = description.cols,
            rows = description.rows,
            "captured"
        );
        Some(Self { description, cells })
    }
}

impl Screen for FrozenScreen {
    fn describe(&self) -> ScreenDescription {
        self.description.clone()
    }

    fn read_characters(&self, region: ScreenBox) -> Vec<ScreenCharacter> {
        let mut out = Vec::with_capacity(region.width * region.height);
        for row in region.top..region.top + region.height {
            for col in region.left..region.left + region.width {
                if col < self.description.cols && row < self.description.rows {
                    out.push(self.cells[row * self.description.cols + col]);
                } else {
                    out.push(ScreenCharacter::BLANK);
                }
            }
        }
        out
    }

    fn route_cursor(&mut self, _column: Option<usize>, _row: usize, _screen: i32) -> bool {
        false
    }

    fn insert_key(&mut self, _key: KeyPress) -> bool {
        false
    }

    fn switch_virtual_terminal(&mut self, _number: i32) -> bool {
        false
    }

    fn current_virtual_terminal(&self) -> i32 {
        self.description.number
    }
}
