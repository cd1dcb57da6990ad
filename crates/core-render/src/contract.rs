//! Contracted braille: the external contractor seam and the window state
//! the rest of the system needs while contraction is active.
//!
//! A contractor turns a run of screen text into a (usually shorter) run
//! of cells plus an offset map `input index → output cell`, `None` where
//! an input character vanished into a contraction. The engine remembers
//! the last mapping so routing keys and window shifts can convert between
//! cell offsets and screen columns.

use core_braille::TextTable;
use core_screen::{Screen, ScreenBox};

/// Result of contracting one run of text.
#[derive(Debug, Clone)]
pub struct Contraction {
    /// Output cells, internal dot layout, at most the requested length.
    pub cells: Vec<u8>,
    /// For each consumed input character, the output cell it begins at.
    pub offsets: Vec<Option<usize>>,
    /// How many input characters were consumed.
    pub input_consumed: usize,
}

pub trait Contractor {
    /// Contract `input` into at most `max_cells` cells. `cursor` is the
    /// input offset of the screen cursor, which contractors may use to
    /// avoid contracting across it.
    fn contract(&self, input: &[char], max_cells: usize, cursor: Option<usize>) -> Contraction;
}

/// The built-in fallback: uncontracted computer braille, one cell per
/// character. Real contraction tables are compiled externally and plug in
/// through the same trait.
pub struct CellContractor {
    table: TextTable,
}

impl Default for CellContractor {
    fn default() -> Self {
        Self {
            table: TextTable::default(),
        }
    }
}

impl Contractor for CellContractor {
    fn contract(&self, input: &[char], max_cells: usize, _cursor: Option<usize>) -> Contraction {
        let mut consumed = input.len().min(max_cells);
        if input.len() > max_cells {
            // Don't split a word across the right edge: back off to the
            // end of the last complete one, when there is one.
            if let Some(position) = input[..max_cells].iter().rposition(|c| c.is_whitespace()) {
                if position > 0 {
                    consumed = position + 1;
                }
            }
        }
        let cells = input[..consumed]
            .iter()
            .map(|&c| self.table.dots(c))
            .collect();
        let offsets = (0..consumed).map(Some).collect();
        Contraction {
            cells,
            offsets,
            input_consumed: consumed,
        }
    }
}

/// Mapping state left behind by the last contracted render.
#[derive(Debug, Clone, Default)]
struct ContractedState {
    start: usize,
    length: usize,
    offsets: Vec<Option<usize>>,
}

pub struct ContractionEngine {
    contractor: Box<dyn Contractor>,
    state: Option<ContractedState>,
}

impl Default for ContractionEngine {
    fn default() -> Self {
        Self::new(Box::new(CellContractor::default()))
    }
}

impl ContractionEngine {
    pub fn new(contractor: Box<dyn Contractor>) -> Self {
        Self {
            contractor,
            state: None,
        }
    }

    pub fn contractor(&self) -> &dyn Contractor {
        self.contractor.as_ref()
    }

    /// True when the window currently on the display is contracted.
    pub fn is_active(&self) -> bool {
        self.state.is_some()
    }

    /// Window motion invalidates the mapping.
    pub fn invalidate(&mut self) {
        self.state = None;
    }

    pub(crate) fn record(&mut self, start: usize, length: usize, offsets: Vec<Option<usize>>) {
        self.state = Some(ContractedState {
            start,
            length,
            offsets,
        });
    }

    /// Convert a window cell offset into an input character index of the
    /// contracted span. With `end`, an offset inside a contraction maps
    /// to the last character that starts at or before it.
    pub fn cell_to_input(&self, value: usize, end: bool) -> usize {
        let Some(state) = &self.state else {
            return value;
        };
        let mut result = 0;
        let mut index = 0;
        while index < state.length {
            if let Some(offset) = state.offsets.get(index).copied().flatten() {
                if offset > value {
                    if end {
                        result = index.saturating_sub(1);
                    }
                    break;
                }
                result = index;
            }
            index += 1;
        }
        if end && index == state.length {
            result = state.length.saturating_sub(1);
        }
        result
    }

    /// Screen characters consumed by one window starting at `(x, y)`.
    pub fn length_at(
        &self,
        screen: &dyn Screen,
        cols: usize,
        window_cells: usize,
        x: usize,
        y: usize,
        cursor: Option<usize>,
    ) -> usize {
        let width = cols.saturating_sub(x);
        if width == 0 {
            return 1;
        }
        let input: Vec<char> = screen
            .read_characters(ScreenBox::row(x, y, width))
            .iter()
            .map(|c| c.text)
            .collect();
        self.contractor
            .contract(&input, window_cells, cursor)
            .input_consumed
            .max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_braille::dots::cell;
    use core_screen::BufferScreen;

    #[test]
    fn cell_contractor_is_one_to_one() {
        let contractor = CellContractor::default();
        let input: Vec<char> = "abcdef".chars().collect();
        let out = contractor.contract(&input, 4, None);
        assert_eq!(out.input_consumed, 4);
        assert_eq!(out.cells.len(), 4);
        assert_eq!(out.cells[0], cell(&[1]));
        assert_eq!(out.offsets, vec![Some(0), Some(1), Some(2), Some(3)]);
    }

    #[test]
    fn offset_mapping_resolves_cells() {
        let mut engine = ContractionEngine::default();
        // Pretend "the" contracted into one cell and "cat" into two.
        engine.record(0, 7, vec![Some(0), None, None, Some(1), Some(2), None, Some(3)]);
        assert_eq!(engine.cell_to_input(0, false), 0);
        // Cell 1 begins at input 3.
        assert_eq!(engine.cell_to_input(1, false), 3);
        // End-of-region semantics land on the previous start.
        assert_eq!(engine.cell_to_input(1, true), 3);
        assert_eq!(engine.cell_to_input(99, true), 6);
        engine.invalidate();
        assert_eq!(engine.cell_to_input(5, false), 5);
    }

    #[test]
    fn length_at_reports_consumption() {
        let screen = BufferScreen::from_lines(30, 1, &["the quick brown fox jumps"]);
        let engine = ContractionEngine::default();
        assert_eq!(engine.length_at(&screen, 30, 10, 0, 0, None), 10);
        assert_eq!(engine.length_at(&screen, 30, 10, 25, 0, None), 5);
    }
}
