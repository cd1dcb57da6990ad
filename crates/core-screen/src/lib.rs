//! core-screen: the screen back-end contract and its data model.
//!
//! A screen back-end owns the console being read: a cols×rows matrix of
//! characters with VGA-style attributes, a cursor, and a virtual-terminal
//! number. The daemon only ever talks to it through the [`Screen`] trait,
//! which keeps the actual back-ends (Linux VT, test buffers, a frozen
//! snapshot) swappable at the seam.
//!
//! Invariants:
//! * When `ScreenDescription::unreadable` is `None`, the cursor satisfies
//!   `posx < cols && posy < rows`.
//! * `read_characters` on an in-range box returns exactly
//!   `box.width * box.height` cells in row-major order.

use core_cmd::Command;

pub mod attrs;
pub mod buffer;
pub mod frozen;
pub mod speech;

pub use buffer::BufferScreen;
pub use frozen::FrozenScreen;
pub use speech::{NullSpeech, Speech};

/// One cell of the screen: a character plus its attribute byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenCharacter {
    pub text: char,
    pub attributes: u8,
}

impl ScreenCharacter {
    pub const BLANK: ScreenCharacter = ScreenCharacter {
        text: ' ',
        attributes: attrs::DEFAULT,
    };

    pub fn new(text: char, attributes: u8) -> Self {
        Self { text, attributes }
    }
}

impl Default for ScreenCharacter {
    fn default() -> Self {
        Self::BLANK
    }
}

/// What `describe()` reports each tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScreenDescription {
    pub cols: usize,
    pub rows: usize,
    pub posx: usize,
    pub posy: usize,
    /// Virtual-terminal number; negative means unknown.
    pub number: i32,
    /// Whether a cursor exists at all on this screen.
    pub has_cursor: bool,
    /// When present, the screen cannot be read and this human-readable
    /// string replaces its contents.
    pub unreadable: Option<String>,
}

impl ScreenDescription {
    /// True when the cursor is present and inside the matrix.
    pub fn cursor_ok(&self) -> bool {
        self.unreadable.is_none() && self.has_cursor && self.posx < self.cols && self.posy < self.rows
    }
}

/// A rectangular region of the screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenBox {
    pub left: usize,
    pub top: usize,
    pub width: usize,
    pub height: usize,
}

impl ScreenBox {
    pub fn new(left: usize, top: usize, width: usize, height: usize) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    pub fn row(left: usize, top: usize, width: usize) -> Self {
        Self::new(left, top, width, 1)
    }
}

/// A key to synthesise into the console.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScreenKey {
    Char(char),
    Enter,
    Tab,
    Backspace,
    Escape,
    CursorLeft,
    CursorRight,
    CursorUp,
    CursorDown,
    PageUp,
    PageDown,
    Home,
    End,
    Insert,
    Delete,
    Function(u8),
}

/// Modifiers applied to a synthesised key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeyModifiers {
    pub shift: bool,
    pub upper: bool,
    pub control: bool,
    pub meta: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyPress {
    pub key: ScreenKey,
    pub modifiers: KeyModifiers,
}

impl KeyPress {
    pub fn plain(key: ScreenKey) -> Self {
        Self {
            key,
            modifiers: KeyModifiers::default(),
        }
    }
}

/// Outcome of a pending cursor-routing request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingStatus {
    /// No routing request is outstanding.
    None,
    Done,
    WrongColumn,
    WrongRow,
    Failed,
}

/// The back-end contract consumed by the renderer, dispatcher and loop.
pub trait Screen {
    fn describe(&self) -> ScreenDescription;

    /// Read a rectangle of cells, row-major. Out-of-range cells come back
    /// blank so callers can over-read near the right margin.
    fn read_characters(&self, region: ScreenBox) -> Vec<ScreenCharacter>;

    fn read_text(&self, region: ScreenBox) -> Vec<char> {
        self.read_characters(region)
            .into_iter()
            .map(|c| c.text)
            .collect()
    }

    /// Ask the console to move its cursor. `column` may be `None` for a
    /// vertical-only route.
    fn route_cursor(&mut self, column: Option<usize>, row: usize, screen: i32) -> bool;

    /// True while a routing request is still in flight.
    fn is_routing(&self) -> bool {
        false
    }

    /// Poll (or await, when `wait`) the outcome of the last routing
    /// request.
    fn routing_status(&mut self, _wait: bool) -> RoutingStatus {
        RoutingStatus::None
    }

    fn insert_key(&mut self, key: KeyPress) -> bool;

    fn switch_virtual_terminal(&mut self, number: i32) -> bool;

    fn current_virtual_terminal(&self) -> i32;

    /// Offer the command to the back-end first; `true` means it consumed
    /// it and the dispatcher must not act on it.
    fn execute_command(&mut self, _command: Command) -> bool {
        false
    }

    fn highlight_region(&mut self, _left: usize, _right: usize, _top: usize, _bottom: usize) {}

    fn unhighlight_region(&mut self) {}

    /// Pointer position, when the back-end exposes one.
    fn pointer(&self) -> Option<(usize, usize)> {
        None
    }
}

/// Read one full row as characters.
pub fn read_row(screen: &dyn Screen, row: usize, cols: usize) -> Vec<ScreenCharacter> {
    screen.read_characters(ScreenBox::row(0, row, cols))
}
