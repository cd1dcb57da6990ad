//! core-braille: the display record, translation tables, key state, and
//! the device drivers behind one capability interface.
//!
//! A driver owns its transport and packet codec; everything above it sees
//! only [`Driver`]: write the window, write status cells, poll for one
//! command, optionally set pin firmness. Probing happens in
//! [`connect`], which hands back the driver and the [`BrailleDisplay`]
//! geometry it negotiated.
//!
//! Failure semantics: a quiet line is `Ok(None)` from `read_command`; a
//! framing problem is logged and resynchronised inside the driver; a dead
//! transport surfaces as `DriverError::Transport(Disconnected)`, which the
//! update loop answers by tearing the driver down and reconstructing it.

use core_cmd::{Command, CommandContext};
use core_transport::{Endpoint, TransportError};

pub mod dots;
pub mod keys;
pub mod terminal;
pub mod text;
pub mod vario;

pub use dots::{DotsTable, OutputTable};
pub use keys::Keys;
pub use text::{AttributesTable, TextTable};

/// Mutable state of the physical display, shared with renderer and loop.
#[derive(Debug, Clone)]
pub struct BrailleDisplay {
    pub text_columns: usize,
    pub text_rows: usize,
    pub status_columns: usize,
    pub status_rows: usize,
    /// Dot cells in the internal layout, `text_columns * text_rows` long.
    pub buffer: Vec<u8>,
    /// Flat cursor index into `buffer`, when shown.
    pub cursor: Option<usize>,
    /// Set by a driver when the device re-announced a different geometry.
    pub resize_required: bool,
    pub touch_enabled: bool,
    /// Milliseconds the loop should allow the line to drain before the
    /// next tick.
    pub write_delay: u64,
    /// Name of the key binding table the driver selected.
    pub key_bindings: String,
}

impl BrailleDisplay {
    pub fn new(text_columns: usize, text_rows: usize) -> Self {
        Self {
            text_columns,
            text_rows,
            status_columns: 0,
            status_rows: 0,
            buffer: vec![0; text_columns * text_rows],
            cursor: None,
            resize_required: false,
            touch_enabled: false,
            write_delay: 0,
            key_bindings: String::new(),
        }
    }

    pub fn cell_count(&self) -> usize {
        self.text_columns * self.text_rows
    }

    /// Reallocate the buffer after a geometry change.
    pub fn resize(&mut self, text_columns: usize, text_rows: usize) {
        self.text_columns = text_columns;
        self.text_rows = text_rows;
        self.buffer = vec![0; text_columns * text_rows];
        self.cursor = None;
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("device not recognised: {0}")]
    Unrecognized(String),
    #[error("no driver named {0}")]
    UnknownDriver(String),
    #[error("probe got no answer after {0} attempts")]
    ProbeFailed(usize),
}

impl DriverError {
    /// True when the endpoint is gone and the driver must be rebuilt.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DriverError::Transport(TransportError::Disconnected(_))
                | DriverError::Transport(TransportError::Unsupported(_))
        )
    }
}

pub type DriverResult<T> = Result<T, DriverError>;

/// The capability interface every device family implements.
pub trait Driver {
    /// Send the window cells (`brl.buffer`, internal dot layout) to the
    /// device, writing only what changed. `text` is the parallel character
    /// buffer for devices and consumers that want it.
    fn write_window(&mut self, brl: &mut BrailleDisplay, text: &[char]) -> DriverResult<()>;

    /// Send status cells, on devices that have a status region.
    fn write_status(&mut self, _brl: &mut BrailleDisplay, _cells: &[u8]) -> DriverResult<()> {
        Ok(())
    }

    /// Poll the device for one command. `Ok(None)` means nothing this
    /// tick.
    fn read_command(
        &mut self,
        brl: &mut BrailleDisplay,
        context: CommandContext,
    ) -> DriverResult<Option<Command>>;

    /// Pin firmness, 0..=[`Driver::max_firmness`]. Returns `false` when
    /// the device has no such control.
    fn set_firmness(&mut self, _brl: &mut BrailleDisplay, _level: u8) -> DriverResult<bool> {
        Ok(false)
    }

    fn max_firmness(&self) -> u8 {
        0
    }

    /// Release device resources. Dropping does the same; this exists so
    /// restart paths can be explicit about ordering.
    fn destruct(&mut self) {}
}

/// Compare the previously sent cells against the new ones; when anything
/// differs, copy the new cells in and return the changed span
/// `[from, to)`. This is what makes an unchanged window cost zero wire
/// bytes.
pub fn changed_span(old: &mut [u8], new: &[u8]) -> Option<(usize, usize)> {
    debug_assert_eq!(old.len(), new.len());
    let mut to = old.len();
    while to > 0 && old[to - 1] == new[to - 1] {
        to -= 1;
    }
    if to == 0 {
        return None;
    }
    let mut from = 0;
    while old[from] == new[from] {
        from += 1;
    }
    old[from..to].copy_from_slice(&new[from..to]);
    Some((from, to))
}

/// Construct a driver by family name over a parsed endpoint.
pub fn connect(
    name: &str,
    endpoint: &Endpoint,
) -> DriverResult<(Box<dyn Driver>, BrailleDisplay)> {
    match name {
        "vario" => {
            let (driver, display) = vario::VarioDriver::connect(endpoint)?;
            Ok((Box::new(driver), display))
        }
        "terminal" => {
            let (driver, display) = terminal::TerminalDriver::connect(endpoint)?;
            Ok((Box::new(driver), display))
        }
        other => Err(DriverError::UnknownDriver(other.into())),
    }
}

/// Names accepted by [`connect`].
pub const DRIVER_NAMES: &[&str] = &["vario", "terminal"];
