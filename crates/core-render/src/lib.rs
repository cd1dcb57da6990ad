//! core-render: turn one screen window into braille cells.
//!
//! Each tick the renderer reads the window region, translates it through
//! the text or attributes table, overlays the cursor and attribute
//! underline according to the blink phases, renders status cells, and
//! leaves the result in `BrailleDisplay::buffer` plus a parallel character
//! mirror for API consumers. Contracted braille runs through an external
//! [`contract::Contractor`]; the renderer owns the cursor-keeping window
//! advance that contraction makes necessary.

use core_braille::dots::{ALL_DOTS, DOT7, DOT8, UNDERLINE_DOTS};
use core_braille::{AttributesTable, BrailleDisplay, TextTable};
use core_config::{Preferences, StatusPosition, StatusSeparator};
use core_screen::{Screen, ScreenBox, ScreenCharacter, ScreenDescription};
use core_session::{ContractionTrack, Session, show_cursor};

pub mod contract;
pub mod status;
pub mod timing;

pub use contract::{CellContractor, Contraction, ContractionEngine, Contractor};
pub use status::{StatusFlags, fill_status_separator, info_line, render_status_fields};
pub use timing::{BlinkState, Blinker};

/// Unicode braille pattern for a dot byte (the internal layout matches
/// the standard's bit assignment for dots 1..8).
pub fn unicode_braille(dots: u8) -> char {
    char::from_u32(0x2800 + dots as u32).unwrap_or(' ')
}

/// How the physical window is split between text and status cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowLayout {
    pub text_start: usize,
    pub text_count: usize,
    pub status_start: usize,
    pub status_count: usize,
    pub separator_column: Option<usize>,
    pub status_on_right: bool,
}

impl WindowLayout {
    /// Full-width text window (status handled by the device, or absent).
    pub fn full(columns: usize) -> Self {
        Self {
            text_start: 0,
            text_count: columns,
            status_start: 0,
            status_count: 0,
            separator_column: None,
            status_on_right: false,
        }
    }

    /// Carve status cells out of the window per the preferences; devices
    /// with their own status region keep the whole window for text.
    pub fn compute(columns: usize, device_status_cells: usize, prefs: &Preferences) -> Self {
        if device_status_cells > 0
            || prefs.status_cells == 0
            || prefs.status_position == StatusPosition::None
        {
            return Self::full(columns);
        }

        let separator = usize::from(prefs.status_separator != StatusSeparator::None);
        // Keep at least half the window for text.
        let count = (prefs.status_cells as usize).min(columns.saturating_sub(separator) / 2);
        if count == 0 {
            return Self::full(columns);
        }
        let text_count = columns - count - separator;

        match prefs.status_position {
            StatusPosition::Left => Self {
                text_start: count + separator,
                text_count,
                status_start: 0,
                status_count: count,
                separator_column: (separator > 0).then_some(count),
                status_on_right: false,
            },
            StatusPosition::Right => Self {
                text_start: 0,
                text_count,
                status_start: columns - count,
                status_count: count,
                separator_column: (separator > 0).then_some(columns - count - 1),
                status_on_right: true,
            },
            StatusPosition::None => unreachable!("handled above"),
        }
    }
}

/// Lay dot cells into a window region, row-major, padding with blanks.
/// The text mirror shows the braille patterns themselves.
pub fn fill_dots_region(
    text: &mut [char],
    dots: &mut [u8],
    start: usize,
    count: usize,
    columns: usize,
    rows: usize,
    cells: &[u8],
) {
    let mut source = 0;
    for row in 0..rows {
        for col in 0..count {
            let index = row * columns + start + col;
            let value = cells.get(source).copied().unwrap_or(0);
            dots[index] = value;
            text[index] = unicode_braille(value);
            source += 1;
        }
    }
}

/// Lay characters into a window region, translating them to dots.
pub fn fill_text_region(
    table: &TextTable,
    text: &mut [char],
    dots: &mut [u8],
    start: usize,
    count: usize,
    columns: usize,
    rows: usize,
    characters: &[char],
) {
    let mut source = 0;
    for row in 0..rows {
        for col in 0..count {
            let index = row * columns + start + col;
            let ch = characters.get(source).copied().unwrap_or(' ');
            text[index] = ch;
            dots[index] = table.dots(ch);
            source += 1;
        }
    }
}

/// The underline pattern for an attribute byte, keyed by colour class.
/// Ordinary text gets nothing; highlighted text a dot-8 underline; the
/// inverse-video class the full two-dot underline.
pub fn attributes_underline(attributes: u8) -> u8 {
    match attributes {
        // Plain renditions: dark/light grey on black, light grey on
        // blue, black on cyan.
        0x08 | 0x07 | 0x17 | 0x30 => 0,
        // Black on light grey (inverse video).
        0x70 => DOT7 | DOT8,
        // White on black and every other highlight.
        _ => DOT8,
    }
}

/// The cursor shape this phase, before blink gating.
pub fn cursor_dots(prefs: &Preferences) -> u8 {
    if prefs.block_cursor {
        ALL_DOTS
    } else {
        DOT7 | DOT8
    }
}

/// Everything a render pass reads.
pub struct RenderContext<'a> {
    pub scr: &'a ScreenDescription,
    pub screen: &'a dyn Screen,
    pub prefs: &'a Preferences,
    pub blink: &'a BlinkState,
    pub layout: WindowLayout,
    pub flags: StatusFlags,
}

pub struct Renderer {
    pub text_table: TextTable,
    pub attributes_table: AttributesTable,
    pub contraction: ContractionEngine,
}

impl Default for Renderer {
    fn default() -> Self {
        Self {
            text_table: TextTable::default(),
            attributes_table: AttributesTable::default(),
            contraction: ContractionEngine::default(),
        }
    }
}

impl Renderer {
    /// Render one window into `brl`, returning the character mirror.
    /// Contracted rendering may move `ses.winx` to keep the cursor on the
    /// display.
    pub fn render_window(
        &mut self,
        ctx: &RenderContext<'_>,
        ses: &mut Session,
        track: &mut ContractionTrack,
        brl: &mut BrailleDisplay,
    ) -> Vec<char> {
        let window_len = brl.text_columns * brl.text_rows;
        let mut text = vec![' '; window_len];
        brl.buffer.iter_mut().for_each(|c| *c = 0);
        brl.cursor = None;

        let mut contracted = false;
        if ctx.prefs.contracted_braille {
            contracted = self.render_contracted(ctx, ses, track, brl, &mut text);
        }
        track.active = contracted;

        if !contracted {
            self.contraction.invalidate();
            self.render_plain(ctx, ses, brl, &mut text);
        }

        if let Some(index) = brl.cursor {
            if show_cursor(ses, ctx.prefs, ctx.scr) && ctx.blink.cursor_on(ctx.prefs) {
                brl.buffer[index] |= cursor_dots(ctx.prefs);
            } else {
                brl.cursor = None;
            }
        }

        if ctx.layout.status_count > 0 {
            let cells = render_status_fields(
                &self.text_table,
                ses,
                ctx.scr,
                ctx.prefs,
                ctx.flags,
            );
            fill_dots_region(
                &mut text,
                &mut brl.buffer,
                ctx.layout.status_start,
                ctx.layout.status_count,
                brl.text_columns,
                brl.text_rows,
                &cells,
            );
            if let Some(column) = ctx.layout.separator_column {
                fill_status_separator(
                    &mut text,
                    &mut brl.buffer,
                    column,
                    brl.text_columns,
                    brl.text_rows,
                    ctx.prefs.status_separator,
                    ctx.layout.status_on_right,
                );
            }
        }

        text
    }

    fn render_plain(
        &self,
        ctx: &RenderContext<'_>,
        ses: &Session,
        brl: &mut BrailleDisplay,
        text: &mut [char],
    ) {
        let layout = ctx.layout;

        // The cursor, when it falls inside the window.
        if ctx.scr.cursor_ok()
            && ctx.scr.posx >= ses.winx
            && ctx.scr.posx < ses.winx + layout.text_count
            && ctx.scr.posy >= ses.winy
            && ctx.scr.posy < ses.winy + brl.text_rows
        {
            brl.cursor = Some(
                (ctx.scr.posy - ses.winy) * brl.text_columns
                    + layout.text_start
                    + ctx.scr.posx
                    - ses.winx,
            );
        }

        let blank_capitals = !ctx.blink.capitals_on(ctx.prefs);
        let underline = ctx.blink.attributes_on(ctx.prefs);

        for row in 0..brl.text_rows {
            let mut characters = ctx.screen.read_characters(ScreenBox::row(
                ses.winx,
                ses.winy + row,
                layout.text_count,
            ));

            if blank_capitals {
                for character in characters.iter_mut() {
                    if character.text.is_uppercase() {
                        character.text = ' ';
                    }
                }
            }

            let start = row * brl.text_columns + layout.text_start;
            for (column, character) in characters.iter().enumerate() {
                let index = start + column;
                if ses.display_mode {
                    let dots = self.attributes_table.dots(character.attributes);
                    brl.buffer[index] = dots;
                    text[index] = unicode_braille(dots);
                } else {
                    let mut dots = self.text_table.dots(character.text);
                    if ctx.prefs.six_dot_text {
                        dots &= !UNDERLINE_DOTS;
                    }
                    if underline {
                        dots |= attributes_underline(character.attributes);
                    }
                    brl.buffer[index] = dots;
                    text[index] = character.text;
                }
            }
        }
    }

    /// The contracted path. Returns false when contraction is not
    /// possible (window past the right margin), falling back to plain
    /// rendering.
    fn render_contracted(
        &mut self,
        ctx: &RenderContext<'_>,
        ses: &mut Session,
        track: &mut ContractionTrack,
        brl: &mut BrailleDisplay,
        text: &mut [char],
    ) -> bool {
        let layout = ctx.layout;
        let text_len = layout.text_count * brl.text_rows;

        // The advance loop terminates because winx only moves right,
        // bounded by the cursor column; the guard is belt and braces.
        for _ in 0..=ctx.scr.cols {
            let width = ctx.scr.cols.saturating_sub(ses.winx);
            if width == 0 || text_len == 0 {
                return false;
            }

            let cursor_offset = (ctx.scr.cursor_ok()
                && ctx.scr.posy == ses.winy
                && ctx.scr.posx >= ses.winx)
                .then(|| ctx.scr.posx - ses.winx);

            let characters = ctx
                .screen
                .read_characters(ScreenBox::row(ses.winx, ses.winy, width));
            let input: Vec<char> = characters.iter().map(|c| c.text).collect();

            let contraction = self
                .contraction
                .contractor()
                .contract(&input, text_len, cursor_offset);
            let input_length = contraction.input_consumed;
            let output_length = contraction.cells.len();
            if input_length == 0 {
                return false;
            }

            let mut input_end = input_length;
            if track.track_pending {
                if output_length == text_len {
                    // Characters that begin exactly at the output border
                    // are not actually visible.
                    let mut index = input_end;
                    while index > 0 {
                        index -= 1;
                        if let Some(offset) = contraction.offsets.get(index).copied().flatten() {
                            if offset != output_length {
                                break;
                            }
                            input_end = index;
                        }
                    }
                }

                if ctx.scr.cursor_ok() && ctx.scr.posx >= ses.winx + input_end {
                    // Walk the window right by one word and try again.
                    let mut offset = 0;
                    let mut onspace = false;
                    while offset < input.len() {
                        if input[offset].is_whitespace() != onspace {
                            if onspace {
                                break;
                            }
                            onspace = true;
                        }
                        offset += 1;
                    }
                    let target = ses.winx + offset;
                    if target > ctx.scr.posx {
                        ses.winx = (ses.winx + ctx.scr.posx) / 2;
                    } else {
                        ses.winx = target;
                    }
                    tracing::trace!(target: "render.contract", winx = ses.winx, "window advanced");
                    continue;
                }
            }

            // Map the cursor onto the nearest preceding output cell.
            if let Some(cursor) = cursor_offset {
                if cursor < input_end {
                    let mut index = cursor as i64;
                    while index >= 0 {
                        if let Some(offset) =
                            contraction.offsets.get(index as usize).copied().flatten()
                        {
                            brl.cursor = Some(
                                (offset / layout.text_count) * brl.text_columns
                                    + layout.text_start
                                    + offset % layout.text_count,
                            );
                            break;
                        }
                        index -= 1;
                    }
                }
            }

            let mut cells = contraction.cells.clone();
            if ses.display_mode || ctx.blink.attributes_on(ctx.prefs) {
                // Spread input attributes across the output cells they
                // contracted into.
                let mut attributes_buffer = vec![0u8; output_length];
                let mut attributes = 0u8;
                let mut output_offset = 0usize;
                for (input_offset, character) in
                    characters.iter().take(input_length).enumerate()
                {
                    if let Some(offset) =
                        contraction.offsets.get(input_offset).copied().flatten()
                    {
                        while output_offset < offset.min(output_length) {
                            attributes_buffer[output_offset] = attributes;
                            output_offset += 1;
                        }
                        attributes = 0;
                    }
                    attributes |= character.attributes;
                }
                while output_offset < output_length {
                    attributes_buffer[output_offset] = attributes;
                    output_offset += 1;
                }

                if ses.display_mode {
                    for (cell, &attr) in cells.iter_mut().zip(&attributes_buffer) {
                        *cell = self.attributes_table.dots(attr);
                    }
                } else {
                    for (cell, &attr) in cells.iter_mut().zip(&attributes_buffer) {
                        *cell |= attributes_underline(attr);
                    }
                }
            }

            track.track_pending = false;
            self.contraction
                .record(ses.winx, input_length, contraction.offsets);
            fill_dots_region(
                text,
                &mut brl.buffer,
                layout.text_start,
                layout.text_count,
                brl.text_columns,
                brl.text_rows,
                &cells,
            );
            return true;
        }
        false
    }
}

/// Pad or trim a screen row snapshot to an exact width. Reads already
/// pad, but explicit callers (autospeak) want the guarantee.
pub fn padded_row(screen: &dyn Screen, row: usize, width: usize) -> Vec<ScreenCharacter> {
    let mut characters = screen.read_characters(ScreenBox::row(0, row, width));
    characters.resize(width, ScreenCharacter::BLANK);
    characters
}
