//! Key pass-through, character description, and speech requests.

use core_cmd::CharFlags;
use core_screen::{ScreenBox, ScreenKey, attrs};

use crate::{DispatchEnv, key_press, reading, screen_key_for};

/// Synthesise one key into the console, with modifier fan-out. Pass-
/// through only makes sense on the live screen.
pub(crate) fn insert_key(env: &mut DispatchEnv<'_>, key: ScreenKey, flags: CharFlags) {
    let accepted = env.frozen.is_none() && env.screen.insert_key(key_press(key, flags));
    if !accepted {
        env.rejected();
    }
}

pub(crate) fn pass_key(env: &mut DispatchEnv<'_>, arg: u8, flags: CharFlags) {
    insert_key(env, screen_key_for(arg), flags);
}

/// Describe the character at a screen position: code point, colours, and
/// the blink attribute. The text lands in `env.message` for the loop to
/// show.
pub(crate) fn describe_character(env: &mut DispatchEnv<'_>, column: usize, row: usize) {
    let character = {
        let screen = reading(env.frozen, env.screen);
        screen.read_characters(ScreenBox::new(column, row, 1, 1))[0]
    };

    let code = character.text as u32;
    let mut description = format!(
        "char {code} (0X{code:02X}): {} on {}",
        attrs::COLOUR_NAMES[attrs::foreground(character.attributes) as usize],
        attrs::COLOUR_NAMES[attrs::background(character.attributes) as usize],
    );
    if attrs::blinking(character.attributes) {
        description.push_str(" blink");
    }
    env.message = Some(description);
}

/// Speak whole screen rows through the synthesiser seam.
pub(crate) fn say_lines(env: &mut DispatchEnv<'_>, from_row: usize, count: usize) {
    let cols = env.scr.cols;
    let characters = {
        let screen = reading(env.frozen, env.screen);
        screen.read_characters(ScreenBox::new(0, from_row, cols, count))
    };
    env.speech.say(&characters);
}
