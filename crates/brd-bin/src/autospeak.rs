//! Autospeak: announce what changed on the window's row.
//!
//! Rather than re-reading the whole line aloud on every change, the diff
//! recognises the common editing shapes — characters typed before the
//! cursor, characters deleted behind it, an insertion or deletion at the
//! cursor detected by matching the suffixes — and speaks only the span
//! involved. Anything unrecognised falls back to the changed span between
//! the first and last differing cells.

use core_screen::{Screen, ScreenCharacter, ScreenDescription, Speech};
use core_render::padded_row;
use core_session::Session;

fn same_text(a: &[ScreenCharacter], b: &[ScreenCharacter]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.text == y.text)
}

#[derive(Debug, Default)]
pub struct Autospeak {
    old_screen: Option<i32>,
    old_x: usize,
    old_y: usize,
    old_winy: usize,
    old_characters: Vec<ScreenCharacter>,
}

impl Autospeak {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compare this tick's window row against the last and speak the
    /// interesting span. `winy` is the current window row.
    pub fn check(
        &mut self,
        scr: &ScreenDescription,
        screen: &dyn Screen,
        ses: &Session,
        speech: &mut dyn Speech,
    ) {
        let new_screen = scr.number;
        let new_x = scr.posx;
        let new_y = scr.posy;
        let new_width = scr.cols;
        let new_characters = padded_row(screen, ses.winy, new_width);

        let mut column = 0usize;
        let mut count = new_width;
        let mut speak_old = false;

        'diff: {
            if self.old_characters.is_empty() {
                break 'diff;
            }
            if self.old_screen != Some(new_screen)
                || ses.winy != self.old_winy
                || new_width != self.old_characters.len()
            {
                break 'diff;
            }
            let old_characters = &self.old_characters;
            let old_x = self.old_x;
            let on_screen = new_x < new_width;

            if !same_text(&new_characters, old_characters) {
                if new_y == ses.winy && new_y == self.old_y && on_screen {
                    if new_x == old_x
                        && same_text(&new_characters[..new_x], &old_characters[..new_x])
                    {
                        // Suffix matching: detect an insertion or a
                        // deletion at the cursor.
                        let mut old_length = self.old_characters.len();
                        while old_length > old_x
                            && old_characters[old_length - 1].text == ' '
                        {
                            old_length -= 1;
                        }
                        let mut new_length = new_width;
                        while new_length > new_x && new_characters[new_length - 1].text == ' '
                        {
                            new_length -= 1;
                        }

                        let mut x = new_x + 1;
                        loop {
                            let mut done = true;
                            if x < new_length {
                                if same_text(
                                    &new_characters[x..],
                                    &old_characters[old_x..old_x + (new_width - x)],
                                ) {
                                    // Insertion: speak what appeared.
                                    column = new_x;
                                    count = x - new_x;
                                    break 'diff;
                                }
                                done = false;
                            }
                            if x < old_length {
                                if same_text(
                                    &new_characters[new_x..new_x + (new_width - x)],
                                    &old_characters[x..],
                                ) {
                                    // Deletion: speak what vanished.
                                    column = old_x;
                                    count = x - old_x;
                                    speak_old = true;
                                    break 'diff;
                                }
                                done = false;
                            }
                            if done {
                                break;
                            }
                            x += 1;
                        }
                    }

                    if new_x > old_x
                        && same_text(&new_characters[..old_x], &old_characters[..old_x])
                        && same_text(&new_characters[new_x..], &old_characters[old_x..old_x + (new_width - new_x)])
                    {
                        // Characters typed between the old and new cursor.
                        column = old_x;
                        count = new_x - old_x;
                        break 'diff;
                    }

                    let old_x_capped = old_x.min(new_width.saturating_sub(1));
                    if new_x < old_x_capped
                        && same_text(&new_characters[..new_x], &old_characters[..new_x])
                        && same_text(
                            &new_characters[new_x..new_x + (new_width - old_x_capped)],
                            &old_characters[old_x_capped..],
                        )
                    {
                        // Characters deleted back to the new cursor.
                        column = new_x;
                        count = old_x_capped - new_x;
                        speak_old = true;
                        break 'diff;
                    }

                    // Fallback: the changed span.
                    while new_characters[column].text == old_characters[column].text {
                        column += 1;
                    }
                    while count > column
                        && new_characters[count - 1].text == old_characters[count - 1].text
                    {
                        count -= 1;
                    }
                    count -= column;
                }
                // A changed row with the cursor elsewhere speaks whole:
                // count keeps its full-width initial value.
            } else if new_y == ses.winy && (new_x != old_x || new_y != self.old_y) && on_screen {
                // Unchanged row, cursor moved along it: speak the
                // character it landed on.
                column = new_x;
                count = 1;
            } else {
                count = 0;
            }
        }

        if count > 0 {
            let source = if speak_old {
                &self.old_characters
            } else {
                &new_characters
            };
            let end = (column + count).min(source.len());
            if column < end {
                speech.say(&source[column..end]);
            }
        }

        self.old_screen = Some(new_screen);
        self.old_x = new_x;
        self.old_y = new_y;
        self.old_winy = ses.winy;
        self.old_characters = new_characters;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_screen::BufferScreen;
    use core_screen::speech::RecordingSpeech;

    fn run_tick(
        autospeak: &mut Autospeak,
        screen: &BufferScreen,
        ses: &Session,
        speech: &mut RecordingSpeech,
    ) {
        let scr = screen.describe();
        autospeak.check(&scr, screen, ses, speech);
    }

    #[test]
    fn first_sight_speaks_the_row() {
        let mut autospeak = Autospeak::new();
        let mut speech = RecordingSpeech::new();
        let ses = Session::new();
        let screen = BufferScreen::from_lines(10, 2, &["hello"]);
        run_tick(&mut autospeak, &screen, &ses, &mut speech);
        assert_eq!(speech.take(), vec!["hello     ".to_string()]);
    }

    #[test]
    fn typed_characters_speak_the_insertion() {
        let mut autospeak = Autospeak::new();
        let mut speech = RecordingSpeech::new();
        let ses = Session::new();

        let mut screen = BufferScreen::from_lines(10, 1, &["cat"]);
        screen.cursor = (3, 0);
        run_tick(&mut autospeak, &screen, &ses, &mut speech);
        speech.take();

        // Type "s!": cursor advances past the new characters.
        screen.set_row_text(0, "cats!");
        screen.cursor = (5, 0);
        run_tick(&mut autospeak, &screen, &ses, &mut speech);
        assert_eq!(speech.take(), vec!["s!".to_string()]);
    }

    #[test]
    fn backspace_speaks_the_deleted_characters() {
        let mut autospeak = Autospeak::new();
        let mut speech = RecordingSpeech::new();
        let ses = Session::new();

        let mut screen = BufferScreen::from_lines(10, 1, &["cats"]);
        screen.cursor = (4, 0);
        run_tick(&mut autospeak, &screen, &ses, &mut speech);
        speech.take();

        screen.set_row_text(0, "cat");
        screen.cursor = (3, 0);
        run_tick(&mut autospeak, &screen, &ses, &mut speech);
        assert_eq!(speech.take(), vec!["s".to_string()]);
    }

    #[test]
    fn insertion_at_cursor_is_detected_by_suffix_match() {
        let mut autospeak = Autospeak::new();
        let mut speech = RecordingSpeech::new();
        let ses = Session::new();

        let mut screen = BufferScreen::from_lines(12, 1, &["abdef"]);
        screen.cursor = (2, 0);
        run_tick(&mut autospeak, &screen, &ses, &mut speech);
        speech.take();

        // Insert "c" at the cursor: the tail shifts right.
        screen.set_row_text(0, "abcdef");
        run_tick(&mut autospeak, &screen, &ses, &mut speech);
        assert_eq!(speech.take(), vec!["c".to_string()]);
    }

    #[test]
    fn window_row_change_speaks_the_new_row() {
        let mut autospeak = Autospeak::new();
        let mut speech = RecordingSpeech::new();
        let mut ses = Session::new();

        let mut screen = BufferScreen::from_lines(10, 3, &["aaa", "bbb", "ccc"]);
        screen.cursor = (0, 2);
        run_tick(&mut autospeak, &screen, &ses, &mut speech);
        speech.take();

        // The window lands on another row: the whole row is announced.
        ses.winy = 1;
        run_tick(&mut autospeak, &screen, &ses, &mut speech);
        assert_eq!(speech.take(), vec!["bbb       ".to_string()]);
    }

    #[test]
    fn cursor_motion_speaks_the_character_under_it() {
        let mut autospeak = Autospeak::new();
        let mut speech = RecordingSpeech::new();
        let ses = Session::new();

        let mut screen = BufferScreen::from_lines(10, 1, &["dog"]);
        screen.cursor = (0, 0);
        run_tick(&mut autospeak, &screen, &ses, &mut speech);
        speech.take();

        // Same content, cursor moved along the row: announce what it
        // landed on.
        screen.cursor = (2, 0);
        run_tick(&mut autospeak, &screen, &ses, &mut speech);
        assert_eq!(speech.take(), vec!["g".to_string()]);
    }
}
