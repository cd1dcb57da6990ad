//! Speech synthesiser seam.
//!
//! The synthesiser itself is an external collaborator; the daemon only
//! needs to hand it runs of screen characters and occasionally silence
//! it. Rate and volume control live behind the same trait so a capable
//! synthesiser can expose them without the core depending on one.

use crate::ScreenCharacter;

pub trait Speech {
    /// Speak a run of characters, replacing anything still queued.
    fn say(&mut self, characters: &[ScreenCharacter]);

    /// Stop speaking immediately.
    fn mute(&mut self);

    /// Nudge the speaking rate. `false` when unsupported.
    fn adjust_rate(&mut self, _delta: i8) -> bool {
        false
    }

    /// Nudge the volume. `false` when unsupported.
    fn adjust_volume(&mut self, _delta: i8) -> bool {
        false
    }
}

/// Silent stand-in used when no synthesiser is wired up.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSpeech;

impl Speech for NullSpeech {
    fn say(&mut self, _characters: &[ScreenCharacter]) {}
    fn mute(&mut self) {}
}

/// Records utterances as strings; tests assert on them.
#[derive(Debug, Default, Clone)]
pub struct RecordingSpeech {
    pub utterances: Vec<String>,
    pub muted: usize,
}

impl RecordingSpeech {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&mut self) -> Vec<String> {
        std::mem::take(&mut self.utterances)
    }
}

impl Speech for RecordingSpeech {
    fn say(&mut self, characters: &[ScreenCharacter]) {
        self.utterances
            .push(characters.iter().map(|c| c.text).collect());
    }

    fn mute(&mut self) {
        self.muted += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attrs;

    #[test]
    fn recording_speech_collects_text() {
        let mut speech = RecordingSpeech::new();
        let row: Vec<ScreenCharacter> = "hi there"
            .chars()
            .map(|c| ScreenCharacter::new(c, attrs::DEFAULT))
            .collect();
        speech.say(&row);
        speech.mute();
        assert_eq!(speech.take(), vec!["hi there".to_string()]);
        assert_eq!(speech.muted, 1);
    }
}
