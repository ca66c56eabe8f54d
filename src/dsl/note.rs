//! Note names: solfège syllables, pitch classes and MIDI pitch numbers.

use std::fmt;

use serde::Serialize;

use super::token::TokenKind;

/// Default octave used by the backend when a movement never sets one.
pub const DEFAULT_OCTAVE: i32 = 4;

/// A fixed-do solfège note name, or a rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoteName {
    Do,
    Re,
    Mi,
    Fa,
    Sol,
    La,
    Si,
    Rest,
}

impl NoteName {
    pub fn from_kind(kind: TokenKind) -> Option<Self> {
        let name = match kind {
            TokenKind::Do => NoteName::Do,
            TokenKind::Re => NoteName::Re,
            TokenKind::Mi => NoteName::Mi,
            TokenKind::Fa => NoteName::Fa,
            TokenKind::Sol => NoteName::Sol,
            TokenKind::La => NoteName::La,
            TokenKind::Si => NoteName::Si,
            TokenKind::Rest => NoteName::Rest,
            _ => return None,
        };
        Some(name)
    }

    /// Semitones above `do` within one octave. Rests map to 0.
    pub fn pitch_class(self) -> i32 {
        match self {
            NoteName::Do | NoteName::Rest => 0,
            NoteName::Re => 2,
            NoteName::Mi => 4,
            NoteName::Fa => 5,
            NoteName::Sol => 7,
            NoteName::La => 9,
            NoteName::Si => 11,
        }
    }

    pub fn is_rest(self) -> bool {
        self == NoteName::Rest
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NoteName::Do => "do",
            NoteName::Re => "re",
            NoteName::Mi => "mi",
            NoteName::Fa => "fa",
            NoteName::Sol => "sol",
            NoteName::La => "la",
            NoteName::Si => "si",
            NoteName::Rest => "r",
        }
    }
}

impl fmt::Display for NoteName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// MIDI pitch of a note: `pitch_class + semitone + 12 * octave`.
///
/// Returns `None` when the result falls outside 0–127.
pub fn midi_pitch(name: NoteName, semitone: i32, octave: i32) -> Option<u8> {
    let pitch = name.pitch_class() + semitone + 12 * octave;
    if (0..=127).contains(&pitch) {
        Some(pitch as u8)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn do_in_default_octave() {
        assert_eq!(midi_pitch(NoteName::Do, 0, DEFAULT_OCTAVE), Some(48));
    }

    #[test]
    fn la_octave_five() {
        assert_eq!(midi_pitch(NoteName::La, 0, 5), Some(69));
    }

    #[test]
    fn semitone_shifts_pitch() {
        assert_eq!(midi_pitch(NoteName::Fa, 1, 4), Some(54));
        assert_eq!(midi_pitch(NoteName::Si, -1, 4), Some(58));
    }

    #[test]
    fn lowest_pitch() {
        assert_eq!(midi_pitch(NoteName::Do, 0, 0), Some(0));
        assert_eq!(midi_pitch(NoteName::Do, -1, 0), None);
    }

    #[test]
    fn highest_pitch() {
        assert_eq!(midi_pitch(NoteName::Sol, 0, 10), Some(127));
        assert_eq!(midi_pitch(NoteName::La, 0, 10), None);
    }

    #[test]
    fn from_token_kind() {
        assert_eq!(NoteName::from_kind(TokenKind::Sol), Some(NoteName::Sol));
        assert_eq!(NoteName::from_kind(TokenKind::Rest), Some(NoteName::Rest));
        assert_eq!(NoteName::from_kind(TokenKind::Alphanum), None);
    }

    #[test]
    fn all_naturals_octave_4() {
        let expected = [
            (NoteName::Do, 48),
            (NoteName::Re, 50),
            (NoteName::Mi, 52),
            (NoteName::Fa, 53),
            (NoteName::Sol, 55),
            (NoteName::La, 57),
            (NoteName::Si, 59),
        ];
        for (name, pitch) in expected {
            assert_eq!(midi_pitch(name, 0, 4), Some(pitch), "failed for {name}");
        }
    }

    #[test]
    fn rest_is_flagged() {
        assert!(NoteName::Rest.is_rest());
        assert!(!NoteName::Do.is_rest());
        assert_eq!(NoteName::Rest.to_string(), "r");
    }
}
