//! Abstract Syntax Tree for the solfa language.
//!
//! The parser builds these nodes once; the resolution passes rewrite
//! expression lists by value. Every expression keeps the token it was parsed
//! from so later passes can point diagnostics at the source.

use std::fmt;

use serde::Serialize;

use super::error::CompileError;
use super::idents::IdentTable;
use super::note::NoteName;
use super::token::Token;

/// A complete program.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Program {
    pub metadata: Vec<Metadata>,
    pub macros: Vec<MacroDef>,
    pub tracks: Vec<Track>,
    pub idents: IdentTable,
    /// Syntax and identifier diagnostics collected while parsing.
    pub diagnostics: Vec<CompileError>,
}

impl Program {
    pub fn has_errors(&self) -> bool {
        !self.diagnostics.is_empty()
    }

    /// Look up a macro definition through the identifier table.
    pub fn macro_def(&self, name: &str) -> Option<&MacroDef> {
        let index = self.idents.macro_index(name)?;
        self.macros.get(index - 1)
    }

    pub fn movements(&self) -> impl Iterator<Item = &Movement> {
        self.tracks.iter().flat_map(|t| t.movements.iter())
    }
}

/// Song-level metadata statements.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "text")]
pub enum Metadata {
    Title(String),
    CopyRight(String),
}

/// A macro definition: `name(params) = body`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MacroDef {
    pub name: String,
    pub params: Vec<String>,
    pub body: Vec<Expr>,
    #[serde(skip_serializing)]
    pub token: Token,
}

/// A named group of movements.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Track {
    pub name: String,
    pub movements: Vec<Movement>,
}

impl Track {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            movements: Vec::new(),
        }
    }
}

/// One instrument's sequence of expressions inside a track.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Movement {
    pub instrument: String,
    pub tag: Option<String>,
    pub expressions: Vec<Expr>,
    #[serde(skip_serializing)]
    pub token: Token,
}

impl Movement {
    /// Identifier-table key: the instrument, plus the tag when present.
    pub fn key(&self) -> String {
        movement_key(&self.instrument, self.tag.as_deref())
    }
}

pub fn movement_key(instrument: &str, tag: Option<&str>) -> String {
    match tag {
        Some(tag) => format!("{instrument} \"{tag}\""),
        None => instrument.to_string(),
    }
}

/// Up or down, for octave and tone shifts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

/// A length in beats, kept as a fraction: `:3` is 3/1, `:/4` is 1/4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Duration {
    pub num: u32,
    pub den: u32,
}

impl Duration {
    pub fn beats(num: u32) -> Self {
        Self { num, den: 1 }
    }

    pub fn fraction(num: u32, den: u32) -> Self {
        Self { num, den }
    }

    pub fn as_beats(self) -> f64 {
        self.num as f64 / self.den as f64
    }
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.den == 1 {
            write!(f, "{}", self.num)
        } else {
            write!(f, "{}/{}", self.num, self.den)
        }
    }
}

/// A note literal such as `do++.5:/4`.
///
/// `octave` and `duration` are `None` when the note inherits the movement's
/// current state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Note {
    pub name: NoteName,
    pub semitone: i32,
    pub octave: Option<u32>,
    pub duration: Option<Duration>,
    #[serde(skip_serializing)]
    pub token: Token,
}

/// A member of a chord: a note, or an identifier that must resolve to notes.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind")]
pub enum ChordMember {
    Note(Note),
    Ident {
        name: String,
        #[serde(skip_serializing)]
        token: Token,
    },
}

/// An expression inside a movement or macro body.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind")]
pub enum Expr {
    Note(Note),
    Chord {
        notes: Vec<ChordMember>,
        #[serde(skip_serializing)]
        token: Token,
    },
    Ident {
        name: String,
        #[serde(skip_serializing)]
        token: Token,
    },
    MacroCall {
        name: String,
        args: Vec<Expr>,
        #[serde(skip_serializing)]
        token: Token,
    },
    /// Postfix `*N`; applies to the preceding sibling.
    Repetition {
        count: u32,
        #[serde(skip_serializing)]
        token: Token,
    },
    Hold {
        inner: Box<Expr>,
        #[serde(skip_serializing)]
        token: Token,
    },
    Release {
        #[serde(skip_serializing)]
        token: Token,
    },
    Group {
        items: Vec<Expr>,
        #[serde(skip_serializing)]
        token: Token,
    },
    SetOctave {
        direction: Direction,
        amount: u32,
        #[serde(skip_serializing)]
        token: Token,
    },
    SetDuration {
        value: Duration,
        #[serde(skip_serializing)]
        token: Token,
    },
    SetTempo {
        bpm: u32,
        #[serde(skip_serializing)]
        token: Token,
    },
    SetTone {
        direction: Direction,
        note: NoteName,
        #[serde(skip_serializing)]
        token: Token,
    },
    SetMeasure {
        beats: u32,
        unit: u32,
        #[serde(skip_serializing)]
        token: Token,
    },
    SetVolume {
        value: u32,
        #[serde(skip_serializing)]
        token: Token,
    },
    /// Bare number: beats until the next note starts.
    SetInterval {
        value: u32,
        #[serde(skip_serializing)]
        token: Token,
    },
    Bar {
        #[serde(skip_serializing)]
        token: Token,
    },
    /// Placeholder left by error recovery.
    Error {
        #[serde(skip_serializing)]
        token: Token,
    },
}

impl Expr {
    pub fn token(&self) -> &Token {
        match self {
            Expr::Note(note) => &note.token,
            Expr::Chord { token, .. }
            | Expr::Ident { token, .. }
            | Expr::MacroCall { token, .. }
            | Expr::Repetition { token, .. }
            | Expr::Hold { token, .. }
            | Expr::Release { token }
            | Expr::Group { token, .. }
            | Expr::SetOctave { token, .. }
            | Expr::SetDuration { token, .. }
            | Expr::SetTempo { token, .. }
            | Expr::SetTone { token, .. }
            | Expr::SetMeasure { token, .. }
            | Expr::SetVolume { token, .. }
            | Expr::SetInterval { token, .. }
            | Expr::Bar { token }
            | Expr::Error { token } => token,
        }
    }

    /// Whether the MIDI backend can consume this expression directly.
    pub fn is_terminal(&self) -> bool {
        match self {
            Expr::Note(_)
            | Expr::Release { .. }
            | Expr::Bar { .. }
            | Expr::SetOctave { .. }
            | Expr::SetDuration { .. }
            | Expr::SetTempo { .. }
            | Expr::SetTone { .. }
            | Expr::SetMeasure { .. }
            | Expr::SetVolume { .. }
            | Expr::SetInterval { .. }
            | Expr::Error { .. } => true,
            Expr::Chord { notes, .. } => notes.iter().all(|m| matches!(m, ChordMember::Note(_))),
            Expr::Hold { inner, .. } => inner.is_terminal(),
            Expr::Ident { .. }
            | Expr::MacroCall { .. }
            | Expr::Repetition { .. }
            | Expr::Group { .. } => false,
        }
    }

    pub fn as_note(&self) -> Option<&Note> {
        match self {
            Expr::Note(note) => Some(note),
            _ => None,
        }
    }
}
