//! Instruments: General MIDI program lookup and the backend-readiness check.

pub mod table;

use tracing::debug;

use crate::dsl::ast::{ChordMember, Expr, Note, Program};
use crate::dsl::error::CompileError;
use crate::dsl::note::midi_pitch;

pub use table::{ALIASES, GM_PROGRAMS};

/// MIDI program number for an instrument name.
///
/// Accepts the General MIDI names (`acoustic_grand_piano`, `violin`, ...)
/// and the family aliases `piano`, `organ`, `guitar` and `bass`.
pub fn program_number(name: &str) -> Option<u8> {
    if let Some(&(_, program)) = ALIASES.iter().find(|(alias, _)| *alias == name) {
        return Some(program);
    }
    GM_PROGRAMS
        .iter()
        .position(|gm| *gm == name)
        .map(|i| i as u8)
}

/// Check that a resolved program can be handed to the MIDI backend.
///
/// Reports unknown instrument names and notes whose explicit octave puts
/// them outside the MIDI pitch range.
pub fn check_program(program: &Program) -> Vec<CompileError> {
    let mut errors = Vec::new();

    for movement in program.movements() {
        if program_number(&movement.instrument).is_none() {
            errors.push(
                CompileError::instrument(
                    format!("instrument \"{}\" is not supported", movement.instrument),
                    &movement.token,
                )
                .with_tip("instruments like piano, guitar, violin or any General MIDI name are available"),
            );
        }
        for expr in &movement.expressions {
            check_expr(expr, &mut errors);
        }
    }

    debug!(errors = errors.len(), "checked instruments and pitches");
    errors
}

fn check_expr(expr: &Expr, errors: &mut Vec<CompileError>) {
    match expr {
        Expr::Note(note) => check_note(note, errors),
        Expr::Chord { notes, .. } => {
            for member in notes {
                if let ChordMember::Note(note) = member {
                    check_note(note, errors);
                }
            }
        }
        Expr::Hold { inner, .. } => check_expr(inner, errors),
        _ => {}
    }
}

fn check_note(note: &Note, errors: &mut Vec<CompileError>) {
    let Some(octave) = note.octave else {
        return;
    };
    if note.name.is_rest() {
        return;
    }
    // Anything past a few dozen octaves is out of range anyway.
    if midi_pitch(note.name, note.semitone, octave.min(1_000) as i32).is_none() {
        errors.push(
            CompileError::instrument(
                format!(
                    "note {} in octave {} is outside the MIDI pitch range",
                    note.name, octave
                ),
                &note.token,
            )
            .with_tip("MIDI pitches run from do.0 to sol.10"),
        );
    }
}
