//! solfa: a compiler front end for solfège music notation.
//!
//! Source text is tokenized, parsed into an AST with error recovery, and
//! resolved (repetitions expanded, groups flattened, macros inlined) into a
//! program the MIDI backend can walk linearly.

pub mod config;
pub mod dsl;
pub mod instrument;
