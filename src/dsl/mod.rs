//! DSL compiler: solfa source → tokens → AST → resolved AST.

pub mod ast;
pub mod error;
pub mod idents;
pub mod lexer;
pub mod note;
pub mod parser;
pub mod resolve;
pub mod token;

pub use ast::*;
pub use error::{CompileError, ErrorKind};
pub use idents::{IdentEntry, IdentTable};
pub use token::{Token, TokenKind};

use tracing::debug;

use crate::config::Config;
use crate::instrument::check_program;
use lexer::Lexer;
use parser::Parser;

/// The solfa compiler.
///
/// Runs lexer → parser → resolution passes → instrument check, stopping
/// after the first stage that reports problems.
#[derive(Debug, Clone, Default)]
pub struct Compiler {
    config: Config,
}

impl Compiler {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Tokenize source text.
    pub fn tokenize(&self, source: &str) -> Result<Vec<Token>, CompileError> {
        let tokens = Lexer::new(source).tokenize()?;
        debug!(tokens = tokens.len(), "tokenized source");
        Ok(tokens)
    }

    /// Tokenize and parse source text into a Program AST.
    ///
    /// Syntax and identifier diagnostics are left on the program; `Err` means
    /// a lexer error or an internal parser failure.
    pub fn parse(&self, source: &str) -> Result<Program, CompileError> {
        let tokens = self.tokenize(source)?;
        Parser::with_default_track(tokens, self.config.default_track.as_str()).parse()
    }

    /// Run the resolution passes over a parsed program.
    pub fn resolve(&self, program: &mut Program) -> Result<(), Vec<CompileError>> {
        resolve::resolve(program, self.config.max_expansion)
    }

    /// Compile source text into a fully resolved program ready for the
    /// MIDI backend.
    pub fn compile(&self, source: &str) -> Result<Program, Vec<CompileError>> {
        let mut program = self.parse(source).map_err(|e| vec![e])?;
        if program.has_errors() {
            return Err(std::mem::take(&mut program.diagnostics));
        }

        self.resolve(&mut program)?;

        if self.config.check_instruments {
            let errors = check_program(&program);
            if !errors.is_empty() {
                return Err(errors);
            }
        }

        debug!(
            tracks = program.tracks.len(),
            movements = program.movements().count(),
            "compiled program"
        );
        Ok(program)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compile_simple_program() {
        let program = Compiler::default()
            .compile("title: \"scale\"\npiano: do re mi fa sol la si")
            .unwrap();
        assert_eq!(program.metadata, vec![Metadata::Title("scale".into())]);
        assert_eq!(program.tracks[0].movements[0].expressions.len(), 7);
    }

    #[test]
    fn compile_stops_at_lex_error() {
        let errors = Compiler::default().compile("piano: do @").unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, ErrorKind::LexError);
    }

    #[test]
    fn compile_stops_at_syntax_errors() {
        // `nope` would be a resolution error, but parsing fails first.
        let errors = Compiler::default()
            .compile("piano: *2 nope\nviolin: ^")
            .unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().all(|e| e.kind == ErrorKind::SyntaxError));
    }

    #[test]
    fn compile_reports_resolution_errors() {
        let errors = Compiler::default().compile("piano: nope").unwrap_err();
        assert_eq!(errors[0].kind, ErrorKind::ResolutionError);
    }

    #[test]
    fn compile_checks_instruments() {
        let errors = Compiler::default().compile("harp: do").unwrap_err();
        assert_eq!(errors[0].kind, ErrorKind::InstrumentError);
    }

    #[test]
    fn instrument_check_can_be_disabled() {
        let compiler = Compiler::new(Config {
            check_instruments: false,
            ..Config::default()
        });
        assert!(compiler.compile("harp: do").is_ok());
    }

    #[test]
    fn default_track_from_config() {
        let compiler = Compiler::new(Config {
            default_track: "song".into(),
            ..Config::default()
        });
        let program = compiler.compile("piano: do").unwrap();
        assert_eq!(program.tracks[0].name, "song");
    }

    #[test]
    fn expansion_limit_from_config() {
        let compiler = Compiler::new(Config {
            max_expansion: 3,
            ..Config::default()
        });
        let errors = compiler.compile("m = do re\npiano: m m").unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, ErrorKind::ResolutionError);
    }
}
