//! Parser for the solfa language.
//!
//! Parses a token stream into the AST. Syntax errors do not stop the parse:
//! they are recorded on the program and the parser skips ahead to the next
//! safe boundary (end of statement, closing `]`, or closing `)` depending on
//! where the error happened).
//!
//! The parser keeps an explicit stack of [`ParseState`]s. Besides tracking
//! nesting, the stack decides whether the postfix operators `*N` and `)` are
//! legal: sequence loops push an [`ParseState::Expr`] marker once they have
//! accepted an expression, and the postfix forms require that marker on top.

use tracing::debug;

use super::ast::*;
use super::error::CompileError;
use super::idents::{IdentEntry, IdentTable};
use super::note::NoteName;
use super::token::{Token, TokenKind};

/// Track name used when the source never opens a track.
pub const DEFAULT_TRACK: &str = "global";

/// Track name used by `track:` without a string.
const UNNAMED_TRACK: &str = "main";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    Movement,
    Macro,
    Group,
    Args,
    Hold,
    Chord,
    /// The enclosing sequence already holds at least one expression.
    Expr,
}

/// Why a parse function stopped early.
enum Halt {
    /// Recoverable; reported as a diagnostic by the nearest sequence loop.
    Syntax(CompileError),
    /// Parser bug; aborts the whole parse.
    Internal(CompileError),
}

impl From<CompileError> for Halt {
    fn from(err: CompileError) -> Self {
        Halt::Syntax(err)
    }
}

type PResult<T> = Result<T, Halt>;

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    stack: Vec<ParseState>,
    default_track: String,
    metadata: Vec<Metadata>,
    macros: Vec<MacroDef>,
    tracks: Vec<Track>,
    idents: IdentTable,
    diagnostics: Vec<CompileError>,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self::with_default_track(tokens, DEFAULT_TRACK)
    }

    pub fn with_default_track(mut tokens: Vec<Token>, default_track: impl Into<String>) -> Self {
        if tokens.last().map(|t| t.kind) != Some(TokenKind::Eof) {
            let (line, col) = tokens
                .last()
                .map(|t| (t.line, t.col + t.text.chars().count()))
                .unwrap_or((1, 1));
            tokens.push(Token::new("", TokenKind::Eof, line, col));
        }
        Self {
            tokens,
            pos: 0,
            stack: Vec::new(),
            default_track: default_track.into(),
            metadata: Vec::new(),
            macros: Vec::new(),
            tracks: Vec::new(),
            idents: IdentTable::new(),
            diagnostics: Vec::new(),
        }
    }

    /// Parse the whole token stream.
    ///
    /// Syntax and identifier problems end up in [`Program::diagnostics`];
    /// `Err` is reserved for internal invariant violations.
    pub fn parse(&mut self) -> Result<Program, CompileError> {
        if !self.tokens.iter().any(|t| t.kind == TokenKind::Track) {
            self.tracks.push(Track::new(self.default_track.clone()));
        }

        loop {
            let result = match self.peek().kind {
                TokenKind::Eof => break,
                TokenKind::Newline | TokenKind::Semicolon | TokenKind::Space => {
                    self.advance();
                    continue;
                }
                TokenKind::Title | TokenKind::CopyRight => self.parse_metadata(),
                TokenKind::Track => self.parse_track(),
                TokenKind::Alphanum => self.parse_definition(),
                kind if kind.is_note() => Err(self
                    .unexpected("expected a statement")
                    .with_tip("notes belong to a movement, e.g. `piano: do re mi`")
                    .into()),
                _ => Err(self.unexpected("expected a statement").into()),
            };

            match result {
                Ok(()) => {}
                Err(Halt::Syntax(diag)) => {
                    self.report(diag);
                    self.synchronize(&[TokenKind::Newline, TokenKind::Semicolon]);
                }
                Err(Halt::Internal(err)) => return Err(err),
            }
        }

        if let Some(state) = self.stack.last() {
            return Err(CompileError::internal(
                format!("parser state stack not empty at end of input: {state:?}"),
                self.peek(),
            ));
        }

        debug!(
            metadata = self.metadata.len(),
            macros = self.macros.len(),
            tracks = self.tracks.len(),
            diagnostics = self.diagnostics.len(),
            "parsed program"
        );

        Ok(Program {
            metadata: std::mem::take(&mut self.metadata),
            macros: std::mem::take(&mut self.macros),
            tracks: std::mem::take(&mut self.tracks),
            idents: std::mem::take(&mut self.idents),
            diagnostics: std::mem::take(&mut self.diagnostics),
        })
    }

    // --- Statements ---

    /// `title:"text"` or `copy_right:"text"`.
    fn parse_metadata(&mut self) -> PResult<()> {
        let keyword = self.advance();
        self.skip_space();
        self.expect(
            TokenKind::Colon,
            &format!("expected ':' after {keyword}"),
        )?;
        self.skip_space();
        let text = self.expect_string(&format!("expected a string after {keyword}:"))?;
        let entry = match keyword.kind {
            TokenKind::Title => Metadata::Title(text),
            _ => Metadata::CopyRight(text),
        };
        self.metadata.push(entry);
        self.expect_statement_end(&keyword)
    }

    /// `track ["name"]:`. Later movements attach to this track.
    fn parse_track(&mut self) -> PResult<()> {
        let keyword = self.advance();
        self.skip_space();
        let name = if self.check(TokenKind::Str) {
            let name = self.expect_string("expected a track name")?;
            self.skip_space();
            name
        } else {
            UNNAMED_TRACK.to_string()
        };
        self.expect(TokenKind::Colon, "expected ':' after track")?;
        debug!(track = %name, line = keyword.line, "opening track");
        self.tracks.push(Track::new(name));
        Ok(())
    }

    /// A statement starting with an identifier: macro or movement.
    fn parse_definition(&mut self) -> PResult<()> {
        let name = self.advance();
        self.skip_space();
        match self.peek().kind {
            TokenKind::Eq | TokenKind::LParen => self.parse_macro(name),
            TokenKind::Str | TokenKind::Colon => self.parse_movement(name),
            _ => Err(self
                .unexpected(&format!("expected '=', '(', a tag or ':' after {name}"))
                .with_tip("define a macro with `name = ...` or a movement with `instrument: ...`")
                .into()),
        }
    }

    /// `name(p1, p2) = body` or `name = body`.
    fn parse_macro(&mut self, name: Token) -> PResult<()> {
        let def = self.with_state(ParseState::Macro, |p| {
            let params = if p.check(TokenKind::LParen) {
                p.parse_params()?
            } else {
                Vec::new()
            };
            p.skip_space();
            p.expect(
                TokenKind::Eq,
                &format!("expected '=' after macro {name}"),
            )?;
            let body = p.parse_body()?;
            Ok(MacroDef {
                name: name.text.clone(),
                params,
                body,
                token: name.clone(),
            })
        })?;
        self.register_macro(def);
        Ok(())
    }

    fn parse_params(&mut self) -> PResult<Vec<String>> {
        self.advance(); // consume '('
        let mut params: Vec<String> = Vec::new();
        self.skip_space();
        if self.check(TokenKind::RParen) {
            self.advance();
            return Ok(params);
        }

        loop {
            self.skip_space();
            let param = self.expect(TokenKind::Alphanum, "expected a parameter name")?;
            if params.contains(&param.text) {
                self.report(CompileError::identifier(
                    format!("parameter '{}' is defined twice", param.text),
                    &param,
                ));
            } else {
                params.push(param.text);
            }

            self.skip_space();
            if self.check(TokenKind::Comma) {
                self.advance();
                self.skip_space();
                if self.check(TokenKind::RParen) {
                    return Err(CompileError::syntax(
                        "trailing comma in parameter list",
                        self.peek(),
                    )
                    .into());
                }
                continue;
            }
            self.expect(TokenKind::RParen, "expected ',' or ')' after a parameter")?;
            return Ok(params);
        }
    }

    /// `instrument ["tag"]: body`.
    fn parse_movement(&mut self, instrument: Token) -> PResult<()> {
        let movement = self.with_state(ParseState::Movement, |p| {
            let tag = if p.check(TokenKind::Str) {
                let tag = p.expect_string("expected a movement tag")?;
                p.skip_space();
                Some(tag)
            } else {
                None
            };
            p.expect(
                TokenKind::Colon,
                &format!("expected ':' after movement {instrument}"),
            )?;
            let expressions = p.parse_body()?;
            Ok(Movement {
                instrument: instrument.text.clone(),
                tag,
                expressions,
                token: instrument.clone(),
            })
        })?;
        self.register_movement(movement);
        Ok(())
    }

    fn register_macro(&mut self, def: MacroDef) {
        let index = self.macros.len() + 1;
        if let Err(existing) = self.idents.define(&def.name, IdentEntry::Macro(index)) {
            let diag = CompileError::identifier(
                format!(
                    "'{}' is already defined {}",
                    def.name,
                    self.definition_site(existing)
                ),
                &def.token,
            )
            .with_tip("redefinitions are not allowed; rename one of them");
            self.report(diag);
        }
        self.macros.push(def);
    }

    fn register_movement(&mut self, movement: Movement) {
        let key = movement.key();
        let track_no = self.tracks.len();
        if track_no == 0 {
            let diag = CompileError::syntax(
                format!("movement {key} appears before any track"),
                &movement.token,
            )
            .with_tip("open a track first, e.g. `track \"main\":`");
            self.report(diag);
            return;
        }

        let track = &self.tracks[track_no - 1];
        let duplicate = track
            .movements
            .iter()
            .find(|m| m.key() == key)
            .map(|m| m.token.line);
        let track_name = track.name.clone();
        let movement_no = track.movements.len() + 1;

        if let Some(line) = duplicate {
            let diag = CompileError::identifier(
                format!("movement {key} is already defined in track '{track_name}' at line {line}"),
                &movement.token,
            )
            .with_tip("give one of them a tag, e.g. `piano \"left\": ...`");
            self.report(diag);
        } else {
            let entry = IdentEntry::Movement {
                track: track_no,
                movement: movement_no,
            };
            if let Err(existing @ IdentEntry::Macro(_)) = self.idents.define(&key, entry) {
                let diag = CompileError::identifier(
                    format!(
                        "movement {key} collides with the macro defined {}",
                        self.definition_site(existing)
                    ),
                    &movement.token,
                );
                self.report(diag);
            }
        }

        if let Some(track) = self.tracks.last_mut() {
            track.movements.push(movement);
        }
    }

    fn definition_site(&self, entry: IdentEntry) -> String {
        let token = match entry {
            IdentEntry::Macro(index) => self.macros.get(index - 1).map(|m| &m.token),
            IdentEntry::Movement { track, movement } => self
                .tracks
                .get(track - 1)
                .and_then(|t| t.movements.get(movement - 1))
                .map(|m| &m.token),
        };
        match token {
            Some(token) => format!("at line {}", token.line),
            None => "earlier".to_string(),
        }
    }

    // --- Sequences ---

    /// Expressions up to the end of the statement.
    fn parse_body(&mut self) -> PResult<Vec<Expr>> {
        let mut items = Vec::new();
        let mut marked = false;

        loop {
            self.skip_space();
            if self.peek().kind.ends_statement() {
                break;
            }
            let start = self.peek().clone();
            match self.parse_expr() {
                Ok(expr) => {
                    items.push(expr);
                    if !marked {
                        self.stack.push(ParseState::Expr);
                        marked = true;
                    }
                }
                Err(Halt::Syntax(diag)) => {
                    self.report(diag);
                    items.push(Expr::Error { token: start });
                    self.synchronize(&[TokenKind::Newline, TokenKind::Semicolon]);
                }
                Err(internal) => return Err(internal),
            }
        }

        if marked {
            self.pop_state(ParseState::Expr)?;
        }
        Ok(items)
    }

    /// `[ ... ]`; whitespace and newlines are insignificant inside.
    fn parse_group(&mut self) -> PResult<Expr> {
        let open = self.advance();
        let items = self.with_state(ParseState::Group, |p| p.parse_group_items(&open))?;
        Ok(Expr::Group { items, token: open })
    }

    fn parse_group_items(&mut self, open: &Token) -> PResult<Vec<Expr>> {
        let mut items = Vec::new();
        let mut marked = false;

        let outcome = loop {
            self.skip_whitespace();
            match self.peek().kind {
                TokenKind::RBracket => {
                    self.advance();
                    break Ok(());
                }
                TokenKind::Eof => {
                    break Err(Halt::Syntax(
                        CompileError::syntax("unterminated expression group", open)
                            .with_tip("close the group with ']'"),
                    ));
                }
                _ => {}
            }

            let start = self.peek().clone();
            match self.parse_expr() {
                Ok(expr) => {
                    items.push(expr);
                    if !marked {
                        self.stack.push(ParseState::Expr);
                        marked = true;
                    }
                }
                Err(Halt::Syntax(diag)) => {
                    self.report(diag);
                    items.push(Expr::Error { token: start });
                    self.synchronize(&[TokenKind::RBracket]);
                }
                Err(internal) => return Err(internal),
            }
        };

        if marked {
            self.pop_state(ParseState::Expr)?;
        }
        outcome.map(|()| items)
    }

    /// `name(arg, arg, ...)` with the cursor on `(`.
    fn parse_call(&mut self, name: Token) -> PResult<Expr> {
        self.advance(); // consume '('
        let args = self.with_state(ParseState::Args, |p| match p.parse_args() {
            Ok(args) => Ok(args),
            Err(Halt::Syntax(diag)) => {
                p.report(diag);
                p.synchronize(&[TokenKind::RParen]);
                if p.check(TokenKind::RParen) {
                    p.advance();
                }
                Ok(vec![Expr::Error {
                    token: name.clone(),
                }])
            }
            Err(internal) => Err(internal),
        })?;
        Ok(Expr::MacroCall {
            name: name.text.clone(),
            args,
            token: name,
        })
    }

    fn parse_args(&mut self) -> PResult<Vec<Expr>> {
        let mut args = Vec::new();
        self.skip_whitespace();
        if self.check(TokenKind::RParen) {
            self.advance();
            return Ok(args);
        }

        loop {
            self.skip_whitespace();
            if self.check(TokenKind::Eof) {
                return Err(CompileError::syntax("unterminated argument list", self.peek())
                    .with_tip("close the call with ')'")
                    .into());
            }
            args.push(self.parse_expr()?);

            self.skip_whitespace();
            match self.peek().kind {
                TokenKind::RParen => {
                    self.advance();
                    return Ok(args);
                }
                TokenKind::Comma => {
                    self.advance();
                    self.skip_whitespace();
                    if self.check(TokenKind::RParen) {
                        return Err(CompileError::syntax(
                            "trailing comma in argument list",
                            self.peek(),
                        )
                        .into());
                    }
                }
                _ => {
                    return Err(self
                        .unexpected("expected ',' or ')' after an argument")
                        .with_tip("wrap multi-expression arguments in brackets, e.g. `m([do re], mi)`")
                        .into());
                }
            }
        }
    }

    // --- Expressions ---

    fn parse_expr(&mut self) -> PResult<Expr> {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::Volume => self.parse_volume(),
            TokenKind::Plus | TokenKind::Dash => self.parse_tone(),
            TokenKind::Greater | TokenKind::Less => self.parse_octave_shift(),
            TokenKind::Colon => {
                let colon = self.advance();
                let value = self.parse_duration_value(&colon)?;
                Ok(Expr::SetDuration {
                    value,
                    token: colon,
                })
            }
            TokenKind::Bang => self.parse_measure(),
            TokenKind::Caret => {
                let caret = self.advance();
                let bpm = self.expect_number("expected a tempo after '^'")?;
                Ok(Expr::SetTempo { bpm, token: caret })
            }
            TokenKind::Pipe => {
                self.advance();
                Ok(Expr::Bar { token })
            }
            TokenKind::Number => {
                self.advance();
                let value = self.number_value(&token)?;
                Ok(Expr::SetInterval { value, token })
            }
            TokenKind::Asterisk => self.parse_repetition(),
            TokenKind::RParen => self.parse_release(),
            TokenKind::LParen => self.parse_hold(),
            TokenKind::LBracket => self.parse_group(),
            TokenKind::Alphanum => self.parse_identifier(),
            kind => match NoteName::from_kind(kind) {
                Some(name) => self.parse_note_expr(name),
                None => Err(self.unexpected("expected an expression").into()),
            },
        }
    }

    /// `v=N`, `vol=N`, `volume=N`.
    fn parse_volume(&mut self) -> PResult<Expr> {
        let keyword = self.advance();
        self.expect(TokenKind::Eq, &format!("expected '=' after {keyword}"))?;
        let value = self.expect_number("expected a volume level after '='")?;
        Ok(Expr::SetVolume {
            value,
            token: keyword,
        })
    }

    /// `+note` / `-note`.
    fn parse_tone(&mut self) -> PResult<Expr> {
        let sign = self.advance();
        let direction = if sign.kind == TokenKind::Plus {
            Direction::Up
        } else {
            Direction::Down
        };
        match NoteName::from_kind(self.peek().kind) {
            Some(note) if !note.is_rest() => {
                self.advance();
                Ok(Expr::SetTone {
                    direction,
                    note,
                    token: sign,
                })
            }
            _ => Err(self
                .unexpected(&format!("expected a note name after {sign}"))
                .into()),
        }
    }

    /// `>N` / `<N`; a bare arrow shifts by zero octaves.
    fn parse_octave_shift(&mut self) -> PResult<Expr> {
        let arrow = self.advance();
        let direction = if arrow.kind == TokenKind::Greater {
            Direction::Up
        } else {
            Direction::Down
        };
        let amount = if self.check(TokenKind::Number) {
            let number = self.advance();
            self.number_value(&number)?
        } else {
            0
        };
        Ok(Expr::SetOctave {
            direction,
            amount,
            token: arrow,
        })
    }

    /// `!N/M`.
    fn parse_measure(&mut self) -> PResult<Expr> {
        let bang = self.advance();
        let beats = self.expect_number("expected a beat count after '!'")?;
        self.expect(TokenKind::Slash, "expected '/' in measure, e.g. `!3/4`")?;
        let unit_token = self.peek().clone();
        let unit = self.expect_number("expected a beat unit after '/'")?;
        if unit == 0 {
            return Err(CompileError::syntax("measure unit must not be zero", &unit_token).into());
        }
        Ok(Expr::SetMeasure {
            beats,
            unit,
            token: bang,
        })
    }

    /// Postfix `*N`.
    fn parse_repetition(&mut self) -> PResult<Expr> {
        let star = self.advance();
        if !self.follows_expr() {
            return Err(CompileError::syntax("'*' must follow an expression", &star)
                .with_tip("write the expression first, e.g. `do*4`")
                .into());
        }
        let count = self.expect_number("expected a repeat count after '*'")?;
        Ok(Expr::Repetition { count, token: star })
    }

    /// Bare `)` releases held notes.
    fn parse_release(&mut self) -> PResult<Expr> {
        let paren = self.advance();
        if !self.follows_expr() {
            return Err(CompileError::syntax("')' must follow an expression", &paren)
                .with_tip("a release closes held notes, e.g. `(do re mi)`")
                .into());
        }
        Ok(Expr::Release { token: paren })
    }

    /// `(expr` holds a note, chord or macro reference.
    fn parse_hold(&mut self) -> PResult<Expr> {
        let open = self.advance();
        let inner = self.with_state(ParseState::Hold, |p| {
            p.skip_space();
            p.parse_expr()
        })?;
        match inner {
            Expr::Note(_) | Expr::Chord { .. } | Expr::Ident { .. } | Expr::MacroCall { .. } => {
                Ok(Expr::Hold {
                    inner: Box::new(inner),
                    token: open,
                })
            }
            other => Err(CompileError::syntax(
                "'(' must be followed by a note, chord or identifier",
                other.token(),
            )
            .into()),
        }
    }

    /// Identifier, chord starting with an identifier, or macro call.
    fn parse_identifier(&mut self) -> PResult<Expr> {
        let name = self.advance();
        match self.peek().kind {
            TokenKind::Slash => {
                let first = ChordMember::Ident {
                    name: name.text.clone(),
                    token: name.clone(),
                };
                self.parse_chord(first, name)
            }
            TokenKind::LParen => self.parse_call(name),
            _ => Ok(Expr::Ident {
                name: name.text.clone(),
                token: name,
            }),
        }
    }

    /// Note literal: name, `+`/`-` run, `.N` octave, `/` chord, `:N` duration.
    fn parse_note_expr(&mut self, name: NoteName) -> PResult<Expr> {
        let token = self.advance();

        let mut semitone = 0;
        loop {
            match self.peek().kind {
                TokenKind::Plus => semitone += 1,
                TokenKind::Dash => semitone -= 1,
                _ => break,
            }
            self.advance();
        }

        let octave = if self.check(TokenKind::Dot) {
            self.advance();
            Some(self.expect_number("expected an octave number after '.'")?)
        } else {
            None
        };

        let mut note = Note {
            name,
            semitone,
            octave,
            duration: None,
            token: token.clone(),
        };

        if self.check(TokenKind::Slash) {
            return self.parse_chord(ChordMember::Note(note), token);
        }

        if self.check(TokenKind::Colon) {
            let colon = self.advance();
            note.duration = Some(self.parse_duration_value(&colon)?);
        }

        Ok(Expr::Note(note))
    }

    /// Continues a chord after its first member; the cursor is on `/`.
    fn parse_chord(&mut self, first: ChordMember, token: Token) -> PResult<Expr> {
        self.advance(); // consume '/'
        let rest = self.with_state(ParseState::Chord, |p| p.parse_expr())?;
        let mut notes = vec![first];
        match rest {
            Expr::Note(note) => notes.push(ChordMember::Note(note)),
            Expr::Ident { name, token } => notes.push(ChordMember::Ident { name, token }),
            Expr::Chord { notes: more, .. } => notes.extend(more),
            other => {
                return Err(CompileError::syntax(
                    "chords can only be formed from notes and identifiers",
                    other.token(),
                )
                .into());
            }
        }
        Ok(Expr::Chord { notes, token })
    }

    /// `N`, `N/M` or `/N` after a `:`.
    fn parse_duration_value(&mut self, colon: &Token) -> PResult<Duration> {
        let (num, den) = if self.check(TokenKind::Slash) {
            self.advance();
            (1, self.peek().clone())
        } else {
            let num = self.expect_number(&format!("expected a duration after {colon}"))?;
            if !self.check(TokenKind::Slash) {
                return Ok(Duration::beats(num));
            }
            self.advance();
            (num, self.peek().clone())
        };
        let den_value = self.expect_number("expected a number after '/'")?;
        if den_value == 0 {
            return Err(CompileError::syntax("duration denominator must not be zero", &den).into());
        }
        Ok(Duration::fraction(num, den_value))
    }

    // --- Utility methods ---

    fn with_state<T>(
        &mut self,
        state: ParseState,
        f: impl FnOnce(&mut Self) -> PResult<T>,
    ) -> PResult<T> {
        self.stack.push(state);
        let result = f(self);
        self.pop_state(state)?;
        result
    }

    fn pop_state(&mut self, expected: ParseState) -> PResult<()> {
        match self.stack.pop() {
            Some(state) if state == expected => Ok(()),
            found => Err(Halt::Internal(CompileError::internal(
                format!("parser state stack corrupted: expected {expected:?} on top, found {found:?}"),
                self.peek(),
            ))),
        }
    }

    fn follows_expr(&self) -> bool {
        self.stack.last() == Some(&ParseState::Expr)
    }

    fn report(&mut self, diag: CompileError) {
        debug!(%diag, "recorded diagnostic");
        self.diagnostics.push(diag);
    }

    /// Skip to the next token in `until` that is not nested in brackets.
    /// Stops before that token, or at end of input.
    fn synchronize(&mut self, until: &[TokenKind]) {
        let mut depth = 0usize;
        loop {
            let kind = self.peek().kind;
            if kind == TokenKind::Eof || (depth == 0 && until.contains(&kind)) {
                return;
            }
            match kind {
                TokenKind::LBracket => depth += 1,
                TokenKind::RBracket => depth = depth.saturating_sub(1),
                _ => {}
            }
            self.advance();
        }
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> Token {
        let t = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        t
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.peek().kind == kind
    }

    fn skip_space(&mut self) {
        while self.check(TokenKind::Space) {
            self.advance();
        }
    }

    fn skip_whitespace(&mut self) {
        while self.check(TokenKind::Space) || self.check(TokenKind::Newline) {
            self.advance();
        }
    }

    fn unexpected(&self, what: &str) -> CompileError {
        let t = self.peek();
        CompileError::syntax(format!("{what}, got {t}"), t)
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> PResult<Token> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self.unexpected(what).into())
        }
    }

    fn expect_number(&mut self, what: &str) -> PResult<u32> {
        let token = self.expect(TokenKind::Number, what)?;
        self.number_value(&token)
    }

    fn number_value(&self, token: &Token) -> PResult<u32> {
        token.number().ok_or_else(|| {
            CompileError::syntax(format!("number {token} is out of range"), token).into()
        })
    }

    fn expect_string(&mut self, what: &str) -> PResult<String> {
        let token = self.expect(TokenKind::Str, what)?;
        if !token.is_terminated_string() {
            return Err(CompileError::syntax("unterminated string literal", &token)
                .with_tip("close the string with '\"'")
                .into());
        }
        Ok(token.unquoted().to_string())
    }

    fn expect_statement_end(&mut self, after: &Token) -> PResult<()> {
        self.skip_space();
        if self.peek().kind.ends_statement() {
            Ok(())
        } else {
            Err(self
                .unexpected(&format!("expected end of statement after {after}"))
                .into())
        }
    }
}

/// Parse a token stream with the default track name.
pub fn parse(tokens: Vec<Token>) -> Result<Program, CompileError> {
    Parser::new(tokens).parse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl::error::ErrorKind;
    use crate::dsl::lexer::tokenize;

    fn parse_src(src: &str) -> Program {
        let tokens = tokenize(src).unwrap();
        Parser::new(tokens).parse().unwrap()
    }

    fn body(src: &str) -> Vec<Expr> {
        let prog = parse_src(src);
        assert!(prog.diagnostics.is_empty(), "{:?}", prog.diagnostics);
        prog.tracks[0].movements[0].expressions.clone()
    }

    fn note_of(expr: &Expr) -> &Note {
        expr.as_note()
            .unwrap_or_else(|| panic!("expected note, got {expr:?}"))
    }

    #[test]
    fn parse_empty_program() {
        let prog = parse_src("");
        assert!(prog.metadata.is_empty());
        assert!(prog.macros.is_empty());
        assert_eq!(prog.tracks.len(), 1);
        assert_eq!(prog.tracks[0].name, DEFAULT_TRACK);
        assert!(!prog.has_errors());
    }

    #[test]
    fn parse_title() {
        let prog = parse_src("title:\"x\"");
        assert_eq!(prog.metadata, vec![Metadata::Title("x".to_string())]);
        assert!(prog.diagnostics.is_empty());
    }

    #[test]
    fn parse_title_and_copyright_with_spaces() {
        let prog = parse_src("title : \"demo\"\ncopy_right: \"me\"\n");
        assert_eq!(
            prog.metadata,
            vec![
                Metadata::Title("demo".to_string()),
                Metadata::CopyRight("me".to_string())
            ]
        );
    }

    #[test]
    fn parse_title_without_string_is_error() {
        let prog = parse_src("title: piano\npiano: do");
        assert_eq!(prog.diagnostics.len(), 1);
        assert_eq!(prog.diagnostics[0].kind, ErrorKind::SyntaxError);
        // Recovery continues with the next line.
        assert_eq!(prog.tracks[0].movements.len(), 1);
    }

    #[test]
    fn parse_unterminated_title() {
        let prog = parse_src("title: \"oops");
        assert_eq!(prog.diagnostics.len(), 1);
        assert!(prog.diagnostics[0].message.contains("unterminated"));
    }

    #[test]
    fn parse_implicit_global_track() {
        let prog = parse_src("piano: do re mi\nviolin: sol");
        assert_eq!(prog.tracks.len(), 1);
        assert_eq!(prog.tracks[0].name, "global");
        assert_eq!(prog.tracks[0].movements.len(), 2);
        assert_eq!(prog.tracks[0].movements[1].instrument, "violin");
    }

    #[test]
    fn parse_custom_default_track_name() {
        let tokens = tokenize("piano: do").unwrap();
        let prog = Parser::with_default_track(tokens, "song").parse().unwrap();
        assert_eq!(prog.tracks[0].name, "song");
    }

    #[test]
    fn parse_explicit_tracks() {
        let src = "track \"intro\":\npiano: do\ntrack:\npiano: re\nviolin: mi";
        let prog = parse_src(src);
        assert!(prog.diagnostics.is_empty());
        assert_eq!(prog.tracks.len(), 2);
        assert_eq!(prog.tracks[0].name, "intro");
        assert_eq!(prog.tracks[1].name, "main");
        assert_eq!(prog.tracks[0].movements.len(), 1);
        assert_eq!(prog.tracks[1].movements.len(), 2);
        assert_eq!(
            prog.idents.get("violin"),
            Some(IdentEntry::Movement {
                track: 2,
                movement: 2
            })
        );
    }

    #[test]
    fn parse_track_missing_colon() {
        let prog = parse_src("track \"a\"\npiano: do");
        assert!(!prog.diagnostics.is_empty());
        assert_eq!(prog.diagnostics[0].kind, ErrorKind::SyntaxError);
    }

    #[test]
    fn parse_movement_before_track() {
        let prog = parse_src("piano: do\ntrack \"a\":\nviolin: re");
        assert_eq!(prog.diagnostics.len(), 1);
        assert!(prog.diagnostics[0].message.contains("before any track"));
        assert_eq!(prog.tracks.len(), 1);
        assert_eq!(prog.tracks[0].movements.len(), 1);
    }

    #[test]
    fn parse_macro_definition() {
        let prog = parse_src("m = do re mi");
        assert_eq!(prog.macros.len(), 1);
        assert_eq!(prog.macros[0].name, "m");
        assert!(prog.macros[0].params.is_empty());
        assert_eq!(prog.macros[0].body.len(), 3);
        assert_eq!(prog.idents.macro_index("m"), Some(1));
    }

    #[test]
    fn parse_macro_with_params() {
        let prog = parse_src("macro2 (arg1, arg2) = arg1 do re arg2");
        assert!(prog.diagnostics.is_empty());
        let def = &prog.macros[0];
        assert_eq!(def.params, vec!["arg1".to_string(), "arg2".to_string()]);
        assert_eq!(def.body.len(), 4);
        assert!(matches!(&def.body[0], Expr::Ident { name, .. } if name == "arg1"));
    }

    #[test]
    fn parse_macro_trailing_comma() {
        let prog = parse_src("m(a,) = a");
        assert_eq!(prog.diagnostics.len(), 1);
        assert!(prog.diagnostics[0].message.contains("trailing comma"));
        assert!(prog.macros.is_empty());
    }

    #[test]
    fn parse_macro_duplicate_param() {
        let prog = parse_src("m(a, a) = a");
        assert_eq!(prog.diagnostics.len(), 1);
        assert_eq!(prog.diagnostics[0].kind, ErrorKind::IdentifierError);
        assert_eq!(prog.macros[0].params, vec!["a".to_string()]);
    }

    #[test]
    fn parse_duplicate_macro_keeps_first() {
        let prog = parse_src("m = do\nm = re");
        assert_eq!(prog.diagnostics.len(), 1);
        assert_eq!(prog.diagnostics[0].kind, ErrorKind::IdentifierError);
        assert_eq!(prog.diagnostics[0].line, 2);
        assert_eq!(prog.macros.len(), 2);
        assert_eq!(prog.idents.macro_index("m"), Some(1));
    }

    #[test]
    fn parse_duplicate_movement_single_diagnostic() {
        let prog = parse_src("piano: do\npiano: re");
        assert_eq!(prog.diagnostics.len(), 1);
        assert_eq!(prog.diagnostics[0].kind, ErrorKind::IdentifierError);
    }

    #[test]
    fn parse_tagged_movements_are_distinct() {
        let prog = parse_src("piano: do\npiano \"left\": re\npiano \"right\" : mi");
        assert!(prog.diagnostics.is_empty());
        let movements = &prog.tracks[0].movements;
        assert_eq!(movements.len(), 3);
        assert_eq!(movements[1].tag.as_deref(), Some("left"));
        assert!(prog.idents.contains("piano \"right\""));
    }

    #[test]
    fn parse_same_movement_in_different_tracks() {
        let prog = parse_src("track \"a\":\npiano: do\ntrack \"b\":\npiano: re");
        assert!(prog.diagnostics.is_empty());
    }

    #[test]
    fn parse_macro_movement_collision() {
        let prog = parse_src("piano = do\npiano: re");
        assert_eq!(prog.diagnostics.len(), 1);
        assert_eq!(prog.diagnostics[0].kind, ErrorKind::IdentifierError);
    }

    #[test]
    fn parse_note_suffixes() {
        let exprs = body("piano: do+.4:4 re-.4:/4 mi--:3/8 fa");
        let n = note_of(&exprs[0]);
        assert_eq!(n.name, NoteName::Do);
        assert_eq!(n.semitone, 1);
        assert_eq!(n.octave, Some(4));
        assert_eq!(n.duration, Some(Duration::beats(4)));

        let n = note_of(&exprs[1]);
        assert_eq!(n.semitone, -1);
        assert_eq!(n.duration, Some(Duration::fraction(1, 4)));

        let n = note_of(&exprs[2]);
        assert_eq!(n.semitone, -2);
        assert_eq!(n.octave, None);
        assert_eq!(n.duration, Some(Duration::fraction(3, 8)));

        let n = note_of(&exprs[3]);
        assert_eq!(n.semitone, 0);
        assert_eq!(n.octave, None);
        assert_eq!(n.duration, None);
    }

    #[test]
    fn parse_rest() {
        let exprs = body("piano: r:2");
        let n = note_of(&exprs[0]);
        assert!(n.name.is_rest());
        assert_eq!(n.duration, Some(Duration::beats(2)));
    }

    #[test]
    fn parse_chords() {
        let exprs = body("piano: do/mi/sol.5:2 third/sol");
        match &exprs[0] {
            Expr::Chord { notes, .. } => {
                assert_eq!(notes.len(), 3);
                match &notes[2] {
                    ChordMember::Note(n) => {
                        assert_eq!(n.name, NoteName::Sol);
                        assert_eq!(n.octave, Some(5));
                        assert_eq!(n.duration, Some(Duration::beats(2)));
                    }
                    other => panic!("expected note, got {other:?}"),
                }
            }
            other => panic!("expected chord, got {other:?}"),
        }
        match &exprs[1] {
            Expr::Chord { notes, .. } => {
                assert!(matches!(&notes[0], ChordMember::Ident { name, .. } if name == "third"));
            }
            other => panic!("expected chord, got {other:?}"),
        }
    }

    #[test]
    fn parse_chord_with_dangling_slash() {
        let prog = parse_src("piano: do/ re");
        assert_eq!(prog.diagnostics.len(), 1);
        assert!(matches!(
            prog.tracks[0].movements[0].expressions[0],
            Expr::Error { .. }
        ));
    }

    #[test]
    fn bare_octave_arrow_has_zero_amount() {
        let exprs = body("piano: > do");
        assert!(matches!(
            exprs[0],
            Expr::SetOctave {
                direction: Direction::Up,
                amount: 0,
                ..
            }
        ));
        assert!(exprs[1].as_note().is_some());
    }

    #[test]
    fn parse_settings() {
        let exprs = body("piano: v=80 +fa -si >2 < :2 :3/4 !3/4 ^120 | 4");
        assert!(matches!(exprs[0], Expr::SetVolume { value: 80, .. }));
        assert!(matches!(
            exprs[1],
            Expr::SetTone {
                direction: Direction::Up,
                note: NoteName::Fa,
                ..
            }
        ));
        assert!(matches!(
            exprs[2],
            Expr::SetTone {
                direction: Direction::Down,
                note: NoteName::Si,
                ..
            }
        ));
        assert!(matches!(
            exprs[3],
            Expr::SetOctave {
                direction: Direction::Up,
                amount: 2,
                ..
            }
        ));
        assert!(matches!(
            exprs[4],
            Expr::SetOctave {
                direction: Direction::Down,
                amount: 0,
                ..
            }
        ));
        assert!(matches!(exprs[5], Expr::SetDuration { value, .. } if value == Duration::beats(2)));
        assert!(
            matches!(exprs[6], Expr::SetDuration { value, .. } if value == Duration::fraction(3, 4))
        );
        assert!(matches!(
            exprs[7],
            Expr::SetMeasure {
                beats: 3,
                unit: 4,
                ..
            }
        ));
        assert!(matches!(exprs[8], Expr::SetTempo { bpm: 120, .. }));
        assert!(matches!(exprs[9], Expr::Bar { .. }));
        assert!(matches!(exprs[10], Expr::SetInterval { value: 4, .. }));
    }

    #[test]
    fn parse_volume_aliases() {
        let exprs = body("piano: vol=10 volume=20");
        assert!(matches!(exprs[0], Expr::SetVolume { value: 10, .. }));
        assert!(matches!(exprs[1], Expr::SetVolume { value: 20, .. }));
    }

    #[test]
    fn parse_measure_requires_unit() {
        let prog = parse_src("piano: !3 do");
        assert_eq!(prog.diagnostics.len(), 1);
        assert!(prog.diagnostics[0].message.contains("'/'"));
    }

    #[test]
    fn parse_repetition_after_expression() {
        let exprs = body("piano: do*3 [re mi]*2");
        assert_eq!(exprs.len(), 4);
        assert!(matches!(exprs[1], Expr::Repetition { count: 3, .. }));
        assert!(matches!(exprs[2], Expr::Group { .. }));
        assert!(matches!(exprs[3], Expr::Repetition { count: 2, .. }));
    }

    #[test]
    fn parse_repetition_without_expression() {
        let prog = parse_src("piano: *3 do");
        assert_eq!(prog.diagnostics.len(), 1);
        assert!(prog.diagnostics[0].message.contains("'*' must follow"));
    }

    #[test]
    fn parse_repetition_at_group_start() {
        let prog = parse_src("piano: do [*2 re] mi");
        assert_eq!(prog.diagnostics.len(), 1);
        // The group recovers at its ']' and the body keeps going.
        let exprs = &prog.tracks[0].movements[0].expressions;
        assert_eq!(exprs.len(), 3);
        assert!(matches!(exprs[2], Expr::Note(_)));
    }

    #[test]
    fn parse_hold_and_release() {
        let exprs = body("piano: (do/mi re)");
        assert_eq!(exprs.len(), 3);
        match &exprs[0] {
            Expr::Hold { inner, .. } => assert!(matches!(**inner, Expr::Chord { .. })),
            other => panic!("expected hold, got {other:?}"),
        }
        assert!(matches!(exprs[2], Expr::Release { .. }));
    }

    #[test]
    fn parse_release_without_expression() {
        let prog = parse_src("piano: ) do");
        assert_eq!(prog.diagnostics.len(), 1);
        assert_eq!(prog.diagnostics[0].kind, ErrorKind::SyntaxError);
    }

    #[test]
    fn parse_hold_rejects_settings() {
        let prog = parse_src("piano: (|");
        assert_eq!(prog.diagnostics.len(), 1);
    }

    #[test]
    fn parse_group_spans_lines() {
        let exprs = body("piano: [\n  +do\n  -re\n  <4 m\n] mi");
        assert_eq!(exprs.len(), 2);
        match &exprs[0] {
            Expr::Group { items, .. } => assert_eq!(items.len(), 4),
            other => panic!("expected group, got {other:?}"),
        }
    }

    #[test]
    fn parse_nested_groups() {
        let exprs = body("piano: [[do re] mi]");
        match &exprs[0] {
            Expr::Group { items, .. } => {
                assert!(matches!(items[0], Expr::Group { .. }));
                assert!(matches!(items[1], Expr::Note(_)));
            }
            other => panic!("expected group, got {other:?}"),
        }
    }

    #[test]
    fn parse_unterminated_group() {
        let prog = parse_src("piano: [do re\nviolin: mi");
        assert!(prog
            .diagnostics
            .iter()
            .any(|d| d.message.contains("unterminated expression group")));
    }

    #[test]
    fn parse_macro_calls() {
        let exprs = body("piano: m(do, [re mi]) n() k");
        match &exprs[0] {
            Expr::MacroCall { name, args, .. } => {
                assert_eq!(name, "m");
                assert_eq!(args.len(), 2);
                assert!(matches!(args[1], Expr::Group { .. }));
            }
            other => panic!("expected call, got {other:?}"),
        }
        assert!(matches!(&exprs[1], Expr::MacroCall { args, .. } if args.is_empty()));
        assert!(matches!(&exprs[2], Expr::Ident { name, .. } if name == "k"));
    }

    #[test]
    fn parse_call_with_bad_separator_recovers_at_paren() {
        let prog = parse_src("piano: m(do re) mi");
        assert_eq!(prog.diagnostics.len(), 1);
        let exprs = &prog.tracks[0].movements[0].expressions;
        assert_eq!(exprs.len(), 2);
        assert!(matches!(exprs[1], Expr::Note(_)));
    }

    #[test]
    fn parse_semicolon_ends_statement() {
        let prog = parse_src("m = do re; piano: m");
        assert!(prog.diagnostics.is_empty());
        assert_eq!(prog.macros[0].body.len(), 2);
        assert_eq!(prog.tracks[0].movements.len(), 1);
    }

    #[test]
    fn parse_note_at_statement_start_is_error() {
        let prog = parse_src("do re mi\npiano: fa");
        assert_eq!(prog.diagnostics.len(), 1);
        assert!(prog.diagnostics[0].tip.is_some());
        assert_eq!(prog.tracks[0].movements.len(), 1);
    }

    #[test]
    fn parse_collects_multiple_errors() {
        let prog = parse_src("piano: do ^\nviolin: *2\n]\ncello: mi");
        assert_eq!(prog.diagnostics.len(), 3);
        assert_eq!(prog.diagnostics[0].line, 1);
        assert_eq!(prog.diagnostics[1].line, 2);
        assert_eq!(prog.diagnostics[2].line, 3);
        assert_eq!(prog.tracks[0].movements.len(), 3);
    }

    #[test]
    fn parse_error_positions() {
        let prog = parse_src("piano: do ^x");
        let diag = &prog.diagnostics[0];
        assert_eq!((diag.line, diag.col), (1, 12));
    }

    #[test]
    fn parse_tokens_without_eof() {
        let tokens = vec![
            Token::new("piano", TokenKind::Alphanum, 1, 1),
            Token::new(":", TokenKind::Colon, 1, 6),
            Token::new("do", TokenKind::Do, 1, 7),
        ];
        let prog = parse(tokens).unwrap();
        assert!(prog.diagnostics.is_empty());
        assert_eq!(prog.tracks[0].movements[0].expressions.len(), 1);
    }
}
