//! Lexer for the solfa language.
//!
//! Converts source text into a stream of [`Token`]s. Spaces and newlines are
//! kept as tokens because the grammar uses them as terminators.

use super::error::CompileError;
use super::token::{Token, TokenKind};

pub struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    col: usize,
}

impl Lexer {
    pub fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            col: 1,
        }
    }

    pub fn tokenize(&mut self) -> Result<Vec<Token>, CompileError> {
        let mut tokens = Vec::new();

        while !self.is_at_end() {
            let ch = self.peek();

            if ch == '#' {
                self.skip_comment();
                continue;
            }

            let token = match ch {
                ' ' | '\t' | '\r' => self.lex_space(),
                '\n' => {
                    let token = Token::new("\n", TokenKind::Newline, self.line, self.col);
                    self.advance();
                    token
                }
                '"' => self.lex_string(),
                '0'..='9' => self.lex_number(),
                'a'..='z' | 'A'..='Z' | '_' => self.lex_ident_or_keyword(),
                _ => match TokenKind::delimiter(ch) {
                    Some(kind) => self.single_char(kind),
                    None => return Err(CompileError::lex(ch, self.line, self.col)),
                },
            };

            tokens.push(token);
        }

        tokens.push(Token::new("", TokenKind::Eof, self.line, self.col));
        Ok(tokens)
    }

    fn peek(&self) -> char {
        self.chars[self.pos]
    }

    fn peek_next(&self) -> Option<char> {
        self.chars.get(self.pos + 1).copied()
    }

    fn advance(&mut self) -> char {
        let ch = self.chars[self.pos];
        self.pos += 1;
        if ch == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        ch
    }

    fn is_at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    /// Comments run to the end of the line; the newline itself is kept.
    fn skip_comment(&mut self) {
        while !self.is_at_end() && self.peek() != '\n' {
            self.advance();
        }
    }

    fn single_char(&mut self, kind: TokenKind) -> Token {
        let line = self.line;
        let col = self.col;
        let ch = self.advance();
        Token::new(ch.to_string(), kind, line, col)
    }

    fn lex_space(&mut self) -> Token {
        let line = self.line;
        let col = self.col;
        let mut s = String::new();
        while !self.is_at_end() && matches!(self.peek(), ' ' | '\t' | '\r') {
            s.push(self.advance());
        }
        Token::new(s, TokenKind::Space, line, col)
    }

    /// Reads a string literal, quotes included. A backslash skips the next
    /// character. Unterminated strings run to the end of input and are left
    /// for the parser to report.
    fn lex_string(&mut self) -> Token {
        let line = self.line;
        let col = self.col;
        let mut s = String::new();
        s.push(self.advance()); // consume opening '"'
        while !self.is_at_end() {
            let ch = self.advance();
            s.push(ch);
            match ch {
                '\\' if !self.is_at_end() => s.push(self.advance()),
                '"' => break,
                _ => {}
            }
        }
        Token::new(s, TokenKind::Str, line, col)
    }

    fn lex_number(&mut self) -> Token {
        let line = self.line;
        let col = self.col;
        let mut s = String::new();

        while !self.is_at_end() && self.peek().is_ascii_digit() {
            s.push(self.advance());
        }

        // Tolerated `ms` suffix, kept in the text but not used numerically.
        if !self.is_at_end() && self.peek() == 'm' && self.peek_next() == Some('s') {
            s.push(self.advance());
            s.push(self.advance());
        }

        Token::new(s, TokenKind::Number, line, col)
    }

    fn lex_ident_or_keyword(&mut self) -> Token {
        let line = self.line;
        let col = self.col;
        let mut s = String::new();

        while !self.is_at_end() && (self.peek().is_ascii_alphanumeric() || self.peek() == '_') {
            s.push(self.advance());
        }

        let kind = TokenKind::keyword(&s).unwrap_or(TokenKind::Alphanum);
        Token::new(s, kind, line, col)
    }
}

/// Tokenize `source` in one pass.
pub fn tokenize(source: &str) -> Result<Vec<Token>, CompileError> {
    Lexer::new(source).tokenize()
}
