//! Token types for the solfa lexer.

use std::fmt;

use serde::Serialize;

/// A token produced by the lexer.
///
/// `text` is the exact source slice the token was read from (string
/// literals keep their quotes). Positions are 1-based.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Token {
    pub text: String,
    pub kind: TokenKind,
    pub line: usize,
    pub col: usize,
}

/// The kind of token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TokenKind {
    // Delimiters
    LBrace,
    RBrace,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Colon,
    Comma,
    Pipe,
    Slash,
    Bang,
    Eq,
    Caret,
    Dot,
    Dash,
    Plus,
    Greater,
    Less,
    Asterisk,
    Semicolon,

    // Literals
    Alphanum,
    Number,
    Str,

    // Whitespace
    Space,
    Newline,

    // Notes
    Do,
    Re,
    Mi,
    Fa,
    Sol,
    La,
    Si,
    Rest,

    // Keywords
    Title,
    CopyRight,
    Track,
    Volume,

    Eof,
}

impl TokenKind {
    /// Map a reserved word to its keyword kind.
    pub fn keyword(word: &str) -> Option<TokenKind> {
        let kind = match word {
            "title" => TokenKind::Title,
            "copy_right" => TokenKind::CopyRight,
            "track" => TokenKind::Track,
            "v" | "V" | "vol" | "volume" => TokenKind::Volume,
            "do" => TokenKind::Do,
            "re" => TokenKind::Re,
            "mi" => TokenKind::Mi,
            "fa" => TokenKind::Fa,
            "sol" => TokenKind::Sol,
            "la" => TokenKind::La,
            "si" => TokenKind::Si,
            "r" => TokenKind::Rest,
            _ => return None,
        };
        Some(kind)
    }

    /// Map a single delimiter character to its kind.
    pub fn delimiter(ch: char) -> Option<TokenKind> {
        let kind = match ch {
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            ':' => TokenKind::Colon,
            ',' => TokenKind::Comma,
            '|' => TokenKind::Pipe,
            '/' => TokenKind::Slash,
            '!' => TokenKind::Bang,
            '=' => TokenKind::Eq,
            '^' => TokenKind::Caret,
            '.' => TokenKind::Dot,
            '-' => TokenKind::Dash,
            '+' => TokenKind::Plus,
            '>' => TokenKind::Greater,
            '<' => TokenKind::Less,
            '*' => TokenKind::Asterisk,
            ';' => TokenKind::Semicolon,
            _ => return None,
        };
        Some(kind)
    }

    pub fn is_note(self) -> bool {
        matches!(
            self,
            TokenKind::Do
                | TokenKind::Re
                | TokenKind::Mi
                | TokenKind::Fa
                | TokenKind::Sol
                | TokenKind::La
                | TokenKind::Si
                | TokenKind::Rest
        )
    }

    /// Newline, `;` and end of file close a statement.
    pub fn ends_statement(self) -> bool {
        matches!(
            self,
            TokenKind::Newline | TokenKind::Semicolon | TokenKind::Eof
        )
    }
}

impl Token {
    pub fn new(text: impl Into<String>, kind: TokenKind, line: usize, col: usize) -> Self {
        Self {
            text: text.into(),
            kind,
            line,
            col,
        }
    }

    /// Numeric value of a `Number` token, ignoring a trailing `ms`.
    pub fn number(&self) -> Option<u32> {
        if self.kind != TokenKind::Number {
            return None;
        }
        self.text.trim_end_matches("ms").parse().ok()
    }

    /// Contents of a string literal without the surrounding quotes.
    pub fn unquoted(&self) -> &str {
        let inner = self.text.strip_prefix('"').unwrap_or(&self.text);
        inner.strip_suffix('"').unwrap_or(inner)
    }

    /// Whether a string literal reached its closing quote.
    pub fn is_terminated_string(&self) -> bool {
        if self.kind != TokenKind::Str {
            return false;
        }
        let mut chars = self.text.chars().skip(1);
        while let Some(ch) = chars.next() {
            match ch {
                '\\' => {
                    chars.next();
                }
                '"' => return true,
                _ => {}
            }
        }
        false
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            TokenKind::Eof => write!(f, "end of file"),
            TokenKind::Newline => write!(f, "newline"),
            TokenKind::Space => write!(f, "space"),
            _ => write!(f, "'{}'", self.text),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyword_table() {
        assert_eq!(TokenKind::keyword("title"), Some(TokenKind::Title));
        assert_eq!(TokenKind::keyword("vol"), Some(TokenKind::Volume));
        assert_eq!(TokenKind::keyword("sol"), Some(TokenKind::Sol));
        assert_eq!(TokenKind::keyword("r"), Some(TokenKind::Rest));
        assert_eq!(TokenKind::keyword("piano"), None);
    }

    #[test]
    fn number_ignores_ms_suffix() {
        let token = Token::new("250ms", TokenKind::Number, 1, 1);
        assert_eq!(token.number(), Some(250));
    }

    #[test]
    fn unquoted_string() {
        let token = Token::new("\"demo\"", TokenKind::Str, 1, 1);
        assert_eq!(token.unquoted(), "demo");
        assert!(token.is_terminated_string());

        let open = Token::new("\"demo", TokenKind::Str, 1, 1);
        assert!(!open.is_terminated_string());
    }
}
