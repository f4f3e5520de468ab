//! Query parameter lexer: tokenizes a parameter value.
//!
//! Positions are character offsets, shifted by the offset the caller passes
//! so that errors point into the original parameter text.

use super::ParseError;

/// A token from the lexer.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
    /// Unquoted text; for quoted text the unescaped contents.
    pub text: String,
}

/// Source span in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

/// Token kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    OpenParen,
    CloseParen,
    Comma,
    Period,
    Colon,
    /// `'...'` with `''` as an escaped quote.
    QuotedText,
    /// Identifiers, keywords, numbers and bare values.
    Text,
    Eof,
}

impl TokenKind {
    pub fn describe(self) -> &'static str {
        match self {
            TokenKind::OpenParen => "(",
            TokenKind::CloseParen => ")",
            TokenKind::Comma => ",",
            TokenKind::Period => ".",
            TokenKind::Colon => ":",
            TokenKind::QuotedText => "quoted text",
            TokenKind::Text => "text",
            TokenKind::Eof => "end of expression",
        }
    }
}

fn is_structural(ch: char) -> bool {
    matches!(ch, '(' | ')' | ',' | '.' | ':' | '\'')
}

/// Tokenize a parameter value, numbering positions from `offset`.
pub fn tokenize(input: &str, offset: usize) -> Result<Vec<Token>, ParseError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().enumerate().peekable();

    while let Some(&(index, ch)) = chars.peek() {
        let pos = offset + index;
        let single = |kind| Token {
            kind,
            span: Span { start: pos, end: pos + 1 },
            text: ch.to_string(),
        };
        match ch {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => { chars.next(); tokens.push(single(TokenKind::OpenParen)); }
            ')' => { chars.next(); tokens.push(single(TokenKind::CloseParen)); }
            ',' => { chars.next(); tokens.push(single(TokenKind::Comma)); }
            '.' => { chars.next(); tokens.push(single(TokenKind::Period)); }
            ':' => { chars.next(); tokens.push(single(TokenKind::Colon)); }
            '\'' => {
                chars.next();
                let mut text = String::new();
                let mut closed_at = None;
                while let Some((i, c)) = chars.next() {
                    if c == '\'' {
                        if matches!(chars.peek(), Some(&(_, '\''))) {
                            chars.next();
                            text.push('\'');
                        } else {
                            closed_at = Some(offset + i);
                            break;
                        }
                    } else {
                        text.push(c);
                    }
                }
                let Some(close) = closed_at else {
                    return Err(ParseError::syntax(pos, "Unterminated quoted text."));
                };
                tokens.push(Token {
                    kind: TokenKind::QuotedText,
                    span: Span { start: pos, end: close + 1 },
                    text,
                });
            }
            _ => {
                let mut text = String::new();
                let mut last = index;
                while let Some(&(i, c)) = chars.peek() {
                    if c.is_whitespace() {
                        break;
                    }
                    if is_structural(c) {
                        // Keep the decimal point of a number such as `2.5`.
                        let digits = text.trim_start_matches('-');
                        let numeric = !digits.is_empty() && digits.chars().all(|d| d.is_ascii_digit());
                        let digit_follows = chars.clone().nth(1).is_some_and(|(_, d)| d.is_ascii_digit());
                        if !(c == '.' && numeric && digit_follows) {
                            break;
                        }
                    }
                    text.push(c);
                    last = i;
                    chars.next();
                }
                tokens.push(Token {
                    kind: TokenKind::Text,
                    span: Span { start: pos, end: offset + last + 1 },
                    text,
                });
            }
        }
    }

    let eof_at = offset + input.chars().count();
    tokens.push(Token {
        kind: TokenKind::Eof,
        span: Span { start: eof_at, end: eof_at },
        text: String::new(),
    });
    Ok(tokens)
}
