//! Lexer (tokenizer) for filter text.

use std::iter::Peekable;
use std::str::Chars;

use super::error::{FilterError, FilterResult};

/// A token with its position in the input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionedToken {
    /// The token.
    pub token: FilterToken,
    /// The byte position where the token starts (0-indexed).
    pub position: usize,
}

/// A token in filter text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterToken {
    // ==================== Operands ====================
    /// A bare word that is not a keyword (a field name).
    Ident(String),

    /// A quoted string literal, escapes resolved.
    Str(String),

    /// An integer literal.
    Int(i64),

    /// The `true` keyword.
    True,

    /// The `false` keyword.
    False,

    /// The `null` keyword.
    Null,

    // ==================== Comparison Operators ====================
    /// `==` or `=`.
    Eq,

    /// `!=`.
    Ne,

    /// `<`.
    Lt,

    /// `<=`.
    Le,

    /// `>`.
    Gt,

    /// `>=`.
    Ge,

    /// The `contains` keyword.
    Contains,

    /// The `startswith` keyword.
    StartsWith,

    /// The `endswith` keyword.
    EndsWith,

    /// The `matches` keyword.
    Matches,

    // ==================== Boolean Operators ====================
    /// `&`, `&&` or `and`.
    And,

    /// `|`, `||` or `or`.
    Or,

    /// `!` or `not`.
    Not,

    /// Opening parenthesis `(`.
    OpenParen,

    /// Closing parenthesis `)`.
    CloseParen,
}

/// Lexer for tokenizing filter text.
pub struct Lexer<'a> {
    chars: Peekable<Chars<'a>>,
    /// Current byte position in the input string.
    position: usize,
}

impl<'a> Lexer<'a> {
    /// Creates a new lexer for the given input string.
    pub fn new(input: &'a str) -> Self {
        Self {
            chars: input.chars().peekable(),
            position: 0,
        }
    }

    /// Tokenizes the whole input.
    ///
    /// # Errors
    ///
    /// Returns the first lexical error: an unknown character, an unterminated
    /// string or an integer that does not fit in 64 bits.
    pub fn tokenize(mut self) -> FilterResult<Vec<PositionedToken>> {
        let mut tokens = Vec::new();
        while let Some(token) = self.next_token()? {
            tokens.push(token);
        }
        Ok(tokens)
    }

    /// Peeks at the next character without consuming it.
    fn peek(&mut self) -> Option<&char> {
        self.chars.peek()
    }

    /// Consumes and returns the next character, updating position.
    fn next_char(&mut self) -> Option<char> {
        let c = self.chars.next();
        if let Some(ch) = c {
            self.position += ch.len_utf8();
        }
        c
    }

    /// Consumes the next character if it equals `expected`.
    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(&expected) {
            self.next_char();
            true
        } else {
            false
        }
    }

    /// Skips whitespace characters.
    fn skip_whitespace(&mut self) {
        while let Some(&c) = self.peek() {
            if c.is_whitespace() {
                self.next_char();
            } else {
                break;
            }
        }
    }

    /// Reads an identifier (alphanumeric word).
    fn read_identifier(&mut self) -> String {
        let mut ident = String::new();
        while let Some(&c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                ident.push(c);
                self.next_char();
            } else {
                break;
            }
        }
        ident
    }

    /// Reads a quoted string (single or double quotes).
    fn read_quoted_string(&mut self, quote_char: char) -> FilterResult<String> {
        let start = self.position;
        // Consume the opening quote
        self.next_char();

        let mut result = String::new();
        loop {
            match self.next_char() {
                None => return Err(FilterError::UnterminatedString { position: start }),
                Some(c) if c == quote_char => return Ok(result),
                // Only the quote and the backslash itself are escapable, so
                // regex classes such as `\d` pass through untouched.
                Some('\\') => match self.next_char() {
                    Some(escaped) if escaped == quote_char || escaped == '\\' => {
                        result.push(escaped)
                    }
                    Some(other) => {
                        result.push('\\');
                        result.push(other);
                    }
                    None => return Err(FilterError::UnterminatedString { position: start }),
                },
                Some(c) => result.push(c),
            }
        }
    }

    /// Reads an integer literal, with an optional leading minus sign.
    fn read_integer(&mut self) -> FilterResult<i64> {
        let start = self.position;
        let mut literal = String::new();
        if self.eat('-') {
            literal.push('-');
            if !self.peek().is_some_and(|c| c.is_ascii_digit()) {
                return Err(FilterError::UnexpectedCharacter {
                    character: '-',
                    position: start,
                });
            }
        }
        while let Some(&c) = self.peek() {
            if c.is_ascii_digit() || c == '_' {
                if c != '_' {
                    literal.push(c);
                }
                self.next_char();
            } else {
                break;
            }
        }
        literal
            .parse::<i64>()
            .map_err(|_| FilterError::IntegerOutOfRange { literal })
    }

    /// Returns the next token with its position, or None if at end of input.
    pub fn next_token(&mut self) -> FilterResult<Option<PositionedToken>> {
        self.skip_whitespace();

        let Some(&c) = self.peek() else {
            return Ok(None);
        };
        let position = self.position;

        let token = match c {
            '&' => {
                self.next_char();
                self.eat('&');
                FilterToken::And
            }
            '|' => {
                self.next_char();
                self.eat('|');
                FilterToken::Or
            }
            '!' => {
                self.next_char();
                if self.eat('=') {
                    FilterToken::Ne
                } else {
                    FilterToken::Not
                }
            }
            '=' => {
                self.next_char();
                self.eat('=');
                FilterToken::Eq
            }
            '<' => {
                self.next_char();
                if self.eat('=') {
                    FilterToken::Le
                } else {
                    FilterToken::Lt
                }
            }
            '>' => {
                self.next_char();
                if self.eat('=') {
                    FilterToken::Ge
                } else {
                    FilterToken::Gt
                }
            }
            '(' => {
                self.next_char();
                FilterToken::OpenParen
            }
            ')' => {
                self.next_char();
                FilterToken::CloseParen
            }
            '"' | '\'' => FilterToken::Str(self.read_quoted_string(c)?),
            '-' | '0'..='9' => FilterToken::Int(self.read_integer()?),
            _ if c.is_alphabetic() || c == '_' => {
                let ident = self.read_identifier();
                keyword(&ident).unwrap_or(FilterToken::Ident(ident))
            }
            _ => {
                return Err(FilterError::UnexpectedCharacter {
                    character: c,
                    position,
                })
            }
        };

        Ok(Some(PositionedToken { token, position }))
    }
}

/// Maps a word to its keyword token (case-insensitive).
fn keyword(word: &str) -> Option<FilterToken> {
    let token = match word.to_lowercase().as_str() {
        "and" => FilterToken::And,
        "or" => FilterToken::Or,
        "not" => FilterToken::Not,
        "true" => FilterToken::True,
        "false" => FilterToken::False,
        "null" => FilterToken::Null,
        "contains" => FilterToken::Contains,
        "startswith" => FilterToken::StartsWith,
        "endswith" => FilterToken::EndsWith,
        "matches" => FilterToken::Matches,
        _ => return None,
    };
    Some(token)
}
