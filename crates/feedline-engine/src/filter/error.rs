//! Error types for filter parsing and query-text evaluation.

use thiserror::Error;

/// A specialized Result type for filter operations.
pub type FilterResult<T> = Result<T, FilterError>;

/// Errors that can occur while parsing filter text or query text.
///
/// Compilation never produces these: an expression that cannot be compiled
/// degrades to a contradiction instead.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FilterError {
    /// The filter expression is empty.
    #[error("filter expression is empty")]
    EmptyExpression,

    /// An unexpected token was encountered during parsing.
    #[error("unexpected token: {token}")]
    UnexpectedToken {
        /// The unexpected token that was encountered.
        token: String,
    },

    /// An unexpected end of input was encountered.
    #[error("unexpected end of expression")]
    UnexpectedEndOfInput,

    /// An unclosed parenthesis was found.
    #[error("unclosed parenthesis")]
    UnclosedParenthesis,

    /// A character that cannot start any token.
    #[error("unexpected character '{character}' at position {position}")]
    UnexpectedCharacter {
        /// The offending character.
        character: char,
        /// Byte offset of the character in the input.
        position: usize,
    },

    /// A string literal without its closing quote.
    #[error("unterminated string starting at position {position}")]
    UnterminatedString {
        /// Byte offset of the opening quote.
        position: usize,
    },

    /// An integer literal that does not fit in 64 bits.
    #[error("integer out of range: {literal}")]
    IntegerOutOfRange {
        /// The literal as written.
        literal: String,
    },

    /// The expression nests deeper than the parser accepts.
    #[error("expression is nested more than {max} levels deep")]
    TooDeep {
        /// The depth limit.
        max: usize,
    },

    /// A name that is not a filterable field.
    #[error("{}", format_unknown_field(name, suggestion.as_deref()))]
    UnknownField {
        /// The name as written.
        name: String,
        /// The closest known field name, if any is close enough.
        suggestion: Option<String>,
    },
}

fn format_unknown_field(name: &str, suggestion: Option<&str>) -> String {
    match suggestion {
        Some(s) => format!("unknown field: {name}. Did you mean '{s}'?"),
        None => format!("unknown field: {name}"),
    }
}

impl FilterError {
    /// Creates an unexpected token error.
    pub fn unexpected_token(token: impl Into<String>) -> Self {
        FilterError::UnexpectedToken {
            token: token.into(),
        }
    }

    /// Creates an unknown field error.
    pub fn unknown_field(name: impl Into<String>, suggestion: Option<String>) -> Self {
        FilterError::UnknownField {
            name: name.into(),
            suggestion,
        }
    }
}
