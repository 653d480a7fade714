//! Recursive descent parser for filter text.

use feedline_types::Field;
use strsim::levenshtein;

use super::ast::{CompareOp, FilterExpression, Value, MAX_EXPRESSION_DEPTH};
use super::error::{FilterError, FilterResult};
use super::lexer::{FilterToken, Lexer};

/// Maximum Levenshtein distance to consider a field name as a suggestion.
const MAX_SUGGESTION_DISTANCE: usize = 3;

/// Parser for user-authored filter text.
///
/// # Grammar
///
/// ```text
/// expression ::= or_expr
/// or_expr    ::= and_expr (("|" | "||" | "or") and_expr)*
/// and_expr   ::= unary_expr (("&" | "&&" | "and") unary_expr)*
/// unary_expr ::= ("!" | "not") unary_expr | primary
/// primary    ::= "(" expression ")" | "true" | "false" | comparison
/// comparison ::= field [operator value]
/// operator   ::= "==" | "!=" | "<" | "<=" | ">" | ">="
///              | "contains" | "startswith" | "endswith" | "matches"
/// value      ::= string | integer | "true" | "false" | "null"
/// ```
///
/// A bare field is shorthand for `field == true`.
///
/// Expressions deeper than [`MAX_EXPRESSION_DEPTH`] are rejected, whether
/// the depth comes from nesting or from a long chain of `&&` or `||`.
///
/// # Operator Precedence (highest to lowest)
///
/// 1. `!` (NOT) - unary
/// 2. `&` (AND) - binary, left-associative
/// 3. `|` (OR) - binary, left-associative
///
/// # Example
///
/// ```
/// use feedline_engine::filter::{FilterExpression, FilterParser};
///
/// let expr = FilterParser::parse(r#"author == "alice" AND has_media"#).unwrap();
/// assert!(matches!(expr, FilterExpression::And(_, _)));
/// ```
pub struct FilterParser {
    tokens: Vec<FilterToken>,
    position: usize,
    /// Open `!` and parenthesis levels on the parser's own stack.
    nesting: usize,
}

/// A parsed subtree and its depth.
type Parsed = (FilterExpression, usize);

impl FilterParser {
    /// Parses filter text into a [`FilterExpression`].
    ///
    /// # Errors
    ///
    /// Returns `FilterError::EmptyExpression` if the input is blank,
    /// `FilterError::UnknownField` for names that are not item fields, and the
    /// usual syntax errors for malformed input.
    pub fn parse(input: &str) -> FilterResult<FilterExpression> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(FilterError::EmptyExpression);
        }

        let tokens: Vec<FilterToken> = Lexer::new(trimmed)
            .tokenize()?
            .into_iter()
            .map(|t| t.token)
            .collect();

        let mut parser = Self {
            tokens,
            position: 0,
            nesting: 0,
        };
        let (expr, _) = parser.parse_expression()?;

        // Check that we consumed all tokens
        if let Some(remaining) = parser.peek() {
            return Err(FilterError::unexpected_token(describe(remaining)));
        }

        Ok(expr)
    }

    /// Returns the current token without consuming it.
    fn peek(&self) -> Option<&FilterToken> {
        self.tokens.get(self.position)
    }

    /// Consumes and returns the current token.
    fn advance(&mut self) -> Option<FilterToken> {
        let token = self.tokens.get(self.position).cloned();
        if token.is_some() {
            self.position += 1;
        }
        token
    }

    /// Checks if the current token matches the expected token type.
    fn check(&self, expected: &FilterToken) -> bool {
        self.peek() == Some(expected)
    }

    fn parse_expression(&mut self) -> FilterResult<Parsed> {
        self.parse_or_expr()
    }

    fn parse_or_expr(&mut self) -> FilterResult<Parsed> {
        let (mut left, mut depth) = self.parse_and_expr()?;

        while self.check(&FilterToken::Or) {
            self.advance();
            let (right, right_depth) = self.parse_and_expr()?;
            depth = deeper(depth, right_depth)?;
            left = FilterExpression::or(left, right);
        }

        Ok((left, depth))
    }

    fn parse_and_expr(&mut self) -> FilterResult<Parsed> {
        let (mut left, mut depth) = self.parse_unary_expr()?;

        while self.check(&FilterToken::And) {
            self.advance();
            let (right, right_depth) = self.parse_unary_expr()?;
            depth = deeper(depth, right_depth)?;
            left = FilterExpression::and(left, right);
        }

        Ok((left, depth))
    }

    fn parse_unary_expr(&mut self) -> FilterResult<Parsed> {
        if self.check(&FilterToken::Not) {
            self.advance();
            self.enter()?;
            let (inner, depth) = self.parse_unary_expr()?;
            self.nesting -= 1;
            return Ok((FilterExpression::negate(inner), deeper(depth, 0)?));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> FilterResult<Parsed> {
        let token = self.advance().ok_or(FilterError::UnexpectedEndOfInput)?;

        match token {
            FilterToken::OpenParen => {
                self.enter()?;
                let inner = self.parse_expression()?;
                self.nesting -= 1;
                if !self.check(&FilterToken::CloseParen) {
                    return Err(FilterError::UnclosedParenthesis);
                }
                self.advance();
                Ok(inner)
            }
            FilterToken::True => Ok((FilterExpression::Literal(true), 1)),
            FilterToken::False => Ok((FilterExpression::Literal(false), 1)),
            FilterToken::Ident(name) => Ok((self.parse_comparison(&name)?, 1)),
            other => Err(FilterError::unexpected_token(describe(&other))),
        }
    }

    fn enter(&mut self) -> FilterResult<()> {
        self.nesting += 1;
        if self.nesting > MAX_EXPRESSION_DEPTH {
            return Err(FilterError::TooDeep {
                max: MAX_EXPRESSION_DEPTH,
            });
        }
        Ok(())
    }

    /// Parses the remainder of a comparison after its field name.
    fn parse_comparison(&mut self, name: &str) -> FilterResult<FilterExpression> {
        let field = resolve_field(name)?;

        let Some(op) = self.peek().and_then(comparison_operator) else {
            return Ok(FilterExpression::compare(
                field,
                CompareOp::Eq,
                Value::Bool(true),
            ));
        };
        self.advance();

        let value = match self.advance().ok_or(FilterError::UnexpectedEndOfInput)? {
            FilterToken::Str(s) => Value::Text(s),
            FilterToken::Int(n) => Value::Integer(n),
            FilterToken::True => Value::Bool(true),
            FilterToken::False => Value::Bool(false),
            FilterToken::Null => Value::Null,
            other => return Err(FilterError::unexpected_token(describe(&other))),
        };

        Ok(FilterExpression::compare(field, op, value))
    }
}

/// Depth of a node over children of the given depths.
fn deeper(left: usize, right: usize) -> FilterResult<usize> {
    let depth = left.max(right) + 1;
    if depth > MAX_EXPRESSION_DEPTH {
        return Err(FilterError::TooDeep {
            max: MAX_EXPRESSION_DEPTH,
        });
    }
    Ok(depth)
}

fn comparison_operator(token: &FilterToken) -> Option<CompareOp> {
    let op = match token {
        FilterToken::Eq => CompareOp::Eq,
        FilterToken::Ne => CompareOp::Ne,
        FilterToken::Lt => CompareOp::Lt,
        FilterToken::Le => CompareOp::Le,
        FilterToken::Gt => CompareOp::Gt,
        FilterToken::Ge => CompareOp::Ge,
        FilterToken::Contains => CompareOp::Contains,
        FilterToken::StartsWith => CompareOp::StartsWith,
        FilterToken::EndsWith => CompareOp::EndsWith,
        FilterToken::Matches => CompareOp::Matches,
        _ => return None,
    };
    Some(op)
}

/// Resolves a field name, suggesting the closest known field on failure.
fn resolve_field(name: &str) -> FilterResult<Field> {
    Field::from_name(name).ok_or_else(|| {
        FilterError::unknown_field(
            name,
            find_similar_name(name, Field::ALL.iter().map(|f| f.name())),
        )
    })
}

/// Finds the best matching name from a list of candidates using Levenshtein distance.
///
/// Returns the best match if its edit distance is within the threshold,
/// otherwise returns `None`.
pub(crate) fn find_similar_name<'a>(
    query: &str,
    candidates: impl Iterator<Item = &'a str>,
) -> Option<String> {
    let query_lower = query.to_lowercase();

    let (best_match, best_distance) = candidates
        .map(|name| (name, levenshtein(&query_lower, &name.to_lowercase())))
        .min_by_key(|(_, d)| *d)?;

    if best_distance > 0 && best_distance <= MAX_SUGGESTION_DISTANCE {
        Some(best_match.to_string())
    } else {
        None
    }
}

/// Renders a token the way the user wrote it, for error messages.
fn describe(token: &FilterToken) -> String {
    match token {
        FilterToken::Ident(name) => name.clone(),
        FilterToken::Str(s) => format!("{s:?}"),
        FilterToken::Int(n) => n.to_string(),
        FilterToken::True => "true".to_string(),
        FilterToken::False => "false".to_string(),
        FilterToken::Null => "null".to_string(),
        FilterToken::Eq => "==".to_string(),
        FilterToken::Ne => "!=".to_string(),
        FilterToken::Lt => "<".to_string(),
        FilterToken::Le => "<=".to_string(),
        FilterToken::Gt => ">".to_string(),
        FilterToken::Ge => ">=".to_string(),
        FilterToken::Contains => "contains".to_string(),
        FilterToken::StartsWith => "startswith".to_string(),
        FilterToken::EndsWith => "endswith".to_string(),
        FilterToken::Matches => "matches".to_string(),
        FilterToken::And => "&".to_string(),
        FilterToken::Or => "|".to_string(),
        FilterToken::Not => "!".to_string(),
        FilterToken::OpenParen => "(".to_string(),
        FilterToken::CloseParen => ")".to_string(),
    }
}
