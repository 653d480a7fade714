//! Evaluator for the query-text dialect.
//!
//! The compiler emits SQL-like WHERE-clauses. This module parses that dialect
//! and evaluates it against a single [`Item`] using SQL three-valued logic. It
//! is what the in-memory storage executor runs, and it defines what a query
//! text *means* when checking it against the compiled predicate.
//!
//! # Grammar
//!
//! ```text
//! expr    ::= or
//! or      ::= and ("OR" and)*
//! and     ::= not ("AND" not)*
//! not     ::= "NOT" not | cmp
//! cmp     ::= operand [ ("=" | "<>" | "<" | "<=" | ">" | ">=") operand
//!                     | "IS" ["NOT"] "NULL"
//!                     | "LIKE" string ["ESCAPE" string]
//!                     | "REGEXP" string ]
//! operand ::= "(" expr ")" | column | integer | string | "NULL"
//! ```
//!
//! Strings are single-quoted with `''` as the only escape. Keywords are
//! case-insensitive. `LIKE` is case-sensitive.

use std::cmp::Ordering;
use std::iter::Peekable;
use std::str::CharIndices;

use feedline_types::{Field, FieldValue, Item};
use regex::Regex;

use super::ast::MAX_EXPRESSION_DEPTH;
use super::compiler::Relation;
use super::error::{FilterError, FilterResult};
use super::parser::find_similar_name;

/// Deepest clause accepted. Compiled filters nest at most twice as deep as
/// their expression, since each NOT is also wrapped in parentheses.
const MAX_QUERY_DEPTH: usize = 2 * MAX_EXPRESSION_DEPTH + 8;

/// Returns true if `item` satisfies `query_text`.
///
/// A clause that evaluates to NULL (unknown) does not match, as in SQL.
///
/// # Errors
///
/// Returns an error if `query_text` is not valid in the dialect.
pub fn matches(query_text: &str, item: &Item) -> FilterResult<bool> {
    Ok(QueryText::parse(query_text)?.matches(item))
}

/// A parsed query-text clause, ready to be evaluated against many items.
#[derive(Debug, Clone)]
pub struct QueryText {
    root: SqlExpr,
}

impl QueryText {
    /// Parses a WHERE-clause.
    ///
    /// # Errors
    ///
    /// Returns a [`FilterError`] describing the first syntax error, unknown
    /// column or invalid `REGEXP` pattern. Clauses nested deeper than any
    /// compiled filter are rejected with [`FilterError::TooDeep`].
    pub fn parse(input: &str) -> FilterResult<Self> {
        let tokens = tokenize(input)?;
        if tokens.is_empty() {
            return Err(FilterError::EmptyExpression);
        }
        let mut parser = SqlParser {
            tokens,
            position: 0,
            nesting: 0,
        };
        let (root, _) = parser.parse_or()?;
        if let Some(token) = parser.peek() {
            return Err(FilterError::unexpected_token(format!("{token:?}")));
        }
        Ok(Self { root })
    }

    /// Evaluates the clause against one item.
    pub fn matches(&self, item: &Item) -> bool {
        self.root.eval(item).truth() == Some(true)
    }
}

// ==================== Values ====================

/// A runtime SQL value. Booleans are integers 0/1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SqlValue<'a> {
    Null,
    Integer(i64),
    Text(&'a str),
}

impl<'a> SqlValue<'a> {
    fn from_bool(b: Option<bool>) -> Self {
        match b {
            Some(b) => SqlValue::Integer(i64::from(b)),
            None => SqlValue::Null,
        }
    }

    fn from_field(value: FieldValue<'a>) -> Self {
        match value {
            FieldValue::Null => SqlValue::Null,
            FieldValue::Integer(n) => SqlValue::Integer(n),
            FieldValue::Text(s) => SqlValue::Text(s),
            FieldValue::Bool(b) => SqlValue::Integer(i64::from(b)),
        }
    }

    /// Three-valued truth of the value: NULL is unknown.
    fn truth(self) -> Option<bool> {
        match self {
            SqlValue::Null => None,
            SqlValue::Integer(n) => Some(n != 0),
            SqlValue::Text(s) => Some(s.trim().parse::<i64>().is_ok_and(|n| n != 0)),
        }
    }

    /// Compares two values; NULL on either side is unknown. Integers sort
    /// before text.
    fn compare(self, other: SqlValue<'_>) -> Option<Ordering> {
        match (self, other) {
            (SqlValue::Null, _) | (_, SqlValue::Null) => None,
            (SqlValue::Integer(a), SqlValue::Integer(b)) => Some(a.cmp(&b)),
            (SqlValue::Text(a), SqlValue::Text(b)) => Some(a.cmp(b)),
            (SqlValue::Integer(_), SqlValue::Text(_)) => Some(Ordering::Less),
            (SqlValue::Text(_), SqlValue::Integer(_)) => Some(Ordering::Greater),
        }
    }
}

// ==================== Expression Tree ====================

#[derive(Debug, Clone)]
enum SqlExpr {
    Column(Field),
    Integer(i64),
    Text(String),
    Null,
    Compare(Box<SqlExpr>, Relation, Box<SqlExpr>),
    IsNull { expr: Box<SqlExpr>, negated: bool },
    Like { expr: Box<SqlExpr>, pattern: Vec<LikeToken> },
    Regexp { expr: Box<SqlExpr>, regex: Regex },
    And(Box<SqlExpr>, Box<SqlExpr>),
    Or(Box<SqlExpr>, Box<SqlExpr>),
    Not(Box<SqlExpr>),
}

impl SqlExpr {
    fn eval<'a>(&'a self, item: &'a Item) -> SqlValue<'a> {
        match self {
            SqlExpr::Column(field) => SqlValue::from_field(item.field_value(*field)),
            SqlExpr::Integer(n) => SqlValue::Integer(*n),
            SqlExpr::Text(s) => SqlValue::Text(s),
            SqlExpr::Null => SqlValue::Null,
            SqlExpr::Compare(left, rel, right) => {
                let ordering = left.eval(item).compare(right.eval(item));
                SqlValue::from_bool(ordering.map(|o| rel.holds(o)))
            }
            SqlExpr::IsNull { expr, negated } => {
                let is_null = expr.eval(item) == SqlValue::Null;
                SqlValue::from_bool(Some(is_null != *negated))
            }
            SqlExpr::Like { expr, pattern } => match expr.eval(item) {
                SqlValue::Null => SqlValue::Null,
                SqlValue::Integer(n) => {
                    SqlValue::from_bool(Some(like_match(pattern, &n.to_string())))
                }
                SqlValue::Text(s) => SqlValue::from_bool(Some(like_match(pattern, s))),
            },
            SqlExpr::Regexp { expr, regex } => match expr.eval(item) {
                SqlValue::Null => SqlValue::Null,
                SqlValue::Integer(n) => SqlValue::from_bool(Some(regex.is_match(&n.to_string()))),
                SqlValue::Text(s) => SqlValue::from_bool(Some(regex.is_match(s))),
            },
            SqlExpr::And(left, right) => {
                let (l, r) = (left.eval(item).truth(), right.eval(item).truth());
                SqlValue::from_bool(match (l, r) {
                    (Some(false), _) | (_, Some(false)) => Some(false),
                    (Some(true), Some(true)) => Some(true),
                    _ => None,
                })
            }
            SqlExpr::Or(left, right) => {
                let (l, r) = (left.eval(item).truth(), right.eval(item).truth());
                SqlValue::from_bool(match (l, r) {
                    (Some(true), _) | (_, Some(true)) => Some(true),
                    (Some(false), Some(false)) => Some(false),
                    _ => None,
                })
            }
            SqlExpr::Not(inner) => SqlValue::from_bool(inner.eval(item).truth().map(|b| !b)),
        }
    }
}

// ==================== LIKE ====================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LikeToken {
    /// `%`
    AnySequence,
    /// `_`
    AnyChar,
    Literal(char),
}

fn compile_like(pattern: &str, escape: Option<char>) -> Vec<LikeToken> {
    let mut tokens = Vec::with_capacity(pattern.len());
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        if Some(c) == escape {
            // A trailing escape stands for itself.
            tokens.push(LikeToken::Literal(chars.next().unwrap_or(c)));
        } else if c == '%' {
            tokens.push(LikeToken::AnySequence);
        } else if c == '_' {
            tokens.push(LikeToken::AnyChar);
        } else {
            tokens.push(LikeToken::Literal(c));
        }
    }
    tokens
}

/// Wildcard match with single-star backtracking.
fn like_match(pattern: &[LikeToken], text: &str) -> bool {
    let text: Vec<char> = text.chars().collect();
    let (mut p, mut t) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        match pattern.get(p) {
            Some(LikeToken::AnyChar) => {
                p += 1;
                t += 1;
                continue;
            }
            Some(LikeToken::Literal(c)) if *c == text[t] => {
                p += 1;
                t += 1;
                continue;
            }
            Some(LikeToken::AnySequence) => {
                backtrack = Some((p, t));
                p += 1;
                continue;
            }
            _ => {}
        }
        match backtrack {
            Some((star, consumed)) => {
                p = star + 1;
                t = consumed + 1;
                backtrack = Some((star, consumed + 1));
            }
            None => return false,
        }
    }

    pattern[p..].iter().all(|t| *t == LikeToken::AnySequence)
}

// ==================== Tokenizer ====================

#[derive(Debug, Clone, PartialEq, Eq)]
enum SqlToken {
    Word(String),
    Integer(i64),
    Str(String),
    Op(Relation),
    OpenParen,
    CloseParen,
}

fn tokenize(input: &str) -> FilterResult<Vec<SqlToken>> {
    let mut tokens = Vec::new();
    let mut chars: Peekable<CharIndices<'_>> = input.char_indices().peekable();

    while let Some(&(position, c)) = chars.peek() {
        match c {
            _ if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(SqlToken::OpenParen);
            }
            ')' => {
                chars.next();
                tokens.push(SqlToken::CloseParen);
            }
            '=' => {
                chars.next();
                tokens.push(SqlToken::Op(Relation::Eq));
            }
            '<' => {
                chars.next();
                let rel = match chars.peek().map(|&(_, c)| c) {
                    Some('=') => Relation::Le,
                    Some('>') => Relation::Ne,
                    _ => Relation::Lt,
                };
                if rel != Relation::Lt {
                    chars.next();
                }
                tokens.push(SqlToken::Op(rel));
            }
            '>' => {
                chars.next();
                let rel = if chars.peek().map(|&(_, c)| c) == Some('=') {
                    chars.next();
                    Relation::Ge
                } else {
                    Relation::Gt
                };
                tokens.push(SqlToken::Op(rel));
            }
            '\'' => {
                chars.next();
                let mut s = String::new();
                loop {
                    match chars.next() {
                        Some((_, '\'')) => {
                            if chars.peek().map(|&(_, c)| c) == Some('\'') {
                                chars.next();
                                s.push('\'');
                            } else {
                                break;
                            }
                        }
                        Some((_, c)) => s.push(c),
                        None => return Err(FilterError::UnterminatedString { position }),
                    }
                }
                tokens.push(SqlToken::Str(s));
            }
            '-' | '0'..='9' => {
                let mut literal = String::new();
                literal.push(c);
                chars.next();
                while let Some(&(_, d)) = chars.peek() {
                    if d.is_ascii_digit() {
                        literal.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let n = literal
                    .parse::<i64>()
                    .map_err(|_| FilterError::IntegerOutOfRange { literal })?;
                tokens.push(SqlToken::Integer(n));
            }
            _ if c.is_alphabetic() || c == '_' => {
                let mut word = String::new();
                while let Some(&(_, d)) = chars.peek() {
                    if d.is_alphanumeric() || d == '_' {
                        word.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(SqlToken::Word(word));
            }
            _ => {
                return Err(FilterError::UnexpectedCharacter {
                    character: c,
                    position,
                })
            }
        }
    }

    Ok(tokens)
}

// ==================== Parser ====================

struct SqlParser {
    tokens: Vec<SqlToken>,
    position: usize,
    nesting: usize,
}

/// A parsed node and its depth.
type SqlParsed = (SqlExpr, usize);

fn deeper(left: usize, right: usize) -> FilterResult<usize> {
    let depth = left.max(right) + 1;
    if depth > MAX_QUERY_DEPTH {
        return Err(FilterError::TooDeep {
            max: MAX_QUERY_DEPTH,
        });
    }
    Ok(depth)
}

impl SqlParser {
    fn peek(&self) -> Option<&SqlToken> {
        self.tokens.get(self.position)
    }

    fn advance(&mut self) -> Option<SqlToken> {
        let token = self.tokens.get(self.position).cloned();
        if token.is_some() {
            self.position += 1;
        }
        token
    }

    /// Consumes the next token if it is the given keyword.
    fn eat_keyword(&mut self, keyword: &str) -> bool {
        match self.peek() {
            Some(SqlToken::Word(w)) if w.eq_ignore_ascii_case(keyword) => {
                self.position += 1;
                true
            }
            _ => false,
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> FilterResult<()> {
        if self.eat_keyword(keyword) {
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    fn expect_string(&mut self) -> FilterResult<String> {
        match self.advance() {
            Some(SqlToken::Str(s)) => Ok(s),
            Some(other) => Err(FilterError::unexpected_token(format!("{other:?}"))),
            None => Err(FilterError::UnexpectedEndOfInput),
        }
    }

    fn unexpected(&self) -> FilterError {
        match self.peek() {
            Some(token) => FilterError::unexpected_token(format!("{token:?}")),
            None => FilterError::UnexpectedEndOfInput,
        }
    }

    fn enter(&mut self) -> FilterResult<()> {
        self.nesting += 1;
        if self.nesting > MAX_QUERY_DEPTH {
            return Err(FilterError::TooDeep {
                max: MAX_QUERY_DEPTH,
            });
        }
        Ok(())
    }

    fn parse_or(&mut self) -> FilterResult<SqlParsed> {
        let (mut left, mut depth) = self.parse_and()?;
        while self.eat_keyword("OR") {
            let (right, right_depth) = self.parse_and()?;
            depth = deeper(depth, right_depth)?;
            left = SqlExpr::Or(Box::new(left), Box::new(right));
        }
        Ok((left, depth))
    }

    fn parse_and(&mut self) -> FilterResult<SqlParsed> {
        let (mut left, mut depth) = self.parse_not()?;
        while self.eat_keyword("AND") {
            let (right, right_depth) = self.parse_not()?;
            depth = deeper(depth, right_depth)?;
            left = SqlExpr::And(Box::new(left), Box::new(right));
        }
        Ok((left, depth))
    }

    fn parse_not(&mut self) -> FilterResult<SqlParsed> {
        if self.eat_keyword("NOT") {
            self.enter()?;
            let (inner, depth) = self.parse_not()?;
            self.nesting -= 1;
            return Ok((SqlExpr::Not(Box::new(inner)), deeper(depth, 0)?));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> FilterResult<SqlParsed> {
        let (left, left_depth) = self.parse_operand()?;

        if let Some(SqlToken::Op(rel)) = self.peek() {
            let rel = *rel;
            self.advance();
            let (right, right_depth) = self.parse_operand()?;
            return Ok((
                SqlExpr::Compare(Box::new(left), rel, Box::new(right)),
                deeper(left_depth, right_depth)?,
            ));
        }

        if self.eat_keyword("IS") {
            let negated = self.eat_keyword("NOT");
            self.expect_keyword("NULL")?;
            return Ok((
                SqlExpr::IsNull {
                    expr: Box::new(left),
                    negated,
                },
                deeper(left_depth, 0)?,
            ));
        }

        if self.eat_keyword("LIKE") {
            let pattern = self.expect_string()?;
            let escape = if self.eat_keyword("ESCAPE") {
                let escape = self.expect_string()?;
                let mut chars = escape.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Some(c),
                    _ => return Err(FilterError::unexpected_token(format!("ESCAPE '{escape}'"))),
                }
            } else {
                None
            };
            return Ok((
                SqlExpr::Like {
                    expr: Box::new(left),
                    pattern: compile_like(&pattern, escape),
                },
                deeper(left_depth, 0)?,
            ));
        }

        if self.eat_keyword("REGEXP") {
            let pattern = self.expect_string()?;
            let regex = Regex::new(&pattern).map_err(|e| {
                FilterError::unexpected_token(format!("REGEXP pattern '{pattern}': {e}"))
            })?;
            return Ok((
                SqlExpr::Regexp {
                    expr: Box::new(left),
                    regex,
                },
                deeper(left_depth, 0)?,
            ));
        }

        Ok((left, left_depth))
    }

    fn parse_operand(&mut self) -> FilterResult<SqlParsed> {
        let leaf = match self.advance() {
            Some(SqlToken::OpenParen) => {
                self.enter()?;
                let inner = self.parse_or()?;
                self.nesting -= 1;
                return match self.advance() {
                    Some(SqlToken::CloseParen) => Ok(inner),
                    _ => Err(FilterError::UnclosedParenthesis),
                };
            }
            Some(SqlToken::Integer(n)) => SqlExpr::Integer(n),
            Some(SqlToken::Str(s)) => SqlExpr::Text(s),
            Some(SqlToken::Word(w)) if w.eq_ignore_ascii_case("NULL") => SqlExpr::Null,
            Some(SqlToken::Word(w)) => match Field::from_name(&w) {
                Some(field) => SqlExpr::Column(field),
                None => {
                    let suggestion = find_similar_name(&w, Field::ALL.iter().map(|f| f.name()));
                    return Err(FilterError::unknown_field(w, suggestion));
                }
            },
            Some(other) => return Err(FilterError::unexpected_token(format!("{other:?}"))),
            None => return Err(FilterError::UnexpectedEndOfInput),
        };
        Ok((leaf, 1))
    }
}
