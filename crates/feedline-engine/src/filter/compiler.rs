//! Dual-target filter compilation.
//!
//! [`compile`] turns one [`FilterExpression`] into a [`CompiledFilter`]: a
//! query-text WHERE-clause for the storage layer and an in-memory predicate for
//! live items. Both artifacts are produced from the same lowered tree, so they
//! accept exactly the same items.
//!
//! Compilation never fails. A comparison that cannot be expressed (a type
//! mismatch, an operator the field does not support, an invalid regular
//! expression) is replaced by a contradiction in both artifacts and recorded
//! as a [`CompileDegradation`]. So is any subtree below
//! [`MAX_EXPRESSION_DEPTH`](super::MAX_EXPRESSION_DEPTH).
//!
//! # Example
//!
//! ```
//! use feedline_engine::filter::{compile, FilterParser};
//! use feedline_types::Item;
//!
//! let expr = FilterParser::parse(r#"author == "alice" && has_media"#).unwrap();
//! let compiled = compile(&expr);
//!
//! assert_eq!(
//!     compiled.query_text(),
//!     "((author = 'alice') AND (has_media = 1))"
//! );
//! assert!(compiled.accepts(&Item::new(1u64, "alice", "").with_media(true)));
//! ```

use std::cmp::Ordering;

use feedline_types::{Field, FieldKind, FieldValue, Filterable, Item};
use regex::Regex;
use thiserror::Error;

use super::ast::{CompareOp, FilterExpression, Value, MAX_EXPRESSION_DEPTH};

/// Query text of the always-true expression.
pub const TAUTOLOGY_QUERY: &str = "(1 = 1)";

/// Query text of the always-false expression.
pub const CONTRADICTION_QUERY: &str = "(0 = 1)";

/// Escape character used in generated `LIKE` patterns.
const LIKE_ESCAPE: char = '\\';

/// Why a comparison was downgraded to a contradiction.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CompileDegradation {
    /// The value's type does not match the field's type.
    #[error("cannot compare {kind} field '{field}' with {value_type} using '{op}'")]
    TypeMismatch {
        /// The field being compared.
        field: Field,
        /// The field's storage type.
        kind: FieldKind,
        /// The operator used.
        op: CompareOp,
        /// The type name of the constant.
        value_type: &'static str,
    },

    /// `null` used against a field that is never absent, or with an ordering operator.
    #[error("field '{field}' cannot be compared with null using '{op}'")]
    InvalidNullComparison {
        /// The field being compared.
        field: Field,
        /// The operator used.
        op: CompareOp,
    },

    /// The pattern of a `matches` comparison is not a valid regular expression.
    #[error("invalid pattern for '{field}': {message}")]
    InvalidPattern {
        /// The field being compared.
        field: Field,
        /// The regex engine's complaint.
        message: String,
    },

    /// A subtree sits deeper than the compiler lowers.
    #[error("subtree nested more than {max} levels deep")]
    TooDeep {
        /// The depth limit.
        max: usize,
    },
}

/// The pair of executable artifacts compiled from one expression.
#[derive(Debug, Clone)]
pub struct CompiledFilter {
    query_text: String,
    predicate: Predicate,
    degradations: Vec<CompileDegradation>,
}

impl CompiledFilter {
    /// The filter that accepts nothing.
    pub fn contradiction() -> Self {
        Self {
            query_text: CONTRADICTION_QUERY.to_string(),
            predicate: Predicate::Const(false),
            degradations: Vec::new(),
        }
    }

    /// The storage-layer WHERE-clause.
    pub fn query_text(&self) -> &str {
        &self.query_text
    }

    /// Evaluates the in-memory predicate.
    pub fn accepts(&self, item: &Item) -> bool {
        self.predicate.evaluate(item)
    }

    /// Returns the in-memory predicate as a closure.
    pub fn predicate(&self) -> impl Fn(&Item) -> bool + '_ {
        move |item| self.predicate.evaluate(item)
    }

    /// Comparisons that could not be compiled and were replaced by a contradiction.
    pub fn degradations(&self) -> &[CompileDegradation] {
        &self.degradations
    }

    /// Returns true if the whole filter is the constant contradiction.
    pub fn is_contradiction(&self) -> bool {
        matches!(self.predicate, Predicate::Const(false))
    }
}

impl Filterable for CompiledFilter {
    fn accepts(&self, item: &Item) -> bool {
        CompiledFilter::accepts(self, item)
    }
}

/// Compiles an expression into its query text and predicate.
pub fn compile(expr: &FilterExpression) -> CompiledFilter {
    let mut degradations = Vec::new();
    let mut query_text = String::new();
    let predicate = lower(expr, &mut query_text, &mut degradations, 1);
    CompiledFilter {
        query_text,
        predicate,
        degradations,
    }
}

/// Lowers one node at `depth`, appending its query text to `out`.
fn lower(
    expr: &FilterExpression,
    out: &mut String,
    degradations: &mut Vec<CompileDegradation>,
    depth: usize,
) -> Predicate {
    if depth > MAX_EXPRESSION_DEPTH {
        tracing::debug!(depth, "degrading filter subtree nested too deeply");
        degradations.push(CompileDegradation::TooDeep {
            max: MAX_EXPRESSION_DEPTH,
        });
        out.push_str(CONTRADICTION_QUERY);
        return Predicate::Const(false);
    }
    let next = depth + 1;

    match expr {
        FilterExpression::Literal(true) => {
            out.push_str(TAUTOLOGY_QUERY);
            Predicate::Const(true)
        }
        FilterExpression::Literal(false) | FilterExpression::Contradiction => {
            out.push_str(CONTRADICTION_QUERY);
            Predicate::Const(false)
        }
        FilterExpression::Comparison { field, op, value } => {
            match lower_comparison(*field, *op, value) {
                Ok((test, text)) => {
                    out.push_str(&text);
                    Predicate::Compare {
                        field: *field,
                        test,
                    }
                }
                Err(degradation) => {
                    tracing::debug!(%expr, reason = %degradation, "degrading filter subtree");
                    degradations.push(degradation);
                    out.push_str(CONTRADICTION_QUERY);
                    Predicate::Const(false)
                }
            }
        }
        FilterExpression::And(left, right) => {
            out.push('(');
            let left = lower(left, out, degradations, next);
            out.push_str(" AND ");
            let right = lower(right, out, degradations, next);
            out.push(')');
            Predicate::And(Box::new(left), Box::new(right))
        }
        FilterExpression::Or(left, right) => {
            out.push('(');
            let left = lower(left, out, degradations, next);
            out.push_str(" OR ");
            let right = lower(right, out, degradations, next);
            out.push(')');
            Predicate::Or(Box::new(left), Box::new(right))
        }
        FilterExpression::Not(inner) => {
            out.push_str("(NOT ");
            let inner = lower(inner, out, degradations, next);
            out.push(')');
            Predicate::Not(Box::new(inner))
        }
    }
}

/// Type-checks a comparison and produces its test and query text.
fn lower_comparison(
    field: Field,
    op: CompareOp,
    value: &Value,
) -> Result<(Test, String), CompileDegradation> {
    let column = field.name();

    if let Value::Null = value {
        return match op {
            CompareOp::Eq if field.is_nullable() => Ok((Test::IsNull, format!("({column} IS NULL)"))),
            CompareOp::Ne if field.is_nullable() => {
                Ok((Test::IsNotNull, format!("({column} IS NOT NULL)")))
            }
            _ => Err(CompileDegradation::InvalidNullComparison { field, op }),
        };
    }

    let mismatch = || CompileDegradation::TypeMismatch {
        field,
        kind: field.kind(),
        op,
        value_type: value.type_name(),
    };

    let (test, condition) = match (field.kind(), value) {
        (FieldKind::Bool, Value::Bool(expected)) => {
            let equal = match op {
                CompareOp::Eq => true,
                CompareOp::Ne => false,
                _ => return Err(mismatch()),
            };
            let sql_op = if equal { "=" } else { "<>" };
            (
                Test::Bool {
                    expected: *expected,
                    equal,
                },
                format!("{column} {sql_op} {}", i64::from(*expected)),
            )
        }
        (FieldKind::Integer, Value::Integer(n)) => {
            let rel = Relation::from_op(op).ok_or_else(mismatch)?;
            (
                Test::Integer { rel, value: *n },
                format!("{column} {} {n}", rel.sql()),
            )
        }
        (FieldKind::Text, Value::Text(s)) => match op {
            CompareOp::Contains => (
                Test::Contains(s.clone()),
                like_condition(column, &format!("%{}%", escape_like(s))),
            ),
            CompareOp::StartsWith => (
                Test::StartsWith(s.clone()),
                like_condition(column, &format!("{}%", escape_like(s))),
            ),
            CompareOp::EndsWith => (
                Test::EndsWith(s.clone()),
                like_condition(column, &format!("%{}", escape_like(s))),
            ),
            CompareOp::Matches => {
                let regex = Regex::new(s).map_err(|e| CompileDegradation::InvalidPattern {
                    field,
                    message: e.to_string(),
                })?;
                (
                    Test::Regex(regex),
                    format!("{column} REGEXP {}", quote_sql(s)),
                )
            }
            _ => {
                let rel = Relation::from_op(op).ok_or_else(mismatch)?;
                (
                    Test::Text {
                        rel,
                        value: s.clone(),
                    },
                    format!("{column} {} {}", rel.sql(), quote_sql(s)),
                )
            }
        },
        _ => return Err(mismatch()),
    };

    // Nullable columns are guarded so that NOT keeps two-valued meaning under
    // SQL three-valued logic.
    let text = if field.is_nullable() {
        format!("({column} IS NOT NULL AND {condition})")
    } else {
        format!("({condition})")
    };
    Ok((test, text))
}

fn like_condition(column: &str, pattern: &str) -> String {
    format!(
        "{column} LIKE {} ESCAPE {}",
        quote_sql(pattern),
        quote_sql(&LIKE_ESCAPE.to_string())
    )
}

/// Escapes `LIKE` wildcards and the escape character itself.
fn escape_like(s: &str) -> String {
    let mut escaped = String::with_capacity(s.len());
    for c in s.chars() {
        if c == '%' || c == '_' || c == LIKE_ESCAPE {
            escaped.push(LIKE_ESCAPE);
        }
        escaped.push(c);
    }
    escaped
}

/// Renders a single-quoted SQL string literal.
pub(crate) fn quote_sql(s: &str) -> String {
    let mut quoted = String::with_capacity(s.len() + 2);
    quoted.push('\'');
    for c in s.chars() {
        if c == '\'' {
            quoted.push('\'');
        }
        quoted.push(c);
    }
    quoted.push('\'');
    quoted
}

/// An ordering or equality relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Relation {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Relation {
    fn from_op(op: CompareOp) -> Option<Self> {
        let rel = match op {
            CompareOp::Eq => Relation::Eq,
            CompareOp::Ne => Relation::Ne,
            CompareOp::Lt => Relation::Lt,
            CompareOp::Le => Relation::Le,
            CompareOp::Gt => Relation::Gt,
            CompareOp::Ge => Relation::Ge,
            _ => return None,
        };
        Some(rel)
    }

    pub(crate) fn sql(self) -> &'static str {
        match self {
            Relation::Eq => "=",
            Relation::Ne => "<>",
            Relation::Lt => "<",
            Relation::Le => "<=",
            Relation::Gt => ">",
            Relation::Ge => ">=",
        }
    }

    pub(crate) fn holds(self, ordering: Ordering) -> bool {
        match self {
            Relation::Eq => ordering == Ordering::Equal,
            Relation::Ne => ordering != Ordering::Equal,
            Relation::Lt => ordering == Ordering::Less,
            Relation::Le => ordering != Ordering::Greater,
            Relation::Gt => ordering == Ordering::Greater,
            Relation::Ge => ordering != Ordering::Less,
        }
    }
}

/// Lowered, type-checked predicate tree.
#[derive(Debug, Clone)]
enum Predicate {
    Const(bool),
    Compare { field: Field, test: Test },
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
    Not(Box<Predicate>),
}

/// A single well-typed field test.
#[derive(Debug, Clone)]
enum Test {
    IsNull,
    IsNotNull,
    Bool { expected: bool, equal: bool },
    Integer { rel: Relation, value: i64 },
    Text { rel: Relation, value: String },
    Contains(String),
    StartsWith(String),
    EndsWith(String),
    Regex(Regex),
}

impl Predicate {
    fn evaluate(&self, item: &Item) -> bool {
        match self {
            Predicate::Const(b) => *b,
            Predicate::Compare { field, test } => test.evaluate(item.field_value(*field)),
            Predicate::And(left, right) => left.evaluate(item) && right.evaluate(item),
            Predicate::Or(left, right) => left.evaluate(item) || right.evaluate(item),
            Predicate::Not(inner) => !inner.evaluate(item),
        }
    }
}

impl Test {
    fn evaluate(&self, actual: FieldValue<'_>) -> bool {
        match (self, actual) {
            (Test::IsNull, value) => value == FieldValue::Null,
            (Test::IsNotNull, value) => value != FieldValue::Null,
            (Test::Bool { expected, equal }, FieldValue::Bool(b)) => (b == *expected) == *equal,
            (Test::Integer { rel, value }, FieldValue::Integer(n)) => rel.holds(n.cmp(value)),
            (Test::Text { rel, value }, FieldValue::Text(s)) => rel.holds(s.cmp(value.as_str())),
            (Test::Contains(needle), FieldValue::Text(s)) => s.contains(needle.as_str()),
            (Test::StartsWith(prefix), FieldValue::Text(s)) => s.starts_with(prefix.as_str()),
            (Test::EndsWith(suffix), FieldValue::Text(s)) => s.ends_with(suffix.as_str()),
            (Test::Regex(regex), FieldValue::Text(s)) => regex.is_match(s),
            // Absent values fail every non-null test.
            _ => false,
        }
    }
}
