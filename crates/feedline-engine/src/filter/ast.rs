//! Abstract Syntax Tree (AST) for filter expressions.

use std::fmt;

use feedline_types::Field;

/// Deepest expression tree the parser builds and the compiler lowers.
///
/// Every tree walk over an expression recurses once per level, so the limit
/// keeps user-authored filters from exhausting the stack.
pub const MAX_EXPRESSION_DEPTH: usize = 256;

/// Represents a filter expression.
///
/// The `FilterExpression` enum is the AST for user-authored timeline filters.
/// Expressions are immutable once built; editing a filter means building a new
/// tree and handing it to the owning [`FilterQuery`](crate::FilterQuery).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FilterExpression {
    /// A constant truth value.
    Literal(bool),

    /// Compares one item field against a constant.
    Comparison {
        /// The field on the left-hand side.
        field: Field,
        /// The comparison operator.
        op: CompareOp,
        /// The constant on the right-hand side.
        value: Value,
    },

    /// Logical AND of two expressions.
    And(Box<FilterExpression>, Box<FilterExpression>),

    /// Logical OR of two expressions.
    Or(Box<FilterExpression>, Box<FilterExpression>),

    /// Logical NOT of an expression.
    Not(Box<FilterExpression>),

    /// The canonical always-false expression.
    ///
    /// Used for "no filter configured" and for anything that cannot be
    /// compiled, so a broken filter shows nothing instead of everything.
    #[default]
    Contradiction,
}

impl FilterExpression {
    /// Creates a comparison expression.
    ///
    /// # Example
    ///
    /// ```
    /// use feedline_engine::filter::{CompareOp, FilterExpression, Value};
    /// use feedline_types::Field;
    ///
    /// let expr = FilterExpression::compare(Field::Author, CompareOp::Eq, Value::text("alice"));
    /// assert!(matches!(expr, FilterExpression::Comparison { .. }));
    /// ```
    pub fn compare(field: Field, op: CompareOp, value: Value) -> Self {
        FilterExpression::Comparison { field, op, value }
    }

    /// Creates an AND expression from two expressions.
    pub fn and(left: FilterExpression, right: FilterExpression) -> Self {
        FilterExpression::And(Box::new(left), Box::new(right))
    }

    /// Creates an OR expression from two expressions.
    pub fn or(left: FilterExpression, right: FilterExpression) -> Self {
        FilterExpression::Or(Box::new(left), Box::new(right))
    }

    /// Creates a NOT expression from another expression.
    pub fn negate(inner: FilterExpression) -> Self {
        FilterExpression::Not(Box::new(inner))
    }

    /// Returns true if this is the [`Contradiction`](FilterExpression::Contradiction) sentinel.
    pub fn is_contradiction(&self) -> bool {
        matches!(self, FilterExpression::Contradiction)
    }

    /// Number of nodes in the tree.
    pub fn node_count(&self) -> usize {
        match self {
            FilterExpression::Literal(_)
            | FilterExpression::Comparison { .. }
            | FilterExpression::Contradiction => 1,
            FilterExpression::And(left, right) | FilterExpression::Or(left, right) => {
                1 + left.node_count() + right.node_count()
            }
            FilterExpression::Not(inner) => 1 + inner.node_count(),
        }
    }
}

/// Renders the expression back into filter text that parses to an equal tree.
///
/// `Contradiction` has no surface syntax and renders as `false`.
impl fmt::Display for FilterExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterExpression::Literal(b) => write!(f, "{b}"),
            FilterExpression::Comparison { field, op, value } => {
                write!(f, "{field} {op} {value}")
            }
            FilterExpression::And(left, right) => write!(f, "({left} && {right})"),
            FilterExpression::Or(left, right) => write!(f, "({left} || {right})"),
            FilterExpression::Not(inner) => write!(f, "!{inner}"),
            FilterExpression::Contradiction => f.write_str("false"),
        }
    }
}

/// Comparison operators available in filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// Substring test on text fields.
    Contains,
    /// Prefix test on text fields.
    StartsWith,
    /// Suffix test on text fields.
    EndsWith,
    /// Regular expression search on text fields.
    Matches,
}

impl CompareOp {
    /// Returns true for the six ordering/equality operators.
    pub fn is_relational(self) -> bool {
        matches!(
            self,
            CompareOp::Eq
                | CompareOp::Ne
                | CompareOp::Lt
                | CompareOp::Le
                | CompareOp::Gt
                | CompareOp::Ge
        )
    }

    /// The filter-text spelling of the operator.
    pub fn symbol(self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Contains => "contains",
            CompareOp::StartsWith => "startswith",
            CompareOp::EndsWith => "endswith",
            CompareOp::Matches => "matches",
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Constant operand of a comparison.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Value {
    Text(String),
    Integer(i64),
    Bool(bool),
    Null,
}

impl Value {
    /// Creates a text value.
    pub fn text(s: impl Into<String>) -> Self {
        Value::Text(s.into())
    }

    /// A short name of the value's type, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Text(_) => "text",
            Value::Integer(_) => "integer",
            Value::Bool(_) => "bool",
            Value::Null => "null",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Text(s) => {
                f.write_str("\"")?;
                for c in s.chars() {
                    if c == '"' || c == '\\' {
                        f.write_str("\\")?;
                    }
                    write!(f, "{c}")?;
                }
                f.write_str("\"")
            }
            Value::Integer(n) => write!(f, "{n}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Null => f.write_str("null"),
        }
    }
}
