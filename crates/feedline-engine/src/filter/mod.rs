//! Filter expressions and their dual-target compiler.
//!
//! A timeline's filter is a boolean expression over item fields. This module
//! parses filter text into a [`FilterExpression`], compiles it into a
//! [`CompiledFilter`] (storage query text plus in-memory predicate), and
//! evaluates query text against items for the in-memory storage executor.
//!
//! # Supported Syntax
//!
//! ## Fields
//! - `id`, `in_reply_to`, `favorite_count`, `created_at` - integers
//! - `author`, `text`, `lang` - text
//! - `has_media`, `is_retweet` - booleans
//!
//! `in_reply_to` and `lang` may be absent and compare against `null`.
//! `id` and `in_reply_to` are signed: ids above `i64::MAX` compare as
//! `i64::MAX`.
//!
//! ## Comparisons
//! - `==` (or `=`), `!=`, `<`, `<=`, `>`, `>=`
//! - `contains`, `startswith`, `endswith` - case-sensitive text tests
//! - `matches` - regular expression search
//! - A bare boolean field is shorthand for `field == true`
//!
//! ## Boolean Operators
//! - `&`, `&&`, `and` - AND
//! - `|`, `||`, `or` - OR
//! - `!`, `not` - NOT
//! - `()` - Grouping
//!
//! # Example
//!
//! ```
//! use feedline_engine::filter::{compile, matches, FilterParser};
//! use feedline_types::Item;
//!
//! let expr = FilterParser::parse(r#"lang == "en" || text contains "rust""#).unwrap();
//! let compiled = compile(&expr);
//!
//! let item = Item::new(7u64, "bob", "learning rust");
//! assert!(compiled.accepts(&item));
//! assert!(matches(compiled.query_text(), &item).unwrap());
//! ```

mod ast;
mod compiler;
mod error;
mod lexer;
mod parser;
mod query_text;

pub use ast::{CompareOp, FilterExpression, Value, MAX_EXPRESSION_DEPTH};
pub use compiler::{
    compile, CompileDegradation, CompiledFilter, CONTRADICTION_QUERY, TAUTOLOGY_QUERY,
};
pub use error::{FilterError, FilterResult};
pub use lexer::{FilterToken, Lexer, PositionedToken};
pub use parser::FilterParser;
pub use query_text::{matches, QueryText};


#[cfg(test)]
mod compiler_tests;
