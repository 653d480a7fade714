//! Tests for the dual-target compiler.

use feedline_types::{Field, Item};

use super::*;

fn compiled(input: &str) -> CompiledFilter {
    compile(&FilterParser::parse(input).unwrap())
}

fn make_item(id: u64, author: &str, text: &str) -> Item {
    Item::new(id, author, text)
}

/// Asserts that both artifacts agree on `item` and returns the verdict.
fn verdict(filter: &CompiledFilter, item: &Item) -> bool {
    let by_predicate = filter.accepts(item);
    let by_query = matches(filter.query_text(), item).unwrap();
    assert_eq!(
        by_predicate,
        by_query,
        "artifacts disagree for {} on {item:?}",
        filter.query_text()
    );
    by_predicate
}

// ==================== Query Text Shape ====================

#[test]
fn test_query_text_equality() {
    assert_eq!(compiled("author == 'alice'").query_text(), "(author = 'alice')");
}

#[test]
fn test_query_text_combinators() {
    assert_eq!(
        compiled("has_media & !is_retweet | favorite_count > 2").query_text(),
        "(((has_media = 1) AND (NOT (is_retweet = 1))) OR (favorite_count > 2))"
    );
}

#[test]
fn test_query_text_literals() {
    assert_eq!(compiled("true").query_text(), TAUTOLOGY_QUERY);
    assert_eq!(compiled("false").query_text(), CONTRADICTION_QUERY);
    assert_eq!(
        compile(&FilterExpression::Contradiction).query_text(),
        CONTRADICTION_QUERY
    );
}

#[test]
fn test_query_text_bool_not_equal() {
    assert_eq!(compiled("has_media != false").query_text(), "(has_media <> 0)");
}

#[test]
fn test_query_text_nullable_guard() {
    assert_eq!(
        compiled("lang == 'en'").query_text(),
        "(lang IS NOT NULL AND lang = 'en')"
    );
    assert_eq!(compiled("lang == null").query_text(), "(lang IS NULL)");
    assert_eq!(
        compiled("in_reply_to != null").query_text(),
        "(in_reply_to IS NOT NULL)"
    );
}

#[test]
fn test_query_text_quotes_literals() {
    assert_eq!(
        compiled(r#"author == "o'brien""#).query_text(),
        "(author = 'o''brien')"
    );
}

#[test]
fn test_query_text_escapes_like_wildcards() {
    assert_eq!(
        compiled("text contains '50%_off'").query_text(),
        r"(text LIKE '%50\%\_off%' ESCAPE '\')"
    );
    assert_eq!(
        compiled("text startswith 'RT'").query_text(),
        r"(text LIKE 'RT%' ESCAPE '\')"
    );
    assert_eq!(
        compiled("text endswith '!'").query_text(),
        r"(text LIKE '%!' ESCAPE '\')"
    );
}

#[test]
fn test_query_text_regexp() {
    assert_eq!(
        compiled(r"text matches '^\d+'").query_text(),
        r"(text REGEXP '^\d+')"
    );
}

#[test]
fn test_compile_is_deterministic() {
    let expr = FilterParser::parse("author == 'a' | text contains 'b'").unwrap();
    assert_eq!(compile(&expr).query_text(), compile(&expr).query_text());
}

// ==================== Predicate Semantics ====================

#[test]
fn test_alice_with_media() {
    let filter = compiled(r#"author == "alice" && has_media"#);
    assert!(verdict(&filter, &make_item(1, "alice", "").with_media(true)));
    assert!(!verdict(&filter, &make_item(2, "alice", "")));
    assert!(!verdict(&filter, &make_item(3, "bob", "").with_media(true)));
}

#[test]
fn test_text_operators_are_case_sensitive() {
    let filter = compiled("text contains 'Rust'");
    assert!(verdict(&filter, &make_item(1, "a", "I like Rust")));
    assert!(!verdict(&filter, &make_item(2, "a", "I like rust")));
}

#[test]
fn test_wildcards_in_needle_are_literal() {
    let filter = compiled("text contains '50%'");
    assert!(verdict(&filter, &make_item(1, "a", "now 50% off")));
    assert!(!verdict(&filter, &make_item(2, "a", "now 500 off")));

    let filter = compiled("text startswith 'a_'");
    assert!(verdict(&filter, &make_item(3, "a", "a_b")));
    assert!(!verdict(&filter, &make_item(4, "a", "abb")));
}

#[test]
fn test_backslash_in_needle() {
    let filter = compiled(r#"text contains "C:\\""#);
    assert!(verdict(&filter, &make_item(1, "a", r"path C:\temp")));
    assert!(!verdict(&filter, &make_item(2, "a", "path C:temp")));
}

#[test]
fn test_integer_relations() {
    let filter = compiled("favorite_count >= 3 & id < 100");
    let mut item = make_item(10, "a", "");
    item.favorite_count = 3;
    assert!(verdict(&filter, &item));
    item.favorite_count = 2;
    assert!(!verdict(&filter, &item));
    assert!(!verdict(&filter, &make_item(100, "a", "")));
}

#[test]
fn test_text_ordering_is_bytewise() {
    let filter = compiled("author < 'b'");
    assert!(verdict(&filter, &make_item(1, "alice", "")));
    assert!(verdict(&filter, &make_item(2, "Zed", "")));
    assert!(!verdict(&filter, &make_item(3, "bob", "")));
}

#[test]
fn test_negated_nullable_comparison_accepts_absent() {
    let filter = compiled("!(lang == 'en')");
    assert!(verdict(&filter, &make_item(1, "a", "")));
    assert!(verdict(&filter, &make_item(2, "a", "").with_lang("ja")));
    assert!(!verdict(&filter, &make_item(3, "a", "").with_lang("en")));
}

#[test]
fn test_null_tests() {
    let filter = compiled("in_reply_to == null");
    assert!(verdict(&filter, &make_item(1, "a", "")));
    assert!(!verdict(&filter, &make_item(2, "a", "").replying_to(1u64)));

    let filter = compiled("in_reply_to != null & in_reply_to > 5");
    assert!(verdict(&filter, &make_item(3, "a", "").replying_to(6u64)));
    assert!(!verdict(&filter, &make_item(4, "a", "").replying_to(5u64)));
    assert!(!verdict(&filter, &make_item(5, "a", "")));
}

#[test]
fn test_regex_search() {
    let filter = compiled(r"text matches '#\w+'");
    assert!(verdict(&filter, &make_item(1, "a", "love #rustlang")));
    assert!(!verdict(&filter, &make_item(2, "a", "no tags")));
}

#[test]
fn test_predicate_closure() {
    let filter = compiled("is_retweet");
    let mut retweet = make_item(1, "a", "");
    retweet.is_retweet = true;
    let items = [retweet, make_item(2, "a", "")];
    let predicate = filter.predicate();
    let accepted: Vec<_> = items.iter().filter(|i| predicate(*i)).collect();
    assert_eq!(accepted.len(), 1);
    assert_eq!(accepted[0].id.0, 1);
}

#[test]
fn test_filterable_impl() {
    use feedline_types::Filterable;

    let filter: Box<dyn Filterable> = Box::new(compiled("author == 'alice'"));
    assert!(filter.accepts(&make_item(1, "alice", "")));
}

#[test]
fn test_ids_beyond_signed_range_compare_as_max() {
    let filter = compiled("id == 9223372036854775807");
    let huge = make_item(u64::MAX, "alice", "");
    let just_over = make_item(i64::MAX as u64 + 1, "alice", "");
    let at_max = make_item(i64::MAX as u64, "alice", "");

    assert!(verdict(&filter, &huge));
    assert!(verdict(&filter, &just_over));
    assert!(verdict(&filter, &at_max));

    let filter = compiled("id < 9223372036854775807");
    assert!(!verdict(&filter, &huge));
    assert!(verdict(&filter, &make_item(5, "alice", "")));
}

// ==================== Degradation ====================

#[test]
fn test_type_mismatch_degrades_to_contradiction() {
    let filter = compiled("author > 3");
    assert!(filter.is_contradiction());
    assert_eq!(filter.query_text(), CONTRADICTION_QUERY);
    assert_eq!(
        filter.degradations(),
        &[CompileDegradation::TypeMismatch {
            field: Field::Author,
            kind: feedline_types::FieldKind::Text,
            op: CompareOp::Gt,
            value_type: "integer",
        }]
    );
    assert!(!verdict(&filter, &make_item(1, "alice", "")));
}

#[test]
fn test_unsupported_operator_degrades() {
    for input in [
        "has_media contains 'x'",
        "has_media < true",
        "favorite_count contains 'x'",
        "favorite_count matches '1'",
        "has_media == 1",
    ] {
        let filter = compiled(input);
        assert!(filter.is_contradiction(), "input: {input}");
        assert_eq!(filter.degradations().len(), 1, "input: {input}");
    }
}

#[test]
fn test_null_on_non_nullable_field_degrades() {
    let filter = compiled("author == null");
    assert_eq!(
        filter.degradations(),
        &[CompileDegradation::InvalidNullComparison {
            field: Field::Author,
            op: CompareOp::Eq,
        }]
    );
    let filter = compiled("lang < null");
    assert!(filter.is_contradiction());
}

#[test]
fn test_invalid_regex_degrades() {
    let filter = compiled("text matches '('");
    assert!(filter.is_contradiction());
    assert!(matches!(
        filter.degradations(),
        [CompileDegradation::InvalidPattern {
            field: Field::Text,
            ..
        }]
    ));
}

#[test]
fn test_degradation_is_local_to_subtree() {
    let filter = compiled("author == 'alice' | favorite_count == 'many'");
    assert!(!filter.is_contradiction());
    assert_eq!(
        filter.query_text(),
        "((author = 'alice') OR (0 = 1))"
    );
    assert!(verdict(&filter, &make_item(1, "alice", "")));
    assert!(!verdict(&filter, &make_item(2, "bob", "")));
}

#[test]
fn test_negated_degradation_accepts_everything() {
    let filter = compiled("!(author > 3)");
    assert_eq!(filter.query_text(), "(NOT (0 = 1))");
    assert!(verdict(&filter, &make_item(1, "anyone", "")));
}

/// A left-deep AND chain of `len` copies of `has_media`.
fn deep_chain(len: usize) -> FilterExpression {
    let leaf = || FilterExpression::compare(Field::HasMedia, CompareOp::Eq, Value::Bool(true));
    (1..len).fold(leaf(), |chain, _| FilterExpression::and(chain, leaf()))
}

#[test]
fn test_over_deep_subtree_degrades_instead_of_overflowing() {
    let filter = compile(&deep_chain(1000));

    assert!(!filter.degradations().is_empty());
    assert!(filter
        .degradations()
        .iter()
        .all(|d| *d == CompileDegradation::TooDeep { max: MAX_EXPRESSION_DEPTH }));
    assert!(!verdict(&filter, &make_item(1, "alice", "").with_media(true)));
}

#[test]
fn test_over_deep_degradation_is_local() {
    let expr = FilterExpression::or(deep_chain(1000), FilterExpression::Literal(true));
    let filter = compile(&expr);
    assert!(verdict(&filter, &make_item(1, "alice", "")));
}

#[test]
fn test_contradiction_accepts_nothing() {
    let filter = CompiledFilter::contradiction();
    assert!(filter.is_contradiction());
    assert!(filter.degradations().is_empty());
    assert!(!verdict(&filter, &make_item(1, "alice", "")));
}
