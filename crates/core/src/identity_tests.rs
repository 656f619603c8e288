// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use yare::parameterized;

use super::{Identity, IdentityError, IdentityPattern};

// ── Parsing ───────────────────────────────────────────────────────────

#[parameterized(
    bare = { "myapp", "myapp", None, None },
    two = { "myapp:api", "myapp", Some("api"), None },
    three = { "myapp:api:main", "myapp", Some("api"), Some("main") },
    dotted = { "my.app:v1.2:x_y-z", "my.app", Some("v1.2"), Some("x_y-z") },
    trailing_colon = { "myapp:", "myapp", None, None },
    double_trailing = { "myapp::", "myapp", None, None },
)]
fn parse_ok(raw: &str, project: &str, stack: Option<&str>, context: Option<&str>) {
    let id = Identity::parse(raw).unwrap();
    assert_eq!(id.project, project);
    assert_eq!(id.stack.as_deref(), stack);
    assert_eq!(id.context.as_deref(), context);
}

#[parameterized(
    empty = { "" },
    blank = { "   " },
    only_colons = { "::" },
)]
fn parse_empty(raw: &str) {
    assert_eq!(Identity::parse(raw), Err(IdentityError::Empty));
}

#[test]
fn parse_too_many_segments() {
    assert_eq!(
        Identity::parse("a:b:c:d"),
        Err(IdentityError::TooManySegments(4))
    );
}

#[parameterized(
    space = { "my app" },
    slash = { "my/app" },
    middle_empty = { "a::b" },
    unicode = { "café" },
)]
fn parse_bad_chars(raw: &str) {
    assert!(matches!(
        Identity::parse(raw),
        Err(IdentityError::BadCharacter(_))
    ));
}

#[test]
fn parse_rejects_wildcard() {
    assert_eq!(
        Identity::parse("myapp:*"),
        Err(IdentityError::WildcardNotAllowed)
    );
}

#[test]
fn parse_rejects_overlong_segment() {
    let long = "a".repeat(65);
    assert!(matches!(
        Identity::parse(&long),
        Err(IdentityError::SegmentTooLong(_))
    ));
    assert!(Identity::parse(&"a".repeat(64)).is_ok());
}

#[test]
fn canonical_round_trip() {
    for raw in ["myapp", "myapp:api", "myapp:api:main"] {
        assert_eq!(Identity::parse(raw).unwrap().canonical(), raw);
    }
}

// ── Pattern matching ──────────────────────────────────────────────────

#[parameterized(
    exact = { "myapp:api", "myapp:api", true },
    prefix = { "myapp", "myapp:api", true },
    star_stack = { "myapp:*", "myapp:api", true },
    star_matches_absent = { "myapp:*", "myapp", true },
    star_project = { "*", "anything:at:all", true },
    full_wild = { "*:*:*", "a:b:c", true },
    literal_context = { "myapp:api:main", "myapp:api:main", true },
    wrong_project = { "other", "myapp:api", false },
    wrong_stack = { "myapp:web", "myapp:api", false },
    literal_vs_absent = { "myapp:api", "myapp", false },
    wrong_context = { "myapp:api:dev", "myapp:api:main", false },
)]
fn pattern_matches(pattern: &str, id: &str, expected: bool) {
    let pattern = IdentityPattern::parse(pattern).unwrap();
    let id = Identity::parse(id).unwrap();
    assert_eq!(pattern.matches(&id), expected, "{pattern} vs {id}");
}

#[test]
fn pattern_wildcard_detection() {
    assert!(IdentityPattern::parse("myapp:*").unwrap().has_wildcard());
    assert!(!IdentityPattern::parse("myapp:api").unwrap().has_wildcard());
}

#[parameterized(
    all_literal = { "myapp:api", "myapp:api%" },
    leading_literal = { "myapp:*", "myapp%" },
    all_wild = { "*", "%" },
    wild_then_literal = { "*:api", "%" },
)]
fn sql_prefix(pattern: &str, expected: &str) {
    let pattern = IdentityPattern::parse(pattern).unwrap();
    assert_eq!(pattern.sql_like_prefix(), expected);
}

#[test]
fn sql_prefix_escapes_like_metacharacters() {
    let pattern = IdentityPattern::parse("my_app:*").unwrap();
    assert_eq!(pattern.sql_like_prefix(), "my\\_app%");
}

// ── Round-trip property: matches(p, id) ⇔ prefilter ∧ confirm ────────

#[test]
fn prefilter_is_superset_of_matches() {
    let ids = ["myapp", "myapp:api", "myapp:api:main", "other:api", "my:x:y"];
    let patterns = ["myapp", "myapp:*", "*", "*:api", "myapp:api:main"];
    for p in patterns {
        let pattern = IdentityPattern::parse(p).unwrap();
        let like = pattern.sql_like_prefix();
        let prefix = like.trim_end_matches('%').replace('\\', "");
        for raw in ids {
            let id = Identity::parse(raw).unwrap();
            if pattern.matches(&id) {
                assert!(
                    raw.starts_with(&prefix),
                    "prefilter '{like}' must admit '{raw}' for pattern '{p}'"
                );
            }
        }
    }
}
