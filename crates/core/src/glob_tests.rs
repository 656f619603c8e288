// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use yare::parameterized;

use super::glob_match;

#[parameterized(
    exact = { "myapp:api", "myapp:api", true },
    exact_miss = { "myapp:api", "myapp:web", false },
    star_only = { "*", "anything", true },
    star_empty = { "*", "", true },
    prefix = { "myapp:*", "myapp:api", true },
    prefix_empty_tail = { "myapp:*", "myapp:", true },
    prefix_miss = { "myapp:*", "other:api", false },
    suffix = { "*:api", "myapp:api", true },
    suffix_miss = { "*:api", "myapp:web", false },
    middle = { "my*api", "myapp:api", true },
    middle_miss = { "my*api", "myapp:web", false },
    double = { "a*b*c", "aXbYc", true },
    double_order = { "a*b*c", "acb", false },
    overlap = { "ab*ba", "aba", false },
    overlap_ok = { "ab*ba", "abba", true },
    empty_pattern = { "", "", true },
    empty_pattern_miss = { "", "x", false },
)]
fn matches(pattern: &str, text: &str, expected: bool) {
    assert_eq!(glob_match(pattern, text), expected, "{pattern} vs {text}");
}

#[test]
fn long_hostile_input_is_linear() {
    // Would explode under a backtracking regex; here it just scans.
    let pattern = "a*".repeat(50) + "b";
    let text = "a".repeat(10_000);
    assert!(!glob_match(&pattern, &text));
}
