//! Property-based tests for the keyword matcher
//!
//! **Property 1: Exact Keyword Always Matches**
//! *For any* enabled Exact-mode rule, a message equal to one of its keywords
//! SHALL list that rule among the candidates, whatever the letter case or
//! surrounding whitespace.
//!
//! **Property 2: Deterministic Tie-Break**
//! *For any* set of rules and message, the candidate order SHALL be the same
//! regardless of the order in which the rules are supplied, sorted by
//! specificity descending and rule ID ascending.
//!
//! **Property 3: Disabled Rules Never Match**

use std::sync::Arc;

use lexireply::auto_reply::{KeywordMatcher, MatchMode, Rule, RuleId, Segment};
use proptest::prelude::*;

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_keyword() -> impl Strategy<Value = String> {
    "[a-z]{1,10}".prop_map(|s| s)
}

fn arb_padding() -> impl Strategy<Value = String> {
    prop_oneof![Just(String::new()), Just(" ".to_string()), Just("\t ".to_string())]
}

fn arb_literal_mode() -> impl Strategy<Value = MatchMode> {
    prop_oneof![
        Just(MatchMode::Exact),
        Just(MatchMode::Contains),
        Just(MatchMode::Prefix),
    ]
}

/// Rules over a tiny alphabet so that overlaps and ties are common
fn arb_rules() -> impl Strategy<Value = Vec<Arc<Rule>>> {
    prop::collection::vec(
        (
            prop::collection::btree_set("[ab]{1,3}", 1..3),
            arb_literal_mode(),
        ),
        1..12,
    )
    .prop_map(|specs| {
        specs
            .into_iter()
            .enumerate()
            .map(|(i, (keywords, mode))| {
                Arc::new(
                    Rule::new(i as u64 + 1, keywords, vec![Segment::text("r")]).with_mode(mode),
                )
            })
            .collect()
    })
}

fn candidate_ids(matcher: &KeywordMatcher, message: &str, rules: &[Arc<Rule>]) -> Vec<RuleId> {
    matcher
        .find_candidates(message, rules)
        .iter()
        .map(|c| c.rule.id)
        .collect()
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(20))]

    #[test]
    fn prop_exact_keyword_always_candidate(
        keyword in arb_keyword(),
        other in arb_keyword(),
        upper in any::<bool>(),
        left in arb_padding(),
        right in arb_padding(),
    ) {
        let rules = vec![
            Arc::new(Rule::new(1, [other], vec![Segment::text("x")]).with_mode(MatchMode::Exact)),
            Arc::new(Rule::new(2, [keyword.clone()], vec![Segment::text("y")]).with_mode(MatchMode::Exact)),
        ];
        let body = if upper { keyword.to_uppercase() } else { keyword.clone() };
        let message = format!("{}{}{}", left, body, right);

        let ids = candidate_ids(&KeywordMatcher::new(), &message, &rules);
        prop_assert!(ids.contains(&RuleId(2)));
    }

    #[test]
    fn prop_candidate_order_independent_of_rule_order(
        (rules, shuffled) in arb_rules().prop_flat_map(|rules| {
            let shuffled = Just(rules.clone()).prop_shuffle();
            (Just(rules), shuffled)
        }),
        message in "[ab ]{0,12}",
    ) {
        let matcher = KeywordMatcher::new();
        let expected = candidate_ids(&matcher, &message, &rules);
        let actual = candidate_ids(&matcher, &message, &shuffled);
        prop_assert_eq!(expected, actual);
    }

    #[test]
    fn prop_candidates_sorted_by_specificity_then_id(
        rules in arb_rules(),
        message in "[ab ]{0,12}",
    ) {
        let candidates = KeywordMatcher::new().find_candidates(&message, &rules);
        for pair in candidates.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            prop_assert!(
                a.specificity > b.specificity
                    || (a.specificity == b.specificity && a.rule.id < b.rule.id)
            );
        }
    }

    #[test]
    fn prop_disabled_rules_never_match(
        rules in arb_rules(),
        message in "[ab ]{0,12}",
    ) {
        let disabled: Vec<Arc<Rule>> = rules
            .iter()
            .map(|r| Arc::new(Rule::clone(r).with_enabled(false)))
            .collect();
        prop_assert!(KeywordMatcher::new().find_candidates(&message, &disabled).is_empty());
    }
}
