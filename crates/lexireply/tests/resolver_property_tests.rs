//! Property-based tests for the variable resolver
//!
//! **Property 1: Seeded Determinism**
//! *For any* template and seed, resolving twice with the same context SHALL
//! produce identical segments, template choice and diagnostics.
//!
//! **Property 2: Unknown Tokens Resolve Empty**
//! *For any* unknown token name, the token SHALL render as the empty string
//! and produce exactly one `UnknownToken` diagnostic.
//!
//! **Property 3: Random Ranges Stay In Bounds**

use chrono::{TimeZone, Utc};
use lexireply::auto_reply::{
    Diagnostic, IncomingMessage, ResolutionContext, ResolvedSegment, Rule, Segment,
    VariableResolver,
};
use proptest::prelude::*;

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_token() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("{name}".to_string()),
        Just("{sender_id}".to_string()),
        Just("{message}".to_string()),
        Just("{counter}".to_string()),
        Just("{hour}:{minute}".to_string()),
        (0i64..50, 50i64..500).prop_map(|(a, b)| format!("{{rand:{}-{}}}", a, b)),
        prop::collection::vec("[a-z]{1,5}", 1..5)
            .prop_map(|options| format!("{{random:{}}}", options.join("|"))),
        (1u32..100, 1u32..100).prop_map(|(a, b)| format!("{{calc:{}*{}+1}}", a, b)),
        "[a-z ]{0,6}".prop_map(|s| s),
    ]
}

fn arb_text() -> impl Strategy<Value = String> {
    prop::collection::vec(arb_token(), 1..6).prop_map(|parts| parts.concat())
}

fn arb_rule() -> impl Strategy<Value = Rule> {
    (arb_text(), prop::collection::vec(arb_text(), 0..3)).prop_map(|(primary, alternates)| {
        let mut rule = Rule::new(1, ["k"], vec![Segment::Text(primary)]);
        rule.alternates = alternates
            .into_iter()
            .map(|text| vec![Segment::Text(text)])
            .collect();
        rule
    })
}

fn create_test_context(seed: u64) -> ResolutionContext {
    let message = IncomingMessage::group("g1", "alice", "hello there")
        .with_message_id("m-1")
        .with_sender_name("Alice");
    let now = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
    ResolutionContext::from_message(&message, now, seed).with_fire_count(3)
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(20))]

    #[test]
    fn prop_same_seed_same_resolution(rule in arb_rule(), seed in any::<u64>()) {
        let resolver = VariableResolver::new();
        let ctx = create_test_context(seed);
        let first = resolver.resolve_rule(&rule, &ctx);
        let second = resolver.resolve_rule(&rule, &ctx);
        prop_assert_eq!(first, second);
    }

    #[test]
    fn prop_unknown_token_resolves_empty(
        name in "zz[a-z]{1,6}",
        prefix in "[a-z]{0,5}",
        suffix in "[a-z]{0,5}",
    ) {
        let template = vec![Segment::Text(format!("{}{{{}}}{}", prefix, name, suffix))];
        let resolution = VariableResolver::new().resolve(&template, &create_test_context(0));

        let expected = format!("{}{}", prefix, suffix);
        if expected.is_empty() {
            prop_assert!(resolution.segments.is_empty());
        } else {
            prop_assert_eq!(resolution.segments, vec![ResolvedSegment::Text(expected)]);
        }
        prop_assert_eq!(
            resolution.diagnostics,
            vec![Diagnostic::UnknownToken { token: name }]
        );
    }

    #[test]
    fn prop_rand_within_bounds(low in -100i64..100, span in 0i64..100, seed in any::<u64>()) {
        let high = low + span;
        let template = vec![Segment::text(format!("{{rand:{}-{}}}", low, high))];
        let resolution = VariableResolver::new().resolve(&template, &create_test_context(seed));

        prop_assert!(resolution.diagnostics.is_empty());
        match resolution.segments.as_slice() {
            [ResolvedSegment::Text(value)] => {
                let value: i64 = value.parse().unwrap();
                prop_assert!(value >= low && value <= high);
            }
            other => prop_assert!(false, "unexpected segments {:?}", other),
        }
    }
}
