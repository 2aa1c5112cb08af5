//! Property-based tests for lexicon persistence
//!
//! **Property 1: Persistence Round-Trip**
//! *For any* set of valid rules added in any order, persisting the lexicon and
//! loading it into a fresh store SHALL produce the same rules, ordered by ID.
//!
//! **Property 2: Failed Mutation Leaves State Unchanged**
//! *For any* invalid patch, `update` SHALL fail and the stored rule SHALL be
//! identical to the one before the call.

use std::collections::BTreeSet;
use std::sync::Arc;

use lexireply::auto_reply::{
    CooldownScope, JsonFileBackend, LexiconError, LexiconStore, MatchMode, Rule, RuleId,
    RulePatch, Segment, StoreOptions,
};
use proptest::prelude::*;
use tempfile::TempDir;

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_match_mode() -> impl Strategy<Value = MatchMode> {
    prop_oneof![
        Just(MatchMode::Exact),
        Just(MatchMode::Contains),
        Just(MatchMode::Prefix),
        Just(MatchMode::Pattern),
    ]
}

fn arb_scope() -> impl Strategy<Value = CooldownScope> {
    prop_oneof![
        Just(CooldownScope::Global),
        Just(CooldownScope::PerGroup),
        Just(CooldownScope::PerUser),
    ]
}

fn arb_segment() -> impl Strategy<Value = Segment> {
    prop_oneof![
        "[a-zA-Z0-9 {}]{1,20}".prop_map(Segment::Text),
        "https://[a-z]{3,8}\\.png".prop_map(Segment::Image),
        "[0-9]{0,6}".prop_map(Segment::Mention),
        "[0-9]{1,3}".prop_map(Segment::Face),
        prop::option::of("[0-9]{1,6}").prop_map(Segment::Quote),
        "https://[a-z]{3,8}\\.amr".prop_map(Segment::Voice),
        "[0-9]{0,6}".prop_map(Segment::Poke),
    ]
}

fn arb_template() -> impl Strategy<Value = Vec<Segment>> {
    prop::collection::vec(arb_segment(), 1..4)
}

/// Keywords valid in every match mode: letters, digits and capture slots
fn arb_keywords() -> impl Strategy<Value = BTreeSet<String>> {
    prop::collection::btree_set(
        prop_oneof!["[a-z0-9]{1,8}", "[a-z]{1,4}\\[n\\.1\\][a-z]{0,4}"],
        1..4,
    )
}

fn arb_rule(id: u64) -> impl Strategy<Value = Rule> {
    (
        arb_keywords(),
        arb_match_mode(),
        arb_template(),
        prop::collection::vec(arb_template(), 0..3),
        0u64..3600,
        arb_scope(),
        any::<bool>(),
    )
        .prop_map(
            move |(keywords, mode, template, alternates, cooldown, scope, enabled)| {
                let mut rule = Rule::new(id, keywords, template)
                    .with_mode(mode)
                    .with_cooldown(cooldown)
                    .with_scope(scope)
                    .with_enabled(enabled);
                rule.alternates = alternates;
                rule
            },
        )
}

fn arb_rules() -> impl Strategy<Value = Vec<Rule>> {
    prop::collection::btree_set(1u64..1000, 1..8)
        .prop_flat_map(|ids| ids.into_iter().map(arb_rule).collect::<Vec<_>>())
        .prop_shuffle()
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(20))]

    #[test]
    fn prop_persist_load_round_trip(rules in arb_rules()) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lexicon.json");

        let (expected, loaded) = runtime().block_on(async {
            let store = LexiconStore::new(
                Arc::new(JsonFileBackend::new(&path)),
                StoreOptions::default(),
            );
            for rule in rules {
                store.add(rule).unwrap();
            }
            store.persist().await.unwrap();

            let fresh = LexiconStore::new(
                Arc::new(JsonFileBackend::new(&path)),
                StoreOptions::default(),
            );
            let loaded: Vec<Rule> = fresh
                .load()
                .await
                .unwrap()
                .iter()
                .map(|r| Rule::clone(r))
                .collect();
            (store.list(None), loaded)
        });

        prop_assert_eq!(&expected, &loaded);
        let ids: Vec<RuleId> = loaded.iter().map(|r| r.id).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        prop_assert_eq!(ids, sorted);
    }

    #[test]
    fn prop_invalid_update_is_atomic(rule in arb_rule(1), empty_template in any::<bool>()) {
        let dir = TempDir::new().unwrap();
        let store = LexiconStore::new(
            Arc::new(JsonFileBackend::new(dir.path().join("lexicon.json"))),
            StoreOptions::default(),
        );
        store.add(rule).unwrap();
        let before = store.get(RuleId(1)).unwrap();

        let patch = if empty_template {
            RulePatch {
                response_template: Some(Vec::new()),
                cooldown_seconds: Some(1),
                ..Default::default()
            }
        } else {
            RulePatch {
                keywords: Some(BTreeSet::new()),
                enabled: Some(!before.enabled),
                ..Default::default()
            }
        };

        let result = store.update(RuleId(1), patch);
        prop_assert!(matches!(result, Err(LexiconError::InvalidRule(_))));
        prop_assert_eq!(store.get(RuleId(1)).unwrap(), before);
    }
}
