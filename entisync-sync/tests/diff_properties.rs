//! Property-based tests for the diff engine.
//!
//! Verified properties:
//! - Identity: a target holding exactly the source's textual values needs no work
//! - Fixed point: merging, then diffing again against the same source, is empty
//! - Order independence: target row order does not change the classification
//! - Partition: every row lands in exactly one bucket

use entisync_sync::mock::MockRemote;
use entisync_sync::{Diff, MergeEngine, MergeRequest, RowNormalizer, SourceIndex};
use entisync_types::{CompositeKey, EntityId, FieldValue, MatchKeys, SourceRow, TargetRow};
use proptest::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

// =============================================================================
// HELPER STRATEGIES
// =============================================================================

const FIELDS: [&str; 3] = ["a", "b", "c"];

fn value_strategy() -> impl Strategy<Value = Option<FieldValue>> {
    prop_oneof![
        Just(None),
        Just(Some(FieldValue::Null)),
        (-50i64..50).prop_map(|n| Some(FieldValue::Integer(n))),
        any::<bool>().prop_map(|b| Some(FieldValue::Bool(b))),
        "[a-z]{0,4}".prop_map(|s| Some(FieldValue::Text(s))),
    ]
}

fn source_strategy() -> impl Strategy<Value = Vec<SourceRow>> {
    prop::collection::btree_map("[A-F]", prop::collection::vec(value_strategy(), 3), 0..6).prop_map(
        |rows: BTreeMap<String, Vec<Option<FieldValue>>>| {
            rows.into_iter()
                .map(|(label, values)| {
                    let mut row = SourceRow::new().with("label", label);
                    for (name, value) in FIELDS.iter().zip(values) {
                        if let Some(value) = value {
                            row.insert(*name, value);
                        }
                    }
                    row
                })
                .collect()
        },
    )
}

fn text_strategy() -> impl Strategy<Value = Option<Option<String>>> {
    prop_oneof![
        Just(None),
        Just(Some(None)),
        "[a-z0-9]{0,3}".prop_map(|s| Some(Some(s))),
    ]
}

fn target_strategy() -> impl Strategy<Value = Vec<TargetRow>> {
    prop::collection::btree_map("[A-H]", prop::collection::vec(text_strategy(), 3), 0..6).prop_map(
        |rows: BTreeMap<String, Vec<Option<Option<String>>>>| {
            rows.into_iter()
                .map(|(label, values)| {
                    let mut row = TargetRow::new(EntityId::new(), 1, label);
                    for (name, value) in FIELDS.iter().zip(values) {
                        if let Some(value) = value {
                            row.properties.insert(name.to_string(), value);
                        }
                    }
                    row
                })
                .collect()
        },
    )
}

fn diff(source: &[SourceRow], targets: Vec<TargetRow>) -> Diff {
    let index = SourceIndex::build(source, &RowNormalizer::default(), MatchKeys::default()).unwrap();
    Diff::compute(index, targets).unwrap()
}

/// A target holding each source value in its stored textual form.
fn mirror(source: &[SourceRow]) -> Vec<TargetRow> {
    source
        .iter()
        .map(|row| {
            let mut target = TargetRow::new(EntityId::new(), 1, row.get("label").unwrap().to_string());
            for (name, value) in row.iter().filter(|(n, _)| n.as_str() != "label") {
                target
                    .properties
                    .insert(name.clone(), value.as_text().map(|t| t.into_owned()));
            }
            target
        })
        .collect()
}

fn buckets(d: &Diff) -> (Vec<CompositeKey>, Vec<CompositeKey>, Vec<CompositeKey>) {
    (
        d.to_insert.keys().cloned().collect(),
        d.to_update.keys().cloned().collect(),
        d.to_delete.keys().cloned().collect(),
    )
}

fn block_on<F: std::future::Future>(f: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap()
        .block_on(f)
}

// =============================================================================
// DIFF PROPERTY TESTS
// =============================================================================

proptest! {
    #[test]
    fn mirrored_target_needs_no_work(source in source_strategy()) {
        let d = diff(&source, mirror(&source));
        prop_assert!(d.is_empty());
    }

    #[test]
    fn merge_reaches_fixed_point(source in source_strategy(), targets in target_strategy()) {
        let remote = Arc::new(MockRemote::with_rows(targets));
        let engine = MergeEngine::new(remote.clone()).with_default_project(Some(1));
        let request = MergeRequest::new("list").delete_not_matched(true);

        block_on(engine.merge(&source, &request)).unwrap();

        let again = diff(&source, remote.rows());
        prop_assert!(again.is_empty(), "second pass not empty: {:?}", buckets(&again));
    }

    #[test]
    fn target_order_does_not_matter(source in source_strategy(), targets in target_strategy()) {
        let mut reversed = targets.clone();
        reversed.reverse();
        prop_assert_eq!(buckets(&diff(&source, targets)), buckets(&diff(&source, reversed)));
    }

    #[test]
    fn every_row_lands_in_one_bucket(source in source_strategy(), targets in target_strategy()) {
        let source_labels: BTreeSet<String> = source
            .iter()
            .map(|r| r.get("label").unwrap().to_string())
            .collect();
        let target_labels: BTreeSet<String> = targets.iter().map(|t| t.label.clone()).collect();
        let d = diff(&source, targets);

        let key = |label: &String| CompositeKey::from_values([label.clone()]);
        for label in &source_labels {
            let k = key(label);
            prop_assert_eq!(d.to_insert.contains_key(&k), !target_labels.contains(label));
        }
        for label in &target_labels {
            let k = key(label);
            prop_assert_eq!(d.to_delete.contains_key(&k), !source_labels.contains(label));
            if d.to_update.contains_key(&k) {
                prop_assert!(source_labels.contains(label));
            }
        }
    }
}
