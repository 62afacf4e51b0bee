//! Property-based tests for store invariants.
//!
//! - Plot status only moves open -> resolved/abandoned; illegal moves fail
//!   with `InvalidTransition` and leave the record untouched.
//! - Identifiers are never repeated per kind.

use std::collections::HashSet;
use std::sync::Arc;

use proptest::prelude::*;

use saga_core::embedding::StubEmbeddingProvider;
use saga_core::{IdKind, MemoryError, MemoryStore, Moment, PlotFields, PlotStatus, SagaConfig};

fn open(dir: &std::path::Path) -> MemoryStore {
    let mut config = SagaConfig::default();
    config.memory.data_dir = dir.to_path_buf();
    MemoryStore::open(&config, Arc::new(StubEmbeddingProvider::new(4))).expect("open")
}

// ---------------------------------------------------------------------------
// Strategy helpers
// ---------------------------------------------------------------------------

fn arb_status() -> impl Strategy<Value = PlotStatus> {
    prop_oneof![
        Just(PlotStatus::Open),
        Just(PlotStatus::Resolved),
        Just(PlotStatus::Abandoned),
    ]
}

fn arb_kind() -> impl Strategy<Value = IdKind> {
    prop_oneof![Just(IdKind::Character), Just(IdKind::Plot)]
}

// ---------------------------------------------------------------------------
// Property: plot status is monotone
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn plot_status_is_monotone(requests in prop::collection::vec(arb_status(), 1..12)) {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = open(dir.path());
        let id = store
            .upsert_plot(
                None,
                PlotFields { description: Some("A thread".into()), characters: Vec::new() },
                PlotStatus::Open,
                Moment::Planning,
            )
            .expect("create");

        for (n, next) in requests.into_iter().enumerate() {
            let at = Moment::Episode(u32::try_from(n).expect("small"));
            let before = store.plot(id).expect("plot").clone();
            match store.upsert_plot(Some(id), PlotFields::default(), next, at) {
                Ok(_) => {
                    prop_assert!(before.status.can_become(next));
                    prop_assert_eq!(store.plot(id).expect("plot").status, next);
                }
                Err(MemoryError::InvalidTransition { from, to, .. }) => {
                    prop_assert!(!before.status.can_become(next));
                    prop_assert_eq!(from, before.status);
                    prop_assert_eq!(to, next);
                    let after = store.plot(id).expect("plot");
                    prop_assert_eq!(after.status, before.status);
                    prop_assert_eq!(after.revision, before.revision);
                    prop_assert_eq!(after.status_history.len(), before.status_history.len());
                }
                Err(other) => prop_assert!(false, "unexpected error: {other}"),
            }
        }

        let history = &store.plot(id).expect("plot").status_history;
        let closed = history.iter().position(|c| c.status.is_closed());
        if let Some(first_closed) = closed {
            prop_assert_eq!(history.len(), first_closed + 1, "nothing follows a terminal status");
        }
    }
}

// ---------------------------------------------------------------------------
// Property: ids are unique per kind, including across reopen
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn allocated_ids_never_repeat(
        kinds in prop::collection::vec(arb_kind(), 1..40),
        reopen_at in 0usize..40,
    ) {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = open(dir.path());
        let mut seen: HashSet<(bool, u64)> = HashSet::new();

        for (n, kind) in kinds.into_iter().enumerate() {
            if n == reopen_at {
                store = open(dir.path());
            }
            let id = store.allocate_id(kind).expect("allocate");
            prop_assert!(seen.insert((kind == IdKind::Character, id)), "repeated {kind} id {id}");
        }
    }
}
