//! Property-based tests for the state model and diff engine.
//!
//! Covers: hash stability under normalization, order insensitivity of the
//! hash, diff self-identity, and single-field-change sparseness.

use proptest::prelude::*;

use nirivana_core::diff::diff;
use nirivana_core::patch::PatchOp;
use nirivana_core::state::{normalize, State, Terminal, Window, Workspace};

// ============================================================================
// Strategies
// ============================================================================

fn arb_name() -> impl Strategy<Value = Option<String>> {
    prop_oneof![Just(None), "[a-z]{1,8}".prop_map(Some)]
}

fn arb_terminal() -> impl Strategy<Value = Option<Terminal>> {
    prop_oneof![
        Just(None),
        (
            prop_oneof![Just(None), "/[a-z/]{1,12}".prop_map(Some)],
            proptest::collection::vec("[a-z]{1,6}", 0..3),
            prop_oneof![Just(None), "[a-z-]{1,8}".prop_map(Some)],
        )
            .prop_map(|(cwd, process_tags, session_tag)| {
                Some(Terminal {
                    cwd,
                    process_tags,
                    session_tag,
                })
            }),
    ]
}

fn arb_workspaces() -> impl Strategy<Value = Vec<Workspace>> {
    proptest::collection::vec((0u32..5, arb_name()), 0..4).prop_map(|entries| {
        entries
            .into_iter()
            .enumerate()
            .map(|(i, (index, name))| Workspace {
                id: format!("ws-{i}"),
                index,
                name,
            })
            .collect()
    })
}

fn arb_windows() -> impl Strategy<Value = Vec<Window>> {
    proptest::collection::vec(
        ("[a-z]{1,8}", arb_name(), proptest::option::of(1i64..9999), arb_terminal()),
        0..5,
    )
    .prop_map(|entries| {
        entries
            .into_iter()
            .enumerate()
            .map(|(i, (app_id, title, pid, terminal))| Window {
                key: format!("w:{app_id}:{i}"),
                app_id,
                workspace_id: format!("ws-{}", i % 3),
                title,
                pid,
                terminal,
            })
            .collect()
    })
}

prop_compose! {
    fn arb_state()(workspaces in arb_workspaces(), windows in arb_windows()) -> State {
        State { workspaces, windows }
    }
}

// ============================================================================
// Hash properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    /// hash(S) = hash(normalize(S)) = hash(normalize(normalize(S)))
    #[test]
    fn prop_hash_stable_under_normalization(state in arb_state()) {
        let direct = state.hash().unwrap();
        let normalized = normalize(&state);
        prop_assert_eq!(&direct, &normalized.hash().unwrap());
        prop_assert_eq!(&direct, &normalize(&normalized).hash().unwrap());
    }

    /// Permuting workspaces, windows, and process_tags never changes the hash.
    #[test]
    fn prop_hash_is_order_insensitive(
        state in arb_state(),
        seed in any::<u64>(),
    ) {
        let mut shuffled = state.clone();
        // Deterministic permutation driven by the seed.
        let rotate = |len: usize| if len == 0 { 0 } else { (seed as usize) % len };
        let workspaces_rotate = rotate(shuffled.workspaces.len());
        shuffled.workspaces.rotate_left(workspaces_rotate);
        let windows_rotate = rotate(shuffled.windows.len());
        shuffled.windows.rotate_left(windows_rotate);
        shuffled.workspaces.reverse();
        shuffled.windows.reverse();
        for window in &mut shuffled.windows {
            if let Some(terminal) = &mut window.terminal {
                terminal.process_tags.reverse();
            }
        }
        prop_assert_eq!(state.hash().unwrap(), shuffled.hash().unwrap());
    }

    /// Normalization is idempotent and total.
    #[test]
    fn prop_normalize_is_idempotent(state in arb_state()) {
        let once = normalize(&state);
        let twice = normalize(&once);
        prop_assert_eq!(once, twice);
    }

    /// Normalized windows are sorted by key and workspaces by (index, id).
    #[test]
    fn prop_normalize_orders_collections(state in arb_state()) {
        let normalized = normalize(&state);
        for pair in normalized.windows.windows(2) {
            prop_assert!(pair[0].key <= pair[1].key);
        }
        for pair in normalized.workspaces.windows(2) {
            prop_assert!(
                (pair[0].index, &pair[0].id) <= (pair[1].index, &pair[1].id)
            );
        }
    }
}

// ============================================================================
// Diff properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    /// diff(S, S) = ([], false)
    #[test]
    fn prop_diff_self_is_empty(state in arb_state()) {
        let (patches, changed) = diff(&state, &state).unwrap();
        prop_assert!(patches.is_empty());
        prop_assert!(!changed);
    }

    /// Changing exactly one field on one window yields exactly one patch
    /// with exactly that key.
    #[test]
    fn prop_single_field_change_is_sparse(
        state in arb_state().prop_filter("needs a window", |s| !s.windows.is_empty()),
        pick in any::<prop::sample::Index>(),
    ) {
        let before = normalize(&state);
        let mut after = before.clone();
        let index = pick.index(after.windows.len());
        let fresh_title = "proptest-fresh-title".to_string();
        // Guaranteed to differ from any generated title.
        after.windows[index].title = Some(fresh_title.clone());
        let changed_key = after.windows[index].key.clone();

        if before.windows[index].title.as_deref() == Some(fresh_title.as_str()) {
            return Ok(());
        }

        let (patches, changed) = diff(&before, &after).unwrap();
        prop_assert!(changed);
        prop_assert_eq!(patches.len(), 1);
        prop_assert_eq!(&patches[0].window_key, &changed_key);
        prop_assert_eq!(
            patches[0].fields.ops(),
            &[PatchOp::Title(fresh_title)]
        );
    }

    /// Every window removed from the state produces a delete patch; diff is
    /// total over the key union.
    #[test]
    fn prop_removed_windows_all_deleted(
        state in arb_state().prop_filter("needs windows", |s| !s.windows.is_empty()),
    ) {
        let before = normalize(&state);
        let after = State { workspaces: before.workspaces.clone(), windows: Vec::new() };
        let (patches, changed) = diff(&before, &after).unwrap();
        prop_assert!(changed);
        prop_assert_eq!(patches.len(), before.windows.len());
        for patch in &patches {
            prop_assert!(patch.fields.is_delete());
        }
    }
}
