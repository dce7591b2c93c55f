//! Property tests for the per-folder state store.

use std::collections::BTreeSet;

use proptest::prelude::*;

use hotfolder_watcher::core::paths::id_is_under;
use hotfolder_watcher::store::StateStore;

/// Short path-like ids drawn from a tiny alphabet so siblings such as `job`
/// and `job2` (or `a` and `a_b`) collide often.
fn arb_id() -> impl Strategy<Value = String> {
    prop::collection::vec("[ab_2]{1,3}", 1..4).prop_map(|parts| parts.join("/"))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Removing a prefix deletes exactly the prefix and its descendants.
    #[test]
    fn prefix_removal_spares_name_prefixed_siblings(
        ids in prop::collection::btree_set(arb_id(), 1..24),
        pick in any::<prop::sample::Index>(),
    ) {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open_for_folder(dir.path()).unwrap();
        for (i, id) in ids.iter().enumerate() {
            #[allow(clippy::cast_precision_loss)]
            let t = i as f64;
            store.upsert_seen(id, t, t).unwrap();
            store.upsert_processed(id, t, t).unwrap();
        }

        let ids_vec: Vec<&String> = ids.iter().collect();
        let prefix = ids_vec[pick.index(ids_vec.len())].clone();
        store.remove_prefix(&prefix).unwrap();

        let expected: BTreeSet<String> = ids
            .iter()
            .filter(|id| !id_is_under(id, &prefix))
            .cloned()
            .collect();
        let seen: BTreeSet<String> = store.all_seen().unwrap().into_iter().map(|r| r.item_id).collect();
        let processed: BTreeSet<String> =
            store.all_processed().unwrap().into_iter().map(|r| r.item_id).collect();
        prop_assert_eq!(&seen, &expected);
        prop_assert_eq!(&processed, &expected);
    }

    /// Records written before a reopen are read back unchanged.
    #[test]
    fn records_survive_reopen(
        entries in prop::collection::btree_map(arb_id(), (0.0f64..2e9, 0.0f64..2e9), 1..16),
    ) {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = StateStore::open_for_folder(dir.path()).unwrap();
            for (id, (seen, mtime)) in &entries {
                store.upsert_seen(id, *seen, *mtime).unwrap();
            }
        }
        let store = StateStore::open_for_folder(dir.path()).unwrap();
        for (id, (seen, mtime)) in &entries {
            let rec = store.seen(id).unwrap().expect("record persisted");
            prop_assert_eq!(rec.seen_time.to_bits(), seen.to_bits());
            prop_assert_eq!(rec.mtime.to_bits(), mtime.to_bits());
        }
    }
}

#[test]
fn job_and_job2_are_independent() {
    let dir = tempfile::tempdir().unwrap();
    let store = StateStore::open_for_folder(dir.path()).unwrap();
    for id in ["job", "job/a.txt", "job2", "job2/a.txt", "job_x"] {
        store.upsert_seen(id, 1.0, 1.0).unwrap();
    }
    assert_eq!(store.remove_seen_prefix("job").unwrap(), 2);
    let left: Vec<String> = store.all_seen().unwrap().into_iter().map(|r| r.item_id).collect();
    assert_eq!(left, vec!["job2".to_string(), "job2/a.txt".to_string(), "job_x".to_string()]);
}
