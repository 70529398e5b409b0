//! Property tests for content addressing and tree canonical form

use gud_core::{DiskStore, EntryKind, Error, ObjectHash, ObjectStore, TreeEntry};
use proptest::prelude::*;
use std::collections::BTreeSet;
use tempfile::TempDir;

fn store() -> (TempDir, DiskStore) {
    let tmp = TempDir::new().unwrap();
    let store = DiskStore::open(tmp.path().join("objects")).unwrap();
    (tmp, store)
}

prop_compose! {
    fn arb_names()(
        names in prop::collection::btree_set("[a-zA-Z0-9._-]{1,12}", 2..8),
    ) -> BTreeSet<String> {
        names.into_iter().filter(|n| n != "." && n != "..").collect()
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn test_blob_named_by_content(data in prop::collection::vec(any::<u8>(), 0..4096)) {
        let (_tmp, store) = store();
        let hash = store.put_blob(&data).unwrap();
        prop_assert_eq!(hash, ObjectHash::of(&data));
        prop_assert_eq!(store.put_blob(&data).unwrap(), hash);
        prop_assert_eq!(store.load_blob(&hash).unwrap(), data);
        prop_assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn test_tree_requires_sorted_names(names in arb_names()) {
        prop_assume!(names.len() >= 2);
        let (_tmp, store) = store();
        let blob = store.put_blob(b"x").unwrap();
        let sorted: Vec<TreeEntry> = names
            .iter()
            .map(|n| TreeEntry::new(n.as_str(), blob, EntryKind::Blob))
            .collect();

        let hash = store.put_tree(sorted.clone()).unwrap();
        let loaded = store.load_tree(&hash).unwrap();
        prop_assert_eq!(loaded.entries(), sorted.as_slice());
        prop_assert_eq!(store.put_tree(sorted.clone()).unwrap(), hash);

        let mut reversed = sorted.clone();
        reversed.reverse();
        prop_assert!(matches!(store.put_tree(reversed), Err(Error::InvalidTree(_))));

        let first = sorted[0].clone();
        let mut duplicated = sorted;
        duplicated.insert(1, first);
        prop_assert!(matches!(store.put_tree(duplicated), Err(Error::InvalidTree(_))));
    }
}
