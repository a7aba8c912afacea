#[cfg(test)]
mod proptests {
    use crate::plan::diff_keys;
    use proptest::prelude::*;
    use std::collections::HashSet;

    proptest! {
        #[test]
        fn test_diff_partitions_union(
            remote in proptest::collection::hash_set(0i32..500, 0..200),
            local in proptest::collection::hash_set(0i32..500, 0..200)
        ) {
            let diff = diff_keys(&remote, &local);

            let create: HashSet<i32> = diff.create.iter().copied().collect();
            let update: HashSet<i32> = diff.update.iter().copied().collect();
            let delete: HashSet<i32> = diff.delete.iter().copied().collect();

            prop_assert!(create.is_disjoint(&update));
            prop_assert!(create.is_disjoint(&delete));
            prop_assert!(update.is_disjoint(&delete));

            let union: HashSet<i32> = remote.union(&local).copied().collect();
            let covered: HashSet<i32> = create.iter().chain(&update).chain(&delete).copied().collect();
            prop_assert_eq!(covered, union);

            prop_assert_eq!(create.len() + update.len(), remote.len());
            prop_assert_eq!(update.len() + delete.len(), local.len());
        }

        #[test]
        fn test_diff_output_is_sorted(
            remote in proptest::collection::hash_set("[a-z]{1,6}", 0..50),
            local in proptest::collection::hash_set("[a-z]{1,6}", 0..50)
        ) {
            let diff = diff_keys(&remote, &local);

            prop_assert!(diff.create.windows(2).all(|w| w[0] < w[1]));
            prop_assert!(diff.update.windows(2).all(|w| w[0] < w[1]));
            prop_assert!(diff.delete.windows(2).all(|w| w[0] < w[1]));
        }
    }
}
