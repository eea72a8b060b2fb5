// tests/lrc_bad_parts_proptest.rs

//! Property test for the LRC-8-2-2 bad-data-parts table: compares the
//! generated set against an independent combinatorial derivation rather
//! than re-deriving it the same way production code does.

use proptest::prelude::*;
use stormcore::core::groupset::lrc::{
    GLOBAL_PARITIES, LOCAL_GROUP_0_DATA, LOCAL_GROUP_1_DATA, LOCAL_PARITIES,
    generate_bad_data_parts_indices, is_data_partially_unavailable,
};
use std::collections::HashSet;

/// Classifies a loss set independently of `generate_bad_data_parts_indices`:
/// a loss of exactly 4 indices is unreconstructable iff one local group's
/// data losses, its own parity loss, and the global parity losses sum to 4
/// (the remaining group then necessarily contributes none, since the total
/// is fixed at 4).
fn independently_classify(losses: &HashSet<usize>) -> bool {
    if losses.len() > 4 {
        return true;
    }
    if losses.len() != 4 {
        return false;
    }
    let global_loss = GLOBAL_PARITIES.iter().filter(|g| losses.contains(g)).count();
    [
        (&LOCAL_GROUP_0_DATA[..], LOCAL_PARITIES[0]),
        (&LOCAL_GROUP_1_DATA[..], LOCAL_PARITIES[1]),
    ]
    .iter()
    .any(|(data, parity)| {
        let data_loss = data.iter().filter(|d| losses.contains(d)).count();
        let parity_loss = usize::from(losses.contains(parity));
        data_loss + parity_loss + global_loss == 4
    })
}

proptest! {
    #[test]
    fn generated_table_matches_independent_derivation(
        losses in prop::collection::hash_set(0usize..12, 0..=5)
    ) {
        let table = generate_bad_data_parts_indices();
        let ordered: Vec<usize> = losses.iter().copied().collect();
        prop_assert_eq!(
            is_data_partially_unavailable(&ordered, &table),
            independently_classify(&losses)
        );
    }
}
