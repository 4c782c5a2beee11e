//! Columnar entity storage: id-sorted parallel arrays per entity kind.
//!
//! Each column accumulates entities in file order during ingest, then
//! `finalize` sorts by id and applies the same permutation to every parallel
//! array, so binary search serves id→index and plain indexing serves
//! index→id afterwards.

mod nodes;
mod relations;
mod ways;

pub use nodes::NodeColumn;
pub use relations::RelationColumn;
pub use ways::{NodeToWays, WayColumn};

use crate::error::{Error, EntityKind, Result};

/// Stable ascending sort permutation of `ids`: element `i` of the sorted
/// layout is element `perm[i]` of the current layout.
pub(crate) fn sort_permutation(ids: &[i64]) -> Vec<u32> {
    let mut perm: Vec<u32> = (0..ids.len() as u32).collect();
    perm.sort_by_key(|&i| ids[i as usize]);
    perm
}

/// Reorder a parallel array by a permutation produced by [`sort_permutation`].
pub(crate) fn apply_permutation<T: Clone>(perm: &[u32], data: &[T]) -> Vec<T> {
    perm.iter().map(|&i| data[i as usize].clone()).collect()
}

/// Enforce id uniqueness within a kind on an already-sorted id array.
pub(crate) fn check_unique(ids: &[i64], kind: EntityKind) -> Result<()> {
    for pair in ids.windows(2) {
        if pair[0] == pair[1] {
            return Err(Error::corrupt(format!("duplicate {kind} id {}", pair[0])));
        }
    }
    Ok(())
}

/// Dense index of `id` in a sorted id array.
#[inline]
pub(crate) fn index_of(ids: &[i64], id: i64) -> Option<u32> {
    ids.binary_search(&id).ok().map(|i| i as u32)
}
