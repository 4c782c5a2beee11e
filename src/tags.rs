use ahash::AHashMap;
use smallvec::SmallVec;

/// Scratch buffer for one entity's tags during ingest.
pub type TagScratch = SmallVec<[(u32, u32); 8]>;

/// Per-column tag storage in CSR form: a flat array of `(key_id, value_id)`
/// pairs plus an offsets array of length `n + 1`. Keys within one entity are
/// sorted ascending so lookups binary-search.
///
/// An inverted index `key_id -> entity indexes` is built at finalization to
/// serve tag search in time linear in the result count.
#[derive(Debug)]
pub struct TagSet {
    pairs: Vec<(u32, u32)>,
    offsets: Vec<u32>,
    by_key: AHashMap<u32, Vec<u32>>,
}

impl Default for TagSet {
    fn default() -> Self {
        Self::new()
    }
}

impl TagSet {
    pub fn new() -> Self {
        Self { pairs: Vec::new(), offsets: vec![0], by_key: AHashMap::new() }
    }

    /// Number of entities with a tag slot (tagged or not).
    #[inline]
    pub fn len(&self) -> usize {
        self.offsets.len() - 1
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total number of stored (key, value) pairs.
    #[inline]
    pub fn pair_count(&self) -> usize {
        self.pairs.len()
    }

    /// Append the next entity's tags. Sorts by key id; a key repeated within
    /// one entity keeps its last value.
    pub fn push(&mut self, scratch: &mut TagScratch) {
        scratch.sort_by_key(|&(k, _)| k);
        let start = self.pairs.len();
        for &(k, v) in scratch.iter() {
            let end = self.pairs.len();
            if end > start && self.pairs[end - 1].0 == k {
                self.pairs[end - 1].1 = v;
            } else {
                self.pairs.push((k, v));
            }
        }
        self.offsets.push(self.pairs.len() as u32);
        scratch.clear();
    }

    /// All (key_id, value_id) pairs of one entity, key-ascending.
    #[inline]
    pub fn tags_of(&self, index: u32) -> &[(u32, u32)] {
        let start = self.offsets[index as usize] as usize;
        let end = self.offsets[index as usize + 1] as usize;
        &self.pairs[start..end]
    }

    /// Value id for `key_id` on one entity, if present.
    pub fn get(&self, index: u32, key_id: u32) -> Option<u32> {
        let tags = self.tags_of(index);
        tags.binary_search_by_key(&key_id, |&(k, _)| k).ok().map(|i| tags[i].1)
    }

    #[inline]
    pub fn has_key(&self, index: u32, key_id: u32) -> bool {
        self.get(index, key_id).is_some()
    }

    #[inline]
    pub fn cardinality(&self, index: u32) -> u32 {
        self.offsets[index as usize + 1] - self.offsets[index as usize]
    }

    /// Rebuild in permuted entity order: entity `i` of the result is entity
    /// `perm[i]` of the current layout.
    pub fn permute(&mut self, perm: &[u32]) {
        debug_assert_eq!(perm.len(), self.len());
        let mut pairs = Vec::with_capacity(self.pairs.len());
        let mut offsets = Vec::with_capacity(self.offsets.len());
        offsets.push(0);
        for &old in perm {
            pairs.extend_from_slice(self.tags_of(old));
            offsets.push(pairs.len() as u32);
        }
        self.pairs = pairs;
        self.offsets = offsets;
        self.by_key.clear();
    }

    /// Build the inverted key index. Entity indexes come out ascending
    /// because entities are visited in order.
    pub fn finalize(&mut self) {
        self.by_key.clear();
        for index in 0..self.len() as u32 {
            let keys: Vec<u32> = self.tags_of(index).iter().map(|&(k, _)| k).collect();
            for k in keys {
                self.by_key.entry(k).or_default().push(index);
            }
        }
    }

    /// Ascending entity indexes carrying `key_id`. Empty unless finalized.
    pub fn entities_with_key(&self, key_id: u32) -> &[u32] {
        self.by_key.get(&key_id).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    fn build() -> TagSet {
        let mut tags = TagSet::new();
        let mut scratch: TagScratch = smallvec![(3, 30), (1, 10)];
        tags.push(&mut scratch); // entity 0: keys 1, 3
        let mut scratch: TagScratch = smallvec![];
        tags.push(&mut scratch); // entity 1: untagged
        let mut scratch: TagScratch = smallvec![(1, 11), (2, 20)];
        tags.push(&mut scratch); // entity 2: keys 1, 2
        tags.finalize();
        tags
    }

    #[test]
    fn csr_layout_and_lookup() {
        let tags = build();
        assert_eq!(tags.len(), 3);
        assert_eq!(tags.pair_count(), 4);

        // Keys come back sorted regardless of insertion order.
        assert_eq!(tags.tags_of(0), &[(1, 10), (3, 30)]);
        assert_eq!(tags.tags_of(1), &[]);
        assert_eq!(tags.tags_of(2), &[(1, 11), (2, 20)]);

        assert_eq!(tags.get(0, 3), Some(30));
        assert_eq!(tags.get(0, 2), None);
        assert!(tags.has_key(2, 2));
        assert_eq!(tags.cardinality(0), 2);
        assert_eq!(tags.cardinality(1), 0);
    }

    #[test]
    fn repeated_key_keeps_last_value() {
        let mut tags = TagSet::new();
        let mut scratch: TagScratch = smallvec![(5, 1), (5, 2)];
        tags.push(&mut scratch);
        assert_eq!(tags.tags_of(0), &[(5, 2)]);
    }

    #[test]
    fn inverted_index_lists_ascending() {
        let tags = build();
        assert_eq!(tags.entities_with_key(1), &[0, 2]);
        assert_eq!(tags.entities_with_key(3), &[0]);
        assert_eq!(tags.entities_with_key(9), &[] as &[u32]);
    }

    #[test]
    fn permute_reorders_entities() {
        let mut tags = build();
        tags.permute(&[2, 0, 1]);
        tags.finalize();
        assert_eq!(tags.tags_of(0), &[(1, 11), (2, 20)]);
        assert_eq!(tags.tags_of(1), &[(1, 10), (3, 30)]);
        assert_eq!(tags.tags_of(2), &[]);
        assert_eq!(tags.entities_with_key(1), &[0, 1]);
    }
}
