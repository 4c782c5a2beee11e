use ahash::AHashMap;

use crate::column::{
    apply_permutation, check_unique, index_of, sort_permutation, NodeColumn, WayColumn,
};
use crate::error::{Error, EntityKind, Result};
use crate::tags::{TagScratch, TagSet};

/// One member triple in raw (interned) form: kind, ref id, role string id.
pub type RawMember = (EntityKind, i64, u32);

/// Parallel arrays of relation data: `ids`, CSR member runs (kind / ref /
/// role id), plus the CSR tag store. Finalization builds an incidence
/// back-index `(kind, ref) -> relation indexes`.
#[derive(Debug)]
pub struct RelationColumn {
    ids: Vec<i64>,
    tags: TagSet,
    member_kinds: Vec<EntityKind>,
    member_refs: Vec<i64>,
    member_roles: Vec<u32>,
    member_starts: Vec<u32>,
    incidence: AHashMap<(EntityKind, i64), Vec<u32>>,
}

impl Default for RelationColumn {
    fn default() -> Self {
        Self::new()
    }
}

impl RelationColumn {
    pub fn new() -> Self {
        Self {
            ids: Vec::new(),
            tags: TagSet::new(),
            member_kinds: Vec::new(),
            member_refs: Vec::new(),
            member_roles: Vec::new(),
            member_starts: vec![0],
            incidence: AHashMap::new(),
        }
    }

    /// Append one relation in file order. Rejects identical consecutive
    /// members.
    pub fn push(&mut self, id: i64, members: &[RawMember], tags: &mut TagScratch) -> Result<()> {
        for pair in members.windows(2) {
            if pair[0] == pair[1] {
                return Err(Error::corrupt(format!(
                    "relation {id} repeats member {} {} in consecutive entries",
                    pair[0].0, pair[0].1
                )));
            }
        }
        self.ids.push(id);
        for &(kind, ref_id, role) in members {
            self.member_kinds.push(kind);
            self.member_refs.push(ref_id);
            self.member_roles.push(role);
        }
        self.member_starts.push(self.member_refs.len() as u32);
        self.tags.push(tags);
        Ok(())
    }

    /// Sort by id, permute all parallel arrays (rebuilding the member CSR),
    /// verify referential closure unless the store is partial, and build the
    /// incidence back-index.
    pub fn finalize(&mut self, nodes: &NodeColumn, ways: &WayColumn, partial: bool) -> Result<()> {
        let perm = sort_permutation(&self.ids);
        let old_ids = std::mem::take(&mut self.ids);
        self.ids = apply_permutation(&perm, &old_ids);
        check_unique(&self.ids, EntityKind::Relation)?;
        self.tags.permute(&perm);
        self.tags.finalize();

        let old_kinds = std::mem::take(&mut self.member_kinds);
        let old_refs = std::mem::take(&mut self.member_refs);
        let old_roles = std::mem::take(&mut self.member_roles);
        let old_starts = std::mem::take(&mut self.member_starts);
        let mut starts = Vec::with_capacity(old_starts.len());
        starts.push(0);
        for &old in &perm {
            let span = old_starts[old as usize] as usize..old_starts[old as usize + 1] as usize;
            self.member_kinds.extend_from_slice(&old_kinds[span.clone()]);
            self.member_refs.extend_from_slice(&old_refs[span.clone()]);
            self.member_roles.extend_from_slice(&old_roles[span]);
            starts.push(self.member_refs.len() as u32);
        }
        self.member_starts = starts;

        if !partial {
            for relation in 0..self.ids.len() as u32 {
                let (kinds, refs, _) = self.members_of(relation);
                for (&kind, &ref_id) in kinds.iter().zip(refs.iter()) {
                    let resolves = match kind {
                        EntityKind::Node => nodes.index_of(ref_id).is_some(),
                        EntityKind::Way => ways.index_of(ref_id).is_some(),
                        EntityKind::Relation => index_of(&self.ids, ref_id).is_some(),
                    };
                    if !resolves {
                        return Err(Error::corrupt(format!(
                            "relation {} references missing {kind} {ref_id}",
                            self.ids[relation as usize]
                        )));
                    }
                }
            }
        }

        self.incidence.clear();
        for relation in 0..self.ids.len() as u32 {
            let (kinds, refs, _) = self.members_of(relation);
            let kinds = kinds.to_vec();
            let refs = refs.to_vec();
            for (&kind, &ref_id) in kinds.iter().zip(refs.iter()) {
                let list = self.incidence.entry((kind, ref_id)).or_default();
                // A relation listing the same member twice stays listed once.
                if list.last() != Some(&relation) {
                    list.push(relation);
                }
            }
        }
        Ok(())
    }

    #[inline] pub fn len(&self) -> usize { self.ids.len() }

    #[inline] pub fn is_empty(&self) -> bool { self.ids.is_empty() }

    #[inline] pub fn ids(&self) -> &[i64] { &self.ids }

    #[inline] pub fn id(&self, index: u32) -> i64 { self.ids[index as usize] }

    #[inline] pub fn index_of(&self, id: i64) -> Option<u32> { index_of(&self.ids, id) }

    #[inline] pub fn tags(&self) -> &TagSet { &self.tags }

    /// Total number of stored members.
    #[inline] pub fn member_count(&self) -> usize { self.member_refs.len() }

    /// Member runs of one relation as parallel slices (kinds, refs, role ids).
    pub fn members_of(&self, index: u32) -> (&[EntityKind], &[i64], &[u32]) {
        let start = self.member_starts[index as usize] as usize;
        let end = self.member_starts[index as usize + 1] as usize;
        (
            &self.member_kinds[start..end],
            &self.member_refs[start..end],
            &self.member_roles[start..end],
        )
    }

    /// Ascending indexes of relations that reference `(kind, ref_id)`.
    pub fn relations_for(&self, kind: EntityKind, ref_id: i64) -> &[u32] {
        self.incidence.get(&(kind, ref_id)).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    fn columns() -> (NodeColumn, WayColumn) {
        let mut nodes = NodeColumn::new();
        let mut tags: TagScratch = smallvec![];
        nodes.push(1, 0.0, 0.0, &mut tags);
        let mut tags: TagScratch = smallvec![];
        nodes.push(2, 1.0, 0.0, &mut tags);
        nodes.finalize().unwrap();

        let mut ways = WayColumn::new();
        let mut tags: TagScratch = smallvec![];
        ways.push(10, &[1, 2], &mut tags).unwrap();
        ways.finalize(&nodes, false).unwrap();
        (nodes, ways)
    }

    fn build() -> (NodeColumn, WayColumn, RelationColumn) {
        let (nodes, ways) = columns();
        let mut relations = RelationColumn::new();
        let mut tags: TagScratch = smallvec![(4, 5)];
        relations
            .push(200, &[(EntityKind::Way, 10, 1), (EntityKind::Node, 1, 2)], &mut tags)
            .unwrap();
        let mut tags: TagScratch = smallvec![];
        relations.push(100, &[(EntityKind::Node, 2, 0)], &mut tags).unwrap();
        relations.finalize(&nodes, &ways, false).unwrap();
        (nodes, ways, relations)
    }

    #[test]
    fn finalize_sorts_and_rebuilds_member_csr() {
        let (_, _, relations) = build();
        assert_eq!(relations.ids(), &[100, 200]);
        let (kinds, refs, roles) = relations.members_of(0);
        assert_eq!((kinds, refs, roles), (&[EntityKind::Node][..], &[2_i64][..], &[0_u32][..]));
        let (kinds, refs, _) = relations.members_of(1);
        assert_eq!(kinds, &[EntityKind::Way, EntityKind::Node]);
        assert_eq!(refs, &[10, 1]);
        assert_eq!(relations.tags().tags_of(1), &[(4, 5)]);
    }

    #[test]
    fn incidence_back_index() {
        let (_, _, relations) = build();
        assert_eq!(relations.relations_for(EntityKind::Way, 10), &[1]);
        assert_eq!(relations.relations_for(EntityKind::Node, 2), &[0]);
        assert!(relations.relations_for(EntityKind::Node, 99).is_empty());
    }

    #[test]
    fn identical_consecutive_members_are_rejected() {
        let mut relations = RelationColumn::new();
        let mut tags: TagScratch = smallvec![];
        let err = relations.push(
            5,
            &[(EntityKind::Node, 1, 0), (EntityKind::Node, 1, 0)],
            &mut tags,
        );
        assert!(matches!(err, Err(Error::CorruptInput { .. })));
    }

    #[test]
    fn dangling_member_is_fatal_unless_partial() {
        let (nodes, ways) = columns();
        let mut relations = RelationColumn::new();
        let mut tags: TagScratch = smallvec![];
        relations.push(7, &[(EntityKind::Way, 999, 0)], &mut tags).unwrap();
        assert!(relations.finalize(&nodes, &ways, false).is_err());

        let mut relations = RelationColumn::new();
        let mut tags: TagScratch = smallvec![];
        relations.push(7, &[(EntityKind::Way, 999, 0)], &mut tags).unwrap();
        relations.finalize(&nodes, &ways, true).unwrap();
        assert_eq!(relations.relations_for(EntityKind::Way, 999), &[0]);
    }

    #[test]
    fn relation_members_may_reference_relations() {
        let (nodes, ways) = columns();
        let mut relations = RelationColumn::new();
        let mut tags: TagScratch = smallvec![];
        relations.push(1, &[(EntityKind::Node, 1, 0)], &mut tags).unwrap();
        let mut tags: TagScratch = smallvec![];
        relations.push(2, &[(EntityKind::Relation, 1, 0)], &mut tags).unwrap();
        relations.finalize(&nodes, &ways, false).unwrap();
        assert_eq!(relations.relations_for(EntityKind::Relation, 1), &[1]);
    }
}
