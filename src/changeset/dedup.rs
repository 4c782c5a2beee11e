use ahash::{AHashMap, AHashSet};

use crate::changeset::Changeset;
use crate::entity::{Member, VERSION_KEY};
use crate::error::{EntityKind, Result};
use crate::spatial::Bbox;
use crate::store::Store;

/// Counters reported by the deduplication passes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct DedupStats {
    pub nodes_deduplicated: usize,
    pub node_refs_replaced: usize,
    pub ways_deduplicated: usize,
}

/// Survivor ordering key: upstream version, then tag count, then id. The
/// maximum wins, so exact ties resolve to the larger id and the outcome is
/// independent of input order.
fn node_rank(store: &Store, index: u32) -> (u32, u32, i64) {
    let version = store
        .tag_value(store.nodes().tags(), index, VERSION_KEY)
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    (version, store.nodes().tags().cardinality(index), store.nodes().id(index))
}

fn way_rank(store: &Store, index: u32) -> (u32, u32, i64) {
    let version = store
        .tag_value(store.ways().tags(), index, VERSION_KEY)
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    (version, store.ways().tags().cardinality(index), store.ways().id(index))
}

/// Drop adjacent duplicates from a ref list after replacement.
fn collapse_refs(refs: Vec<i64>) -> Vec<i64> {
    let mut out: Vec<i64> = Vec::with_capacity(refs.len());
    for id in refs {
        if out.last() != Some(&id) {
            out.push(id);
        }
    }
    out
}

fn collapse_members(members: Vec<Member>) -> Vec<Member> {
    let mut out: Vec<Member> = Vec::with_capacity(members.len());
    for member in members {
        if out.last() != Some(&member) {
            out.push(member);
        }
    }
    out
}

impl<'a> Changeset<'a> {
    /// Merge coincident nodes. For every input node, all other nodes at the
    /// exact same coordinate collapse onto one survivor; losers are deleted
    /// and every way ref and relation node member pointing at a loser is
    /// rewritten to the survivor (removing any newly-adjacent duplicates).
    pub fn deduplicate_nodes(
        &mut self,
        ids: impl IntoIterator<Item = i64>,
    ) -> Result<DedupStats> {
        let base = self.base;
        let mut stats = DedupStats::default();
        let mut replacements: AHashMap<i64, i64> = AHashMap::new();

        for id in ids {
            self.check_cancelled()?;
            if replacements.contains_key(&id) {
                continue; // already merged away
            }
            let Some(index) = base.nodes().index_of(id) else { continue };
            let (lon, lat) = base.nodes().position(index);
            // Zero-radius spatial probe.
            let cluster = base.nodes().within_bbox(&Bbox::new(lon, lat, lon, lat));
            if cluster.len() < 2 {
                continue;
            }
            let survivor = cluster
                .iter()
                .copied()
                .max_by_key(|&candidate| node_rank(base, candidate))
                .expect("cluster is non-empty");
            let survivor_id = base.nodes().id(survivor);
            for loser in cluster {
                if loser == survivor {
                    continue;
                }
                let loser_id = base.nodes().id(loser);
                if replacements.contains_key(&loser_id) {
                    continue;
                }
                replacements.insert(loser_id, survivor_id);
                self.delete(EntityKind::Node, loser_id)?;
                self.relate(EntityKind::Node, loser_id, (EntityKind::Node, survivor_id));
                stats.nodes_deduplicated += 1;
            }
        }

        if replacements.is_empty() {
            return Ok(stats);
        }

        // Flatten chains until no survivor is itself scheduled for removal.
        let frozen = replacements.clone();
        for survivor in replacements.values_mut() {
            while let Some(&next) = frozen.get(survivor) {
                if next == *survivor {
                    break;
                }
                *survivor = next;
            }
        }

        stats.node_refs_replaced += self.rewrite_way_refs(&replacements)?;
        stats.node_refs_replaced += self.rewrite_relation_members(&replacements)?;
        Ok(stats)
    }

    /// Rewrite way refs through the replacement map. Touched ways come from
    /// the node→ways back-index plus any pending way versions.
    fn rewrite_way_refs(&mut self, replacements: &AHashMap<i64, i64>) -> Result<usize> {
        let base = self.base;
        let back = base.ways().node_to_ways(base.nodes());

        let mut touched: Vec<i64> = Vec::new();
        for &loser_id in replacements.keys() {
            if let Some(node) = base.nodes().index_of(loser_id) {
                touched.extend(back.ways_of(node).iter().map(|&way| base.ways().id(way)));
            }
        }
        // Pending creates/modifies may reference losers without the base
        // index knowing.
        touched.extend(self.way_changes.keys().copied());
        touched.sort_unstable();
        touched.dedup();

        let mut replaced = 0usize;
        for way_id in touched {
            self.check_cancelled()?;
            let Some(way) = self.current_way(way_id) else { continue };
            let mut hits = 0usize;
            let mut survivors_used: Vec<i64> = Vec::new();
            let refs: Vec<i64> = way
                .refs
                .iter()
                .map(|id| match replacements.get(id) {
                    Some(&survivor) => {
                        hits += 1;
                        survivors_used.push(survivor);
                        survivor
                    }
                    None => *id,
                })
                .collect();
            if hits == 0 {
                continue;
            }
            let refs = collapse_refs(refs);
            replaced += hits;
            self.modify_way(way_id, move |mut way| {
                way.refs = refs;
                way
            })?;
            for survivor in survivors_used {
                self.relate(EntityKind::Way, way_id, (EntityKind::Node, survivor));
            }
        }
        Ok(replaced)
    }

    fn rewrite_relation_members(
        &mut self,
        replacements: &AHashMap<i64, i64>,
    ) -> Result<usize> {
        let base = self.base;
        let mut touched: Vec<i64> = Vec::new();
        for &loser_id in replacements.keys() {
            touched.extend(
                base.relations()
                    .relations_for(EntityKind::Node, loser_id)
                    .iter()
                    .map(|&index| base.relations().id(index)),
            );
        }
        touched.extend(self.relation_changes.keys().copied());
        touched.sort_unstable();
        touched.dedup();

        let mut replaced = 0usize;
        for relation_id in touched {
            self.check_cancelled()?;
            let current = match self.relation_changes.get(&relation_id) {
                Some(change) => match change.new.clone() {
                    Some(relation) => relation,
                    None => continue, // deleted
                },
                None => match base.relations().index_of(relation_id) {
                    Some(index) => base.relation_at(index),
                    None => continue,
                },
            };
            let mut hits = 0usize;
            let members: Vec<Member> = current
                .members
                .into_iter()
                .map(|mut member| {
                    if member.kind == EntityKind::Node {
                        if let Some(&survivor) = replacements.get(&member.ref_id) {
                            member.ref_id = survivor;
                            hits += 1;
                        }
                    }
                    member
                })
                .collect();
            if hits == 0 {
                continue;
            }
            let members = collapse_members(members);
            replaced += hits;
            self.modify_relation(relation_id, move |mut relation| {
                relation.members = members;
                relation
            })?;
        }
        Ok(replaced)
    }

    /// Delete ways that duplicate another way's exact coordinate sequence.
    /// Candidate pairs come from bbox overlap; each unordered pair is
    /// examined once.
    pub fn deduplicate_ways(&mut self, ids: impl IntoIterator<Item = i64>) -> Result<DedupStats> {
        let base = self.base;
        let mut stats = DedupStats::default();
        let mut examined: AHashSet<(i64, i64)> = AHashSet::new();
        let mut removed: AHashSet<i64> = AHashSet::new();

        for id in ids {
            self.check_cancelled()?;
            if removed.contains(&id) {
                continue;
            }
            let Some(index) = base.ways().index_of(id) else { continue };
            let Ok(coords) = base.ways().coordinates(index, base.nodes()) else {
                continue; // dangling refs in a partial store
            };

            for candidate in base.ways().within_bbox(&base.ways().bbox_of(index)) {
                let candidate_id = base.ways().id(candidate);
                if candidate_id == id || removed.contains(&candidate_id) {
                    continue;
                }
                let pair = (id.min(candidate_id), id.max(candidate_id));
                if !examined.insert(pair) {
                    continue;
                }
                let Ok(candidate_coords) = base.ways().coordinates(candidate, base.nodes())
                else {
                    continue;
                };
                if coords != candidate_coords {
                    continue;
                }
                let loser = if way_rank(base, index) >= way_rank(base, candidate) {
                    candidate
                } else {
                    index
                };
                let loser_id = base.ways().id(loser);
                if removed.insert(loser_id) {
                    self.delete(EntityKind::Way, loser_id)?;
                    let survivor_id = if loser_id == id { candidate_id } else { id };
                    self.relate(EntityKind::Way, loser_id, (EntityKind::Way, survivor_id));
                    stats.ways_deduplicated += 1;
                }
                if loser_id == id {
                    break; // this way lost; stop probing with it
                }
            }
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Node, Relation, Way};
    use crate::store::StoreAssembler;

    /// The classic pair: two nodes on the same spot, one richer in tags,
    /// joined by a way that must collapse to a single ref.
    fn pair_store() -> Store {
        let mut assembler = StoreAssembler::new(false);
        assembler.push_node(&Node::new(1, 0.0, 0.0));
        assembler.push_node(&Node::new(2, 0.0, 0.0).with_tag("name", "X"));
        assembler.push_way(&Way::new(10, vec![1, 2])).unwrap();
        assembler.finish().unwrap()
    }

    #[test]
    fn dedup_pair_deletes_loser_and_rewrites_way() {
        let store = pair_store();
        let mut changes = Changeset::new(&store);
        let stats = changes.deduplicate_nodes(store.nodes().ids().to_vec()).unwrap();
        assert_eq!(stats.nodes_deduplicated, 1);
        assert_eq!(stats.node_refs_replaced, 1);

        let next = changes.apply(None).unwrap();
        assert!(next.get(EntityKind::Node, 1).is_none());
        assert!(next.get(EntityKind::Node, 2).is_some());
        let way = match next.get(EntityKind::Way, 10).unwrap() {
            crate::entity::Entity::Way(w) => w,
            other => panic!("expected way, got {other:?}"),
        };
        assert_eq!(way.refs, vec![2]);
    }

    #[test]
    fn dedup_is_idempotent_after_apply() {
        let store = pair_store();
        let mut changes = Changeset::new(&store);
        changes.deduplicate_nodes(store.nodes().ids().to_vec()).unwrap();
        let next = changes.apply(None).unwrap();

        let mut again = Changeset::new(&next);
        let stats = again.deduplicate_nodes(next.nodes().ids().to_vec()).unwrap();
        assert_eq!(stats, DedupStats::default());
        assert!(again.is_empty());
    }

    #[test]
    fn survivor_prefers_version_then_tags_then_id() {
        // Version trumps tag count.
        let mut assembler = StoreAssembler::new(false);
        assembler.push_node(
            &Node::new(1, 0.0, 0.0).with_tag(VERSION_KEY, 5).with_tag("a", "1"),
        );
        assembler.push_node(
            &Node::new(2, 0.0, 0.0)
                .with_tag(VERSION_KEY, 3)
                .with_tag("a", "1")
                .with_tag("b", "2")
                .with_tag("c", "3"),
        );
        let store = assembler.finish().unwrap();
        let mut changes = Changeset::new(&store);
        changes.deduplicate_nodes(store.nodes().ids().to_vec()).unwrap();
        assert!(changes.node_change(2).is_some(), "lower version loses");
        assert!(changes.node_change(1).is_none());

        // Equal everything: larger id survives.
        let mut assembler = StoreAssembler::new(false);
        assembler.push_node(&Node::new(1, 0.0, 0.0));
        assembler.push_node(&Node::new(2, 0.0, 0.0));
        let store = assembler.finish().unwrap();
        let mut changes = Changeset::new(&store);
        changes.deduplicate_nodes(store.nodes().ids().to_vec()).unwrap();
        assert!(changes.node_change(1).is_some());
        assert!(changes.node_change(2).is_none());
    }

    #[test]
    fn three_way_cluster_flattens_to_one_survivor() {
        let mut assembler = StoreAssembler::new(false);
        assembler.push_node(&Node::new(1, 0.0, 0.0));
        assembler.push_node(&Node::new(2, 0.0, 0.0));
        assembler.push_node(&Node::new(3, 0.0, 0.0));
        assembler.push_way(&Way::new(10, vec![1, 2, 3])).unwrap();
        let store = assembler.finish().unwrap();

        let mut changes = Changeset::new(&store);
        let stats = changes.deduplicate_nodes(store.nodes().ids().to_vec()).unwrap();
        assert_eq!(stats.nodes_deduplicated, 2);

        let next = changes.apply(None).unwrap();
        assert_eq!(next.stats().nodes, 1);
        let way = match next.get(EntityKind::Way, 10).unwrap() {
            crate::entity::Entity::Way(w) => w,
            other => panic!("expected way, got {other:?}"),
        };
        assert_eq!(way.refs, vec![3]);
    }

    #[test]
    fn relation_node_members_are_rewritten() {
        let mut assembler = StoreAssembler::new(false);
        assembler.push_node(&Node::new(1, 0.0, 0.0));
        assembler.push_node(&Node::new(2, 0.0, 0.0));
        assembler.push_node(&Node::new(3, 1.0, 1.0));
        assembler
            .push_relation(&Relation::new(
                100,
                vec![Member::node(1, "stop"), Member::node(3, "stop")],
            ))
            .unwrap();
        let store = assembler.finish().unwrap();

        let mut changes = Changeset::new(&store);
        changes.deduplicate_nodes(store.nodes().ids().to_vec()).unwrap();
        let next = changes.apply(None).unwrap();
        let relation = match next.get(EntityKind::Relation, 100).unwrap() {
            crate::entity::Entity::Relation(r) => r,
            other => panic!("expected relation, got {other:?}"),
        };
        assert_eq!(relation.members[0].ref_id, 2);
        assert_eq!(relation.members[1].ref_id, 3);
    }

    #[test]
    fn way_dedup_picks_richer_survivor() {
        let mut assembler = StoreAssembler::new(false);
        assembler.push_node(&Node::new(1, 0.0, 0.0));
        assembler.push_node(&Node::new(2, 1.0, 0.0));
        assembler.push_way(&Way::new(10, vec![1, 2]).with_tag("highway", "path")).unwrap();
        assembler.push_way(&Way::new(11, vec![1, 2])).unwrap();
        let store = assembler.finish().unwrap();

        let mut changes = Changeset::new(&store);
        let stats = changes.deduplicate_ways(store.ways().ids().to_vec()).unwrap();
        assert_eq!(stats.ways_deduplicated, 1);
        // Way 10 carries a tag, so untagged way 11 loses despite its id.
        assert!(changes.way_change(11).is_some());
        assert!(changes.way_change(10).is_none());
    }

    #[test]
    fn way_dedup_ignores_distinct_geometries() {
        let mut assembler = StoreAssembler::new(false);
        assembler.push_node(&Node::new(1, 0.0, 0.0));
        assembler.push_node(&Node::new(2, 1.0, 0.0));
        assembler.push_node(&Node::new(3, 1.0, 1.0));
        assembler.push_way(&Way::new(10, vec![1, 2])).unwrap();
        assembler.push_way(&Way::new(11, vec![1, 3])).unwrap();
        let store = assembler.finish().unwrap();

        let mut changes = Changeset::new(&store);
        let stats = changes.deduplicate_ways(store.ways().ids().to_vec()).unwrap();
        assert_eq!(stats.ways_deduplicated, 0);
        assert!(changes.is_empty());
    }
}
