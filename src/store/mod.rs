mod builder;

pub use builder::{BuildOptions, StoreAssembler};

use std::io::Read;

use crate::column::{NodeColumn, RelationColumn, WayColumn};
use crate::entity::{Entity, Member, Node, Relation, Tags, Way};
use crate::error::{EntityKind, Result};
use crate::spatial::Bbox;
use crate::strings::StringTable;
use crate::tags::TagSet;

/// Facts captured from the PBF header, plus the partiality flag that relaxes
/// referential closure for bbox-filtered extracts.
#[derive(Debug, Clone, Default)]
pub struct StoreInfo {
    /// Host-facing dataset identifier (tile layer names carry it).
    pub dataset: Option<String>,
    pub bbox: Option<Bbox>,
    pub required_features: Vec<String>,
    pub optional_features: Vec<String>,
    pub writing_program: Option<String>,
    pub source: Option<String>,
    pub replication_timestamp: Option<i64>,
    pub replication_sequence: Option<i64>,
    pub partial: bool,
}

/// Entity and string counts for one store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct StoreStats {
    pub nodes: usize,
    pub ways: usize,
    pub relations: usize,
    pub strings: usize,
    pub way_refs: usize,
    pub relation_members: usize,
}

/// An immutable in-memory OSM dataset: columnar nodes/ways/relations, a
/// shared string table, and id/tag/spatial indexes. Constructed on one
/// thread, then frozen; any number of threads may query it concurrently.
#[derive(Debug)]
pub struct Store {
    pub(crate) info: StoreInfo,
    pub(crate) strings: StringTable,
    pub(crate) nodes: NodeColumn,
    pub(crate) ways: WayColumn,
    pub(crate) relations: RelationColumn,
}

impl Store {
    /// Ingest a PBF stream into a new store.
    pub fn from_pbf<R: Read>(reader: R, options: BuildOptions) -> Result<Store> {
        builder::build(reader, options)
    }

    #[inline] pub fn info(&self) -> &StoreInfo { &self.info }

    #[inline] pub fn strings(&self) -> &StringTable { &self.strings }

    #[inline] pub fn nodes(&self) -> &NodeColumn { &self.nodes }

    #[inline] pub fn ways(&self) -> &WayColumn { &self.ways }

    #[inline] pub fn relations(&self) -> &RelationColumn { &self.relations }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            nodes: self.nodes.len(),
            ways: self.ways.len(),
            relations: self.relations.len(),
            strings: self.strings.len(),
            way_refs: self.ways.ref_count(),
            relation_members: self.relations.member_count(),
        }
    }

    /// Dataset extent: the header bbox when the source declared one, else
    /// the extent of the node coordinates.
    pub fn bbox(&self) -> Bbox {
        self.info.bbox.unwrap_or_else(|| self.nodes.bbox())
    }

    /// Look up any entity by kind and stable id. O(log n); tags and
    /// refs/members are reconstructed on demand.
    pub fn get(&self, kind: EntityKind, id: i64) -> Option<Entity> {
        match kind {
            EntityKind::Node => self.nodes.index_of(id).map(|i| Entity::Node(self.node_at(i))),
            EntityKind::Way => self.ways.index_of(id).map(|i| Entity::Way(self.way_at(i))),
            EntityKind::Relation => {
                self.relations.index_of(id).map(|i| Entity::Relation(self.relation_at(i)))
            }
        }
    }

    /// Materialize the node at a dense index.
    pub fn node_at(&self, index: u32) -> Node {
        let (lon, lat) = self.nodes.position(index);
        Node {
            id: self.nodes.id(index),
            lon,
            lat,
            tags: self.string_tags(self.nodes.tags(), index),
        }
    }

    /// Materialize the way at a dense index.
    pub fn way_at(&self, index: u32) -> Way {
        Way {
            id: self.ways.id(index),
            refs: self.ways.refs_of(index).to_vec(),
            tags: self.string_tags(self.ways.tags(), index),
        }
    }

    /// Materialize the relation at a dense index.
    pub fn relation_at(&self, index: u32) -> Relation {
        let (kinds, refs, roles) = self.relations.members_of(index);
        let members = kinds
            .iter()
            .zip(refs.iter())
            .zip(roles.iter())
            .map(|((&kind, &ref_id), &role)| Member {
                kind,
                ref_id,
                role: self.resolve(role).to_string(),
            })
            .collect();
        Relation {
            id: self.relations.id(index),
            members,
            tags: self.string_tags(self.relations.tags(), index),
        }
    }

    /// Highest node id present, across an empty store returning `None`.
    pub fn max_node_id(&self) -> Option<i64> {
        self.nodes.ids().last().copied()
    }

    pub(crate) fn string_tags(&self, tags: &TagSet, index: u32) -> Tags {
        tags.tags_of(index)
            .iter()
            .map(|&(k, v)| (self.resolve(k).to_string(), self.resolve(v).to_string()))
            .collect()
    }

    /// Resolve an interned string id that finalization guaranteed live.
    #[inline]
    pub(crate) fn resolve(&self, id: u32) -> &str {
        self.strings.get(id).expect("interned string id resolves")
    }

    /// Value of `key` on the entity at `index` of `tags`, if both the key
    /// string and the tag are present.
    pub(crate) fn tag_value(&self, tags: &TagSet, index: u32, key: &str) -> Option<&str> {
        let key_id = self.strings.lookup(key)?;
        tags.get(index, key_id).map(|v| self.resolve(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Store {
        let mut assembler = StoreAssembler::new(false);
        assembler.push_node(&Node::new(2, 1.0, 1.0).with_tag("name", "two"));
        assembler.push_node(&Node::new(1, 0.0, 0.0));
        assembler
            .push_way(&Way::new(10, vec![1, 2]).with_tag("highway", "residential"))
            .unwrap();
        assembler
            .push_relation(&Relation::new(100, vec![Member::way(10, "outer")]))
            .unwrap();
        assembler.finish().unwrap()
    }

    #[test]
    fn get_reconstructs_entities() {
        let store = sample();

        let node = store.get(EntityKind::Node, 2).unwrap();
        assert_eq!(node.tag("name"), Some("two"));

        let way = match store.get(EntityKind::Way, 10).unwrap() {
            Entity::Way(w) => w,
            other => panic!("expected way, got {other:?}"),
        };
        assert_eq!(way.refs, vec![1, 2]);

        let relation = match store.get(EntityKind::Relation, 100).unwrap() {
            Entity::Relation(r) => r,
            other => panic!("expected relation, got {other:?}"),
        };
        assert_eq!(relation.members[0].role, "outer");
        assert!(store.get(EntityKind::Node, 99).is_none());
    }

    #[test]
    fn stats_count_everything() {
        let store = sample();
        let stats = store.stats();
        assert_eq!(stats.nodes, 2);
        assert_eq!(stats.ways, 1);
        assert_eq!(stats.relations, 1);
        assert_eq!(stats.way_refs, 2);
        assert_eq!(stats.relation_members, 1);
        // "", "name", "two", "highway", "residential", "outer"
        assert_eq!(stats.strings, 6);
    }

    #[test]
    fn bbox_falls_back_to_node_extent() {
        let store = sample();
        assert_eq!(store.bbox().to_array(), [0.0, 0.0, 1.0, 1.0]);
    }

    #[test]
    fn max_node_id() {
        let store = sample();
        assert_eq!(store.max_node_id(), Some(2));
    }
}
