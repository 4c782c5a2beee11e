use std::sync::OnceLock;

use crate::column::{apply_permutation, check_unique, index_of, sort_permutation, NodeColumn};
use crate::error::{Error, EntityKind, Result};
use crate::spatial::{Bbox, RectIndex};
use crate::tags::{TagScratch, TagSet};

/// CSR back-index from node internal index to the ways referencing it.
#[derive(Debug)]
pub struct NodeToWays {
    offsets: Vec<u32>,
    ways: Vec<u32>,
}

impl NodeToWays {
    /// Ascending, deduplicated way indexes incident to a node.
    #[inline]
    pub fn ways_of(&self, node_index: u32) -> &[u32] {
        let start = self.offsets[node_index as usize] as usize;
        let end = self.offsets[node_index as usize + 1] as usize;
        &self.ways[start..end]
    }
}

/// Parallel arrays of way data: `ids`, CSR node-ref runs, per-way bboxes,
/// plus the CSR tag store. After finalization an R-tree over the bboxes
/// serves intersects queries, and a node→ways back-index can be built on
/// demand for routing.
#[derive(Debug)]
pub struct WayColumn {
    ids: Vec<i64>,
    tags: TagSet,
    refs: Vec<i64>,
    ref_starts: Vec<u32>,
    bboxes: Vec<Bbox>,
    index: Option<RectIndex>,
    node_to_ways: OnceLock<NodeToWays>,
}

impl Default for WayColumn {
    fn default() -> Self {
        Self::new()
    }
}

impl WayColumn {
    pub fn new() -> Self {
        Self {
            ids: Vec::new(),
            tags: TagSet::new(),
            refs: Vec::new(),
            ref_starts: vec![0],
            bboxes: Vec::new(),
            index: None,
            node_to_ways: OnceLock::new(),
        }
    }

    /// Append one way in file order. Rejects adjacent duplicate refs.
    pub fn push(&mut self, id: i64, refs: &[i64], tags: &mut TagScratch) -> Result<()> {
        for pair in refs.windows(2) {
            if pair[0] == pair[1] {
                return Err(Error::corrupt(format!(
                    "way {id} repeats node {} in consecutive refs",
                    pair[0]
                )));
            }
        }
        self.ids.push(id);
        self.refs.extend_from_slice(refs);
        self.ref_starts.push(self.refs.len() as u32);
        self.tags.push(tags);
        Ok(())
    }

    /// Sort by id, permute all parallel arrays (rebuilding the ref CSR),
    /// resolve refs against the finalized node column to compute per-way
    /// bboxes, and build the bbox R-tree.
    ///
    /// In a `partial` store, refs that do not resolve are tolerated here
    /// (the bbox covers the resolvable ones) and surface as `DanglingRef`
    /// at query time; otherwise they are a structural error.
    pub fn finalize(&mut self, nodes: &NodeColumn, partial: bool) -> Result<()> {
        let perm = sort_permutation(&self.ids);
        let old_ids = std::mem::take(&mut self.ids);
        self.ids = apply_permutation(&perm, &old_ids);
        check_unique(&self.ids, EntityKind::Way)?;
        self.tags.permute(&perm);
        self.tags.finalize();

        // Rebuild the CSR in sorted order.
        let old_refs = std::mem::take(&mut self.refs);
        let old_starts = std::mem::take(&mut self.ref_starts);
        let mut refs = Vec::with_capacity(old_refs.len());
        let mut starts = Vec::with_capacity(old_starts.len());
        starts.push(0);
        for &old in &perm {
            let span = old_starts[old as usize] as usize..old_starts[old as usize + 1] as usize;
            refs.extend_from_slice(&old_refs[span]);
            starts.push(refs.len() as u32);
        }
        self.refs = refs;
        self.ref_starts = starts;

        self.bboxes = Vec::with_capacity(self.ids.len());
        for way in 0..self.ids.len() as u32 {
            let mut bbox = Bbox::EMPTY;
            for &node_id in self.refs_of(way) {
                match nodes.index_of(node_id) {
                    Some(node) => {
                        let (lon, lat) = nodes.position(node);
                        bbox.extend(lon, lat);
                    }
                    None if partial => {}
                    None => {
                        return Err(Error::corrupt(format!(
                            "way {} references missing node {node_id}",
                            self.ids[way as usize]
                        )))
                    }
                }
            }
            self.bboxes.push(bbox);
        }

        self.index = Some(RectIndex::build(&self.bboxes));
        self.node_to_ways = OnceLock::new();
        Ok(())
    }

    #[inline] pub fn len(&self) -> usize { self.ids.len() }

    #[inline] pub fn is_empty(&self) -> bool { self.ids.is_empty() }

    #[inline] pub fn ids(&self) -> &[i64] { &self.ids }

    #[inline] pub fn id(&self, index: u32) -> i64 { self.ids[index as usize] }

    #[inline] pub fn index_of(&self, id: i64) -> Option<u32> { index_of(&self.ids, id) }

    #[inline] pub fn tags(&self) -> &TagSet { &self.tags }

    /// Total number of stored node refs.
    #[inline] pub fn ref_count(&self) -> usize { self.refs.len() }

    /// The ordered node-id refs of one way.
    #[inline]
    pub fn refs_of(&self, index: u32) -> &[i64] {
        let start = self.ref_starts[index as usize] as usize;
        let end = self.ref_starts[index as usize + 1] as usize;
        &self.refs[start..end]
    }

    #[inline]
    pub fn bbox_of(&self, index: u32) -> Bbox {
        self.bboxes[index as usize]
    }

    /// A way is closed when it ends on the node it started from.
    pub fn is_closed(&self, index: u32) -> bool {
        let refs = self.refs_of(index);
        refs.len() >= 3 && refs.first() == refs.last()
    }

    /// Resolve every ref into (lon, lat). The first unresolvable ref raises
    /// the soft `DanglingRef` error.
    pub fn coordinates(&self, index: u32, nodes: &NodeColumn) -> Result<Vec<(f64, f64)>> {
        let refs = self.refs_of(index);
        let mut out = Vec::with_capacity(refs.len());
        for &node_id in refs {
            let node = nodes.index_of(node_id).ok_or_else(|| {
                Error::dangling(EntityKind::Way, self.id(index), EntityKind::Node, node_id)
            })?;
            out.push(nodes.position(node));
        }
        Ok(out)
    }

    fn index(&self) -> &RectIndex {
        self.index.as_ref().expect("way column not finalized")
    }

    /// Ascending indexes of ways whose bbox intersects `bbox`.
    pub fn within_bbox(&self, bbox: &Bbox) -> Vec<u32> {
        self.index().intersecting(bbox)
    }

    /// Lazily-built CSR from node internal index to incident way indexes.
    /// Refs that do not resolve in `nodes` are skipped.
    pub fn node_to_ways(&self, nodes: &NodeColumn) -> &NodeToWays {
        self.node_to_ways.get_or_init(|| {
            let mut pairs: Vec<(u32, u32)> = Vec::with_capacity(self.refs.len());
            for way in 0..self.len() as u32 {
                for &node_id in self.refs_of(way) {
                    if let Some(node) = nodes.index_of(node_id) {
                        pairs.push((node, way));
                    }
                }
            }
            pairs.sort_unstable();
            pairs.dedup();

            let mut offsets = Vec::with_capacity(nodes.len() + 1);
            let mut ways = Vec::with_capacity(pairs.len());
            offsets.push(0);
            let mut cursor = 0usize;
            for node in 0..nodes.len() as u32 {
                while cursor < pairs.len() && pairs[cursor].0 == node {
                    ways.push(pairs[cursor].1);
                    cursor += 1;
                }
                offsets.push(ways.len() as u32);
            }
            NodeToWays { offsets, ways }
        })
    }
}
