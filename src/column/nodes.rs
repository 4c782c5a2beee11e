use crate::column::{apply_permutation, check_unique, index_of, sort_permutation};
use crate::error::{EntityKind, Result};
use crate::spatial::{Bbox, PointIndex};
use crate::tags::{TagScratch, TagSet};

/// Parallel arrays of node data: `ids`, `lons`, `lats`, plus the CSR tag
/// store. After finalization the arrays are id-sorted and a point R-tree
/// serves bbox / radius / nearest queries.
#[derive(Debug)]
pub struct NodeColumn {
    ids: Vec<i64>,
    lons: Vec<f64>,
    lats: Vec<f64>,
    tags: TagSet,
    index: Option<PointIndex>,
    bbox: Bbox,
}

impl Default for NodeColumn {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeColumn {
    pub fn new() -> Self {
        Self {
            ids: Vec::new(),
            lons: Vec::new(),
            lats: Vec::new(),
            tags: TagSet::new(),
            index: None,
            bbox: Bbox::EMPTY,
        }
    }

    /// Append one node in file order. Tags arrive as interned id pairs.
    pub fn push(&mut self, id: i64, lon: f64, lat: f64, tags: &mut TagScratch) {
        self.ids.push(id);
        self.lons.push(lon);
        self.lats.push(lat);
        self.tags.push(tags);
    }

    /// Sort by id, permute every parallel array, then build the spatial
    /// index and the inverted tag index over the final layout.
    pub fn finalize(&mut self) -> Result<()> {
        let perm = sort_permutation(&self.ids);
        self.ids = apply_permutation(&perm, &self.ids);
        check_unique(&self.ids, EntityKind::Node)?;
        self.lons = apply_permutation(&perm, &self.lons);
        self.lats = apply_permutation(&perm, &self.lats);
        self.tags.permute(&perm);
        self.tags.finalize();

        self.index = Some(PointIndex::build(&self.lons, &self.lats));
        self.bbox = Bbox::EMPTY;
        for (&lon, &lat) in self.lons.iter().zip(self.lats.iter()) {
            self.bbox.extend(lon, lat);
        }
        Ok(())
    }

    #[inline] pub fn len(&self) -> usize { self.ids.len() }

    #[inline] pub fn is_empty(&self) -> bool { self.ids.is_empty() }

    #[inline] pub fn ids(&self) -> &[i64] { &self.ids }

    #[inline] pub fn id(&self, index: u32) -> i64 { self.ids[index as usize] }

    #[inline] pub fn lon(&self, index: u32) -> f64 { self.lons[index as usize] }

    #[inline] pub fn lat(&self, index: u32) -> f64 { self.lats[index as usize] }

    #[inline] pub fn position(&self, index: u32) -> (f64, f64) {
        (self.lon(index), self.lat(index))
    }

    /// Dense index for a stable id, once finalized.
    #[inline] pub fn index_of(&self, id: i64) -> Option<u32> { index_of(&self.ids, id) }

    #[inline] pub fn tags(&self) -> &TagSet { &self.tags }

    /// Extent of all node positions; empty for an empty column.
    #[inline] pub fn bbox(&self) -> Bbox { self.bbox }

    fn index(&self) -> &PointIndex {
        self.index.as_ref().expect("node column not finalized")
    }

    /// Ascending indexes of nodes inside `bbox` (inclusive edges).
    pub fn within_bbox(&self, bbox: &Bbox) -> Vec<u32> {
        self.index().within_bbox(bbox)
    }

    /// Coarse great-circle radius query; callers filter exactly.
    pub fn within_radius_km(&self, lon: f64, lat: f64, radius_km: f64) -> Vec<u32> {
        self.index().within_radius_km(lon, lat, radius_km)
    }

    /// The `k` nearest nodes by haversine meters, ascending, ties broken by
    /// lower index (which is lower id in the finalized layout).
    pub fn nearest(&self, lon: f64, lat: f64, k: usize, max_m: Option<f64>) -> Vec<(u32, f64)> {
        self.index().nearest(lon, lat, k, max_m)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    fn build() -> NodeColumn {
        let mut nodes = NodeColumn::new();
        // Out of id order on purpose; finalize must sort.
        let mut tags: TagScratch = smallvec![(1, 2)];
        nodes.push(30, 2.0, 2.0, &mut tags);
        let mut tags: TagScratch = smallvec![];
        nodes.push(10, 0.0, 0.0, &mut tags);
        let mut tags: TagScratch = smallvec![(1, 3)];
        nodes.push(20, 1.0, 1.0, &mut tags);
        nodes.finalize().unwrap();
        nodes
    }

    #[test]
    fn finalize_sorts_all_parallel_arrays() {
        let nodes = build();
        assert_eq!(nodes.ids(), &[10, 20, 30]);
        assert_eq!(nodes.position(0), (0.0, 0.0));
        assert_eq!(nodes.position(2), (2.0, 2.0));
        // Tags moved with their nodes.
        assert_eq!(nodes.tags().tags_of(2), &[(1, 2)]);
        assert_eq!(nodes.tags().tags_of(0), &[]);
    }

    #[test]
    fn id_index_bijection() {
        let nodes = build();
        for index in 0..nodes.len() as u32 {
            assert_eq!(nodes.index_of(nodes.id(index)), Some(index));
        }
        assert_eq!(nodes.index_of(11), None);
    }

    #[test]
    fn bbox_tracks_extent() {
        let nodes = build();
        assert_eq!(nodes.bbox().to_array(), [0.0, 0.0, 2.0, 2.0]);
    }

    #[test]
    fn duplicate_node_id_fails_finalize() {
        let mut nodes = NodeColumn::new();
        let mut tags: TagScratch = smallvec![];
        nodes.push(1, 0.0, 0.0, &mut tags);
        let mut tags: TagScratch = smallvec![];
        nodes.push(1, 1.0, 1.0, &mut tags);
        assert!(nodes.finalize().is_err());
    }

    #[test]
    fn spatial_queries_serve_finalized_layout() {
        let nodes = build();
        assert_eq!(nodes.within_bbox(&Bbox::new(0.5, 0.5, 2.5, 2.5)), vec![1, 2]);
        let nearest = nodes.nearest(0.1, 0.1, 2, None);
        assert_eq!(nearest[0].0, 0);
        assert_eq!(nearest[1].0, 1);
    }
}
