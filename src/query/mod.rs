mod geojson;
mod route;

pub use route::{Route, RouteOptions, ROUTABLE_SPEEDS_KMH};

pub(crate) use geojson::way_entity_is_area;

use crate::error::EntityKind;
use crate::spatial::Bbox;
use crate::store::Store;

/// Zero-copy-friendly columnar view of a node query result: ids plus a flat
/// (lon, lat) pair array, intended for transport to a host.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct NodeSlice {
    pub ids: Vec<i64>,
    pub positions: Vec<f64>,
}

/// Columnar view of a way query result: ids, concatenated (lon, lat) pairs,
/// and per-way start offsets (in coordinate pairs) of length `ids.len() + 1`.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct WaySlice {
    pub ids: Vec<i64>,
    pub positions: Vec<f64>,
    pub starts: Vec<u32>,
}

impl Store {
    /// All entities carrying tag `key` (optionally `key=value`), enumerated
    /// nodes first, then ways, then relations, ascending id inside each
    /// kind. Results are dense column indexes.
    pub fn search_tag<'a>(
        &'a self,
        key: &str,
        value: Option<&str>,
    ) -> Box<dyn Iterator<Item = (EntityKind, u32)> + 'a> {
        let Some(key_id) = self.strings.lookup(key) else {
            return Box::new(std::iter::empty());
        };
        let value_id = match value {
            Some(v) => match self.strings.lookup(v) {
                Some(id) => Some(id),
                // The value string never occurs in this store.
                None => return Box::new(std::iter::empty()),
            },
            None => None,
        };

        let per_kind = [
            (EntityKind::Node, self.nodes.tags()),
            (EntityKind::Way, self.ways.tags()),
            (EntityKind::Relation, self.relations.tags()),
        ];
        Box::new(per_kind.into_iter().flat_map(move |(kind, tags)| {
            tags.entities_with_key(key_id)
                .iter()
                .copied()
                .filter(move |&index| {
                    value_id.is_none_or(|v| tags.get(index, key_id) == Some(v))
                })
                .map(move |index| (kind, index))
        }))
    }

    /// Columnar view of the nodes inside `bbox`, ascending id.
    pub fn nodes_in_bbox(&self, bbox: &Bbox) -> NodeSlice {
        let indexes = self.nodes.within_bbox(bbox);
        let mut ids = Vec::with_capacity(indexes.len());
        let mut positions = Vec::with_capacity(indexes.len() * 2);
        for index in indexes {
            ids.push(self.nodes.id(index));
            let (lon, lat) = self.nodes.position(index);
            positions.push(lon);
            positions.push(lat);
        }
        NodeSlice { ids, positions }
    }

    /// Columnar view of the ways whose bbox intersects `bbox`, ascending id.
    /// Ways with unresolvable refs are skipped (partial stores).
    pub fn ways_in_bbox(&self, bbox: &Bbox) -> WaySlice {
        let indexes = self.ways.within_bbox(bbox);
        let mut ids = Vec::with_capacity(indexes.len());
        let mut positions = Vec::new();
        let mut starts = Vec::with_capacity(indexes.len() + 1);
        starts.push(0);
        for index in indexes {
            match self.ways.coordinates(index, &self.nodes) {
                Ok(coords) => {
                    ids.push(self.ways.id(index));
                    for (lon, lat) in coords {
                        positions.push(lon);
                        positions.push(lat);
                    }
                    starts.push((positions.len() / 2) as u32);
                }
                Err(err) => log::warn!("skipping way in bbox view: {err}"),
            }
        }
        WaySlice { ids, positions, starts }
    }

    /// Nodes within `radius_km` of a position by great-circle distance.
    /// The spatial probe is coarse; this filters it exactly.
    pub fn nodes_within_radius(&self, lon: f64, lat: f64, radius_km: f64) -> Vec<u32> {
        self.nodes
            .within_radius_km(lon, lat, radius_km)
            .into_iter()
            .filter(|&index| {
                let (nlon, nlat) = self.nodes.position(index);
                crate::spatial::haversine_m(lon, lat, nlon, nlat) <= radius_km * 1000.0
            })
            .collect()
    }

    /// The nearest node referenced by at least one routable way, within
    /// `max_m` meters. Returns (node index, haversine meters).
    pub fn nearest_routable_node(&self, lon: f64, lat: f64, max_m: f64) -> Option<(u32, f64)> {
        let back = self.ways.node_to_ways(&self.nodes);
        let mut k = 32usize;
        let mut seen = 0usize;
        loop {
            let candidates = self.nodes.nearest(lon, lat, k, Some(max_m));
            for &(index, meters) in candidates.iter().skip(seen) {
                let routable =
                    back.ways_of(index).iter().any(|&way| self.way_speed_kmh(way).is_some());
                if routable {
                    return Some((index, meters));
                }
            }
            // All candidates within max_m were inspected.
            if candidates.len() < k {
                return None;
            }
            seen = candidates.len();
            k *= 4;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Node, Way};
    use crate::store::StoreAssembler;

    fn sample() -> Store {
        let mut assembler = StoreAssembler::new(false);
        assembler.push_node(&Node::new(1, 0.0, 0.0).with_tag("amenity", "cafe"));
        assembler.push_node(&Node::new(2, 0.001, 0.0));
        assembler.push_node(&Node::new(3, 0.002, 0.0).with_tag("amenity", "bench"));
        assembler.push_node(&Node::new(4, 1.0, 1.0));
        assembler
            .push_way(&Way::new(10, vec![1, 2]).with_tag("highway", "residential"))
            .unwrap();
        assembler
            .push_way(&Way::new(11, vec![2, 3]).with_tag("amenity", "cafe"))
            .unwrap();
        assembler.finish().unwrap()
    }

    #[test]
    fn search_tag_orders_kinds_then_ids() {
        let store = sample();
        let hits: Vec<_> = store.search_tag("amenity", None).collect();
        assert_eq!(
            hits,
            vec![(EntityKind::Node, 0), (EntityKind::Node, 2), (EntityKind::Way, 1)]
        );

        let cafes: Vec<_> = store.search_tag("amenity", Some("cafe")).collect();
        assert_eq!(cafes, vec![(EntityKind::Node, 0), (EntityKind::Way, 1)]);
    }

    #[test]
    fn search_tag_on_unknown_strings_is_empty() {
        let store = sample();
        assert_eq!(store.search_tag("missing", None).count(), 0);
        assert_eq!(store.search_tag("amenity", Some("missing")).count(), 0);
    }

    #[test]
    fn nodes_in_bbox_returns_flat_positions() {
        let store = sample();
        let slice = store.nodes_in_bbox(&Bbox::new(-0.0005, -0.1, 0.0015, 0.1));
        assert_eq!(slice.ids, vec![1, 2]);
        assert_eq!(slice.positions, vec![0.0, 0.0, 0.001, 0.0]);
    }

    #[test]
    fn ways_in_bbox_returns_csr_coordinates() {
        let store = sample();
        let slice = store.ways_in_bbox(&Bbox::new(-0.1, -0.1, 0.0005, 0.1));
        // Only way 10 has a bbox touching the probe.
        assert_eq!(slice.ids, vec![10]);
        assert_eq!(slice.starts, vec![0, 2]);
        assert_eq!(slice.positions, vec![0.0, 0.0, 0.001, 0.0]);
    }

    #[test]
    fn radius_filters_exactly() {
        let store = sample();
        // ~111 m per 0.001 degree at the equator.
        let hits = store.nodes_within_radius(0.0, 0.0, 0.15);
        assert_eq!(hits, vec![0, 1]);
    }

    #[test]
    fn random_bboxes_match_naive_scan() {
        use rand::{Rng, SeedableRng};

        let mut rng = rand::rngs::StdRng::seed_from_u64(20_250_101);
        let mut assembler = StoreAssembler::new(false);
        let mut points = Vec::new();
        for id in 1..=500_i64 {
            let lon = rng.random_range(-1.0..1.0);
            let lat = rng.random_range(-1.0..1.0);
            points.push((id, lon, lat));
            assembler.push_node(&Node::new(id, lon, lat));
        }
        let store = assembler.finish().unwrap();

        for _ in 0..100 {
            let (a, b): (f64, f64) = (rng.random_range(-1.1..1.1), rng.random_range(-1.1..1.1));
            let (c, d): (f64, f64) = (rng.random_range(-1.1..1.1), rng.random_range(-1.1..1.1));
            let bbox = Bbox::new(a.min(b), c.min(d), a.max(b), c.max(d));

            let mut expected: Vec<i64> = points
                .iter()
                .filter(|&&(_, lon, lat)| bbox.contains(lon, lat))
                .map(|&(id, _, _)| id)
                .collect();
            expected.sort_unstable();

            assert_eq!(store.nodes_in_bbox(&bbox).ids, expected);
        }
    }

    #[test]
    fn nearest_routable_skips_unroutable_nodes() {
        let store = sample();
        // Node 3 (index 2) is nearest to the probe but only on an amenity
        // way; node 2 (index 1) is on highway 10.
        let (index, meters) = store.nearest_routable_node(0.0021, 0.0, 10_000.0).unwrap();
        assert_eq!(index, 1);
        assert!(meters > 0.0);

        // Out of range.
        assert!(store.nearest_routable_node(2.0, 2.0, 100.0).is_none());
    }
}
