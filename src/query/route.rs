use std::cmp::Ordering;
use std::collections::BinaryHeap;

use ahash::AHashMap;

use crate::error::{Error, Result};
use crate::spatial::haversine_m;
use crate::store::Store;

/// Routable `highway` values and their default speeds in km/h, used for
/// edge weights and travel-time estimates.
pub const ROUTABLE_SPEEDS_KMH: &[(&str, f64)] = &[
    ("motorway", 110.0),
    ("motorway_link", 45.0),
    ("trunk", 90.0),
    ("trunk_link", 40.0),
    ("primary", 65.0),
    ("primary_link", 30.0),
    ("secondary", 55.0),
    ("secondary_link", 25.0),
    ("tertiary", 40.0),
    ("tertiary_link", 20.0),
    ("unclassified", 30.0),
    ("residential", 30.0),
    ("service", 15.0),
    ("living_street", 10.0),
    ("road", 30.0),
    ("pedestrian", 5.0),
    ("footway", 5.0),
    ("cycleway", 15.0),
    ("path", 5.0),
    ("track", 15.0),
    ("steps", 3.0),
];

fn highway_speed_kmh(value: &str) -> Option<f64> {
    ROUTABLE_SPEEDS_KMH.iter().find(|(tag, _)| *tag == value).map(|&(_, speed)| speed)
}

/// Routing options. The speed factor scales every edge speed uniformly
/// (walking profiles pass a fraction of 1.0).
#[derive(Debug, Clone)]
pub struct RouteOptions {
    pub speed_factor: f64,
}

impl Default for RouteOptions {
    fn default() -> Self {
        Self { speed_factor: 1.0 }
    }
}

/// A shortest path over the routable-way subgraph.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Route {
    /// Path vertices as (lon, lat), from origin to destination.
    pub coordinates: Vec<[f64; 2]>,
    pub distance_m: f64,
    pub time_s: f64,
    /// Indexes into `coordinates` where the path switches to another way.
    pub turn_points: Vec<u32>,
}

/// Min-heap entry: smallest cost pops first, ties broken by lower node id
/// (node indexes order the same way as ids in a finalized column).
struct QueueEntry {
    cost: f64,
    node: u32,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; invert both fields.
        other.cost.total_cmp(&self.cost).then_with(|| other.node.cmp(&self.node))
    }
}

impl Store {
    /// Default speed of a way, when its `highway` tag marks it routable.
    pub(crate) fn way_speed_kmh(&self, way: u32) -> Option<f64> {
        self.tag_value(self.ways.tags(), way, "highway").and_then(highway_speed_kmh)
    }

    /// Dijkstra over the subgraph induced by routable ways, weighting edges
    /// by travel seconds. Deterministic: equal-cost frontier entries pop in
    /// node-id order, so the returned path is stable for a given store.
    pub fn route(&self, from: u32, to: u32, options: &RouteOptions) -> Result<Route> {
        let back = self.ways.node_to_ways(&self.nodes);

        let mut cost_s: AHashMap<u32, f64> = AHashMap::new();
        let mut dist_m: AHashMap<u32, f64> = AHashMap::new();
        let mut prev: AHashMap<u32, (u32, u32)> = AHashMap::new(); // node -> (prev node, via way)
        let mut heap = BinaryHeap::new();

        cost_s.insert(from, 0.0);
        dist_m.insert(from, 0.0);
        heap.push(QueueEntry { cost: 0.0, node: from });

        while let Some(QueueEntry { cost, node }) = heap.pop() {
            if node == to {
                break;
            }
            if cost > cost_s.get(&node).copied().unwrap_or(f64::INFINITY) {
                continue; // stale entry
            }
            let (lon, lat) = self.nodes.position(node);
            let node_id = self.nodes.id(node);

            for &way in back.ways_of(node) {
                let Some(speed_kmh) = self.way_speed_kmh(way) else { continue };
                let speed_ms = speed_kmh / 3.6 * options.speed_factor;
                let refs = self.ways.refs_of(way);
                for position in
                    refs.iter().enumerate().filter(|&(_, &id)| id == node_id).map(|(i, _)| i)
                {
                    let mut neighbors = [None, None];
                    if position > 0 {
                        neighbors[0] = Some(refs[position - 1]);
                    }
                    if position + 1 < refs.len() {
                        neighbors[1] = Some(refs[position + 1]);
                    }
                    for neighbor_id in neighbors.into_iter().flatten() {
                        let Some(neighbor) = self.nodes.index_of(neighbor_id) else { continue };
                        let (nlon, nlat) = self.nodes.position(neighbor);
                        let meters = haversine_m(lon, lat, nlon, nlat);
                        let next_cost = cost + meters / speed_ms;
                        if next_cost
                            < cost_s.get(&neighbor).copied().unwrap_or(f64::INFINITY)
                        {
                            cost_s.insert(neighbor, next_cost);
                            dist_m.insert(
                                neighbor,
                                dist_m.get(&node).copied().unwrap_or(0.0) + meters,
                            );
                            prev.insert(neighbor, (node, way));
                            heap.push(QueueEntry { cost: next_cost, node: neighbor });
                        }
                    }
                }
            }
        }

        let total_s = *cost_s.get(&to).ok_or(Error::NoRoute)?;
        let total_m = dist_m.get(&to).copied().unwrap_or(0.0);

        // Walk back from the destination, collecting vertices and the way
        // carrying each edge.
        let mut nodes_rev = vec![to];
        let mut ways_rev = Vec::new();
        let mut cursor = to;
        while let Some(&(parent, way)) = prev.get(&cursor) {
            nodes_rev.push(parent);
            ways_rev.push(way);
            cursor = parent;
        }
        if cursor != from {
            return Err(Error::NoRoute);
        }
        nodes_rev.reverse();
        ways_rev.reverse();

        let coordinates = nodes_rev
            .iter()
            .map(|&node| {
                let (lon, lat) = self.nodes.position(node);
                [lon, lat]
            })
            .collect();
        let turn_points = ways_rev
            .windows(2)
            .enumerate()
            .filter(|(_, pair)| pair[0] != pair[1])
            .map(|(i, _)| (i + 1) as u32)
            .collect();

        Ok(Route { coordinates, distance_m: total_m, time_s: total_s, turn_points })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Node, Way};
    use crate::store::StoreAssembler;

    /// Four nodes on a ~1 km square, connected by four residential ways.
    /// 0.009 degrees of latitude ≈ 1 km; longitudes shrink with cos(lat),
    /// so the square sits at the equator to keep both sides ≈ 1 km.
    fn square() -> Store {
        let mut assembler = StoreAssembler::new(false);
        let step = 0.00899322; // ≈ 1000 m of arc
        assembler.push_node(&Node::new(1, 0.0, step)); // NW
        assembler.push_node(&Node::new(2, step, step)); // NE
        assembler.push_node(&Node::new(3, 0.0, 0.0)); // SW
        assembler.push_node(&Node::new(4, step, 0.0)); // SE
        for (id, refs) in [(10, vec![1, 2]), (11, vec![2, 4]), (12, vec![1, 3]), (13, vec![3, 4])]
        {
            assembler
                .push_way(&Way::new(id, refs).with_tag("highway", "residential"))
                .unwrap();
        }
        assembler.finish().unwrap()
    }

    #[test]
    fn routes_around_the_square() {
        let store = square();
        let nw = store.nodes().index_of(1).unwrap();
        let se = store.nodes().index_of(4).unwrap();

        let route = store.route(nw, se, &RouteOptions::default()).unwrap();
        assert_eq!(route.coordinates.len(), 3);
        assert!((route.distance_m - 2000.0).abs() < 2.0, "got {}", route.distance_m);
        // 2 km at 30 km/h.
        assert!((route.time_s - 240.0).abs() < 1.0, "got {}", route.time_s);
        // One way change at the corner vertex.
        assert_eq!(route.turn_points, vec![1]);
    }

    #[test]
    fn route_is_deterministic() {
        let store = square();
        let nw = store.nodes().index_of(1).unwrap();
        let se = store.nodes().index_of(4).unwrap();
        let a = store.route(nw, se, &RouteOptions::default()).unwrap();
        let b = store.route(nw, se, &RouteOptions::default()).unwrap();
        assert_eq!(a, b);
        // Two equal-cost paths exist; the tie must resolve through the
        // lower-id corner node (id 2 over id 3).
        let corner = a.coordinates[1];
        let (lon2, lat2) = {
            let i = store.nodes().index_of(2).unwrap();
            store.nodes().position(i)
        };
        assert_eq!(corner, [lon2, lat2]);
    }

    #[test]
    fn unroutable_ways_do_not_connect() {
        let mut assembler = StoreAssembler::new(false);
        assembler.push_node(&Node::new(1, 0.0, 0.0));
        assembler.push_node(&Node::new(2, 0.001, 0.0));
        assembler.push_way(&Way::new(10, vec![1, 2]).with_tag("building", "yes")).unwrap();
        let store = assembler.finish().unwrap();

        let from = store.nodes().index_of(1).unwrap();
        let to = store.nodes().index_of(2).unwrap();
        assert!(matches!(store.route(from, to, &RouteOptions::default()), Err(Error::NoRoute)));
    }

    #[test]
    fn trivial_route_to_self() {
        let store = square();
        let nw = store.nodes().index_of(1).unwrap();
        let route = store.route(nw, nw, &RouteOptions::default()).unwrap();
        assert_eq!(route.coordinates.len(), 1);
        assert_eq!(route.distance_m, 0.0);
        assert_eq!(route.time_s, 0.0);
        assert!(route.turn_points.is_empty());
    }

    #[test]
    fn speed_factor_scales_time_not_distance() {
        let store = square();
        let nw = store.nodes().index_of(1).unwrap();
        let se = store.nodes().index_of(4).unwrap();
        let base = store.route(nw, se, &RouteOptions::default()).unwrap();
        let slow = store.route(nw, se, &RouteOptions { speed_factor: 0.5 }).unwrap();
        assert!((slow.time_s - base.time_s * 2.0).abs() < 1e-6);
        assert!((slow.distance_m - base.distance_m).abs() < 1e-9);
    }
}
