use ahash::AHashSet;
use geo::line_intersection::{line_intersection, LineIntersection};
use geo::{Coord, Line};

use crate::changeset::Changeset;
use crate::entity::{Node, Way};
use crate::error::{EntityKind, Result};
use crate::spatial::{haversine_m, Bbox};

/// Two ways closer than this to an existing node share it instead of
/// getting a fresh crossing node.
pub(crate) const REUSE_THRESHOLD_M: f64 = 1.0;

/// Counters reported by `create_intersections`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct IntersectStats {
    pub nodes_created: usize,
    pub nodes_reused: usize,
    pub ways_spliced: usize,
}

fn truthy(tag: Option<&str>) -> bool {
    matches!(tag, Some(v) if v != "no")
}

/// A way can take part in intersection synthesis when it is highway-like
/// and not an area polygon.
fn connect_eligible(way: &Way) -> bool {
    way.tag("highway").is_some() && !crate::query::way_entity_is_area(way)
}

/// The connect predicate on a pair of ways: both eligible, same `layer`
/// (default "0"), and neither a bridge/tunnel relative to the other.
fn ways_should_connect(a: &Way, b: &Way) -> bool {
    connect_eligible(a)
        && connect_eligible(b)
        && a.tag("layer").unwrap_or("0") == b.tag("layer").unwrap_or("0")
        && truthy(a.tag("bridge")) == truthy(b.tag("bridge"))
        && truthy(a.tag("tunnel")) == truthy(b.tag("tunnel"))
}

/// All geometric intersection points between two polylines, unique and
/// sorted. Segments are swept in min-x order so each pair with overlapping
/// x-extents is tested once; collinear overlaps contribute no points.
fn polyline_intersections(a: &[(f64, f64)], b: &[(f64, f64)]) -> Vec<(f64, f64)> {
    let mut b_segments: Vec<Line<f64>> = b
        .windows(2)
        .map(|w| Line::new(Coord { x: w[0].0, y: w[0].1 }, Coord { x: w[1].0, y: w[1].1 }))
        .collect();
    b_segments.sort_by(|l, r| {
        l.start.x.min(l.end.x).total_cmp(&r.start.x.min(r.end.x))
    });

    let mut points = Vec::new();
    for w in a.windows(2) {
        let segment =
            Line::new(Coord { x: w[0].0, y: w[0].1 }, Coord { x: w[1].0, y: w[1].1 });
        let (min_x, max_x) = {
            let (s, e) = (segment.start.x, segment.end.x);
            (s.min(e), s.max(e))
        };
        // Sweep: skip everything strictly right of this segment.
        for other in &b_segments {
            let other_min = other.start.x.min(other.end.x);
            if other_min > max_x {
                break;
            }
            if other.start.x.max(other.end.x) < min_x {
                continue;
            }
            if let Some(LineIntersection::SinglePoint { intersection, .. }) =
                line_intersection(segment, *other)
            {
                points.push((intersection.x, intersection.y));
            }
        }
    }
    points.sort_by(|l, r| l.0.total_cmp(&r.0).then(l.1.total_cmp(&r.1)));
    points.dedup();
    points
}

impl<'a> Changeset<'a> {
    /// Resolve a way's refs through the pending state (created nodes
    /// included). `None` when any ref dangles.
    fn current_way_coords(&self, way: &Way) -> Option<Vec<(f64, f64)>> {
        way.refs
            .iter()
            .map(|&id| self.current_node(id).map(|node| (node.lon, node.lat)))
            .collect()
    }

    /// Synthesise `crossing=yes` nodes wherever connect-eligible ways cross
    /// without sharing one, splicing the node into both ways. Nodes within
    /// one meter of a crossing are reused instead of duplicated.
    pub fn create_intersections(
        &mut self,
        ids: impl IntoIterator<Item = i64>,
    ) -> Result<IntersectStats> {
        let base = self.base;
        let mut stats = IntersectStats::default();
        let mut examined: AHashSet<(i64, i64)> = AHashSet::new();

        for id in ids {
            self.check_cancelled()?;
            let Some(way) = self.current_way(id) else { continue };
            if !connect_eligible(&way) {
                continue;
            }
            let Some(coords) = self.current_way_coords(&way) else { continue };
            let mut bbox = Bbox::EMPTY;
            for &(lon, lat) in &coords {
                bbox.extend(lon, lat);
            }

            for candidate in base.ways().within_bbox(&bbox) {
                let candidate_id = base.ways().id(candidate);
                if candidate_id == id {
                    continue;
                }
                let pair = (id.min(candidate_id), id.max(candidate_id));
                if !examined.insert(pair) {
                    continue;
                }
                // Refetch: an earlier candidate may have spliced this way.
                let Some(way) = self.current_way(id) else { break };
                let Some(other) = self.current_way(candidate_id) else { continue };
                if !ways_should_connect(&way, &other) {
                    continue;
                }
                let Some(way_coords) = self.current_way_coords(&way) else { continue };
                let Some(other_coords) = self.current_way_coords(&other) else { continue };

                for point in polyline_intersections(&way_coords, &other_coords) {
                    self.connect_at(id, candidate_id, point, &mut stats)?;
                }
            }
        }
        Ok(stats)
    }

    /// Make both ways share a node at `point`: reuse a node of either way
    /// within the threshold, otherwise create a fresh crossing node.
    fn connect_at(
        &mut self,
        a_id: i64,
        b_id: i64,
        point: (f64, f64),
        stats: &mut IntersectStats,
    ) -> Result<()> {
        let Some(a) = self.current_way(a_id) else { return Ok(()) };
        let Some(b) = self.current_way(b_id) else { return Ok(()) };

        // Nearest existing node of either way, within the reuse threshold.
        let mut reusable: Option<(f64, i64)> = None;
        for &ref_id in a.refs.iter().chain(b.refs.iter()) {
            let Some(node) = self.current_node(ref_id) else { continue };
            let meters = haversine_m(point.0, point.1, node.lon, node.lat);
            if meters <= REUSE_THRESHOLD_M {
                let candidate = (meters, ref_id);
                if reusable.is_none_or(|best| (candidate.0, candidate.1) < (best.0, best.1)) {
                    reusable = Some(candidate);
                }
            }
        }

        let node_id = match reusable {
            Some((_, existing)) => {
                stats.nodes_reused += 1;
                existing
            }
            None => {
                let fresh = self.max_node_id() + 1;
                self.create(
                    Node::new(fresh, point.0, point.1).with_tag("crossing", "yes"),
                )?;
                self.relate(EntityKind::Node, fresh, (EntityKind::Way, a_id));
                self.relate(EntityKind::Node, fresh, (EntityKind::Way, b_id));
                stats.nodes_created += 1;
                fresh
            }
        };

        for way_id in [a_id, b_id] {
            if self.splice_node(way_id, node_id, point)? {
                stats.ways_spliced += 1;
            }
        }
        Ok(())
    }

    /// Insert `node_id` into a way at the position nearest to `point`.
    /// Returns false when the way already carries the node.
    fn splice_node(&mut self, way_id: i64, node_id: i64, point: (f64, f64)) -> Result<bool> {
        let Some(way) = self.current_way(way_id) else { return Ok(false) };
        if way.refs.contains(&node_id) {
            return Ok(false);
        }
        let Some(coords) = self.current_way_coords(&way) else { return Ok(false) };

        let mut nearest = 0usize;
        let mut nearest_m = f64::INFINITY;
        for (i, &(lon, lat)) in coords.iter().enumerate() {
            let meters = haversine_m(point.0, point.1, lon, lat);
            if meters < nearest_m {
                nearest_m = meters;
                nearest = i;
            }
        }
        // Never splice ahead of the first vertex.
        let at = nearest.max(1);

        self.modify_way(way_id, move |mut way| {
            way.refs.insert(at.min(way.refs.len()), node_id);
            way
        })?;
        self.relate(EntityKind::Way, way_id, (EntityKind::Node, node_id));
        Ok(true)
    }
}
