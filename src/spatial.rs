use rstar::primitives::{GeomWithData, Rectangle};
use rstar::{RTree, AABB};

/// Mean Earth radius in meters, used by all great-circle math.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Meters per degree of latitude (and the smallest possible meters per
/// degree of longitude at the equator). Used only as conservative bounds
/// when pruning nearest-neighbor candidates.
const M_PER_DEG_LAT: f64 = 110_574.0;
const M_PER_DEG_LON_EQUATOR: f64 = 111_320.0;

/// Great-circle distance in meters between two WGS-84 positions.
pub fn haversine_m(lon1: f64, lat1: f64, lon2: f64, lat2: f64) -> f64 {
    let (lat1, lat2) = (lat1.to_radians(), lat2.to_radians());
    let dlat = lat2 - lat1;
    let dlon = (lon2 - lon1).to_radians();
    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * a.sqrt().min(1.0).asin()
}

/// An axis-aligned bounding box in WGS-84 degrees: (min-lon, min-lat, max-lon, max-lat).
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct Bbox {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl Bbox {
    /// The inverted empty box; extending it with any point yields that point.
    pub const EMPTY: Bbox = Bbox {
        min_lon: f64::INFINITY,
        min_lat: f64::INFINITY,
        max_lon: f64::NEG_INFINITY,
        max_lat: f64::NEG_INFINITY,
    };

    pub fn new(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Self {
        Self { min_lon, min_lat, max_lon, max_lat }
    }

    pub fn from_array(b: [f64; 4]) -> Self {
        Self::new(b[0], b[1], b[2], b[3])
    }

    pub fn to_array(self) -> [f64; 4] {
        [self.min_lon, self.min_lat, self.max_lon, self.max_lat]
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.min_lon > self.max_lon || self.min_lat > self.max_lat
    }

    /// Grow to include the given position.
    pub fn extend(&mut self, lon: f64, lat: f64) {
        self.min_lon = self.min_lon.min(lon);
        self.min_lat = self.min_lat.min(lat);
        self.max_lon = self.max_lon.max(lon);
        self.max_lat = self.max_lat.max(lat);
    }

    /// Grow to include another box.
    pub fn extend_bbox(&mut self, other: &Bbox) {
        if !other.is_empty() {
            self.extend(other.min_lon, other.min_lat);
            self.extend(other.max_lon, other.max_lat);
        }
    }

    /// Inclusive containment test on both edges.
    #[inline]
    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        lon >= self.min_lon && lon <= self.max_lon && lat >= self.min_lat && lat <= self.max_lat
    }

    #[inline]
    pub fn intersects(&self, other: &Bbox) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.min_lon <= other.max_lon
            && self.max_lon >= other.min_lon
            && self.min_lat <= other.max_lat
            && self.max_lat >= other.min_lat
    }

    pub fn center(&self) -> (f64, f64) {
        ((self.min_lon + self.max_lon) / 2.0, (self.min_lat + self.max_lat) / 2.0)
    }
}

type PointEntry = GeomWithData<[f64; 2], u32>;
type RectEntry = GeomWithData<Rectangle<[f64; 2]>, u32>;

/// Static R-tree over point coordinates, bulk-loaded once at finalization.
/// Entry data is the dense column index of the point.
#[derive(Debug)]
pub struct PointIndex {
    tree: RTree<PointEntry>,
}

impl PointIndex {
    pub fn build(lons: &[f64], lats: &[f64]) -> Self {
        debug_assert_eq!(lons.len(), lats.len());
        let entries = lons
            .iter()
            .zip(lats.iter())
            .enumerate()
            .map(|(i, (&lon, &lat))| GeomWithData::new([lon, lat], i as u32))
            .collect();
        Self { tree: RTree::bulk_load(entries) }
    }

    /// Indexes of all points inside `bbox` (inclusive edges), ascending.
    pub fn within_bbox(&self, bbox: &Bbox) -> Vec<u32> {
        if bbox.is_empty() {
            return Vec::new();
        }
        let envelope =
            AABB::from_corners([bbox.min_lon, bbox.min_lat], [bbox.max_lon, bbox.max_lat]);
        let mut out: Vec<u32> =
            self.tree.locate_in_envelope_intersecting(&envelope).map(|e| e.data).collect();
        out.sort_unstable();
        out
    }

    /// Coarse radius query: indexes of all points inside the bounding box of
    /// the `radius_km` disk around (lon, lat). Callers filter exactly.
    pub fn within_radius_km(&self, lon: f64, lat: f64, radius_km: f64) -> Vec<u32> {
        let dlat = radius_km * 1000.0 / M_PER_DEG_LAT;
        let cos_lat = lat.to_radians().cos().max(0.01);
        let dlon = radius_km * 1000.0 / (M_PER_DEG_LON_EQUATOR * cos_lat);
        self.within_bbox(&Bbox::new(lon - dlon, lat - dlat, lon + dlon, lat + dlat))
    }

    /// The `k` nearest points to (lon, lat) by haversine distance, ascending,
    /// ties broken by lower index. Candidates beyond `max_m` (when given) are
    /// excluded. Returns (index, meters) pairs.
    ///
    /// Candidates stream out of the R-tree in Euclidean degree order; a
    /// conservative meters-per-degree bound decides when no remaining
    /// candidate can beat the current k-th best.
    pub fn nearest(&self, lon: f64, lat: f64, k: usize, max_m: Option<f64>) -> Vec<(u32, f64)> {
        if k == 0 {
            return Vec::new();
        }
        let mut best: Vec<(u32, f64)> = Vec::with_capacity(k + 1);
        for (entry, d2) in self.tree.nearest_neighbor_iter_with_distance_2(&[lon, lat]) {
            let d_deg = d2.sqrt();
            // Smallest meters this degree-space distance could represent:
            // a candidate at most d_deg away in latitude too, so take the
            // cosine at the farthest reachable latitude.
            let reach_lat = (lat.abs() + d_deg).min(89.9);
            let factor = M_PER_DEG_LAT.min(M_PER_DEG_LON_EQUATOR * reach_lat.to_radians().cos());
            let lower_bound_m = d_deg * factor;

            let worst = best.last().map(|&(_, d)| d);
            let cutoff = match (worst, max_m) {
                (Some(w), Some(m)) if best.len() >= k => w.min(m),
                (Some(w), _) if best.len() >= k => w,
                (_, Some(m)) => m,
                _ => f64::INFINITY,
            };
            if lower_bound_m > cutoff {
                break;
            }

            let meters = haversine_m(lon, lat, entry.geom()[0], entry.geom()[1]);
            if let Some(m) = max_m {
                if meters > m {
                    continue;
                }
            }
            let pos = best
                .binary_search_by(|&(i, d)| d.total_cmp(&meters).then(i.cmp(&entry.data)))
                .unwrap_or_else(|p| p);
            best.insert(pos, (entry.data, meters));
            best.truncate(k);
        }
        best
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.tree.size()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }
}

/// Static R-tree over bounding boxes (ways, relation extents).
/// Entry data is the dense column index of the owning entity.
#[derive(Debug)]
pub struct RectIndex {
    tree: RTree<RectEntry>,
}

impl RectIndex {
    /// Entries with empty boxes (no resolvable coordinates) are skipped.
    pub fn build(bboxes: &[Bbox]) -> Self {
        let entries = bboxes
            .iter()
            .enumerate()
            .filter(|(_, b)| !b.is_empty())
            .map(|(i, b)| {
                GeomWithData::new(
                    Rectangle::from_corners([b.min_lon, b.min_lat], [b.max_lon, b.max_lat]),
                    i as u32,
                )
            })
            .collect();
        Self { tree: RTree::bulk_load(entries) }
    }

    /// Indexes of all entries whose box intersects `bbox`, ascending.
    pub fn intersecting(&self, bbox: &Bbox) -> Vec<u32> {
        if bbox.is_empty() {
            return Vec::new();
        }
        let envelope =
            AABB::from_corners([bbox.min_lon, bbox.min_lat], [bbox.max_lon, bbox.max_lat]);
        let mut out: Vec<u32> =
            self.tree.locate_in_envelope_intersecting(&envelope).map(|e| e.data).collect();
        out.sort_unstable();
        out
    }
}
