use serde_json::{json, Map, Value};

use crate::entity::Tags;
use crate::error::{EntityKind, Error, Result};
use crate::spatial::Bbox;
use crate::store::Store;

/// Tag keys that turn a closed way into a polygon. `area=yes` forces a
/// polygon and `area=no` forces a line regardless of this list.
const AREA_KEYS: &[&str] = &["building", "landuse", "natural", "amenity", "leisure"];

/// Area test for a materialized way entity (changeset code paths); mirrors
/// [`Store::way_is_area`].
pub(crate) fn way_entity_is_area(way: &crate::entity::Way) -> bool {
    if !way.is_closed() {
        return false;
    }
    match way.tag("area") {
        Some("no") => return false,
        Some(_) => return true,
        None => {}
    }
    if AREA_KEYS.iter().any(|key| way.tag(key).is_some()) {
        return true;
    }
    matches!(way.tag("place"), Some("island"))
}

/// Signed area of a closed ring (first == last) in degree space; positive
/// means counter-clockwise winding.
fn signed_area(ring: &[(f64, f64)]) -> f64 {
    ring.windows(2).map(|w| w[0].0 * w[1].1 - w[1].0 * w[0].1).sum::<f64>() / 2.0
}

/// Reverse a ring when its winding disagrees with the requested one.
fn oriented(mut ring: Vec<(f64, f64)>, ccw: bool) -> Vec<(f64, f64)> {
    if (signed_area(&ring) > 0.0) != ccw {
        ring.reverse();
    }
    ring
}

fn ring_json(ring: &[(f64, f64)]) -> Value {
    Value::Array(ring.iter().map(|&(lon, lat)| json!([lon, lat])).collect())
}

fn line_json(coords: &[(f64, f64)]) -> Value {
    Value::Array(coords.iter().map(|&(lon, lat)| json!([lon, lat])).collect())
}

/// Join way ref runs into closed rings. Segments are consumed in order;
/// a segment joins when either endpoint matches the current ring's tail
/// (reversing as needed). Unclosable leftovers are dropped.
fn stitch_rings(mut segments: Vec<Vec<i64>>) -> Vec<Vec<i64>> {
    segments.retain(|s| s.len() >= 2);
    let mut rings = Vec::new();
    while !segments.is_empty() {
        let mut current = segments.remove(0);
        loop {
            if current.len() >= 4 && current.first() == current.last() {
                rings.push(current);
                break;
            }
            let tail = *current.last().expect("segments are non-empty");
            let next = segments.iter().position(|s| {
                s.first() == Some(&tail) || s.last() == Some(&tail)
            });
            match next {
                Some(i) => {
                    let mut segment = segments.remove(i);
                    if segment.first() == Some(&tail) {
                        current.extend_from_slice(&segment[1..]);
                    } else {
                        segment.reverse();
                        current.extend_from_slice(&segment[1..]);
                    }
                }
                None => {
                    log::debug!("dropping unclosable ring fragment of {} refs", current.len());
                    break;
                }
            }
        }
    }
    rings
}

impl Store {
    /// Whether a way renders as a polygon: closed, and carrying an
    /// area-indicating tag.
    pub(crate) fn way_is_area(&self, way: u32) -> bool {
        if !self.ways.is_closed(way) {
            return false;
        }
        let tags = self.ways.tags();
        match self.tag_value(tags, way, "area") {
            Some("no") => return false,
            Some(_) => return true,
            None => {}
        }
        if AREA_KEYS.iter().any(|key| self.tag_value(tags, way, key).is_some()) {
            return true;
        }
        matches!(self.tag_value(tags, way, "place"), Some("island"))
    }

    /// Export one entity as a GeoJSON Feature. Returns `None` for an unknown
    /// id; propagates `DanglingRef` when a way's geometry cannot resolve.
    pub fn to_geojson_feature(&self, kind: EntityKind, id: i64) -> Result<Option<Value>> {
        let value = match kind {
            EntityKind::Node => match self.nodes.index_of(id) {
                Some(index) => {
                    let (lon, lat) = self.nodes.position(index);
                    let geometry = json!({"type": "Point", "coordinates": [lon, lat]});
                    Some(self.feature(
                        format!("node/{id}"),
                        geometry,
                        self.string_tags(self.nodes.tags(), index),
                    ))
                }
                None => None,
            },
            EntityKind::Way => match self.ways.index_of(id) {
                Some(index) => Some(self.feature(
                    format!("way/{id}"),
                    self.way_geometry(index)?,
                    self.string_tags(self.ways.tags(), index),
                )),
                None => None,
            },
            EntityKind::Relation => match self.relations.index_of(id) {
                Some(index) => Some(self.feature(
                    format!("relation/{id}"),
                    self.relation_geometry(index, 0)?,
                    self.string_tags(self.relations.tags(), index),
                )),
                None => None,
            },
        };
        Ok(value)
    }

    /// Export every tagged node and every way intersecting `bbox` (or the
    /// whole store) as a FeatureCollection. Ways with unresolvable refs are
    /// skipped.
    pub fn to_geojson_collection(&self, bbox: Option<&Bbox>) -> Result<Value> {
        let mut features = Vec::new();

        let node_indexes: Vec<u32> = match bbox {
            Some(b) => self.nodes.within_bbox(b),
            None => (0..self.nodes.len() as u32).collect(),
        };
        for index in node_indexes {
            if self.nodes.tags().cardinality(index) == 0 {
                continue;
            }
            let (lon, lat) = self.nodes.position(index);
            features.push(self.feature(
                format!("node/{}", self.nodes.id(index)),
                json!({"type": "Point", "coordinates": [lon, lat]}),
                self.string_tags(self.nodes.tags(), index),
            ));
        }

        let way_indexes: Vec<u32> = match bbox {
            Some(b) => self.ways.within_bbox(b),
            None => (0..self.ways.len() as u32).collect(),
        };
        for index in way_indexes {
            match self.way_geometry(index) {
                Ok(geometry) => features.push(self.feature(
                    format!("way/{}", self.ways.id(index)),
                    geometry,
                    self.string_tags(self.ways.tags(), index),
                )),
                Err(Error::DanglingRef { .. }) => {
                    log::warn!("skipping way {} with dangling refs", self.ways.id(index));
                }
                Err(other) => return Err(other),
            }
        }

        Ok(json!({"type": "FeatureCollection", "features": features}))
    }

    fn feature(&self, id: String, geometry: Value, tags: Tags) -> Value {
        let mut properties = Map::new();
        for (key, value) in tags {
            properties.insert(key, json!(value));
        }
        json!({"type": "Feature", "id": id, "geometry": geometry, "properties": properties})
    }

    /// LineString, or a CCW-normalized Polygon for closed area ways.
    fn way_geometry(&self, index: u32) -> Result<Value> {
        let coords = self.ways.coordinates(index, &self.nodes)?;
        if self.way_is_area(index) && coords.len() >= 4 {
            let ring = oriented(coords, true);
            return Ok(json!({"type": "Polygon", "coordinates": [ring_json(&ring)]}));
        }
        Ok(json!({"type": "LineString", "coordinates": line_json(&coords)}))
    }

    /// Geometry for a relation, classified by its `type` tag:
    /// multipolygon/boundary → MultiPolygon; route → MultiLineString;
    /// homogeneous node/way members → MultiPoint/MultiLineString; anything
    /// else a GeometryCollection (nested one level).
    fn relation_geometry(&self, index: u32, depth: u8) -> Result<Value> {
        let ty = self.tag_value(self.relations.tags(), index, "type");
        let (kinds, refs, _) = self.relations.members_of(index);

        match ty {
            Some("multipolygon") | Some("boundary") => self.multipolygon_geometry(index),
            Some("route") => self.multiline_geometry(index),
            _ if !kinds.is_empty() && kinds.iter().all(|&k| k == EntityKind::Node) => {
                let mut coords = Vec::new();
                for &ref_id in refs {
                    if let Some(node) = self.nodes.index_of(ref_id) {
                        let (lon, lat) = self.nodes.position(node);
                        coords.push((lon, lat));
                    }
                }
                Ok(json!({"type": "MultiPoint", "coordinates": line_json(&coords)}))
            }
            _ if !kinds.is_empty() && kinds.iter().all(|&k| k == EntityKind::Way) => {
                self.multiline_geometry(index)
            }
            _ => {
                let mut geometries = Vec::new();
                for (&kind, &ref_id) in kinds.iter().zip(refs.iter()) {
                    match kind {
                        EntityKind::Node => {
                            if let Some(node) = self.nodes.index_of(ref_id) {
                                let (lon, lat) = self.nodes.position(node);
                                geometries
                                    .push(json!({"type": "Point", "coordinates": [lon, lat]}));
                            }
                        }
                        EntityKind::Way => {
                            if let Some(way) = self.ways.index_of(ref_id) {
                                match self.way_geometry(way) {
                                    Ok(geometry) => geometries.push(geometry),
                                    Err(Error::DanglingRef { .. }) => {}
                                    Err(other) => return Err(other),
                                }
                            }
                        }
                        EntityKind::Relation if depth == 0 => {
                            if let Some(nested) = self.relations.index_of(ref_id) {
                                geometries.push(self.relation_geometry(nested, depth + 1)?);
                            }
                        }
                        EntityKind::Relation => {
                            log::debug!("not descending into nested relation {ref_id}");
                        }
                    }
                }
                Ok(json!({"type": "GeometryCollection", "geometries": geometries}))
            }
        }
    }

    fn multiline_geometry(&self, index: u32) -> Result<Value> {
        let (kinds, refs, _) = self.relations.members_of(index);
        let mut lines = Vec::new();
        for (&kind, &ref_id) in kinds.iter().zip(refs.iter()) {
            if kind != EntityKind::Way {
                continue;
            }
            let Some(way) = self.ways.index_of(ref_id) else { continue };
            match self.ways.coordinates(way, &self.nodes) {
                Ok(coords) => lines.push(line_json(&coords)),
                Err(Error::DanglingRef { .. }) => {}
                Err(other) => return Err(other),
            }
        }
        Ok(json!({"type": "MultiLineString", "coordinates": lines}))
    }

    /// Assemble outer/inner rings from way members. Outer rings wind CCW,
    /// inner rings CW; each inner ring attaches to the first outer ring
    /// whose bbox contains its first vertex.
    fn multipolygon_geometry(&self, index: u32) -> Result<Value> {
        let (kinds, refs, roles) = self.relations.members_of(index);
        let mut outer_segments = Vec::new();
        let mut inner_segments = Vec::new();
        for ((&kind, &ref_id), &role) in kinds.iter().zip(refs.iter()).zip(roles.iter()) {
            if kind != EntityKind::Way {
                continue;
            }
            let Some(way) = self.ways.index_of(ref_id) else { continue };
            let segment = self.ways.refs_of(way).to_vec();
            if self.resolve(role) == "inner" {
                inner_segments.push(segment);
            } else {
                outer_segments.push(segment);
            }
        }

        let resolve_ring = |ring: Vec<i64>, ccw: bool| -> Option<Vec<(f64, f64)>> {
            let mut coords = Vec::with_capacity(ring.len());
            for id in ring {
                let node = self.nodes.index_of(id)?;
                coords.push(self.nodes.position(node));
            }
            Some(oriented(coords, ccw))
        };

        let outers: Vec<Vec<(f64, f64)>> = stitch_rings(outer_segments)
            .into_iter()
            .filter_map(|ring| resolve_ring(ring, true))
            .collect();
        let inners: Vec<Vec<(f64, f64)>> = stitch_rings(inner_segments)
            .into_iter()
            .filter_map(|ring| resolve_ring(ring, false))
            .collect();

        let mut polygons: Vec<Vec<Vec<(f64, f64)>>> =
            outers.into_iter().map(|outer| vec![outer]).collect();
        for inner in inners {
            let Some(&(lon, lat)) = inner.first() else { continue };
            let slot = polygons.iter_mut().find(|polygon| {
                let mut bbox = Bbox::EMPTY;
                for &(olon, olat) in &polygon[0] {
                    bbox.extend(olon, olat);
                }
                bbox.contains(lon, lat)
            });
            match slot {
                Some(polygon) => polygon.push(inner),
                None => log::debug!("inner ring with no containing outer ring"),
            }
        }

        let coordinates: Vec<Value> = polygons
            .iter()
            .map(|polygon| Value::Array(polygon.iter().map(|ring| ring_json(ring)).collect()))
            .collect();
        Ok(json!({"type": "MultiPolygon", "coordinates": coordinates}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Member, Node, Relation, Way};
    use crate::store::StoreAssembler;

    fn sample() -> Store {
        let mut assembler = StoreAssembler::new(false);
        // A unit square of nodes, plus a tagged point of interest.
        assembler.push_node(&Node::new(1, 0.0, 0.0));
        assembler.push_node(&Node::new(2, 1.0, 0.0));
        assembler.push_node(&Node::new(3, 1.0, 1.0));
        assembler.push_node(&Node::new(4, 0.0, 1.0));
        assembler.push_node(&Node::new(5, 0.5, 0.5).with_tag("amenity", "fountain"));
        // Closed building way, wound clockwise on purpose.
        assembler
            .push_way(&Way::new(10, vec![1, 4, 3, 2, 1]).with_tag("building", "yes"))
            .unwrap();
        // Open road.
        assembler
            .push_way(&Way::new(11, vec![1, 2]).with_tag("highway", "residential"))
            .unwrap();
        // Closed way explicitly not an area.
        assembler
            .push_way(
                &Way::new(12, vec![1, 2, 3, 1])
                    .with_tag("building", "yes")
                    .with_tag("area", "no"),
            )
            .unwrap();
        assembler.finish().unwrap()
    }

    #[test]
    fn node_feature_is_a_point() {
        let store = sample();
        let feature =
            store.to_geojson_feature(EntityKind::Node, 5).unwrap().unwrap();
        assert_eq!(feature["geometry"]["type"], "Point");
        assert_eq!(feature["geometry"]["coordinates"], json!([0.5, 0.5]));
        assert_eq!(feature["properties"]["amenity"], "fountain");
        assert_eq!(feature["id"], "node/5");
    }

    #[test]
    fn closed_building_becomes_ccw_polygon() {
        let store = sample();
        let feature = store.to_geojson_feature(EntityKind::Way, 10).unwrap().unwrap();
        assert_eq!(feature["geometry"]["type"], "Polygon");
        let ring: Vec<(f64, f64)> = feature["geometry"]["coordinates"][0]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| (c[0].as_f64().unwrap(), c[1].as_f64().unwrap()))
            .collect();
        assert!(signed_area(&ring) > 0.0, "outer ring must wind CCW");
    }

    #[test]
    fn open_and_area_no_ways_stay_lines() {
        let store = sample();
        let open = store.to_geojson_feature(EntityKind::Way, 11).unwrap().unwrap();
        assert_eq!(open["geometry"]["type"], "LineString");
        let forced = store.to_geojson_feature(EntityKind::Way, 12).unwrap().unwrap();
        assert_eq!(forced["geometry"]["type"], "LineString");
    }

    #[test]
    fn unknown_id_is_none() {
        let store = sample();
        assert!(store.to_geojson_feature(EntityKind::Way, 999).unwrap().is_none());
    }

    #[test]
    fn collection_counts_tagged_nodes_plus_ways() {
        let store = sample();
        let collection = store.to_geojson_collection(None).unwrap();
        let features = collection["features"].as_array().unwrap();
        // 1 tagged node + 3 ways.
        assert_eq!(features.len(), 4);
    }

    #[test]
    fn multipolygon_relation_stitches_rings() {
        let mut assembler = StoreAssembler::new(false);
        // Outer square from two half-ways, plus a CCW-wound inner square
        // that must come out CW.
        for (id, lon, lat) in [
            (1, 0.0, 0.0),
            (2, 4.0, 0.0),
            (3, 4.0, 4.0),
            (4, 0.0, 4.0),
            (5, 1.0, 1.0),
            (6, 3.0, 1.0),
            (7, 3.0, 3.0),
            (8, 1.0, 3.0),
        ] {
            assembler.push_node(&Node::new(id, lon, lat));
        }
        assembler.push_way(&Way::new(10, vec![1, 2, 3])).unwrap();
        assembler.push_way(&Way::new(11, vec![3, 4, 1])).unwrap();
        assembler.push_way(&Way::new(12, vec![5, 6, 7, 8, 5])).unwrap();
        assembler
            .push_relation(
                &Relation::new(
                    100,
                    vec![
                        Member::way(10, "outer"),
                        Member::way(11, "outer"),
                        Member::way(12, "inner"),
                    ],
                )
                .with_tag("type", "multipolygon"),
            )
            .unwrap();
        let store = assembler.finish().unwrap();

        let feature =
            store.to_geojson_feature(EntityKind::Relation, 100).unwrap().unwrap();
        assert_eq!(feature["geometry"]["type"], "MultiPolygon");
        let polygons = feature["geometry"]["coordinates"].as_array().unwrap();
        assert_eq!(polygons.len(), 1);
        let rings = polygons[0].as_array().unwrap();
        assert_eq!(rings.len(), 2);

        let to_ring = |v: &Value| -> Vec<(f64, f64)> {
            v.as_array()
                .unwrap()
                .iter()
                .map(|c| (c[0].as_f64().unwrap(), c[1].as_f64().unwrap()))
                .collect()
        };
        assert!(signed_area(&to_ring(&rings[0])) > 0.0, "outer CCW");
        assert!(signed_area(&to_ring(&rings[1])) < 0.0, "inner CW");
    }

    #[test]
    fn route_relation_is_a_multilinestring() {
        let mut assembler = StoreAssembler::new(false);
        assembler.push_node(&Node::new(1, 0.0, 0.0));
        assembler.push_node(&Node::new(2, 1.0, 0.0));
        assembler.push_node(&Node::new(3, 2.0, 0.0));
        assembler.push_way(&Way::new(10, vec![1, 2])).unwrap();
        assembler.push_way(&Way::new(11, vec![2, 3])).unwrap();
        assembler
            .push_relation(
                &Relation::new(100, vec![Member::way(10, ""), Member::way(11, "")])
                    .with_tag("type", "route"),
            )
            .unwrap();
        let store = assembler.finish().unwrap();

        let feature =
            store.to_geojson_feature(EntityKind::Relation, 100).unwrap().unwrap();
        assert_eq!(feature["geometry"]["type"], "MultiLineString");
        assert_eq!(feature["geometry"]["coordinates"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn mixed_relation_is_a_geometry_collection() {
        let mut assembler = StoreAssembler::new(false);
        assembler.push_node(&Node::new(1, 0.0, 0.0));
        assembler.push_node(&Node::new(2, 1.0, 0.0));
        assembler.push_way(&Way::new(10, vec![1, 2])).unwrap();
        assembler
            .push_relation(&Relation::new(
                100,
                vec![Member::node(1, "stop"), Member::way(10, "path")],
            ))
            .unwrap();
        let store = assembler.finish().unwrap();

        let feature =
            store.to_geojson_feature(EntityKind::Relation, 100).unwrap().unwrap();
        assert_eq!(feature["geometry"]["type"], "GeometryCollection");
        assert_eq!(feature["geometry"]["geometries"].as_array().unwrap().len(), 2);
    }
}
