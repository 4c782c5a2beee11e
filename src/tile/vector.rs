//! Mapbox Vector Tile encoding of query results.

use mvt::{GeomEncoder, GeomType, Tile};

use crate::error::{Error, Result};
use crate::store::Store;
use crate::tile::TileId;

const EXTENT: u32 = 4096;

fn tile_err(err: impl std::fmt::Display) -> Error {
    Error::Tile(err.to_string())
}

impl Store {
    /// Encode one vector tile with two layers, `@osmix:<dataset>:nodes`
    /// (tagged nodes as points) and `@osmix:<dataset>:ways` (lines and
    /// area polygons), extent 4096. Feature ids are the OSM ids; tags ride
    /// along as string attributes.
    pub fn vector_tile(&self, dataset: &str, tile: TileId) -> Result<Vec<u8>> {
        let extent = f64::from(EXTENT);
        let mut out = Tile::new(EXTENT);
        let bbox = tile.bbox();

        let project = |lon: f64, lat: f64| {
            let (x, y) = tile.project(lon, lat);
            (x * extent, y * extent)
        };

        let mut layer = out.create_layer(&format!("@osmix:{dataset}:nodes"));
        for node in self.nodes().within_bbox(&bbox) {
            if self.nodes().tags().cardinality(node) == 0 {
                continue;
            }
            let (lon, lat) = self.nodes().position(node);
            let (x, y) = project(lon, lat);
            let geometry = GeomEncoder::new(GeomType::Point)
                .point(x, y)
                .map_err(tile_err)?
                .encode()
                .map_err(tile_err)?;
            let id = self.nodes().id(node);
            let mut feature = layer.into_feature(geometry);
            feature.set_id(id.unsigned_abs());
            for (key, value) in self.string_tags(self.nodes().tags(), node) {
                feature.add_tag_string(&key, &value);
            }
            layer = feature.into_layer();
        }
        out.add_layer(layer).map_err(tile_err)?;

        let mut layer = out.create_layer(&format!("@osmix:{dataset}:ways"));
        for way in self.ways().within_bbox(&bbox) {
            let Ok(coords) = self.ways().coordinates(way, self.nodes()) else {
                continue;
            };
            if coords.len() < 2 {
                continue;
            }
            let geom_type =
                if self.way_is_area(way) { GeomType::Polygon } else { GeomType::Linestring };
            let mut encoder = GeomEncoder::new(geom_type);
            for &(lon, lat) in &coords {
                let (x, y) = project(lon, lat);
                encoder = encoder.point(x.round(), y.round()).map_err(tile_err)?;
            }
            encoder = encoder.complete().map_err(tile_err)?;
            let geometry = encoder.encode().map_err(tile_err)?;

            let id = self.ways().id(way);
            let mut feature = layer.into_feature(geometry);
            feature.set_id(id.unsigned_abs());
            for (key, value) in self.string_tags(self.ways().tags(), way) {
                feature.add_tag_string(&key, &value);
            }
            layer = feature.into_layer();
        }
        out.add_layer(layer).map_err(tile_err)?;

        out.to_bytes().map_err(tile_err)
    }
}
