//! Raster tile rendering: Bresenham way outlines and scanline polygon
//! fills over an RGBA8 pixel buffer.

use crate::spatial::Bbox;
use crate::store::Store;
use crate::tile::TileId;

/// RGBA color.
pub type Color = [u8; 4];

/// Raster rendering options. Colors default to a neutral basemap look.
#[derive(Debug, Clone, Copy)]
pub struct RasterOptions {
    pub tile_size: u32,
    pub way_color: Color,
    pub area_fill: Color,
    pub node_color: Color,
    /// Paint every node, not just tagged ones.
    pub all_nodes: bool,
}

impl Default for RasterOptions {
    fn default() -> Self {
        Self {
            tile_size: 256,
            way_color: [68, 68, 68, 255],
            area_fill: [204, 214, 199, 255],
            node_color: [26, 80, 204, 255],
            all_nodes: false,
        }
    }
}

/// A square RGBA8 pixel buffer.
struct Raster {
    size: i64,
    pixels: Vec<u8>,
}

impl Raster {
    fn new(size: u32) -> Self {
        Self { size: i64::from(size), pixels: vec![0; (size as usize).pow(2) * 4] }
    }

    #[inline]
    fn set(&mut self, x: i64, y: i64, color: Color) {
        if x < 0 || y < 0 || x >= self.size || y >= self.size {
            return;
        }
        let at = ((y * self.size + x) * 4) as usize;
        self.pixels[at..at + 4].copy_from_slice(&color);
    }

    /// Bresenham line, clipped to the tile by the `set` bounds check.
    fn line(&mut self, x0: i64, y0: i64, x1: i64, y1: i64, color: Color) {
        let dx = (x1 - x0).abs();
        let dy = -(y1 - y0).abs();
        let sx = if x0 < x1 { 1 } else { -1 };
        let sy = if y0 < y1 { 1 } else { -1 };
        let (mut x, mut y) = (x0, y0);
        let mut err = dx + dy;
        loop {
            self.set(x, y, color);
            if x == x1 && y == y1 {
                break;
            }
            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x += sx;
            }
            if e2 <= dx {
                err += dx;
                y += sy;
            }
        }
    }

    /// Even-odd scanline fill. Pixels on the outermost row/column of the
    /// tile are never painted, so fills of adjacent tiles compose without
    /// double-coverage at the seams.
    fn fill_polygon(&mut self, ring: &[(f64, f64)], color: Color) {
        if ring.len() < 3 {
            return;
        }
        let min_y = ring.iter().map(|p| p.1).fold(f64::INFINITY, f64::min).floor() as i64;
        let max_y = ring.iter().map(|p| p.1).fold(f64::NEG_INFINITY, f64::max).ceil() as i64;

        for y in min_y.max(1)..=max_y.min(self.size - 2) {
            let scan = y as f64 + 0.5;
            let mut crossings: Vec<f64> = Vec::new();
            for i in 0..ring.len() {
                let (x0, y0) = ring[i];
                let (x1, y1) = ring[(i + 1) % ring.len()];
                if (y0 <= scan && y1 > scan) || (y1 <= scan && y0 > scan) {
                    crossings.push(x0 + (scan - y0) / (y1 - y0) * (x1 - x0));
                }
            }
            crossings.sort_by(f64::total_cmp);
            for span in crossings.chunks_exact(2) {
                let from = (span[0].ceil() as i64).max(1);
                let to = (span[1].floor() as i64).min(self.size - 2);
                for x in from..=to {
                    self.set(x, y, color);
                }
            }
        }
    }
}

impl Store {
    /// Render one raster tile as RGBA8 bytes (`tile_size²` pixels, row
    /// major). Closed area ways fill, every way strokes its outline, and
    /// tagged nodes (or all nodes, per options) paint single pixels.
    pub fn raster_tile(&self, tile: TileId, options: &RasterOptions) -> Vec<u8> {
        let size = f64::from(options.tile_size);
        let mut raster = Raster::new(options.tile_size);

        // Pull geometry from a slightly widened bbox so strokes that only
        // clip the corner of the tile still paint.
        let bbox = tile.bbox();
        let margin_lon = (bbox.max_lon - bbox.min_lon) * 0.25;
        let margin_lat = (bbox.max_lat - bbox.min_lat) * 0.25;
        let probe = Bbox::new(
            bbox.min_lon - margin_lon,
            bbox.min_lat - margin_lat,
            bbox.max_lon + margin_lon,
            bbox.max_lat + margin_lat,
        );

        let project = |lon: f64, lat: f64| {
            let (x, y) = tile.project(lon, lat);
            (x * size, y * size)
        };

        for way in self.ways().within_bbox(&probe) {
            let Ok(coords) = self.ways().coordinates(way, self.nodes()) else {
                continue;
            };
            let pixels: Vec<(f64, f64)> =
                coords.iter().map(|&(lon, lat)| project(lon, lat)).collect();

            if self.way_is_area(way) {
                raster.fill_polygon(&pixels, options.area_fill);
            }
            for segment in pixels.windows(2) {
                raster.line(
                    segment[0].0.floor() as i64,
                    segment[0].1.floor() as i64,
                    segment[1].0.floor() as i64,
                    segment[1].1.floor() as i64,
                    options.way_color,
                );
            }
        }

        for node in self.nodes().within_bbox(&bbox) {
            if !options.all_nodes && self.nodes().tags().cardinality(node) == 0 {
                continue;
            }
            let (lon, lat) = self.nodes().position(node);
            let (x, y) = project(lon, lat);
            raster.set(x.floor() as i64, y.floor() as i64, options.node_color);
        }

        raster.pixels
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Node, Way};
    use crate::store::StoreAssembler;

    fn painted(pixels: &[u8], size: u32) -> Vec<(i64, i64)> {
        let mut out = Vec::new();
        for y in 0..i64::from(size) {
            for x in 0..i64::from(size) {
                let at = ((y * i64::from(size) + x) * 4) as usize;
                if pixels[at + 3] != 0 {
                    out.push((x, y));
                }
            }
        }
        out
    }

    /// A way crossing the shared edge of two adjacent tiles.
    fn seam_store() -> Store {
        let left = TileId::new(14, 8500, 5800).bbox();
        let right = TileId::new(14, 8501, 5800).bbox();
        let lat = (left.min_lat + left.max_lat) / 2.0;
        let mut assembler = StoreAssembler::new(false);
        assembler.push_node(&Node::new(1, left.min_lon + 0.0005, lat));
        assembler.push_node(&Node::new(2, right.min_lon + 0.0005, lat));
        assembler
            .push_way(&Way::new(10, vec![1, 2]).with_tag("highway", "residential"))
            .unwrap();
        assembler.finish().unwrap()
    }

    #[test]
    fn way_paints_pixels_in_both_tiles() {
        let store = seam_store();
        let options = RasterOptions::default();
        for tile in [TileId::new(14, 8500, 5800), TileId::new(14, 8501, 5800)] {
            let pixels = store.raster_tile(tile, &options);
            assert!(!painted(&pixels, options.tile_size).is_empty(), "empty tile {tile:?}");
        }
    }

    #[test]
    fn adjacent_tiles_never_paint_the_same_world_pixel() {
        let store = seam_store();
        let options = RasterOptions::default();
        let size = i64::from(options.tile_size);

        let left = TileId::new(14, 8500, 5800);
        let right = TileId::new(14, 8501, 5800);
        let left_pixels: Vec<(i64, i64)> = painted(&store.raster_tile(left, &options), 256)
            .into_iter()
            .map(|(x, y)| (i64::from(left.x) * size + x, y))
            .collect();
        let right_pixels: Vec<(i64, i64)> = painted(&store.raster_tile(right, &options), 256)
            .into_iter()
            .map(|(x, y)| (i64::from(right.x) * size + x, y))
            .collect();

        for pixel in &left_pixels {
            assert!(!right_pixels.contains(pixel), "world pixel {pixel:?} painted twice");
        }
    }

    #[test]
    fn area_fill_skips_tile_edge_pixels() {
        // A huge filled square covering the whole tile.
        let tile = TileId::new(14, 8500, 5800);
        let bbox = tile.bbox();
        let mut assembler = StoreAssembler::new(false);
        assembler.push_node(&Node::new(1, bbox.min_lon - 0.01, bbox.min_lat - 0.01));
        assembler.push_node(&Node::new(2, bbox.max_lon + 0.01, bbox.min_lat - 0.01));
        assembler.push_node(&Node::new(3, bbox.max_lon + 0.01, bbox.max_lat + 0.01));
        assembler.push_node(&Node::new(4, bbox.min_lon - 0.01, bbox.max_lat + 0.01));
        assembler
            .push_way(&Way::new(10, vec![1, 2, 3, 4, 1]).with_tag("landuse", "forest"))
            .unwrap();
        let store = assembler.finish().unwrap();

        let options = RasterOptions::default();
        let pixels = store.raster_tile(tile, &options);
        let size = i64::from(options.tile_size);
        let painted = painted(&pixels, options.tile_size);

        assert!(!painted.is_empty());
        for &(x, y) in &painted {
            assert!(x > 0 && x < size - 1, "fill painted edge column {x}");
            assert!(y > 0 && y < size - 1, "fill painted edge row {y}");
        }
        // Interior is solid.
        assert!(painted.contains(&(128, 128)));
    }

    #[test]
    fn tagged_nodes_paint_single_pixels() {
        let tile = TileId::new(14, 8500, 5800);
        let bbox = tile.bbox();
        let (lon, lat) = bbox.center();
        let mut assembler = StoreAssembler::new(false);
        assembler.push_node(&Node::new(1, lon, lat).with_tag("amenity", "cafe"));
        assembler.push_node(&Node::new(2, lon + 0.0001, lat)); // untagged
        let store = assembler.finish().unwrap();

        let options = RasterOptions::default();
        let pixels = store.raster_tile(tile, &options);
        assert_eq!(painted(&pixels, options.tile_size).len(), 1);

        let all = RasterOptions { all_nodes: true, ..RasterOptions::default() };
        let pixels = store.raster_tile(tile, &all);
        assert_eq!(painted(&pixels, options.tile_size).len(), 2);
    }
}
