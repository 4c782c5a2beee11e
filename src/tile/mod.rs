//! Slippy-map tile addressing and Web Mercator projection.

mod raster;
mod vector;

pub use raster::RasterOptions;

use std::f64::consts::PI;

use crate::spatial::Bbox;

/// A tile address in the usual z/x/y scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct TileId {
    pub z: u8,
    pub x: u32,
    pub y: u32,
}

impl TileId {
    pub fn new(z: u8, x: u32, y: u32) -> Self {
        Self { z, x, y }
    }

    /// Number of tiles along one axis at this zoom.
    #[inline]
    fn scale(&self) -> f64 {
        f64::from(1u32 << self.z.min(31))
    }

    /// Geographic extent of this tile.
    pub fn bbox(&self) -> Bbox {
        let n = self.scale();
        let min_lon = f64::from(self.x) / n * 360.0 - 180.0;
        let max_lon = f64::from(self.x + 1) / n * 360.0 - 180.0;
        let max_lat = (PI * (1.0 - 2.0 * f64::from(self.y) / n)).sinh().atan().to_degrees();
        let min_lat =
            (PI * (1.0 - 2.0 * f64::from(self.y + 1) / n)).sinh().atan().to_degrees();
        Bbox::new(min_lon, min_lat, max_lon, max_lat)
    }

    /// Project a WGS-84 position into this tile's unit square: (0, 0) is the
    /// tile's north-west corner, (1, 1) its south-east. Positions outside
    /// the tile land outside [0, 1].
    pub fn project(&self, lon: f64, lat: f64) -> (f64, f64) {
        let n = self.scale();
        let x = (lon + 180.0) / 360.0 * n - f64::from(self.x);
        let lat_rad = lat.to_radians();
        let y = (1.0 - (lat_rad.tan() + 1.0 / lat_rad.cos()).ln() / PI) / 2.0 * n
            - f64::from(self.y);
        (x, y)
    }
}
