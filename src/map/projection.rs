use std::{f64::consts::PI, fmt};

use regex::Regex;
use serde::Serialize;

use crate::{data::osm::Coord, errors::Result};

/// Deepest zoom level accepted for tile requests.
pub const MAX_ZOOM: u8 = 24;

/// Latitude where the Web-Mercator square ends.
pub const MAX_MERCATOR_LAT: f64 = 85.051_128_779_806_59;

/// Slippy-map tile number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TileId {
    pub zoom: u8,
    pub x: u32,
    pub y: u32,
}

/// Inclusive tile index range of a bounding box at one zoom level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TileBounds {
    pub x_from: u32,
    pub x_to: u32,
    pub y_from: u32,
    pub y_to: u32,
}

impl fmt::Display for TileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.zoom, self.x, self.y)
    }
}

const TILE_PATH_PATTERN: &str = r"^/?(?:tiles/)?(?<z>\d{1,2})/(?<x>\d{1,10})/(?<y>\d{1,10})(?:\.png)?$";

impl TileId {
    pub fn new(zoom: u8, x: u32, y: u32) -> Result<TileId> {
        if zoom > MAX_ZOOM {
            return Err(format!("zoom {} is above the maximum of {}", zoom, MAX_ZOOM).into());
        }
        let n = 1u64 << zoom;
        if u64::from(x) >= n || u64::from(y) >= n {
            return Err(format!("tile {}/{}/{} is outside the {}x{} grid", zoom, x, y, n, n).into());
        }
        Ok(TileId { zoom, x, y })
    }

    /// Parses request paths like `13/4567/2890.png` or `/tiles/13/4567/2890`.
    pub fn from_path(path: &str) -> Result<TileId> {
        let captures = Regex::new(TILE_PATH_PATTERN)?
            .captures(path.trim())
            .ok_or_else(|| format!("'{}' is not a z/x/y tile path", path))?;
        TileId::new(captures["z"].parse()?, captures["x"].parse()?, captures["y"].parse()?)
    }

    pub fn north_west(&self) -> Coord {
        tile_corner(self.x, self.y, self.zoom)
    }

    pub fn south_east(&self) -> Coord {
        tile_corner(self.x + 1, self.y + 1, self.zoom)
    }
}

/// North-west corner of tile `(x, y)`; `(x + 1, y + 1)` gives the south-east one.
/// https://wiki.openstreetmap.org/wiki/Slippy_map_tilenames#Tile_numbers_to_lon..2Flat.
pub fn tile_corner(x: u32, y: u32, zoom: u8) -> Coord {
    let n = 2f64.powi(zoom as i32);
    let lon = x as f64 / n * 360.0 - 180.0;
    let lat = (PI * (1.0 - 2.0 * y as f64 / n)).sinh().atan().to_degrees();
    Coord { lat, lon }
}

/// Tile numbers of the tile holding the coordinate, clamped to the grid.
pub fn tile_xy(coord: Coord, zoom: u8) -> (u32, u32) {
    let n = 2f64.powi(zoom as i32);
    let max_index = n - 1.0;
    let (fx, fy) = mercator_unit(coord);
    let x = (fx * n).floor().clamp(0.0, max_index);
    let y = (fy * n).floor().clamp(0.0, max_index);
    (x as u32, y as u32)
}

/// Position on the unit Web-Mercator square; x grows east, y grows south.
fn mercator_unit(coord: Coord) -> (f64, f64) {
    let lat = coord.lat.clamp(-MAX_MERCATOR_LAT, MAX_MERCATOR_LAT).to_radians();
    let x = (coord.lon + 180.0) / 360.0;
    let y = (1.0 - (lat.tan() + 1.0 / lat.cos()).ln() / PI) / 2.0;
    (x, y)
}

/// Absolute pixel position at `zoom` for tiles of `tile_size` pixels.
pub fn world_pixel(coord: Coord, zoom: u8, tile_size: u32) -> (f64, f64) {
    let scale = 2f64.powi(zoom as i32) * tile_size as f64;
    let (x, y) = mercator_unit(coord);
    (x * scale, y * scale)
}

/// All tiles covering the box spanned by two corners, in either order.
/// Tiles are listed column by column, north to south.
pub fn tiles_in_bbox(a: Coord, b: Coord, zoom: u8) -> (Vec<TileId>, TileBounds) {
    let north_west = Coord::new(a.lat.max(b.lat), a.lon.min(b.lon));
    let south_east = Coord::new(a.lat.min(b.lat), a.lon.max(b.lon));
    let (x_from, y_from) = tile_xy(north_west, zoom);
    let (x_to, y_to) = tile_xy(south_east, zoom);

    let tiles = (x_from..=x_to)
        .flat_map(|x| (y_from..=y_to).map(move |y| TileId { zoom, x, y }))
        .collect();
    (tiles, TileBounds { x_from, x_to, y_from, y_to })
}

#[cfg(test)]
impl TileId {
    /// Tile containing the coordinate.
    pub fn containing(coord: Coord, zoom: u8) -> TileId {
        let (x, y) = tile_xy(coord, zoom);
        TileId { zoom, x, y }
    }
}
