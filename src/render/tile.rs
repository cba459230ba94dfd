use raqote::{DrawOptions, DrawTarget, PathBuilder};

use crate::{
    data::osm::Coord,
    errors::Result,
    map::{
        projection::{world_pixel, TileId},
        sphere::{edges_cross, SpherePoint},
    },
};

use super::style::Style;

/// Position in tile pixels, origin at the north-west corner.
pub type PixelPoint = (f32, f32);

/// Geographic frame of one tile: corners, pixel origin and the corner
/// points used by the crossing test.
#[derive(Debug, Clone, Copy)]
pub struct Viewport {
    pub id: TileId,
    pub tile_size: u32,
    pub north_west: Coord,
    pub south_east: Coord,
    origin: (f64, f64),
    // North-west, south-west, north-east, south-east.
    corners: [SpherePoint; 4],
}

impl Viewport {
    pub fn new(id: TileId, tile_size: u32) -> Self {
        let north_west = id.north_west();
        let south_east = id.south_east();
        let south_west = Coord::new(south_east.lat, north_west.lon);
        let north_east = Coord::new(north_west.lat, south_east.lon);

        Viewport {
            id,
            tile_size,
            north_west,
            south_east,
            origin: world_pixel(north_west, id.zoom, tile_size),
            corners: [north_west, south_west, north_east, south_east].map(SpherePoint::from),
        }
    }

    /// Strictly inside; points on the border are outside.
    pub fn contains(&self, coord: Coord) -> bool {
        self.south_east.lat < coord.lat && coord.lat < self.north_west.lat
            && self.north_west.lon < coord.lon && coord.lon < self.south_east.lon
    }

    pub fn relative_xy(&self, coord: Coord) -> PixelPoint {
        let (x, y) = world_pixel(coord, self.id.zoom, self.tile_size);
        ((x - self.origin.0) as f32, (y - self.origin.1) as f32)
    }

    /// True if the arc `ab` crosses one of the four tile edges or one of the
    /// two diagonals. The diagonals catch arcs that run from corner to
    /// corner, which only touch the edges at their shared endpoints.
    pub fn is_crossing(&self, a: SpherePoint, b: SpherePoint) -> bool {
        let [nw, sw, ne, se] = self.corners;
        [(nw, ne), (nw, sw), (sw, se), (ne, se), (nw, se), (ne, sw)].iter()
            .any(|(c, d)| edges_cross(a, b, *c, *d))
    }
}

/// Rendering context of one tile. Owned by a single render.
pub struct Tile {
    pub viewport: Viewport,
    target: DrawTarget,
}

impl Tile {
    pub fn new(viewport: Viewport) -> Result<Tile> {
        let size: i32 = viewport.tile_size.try_into()?;
        Ok(Tile {
            viewport,
            target: DrawTarget::new(size, size),
        })
    }

    pub fn stroke(&mut self, points: &[PixelPoint], style: &Style) {
        if points.len() < 2 {
            return;
        }
        let mut pb = PathBuilder::new();
        let (x0, y0) = points[0];
        pb.move_to(x0, y0);
        for (x, y) in &points[1..] {
            pb.line_to(*x, *y);
        }
        let path = pb.finish();

        self.target.stroke(
            &path,
            &style.color.to_source(),
            &style.stroke_style(),
            &DrawOptions::new(),
        );
    }

    pub fn encode_png(&self) -> Result<Vec<u8>> {
        let size = self.viewport.tile_size;
        let rgba: Vec<u8> = self.target.get_data().iter()
            .flat_map(|argb| unpremultiply(*argb))
            .collect();

        let mut bytes = Vec::new();
        {
            let mut encoder = png::Encoder::new(&mut bytes, size, size);
            encoder.set_color(png::ColorType::Rgba);
            encoder.set_depth(png::BitDepth::Eight);
            let mut writer = encoder.write_header()?;
            writer.write_image_data(&rgba)?;
            writer.finish()?;
        }
        Ok(bytes)
    }
}

#[cfg(test)]
impl Tile {
    /// Pixel at `(x, y)` as unpremultiplied RGBA, if inside the tile.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        let size = self.viewport.tile_size;
        if x >= size || y >= size {
            return None;
        }
        let index = (y as usize) * (size as usize) + x as usize;
        self.target.get_data().get(index).map(|argb| unpremultiply(*argb))
    }
}

/// raqote stores premultiplied ARGB words.
fn unpremultiply(argb: u32) -> [u8; 4] {
    let a = argb >> 24;
    if a == 0 {
        return [0, 0, 0, 0];
    }
    let channel = |shift: u32| {
        let value = (argb >> shift) & 0xff;
        ((value * 255 + a / 2) / a).min(255) as u8
    };
    [channel(16), channel(8), channel(0), a as u8]
}
