use glam::DVec3;

use crate::data::osm::Coord;

/// Unit vector on the sphere.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpherePoint(pub DVec3);

impl From<Coord> for SpherePoint {
    fn from(coord: Coord) -> Self {
        let lat = coord.lat.to_radians();
        let lon = coord.lon.to_radians();
        SpherePoint(DVec3::new(
            lat.cos() * lon.cos(),
            lat.cos() * lon.sin(),
            lat.sin(),
        ))
    }
}

/// True if the great-circle arcs `ab` and `cd` cross at a point interior to
/// both. Arcs that only touch at an endpoint, or are collinear, do not cross.
pub fn edges_cross(a: SpherePoint, b: SpherePoint, c: SpherePoint, d: SpherePoint) -> bool {
    // Exact check; the sign tests below are noise near zero.
    if a == c || a == d || b == c || b == d {
        return false;
    }
    let (a, b, c, d) = (a.0, b.0, c.0, d.0);

    // Do c and d lie strictly on opposite sides of the great circle through a and b?
    let ab = a.cross(b);
    let acb = -ab.dot(c);
    let bda = ab.dot(d);
    if acb * bda <= 0.0 {
        return false;
    }

    // ... and a and b on opposite sides of the one through c and d, with
    // matching orientation so the arcs meet on the same side of the sphere.
    let cd = c.cross(d);
    let cbd = -cd.dot(b);
    let dac = cd.dot(a);
    acb * cbd > 0.0 && acb * dac > 0.0
}
