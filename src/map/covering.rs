use std::collections::{BTreeSet, VecDeque};

use crate::data::osm::Coord;

use super::cell::{level_for_extent, CellId, MAX_LEVEL};

/// Closed latitude/longitude rectangle. Does not wrap the antimeridian.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatLonRect {
    pub lat_lo: f64,
    pub lat_hi: f64,
    pub lon_lo: f64,
    pub lon_hi: f64,
}

impl LatLonRect {
    pub const EMPTY: LatLonRect = LatLonRect {
        lat_lo: f64::INFINITY,
        lat_hi: f64::NEG_INFINITY,
        lon_lo: f64::INFINITY,
        lon_hi: f64::NEG_INFINITY,
    };

    /// Rectangle spanned by two opposite corners, in any order.
    pub fn from_corners(a: Coord, b: Coord) -> Self {
        LatLonRect::EMPTY.add_point(a).add_point(b)
    }

    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a Coord>) -> Self {
        points.into_iter().fold(LatLonRect::EMPTY, |rect, point| rect.add_point(*point))
    }

    pub fn add_point(self, point: Coord) -> Self {
        LatLonRect {
            lat_lo: self.lat_lo.min(point.lat),
            lat_hi: self.lat_hi.max(point.lat),
            lon_lo: self.lon_lo.min(point.lon),
            lon_hi: self.lon_hi.max(point.lon),
        }
    }

    pub fn is_empty(&self) -> bool {
        !(self.lat_lo <= self.lat_hi && self.lon_lo <= self.lon_hi)
    }

    /// Empty, or collapsed to a line or a point.
    pub fn is_degenerate(&self) -> bool {
        self.is_empty() || self.lat_lo == self.lat_hi || self.lon_lo == self.lon_hi
    }

    pub fn north_west(&self) -> Coord {
        Coord::new(self.lat_hi, self.lon_lo)
    }

    pub fn south_east(&self) -> Coord {
        Coord::new(self.lat_lo, self.lon_hi)
    }

    pub fn contains_rect(&self, other: &LatLonRect) -> bool {
        self.lat_lo <= other.lat_lo && other.lat_hi <= self.lat_hi
            && self.lon_lo <= other.lon_lo && other.lon_hi <= self.lon_hi
    }

    pub fn intersects(&self, other: &LatLonRect) -> bool {
        self.lat_lo <= other.lat_hi && other.lat_lo <= self.lat_hi
            && self.lon_lo <= other.lon_hi && other.lon_lo <= self.lon_hi
    }

    /// Largest side, measured on the unit square the cells live on.
    fn unit_extent(&self) -> f64 {
        ((self.lat_hi - self.lat_lo) / 180.0).max((self.lon_hi - self.lon_lo) / 360.0)
    }
}

/// Approximates rectangles with cells, bounded in depth and count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Coverer {
    pub max_level: u8,
    pub max_cells: usize,
}

impl Coverer {
    pub fn new(max_level: u8, max_cells: usize) -> Self {
        Coverer {
            max_level: max_level.min(MAX_LEVEL),
            max_cells: max_cells.max(1),
        }
    }

    /// Refines breadth-first from the smallest cell holding the rectangle.
    /// A cell is kept whole once it lies inside the rectangle, reaches
    /// `max_level`, or splitting it would go over `max_cells`. The union of
    /// the result contains the rectangle and the cells do not overlap.
    pub fn covering(&self, rect: &LatLonRect) -> Vec<CellId> {
        if rect.is_empty() {
            return Vec::new();
        }

        let start = CellId::from_coord(rect.north_west(), self.max_level)
            .common_ancestor(CellId::from_coord(rect.south_east(), self.max_level));

        let mut result = Vec::new();
        let mut queue = VecDeque::from([start]);
        while let Some(cell) = queue.pop_front() {
            if cell.level() >= self.max_level || rect.contains_rect(&cell.bounds()) {
                result.push(cell);
                continue;
            }

            let children: Vec<CellId> = cell.children().into_iter()
                .flatten()
                .filter(|child| rect.intersects(&child.bounds()))
                .collect();
            if result.len() + queue.len() + children.len() > self.max_cells {
                result.push(cell);
            } else {
                queue.extend(children);
            }
        }

        result.sort_unstable();
        result
    }

    /// Cheaper, coarser covering: the (at most four) cells at the level whose
    /// cell size matches the rectangle, merged upwards until within budget.
    pub fn fast_covering(&self, rect: &LatLonRect) -> Vec<CellId> {
        if rect.is_empty() {
            return Vec::new();
        }

        let mut level = level_for_extent(rect.unit_extent()).min(self.max_level);
        let corners = [
            rect.north_west(),
            rect.south_east(),
            Coord::new(rect.lat_hi, rect.lon_hi),
            Coord::new(rect.lat_lo, rect.lon_lo),
        ];
        let mut cells: BTreeSet<CellId> = corners.iter()
            .map(|corner| CellId::from_coord(*corner, level))
            .collect();

        while cells.len() > self.max_cells && level > 0 {
            level -= 1;
            cells = cells.into_iter().map(|cell| cell.parent(level)).collect();
        }

        cells.into_iter().collect()
    }
}

#[cfg(test)]
impl LatLonRect {
    pub fn contains_point(&self, point: Coord) -> bool {
        self.lat_lo <= point.lat && point.lat <= self.lat_hi
            && self.lon_lo <= point.lon && point.lon <= self.lon_hi
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn union_covers(cells: &[CellId], rect: &LatLonRect) -> bool {
        // Sample a grid over the rectangle, borders included.
        let steps = 16;
        (0..=steps).all(|a| (0..=steps).all(|b| {
            let point = Coord::new(
                rect.lat_lo + (rect.lat_hi - rect.lat_lo) * a as f64 / steps as f64,
                rect.lon_lo + (rect.lon_hi - rect.lon_lo) * b as f64 / steps as f64,
            );
            cells.iter().any(|cell| cell.bounds().contains_point(point))
        }))
    }

    fn brasov() -> LatLonRect {
        LatLonRect::from_corners(Coord::new(45.70, 25.55), Coord::new(45.60, 25.65))
    }

    #[test]
    fn test_rect_from_corners_in_any_order() {
        let a = LatLonRect::from_corners(Coord::new(46.0, 25.0), Coord::new(45.0, 26.0));
        let b = LatLonRect::from_corners(Coord::new(45.0, 26.0), Coord::new(46.0, 25.0));
        assert_eq!(a, b);
        assert_eq!(a.north_west(), Coord::new(46.0, 25.0));
        assert_eq!(a.south_east(), Coord::new(45.0, 26.0));
    }

    #[test]
    fn test_empty_and_degenerate() {
        assert!(LatLonRect::EMPTY.is_empty());
        let point = LatLonRect::from_points(&[Coord::new(1.0, 2.0)]);
        assert!(!point.is_empty());
        assert!(point.is_degenerate());
        assert!(!brasov().is_degenerate());
    }

    #[test]
    fn test_covering_respects_budget_and_covers() {
        let rect = brasov();
        for max_cells in [1, 4, 8, 64, 500] {
            let cells = Coverer::new(MAX_LEVEL, max_cells).covering(&rect);
            assert!(!cells.is_empty());
            assert!(cells.len() <= max_cells, "{} > {}", cells.len(), max_cells);
            assert!(union_covers(&cells, &rect));
        }
    }

    #[test]
    fn test_covering_respects_max_level() {
        let cells = Coverer::new(9, 10_000).covering(&brasov());
        assert!(cells.iter().all(|cell| cell.level() <= 9));
        assert!(union_covers(&cells, &brasov()));
    }

    #[test]
    fn test_covering_cells_do_not_overlap() {
        let cells = Coverer::new(MAX_LEVEL, 200).covering(&brasov());
        for (n, a) in cells.iter().enumerate() {
            for b in &cells[n + 1..] {
                assert!(!a.contains(*b) && !b.contains(*a));
            }
        }
    }

    #[test]
    fn test_fast_covering() {
        let rect = brasov();
        let cells = Coverer::new(MAX_LEVEL, 8).fast_covering(&rect);
        assert!(!cells.is_empty() && cells.len() <= 4);
        assert!(union_covers(&cells, &rect));

        let single = Coverer::new(MAX_LEVEL, 1).fast_covering(&rect);
        assert_eq!(single.len(), 1);
        assert!(single[0].bounds().contains_rect(&rect));
    }

    #[test]
    fn test_empty_rect_has_no_covering() {
        let coverer = Coverer::new(MAX_LEVEL, 8);
        assert!(coverer.covering(&LatLonRect::EMPTY).is_empty());
        assert!(coverer.fast_covering(&LatLonRect::EMPTY).is_empty());
    }
}
