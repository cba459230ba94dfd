use crate::data::osm::Coord;

use super::covering::LatLonRect;

/// Deepest level of the hierarchy.
pub const MAX_LEVEL: u8 = 30;

/// Hierarchical quadtree cell over the longitude/latitude plane.
///
/// The position of a cell at level `L` is the Morton interleaving of its
/// column and row (`2L` bits), followed by a single sentinel bit and
/// `2 * (MAX_LEVEL - L)` zero bits. The trailing zeros give the level, and
/// parents and children are simple mask operations, like S2 cell ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellId(pub u64);

#[inline(always)]
fn lsb_for_level(level: u8) -> u64 {
    1 << (2 * (MAX_LEVEL - level) as u32)
}

/// Spreads the low 32 bits of `v` onto the even bit positions.
fn spread(v: u64) -> u64 {
    let mut out = 0;
    for bit in 0..32 {
        out |= ((v >> bit) & 1) << (2 * bit);
    }
    out
}

fn compact(v: u64) -> u64 {
    let mut out = 0;
    for bit in 0..32 {
        out |= ((v >> (2 * bit)) & 1) << bit;
    }
    out
}

impl CellId {
    pub const ROOT: CellId = CellId(1 << (2 * MAX_LEVEL as u32));

    /// Cell at `level` in column `i` and row `j` (row 0 is the north edge).
    pub fn from_ij(level: u8, i: u64, j: u64) -> CellId {
        debug_assert!(level <= MAX_LEVEL);
        let pos = spread(i) | (spread(j) << 1);
        CellId(((pos << 1) | 1) << (2 * (MAX_LEVEL - level) as u32))
    }

    /// Cell at `level` containing the coordinate. Points on a cell border
    /// belong to the cell east/south of it.
    pub fn from_coord(coord: Coord, level: u8) -> CellId {
        let n = 1u64 << level;
        let (u, v) = unit_square(coord);
        let i = ((u * n as f64).floor().max(0.0) as u64).min(n - 1);
        let j = ((v * n as f64).floor().max(0.0) as u64).min(n - 1);
        CellId::from_ij(level, i, j)
    }

    pub fn level(self) -> u8 {
        MAX_LEVEL - (self.0.trailing_zeros() / 2) as u8
    }

    pub fn is_leaf(self) -> bool {
        self.0 & 1 != 0
    }

    pub fn is_root(self) -> bool {
        self == CellId::ROOT
    }

    #[inline(always)]
    fn lsb(self) -> u64 {
        self.0 & self.0.wrapping_neg()
    }

    /// Ancestor at `level`; `level` must not be deeper than the cell itself.
    pub fn parent(self, level: u8) -> CellId {
        debug_assert!(level <= self.level());
        let lsb = lsb_for_level(level);
        CellId((self.0 & lsb.wrapping_neg()) | lsb)
    }

    pub fn immediate_parent(self) -> Option<CellId> {
        if self.is_root() {
            None
        } else {
            Some(self.parent(self.level() - 1))
        }
    }

    /// The four children in Morton order, or `None` for a leaf.
    pub fn children(self) -> Option<[CellId; 4]> {
        if self.is_leaf() {
            return None;
        }
        let lsb = self.lsb();
        let child_lsb = lsb >> 2;
        let begin = self.0 - lsb + child_lsb;
        Some([
            CellId(begin),
            CellId(begin + 2 * child_lsb),
            CellId(begin + 4 * child_lsb),
            CellId(begin + 6 * child_lsb),
        ])
    }

    /// Every ancestor from the immediate parent up to the root.
    pub fn ancestors(self) -> impl Iterator<Item = CellId> {
        std::iter::successors(self.immediate_parent(), |cell| cell.immediate_parent())
    }

    /// Deepest cell containing both.
    pub fn common_ancestor(self, other: CellId) -> CellId {
        let deepest = self.level().min(other.level());
        (0..=deepest).rev()
            .map(|level| (self.parent(level), other.parent(level)))
            .find(|(a, b)| a == b)
            .map(|(a, _)| a)
            .unwrap_or(CellId::ROOT)
    }

    /// Column and row at the cell's own level.
    pub fn ij(self) -> (u64, u64) {
        let level = self.level();
        let pos = self.0 >> (2 * (MAX_LEVEL - level) as u32 + 1);
        (compact(pos), compact(pos >> 1))
    }

    pub fn bounds(self) -> LatLonRect {
        let n = (1u64 << self.level()) as f64;
        let (i, j) = self.ij();
        LatLonRect {
            lat_lo: 90.0 - (j as f64 + 1.0) / n * 180.0,
            lat_hi: 90.0 - j as f64 / n * 180.0,
            lon_lo: i as f64 / n * 360.0 - 180.0,
            lon_hi: (i as f64 + 1.0) / n * 360.0 - 180.0,
        }
    }
}

/// Maps a coordinate onto the unit square; u grows eastwards, v southwards.
fn unit_square(coord: Coord) -> (f64, f64) {
    let u = (coord.lon + 180.0) / 360.0;
    let v = (90.0 - coord.lat) / 180.0;
    (u.clamp(0.0, 1.0), v.clamp(0.0, 1.0))
}

/// Level whose cells are at least as large as a span of `extent` on the unit
/// square.
pub fn level_for_extent(extent: f64) -> u8 {
    if extent <= 0.0 {
        return MAX_LEVEL;
    }
    let level = (-extent.log2()).floor();
    level.clamp(0.0, MAX_LEVEL as f64) as u8
}

#[cfg(test)]
impl CellId {
    pub fn is_valid(self) -> bool {
        self.0 != 0 && self.0 < CellId::ROOT.0 << 1 && self.0.trailing_zeros() % 2 == 0
    }

    pub fn contains(self, other: CellId) -> bool {
        other.level() >= self.level() && other.parent(self.level()) == self
    }
}
