use std::collections::{HashMap, HashSet};

use log::info;
use serde::Deserialize;

use crate::data::{osm::{Coord, ElementType, OsmId, Way}, GeometryStore};

use super::{
    cell::{CellId, MAX_LEVEL},
    covering::{Coverer, LatLonRect},
};

/// Pointer to a feature held in the [`GeometryStore`]. Never carries geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FeatureRef {
    pub id: OsmId,
    pub element_type: ElementType,
    pub zoom: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub insert_max_level: u8,
    pub insert_max_cells: usize,
    pub query_max_level: u8,
    pub query_max_cells: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        IndexConfig {
            insert_max_level: MAX_LEVEL,
            insert_max_cells: 8,
            query_max_level: MAX_LEVEL,
            query_max_cells: 8000,
        }
    }
}

/// Cell → features whose covering contains that cell.
///
/// Every ancestor of a cell holding features has an entry too, possibly
/// empty, so queries can walk the hierarchy in both directions without a
/// separate existence index.
#[derive(Debug, Clone)]
pub struct SpatialIndex {
    cells: HashMap<CellId, Vec<FeatureRef>>,
    insert_coverer: Coverer,
    query_coverer: Coverer,
}

struct QueryState {
    emitted: HashSet<(ElementType, OsmId)>,
    visited_up: HashSet<CellId>,
    result: Vec<FeatureRef>,
}

impl QueryState {
    fn collect(&mut self, refs: &[FeatureRef]) {
        for feature in refs {
            if self.emitted.insert((feature.element_type, feature.id)) {
                self.result.push(*feature);
            }
        }
    }
}

impl SpatialIndex {
    pub fn new(config: &IndexConfig) -> Self {
        SpatialIndex {
            cells: HashMap::new(),
            insert_coverer: Coverer::new(config.insert_max_level, config.insert_max_cells),
            query_coverer: Coverer::new(config.query_max_level, config.query_max_cells),
        }
    }

    /// Indexes every way of the store, in id order.
    pub fn build(store: &GeometryStore, config: &IndexConfig) -> Self {
        let mut index = SpatialIndex::new(config);
        let mut ways: Vec<&Way> = store.ways.values().collect();
        ways.sort_unstable_by_key(|way| way.id);

        let indexed = ways.into_iter()
            .filter(|way| index.insert(way, way.zoom) > 0)
            .count();
        info!(ways = store.ways.len(), indexed = indexed, cells = index.cell_count(); "Built spatial index");
        index
    }

    /// Adds the way to every cell of its covering. Returns the number of
    /// cells it went into; zero for empty or zero-extent ways.
    pub fn insert(&mut self, way: &Way, zoom: u8) -> usize {
        let bounds = LatLonRect::from_points(&way.geometry);
        if bounds.is_empty() || (bounds.lat_lo == bounds.lat_hi && bounds.lon_lo == bounds.lon_hi) {
            return 0;
        }

        let feature = FeatureRef { id: way.id, element_type: ElementType::Way, zoom };
        let covering = self.insert_coverer.fast_covering(&bounds);
        for cell in &covering {
            self.cells.entry(*cell).or_default().push(feature);
            for ancestor in cell.ancestors() {
                if self.cells.contains_key(&ancestor) {
                    // The chain above an existing entry is complete already.
                    break;
                }
                self.cells.insert(ancestor, Vec::new());
            }
        }
        covering.len()
    }

    /// Features stored in, below, or above any cell covering the rectangle.
    /// Each feature is returned once. Empty or zero-area rectangles give an
    /// empty result.
    pub fn query(&self, north_west: Coord, south_east: Coord) -> Vec<FeatureRef> {
        let rect = LatLonRect::from_corners(north_west, south_east);
        if rect.is_degenerate() {
            return Vec::new();
        }

        let mut state = QueryState {
            emitted: HashSet::new(),
            visited_up: HashSet::new(),
            result: Vec::new(),
        };
        for cell in self.query_coverer.covering(&rect) {
            if let Some(refs) = self.cells.get(&cell) {
                self.visit_down(cell, refs, &mut state);
            }
            for ancestor in cell.ancestors() {
                self.visit_up(ancestor, &mut state);
            }
        }
        state.result
    }

    fn visit_down(&self, cell: CellId, refs: &[FeatureRef], state: &mut QueryState) {
        state.collect(refs);
        for child in cell.children().into_iter().flatten() {
            if let Some(child_refs) = self.cells.get(&child) {
                self.visit_down(child, child_refs, state);
            }
        }
    }

    /// A missing entry only means nothing was stored here; the walk goes on.
    fn visit_up(&self, cell: CellId, state: &mut QueryState) {
        if let Some(refs) = self.cells.get(&cell) {
            if state.visited_up.insert(cell) {
                state.collect(refs);
            }
        }
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }
}

#[cfg(test)]
impl SpatialIndex {
    pub fn get(&self, cell: CellId) -> Option<&[FeatureRef]> {
        self.cells.get(&cell).map(Vec::as_slice)
    }

    pub fn cells(&self) -> impl Iterator<Item = (&CellId, &Vec<FeatureRef>)> {
        self.cells.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}
