use std::sync::Arc;

use crate::{
    data::{osm::{ElementType, OsmId, Way}, GeometryStore},
    errors::Result,
    map::{index::SpatialIndex, projection::TileId},
};

use super::{
    clip::clip_runs,
    style::{Style, StyleTable},
    tile::{PixelPoint, Tile, Viewport},
};

/// Paint order of a way; later layers are drawn on top.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DrawLayer {
    Plain,
    Boundary,
    Special,
}

impl DrawLayer {
    pub fn of(way: &Way) -> DrawLayer {
        if way.is_special() {
            DrawLayer::Special
        } else if way.is_boundary() {
            DrawLayer::Boundary
        } else {
            DrawLayer::Plain
        }
    }
}

/// One polyline to paint.
#[derive(Debug, Clone, PartialEq)]
pub struct Stroke {
    pub way_id: OsmId,
    pub points: Vec<PixelPoint>,
    pub style: Style,
}

/// Renders tiles from the shared store, index and styles. Cloning is cheap,
/// every worker gets its own clone.
#[derive(Debug, Clone)]
pub struct TileRenderer {
    store: Arc<GeometryStore>,
    index: Arc<SpatialIndex>,
    styles: Arc<StyleTable>,
    tile_size: u32,
}

impl TileRenderer {
    pub fn new(
        store: Arc<GeometryStore>,
        index: Arc<SpatialIndex>,
        styles: Arc<StyleTable>,
        tile_size: u32,
    ) -> Self {
        TileRenderer { store, index, styles, tile_size }
    }

    /// Ways visible at the viewport's zoom, plain first and special last.
    /// Query order is kept within a layer.
    pub fn draw_order(&self, viewport: &Viewport) -> Vec<&Way> {
        let mut ways: Vec<&Way> = self.index.query(viewport.north_west, viewport.south_east)
            .into_iter()
            .filter(|feature| feature.element_type == ElementType::Way && feature.zoom <= viewport.id.zoom)
            .filter_map(|feature| self.store.way(feature.id))
            .collect();
        ways.sort_by_key(|way| DrawLayer::of(way));
        ways
    }

    /// Everything that would be painted on the tile, in paint order.
    pub fn strokes(&self, viewport: &Viewport) -> Vec<Stroke> {
        self.draw_order(viewport)
            .into_iter()
            .flat_map(|way| {
                let style = self.styles.resolve(&way.tags, viewport.id.zoom);
                clip_runs(viewport, &way.geometry)
                    .into_iter()
                    .filter(|run| run.len() >= 2)
                    .map(move |points| Stroke { way_id: way.id, points, style })
            })
            .collect()
    }

    pub fn render(&self, id: TileId) -> Result<Tile> {
        let mut tile = Tile::new(Viewport::new(id, self.tile_size))?;
        for stroke in self.strokes(&tile.viewport) {
            tile.stroke(&stroke.points, &stroke.style);
        }
        Ok(tile)
    }

    pub fn render_png(&self, id: TileId) -> Result<Vec<u8>> {
        self.render(id)?
            .encode_png()
            .map_err(|err| err.context(format!("Could not encode tile {}", id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        data::osm::{Coord, Node, Tags},
        map::index::IndexConfig,
        render::style::Color,
        rules::RuleTable,
    };

    const TILE_SIZE: u32 = 256;

    fn tile_id() -> TileId {
        TileId::containing(Coord::new(45.65, 25.6), 8)
    }

    /// Coordinate at fractions of the tile, `(0, 0)` being north-west.
    fn at(id: TileId, fx: f64, fy: f64) -> Coord {
        let (nw, se) = (id.north_west(), id.south_east());
        Coord::new(nw.lat + (se.lat - nw.lat) * fy, nw.lon + (se.lon - nw.lon) * fx)
    }

    struct Fixture {
        store: GeometryStore,
        next_node: OsmId,
    }

    impl Fixture {
        fn new() -> Self {
            Fixture { store: GeometryStore::default(), next_node: 1 }
        }

        fn add_way(&mut self, id: OsmId, points: &[Coord], tags: &[(&str, &str)]) {
            let mut node_ids = Vec::new();
            for point in points {
                let node = Node { id: self.next_node, lat: point.lat, lon: point.lon, tags: Tags::new() };
                node_ids.push(node.id);
                self.store.insert_node(node);
                self.next_node += 1;
            }
            let tags: Tags = tags.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
            let zoom = RuleTable::default().match_way(&tags).unwrap();
            self.store.insert_way(Way { id, node_ids, geometry: Vec::new(), tags, zoom });
        }

        fn renderer(self, styles: StyleTable) -> TileRenderer {
            let index = SpatialIndex::build(&self.store, &IndexConfig::default());
            TileRenderer::new(Arc::new(self.store), Arc::new(index), Arc::new(styles), TILE_SIZE)
        }
    }

    fn primary_styles() -> StyleTable {
        let mut styles = StyleTable::default();
        styles.tags.entry("highway".to_string()).or_default()
            .insert("primary".to_string(), Style::new(Color::rgb(0xff, 0, 0), 7));
        styles
    }

    #[test]
    fn test_single_primary_road() {
        let id = tile_id();
        let points = [at(id, 0.2, 0.3), at(id, 0.5, 0.5), at(id, 0.8, 0.6)];
        let mut fixture = Fixture::new();
        fixture.add_way(42, &points, &[("highway", "primary")]);
        assert_eq!(fixture.store.way(42).unwrap().zoom, 8);
        let renderer = fixture.renderer(primary_styles());

        let viewport = Viewport::new(id, TILE_SIZE);
        let strokes = renderer.strokes(&viewport);
        assert_eq!(strokes.len(), 1);
        let stroke = &strokes[0];
        assert_eq!(stroke.way_id, 42);
        assert_eq!(stroke.style, Style::new(Color::rgb(0xff, 0, 0), 7));
        let expected: Vec<PixelPoint> = points.iter().map(|p| viewport.relative_xy(*p)).collect();
        assert_eq!(stroke.points, expected);
        assert!(stroke.points.iter().all(|(x, y)| (0.0..256.0).contains(x) && (0.0..256.0).contains(y)));
    }

    #[test]
    fn test_layers_are_painted_bottom_up() {
        let id = tile_id();
        let line = [at(id, 0.1, 0.5), at(id, 0.9, 0.5)];
        let mut fixture = Fixture::new();
        fixture.add_way(1, &line, &[("highway", "primary"), ("special", "special")]);
        fixture.add_way(2, &line, &[("admin_level", "4"), ("boundary", "administrative")]);
        fixture.add_way(3, &line, &[("highway", "primary")]);
        let renderer = fixture.renderer(primary_styles());

        let order: Vec<OsmId> = renderer.draw_order(&Viewport::new(id, TILE_SIZE))
            .iter()
            .map(|way| way.id)
            .collect();
        assert_eq!(order, vec![3, 2, 1]);
    }

    #[test]
    fn test_ways_above_the_tile_zoom_are_skipped() {
        let id = tile_id();
        let mut fixture = Fixture::new();
        fixture.add_way(1, &[at(id, 0.1, 0.1), at(id, 0.9, 0.9)], &[("highway", "service")]);
        let renderer = fixture.renderer(StyleTable::default());
        assert!(renderer.strokes(&Viewport::new(id, TILE_SIZE)).is_empty());
    }

    #[test]
    fn test_render_paints_the_road() {
        let id = tile_id();
        let mut fixture = Fixture::new();
        fixture.add_way(1, &[at(id, -0.5, 0.25), at(id, 1.5, 0.25)], &[("highway", "primary")]);
        let renderer = fixture.renderer(primary_styles());

        let tile = renderer.render(id).unwrap();
        let y = tile.viewport.relative_xy(at(id, 0.5, 0.25)).1.round() as u32;
        assert_eq!(tile.pixel(128, y), Some([0xff, 0, 0, 0xff]));
        assert!(renderer.render_png(id).unwrap().starts_with(b"\x89PNG"));
    }
}
