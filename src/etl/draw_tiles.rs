use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::info;
use serde::Serialize;

use crate::UserConfig;
use crate::data::GeometryStore;
use crate::errors::Result;
use crate::etl::{parse_osm::ParseOsmEtl, Etl};
use crate::map::index::SpatialIndex;
use crate::map::projection::{tiles_in_bbox, TileBounds};
use crate::render::batch::{BatchCounts, TileBatch};
use crate::render::renderer::TileRenderer;

pub const ETL_NAME: &str = "draw_tiles";
pub const MANIFEST_FILE_NAME: &str = "manifest.json";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZoomReport {
    pub zoom: u8,
    pub tiles: usize,
    pub bounds: TileBounds,
    pub counts: BatchCounts,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchReport {
    pub tile_size: u32,
    pub zooms: Vec<ZoomReport>,
    pub total: BatchCounts,
}

/// Builds the index over the store and wraps both for sharing between
/// renders.
pub fn build_renderer(store: GeometryStore, config: &UserConfig) -> TileRenderer {
    let index = SpatialIndex::build(&store, &config.index);
    TileRenderer::new(
        Arc::new(store),
        Arc::new(index),
        Arc::new(config.styles.clone()),
        config.tile_size,
    )
}

pub struct DrawTilesEtl<'a> {
    config: &'a UserConfig,
}

impl DrawTilesEtl<'_> {
    pub fn new(config: &UserConfig) -> DrawTilesEtl<'_> {
        DrawTilesEtl { config }
    }

    fn dest(&self) -> &Path {
        Path::new(&self.config.dest_path)
    }

    fn manifest_path(&self) -> PathBuf {
        self.dest().join(MANIFEST_FILE_NAME)
    }
}

impl Etl for DrawTilesEtl<'_> {
    type Input = GeometryStore;
    type Output = BatchReport;

    fn etl_name(&self) -> &str {
        ETL_NAME
    }

    fn is_cached(&self, _dir: &Path) -> Result<bool> {
        Ok(self.manifest_path().try_exists()?)
    }

    fn clean(&self, _dir: &Path) -> Result<()> {
        let manifest = self.manifest_path();
        if manifest.try_exists()? {
            fs::remove_file(manifest)?;
        }
        Ok(())
    }

    fn extract(&mut self, dir: &Path) -> Result<Self::Input> {
        GeometryStore::read_snapshot(&ParseOsmEtl::snapshot_path(dir))
            .map_err(|err| err.context("Could not read geometry snapshot"))
    }

    fn transform(&mut self, input: Self::Input) -> Result<Self::Output> {
        let renderer = build_renderer(input, self.config);
        let batch = TileBatch {
            workers: self.config.workers,
            queue_capacity: self.config.queue_capacity,
            dest: self.dest().to_path_buf(),
        };
        let bbox = &self.config.bbox;

        let mut report = BatchReport {
            tile_size: self.config.tile_size,
            zooms: Vec::with_capacity(self.config.zooms.len()),
            total: BatchCounts::default(),
        };
        for zoom in &self.config.zooms {
            let (tiles, bounds) = tiles_in_bbox(bbox.north_west, bbox.south_east, *zoom);
            info!(
                zoom = *zoom,
                tiles = tiles.len(),
                x_from = bounds.x_from,
                x_to = bounds.x_to,
                y_from = bounds.y_from,
                y_to = bounds.y_to;
                "Rendering zoom level"
            );
            let tile_count = tiles.len();
            let counts = batch.run(&renderer, tiles)?;
            report.total.rendered += counts.rendered;
            report.total.failed += counts.failed;
            report.zooms.push(ZoomReport { zoom: *zoom, tiles: tile_count, bounds, counts });
        }
        Ok(report)
    }

    fn load(&mut self, _dir: &Path, output: Self::Output) -> Result<()> {
        fs::create_dir_all(self.dest())?;
        let file = File::create(self.manifest_path())?;
        serde_json::to_writer_pretty(file, &output)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::osm::{Coord, Node, Tags, Way};
    use crate::map::projection::TileId;
    use crate::render::batch::tile_path;

    #[test]
    fn test_batch_writes_tiles_and_manifest() {
        let dir = std::env::temp_dir().join(format!("osm_tiler_draw_{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();

        let mut store = GeometryStore::default();
        store.insert_node(Node { id: 1, lat: 45.64, lon: 25.58, tags: Tags::new() });
        store.insert_node(Node { id: 2, lat: 45.66, lon: 25.61, tags: Tags::new() });
        let tags: Tags = [("highway".to_string(), "primary".to_string())].into_iter().collect();
        store.insert_way(Way { id: 7, node_ids: vec![1, 2], geometry: Vec::new(), tags, zoom: 8 });
        store.write_snapshot(&ParseOsmEtl::snapshot_path(&dir)).unwrap();

        let mut config = UserConfig::for_extract(&dir.join("unused.osm"), &dir.join("tiles"));
        config.tile_size = 64;
        config.zooms = vec![8, 10];
        config.workers = 2;
        config.bbox.north_west = Coord::new(45.70, 25.55);
        config.bbox.south_east = Coord::new(45.60, 25.65);

        let mut etl = DrawTilesEtl::new(&config);
        etl.process(&dir).unwrap();
        assert!(etl.is_cached(&dir).unwrap());

        let manifest: serde_json::Value = serde_json::from_reader(File::open(etl.manifest_path()).unwrap()).unwrap();
        let zooms = manifest["zooms"].as_array().unwrap();
        assert_eq!(zooms.len(), 2);
        assert_eq!(manifest["total"]["failed"], 0);
        let rendered: u64 = zooms.iter().map(|z| z["tiles"].as_u64().unwrap()).sum();
        assert_eq!(manifest["total"]["rendered"].as_u64(), Some(rendered));

        let tile = TileId::containing(Coord::new(45.65, 25.6), 10);
        assert!(tile_path(&dir.join("tiles"), tile).is_file());
        fs::remove_dir_all(&dir).unwrap();
    }
}
