use std::{fs, path::{Path, PathBuf}, thread};

use log::{error, info};
use serde::Serialize;

use crate::{errors::Result, map::projection::TileId};

use super::renderer::TileRenderer;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchCounts {
    pub rendered: usize,
    pub failed: usize,
}

impl BatchCounts {
    fn add(&mut self, other: BatchCounts) {
        self.rendered += other.rendered;
        self.failed += other.failed;
    }
}

/// Fans tile jobs out to a fixed pool of worker threads over a bounded queue.
pub struct TileBatch {
    pub workers: usize,
    pub queue_capacity: usize,
    pub dest: PathBuf,
}

pub fn tile_path(dest: &Path, id: TileId) -> PathBuf {
    dest.join(id.zoom.to_string())
        .join(id.x.to_string())
        .join(format!("{}.png", id.y))
}

fn write_tile(renderer: &TileRenderer, dest: &Path, id: TileId) -> Result<()> {
    let png = renderer.render_png(id)?;
    let path = tile_path(dest, id);
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    fs::write(&path, png).map_err(|err| format!("Could not write {}: {}", path.display(), err))?;
    Ok(())
}

impl TileBatch {
    /// Renders every tile and writes it below `dest`. Returns once all jobs
    /// are done. A failing tile is logged and counted; the others go on.
    pub fn run(&self, renderer: &TileRenderer, tiles: Vec<TileId>) -> Result<BatchCounts> {
        let workers = self.workers.max(1);
        let (sender, receiver) = flume::bounded::<TileId>(self.queue_capacity.max(1));
        info!(workers = workers, queue_capacity = self.queue_capacity, tiles = tiles.len(); "Starting tile batch");

        let mut handles = Vec::with_capacity(workers);
        for n in 0..workers {
            let receiver = receiver.clone();
            let renderer = renderer.clone();
            let dest = self.dest.clone();
            let handle = thread::Builder::new()
                .name(format!("tile-worker-{}", n))
                .spawn(move || {
                    let mut counts = BatchCounts::default();
                    for id in receiver.iter() {
                        match write_tile(&renderer, &dest, id) {
                            Ok(()) => counts.rendered += 1,
                            Err(err) => {
                                error!(zoom = id.zoom, x = id.x, y = id.y, err = err.message.as_str(); "Tile failed");
                                counts.failed += 1;
                            },
                        }
                    }
                    counts
                })?;
            handles.push(handle);
        }
        drop(receiver);

        for id in tqdm::tqdm(tiles.into_iter()) {
            // Only fails once every worker is gone.
            if sender.send(id).is_err() {
                break;
            }
        }
        drop(sender);

        let mut total = BatchCounts::default();
        for handle in handles {
            let counts = handle.join().map_err(|_| "A tile worker panicked")?;
            total.add(counts);
        }
        info!(rendered = total.rendered, failed = total.failed; "Tile batch finished");
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        data::GeometryStore,
        map::index::{IndexConfig, SpatialIndex},
        render::style::StyleTable,
    };

    fn empty_renderer(tile_size: u32) -> TileRenderer {
        let store = GeometryStore::default();
        let index = SpatialIndex::build(&store, &IndexConfig::default());
        TileRenderer::new(Arc::new(store), Arc::new(index), Arc::new(StyleTable::default()), tile_size)
    }

    fn temp_dest(name: &str) -> PathBuf {
        let dest = std::env::temp_dir().join(format!("osm_tiler_{}_{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dest);
        dest
    }

    #[test]
    fn test_tile_path() {
        let id = TileId::new(13, 4678, 2900).unwrap();
        assert_eq!(tile_path(Path::new("out"), id), Path::new("out/13/4678/2900.png"));
    }

    #[test]
    fn test_every_tile_is_written() {
        let dest = temp_dest("batch");
        let tiles: Vec<TileId> = (0..4)
            .flat_map(|x| (0..4).map(move |y| TileId { zoom: 2, x, y }))
            .collect();
        let batch = TileBatch { workers: 3, queue_capacity: 2, dest: dest.clone() };

        let counts = batch.run(&empty_renderer(16), tiles.clone()).unwrap();
        assert_eq!(counts, BatchCounts { rendered: 16, failed: 0 });
        for id in &tiles {
            assert!(tile_path(&dest, *id).is_file(), "{} missing", id);
        }
        fs::remove_dir_all(&dest).unwrap();
    }

    #[test]
    fn test_failed_tiles_do_not_stop_the_others() {
        let dest = temp_dest("batch_fail");
        // A plain file where the zoom 1 directory should go.
        fs::create_dir_all(&dest).unwrap();
        fs::write(dest.join("1"), b"").unwrap();

        let mut tiles = vec![TileId { zoom: 1, x: 0, y: 0 }, TileId { zoom: 1, x: 1, y: 1 }];
        tiles.extend((0..2).map(|x| TileId { zoom: 3, x, y: 0 }));
        let batch = TileBatch { workers: 2, queue_capacity: 1, dest: dest.clone() };

        let counts = batch.run(&empty_renderer(16), tiles).unwrap();
        assert_eq!(counts, BatchCounts { rendered: 2, failed: 2 });
        assert!(tile_path(&dest, TileId { zoom: 3, x: 1, y: 0 }).is_file());
        fs::remove_dir_all(&dest).unwrap();
    }
}
