mod data;
mod errors;
mod etl;
mod map;
mod render;
mod rules;

use std::fs::{self, create_dir_all, File};
use std::io;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::thread;

use clap::{Parser, Subcommand};
use log::info;
use serde::Deserialize;
use structured_logger::json::new_writer;
use structured_logger::Builder;

use crate::data::GeometryStore;
use crate::data::osm::Coord;
use crate::errors::{Error, Result};
use crate::etl::Etl;
use crate::etl::draw_tiles::{build_renderer, DrawTilesEtl};
use crate::etl::parse_osm::ParseOsmEtl;
use crate::map::index::IndexConfig;
use crate::map::projection::{TileId, MAX_ZOOM};
use crate::render::batch::tile_path;
use crate::render::style::StyleTable;
use crate::rules::{RuleTable, SpecialSelector};

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Bbox {
    pub north_west: Coord,
    pub south_east: Coord,
}

#[derive(Debug, Deserialize)]
pub struct UserConfig {
    pub data_path: String,
    pub dest_path: String,
    #[serde(default = "default_tile_size")]
    pub tile_size: u32,
    pub bbox: Bbox,
    #[serde(default = "default_zooms")]
    pub zooms: Vec<u8>,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default)]
    pub rules: RuleTable,
    #[serde(default)]
    pub special: SpecialSelector,
    #[serde(default)]
    pub styles: StyleTable,
    #[serde(default)]
    pub index: IndexConfig,
}

fn default_tile_size() -> u32 {
    2048
}

fn default_zooms() -> Vec<u8> {
    (8..=14).collect()
}

fn default_workers() -> usize {
    thread::available_parallelism().map_or(1, NonZeroUsize::get)
}

fn default_queue_capacity() -> usize {
    8
}

impl UserConfig {
    fn validate(&self) -> Result<()> {
        if self.tile_size == 0 {
            return Err("tile_size must be positive".into());
        }
        if let Some(zoom) = self.zooms.iter().find(|zoom| **zoom > MAX_ZOOM) {
            return Err(format!("zoom {} is above the maximum of {}", zoom, MAX_ZOOM).into());
        }
        Ok(())
    }
}

#[derive(Parser, Debug)]
#[command(version, about = "Renders an OSM extract into slippy-map tiles")]
struct Cli {
    /// JSON configuration file.
    #[arg(short, long, default_value = "config/tiles.json")]
    config: PathBuf,

    /// Ignore cached results and run every stage again.
    #[arg(long)]
    refresh: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Render every tile of the configured bounding box at every zoom.
    Batch,
    /// Render a single tile, e.g. `13/4678/2900.png`.
    Tile {
        path: String,
        /// Where to write the PNG. Defaults to its place below `dest_path`.
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
}

fn load_user_config(path: &Path) -> Result<UserConfig> {
    let file = File::open(path)
        .map_err(|err| format!("Could not open config file {}: {}", path.display(), err))?;
    let config: UserConfig = serde_json::from_reader(file)
        .map_err(|err| Error::from(err).context("Could not parse config"))?;
    config.validate()?;
    Ok(config)
}

fn create_output_dir(config: &UserConfig) -> Result<PathBuf> {
    let input_fname = Path::new(&config.data_path)
        .file_name()
        .ok_or("Could not get input file name")?;
    let output_dir = Path::new("output").join(input_fname);
    create_dir_all(&output_dir)?;
    Ok(output_dir)
}

fn setup_logging() {
    Builder::with_level("info")
        .with_target_writer("*", new_writer(io::stdout()))
        .init();
}

fn run_stage<E: Etl>(etl: &mut E, dir: &Path, refresh: bool) -> Result<()> {
    if refresh {
        etl.refresh(dir)
    } else {
        etl.process(dir)
    }
}

fn render_one(config: &UserConfig, output_dir: &Path, path: &str, out: Option<PathBuf>) -> Result<()> {
    let id = TileId::from_path(path)?;
    let store = GeometryStore::read_snapshot(&ParseOsmEtl::snapshot_path(output_dir))?;
    let png = build_renderer(store, config).render_png(id)?;

    let out = out.unwrap_or_else(|| tile_path(Path::new(&config.dest_path), id));
    if let Some(dir) = out.parent() {
        create_dir_all(dir)?;
    }
    fs::write(&out, png)?;
    info!(zoom = id.zoom, x = id.x, y = id.y, path = out.display().to_string().as_str(); "Rendered tile");
    Ok(())
}

fn main() -> Result<()> {
    setup_logging();
    let cli = Cli::parse();

    let user_config = load_user_config(&cli.config)?;
    let output_dir = create_output_dir(&user_config)?;
    run_stage(&mut ParseOsmEtl::new(&user_config), &output_dir, cli.refresh)?;

    match cli.command {
        Command::Batch => run_stage(&mut DrawTilesEtl::new(&user_config), &output_dir, cli.refresh),
        Command::Tile { path, out } => render_one(&user_config, &output_dir, &path, out),
    }
}

#[cfg(test)]
impl UserConfig {
    pub fn for_extract(data_path: &Path, dest_path: &Path) -> UserConfig {
        UserConfig {
            data_path: data_path.display().to_string(),
            dest_path: dest_path.display().to_string(),
            tile_size: 256,
            bbox: Bbox {
                north_west: Coord::new(45.70, 25.55),
                south_east: Coord::new(45.60, 25.65),
            },
            zooms: default_zooms(),
            workers: 2,
            queue_capacity: default_queue_capacity(),
            rules: RuleTable::default(),
            special: SpecialSelector::default(),
            styles: StyleTable::default(),
            index: IndexConfig::default(),
        }
    }
}
