//! Splits a way into the runs that are visible on a tile.
//!
//! Every node is classified as inside or outside the tile. A run starts at
//! the last outside node before an entry and ends at the first outside node
//! after an exit, so both boundary segments get drawn. Between two outside
//! nodes the segment is kept only if its great-circle arc crosses a tile
//! edge or diagonal.

use crate::{data::osm::Coord, map::sphere::SpherePoint};

use super::tile::{PixelPoint, Viewport};

/// Walks `geometry` in order and returns the runs to stroke, in pixel
/// coordinates relative to the tile. Runs are never empty.
pub fn clip_runs(viewport: &Viewport, geometry: &[Coord]) -> Vec<Vec<PixelPoint>> {
    let mut runs = Vec::new();
    let mut run: Vec<PixelPoint> = Vec::new();
    // Outside node not yet part of the run.
    let mut pending: Option<PixelPoint> = None;
    // Previous node, if it was outside.
    let mut last_outside: Option<SpherePoint> = None;

    for coord in geometry {
        let point = viewport.relative_xy(*coord);

        if viewport.contains(*coord) {
            if let Some(entry) = pending.take() {
                run.push(entry);
            }
            run.push(point);
            last_outside = None;
            continue;
        }

        let sphere = SpherePoint::from(*coord);
        match last_outside {
            // Exit: the outside node closes the run.
            None if !run.is_empty() => {
                run.push(point);
                runs.push(std::mem::take(&mut run));
                pending = Some(point);
            },
            None => {
                pending = Some(point);
            },
            Some(previous) if viewport.is_crossing(previous, sphere) => {
                if let Some(entry) = pending.take() {
                    run.push(entry);
                }
                run.push(point);
            },
            Some(_) => {
                if !run.is_empty() {
                    runs.push(std::mem::take(&mut run));
                }
                pending = Some(point);
            },
        }
        last_outside = Some(sphere);
    }

    if !run.is_empty() {
        runs.push(run);
    }
    runs
}
