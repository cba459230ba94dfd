pub mod batch;
pub mod clip;
pub mod renderer;
pub mod style;
pub mod tile;
