pub mod cell;
pub mod covering;
pub mod index;
pub mod projection;
pub mod sphere;
