#![doc = include_str!("../README.md")]

pub mod engine;
pub mod executor;
pub mod stitcher;
pub mod tiler;

pub use engine::{Engine, ProcessStats};
pub use executor::{InferenceExecutor, InferenceMetrics, OutputTile};
pub use tiler::{Tile, TileGrid, TileSpec};
