#![doc = include_str!("../README.md")]

pub mod conv;
pub mod graph;
pub mod layers;
pub mod model;
pub mod param;
pub mod weights;

pub use model::Model;
