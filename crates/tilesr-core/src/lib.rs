#![doc = include_str!("../README.md")]

pub mod backend;
pub mod config;
pub mod context;
pub mod error;
pub mod resample;
pub mod types;
