//! Upscale backend trait: the async inference contract.

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;
use crate::types::Image;

/// Metadata derived from a loaded model's topology.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ModelMetadata {
    /// Model identifier (file stem of the `.param` file).
    pub name: String,
    /// Native spatial upscale factor of the network (e.g. `4` for 4×).
    pub scale: u32,
    /// Name of the network's input blob.
    pub input_name: String,
    /// Name of the network's output blob.
    pub output_name: String,
    /// Number of input channels (always `3`, planar RGB).
    pub input_channels: u32,
    /// Number of output channels.
    pub output_channels: u32,
    pub layer_count: usize,
    /// Total weight storage in bytes after load.
    pub weight_bytes: usize,
}

/// Super-resolution inference backend.
///
/// `process` is safe to call concurrently; each call works on its own
/// buffers and only shares the read-only model.
#[async_trait]
pub trait UpscaleBackend: Send + Sync {
    /// Warm up the backend: verify a model is loaded and the device is ready.
    async fn initialize(&self) -> Result<()>;
    /// Run a full upscale pass on `input`, returning the upscaled image.
    async fn process(&self, input: Image) -> Result<Image>;
    /// Wait for in-flight work and release device resources.
    async fn shutdown(&self) -> Result<()>;
    /// Metadata of the currently loaded model.
    fn metadata(&self) -> Result<ModelMetadata>;
}
