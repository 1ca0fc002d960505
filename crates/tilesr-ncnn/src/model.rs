//! Model loading: `.param` + `.bin` → immutable [`Model`].

use std::path::{Path, PathBuf};
use std::time::Instant;

use tilesr_core::backend::ModelMetadata;
use tilesr_core::error::{EngineError, Result};
use tilesr_core::types::Tensor;
use tracing::{info, instrument};

use crate::graph::Graph;
use crate::layers::INPUT_CHANNELS;
use crate::param::parse_param;
use crate::weights::WeightReader;

/// A loaded network.  Immutable; share it as `Arc<Model>`.
#[derive(Debug)]
pub struct Model {
    graph: Graph,
    metadata: ModelMetadata,
    param_path: PathBuf,
    weights_path: PathBuf,
}

impl Model {
    /// Load a network from its topology and weights files.
    ///
    /// Both files are checked for existence before either is parsed.
    #[instrument(skip_all, fields(param = %param_path.display()))]
    pub fn load(param_path: &Path, weights_path: &Path) -> Result<Self> {
        for path in [param_path, weights_path] {
            if !path.is_file() {
                return Err(EngineError::ModelFileMissing {
                    path: path.to_path_buf(),
                });
            }
        }

        let start = Instant::now();
        let param_bytes = std::fs::read(param_path).map_err(|source| EngineError::Io {
            path: param_path.to_path_buf(),
            source,
        })?;
        let param_text = String::from_utf8(param_bytes)
            .map_err(|_| EngineError::parse(param_path, "param file is not UTF-8 text"))?;
        let weights = std::fs::read(weights_path).map_err(|source| EngineError::Io {
            path: weights_path.to_path_buf(),
            source,
        })?;

        let name = param_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unknown".to_string());

        let model = Self::build(&name, &param_text, &weights, param_path, weights_path)?;
        info!(
            name = %model.metadata.name,
            scale = model.metadata.scale,
            layers = model.metadata.layer_count,
            weight_mb = model.metadata.weight_bytes as f64 / (1024.0 * 1024.0),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Model loaded"
        );
        Ok(model)
    }

    /// Build a network from in-memory param text and weight bytes.
    pub fn from_bytes(name: &str, param_text: &str, weights: &[u8]) -> Result<Self> {
        let param_path = PathBuf::from(format!("{name}.param"));
        let weights_path = PathBuf::from(format!("{name}.bin"));
        Self::build(name, param_text, weights, &param_path, &weights_path)
    }

    fn build(
        name: &str,
        param_text: &str,
        weights: &[u8],
        param_path: &Path,
        weights_path: &Path,
    ) -> Result<Self> {
        let param = parse_param(param_text, param_path)?;
        let mut reader = WeightReader::new(weights, weights_path);
        let graph = Graph::build(&param, &mut reader, param_path)?;
        reader.finish()?;

        let metadata = ModelMetadata {
            name: name.to_string(),
            scale: graph.native_scale(),
            input_name: graph.input_name().to_string(),
            output_name: graph.output_name().to_string(),
            input_channels: INPUT_CHANNELS as u32,
            output_channels: graph.output_channels() as u32,
            layer_count: graph.nodes().len(),
            weight_bytes: graph.weight_count() * std::mem::size_of::<f32>(),
        };

        Ok(Self {
            graph,
            metadata,
            param_path: param_path.to_path_buf(),
            weights_path: weights_path.to_path_buf(),
        })
    }

    pub fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }

    /// Native upscale factor of the network.
    pub fn scale(&self) -> u32 {
        self.metadata.scale
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn param_path(&self) -> &Path {
        &self.param_path
    }

    pub fn weights_path(&self) -> &Path {
        &self.weights_path
    }

    /// Run the network on a normalised planar RGB tensor.
    pub fn forward(&self, input: Tensor) -> Result<Tensor> {
        self.graph.forward(input)
    }
}
