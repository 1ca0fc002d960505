//! Executable network graph.
//!
//! Nodes are kept in declaration order, which the param format guarantees is
//! a topological order.  Blobs are indexed densely; each intermediate blob is
//! dropped right after its last consumer runs.

use std::path::Path;

use tilesr_core::error::{EngineError, Result};
use tilesr_core::types::Tensor;
use tracing::debug;

use crate::layers::{BlobShape, INPUT_CHANNELS, Layer, Ratio};
use crate::param::ParamFile;
use crate::weights::WeightReader;

/// Preferred name of the output blob when several blobs are unconsumed.
const OUTPUT_BLOB: &str = "output";

#[derive(Clone, Debug)]
pub struct Node {
    pub name: String,
    pub layer: Layer,
    pub inputs: Vec<usize>,
    pub outputs: Vec<usize>,
}

#[derive(Clone, Debug)]
pub struct Graph {
    nodes: Vec<Node>,
    blob_names: Vec<String>,
    input_blob: usize,
    output_blob: usize,
    /// Node index of each blob's last consumer.
    last_use: Vec<Option<usize>>,
    shapes: Vec<BlobShape>,
    output_channels: usize,
    native_scale: u32,
}

impl Graph {
    /// Build the graph, consuming weights in layer order.
    pub fn build(param: &ParamFile, weights: &mut WeightReader<'_>, path: &Path) -> Result<Self> {
        let blob_index = |name: &str| {
            param
                .blobs
                .iter()
                .position(|b| b == name)
                .ok_or_else(|| EngineError::parse(path, format!("unknown blob {name:?}")))
        };

        let mut shapes: Vec<Option<BlobShape>> = vec![None; param.blobs.len()];
        let mut nodes = Vec::with_capacity(param.layers.len());
        let mut input_blob = None;

        for decl in &param.layers {
            let inputs = decl
                .bottoms
                .iter()
                .map(|b| blob_index(b))
                .collect::<Result<Vec<_>>>()?;
            let outputs = decl
                .tops
                .iter()
                .map(|t| blob_index(t))
                .collect::<Result<Vec<_>>>()?;
            let in_shapes = inputs
                .iter()
                .map(|&i| {
                    shapes[i].ok_or_else(|| {
                        EngineError::InvariantViolation(format!(
                            "blob {:?} consumed before its shape is known",
                            param.blobs[i]
                        ))
                    })
                })
                .collect::<Result<Vec<_>>>()?;

            let (layer, out_shapes) = Layer::build(decl, &in_shapes, weights, path)?;

            if matches!(layer, Layer::Input) {
                if input_blob.is_some() {
                    return Err(EngineError::parse(path, "network declares more than one Input"));
                }
                input_blob = Some(outputs[0]);
            }
            for (&b, shape) in outputs.iter().zip(out_shapes) {
                shapes[b] = Some(shape);
            }
            nodes.push(Node {
                name: decl.name.clone(),
                layer,
                inputs,
                outputs,
            });
        }

        let input_blob =
            input_blob.ok_or_else(|| EngineError::parse(path, "network has no Input layer"))?;

        let mut last_use = vec![None; param.blobs.len()];
        for (i, node) in nodes.iter().enumerate() {
            for &b in &node.inputs {
                last_use[b] = Some(i);
            }
        }

        let sinks: Vec<usize> = (0..param.blobs.len())
            .filter(|&b| last_use[b].is_none() && b != input_blob)
            .collect();
        let output_blob = sinks
            .iter()
            .copied()
            .find(|&b| param.blobs[b] == OUTPUT_BLOB)
            .or_else(|| sinks.last().copied())
            .ok_or_else(|| EngineError::parse(path, "network has no output blob"))?;
        if sinks.len() > 1 {
            debug!(
                output = %param.blobs[output_blob],
                unconsumed = sinks.len(),
                "Multiple unconsumed blobs; selected output"
            );
        }

        let out_shape = shapes[output_blob].ok_or_else(|| {
            EngineError::InvariantViolation("output blob has no inferred shape".into())
        })?;
        if out_shape.channels != INPUT_CHANNELS {
            return Err(EngineError::ModelVersionMismatch(format!(
                "network outputs {} channels, expected {INPUT_CHANNELS}",
                out_shape.channels
            )));
        }
        let native_scale = out_shape
            .spatial
            .and_then(|r| r.as_integer())
            .filter(|&s| s >= 1)
            .and_then(|s| u32::try_from(s).ok())
            .ok_or_else(|| {
                EngineError::parse(
                    path,
                    "cannot derive an integer upscale factor from the topology",
                )
            })?;

        let shapes = shapes
            .into_iter()
            .enumerate()
            .map(|(i, s)| {
                s.ok_or_else(|| {
                    EngineError::InvariantViolation(format!(
                        "blob {:?} has no inferred shape",
                        param.blobs[i]
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            nodes,
            blob_names: param.blobs.clone(),
            input_blob,
            output_blob,
            last_use,
            shapes,
            output_channels: out_shape.channels,
            native_scale,
        })
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn input_name(&self) -> &str {
        &self.blob_names[self.input_blob]
    }

    pub fn output_name(&self) -> &str {
        &self.blob_names[self.output_blob]
    }

    pub fn output_channels(&self) -> usize {
        self.output_channels
    }

    /// Upscale factor derived from the topology.
    pub fn native_scale(&self) -> u32 {
        self.native_scale
    }

    pub fn weight_count(&self) -> usize {
        self.nodes.iter().map(|n| n.layer.weight_count()).sum()
    }

    /// Upper bound on activation bytes held while running a `width × height`
    /// input: the two largest blobs (a layer's input and output) plus the
    /// network input.  Saturates instead of wrapping.
    pub fn working_set_bytes(&self, width: usize, height: usize) -> usize {
        let pixels = (width as u64).saturating_mul(height as u64);
        let mut sizes: Vec<u64> = self
            .shapes
            .iter()
            .map(|s| {
                let r = s.spatial.unwrap_or(Ratio::ONE);
                let scaled = pixels.saturating_mul(r.num).saturating_mul(r.num);
                let area = scaled / r.den.saturating_mul(r.den).max(1);
                (s.channels as u64).saturating_mul(area.max(1)).saturating_mul(4)
            })
            .collect();
        sizes.sort_unstable_by(|a, b| b.cmp(a));
        let input = (INPUT_CHANNELS as u64).saturating_mul(pixels).saturating_mul(4);
        let total = sizes.iter().take(2).fold(input, |acc, &s| acc.saturating_add(s));
        usize::try_from(total).unwrap_or(usize::MAX)
    }

    /// Run the network on a planar RGB tensor.
    pub fn forward(&self, input: Tensor) -> Result<Tensor> {
        if input.channels != INPUT_CHANNELS {
            return Err(EngineError::Inference(format!(
                "network input must have {INPUT_CHANNELS} channels, got {}",
                input.channels
            )));
        }

        let mut blobs: Vec<Option<Tensor>> = vec![None; self.blob_names.len()];
        blobs[self.input_blob] = Some(input);

        for (i, node) in self.nodes.iter().enumerate() {
            if matches!(node.layer, Layer::Input) {
                continue;
            }
            let outs = {
                let ins = node
                    .inputs
                    .iter()
                    .map(|&b| {
                        blobs[b].as_ref().ok_or_else(|| {
                            EngineError::InvariantViolation(format!(
                                "layer {:?} input {:?} already released",
                                node.name, self.blob_names[b]
                            ))
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                node.layer.forward(&ins, node.outputs.len())?
            };
            for (&b, t) in node.outputs.iter().zip(outs) {
                blobs[b] = Some(t);
            }
            for &b in &node.inputs {
                if self.last_use[b] == Some(i) && b != self.output_blob {
                    blobs[b] = None;
                }
            }
        }

        blobs[self.output_blob].take().ok_or_else(|| {
            EngineError::InvariantViolation("output blob was never produced".into())
        })
    }
}
