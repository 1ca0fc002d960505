//! Per-tile inference.
//!
//! A tile goes through:
//!
//! 1. memory reservation against the device budget,
//! 2. the network, once or over the eight dihedral variants when TTA is on,
//! 3. a bicubic resample if the network's output is not `padded × scale`,
//! 4. denormalisation to 8-bit and re-interleaving with the upscaled alpha.
//!
//! The output tile still carries its scaled padding; the stitcher crops it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::Serialize;
use tilesr_core::context::ComputeContext;
use tilesr_core::error::{EngineError, Result};
use tilesr_core::resample::{self, ResampleFilter};
use tilesr_core::types::{Image, Tensor};
use tilesr_ncnn::Model;
use tracing::{debug, info};

use crate::tiler::{Tile, TileSpec};

// ─── Metrics ────────────────────────────────────────────────────────────────

/// Atomic per-tile inference counters.
#[derive(Debug)]
pub struct InferenceMetrics {
    pub tiles_inferred: AtomicU64,
    pub total_inference_us: AtomicU64,
    pub peak_inference_us: AtomicU64,
}

impl InferenceMetrics {
    pub const fn new() -> Self {
        Self {
            tiles_inferred: AtomicU64::new(0),
            total_inference_us: AtomicU64::new(0),
            peak_inference_us: AtomicU64::new(0),
        }
    }

    pub fn record(&self, elapsed_us: u64) {
        self.tiles_inferred.fetch_add(1, Ordering::Relaxed);
        self.total_inference_us.fetch_add(elapsed_us, Ordering::Relaxed);
        self.peak_inference_us.fetch_max(elapsed_us, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> InferenceMetricsSnapshot {
        let tiles = self.tiles_inferred.load(Ordering::Relaxed);
        let total = self.total_inference_us.load(Ordering::Relaxed);
        let peak = self.peak_inference_us.load(Ordering::Relaxed);
        InferenceMetricsSnapshot {
            tiles_inferred: tiles,
            avg_inference_us: if tiles > 0 { total / tiles } else { 0 },
            peak_inference_us: peak,
        }
    }

    /// Log averaged tile latency.
    pub fn report(&self) {
        let snap = self.snapshot();
        info!(
            tiles = snap.tiles_inferred,
            avg_us = snap.avg_inference_us,
            peak_us = snap.peak_inference_us,
            "Tile inference latency"
        );
    }
}

impl Default for InferenceMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct InferenceMetricsSnapshot {
    pub tiles_inferred: u64,
    pub avg_inference_us: u64,
    pub peak_inference_us: u64,
}

// ─── Output ─────────────────────────────────────────────────────────────────

/// Upscaled tile, still including `prepadding × scale` border pixels.
#[derive(Clone, Debug)]
pub struct OutputTile {
    pub spec: TileSpec,
    pub scale: u32,
    /// `padded_w × scale` by `padded_h × scale`, same channel count as the
    /// source image.
    pub image: Image,
}

// ─── Executor ───────────────────────────────────────────────────────────────

/// Runs tiles through a model on one device.  Cheap to construct per call;
/// borrows everything it needs.
pub struct InferenceExecutor<'a> {
    model: &'a Model,
    ctx: &'a ComputeContext,
    metrics: &'a InferenceMetrics,
    scale: u32,
    augment: bool,
}

impl<'a> InferenceExecutor<'a> {
    pub fn new(
        model: &'a Model,
        ctx: &'a ComputeContext,
        metrics: &'a InferenceMetrics,
        scale: u32,
        augment: bool,
    ) -> Self {
        Self {
            model,
            ctx,
            metrics,
            scale,
            augment,
        }
    }

    /// Bytes reserved for one tile of `padded_w × padded_h`.
    pub fn tile_reservation(&self, padded_w: usize, padded_h: usize) -> usize {
        let s = self.scale as usize;
        let network = self.model.graph().working_set_bytes(padded_w, padded_h);
        // Resampled output plus, under TTA, the running sum.
        let output = [padded_w, s, padded_h, s, std::mem::size_of::<f32>()]
            .iter()
            .fold(3usize, |acc, &n| acc.saturating_mul(n));
        let accum = if self.augment { output } else { 0 };
        network.saturating_add(output).saturating_add(accum)
    }

    pub fn run(&self, tile: &Tile) -> Result<OutputTile> {
        let (pw, ph) = tile.spec.scaled_padded_size(1)?;
        let (out_w, out_h) = tile.spec.scaled_padded_size(self.scale)?;
        let (pw, ph) = (pw as usize, ph as usize);
        let (out_w, out_h) = (out_w as usize, out_h as usize);

        let _reservation = self.ctx.reserve(self.tile_reservation(pw, ph))?;
        let start = Instant::now();

        let rgb = if self.augment {
            self.run_augmented(&tile.rgb, out_w, out_h)?
        } else {
            self.run_once(tile.rgb.clone(), out_w, out_h)?
        };

        let alpha = tile
            .alpha
            .as_ref()
            .map(|a| resample::resize_plane(a, pw, ph, out_w, out_h, ResampleFilter::Bicubic));

        let image = interleave(&rgb, alpha.as_deref(), out_w, out_h)?;

        let elapsed_us = start.elapsed().as_micros() as u64;
        self.metrics.record(elapsed_us);
        debug!(
            tile = tile.spec.index,
            padded_w = pw,
            padded_h = ph,
            elapsed_us,
            "Tile inferred"
        );

        Ok(OutputTile {
            spec: tile.spec,
            scale: self.scale,
            image,
        })
    }

    /// Network pass plus resample to `out_w × out_h`.
    fn run_once(&self, input: Tensor, out_w: usize, out_h: usize) -> Result<Tensor> {
        let (in_w, in_h) = (input.width, input.height);
        let y = self.model.forward(input)?;
        if y.width == out_w && y.height == out_h {
            return Ok(y);
        }
        debug!(
            in_w,
            in_h,
            net_w = y.width,
            net_h = y.height,
            out_w,
            out_h,
            "Resampling network output to requested scale"
        );
        let data = resample::resize_planes(
            &y.data,
            y.channels,
            y.width,
            y.height,
            out_w,
            out_h,
            ResampleFilter::Bicubic,
        );
        Tensor::from_vec(y.channels, out_h, out_w, data)
    }

    /// Average of the eight flip/transpose variants, summed in a fixed order.
    fn run_augmented(&self, input: &Tensor, out_w: usize, out_h: usize) -> Result<Tensor> {
        let mut acc = Tensor::zeros(input.channels, out_h, out_w);
        for variant in Dihedral::ALL {
            let x = variant.apply(input);
            let (vw, vh) = if variant.transpose {
                (out_h, out_w)
            } else {
                (out_w, out_h)
            };
            let y = variant.invert(&self.run_once(x, vw, vh)?);
            if y.shape() != acc.shape() {
                return Err(EngineError::DimensionMismatch(format!(
                    "augmented output {:?} does not match {:?}",
                    y.shape(),
                    acc.shape()
                )));
            }
            for (a, v) in acc.data.iter_mut().zip(&y.data) {
                *a += v;
            }
        }
        let n = Dihedral::ALL.len() as f32;
        for a in &mut acc.data {
            *a /= n;
        }
        Ok(acc)
    }
}

/// Convert a `[0, 1]` float to an 8-bit channel value.
#[inline]
pub fn denormalize(v: f32) -> u8 {
    (v * 255.0).round().clamp(0.0, 255.0) as u8
}

fn interleave(rgb: &Tensor, alpha: Option<&[f32]>, w: usize, h: usize) -> Result<Image> {
    if rgb.shape() != (3, h, w) {
        return Err(EngineError::DimensionMismatch(format!(
            "network produced {:?}, expected (3, {h}, {w})",
            rgb.shape()
        )));
    }
    let channels = if alpha.is_some() { 4 } else { 3 };
    let plane = w * h;
    let mut data = Vec::with_capacity(plane * channels);
    for i in 0..plane {
        data.push(denormalize(rgb.data[i]));
        data.push(denormalize(rgb.data[plane + i]));
        data.push(denormalize(rgb.data[2 * plane + i]));
        if let Some(a) = alpha {
            data.push(denormalize(a[i]));
        }
    }
    Image::new(w as u32, h as u32, channels, data)
}

// ─── Test-time augmentation ─────────────────────────────────────────────────

/// One element of the dihedral group of the square: horizontal flip,
/// vertical flip, then optional transpose.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Dihedral {
    pub flip_x: bool,
    pub flip_y: bool,
    pub transpose: bool,
}

impl Dihedral {
    pub const ALL: [Self; 8] = {
        let mut all = [Self {
            flip_x: false,
            flip_y: false,
            transpose: false,
        }; 8];
        let mut i = 0;
        while i < 8 {
            all[i] = Self {
                flip_x: i & 1 != 0,
                flip_y: i & 2 != 0,
                transpose: i & 4 != 0,
            };
            i += 1;
        }
        all
    };

    /// Flip, then transpose.
    pub fn apply(self, t: &Tensor) -> Tensor {
        let flipped = flip(t, self.flip_x, self.flip_y);
        if self.transpose {
            transpose(&flipped)
        } else {
            flipped
        }
    }

    /// Transpose, then flip; undoes [`Dihedral::apply`].
    pub fn invert(self, t: &Tensor) -> Tensor {
        if self.transpose {
            flip(&transpose(t), self.flip_x, self.flip_y)
        } else {
            flip(t, self.flip_x, self.flip_y)
        }
    }
}

fn flip(t: &Tensor, fx: bool, fy: bool) -> Tensor {
    if !fx && !fy {
        return t.clone();
    }
    let (c, h, w) = t.shape();
    let mut out = Tensor::zeros(c, h, w);
    for ch in 0..c {
        let src = t.plane(ch);
        let dst = out.plane_mut(ch);
        for y in 0..h {
            let sy = if fy { h - 1 - y } else { y };
            for x in 0..w {
                let sx = if fx { w - 1 - x } else { x };
                dst[y * w + x] = src[sy * w + sx];
            }
        }
    }
    out
}

fn transpose(t: &Tensor) -> Tensor {
    let (c, h, w) = t.shape();
    let mut out = Tensor::zeros(c, w, h);
    for ch in 0..c {
        let src = t.plane(ch);
        let dst = out.plane_mut(ch);
        for y in 0..h {
            for x in 0..w {
                dst[x * h + y] = src[y * w + x];
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(c: usize, h: usize, w: usize) -> Tensor {
        Tensor::from_vec(c, h, w, (0..c * h * w).map(|v| v as f32).collect()).expect("tensor")
    }

    #[test]
    fn dihedral_variants_are_distinct_and_invertible() {
        let t = ramp(2, 3, 5);
        let mut seen = Vec::new();
        for d in Dihedral::ALL {
            let fwd = d.apply(&t);
            assert!(!seen.contains(&fwd.data), "{d:?} duplicates another variant");
            seen.push(fwd.data.clone());
            assert_eq!(d.invert(&fwd), t, "{d:?} is not inverted");
        }
    }

    #[test]
    fn transpose_swaps_axes() {
        let t = ramp(1, 2, 3);
        let tt = transpose(&t);
        assert_eq!(tt.shape(), (1, 3, 2));
        assert_eq!(tt.at(0, 2, 1), t.at(0, 1, 2));
    }

    #[test]
    fn denormalize_rounds_and_clamps() {
        assert_eq!(denormalize(-0.1), 0);
        assert_eq!(denormalize(1.5), 255);
        assert_eq!(denormalize(0.5), 128);
        assert_eq!(denormalize(10.0 / 255.0), 10);
    }

    #[test]
    fn metrics_track_average_and_peak() {
        let m = InferenceMetrics::new();
        m.record(100);
        m.record(300);
        let snap = m.snapshot();
        assert_eq!(snap.tiles_inferred, 2);
        assert_eq!(snap.avg_inference_us, 200);
        assert_eq!(snap.peak_inference_us, 300);
    }

    #[test]
    fn interleave_appends_alpha() {
        let rgb = Tensor::from_vec(3, 1, 1, vec![1.0, 0.0, 0.5]).expect("tensor");
        let img = interleave(&rgb, Some(&[1.0]), 1, 1).expect("image");
        assert_eq!(img.as_bytes(), &[255, 0, 128, 255]);
    }
}
