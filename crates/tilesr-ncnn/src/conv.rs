//! Direct 2-D convolution with fused activation.
//!
//! Output channels run in parallel.  Each output value accumulates
//! `bias + Σ w·x` in a fixed `(in_channel, ky, kx)` order that does not depend
//! on where the pixel sits in the tensor, so the same pixel neighbourhood
//! produces the same bits whether it is computed in a tile or in the full
//! image.

use rayon::prelude::*;
use tilesr_core::error::{EngineError, Result};
use tilesr_core::types::Tensor;

/// Fused activation (`9=` param of `Convolution`).
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Activation {
    Identity,
    Relu,
    LeakyRelu(f32),
    Clip { min: f32, max: f32 },
    Sigmoid,
}

impl Activation {
    /// Decode ncnn activation type and parameter array.
    pub fn from_params(kind: i32, params: Option<&[f32]>) -> Option<Self> {
        let p = params.unwrap_or(&[]);
        match kind {
            0 => Some(Self::Identity),
            1 => Some(Self::Relu),
            2 => Some(Self::LeakyRelu(p.first().copied().unwrap_or(0.0))),
            3 => Some(Self::Clip {
                min: p.first().copied().unwrap_or(f32::MIN),
                max: p.get(1).copied().unwrap_or(f32::MAX),
            }),
            4 => Some(Self::Sigmoid),
            _ => None,
        }
    }

    #[inline]
    pub fn apply(self, v: f32) -> f32 {
        match self {
            Self::Identity => v,
            Self::Relu => v.max(0.0),
            Self::LeakyRelu(slope) => {
                if v < 0.0 {
                    v * slope
                } else {
                    v
                }
            }
            Self::Clip { min, max } => v.clamp(min, max),
            Self::Sigmoid => 1.0 / (1.0 + (-v).exp()),
        }
    }

    pub fn apply_slice(self, data: &mut [f32]) {
        if self == Self::Identity {
            return;
        }
        for v in data {
            *v = self.apply(*v);
        }
    }
}

/// Spatial padding policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Padding {
    Explicit {
        left: usize,
        right: usize,
        top: usize,
        bottom: usize,
    },
    /// Pad to `ceil(in / stride)`; odd remainder goes to the bottom/right.
    SameUpper,
    /// As [`Padding::SameUpper`] with the remainder on the top/left.
    SameLower,
}

#[derive(Clone, Debug)]
pub struct Convolution {
    pub num_output: usize,
    pub in_channels: usize,
    pub kernel_w: usize,
    pub kernel_h: usize,
    pub dilation_w: usize,
    pub dilation_h: usize,
    pub stride_w: usize,
    pub stride_h: usize,
    pub padding: Padding,
    /// `[out][in][kh][kw]`.
    pub weights: Vec<f32>,
    pub bias: Option<Vec<f32>>,
    pub activation: Activation,
}

impl Convolution {
    fn extent(k: usize, dilation: usize) -> usize {
        dilation * (k - 1) + 1
    }

    /// `(left, right, top, bottom)` for an input of `w × h`.
    pub fn pads(&self, w: usize, h: usize) -> (usize, usize, usize, usize) {
        let same = |len: usize, k: usize, d: usize, s: usize| {
            let out = len.div_ceil(s);
            ((out - 1) * s + Self::extent(k, d)).saturating_sub(len)
        };
        match self.padding {
            Padding::Explicit {
                left,
                right,
                top,
                bottom,
            } => (left, right, top, bottom),
            Padding::SameUpper => {
                let tw = same(w, self.kernel_w, self.dilation_w, self.stride_w);
                let th = same(h, self.kernel_h, self.dilation_h, self.stride_h);
                (tw / 2, tw - tw / 2, th / 2, th - th / 2)
            }
            Padding::SameLower => {
                let tw = same(w, self.kernel_w, self.dilation_w, self.stride_w);
                let th = same(h, self.kernel_h, self.dilation_h, self.stride_h);
                (tw - tw / 2, tw / 2, th - th / 2, th / 2)
            }
        }
    }

    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        if x.channels != self.in_channels {
            return Err(EngineError::Inference(format!(
                "convolution expects {} input channels, got {}",
                self.in_channels, x.channels
            )));
        }
        let (pl, pr, pt, pb) = self.pads(x.width, x.height);
        let ext_w = Self::extent(self.kernel_w, self.dilation_w);
        let ext_h = Self::extent(self.kernel_h, self.dilation_h);
        let padded_w = x.width + pl + pr;
        let padded_h = x.height + pt + pb;
        if padded_w < ext_w || padded_h < ext_h {
            return Err(EngineError::Inference(format!(
                "input {}x{} is smaller than the {ext_w}x{ext_h} kernel extent",
                x.width, x.height
            )));
        }
        let out_w = (padded_w - ext_w) / self.stride_w + 1;
        let out_h = (padded_h - ext_h) / self.stride_h + 1;

        let mut out = Tensor::zeros(self.num_output, out_h, out_w);
        let plane = out_h * out_w;
        let ksize = self.kernel_w * self.kernel_h;
        let per_out = self.in_channels * ksize;
        let (in_w, in_h) = (x.width as isize, x.height as isize);

        out.data
            .par_chunks_mut(plane)
            .enumerate()
            .for_each(|(oc, dst)| {
                dst.fill(self.bias.as_ref().map_or(0.0, |b| b[oc]));
                let wk = &self.weights[oc * per_out..(oc + 1) * per_out];
                for ic in 0..self.in_channels {
                    let src = x.plane(ic);
                    for ky in 0..self.kernel_h {
                        let oy_off = (ky * self.dilation_h) as isize - pt as isize;
                        for kx in 0..self.kernel_w {
                            let w = wk[ic * ksize + ky * self.kernel_w + kx];
                            let ox_off = (kx * self.dilation_w) as isize - pl as isize;
                            for oy in 0..out_h {
                                let iy = (oy * self.stride_h) as isize + oy_off;
                                if iy < 0 || iy >= in_h {
                                    continue;
                                }
                                let srow = &src[iy as usize * x.width..(iy as usize + 1) * x.width];
                                let drow = &mut dst[oy * out_w..(oy + 1) * out_w];
                                for (ox, d) in drow.iter_mut().enumerate() {
                                    let ix = (ox * self.stride_w) as isize + ox_off;
                                    if ix < 0 || ix >= in_w {
                                        continue;
                                    }
                                    *d += w * srow[ix as usize];
                                }
                            }
                        }
                    }
                }
                self.activation.apply_slice(dst);
            });

        Ok(out)
    }
}
