//! Layer set: construction from param declarations with static shape
//! checking, and the per-layer forward pass.
//!
//! Construction runs once at load time.  Each layer receives the statically
//! inferred shapes of its inputs, pulls its weights from the `.bin` reader
//! and reports its output shapes.  Any inconsistency between the declared
//! parameters, the weights and the upstream channel counts is rejected here
//! so `forward` only has to check spatial sizes.

use std::path::Path;

use tilesr_core::error::{EngineError, Result};
use tilesr_core::resample::{self, ResampleFilter};
use tilesr_core::types::Tensor;

use crate::conv::{Activation, Convolution, Padding};
use crate::param::LayerDecl;
use crate::weights::WeightReader;

/// Network input channel count (planar RGB).
pub const INPUT_CHANNELS: usize = 3;

// ─── Static shapes ──────────────────────────────────────────────────────────

/// Reduced spatial ratio `num / den` of a blob relative to the network input.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ratio {
    pub num: u64,
    pub den: u64,
}

impl Ratio {
    pub const ONE: Self = Self { num: 1, den: 1 };

    pub fn new(num: u64, den: u64) -> Self {
        let g = gcd(num, den).max(1);
        Self {
            num: num / g,
            den: den / g,
        }
    }

    /// `None` when the product no longer fits in `u64`.
    pub fn mul(self, num: u64, den: u64) -> Option<Self> {
        Some(Self::new(self.num.checked_mul(num)?, self.den.checked_mul(den)?))
    }

    /// Integer or reciprocal-integer float scale.
    pub fn from_scale(scale: f32) -> Option<(u64, u64)> {
        if !(scale.is_finite() && scale > 0.0) {
            return None;
        }
        if scale >= 1.0 && scale.fract() == 0.0 {
            return Some((scale as u64, 1));
        }
        let inv = 1.0 / scale;
        (inv.fract() == 0.0).then_some((1, inv as u64))
    }

    pub fn as_integer(self) -> Option<u64> {
        (self.den == 1).then_some(self.num)
    }
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

/// Statically known blob shape.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlobShape {
    pub channels: usize,
    /// `None` when the spatial size is fixed by the network and does not
    /// follow the input.
    pub spatial: Option<Ratio>,
}

// ─── Layers ─────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryKind {
    Add,
    Sub,
    Mul,
    Div,
    Max,
    Min,
    Pow,
    RSub,
    RDiv,
}

impl BinaryKind {
    fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            0 => Self::Add,
            1 => Self::Sub,
            2 => Self::Mul,
            3 => Self::Div,
            4 => Self::Max,
            5 => Self::Min,
            6 => Self::Pow,
            7 => Self::RSub,
            8 => Self::RDiv,
            _ => return None,
        })
    }

    #[inline]
    fn apply(self, a: f32, b: f32) -> f32 {
        match self {
            Self::Add => a + b,
            Self::Sub => a - b,
            Self::Mul => a * b,
            Self::Div => a / b,
            Self::Max => a.max(b),
            Self::Min => a.min(b),
            Self::Pow => a.powf(b),
            Self::RSub => b - a,
            Self::RDiv => b / a,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EltwiseKind {
    Prod,
    Sum,
    Max,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum InterpSize {
    Scale { h: f32, w: f32 },
    Fixed { h: usize, w: usize },
}

#[derive(Clone, Debug)]
pub enum Layer {
    Input,
    Convolution(Convolution),
    Relu { slope: f32 },
    Prelu { slopes: Vec<f32> },
    Sigmoid,
    Clip { min: f32, max: f32 },
    Split,
    BinaryOp { kind: BinaryKind, scalar: Option<f32> },
    Eltwise { kind: EltwiseKind, coeffs: Vec<f32> },
    /// `dcr = true` orders channels depth-column-row (`mode=1`).
    PixelShuffle { factor: usize, dcr: bool },
    Interp { filter: ResampleFilter, size: InterpSize },
    Noop,
}

impl Layer {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Input => "Input",
            Self::Convolution(_) => "Convolution",
            Self::Relu { .. } => "ReLU",
            Self::Prelu { .. } => "PReLU",
            Self::Sigmoid => "Sigmoid",
            Self::Clip { .. } => "Clip",
            Self::Split => "Split",
            Self::BinaryOp { .. } => "BinaryOp",
            Self::Eltwise { .. } => "Eltwise",
            Self::PixelShuffle { .. } => "PixelShuffle",
            Self::Interp { .. } => "Interp",
            Self::Noop => "Noop",
        }
    }

    /// Number of stored parameters.
    pub fn weight_count(&self) -> usize {
        match self {
            Self::Convolution(c) => c.weights.len() + c.bias.as_ref().map_or(0, Vec::len),
            Self::Prelu { slopes } => slopes.len(),
            _ => 0,
        }
    }

    /// Build a layer from its declaration, reading weights and inferring
    /// output shapes from `inputs`.
    pub fn build(
        decl: &LayerDecl,
        inputs: &[BlobShape],
        weights: &mut WeightReader<'_>,
        path: &Path,
    ) -> Result<(Self, Vec<BlobShape>)> {
        let p = &decl.params;
        let parse_err =
            |msg: String| EngineError::parse(path, format!("layer {:?}: {msg}", decl.name));
        let mismatch = |msg: String| {
            EngineError::ModelVersionMismatch(format!("layer {:?}: {msg}", decl.name))
        };
        let rescale = |spatial: Option<Ratio>, num: u64, den: u64| -> Result<Option<Ratio>> {
            spatial
                .map(|r| {
                    r.mul(num, den).ok_or_else(|| {
                        parse_err(format!(
                            "spatial ratio {}/{} x {num}/{den} overflows",
                            r.num, r.den
                        ))
                    })
                })
                .transpose()
        };
        let required = |id: i32, default: i32, what: &str| {
            positive(p.int(id, default)).ok_or_else(|| parse_err(format!("{what} must be > 0")))
        };
        let arity = |n_in: usize, n_out: usize| -> Result<()> {
            if decl.bottoms.len() != n_in || decl.tops.len() != n_out {
                return Err(parse_err(format!(
                    "{} expects {n_in} input(s) and {n_out} output(s), got {} and {}",
                    decl.kind,
                    decl.bottoms.len(),
                    decl.tops.len()
                )));
            }
            Ok(())
        };

        match decl.kind.as_str() {
            "Input" => {
                arity(0, 1)?;
                let c = p.int(2, 0);
                if c != 0 && c as usize != INPUT_CHANNELS {
                    return Err(mismatch(format!(
                        "input declares {c} channels, the engine feeds {INPUT_CHANNELS}"
                    )));
                }
                Ok((
                    Self::Input,
                    vec![BlobShape {
                        channels: INPUT_CHANNELS,
                        spatial: Some(Ratio::ONE),
                    }],
                ))
            }

            "Convolution" => {
                arity(1, 1)?;
                let input = inputs[0];
                let num_output = required(0, 0, "num_output")?;
                let kernel_w = required(1, 0, "kernel_w")?;
                let kernel_h = required(11, kernel_w as i32, "kernel_h")?;
                let dilation_w = required(2, 1, "dilation")?;
                let dilation_h = required(12, dilation_w as i32, "dilation")?;
                let stride_w = required(3, 1, "stride")?;
                let stride_h = required(13, stride_w as i32, "stride")?;
                if stride_w != stride_h {
                    return Err(parse_err(format!(
                        "anisotropic stride {stride_w}x{stride_h} is not supported"
                    )));
                }

                let pad_left = p.int(4, 0);
                let padding = match pad_left {
                    -233 => Padding::SameUpper,
                    -234 => Padding::SameLower,
                    _ => {
                        let pad_right = p.int(15, pad_left);
                        let pad_top = p.int(14, pad_left);
                        let pad_bottom = p.int(16, pad_top);
                        let all = [pad_left, pad_right, pad_top, pad_bottom];
                        if all.iter().any(|&v| v < 0) {
                            return Err(parse_err(format!("unsupported padding {all:?}")));
                        }
                        Padding::Explicit {
                            left: pad_left as usize,
                            right: pad_right as usize,
                            top: pad_top as usize,
                            bottom: pad_bottom as usize,
                        }
                    }
                };

                let activation_type = p.int(9, 0);
                let activation = Activation::from_params(activation_type, p.array(10))
                    .ok_or_else(|| {
                        parse_err(format!("unsupported activation type {activation_type}"))
                    })?;

                for (k, d) in [(kernel_w, dilation_w), (kernel_h, dilation_h)] {
                    if (k - 1).checked_mul(d).and_then(|e| e.checked_add(1)).is_none() {
                        return Err(parse_err(format!("kernel {k} with dilation {d} overflows")));
                    }
                }

                let weight_data_size = p.int(6, 0);
                let expected = num_output
                    .checked_mul(input.channels)
                    .and_then(|n| n.checked_mul(kernel_w))
                    .and_then(|n| n.checked_mul(kernel_h))
                    .ok_or_else(|| {
                        parse_err(format!(
                            "{num_output} outputs x {} inputs x {kernel_w}x{kernel_h} kernel \
                             overflows",
                            input.channels
                        ))
                    })?;
                if weight_data_size < 0 || weight_data_size as usize != expected {
                    return Err(mismatch(format!(
                        "weight_data_size {weight_data_size} does not match {num_output} \
                         outputs x {} inputs x {kernel_w}x{kernel_h} kernel = {expected}",
                        input.channels
                    )));
                }

                let kernel = weights.read_tagged(expected, &format!("{} kernel", decl.name))?;
                let bias = if p.int(5, 0) != 0 {
                    Some(weights.read_f32(num_output, &format!("{} bias", decl.name))?)
                } else {
                    None
                };

                let conv = Convolution {
                    num_output,
                    in_channels: input.channels,
                    kernel_w,
                    kernel_h,
                    dilation_w,
                    dilation_h,
                    stride_w,
                    stride_h,
                    padding,
                    weights: kernel,
                    bias,
                    activation,
                };
                let spatial = rescale(input.spatial, 1, stride_w as u64)?;
                Ok((
                    Self::Convolution(conv),
                    vec![BlobShape {
                        channels: num_output,
                        spatial,
                    }],
                ))
            }

            "ReLU" => {
                arity(1, 1)?;
                Ok((Self::Relu { slope: p.float(0, 0.0) }, vec![inputs[0]]))
            }

            "PReLU" => {
                arity(1, 1)?;
                let num_slope = positive(p.int(0, 0))
                    .ok_or_else(|| parse_err("num_slope must be > 0".into()))?;
                if num_slope != 1 && num_slope != inputs[0].channels {
                    return Err(mismatch(format!(
                        "{num_slope} slopes for {} channels",
                        inputs[0].channels
                    )));
                }
                let slopes = weights.read_f32(num_slope, &format!("{} slopes", decl.name))?;
                Ok((Self::Prelu { slopes }, vec![inputs[0]]))
            }

            "Sigmoid" => {
                arity(1, 1)?;
                Ok((Self::Sigmoid, vec![inputs[0]]))
            }

            "Clip" => {
                arity(1, 1)?;
                let min = p.float(0, f32::MIN);
                let max = p.float(1, f32::MAX);
                if min > max {
                    return Err(parse_err(format!("clip min {min} > max {max}")));
                }
                Ok((Self::Clip { min, max }, vec![inputs[0]]))
            }

            "Split" => {
                if decl.bottoms.len() != 1 || decl.tops.is_empty() {
                    return Err(parse_err("Split expects 1 input and at least 1 output".into()));
                }
                Ok((Self::Split, vec![inputs[0]; decl.tops.len()]))
            }

            "BinaryOp" => {
                let code = p.int(0, 0);
                let kind = BinaryKind::from_code(code)
                    .ok_or_else(|| parse_err(format!("unsupported binary op {code}")))?;
                if p.int(1, 0) != 0 {
                    arity(1, 1)?;
                    Ok((
                        Self::BinaryOp {
                            kind,
                            scalar: Some(p.float(2, 0.0)),
                        },
                        vec![inputs[0]],
                    ))
                } else {
                    arity(2, 1)?;
                    same_shape(&inputs[..2]).map_err(mismatch)?;
                    Ok((Self::BinaryOp { kind, scalar: None }, vec![inputs[0]]))
                }
            }

            "Eltwise" => {
                if decl.bottoms.is_empty() || decl.tops.len() != 1 {
                    return Err(parse_err("Eltwise expects inputs and 1 output".into()));
                }
                let kind = match p.int(0, 0) {
                    0 => EltwiseKind::Prod,
                    1 => EltwiseKind::Sum,
                    2 => EltwiseKind::Max,
                    other => return Err(parse_err(format!("unsupported eltwise op {other}"))),
                };
                let coeffs = match p.array(1) {
                    Some(c) if c.len() != inputs.len() => {
                        return Err(parse_err(format!(
                            "{} coefficients for {} inputs",
                            c.len(),
                            inputs.len()
                        )));
                    }
                    Some(c) => c.to_vec(),
                    None => Vec::new(),
                };
                same_shape(inputs).map_err(mismatch)?;
                Ok((Self::Eltwise { kind, coeffs }, vec![inputs[0]]))
            }

            "PixelShuffle" => {
                arity(1, 1)?;
                let factor = positive(p.int(0, 1))
                    .ok_or_else(|| parse_err("upscale_factor must be > 0".into()))?;
                let dcr = match p.int(1, 0) {
                    0 => false,
                    1 => true,
                    other => {
                        return Err(parse_err(format!("unsupported pixel shuffle mode {other}")));
                    }
                };
                let c = inputs[0].channels;
                let block = factor
                    .checked_mul(factor)
                    .ok_or_else(|| parse_err(format!("upscale_factor {factor} overflows")))?;
                if c % block != 0 {
                    return Err(mismatch(format!(
                        "{c} channels not divisible by {factor}x{factor}"
                    )));
                }
                let shape = BlobShape {
                    channels: c / block,
                    spatial: rescale(inputs[0].spatial, factor as u64, 1)?,
                };
                Ok((Self::PixelShuffle { factor, dcr }, vec![shape]))
            }

            "Interp" => {
                arity(1, 1)?;
                let filter = match p.int(0, 0) {
                    1 => ResampleFilter::Nearest,
                    2 => ResampleFilter::Bilinear,
                    3 => ResampleFilter::Bicubic,
                    other => return Err(parse_err(format!("unsupported resize type {other}"))),
                };
                let (out_h, out_w) = (p.int(3, 0), p.int(4, 0));
                if out_h > 0 && out_w > 0 {
                    let size = InterpSize::Fixed {
                        h: out_h as usize,
                        w: out_w as usize,
                    };
                    let shape = BlobShape {
                        channels: inputs[0].channels,
                        spatial: None,
                    };
                    return Ok((Self::Interp { filter, size }, vec![shape]));
                }
                let (h, w) = (p.float(1, 1.0), p.float(2, 1.0));
                if h != w {
                    return Err(parse_err(format!("anisotropic interp scale {h}x{w}")));
                }
                let (num, den) = Ratio::from_scale(h)
                    .ok_or_else(|| parse_err(format!("interp scale {h} is not an integer ratio")))?;
                let shape = BlobShape {
                    channels: inputs[0].channels,
                    spatial: rescale(inputs[0].spatial, num, den)?,
                };
                Ok((
                    Self::Interp {
                        filter,
                        size: InterpSize::Scale { h, w },
                    },
                    vec![shape],
                ))
            }

            "Noop" => {
                arity(1, 1)?;
                Ok((Self::Noop, vec![inputs[0]]))
            }

            other => Err(parse_err(format!("unsupported layer type {other:?}"))),
        }
    }

    /// Run the layer.  `n_out` is the declared output count.
    pub fn forward(&self, inputs: &[&Tensor], n_out: usize) -> Result<Vec<Tensor>> {
        let x = inputs
            .first()
            .ok_or_else(|| {
                EngineError::InvariantViolation(format!("{} without input", self.type_name()))
            })?;

        let out = match self {
            Self::Input | Self::Noop => (*x).clone(),
            Self::Convolution(conv) => conv.forward(x)?,
            Self::Relu { slope } => map(x, |v| if v < 0.0 { v * slope } else { v }),
            Self::Prelu { slopes } => {
                let mut y = (*x).clone();
                for c in 0..y.channels {
                    let s = if slopes.len() == 1 { slopes[0] } else { slopes[c] };
                    for v in y.plane_mut(c) {
                        if *v < 0.0 {
                            *v *= s;
                        }
                    }
                }
                y
            }
            Self::Sigmoid => map(x, |v| 1.0 / (1.0 + (-v).exp())),
            Self::Clip { min, max } => map(x, |v| v.clamp(*min, *max)),
            Self::Split => return Ok(vec![(*x).clone(); n_out]),
            Self::BinaryOp { kind, scalar } => match scalar {
                Some(b) => map(x, |a| kind.apply(a, *b)),
                None => {
                    let b = inputs.get(1).ok_or_else(|| {
                        EngineError::InvariantViolation("BinaryOp without second operand".into())
                    })?;
                    check_same_size(x, b)?;
                    let data = x
                        .data
                        .iter()
                        .zip(&b.data)
                        .map(|(&a, &b)| kind.apply(a, b))
                        .collect();
                    Tensor::from_vec(x.channels, x.height, x.width, data)?
                }
            },
            Self::Eltwise { kind, coeffs } => {
                let coeff = |i: usize| coeffs.get(i).copied().unwrap_or(1.0);
                let mut y = match kind {
                    EltwiseKind::Sum => map(x, |v| v * coeff(0)),
                    _ => (*x).clone(),
                };
                for (i, b) in inputs.iter().enumerate().skip(1) {
                    check_same_size(x, b)?;
                    let c = coeff(i);
                    for (acc, &v) in y.data.iter_mut().zip(&b.data) {
                        *acc = match kind {
                            EltwiseKind::Prod => *acc * v,
                            EltwiseKind::Sum => *acc + v * c,
                            EltwiseKind::Max => acc.max(v),
                        };
                    }
                }
                y
            }
            Self::PixelShuffle { factor, dcr } => pixel_shuffle(x, *factor, *dcr),
            Self::Interp { filter, size } => {
                let (out_h, out_w) = match *size {
                    InterpSize::Fixed { h, w } => (h, w),
                    InterpSize::Scale { h, w } => (
                        (x.height as f32 * h) as usize,
                        (x.width as f32 * w) as usize,
                    ),
                };
                if out_h == 0 || out_w == 0 {
                    return Err(EngineError::Inference(format!(
                        "interp of {}x{} produces an empty output",
                        x.width, x.height
                    )));
                }
                let data = resample::resize_planes(
                    &x.data, x.channels, x.width, x.height, out_w, out_h, *filter,
                );
                Tensor::from_vec(x.channels, out_h, out_w, data)?
            }
        };
        Ok(vec![out])
    }
}

fn positive(v: i32) -> Option<usize> {
    (v > 0).then_some(v as usize)
}

fn same_shape(inputs: &[BlobShape]) -> std::result::Result<(), String> {
    let first = inputs[0];
    for other in &inputs[1..] {
        if other.channels != first.channels {
            return Err(format!(
                "operand channels differ ({} vs {})",
                first.channels, other.channels
            ));
        }
        if let (Some(a), Some(b)) = (first.spatial, other.spatial) {
            if a != b {
                return Err(format!(
                    "operand scales differ ({}/{} vs {}/{})",
                    a.num, a.den, b.num, b.den
                ));
            }
        }
    }
    Ok(())
}

fn check_same_size(a: &Tensor, b: &Tensor) -> Result<()> {
    if a.shape() != b.shape() {
        return Err(EngineError::Inference(format!(
            "element-wise operands differ: {:?} vs {:?}",
            a.shape(),
            b.shape()
        )));
    }
    Ok(())
}

fn map(x: &Tensor, f: impl Fn(f32) -> f32) -> Tensor {
    Tensor {
        channels: x.channels,
        height: x.height,
        width: x.width,
        data: x.data.iter().map(|&v| f(v)).collect(),
    }
}

fn pixel_shuffle(x: &Tensor, r: usize, dcr: bool) -> Tensor {
    let out_c = x.channels / (r * r);
    let (h, w) = (x.height, x.width);
    let mut y = Tensor::zeros(out_c, h * r, w * r);
    let out_w = w * r;
    for c in 0..out_c {
        for i in 0..r {
            for j in 0..r {
                let src_c = if dcr {
                    (i * r + j) * out_c + c
                } else {
                    c * r * r + i * r + j
                };
                let src = x.plane(src_c);
                let dst = y.plane_mut(c);
                for sy in 0..h {
                    let drow = (sy * r + i) * out_w;
                    for sx in 0..w {
                        dst[drow + sx * r + j] = src[sy * w + sx];
                    }
                }
            }
        }
    }
    y
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::param::parse_param;

    fn decl(line: &str) -> LayerDecl {
        let text = format!("7767517\n2 2\nInput in0 0 1 a\n{line}\n");
        parse_param(&text, Path::new("t.param"))
            .expect("valid param")
            .layers
            .remove(1)
    }

    fn rgb() -> BlobShape {
        BlobShape {
            channels: 3,
            spatial: Some(Ratio::ONE),
        }
    }

    #[test]
    fn ratio_reduces_and_converts() {
        assert_eq!(Ratio::ONE.mul(4, 2), Some(Ratio { num: 2, den: 1 }));
        assert_eq!(Ratio::new(1 << 40, 1).mul(1 << 40, 1), None);
        assert_eq!(Ratio::from_scale(2.0), Some((2, 1)));
        assert_eq!(Ratio::from_scale(0.5), Some((1, 2)));
        assert_eq!(Ratio::from_scale(1.5), None);
        assert_eq!(Ratio::new(3, 6).as_integer(), None);
    }

    #[test]
    fn pixel_shuffle_pytorch_order() {
        let x = Tensor::from_vec(4, 1, 1, vec![0.0, 1.0, 2.0, 3.0]).expect("tensor");
        let y = pixel_shuffle(&x, 2, false);
        assert_eq!(y.shape(), (1, 2, 2));
        assert_eq!(y.data, vec![0.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn pixel_shuffle_channel_mismatch() {
        let d = decl("PixelShuffle ps 1 1 a b 0=2");
        let mut w = WeightReader::new(&[], Path::new("t.bin"));
        let err = Layer::build(&d, &[rgb()], &mut w, Path::new("t.param"))
            .expect_err("3 channels cannot shuffle by 2");
        assert!(matches!(err, EngineError::ModelVersionMismatch(_)));
    }

    #[test]
    fn conv_weight_size_must_match_inputs() {
        let d = decl("Convolution c 1 1 a b 0=4 1=1 6=8");
        let mut w = WeightReader::new(&[], Path::new("t.bin"));
        let err = Layer::build(&d, &[rgb()], &mut w, Path::new("t.param"))
            .expect_err("8 != 4 * 3");
        match err {
            EngineError::ModelVersionMismatch(msg) => assert!(msg.contains("weight_data_size")),
            other => panic!("unexpected error variant: {other:?}"),
        }
    }

    #[test]
    fn interp_scales_shape_statically() {
        let d = decl("Interp up 1 1 a b 0=1 1=2.0 2=2.0");
        let mut w = WeightReader::new(&[], Path::new("t.bin"));
        let (layer, shapes) =
            Layer::build(&d, &[rgb()], &mut w, Path::new("t.param")).expect("interp");
        assert_eq!(layer.type_name(), "Interp");
        assert_eq!(shapes[0].spatial, Some(Ratio { num: 2, den: 1 }));

        let x = Tensor::from_vec(3, 1, 1, vec![0.1, 0.2, 0.3]).expect("tensor");
        let y = layer.forward(&[&x], 1).expect("forward");
        assert_eq!(y[0].shape(), (3, 2, 2));
        assert_eq!(y[0].plane(2), &[0.3; 4]);
    }

    #[test]
    fn unknown_layer_is_parse_error() {
        let d = decl("Softmax s 1 1 a b");
        let mut w = WeightReader::new(&[], Path::new("t.bin"));
        assert!(matches!(
            Layer::build(&d, &[rgb()], &mut w, Path::new("t.param")),
            Err(EngineError::ModelParse { .. })
        ));
    }

    #[test]
    fn scalar_binary_op() {
        let layer = Layer::BinaryOp {
            kind: BinaryKind::RSub,
            scalar: Some(1.0),
        };
        let x = Tensor::from_vec(1, 1, 2, vec![0.25, 1.0]).expect("tensor");
        let y = layer.forward(&[&x], 1).expect("forward");
        assert_eq!(y[0].data, vec![0.75, 0.0]);
    }

    #[test]
    fn eltwise_weighted_sum() {
        let layer = Layer::Eltwise {
            kind: EltwiseKind::Sum,
            coeffs: vec![1.0, 0.5],
        };
        let a = Tensor::from_vec(1, 1, 2, vec![1.0, 2.0]).expect("tensor");
        let b = Tensor::from_vec(1, 1, 2, vec![2.0, 4.0]).expect("tensor");
        let y = layer.forward(&[&a, &b], 1).expect("forward");
        assert_eq!(y[0].data, vec![2.0, 4.0]);
    }
}
