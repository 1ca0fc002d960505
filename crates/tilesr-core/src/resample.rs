//! Planar `f32` resampling: nearest, bilinear and bicubic.
//!
//! Shared by the network's `Interp` layer, the alpha-plane path and the
//! output rescale applied when the requested scale differs from the model's
//! native scale.  All filters use half-pixel centres and clamp sample
//! coordinates to the source bounds (edge replication).

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Cubic kernel sharpness.
pub const CUBIC_A: f32 = -0.75;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResampleFilter {
    Nearest,
    Bilinear,
    Bicubic,
}

/// Resample one `src_w × src_h` plane to `dst_w × dst_h`.
///
/// Rows are computed in parallel; each output value depends only on its own
/// coordinates, so the result is independent of scheduling.
pub fn resize_plane(
    src: &[f32],
    src_w: usize,
    src_h: usize,
    dst_w: usize,
    dst_h: usize,
    filter: ResampleFilter,
) -> Vec<f32> {
    debug_assert_eq!(src.len(), src_w * src_h);
    let mut dst = vec![0.0f32; dst_w * dst_h];
    if dst.is_empty() || src.is_empty() {
        return dst;
    }
    if src_w == dst_w && src_h == dst_h {
        dst.copy_from_slice(src);
        return dst;
    }

    let sx = src_w as f32 / dst_w as f32;
    let sy = src_h as f32 / dst_h as f32;

    match filter {
        ResampleFilter::Nearest => {
            let xs: Vec<usize> = (0..dst_w)
                .map(|x| ((x as f32 * sx) as usize).min(src_w - 1))
                .collect();
            dst.par_chunks_mut(dst_w).enumerate().for_each(|(y, row)| {
                let syi = ((y as f32 * sy) as usize).min(src_h - 1);
                let src_row = &src[syi * src_w..(syi + 1) * src_w];
                for (out, &sxi) in row.iter_mut().zip(&xs) {
                    *out = src_row[sxi];
                }
            });
        }
        ResampleFilter::Bilinear => {
            let xt: Vec<(usize, usize, f32)> =
                (0..dst_w).map(|x| linear_tap(x, sx, src_w)).collect();
            dst.par_chunks_mut(dst_w).enumerate().for_each(|(y, row)| {
                let (y0, y1, fy) = linear_tap(y, sy, src_h);
                let r0 = &src[y0 * src_w..(y0 + 1) * src_w];
                let r1 = &src[y1 * src_w..(y1 + 1) * src_w];
                for (out, &(x0, x1, fx)) in row.iter_mut().zip(&xt) {
                    let top = r0[x0] * (1.0 - fx) + r0[x1] * fx;
                    let bot = r1[x0] * (1.0 - fx) + r1[x1] * fx;
                    *out = top * (1.0 - fy) + bot * fy;
                }
            });
        }
        ResampleFilter::Bicubic => {
            let xt: Vec<([usize; 4], [f32; 4])> =
                (0..dst_w).map(|x| cubic_taps(x, sx, src_w)).collect();
            dst.par_chunks_mut(dst_w).enumerate().for_each(|(y, row)| {
                let (yi, yw) = cubic_taps(y, sy, src_h);
                for (out, (xi, xw)) in row.iter_mut().zip(&xt) {
                    let mut acc = 0.0f32;
                    for k in 0..4 {
                        let r = &src[yi[k] * src_w..(yi[k] + 1) * src_w];
                        let h = r[xi[0]] * xw[0]
                            + r[xi[1]] * xw[1]
                            + r[xi[2]] * xw[2]
                            + r[xi[3]] * xw[3];
                        acc += h * yw[k];
                    }
                    *out = acc;
                }
            });
        }
    }
    dst
}

/// Resample every plane of a planar CHW buffer.
pub fn resize_planes(
    src: &[f32],
    channels: usize,
    src_w: usize,
    src_h: usize,
    dst_w: usize,
    dst_h: usize,
    filter: ResampleFilter,
) -> Vec<f32> {
    let plane = src_w * src_h;
    let mut out = Vec::with_capacity(channels * dst_w * dst_h);
    for c in 0..channels {
        out.extend(resize_plane(
            &src[c * plane..(c + 1) * plane],
            src_w,
            src_h,
            dst_w,
            dst_h,
            filter,
        ));
    }
    out
}

#[inline]
fn linear_tap(d: usize, scale: f32, len: usize) -> (usize, usize, f32) {
    let s = ((d as f32 + 0.5) * scale - 0.5).max(0.0);
    let i0 = (s.floor() as usize).min(len - 1);
    let i1 = (i0 + 1).min(len - 1);
    (i0, i1, s - i0 as f32)
}

#[inline]
fn cubic_taps(d: usize, scale: f32, len: usize) -> ([usize; 4], [f32; 4]) {
    let s = (d as f32 + 0.5) * scale - 0.5;
    let base = s.floor();
    let t = s - base;
    let base = base as i64;
    let last = len as i64 - 1;
    let idx = [
        (base - 1).clamp(0, last) as usize,
        base.clamp(0, last) as usize,
        (base + 1).clamp(0, last) as usize,
        (base + 2).clamp(0, last) as usize,
    ];
    (idx, cubic_weights(t))
}

/// Keys cubic weights for fractional offset `t ∈ [0, 1)`.
#[inline]
fn cubic_weights(t: f32) -> [f32; 4] {
    let a = CUBIC_A;
    let w0 = ((a * (t + 1.0) - 5.0 * a) * (t + 1.0) + 8.0 * a) * (t + 1.0) - 4.0 * a;
    let w1 = ((a + 2.0) * t - (a + 3.0)) * t * t + 1.0;
    let w2 = ((a + 2.0) * (1.0 - t) - (a + 3.0)) * (1.0 - t) * (1.0 - t) + 1.0;
    let w3 = 1.0 - w0 - w1 - w2;
    [w0, w1, w2, w3]
}
