//! Host image and activation tensor types.
//!
//! # Layouts
//!
//! [`Image`] is the caller-facing buffer: interleaved, row-major, one byte
//! per channel (`[R G B (A) R G B (A) ...]`).  [`Tensor`] is the planar CHW
//! `f32` blob the network layers operate on.  Conversion between the two
//! happens once per tile inside the executor.
//!
//! # Invariants
//!
//! 1. `Image::data.len() == width × height × channels`, enforced by
//!    [`Image::new`]; the fields are private so it cannot be broken later.
//! 2. `Tensor::data.len() == channels × height × width`, enforced by
//!    [`Tensor::from_vec`] and [`Tensor::zeros`].

use crate::error::{EngineError, Result};

// ─── Pixel layout ────────────────────────────────────────────────────────────

/// Interleaved 8-bit channel layouts accepted by the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PixelLayout {
    /// 3 bytes per pixel.
    Rgb8,
    /// 4 bytes per pixel.  Alpha bypasses the network and is resampled.
    Rgba8,
}

impl PixelLayout {
    /// Layout for an interleaved channel count, if supported.
    pub const fn from_channels(channels: usize) -> Option<Self> {
        match channels {
            3 => Some(Self::Rgb8),
            4 => Some(Self::Rgba8),
            _ => None,
        }
    }

    /// Bytes (= channels) per pixel.
    #[inline]
    pub const fn channels(self) -> usize {
        match self {
            Self::Rgb8 => 3,
            Self::Rgba8 => 4,
        }
    }

    #[inline]
    pub const fn has_alpha(self) -> bool {
        matches!(self, Self::Rgba8)
    }
}

// ─── Image ───────────────────────────────────────────────────────────────────

/// An 8-bit interleaved image in host memory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Image {
    width: u32,
    height: u32,
    layout: PixelLayout,
    data: Vec<u8>,
}

impl Image {
    /// Wrap an interleaved buffer, validating its length against the geometry.
    pub fn new(width: u32, height: u32, channels: usize, data: Vec<u8>) -> Result<Self> {
        let layout = PixelLayout::from_channels(channels).ok_or_else(|| {
            EngineError::InvalidImage(format!(
                "unsupported channel count {channels} (expected 3 or 4)"
            ))
        })?;
        if width == 0 || height == 0 {
            return Err(EngineError::InvalidImage(format!(
                "image must be at least 1x1, got {width}x{height}"
            )));
        }
        let expected = (width as usize) * (height as usize) * channels;
        if data.len() != expected {
            return Err(EngineError::InvalidImage(format!(
                "buffer length {} does not match {width}x{height}x{channels} = {expected}",
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            layout,
            data,
        })
    }

    /// A zero-filled image.
    pub fn zeroed(width: u32, height: u32, channels: usize) -> Result<Self> {
        let len = (width as usize) * (height as usize) * channels;
        Self::new(width, height, channels, vec![0; len])
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.layout.channels()
    }

    #[inline]
    pub fn layout(&self) -> PixelLayout {
        self.layout
    }

    /// `(width, height)`.
    #[inline]
    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Bytes per row.
    #[inline]
    pub fn row_stride(&self) -> usize {
        self.width as usize * self.channels()
    }

    /// Channel values of the pixel at `(x, y)`.
    #[inline]
    pub fn pixel(&self, x: u32, y: u32) -> &[u8] {
        let c = self.channels();
        let off = (y as usize) * self.row_stride() + (x as usize) * c;
        &self.data[off..off + c]
    }

    /// Channel values of the pixel at `(x, y)` with coordinates clamped to
    /// the image bounds (edge replication).
    #[inline]
    pub fn pixel_clamped(&self, x: i64, y: i64) -> &[u8] {
        let cx = x.clamp(0, self.width as i64 - 1) as u32;
        let cy = y.clamp(0, self.height as i64 - 1) as u32;
        self.pixel(cx, cy)
    }
}

// ─── Tensor ──────────────────────────────────────────────────────────────────

/// A dense planar `f32` blob: `channels` planes of `height × width`.
#[derive(Clone, Debug, PartialEq)]
pub struct Tensor {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
    pub data: Vec<f32>,
}

impl Tensor {
    pub fn zeros(channels: usize, height: usize, width: usize) -> Self {
        Self {
            channels,
            height,
            width,
            data: vec![0.0; channels * height * width],
        }
    }

    pub fn from_vec(channels: usize, height: usize, width: usize, data: Vec<f32>) -> Result<Self> {
        let expected = channels * height * width;
        if data.len() != expected {
            return Err(EngineError::DimensionMismatch(format!(
                "tensor data length {} does not match {channels}x{height}x{width}",
                data.len()
            )));
        }
        Ok(Self {
            channels,
            height,
            width,
            data,
        })
    }

    /// Element count per channel plane.
    #[inline]
    pub fn plane_len(&self) -> usize {
        self.height * self.width
    }

    #[inline]
    pub fn plane(&self, c: usize) -> &[f32] {
        let n = self.plane_len();
        &self.data[c * n..(c + 1) * n]
    }

    #[inline]
    pub fn plane_mut(&mut self, c: usize) -> &mut [f32] {
        let n = self.plane_len();
        &mut self.data[c * n..(c + 1) * n]
    }

    #[inline]
    pub fn at(&self, c: usize, y: usize, x: usize) -> f32 {
        self.data[(c * self.height + y) * self.width + x]
    }

    /// Shape as `(channels, height, width)`.
    #[inline]
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.channels, self.height, self.width)
    }

    /// Size in bytes of the backing buffer.
    #[inline]
    pub fn byte_size(&self) -> usize {
        self.data.len() * std::mem::size_of::<f32>()
    }
}

// Compile-time proof that the hot types can cross worker threads.
#[allow(dead_code)]
const _: () = {
    fn assert_send_sync<T: Send + Sync>() {}
    fn check() {
        assert_send_sync::<Image>();
        assert_send_sync::<Tensor>();
    }
};
