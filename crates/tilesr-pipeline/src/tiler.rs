//! Tile planning and extraction.
//!
//! # Geometry
//!
//! ```text
//!   x ─────────────►
//! y ┌──────┬──────┬───┐     interior tiles partition the image in
//! │ │  0   │  1   │ 2 │     row-major order; the last column and row
//! │ ├──────┼──────┼───┤     are clipped to the image bounds
//! ▼ │  3   │  4   │ 5 │
//!   └──────┴──────┴───┘
//! ```
//!
//! Each tile is extracted with `prepadding` extra pixels on every side.  The
//! padding comes from the neighbouring region when it lies inside the image
//! and from edge replication (clamped coordinates) when it does not, so a
//! tile always has the full `(w + 2p) × (h + 2p)` context.

use tilesr_core::error::{EngineError, Result};
use tilesr_core::types::{Image, Tensor};

/// Position and extent of one tile.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TileSpec {
    /// Row-major index in the grid.
    pub index: usize,
    pub col: u32,
    pub row: u32,
    /// Interior origin in source pixels.
    pub x: u32,
    pub y: u32,
    /// Interior extent in source pixels.
    pub width: u32,
    pub height: u32,
    pub prepadding: u32,
}

impl TileSpec {
    /// `width + 2 × prepadding`, or `None` if it does not fit in `u32`.
    #[inline]
    pub fn padded_width(&self) -> Option<u32> {
        padded(self.width, self.prepadding)
    }

    #[inline]
    pub fn padded_height(&self) -> Option<u32> {
        padded(self.height, self.prepadding)
    }

    /// Padded extent at `scale`: the size of the network output for this
    /// tile before cropping.
    pub fn scaled_padded_size(&self, scale: u32) -> Result<(u32, u32)> {
        self.padded_width()
            .and_then(|w| w.checked_mul(scale))
            .zip(self.padded_height().and_then(|h| h.checked_mul(scale)))
            .ok_or_else(|| {
                EngineError::Config(format!(
                    "tile {}x{} with prepadding {} at x{scale} overflows",
                    self.width, self.height, self.prepadding
                ))
            })
    }

    /// Bytes held by the extracted tile: planar `f32` RGB plus the alpha
    /// plane when present.
    pub fn extracted_bytes(&self, has_alpha: bool) -> Result<usize> {
        let (pw, ph) = self.scaled_padded_size(1)?;
        let planes = if has_alpha { 4 } else { 3 };
        Ok((pw as usize)
            .saturating_mul(ph as usize)
            .saturating_mul(planes * std::mem::size_of::<f32>()))
    }

    /// Top-left of the padded region; may be negative.
    #[inline]
    pub fn padded_origin(&self) -> (i64, i64) {
        (
            self.x as i64 - self.prepadding as i64,
            self.y as i64 - self.prepadding as i64,
        )
    }
}

fn padded(extent: u32, prepadding: u32) -> Option<u32> {
    prepadding.checked_mul(2)?.checked_add(extent)
}

/// Row-major tile layout over a `width × height` image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TileGrid {
    width: u32,
    height: u32,
    tile_w: u32,
    tile_h: u32,
    cols: u32,
    rows: u32,
    prepadding: u32,
    scale: u32,
}

impl TileGrid {
    /// Plan tiles of `tile_size` pixels.  `tile_size == 0` yields a single
    /// tile covering the whole image.
    pub fn new(
        width: u32,
        height: u32,
        tile_size: u32,
        prepadding: u32,
        scale: u32,
    ) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(EngineError::InvalidImage(format!(
                "cannot tile an empty {width}x{height} image"
            )));
        }
        if scale == 0 {
            return Err(EngineError::Config("scale must be at least 1".into()));
        }
        let (tile_w, tile_h) = if tile_size == 0 {
            (width, height)
        } else {
            (tile_size.min(width), tile_size.min(height))
        };
        let fits = |extent: u32| {
            padded(extent, prepadding).and_then(|p| p.checked_mul(scale)).is_some()
        };
        if !(fits(tile_w) && fits(tile_h)) {
            return Err(EngineError::Config(format!(
                "tile {tile_w}x{tile_h} with prepadding {prepadding} at x{scale} overflows"
            )));
        }
        if width.checked_mul(scale).is_none() || height.checked_mul(scale).is_none() {
            return Err(EngineError::InvalidImage(format!(
                "{width}x{height} at x{scale} overflows the output dimensions"
            )));
        }
        Ok(Self {
            width,
            height,
            tile_w,
            tile_h,
            cols: width.div_ceil(tile_w),
            rows: height.div_ceil(tile_h),
            prepadding,
            scale,
        })
    }

    pub fn cols(&self) -> u32 {
        self.cols
    }

    pub fn rows(&self) -> u32 {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.cols as usize * self.rows as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn prepadding(&self) -> u32 {
        self.prepadding
    }

    pub fn scale(&self) -> u32 {
        self.scale
    }

    /// Source image size.
    pub fn input_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Final image size (`input × scale`).
    pub fn output_size(&self) -> (u32, u32) {
        (self.width * self.scale, self.height * self.scale)
    }

    /// Nominal interior tile extent.
    pub fn tile_extent(&self) -> (u32, u32) {
        (self.tile_w, self.tile_h)
    }

    pub fn tile(&self, index: usize) -> Option<TileSpec> {
        if index >= self.len() {
            return None;
        }
        let col = (index % self.cols as usize) as u32;
        let row = (index / self.cols as usize) as u32;
        let x = col * self.tile_w;
        let y = row * self.tile_h;
        Some(TileSpec {
            index,
            col,
            row,
            x,
            y,
            width: self.tile_w.min(self.width - x),
            height: self.tile_h.min(self.height - y),
            prepadding: self.prepadding,
        })
    }

    /// Tiles in row-major order.  The grid is `Copy`, so iteration can be
    /// restarted at will.
    pub fn iter(&self) -> TileIter {
        TileIter {
            grid: *self,
            next: 0,
        }
    }

    /// Materialise the padded region of `spec` from `image`.
    pub fn extract(&self, image: &Image, spec: &TileSpec) -> Result<Tile> {
        if image.size() != (self.width, self.height) {
            return Err(EngineError::DimensionMismatch(format!(
                "grid planned for {}x{}, image is {}x{}",
                self.width,
                self.height,
                image.width(),
                image.height()
            )));
        }
        let (pw, ph) = spec.scaled_padded_size(1)?;
        let (pw, ph) = (pw as usize, ph as usize);
        let (ox, oy) = spec.padded_origin();
        let plane = pw * ph;
        let has_alpha = image.layout().has_alpha();

        let mut rgb = Tensor::zeros(3, ph, pw);
        let mut alpha = has_alpha.then(|| vec![0.0f32; plane]);
        for ty in 0..ph {
            for tx in 0..pw {
                let px = image.pixel_clamped(ox + tx as i64, oy + ty as i64);
                let i = ty * pw + tx;
                rgb.data[i] = px[0] as f32 / 255.0;
                rgb.data[plane + i] = px[1] as f32 / 255.0;
                rgb.data[2 * plane + i] = px[2] as f32 / 255.0;
                if let Some(a) = alpha.as_mut() {
                    a[i] = px[3] as f32 / 255.0;
                }
            }
        }

        Ok(Tile {
            spec: *spec,
            rgb,
            alpha,
        })
    }
}

impl IntoIterator for &TileGrid {
    type Item = TileSpec;
    type IntoIter = TileIter;

    fn into_iter(self) -> TileIter {
        self.iter()
    }
}

/// Lazy row-major tile sequence.
#[derive(Clone, Debug)]
pub struct TileIter {
    grid: TileGrid,
    next: usize,
}

impl Iterator for TileIter {
    type Item = TileSpec;

    fn next(&mut self) -> Option<TileSpec> {
        let spec = self.grid.tile(self.next)?;
        self.next += 1;
        Some(spec)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.grid.len().saturating_sub(self.next);
        (left, Some(left))
    }
}

impl ExactSizeIterator for TileIter {}

/// An extracted tile: padded, normalised planar RGB plus optional alpha.
#[derive(Clone, Debug)]
pub struct Tile {
    pub spec: TileSpec,
    /// `3 × padded_h × padded_w`, values in `[0, 1]`.
    pub rgb: Tensor,
    /// `padded_h × padded_w`, values in `[0, 1]`.
    pub alpha: Option<Vec<f32>>,
}
