//! Reassembly of upscaled tiles into the final image.
//!
//! Each output tile is cropped by `prepadding × scale` on every side and its
//! interior copied to `(x × scale, y × scale)`.  Tiles are placed in
//! ascending index order; where interiors overlap the later tile overwrites
//! the earlier one, with no blending.

use tilesr_core::error::{EngineError, Result};
use tilesr_core::types::Image;

use crate::executor::OutputTile;
use crate::tiler::TileGrid;

/// Accumulates output tiles into a destination buffer.
pub struct Stitcher {
    grid: TileGrid,
    canvas: Image,
    placed: Vec<bool>,
}

impl Stitcher {
    pub fn new(grid: TileGrid, channels: usize) -> Result<Self> {
        let (w, h) = grid.output_size();
        Ok(Self {
            grid,
            canvas: Image::zeroed(w, h, channels)?,
            placed: vec![false; grid.len()],
        })
    }

    /// Copy the interior of `tile` into the canvas.
    pub fn place(&mut self, tile: &OutputTile) -> Result<()> {
        let spec = tile.spec;
        let expected = self.grid.tile(spec.index).ok_or_else(|| {
            EngineError::InvariantViolation(format!(
                "tile index {} outside a {}-tile grid",
                spec.index,
                self.grid.len()
            ))
        })?;
        if expected != spec {
            return Err(EngineError::InvariantViolation(format!(
                "tile {} does not belong to this grid",
                spec.index
            )));
        }
        if self.placed[spec.index] {
            return Err(EngineError::InvariantViolation(format!(
                "tile {} placed twice",
                spec.index
            )));
        }

        let s = self.grid.scale();
        if tile.scale != s {
            return Err(EngineError::DimensionMismatch(format!(
                "tile {} upscaled x{}, grid expects x{s}",
                spec.index, tile.scale
            )));
        }
        let channels = self.canvas.channels();
        if tile.image.channels() != channels {
            return Err(EngineError::DimensionMismatch(format!(
                "tile {} has {} channels, canvas has {channels}",
                spec.index,
                tile.image.channels()
            )));
        }
        let (pw, ph) = spec.scaled_padded_size(s)?;
        if tile.image.size() != (pw, ph) {
            return Err(EngineError::DimensionMismatch(format!(
                "tile {} is {}x{}, expected {pw}x{ph}",
                spec.index,
                tile.image.width(),
                tile.image.height()
            )));
        }

        let crop = (spec.prepadding * s) as usize;
        let (iw, ih) = ((spec.width * s) as usize, (spec.height * s) as usize);
        let (dx, dy) = ((spec.x * s) as usize, (spec.y * s) as usize);
        let src_stride = tile.image.row_stride();
        let dst_stride = self.canvas.row_stride();
        let src = tile.image.as_bytes();
        let dst = self.canvas.as_bytes_mut();
        let row_bytes = iw * channels;
        for row in 0..ih {
            let so = (crop + row) * src_stride + crop * channels;
            let d = (dy + row) * dst_stride + dx * channels;
            dst[d..d + row_bytes].copy_from_slice(&src[so..so + row_bytes]);
        }

        self.placed[spec.index] = true;
        Ok(())
    }

    /// The stitched image, provided every tile was placed.
    pub fn finish(self) -> Result<Image> {
        let missing = self.placed.iter().filter(|&&p| !p).count();
        if missing != 0 {
            return Err(EngineError::InvariantViolation(format!(
                "{missing} of {} tiles were never placed",
                self.placed.len()
            )));
        }
        Ok(self.canvas)
    }
}

/// Bytes held between dispatch and the end of stitching: the canvas plus
/// every upscaled tile awaiting placement.
pub fn held_bytes(grid: &TileGrid, channels: usize) -> Result<usize> {
    let (w, h) = grid.output_size();
    let canvas = (w as usize).saturating_mul(h as usize).saturating_mul(channels);
    grid.iter().try_fold(canvas, |acc, spec| {
        let (pw, ph) = spec.scaled_padded_size(grid.scale())?;
        let tile = (pw as usize).saturating_mul(ph as usize).saturating_mul(channels);
        Ok(acc.saturating_add(tile))
    })
}

/// Place all `tiles` in index order and return the final image.
pub fn stitch(grid: TileGrid, mut tiles: Vec<OutputTile>, channels: usize) -> Result<Image> {
    tiles.sort_by_key(|t| t.spec.index);
    let mut stitcher = Stitcher::new(grid, channels)?;
    for tile in &tiles {
        stitcher.place(tile)?;
    }
    stitcher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// An output tile whose interior pixels all equal `value` and whose
    /// padding ring is 255.
    fn solid_tile(grid: &TileGrid, index: usize, value: u8) -> OutputTile {
        let spec = grid.tile(index).expect("tile");
        let s = grid.scale();
        let (w, h) = spec.scaled_padded_size(s).expect("tile fits");
        let crop = spec.prepadding * s;
        let mut img = Image::zeroed(w, h, 3).expect("image");
        let stride = img.row_stride();
        let bytes = img.as_bytes_mut();
        for y in 0..h {
            for x in 0..w {
                let inside = x >= crop && y >= crop && x < w - crop && y < h - crop;
                let v = if inside { value } else { 255 };
                let o = y as usize * stride + x as usize * 3;
                bytes[o..o + 3].fill(v);
            }
        }
        OutputTile {
            spec,
            scale: s,
            image: img,
        }
    }

    #[test]
    fn crops_padding_and_places_interiors() {
        let grid = TileGrid::new(3, 2, 2, 1, 2).expect("grid");
        let tiles = (0..grid.len())
            .rev()
            .map(|i| solid_tile(&grid, i, i as u8 * 10))
            .collect();
        let out = stitch(grid, tiles, 3).expect("stitch");
        assert_eq!(out.size(), (6, 4));
        assert_eq!(out.pixel(0, 0), &[0, 0, 0]);
        assert_eq!(out.pixel(3, 3), &[0, 0, 0]);
        assert_eq!(out.pixel(4, 0), &[10, 10, 10]);
        assert_eq!(out.pixel(5, 3), &[10, 10, 10]);
        assert!(out.as_bytes().iter().all(|&b| b != 255));
    }

    #[test]
    fn held_bytes_cover_canvas_and_pending_tiles() {
        let grid = TileGrid::new(3, 2, 2, 1, 2).expect("grid");
        // 6x4 canvas, an 8x8 tile and a 6x8 tile, three channels each.
        assert_eq!(held_bytes(&grid, 3).expect("fits"), (24 + 64 + 48) * 3);
    }

    #[test]
    fn missing_tile_is_reported() {
        let grid = TileGrid::new(4, 4, 2, 0, 1).expect("grid");
        let tiles = (0..3).map(|i| solid_tile(&grid, i, 1)).collect();
        let err = stitch(grid, tiles, 3).expect_err("one tile missing");
        match err {
            EngineError::InvariantViolation(msg) => assert!(msg.contains("1 of 4")),
            other => panic!("unexpected error variant: {other:?}"),
        }
    }

    #[test]
    fn duplicate_tile_is_rejected() {
        let grid = TileGrid::new(2, 2, 1, 0, 1).expect("grid");
        let mut stitcher = Stitcher::new(grid, 3).expect("stitcher");
        let tile = solid_tile(&grid, 0, 7);
        stitcher.place(&tile).expect("first placement");
        assert!(stitcher.place(&tile).is_err());
    }

    #[test]
    fn wrong_tile_size_is_dimension_mismatch() {
        let grid = TileGrid::new(2, 2, 0, 0, 2).expect("grid");
        let mut tile = solid_tile(&grid, 0, 7);
        tile.image = Image::zeroed(3, 3, 3).expect("image");
        let err = stitch(grid, vec![tile], 3).expect_err("bad size");
        assert!(matches!(err, EngineError::DimensionMismatch(_)));
    }
}
