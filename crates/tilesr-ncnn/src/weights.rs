//! Sequential `.bin` weight reader.
//!
//! Layers pull their tensors in declaration order.  Convolution kernels are
//! flag-prefixed (`0` raw f32, [`FLAG_F16`] raw f16 padded to 4 bytes);
//! biases and slopes are raw f32 with no prefix.  Running out of bytes, or
//! leaving bytes behind, means the weights belong to a different topology.

use std::path::{Path, PathBuf};

use half::f16;
use tilesr_core::error::{EngineError, Result};

pub const FLAG_F32: u32 = 0;
pub const FLAG_F16: u32 = 0x0130_6B47;

pub struct WeightReader<'a> {
    data: &'a [u8],
    pos: usize,
    path: PathBuf,
}

impl<'a> WeightReader<'a> {
    pub fn new(data: &'a [u8], path: &Path) -> Self {
        Self {
            data,
            pos: 0,
            path: path.to_path_buf(),
        }
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> usize {
        self.pos
    }

    fn take(&mut self, n: usize, what: &str) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(n).filter(|&e| e <= self.data.len());
        match end {
            Some(end) => {
                let slice = &self.data[self.pos..end];
                self.pos = end;
                Ok(slice)
            }
            None => Err(EngineError::ModelVersionMismatch(format!(
                "{}: weights truncated reading {what} ({n} bytes at offset {}, file has {})",
                self.path.display(),
                self.pos,
                self.data.len()
            ))),
        }
    }

    fn byte_len(&self, n: usize, width: usize, what: &str) -> Result<usize> {
        n.checked_mul(width).ok_or_else(|| {
            EngineError::parse(&self.path, format!("{what}: {n} elements overflow the byte count"))
        })
    }

    /// `n` raw little-endian f32 values.
    pub fn read_f32(&mut self, n: usize, what: &str) -> Result<Vec<f32>> {
        let len = self.byte_len(n, 4, what)?;
        let bytes = self.take(len, what)?;
        Ok(bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect())
    }

    /// `n` values preceded by a storage flag.
    pub fn read_tagged(&mut self, n: usize, what: &str) -> Result<Vec<f32>> {
        let flag_bytes = self.take(4, what)?;
        let flag = u32::from_le_bytes([flag_bytes[0], flag_bytes[1], flag_bytes[2], flag_bytes[3]]);
        match flag {
            FLAG_F32 => self.read_f32(n, what),
            FLAG_F16 => {
                let len = self.byte_len(n, 2, what)?;
                let bytes = self.take(len, what)?;
                let values = bytes
                    .chunks_exact(2)
                    .map(|b| f16::from_le_bytes([b[0], b[1]]).to_f32())
                    .collect();
                let pad = (4 - len % 4) % 4;
                self.take(pad, what)?;
                Ok(values)
            }
            other => Err(EngineError::parse(
                &self.path,
                format!("{what}: unsupported weight storage flag 0x{other:08X}"),
            )),
        }
    }

    /// Fail if unread bytes remain.
    pub fn finish(self) -> Result<()> {
        let left = self.data.len() - self.pos;
        if left != 0 {
            return Err(EngineError::ModelVersionMismatch(format!(
                "{}: {left} trailing weight bytes after the last layer",
                self.path.display()
            )));
        }
        Ok(())
    }
}
