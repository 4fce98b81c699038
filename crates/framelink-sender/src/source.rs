use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

/// Where raw image frames come from.
pub enum FrameSource {
    /// One raw image file, sent as every frame.
    File(PathBuf),
    /// Generated diagonal gradient.
    Gradient {
        width: u16,
        height: u16,
        bitdepth: u8,
    },
}

/// Bytes per pixel for a RAW bit depth (10/12/16 bits all take two bytes).
pub fn bytes_per_pixel(bitdepth: u8) -> usize {
    usize::from(bitdepth).div_ceil(8)
}

impl FrameSource {
    /// Load the raw pixels of frame `index`.
    pub fn frame(&self, index: u32) -> Result<Vec<u8>> {
        match self {
            FrameSource::File(path) => read_raw(path),
            FrameSource::Gradient {
                width,
                height,
                bitdepth,
            } => Ok(gradient(*width, *height, *bitdepth, index)),
        }
    }
}

fn read_raw(path: &Path) -> Result<Vec<u8>> {
    let data =
        std::fs::read(path).with_context(|| format!("cannot open raw file: {}", path.display()))?;
    if data.is_empty() {
        bail!("raw file is empty: {}", path.display());
    }
    Ok(data)
}

/// Little-endian samples; `index` shifts the pattern so frames differ.
fn gradient(width: u16, height: u16, bitdepth: u8, index: u32) -> Vec<u8> {
    let bpp = bytes_per_pixel(bitdepth);
    let max = if bitdepth >= 16 {
        u16::MAX as u32
    } else {
        (1u32 << bitdepth) - 1
    };
    let (w, h) = (u32::from(width), u32::from(height));
    let mut out = Vec::with_capacity(w as usize * h as usize * bpp);
    for y in 0..h {
        for x in 0..w {
            let value = ((x + y + index) % (max + 1)) as u16;
            out.extend_from_slice(&value.to_le_bytes()[..bpp.min(2)]);
        }
    }
    out
}
