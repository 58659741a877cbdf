use ndarray::prelude::*;

use crate::error::Error;

/// Decoded color image, BGR byte order, shape (height, width, 3)
#[derive(Debug, Clone)]
pub struct Frame {
    pub dims: (u32, u32),
    pixels: Array3<u8>,
}

impl Frame {
    pub fn from_bgr(pixels: Array3<u8>) -> Result<Self, Error> {
        let shape = pixels.shape();
        if shape[2] != 3 {
            return Err(Error::InvalidFrame(format!(
                "expected 3 channels, got {}",
                shape[2]
            )));
        }

        let dims = (shape[1] as u32, shape[0] as u32);

        Ok(Self { dims, pixels })
    }

    /// Builds a frame from a packed, row-major BGR buffer
    pub fn from_bgr_bytes(width: u32, height: u32, data: Vec<u8>) -> Result<Self, Error> {
        let shape = (height as usize, width as usize, 3);
        let pixels = Array3::from_shape_vec(shape, data)
            .map_err(|err| Error::InvalidFrame(err.to_string()))?;

        Self::from_bgr(pixels)
    }

    /// Frame of the given size filled with one BGR color
    pub fn filled(width: u32, height: u32, bgr: [u8; 3]) -> Self {
        let shape = (height as usize, width as usize, 3);
        let pixels = Array3::from_shape_fn(shape, |(_, _, c)| bgr[c]);

        Self {
            dims: (width, height),
            pixels,
        }
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.dims.0
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.dims.1
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.dims.0 == 0 || self.dims.1 == 0
    }

    #[inline]
    pub fn pixels(&self) -> ArrayView3<'_, u8> {
        self.pixels.view()
    }

    /// Paints an axis-aligned rectangle, clipped to the frame
    pub fn fill_rect(&mut self, x: u32, y: u32, w: u32, h: u32, bgr: [u8; 3]) {
        let (fw, fh) = (self.dims.0 as usize, self.dims.1 as usize);
        let x0 = (x as usize).min(fw);
        let y0 = (y as usize).min(fh);
        let x1 = (x as usize + w as usize).min(fw);
        let y1 = (y as usize + h as usize).min(fh);

        let mut region = self.pixels.slice_mut(s![y0..y1, x0..x1, ..]);
        for mut px in region.lanes_mut(Axis(2)) {
            px[0] = bgr[0];
            px[1] = bgr[1];
            px[2] = bgr[2];
        }
    }
}
