use ndarray::prelude::*;
use ndarray::Zip;

use crate::centroid::{self, Centroid};
use crate::config::{ColorBand, Hsv, SegmentationConfig};
use crate::error::Error;
use crate::frame::Frame;

pub const FOREGROUND: u8 = 255;

/// Binary image, 0 for background and 255 for foreground, shape (height, width)
#[derive(Debug, Clone, PartialEq)]
pub struct Mask(Array2<u8>);

impl Mask {
    #[inline]
    pub fn zeros(width: u32, height: u32) -> Self {
        Mask(Array2::zeros((height as usize, width as usize)))
    }

    #[inline]
    pub fn from_array(data: Array2<u8>) -> Self {
        Mask(data)
    }

    #[inline]
    pub fn view(&self) -> ArrayView2<'_, u8> {
        self.0.view()
    }

    #[inline]
    pub fn dims(&self) -> (u32, u32) {
        let (h, w) = self.0.dim();
        (w as u32, h as u32)
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> u8 {
        self.0[[y, x]]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, value: u8) {
        self.0[[y, x]] = value;
    }

    /// Number of foreground pixels
    pub fn area(&self) -> usize {
        self.0.iter().filter(|&&v| v != 0).count()
    }

    #[inline]
    pub fn is_blank(&self) -> bool {
        self.0.iter().all(|&v| v == 0)
    }
}

/// Output of both segmentation steps, kept for mask previews
#[derive(Debug, Clone)]
pub struct SegmentStages {
    pub raw: Mask,
    pub opened: Mask,
}

/// Masks and blob location found in one frame
#[derive(Debug, Clone)]
pub struct BlobDetection {
    pub stages: SegmentStages,
    pub centroid: Option<Centroid>,
}

/// Locates the colored blob in a frame
pub trait BlobDetector {
    fn detect(&mut self, frame: &Frame) -> Result<BlobDetection, Error>;
}

#[derive(Debug, Clone)]
pub struct Segmenter {
    config: SegmentationConfig,
}

impl Segmenter {
    pub fn new(config: SegmentationConfig) -> Self {
        Self { config }
    }

    #[inline]
    pub fn segment(&self, frame: &Frame) -> Mask {
        self.segment_stages(frame).opened
    }

    pub fn segment_stages(&self, frame: &Frame) -> SegmentStages {
        let raw = threshold(frame, &self.config.band);
        let opened = open(&raw, self.config.kernel_size, self.config.iterations);

        SegmentStages { raw, opened }
    }
}

impl BlobDetector for Segmenter {
    fn detect(&mut self, frame: &Frame) -> Result<BlobDetection, Error> {
        let stages = self.segment_stages(frame);
        let centroid = centroid::extract(&stages.opened);

        Ok(BlobDetection { stages, centroid })
    }
}

impl Default for Segmenter {
    fn default() -> Self {
        Self::new(SegmentationConfig::default())
    }
}

/// Thresholds `frame` against `lower..=upper` and opens the result with the default kernel
pub fn segment(frame: &Frame, lower: Hsv, upper: Hsv) -> Mask {
    Segmenter::new(SegmentationConfig::new(ColorBand { lower, upper })).segment(frame)
}

/// 8-bit HSV conversion: H in 0..=179, S and V in 0..=255
pub fn bgr_to_hsv(b: u8, g: u8, r: u8) -> Hsv {
    let v = b.max(g).max(r);
    let min = b.min(g).min(r);
    let diff = (v - min) as f64;

    let s = if v == 0 {
        0
    } else {
        round_half_up(255.0 * diff / v as f64) as u8
    };

    let h = if diff == 0.0 {
        0.0
    } else {
        let (b, g, r) = (b as f64, g as f64, r as f64);
        let num = if v as f64 == r {
            g - b
        } else if v as f64 == g {
            b - r + 2.0 * diff
        } else {
            r - g + 4.0 * diff
        };

        let h = round_half_up(30.0 * num / diff);
        if h < 0.0 {
            h + 180.0
        } else {
            h
        }
    };

    Hsv::new(h as u8, s, v)
}

#[inline]
fn round_half_up(x: f64) -> f64 {
    (x + 0.5).floor()
}

pub fn threshold(frame: &Frame, band: &ColorBand) -> Mask {
    let px = frame.pixels();
    let (h, w, _) = px.dim();
    let mut data = Array2::zeros((h, w));

    Zip::from(&mut data)
        .and(px.lanes(Axis(2)))
        .for_each(|out, bgr| {
            if band.contains(bgr_to_hsv(bgr[0], bgr[1], bgr[2])) {
                *out = FOREGROUND;
            }
        });

    Mask(data)
}

pub fn erode(mask: &Mask, size: usize) -> Mask {
    Mask(morph(&mask.0, size, u8::min))
}

pub fn dilate(mask: &Mask, size: usize) -> Mask {
    Mask(morph(&mask.0, size, u8::max))
}

/// Erosion followed by dilation, each applied `iterations` times
pub fn open(mask: &Mask, size: usize, iterations: usize) -> Mask {
    let mut out = mask.clone();

    for _ in 0..iterations {
        out = erode(&out, size);
    }

    for _ in 0..iterations {
        out = dilate(&out, size);
    }

    out
}

// Square kernel, so the filter splits into a row pass and a column pass.
// Pixels outside the image are skipped, which leaves borders neutral for both ops.
fn morph(src: &Array2<u8>, size: usize, op: fn(u8, u8) -> u8) -> Array2<u8> {
    if size <= 1 {
        return src.clone();
    }

    let rows = filter_axis(src.view(), Axis(1), size, op);

    filter_axis(rows.view(), Axis(0), size, op)
}

// Running min/max over a sliding window (van Herk / Gil-Werman). Each lane is
// cut into blocks of `size`; `prefix` accumulates from the block start and
// `suffix` from the block end, so any window is covered by at most one of each.
fn filter_axis(
    src: ArrayView2<'_, u8>,
    axis: Axis,
    size: usize,
    op: fn(u8, u8) -> u8,
) -> Array2<u8> {
    let mut dst = Array2::zeros(src.dim());
    let anchor = size / 2;
    let n = src.len_of(axis);

    let mut prefix = vec![0u8; n];
    let mut suffix = vec![0u8; n];

    for (lane, mut out) in src.lanes(axis).into_iter().zip(dst.lanes_mut(axis)) {
        for i in 0..n {
            prefix[i] = if i % size == 0 {
                lane[i]
            } else {
                op(prefix[i - 1], lane[i])
            };
        }

        for i in (0..n).rev() {
            suffix[i] = if i + 1 == n || (i + 1) % size == 0 {
                lane[i]
            } else {
                op(suffix[i + 1], lane[i])
            };
        }

        for i in 0..n {
            // inclusive window, clipped to the lane
            let from = i.saturating_sub(anchor);
            let to = (i + size - anchor).min(n) - 1;

            out[i] = if from / size != to / size {
                op(suffix[from], prefix[to])
            } else if from % size == 0 {
                prefix[to]
            } else {
                suffix[from]
            };
        }
    }

    dst
}
