use serde_derive::{Deserialize, Serialize};

use crate::segmentation::Mask;

/// Raw spatial moments up to first order
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Moments {
    pub m00: f64,
    pub m10: f64,
    pub m01: f64,
}

impl Moments {
    pub fn of(mask: &Mask) -> Self {
        let mut m = Moments::default();

        for ((y, x), &v) in mask.view().indexed_iter() {
            if v == 0 {
                continue;
            }

            let v = v as f64;
            m.m00 += v;
            m.m10 += x as f64 * v;
            m.m01 += y as f64 * v;
        }

        m
    }
}

/// Blob center in integer pixel coordinates
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Centroid {
    pub x: i32,
    pub y: i32,
}

/// Weighted centroid of the mask, `None` when the mask has no foreground.
/// Coordinates are truncated to whole pixels.
pub fn extract(mask: &Mask) -> Option<Centroid> {
    let m = Moments::of(mask);

    if m.m00 <= 0.0 {
        return None;
    }

    Some(Centroid {
        x: (m.m10 / m.m00) as i32,
        y: (m.m01 / m.m00) as i32,
    })
}
