use serde_derive::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::Error;

pub const DEFAULT_KERNEL_SIZE: usize = 5;
pub const DEFAULT_MIN_FIT_SAMPLES: usize = 4;
pub const DEFAULT_EXPORT_DIR: &str = "resultados";
pub const DEFAULT_EXPORT_FILE: &str = "resultados.json";

/// Largest hue value in the 8-bit HSV convention.
pub const HUE_MAX: u8 = 179;

/// HSV triple, hue in 0..=179, saturation and value in 0..=255
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hsv {
    pub h: u8,
    pub s: u8,
    pub v: u8,
}

impl Hsv {
    #[inline]
    pub const fn new(h: u8, s: u8, v: u8) -> Self {
        Self { h, s, v }
    }
}

/// Inclusive HSV band the tracked object is expected to fall into
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorBand {
    pub lower: Hsv,
    pub upper: Hsv,
}

impl ColorBand {
    pub const GREEN: ColorBand = ColorBand {
        lower: Hsv::new(35, 50, 50),
        upper: Hsv::new(85, 255, 255),
    };

    #[inline]
    pub fn contains(&self, px: Hsv) -> bool {
        (self.lower.h..=self.upper.h).contains(&px.h)
            && (self.lower.s..=self.upper.s).contains(&px.s)
            && (self.lower.v..=self.upper.v).contains(&px.v)
    }

    pub fn validate(&self) -> Result<(), Error> {
        let (lo, hi) = (self.lower, self.upper);

        if lo.h > hi.h || lo.s > hi.s || lo.v > hi.v {
            return Err(Error::InvalidConfig(format!(
                "lower bound {:?} exceeds upper bound {:?}",
                lo, hi
            )));
        }

        if hi.h > HUE_MAX {
            return Err(Error::InvalidConfig(format!(
                "hue upper bound {} is above {}",
                hi.h, HUE_MAX
            )));
        }

        Ok(())
    }
}

impl Default for ColorBand {
    fn default() -> Self {
        Self::GREEN
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SegmentationConfig {
    pub band: ColorBand,
    /// side of the square structuring element used by the opening
    pub kernel_size: usize,
    pub iterations: usize,
}

impl SegmentationConfig {
    pub fn new(band: ColorBand) -> Self {
        Self {
            band,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        self.band.validate()?;

        if self.kernel_size == 0 {
            return Err(Error::InvalidConfig("kernel size must be at least 1".into()));
        }

        if self.iterations == 0 {
            return Err(Error::InvalidConfig("iterations must be at least 1".into()));
        }

        Ok(())
    }
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            band: ColorBand::GREEN,
            kernel_size: DEFAULT_KERNEL_SIZE,
            iterations: 1,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ExportConfig {
    pub dir: PathBuf,
    pub file_name: String,
}

impl ExportConfig {
    #[inline]
    pub fn table_path(&self) -> PathBuf {
        self.dir.join(&self.file_name)
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(DEFAULT_EXPORT_DIR),
            file_name: DEFAULT_EXPORT_FILE.to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub segmentation: SegmentationConfig,
    pub min_fit_samples: usize,
    pub export: ExportConfig,
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), Error> {
        self.segmentation.validate()?;

        // a parabola needs three points, keep at least one degree of freedom
        if self.min_fit_samples < DEFAULT_MIN_FIT_SAMPLES {
            return Err(Error::InvalidConfig(format!(
                "min_fit_samples must be at least {}",
                DEFAULT_MIN_FIT_SAMPLES
            )));
        }

        Ok(())
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            segmentation: SegmentationConfig::default(),
            min_fit_samples: DEFAULT_MIN_FIT_SAMPLES,
            export: ExportConfig::default(),
        }
    }
}
