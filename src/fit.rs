//! Projectile-motion model fitted to the finished track.
//!
//! Horizontal motion is taken as uniform (`x = x0 + vx0·t`) and vertical motion
//! as uniformly accelerated (`y = y0 + vy0·t + g·t²/2`). Both are plain
//! least-squares polynomial fits over the metric positions.

use serde_derive::{Deserialize, Serialize};

use crate::config::DEFAULT_MIN_FIT_SAMPLES;
use crate::error::Error;
use crate::kinematics::{Sample, VelocitySample};
use crate::math;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct MotionModel {
    pub x0: f64,
    pub vx0: f64,
    pub y0: f64,
    pub vy0: f64,
    pub g: f64,
}

impl MotionModel {
    #[inline]
    pub fn position(&self, t: f64) -> (f64, f64) {
        (
            self.x0 + self.vx0 * t,
            self.y0 + self.vy0 * t + 0.5 * self.g * t * t,
        )
    }

    #[inline]
    pub fn velocity(&self, t: f64) -> (f64, f64) {
        (self.vx0, self.vy0 + self.g * t)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct FitMetrics {
    pub rmse: f64,
    pub mae: f64,
    pub r_squared: f64,
}

impl FitMetrics {
    pub fn compare(observed: &[f64], predicted: &[f64]) -> Self {
        Self {
            rmse: math::rmse(observed, predicted),
            mae: math::mae(observed, predicted),
            r_squared: math::r_squared(observed, predicted),
        }
    }
}

/// Position in meters
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct MetricSample {
    pub timestamp: f64,
    pub x: f64,
    pub y: f64,
}

/// Model evaluated at one timestamp
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct ModelPoint {
    pub timestamp: f64,
    pub x: f64,
    pub y: f64,
    pub vx: f64,
    pub vy: f64,
    pub speed: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FitReport {
    pub params: MotionModel,
    pub scale: f64,
    pub experimental: Vec<MetricSample>,
    pub theoretical: Vec<ModelPoint>,
    pub x_metrics: FitMetrics,
    pub y_metrics: FitMetrics,
    /// experimental speed against model speed, at the velocity timestamps
    pub speed_metrics: Option<FitMetrics>,
}

#[derive(Debug, Clone)]
pub struct ModelFitter {
    min_samples: usize,
}

impl ModelFitter {
    pub fn new(min_samples: usize) -> Self {
        Self {
            min_samples: min_samples.max(DEFAULT_MIN_FIT_SAMPLES),
        }
    }

    pub fn fit(
        &self,
        positions: &[Sample],
        velocities: &[VelocitySample],
        scale: Option<f64>,
    ) -> Result<FitReport, Error> {
        let scale = match scale {
            Some(scale) if positions.len() >= self.min_samples => scale,
            _ => {
                return Err(Error::InsufficientData {
                    samples: positions.len(),
                    scale: scale.is_some(),
                })
            }
        };

        let experimental: Vec<MetricSample> = positions
            .iter()
            .map(|s| MetricSample {
                timestamp: s.timestamp,
                x: s.x * scale,
                y: s.y * scale,
            })
            .collect();

        let t: Vec<f64> = experimental.iter().map(|s| s.timestamp).collect();
        let x: Vec<f64> = experimental.iter().map(|s| s.x).collect();
        let y: Vec<f64> = experimental.iter().map(|s| s.y).collect();

        let cx = math::linear_ls(&t, &x).ok_or(Error::SingularFit)?;
        let cy = math::quadratic_ls(&t, &y).ok_or(Error::SingularFit)?;

        let params = MotionModel {
            x0: cx[0],
            vx0: cx[1],
            y0: cy[0],
            vy0: cy[1],
            g: 2.0 * cy[2],
        };

        let theoretical: Vec<ModelPoint> = t.iter().map(|&t| model_point(&params, t)).collect();

        let x_model: Vec<f64> = theoretical.iter().map(|p| p.x).collect();
        let y_model: Vec<f64> = theoretical.iter().map(|p| p.y).collect();

        let speed_metrics = if velocities.is_empty() {
            None
        } else {
            let observed: Vec<f64> = velocities.iter().map(|v| v.speed * scale).collect();
            let predicted: Vec<f64> = velocities
                .iter()
                .map(|v| model_point(&params, v.timestamp).speed)
                .collect();

            Some(FitMetrics::compare(&observed, &predicted))
        };

        Ok(FitReport {
            params,
            scale,
            x_metrics: FitMetrics::compare(&x, &x_model),
            y_metrics: FitMetrics::compare(&y, &y_model),
            speed_metrics,
            experimental,
            theoretical,
        })
    }
}

impl Default for ModelFitter {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_FIT_SAMPLES)
    }
}

fn model_point(params: &MotionModel, t: f64) -> ModelPoint {
    let (x, y) = params.position(t);
    let (vx, vy) = params.velocity(t);

    ModelPoint {
        timestamp: t,
        x,
        y,
        vx,
        vy,
        speed: vx.hypot(vy),
    }
}
