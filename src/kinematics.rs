//! Finite-difference kinematics over the centroid track.
//!
//! The sampling interval is `1 / fps`, fixed for the whole stream. Frames
//! without a detection advance time but leave the registers untouched, so the
//! next velocity spans the gap while still dividing by a single `dt`. Both
//! behaviors are known limitations of the scheme: variable frame timing and
//! missed detections skew the derivatives.

use serde_derive::{Deserialize, Serialize};

use crate::centroid::Centroid;
use crate::error::Error;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub frame_index: u64,
    pub timestamp: f64,
    pub x: f64,
    pub y: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct VelocitySample {
    pub timestamp: f64,
    pub vx: f64,
    pub vy: f64,
    pub speed: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct AccelerationSample {
    pub timestamp: f64,
    pub ax: f64,
    pub ay: f64,
    pub magnitude: f64,
}

/// What a single detection added to the track
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Readout {
    pub position: Sample,
    pub velocity: Option<VelocitySample>,
    pub acceleration: Option<AccelerationSample>,
}

#[derive(Debug, Clone)]
pub struct KinematicsTracker {
    fps: f64,
    dt: f64,
    last_position: Option<Sample>,
    last_velocity: Option<VelocitySample>,
    positions: Vec<Sample>,
    velocities: Vec<VelocitySample>,
    accelerations: Vec<AccelerationSample>,
}

impl KinematicsTracker {
    pub fn new(fps: f64) -> Result<Self, Error> {
        if !fps.is_finite() || fps <= 0.0 {
            return Err(Error::InvalidFrameRate(fps));
        }

        Ok(Self {
            fps,
            dt: 1.0 / fps,
            last_position: None,
            last_velocity: None,
            positions: Vec::new(),
            velocities: Vec::new(),
            accelerations: Vec::new(),
        })
    }

    #[inline]
    pub fn fps(&self) -> f64 {
        self.fps
    }

    #[inline]
    pub fn dt(&self) -> f64 {
        self.dt
    }

    #[inline]
    pub fn timestamp(&self, frame_index: u64) -> f64 {
        frame_index as f64 * self.dt
    }

    /// Feeds the outcome of one frame. A missed detection is skipped.
    pub fn observe(&mut self, frame_index: u64, detection: Option<Centroid>) -> Option<Readout> {
        let c = detection?;

        Some(self.push(frame_index, c.x as f64, c.y as f64))
    }

    pub fn push(&mut self, frame_index: u64, x: f64, y: f64) -> Readout {
        let position = Sample {
            frame_index,
            timestamp: self.timestamp(frame_index),
            x,
            y,
        };
        self.positions.push(position);

        let velocity = self.last_position.map(|prev| {
            let vx = (x - prev.x) / self.dt;
            let vy = (y - prev.y) / self.dt;

            VelocitySample {
                timestamp: position.timestamp,
                vx,
                vy,
                speed: vx.hypot(vy),
            }
        });

        let mut acceleration = None;

        if let Some(vel) = velocity {
            if let Some(prev) = self.last_velocity {
                let ax = (vel.vx - prev.vx) / self.dt;
                let ay = (vel.vy - prev.vy) / self.dt;

                acceleration = Some(AccelerationSample {
                    timestamp: position.timestamp,
                    ax,
                    ay,
                    magnitude: ax.hypot(ay),
                });
            }

            self.velocities.push(vel);
            self.last_velocity = Some(vel);
        }

        if let Some(acc) = acceleration {
            self.accelerations.push(acc);
        }

        self.last_position = Some(position);

        Readout {
            position,
            velocity,
            acceleration,
        }
    }

    #[inline]
    pub fn positions(&self) -> &[Sample] {
        &self.positions
    }

    #[inline]
    pub fn velocities(&self) -> &[VelocitySample] {
        &self.velocities
    }

    #[inline]
    pub fn accelerations(&self) -> &[AccelerationSample] {
        &self.accelerations
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Line segments between consecutive positions
    pub fn segments(&self) -> impl Iterator<Item = ((f64, f64), (f64, f64))> + '_ {
        self.positions
            .windows(2)
            .map(|w| ((w[0].x, w[0].y), (w[1].x, w[1].y)))
    }
}
