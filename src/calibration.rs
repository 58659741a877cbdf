use serde_derive::{Deserialize, Serialize};

use crate::error::Error;

pub const REFERENCE_POINTS: usize = 2;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    CollectingPoints,
}

/// Snapshot of the calibration registers
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CalibrationState {
    pub reference_points: Vec<(f64, f64)>,
    pub scale_meters_per_pixel: Option<f64>,
}

/// Two-point pixel-to-meter calibration driven by operator events.
///
/// `pause` opens a session, clicks collect up to two points, `commit` turns
/// them into a scale and `discard` abandons them. Failed commits keep the
/// session open and never touch a previously committed scale.
#[derive(Debug, Clone)]
pub struct CalibrationSession {
    phase: Phase,
    points: Vec<(f64, f64)>,
    scale: Option<f64>,
}

impl CalibrationSession {
    pub fn new() -> Self {
        Self {
            phase: Phase::Idle,
            points: Vec::with_capacity(REFERENCE_POINTS),
            scale: None,
        }
    }

    #[inline]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.phase == Phase::CollectingPoints
    }

    #[inline]
    pub fn points(&self) -> &[(f64, f64)] {
        &self.points
    }

    #[inline]
    pub fn scale(&self) -> Option<f64> {
        self.scale
    }

    pub fn state(&self) -> CalibrationState {
        CalibrationState {
            reference_points: self.points.clone(),
            scale_meters_per_pixel: self.scale,
        }
    }

    /// Opens a session with no points. Pausing an open session keeps its points.
    pub fn pause(&mut self) {
        if self.phase == Phase::Idle {
            self.points.clear();
            self.phase = Phase::CollectingPoints;
        }
    }

    /// Records a reference point, returns `false` when the click was ignored.
    /// Non-finite coordinates are never recorded.
    pub fn click(&mut self, x: f64, y: f64) -> bool {
        if self.phase != Phase::CollectingPoints || self.points.len() >= REFERENCE_POINTS {
            return false;
        }

        if !x.is_finite() || !y.is_finite() {
            return false;
        }

        self.points.push((x, y));

        true
    }

    /// Distance between the two reference points, once both exist
    pub fn pixel_distance(&self) -> Option<f64> {
        match self.points.as_slice() {
            [a, b] => Some((b.0 - a.0).hypot(b.1 - a.1)),
            _ => None,
        }
    }

    /// Commits the session. `real_length` is asked for the length in meters of
    /// the segment between the points, given its length in pixels.
    ///
    /// A degenerate pair of points is dropped and the session keeps collecting.
    /// Every other failure keeps the points as they are.
    pub fn commit<F>(&mut self, real_length: F) -> Result<f64, Error>
    where
        F: FnOnce(f64) -> Option<f64>,
    {
        if self.phase != Phase::CollectingPoints {
            return Err(Error::CalibrationInactive);
        }

        let dist = self.pixel_distance().ok_or(Error::InsufficientPoints {
            collected: self.points.len(),
        })?;

        // both slots are freed so the operator can pick the points again
        if dist == 0.0 || !dist.is_finite() {
            self.points.clear();
            return Err(Error::DegenerateCalibration);
        }

        let len = real_length(dist).ok_or(Error::LengthUnavailable)?;
        if !len.is_finite() || len <= 0.0 {
            return Err(Error::InvalidLength(len));
        }

        let scale = len / dist;

        self.scale = Some(scale);
        self.points.clear();
        self.phase = Phase::Idle;

        Ok(scale)
    }

    #[inline]
    pub fn commit_length(&mut self, real_length: f64) -> Result<f64, Error> {
        self.commit(|_| Some(real_length))
    }

    pub fn discard(&mut self) {
        self.points.clear();
        self.phase = Phase::Idle;
    }
}

impl Default for CalibrationSession {
    fn default() -> Self {
        Self::new()
    }
}
