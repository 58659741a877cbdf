pub mod calibration;
pub mod centroid;
pub mod chart;
pub mod config;
pub mod error;
pub mod export;
pub mod fit;
pub mod frame;
pub mod kinematics;
pub mod math;
pub mod pipeline;
pub mod segmentation;

#[cfg(feature = "video")]
pub mod video;

pub use calibration::CalibrationSession;
pub use centroid::Centroid;
pub use config::PipelineConfig;
pub use fit::{FitReport, ModelFitter};
pub use frame::Frame;
pub use kinematics::KinematicsTracker;
pub use pipeline::Pipeline;

use error::Error;

/// Sequential source of decoded frames with a frame rate sampled once
pub trait FrameSource {
    fn fps(&self) -> f64;
    fn next_frame(&mut self) -> Result<Option<Frame>, Error>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OperatorEvent {
    Pause,
    Click { x: f64, y: f64 },
    Commit,
    Discard,
    Stop,
}

pub trait OperatorInput {
    /// Checked once after every frame, must not block
    fn poll(&mut self) -> Option<OperatorEvent>;

    /// Blocks for the next event while the stream is paused, `None` once the input is closed
    fn wait(&mut self) -> Option<OperatorEvent>;

    /// Real-world length in meters of the reference segment
    fn real_length(&mut self, pixel_distance: f64) -> Option<f64>;

    /// Called after every event the pipeline applied
    fn calibration_updated(&mut self, _session: &CalibrationSession) {}
}

impl<S: FrameSource + ?Sized> FrameSource for &mut S {
    #[inline]
    fn fps(&self) -> f64 {
        (**self).fps()
    }

    #[inline]
    fn next_frame(&mut self) -> Result<Option<Frame>, Error> {
        (**self).next_frame()
    }
}

/// Frames held in memory, mostly for tests and offline replays
pub struct FrameQueue {
    fps: f64,
    frames: std::collections::VecDeque<Frame>,
}

impl FrameQueue {
    pub fn new<I: IntoIterator<Item = Frame>>(fps: f64, frames: I) -> Self {
        Self {
            fps,
            frames: frames.into_iter().collect(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl FrameSource for FrameQueue {
    #[inline]
    fn fps(&self) -> f64 {
        self.fps
    }

    #[inline]
    fn next_frame(&mut self) -> Result<Option<Frame>, Error> {
        Ok(self.frames.pop_front())
    }
}
