use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("calibration needs 2 reference points, got {collected}")]
    InsufficientPoints { collected: usize },

    #[error("calibration reference points coincide")]
    DegenerateCalibration,

    #[error("real-world length must be a positive finite number, got {0}")]
    InvalidLength(f64),

    #[error("no real-world length was provided")]
    LengthUnavailable,

    #[error("no calibration session is active")]
    CalibrationInactive,

    #[error("frames cannot be processed while calibration is active")]
    CalibrationActive,

    #[error("insufficient data for model fit: {samples} samples, scale committed: {scale}")]
    InsufficientData { samples: usize, scale: bool },

    #[error("least-squares system is singular")]
    SingularFit,

    #[error("frame rate must be a positive finite number, got {0}")]
    InvalidFrameRate(f64),

    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Json Error: {0}")]
    Json(#[from] serde_json::Error),

    #[cfg(feature = "video")]
    #[error("OpenCV Error: {0}")]
    OpenCv(#[from] opencv::Error),
}
