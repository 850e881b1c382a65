//! Error types shared by the viewer modules.

use thiserror::Error;

/// Everything that can go wrong between the camera and the speaker.
///
/// `FrameNotReady` and `RenderSurfaceMissing` are transient: the detection loop
/// skips the cycle and tries again on the next tick.
#[derive(Error, Debug)]
pub enum ViewerError {
    #[error("Model failed to load: {0}")]
    ModelLoad(String),

    #[error("Camera permission denied: {0}")]
    PermissionDenied(String),

    #[error("Camera unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Frame not ready")]
    FrameNotReady,

    #[error("Render surface missing")]
    RenderSurfaceMissing,

    #[error("Inference error: {0}")]
    Inference(String),

    #[error("Capture error: {0}")]
    Capture(String),

    #[error("Speech error: {0}")]
    Speech(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

impl ViewerError {
    /// Errors that leave the viewer usable and may be retried by the user.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ViewerError::PermissionDenied(_)
                | ViewerError::DeviceUnavailable(_)
                | ViewerError::FrameNotReady
                | ViewerError::RenderSurfaceMissing
                | ViewerError::Capture(_)
        )
    }
}

impl From<ort::Error> for ViewerError {
    fn from(err: ort::Error) -> Self {
        ViewerError::Inference(err.to_string())
    }
}

impl From<toml::de::Error> for ViewerError {
    fn from(err: toml::de::Error) -> Self {
        ViewerError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for ViewerError {
    fn from(err: toml::ser::Error) -> Self {
        ViewerError::Config(err.to_string())
    }
}
