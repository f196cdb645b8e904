use thiserror::Error;

#[derive(Error, Debug)]
pub enum CrtError {
    /// A raster with zero width or height reached an operation that needs pixels.
    #[error("Raster buffer is empty ({width}x{height})")]
    EmptyBuffer { width: u32, height: u32 },

    #[error("Raster dimensions differ: {left:?} vs {right:?}")]
    DimensionMismatch { left: (u32, u32), right: (u32, u32) },

    #[error("Pixel data length {len} does not match {width}x{height} RGB")]
    BadPixelData { width: u32, height: u32, len: usize },

    #[error("Capture failed: {0}")]
    Capture(String),

    #[error("Overlay window error: {0}")]
    Window(String),

    #[error("Present failed: {0}")]
    Present(String),

    #[error("Monitor index {index} out of range (found {found} monitors)")]
    MonitorNotFound { index: usize, found: usize },

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, CrtError>;
