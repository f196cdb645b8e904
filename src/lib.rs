pub mod capture;
pub mod config;
pub mod effects;
pub mod error;
pub mod feedback;
pub mod input;
pub mod logger;
pub mod monitor;
pub mod overlay;
pub mod raster;
pub mod render_loop;
pub mod window;

pub use capture::{CaptureSource, ScriptedCapture};
pub use config::{EffectConfig, SharedEffectConfig, TuningConfig};
pub use effects::EffectsPipeline;
pub use error::{CrtError, Result};
pub use feedback::{Classification, FeedbackGuard};
pub use logger::*;
pub use monitor::{MonitorGeometry, MonitorInfo};
pub use overlay::OverlayManager;
pub use raster::RasterBuffer;
pub use render_loop::{FrameStats, RenderContext, RenderLoop, TickOutcome};
pub use window::{HeadlessOverlay, OverlayBackend};
