//! Microprint watermarking: stamp a dense field of repeated text over an image, keeping an
//! optional disk clear.
//!
//! The engine runs in three stages: [`loader`] decodes the source, [`compositor`] stamps the text
//! onto a copy, and [`export`] encodes the result. [`pipeline`] runs the last two as one pass and
//! [`session`] schedules passes as parameters change.

pub mod compositor;
pub mod config;
pub mod export;
pub mod loader;
pub mod params;
pub mod pipeline;
pub mod session;
pub mod surface;

pub use compositor::{Composite, Compositor, Stamp, StampReport};
pub use export::{EncodeError, ExportFormat};
pub use loader::{DecodeError, Upload, UploadOrigin};
pub use params::{ExclusionZone, Rgb, WatermarkParameters};
pub use surface::RasterSurface;
