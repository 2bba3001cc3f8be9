use std::path::{Path, PathBuf};

use tracing::debug;

use crate::surface::RasterSurface;

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
	#[error("not a decodable image: {0}")]
	Image(#[from] image::ImageError),
	#[error("failed to read {path}: {source}")]
	Io {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},
}

/// Decodes encoded image bytes into a surface of the image's natural size.
pub fn load(bytes: &[u8]) -> Result<RasterSurface, DecodeError> {
	let decoded = image::load_from_memory(bytes)?;
	let surface = RasterSurface::from(decoded.to_rgba8());
	debug!(width = surface.width(), height = surface.height(), "decoded source image");
	Ok(surface)
}

pub fn load_path(path: &Path) -> Result<RasterSurface, DecodeError> {
	let bytes = std::fs::read(path).map_err(|source| DecodeError::Io { path: path.to_owned(), source })?;
	load(&bytes)
}

/// How an image reached the editor.
#[derive(Clone, Debug, PartialEq)]
pub enum UploadOrigin {
	/// File dialog selection. Whatever the user picked is attempted.
	Picker,
	/// Drag and drop, which only accepts `image/*` payloads.
	DragDrop { mime: String },
}

#[derive(Clone, Debug)]
pub struct Upload {
	pub bytes: Vec<u8>,
	pub origin: UploadOrigin,
}

impl Upload {
	pub fn accepted(&self) -> bool {
		match &self.origin {
			UploadOrigin::Picker => true,
			UploadOrigin::DragDrop { mime } => mime.starts_with("image/"),
		}
	}

	/// `Ok(None)` for a drop that is silently ignored.
	pub fn load(self) -> Result<Option<RasterSurface>, DecodeError> {
		if !self.accepted() {
			debug!(origin = ?self.origin, "ignoring non-image drop");
			return Ok(None);
		}
		load(&self.bytes).map(Some)
	}
}
