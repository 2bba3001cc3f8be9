use std::io::Cursor;

use base64::Engine as _;
use image::ImageFormat;
use serde::Deserialize;

use crate::surface::RasterSurface;

pub const SUGGESTED_STEM: &str = "microprinted-image";

/// Lossless output encodings. Both keep the alpha channel.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
	#[default]
	Png,
	Bmp,
}

impl ExportFormat {
	pub fn mime(self) -> &'static str {
		match self {
			ExportFormat::Png => "image/png",
			ExportFormat::Bmp => "image/bmp",
		}
	}

	pub fn extension(self) -> &'static str {
		match self {
			ExportFormat::Png => "png",
			ExportFormat::Bmp => "bmp",
		}
	}

	/// Download name matching the encoding, e.g. `microprinted-image.png`.
	pub fn suggested_filename(self) -> String {
		format!("{SUGGESTED_STEM}.{}", self.extension())
	}

	fn image_format(self) -> ImageFormat {
		match self {
			ExportFormat::Png => ImageFormat::Png,
			ExportFormat::Bmp => ImageFormat::Bmp,
		}
	}
}

#[derive(Debug, thiserror::Error)]
#[error("failed to encode {width}x{height} surface as {format:?}: {source}")]
pub struct EncodeError {
	pub format: ExportFormat,
	pub width: u32,
	pub height: u32,
	#[source]
	pub source: image::ImageError,
}

pub fn encode(surface: &RasterSurface, format: ExportFormat) -> Result<Vec<u8>, EncodeError> {
	let mut out = Cursor::new(Vec::new());
	surface.as_image().write_to(&mut out, format.image_format()).map_err(|source| EncodeError {
		format,
		width: surface.width(),
		height: surface.height(),
		source,
	})?;
	Ok(out.into_inner())
}

pub fn to_data_url(bytes: &[u8], format: ExportFormat) -> String {
	format!("data:{};base64,{}", format.mime(), base64::engine::general_purpose::STANDARD.encode(bytes))
}
