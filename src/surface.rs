use image::{GenericImageView, RgbaImage};

/// Straight-alpha RGBA8 pixel grid. Dimensions are fixed at construction.
#[derive(Clone, Debug, PartialEq)]
pub struct RasterSurface {
	pixels: RgbaImage,
}

impl RasterSurface {
	pub fn new(width: u32, height: u32) -> Self {
		Self { pixels: RgbaImage::new(width, height) }
	}

	pub fn filled(width: u32, height: u32, rgba: [u8; 4]) -> Self {
		Self {
			pixels: RgbaImage::from_pixel(width, height, image::Rgba(rgba)),
		}
	}

	pub fn width(&self) -> u32 {
		self.pixels.width()
	}

	pub fn height(&self) -> u32 {
		self.pixels.height()
	}

	pub fn is_empty(&self) -> bool {
		self.width() == 0 || self.height() == 0
	}

	pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
		self.pixels.in_bounds(x, y).then(|| self.pixels.get_pixel(x, y).0)
	}

	pub fn as_image(&self) -> &RgbaImage {
		&self.pixels
	}

	pub(crate) fn as_raw_mut(&mut self) -> &mut [u8] {
		&mut self.pixels
	}
}

impl From<RgbaImage> for RasterSurface {
	fn from(pixels: RgbaImage) -> Self {
		Self { pixels }
	}
}
