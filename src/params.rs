use std::{fmt, str::FromStr};

use derive_new::new;
use serde::{Deserialize, Deserializer};

pub const DEFAULT_TEXT: &str = "This is a secret message repeated over and over to create a hidden watermark.";

/// 24-bit stamp colour. Carries no alpha of its own; see [`WatermarkParameters::opacity`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, new)]
pub struct Rgb {
	pub r: u8,
	pub g: u8,
	pub b: u8,
}

impl Rgb {
	pub const WHITE: Rgb = Rgb { r: 255, g: 255, b: 255 };
}

#[derive(Debug, thiserror::Error)]
#[error("invalid colour {0:?}, expected #rrggbb or #rgb")]
pub struct ParseColorError(String);

impl FromStr for Rgb {
	type Err = ParseColorError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let hex = s.trim().trim_start_matches('#');
		let err = || ParseColorError(s.to_owned());
		if !hex.is_ascii() {
			return Err(err());
		}
		let channel = |h: &str| u8::from_str_radix(h, 16).map_err(|_| err());
		match hex.len() {
			6 => Ok(Rgb::new(channel(&hex[0..2])?, channel(&hex[2..4])?, channel(&hex[4..6])?)),
			// #abc is shorthand for #aabbcc
			3 => {
				let short = |i: usize| channel(&hex[i..i + 1]).map(|v| v * 17);
				Ok(Rgb::new(short(0)?, short(1)?, short(2)?))
			}
			_ => Err(err()),
		}
	}
}

impl fmt::Display for Rgb {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
	}
}

impl<'de> Deserialize<'de> for Rgb {
	fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
	where
		D: Deserializer<'de>, {
		let s = String::deserialize(deserializer)?;
		s.parse().map_err(serde::de::Error::custom)
	}
}

/// Everything that shapes one render pass. Values outside the ranges a form would offer are
/// accepted; the compositor degrades them to "nothing visible" rather than failing.
#[derive(Clone, Debug, PartialEq)]
pub struct WatermarkParameters {
	pub text: String,
	pub font_size_px: f32,
	/// Number of stamp attempts, not of visible stamps.
	pub density: u32,
	pub color: Rgb,
	pub opacity: f32,
	pub avoidance_radius_px: f32,
}

impl Default for WatermarkParameters {
	fn default() -> Self {
		Self {
			text: DEFAULT_TEXT.to_owned(),
			font_size_px: 2.0,
			density: 20_000,
			color: Rgb::WHITE,
			opacity: 0.1,
			avoidance_radius_px: 100.0,
		}
	}
}

impl WatermarkParameters {
	/// Fill colour with opacity folded into the alpha channel.
	pub fn paint_rgba(&self) -> [u8; 4] {
		let alpha = (self.opacity.clamp(0.0, 1.0) * 255.0).round() as u8;
		[self.color.r, self.color.g, self.color.b, alpha]
	}

	pub fn radius_squared(&self) -> f32 {
		let r = self.avoidance_radius_px.max(0.0);
		r * r
	}
}

/// Centre of the disk in which no stamp is placed, in surface pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize, new)]
pub struct ExclusionZone {
	#[serde(alias = "x")]
	pub center_x: f32,
	#[serde(alias = "y")]
	pub center_y: f32,
}

impl ExclusionZone {
	/// Maps a pointer position given in display coordinates onto the surface's native pixel grid.
	///
	/// The surface may be shown scaled; the ratio of native to displayed size converts between the two.
	/// Returns `None` when the display has no area.
	pub fn from_display_point(x: f32, y: f32, display_width: f32, display_height: f32, surface_width: u32, surface_height: u32) -> Option<Self> {
		if display_width <= 0.0 || display_height <= 0.0 {
			return None;
		}
		let scale_x = surface_width as f32 / display_width;
		let scale_y = surface_height as f32 / display_height;
		Some(Self::new(x * scale_x, y * scale_y))
	}

	/// Whether `(x, y)` lies strictly inside the disk of squared radius `radius_sq`.
	pub fn excludes(&self, x: f32, y: f32, radius_sq: f32) -> bool {
		let dx = x - self.center_x;
		let dy = y - self.center_y;
		dx * dx + dy * dy < radius_sq
	}
}

#[derive(Debug, thiserror::Error)]
#[error("invalid zone {0:?}, expected X,Y")]
pub struct ParseZoneError(String);

impl FromStr for ExclusionZone {
	type Err = ParseZoneError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let err = || ParseZoneError(s.to_owned());
		let (x, y) = s.split_once(',').ok_or_else(err)?;
		let x = x.trim().parse::<f32>().map_err(|_| err())?;
		let y = y.trim().parse::<f32>().map_err(|_| err())?;
		Ok(Self::new(x, y))
	}
}
