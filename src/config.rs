use std::{
	path::{Path, PathBuf},
	time::Duration,
};

use color_eyre::eyre::{Result, WrapErr as _};
use serde::Deserialize;

use crate::{
	compositor::DEFAULT_FONT_FAMILY,
	export::ExportFormat,
	params::{Rgb, WatermarkParameters},
	session::DEFAULT_DEBOUNCE,
};

/// Application settings: built-in defaults, then XDG config files, then an explicit file, then
/// `MICROPRINT_*` environment variables.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct AppConfig {
	pub text: String,
	pub font_size: f32,
	pub density: u32,
	pub color: Rgb,
	pub opacity: f32,
	pub avoidance_radius: f32,
	pub debounce_ms: u64,
	pub font_family: String,
	pub font_files: Vec<PathBuf>,
	pub format: ExportFormat,
	/// Unset means a name derived from the export format.
	pub output: Option<PathBuf>,
}

impl Default for AppConfig {
	fn default() -> Self {
		let params = WatermarkParameters::default();
		Self {
			text: params.text,
			font_size: params.font_size_px,
			density: params.density,
			color: params.color,
			opacity: params.opacity,
			avoidance_radius: params.avoidance_radius_px,
			debounce_ms: DEFAULT_DEBOUNCE.as_millis() as u64,
			font_family: DEFAULT_FONT_FAMILY.to_owned(),
			font_files: Vec::new(),
			format: ExportFormat::default(),
			output: None,
		}
	}
}

impl AppConfig {
	pub fn read(path: Option<&Path>) -> Result<Self> {
		let app_name = env!("CARGO_PKG_NAME");
		let mut builder = config::Config::builder();

		if let Some(config_home) = xdg::BaseDirectories::with_prefix(app_name).get_config_home() {
			// config_home already carries the app prefix
			let config_home = config_home.display().to_string();
			let locations = [config_home.trim_end_matches('/').to_owned(), format!("{}/config", config_home.trim_end_matches('/'))];
			for location in locations.iter() {
				builder = builder.add_source(config::File::with_name(location).required(false));
			}
		}

		if let Some(path) = path {
			let path_str = path.display().to_string();
			builder = builder.add_source(config::File::with_name(&path_str).required(true));
		}

		builder = builder.add_source(config::Environment::with_prefix("MICROPRINT"));
		let raw: config::Config = builder.build()?;
		raw.try_deserialize().wrap_err("Config file is invalid")
	}

	pub fn params(&self) -> WatermarkParameters {
		WatermarkParameters {
			text: self.text.clone(),
			font_size_px: self.font_size,
			density: self.density,
			color: self.color,
			opacity: self.opacity,
			avoidance_radius_px: self.avoidance_radius,
		}
	}

	/// Explicit path when configured, else the suggested name for `format`.
	pub fn output_path(&self, format: ExportFormat) -> PathBuf {
		self.output.clone().unwrap_or_else(|| PathBuf::from(format.suggested_filename()))
	}

	pub fn debounce(&self) -> Duration {
		Duration::from_millis(self.debounce_ms)
	}
}
