use std::{path::PathBuf, sync::Arc};

use derive_new::new;
use rand::Rng;
use tiny_skia::{FillRule, FilterQuality, Paint, PathBuilder, Pixmap, PixmapPaint, Stroke, Transform};
use tracing::{debug, warn};

use crate::{
	params::{ExclusionZone, WatermarkParameters},
	surface::RasterSurface,
};

pub const DEFAULT_FONT_FAMILY: &str = "sans-serif";

/// Families tried, in order, to back the generic `sans-serif` when the fontdb default (Arial) is missing.
const SANS_SERIF_CANDIDATES: [&str; 5] = ["Arial", "DejaVu Sans", "Liberation Sans", "Noto Sans", "FreeSans"];

const GUIDE_RING_RGBA: [u8; 4] = [255, 100, 100, 179];
const GUIDE_RING_WIDTH: f32 = 2.0;
const GUIDE_DOT_RGBA: [u8; 4] = [255, 0, 0, 204];
const GUIDE_DOT_RADIUS: f32 = 5.0;

/// Anchor of one stamp: left edge of the text, on its baseline.
#[derive(Clone, Copy, Debug, PartialEq, new)]
pub struct Stamp {
	pub x: f32,
	pub y: f32,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct StampReport {
	pub attempts: u32,
	pub discarded: u32,
	pub stamps: Vec<Stamp>,
}

#[derive(Clone, Debug)]
pub struct Composite {
	pub surface: RasterSurface,
	pub report: StampReport,
}

/// Stamps watermark text over copies of source surfaces.
///
/// Holds only the font setup; every call to [`Compositor::render`] is independent of the previous ones.
#[derive(Clone)]
pub struct Compositor {
	fontdb: Arc<fontdb::Database>,
	font_family: String,
}

impl Default for Compositor {
	fn default() -> Self {
		Self::new(DEFAULT_FONT_FAMILY, &[])
	}
}

impl Compositor {
	/// System fonts plus `font_files`. Unreadable extra files are skipped with a warning.
	pub fn new(font_family: &str, font_files: &[PathBuf]) -> Self {
		let mut fontdb = fontdb::Database::new();
		fontdb.load_system_fonts();
		for path in font_files {
			if let Err(e) = fontdb.load_font_file(path) {
				warn!(path = %path.display(), error = %e, "could not load font file");
			}
		}
		if let Some(family) = SANS_SERIF_CANDIDATES.into_iter().find(|name| fontdb.faces().any(|face| face.families.iter().any(|(f, _)| f == name))) {
			fontdb.set_sans_serif_family(family);
		}
		debug!(faces = fontdb.len(), family = font_family, "font database ready");
		Self::with_fontdb(Arc::new(fontdb), font_family)
	}

	pub fn with_fontdb(fontdb: Arc<fontdb::Database>, font_family: &str) -> Self {
		Self {
			fontdb,
			font_family: font_family.to_owned(),
		}
	}

	pub fn render(&self, source: &RasterSurface, params: &WatermarkParameters, zone: Option<&ExclusionZone>) -> Composite {
		self.render_with_rng(source, params, zone, &mut rand::rng())
	}

	/// Like [`Compositor::render`], drawing stamp positions from `rng`.
	pub fn render_with_rng<R: Rng + ?Sized>(&self, source: &RasterSurface, params: &WatermarkParameters, zone: Option<&ExclusionZone>, rng: &mut R) -> Composite {
		let mut surface = source.clone();
		let (width, height) = (source.width(), source.height());
		// tiny-skia refuses zero-sized pixmaps, which doubles as the zero-area check
		let Some(mut overlay) = Pixmap::new(width, height) else {
			debug!(width, height, "zero-area surface, nothing to stamp");
			return Composite { surface, report: StampReport::default() };
		};

		let sprite = self.stamp_sprite(params);
		let radius_sq = params.radius_squared();
		let sprite_paint = PixmapPaint {
			quality: FilterQuality::Bilinear,
			..PixmapPaint::default()
		};

		let mut report = StampReport {
			attempts: params.density,
			discarded: 0,
			stamps: Vec::with_capacity(params.density as usize),
		};
		for _ in 0..params.density {
			let x = rng.random::<f32>() * width as f32;
			let y = rng.random::<f32>() * height as f32;
			if zone.is_some_and(|zone| zone.excludes(x, y, radius_sq)) {
				report.discarded += 1;
				continue;
			}
			if let Some(sprite) = &sprite {
				let transform = Transform::from_translate(x - sprite.origin_x, y - sprite.origin_y);
				overlay.draw_pixmap(0, 0, sprite.pixmap.as_ref(), &sprite_paint, transform, None);
			}
			report.stamps.push(Stamp::new(x, y));
		}

		// after the stamps, so text never covers the guides
		if let Some(zone) = zone {
			draw_guides(&mut overlay, zone, params.avoidance_radius_px);
		}

		blend_over(&mut surface, &overlay);
		debug!(
			attempts = report.attempts,
			stamped = report.stamps.len(),
			discarded = report.discarded,
			"composited watermark"
		);
		Composite { surface, report }
	}

	/// Lays the text out once so each stamp is a single pixmap blit.
	fn stamp_sprite(&self, params: &WatermarkParameters) -> Option<StampSprite> {
		let text = sanitize_text(&params.text);
		let [r, g, b, a] = params.paint_rgba();
		let size = params.font_size_px;
		if text.trim().is_empty() || a == 0 || !size.is_finite() || size <= 0.0 {
			return None;
		}

		let padding = 2.0_f32;
		let ascent_room = (size * 1.25).ceil();
		let descent_room = (size * 0.5).ceil();
		// layout room of 2em per char covers emoji and wide glyphs; the sprite is trimmed to the laid-out text below
		let layout_width = (text.chars().count() as f32 * size * 2.0).ceil() + 2.0 * padding;
		let height = ascent_room + descent_room + 2.0 * padding;
		let origin_x = padding;
		let origin_y = padding + ascent_room;

		let svg = format!(
			r#"<svg width="{layout_width}" height="{height}" xmlns="http://www.w3.org/2000/svg">
  <text x="{origin_x}" y="{origin_y}" font-family="{family}" font-size="{size}" fill="rgb({r},{g},{b})" fill-opacity="{opacity}" xml:space="preserve">{text}</text>
</svg>"#,
			family = escape_xml(&self.font_family),
			opacity = a as f32 / 255.0,
			text = escape_xml(&text),
		);

		let mut options = usvg::Options::default();
		options.fontdb = self.fontdb.clone();
		options.font_family = self.font_family.clone();
		let tree = match usvg::Tree::from_str(&svg, &options) {
			Ok(tree) => tree,
			Err(e) => {
				warn!(error = %e, "could not lay out watermark text, stamping nothing");
				return None;
			}
		};

		let text_right = tree.root().abs_bounding_box().right();
		let width = if text_right.is_finite() && text_right > 0.0 {
			(text_right.ceil() + padding).min(layout_width)
		} else {
			layout_width
		};
		let Some(mut pixmap) = Pixmap::new(width as u32, height as u32) else {
			warn!(width, height, "watermark text too large to rasterize");
			return None;
		};
		resvg::render(&tree, Transform::default(), &mut pixmap.as_mut());
		Some(StampSprite { pixmap, origin_x, origin_y })
	}
}

struct StampSprite {
	pixmap: Pixmap,
	/// Sprite pixel that corresponds to the text's left baseline point.
	origin_x: f32,
	origin_y: f32,
}

/// Single-line text safe to embed in XML. Line breaks and other controls become spaces, as a canvas
/// `fillText` collapses them; noncharacters XML cannot carry are dropped.
fn sanitize_text(text: &str) -> String {
	text.chars()
		.filter(|c| !matches!(c, '\u{FFFE}' | '\u{FFFF}'))
		.map(|c| if c.is_control() { ' ' } else { c })
		.collect()
}

fn escape_xml(s: &str) -> String {
	s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;").replace('"', "&quot;").replace('\'', "&apos;")
}

fn draw_guides(overlay: &mut Pixmap, zone: &ExclusionZone, radius: f32) {
	let mut paint = Paint::default();
	paint.anti_alias = true;

	// a zero radius yields no path, and nothing to outline
	if let Some(ring) = PathBuilder::from_circle(zone.center_x, zone.center_y, radius.max(0.0)) {
		let [r, g, b, a] = GUIDE_RING_RGBA;
		paint.set_color_rgba8(r, g, b, a);
		let stroke = Stroke {
			width: GUIDE_RING_WIDTH,
			..Stroke::default()
		};
		overlay.stroke_path(&ring, &paint, &stroke, Transform::identity(), None);
	}

	if let Some(dot) = PathBuilder::from_circle(zone.center_x, zone.center_y, GUIDE_DOT_RADIUS) {
		let [r, g, b, a] = GUIDE_DOT_RGBA;
		paint.set_color_rgba8(r, g, b, a);
		overlay.fill_path(&dot, &paint, FillRule::Winding, Transform::identity(), None);
	}
}

/// Source-over of a premultiplied overlay onto a straight-alpha surface.
/// Untouched (fully transparent) overlay pixels leave the surface bit-identical.
fn blend_over(surface: &mut RasterSurface, overlay: &Pixmap) {
	for (dst, src) in surface.as_raw_mut().chunks_exact_mut(4).zip(overlay.pixels()) {
		let src_alpha = src.alpha();
		if src_alpha == 0 {
			continue;
		}
		let sa = src_alpha as f32 / 255.0;
		let da = dst[3] as f32 / 255.0;
		let out_alpha = sa + da * (1.0 - sa);
		for (channel, src_premul) in dst.iter_mut().take(3).zip([src.red(), src.green(), src.blue()]) {
			let premul = src_premul as f32 / 255.0 + *channel as f32 / 255.0 * da * (1.0 - sa);
			*channel = (premul / out_alpha * 255.0).round().clamp(0.0, 255.0) as u8;
		}
		dst[3] = (out_alpha * 255.0).round() as u8;
	}
}

#[cfg(test)]
mod tests {
	use rand::{SeedableRng, rngs::StdRng};

	use super::*;
	use crate::params::Rgb;

	/// No fonts: placement and guide marks are still exercised, glyphs are not.
	fn fontless() -> Compositor {
		Compositor::with_fontdb(Arc::new(fontdb::Database::new()), DEFAULT_FONT_FAMILY)
	}

	fn scenario_params(density: u32) -> WatermarkParameters {
		WatermarkParameters {
			text: "X".to_owned(),
			font_size_px: 5.0,
			density,
			color: Rgb::WHITE,
			opacity: 1.0,
			avoidance_radius_px: 20.0,
		}
	}

	fn gradient(width: u32, height: u32) -> RasterSurface {
		RasterSurface::from(image::RgbaImage::from_fn(width, height, |x, y| image::Rgba([x as u8, y as u8, (x ^ y) as u8, (x * 2) as u8])))
	}

	#[test]
	fn zero_density_without_zone_is_identity() {
		let source = gradient(64, 48);
		let out = fontless().render(&source, &scenario_params(0), None);
		assert_eq!(out.surface, source);
		assert!(out.report.stamps.is_empty());
	}

	#[test]
	fn every_attempt_stamps_without_zone() {
		let source = RasterSurface::filled(100, 100, [0, 0, 0, 255]);
		let mut rng = StdRng::seed_from_u64(7);
		let out = fontless().render_with_rng(&source, &scenario_params(1000), None, &mut rng);
		assert_eq!(out.report.attempts, 1000);
		assert_eq!(out.report.stamps.len(), 1000);
		assert_eq!(out.report.discarded, 0);
		assert_eq!((out.surface.width(), out.surface.height()), (100, 100));
		for stamp in &out.report.stamps {
			assert!((0.0..100.0).contains(&stamp.x) && (0.0..100.0).contains(&stamp.y));
		}
	}

	#[test]
	fn no_stamp_lands_inside_the_zone() {
		let source = RasterSurface::filled(100, 100, [0, 0, 0, 255]);
		let zone = ExclusionZone::new(50.0, 50.0);
		let params = scenario_params(1000);
		let mut total_discarded = 0;
		for seed in 0..50 {
			let mut rng = StdRng::seed_from_u64(seed);
			let out = fontless().render_with_rng(&source, &params, Some(&zone), &mut rng);
			assert_eq!(out.report.stamps.len() as u32 + out.report.discarded, 1000);
			for stamp in &out.report.stamps {
				let (dx, dy) = (stamp.x - 50.0, stamp.y - 50.0);
				assert!(dx * dx + dy * dy >= 400.0, "stamp at {stamp:?} is inside the zone");
			}
			total_discarded += out.report.discarded;
		}
		// disk covers ~12.6% of the image
		assert!(total_discarded > 50 * 60);
	}

	#[test]
	fn zero_radius_zone_discards_nothing() {
		let source = RasterSurface::filled(100, 100, [0, 0, 0, 255]);
		let zone = ExclusionZone::new(50.0, 50.0);
		let params = WatermarkParameters {
			avoidance_radius_px: 0.0,
			..scenario_params(5000)
		};
		let out = fontless().render_with_rng(&source, &params, Some(&zone), &mut StdRng::seed_from_u64(3));
		assert_eq!(out.report.discarded, 0);
		assert_eq!(out.report.stamps.len(), 5000);
	}

	#[test]
	fn zone_draws_guide_marks() {
		let source = RasterSurface::filled(100, 100, [0, 0, 0, 255]);
		let zone = ExclusionZone::new(50.0, 50.0);
		let out = fontless().render(&source, &scenario_params(0), Some(&zone));

		let [r, g, b, a] = out.surface.pixel(50, 50).unwrap();
		assert!((195..=210).contains(&r), "centre dot red channel was {r}");
		assert_eq!((g, b, a), (0, 0, 255));

		// on the ring, left of centre
		let ring = out.surface.pixel(30, 50).unwrap();
		assert!(ring[0] > 100 && ring[1] > 30, "ring pixel was {ring:?}");

		// well away from both marks
		assert_eq!(out.surface.pixel(5, 5), Some([0, 0, 0, 255]));
	}

	#[test]
	fn zero_area_surface_is_a_no_op() {
		let source = RasterSurface::new(0, 10);
		let out = fontless().render(&source, &scenario_params(1000), Some(&ExclusionZone::new(0.0, 0.0)));
		assert!(out.surface.is_empty());
		assert_eq!(out.report, StampReport::default());
	}

	#[test]
	fn render_leaves_source_untouched() {
		let source = gradient(32, 32);
		let before = source.clone();
		let _ = fontless().render(&source, &scenario_params(100), Some(&ExclusionZone::new(16.0, 16.0)));
		assert_eq!(source, before);
	}

	/// Compositor backed by system fonts, or `None` (with a note) on a machine without any.
	fn with_system_fonts(test: &str) -> Option<Compositor> {
		let compositor = Compositor::default();
		if compositor.fontdb.is_empty() {
			eprintln!("{test}: no system fonts installed, glyph rendering not checked");
			return None;
		}
		Some(compositor)
	}

	#[test]
	fn glyphs_reach_the_surface_when_fonts_exist() {
		let Some(compositor) = with_system_fonts("glyphs_reach_the_surface_when_fonts_exist") else {
			return;
		};
		let source = RasterSurface::filled(200, 200, [0, 0, 0, 255]);
		let params = WatermarkParameters {
			text: "MMMM".to_owned(),
			font_size_px: 24.0,
			density: 200,
			opacity: 1.0,
			..WatermarkParameters::default()
		};
		let out = compositor.render_with_rng(&source, &params, None, &mut StdRng::seed_from_u64(11));
		assert_ne!(out.surface, source);
	}

	#[test]
	fn wide_text_is_not_clipped_by_the_sprite() {
		let Some(compositor) = with_system_fonts("wide_text_is_not_clipped_by_the_sprite") else {
			return;
		};
		let params = WatermarkParameters {
			text: "WWWW\u{2014}\u{2014}".to_owned(),
			font_size_px: 20.0,
			opacity: 1.0,
			..WatermarkParameters::default()
		};
		let sprite = compositor.stamp_sprite(&params).unwrap();
		let (width, height) = (sprite.pixmap.width(), sprite.pixmap.height());
		// the rightmost column is padding, so ink never touches it
		let right_column_ink = (0..height).filter_map(|y| sprite.pixmap.pixel(width - 1, y)).any(|p| p.alpha() > 0);
		assert!(!right_column_ink);
		assert!(sprite.pixmap.pixels().iter().any(|p| p.alpha() > 0));
	}

	#[test]
	fn controls_in_text_become_spaces() {
		assert_eq!(sanitize_text("a\nb\r\tc\u{1}d\u{FFFF}"), "a b  c d");
		assert_eq!(sanitize_text("plain & <safe>"), "plain & <safe>");
	}

	#[test]
	fn control_characters_still_produce_a_sprite() {
		let params = WatermarkParameters {
			text: "SECRET\u{1}\u{7}TEXT".to_owned(),
			opacity: 1.0,
			..scenario_params(0)
		};
		assert!(fontless().stamp_sprite(&params).is_some());
	}

	#[test]
	fn blending_respects_translucent_destination() {
		let mut surface = RasterSurface::filled(1, 1, [0, 0, 255, 0]);
		let mut overlay = Pixmap::new(1, 1).unwrap();
		overlay.fill(tiny_skia::Color::from_rgba8(255, 0, 0, 128));
		blend_over(&mut surface, &overlay);
		// transparent destination takes the source colour un-premultiplied
		assert_eq!(surface.pixel(0, 0), Some([255, 0, 0, 128]));
	}
}
