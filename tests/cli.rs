use std::{io::Cursor, path::Path};

use assert_cmd::Command;
use image::{ImageFormat, Rgba, RgbaImage};
use predicates::prelude::*;
use tempfile::TempDir;

fn write_png(path: &Path, width: u32, height: u32) -> RgbaImage {
	let img = RgbaImage::from_fn(width, height, |x, y| Rgba([x as u8, y as u8, 90, 255]));
	let mut bytes = Cursor::new(Vec::new());
	img.write_to(&mut bytes, ImageFormat::Png).unwrap();
	std::fs::write(path, bytes.into_inner()).unwrap();
	img
}

/// Isolates config and the last-input cache from the real home directory.
fn microprint(home: &TempDir) -> Command {
	let mut cmd = Command::cargo_bin("microprint").unwrap();
	cmd.env("XDG_CONFIG_HOME", home.path().join("config"))
		.env("XDG_CACHE_HOME", home.path().join("cache"))
		.env("RUST_LOG", "warn")
		.env_remove("MICROPRINT_DENSITY")
		.env_remove("MICROPRINT_TEXT");
	cmd
}

#[test]
fn zero_density_reproduces_the_input() {
	let home = TempDir::new().unwrap();
	let input = home.path().join("in.png");
	let output = home.path().join("out.png");
	let original = write_png(&input, 100, 100);

	microprint(&home)
		.arg(&input)
		.arg("-o")
		.arg(&output)
		.args(["--density", "0"])
		.assert()
		.success()
		.stdout(predicate::str::contains("0 of 0 stamps placed"));

	let written = image::open(&output).unwrap().to_rgba8();
	assert_eq!(written, original);
}

#[test]
fn zone_is_echoed_and_drawn() {
	let home = TempDir::new().unwrap();
	let input = home.path().join("in.png");
	let output = home.path().join("out.png");
	let original = write_png(&input, 100, 100);

	microprint(&home)
		.arg(&input)
		.arg("-o")
		.arg(&output)
		.args(["--text", "X", "--font-size", "5", "--density", "1000", "--color", "#ffffff", "--opacity", "1"])
		.args(["--zone", "50,50", "--radius", "20", "--seed", "42"])
		.assert()
		.success()
		.stdout(predicate::str::contains("Avoidance zone at (50.0, 50.0)"));

	let written = image::open(&output).unwrap().to_rgba8();
	assert_eq!(written.dimensions(), (100, 100));
	// centre dot is painted red over the source
	let centre = written.get_pixel(50, 50);
	assert!(centre[0] > original.get_pixel(50, 50)[0] && centre[1] < original.get_pixel(50, 50)[1]);
}

#[test]
fn non_image_input_fails_cleanly() {
	let home = TempDir::new().unwrap();
	let input = home.path().join("notes.png");
	std::fs::write(&input, "this is not an image").unwrap();

	microprint(&home)
		.arg(&input)
		.arg("-o")
		.arg(home.path().join("out.png"))
		.assert()
		.failure()
		.stderr(predicate::str::contains("not a decodable image"));
	assert!(!home.path().join("out.png").exists());
}

#[test]
fn reuses_last_input_when_none_given() {
	let home = TempDir::new().unwrap();
	let input = home.path().join("in.png");
	write_png(&input, 12, 8);

	microprint(&home).arg(&input).arg("-o").arg(home.path().join("first.png")).args(["--density", "10"]).assert().success();

	microprint(&home)
		.arg("-o")
		.arg(home.path().join("second.png"))
		.args(["--density", "10"])
		.assert()
		.success()
		.stdout(predicate::str::contains("12x8"));
}

#[test]
fn missing_input_without_cache_explains_itself() {
	let home = TempDir::new().unwrap();
	microprint(&home).assert().failure().stderr(predicate::str::contains("No input file provided"));
}

#[test]
fn data_url_is_printed_on_request() {
	let home = TempDir::new().unwrap();
	let input = home.path().join("in.png");
	write_png(&input, 4, 4);

	microprint(&home)
		.arg(&input)
		.arg("-o")
		.arg(home.path().join("out.png"))
		.args(["--density", "0", "--data-url"])
		.assert()
		.success()
		.stdout(predicate::str::contains("data:image/png;base64,"));
}

#[test]
fn interactive_mode_renders_after_edits() {
	let home = TempDir::new().unwrap();
	let input = home.path().join("in.png");
	let output = home.path().join("out.png");
	write_png(&input, 60, 40);

	microprint(&home)
		.arg(&input)
		.arg("-o")
		.arg(&output)
		.args(["--interactive", "--density", "0"])
		.write_stdin("{\"density\": 50}\n{\"click\": {\"x\": 15, \"y\": 10, \"display_width\": 30, \"display_height\": 20}}\nnot json\n")
		.assert()
		.success()
		.stdout(predicate::str::contains("Avoidance zone at (30.0, 20.0)"));

	assert_eq!(image::open(&output).unwrap().to_rgba8().dimensions(), (60, 40));
}

#[test]
fn default_output_name_follows_format() {
	let home = TempDir::new().unwrap();
	let input = home.path().join("in.png");
	write_png(&input, 4, 4);

	microprint(&home)
		.current_dir(home.path())
		.arg(&input)
		.args(["--format", "bmp", "--density", "0"])
		.assert()
		.success()
		.stdout(predicate::str::contains("microprinted-image.bmp"));

	let written = std::fs::read(home.path().join("microprinted-image.bmp")).unwrap();
	assert_eq!(&written[..2], b"BM");
	assert!(!home.path().join("microprinted-image.png").exists());
}

#[test]
fn interactive_format_switch_renames_output() {
	let home = TempDir::new().unwrap();
	let input = home.path().join("in.png");
	write_png(&input, 6, 6);

	microprint(&home)
		.current_dir(home.path())
		.arg(&input)
		.args(["--interactive", "--density", "0"])
		.write_stdin("{\"format\": \"bmp\"}\n")
		.assert()
		.success()
		.stdout(predicate::str::contains("microprinted-image.bmp"));

	assert_eq!(&std::fs::read(home.path().join("microprinted-image.bmp")).unwrap()[..2], b"BM");
}
