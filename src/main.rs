use std::{
	path::{Path, PathBuf},
	sync::Arc,
};

use clap::Parser;
use color_eyre::{
	Result,
	eyre::{WrapErr as _, eyre},
};
use microprint::{
	Compositor, ExclusionZone, ExportFormat, Rgb, Upload, UploadOrigin, WatermarkParameters,
	config::AppConfig,
	loader,
	pipeline::{self, PassInput, PassOutput},
	session::{PassOutcome, Scheduled, Session},
};
use rand::{SeedableRng as _, rngs::StdRng};
use serde::Deserialize;
use tokio::{
	io::{AsyncBufReadExt as _, BufReader},
	sync::mpsc,
};
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "microprint")]
#[command(about = "Stamp repeated microprint text over an image")]
struct Args {
	/// Path to input image file. If not provided, uses the last input file from cache.
	input: Option<PathBuf>,
	/// Where to write the result [default: microprinted-image.<format extension>]
	#[arg(short, long)]
	output: Option<PathBuf>,
	/// Explicit config file, layered over the XDG ones
	#[arg(long)]
	config: Option<PathBuf>,
	#[arg(long)]
	text: Option<String>,
	#[arg(long)]
	font_size: Option<f32>,
	/// Number of stamp attempts
	#[arg(long)]
	density: Option<u32>,
	/// Stamp colour as #rrggbb
	#[arg(long)]
	color: Option<Rgb>,
	/// 0.0 (invisible) to 1.0 (opaque)
	#[arg(long)]
	opacity: Option<f32>,
	/// Radius of the avoidance zone in image pixels
	#[arg(long)]
	radius: Option<f32>,
	/// Centre of the avoidance zone in image pixels, as X,Y
	#[arg(long)]
	zone: Option<ExclusionZone>,
	#[arg(long, value_enum)]
	format: Option<ExportFormat>,
	/// Seed stamp placement for reproducible output (one-shot mode only)
	#[arg(long)]
	seed: Option<u64>,
	/// Also print the result as a data: URL
	#[arg(long)]
	data_url: bool,
	/// Read JSON edit commands from stdin, one per line, re-rendering after each quiet period
	#[arg(long)]
	interactive: bool,
}

/// One line of the interactive protocol. Every field is optional; present ones are applied in order.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct EditCommand {
	image: Option<PathBuf>,
	text: Option<String>,
	font_size: Option<f32>,
	density: Option<u32>,
	color: Option<Rgb>,
	opacity: Option<f32>,
	radius: Option<f32>,
	format: Option<ExportFormat>,
	zone: Option<ExclusionZone>,
	click: Option<Click>,
	clear_zone: bool,
}

#[derive(Debug, Deserialize)]
struct Click {
	x: f32,
	y: f32,
	display_width: f32,
	display_height: f32,
}

fn get_cache_file_path() -> Result<PathBuf> {
	let cache_home = xdg::BaseDirectories::with_prefix(env!("CARGO_PKG_NAME"))
		.get_cache_home()
		.ok_or_else(|| eyre!("Could not determine cache directory"))?;
	Ok(cache_home.join("last_input.txt"))
}

fn save_last_input(path: &Path) -> Result<()> {
	let cache_path = get_cache_file_path()?;
	if let Some(parent) = cache_path.parent() {
		std::fs::create_dir_all(parent)?;
	}
	let absolute = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_owned());
	std::fs::write(&cache_path, absolute.to_string_lossy().as_bytes())?;
	Ok(())
}

fn load_last_input() -> Result<PathBuf> {
	let cache_path = get_cache_file_path()?;
	let content = std::fs::read_to_string(&cache_path).map_err(|_| {
		eyre!(
			"No input file provided and no cached input file found.\n\
			Please provide an input file: microprint <path-to-image>"
		)
	})?;
	Ok(PathBuf::from(content.trim()))
}

fn init_tracing() {
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
	tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn main() {
	if let Err(e) = run() {
		eprintln!("Error: {e:?}");
		std::process::exit(1);
	}
}

fn run() -> Result<()> {
	color_eyre::install()?;
	init_tracing();
	let args = Args::parse();

	// Determine input path: use provided arg or load from cache
	let input_path = match &args.input {
		Some(path) => path.clone(),
		None => load_last_input()?,
	};

	let mut config = AppConfig::read(args.config.as_deref())?;
	let params = apply_overrides(config.params(), &args);
	let format = args.format.unwrap_or(config.format);
	// unset: named after whichever format each pass was encoded in
	if let Some(output) = &args.output {
		config.output = Some(output.clone());
	}
	let compositor = Arc::new(Compositor::new(&config.font_family, &config.font_files));

	if args.interactive {
		let bytes = std::fs::read(&input_path).wrap_err_with(|| format!("Failed to read {}", input_path.display()))?;
		let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
		runtime.block_on(async {
			let (mut session, rx) = Session::new(compositor, params, config.debounce());
			session.set_format(format);
			session.upload(Upload { bytes, origin: UploadOrigin::Picker })?;
			if let Some(zone) = args.zone {
				session.set_zone(zone);
			}
			interactive(session, rx, &config, args.data_url).await
		})?;
	} else {
		let source = loader::load_path(&input_path)?;
		let input = PassInput {
			source: Arc::new(source),
			params,
			zone: args.zone,
			format,
		};
		let output = match args.seed {
			Some(seed) => pipeline::run_pass_with_rng(&compositor, &input, &mut StdRng::seed_from_u64(seed))?,
			None => pipeline::run_pass(&compositor, &input)?,
		};
		write_output(&output, &config, args.data_url)?;
	}

	// Save the input path to cache for next time
	save_last_input(&input_path)?;

	Ok(())
}

fn apply_overrides(mut params: WatermarkParameters, args: &Args) -> WatermarkParameters {
	if let Some(text) = &args.text {
		params.text = text.clone();
	}
	if let Some(font_size) = args.font_size {
		params.font_size_px = font_size;
	}
	if let Some(density) = args.density {
		params.density = density;
	}
	if let Some(color) = args.color {
		params.color = color;
	}
	if let Some(opacity) = args.opacity {
		params.opacity = opacity;
	}
	if let Some(radius) = args.radius {
		params.avoidance_radius_px = radius;
	}
	params
}

fn write_output(output: &PassOutput, config: &AppConfig, data_url: bool) -> Result<()> {
	let path = config.output_path(output.format);
	std::fs::write(&path, &output.bytes).wrap_err_with(|| format!("Failed to write {}", path.display()))?;
	println!(
		"Wrote {}x{} image to {} ({} of {} stamps placed)",
		output.width,
		output.height,
		path.display(),
		output.report.stamps.len(),
		output.report.attempts
	);
	if let Some(zone) = output.zone {
		println!("Avoidance zone at ({:.1}, {:.1})", zone.center_x, zone.center_y);
	}
	if data_url {
		println!("{}", output.data_url());
	}
	Ok(())
}

async fn interactive(mut session: Session, mut rx: mpsc::UnboundedReceiver<Scheduled<PassInput>>, config: &AppConfig, data_url: bool) -> Result<()> {
	let busy = session.subscribe_busy();
	let mut lines = BufReader::new(tokio::io::stdin()).lines();
	let mut stdin_open = true;

	loop {
		tokio::select! {
			line = lines.next_line(), if stdin_open => match line? {
				Some(line) if line.trim().is_empty() => {}
				Some(line) => match serde_json::from_str::<EditCommand>(&line) {
					Ok(command) => apply_command(&mut session, command),
					Err(e) => warn!(error = %e, "ignoring malformed command"),
				},
				None => {
					stdin_open = false;
					if !*busy.borrow() {
						break;
					}
				}
			},
			Some(scheduled) = rx.recv() => {
				match session.execute(scheduled).await {
					PassOutcome::Committed(output) => write_output(&output, config, data_url)?,
					PassOutcome::Superseded => {}
					// the session keeps its last good output; keep taking commands
					PassOutcome::Failed(e) => eprintln!("Render failed: {e}"),
				}
				if !stdin_open && !*busy.borrow() {
					break;
				}
			}
		}
	}
	Ok(())
}

fn apply_command(session: &mut Session, command: EditCommand) {
	let EditCommand {
		image,
		text,
		font_size,
		density,
		color,
		opacity,
		radius,
		format,
		zone,
		click,
		clear_zone,
	} = command;

	if let Some(path) = image {
		let upload = std::fs::read(&path).map(|bytes| Upload { bytes, origin: UploadOrigin::Picker });
		match upload.map_err(|e| e.to_string()).and_then(|upload| session.upload(upload).map_err(|e| e.to_string())) {
			Ok(_) => {}
			Err(e) => warn!(path = %path.display(), error = %e, "could not load image"),
		}
	}

	if text.is_some() || font_size.is_some() || density.is_some() || color.is_some() || opacity.is_some() || radius.is_some() {
		session.update_params(|params| {
			if let Some(text) = text {
				params.text = text;
			}
			if let Some(font_size) = font_size {
				params.font_size_px = font_size;
			}
			if let Some(density) = density {
				params.density = density;
			}
			if let Some(color) = color {
				params.color = color;
			}
			if let Some(opacity) = opacity {
				params.opacity = opacity;
			}
			if let Some(radius) = radius {
				params.avoidance_radius_px = radius;
			}
		});
	}

	if let Some(format) = format {
		session.set_format(format);
	}
	if let Some(zone) = zone {
		session.set_zone(zone);
	}
	if let Some(click) = click {
		if session.click(click.x, click.y, click.display_width, click.display_height).is_none() {
			warn!("click ignored: no image loaded or empty display area");
		}
	}
	if clear_zone {
		session.clear_zone();
	}
}
