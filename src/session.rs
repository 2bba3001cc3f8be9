//! Editor session: the caller-side state that feeds render passes, plus debounced scheduling.
//!
//! Every parameter or zone change schedules a pass. Scheduling is single-slot: a newer request
//! cancels a pending one and restarts the delay, and a pass whose request was superseded while it
//! ran is not committed. Passes never overlap because the consumer awaits each one before taking
//! the next request.

use std::{
	sync::{
		Arc,
		atomic::{AtomicU64, Ordering},
	},
	time::Duration,
};

use tokio::{
	sync::{mpsc, watch},
	task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
	compositor::Compositor,
	export::ExportFormat,
	loader::{DecodeError, Upload},
	params::{ExclusionZone, WatermarkParameters},
	pipeline::{PassError, PassInput, PassOutput, RenderPass},
	surface::RasterSurface,
};

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);

/// A request delivered by [`Debouncer`] once its quiet period elapsed.
#[derive(Debug)]
pub struct Scheduled<T> {
	pub generation: u64,
	pub value: T,
}

/// Single-slot delayed delivery: only the latest scheduled value survives.
#[derive(Debug)]
pub struct Debouncer<T> {
	delay: Duration,
	generation: Arc<AtomicU64>,
	pending: Option<JoinHandle<()>>,
	tx: mpsc::UnboundedSender<Scheduled<T>>,
}

impl<T: Send + 'static> Debouncer<T> {
	pub fn new(delay: Duration) -> (Self, mpsc::UnboundedReceiver<Scheduled<T>>) {
		let (tx, rx) = mpsc::unbounded_channel();
		let debouncer = Self {
			delay,
			generation: Arc::new(AtomicU64::new(0)),
			pending: None,
			tx,
		};
		(debouncer, rx)
	}

	/// Replaces any not-yet-delivered request. Must be called inside a tokio runtime.
	pub fn schedule(&mut self, value: T) -> u64 {
		if let Some(pending) = self.pending.take() {
			pending.abort();
		}
		let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
		let delay = self.delay;
		let tx = self.tx.clone();
		self.pending = Some(tokio::spawn(async move {
			tokio::time::sleep(delay).await;
			// receiver gone means nobody is rendering any more
			let _ = tx.send(Scheduled { generation, value });
		}));
		generation
	}

	pub fn cancel(&mut self) {
		if let Some(pending) = self.pending.take() {
			pending.abort();
		}
		self.generation.fetch_add(1, Ordering::SeqCst);
	}

	pub fn is_current(&self, generation: u64) -> bool {
		self.generation.load(Ordering::SeqCst) == generation
	}
}

/// What a "save" action can see.
#[derive(Clone, Debug, Default)]
pub enum OutputState {
	/// No pass has succeeded since the current image was loaded.
	#[default]
	Empty,
	Ready(Arc<PassOutput>),
	/// The latest pass failed; `last_good` is what was on display before it.
	Failed { error: String, last_good: Option<Arc<PassOutput>> },
}

impl OutputState {
	/// Latest successful output, if any.
	pub fn artifact(&self) -> Option<&Arc<PassOutput>> {
		match self {
			OutputState::Empty => None,
			OutputState::Ready(output) => Some(output),
			OutputState::Failed { last_good, .. } => last_good.as_ref(),
		}
	}
}

#[derive(Debug)]
pub enum PassOutcome {
	Committed(Arc<PassOutput>),
	/// A newer request arrived before this one could be committed.
	Superseded,
	Failed(PassError),
}

pub struct Session {
	renderer: Arc<dyn RenderPass>,
	source: Option<Arc<RasterSurface>>,
	params: WatermarkParameters,
	zone: Option<ExclusionZone>,
	format: ExportFormat,
	output: OutputState,
	debouncer: Debouncer<PassInput>,
	busy: watch::Sender<bool>,
}

impl Session {
	pub fn new(compositor: Arc<Compositor>, params: WatermarkParameters, delay: Duration) -> (Self, mpsc::UnboundedReceiver<Scheduled<PassInput>>) {
		Self::with_renderer(compositor, params, delay)
	}

	pub fn with_renderer(renderer: Arc<dyn RenderPass>, params: WatermarkParameters, delay: Duration) -> (Self, mpsc::UnboundedReceiver<Scheduled<PassInput>>) {
		let (debouncer, rx) = Debouncer::new(delay);
		let (busy, _) = watch::channel(false);
		let session = Self {
			renderer,
			source: None,
			params,
			zone: None,
			format: ExportFormat::default(),
			output: OutputState::Empty,
			debouncer,
			busy,
		};
		(session, rx)
	}

	/// Busy while a pass is pending or running.
	pub fn subscribe_busy(&self) -> watch::Receiver<bool> {
		self.busy.subscribe()
	}

	pub fn params(&self) -> &WatermarkParameters {
		&self.params
	}

	pub fn zone(&self) -> Option<&ExclusionZone> {
		self.zone.as_ref()
	}

	pub fn source(&self) -> Option<&RasterSurface> {
		self.source.as_deref()
	}

	pub fn output(&self) -> &OutputState {
		&self.output
	}

	/// Replaces the source image, dropping the previous one with its output and zone.
	///
	/// A decode failure leaves the session exactly as it was. A drop with a non-image MIME type is
	/// ignored and reported as `Ok(false)`.
	pub fn upload(&mut self, upload: Upload) -> Result<bool, DecodeError> {
		let Some(surface) = upload.load()? else {
			return Ok(false);
		};
		info!(width = surface.width(), height = surface.height(), "loaded new source image");
		self.source = Some(Arc::new(surface));
		self.output = OutputState::Empty;
		self.zone = None;
		self.schedule();
		Ok(true)
	}

	pub fn set_params(&mut self, params: WatermarkParameters) {
		self.params = params;
		self.schedule();
	}

	/// Applies `f` to a copy of the current parameters and schedules a pass.
	pub fn update_params(&mut self, f: impl FnOnce(&mut WatermarkParameters)) {
		let mut params = self.params.clone();
		f(&mut params);
		self.set_params(params);
	}

	pub fn set_zone(&mut self, zone: ExclusionZone) {
		self.zone = Some(zone);
		self.schedule();
	}

	/// Places the zone at a click given in display coordinates. Ignored without a source image.
	pub fn click(&mut self, x: f32, y: f32, display_width: f32, display_height: f32) -> Option<ExclusionZone> {
		let source = self.source.as_ref()?;
		let zone = ExclusionZone::from_display_point(x, y, display_width, display_height, source.width(), source.height())?;
		self.set_zone(zone);
		Some(zone)
	}

	pub fn clear_zone(&mut self) {
		self.zone = None;
		self.schedule();
	}

	pub fn set_format(&mut self, format: ExportFormat) {
		self.format = format;
		self.schedule();
	}

	fn schedule(&mut self) {
		let Some(source) = &self.source else {
			return;
		};
		let input = PassInput {
			source: Arc::clone(source),
			params: self.params.clone(),
			zone: self.zone,
			format: self.format,
		};
		let generation = self.debouncer.schedule(input);
		debug!(generation, "scheduled render pass");
		self.busy.send_replace(true);
	}

	/// Runs a delivered request and commits its result unless something newer was scheduled meanwhile.
	pub async fn execute(&mut self, scheduled: Scheduled<PassInput>) -> PassOutcome {
		let Scheduled { generation, value: input } = scheduled;
		if !self.debouncer.is_current(generation) {
			debug!(generation, "dropping superseded request");
			return PassOutcome::Superseded;
		}

		let renderer = Arc::clone(&self.renderer);
		let result = match tokio::task::spawn_blocking(move || renderer.run(&input)).await {
			Ok(result) => result,
			Err(e) => Err(PassError::Aborted(e.to_string())),
		};

		if !self.debouncer.is_current(generation) {
			debug!(generation, "pass finished after being superseded, discarding");
			return PassOutcome::Superseded;
		}
		self.busy.send_replace(false);

		match result {
			Ok(output) => {
				let output = Arc::new(output);
				info!(generation, stamped = output.report.stamps.len(), bytes = output.bytes.len(), "render pass committed");
				self.output = OutputState::Ready(Arc::clone(&output));
				PassOutcome::Committed(output)
			}
			Err(e) => {
				warn!(generation, error = %e, "render pass failed");
				let last_good = self.output.artifact().cloned();
				self.output = OutputState::Failed { error: e.to_string(), last_good };
				PassOutcome::Failed(e)
			}
		}
	}

	/// Drops any pending request and goes idle.
	pub fn cancel_pending(&mut self) {
		self.debouncer.cancel();
		self.busy.send_replace(false);
	}
}
