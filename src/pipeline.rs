use std::sync::Arc;

use rand::Rng;
use tracing::instrument;

use crate::{
	compositor::{Compositor, StampReport},
	export::{self, EncodeError, ExportFormat},
	params::{ExclusionZone, WatermarkParameters},
	surface::RasterSurface,
};

/// Snapshot of everything one render pass reads.
#[derive(Clone, Debug)]
pub struct PassInput {
	pub source: Arc<RasterSurface>,
	pub params: WatermarkParameters,
	pub zone: Option<ExclusionZone>,
	pub format: ExportFormat,
}

/// Encoded result of a render pass, with the zone echoed back for re-display.
#[derive(Clone, Debug)]
pub struct PassOutput {
	pub bytes: Vec<u8>,
	pub format: ExportFormat,
	pub width: u32,
	pub height: u32,
	pub zone: Option<ExclusionZone>,
	pub report: StampReport,
}

impl PassOutput {
	pub fn data_url(&self) -> String {
		export::to_data_url(&self.bytes, self.format)
	}
}

#[derive(Debug, thiserror::Error)]
pub enum PassError {
	#[error(transparent)]
	Encode(#[from] EncodeError),
	#[error("render pass aborted: {0}")]
	Aborted(String),
}

/// Something that turns a pass input into encoded output; the session runs passes through this.
pub trait RenderPass: Send + Sync {
	fn run(&self, input: &PassInput) -> Result<PassOutput, PassError>;
}

impl RenderPass for Compositor {
	fn run(&self, input: &PassInput) -> Result<PassOutput, PassError> {
		run_pass(self, input)
	}
}

pub fn run_pass(compositor: &Compositor, input: &PassInput) -> Result<PassOutput, PassError> {
	run_pass_with_rng(compositor, input, &mut rand::rng())
}

/// Composite then encode. The composited surface lives only for the duration of this call.
#[instrument(skip_all, fields(width = input.source.width(), height = input.source.height(), density = input.params.density))]
pub fn run_pass_with_rng<R: Rng + ?Sized>(compositor: &Compositor, input: &PassInput, rng: &mut R) -> Result<PassOutput, PassError> {
	let composite = compositor.render_with_rng(&input.source, &input.params, input.zone.as_ref(), rng);
	let bytes = export::encode(&composite.surface, input.format)?;
	Ok(PassOutput {
		bytes,
		format: input.format,
		width: composite.surface.width(),
		height: composite.surface.height(),
		zone: input.zone,
		report: composite.report,
	})
}
