use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use crate::filter::descriptor::{FilterDescriptor, FilterKind};
use crate::filter::extension::ExtensionRegistry;
use crate::filter::result::FilterResult;
use crate::foundation::core::Size;
use crate::foundation::error::{PixelflowError, PixelflowResult};
use crate::pixel::blend::BlendMode;
use crate::pixel::blur::effective_blur_radius;
use crate::pixel::buffer::PixelBuffer;
use crate::pixel::color_matrix::{ColorMatrix, build_grayscale_matrix, build_saturate_matrix};
use crate::pixel::noise::{NoiseParams, apply_noise, apply_noise_in_place};
use crate::pixel::operator::{OperatorSelector, PixelOperator};

/// Resolved upstream outcome handed to a step. `None` means the step has no such reference.
pub type StepInput = Option<PixelflowResult<FilterResult>>;

/// Shared, read-only state for evaluating steps of one pipeline run.
#[derive(Clone, Debug)]
pub struct StepContext {
    canvas_scale: f32,
    operator: Arc<OperatorSelector>,
    extensions: Arc<ExtensionRegistry>,
    allow_noise_aliasing: bool,
    fallback_size: Size,
}

impl StepContext {
    /// Context with canvas scale 1, no aliasing, and a 1×1 fallback size.
    pub fn new(operator: Arc<OperatorSelector>, extensions: Arc<ExtensionRegistry>) -> Self {
        Self {
            canvas_scale: 1.0,
            operator,
            extensions,
            allow_noise_aliasing: false,
            fallback_size: Size::new(1, 1),
        }
    }

    /// Ratio between canvas units and image pixels.
    pub fn with_canvas_scale(mut self, canvas_scale: f32) -> Self {
        self.canvas_scale = canvas_scale;
        self
    }

    /// Let noise mutate an input buffer nobody else holds.
    pub fn with_noise_aliasing(mut self, allow: bool) -> Self {
        self.allow_noise_aliasing = allow;
        self
    }

    /// Size used to materialize non-pixel inputs of single-input steps.
    pub fn with_fallback_size(mut self, size: Size) -> Self {
        self.fallback_size = size;
        self
    }

    /// Canvas scale in effect.
    pub fn canvas_scale(&self) -> f32 {
        self.canvas_scale
    }

    /// Fallback materialization size in effect.
    pub fn fallback_size(&self) -> Size {
        self.fallback_size
    }
}

/// One node of filter evaluation.
#[derive(Clone, Debug)]
pub struct FilterStep {
    descriptor: FilterDescriptor,
}

impl FilterStep {
    /// Wrap a descriptor.
    pub fn new(descriptor: FilterDescriptor) -> Self {
        Self { descriptor }
    }

    /// The descriptor this step evaluates.
    pub fn descriptor(&self) -> &FilterDescriptor {
        &self.descriptor
    }

    /// Evaluate with already-resolved inputs.
    ///
    /// Failed inputs become a transparent placeholder, except for blend and extension steps which
    /// propagate the upstream error.
    pub fn evaluate(
        &self,
        source: StepInput,
        destination: StepInput,
        ctx: &StepContext,
    ) -> PixelflowResult<FilterResult> {
        match &self.descriptor.kind {
            FilterKind::Blend { mode } => self.blend(*mode, source, destination, ctx),
            FilterKind::Blur { radius } => {
                let src = self.single_input(source, ctx)?;
                let r = effective_blur_radius(*radius, ctx.canvas_scale);
                Ok(FilterResult::pixels(ctx.operator.blur(&src, r)?))
            }
            FilterKind::Grayscale { amount, target } => {
                self.color_matrix(&build_grayscale_matrix(*amount), *target, source, ctx)
            }
            FilterKind::Saturate { amount, target } => {
                self.color_matrix(&build_saturate_matrix(*amount), *target, source, ctx)
            }
            FilterKind::Noise { params } => self.noise(params, source, ctx),
            FilterKind::Color { color } | FilterKind::Solid { color } => {
                Ok(FilterResult::Color(*color))
            }
            FilterKind::Gradient { gradient } => {
                gradient.validate()?;
                Ok(FilterResult::Gradient(gradient.clone()))
            }
            FilterKind::Extension { uri, name, params } => {
                let handler = ctx.extensions.resolve(uri, name)?;
                let (src, dst) = self.extension_inputs(source, destination)?;
                let out = handler.process_image(src.as_deref(), dst.as_deref(), params)?;
                Ok(FilterResult::pixels(out))
            }
        }
    }

    fn kind_name(&self) -> &'static str {
        self.descriptor.kind.name()
    }

    fn single_input(&self, input: StepInput, ctx: &StepContext) -> PixelflowResult<Arc<PixelBuffer>> {
        let result = match input {
            Some(Ok(r)) => r,
            Some(Err(err)) => {
                tracing::warn!(kind = self.kind_name(), error = %err, "upstream failed, using transparent input");
                FilterResult::transparent()
            }
            None => FilterResult::transparent(),
        };
        result.materialize(ctx.fallback_size)
    }

    fn color_matrix(
        &self,
        matrix: &ColorMatrix,
        target: Option<Size>,
        source: StepInput,
        ctx: &StepContext,
    ) -> PixelflowResult<FilterResult> {
        let src = self.single_input(source, ctx)?;
        let out = match target {
            Some(t) if t != src.size() => ctx.operator.color_matrix(&src.resized(t)?, matrix)?,
            _ => ctx.operator.color_matrix(&src, matrix)?,
        };
        Ok(FilterResult::pixels(out))
    }

    fn noise(
        &self,
        params: &NoiseParams,
        source: StepInput,
        ctx: &StepContext,
    ) -> PixelflowResult<FilterResult> {
        let mut src = self.single_input(source, ctx)?;
        if ctx.allow_noise_aliasing
            && let Some(buf) = Arc::get_mut(&mut src)
        {
            apply_noise_in_place(buf, params)?;
            return Ok(FilterResult::Pixels(src));
        }
        Ok(FilterResult::pixels(apply_noise(&src, params)?))
    }

    fn blend(
        &self,
        mode: BlendMode,
        source: StepInput,
        destination: StepInput,
        ctx: &StepContext,
    ) -> PixelflowResult<FilterResult> {
        let (Some(src), Some(dst)) = (source, destination) else {
            return Err(PixelflowError::precondition(
                "blend requires both source and destination",
            ));
        };
        let (src, dst) = (src?, dst?);
        let (src, dst) = match (src.as_pixels(), dst.as_pixels()) {
            (Some(s), Some(d)) => (Arc::clone(s), Arc::clone(d)),
            (Some(s), None) => {
                let d = dst.materialize(s.size())?;
                (Arc::clone(s), d)
            }
            (None, Some(d)) => (src.materialize(d.size())?, Arc::clone(d)),
            (None, None) => {
                return Err(PixelflowError::precondition(
                    "blend requires a pixel buffer on at least one side",
                ));
            }
        };
        let blended = catch_unwind(AssertUnwindSafe(|| ctx.operator.blend(&src, &dst, mode)))
            .unwrap_or_else(|_| Err(PixelflowError::evaluation("blend operator panicked")));
        match blended {
            Ok(out) => Ok(FilterResult::pixels(out)),
            Err(err) => {
                tracing::warn!(?mode, error = %err, "blend failed, returning destination unmodified");
                Ok(FilterResult::Pixels(dst))
            }
        }
    }

    fn extension_inputs(
        &self,
        source: StepInput,
        destination: StepInput,
    ) -> PixelflowResult<(Option<Arc<PixelBuffer>>, Option<Arc<PixelBuffer>>)> {
        let source = source.transpose()?;
        let destination = destination.transpose()?;
        let pixels = |r: &Option<FilterResult>| r.as_ref().and_then(|r| r.as_pixels().cloned());
        if source.is_none() && destination.is_none() {
            return Ok((None, None));
        }
        match (pixels(&source), pixels(&destination)) {
            (Some(s), Some(d)) => Ok((Some(s), Some(d))),
            (Some(s), None) => {
                let d = destination.map(|r| r.materialize(s.size())).transpose()?;
                Ok((Some(s), d))
            }
            (None, Some(d)) => {
                let s = source.map(|r| r.materialize(d.size())).transpose()?;
                Ok((s, Some(d)))
            }
            (None, None) => Err(PixelflowError::precondition(
                "extension requires a pixel buffer on at least one side, or no inputs",
            )),
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/filter/step.rs"]
mod tests;
