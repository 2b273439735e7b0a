use std::sync::Arc;

use crate::foundation::error::PixelflowResult;
use crate::pixel::blend::{BlendMode, blend_buffers};
use crate::pixel::blur::blur_buffer;
use crate::pixel::buffer::PixelBuffer;
use crate::pixel::color_matrix::{ColorMatrix, apply_color_matrix};

/// Accelerated pixel primitives used by filter steps.
///
/// Implementations may be backed by a GPU or other hardware path. [`SoftwareOperator`] is always
/// available and is used as the fallback.
pub trait PixelOperator: Send + Sync {
    /// Blend `src` over `dst` with `mode`. The output has `dst`'s size.
    fn blend(
        &self,
        src: &PixelBuffer,
        dst: &PixelBuffer,
        mode: BlendMode,
    ) -> PixelflowResult<PixelBuffer>;

    /// Gaussian-blur `src` by `radius` image pixels.
    fn blur(&self, src: &PixelBuffer, radius: f32) -> PixelflowResult<PixelBuffer>;

    /// Transform every pixel of `src` by `matrix`.
    fn color_matrix(&self, src: &PixelBuffer, matrix: &ColorMatrix)
    -> PixelflowResult<PixelBuffer>;

    /// Short backend name used in logs.
    fn name(&self) -> &'static str;
}

/// CPU implementation of [`PixelOperator`].
#[derive(Clone, Copy, Debug, Default)]
pub struct SoftwareOperator;

impl PixelOperator for SoftwareOperator {
    fn blend(
        &self,
        src: &PixelBuffer,
        dst: &PixelBuffer,
        mode: BlendMode,
    ) -> PixelflowResult<PixelBuffer> {
        blend_buffers(src, dst, mode)
    }

    fn blur(&self, src: &PixelBuffer, radius: f32) -> PixelflowResult<PixelBuffer> {
        blur_buffer(src, radius)
    }

    fn color_matrix(
        &self,
        src: &PixelBuffer,
        matrix: &ColorMatrix,
    ) -> PixelflowResult<PixelBuffer> {
        apply_color_matrix(src, matrix)
    }

    fn name(&self) -> &'static str {
        "software"
    }
}

/// Chooses the hardware operator when one is installed and retries failed hardware calls in
/// software.
#[derive(Clone)]
pub struct OperatorSelector {
    hardware: Option<Arc<dyn PixelOperator>>,
    software: SoftwareOperator,
}

impl std::fmt::Debug for OperatorSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperatorSelector")
            .field("hardware", &self.hardware.as_ref().map(|h| h.name()))
            .finish()
    }
}

impl Default for OperatorSelector {
    fn default() -> Self {
        Self::software()
    }
}

impl OperatorSelector {
    /// Create a selector. `None` means software only.
    pub fn new(hardware: Option<Arc<dyn PixelOperator>>) -> Self {
        Self {
            hardware,
            software: SoftwareOperator,
        }
    }

    /// Software-only selector.
    pub fn software() -> Self {
        Self::new(None)
    }

    /// Whether a hardware backend is installed.
    pub fn has_hardware(&self) -> bool {
        self.hardware.is_some()
    }

    fn run<T>(
        &self,
        op: &'static str,
        f: impl Fn(&dyn PixelOperator) -> PixelflowResult<T>,
    ) -> PixelflowResult<T> {
        if let Some(hw) = &self.hardware {
            match f(hw.as_ref()) {
                Ok(v) => return Ok(v),
                Err(err) => {
                    tracing::warn!(backend = hw.name(), op, error = %err, "hardware op failed, retrying in software");
                }
            }
        }
        f(&self.software)
    }
}

impl PixelOperator for OperatorSelector {
    fn blend(
        &self,
        src: &PixelBuffer,
        dst: &PixelBuffer,
        mode: BlendMode,
    ) -> PixelflowResult<PixelBuffer> {
        self.run("blend", |op| op.blend(src, dst, mode))
    }

    fn blur(&self, src: &PixelBuffer, radius: f32) -> PixelflowResult<PixelBuffer> {
        self.run("blur", |op| op.blur(src, radius))
    }

    fn color_matrix(
        &self,
        src: &PixelBuffer,
        matrix: &ColorMatrix,
    ) -> PixelflowResult<PixelBuffer> {
        self.run("color_matrix", |op| op.color_matrix(src, matrix))
    }

    fn name(&self) -> &'static str {
        match &self.hardware {
            Some(hw) => hw.name(),
            None => self.software.name(),
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/pixel/operator.rs"]
mod tests;
