use rayon::prelude::*;

use crate::foundation::core::Size;
use crate::foundation::error::{PixelflowError, PixelflowResult};
use crate::pixel::buffer::PixelBuffer;

/// Smallest effective blur radius.
pub const BLUR_RADIUS_EPSILON: f32 = 0.01;
/// Largest effective blur radius in image pixels.
pub const BLUR_RADIUS_MAX: f32 = 25.0;

/// Convert a nominal blur radius (canvas units) into image pixels.
///
/// `clamp(radius / canvas_scale, BLUR_RADIUS_EPSILON, BLUR_RADIUS_MAX)`; non-finite or non-positive
/// scales count as 1.
pub fn effective_blur_radius(radius: f32, canvas_scale: f32) -> f32 {
    let scale = if canvas_scale.is_finite() && canvas_scale > 0.0 {
        canvas_scale
    } else {
        1.0
    };
    let r = if radius.is_finite() { radius / scale } else { 0.0 };
    r.clamp(BLUR_RADIUS_EPSILON, BLUR_RADIUS_MAX)
}

/// Gaussian-blur a premultiplied buffer by `radius` image pixels.
///
/// Separable: one horizontal and one vertical pass with the same kernel. Edge pixels are
/// extended.
pub fn blur_buffer(src: &PixelBuffer, radius: f32) -> PixelflowResult<PixelBuffer> {
    if !radius.is_finite() || radius < 0.0 {
        return Err(PixelflowError::validation("blur radius must be finite and >= 0"));
    }
    let kernel = GaussianKernel::for_radius(radius);
    let size = src.size();
    if kernel.is_identity() || size.is_empty() {
        return Ok(src.clone());
    }
    let mut rows = vec![0u8; src.data().len()];
    convolve(src.data(), &mut rows, size, &kernel, Axis::Horizontal);
    let mut out = vec![0u8; rows.len()];
    convolve(&rows, &mut out, size, &kernel, Axis::Vertical);
    PixelBuffer::from_raw(size, out)
}

const Q16_ONE: u32 = 1 << 16;

/// Normalized gaussian taps in Q16 fixed point; always sums to exactly [`Q16_ONE`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct GaussianKernel {
    taps: Vec<u32>,
}

impl GaussianKernel {
    /// `round(radius)` taps on each side, sigma `radius / 2` (at least 0.5).
    pub(crate) fn for_radius(radius: f32) -> Self {
        let half = radius.max(0.0).round() as i32;
        if half == 0 {
            return Self {
                taps: vec![Q16_ONE],
            };
        }
        let sigma = f64::from((radius / 2.0).max(0.5));
        let weights: Vec<f64> = (-half..=half)
            .map(|i| {
                let x = f64::from(i);
                (-(x * x) / (2.0 * sigma * sigma)).exp()
            })
            .collect();
        // The center weight is 1, so the total is never zero.
        let total: f64 = weights.iter().sum();
        let mut taps: Vec<u32> = weights
            .iter()
            .map(|w| ((w / total) * f64::from(Q16_ONE)).round() as u32)
            .collect();
        let drift = i64::from(Q16_ONE) - taps.iter().map(|&t| i64::from(t)).sum::<i64>();
        let mid = taps.len() / 2;
        taps[mid] = (i64::from(taps[mid]) + drift).clamp(0, i64::from(Q16_ONE)) as u32;
        Self { taps }
    }

    pub(crate) fn taps(&self) -> &[u32] {
        &self.taps
    }

    fn half(&self) -> isize {
        (self.taps.len() / 2) as isize
    }

    fn is_identity(&self) -> bool {
        self.taps.len() == 1
    }
}

#[derive(Clone, Copy)]
enum Axis {
    Horizontal,
    Vertical,
}

// One output row per task; each reads whatever source rows the axis needs.
fn convolve(src: &[u8], dst: &mut [u8], size: Size, kernel: &GaussianKernel, axis: Axis) {
    let (w, h) = (size.width as usize, size.height as usize);
    let half = kernel.half();
    let clamp = |v: usize, offset: isize, len: usize| -> usize {
        (v as isize + offset).clamp(0, len as isize - 1) as usize
    };
    dst.par_chunks_mut(w * 4).enumerate().for_each(|(y, row)| {
        for x in 0..w {
            let mut acc = [0u64; 4];
            for (k, &tap) in kernel.taps.iter().enumerate() {
                let offset = k as isize - half;
                let (sx, sy) = match axis {
                    Axis::Horizontal => (clamp(x, offset, w), y),
                    Axis::Vertical => (x, clamp(y, offset, h)),
                };
                let at = (sy * w + sx) * 4;
                for (a, &v) in acc.iter_mut().zip(&src[at..at + 4]) {
                    *a += u64::from(tap) * u64::from(v);
                }
            }
            for (d, a) in row[x * 4..x * 4 + 4].iter_mut().zip(acc) {
                *d = ((a + u64::from(Q16_ONE / 2)) >> 16).min(255) as u8;
            }
        }
    });
}

#[cfg(test)]
#[path = "../../tests/unit/pixel/blur.rs"]
mod tests;
