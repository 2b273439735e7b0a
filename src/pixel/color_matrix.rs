use crate::foundation::error::{PixelflowError, PixelflowResult};
use crate::pixel::buffer::PixelBuffer;

/// Rec.601 luma weights used by grayscale and saturate.
pub const LUMA_WEIGHTS: [f32; 3] = [0.299, 0.587, 0.114];

/// 4×4 row-major color transform over straight RGBA in `[0, 1]`.
///
/// `out[row] = Σ m[row][col] * in[col]`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ColorMatrix(pub [[f32; 4]; 4]);

impl ColorMatrix {
    /// Identity transform.
    pub const IDENTITY: ColorMatrix = ColorMatrix([
        [1.0, 0.0, 0.0, 0.0],
        [0.0, 1.0, 0.0, 0.0],
        [0.0, 0.0, 1.0, 0.0],
        [0.0, 0.0, 0.0, 1.0],
    ]);

    /// Matrix rows.
    pub fn rows(&self) -> &[[f32; 4]; 4] {
        &self.0
    }

    fn apply_straight(&self, px: [f32; 4]) -> [f32; 4] {
        let m = &self.0;
        let mut out = [0.0f32; 4];
        for (row, o) in m.iter().zip(out.iter_mut()) {
            *o = (row[0] * px[0] + row[1] * px[1] + row[2] * px[2] + row[3] * px[3])
                .clamp(0.0, 1.0);
        }
        out
    }
}

// Blend the RGB block between identity (weight `keep`) and the luma projection (weight `gray`).
fn luma_mix(keep: f32, gray: f32) -> ColorMatrix {
    let mut m = ColorMatrix::IDENTITY.0;
    for (r, row) in m.iter_mut().take(3).enumerate() {
        for (c, v) in row.iter_mut().take(3).enumerate() {
            let id = if r == c { 1.0 } else { 0.0 };
            *v = keep * id + gray * LUMA_WEIGHTS[c];
        }
    }
    ColorMatrix(m)
}

/// Grayscale matrix: `amount` 0 is identity, 1 maps every RGB row to [`LUMA_WEIGHTS`].
///
/// `amount` is clamped to `[0, 1]`.
pub fn build_grayscale_matrix(amount: f32) -> ColorMatrix {
    let a = if amount.is_finite() {
        amount.clamp(0.0, 1.0)
    } else {
        0.0
    };
    luma_mix(1.0 - a, a)
}

/// Saturate matrix: `amount` 1 is identity, 0 is full grayscale, above 1 oversaturates.
///
/// Negative amounts are clamped to 0.
pub fn build_saturate_matrix(amount: f32) -> ColorMatrix {
    let s = if amount.is_finite() {
        amount.max(0.0)
    } else {
        1.0
    };
    luma_mix(s, 1.0 - s)
}

/// Apply `matrix` to a premultiplied buffer (premul → straight → matrix → premul).
pub fn apply_color_matrix(src: &PixelBuffer, matrix: &ColorMatrix) -> PixelflowResult<PixelBuffer> {
    let mut out = src.clone();
    color_matrix_rgba8_premul(src.data(), out.data_mut(), matrix)?;
    Ok(out)
}

fn color_matrix_rgba8_premul(src: &[u8], dst: &mut [u8], m: &ColorMatrix) -> PixelflowResult<()> {
    if src.len() != dst.len() || !src.len().is_multiple_of(4) {
        return Err(PixelflowError::evaluation(
            "color matrix expects equal-length rgba8 buffers",
        ));
    }
    for (s, d) in src.chunks_exact(4).zip(dst.chunks_exact_mut(4)) {
        let pa = f32::from(s[3]) / 255.0;
        let inv_a = if pa > 0.0 { 1.0 / pa } else { 0.0 };
        let straight = [
            (f32::from(s[0]) / 255.0 * inv_a).min(1.0),
            (f32::from(s[1]) / 255.0 * inv_a).min(1.0),
            (f32::from(s[2]) / 255.0 * inv_a).min(1.0),
            pa,
        ];

        let [r, g, b, a] = m.apply_straight(straight);

        d[0] = ((r * a) * 255.0).round().clamp(0.0, 255.0) as u8;
        d[1] = ((g * a) * 255.0).round().clamp(0.0, 255.0) as u8;
        d[2] = ((b * a) * 255.0).round().clamp(0.0, 255.0) as u8;
        d[3] = (a * 255.0).round().clamp(0.0, 255.0) as u8;
    }
    Ok(())
}

#[cfg(test)]
#[path = "../../tests/unit/pixel/color_matrix.rs"]
mod tests;
