use crate::foundation::core::{premul_px, unpremul_px};
use crate::foundation::error::{PixelflowError, PixelflowResult};
use crate::foundation::math::hash_unit_f32;
use crate::pixel::buffer::PixelBuffer;

/// Seed used when a noise filter does not specify one.
pub const DEFAULT_NOISE_SEED: u64 = 0x5eed_1234_abcd_0001;

/// Distribution of noise samples.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum NoiseKind {
    /// Uniform in `[-sigma, sigma]`.
    Uniform,
    /// Normal with standard deviation `sigma`.
    #[default]
    Gaussian,
}

/// Noise filter parameters.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct NoiseParams {
    /// Noise strength as a fraction of full channel range (`0.1` ≈ ±25 levels).
    pub sigma: f32,
    /// Sample distribution.
    #[serde(default)]
    pub kind: NoiseKind,
    /// Independent samples per channel when `true`; one luminance sample otherwise.
    #[serde(default)]
    pub use_color: bool,
    /// Generator seed; identical seeds on identical sizes give identical output.
    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_seed() -> u64 {
    DEFAULT_NOISE_SEED
}

impl Default for NoiseParams {
    fn default() -> Self {
        Self {
            sigma: 0.1,
            kind: NoiseKind::default(),
            use_color: false,
            seed: DEFAULT_NOISE_SEED,
        }
    }
}

impl NoiseParams {
    /// Return parameters reseeded with `seed`.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

/// Return a noisy copy of `src`.
pub fn apply_noise(src: &PixelBuffer, params: &NoiseParams) -> PixelflowResult<PixelBuffer> {
    let mut out = src.clone();
    apply_noise_in_place(&mut out, params)?;
    Ok(out)
}

/// Perturb straight RGB of every pixel in place. Alpha is preserved.
///
/// Samples are a pure function of `(seed, x, y, channel)`, so the result does not depend on
/// evaluation order.
pub fn apply_noise_in_place(buf: &mut PixelBuffer, params: &NoiseParams) -> PixelflowResult<()> {
    if !params.sigma.is_finite() || params.sigma < 0.0 {
        return Err(PixelflowError::validation(
            "noise sigma must be finite and >= 0",
        ));
    }
    if params.sigma == 0.0 {
        return Ok(());
    }

    let amp = params.sigma * 255.0;
    let (w, h) = (buf.width(), buf.height());
    for y in 0..h {
        for x in 0..w {
            let px = buf.pixel(x, y);
            if px[3] == 0 {
                continue;
            }
            let mut s = unpremul_px(px);
            let shared = sample(params, x, y, 0);
            for (c, ch) in s.iter_mut().take(3).enumerate() {
                let n = if params.use_color {
                    sample(params, x, y, c as u32)
                } else {
                    shared
                };
                *ch = (f32::from(*ch) + n * amp).round().clamp(0.0, 255.0) as u8;
            }
            buf.set_pixel(x, y, premul_px(s));
        }
    }
    Ok(())
}

fn sample(params: &NoiseParams, x: u32, y: u32, channel: u32) -> f32 {
    match params.kind {
        NoiseKind::Uniform => hash_unit_f32(params.seed, x, y, channel) * 2.0 - 1.0,
        NoiseKind::Gaussian => {
            // Box-Muller over two independent lanes per channel.
            let u1 = hash_unit_f32(params.seed, x, y, channel * 2).max(1e-7);
            let u2 = hash_unit_f32(params.seed, x, y, channel * 2 + 1);
            (-2.0 * u1.ln()).sqrt() * (std::f32::consts::TAU * u2).cos()
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/pixel/noise.rs"]
mod tests;
