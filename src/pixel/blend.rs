//! Per-channel and per-pixel blend math.
//!
//! Channel functions operate on straight (non-premultiplied) 8-bit values; [`blend_buffers`]
//! handles the premultiplied conversion and the separable compositing formula.

use crate::foundation::core::unpremul_px;
use crate::foundation::error::{PixelflowError, PixelflowResult};
use crate::pixel::buffer::PixelBuffer;

/// Blend mode applied by the Blend filter.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum BlendMode {
    /// Source replaces destination color.
    #[default]
    Normal,
    /// `s * d`.
    Multiply,
    /// `1 - (1 - s)(1 - d)`.
    Screen,
    /// Multiply or screen depending on the destination.
    Overlay,
    /// `min(s, d)`.
    Darken,
    /// `max(s, d)`.
    Lighten,
    /// Brighten destination towards source.
    ColorDodge,
    /// Darken destination towards source.
    ColorBurn,
    /// Overlay with operands swapped.
    HardLight,
    /// Gentle overlay (pegtop formulation).
    SoftLight,
    /// `|s - d|`.
    Difference,
    /// `s + d - 2sd`.
    Exclusion,
    /// Source hue with destination saturation and lightness.
    Hue,
    /// Source saturation with destination hue and lightness.
    Saturation,
    /// Source hue and saturation with destination lightness.
    Color,
    /// Source lightness with destination hue and saturation.
    Luminosity,
}

impl BlendMode {
    /// Return `true` for the HSL-space modes that need all three channels at once.
    pub fn is_hsl(self) -> bool {
        matches!(
            self,
            BlendMode::Hue | BlendMode::Saturation | BlendMode::Color | BlendMode::Luminosity
        )
    }
}

/// Blend one straight-alpha channel. Result is always in `[0, 255]`.
///
/// HSL modes are not separable; for them this returns `src` (use [`blend_rgb`]).
pub fn blend_channel(src: u8, dst: u8, mode: BlendMode) -> u8 {
    let s = u32::from(src);
    let d = u32::from(dst);
    let v = match mode {
        BlendMode::Normal => s,
        BlendMode::Multiply => s * d / 255,
        BlendMode::Screen => 255 - (255 - s) * (255 - d) / 255,
        BlendMode::Overlay => overlay(s, d),
        BlendMode::Darken => s.min(d),
        BlendMode::Lighten => s.max(d),
        BlendMode::ColorDodge => {
            if d == 0 {
                0
            } else if s == 255 {
                255
            } else {
                (d * 255 / (255 - s)).min(255)
            }
        }
        BlendMode::ColorBurn => {
            if d == 255 {
                255
            } else if s == 0 {
                0
            } else {
                255 - ((255 - d) * 255 / s).min(255)
            }
        }
        BlendMode::HardLight => overlay(d, s),
        BlendMode::SoftLight => {
            // (1 - 2s)d^2 + 2sd, kept in signed integers because (255 - 2s) can be negative.
            let (si, di) = (s as i32, d as i32);
            let v = ((255 - 2 * si) * di * di / 255 + 2 * si * di) / 255;
            v.clamp(0, 255) as u32
        }
        BlendMode::Difference => s.abs_diff(d),
        BlendMode::Exclusion => s + d - 2 * s * d / 255,
        BlendMode::Hue | BlendMode::Saturation | BlendMode::Color | BlendMode::Luminosity => s,
    };
    v.min(255) as u8
}

// Overlay keyed on `d`: multiply in the lower half, screen in the upper half.
fn overlay(s: u32, d: u32) -> u32 {
    if d < 128 {
        2 * s * d / 255
    } else {
        255 - 2 * (255 - s) * (255 - d) / 255
    }
}

/// "Over" alpha composite: `sa + da - round(sa * da / 255)`.
pub fn blend_alpha(src_a: u8, dst_a: u8) -> u8 {
    let sa = u32::from(src_a);
    let da = u32::from(dst_a);
    let prod = (sa * da + 127) / 255;
    (sa + da - prod).min(255) as u8
}

/// Blend straight RGB triples, dispatching to per-channel or HSL math.
pub fn blend_rgb(src: [u8; 3], dst: [u8; 3], mode: BlendMode) -> [u8; 3] {
    if !mode.is_hsl() {
        return [
            blend_channel(src[0], dst[0], mode),
            blend_channel(src[1], dst[1], mode),
            blend_channel(src[2], dst[2], mode),
        ];
    }

    let (sh, ss, sl) = rgb_to_hsl(unit(src[0]), unit(src[1]), unit(src[2]));
    let (dh, ds, dl) = rgb_to_hsl(unit(dst[0]), unit(dst[1]), unit(dst[2]));
    let (r, g, b) = match mode {
        BlendMode::Hue => hsl_to_rgb(sh, ds, dl),
        BlendMode::Saturation => hsl_to_rgb(dh, ss, dl),
        BlendMode::Color => hsl_to_rgb(sh, ss, dl),
        _ => hsl_to_rgb(dh, ds, sl),
    };
    [to_u8(r), to_u8(g), to_u8(b)]
}

/// Blend one premultiplied pixel of `src` onto `dst`.
///
/// Color uses the separable compositing formula
/// `co = (1 - da)·sa·Cs + (1 - sa)·da·Cd + sa·da·B(Cs, Cd)`; alpha uses [`blend_alpha`].
pub fn blend_pixel(src: [u8; 4], dst: [u8; 4], mode: BlendMode) -> [u8; 4] {
    let s = unpremul_px(src);
    let d = unpremul_px(dst);
    let sa = u32::from(s[3]);
    let da = u32::from(d[3]);
    let out_a = blend_alpha(s[3], d[3]);
    if out_a == 0 {
        return [0; 4];
    }

    let mixed = blend_rgb([s[0], s[1], s[2]], [d[0], d[1], d[2]], mode);
    let w_src = (255 - da) * sa;
    let w_dst = (255 - sa) * da;
    let w_mix = sa * da;

    let mut out = [0u8; 4];
    for c in 0..3 {
        let num = w_src * u32::from(s[c]) + w_dst * u32::from(d[c]) + w_mix * u32::from(mixed[c]);
        let v = (num + 65025 / 2) / 65025;
        out[c] = v.min(u32::from(out_a)) as u8;
    }
    out[3] = out_a;
    out
}

/// Blend `src` onto a copy of `dst` over their overlapping `min(w) × min(h)` area.
///
/// The result has `dst`'s dimensions; pixels outside the overlap keep `dst`'s values.
pub fn blend_buffers(
    src: &PixelBuffer,
    dst: &PixelBuffer,
    mode: BlendMode,
) -> PixelflowResult<PixelBuffer> {
    if src.format() != dst.format() {
        return Err(PixelflowError::validation(
            "blend_buffers expects matching pixel formats",
        ));
    }
    let mut out = dst.clone();
    let w = src.width().min(dst.width());
    let h = src.height().min(dst.height());
    for y in 0..h {
        for x in 0..w {
            let px = blend_pixel(src.pixel(x, y), dst.pixel(x, y), mode);
            out.set_pixel(x, y, px);
        }
    }
    Ok(out)
}

fn unit(c: u8) -> f32 {
    f32::from(c) / 255.0
}

fn to_u8(v: f32) -> u8 {
    (v * 255.0).round().clamp(0.0, 255.0) as u8
}

/// Convert RGB in `[0,1]` to `(hue, saturation, lightness)`, all in `[0,1]`.
pub(crate) fn rgb_to_hsl(r: f32, g: f32, b: f32) -> (f32, f32, f32) {
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let l = (max + min) * 0.5;

    if (max - min).abs() < f32::EPSILON {
        return (0.0, 0.0, l);
    }

    let d = max - min;
    let s = if l > 0.5 {
        d / (2.0 - max - min)
    } else {
        d / (max + min)
    };
    let h = if max == r {
        ((g - b) / d + if g < b { 6.0 } else { 0.0 }) / 6.0
    } else if max == g {
        ((b - r) / d + 2.0) / 6.0
    } else {
        ((r - g) / d + 4.0) / 6.0
    };
    (h, s, l)
}

fn hue_to_rgb(p: f32, q: f32, t: f32) -> f32 {
    let mut t = t;
    if t < 0.0 {
        t += 1.0;
    }
    if t > 1.0 {
        t -= 1.0;
    }
    if t < 1.0 / 6.0 {
        p + (q - p) * 6.0 * t
    } else if t < 0.5 {
        q
    } else if t < 2.0 / 3.0 {
        p + (q - p) * (2.0 / 3.0 - t) * 6.0
    } else {
        p
    }
}

/// Convert `(hue, saturation, lightness)` in `[0,1]` back to RGB in `[0,1]`.
pub(crate) fn hsl_to_rgb(h: f32, s: f32, l: f32) -> (f32, f32, f32) {
    if s <= 0.0 {
        return (l, l, l);
    }
    let q = if l < 0.5 { l * (1.0 + s) } else { l + s - l * s };
    let p = 2.0 * l - q;
    (
        hue_to_rgb(p, q, h + 1.0 / 3.0),
        hue_to_rgb(p, q, h),
        hue_to_rgb(p, q, h - 1.0 / 3.0),
    )
}

#[cfg(test)]
#[path = "../../tests/unit/pixel/blend.rs"]
mod tests;
