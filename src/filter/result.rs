use std::sync::Arc;

use crate::foundation::core::{Point, Rgba8Premul, Size};
use crate::foundation::error::{PixelflowError, PixelflowResult};
use crate::pixel::buffer::PixelBuffer;

/// Output of one filter step.
///
/// Only [`FilterResult::Pixels`] has an intrinsic size; the other variants are synthesized at a
/// requested size by [`FilterResult::materialize`].
#[derive(Clone, Debug)]
pub enum FilterResult {
    /// A concrete pixel buffer, shared between consumers.
    Pixels(Arc<PixelBuffer>),
    /// A flat color.
    Color(Rgba8Premul),
    /// A gradient descriptor.
    Gradient(GradientDesc),
    /// A size-dependent procedural fill.
    Paint(ProceduralPaint),
}

impl FilterResult {
    /// Transparent flat color; the placeholder for failed inputs.
    pub fn transparent() -> Self {
        Self::Color(Rgba8Premul::transparent())
    }

    /// Wrap an owned buffer.
    pub fn pixels(buffer: PixelBuffer) -> Self {
        Self::Pixels(Arc::new(buffer))
    }

    /// The shared buffer when this is [`FilterResult::Pixels`].
    pub fn as_pixels(&self) -> Option<&Arc<PixelBuffer>> {
        match self {
            Self::Pixels(p) => Some(p),
            _ => None,
        }
    }

    /// Whether this result is a concrete pixel buffer.
    pub fn is_pixels(&self) -> bool {
        matches!(self, Self::Pixels(_))
    }

    /// Size of the buffer for [`FilterResult::Pixels`], `None` otherwise.
    pub fn intrinsic_size(&self) -> Option<Size> {
        self.as_pixels().map(|p| p.size())
    }

    /// Produce a pixel buffer of `size`.
    ///
    /// Pixel results are returned as-is regardless of `size`.
    pub fn materialize(&self, size: Size) -> PixelflowResult<Arc<PixelBuffer>> {
        match self {
            Self::Pixels(p) => Ok(Arc::clone(p)),
            Self::Color(c) => Ok(Arc::new(PixelBuffer::filled(size, *c))),
            Self::Gradient(g) => Ok(Arc::new(g.rasterize(size)?)),
            Self::Paint(p) => {
                let out = p.paint(size);
                if out.size() == size {
                    Ok(Arc::new(out))
                } else {
                    Ok(Arc::new(out.resized(size)?))
                }
            }
        }
    }
}

/// One gradient color stop.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct GradientStop {
    /// Position along the gradient in `[0, 1]`.
    pub offset: f32,
    /// Stop color.
    pub color: Rgba8Premul,
}

impl GradientStop {
    /// Construct a stop.
    pub fn new(offset: f32, color: Rgba8Premul) -> Self {
        Self { offset, color }
    }
}

/// Gradient geometry in unit coordinates (`(0,0)` top-left, `(1,1)` bottom-right).
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GradientKind {
    /// Linear ramp from `start` to `end`.
    Linear {
        /// Point where `t = 0`.
        start: Point,
        /// Point where `t = 1`.
        end: Point,
    },
    /// Circular ramp around `center`.
    Radial {
        /// Point where `t = 0`.
        center: Point,
        /// Distance (unit coordinates) where `t = 1`.
        radius: f64,
    },
}

/// Gradient descriptor produced by the gradient filter.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct GradientDesc {
    /// Geometry.
    pub kind: GradientKind,
    /// Color stops, any order.
    pub stops: Vec<GradientStop>,
}

impl GradientDesc {
    /// Left-to-right linear gradient between two colors.
    pub fn horizontal(from: Rgba8Premul, to: Rgba8Premul) -> Self {
        Self {
            kind: GradientKind::Linear {
                start: Point::new(0.0, 0.5),
                end: Point::new(1.0, 0.5),
            },
            stops: vec![GradientStop::new(0.0, from), GradientStop::new(1.0, to)],
        }
    }

    /// Check geometry and stops are finite.
    pub fn validate(&self) -> PixelflowResult<()> {
        let finite = |p: Point| p.x.is_finite() && p.y.is_finite();
        let geometry_ok = match self.kind {
            GradientKind::Linear { start, end } => finite(start) && finite(end),
            GradientKind::Radial { center, radius } => finite(center) && radius.is_finite(),
        };
        if !geometry_ok {
            return Err(PixelflowError::validation("gradient geometry must be finite"));
        }
        if self.stops.iter().any(|s| !s.offset.is_finite()) {
            return Err(PixelflowError::validation("gradient stop offsets must be finite"));
        }
        Ok(())
    }

    /// Color at parameter `t` (clamped to `[0, 1]`), lerped in premultiplied space.
    pub fn color_at(&self, t: f32) -> Rgba8Premul {
        let t = if t.is_finite() { t.clamp(0.0, 1.0) } else { 0.0 };
        let mut stops = self.stops.clone();
        stops.sort_by(|a, b| a.offset.total_cmp(&b.offset));
        sample_sorted(&stops, t)
    }

    /// Rasterize at `size`, sampling at pixel centers.
    pub fn rasterize(&self, size: Size) -> PixelflowResult<PixelBuffer> {
        self.validate()?;
        let mut stops = self.stops.clone();
        stops.sort_by(|a, b| a.offset.total_cmp(&b.offset));

        let mut out = PixelBuffer::new_transparent(size);
        if stops.is_empty() || size.is_empty() {
            return Ok(out);
        }
        let (w, h) = (f64::from(size.width), f64::from(size.height));
        for y in 0..size.height {
            for x in 0..size.width {
                let p = Point::new((f64::from(x) + 0.5) / w, (f64::from(y) + 0.5) / h);
                let t = self.param_at(p);
                out.set_pixel(x, y, sample_sorted(&stops, t as f32).to_array());
            }
        }
        Ok(out)
    }

    fn param_at(&self, p: Point) -> f64 {
        match self.kind {
            GradientKind::Linear { start, end } => {
                let axis = end - start;
                let len2 = axis.hypot2();
                if len2 <= f64::EPSILON {
                    return 0.0;
                }
                ((p - start).dot(axis) / len2).clamp(0.0, 1.0)
            }
            GradientKind::Radial { center, radius } => {
                if radius <= f64::EPSILON {
                    return 1.0;
                }
                ((p - center).hypot() / radius).clamp(0.0, 1.0)
            }
        }
    }
}

fn sample_sorted(stops: &[GradientStop], t: f32) -> Rgba8Premul {
    let Some(first) = stops.first() else {
        return Rgba8Premul::transparent();
    };
    if t <= first.offset {
        return first.color;
    }
    for pair in stops.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        if t <= b.offset {
            let span = b.offset - a.offset;
            let k = if span <= f32::EPSILON {
                1.0
            } else {
                (t - a.offset) / span
            };
            return lerp_color(a.color, b.color, k);
        }
    }
    stops.last().map_or(first.color, |s| s.color)
}

fn lerp_color(a: Rgba8Premul, b: Rgba8Premul, k: f32) -> Rgba8Premul {
    let l = |x: u8, y: u8| -> u8 {
        let v = f32::from(x) + (f32::from(y) - f32::from(x)) * k;
        v.round().clamp(0.0, 255.0) as u8
    };
    Rgba8Premul {
        r: l(a.r, b.r),
        g: l(a.g, b.g),
        b: l(a.b, b.b),
        a: l(a.a, b.a),
    }
}

type PaintFn = dyn Fn(Size) -> PixelBuffer + Send + Sync;

/// Procedural fill evaluated at a requested size.
#[derive(Clone)]
pub struct ProceduralPaint {
    label: Arc<str>,
    paint: Arc<PaintFn>,
}

impl std::fmt::Debug for ProceduralPaint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProceduralPaint")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

impl ProceduralPaint {
    /// Wrap a paint callback. `label` is used in logs and debug output.
    pub fn new(
        label: impl Into<Arc<str>>,
        paint: impl Fn(Size) -> PixelBuffer + Send + Sync + 'static,
    ) -> Self {
        Self {
            label: label.into(),
            paint: Arc::new(paint),
        }
    }

    /// Debug label.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Run the callback.
    pub fn paint(&self, size: Size) -> PixelBuffer {
        (self.paint)(size)
    }
}

#[cfg(test)]
#[path = "../../tests/unit/filter/result.rs"]
mod tests;
