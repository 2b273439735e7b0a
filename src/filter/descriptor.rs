use xxhash_rust::xxh3::Xxh3;

use crate::filter::result::{GradientDesc, GradientKind};
use crate::foundation::core::{Rgba8Premul, Size};
use crate::foundation::error::{PixelflowError, PixelflowResult};
use crate::pixel::blend::BlendMode;
use crate::pixel::noise::NoiseParams;

const XXH3_SEED: u64 = 0x3c6e_f372_fe94_f82b;

/// Free-form parameter bag handed to extension filters.
pub type ExtensionParams = serde_json::Map<String, serde_json::Value>;

/// Filter kind and its parameters.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FilterKind {
    /// Blend source over destination.
    Blend {
        /// Blend mode.
        #[serde(default)]
        mode: BlendMode,
    },
    /// Gaussian blur; `radius` is in canvas units.
    Blur {
        /// Nominal radius.
        radius: f32,
    },
    /// Mix towards luma grayscale.
    Grayscale {
        /// `0` keeps the input, `1` is full grayscale.
        amount: f32,
        /// Resize the source to this size before filtering.
        #[serde(default)]
        target: Option<Size>,
    },
    /// Scale saturation.
    Saturate {
        /// `1` keeps the input, `0` is full grayscale, above `1` oversaturates.
        amount: f32,
        /// Resize the source to this size before filtering.
        #[serde(default)]
        target: Option<Size>,
    },
    /// Seeded noise.
    Noise {
        /// Noise parameters.
        params: NoiseParams,
    },
    /// Flat color.
    Color {
        /// Fill color.
        color: Rgba8Premul,
    },
    /// Gradient fill.
    Gradient {
        /// Gradient descriptor.
        gradient: GradientDesc,
    },
    /// Solid fill.
    Solid {
        /// Fill color.
        color: Rgba8Premul,
    },
    /// Filter implemented by a registered extension.
    Extension {
        /// Extension namespace URI.
        uri: String,
        /// Filter name within the extension.
        name: String,
        /// Parameters passed through to the handler.
        #[serde(default)]
        params: ExtensionParams,
    },
}

impl FilterKind {
    /// Stable lowercase kind name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Blend { .. } => "blend",
            Self::Blur { .. } => "blur",
            Self::Grayscale { .. } => "grayscale",
            Self::Saturate { .. } => "saturate",
            Self::Noise { .. } => "noise",
            Self::Color { .. } => "color",
            Self::Gradient { .. } => "gradient",
            Self::Solid { .. } => "solid",
            Self::Extension { .. } => "extension",
        }
    }
}

/// One entry of a filter chain.
///
/// `source` and `destination` index the pipeline's results list (sources first, then one entry
/// per preceding filter). Negative indices count from the end: `-1` is the most recent result.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FilterDescriptor {
    /// Kind and parameters.
    #[serde(flatten)]
    pub kind: FilterKind,
    /// Source reference; see [`FilterDescriptor::source_ref`] for defaults.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<i32>,
    /// Destination reference; see [`FilterDescriptor::destination_ref`] for defaults.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<i32>,
}

impl FilterDescriptor {
    /// Descriptor with default references.
    pub fn new(kind: FilterKind) -> Self {
        Self {
            kind,
            source: None,
            destination: None,
        }
    }

    /// Set the source reference.
    pub fn with_source(mut self, index: i32) -> Self {
        self.source = Some(index);
        self
    }

    /// Set the destination reference.
    pub fn with_destination(mut self, index: i32) -> Self {
        self.destination = Some(index);
        self
    }

    /// Effective source reference.
    ///
    /// Single-input kinds and blend default to `-1`; zero-input kinds have none; extensions use
    /// only what was given.
    pub fn source_ref(&self) -> Option<i32> {
        match &self.kind {
            FilterKind::Blend { .. }
            | FilterKind::Blur { .. }
            | FilterKind::Grayscale { .. }
            | FilterKind::Saturate { .. }
            | FilterKind::Noise { .. } => Some(self.source.unwrap_or(-1)),
            FilterKind::Extension { .. } => self.source,
            FilterKind::Color { .. } | FilterKind::Gradient { .. } | FilterKind::Solid { .. } => {
                None
            }
        }
    }

    /// Effective destination reference. Blend defaults to `-2`.
    pub fn destination_ref(&self) -> Option<i32> {
        match &self.kind {
            FilterKind::Blend { .. } => Some(self.destination.unwrap_or(-2)),
            FilterKind::Extension { .. } => self.destination,
            _ => None,
        }
    }

    /// Check scalar parameters.
    pub fn validate(&self) -> PixelflowResult<()> {
        let kind = self.kind.name();
        match &self.kind {
            FilterKind::Blend { .. } | FilterKind::Color { .. } | FilterKind::Solid { .. } => {}
            FilterKind::Blur { radius } => {
                if !radius.is_finite() || *radius < 0.0 {
                    return Err(PixelflowError::validation(format!(
                        "{kind}: radius must be finite and >= 0, got {radius}"
                    )));
                }
            }
            FilterKind::Grayscale { amount, target } | FilterKind::Saturate { amount, target } => {
                if !amount.is_finite() {
                    return Err(PixelflowError::validation(format!(
                        "{kind}: amount must be finite"
                    )));
                }
                if target.is_some_and(|t| t.is_empty()) {
                    return Err(PixelflowError::validation(format!(
                        "{kind}: target size must be non-empty"
                    )));
                }
            }
            FilterKind::Noise { params } => {
                if !params.sigma.is_finite() || params.sigma < 0.0 {
                    return Err(PixelflowError::validation(format!(
                        "{kind}: sigma must be finite and >= 0"
                    )));
                }
            }
            FilterKind::Gradient { gradient } => gradient.validate()?,
            FilterKind::Extension { uri, name, .. } => {
                if uri.is_empty() || name.is_empty() {
                    return Err(PixelflowError::validation(
                        "extension: uri and name must be non-empty",
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Map a possibly negative index into `0..len`.
///
/// `index < 0` maps to `len + index`.
pub fn resolve_index(index: i32, len: usize) -> PixelflowResult<usize> {
    let len_i = i64::try_from(len).unwrap_or(i64::MAX);
    let i = i64::from(index);
    let resolved = if i < 0 { len_i + i } else { i };
    if resolved < 0 || resolved >= len_i {
        return Err(PixelflowError::validation(format!(
            "filter reference {index} is out of range for {len} available results"
        )));
    }
    Ok(resolved as usize)
}

/// Stable identity of a filter chain, used as the result cache key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChainFingerprint {
    /// High 64 bits.
    pub hi: u64,
    /// Low 64 bits.
    pub lo: u64,
}

/// Fingerprint a chain; equal chains hash equal across runs and platforms.
pub fn fingerprint_chain(chain: &[FilterDescriptor]) -> ChainFingerprint {
    let mut h = StableHasher::new();
    h.write_u32(chain.len() as u32);
    for d in chain {
        write_descriptor(&mut h, d);
    }
    h.finish()
}

struct StableHasher {
    inner: Xxh3,
}

impl StableHasher {
    fn new() -> Self {
        Self {
            inner: Xxh3::with_seed(XXH3_SEED),
        }
    }

    fn write_bytes(&mut self, b: &[u8]) {
        self.inner.update(b);
    }

    fn write_u8(&mut self, v: u8) {
        self.write_bytes(&[v]);
    }

    fn write_bool(&mut self, v: bool) {
        self.write_u8(u8::from(v));
    }

    fn write_u32(&mut self, v: u32) {
        self.write_bytes(&v.to_le_bytes());
    }

    fn write_i32(&mut self, v: i32) {
        self.write_bytes(&v.to_le_bytes());
    }

    fn write_u64(&mut self, v: u64) {
        self.write_bytes(&v.to_le_bytes());
    }

    fn write_f32(&mut self, v: f32) {
        self.write_u32(v.to_bits());
    }

    fn write_f64(&mut self, v: f64) {
        self.write_u64(v.to_bits());
    }

    fn write_str(&mut self, s: &str) {
        self.write_u32(s.len() as u32);
        self.write_bytes(s.as_bytes());
    }

    fn finish(self) -> ChainFingerprint {
        let v = self.inner.digest128();
        ChainFingerprint {
            hi: (v >> 64) as u64,
            lo: v as u64,
        }
    }
}

fn write_opt_i32(h: &mut StableHasher, v: Option<i32>) {
    match v {
        Some(i) => {
            h.write_u8(1);
            h.write_i32(i);
        }
        None => h.write_u8(0),
    }
}

fn write_opt_size(h: &mut StableHasher, v: Option<Size>) {
    match v {
        Some(s) => {
            h.write_u8(1);
            h.write_u32(s.width);
            h.write_u32(s.height);
        }
        None => h.write_u8(0),
    }
}

fn write_color(h: &mut StableHasher, c: Rgba8Premul) {
    h.write_bytes(&c.to_array());
}

fn write_descriptor(h: &mut StableHasher, d: &FilterDescriptor) {
    // Effective references, so `None` and the explicit default hash alike.
    write_opt_i32(h, d.source_ref());
    write_opt_i32(h, d.destination_ref());
    match &d.kind {
        FilterKind::Blend { mode } => {
            h.write_u8(0);
            h.write_u8(*mode as u8);
        }
        FilterKind::Blur { radius } => {
            h.write_u8(1);
            h.write_f32(*radius);
        }
        FilterKind::Grayscale { amount, target } => {
            h.write_u8(2);
            h.write_f32(*amount);
            write_opt_size(h, *target);
        }
        FilterKind::Saturate { amount, target } => {
            h.write_u8(3);
            h.write_f32(*amount);
            write_opt_size(h, *target);
        }
        FilterKind::Noise { params } => {
            h.write_u8(4);
            h.write_f32(params.sigma);
            h.write_u8(params.kind as u8);
            h.write_bool(params.use_color);
            h.write_u64(params.seed);
        }
        FilterKind::Color { color } => {
            h.write_u8(5);
            write_color(h, *color);
        }
        FilterKind::Gradient { gradient } => {
            h.write_u8(6);
            write_gradient(h, gradient);
        }
        FilterKind::Solid { color } => {
            h.write_u8(7);
            write_color(h, *color);
        }
        FilterKind::Extension { uri, name, params } => {
            h.write_u8(8);
            h.write_str(uri);
            h.write_str(name);
            // `serde_json::Map` iterates in key order, so the encoding is canonical.
            let encoded = serde_json::to_string(params).unwrap_or_default();
            h.write_str(&encoded);
        }
    }
}

fn write_gradient(h: &mut StableHasher, g: &GradientDesc) {
    match g.kind {
        GradientKind::Linear { start, end } => {
            h.write_u8(0);
            for v in [start.x, start.y, end.x, end.y] {
                h.write_f64(v);
            }
        }
        GradientKind::Radial { center, radius } => {
            h.write_u8(1);
            for v in [center.x, center.y, radius] {
                h.write_f64(v);
            }
        }
    }
    h.write_u32(g.stops.len() as u32);
    for s in &g.stops {
        h.write_f32(s.offset);
        write_color(h, s.color);
    }
}

#[cfg(test)]
#[path = "../../tests/unit/filter/descriptor.rs"]
mod tests;
