use crate::foundation::error::{PixelflowError, PixelflowResult};
use crate::foundation::math::mul_div255_u8;

pub use kurbo::Point;

/// Integer pixel rectangle, half-open on the right/bottom edges.
///
/// Used for decode regions and filter source regions, always in source-image pixels.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct IRect {
    /// Inclusive left edge.
    pub left: i32,
    /// Inclusive top edge.
    pub top: i32,
    /// Exclusive right edge.
    pub right: i32,
    /// Exclusive bottom edge.
    pub bottom: i32,
}

impl IRect {
    /// Construct a rect from its four edges.
    pub const fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    /// Construct a rect anchored at the origin.
    pub fn from_size(size: Size) -> Self {
        Self::new(
            0,
            0,
            i32::try_from(size.width).unwrap_or(i32::MAX),
            i32::try_from(size.height).unwrap_or(i32::MAX),
        )
    }

    /// Construct a validated rect with `left <= right` and `top <= bottom`.
    pub fn try_new(left: i32, top: i32, right: i32, bottom: i32) -> PixelflowResult<Self> {
        if left > right || top > bottom {
            return Err(PixelflowError::validation(format!(
                "invalid rect [{left},{top},{right},{bottom}]: edges are inverted"
            )));
        }
        Ok(Self::new(left, top, right, bottom))
    }

    /// Width in pixels (0 for inverted rects).
    pub fn width(self) -> u32 {
        self.right.saturating_sub(self.left).max(0) as u32
    }

    /// Height in pixels (0 for inverted rects).
    pub fn height(self) -> u32 {
        self.bottom.saturating_sub(self.top).max(0) as u32
    }

    /// Rect dimensions.
    pub fn size(self) -> Size {
        Size::new(self.width(), self.height())
    }

    /// Return `true` when the rect covers no pixels.
    pub fn is_empty(self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    /// Return `true` when `inner` lies entirely inside `self` (edges may coincide).
    pub fn contains(self, inner: IRect) -> bool {
        is_within(inner, self)
    }

    /// Intersection of two rects, or `None` when they do not overlap.
    pub fn intersect(self, other: IRect) -> Option<IRect> {
        let r = IRect::new(
            self.left.max(other.left),
            self.top.max(other.top),
            self.right.min(other.right),
            self.bottom.min(other.bottom),
        );
        if r.is_empty() { None } else { Some(r) }
    }

    /// Translate by `(dx, dy)` with saturating arithmetic.
    pub fn offset(self, dx: i32, dy: i32) -> IRect {
        IRect::new(
            self.left.saturating_add(dx),
            self.top.saturating_add(dy),
            self.right.saturating_add(dx),
            self.bottom.saturating_add(dy),
        )
    }
}

/// Four-edge containment test: `inner` is within `outer` when no edge of `inner` crosses the
/// matching edge of `outer`. Reflexive.
pub fn is_within(inner: IRect, outer: IRect) -> bool {
    outer.left <= inner.left
        && outer.top <= inner.top
        && outer.right >= inner.right
        && outer.bottom >= inner.bottom
}

/// Pixel dimensions.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct Size {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Size {
    /// Construct a size.
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Return `true` when either dimension is zero.
    pub fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Pixel count, saturating.
    pub fn area(self) -> usize {
        (self.width as usize).saturating_mul(self.height as usize)
    }
}

/// Premultiplied RGBA8 (r,g,b already multiplied by a).
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct Rgba8Premul {
    /// Red channel premultiplied by alpha.
    pub r: u8,
    /// Green channel premultiplied by alpha.
    pub g: u8,
    /// Blue channel premultiplied by alpha.
    pub b: u8,
    /// Alpha channel.
    pub a: u8,
}

impl Rgba8Premul {
    /// Fully transparent black.
    pub const fn transparent() -> Self {
        Self {
            r: 0,
            g: 0,
            b: 0,
            a: 0,
        }
    }

    /// Convert straight-alpha RGBA8 into premultiplied RGBA8.
    pub fn from_straight_rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self {
            r: premul(r, a),
            g: premul(g, a),
            b: premul(b, a),
            a,
        }
    }

    /// Convert a packed straight-alpha `0xAARRGGBB` color.
    pub fn from_argb(argb: u32) -> Self {
        let [a, r, g, b] = argb.to_be_bytes();
        Self::from_straight_rgba(r, g, b, a)
    }

    /// Recover straight-alpha `[r, g, b, a]`.
    pub fn to_straight(self) -> [u8; 4] {
        unpremul_px([self.r, self.g, self.b, self.a])
    }

    /// Channel array in buffer order.
    pub fn to_array(self) -> [u8; 4] {
        [self.r, self.g, self.b, self.a]
    }
}

pub(crate) fn premul(c: u8, a: u8) -> u8 {
    mul_div255_u8(u16::from(c), u16::from(a))
}

pub(crate) fn unpremul_px(px: [u8; 4]) -> [u8; 4] {
    let a = px[3];
    if a == 0 {
        return [0, 0, 0, 0];
    }
    if a == 255 {
        return px;
    }
    let un = |c: u8| -> u8 {
        let v = (u32::from(c) * 255 + u32::from(a) / 2) / u32::from(a);
        v.min(255) as u8
    };
    [un(px[0]), un(px[1]), un(px[2]), a]
}

pub(crate) fn premul_px(px: [u8; 4]) -> [u8; 4] {
    [
        premul(px[0], px[3]),
        premul(px[1], px[3]),
        premul(px[2], px[3]),
        px[3],
    ]
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/core.rs"]
mod tests;
