use crate::foundation::core::{IRect, Rgba8Premul, Size, unpremul_px};
use crate::foundation::error::{PixelflowError, PixelflowResult};

/// Supported pixel formats for buffers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// Premultiplied RGBA8 pixel format.
    Rgba8Premul,
}

impl PixelFormat {
    /// Bytes per pixel.
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgba8Premul => 4,
        }
    }
}

/// Owned 2D pixel buffer: a decoded image region or an intermediate filter surface.
///
/// Pixels are row-major, tightly packed, premultiplied RGBA8.
#[derive(Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    format: PixelFormat,
    data: Vec<u8>,
}

impl std::fmt::Debug for PixelBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PixelBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("bytes", &self.data.len())
            .finish()
    }
}

impl PixelBuffer {
    /// Allocate a fully transparent buffer.
    pub fn new_transparent(size: Size) -> Self {
        Self {
            width: size.width,
            height: size.height,
            format: PixelFormat::Rgba8Premul,
            data: vec![0u8; byte_len_for(size)],
        }
    }

    /// Allocate a buffer filled with one color.
    pub fn filled(size: Size, color: Rgba8Premul) -> Self {
        let mut out = Self::new_transparent(size);
        out.fill(color);
        out
    }

    /// Wrap raw premultiplied RGBA8 bytes, validating the length.
    pub fn from_raw(size: Size, data: Vec<u8>) -> PixelflowResult<Self> {
        let expected = size
            .area()
            .checked_mul(4)
            .ok_or_else(|| PixelflowError::validation("pixel buffer size overflow"))?;
        if data.len() != expected {
            return Err(PixelflowError::validation(format!(
                "pixel buffer expects {expected} bytes for {}x{}, got {}",
                size.width,
                size.height,
                data.len()
            )));
        }
        Ok(Self {
            width: size.width,
            height: size.height,
            format: PixelFormat::Rgba8Premul,
            data,
        })
    }

    /// Width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Buffer dimensions.
    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    /// Pixel format.
    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Total byte length.
    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    /// Raw pixel bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Mutable raw pixel bytes.
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Release the backing allocation.
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Read one premultiplied pixel. Out-of-bounds reads return transparent.
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        if x >= self.width || y >= self.height {
            return [0; 4];
        }
        let i = self.index(x, y);
        [
            self.data[i],
            self.data[i + 1],
            self.data[i + 2],
            self.data[i + 3],
        ]
    }

    /// Write one premultiplied pixel. Out-of-bounds writes are ignored.
    pub fn set_pixel(&mut self, x: u32, y: u32, px: [u8; 4]) {
        if x >= self.width || y >= self.height {
            return;
        }
        let i = self.index(x, y);
        self.data[i..i + 4].copy_from_slice(&px);
    }

    /// Overwrite every pixel with `color`.
    pub fn fill(&mut self, color: Rgba8Premul) {
        let px = color.to_array();
        for c in self.data.chunks_exact_mut(4) {
            c.copy_from_slice(&px);
        }
    }

    /// Copy out the pixels under `rect` (clipped to the buffer bounds).
    pub fn crop(&self, rect: IRect) -> PixelflowResult<PixelBuffer> {
        self.crop_with(rect, PixelBuffer::new_transparent)
    }

    /// Like [`PixelBuffer::crop`], writing into a buffer obtained from `alloc` (e.g. a pool).
    pub fn crop_with(
        &self,
        rect: IRect,
        alloc: impl FnOnce(Size) -> PixelBuffer,
    ) -> PixelflowResult<PixelBuffer> {
        let bounds = IRect::from_size(self.size());
        let clipped = rect.intersect(bounds).ok_or_else(|| {
            PixelflowError::validation(format!(
                "crop rect {rect:?} does not overlap {}x{} buffer",
                self.width, self.height
            ))
        })?;

        let out_size = clipped.size();
        let mut out = alloc(out_size);
        if out.size() != out_size {
            return Err(PixelflowError::evaluation(
                "crop allocator returned a buffer of the wrong size",
            ));
        }
        let row_bytes = out_size.width as usize * 4;
        for (row, y) in (clipped.top..clipped.bottom).enumerate() {
            let src = self.index(clipped.left as u32, y as u32);
            let dst = row * row_bytes;
            out.data[dst..dst + row_bytes].copy_from_slice(&self.data[src..src + row_bytes]);
        }
        Ok(out)
    }

    /// Resample to `size` with a bilinear filter. Returns a clone when already at `size`.
    pub fn resized(&self, size: Size) -> PixelflowResult<PixelBuffer> {
        if size == self.size() {
            return Ok(self.clone());
        }
        if size.is_empty() || self.size().is_empty() {
            return Ok(PixelBuffer::new_transparent(size));
        }
        // Premultiplied data interpolates correctly without unpremultiplying first.
        let img = image::RgbaImage::from_raw(self.width, self.height, self.data.clone())
            .ok_or_else(|| PixelflowError::evaluation("pixel buffer does not match its size"))?;
        let resized = image::imageops::resize(
            &img,
            size.width,
            size.height,
            image::imageops::FilterType::Triangle,
        );
        PixelBuffer::from_raw(size, resized.into_raw())
    }

    /// Export as a straight-alpha `image` buffer (e.g. for PNG encoding in tests and tools).
    pub fn to_straight_rgba_image(&self) -> PixelflowResult<image::RgbaImage> {
        let mut straight = self.data.clone();
        for px in straight.chunks_exact_mut(4) {
            let un = unpremul_px([px[0], px[1], px[2], px[3]]);
            px.copy_from_slice(&un);
        }
        image::RgbaImage::from_raw(self.width, self.height, straight)
            .ok_or_else(|| PixelflowError::evaluation("pixel buffer does not match its size"))
    }

    fn index(&self, x: u32, y: u32) -> usize {
        ((y as usize) * (self.width as usize) + (x as usize)) * 4
    }
}

pub(crate) fn byte_len_for(size: Size) -> usize {
    size.area().saturating_mul(4)
}

#[cfg(test)]
#[path = "../../tests/unit/pixel/buffer.rs"]
mod tests;
