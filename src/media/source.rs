use std::collections::HashMap;
use std::io::Cursor;
use std::sync::{Arc, RwLock};

use anyhow::Context;

use crate::foundation::core::{IRect, Size};
use crate::foundation::error::{PixelflowError, PixelflowResult};
use crate::pixel::buffer::PixelBuffer;

/// Identity of a media item (typically its URL).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct MediaId(pub String);

impl MediaId {
    /// Construct from anything string-like.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identity string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MediaId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MediaId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Supplies encoded bytes for a media item.
pub trait MediaSource: Send + Sync {
    /// Read the complete encoded payload.
    fn open(&self, media: &MediaId) -> anyhow::Result<Arc<[u8]>>;
}

/// In-memory [`MediaSource`].
#[derive(Debug, Default)]
pub struct MemoryMediaSource {
    items: RwLock<HashMap<MediaId, Arc<[u8]>>>,
}

impl MemoryMediaSource {
    /// Empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an item.
    pub fn insert(&self, media: impl Into<MediaId>, bytes: impl Into<Arc<[u8]>>) {
        let mut items = self
            .items
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        items.insert(media.into(), bytes.into());
    }
}

impl MediaSource for MemoryMediaSource {
    fn open(&self, media: &MediaId) -> anyhow::Result<Arc<[u8]>> {
        let items = self
            .items
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        items
            .get(media)
            .cloned()
            .with_context(|| format!("media '{media}' not found"))
    }
}

/// Decodes rectangular regions of media at a power-of-two sample size.
pub trait RegionDecoder: Send + Sync {
    /// Full pixel size of the media.
    fn intrinsic_size(&self, media: &MediaId) -> PixelflowResult<Size>;

    /// Decode `region` (source pixels) downsampled by `sample_size`.
    ///
    /// The result is `ceil(region.width / sample_size) × ceil(region.height / sample_size)`.
    fn decode_region(
        &self,
        media: &MediaId,
        region: IRect,
        sample_size: u32,
    ) -> PixelflowResult<PixelBuffer>;
}

/// [`RegionDecoder`] over the `image` crate's PNG and JPEG decoders.
#[derive(Debug)]
pub struct ImageRegionDecoder<S> {
    source: S,
}

impl<S: MediaSource> ImageRegionDecoder<S> {
    /// Decode media read from `source`.
    pub fn new(source: S) -> Self {
        Self { source }
    }

    /// The wrapped source.
    pub fn source(&self) -> &S {
        &self.source
    }

    fn bytes(&self, media: &MediaId) -> PixelflowResult<Arc<[u8]>> {
        self.source
            .open(media)
            .map_err(|e| PixelflowError::decode(format!("{e:#}")))
    }
}

/// Output size of a region decoded at `sample_size`.
pub fn sampled_size(region: IRect, sample_size: u32) -> Size {
    let s = sample_size.max(1);
    Size::new(
        region.width().div_ceil(s).max(1),
        region.height().div_ceil(s).max(1),
    )
}

impl<S: MediaSource> RegionDecoder for ImageRegionDecoder<S> {
    fn intrinsic_size(&self, media: &MediaId) -> PixelflowResult<Size> {
        let bytes = self.bytes(media)?;
        let (w, h) = image::ImageReader::new(Cursor::new(&bytes[..]))
            .with_guessed_format()
            .context("sniff image format")
            .and_then(|r| r.into_dimensions().context("read image header"))
            .map_err(|e| PixelflowError::decode(format!("{media}: {e:#}")))?;
        Ok(Size::new(w, h))
    }

    fn decode_region(
        &self,
        media: &MediaId,
        region: IRect,
        sample_size: u32,
    ) -> PixelflowResult<PixelBuffer> {
        let bytes = self.bytes(media)?;
        let img = image::load_from_memory(&bytes)
            .map_err(|e| PixelflowError::decode(format!("{media}: {e}")))?
            .to_rgba8();
        let bounds = IRect::from_size(Size::new(img.width(), img.height()));
        let clipped = region.intersect(bounds).ok_or_else(|| {
            PixelflowError::decode(format!(
                "{media}: region {region:?} lies outside the {}x{} image",
                img.width(),
                img.height()
            ))
        })?;

        let cropped = image::imageops::crop_imm(
            &img,
            clipped.left as u32,
            clipped.top as u32,
            clipped.width(),
            clipped.height(),
        )
        .to_image();
        let out_size = sampled_size(clipped, sample_size);
        let sampled = if out_size == clipped.size() {
            cropped
        } else {
            image::imageops::resize(
                &cropped,
                out_size.width,
                out_size.height,
                image::imageops::FilterType::Triangle,
            )
        };

        let mut data = sampled.into_raw();
        premultiply_rgba8_in_place(&mut data);
        PixelBuffer::from_raw(out_size, data)
    }
}

fn premultiply_rgba8_in_place(rgba: &mut [u8]) {
    for px in rgba.chunks_exact_mut(4) {
        let a = u16::from(px[3]);
        if a == 0 {
            px[..3].fill(0);
            continue;
        }
        for c in &mut px[..3] {
            *c = ((u16::from(*c) * a + 127) / 255) as u8;
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/media/source.rs"]
mod tests;
