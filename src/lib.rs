//! Pixelflow is the image filter core of a declarative UI renderer.
//!
//! A chain of [`FilterDescriptor`]s is resolved into a DAG of filter steps and evaluated on a
//! worker pool:
//!
//! - Build a [`FilterPipeline`] and submit a [`FilterRequest`]
//! - Feed it sources, optionally decoded on demand through a [`RegionDecodeCache`]
//! - Reuse finished results through a [`FilterResultCache`]
//!
//! Both caches keep their pixels in one shared [`BitmapPool`].
#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod foundation;

pub(crate) mod cache;
pub(crate) mod exec;
pub(crate) mod filter;
pub(crate) mod media;
pub(crate) mod pixel;

pub use crate::foundation::core::{IRect, Point, Rgba8Premul, Size, is_within};
pub use crate::foundation::error::{PixelflowError, PixelflowResult};

pub use crate::cache::bitmap_pool::{
    BitmapPool, BitmapPoolOpts, LruBitmapPool, PoolKey, PoolStats, next_key,
};
pub use crate::cache::decode::{
    DecodeCacheOpts, DecodeCacheStats, DecodedRegion, RegionDecodeCache, needed_sample_size,
    padded_region,
};
pub use crate::cache::filter_results::{
    FilterResultCache, ResultCacheKey, ResultCacheOpts, ResultCacheStats,
};
pub use crate::exec::pipeline::{
    CacheLookup, FilterPipeline, FilterRequest, PipelineHandle, PipelineOpts, RunStats,
    SourceInput,
};
pub use crate::exec::promise::Promise;
pub use crate::filter::descriptor::{
    ChainFingerprint, ExtensionParams, FilterDescriptor, FilterKind, fingerprint_chain,
    resolve_index,
};
pub use crate::filter::extension::{ExtensionRegistry, ImageFilterExtension};
pub use crate::filter::result::{
    FilterResult, GradientDesc, GradientKind, GradientStop, ProceduralPaint,
};
pub use crate::filter::step::{FilterStep, StepContext, StepInput};
pub use crate::media::source::{
    ImageRegionDecoder, MediaId, MediaSource, MemoryMediaSource, RegionDecoder, sampled_size,
};
pub use crate::pixel::blend::{
    BlendMode, blend_alpha, blend_buffers, blend_channel, blend_pixel, blend_rgb,
};
pub use crate::pixel::blur::{
    BLUR_RADIUS_EPSILON, BLUR_RADIUS_MAX, blur_buffer, effective_blur_radius,
};
pub use crate::pixel::buffer::{PixelBuffer, PixelFormat};
pub use crate::pixel::color_matrix::{
    ColorMatrix, LUMA_WEIGHTS, apply_color_matrix, build_grayscale_matrix, build_saturate_matrix,
};
pub use crate::pixel::noise::{
    DEFAULT_NOISE_SEED, NoiseKind, NoiseParams, apply_noise, apply_noise_in_place,
};
pub use crate::pixel::operator::{OperatorSelector, PixelOperator, SoftwareOperator};
