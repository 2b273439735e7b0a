use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::cache::bitmap_pool::{BitmapPool, PoolKey, next_key};
use crate::exec::promise::Promise;
use crate::exec::scheduler::build_thread_pool;
use crate::filter::result::FilterResult;
use crate::foundation::core::{IRect, Size};
use crate::foundation::error::{PixelflowError, PixelflowResult};
use crate::foundation::math::prev_power_of_two;
use crate::media::source::{MediaId, RegionDecoder};
use crate::pixel::buffer::PixelBuffer;

/// Configuration for [`RegionDecodeCache`].
#[derive(Debug, Clone, Copy)]
pub struct DecodeCacheOpts {
    /// Decode worker threads; `None` uses rayon's default.
    pub threads: Option<usize>,
    /// Records not observed for more than this many epochs are dropped by
    /// [`RegionDecodeCache::advance_epoch`].
    pub max_idle_epochs: u64,
}

impl Default for DecodeCacheOpts {
    fn default() -> Self {
        Self {
            threads: None,
            max_idle_epochs: 3,
        }
    }
}

impl DecodeCacheOpts {
    /// Set the worker thread count.
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads);
        self
    }

    /// Set the idle epoch budget.
    pub fn with_max_idle_epochs(mut self, epochs: u64) -> Self {
        self.max_idle_epochs = epochs;
        self
    }
}

/// A decoded area of a media item.
#[derive(Clone, Debug)]
pub struct DecodedRegion {
    /// Decoded pixels, `region` downsampled by `sample_size`.
    pub buffer: Arc<PixelBuffer>,
    /// Source-pixel area covered by `buffer`.
    pub region: IRect,
    /// Downsampling factor.
    pub sample_size: u32,
}

impl DecodedRegion {
    /// Crop the part covering `requested` (source pixels) at the decoded resolution.
    pub fn view(&self, requested: IRect) -> PixelflowResult<PixelBuffer> {
        self.view_with(requested, PixelBuffer::new_transparent)
    }

    fn view_with(
        &self,
        requested: IRect,
        alloc: impl FnOnce(Size) -> PixelBuffer,
    ) -> PixelflowResult<PixelBuffer> {
        if !self.region.contains(requested) {
            return Err(PixelflowError::validation(format!(
                "requested {requested:?} is not inside decoded {:?}",
                self.region
            )));
        }
        if requested == self.region {
            return Ok(self.buffer.as_ref().clone());
        }
        let s = self.sample_size.max(1) as i32;
        let rel = requested.offset(-self.region.left, -self.region.top);
        let rect = IRect::new(
            rel.left.div_euclid(s),
            rel.top.div_euclid(s),
            (rel.right + s - 1).div_euclid(s),
            (rel.bottom + s - 1).div_euclid(s),
        );
        self.buffer.crop_with(rect, alloc)
    }
}

/// Largest power of two `<= min(region / target)` per axis; never below 1.
pub fn needed_sample_size(region: IRect, target: Size) -> u32 {
    if target.is_empty() {
        return 1;
    }
    let rx = region.width() / target.width;
    let ry = region.height() / target.height;
    prev_power_of_two(rx.min(ry))
}

/// Grow `region` to power-of-two edges (near edges down, far edges up), clipped to `bounds`.
pub fn padded_region(region: IRect, bounds: Size) -> IRect {
    let near = |v: i32| -> i32 {
        if v <= 0 {
            0
        } else {
            prev_power_of_two(v as u32) as i32
        }
    };
    let far = |v: i32| -> i32 {
        if v <= 0 {
            0
        } else {
            (v as u32)
                .checked_next_power_of_two()
                .map_or(i32::MAX, |p| i32::try_from(p).unwrap_or(i32::MAX))
        }
    };
    let grown = IRect::new(
        near(region.left),
        near(region.top),
        far(region.right),
        far(region.bottom),
    );
    grown
        .intersect(IRect::from_size(bounds))
        .unwrap_or(region)
}

#[derive(Debug, Clone, Copy)]
struct DecodeRecord {
    region: IRect,
    sample_size: u32,
    pool_key: PoolKey,
    last_epoch: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DecodeKey {
    media: MediaId,
    region: IRect,
    sample_size: u32,
}

/// In-flight decodes; at most one per key.
#[derive(Default)]
struct PendingDecodeTable {
    inflight: HashMap<DecodeKey, Promise<DecodedRegion>>,
}

impl PendingDecodeTable {
    fn get(&self, key: &DecodeKey) -> Option<Promise<DecodedRegion>> {
        self.inflight.get(key).cloned()
    }

    fn insert(&mut self, key: DecodeKey, promise: Promise<DecodedRegion>) {
        self.inflight.insert(key, promise);
    }

    fn remove(&mut self, key: &DecodeKey) {
        self.inflight.remove(key);
    }

    fn len(&self) -> usize {
        self.inflight.len()
    }
}

#[derive(Default)]
struct Index {
    records: HashMap<MediaId, Vec<DecodeRecord>>,
    sizes: HashMap<MediaId, Size>,
    epoch: u64,
}

/// Counters reported by [`RegionDecodeCache::stats`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DecodeCacheStats {
    /// Underlying decodes started.
    pub decodes: u64,
    /// Requests answered from a live record.
    pub hits: u64,
    /// Requests that joined an in-flight decode.
    pub attached: u64,
    /// Live records across all media.
    pub records: usize,
    /// Decodes currently in flight.
    pub pending: usize,
}

struct Shared {
    decoder: Arc<dyn RegionDecoder>,
    pool: Arc<dyn BitmapPool>,
    opts: DecodeCacheOpts,
    threads: rayon::ThreadPool,
    index: Mutex<Index>,
    pending: Mutex<PendingDecodeTable>,
    decodes: AtomicU64,
    hits: AtomicU64,
    attached: AtomicU64,
}

fn lock<S>(m: &Mutex<S>) -> MutexGuard<'_, S> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Cache of decoded media regions keyed by `(media, region, sample size)`.
///
/// A request is answered by any live record of the same media whose region contains the request
/// and whose sample size is no coarser than needed. Misses decode a padded region on the cache's
/// worker pool; concurrent identical misses share one decode.
#[derive(Clone)]
pub struct RegionDecodeCache {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for RegionDecodeCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegionDecodeCache")
            .field("opts", &self.shared.opts)
            .field("stats", &self.stats())
            .finish()
    }
}

impl RegionDecodeCache {
    /// Create a cache storing decoded pixels in `pool`.
    pub fn new(
        decoder: Arc<dyn RegionDecoder>,
        pool: Arc<dyn BitmapPool>,
        opts: DecodeCacheOpts,
    ) -> PixelflowResult<Self> {
        let threads = build_thread_pool(opts.threads, "decode")?;
        Ok(Self {
            shared: Arc::new(Shared {
                decoder,
                pool,
                opts,
                threads,
                index: Mutex::new(Index::default()),
                pending: Mutex::new(PendingDecodeTable::default()),
                decodes: AtomicU64::new(0),
                hits: AtomicU64::new(0),
                attached: AtomicU64::new(0),
            }),
        })
    }

    /// The pool decoded pixels are stored in.
    pub fn pool(&self) -> &Arc<dyn BitmapPool> {
        &self.shared.pool
    }

    /// Request `region` of `media` for display at `target` size.
    ///
    /// The promise fails with [`PixelflowError::Decode`] when reading or decoding fails; failures
    /// are not retried, but a later request starts a fresh decode.
    #[tracing::instrument(skip(self))]
    pub fn request_region(
        &self,
        media: &MediaId,
        region: IRect,
        target: Size,
    ) -> Promise<DecodedRegion> {
        if region.is_empty() {
            return Promise::failed(PixelflowError::validation(format!(
                "decode region {region:?} is empty"
            )));
        }
        let needed = needed_sample_size(region, target);

        if let Some(hit) = self.lookup(media, region, needed) {
            self.shared.hits.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(sample_size = hit.sample_size, "decode cache hit");
            return Promise::resolved(hit);
        }

        let bounds = match self.intrinsic_size(media) {
            Ok(b) => b,
            Err(err) => return Promise::failed(err),
        };
        if !IRect::from_size(bounds).contains(region) {
            return Promise::failed(PixelflowError::validation(format!(
                "decode region {region:?} exceeds the {}x{} media",
                bounds.width, bounds.height
            )));
        }
        let key = DecodeKey {
            media: media.clone(),
            region: padded_region(region, bounds),
            sample_size: needed,
        };

        // Records are published before their pending entry is removed; re-check under this lock.
        let fresh = Promise::new();
        {
            let mut pending = lock(&self.shared.pending);
            if let Some(existing) = pending.get(&key) {
                self.shared.attached.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(region = ?key.region, "joined in-flight decode");
                return existing;
            }
            if let Some(hit) = self.lookup(media, region, needed) {
                self.shared.hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(sample_size = hit.sample_size, "decode cache hit after in-flight decode");
                return Promise::resolved(hit);
            }
            pending.insert(key.clone(), fresh.clone());
        }

        tracing::debug!(region = ?key.region, sample_size = needed, "decode cache miss");
        self.shared.decodes.fetch_add(1, Ordering::Relaxed);
        let shared = Arc::clone(&self.shared);
        let promise = fresh.clone();
        self.shared.threads.spawn(move || {
            let outcome = shared.decode(&key);
            lock(&shared.pending).remove(&key);
            promise.complete(outcome);
        });
        fresh
    }

    /// Like [`RegionDecodeCache::request_region`], resolving to exactly `region` as pixels.
    pub fn request_view(&self, media: &MediaId, region: IRect, target: Size) -> Promise<FilterResult> {
        let pool = Arc::clone(&self.shared.pool);
        self.request_region(media, region, target).map(move |decoded| {
            let view = decoded.view_with(region, |size| pool.alloc(size))?;
            Ok(FilterResult::pixels(view))
        })
    }

    /// Start a new epoch and drop records that are stale or whose pixels left the pool.
    pub fn advance_epoch(&self) -> u64 {
        let mut index = lock(&self.shared.index);
        index.epoch = index.epoch.saturating_add(1);
        let epoch = index.epoch;
        let max_idle = self.shared.opts.max_idle_epochs;
        let pool = &self.shared.pool;
        let mut dropped = 0usize;
        for list in index.records.values_mut() {
            list.retain(|r| {
                let live = pool.contains(r.pool_key);
                let fresh = epoch.saturating_sub(r.last_epoch) <= max_idle;
                if live && !fresh {
                    pool.remove(r.pool_key);
                }
                let keep = live && fresh;
                dropped += usize::from(!keep);
                keep
            });
        }
        index.records.retain(|_, list| !list.is_empty());
        if dropped > 0 {
            tracing::debug!(epoch, dropped, "pruned decode records");
        }
        epoch
    }

    /// Current epoch.
    pub fn epoch(&self) -> u64 {
        lock(&self.shared.index).epoch
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> DecodeCacheStats {
        let records = lock(&self.shared.index)
            .records
            .values()
            .map(Vec::len)
            .sum();
        DecodeCacheStats {
            decodes: self.shared.decodes.load(Ordering::Relaxed),
            hits: self.shared.hits.load(Ordering::Relaxed),
            attached: self.shared.attached.load(Ordering::Relaxed),
            records,
            pending: lock(&self.shared.pending).len(),
        }
    }

    fn lookup(&self, media: &MediaId, region: IRect, needed: u32) -> Option<DecodedRegion> {
        let mut index = lock(&self.shared.index);
        let epoch = index.epoch;
        let list = index.records.get_mut(media)?;
        let mut found = None;
        list.retain_mut(|r| {
            if found.is_some() || r.sample_size > needed || !r.region.contains(region) {
                return true;
            }
            match self.shared.pool.get(r.pool_key) {
                Some(buffer) => {
                    r.last_epoch = epoch;
                    found = Some(DecodedRegion {
                        buffer,
                        region: r.region,
                        sample_size: r.sample_size,
                    });
                    true
                }
                // Evicted from the pool: the record is dead.
                None => false,
            }
        });
        found
    }

    fn intrinsic_size(&self, media: &MediaId) -> PixelflowResult<Size> {
        if let Some(size) = lock(&self.shared.index).sizes.get(media) {
            return Ok(*size);
        }
        let size = self.shared.decoder.intrinsic_size(media)?;
        lock(&self.shared.index).sizes.insert(media.clone(), size);
        Ok(size)
    }
}

impl Shared {
    fn decode(&self, key: &DecodeKey) -> PixelflowResult<DecodedRegion> {
        let buffer = match self
            .decoder
            .decode_region(&key.media, key.region, key.sample_size)
        {
            Ok(b) => Arc::new(b),
            Err(err) => {
                tracing::warn!(media = %key.media, region = ?key.region, error = %err, "region decode failed");
                return Err(err);
            }
        };
        let pool_key = next_key();
        self.pool.put(pool_key, Arc::clone(&buffer));

        let mut index = lock(&self.index);
        let epoch = index.epoch;
        index
            .records
            .entry(key.media.clone())
            .or_default()
            .push(DecodeRecord {
                region: key.region,
                sample_size: key.sample_size,
                pool_key,
                last_epoch: epoch,
            });

        Ok(DecodedRegion {
            buffer,
            region: key.region,
            sample_size: key.sample_size,
        })
    }
}

#[cfg(test)]
#[path = "../../tests/unit/cache/decode.rs"]
mod tests;
