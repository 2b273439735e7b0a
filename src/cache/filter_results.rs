use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::cache::bitmap_pool::{BitmapPool, PoolKey, next_key};
use crate::filter::descriptor::ChainFingerprint;
use crate::foundation::core::{IRect, Size};
use crate::foundation::error::PixelflowResult;
use crate::media::source::MediaId;
use crate::pixel::buffer::PixelBuffer;

/// Identity of a filtered result: which chain ran over which media.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResultCacheKey {
    /// Fingerprint of the filter chain.
    pub chain: ChainFingerprint,
    /// Media the chain's source was decoded from.
    pub media: MediaId,
}

impl ResultCacheKey {
    /// Construct a key.
    pub fn new(chain: ChainFingerprint, media: MediaId) -> Self {
        Self { chain, media }
    }
}

/// Configuration for [`FilterResultCache`].
#[derive(Debug, Clone, Copy)]
pub struct ResultCacheOpts {
    /// Records not observed for more than this many epochs are dropped.
    pub max_idle_epochs: u64,
}

impl Default for ResultCacheOpts {
    fn default() -> Self {
        Self { max_idle_epochs: 3 }
    }
}

#[derive(Debug, Clone, Copy)]
struct ResultRecord {
    region: IRect,
    size: Size,
    pool_key: PoolKey,
    last_epoch: u64,
}

impl ResultRecord {
    /// Pixel size obtainable for `query` by cropping this record's bitmap.
    fn achievable(&self, query: IRect) -> Size {
        let scale = |bitmap: u32, q: u32, r: u32| -> u32 {
            if r == 0 {
                return 0;
            }
            (u64::from(bitmap) * u64::from(q) / u64::from(r)) as u32
        };
        Size::new(
            scale(self.size.width, query.width(), self.region.width()),
            scale(self.size.height, query.height(), self.region.height()),
        )
    }

    /// Bitmap-space rect covering `query` (which must lie inside `self.region`).
    fn bitmap_rect(&self, query: IRect) -> IRect {
        let map = |v: i32, origin: i32, bitmap: u32, r: u32, round_up: bool| -> i32 {
            let rel = i64::from(v - origin) * i64::from(bitmap);
            let r = i64::from(r.max(1));
            let q = if round_up { (rel + r - 1) / r } else { rel / r };
            q as i32
        };
        let (w, h) = (self.region.width(), self.region.height());
        IRect::new(
            map(query.left, self.region.left, self.size.width, w, false),
            map(query.top, self.region.top, self.size.height, h, false),
            map(query.right, self.region.left, self.size.width, w, true),
            map(query.bottom, self.region.top, self.size.height, h, true),
        )
    }
}

#[derive(Default)]
struct ResultIndex {
    records: HashMap<ResultCacheKey, Vec<ResultRecord>>,
    epoch: u64,
}

/// Counters reported by [`FilterResultCache::stats`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ResultCacheStats {
    /// Queries answered from a record.
    pub hits: u64,
    /// Queries with no satisfying record.
    pub misses: u64,
    /// Live records.
    pub records: usize,
}

/// Cache of already-filtered results.
///
/// A record answers a query when its source region contains the query region and the part of
/// its bitmap covering the query is at least the requested target size. The first satisfying
/// record in insertion order wins.
pub struct FilterResultCache {
    pool: Arc<dyn BitmapPool>,
    opts: ResultCacheOpts,
    index: Mutex<ResultIndex>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl std::fmt::Debug for FilterResultCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterResultCache")
            .field("opts", &self.opts)
            .field("stats", &self.stats())
            .finish()
    }
}

fn lock<S>(m: &Mutex<S>) -> MutexGuard<'_, S> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl FilterResultCache {
    /// Create a cache storing results in `pool`.
    pub fn new(pool: Arc<dyn BitmapPool>, opts: ResultCacheOpts) -> Self {
        Self {
            pool,
            opts,
            index: Mutex::new(ResultIndex::default()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// The pool results are stored in.
    pub fn pool(&self) -> &Arc<dyn BitmapPool> {
        &self.pool
    }

    /// Look up a result covering `region` with at least `target` pixels.
    ///
    /// Returns the pixels covering exactly `region`, at the cached density (which may exceed
    /// `target`).
    pub fn get(
        &self,
        key: &ResultCacheKey,
        region: IRect,
        target: Size,
    ) -> PixelflowResult<Option<Arc<PixelBuffer>>> {
        let found = {
            let mut index = lock(&self.index);
            let epoch = index.epoch;
            let mut found = None;
            if let Some(list) = index.records.get_mut(key) {
                list.retain_mut(|r| {
                    if found.is_some() || !r.region.contains(region) {
                        return true;
                    }
                    let achievable = r.achievable(region);
                    if achievable.width < target.width || achievable.height < target.height {
                        return true;
                    }
                    match self.pool.get(r.pool_key) {
                        Some(buffer) => {
                            r.last_epoch = epoch;
                            found = Some((*r, buffer));
                            true
                        }
                        None => false,
                    }
                });
            }
            found
        };

        let Some((record, buffer)) = found else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(?region, ?target, "result cache miss");
            return Ok(None);
        };
        self.hits.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(?region, cached = ?record.region, "result cache hit");
        if region == record.region {
            return Ok(Some(buffer));
        }
        let view = buffer.crop_with(record.bitmap_rect(region), |size| self.pool.alloc(size))?;
        Ok(Some(Arc::new(view)))
    }

    /// Record `buffer` as the result of `key` over `region`.
    pub fn put(&self, key: ResultCacheKey, region: IRect, buffer: Arc<PixelBuffer>) -> PoolKey {
        let pool_key = next_key();
        let size = buffer.size();
        self.pool.put(pool_key, buffer);
        let mut index = lock(&self.index);
        let epoch = index.epoch;
        index.records.entry(key).or_default().push(ResultRecord {
            region,
            size,
            pool_key,
            last_epoch: epoch,
        });
        pool_key
    }

    /// Start a new epoch and drop records that are stale or whose pixels left the pool.
    pub fn advance_epoch(&self) -> u64 {
        let mut index = lock(&self.index);
        index.epoch = index.epoch.saturating_add(1);
        let epoch = index.epoch;
        let max_idle = self.opts.max_idle_epochs;
        let pool = &self.pool;
        for list in index.records.values_mut() {
            list.retain(|r| {
                let live = pool.contains(r.pool_key);
                let fresh = epoch.saturating_sub(r.last_epoch) <= max_idle;
                if live && !fresh {
                    pool.remove(r.pool_key);
                }
                live && fresh
            });
        }
        index.records.retain(|_, list| !list.is_empty());
        epoch
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> ResultCacheStats {
        ResultCacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            records: lock(&self.index).records.values().map(Vec::len).sum(),
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/cache/filter_results.rs"]
mod tests;
