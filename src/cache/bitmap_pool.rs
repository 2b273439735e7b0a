use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use lru::LruCache;

use crate::foundation::core::Size;
use crate::pixel::buffer::{PixelBuffer, PixelFormat, byte_len_for};

static NEXT_POOL_KEY: AtomicU64 = AtomicU64::new(1);

/// Opaque handle for a buffer stored in a [`BitmapPool`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PoolKey(pub u64);

/// Issue a key not returned before in this process.
pub fn next_key() -> PoolKey {
    PoolKey(NEXT_POOL_KEY.fetch_add(1, Ordering::Relaxed))
}

/// Shared store for decoded and filtered bitmaps.
///
/// Keyed entries may disappear at any time under memory pressure; callers must treat
/// [`BitmapPool::get`] returning `None` as an ordinary miss.
pub trait BitmapPool: Send + Sync {
    /// Look up a keyed entry.
    fn get(&self, key: PoolKey) -> Option<Arc<PixelBuffer>>;

    /// Store `buffer` under `key`, replacing any previous entry.
    fn put(&self, key: PoolKey, buffer: Arc<PixelBuffer>);

    /// Drop a keyed entry.
    fn remove(&self, key: PoolKey);

    /// Hand back a buffer nobody needs any more. Its allocation may be reused by
    /// [`BitmapPool::alloc`].
    fn dispose(&self, buffer: Arc<PixelBuffer>);

    /// Allocate a transparent buffer of `size`, reusing a disposed allocation when possible.
    fn alloc(&self, size: Size) -> PixelBuffer;

    /// Whether a keyed entry is resident.
    fn contains(&self, key: PoolKey) -> bool {
        self.get(key).is_some()
    }
}

/// Limits for [`LruBitmapPool`].
#[derive(Debug, Clone, Copy)]
pub struct BitmapPoolOpts {
    /// Maximum bytes retained by keyed entries before least-recently-used eviction.
    pub max_cached_bytes: usize,
    /// Maximum bytes of disposed allocations kept for reuse.
    pub max_recycled_bytes: usize,
    /// Maximum disposed allocations kept per (w,h,format) bucket.
    pub max_recycled_per_bucket: usize,
}

impl Default for BitmapPoolOpts {
    fn default() -> Self {
        Self {
            max_cached_bytes: 128 * 1024 * 1024,
            max_recycled_bytes: 64 * 1024 * 1024,
            max_recycled_per_bucket: 8,
        }
    }
}

impl BitmapPoolOpts {
    /// Set the keyed-entry byte budget.
    pub fn with_max_cached_bytes(mut self, bytes: usize) -> Self {
        self.max_cached_bytes = bytes;
        self
    }

    /// Set the recycle byte budget.
    pub fn with_max_recycled_bytes(mut self, bytes: usize) -> Self {
        self.max_recycled_bytes = bytes;
        self
    }
}

/// Counters reported by [`LruBitmapPool::stats`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PoolStats {
    /// Keyed entries currently resident.
    pub cached_entries: usize,
    /// Bytes held by keyed entries.
    pub cached_bytes: usize,
    /// Disposed allocations waiting for reuse.
    pub recycled_buffers: usize,
    /// Bytes held by disposed allocations.
    pub recycled_bytes: usize,
    /// `get` calls that found an entry.
    pub hits: u64,
    /// `get` calls that found nothing.
    pub misses: u64,
    /// Keyed entries evicted to honor the byte budget.
    pub evictions: u64,
    /// `alloc` calls served by a fresh allocation.
    pub fresh_allocs: u64,
    /// `alloc` calls served from a recycled allocation.
    pub reused_allocs: u64,
    /// Disposed buffers dropped instead of recycled (shared, or over budget).
    pub dropped_on_dispose: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct BucketKey {
    w: u32,
    h: u32,
    format: PixelFormat,
}

impl BucketKey {
    fn of(size: Size, format: PixelFormat) -> Self {
        Self {
            w: size.width,
            h: size.height,
            format,
        }
    }

    fn byte_len(self) -> usize {
        byte_len_for(Size::new(self.w, self.h))
    }
}

struct Entry {
    buffer: Arc<PixelBuffer>,
    bytes: usize,
}

struct Inner {
    // Bounded by bytes, not by count.
    entries: LruCache<PoolKey, Entry>,
    recycled: HashMap<BucketKey, Vec<Vec<u8>>>,
    stats: PoolStats,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            entries: LruCache::unbounded(),
            recycled: HashMap::new(),
            stats: PoolStats::default(),
        }
    }
}

/// In-memory [`BitmapPool`] with LRU eviction of keyed entries and a bounded recycle list.
///
/// All state sits behind one coarse lock; operations are per buffer, never per pixel.
pub struct LruBitmapPool {
    opts: BitmapPoolOpts,
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for LruBitmapPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LruBitmapPool")
            .field("opts", &self.opts)
            .field("stats", &self.stats())
            .finish()
    }
}

impl Default for LruBitmapPool {
    fn default() -> Self {
        Self::new(BitmapPoolOpts::default())
    }
}

impl LruBitmapPool {
    /// Create an empty pool.
    pub fn new(opts: BitmapPoolOpts) -> Self {
        Self {
            opts,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> PoolStats {
        self.lock().stats.clone()
    }

    /// Drop every keyed entry and recycled allocation.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.recycled.clear();
        inner.stats.cached_entries = 0;
        inner.stats.cached_bytes = 0;
        inner.stats.recycled_buffers = 0;
        inner.stats.recycled_bytes = 0;
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn evict_over_budget(&self, inner: &mut Inner) {
        while inner.stats.cached_bytes > self.opts.max_cached_bytes {
            let Some((key, e)) = inner.entries.pop_lru() else {
                break;
            };
            tracing::trace!(key = key.0, bytes = e.bytes, "evicting pooled bitmap");
            inner.stats.cached_entries = inner.stats.cached_entries.saturating_sub(1);
            inner.stats.cached_bytes = inner.stats.cached_bytes.saturating_sub(e.bytes);
            inner.stats.evictions = inner.stats.evictions.saturating_add(1);
            self.recycle(inner, e.buffer);
        }
    }

    fn recycle(&self, inner: &mut Inner, buffer: Arc<PixelBuffer>) {
        if self.opts.max_recycled_bytes == 0 || self.opts.max_recycled_per_bucket == 0 {
            inner.stats.dropped_on_dispose = inner.stats.dropped_on_dispose.saturating_add(1);
            return;
        }
        // Still referenced elsewhere: only this reference goes away.
        let Ok(buffer) = Arc::try_unwrap(buffer) else {
            inner.stats.dropped_on_dispose = inner.stats.dropped_on_dispose.saturating_add(1);
            return;
        };

        let key = BucketKey::of(buffer.size(), buffer.format());
        let bytes = key.byte_len();
        if inner.stats.recycled_bytes.saturating_add(bytes) > self.opts.max_recycled_bytes {
            inner.stats.dropped_on_dispose = inner.stats.dropped_on_dispose.saturating_add(1);
            return;
        }
        let bucket = inner.recycled.entry(key).or_default();
        if bucket.len() >= self.opts.max_recycled_per_bucket {
            inner.stats.dropped_on_dispose = inner.stats.dropped_on_dispose.saturating_add(1);
            return;
        }
        bucket.push(buffer.into_data());
        inner.stats.recycled_buffers = inner.stats.recycled_buffers.saturating_add(1);
        inner.stats.recycled_bytes = inner.stats.recycled_bytes.saturating_add(bytes);
    }
}

impl BitmapPool for LruBitmapPool {
    fn get(&self, key: PoolKey) -> Option<Arc<PixelBuffer>> {
        let mut inner = self.lock();
        match inner.entries.get(&key).map(|e| Arc::clone(&e.buffer)) {
            Some(buffer) => {
                inner.stats.hits = inner.stats.hits.saturating_add(1);
                Some(buffer)
            }
            None => {
                inner.stats.misses = inner.stats.misses.saturating_add(1);
                None
            }
        }
    }

    fn put(&self, key: PoolKey, buffer: Arc<PixelBuffer>) {
        let mut inner = self.lock();
        let bytes = buffer.byte_len();
        if let Some(old) = inner.entries.put(key, Entry { buffer, bytes }) {
            inner.stats.cached_bytes = inner.stats.cached_bytes.saturating_sub(old.bytes);
        } else {
            inner.stats.cached_entries = inner.stats.cached_entries.saturating_add(1);
        }
        inner.stats.cached_bytes = inner.stats.cached_bytes.saturating_add(bytes);
        self.evict_over_budget(&mut inner);
    }

    fn remove(&self, key: PoolKey) {
        let mut inner = self.lock();
        if let Some(e) = inner.entries.pop(&key) {
            inner.stats.cached_entries = inner.stats.cached_entries.saturating_sub(1);
            inner.stats.cached_bytes = inner.stats.cached_bytes.saturating_sub(e.bytes);
            self.recycle(&mut inner, e.buffer);
        }
    }

    fn dispose(&self, buffer: Arc<PixelBuffer>) {
        let mut inner = self.lock();
        self.recycle(&mut inner, buffer);
    }

    fn alloc(&self, size: Size) -> PixelBuffer {
        let key = BucketKey::of(size, PixelFormat::Rgba8Premul);
        let reused = {
            let mut inner = self.lock();
            let data = inner.recycled.get_mut(&key).and_then(Vec::pop);
            if data.is_some() {
                inner.stats.recycled_buffers = inner.stats.recycled_buffers.saturating_sub(1);
                inner.stats.recycled_bytes =
                    inner.stats.recycled_bytes.saturating_sub(key.byte_len());
                inner.stats.reused_allocs = inner.stats.reused_allocs.saturating_add(1);
            } else {
                inner.stats.fresh_allocs = inner.stats.fresh_allocs.saturating_add(1);
            }
            data
        };

        match reused {
            Some(mut data) => {
                data.fill(0);
                PixelBuffer::from_raw(size, data)
                    .unwrap_or_else(|_| PixelBuffer::new_transparent(size))
            }
            None => PixelBuffer::new_transparent(size),
        }
    }

    fn contains(&self, key: PoolKey) -> bool {
        self.lock().entries.contains(&key)
    }
}

#[cfg(test)]
#[path = "../../tests/unit/cache/bitmap_pool.rs"]
mod tests;
