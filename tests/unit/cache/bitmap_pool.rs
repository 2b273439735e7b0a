use super::*;
use crate::foundation::core::Rgba8Premul;

fn buf(w: u32, h: u32) -> Arc<PixelBuffer> {
    Arc::new(PixelBuffer::filled(
        Size::new(w, h),
        Rgba8Premul::from_argb(0xFF11_2233),
    ))
}

#[test]
fn keys_are_unique() {
    let a = next_key();
    let b = next_key();
    assert_ne!(a, b);
}

#[test]
fn put_get_remove() {
    let pool = LruBitmapPool::default();
    let key = next_key();
    assert!(pool.get(key).is_none());
    let b = buf(4, 4);
    pool.put(key, Arc::clone(&b));
    assert!(pool.contains(key));
    assert!(Arc::ptr_eq(&pool.get(key).unwrap(), &b));
    pool.remove(key);
    assert!(!pool.contains(key));

    let st = pool.stats();
    assert_eq!(st.hits, 1);
    assert_eq!(st.misses, 1);
    assert_eq!(st.cached_entries, 0);
    assert_eq!(st.cached_bytes, 0);
}

#[test]
fn lru_entry_is_evicted_first() {
    let one = byte_len_for(Size::new(4, 4));
    let pool = LruBitmapPool::new(BitmapPoolOpts::default().with_max_cached_bytes(2 * one));
    let (a, b, c) = (next_key(), next_key(), next_key());
    pool.put(a, buf(4, 4));
    pool.put(b, buf(4, 4));
    // Touch `a` so `b` becomes least recently used.
    assert!(pool.get(a).is_some());
    pool.put(c, buf(4, 4));

    assert!(pool.contains(a));
    assert!(!pool.contains(b));
    assert!(pool.contains(c));
    let st = pool.stats();
    assert_eq!(st.evictions, 1);
    assert_eq!(st.cached_bytes, 2 * one);
}

#[test]
fn large_put_evicts_oldest_entries_until_within_budget() {
    let one = byte_len_for(Size::new(4, 4));
    let pool = LruBitmapPool::new(BitmapPoolOpts::default().with_max_cached_bytes(4 * one));
    let keys: Vec<_> = (0..4).map(|_| next_key()).collect();
    for &k in &keys {
        pool.put(k, buf(4, 4));
    }
    // `contains` does not refresh recency.
    assert!(pool.contains(keys[0]));
    assert!(pool.get(keys[1]).is_some());

    let big = next_key();
    pool.put(big, buf(4, 8));

    assert!(!pool.contains(keys[0]));
    assert!(!pool.contains(keys[2]));
    assert!(pool.contains(keys[1]));
    assert!(pool.contains(keys[3]));
    assert!(pool.contains(big));
    let st = pool.stats();
    assert_eq!(st.evictions, 2);
    assert_eq!(st.cached_entries, 3);
    assert_eq!(st.cached_bytes, 4 * one);
}

#[test]
fn dispose_recycles_unique_buffers_only() {
    let pool = LruBitmapPool::default();
    let shared = buf(8, 8);
    let other_ref = Arc::clone(&shared);
    pool.dispose(shared);
    assert_eq!(pool.stats().recycled_buffers, 0);
    assert_eq!(pool.stats().dropped_on_dispose, 1);

    pool.dispose(other_ref);
    assert_eq!(pool.stats().recycled_buffers, 1);

    let fresh = pool.alloc(Size::new(8, 8));
    assert_eq!(fresh, PixelBuffer::new_transparent(Size::new(8, 8)));
    let st = pool.stats();
    assert_eq!(st.reused_allocs, 1);
    assert_eq!(st.recycled_buffers, 0);

    pool.alloc(Size::new(8, 8));
    assert_eq!(pool.stats().fresh_allocs, 1);
}

#[test]
fn recycle_honors_bucket_cap_and_byte_cap() {
    let one = byte_len_for(Size::new(8, 8));
    let pool = LruBitmapPool::new(BitmapPoolOpts {
        max_cached_bytes: usize::MAX,
        max_recycled_bytes: one,
        max_recycled_per_bucket: 8,
    });
    pool.dispose(buf(8, 8));
    pool.dispose(buf(8, 8));
    let st = pool.stats();
    assert_eq!(st.recycled_bytes, one);
    assert_eq!(st.recycled_buffers, 1);
    assert_eq!(st.dropped_on_dispose, 1);

    let capped = LruBitmapPool::new(BitmapPoolOpts {
        max_cached_bytes: usize::MAX,
        max_recycled_bytes: usize::MAX,
        max_recycled_per_bucket: 1,
    });
    capped.dispose(buf(2, 2));
    capped.dispose(buf(2, 2));
    assert_eq!(capped.stats().recycled_buffers, 1);
}
