use std::sync::atomic::AtomicUsize;
use std::time::Duration;

use super::*;
use crate::cache::bitmap_pool::{BitmapPoolOpts, LruBitmapPool};
use crate::foundation::core::Rgba8Premul;
use crate::media::source::sampled_size;

struct FakeDecoder {
    size: Size,
    decodes: AtomicUsize,
    gate: Promise<()>,
    fail: bool,
    size_calls: AtomicUsize,
    // The first `intrinsic_size` call completes `parked`, then waits for `size_gate`.
    parked: Promise<()>,
    size_gate: Promise<()>,
}

impl FakeDecoder {
    fn new(size: Size) -> Self {
        Self {
            size,
            decodes: AtomicUsize::new(0),
            gate: Promise::resolved(()),
            fail: false,
            size_calls: AtomicUsize::new(0),
            parked: Promise::new(),
            size_gate: Promise::resolved(()),
        }
    }
}

impl RegionDecoder for FakeDecoder {
    fn intrinsic_size(&self, _media: &MediaId) -> PixelflowResult<Size> {
        if self.size_calls.fetch_add(1, Ordering::SeqCst) == 0 {
            self.parked.complete(Ok(()));
            self.size_gate.wait()?;
        }
        Ok(self.size)
    }

    fn decode_region(
        &self,
        _media: &MediaId,
        region: IRect,
        sample_size: u32,
    ) -> PixelflowResult<PixelBuffer> {
        self.decodes.fetch_add(1, Ordering::SeqCst);
        self.gate.wait()?;
        if self.fail {
            return Err(PixelflowError::decode("corrupt stream"));
        }
        Ok(PixelBuffer::filled(
            sampled_size(region, sample_size),
            Rgba8Premul::from_argb(0xFF20_4060),
        ))
    }
}

fn cache_with(decoder: Arc<FakeDecoder>) -> RegionDecodeCache {
    RegionDecodeCache::new(
        decoder,
        Arc::new(LruBitmapPool::default()),
        DecodeCacheOpts::default().with_threads(2),
    )
    .unwrap()
}

fn wait(p: &Promise<DecodedRegion>) -> PixelflowResult<DecodedRegion> {
    p.wait_timeout(Duration::from_secs(10))
}

#[test]
fn sample_size_is_floor_power_of_two_and_never_upsamples() {
    let r = IRect::new(0, 0, 1000, 800);
    assert_eq!(needed_sample_size(r, Size::new(1000, 800)), 1);
    assert_eq!(needed_sample_size(r, Size::new(2000, 2000)), 1);
    assert_eq!(needed_sample_size(r, Size::new(250, 200)), 4);
    assert_eq!(needed_sample_size(r, Size::new(300, 200)), 2);
    assert_eq!(needed_sample_size(r, Size::new(0, 10)), 1);
}

#[test]
fn padded_region_grows_to_powers_of_two_within_bounds() {
    let bounds = Size::new(1000, 600);
    assert_eq!(
        padded_region(IRect::new(100, 200, 300, 400), bounds),
        IRect::new(64, 128, 512, 512)
    );
    assert_eq!(
        padded_region(IRect::new(0, 0, 700, 500), bounds),
        IRect::new(0, 0, 1000, 512)
    );
    let r = IRect::new(3, 5, 9, 17);
    assert!(padded_region(r, bounds).contains(r));
}

#[test]
fn view_crops_at_decoded_resolution() {
    let mut buf = PixelBuffer::new_transparent(Size::new(8, 8));
    buf.set_pixel(2, 1, [1, 2, 3, 255]);
    let decoded = DecodedRegion {
        buffer: Arc::new(buf),
        region: IRect::new(0, 0, 16, 16),
        sample_size: 2,
    };
    let v = decoded.view(IRect::new(4, 2, 12, 10)).unwrap();
    assert_eq!(v.size(), Size::new(4, 4));
    assert_eq!(v.pixel(0, 0), [1, 2, 3, 255]);
    assert!(decoded.view(IRect::new(0, 0, 20, 4)).is_err());
}

#[test]
fn identical_concurrent_requests_share_one_decode() {
    let mut fake = FakeDecoder::new(Size::new(512, 512));
    fake.gate = Promise::new();
    let fake = Arc::new(fake);
    let cache = cache_with(Arc::clone(&fake));
    let media = MediaId::new("photo.jpg");
    let region = IRect::new(10, 10, 100, 100);

    let a = cache.request_region(&media, region, Size::new(90, 90));
    let b = cache.request_region(&media, region, Size::new(90, 90));
    assert_eq!(cache.stats().attached, 1);
    fake.gate.complete(Ok(()));

    let (a, b) = (wait(&a).unwrap(), wait(&b).unwrap());
    assert!(Arc::ptr_eq(&a.buffer, &b.buffer));
    assert_eq!(fake.decodes.load(Ordering::SeqCst), 1);
    assert_eq!(cache.stats().pending, 0);
}

#[test]
fn request_missing_before_a_decode_finishes_reuses_its_record() {
    let mut fake = FakeDecoder::new(Size::new(256, 256));
    fake.size_gate = Promise::new();
    let fake = Arc::new(fake);
    let cache = cache_with(Arc::clone(&fake));
    let media = MediaId::new("photo.jpg");
    let region = IRect::new(0, 0, 100, 100);
    let target = Size::new(100, 100);

    // The late caller misses the index, then stalls resolving the media size.
    let late = {
        let cache = cache.clone();
        let media = media.clone();
        std::thread::spawn(move || cache.request_region(&media, region, target))
    };
    fake.parked.wait_timeout(Duration::from_secs(10)).unwrap();

    let first = wait(&cache.request_region(&media, region, target)).unwrap();
    assert_eq!(cache.stats().pending, 0);

    fake.size_gate.complete(Ok(()));
    let late = wait(&late.join().unwrap()).unwrap();

    assert_eq!(fake.decodes.load(Ordering::SeqCst), 1);
    assert!(Arc::ptr_eq(&first.buffer, &late.buffer));
    let stats = cache.stats();
    assert_eq!((stats.decodes, stats.hits, stats.records), (1, 1, 1));
}

#[test]
fn contained_region_reuses_record() {
    let fake = Arc::new(FakeDecoder::new(Size::new(512, 512)));
    let cache = cache_with(Arc::clone(&fake));
    let media = MediaId::new("photo.jpg");

    let first = wait(&cache.request_region(&media, IRect::new(10, 10, 100, 100), Size::new(90, 90)))
        .unwrap();
    assert_eq!(first.region, IRect::new(8, 8, 128, 128));

    let inner = wait(&cache.request_region(&media, IRect::new(20, 20, 60, 60), Size::new(40, 40)))
        .unwrap();
    assert!(Arc::ptr_eq(&first.buffer, &inner.buffer));
    assert_eq!(fake.decodes.load(Ordering::SeqCst), 1);
    assert_eq!(cache.stats().hits, 1);
}

#[test]
fn coarser_record_is_not_used_for_finer_request() {
    let fake = Arc::new(FakeDecoder::new(Size::new(512, 512)));
    let cache = cache_with(Arc::clone(&fake));
    let media = MediaId::new("photo.jpg");
    let region = IRect::new(0, 0, 256, 256);

    let coarse = wait(&cache.request_region(&media, region, Size::new(64, 64))).unwrap();
    assert_eq!(coarse.sample_size, 4);
    let fine = wait(&cache.request_region(&media, region, Size::new(256, 256))).unwrap();
    assert_eq!(fine.sample_size, 1);
    assert_eq!(fake.decodes.load(Ordering::SeqCst), 2);

    // The fine record now satisfies coarse requests too.
    let again = wait(&cache.request_region(&media, region, Size::new(64, 64))).unwrap();
    assert!(again.sample_size <= 4);
    assert_eq!(fake.decodes.load(Ordering::SeqCst), 2);
}

#[test]
fn failed_decode_is_reported_and_retried_on_next_request() {
    let mut fake = FakeDecoder::new(Size::new(64, 64));
    fake.fail = true;
    let fake = Arc::new(fake);
    let cache = cache_with(Arc::clone(&fake));
    let media = MediaId::new("broken.png");
    let region = IRect::new(0, 0, 32, 32);

    let err = wait(&cache.request_region(&media, region, Size::new(32, 32))).unwrap_err();
    assert!(matches!(err, PixelflowError::Decode(_)));
    assert_eq!(cache.stats().pending, 0);

    let _ = wait(&cache.request_region(&media, region, Size::new(32, 32)));
    assert_eq!(fake.decodes.load(Ordering::SeqCst), 2);
}

#[test]
fn out_of_bounds_and_empty_regions_are_rejected() {
    let fake = Arc::new(FakeDecoder::new(Size::new(64, 64)));
    let cache = cache_with(Arc::clone(&fake));
    let media = MediaId::new("small.png");
    let err = wait(&cache.request_region(&media, IRect::new(0, 0, 65, 10), Size::new(8, 8)))
        .unwrap_err();
    assert!(matches!(err, PixelflowError::Validation(_)));
    assert!(wait(&cache.request_region(&media, IRect::new(5, 5, 5, 9), Size::new(8, 8))).is_err());
    assert_eq!(fake.decodes.load(Ordering::SeqCst), 0);
}

#[test]
fn stale_records_are_pruned_by_epoch() {
    let fake = Arc::new(FakeDecoder::new(Size::new(128, 128)));
    let pool = Arc::new(LruBitmapPool::new(BitmapPoolOpts::default()));
    let cache = RegionDecodeCache::new(
        Arc::clone(&fake) as Arc<dyn RegionDecoder>,
        Arc::clone(&pool) as Arc<dyn BitmapPool>,
        DecodeCacheOpts::default().with_threads(1).with_max_idle_epochs(1),
    )
    .unwrap();
    let media = MediaId::new("a.png");
    let region = IRect::new(0, 0, 64, 64);

    wait(&cache.request_region(&media, region, Size::new(64, 64))).unwrap();
    assert_eq!(cache.stats().records, 1);
    cache.advance_epoch();
    assert_eq!(cache.stats().records, 1);
    cache.advance_epoch();
    assert_eq!(cache.stats().records, 0);
    assert_eq!(pool.stats().cached_entries, 0);

    wait(&cache.request_region(&media, region, Size::new(64, 64))).unwrap();
    assert_eq!(fake.decodes.load(Ordering::SeqCst), 2);
}

#[test]
fn evicted_pool_entry_invalidates_record() {
    let fake = Arc::new(FakeDecoder::new(Size::new(128, 128)));
    let pool = Arc::new(LruBitmapPool::default());
    let cache = RegionDecodeCache::new(
        Arc::clone(&fake) as Arc<dyn RegionDecoder>,
        Arc::clone(&pool) as Arc<dyn BitmapPool>,
        DecodeCacheOpts::default().with_threads(1),
    )
    .unwrap();
    let media = MediaId::new("a.png");
    let region = IRect::new(0, 0, 64, 64);

    wait(&cache.request_region(&media, region, Size::new(64, 64))).unwrap();
    pool.clear();
    wait(&cache.request_region(&media, region, Size::new(64, 64))).unwrap();
    assert_eq!(fake.decodes.load(Ordering::SeqCst), 2);
}

#[test]
fn request_view_resolves_exact_region() {
    let fake = Arc::new(FakeDecoder::new(Size::new(256, 256)));
    let cache = cache_with(fake);
    let view = cache
        .request_view(&MediaId::new("a.png"), IRect::new(10, 20, 50, 40), Size::new(40, 20))
        .wait_timeout(Duration::from_secs(10))
        .unwrap();
    assert_eq!(view.intrinsic_size(), Some(Size::new(40, 20)));
}
