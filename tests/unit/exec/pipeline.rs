use super::*;
use crate::cache::bitmap_pool::LruBitmapPool;
use crate::cache::filter_results::ResultCacheOpts;
use crate::filter::descriptor::FilterKind;
use crate::foundation::core::Rgba8Premul;
use crate::media::source::MediaId;
use crate::pixel::blend::BlendMode;
use crate::pixel::noise::NoiseParams;

fn pipeline(threads: usize) -> FilterPipeline {
    FilterPipeline::new(
        PipelineOpts::default()
            .with_threads(threads)
            .with_timeout(Duration::from_secs(10)),
        Arc::new(OperatorSelector::software()),
        Arc::new(ExtensionRegistry::new()),
        None,
    )
    .unwrap()
}

fn solid(argb: u32, w: u32, h: u32) -> PixelBuffer {
    PixelBuffer::filled(Size::new(w, h), Rgba8Premul::from_argb(argb))
}

fn f(kind: FilterKind) -> FilterDescriptor {
    FilterDescriptor::new(kind)
}

fn pixels(r: &FilterResult) -> Arc<PixelBuffer> {
    r.as_pixels().cloned().expect("pixel result")
}

#[test]
fn linear_chain_runs_in_dependency_order() {
    let p = pipeline(2);
    let req = FilterRequest::new(
        vec![
            f(FilterKind::Blur { radius: 1.0 }),
            f(FilterKind::Grayscale {
                amount: 1.0,
                target: None,
            }),
        ],
        Size::new(8, 8),
    )
    .with_source(solid(0xFFFF_0000, 8, 8));
    let h = p.apply(req).unwrap();
    let out = pixels(&h.wait().unwrap());
    let [r, g, b, a] = out.pixel(4, 4);
    assert_eq!(a, 255);
    assert_eq!(r, g);
    assert_eq!(g, b);
    assert_eq!(h.stats().steps_run, 2);
}

#[test]
fn deep_chain_completes_on_a_single_worker() {
    let p = pipeline(1);
    let chain = (0..64)
        .map(|_| {
            f(FilterKind::Saturate {
                amount: 1.0,
                target: None,
            })
        })
        .collect();
    let h = p
        .apply(FilterRequest::new(chain, Size::new(4, 4)).with_source(solid(0xFF10_2030, 4, 4)))
        .unwrap();
    let out = pixels(&h.wait().unwrap());
    assert_eq!(out.pixel(0, 0), Rgba8Premul::from_argb(0xFF10_2030).to_array());
    assert_eq!(h.stats().steps_run, 64);
}

#[test]
fn independent_branches_feed_a_blend() {
    let p = pipeline(4);
    // results: [src0, src1, blur(src0), blur(src1), blend(src=2, dst=3)]
    let chain = vec![
        f(FilterKind::Blur { radius: 1.0 }).with_source(0),
        f(FilterKind::Blur { radius: 1.0 }).with_source(1),
        f(FilterKind::Blend {
            mode: BlendMode::Normal,
        })
        .with_source(2)
        .with_destination(3),
    ];
    let h = p
        .apply(
            FilterRequest::new(chain, Size::new(6, 6))
                .with_source(solid(0xFF00_FF00, 6, 6))
                .with_source(solid(0xFF00_00FF, 6, 6)),
        )
        .unwrap();
    let out = pixels(&h.wait().unwrap());
    assert_eq!(out.pixel(3, 3), [0, 255, 0, 255]);
}

#[test]
fn pending_source_is_awaited_without_blocking_a_worker() {
    let p = pipeline(1);
    let source = Promise::new();
    let h = p
        .apply(
            FilterRequest::new(vec![f(FilterKind::Blur { radius: 2.0 })], Size::new(5, 5))
                .with_source(source.clone()),
        )
        .unwrap();
    assert!(!h.is_complete());
    source.complete(Ok(FilterResult::pixels(solid(0xFFFF_FFFF, 5, 5))));
    let out = pixels(&h.wait().unwrap());
    assert_eq!(out.size(), Size::new(5, 5));
}

#[test]
fn failed_source_is_masked_as_transparent_at_target_size() {
    let p = pipeline(2);
    let h = p
        .apply(
            FilterRequest::new(vec![f(FilterKind::Blur { radius: 2.0 })], Size::new(7, 3))
                .with_source(Promise::failed(PixelflowError::decode("bad header"))),
        )
        .unwrap();
    let out = pixels(&h.wait().unwrap());
    assert_eq!(out.size(), Size::new(7, 3));
    assert!(out.data().iter().all(|&b| b == 0));
}

#[test]
fn missing_extension_handler_fails_the_run() {
    let p = pipeline(2);
    let chain = vec![
        f(FilterKind::Extension {
            uri: "ext://lens".into(),
            name: "fisheye".into(),
            params: Default::default(),
        })
        .with_source(-1),
    ];
    let err = p
        .apply_blocking(FilterRequest::new(chain, Size::new(4, 4)).with_source(solid(0xFF00_0000, 4, 4)))
        .unwrap_err();
    assert!(matches!(err, PixelflowError::Evaluation(_)));
}

#[test]
fn malformed_requests_are_rejected_before_running() {
    let p = pipeline(1);
    assert!(matches!(
        p.apply(FilterRequest::new(Vec::new(), Size::new(1, 1))),
        Err(PixelflowError::Validation(_))
    ));

    let chain = vec![f(FilterKind::Blur { radius: 1.0 }).with_source(3)];
    assert!(matches!(
        p.apply(FilterRequest::new(chain, Size::new(1, 1)).with_source(solid(0, 1, 1))),
        Err(PixelflowError::Validation(_))
    ));

    let chain = vec![f(FilterKind::Blur { radius: 1.0 })];
    assert!(
        p.apply(
            FilterRequest::new(chain, Size::new(1, 1))
                .with_source(solid(0, 1, 1))
                .with_canvas_scale(0.0)
        )
        .is_err()
    );
}

#[test]
fn timeout_cancels_steps_that_have_not_started() {
    let p = pipeline(1);
    let source = Promise::new();
    let chain = vec![
        f(FilterKind::Blur { radius: 1.0 }),
        f(FilterKind::Blur { radius: 1.0 }),
    ];
    let h = p
        .apply(FilterRequest::new(chain, Size::new(4, 4)).with_source(source.clone()))
        .unwrap();

    let err = h.wait_timeout(Duration::from_millis(20)).unwrap_err();
    assert!(err.is_timeout());

    source.complete(Ok(FilterResult::pixels(solid(0xFFFF_FFFF, 4, 4))));
    let err = h.promise().wait_timeout(Duration::from_secs(10)).unwrap_err();
    assert!(matches!(err, PixelflowError::Cancelled));
    assert_eq!(h.stats().steps_run, 0);
    assert_eq!(h.stats().steps_cancelled, 2);
}

#[test]
fn intermediates_are_released_once_and_sources_are_kept() {
    let pool = Arc::new(LruBitmapPool::default());
    let p = pipeline(2).with_bitmap_pool(Arc::clone(&pool) as Arc<dyn BitmapPool>);
    let source = Arc::new(solid(0xFF80_8080, 8, 8));
    // Two readers of the same intermediate, plus a blend whose output differs from both.
    let chain = vec![
        f(FilterKind::Blur { radius: 1.0 }),
        f(FilterKind::Grayscale {
            amount: 1.0,
            target: None,
        })
        .with_source(1),
        f(FilterKind::Blend {
            mode: BlendMode::Multiply,
        })
        .with_source(1)
        .with_destination(2),
    ];
    let h = p
        .apply(
            FilterRequest::new(chain, Size::new(8, 8))
                .with_source(FilterResult::Pixels(Arc::clone(&source))),
        )
        .unwrap();
    h.wait().unwrap();
    assert_eq!(h.stats().buffers_released, 2);
    assert_eq!(Arc::strong_count(&source), 1);
    assert_eq!(pool.stats().recycled_buffers, 2);
}

#[test]
fn noise_aliasing_writes_into_the_handed_over_intermediate() {
    let chain = || {
        vec![
            f(FilterKind::Blur { radius: 1.0 }),
            f(FilterKind::Noise {
                params: NoiseParams::default().with_seed(7),
            }),
        ]
    };
    let request = || FilterRequest::new(chain(), Size::new(8, 8)).with_source(solid(0xFF40_4040, 8, 8));

    let copying = pipeline(2);
    let h = copying.apply(request()).unwrap();
    let copied = pixels(&h.wait().unwrap());
    assert_eq!(h.stats().buffers_released, 1);

    let aliasing = FilterPipeline::new(
        PipelineOpts::default().with_threads(2).with_noise_aliasing(true),
        Arc::new(OperatorSelector::software()),
        Arc::new(ExtensionRegistry::new()),
        None,
    )
    .unwrap();
    let h = aliasing.apply(request()).unwrap();
    let aliased = pixels(&h.wait().unwrap());
    assert_eq!(h.stats().buffers_released, 0);
    assert_eq!(copied.data(), aliased.data());
}

#[test]
fn result_cache_short_circuits_repeat_requests() {
    let cache = Arc::new(FilterResultCache::new(
        Arc::new(LruBitmapPool::default()),
        ResultCacheOpts::default(),
    ));
    let p = FilterPipeline::new(
        PipelineOpts::default().with_threads(2),
        Arc::new(OperatorSelector::software()),
        Arc::new(ExtensionRegistry::new()),
        Some(Arc::clone(&cache)),
    )
    .unwrap();
    let chain = vec![f(FilterKind::Blur { radius: 2.0 })];
    let region = IRect::new(0, 0, 16, 16);
    let request = || {
        FilterRequest::new(chain.clone(), Size::new(16, 16))
            .with_source(solid(0xFFFF_0000, 16, 16))
            .with_cache(MediaId::new("a.png"), region)
    };

    let first = p.apply(request()).unwrap();
    let first_out = pixels(&first.wait().unwrap());
    assert!(!first.is_cached());

    let second = p.apply(request()).unwrap();
    assert!(second.is_cached());
    assert_eq!(second.stats().steps_run, 0);
    assert!(Arc::ptr_eq(&pixels(&second.wait().unwrap()), &first_out));
}

#[test]
fn result_cache_is_keyed_by_the_requested_chain() {
    let cache = Arc::new(FilterResultCache::new(
        Arc::new(LruBitmapPool::default()),
        ResultCacheOpts::default(),
    ));
    let p = FilterPipeline::new(
        PipelineOpts::default().with_threads(2),
        Arc::new(OperatorSelector::software()),
        Arc::new(ExtensionRegistry::new()),
        Some(Arc::clone(&cache)),
    )
    .unwrap();
    let region = IRect::new(0, 0, 8, 8);
    let request = |chain: Vec<FilterDescriptor>| {
        FilterRequest::new(chain, Size::new(8, 8))
            .with_source(solid(0xFFFF_0000, 8, 8))
            .with_cache(MediaId::new("a.png"), region)
    };

    let blurred = p
        .apply(request(vec![f(FilterKind::Blur { radius: 2.0 })]))
        .unwrap();
    blurred.wait().unwrap();

    let gray = p
        .apply(request(vec![f(FilterKind::Grayscale {
            amount: 1.0,
            target: None,
        })]))
        .unwrap();
    assert!(!gray.is_cached());
    let out = pixels(&gray.wait().unwrap());
    let [r, g, b, _] = out.pixel(0, 0);
    assert_eq!((r, r), (g, b));
    assert_eq!(cache.stats().hits, 0);
}
