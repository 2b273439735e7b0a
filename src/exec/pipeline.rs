use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::cache::bitmap_pool::BitmapPool;
use crate::cache::filter_results::{FilterResultCache, ResultCacheKey};
use crate::exec::promise::Promise;
use crate::exec::scheduler::{DagScheduler, NodeDeps, NodeId, build_thread_pool};
use crate::filter::descriptor::{FilterDescriptor, fingerprint_chain, resolve_index};
use crate::filter::extension::ExtensionRegistry;
use crate::filter::result::FilterResult;
use crate::filter::step::{FilterStep, StepContext, StepInput};
use crate::foundation::core::{IRect, Size};
use crate::foundation::error::{PixelflowError, PixelflowResult};
use crate::media::source::MediaId;
use crate::pixel::buffer::PixelBuffer;
use crate::pixel::operator::OperatorSelector;

/// Configuration for [`FilterPipeline`].
#[derive(Debug, Clone)]
pub struct PipelineOpts {
    /// Worker threads; `None` lets rayon choose.
    pub threads: Option<usize>,
    /// Bound used by [`PipelineHandle::wait`].
    pub timeout: Duration,
    /// Hand an intermediate buffer to its last reader, letting noise write into it in place.
    pub allow_noise_aliasing: bool,
    /// Size used to materialize non-pixel inputs when a request has no target size.
    pub fallback_size: Size,
}

impl Default for PipelineOpts {
    fn default() -> Self {
        Self {
            threads: None,
            timeout: Duration::from_secs(60),
            allow_noise_aliasing: false,
            fallback_size: Size::new(1, 1),
        }
    }
}

impl PipelineOpts {
    /// Use exactly `threads` workers.
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads);
        self
    }

    /// Set the default wait bound.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Opt into in-place noise on intermediates.
    pub fn with_noise_aliasing(mut self, allow: bool) -> Self {
        self.allow_noise_aliasing = allow;
        self
    }
}

/// A source buffer handed to a pipeline run.
#[derive(Debug, Clone)]
pub enum SourceInput {
    /// Already available.
    Ready(FilterResult),
    /// Produced later, e.g. by [`crate::RegionDecodeCache::request_view`].
    Pending(Promise<FilterResult>),
}

impl From<FilterResult> for SourceInput {
    fn from(result: FilterResult) -> Self {
        Self::Ready(result)
    }
}

impl From<PixelBuffer> for SourceInput {
    fn from(buffer: PixelBuffer) -> Self {
        Self::Ready(FilterResult::pixels(buffer))
    }
}

impl From<Promise<FilterResult>> for SourceInput {
    fn from(promise: Promise<FilterResult>) -> Self {
        Self::Pending(promise)
    }
}

/// Where a run's result is looked up and stored in the [`FilterResultCache`].
///
/// The cache key pairs `media` with the fingerprint of the request's own chain.
#[derive(Debug, Clone)]
pub struct CacheLookup {
    /// Media the chain's sources were decoded from.
    pub media: MediaId,
    /// Source region the chain covers.
    pub region: IRect,
}

/// One invocation of a filter chain.
#[derive(Debug, Clone)]
pub struct FilterRequest {
    /// Filters in document order.
    pub chain: Vec<FilterDescriptor>,
    /// Initial entries of the results list.
    pub sources: Vec<SourceInput>,
    /// Pixel size the caller will draw the result at.
    pub target_size: Size,
    /// Ratio between canvas units and image pixels.
    pub canvas_scale: f32,
    /// Result cache participation; `None` always runs the chain.
    pub cache: Option<CacheLookup>,
}

impl FilterRequest {
    /// A request without sources, at canvas scale 1.
    pub fn new(chain: Vec<FilterDescriptor>, target_size: Size) -> Self {
        Self {
            chain,
            sources: Vec::new(),
            target_size,
            canvas_scale: 1.0,
            cache: None,
        }
    }

    /// Append a source.
    pub fn with_source(mut self, source: impl Into<SourceInput>) -> Self {
        self.sources.push(source.into());
        self
    }

    /// Set the canvas scale.
    pub fn with_canvas_scale(mut self, canvas_scale: f32) -> Self {
        self.canvas_scale = canvas_scale;
        self
    }

    /// Look up and store the result for `region` of `media`.
    pub fn with_cache(mut self, media: MediaId, region: IRect) -> Self {
        self.cache = Some(CacheLookup { media, region });
        self
    }
}

/// Counters for one run, see [`PipelineHandle::stats`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunStats {
    /// Steps that were evaluated.
    pub steps_run: u64,
    /// Steps skipped because the run was cancelled.
    pub steps_cancelled: u64,
    /// Distinct intermediate buffers handed back to the bitmap pool.
    pub buffers_released: u64,
}

#[derive(Default)]
struct RunControl {
    cancelled: AtomicBool,
    steps_run: AtomicU64,
    steps_cancelled: AtomicU64,
    buffers_released: AtomicU64,
}

impl RunControl {
    fn snapshot(&self) -> RunStats {
        RunStats {
            steps_run: self.steps_run.load(Ordering::Relaxed),
            steps_cancelled: self.steps_cancelled.load(Ordering::Relaxed),
            buffers_released: self.buffers_released.load(Ordering::Relaxed),
        }
    }
}

/// Result of [`FilterPipeline::apply`].
#[derive(Debug)]
pub struct PipelineHandle {
    done: Promise<FilterResult>,
    control: Arc<RunControl>,
    timeout: Duration,
    cached: bool,
}

impl std::fmt::Debug for RunControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunControl")
            .field("cancelled", &self.cancelled.load(Ordering::Relaxed))
            .field("stats", &self.snapshot())
            .finish()
    }
}

impl PipelineHandle {
    fn from_cache(result: FilterResult, timeout: Duration) -> Self {
        Self {
            done: Promise::resolved(result),
            control: Arc::default(),
            timeout,
            cached: true,
        }
    }

    /// Wait for the final result using the pipeline's configured timeout.
    pub fn wait(&self) -> PixelflowResult<FilterResult> {
        self.wait_timeout(self.timeout)
    }

    /// Wait at most `timeout`.
    ///
    /// On [`PixelflowError::Timeout`] the run is cancelled: steps that have not started yet
    /// complete with [`PixelflowError::Cancelled`] instead of running.
    pub fn wait_timeout(&self, timeout: Duration) -> PixelflowResult<FilterResult> {
        let out = self.done.wait_timeout(timeout);
        if let Err(err) = &out
            && err.is_timeout()
            && !self.done.is_complete()
        {
            tracing::warn!(?timeout, "filter pipeline timed out, cancelling pending steps");
            self.cancel();
        }
        out
    }

    /// Skip every step that has not started yet.
    pub fn cancel(&self) {
        self.control.cancelled.store(true, Ordering::Release);
    }

    /// The final result as a promise.
    pub fn promise(&self) -> &Promise<FilterResult> {
        &self.done
    }

    /// Whether the final result is available.
    pub fn is_complete(&self) -> bool {
        self.done.is_complete()
    }

    /// Whether the result came from the result cache without running the chain.
    pub fn is_cached(&self) -> bool {
        self.cached
    }

    /// Counters for this run so far.
    pub fn stats(&self) -> RunStats {
        self.control.snapshot()
    }
}

/// Runs filter chains on a worker pool.
///
/// Each run is a DAG of nodes: the request's sources followed by one node per filter. Nodes are
/// dispatched as their inputs complete, so no worker waits on another node and the pool size
/// does not bound chain depth.
pub struct FilterPipeline {
    opts: PipelineOpts,
    workers: Arc<rayon::ThreadPool>,
    operator: Arc<OperatorSelector>,
    extensions: Arc<ExtensionRegistry>,
    result_cache: Option<Arc<FilterResultCache>>,
    bitmap_pool: Option<Arc<dyn BitmapPool>>,
}

impl std::fmt::Debug for FilterPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterPipeline")
            .field("opts", &self.opts)
            .field("threads", &self.workers.current_num_threads())
            .field("result_cache", &self.result_cache.is_some())
            .finish()
    }
}

impl FilterPipeline {
    /// Build a pipeline. Intermediates are released to the result cache's pool, if any.
    pub fn new(
        opts: PipelineOpts,
        operator: Arc<OperatorSelector>,
        extensions: Arc<ExtensionRegistry>,
        result_cache: Option<Arc<FilterResultCache>>,
    ) -> PixelflowResult<Self> {
        let workers = Arc::new(build_thread_pool(opts.threads, "filter")?);
        let bitmap_pool = result_cache.as_ref().map(|c| Arc::clone(c.pool()));
        Ok(Self {
            opts,
            workers,
            operator,
            extensions,
            result_cache,
            bitmap_pool,
        })
    }

    /// Release intermediates to `pool` instead.
    pub fn with_bitmap_pool(mut self, pool: Arc<dyn BitmapPool>) -> Self {
        self.bitmap_pool = Some(pool);
        self
    }

    /// Options in effect.
    pub fn opts(&self) -> &PipelineOpts {
        &self.opts
    }

    /// Start evaluating `request` and return a handle to its final result.
    ///
    /// Malformed chains (bad references, invalid parameters) are rejected before any step runs.
    #[tracing::instrument(
        skip(self, request),
        fields(steps = request.chain.len(), sources = request.sources.len())
    )]
    pub fn apply(&self, request: FilterRequest) -> PixelflowResult<PipelineHandle> {
        let FilterRequest {
            chain,
            sources,
            target_size,
            canvas_scale,
            cache,
        } = request;

        if chain.is_empty() {
            return Err(PixelflowError::validation("filter chain is empty"));
        }
        if !(canvas_scale.is_finite() && canvas_scale > 0.0) {
            return Err(PixelflowError::validation(format!(
                "canvas scale must be finite and > 0, got {canvas_scale}"
            )));
        }

        let source_count = sources.len();
        let mut deps = Vec::with_capacity(source_count + chain.len());
        deps.resize(source_count, NodeDeps::new());
        let mut inputs = Vec::with_capacity(chain.len());
        for (i, desc) in chain.iter().enumerate() {
            desc.validate()?;
            let len = source_count + i;
            let resolve = |r: Option<i32>| {
                r.map(|idx| resolve_index(idx, len).map(|n| NodeId(n as u32)))
                    .transpose()
            };
            let src = resolve(desc.source_ref())?;
            let dst = resolve(desc.destination_ref())?;
            deps.push(src.into_iter().chain(dst).collect::<NodeDeps>());
            inputs.push((src, dst));
        }

        let cache = cache.map(|lookup| {
            let key = ResultCacheKey::new(fingerprint_chain(&chain), lookup.media);
            (key, lookup.region)
        });
        if let (Some(results), Some((key, region))) = (&self.result_cache, &cache)
            && let Some(buffer) = results.get(key, *region, target_size)?
        {
            return Ok(PipelineHandle::from_cache(
                FilterResult::Pixels(buffer),
                self.opts.timeout,
            ));
        }

        let fallback = if target_size.is_empty() {
            self.opts.fallback_size
        } else {
            target_size
        };
        let ctx = StepContext::new(Arc::clone(&self.operator), Arc::clone(&self.extensions))
            .with_canvas_scale(canvas_scale)
            .with_noise_aliasing(self.opts.allow_noise_aliasing)
            .with_fallback_size(fallback);

        let node_count = deps.len();
        let mut readers = vec![0u32; node_count];
        for d in deps.iter().flatten() {
            readers[d.index()] += 1;
        }

        let control = Arc::new(RunControl::default());
        let done = Promise::new();
        let run = Arc::new(Run {
            steps: chain.into_iter().map(FilterStep::new).collect(),
            inputs,
            source_count,
            final_node: NodeId((node_count - 1) as u32),
            sources: Mutex::new(sources.into_iter().map(Some).collect()),
            outcomes: Mutex::new(Slots {
                outcomes: vec![None; node_count],
                readers,
            }),
            scheduler: Mutex::new(DagScheduler::new(&deps)),
            ctx,
            handover: self.opts.allow_noise_aliasing,
            control: Arc::clone(&control),
            done: done.clone(),
            workers: Arc::clone(&self.workers),
            bitmap_pool: self.bitmap_pool.clone(),
            result_cache: self.result_cache.clone().zip(cache),
        });

        let ready = lock(&run.scheduler).pop_ready_batch(node_count);
        run.dispatch(ready);

        Ok(PipelineHandle {
            done,
            control,
            timeout: self.opts.timeout,
            cached: false,
        })
    }

    /// [`FilterPipeline::apply`] followed by [`PipelineHandle::wait`].
    pub fn apply_blocking(&self, request: FilterRequest) -> PixelflowResult<FilterResult> {
        self.apply(request)?.wait()
    }
}

fn lock<S>(m: &Mutex<S>) -> MutexGuard<'_, S> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Slots {
    outcomes: Vec<Option<PixelflowResult<FilterResult>>>,
    // Reads still to come per node.
    readers: Vec<u32>,
}

struct Run {
    steps: Vec<FilterStep>,
    inputs: Vec<(Option<NodeId>, Option<NodeId>)>,
    source_count: usize,
    final_node: NodeId,
    sources: Mutex<Vec<Option<SourceInput>>>,
    outcomes: Mutex<Slots>,
    scheduler: Mutex<DagScheduler>,
    ctx: StepContext,
    handover: bool,
    control: Arc<RunControl>,
    done: Promise<FilterResult>,
    workers: Arc<rayon::ThreadPool>,
    bitmap_pool: Option<Arc<dyn BitmapPool>>,
    result_cache: Option<(Arc<FilterResultCache>, (ResultCacheKey, IRect))>,
}

impl Run {
    fn dispatch(self: &Arc<Self>, nodes: Vec<NodeId>) {
        for node in nodes {
            if node.index() < self.source_count {
                self.start_source(node);
            } else {
                let run = Arc::clone(self);
                self.workers.spawn(move || run.run_step(node));
            }
        }
    }

    fn start_source(self: &Arc<Self>, node: NodeId) {
        let source = lock(&self.sources)[node.index()].take();
        match source {
            Some(SourceInput::Ready(result)) => self.complete_node(node, Ok(result)),
            Some(SourceInput::Pending(promise)) => {
                let run = Arc::clone(self);
                promise.on_complete(move |outcome| run.complete_node(node, outcome.clone()));
            }
            None => self.complete_node(
                node,
                Err(PixelflowError::evaluation("source started twice")),
            ),
        }
    }

    fn run_step(self: &Arc<Self>, node: NodeId) {
        let step_index = node.index() - self.source_count;
        let step = &self.steps[step_index];
        let kind = step.descriptor().kind.name();

        if self.control.cancelled.load(Ordering::Acquire) {
            self.control.steps_cancelled.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(node = node.0, kind, "step cancelled");
            self.complete_node(node, Err(PixelflowError::Cancelled));
            return;
        }

        let (src, dst) = self.inputs[step_index];
        let (source, destination) = self.read_inputs(src, dst);
        tracing::trace!(node = node.0, kind, "step start");
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            step.evaluate(source, destination, &self.ctx)
        }))
        .unwrap_or_else(|_| Err(PixelflowError::evaluation(format!("{kind} step panicked"))));
        self.control.steps_run.fetch_add(1, Ordering::Relaxed);
        if let Err(err) = &outcome {
            tracing::warn!(node = node.0, kind, error = %err, "step failed");
        }
        self.complete_node(node, outcome);
    }

    fn read_inputs(&self, src: Option<NodeId>, dst: Option<NodeId>) -> (StepInput, StepInput) {
        let mut slots = lock(&self.outcomes);
        let mut read = |node: Option<NodeId>| -> StepInput {
            let i = node?.index();
            slots.readers[i] = slots.readers[i].saturating_sub(1);
            let last = slots.readers[i] == 0;
            if self.handover && last && i >= self.source_count {
                slots.outcomes[i].take()
            } else {
                slots.outcomes[i].clone()
            }
        };
        let source = read(src);
        let destination = read(dst);
        (source, destination)
    }

    fn complete_node(self: &Arc<Self>, node: NodeId, outcome: PixelflowResult<FilterResult>) {
        let is_final = node == self.final_node;
        if is_final
            && let (Some((cache, (key, region))), Ok(FilterResult::Pixels(buffer))) =
                (&self.result_cache, &outcome)
        {
            cache.put(key.clone(), *region, Arc::clone(buffer));
        }
        let final_outcome = is_final.then(|| outcome.clone());
        lock(&self.outcomes).outcomes[node.index()] = Some(outcome);

        let (ready, finished) = {
            let mut scheduler = lock(&self.scheduler);
            scheduler.mark_done(node);
            let ready = scheduler.pop_ready_batch(self.steps.len() + self.source_count);
            (ready, scheduler.remaining() == 0)
        };
        if finished {
            self.release_intermediates();
        }
        if let Some(outcome) = final_outcome {
            self.done.complete(outcome);
        }
        self.dispatch(ready);
    }

    /// Return every distinct intermediate buffer to the bitmap pool once.
    fn release_intermediates(&self) {
        let outcomes = std::mem::take(&mut lock(&self.outcomes).outcomes);
        let ptr = |r: &Option<PixelflowResult<FilterResult>>| match r {
            Some(Ok(FilterResult::Pixels(b))) => Some(Arc::as_ptr(b)),
            _ => None,
        };
        let mut keep: Vec<*const PixelBuffer> = outcomes[..self.source_count]
            .iter()
            .filter_map(ptr)
            .collect();
        keep.extend(ptr(&outcomes[self.final_node.index()]));

        let mut distinct: HashMap<*const PixelBuffer, Arc<PixelBuffer>> = HashMap::new();
        for outcome in outcomes.into_iter().skip(self.source_count) {
            if let Some(Ok(FilterResult::Pixels(buffer))) = outcome {
                let p = Arc::as_ptr(&buffer);
                if !keep.contains(&p) {
                    distinct.entry(p).or_insert(buffer);
                }
            }
        }

        let released = distinct.len();
        if let Some(pool) = &self.bitmap_pool {
            for buffer in distinct.into_values() {
                pool.dispose(buffer);
            }
        }
        self.control
            .buffers_released
            .fetch_add(released as u64, Ordering::Relaxed);
        tracing::debug!(released, "released intermediate buffers");
    }
}

#[cfg(test)]
#[path = "../../tests/unit/exec/pipeline.rs"]
mod tests;
