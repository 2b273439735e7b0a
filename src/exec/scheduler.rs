use std::cmp::Reverse;
use std::collections::BinaryHeap;

use smallvec::SmallVec;

use crate::foundation::error::{PixelflowError, PixelflowResult};

/// Index of a node in a pipeline run (sources first, then steps).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct NodeId(pub(crate) u32);

impl NodeId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Upstream nodes of one node; filter steps read at most two.
pub(crate) type NodeDeps = SmallVec<[NodeId; 2]>;

/// Deterministic dependency-count scheduler for a pipeline's node DAG.
///
/// Determinism rule: when multiple nodes are ready, the smallest `NodeId` is returned first.
pub(crate) struct DagScheduler {
    indeg: Vec<u32>,
    dependents: Vec<Vec<NodeId>>,
    ready: BinaryHeap<Reverse<u32>>,
    remaining: usize,
}

impl DagScheduler {
    /// `deps[i]` lists the nodes node `i` reads; a node may be listed twice.
    pub(crate) fn new(deps: &[NodeDeps]) -> Self {
        let n = deps.len();
        let mut indeg = vec![0u32; n];
        let mut dependents = vec![Vec::<NodeId>::new(); n];

        for (i, node_deps) in deps.iter().enumerate() {
            let mut count = 0u32;
            for d in node_deps {
                dependents[d.index()].push(NodeId(i as u32));
                count = count.saturating_add(1);
            }
            indeg[i] = count;
        }

        let mut ready = BinaryHeap::<Reverse<u32>>::new();
        for (i, &deg) in indeg.iter().enumerate() {
            if deg == 0 {
                ready.push(Reverse(i as u32));
            }
        }

        Self {
            indeg,
            dependents,
            ready,
            remaining: n,
        }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.remaining
    }

    pub(crate) fn pop_ready(&mut self) -> Option<NodeId> {
        let Reverse(id) = self.ready.pop()?;
        Some(NodeId(id))
    }

    pub(crate) fn pop_ready_batch(&mut self, max: usize) -> Vec<NodeId> {
        let mut out = Vec::with_capacity(max.min(self.ready.len()));
        for _ in 0..max {
            let Some(node) = self.pop_ready() else {
                break;
            };
            out.push(node);
        }
        out
    }

    pub(crate) fn mark_done(&mut self, done: NodeId) {
        self.remaining = self.remaining.saturating_sub(1);
        for &dep in &self.dependents[done.index()] {
            let d = &mut self.indeg[dep.index()];
            *d = d.saturating_sub(1);
            if *d == 0 {
                self.ready.push(Reverse(dep.0));
            }
        }
    }
}

pub(crate) fn build_thread_pool(
    threads: Option<usize>,
    name: &'static str,
) -> PixelflowResult<rayon::ThreadPool> {
    if let Some(n) = threads
        && n == 0
    {
        return Err(PixelflowError::validation(format!(
            "{name} 'threads' must be >= 1 when set"
        )));
    }

    let mut builder = rayon::ThreadPoolBuilder::new()
        .thread_name(move |i| format!("pixelflow-{name}-{i}"));
    if let Some(n) = threads {
        builder = builder.num_threads(n);
    }
    builder
        .build()
        .map_err(|e| PixelflowError::evaluation(format!("failed to build rayon thread pool: {e}")))
}

#[cfg(test)]
#[path = "../../tests/unit/exec/scheduler.rs"]
mod tests;
