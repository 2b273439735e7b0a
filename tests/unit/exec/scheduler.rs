use super::*;
use smallvec::smallvec;

fn ids(v: &[u32]) -> NodeDeps {
    v.iter().copied().map(NodeId).collect()
}

#[test]
fn scheduler_is_topological_and_deterministic() {
    // Graph:
    // 0 -> 2
    // 1 -> 2
    // 2 -> 3
    let deps = vec![ids(&[]), ids(&[]), ids(&[0, 1]), ids(&[2])];
    let mut sched = DagScheduler::new(&deps);
    let mut out = Vec::<u32>::new();
    while let Some(next) = sched.pop_ready() {
        out.push(next.0);
        sched.mark_done(next);
    }
    assert_eq!(out, vec![0, 1, 2, 3]);
    assert_eq!(sched.remaining(), 0);
}

#[test]
fn duplicate_dependency_waits_for_single_completion() {
    // A blend reading the same node twice.
    let deps = vec![ids(&[]), smallvec![NodeId(0), NodeId(0)]];
    let mut sched = DagScheduler::new(&deps);
    assert_eq!(sched.pop_ready_batch(8), vec![NodeId(0)]);
    assert!(sched.pop_ready().is_none());
    sched.mark_done(NodeId(0));
    assert_eq!(sched.pop_ready_batch(8), vec![NodeId(1)]);
}

#[test]
fn independent_branches_are_ready_together() {
    let deps = vec![ids(&[]), ids(&[0]), ids(&[0]), ids(&[1, 2])];
    let mut sched = DagScheduler::new(&deps);
    let first = sched.pop_ready_batch(usize::MAX);
    assert_eq!(first, vec![NodeId(0)]);
    sched.mark_done(NodeId(0));
    assert_eq!(sched.pop_ready_batch(usize::MAX), vec![NodeId(1), NodeId(2)]);
    assert_eq!(sched.remaining(), 3);
}

#[test]
fn zero_threads_is_rejected() {
    assert!(build_thread_pool(Some(0), "pipeline").is_err());
    let pool = build_thread_pool(Some(2), "pipeline").unwrap();
    assert_eq!(pool.current_num_threads(), 2);
}
